// Domain layer: template model, cross-stack handles and ports.

pub mod model;
pub mod ports;
pub mod reference;
