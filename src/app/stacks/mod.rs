pub mod compute;
pub mod edge;

pub use compute::ComputeIngressStack;
pub use edge::PublicEdgeStack;
