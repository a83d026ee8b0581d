pub mod assembly;
pub mod stacks;

pub use assembly::{assemble, resolve_identifiers};
pub use stacks::{ComputeIngressStack, PublicEdgeStack};
