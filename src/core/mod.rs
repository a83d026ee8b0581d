pub mod app;
pub mod assembly;
pub mod constructs;
pub mod context;
pub mod stack;
pub mod synth;

pub use crate::domain::model::{Expr, Output, Parameter, Resource, Template};
pub use crate::domain::ports::{Construct, Storage};
pub use crate::domain::reference::{Environment, ListenerReference, LogicalRef, PrivateLinkHandle};
pub use crate::utils::error::Result;
