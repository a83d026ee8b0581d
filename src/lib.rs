pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliArgs, LocalStorage};

pub use app::{assemble, ComputeIngressStack, PublicEdgeStack};
pub use config::{DeploymentConfig, Topology};
pub use core::{app::App, context::Context, synth::Synthesizer};
pub use utils::error::{Result, SynthError};
