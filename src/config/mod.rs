#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::{CliArgs, LocalStorage};
pub use toml_config::{DeploymentConfig, NamespaceKind, ServiceConfig, Topology};
