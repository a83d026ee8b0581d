use crate::config::toml_config::{DeploymentConfig, EnvConfig, Topology};
use crate::core::context::Context;
use crate::domain::ports::Storage;
use crate::utils::error::Result;
use async_trait::async_trait;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "http-api-stacks")]
#[command(about = "Synthesizes the HTTP API → VPC link → internal ALB → Fargate stacks")]
pub struct CliArgs {
    /// TOML deployment file; built-in defaults are used without one
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub topology: Option<Topology>,

    #[arg(long, default_value = "cdk.out")]
    pub output: String,

    /// Context values, e.g. `-c httpVpcLink=65vcat`
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    #[arg(long)]
    pub region: Option<String>,

    #[arg(long)]
    pub account: Option<String>,

    #[arg(long, help = "Print the synthesis plan without writing files")]
    pub dry_run: bool,

    #[arg(long, help = "Enable system monitoring (memory, elapsed time)")]
    pub monitor: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,
}

impl CliArgs {
    /// 載入設定檔（沒有就用預設值），再套用命令列參數
    pub fn load_config(&self) -> Result<DeploymentConfig> {
        let mut config = match &self.config {
            Some(path) => {
                tracing::info!("📄 Loading configuration from {}", path.display());
                DeploymentConfig::from_file(path)?
            }
            None => DeploymentConfig::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut DeploymentConfig) {
        if let Some(topology) = self.topology {
            config.app.topology = topology;
        }
        if self.region.is_some() || self.account.is_some() {
            let EnvConfig { account, region } = config.env.clone();
            config.env = EnvConfig {
                account: self.account.clone().or(account),
                region: self.region.clone().or(region),
            };
        }
    }

    pub fn context(&self) -> Result<Context> {
        Context::from_pairs(&self.context)
    }
}

/// 將 cloud assembly 寫到本機目錄
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: String,
}

impl LocalStorage {
    pub fn new(base_path: String) -> Self {
        Self { base_path }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = Path::new(&self.base_path).join(path);
        let data = fs::read(full_path)?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = Path::new(&self.base_path).join(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(full_path, data)?;
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let full_path = Path::new(&self.base_path).join(path);
        match fs::remove_file(full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self) -> String {
        self.base_path.clone()
    }
}
