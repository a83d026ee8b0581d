use crate::core::constructs::ec2::VpcProps;
use crate::core::constructs::ecs::{ContainerImage, RemovalPolicy};
use crate::core::constructs::elbv2::{HealthCheck, RouteRule};
use crate::core::stack::Stack;
use crate::domain::reference::Environment;
use crate::utils::error::{Result, SynthError};
use crate::utils::validation::{
    validate_listener_arn, validate_non_empty_string, validate_path_prefix, validate_range,
    validate_unique_priorities, validate_vpc_link_id, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// 要合成哪些 stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// Everything in one stack
    SingleStack,
    /// Compute and edge stacks in one environment, wired with exports
    #[default]
    SplitStacks,
    /// Only the compute stack; prints the VPC link id and listener ARN
    ComputeOnly,
    /// Only the edge stack, pointed at existing resources by identifier
    EdgeOnly,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Topology::SingleStack => "single-stack",
            Topology::SplitStacks => "split-stacks",
            Topology::ComputeOnly => "compute-only",
            Topology::EdgeOnly => "edge-only",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamespaceKind {
    /// 獨立的 `PrivateDnsNamespace` 資源
    #[default]
    PrivateDns,
    /// 由 cluster 建立的預設 namespace
    ClusterDefault,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub env: EnvConfig,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub edge: EdgeConfig,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
    /// 沒有設定 `[[services]]` 時為 true，single-stack 會改用自己的預設
    #[serde(skip)]
    services_defaulted: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            env: EnvConfig::default(),
            compute: ComputeConfig::default(),
            edge: EdgeConfig::default(),
            services: default_services(),
            services_defaulted: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub topology: Topology,
    pub compute_stack_id: String,
    pub edge_stack_id: String,
    pub single_stack_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            compute_stack_id: "FargateVpclinkStack".to_string(),
            edge_stack_id: "HttpApiStack".to_string(),
            single_stack_id: "HttpApiBlogCdkLatestStack".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            account: None,
            region: Some("us-west-2".to_string()),
        }
    }
}

impl EnvConfig {
    pub fn to_environment(&self) -> Environment {
        Environment::new(self.account.clone(), self.region.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VpcConfig {
    pub cidr: String,
    pub max_azs: u8,
    pub nat_gateways: Option<u8>,
}

impl Default for VpcConfig {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: None,
        }
    }
}

impl VpcConfig {
    pub fn to_props(&self) -> VpcProps {
        VpcProps {
            cidr: self.cidr.clone(),
            max_azs: self.max_azs,
            nat_gateways: self.nat_gateways,
            ..VpcProps::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    pub kind: NamespaceKind,
    pub name: String,
    pub description: Option<String>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            kind: NamespaceKind::default(),
            name: "http-api.local".to_string(),
            description: Some("Private DnsNamespace for Microservices".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub port: u16,
    pub fixed_response: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            fixed_response: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub vpc: VpcConfig,
    pub namespace: NamespaceConfig,
    pub listener: ListenerConfig,
    pub vpc_link_name: String,
    pub log_removal_policy: RemovalPolicy,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            vpc: VpcConfig::default(),
            namespace: NamespaceConfig::default(),
            listener: ListenerConfig::default(),
            vpc_link_name: "http-api-vpclink".to_string(),
            log_removal_policy: RemovalPolicy::Destroy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BastionConfig {
    pub enabled: bool,
    pub instance_type: String,
    pub key_name: Option<String>,
    pub ssh_port: u16,
    pub vpc_cidr: String,
}

impl Default for BastionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance_type: "t3.nano".to_string(),
            key_name: Some("ssh-key".to_string()),
            ssh_port: 22,
            vpc_cidr: "10.0.0.0/16".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub api_name: String,
    /// edge stack 的環境，與 `[env]` 不同時才需要（edge-only）
    pub env: Option<EnvConfig>,
    pub vpc_link_id: Option<String>,
    pub listener_arn: Option<String>,
    /// 是否輸出 API endpoint 與各服務的 endpoint
    pub endpoint_outputs: bool,
    pub bastion: BastionConfig,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            api_name: "http-api".to_string(),
            env: None,
            vpc_link_id: None,
            listener_arn: None,
            endpoint_outputs: true,
            bastion: BastionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// 預設為 `<service path>/health`
    pub path: Option<String>,
    pub interval: u32,
    pub timeout: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval: 30,
            timeout: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// 路徑前綴，例如 `/api/books`；規則比對 `<path>*`
    pub path: String,
    pub priority: u32,
    pub image: ContainerImage,
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cloud_map: bool,
    #[serde(default)]
    pub log_group: Option<String>,
    #[serde(default)]
    pub stream_prefix: Option<String>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

fn default_cpu() -> u32 {
    256
}

fn default_memory_mib() -> u32 {
    512
}

fn default_desired_count() -> u32 {
    2
}

fn default_port() -> u16 {
    80
}

fn default_true() -> bool {
    true
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig::new("bookService", "/api/books", 1, ContainerImage::Ecr {
            repository: "book-service".to_string(),
            tag: "latest".to_string(),
        }),
        ServiceConfig::new("authorService", "/api/authors", 2, ContainerImage::Ecr {
            repository: "author-service".to_string(),
            tag: "latest".to_string(),
        }),
    ]
}

/// single-stack 的服務：公開 registry 映像，只有 bookService 註冊 Cloud Map
fn single_stack_services() -> Vec<ServiceConfig> {
    let book = ServiceConfig::new("bookService", "/api/books", 1, ContainerImage::Registry {
        image: "ibuchh/book-service".to_string(),
    });
    let mut author = ServiceConfig::new("authorService", "/api/authors", 2, ContainerImage::Registry {
        image: "ibuchh/author-service".to_string(),
    });
    author.cloud_map = false;
    vec![book, author]
}

/// `bookService` -> `BookService`
fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl ServiceConfig {
    pub fn new(name: &str, path: &str, priority: u32, image: ContainerImage) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            priority,
            image,
            cpu: default_cpu(),
            memory_mib: default_memory_mib(),
            desired_count: default_desired_count(),
            port: default_port(),
            cloud_map: true,
            log_group: None,
            stream_prefix: None,
            health_check: HealthCheckConfig::default(),
        }
    }

    /// `bookService` -> `BookService`，用於 output id 與日誌名稱
    pub fn title(&self) -> String {
        capitalize(&self.name)
    }

    pub fn log_group_name(&self) -> String {
        self.log_group
            .clone()
            .unwrap_or_else(|| format!("/ecs/{}", self.title()))
    }

    pub fn log_stream_prefix(&self) -> String {
        self.stream_prefix.clone().unwrap_or_else(|| self.title())
    }

    pub fn route_rule(&self) -> RouteRule {
        RouteRule {
            target: self.name.clone(),
            path_pattern: format!("{}*", self.path),
            priority: self.priority,
            port: self.port,
            health_check: HealthCheck::new(
                self.health_check
                    .path
                    .clone()
                    .unwrap_or_else(|| format!("{}/health", self.path)),
                self.health_check.interval,
                self.health_check.timeout,
            ),
        }
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"))
}

impl DeploymentConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(SynthError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);
        let parse_error = |e: toml::de::Error| SynthError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        };

        let table: toml::Table = toml::from_str(&processed_content).map_err(parse_error)?;
        let services_defaulted = !table.contains_key("services");
        let mut config: Self = toml::Value::Table(table).try_into().map_err(parse_error)?;
        config.services_defaulted = services_defaulted;
        Ok(config)
    }

    /// 單一 stack 版本：沒有指定 `[[services]]` 時改用 registry 映像、
    /// cluster 預設的 `http-api` namespace，且只輸出 ALB DNS
    pub fn single_stack_preset(&self) -> Self {
        let mut config = self.clone();
        if !self.services_defaulted {
            return config;
        }

        config.services = single_stack_services();
        config.compute.namespace = NamespaceConfig {
            kind: NamespaceKind::ClusterDefault,
            name: "http-api".to_string(),
            description: None,
        };
        config.edge.endpoint_outputs = false;
        config
    }

    /// 替換服務清單，之後不再套用 single-stack 預設
    pub fn set_services(&mut self, services: Vec<ServiceConfig>) {
        self.services = services;
        self.services_defaulted = false;
    }

    /// 替換環境變數 (例如 ${ACCOUNT_ID})，未設定的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        env_var_pattern()
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    pub fn topology(&self) -> Topology {
        self.app.topology
    }

    pub fn environment(&self) -> Environment {
        self.env.to_environment()
    }

    /// edge stack 的環境：有 `[edge.env]` 就用它，否則用 `[env]`
    pub fn edge_environment(&self) -> Environment {
        self.edge
            .env
            .as_ref()
            .map(EnvConfig::to_environment)
            .unwrap_or_else(|| self.environment())
    }

    pub fn route_rules(&self) -> Vec<RouteRule> {
        self.services.iter().map(ServiceConfig::route_rule).collect()
    }

    fn validate_services(&self) -> Result<()> {
        if self.services.is_empty() && self.topology() != Topology::EdgeOnly {
            return Err(SynthError::MissingConfigError {
                field: "services".to_string(),
            });
        }

        // 服務名稱會被清理成 logical id 與 output id，比對清理後的結果
        let mut construct_ids: HashMap<String, &str> = HashMap::new();
        let mut output_ids: HashMap<String, &str> = HashMap::new();
        for service in &self.services {
            let field = format!("services.{}", service.name);
            validate_non_empty_string("services.name", &service.name)?;
            let construct_id = Stack::sanitize_id(&service.name);
            if construct_id.is_empty() {
                return Err(SynthError::InvalidConfigValueError {
                    field: "services.name".to_string(),
                    value: service.name.clone(),
                    reason: "Service name must contain at least one alphanumeric character".to_string(),
                });
            }
            let output_id = Stack::sanitize_id(&service.title());
            let clash = construct_ids
                .insert(construct_id.clone(), service.name.as_str())
                .map(|existing| (existing, construct_id))
                .or_else(|| {
                    output_ids
                        .insert(output_id.clone(), service.name.as_str())
                        .map(|existing| (existing, output_id))
                });
            if let Some((existing, id)) = clash {
                return Err(SynthError::ConfigError {
                    message: format!(
                        "Services '{}' and '{}' both map to id '{}'; service names must stay unique once non-alphanumeric characters are dropped",
                        existing, service.name, id
                    ),
                });
            }
            validate_path_prefix(&format!("{}.path", field), &service.path)?;
            validate_range(&format!("{}.desired_count", field), service.desired_count, 0, 1000)?;
            validate_range(&format!("{}.port", field), service.port, 1, 65535)?;
            service.route_rule().validate()?;
        }

        validate_unique_priorities(
            "compute.listener",
            self.services.iter().map(|s| (s.name.as_str(), s.priority)),
        )
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("app.compute_stack_id", &self.app.compute_stack_id)?;
        validate_non_empty_string("app.edge_stack_id", &self.app.edge_stack_id)?;
        validate_non_empty_string("app.single_stack_id", &self.app.single_stack_id)?;
        if self.app.compute_stack_id == self.app.edge_stack_id {
            return Err(SynthError::ConfigValidationError {
                field: "app.edge_stack_id".to_string(),
                message: "Compute and edge stacks need different ids".to_string(),
            });
        }

        validate_non_empty_string("compute.vpc_link_name", &self.compute.vpc_link_name)?;
        validate_non_empty_string("compute.namespace.name", &self.compute.namespace.name)?;
        validate_range("compute.vpc.max_azs", self.compute.vpc.max_azs, 1, 6)?;
        validate_range("compute.listener.port", self.compute.listener.port, 1, 65535)?;
        validate_range(
            "compute.listener.fixed_response",
            self.compute.listener.fixed_response,
            200,
            599,
        )?;
        crate::core::constructs::ec2::parse_cidr(&self.compute.vpc.cidr)?;

        validate_non_empty_string("edge.api_name", &self.edge.api_name)?;
        if self.edge.bastion.enabled {
            validate_non_empty_string("edge.bastion.instance_type", &self.edge.bastion.instance_type)?;
            crate::core::constructs::ec2::parse_cidr(&self.edge.bastion.vpc_cidr)?;
        }
        if let Some(id) = &self.edge.vpc_link_id {
            validate_vpc_link_id("edge.vpc_link_id", id)?;
        }
        if let Some(arn) = &self.edge.listener_arn {
            validate_listener_arn("edge.listener_arn", arn)?;
        }

        self.validate_services()
    }
}

impl Validate for DeploymentConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
