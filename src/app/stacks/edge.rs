use crate::config::toml_config::{BastionConfig, DeploymentConfig};
use crate::core::constructs::apigw::{derive_endpoint_expr, route, HttpApi, Integration, IntegrationProps, PROXY_ROUTE_KEY};
use crate::core::constructs::ec2::{
    latest_amazon_linux2, Instance, InstanceProps, IngressRule, SecurityGroup, SecurityGroupProps,
    SubnetConfiguration, SubnetType, Vpc, VpcProps,
};
use crate::core::stack::Stack;
use crate::domain::model::{Expr, Output};
use crate::domain::reference::{ListenerReference, PrivateLinkHandle};
use crate::utils::error::Result;

pub const API_ID: &str = "http-api";
pub const INTEGRATION_ID: &str = "HttpApiGatewayIntegration";

/// 公開部分：HTTP API 與導向私有網路的 catch-all route，可選擇加上跳板機
#[derive(Debug, Clone)]
pub struct PublicEdgeStack {
    pub api_endpoint: Expr,
    /// (服務名稱, endpoint)，依服務順序
    pub service_endpoints: Vec<(String, Expr)>,
}

impl PublicEdgeStack {
    /// 在 `stack` 中宣告 edge 資源。handle 可以是同一個 app 內其他 stack 的
    /// live 參照，也可以是單純的識別碼
    pub fn build(
        stack: &mut Stack,
        config: &DeploymentConfig,
        http_vpc_link: &PrivateLinkHandle,
        http_api_listener: &ListenerReference,
        with_bastion: bool,
    ) -> Result<Self> {
        if with_bastion && config.edge.bastion.enabled {
            Self::declare_bastion(stack, &config.edge.bastion)?;
        }

        let api = HttpApi::new(stack, API_ID, &config.edge.api_name, true)?;
        let integration = Integration::private(
            stack,
            INTEGRATION_ID,
            &api,
            http_vpc_link,
            http_api_listener,
            &IntegrationProps::default(),
        )?;
        route(stack, "Route", &api, PROXY_ROUTE_KEY, &integration)?;

        let api_endpoint = api.api_endpoint();
        let with_outputs = config.edge.endpoint_outputs;
        if with_outputs {
            stack.add_output("HTTP API endpoint: ", Output::new(api_endpoint.clone()))?;
        }

        let mut service_endpoints = Vec::with_capacity(config.services.len());
        for service in &config.services {
            let endpoint = derive_endpoint_expr(&api_endpoint, &service.path);
            if with_outputs {
                stack.add_output(&service.title(), Output::new(endpoint.clone()))?;
            }
            service_endpoints.push((service.name.clone(), endpoint));
        }

        tracing::info!(
            "🌐 Edge stack {}: link {}, {} endpoint(s)",
            stack.id(),
            if http_vpc_link.handle().is_live() { "live" } else { "by identifier" },
            service_endpoints.len()
        );

        Ok(Self {
            api_endpoint,
            service_endpoints,
        })
    }

    /// 跳板機：獨立的 public VPC，只開 SSH
    fn declare_bastion(stack: &mut Stack, bastion: &BastionConfig) -> Result<Instance> {
        let vpc = Vpc::new(
            stack,
            "ConsumerVPC",
            &VpcProps {
                cidr: bastion.vpc_cidr.clone(),
                nat_gateways: Some(0),
                subnets: vec![SubnetConfiguration::new("ingress", SubnetType::Public, Some(24))],
                ..VpcProps::default()
            },
        )?;

        let security_group = SecurityGroup::new(
            stack,
            "bastionSecGrp",
            SecurityGroupProps {
                vpc: &vpc,
                name: Some("bastionSecGrp".to_string()),
                description: None,
                allow_all_outbound: true,
                ingress: vec![IngressRule::tcp_from_any_ipv4(bastion.ssh_port)],
            },
        )?;

        let image_id = latest_amazon_linux2(stack)?;
        let instance = Instance::new(
            stack,
            "BastionHost",
            InstanceProps {
                vpc: &vpc,
                instance_type: bastion.instance_type.clone(),
                image_id,
                security_group: &security_group,
                key_name: bastion.key_name.clone(),
            },
        )?;

        stack.add_output("EC2 public ip address: ", Output::new(instance.public_ip()))?;
        Ok(instance)
    }
}
