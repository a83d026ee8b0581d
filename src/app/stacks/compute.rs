use crate::config::toml_config::{DeploymentConfig, NamespaceKind, ServiceConfig};
use crate::core::constructs::apigw::vpc_link;
use crate::core::constructs::ec2::{IngressRule, SecurityGroup, SecurityGroupProps, Vpc};
use crate::core::constructs::ecs::{
    CloudMapOptions, Cluster, ContainerDefinition, FargateService, FargateServiceProps,
    FargateTaskDefinition, LogGroup, PrivateDnsNamespace, TaskDefinitionProps, TaskRole,
    TASK_EXECUTION_POLICY,
};
use crate::core::constructs::elbv2::ApplicationLoadBalancer;
use crate::core::stack::Stack;
use crate::domain::model::{Expr, Output};
use crate::domain::reference::{ListenerReference, PrivateLinkHandle};
use crate::utils::error::Result;

pub const PRODUCER_VPC_ID: &str = "ProducerVPC";
pub const LOAD_BALANCER_ID: &str = "httpapiInternalALB";
pub const LISTENER_ID: &str = "httpapiListener";
pub const VPC_LINK_ID: &str = "HttpVpcLink";

/// 私有部分：VPC、cluster、內部 ALB 後的服務，以及讓公開 API 進來的 VPC link。
///
/// 只有兩個 handle 會離開這個 stack。
#[derive(Debug, Clone)]
pub struct ComputeIngressStack {
    pub http_vpc_link: PrivateLinkHandle,
    pub http_api_listener: ListenerReference,
    load_balancer_dns: Expr,
}

impl ComputeIngressStack {
    /// 在 `stack` 中宣告運算資源
    pub fn build(stack: &mut Stack, config: &DeploymentConfig, vpc_id: &str) -> Result<Self> {
        let compute = &config.compute;

        let vpc = Vpc::new(stack, vpc_id, &compute.vpc.to_props())?;
        let cluster = Cluster::new(stack, "Fargate Cluster")?;

        // Cloud Map 命名空間
        let namespace = match compute.namespace.kind {
            NamespaceKind::PrivateDns => PrivateDnsNamespace::new(
                stack,
                "DnsNamespace",
                &compute.namespace.name,
                &vpc,
                compute.namespace.description.as_deref(),
            )?,
            NamespaceKind::ClusterDefault => {
                cluster.add_default_cloud_map_namespace(stack, &compute.namespace.name, &vpc)?
            }
        };

        let task_role = TaskRole::new(stack, "ecsTaskExecutionRole", &[TASK_EXECUTION_POLICY])?;

        let mut services = Vec::with_capacity(config.services.len());
        for service in &config.services {
            let handle = Self::declare_service(stack, config, service, &vpc, &cluster, &namespace, &task_role)?;
            services.push((service, handle));
        }

        let alb = ApplicationLoadBalancer::new(stack, LOAD_BALANCER_ID, &vpc, false)?;
        let mut listener = alb.add_listener(
            stack,
            LISTENER_ID,
            compute.listener.port,
            compute.listener.fixed_response,
        )?;

        for (service, handle) in &services {
            listener.add_targets(
                stack,
                &format!("{}TargetGroup", service.name),
                &service.route_rule(),
                handle,
            )?;
        }

        let http_vpc_link = vpc_link(stack, VPC_LINK_ID, &compute.vpc_link_name, vpc.private_subnet_ids())?;

        tracing::info!(
            "🏗️  Compute stack {}: {} service(s), {} resources",
            stack.id(),
            services.len(),
            stack.resource_count()
        );

        Ok(Self {
            http_vpc_link,
            http_api_listener: listener.listener_reference(),
            load_balancer_dns: alb.dns_name(),
        })
    }

    fn declare_service(
        stack: &mut Stack,
        config: &DeploymentConfig,
        service: &ServiceConfig,
        vpc: &Vpc,
        cluster: &Cluster,
        namespace: &PrivateDnsNamespace,
        task_role: &TaskRole,
    ) -> Result<FargateService> {
        let name = &service.name;

        let log_group = LogGroup::new(
            stack,
            &format!("{}LogGroup", name),
            &service.log_group_name(),
            config.compute.log_removal_policy,
        )?;

        let task_definition = FargateTaskDefinition::new(
            stack,
            &format!("{}TaskDef", name),
            TaskDefinitionProps {
                cpu: service.cpu,
                memory_mib: service.memory_mib,
                task_role,
                container: ContainerDefinition {
                    name: format!("{}Container", name),
                    image: service.image.clone(),
                    log_group: &log_group,
                    stream_prefix: service.log_stream_prefix(),
                    port: service.port,
                },
            },
        )?;

        let security_group = SecurityGroup::new(
            stack,
            &format!("{}SecurityGroup", name),
            SecurityGroupProps {
                vpc,
                name: Some(format!("{}SecurityGroup", name)),
                description: None,
                allow_all_outbound: true,
                ingress: vec![IngressRule::tcp_from_any_ipv4(service.port)],
            },
        )?;

        let cloud_map = service.cloud_map.then(|| CloudMapOptions {
            name: name.clone(),
            namespace,
        });

        tracing::debug!("Declaring service {} ({} -> {})", name, service.path, service.log_group_name());
        FargateService::new(
            stack,
            name,
            FargateServiceProps {
                cluster,
                task_definition: &task_definition,
                vpc,
                desired_count: service.desired_count,
                assign_public_ip: false,
                security_group: &security_group,
                cloud_map,
            },
        )
    }

    /// 給 edge 部署用的 context 值（跨帳號時手動帶入）
    pub fn add_handle_outputs(&self, stack: &mut Stack) -> Result<()> {
        stack.add_output(
            "HttpVpcLinkId",
            Output::new(self.http_vpc_link.to_expr()).description("Pass as -c httpVpcLink=<value>"),
        )?;
        stack.add_output(
            "HttpApiListenerArn",
            Output::new(self.http_api_listener.to_expr()).description("Pass as -c httpApiListener=<value>"),
        )
    }

    pub fn add_load_balancer_output(&self, stack: &mut Stack) -> Result<()> {
        stack.add_output("ALBDNS: ", Output::new(self.load_balancer_dns.clone()))
    }
}
