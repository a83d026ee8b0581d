//! 容器相關：cluster、Cloud Map namespace、task role、log group、
//! Fargate task definition 與 service

use crate::core::constructs::ec2::{SecurityGroup, Vpc};
use crate::core::stack::Stack;
use crate::domain::model::{DeletionPolicy, Expr, Pseudo, Resource};
use crate::domain::ports::Construct;
use crate::domain::reference::LogicalRef;
use crate::utils::error::Result;
use crate::utils::validation::validate_range;
use serde::{Deserialize, Serialize};

pub const TASK_EXECUTION_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";

/// CloudWatch Logs 預設保留兩年
const DEFAULT_LOG_RETENTION_DAYS: u32 = 731;

#[derive(Debug, Clone)]
pub struct Cluster {
    node: LogicalRef,
}

impl Construct for Cluster {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl Cluster {
    pub fn new(stack: &mut Stack, id: &str) -> Result<Self> {
        let node = stack.add_resource(id, Resource::new("AWS::ECS::Cluster"))?;
        Ok(Self { node })
    }

    /// cluster 的預設 Cloud Map namespace（`<cluster>DefaultServiceDiscoveryNamespace`）
    pub fn add_default_cloud_map_namespace(&self, stack: &mut Stack, name: &str, vpc: &Vpc) -> Result<PrivateDnsNamespace> {
        PrivateDnsNamespace::new(
            stack,
            &format!("{}DefaultServiceDiscoveryNamespace", self.logical_id()),
            name,
            vpc,
            None,
        )
    }
}

#[derive(Debug, Clone)]
pub struct PrivateDnsNamespace {
    node: LogicalRef,
}

impl Construct for PrivateDnsNamespace {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl PrivateDnsNamespace {
    pub fn new(stack: &mut Stack, id: &str, name: &str, vpc: &Vpc, description: Option<&str>) -> Result<Self> {
        let mut resource = Resource::new("AWS::ServiceDiscovery::PrivateDnsNamespace").prop("Name", name);
        if let Some(description) = description {
            resource = resource.prop("Description", description);
        }
        resource = resource.prop("Vpc", vpc.reference());

        let node = stack.add_resource(id, resource)?;
        Ok(Self { node })
    }

    pub fn namespace_id(&self) -> Expr {
        self.attribute("Id")
    }
}

#[derive(Debug, Clone)]
pub struct TaskRole {
    node: LogicalRef,
}

impl Construct for TaskRole {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

/// `arn:<partition>:iam::aws:policy/<name>`
pub fn aws_managed_policy_arn(name: &str) -> Expr {
    Expr::concat([
        Expr::from("arn:"),
        Expr::Pseudo(Pseudo::Partition),
        Expr::from(format!(":iam::aws:policy/{}", name)),
    ])
}

impl TaskRole {
    /// ECS task 可使用的角色，附加指定的 AWS managed policy
    pub fn new(stack: &mut Stack, id: &str, managed_policies: &[&str]) -> Result<Self> {
        let assume_role = Expr::map([
            (
                "Statement",
                Expr::list([Expr::map([
                    ("Action", Expr::from("sts:AssumeRole")),
                    ("Effect", Expr::from("Allow")),
                    (
                        "Principal",
                        Expr::map([("Service", Expr::from("ecs-tasks.amazonaws.com"))]),
                    ),
                ])]),
            ),
            ("Version", Expr::from("2012-10-17")),
        ]);

        let mut resource = Resource::new("AWS::IAM::Role").prop("AssumeRolePolicyDocument", assume_role);
        if !managed_policies.is_empty() {
            resource = resource.prop(
                "ManagedPolicyArns",
                Expr::list(managed_policies.iter().map(|p| aws_managed_policy_arn(p))),
            );
        }

        let node = stack.add_resource(id, resource)?;
        Ok(Self { node })
    }

    pub fn arn(&self) -> Expr {
        self.attribute("Arn")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    #[default]
    Destroy,
    Retain,
}

impl RemovalPolicy {
    fn deletion_policy(self) -> DeletionPolicy {
        match self {
            RemovalPolicy::Destroy => DeletionPolicy::Delete,
            RemovalPolicy::Retain => DeletionPolicy::Retain,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogGroup {
    node: LogicalRef,
}

impl Construct for LogGroup {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl LogGroup {
    pub fn new(stack: &mut Stack, id: &str, name: &str, removal_policy: RemovalPolicy) -> Result<Self> {
        let node = stack.add_resource(
            id,
            Resource::new("AWS::Logs::LogGroup")
                .prop("LogGroupName", name)
                .prop("RetentionInDays", DEFAULT_LOG_RETENTION_DAYS)
                .deletion_policy(removal_policy.deletion_policy()),
        )?;
        Ok(Self { node })
    }
}

/// 容器映像來源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum ContainerImage {
    /// 部署帳號 ECR 中的 repository
    Ecr {
        repository: String,
        #[serde(default = "default_tag")]
        tag: String,
    },
    /// 公開 registry 的映像，例如 `ibuchh/book-service`
    Registry { image: String },
}

fn default_tag() -> String {
    "latest".to_string()
}

impl ContainerImage {
    pub fn image_uri(&self) -> Expr {
        match self {
            ContainerImage::Ecr { repository, tag } => Expr::concat([
                Expr::Pseudo(Pseudo::AccountId),
                Expr::from(".dkr.ecr."),
                Expr::Pseudo(Pseudo::Region),
                Expr::from("."),
                Expr::Pseudo(Pseudo::UrlSuffix),
                Expr::from(format!("/{}:{}", repository, tag)),
            ]),
            ContainerImage::Registry { image } => Expr::from(image.as_str()),
        }
    }
}

pub struct ContainerDefinition<'a> {
    pub name: String,
    pub image: ContainerImage,
    pub log_group: &'a LogGroup,
    pub stream_prefix: String,
    pub port: u16,
}

pub struct TaskDefinitionProps<'a> {
    pub cpu: u32,
    pub memory_mib: u32,
    pub task_role: &'a TaskRole,
    pub container: ContainerDefinition<'a>,
}

#[derive(Debug, Clone)]
pub struct FargateTaskDefinition {
    node: LogicalRef,
    container_name: String,
    container_port: u16,
}

impl Construct for FargateTaskDefinition {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl FargateTaskDefinition {
    pub fn new(stack: &mut Stack, id: &str, props: TaskDefinitionProps<'_>) -> Result<Self> {
        validate_range(&format!("{}.cpu", id), props.cpu, 256, 16384)?;
        validate_range(&format!("{}.memory_mib", id), props.memory_mib, 512, 122880)?;

        let container = &props.container;
        let definition = Expr::map([
            ("Essential", Expr::from(true)),
            ("Image", container.image.image_uri()),
            (
                "LogConfiguration",
                Expr::map([
                    ("LogDriver", Expr::from("awslogs")),
                    (
                        "Options",
                        Expr::map([
                            ("awslogs-group", container.log_group.reference()),
                            ("awslogs-stream-prefix", Expr::from(container.stream_prefix.as_str())),
                            ("awslogs-region", Expr::Pseudo(Pseudo::Region)),
                        ]),
                    ),
                ]),
            ),
            ("Name", Expr::from(container.name.as_str())),
            (
                "PortMappings",
                Expr::list([Expr::map([
                    ("ContainerPort", Expr::from(u32::from(container.port))),
                    ("Protocol", Expr::from("tcp")),
                ])]),
            ),
        ]);

        let node = stack.add_resource(
            id,
            Resource::new("AWS::ECS::TaskDefinition")
                .prop("ContainerDefinitions", Expr::list([definition]))
                .prop("Cpu", props.cpu.to_string())
                .prop("ExecutionRoleArn", props.task_role.arn())
                .prop("Family", format!("{}{}", Stack::sanitize_id(stack.id()), Stack::sanitize_id(id)))
                .prop("Memory", props.memory_mib.to_string())
                .prop("NetworkMode", "awsvpc")
                .prop("RequiresCompatibilities", Expr::list([Expr::from("FARGATE")]))
                .prop("TaskRoleArn", props.task_role.arn()),
        )?;

        Ok(Self {
            node,
            container_name: container.name.clone(),
            container_port: container.port,
        })
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn container_port(&self) -> u16 {
        self.container_port
    }
}

pub struct CloudMapOptions<'a> {
    pub name: String,
    pub namespace: &'a PrivateDnsNamespace,
}

pub struct FargateServiceProps<'a> {
    pub cluster: &'a Cluster,
    pub task_definition: &'a FargateTaskDefinition,
    pub vpc: &'a Vpc,
    pub desired_count: u32,
    pub assign_public_ip: bool,
    pub security_group: &'a SecurityGroup,
    pub cloud_map: Option<CloudMapOptions<'a>>,
}

#[derive(Debug, Clone)]
pub struct FargateService {
    node: LogicalRef,
    container_name: String,
    container_port: u16,
}

impl Construct for FargateService {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl FargateService {
    /// 在 VPC 的 private subnet 宣告服務；ALB 綁定之後由 listener 補上
    pub fn new(stack: &mut Stack, id: &str, props: FargateServiceProps<'_>) -> Result<Self> {
        let registry = match &props.cloud_map {
            Some(options) => {
                let discovery = stack.add_resource(
                    &format!("{}CloudmapService", id),
                    Resource::new("AWS::ServiceDiscovery::Service")
                        .prop(
                            "DnsConfig",
                            Expr::map([
                                (
                                    "DnsRecords",
                                    Expr::list([Expr::map([
                                        ("TTL", Expr::from(60u32)),
                                        ("Type", Expr::from("A")),
                                    ])]),
                                ),
                                ("NamespaceId", options.namespace.namespace_id()),
                                ("RoutingPolicy", Expr::from("MULTIVALUE")),
                            ]),
                        )
                        .prop(
                            "HealthCheckCustomConfig",
                            Expr::map([("FailureThreshold", Expr::from(1u32))]),
                        )
                        .prop("Name", options.name.as_str())
                        .prop("NamespaceId", options.namespace.namespace_id()),
                )?;
                Some(discovery)
            }
            None => None,
        };

        let subnets = if props.assign_public_ip {
            props.vpc.public_subnet_ids()
        } else {
            props.vpc.private_subnet_ids()
        };

        let mut resource = Resource::new("AWS::ECS::Service")
            .prop("Cluster", props.cluster.reference())
            .prop(
                "DeploymentConfiguration",
                Expr::map([
                    ("MaximumPercent", Expr::from(200u32)),
                    ("MinimumHealthyPercent", Expr::from(50u32)),
                ]),
            )
            .prop("DesiredCount", props.desired_count)
            .prop("EnableECSManagedTags", false)
            .prop("LaunchType", "FARGATE")
            .prop(
                "NetworkConfiguration",
                Expr::map([(
                    "AwsvpcConfiguration",
                    Expr::map([
                        (
                            "AssignPublicIp",
                            Expr::from(if props.assign_public_ip { "ENABLED" } else { "DISABLED" }),
                        ),
                        ("SecurityGroups", Expr::list([props.security_group.group_id()])),
                        ("Subnets", Expr::List(subnets)),
                    ]),
                )]),
            );
        if let Some(discovery) = registry {
            resource = resource.prop(
                "ServiceRegistries",
                Expr::list([Expr::map([("RegistryArn", Expr::GetAtt(discovery, "Arn".to_string()))])]),
            );
        }
        resource = resource.prop("TaskDefinition", props.task_definition.reference());

        let node = stack.add_resource(id, resource)?;
        Ok(Self {
            node,
            container_name: props.task_definition.container_name().to_string(),
            container_port: props.task_definition.container_port(),
        })
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn container_port(&self) -> u16 {
        self.container_port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constructs::ec2::{IngressRule, SecurityGroupProps, VpcProps};
    use crate::domain::reference::Environment;
    use serde_json::json;

    struct Fixture {
        stack: Stack,
        vpc: Vpc,
        cluster: Cluster,
        role: TaskRole,
    }

    fn fixture() -> Fixture {
        let mut stack = Stack::new("FargateVpclinkStack", Environment::region("us-west-2"));
        let vpc = Vpc::new(&mut stack, "ProducerVPC", &VpcProps::default()).unwrap();
        let cluster = Cluster::new(&mut stack, "Fargate Cluster").unwrap();
        let role = TaskRole::new(&mut stack, "ecsTaskExecutionRole", &[TASK_EXECUTION_POLICY]).unwrap();
        Fixture {
            stack,
            vpc,
            cluster,
            role,
        }
    }

    #[test]
    fn test_task_role_trusts_ecs_tasks() {
        let f = fixture();
        let template = f.stack.to_template().unwrap();
        let role = &template.resources["ecsTaskExecutionRole"]["Properties"];
        assert_eq!(
            role["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            "ecs-tasks.amazonaws.com"
        );
        assert_eq!(
            role["ManagedPolicyArns"][0],
            json!({ "Fn::Join": ["", [
                "arn:",
                { "Ref": "AWS::Partition" },
                ":iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy"
            ]] })
        );
    }

    #[test]
    fn test_ecr_image_uri() {
        let image = ContainerImage::Ecr {
            repository: "book-service".to_string(),
            tag: default_tag(),
        };
        let mut stack = Stack::new("S", Environment::default());
        stack
            .add_output("Image", crate::domain::model::Output::new(image.image_uri()))
            .unwrap();
        let template = stack.to_template().unwrap();
        assert_eq!(
            template.outputs["Image"]["Value"]["Fn::Join"][1][5],
            "/book-service:latest"
        );
    }

    #[test]
    fn test_service_with_cloud_map_and_log_group() {
        let mut f = fixture();
        let namespace = PrivateDnsNamespace::new(
            &mut f.stack,
            "DnsNamespace",
            "http-api.local",
            &f.vpc,
            Some("Private DnsNamespace for Microservices"),
        )
        .unwrap();
        let log_group =
            LogGroup::new(&mut f.stack, "bookServiceLogGroup", "/ecs/BookService", RemovalPolicy::Destroy).unwrap();
        let task = FargateTaskDefinition::new(
            &mut f.stack,
            "bookServiceTaskDef",
            TaskDefinitionProps {
                cpu: 256,
                memory_mib: 512,
                task_role: &f.role,
                container: ContainerDefinition {
                    name: "bookServiceContainer".to_string(),
                    image: ContainerImage::Registry {
                        image: "ibuchh/book-service".to_string(),
                    },
                    log_group: &log_group,
                    stream_prefix: "BookService".to_string(),
                    port: 80,
                },
            },
        )
        .unwrap();
        let sg = SecurityGroup::new(
            &mut f.stack,
            "bookServiceSecurityGroup",
            SecurityGroupProps {
                vpc: &f.vpc,
                name: Some("bookServiceSecurityGroup".to_string()),
                description: None,
                allow_all_outbound: true,
                ingress: vec![IngressRule::tcp_from_any_ipv4(80)],
            },
        )
        .unwrap();
        let service = FargateService::new(
            &mut f.stack,
            "bookService",
            FargateServiceProps {
                cluster: &f.cluster,
                task_definition: &task,
                vpc: &f.vpc,
                desired_count: 2,
                assign_public_ip: false,
                security_group: &sg,
                cloud_map: Some(CloudMapOptions {
                    name: "bookService".to_string(),
                    namespace: &namespace,
                }),
            },
        )
        .unwrap();
        assert_eq!(service.container_name(), "bookServiceContainer");

        let template = f.stack.to_template().unwrap();
        let service = &template.resources["bookService"]["Properties"];
        assert_eq!(service["DesiredCount"], 2);
        assert_eq!(service["LaunchType"], "FARGATE");
        assert_eq!(
            service["NetworkConfiguration"]["AwsvpcConfiguration"]["AssignPublicIp"],
            "DISABLED"
        );
        assert_eq!(
            service["NetworkConfiguration"]["AwsvpcConfiguration"]["Subnets"],
            json!([
                { "Ref": "ProducerVPCPrivateSubnet1Subnet" },
                { "Ref": "ProducerVPCPrivateSubnet2Subnet" }
            ])
        );
        assert_eq!(
            service["ServiceRegistries"][0]["RegistryArn"],
            json!({ "Fn::GetAtt": ["bookServiceCloudmapService", "Arn"] })
        );

        let log_group = &template.resources["bookServiceLogGroup"];
        assert_eq!(log_group["DeletionPolicy"], "Delete");

        let container = &template.resources["bookServiceTaskDef"]["Properties"]["ContainerDefinitions"][0];
        assert_eq!(container["Image"], "ibuchh/book-service");
        assert_eq!(container["LogConfiguration"]["Options"]["awslogs-stream-prefix"], "BookService");
        assert_eq!(container["PortMappings"][0]["ContainerPort"], 80);
    }

    #[test]
    fn test_task_definition_rejects_tiny_memory() {
        let mut f = fixture();
        let log_group = LogGroup::new(&mut f.stack, "lg", "/ecs/X", RemovalPolicy::Retain).unwrap();
        let result = FargateTaskDefinition::new(
            &mut f.stack,
            "td",
            TaskDefinitionProps {
                cpu: 256,
                memory_mib: 128,
                task_role: &f.role,
                container: ContainerDefinition {
                    name: "c".to_string(),
                    image: ContainerImage::Registry { image: "x".to_string() },
                    log_group: &log_group,
                    stream_prefix: "X".to_string(),
                    port: 80,
                },
            },
        );
        assert!(result.is_err());
    }
}
