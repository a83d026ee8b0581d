//! ALB、listener 與路徑路由規則

use crate::core::constructs::ec2::{SecurityGroup, SecurityGroupProps, Vpc};
use crate::core::constructs::ecs::FargateService;
use crate::core::stack::Stack;
use crate::domain::model::{Expr, Resource};
use crate::domain::ports::Construct;
use crate::domain::reference::{ListenerReference, LogicalRef};
use crate::utils::error::{Result, SynthError};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_range, validate_unique_priorities, Validate,
};
use serde::{Deserialize, Serialize};

pub const MIN_RULE_PRIORITY: u32 = 1;
pub const MAX_RULE_PRIORITY: u32 = 50_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    /// 檢查間隔（秒）
    pub interval: u32,
    /// 逾時秒數
    pub timeout: u32,
}

impl HealthCheck {
    pub fn new(path: impl Into<String>, interval: u32, timeout: u32) -> Self {
        Self {
            path: path.into(),
            interval,
            timeout,
        }
    }
}

impl Validate for HealthCheck {
    fn validate(&self) -> Result<()> {
        validate_path("health_check.path", &self.path)?;
        validate_range("health_check.interval", self.interval, 5, 300)?;
        validate_range("health_check.timeout", self.timeout, 2, 120)?;
        if self.timeout >= self.interval {
            return Err(SynthError::ConfigValidationError {
                field: "health_check.timeout".to_string(),
                message: format!(
                    "Timeout ({}s) must be shorter than the interval ({}s)",
                    self.timeout, self.interval
                ),
            });
        }
        Ok(())
    }
}

/// 將符合 `path_pattern` 的請求轉給單一服務
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// 目標服務名稱
    pub target: String,
    pub path_pattern: String,
    pub priority: u32,
    pub port: u16,
    pub health_check: HealthCheck,
}

impl Validate for RouteRule {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("route.target", &self.target)?;
        validate_path("route.path_pattern", &self.path_pattern)?;
        validate_range("route.priority", self.priority, MIN_RULE_PRIORITY, MAX_RULE_PRIORITY)?;
        self.health_check.validate()
    }
}

#[derive(Debug, Clone)]
pub struct ApplicationLoadBalancer {
    node: LogicalRef,
    security_group: SecurityGroup,
    vpc_ref: LogicalRef,
}

impl Construct for ApplicationLoadBalancer {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl ApplicationLoadBalancer {
    /// 內部 ALB 放在 private subnet，對外的放在 public subnet
    pub fn new(stack: &mut Stack, id: &str, vpc: &Vpc, internet_facing: bool) -> Result<Self> {
        let security_group = SecurityGroup::new(
            stack,
            &format!("{}SecurityGroup", id),
            SecurityGroupProps {
                vpc,
                name: None,
                description: Some(format!(
                    "Automatically created Security Group for ELB {}{}",
                    Stack::sanitize_id(stack.id()),
                    Stack::sanitize_id(id)
                )),
                allow_all_outbound: true,
                ingress: Vec::new(),
            },
        )?;

        let subnets = if internet_facing {
            vpc.public_subnet_ids()
        } else {
            vpc.private_subnet_ids()
        };

        let node = stack.add_resource(
            id,
            Resource::new("AWS::ElasticLoadBalancingV2::LoadBalancer")
                .prop(
                    "LoadBalancerAttributes",
                    Expr::list([Expr::map([
                        ("Key", Expr::from("deletion_protection.enabled")),
                        ("Value", Expr::from("false")),
                    ])]),
                )
                .prop("Scheme", if internet_facing { "internet-facing" } else { "internal" })
                .prop("SecurityGroups", Expr::list([security_group.group_id()]))
                .prop("Subnets", Expr::List(subnets))
                .prop("Type", "application"),
        )?;

        Ok(Self {
            node,
            security_group,
            vpc_ref: vpc.logical_ref().clone(),
        })
    }

    pub fn dns_name(&self) -> Expr {
        self.attribute("DNSName")
    }

    /// 新增 HTTP listener，未符合的請求回固定狀態碼，並在 ALB 安全群組開放該 port
    pub fn add_listener(&self, stack: &mut Stack, id: &str, port: u16, fixed_response: u16) -> Result<Listener> {
        let listener_id = format!("{}{}", self.logical_id(), Stack::sanitize_id(id));
        let node = stack.add_resource(
            &listener_id,
            Resource::new("AWS::ElasticLoadBalancingV2::Listener")
                .prop(
                    "DefaultActions",
                    Expr::list([Expr::map([
                        (
                            "FixedResponseConfig",
                            Expr::map([("StatusCode", Expr::from(fixed_response.to_string()))]),
                        ),
                        ("Type", Expr::from("fixed-response")),
                    ])]),
                )
                .prop("LoadBalancerArn", self.reference())
                .prop("Port", u32::from(port))
                .prop("Protocol", "HTTP"),
        )?;
        self.security_group.allow_from_any_ipv4(stack, port)?;

        tracing::debug!("Listener {} on port {} (default {})", listener_id, port, fixed_response);
        Ok(Listener {
            node,
            vpc_ref: self.vpc_ref.clone(),
            rules: Vec::new(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Listener {
    node: LogicalRef,
    vpc_ref: LogicalRef,
    /// 目前所有規則的 (目標, 優先順序)
    rules: Vec<(String, u32)>,
}

impl Construct for Listener {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

#[derive(Debug, Clone)]
pub struct TargetGroup {
    node: LogicalRef,
}

impl Construct for TargetGroup {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl Listener {
    /// 給其他 stack 使用的 live handle；listener 的 `Ref` 即 ARN
    pub fn listener_reference(&self) -> ListenerReference {
        ListenerReference::live(self.node.clone())
    }

    pub fn priorities(&self) -> impl Iterator<Item = u32> + '_ {
        self.rules.iter().map(|(_, p)| *p)
    }

    /// 為 `service` 建立 target group 與轉發 `rule.path_pattern` 的 listener rule，
    /// 並把服務掛到 target group
    pub fn add_targets(
        &mut self,
        stack: &mut Stack,
        id: &str,
        rule: &RouteRule,
        service: &FargateService,
    ) -> Result<TargetGroup> {
        rule.validate()?;
        validate_unique_priorities(
            self.logical_id(),
            self.rules
                .iter()
                .map(|(t, p)| (t.as_str(), *p))
                .chain(std::iter::once((rule.target.as_str(), rule.priority))),
        )?;

        let group_id = format!("{}{}Group", self.logical_id(), Stack::sanitize_id(id));
        let node = stack.add_resource(
            &group_id,
            Resource::new("AWS::ElasticLoadBalancingV2::TargetGroup")
                .prop("HealthCheckIntervalSeconds", rule.health_check.interval)
                .prop("HealthCheckPath", rule.health_check.path.as_str())
                .prop("HealthCheckTimeoutSeconds", rule.health_check.timeout)
                .prop("Port", u32::from(rule.port))
                .prop("Protocol", "HTTP")
                .prop("TargetType", "ip")
                .prop("VpcId", Expr::Ref(self.vpc_ref.clone())),
        )?;

        let rule_ref = stack.add_resource(
            &format!("{}{}Rule", self.logical_id(), Stack::sanitize_id(id)),
            Resource::new("AWS::ElasticLoadBalancingV2::ListenerRule")
                .prop(
                    "Actions",
                    Expr::list([Expr::map([
                        ("TargetGroupArn", Expr::Ref(node.clone())),
                        ("Type", Expr::from("forward")),
                    ])]),
                )
                .prop(
                    "Conditions",
                    Expr::list([Expr::map([
                        ("Field", Expr::from("path-pattern")),
                        (
                            "PathPatternConfig",
                            Expr::map([("Values", Expr::list([Expr::from(rule.path_pattern.as_str())]))]),
                        ),
                    ])]),
                )
                .prop("ListenerArn", self.reference())
                .prop("Priority", rule.priority),
        )?;

        // service 掛上 target group，且必須等 listener rule 建好
        stack.append_to_property(
            service.logical_ref(),
            "LoadBalancers",
            Expr::map([
                ("ContainerName", Expr::from(service.container_name())),
                ("ContainerPort", Expr::from(u32::from(service.container_port()))),
                ("TargetGroupArn", Expr::Ref(node.clone())),
            ]),
        )?;
        stack.add_dependency(service.logical_ref(), &rule_ref)?;

        self.rules.push((rule.target.clone(), rule.priority));
        tracing::debug!(
            "Route {} (priority {}) -> {}",
            rule.path_pattern,
            rule.priority,
            rule.target
        );

        Ok(TargetGroup { node })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constructs::ec2::{IngressRule, VpcProps};
    use crate::core::constructs::ecs::*;
    use crate::domain::reference::{Environment, ResourceHandle};
    use serde_json::json;

    fn route(target: &str, path: &str, priority: u32) -> RouteRule {
        RouteRule {
            target: target.to_string(),
            path_pattern: format!("{}*", path),
            priority,
            port: 80,
            health_check: HealthCheck::new(format!("{}/health", path), 30, 3),
        }
    }

    struct Fixture {
        stack: Stack,
        alb: ApplicationLoadBalancer,
        services: Vec<FargateService>,
    }

    fn fixture() -> Fixture {
        let mut stack = Stack::new("FargateVpclinkStack", Environment::region("us-west-2"));
        let vpc = Vpc::new(&mut stack, "ProducerVPC", &VpcProps::default()).unwrap();
        let cluster = Cluster::new(&mut stack, "Fargate Cluster").unwrap();
        let role = TaskRole::new(&mut stack, "ecsTaskExecutionRole", &[TASK_EXECUTION_POLICY]).unwrap();

        let mut services = Vec::new();
        for name in ["bookService", "authorService"] {
            let log_group = LogGroup::new(
                &mut stack,
                &format!("{}LogGroup", name),
                &format!("/ecs/{}", name),
                RemovalPolicy::Destroy,
            )
            .unwrap();
            let task = FargateTaskDefinition::new(
                &mut stack,
                &format!("{}TaskDef", name),
                TaskDefinitionProps {
                    cpu: 256,
                    memory_mib: 512,
                    task_role: &role,
                    container: ContainerDefinition {
                        name: format!("{}Container", name),
                        image: ContainerImage::Registry { image: name.to_string() },
                        log_group: &log_group,
                        stream_prefix: name.to_string(),
                        port: 80,
                    },
                },
            )
            .unwrap();
            let sg = SecurityGroup::new(
                &mut stack,
                &format!("{}SecurityGroup", name),
                SecurityGroupProps {
                    vpc: &vpc,
                    name: None,
                    description: None,
                    allow_all_outbound: true,
                    ingress: vec![IngressRule::tcp_from_any_ipv4(80)],
                },
            )
            .unwrap();
            let service = FargateService::new(
                &mut stack,
                name,
                FargateServiceProps {
                    cluster: &cluster,
                    task_definition: &task,
                    vpc: &vpc,
                    desired_count: 2,
                    assign_public_ip: false,
                    security_group: &sg,
                    cloud_map: None,
                },
            )
            .unwrap();
            services.push(service);
        }

        let alb = ApplicationLoadBalancer::new(&mut stack, "httpapiInternalALB", &vpc, false).unwrap();
        Fixture { stack, alb, services }
    }

    #[test]
    fn test_health_check_validation() {
        assert!(HealthCheck::new("/api/books/health", 30, 3).validate().is_ok());
        assert!(HealthCheck::new("/api/books/health", 30, 30).validate().is_err());
        assert!(HealthCheck::new("/api/books/health", 4, 3).validate().is_err());
        assert!(HealthCheck::new("/api/books/health", 300, 121).validate().is_err());
        assert!(HealthCheck::new("api/books/health", 30, 3).validate().is_err());
        assert!(HealthCheck::new("", 30, 3).validate().is_err());
    }

    #[test]
    fn test_route_rule_priority_range() {
        assert!(route("bookService", "/api/books", 0).validate().is_err());
        assert!(route("bookService", "/api/books", 50_001).validate().is_err());
        assert!(route("bookService", "/api/books", 50_000).validate().is_ok());

        let mut relative = route("bookService", "/api/books", 1);
        relative.path_pattern = "api/books*".to_string();
        assert!(relative.validate().is_err());
    }

    #[test]
    fn test_internal_alb_with_fixed_response_listener() {
        let mut f = fixture();
        let listener = f.alb.add_listener(&mut f.stack, "httpapiListener", 80, 200).unwrap();
        assert!(matches!(
            listener.listener_reference().handle(),
            ResourceHandle::Live(_)
        ));

        let template = f.stack.to_template().unwrap();
        let alb = &template.resources["httpapiInternalALB"]["Properties"];
        assert_eq!(alb["Scheme"], "internal");
        assert_eq!(
            alb["Subnets"],
            json!([
                { "Ref": "ProducerVPCPrivateSubnet1Subnet" },
                { "Ref": "ProducerVPCPrivateSubnet2Subnet" }
            ])
        );

        let listener = &template.resources["httpapiInternalALBhttpapiListener"]["Properties"];
        assert_eq!(
            listener["DefaultActions"],
            json!([{ "FixedResponseConfig": { "StatusCode": "200" }, "Type": "fixed-response" }])
        );
        assert_eq!(listener["Port"], 80);
        assert!(template
            .resources
            .contains_key("httpapiInternalALBSecurityGroupfrom0000080"));
    }

    #[test]
    fn test_add_targets_creates_group_rule_and_attachment() {
        let mut f = fixture();
        let mut listener = f.alb.add_listener(&mut f.stack, "httpapiListener", 80, 200).unwrap();
        let group = listener
            .add_targets(
                &mut f.stack,
                "bookServiceTargetGroup",
                &route("bookService", "/api/books", 1),
                &f.services[0],
            )
            .unwrap();
        assert_eq!(group.logical_id(), "httpapiInternalALBhttpapiListenerbookServiceTargetGroupGroup");

        let template = f.stack.to_template().unwrap();
        assert!(template
            .resource("httpapiInternalALBhttpapiListenerbookServiceTargetGroupRule")
            .is_some());
        let tg = &template.resources["httpapiInternalALBhttpapiListenerbookServiceTargetGroupGroup"]["Properties"];
        assert_eq!(tg["HealthCheckPath"], "/api/books/health");
        assert_eq!(tg["HealthCheckIntervalSeconds"], 30);
        assert_eq!(tg["HealthCheckTimeoutSeconds"], 3);
        assert_eq!(tg["TargetType"], "ip");

        let rule = &template.resources["httpapiInternalALBhttpapiListenerbookServiceTargetGroupRule"]["Properties"];
        assert_eq!(rule["Priority"], 1);
        assert_eq!(rule["Conditions"][0]["PathPatternConfig"]["Values"], json!(["/api/books*"]));

        let service = &template.resources["bookService"];
        assert_eq!(
            service["Properties"]["LoadBalancers"][0]["ContainerName"],
            "bookServiceContainer"
        );
        assert_eq!(
            service["DependsOn"],
            json!(["httpapiInternalALBhttpapiListenerbookServiceTargetGroupRule"])
        );
    }

    #[test]
    fn test_duplicate_priority_is_rejected() {
        let mut f = fixture();
        let mut listener = f.alb.add_listener(&mut f.stack, "httpapiListener", 80, 200).unwrap();
        listener
            .add_targets(&mut f.stack, "bookServiceTargetGroup", &route("bookService", "/api/books", 1), &f.services[0])
            .unwrap();
        let err = listener
            .add_targets(
                &mut f.stack,
                "authorServiceTargetGroup",
                &route("authorService", "/api/authors", 1),
                &f.services[1],
            )
            .unwrap_err();

        match err {
            SynthError::DuplicatePriorityError { priority, rule, existing, .. } => {
                assert_eq!(priority, 1);
                assert_eq!(rule, "authorService");
                assert_eq!(existing, "bookService");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(listener.priorities().collect::<Vec<_>>(), vec![1]);
    }
}
