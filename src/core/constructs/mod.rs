pub mod apigw;
pub mod ec2;
pub mod ecs;
pub mod elbv2;

pub use apigw::{derive_endpoint, derive_endpoint_expr, HttpApi, Integration, IntegrationProps};
pub use ec2::{Instance, SecurityGroup, Vpc, VpcProps};
pub use ecs::{Cluster, ContainerImage, FargateService, FargateTaskDefinition, LogGroup, PrivateDnsNamespace, TaskRole};
pub use elbv2::{ApplicationLoadBalancer, HealthCheck, Listener, RouteRule, TargetGroup};
