//! 網路相關：VPC 與 subnet 群組、安全群組，以及單一 EC2 instance（跳板機）

use crate::core::stack::Stack;
use crate::domain::model::{Expr, Parameter, Resource};
use crate::domain::ports::Construct;
use crate::domain::reference::LogicalRef;
use crate::utils::error::{Result, SynthError};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

pub const ANY_IPV4: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetType {
    Public,
    Private,
    Isolated,
}

impl SubnetType {
    fn label(&self) -> &'static str {
        match self {
            SubnetType::Public => "Public",
            SubnetType::Private => "Private",
            SubnetType::Isolated => "Isolated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetConfiguration {
    pub name: String,
    pub subnet_type: SubnetType,
    /// 前綴長度；未指定時平分剩餘空間
    #[serde(default)]
    pub cidr_mask: Option<u8>,
}

impl SubnetConfiguration {
    pub fn new(name: &str, subnet_type: SubnetType, cidr_mask: Option<u8>) -> Self {
        Self {
            name: name.to_string(),
            subnet_type,
            cidr_mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcProps {
    pub cidr: String,
    pub max_azs: u8,
    /// 預設每個 AZ 一個 NAT gateway
    pub nat_gateways: Option<u8>,
    pub subnets: Vec<SubnetConfiguration>,
}

impl Default for VpcProps {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: None,
            subnets: vec![
                SubnetConfiguration::new("Public", SubnetType::Public, None),
                SubnetConfiguration::new("Private", SubnetType::Private, None),
            ],
        }
    }
}

/// 解析 `a.b.c.d/n` 為網路位址與前綴長度
pub fn parse_cidr(cidr: &str) -> Result<(u32, u8)> {
    let invalid = |reason: &str| SynthError::InvalidConfigValueError {
        field: "vpc.cidr".to_string(),
        value: cidr.to_string(),
        reason: reason.to_string(),
    };

    let (address, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| invalid("Expected a.b.c.d/n"))?;
    let address: Ipv4Addr = address.parse().map_err(|_| invalid("Invalid IPv4 address"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid("Invalid prefix length"))?;
    if !(16..=28).contains(&prefix) {
        return Err(invalid("VPC prefix length must be between 16 and 28"));
    }

    let base = u32::from(address);
    let mask = u32::MAX << (32 - prefix);
    if base & !mask != 0 {
        return Err(invalid("Address has host bits set"));
    }
    Ok((base, prefix))
}

fn format_cidr(base: u32, prefix: u8) -> String {
    format!("{}/{}", Ipv4Addr::from(base), prefix)
}

/// 從 VPC 範圍切出 subnet CIDR，依群組再依 AZ，順序與模板一致
pub fn allocate_subnet_cidrs(props: &VpcProps) -> Result<Vec<Vec<String>>> {
    let (base, prefix) = parse_cidr(&props.cidr)?;
    let azs = u32::from(props.max_azs.max(1));

    let unsized_groups = props.subnets.iter().filter(|s| s.cidr_mask.is_none()).count() as u32;
    let default_mask = if unsized_groups == 0 {
        prefix
    } else {
        let count = unsized_groups * azs;
        let bits = 32 - (count - 1).leading_zeros();
        prefix + bits as u8
    };

    let end = base as u64 + (1u64 << (32 - prefix));
    let mut cursor = base as u64;
    let mut groups = Vec::with_capacity(props.subnets.len());

    for subnet in &props.subnets {
        let mask = subnet.cidr_mask.unwrap_or(default_mask);
        if mask < prefix || mask > 28 {
            return Err(SynthError::InvalidConfigValueError {
                field: format!("vpc.subnets.{}.cidr_mask", subnet.name),
                value: mask.to_string(),
                reason: format!("Mask must be between {} and 28", prefix),
            });
        }
        let size = 1u64 << (32 - mask);
        let mut blocks = Vec::with_capacity(azs as usize);
        for _ in 0..azs {
            cursor = cursor.div_ceil(size) * size;
            if cursor + size > end {
                return Err(SynthError::InvalidConfigValueError {
                    field: "vpc.cidr".to_string(),
                    value: props.cidr.clone(),
                    reason: "VPC range is too small for the requested subnets".to_string(),
                });
            }
            blocks.push(format_cidr(cursor as u32, mask));
            cursor += size;
        }
        groups.push(blocks);
    }
    Ok(groups)
}

#[derive(Debug, Clone)]
pub struct Vpc {
    node: LogicalRef,
    public_subnets: Vec<LogicalRef>,
    private_subnets: Vec<LogicalRef>,
    isolated_subnets: Vec<LogicalRef>,
    /// public subnet 的預設路由；有公開 IP 的 instance 要等它們建好
    internet_routes: Vec<LogicalRef>,
}

impl Construct for Vpc {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

fn subnet_ids(subnets: &[LogicalRef]) -> Vec<Expr> {
    subnets.iter().map(|s| Expr::Ref(s.clone())).collect()
}

impl Vpc {
    pub fn new(stack: &mut Stack, id: &str, props: &VpcProps) -> Result<Self> {
        let has_public = props.subnets.iter().any(|s| s.subnet_type == SubnetType::Public);
        let has_private = props.subnets.iter().any(|s| s.subnet_type == SubnetType::Private);
        let azs = props.max_azs.max(1);
        let nat_gateways = if has_public {
            props.nat_gateways.unwrap_or(azs).min(azs)
        } else {
            0
        };

        if has_private && nat_gateways == 0 {
            return Err(SynthError::ConfigValidationError {
                field: "vpc.nat_gateways".to_string(),
                message: "Private subnets need at least one NAT gateway in a public subnet".to_string(),
            });
        }

        let cidrs = allocate_subnet_cidrs(props)?;

        let node = stack.add_resource(
            id,
            Resource::new("AWS::EC2::VPC")
                .prop("CidrBlock", props.cidr.as_str())
                .prop("EnableDnsHostnames", true)
                .prop("EnableDnsSupport", true)
                .prop("InstanceTenancy", "default")
                .prop("Tags", name_tag(&format!("{}/{}", stack.id(), id))),
        )?;

        let gateway = if has_public {
            let igw = stack.add_resource(
                &format!("{}IGW", id),
                Resource::new("AWS::EC2::InternetGateway")
                    .prop("Tags", name_tag(&format!("{}/{}", stack.id(), id))),
            )?;
            let attachment = stack.add_resource(
                &format!("{}VPCGW", id),
                Resource::new("AWS::EC2::VPCGatewayAttachment")
                    .prop("VpcId", Expr::Ref(node.clone()))
                    .prop("InternetGatewayId", Expr::Ref(igw.clone())),
            )?;
            Some((igw, attachment))
        } else {
            None
        };

        let mut vpc = Self {
            node,
            public_subnets: Vec::new(),
            private_subnets: Vec::new(),
            isolated_subnets: Vec::new(),
            internet_routes: Vec::new(),
        };
        let mut nat_ids: Vec<LogicalRef> = Vec::new();

        // 先建 public subnet，private subnet 的預設路由需要 NAT gateway
        let mut ordered: Vec<(usize, &SubnetConfiguration)> = props.subnets.iter().enumerate().collect();
        ordered.sort_by_key(|(_, s)| s.subnet_type != SubnetType::Public);

        for (group_index, config) in ordered {
            for (az, cidr) in cidrs[group_index].iter().enumerate() {
                let path = format!("{}Subnet{}", Stack::sanitize_id(&config.name), az + 1);
                let prefix = format!("{}{}Subnet", id, path);
                let subnet = stack.add_resource(
                    &prefix,
                    Resource::new("AWS::EC2::Subnet")
                        .prop("VpcId", vpc.reference())
                        .prop("AvailabilityZone", Expr::availability_zone(az))
                        .prop("CidrBlock", cidr.as_str())
                        .prop("MapPublicIpOnLaunch", config.subnet_type == SubnetType::Public)
                        .prop(
                            "Tags",
                            Expr::list([
                                tag("aws-cdk:subnet-name", &config.name),
                                tag("aws-cdk:subnet-type", config.subnet_type.label()),
                                tag("Name", &format!("{}/{}/{}", stack.id(), id, path)),
                            ]),
                        ),
                )?;

                let route_table = stack.add_resource(
                    &format!("{}RouteTable", prefix),
                    Resource::new("AWS::EC2::RouteTable").prop("VpcId", vpc.reference()),
                )?;
                stack.add_resource(
                    &format!("{}RouteTableAssociation", prefix),
                    Resource::new("AWS::EC2::SubnetRouteTableAssociation")
                        .prop("RouteTableId", Expr::Ref(route_table.clone()))
                        .prop("SubnetId", Expr::Ref(subnet.clone())),
                )?;

                match config.subnet_type {
                    SubnetType::Public => {
                        if let Some((igw, attachment)) = &gateway {
                            let route = stack.add_resource(
                                &format!("{}DefaultRoute", prefix),
                                Resource::new("AWS::EC2::Route")
                                    .prop("RouteTableId", Expr::Ref(route_table.clone()))
                                    .prop("DestinationCidrBlock", ANY_IPV4)
                                    .prop("GatewayId", Expr::Ref(igw.clone()))
                                    .depends_on(attachment.logical_id.clone()),
                            )?;
                            vpc.internet_routes.push(route);
                        }
                        if (nat_ids.len() as u8) < nat_gateways {
                            let eip = stack.add_resource(
                                &format!("{}EIP", prefix),
                                Resource::new("AWS::EC2::EIP").prop("Domain", "vpc"),
                            )?;
                            let nat = stack.add_resource(
                                &format!("{}NATGateway", prefix),
                                Resource::new("AWS::EC2::NatGateway")
                                    .prop("SubnetId", Expr::Ref(subnet.clone()))
                                    .prop("AllocationId", Expr::GetAtt(eip, "AllocationId".to_string())),
                            )?;
                            nat_ids.push(nat);
                        }
                        vpc.public_subnets.push(subnet);
                    }
                    SubnetType::Private => {
                        let nat = &nat_ids[az % nat_ids.len()];
                        stack.add_resource(
                            &format!("{}DefaultRoute", prefix),
                            Resource::new("AWS::EC2::Route")
                                .prop("RouteTableId", Expr::Ref(route_table))
                                .prop("DestinationCidrBlock", ANY_IPV4)
                                .prop("NatGatewayId", Expr::Ref(nat.clone())),
                        )?;
                        vpc.private_subnets.push(subnet);
                    }
                    SubnetType::Isolated => vpc.isolated_subnets.push(subnet),
                }
            }
        }

        tracing::debug!(
            "VPC {}: {} public, {} private, {} isolated subnets, {} NAT gateways",
            id,
            vpc.public_subnets.len(),
            vpc.private_subnets.len(),
            vpc.isolated_subnets.len(),
            nat_ids.len()
        );
        Ok(vpc)
    }

    pub fn public_subnet_ids(&self) -> Vec<Expr> {
        subnet_ids(&self.public_subnets)
    }

    pub fn private_subnet_ids(&self) -> Vec<Expr> {
        subnet_ids(&self.private_subnets)
    }

    pub fn internet_routes(&self) -> &[LogicalRef] {
        &self.internet_routes
    }
}

fn tag(key: &str, value: &str) -> Expr {
    Expr::map([("Key", Expr::from(key)), ("Value", Expr::from(value))])
}

fn name_tag(value: &str) -> Expr {
    Expr::list([tag("Name", value)])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub cidr: String,
    pub port: u16,
}

impl IngressRule {
    pub fn tcp_from_any_ipv4(port: u16) -> Self {
        Self {
            cidr: ANY_IPV4.to_string(),
            port,
        }
    }

    fn to_expr(&self) -> Expr {
        Expr::map([
            ("CidrIp", Expr::from(self.cidr.as_str())),
            ("Description", Expr::from(format!("from {}:{}", self.cidr, self.port))),
            ("FromPort", Expr::from(u32::from(self.port))),
            ("IpProtocol", Expr::from("tcp")),
            ("ToPort", Expr::from(u32::from(self.port))),
        ])
    }
}

pub struct SecurityGroupProps<'a> {
    pub vpc: &'a Vpc,
    pub name: Option<String>,
    pub description: Option<String>,
    pub allow_all_outbound: bool,
    pub ingress: Vec<IngressRule>,
}

#[derive(Debug, Clone)]
pub struct SecurityGroup {
    node: LogicalRef,
}

impl Construct for SecurityGroup {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl SecurityGroup {
    pub fn new(stack: &mut Stack, id: &str, props: SecurityGroupProps<'_>) -> Result<Self> {
        let description = props
            .description
            .unwrap_or_else(|| format!("{}/{}", stack.id(), id));

        let mut resource = Resource::new("AWS::EC2::SecurityGroup").prop("GroupDescription", description);
        if let Some(name) = props.name {
            resource = resource.prop("GroupName", name);
        }
        if props.allow_all_outbound {
            resource = resource.prop(
                "SecurityGroupEgress",
                Expr::list([Expr::map([
                    ("CidrIp", Expr::from(ANY_IPV4)),
                    ("Description", Expr::from("Allow all outbound traffic by default")),
                    ("IpProtocol", Expr::from("-1")),
                ])]),
            );
        }
        if !props.ingress.is_empty() {
            resource = resource.prop(
                "SecurityGroupIngress",
                Expr::list(props.ingress.iter().map(IngressRule::to_expr)),
            );
        }
        resource = resource.prop("VpcId", props.vpc.reference());

        let node = stack.add_resource(id, resource)?;
        Ok(Self { node })
    }

    pub fn group_id(&self) -> Expr {
        self.attribute("GroupId")
    }

    /// 以獨立的 ingress 資源對任意來源開放 `port`，用於群組建立後才知道的 port
    pub fn allow_from_any_ipv4(&self, stack: &mut Stack, port: u16) -> Result<LogicalRef> {
        let rule = IngressRule::tcp_from_any_ipv4(port);
        stack.add_resource(
            &format!("{}from00000{}", self.logical_id(), port),
            Resource::new("AWS::EC2::SecurityGroupIngress")
                .prop("CidrIp", rule.cidr.as_str())
                .prop("Description", format!("from {}:{}", rule.cidr, port))
                .prop("FromPort", u32::from(port))
                .prop("GroupId", self.group_id())
                .prop("IpProtocol", "tcp")
                .prop("ToPort", u32::from(port)),
        )
    }
}

pub const AMAZON_LINUX_2_AMI_PARAMETER: &str = "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2";

/// 最新的 Amazon Linux 2 AMI，部署時由公開 SSM 參數解析
pub fn latest_amazon_linux2(stack: &mut Stack) -> Result<Expr> {
    let parameter = stack.add_parameter(
        "SsmParameterValueAmazonLinux2Ami",
        Parameter {
            parameter_type: "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>".to_string(),
            default: Some(AMAZON_LINUX_2_AMI_PARAMETER.to_string()),
            description: None,
        },
    )?;
    Ok(Expr::Ref(parameter))
}

pub struct InstanceProps<'a> {
    pub vpc: &'a Vpc,
    pub instance_type: String,
    pub image_id: Expr,
    pub security_group: &'a SecurityGroup,
    pub key_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Instance {
    node: LogicalRef,
}

impl Construct for Instance {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl Instance {
    /// instance 放在 VPC 的第一個 public subnet
    pub fn new(stack: &mut Stack, id: &str, props: InstanceProps<'_>) -> Result<Self> {
        let subnet = props
            .vpc
            .public_subnet_ids()
            .into_iter()
            .next()
            .ok_or_else(|| SynthError::ConfigValidationError {
                field: "edge.bastion".to_string(),
                message: "The bastion host needs a public subnet".to_string(),
            })?;

        let mut resource = Resource::new("AWS::EC2::Instance")
            .prop("AvailabilityZone", Expr::availability_zone(0))
            .prop("ImageId", props.image_id)
            .prop("InstanceType", props.instance_type);
        if let Some(key_name) = props.key_name {
            resource = resource.prop("KeyName", key_name);
        }
        resource = resource
            .prop("SecurityGroupIds", Expr::list([props.security_group.group_id()]))
            .prop("SubnetId", subnet)
            .prop("Tags", name_tag(&format!("{}/{}", stack.id(), id)));
        for route in props.vpc.internet_routes() {
            resource = resource.depends_on(route.logical_id.clone());
        }

        let node = stack.add_resource(id, resource)?;
        Ok(Self { node })
    }

    pub fn public_ip(&self) -> Expr {
        self.attribute("PublicIp")
    }
}
