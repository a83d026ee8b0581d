use crate::domain::model::Expr;
use crate::utils::error::Result;
use crate::utils::validation::{validate_listener_arn, validate_vpc_link_id};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 已宣告的資源，以所屬 stack 與 logical id 定位
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalRef {
    pub stack_id: String,
    pub logical_id: String,
}

impl LogicalRef {
    pub fn new(stack_id: impl Into<String>, logical_id: impl Into<String>) -> Self {
        Self {
            stack_id: stack_id.into(),
            logical_id: logical_id.into(),
        }
    }
}

impl fmt::Display for LogicalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stack_id, self.logical_id)
    }
}

/// stack 的目標帳號與區域；`None` 表示不綁定環境
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn new(account: Option<String>, region: Option<String>) -> Self {
        Self { account, region }
    }

    pub fn region(region: impl Into<String>) -> Self {
        Self {
            account: None,
            region: Some(region.into()),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "aws://{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region")
        )
    }
}

/// 同一個 app 內的 live 參照，或是已存在資源的識別碼（id / ARN）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum ResourceHandle {
    Live(LogicalRef),
    Identifier(String),
}

impl ResourceHandle {
    pub fn to_expr(&self) -> Expr {
        match self {
            ResourceHandle::Live(target) => Expr::Ref(target.clone()),
            ResourceHandle::Identifier(id) => Expr::from(id.as_str()),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ResourceHandle::Live(_))
    }

    pub fn live_target(&self) -> Option<&LogicalRef> {
        match self {
            ResourceHandle::Live(target) => Some(target),
            ResourceHandle::Identifier(_) => None,
        }
    }
}

/// 連接公開 API 與私有網路的 VPC link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateLinkHandle {
    resource_type: String,
    handle: ResourceHandle,
}

impl PrivateLinkHandle {
    pub const RESOURCE_TYPE: &'static str = "AWS::ApiGatewayV2::VpcLink";

    pub fn live(target: LogicalRef) -> Self {
        Self {
            resource_type: Self::RESOURCE_TYPE.to_string(),
            handle: ResourceHandle::Live(target),
        }
    }

    pub fn from_identifier(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_vpc_link_id("httpVpcLink", &id)?;
        Ok(Self {
            resource_type: Self::RESOURCE_TYPE.to_string(),
            handle: ResourceHandle::Identifier(id),
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn to_expr(&self) -> Expr {
        self.handle.to_expr()
    }
}

/// 內部 ALB 的 listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerReference {
    handle: ResourceHandle,
}

impl ListenerReference {
    pub fn live(target: LogicalRef) -> Self {
        Self {
            handle: ResourceHandle::Live(target),
        }
    }

    pub fn from_arn(arn: impl Into<String>) -> Result<Self> {
        let arn = arn.into();
        validate_listener_arn("httpApiListener", &arn)?;
        Ok(Self {
            handle: ResourceHandle::Identifier(arn),
        })
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    /// listener 的 `Ref` 即 ARN
    pub fn to_expr(&self) -> Expr {
        self.handle.to_expr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTENER_ARN: &str = "arn:aws:elasticloadbalancing:us-west-2:082037726969:listener/app/Farga-httpa-UKHFB8SIA31L/9ae06a6f709fd03f/26bb62906e7b9b4a";

    #[test]
    fn test_identifier_handles_render_as_literals() {
        let link = PrivateLinkHandle::from_identifier("65vcat").unwrap();
        assert_eq!(link.resource_type(), "AWS::ApiGatewayV2::VpcLink");
        assert_eq!(link.to_expr(), Expr::from("65vcat"));
        assert!(!link.handle().is_live());

        let listener = ListenerReference::from_arn(LISTENER_ARN).unwrap();
        assert_eq!(listener.to_expr(), Expr::from(LISTENER_ARN));
    }

    #[test]
    fn test_malformed_identifiers_are_rejected() {
        assert!(PrivateLinkHandle::from_identifier("").is_err());
        assert!(ListenerReference::from_arn("not-an-arn").is_err());
    }

    #[test]
    fn test_live_handle_points_at_producer() {
        let target = LogicalRef::new("FargateVpclinkStack", "HttpVpcLink");
        let link = PrivateLinkHandle::live(target.clone());
        assert_eq!(link.handle().live_target(), Some(&target));
        assert_eq!(link.to_expr(), Expr::Ref(target));
    }

    #[test]
    fn test_handle_serializes_as_tagged_value() {
        let listener = ListenerReference::from_arn(LISTENER_ARN).unwrap();
        let json = serde_json::to_value(&listener).unwrap();
        assert_eq!(json["handle"]["kind"], "identifier");
        assert_eq!(json["handle"]["value"], LISTENER_ARN);
    }

    #[test]
    fn test_environment_display() {
        let env = Environment::new(Some("123456789012".into()), Some("us-west-2".into()));
        assert_eq!(env.to_string(), "aws://123456789012/us-west-2");
        assert_eq!(
            Environment::default().to_string(),
            "aws://unknown-account/unknown-region"
        );
    }
}
