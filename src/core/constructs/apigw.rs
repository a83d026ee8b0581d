//! HTTP API、VPC link、私有整合與 route

use crate::core::stack::Stack;
use crate::domain::model::{Expr, Pseudo, Resource};
use crate::domain::ports::Construct;
use crate::domain::reference::{ListenerReference, LogicalRef, PrivateLinkHandle};
use crate::utils::error::Result;
use crate::utils::validation::validate_non_empty_string;

pub const DEFAULT_STAGE: &str = "$default";
pub const PROXY_ROUTE_KEY: &str = "ANY /{proxy+}";

/// 在 endpoint URL 後接上路徑；單純串接，不做正規化
pub fn derive_endpoint(base: &str, suffix: &str) -> String {
    format!("{}{}", base, suffix)
}

/// [`derive_endpoint`] 的模板版本；併入既有的 `Fn::Join ""`，不巢狀
pub fn derive_endpoint_expr(base: &Expr, suffix: &str) -> Expr {
    match base {
        Expr::Join(delimiter, parts) if delimiter.is_empty() => {
            let mut parts = parts.clone();
            parts.push(Expr::from(suffix));
            Expr::Join(String::new(), parts)
        }
        Expr::Literal(serde_json::Value::String(base)) => Expr::from(derive_endpoint(base, suffix)),
        other => Expr::concat([other.clone(), Expr::from(suffix)]),
    }
}

#[derive(Debug, Clone)]
pub struct HttpApi {
    node: LogicalRef,
}

impl Construct for HttpApi {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl HttpApi {
    pub fn new(stack: &mut Stack, id: &str, name: &str, create_default_stage: bool) -> Result<Self> {
        validate_non_empty_string("edge.api_name", name)?;

        let node = stack.add_resource(
            id,
            Resource::new("AWS::ApiGatewayV2::Api")
                .prop("Name", name)
                .prop("ProtocolType", "HTTP"),
        )?;

        if create_default_stage {
            stack.add_resource(
                &format!("{}DefaultStage", id),
                Resource::new("AWS::ApiGatewayV2::Stage")
                    .prop("ApiId", Expr::Ref(node.clone()))
                    .prop("StageName", DEFAULT_STAGE)
                    .prop("AutoDeploy", true),
            )?;
        }

        Ok(Self { node })
    }

    pub fn api_id(&self) -> Expr {
        self.reference()
    }

    /// `https://<api id>.execute-api.<region>.<url suffix>`
    pub fn api_endpoint(&self) -> Expr {
        Expr::concat([
            Expr::from("https://"),
            self.api_id(),
            Expr::from(".execute-api."),
            Expr::Pseudo(Pseudo::Region),
            Expr::from("."),
            Expr::Pseudo(Pseudo::UrlSuffix),
        ])
    }
}

/// 在指定 subnet 上宣告 VPC link，回傳 live handle
pub fn vpc_link(stack: &mut Stack, id: &str, name: &str, subnet_ids: Vec<Expr>) -> Result<PrivateLinkHandle> {
    validate_non_empty_string("compute.vpc_link_name", name)?;
    let node = stack.add_resource(
        id,
        Resource::new(PrivateLinkHandle::RESOURCE_TYPE)
            .prop("Name", name)
            .prop("SubnetIds", Expr::List(subnet_ids)),
    )?;
    Ok(PrivateLinkHandle::live(node))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationProps {
    pub description: String,
    pub method: String,
    pub payload_format_version: String,
}

impl Default for IntegrationProps {
    fn default() -> Self {
        Self {
            description: "API Integration".to_string(),
            method: "ANY".to_string(),
            payload_format_version: "1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Integration {
    node: LogicalRef,
}

impl Construct for Integration {
    fn logical_ref(&self) -> &LogicalRef {
        &self.node
    }
}

impl Integration {
    /// 經由 VPC link 連到 ALB listener 的 HTTP proxy 整合
    pub fn private(
        stack: &mut Stack,
        id: &str,
        api: &HttpApi,
        link: &PrivateLinkHandle,
        listener: &ListenerReference,
        props: &IntegrationProps,
    ) -> Result<Self> {
        let node = stack.add_resource(
            id,
            Resource::new("AWS::ApiGatewayV2::Integration")
                .prop("ApiId", api.api_id())
                .prop("ConnectionId", link.to_expr())
                .prop("ConnectionType", "VPC_LINK")
                .prop("Description", props.description.as_str())
                .prop("IntegrationMethod", props.method.as_str())
                .prop("IntegrationType", "HTTP_PROXY")
                .prop("IntegrationUri", listener.to_expr())
                .prop("PayloadFormatVersion", props.payload_format_version.as_str()),
        )?;
        Ok(Self { node })
    }
}

pub fn route(stack: &mut Stack, id: &str, api: &HttpApi, route_key: &str, integration: &Integration) -> Result<LogicalRef> {
    stack.add_resource(
        id,
        Resource::new("AWS::ApiGatewayV2::Route")
            .prop("ApiId", api.api_id())
            .prop("RouteKey", route_key)
            .prop(
                "Target",
                Expr::concat([Expr::from("integrations/"), integration.reference()]),
            ),
    )
}
