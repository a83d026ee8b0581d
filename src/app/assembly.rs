use crate::app::stacks::compute::{ComputeIngressStack, PRODUCER_VPC_ID};
use crate::app::stacks::edge::PublicEdgeStack;
use crate::config::toml_config::{DeploymentConfig, Topology};
use crate::core::app::App;
use crate::core::context::{Context, HTTP_API_LISTENER_KEY, HTTP_VPC_LINK_KEY};
use crate::core::stack::Stack;
use crate::domain::reference::{ListenerReference, PrivateLinkHandle};
use crate::utils::error::{Result, SynthError};

/// 依 topology 組出 app；compute 一定先於使用它 handle 的 edge stack 宣告與註冊
pub fn assemble(config: &DeploymentConfig, context: &Context) -> Result<App> {
    let mut app = App::with_context(context.clone());
    tracing::info!("📦 Assembling topology {}", config.topology());

    match config.topology() {
        Topology::SingleStack => {
            let config = &config.single_stack_preset();
            let mut stack = Stack::new(config.app.single_stack_id.as_str(), config.environment());
            let compute = ComputeIngressStack::build(&mut stack, config, "VPC")?;
            compute.add_load_balancer_output(&mut stack)?;
            PublicEdgeStack::build(
                &mut stack,
                config,
                &compute.http_vpc_link,
                &compute.http_api_listener,
                false,
            )?;
            app.add_stack(stack)?;
        }
        Topology::SplitStacks => {
            let mut compute_stack = Stack::new(config.app.compute_stack_id.as_str(), config.environment());
            let compute = ComputeIngressStack::build(&mut compute_stack, config, PRODUCER_VPC_ID)?;
            app.add_stack(compute_stack)?;

            let mut edge_stack = Stack::new(config.app.edge_stack_id.as_str(), config.edge_environment());
            PublicEdgeStack::build(
                &mut edge_stack,
                config,
                &compute.http_vpc_link,
                &compute.http_api_listener,
                true,
            )?;
            app.add_stack(edge_stack)?;
        }
        Topology::ComputeOnly => {
            let mut stack = Stack::new(config.app.compute_stack_id.as_str(), config.environment());
            let compute = ComputeIngressStack::build(&mut stack, config, PRODUCER_VPC_ID)?;
            compute.add_handle_outputs(&mut stack)?;
            app.add_stack(stack)?;
        }
        Topology::EdgeOnly => {
            let (link, listener) = resolve_identifiers(config, app.context())?;
            let mut stack = Stack::new(config.app.edge_stack_id.as_str(), config.edge_environment());
            PublicEdgeStack::build(&mut stack, config, &link, &listener, true)?;
            app.add_stack(stack)?;
        }
    }

    Ok(app)
}

/// 與 compute 分開部署時 edge stack 的 handle：context 優先於 `[edge]` 設定，兩者都必須存在
pub fn resolve_identifiers(config: &DeploymentConfig, context: &Context) -> Result<(PrivateLinkHandle, ListenerReference)> {
    let link = context
        .try_get(HTTP_VPC_LINK_KEY)
        .map(str::to_string)
        .or_else(|| config.edge.vpc_link_id.clone())
        .ok_or_else(|| SynthError::MissingContextError {
            key: HTTP_VPC_LINK_KEY.to_string(),
        })?;
    let listener = context
        .try_get(HTTP_API_LISTENER_KEY)
        .map(str::to_string)
        .or_else(|| config.edge.listener_arn.clone())
        .ok_or_else(|| SynthError::MissingContextError {
            key: HTTP_API_LISTENER_KEY.to_string(),
        })?;

    tracing::debug!("Using existing VPC link {} and listener {}", link, listener);
    Ok((
        PrivateLinkHandle::from_identifier(link)?,
        ListenerReference::from_arn(listener)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTENER_ARN: &str = "arn:aws:elasticloadbalancing:us-west-2:082037726969:listener/app/Farga-httpa-UKHFB8SIA31L/9ae06a6f709fd03f/26bb62906e7b9b4a";

    #[test]
    fn test_context_wins_over_config() {
        let mut config = DeploymentConfig::default();
        config.edge.vpc_link_id = Some("aaaaaa".to_string());
        config.edge.listener_arn = Some(LISTENER_ARN.to_string());
        let context = Context::from_pairs(["httpVpcLink=65vcat"]).unwrap();

        let (link, listener) = resolve_identifiers(&config, &context).unwrap();
        assert_eq!(link.to_expr(), crate::domain::model::Expr::from("65vcat"));
        assert_eq!(listener.to_expr(), crate::domain::model::Expr::from(LISTENER_ARN));
    }

    #[test]
    fn test_missing_identifier_is_missing_context() {
        let context = Context::from_pairs([format!("httpApiListener={}", LISTENER_ARN)]).unwrap();
        let err = resolve_identifiers(&DeploymentConfig::default(), &context).unwrap_err();
        assert!(matches!(err, SynthError::MissingContextError { key } if key == "httpVpcLink"));
    }

    #[test]
    fn test_single_stack_uses_its_own_preset() {
        let mut config = DeploymentConfig::default();
        config.app.topology = Topology::SingleStack;

        let assembly = assemble(&config, &Context::new()).unwrap().synth().unwrap();
        let template = &assembly.stack("HttpApiBlogCdkLatestStack").unwrap().template;

        assert_eq!(
            template.resources_of_type("AWS::ServiceDiscovery::PrivateDnsNamespace").collect::<Vec<_>>(),
            vec!["FargateClusterDefaultServiceDiscoveryNamespace"]
        );
        assert_eq!(
            template.resources["FargateClusterDefaultServiceDiscoveryNamespace"]["Properties"]["Name"],
            "http-api"
        );
        assert_eq!(
            template.resources["bookServiceTaskDef"]["Properties"]["ContainerDefinitions"][0]["Image"],
            "ibuchh/book-service"
        );
        assert_eq!(
            template.resources["authorServiceTaskDef"]["Properties"]["ContainerDefinitions"][0]["Image"],
            "ibuchh/author-service"
        );
        assert!(template.resources["bookService"]["Properties"].get("ServiceRegistries").is_some());
        assert!(template.resources["authorService"]["Properties"].get("ServiceRegistries").is_none());

        let outputs: Vec<&str> = template.outputs.keys().map(String::as_str).collect();
        assert_eq!(outputs, vec!["ALBDNS"]);
    }

    #[test]
    fn test_single_stack_keeps_explicit_services() {
        let mut config = DeploymentConfig::from_toml_str(
            r#"
[app]
topology = "single-stack"

[[services]]
name = "bookService"
path = "/api/books"
priority = 1
image = { source = "ecr", repository = "book-service" }
"#,
        )
        .unwrap();

        let assembly = assemble(&config, &Context::new()).unwrap().synth().unwrap();
        let template = &assembly.stack("HttpApiBlogCdkLatestStack").unwrap().template;
        assert!(template.resource("DnsNamespace").is_some());
        assert!(template.resource("authorService").is_none());
        assert!(template.outputs.contains_key("BookService"));

        // set_services 之後同樣不套用預設
        config = DeploymentConfig::default();
        config.app.topology = Topology::SingleStack;
        config.set_services(config.services.clone());
        let assembly = assemble(&config, &Context::new()).unwrap().synth().unwrap();
        let template = &assembly.stack("HttpApiBlogCdkLatestStack").unwrap().template;
        assert!(template.resource("DnsNamespace").is_some());
    }

    #[test]
    fn test_stack_counts_per_topology() {
        let mut config = DeploymentConfig::default();
        let context = Context::from_pairs([
            "httpVpcLink=65vcat".to_string(),
            format!("httpApiListener={}", LISTENER_ARN),
        ])
        .unwrap();

        for (topology, expected) in [
            (Topology::SingleStack, vec!["HttpApiBlogCdkLatestStack"]),
            (Topology::SplitStacks, vec!["FargateVpclinkStack", "HttpApiStack"]),
            (Topology::ComputeOnly, vec!["FargateVpclinkStack"]),
            (Topology::EdgeOnly, vec!["HttpApiStack"]),
        ] {
            config.app.topology = topology;
            let app = assemble(&config, &context).unwrap();
            let ids: Vec<&str> = app.stacks().iter().map(|s| s.id()).collect();
            assert_eq!(ids, expected, "topology {}", topology);
        }
    }
}
