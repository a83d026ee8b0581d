use http_api_stacks::app::stacks::compute::PRODUCER_VPC_ID;
use http_api_stacks::core::constructs::apigw::derive_endpoint;
use http_api_stacks::core::stack::Stack;
use http_api_stacks::domain::reference::Environment;
use http_api_stacks::{App, ComputeIngressStack, DeploymentConfig, PublicEdgeStack, SynthError};
use tempfile::TempDir;

fn env() -> Environment {
    Environment::region("us-west-2")
}

#[test]
fn test_endpoint_suffixes() {
    let base = "https://abc123.execute-api.us-west-2.amazonaws.com";
    assert_eq!(
        derive_endpoint(base, "/api/books"),
        "https://abc123.execute-api.us-west-2.amazonaws.com/api/books"
    );
    assert_eq!(
        derive_endpoint(base, "/api/authors"),
        "https://abc123.execute-api.us-west-2.amazonaws.com/api/authors"
    );
}

#[test]
fn test_edge_registered_before_compute_is_unresolved() {
    let config = DeploymentConfig::default();

    let mut compute_stack = Stack::new("FargateVpclinkStack", env());
    let compute = ComputeIngressStack::build(&mut compute_stack, &config, PRODUCER_VPC_ID).unwrap();

    let mut edge_stack = Stack::new("HttpApiStack", env());
    PublicEdgeStack::build(
        &mut edge_stack,
        &config,
        &compute.http_vpc_link,
        &compute.http_api_listener,
        false,
    )
    .unwrap();

    let mut app = App::new();
    app.add_stack(edge_stack).unwrap();
    app.add_stack(compute_stack).unwrap();

    let err = app.synth().unwrap_err();
    match err {
        SynthError::UnresolvedReferenceError {
            consumer, producer, ..
        } => {
            assert_eq!(consumer, "HttpApiStack");
            assert_eq!(producer, "FargateVpclinkStack");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_duplicate_priority_is_rejected() {
    let mut config = DeploymentConfig::default();
    config.services[1].priority = config.services[0].priority;

    let mut stack = Stack::new("FargateVpclinkStack", env());
    let err = ComputeIngressStack::build(&mut stack, &config, PRODUCER_VPC_ID).unwrap_err();
    assert!(matches!(err, SynthError::DuplicatePriorityError { .. }));
}

#[test]
fn test_empty_stack_renders_empty_template() {
    let mut app = App::new();
    app.add_stack(Stack::new("Empty", env())).unwrap();

    let assembly = app.synth().unwrap();
    let template = serde_json::to_string(&assembly.stack("Empty").unwrap().template).unwrap();
    assert_eq!(template, "{}");
}

#[tokio::test]
async fn test_failed_synthesis_leaves_output_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let output_path = temp_dir.path().join("cdk.out");

    let config = DeploymentConfig::default();
    let mut compute_stack = Stack::new("FargateVpclinkStack", env());
    let compute = ComputeIngressStack::build(&mut compute_stack, &config, PRODUCER_VPC_ID).unwrap();
    let other_account = Environment::new(Some("222222222222".to_string()), Some("us-east-1".to_string()));
    let mut edge_stack = Stack::new("HttpApiStack", other_account);
    PublicEdgeStack::build(
        &mut edge_stack,
        &config,
        &compute.http_vpc_link,
        &compute.http_api_listener,
        false,
    )
    .unwrap();

    let mut app = App::new();
    app.add_stack(compute_stack).unwrap();
    app.add_stack(edge_stack).unwrap();

    let storage = http_api_stacks::LocalStorage::new(output_path.to_str().unwrap().to_string());
    let result = http_api_stacks::Synthesizer::new(storage).run(&app).await;

    assert!(matches!(
        result,
        Err(SynthError::CrossEnvironmentReferenceError { .. })
    ));
    assert!(!output_path.join("HttpApiStack.template.json").exists());
}
