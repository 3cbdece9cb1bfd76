use microscopic::{
    ClientError, MethodDefinition, Microscopic, SendOptions, Service, ServiceError,
    ServiceOptions, TransportOptions,
};
use serde_json::{Value, json};
use std::{
    sync::{Arc, atomic::AtomicUsize},
    time::Duration,
};

mod common;
use common::{silent_method, started_service, tagged_method};

async fn instance(framework: &Microscopic, options: ServiceOptions, tag: &str) -> Service {
    let service = framework.create_service("calc", options).unwrap();
    service
        .add_method(tagged_method("whoami", tag, Arc::new(AtomicUsize::new(0))))
        .unwrap();
    service.start().await.unwrap();
    service
}

async fn whoami(framework: &Microscopic, calls: usize) -> Vec<Value> {
    let client = framework.create_client("calc");
    let mut answers = Vec::new();
    for _ in 0..calls {
        let response = client.call("whoami", SendOptions::new()).await.unwrap();
        answers.push(response.result.unwrap());
    }
    answers
}

#[tokio::test]
async fn test_call_round_trip() {
    let framework = Microscopic::in_memory();
    let _service = started_service(&framework, "calc", ServiceOptions::new()).await;

    let client = framework.create_client("calc");
    let response = client
        .call("sum", SendOptions::new().with_params(json!([1, 2])))
        .await
        .unwrap();

    assert_eq!(response.result, Some(json!(3)));
    assert_eq!(client.options().unwrap().transport.kind, "memory");
}

#[tokio::test]
async fn test_remote_failure_reaches_client() {
    let framework = Microscopic::in_memory();
    let _service = started_service(&framework, "calc", ServiceOptions::new()).await;

    let client = framework.create_client("calc");
    match client
        .call("sum", SendOptions::new().with_params(json!({ "a": 1 })))
        .await
    {
        Err(ClientError::Remote(error)) => assert!(!error.message.is_empty()),
        other => panic!("unexpected {other:?}"),
    }

    match client.call("product", SendOptions::new()).await {
        Err(ClientError::Remote(error)) => {
            assert_eq!(error.message, "method not found: product")
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_round_robin_across_instances() {
    let framework = Microscopic::in_memory();
    let options = ServiceOptions::new().with_loadbalancer("round-robin");
    let _a = instance(&framework, options.clone(), "a").await;
    let _b = instance(&framework, options, "b").await;

    assert_eq!(
        whoami(&framework, 4).await,
        vec![json!("a"), json!("b"), json!("a"), json!("b")]
    );
}

#[tokio::test]
async fn test_transport_can_disable_balancing() {
    let framework = Microscopic::in_memory();
    let options = ServiceOptions::new()
        .with_transport(TransportOptions::default().with_loadbalancing(false))
        .with_loadbalancer("round-robin");
    let _a = instance(&framework, options.clone(), "a").await;
    let _b = instance(&framework, options, "b").await;

    assert_eq!(whoami(&framework, 3).await, vec![json!("a"); 3]);
}

#[tokio::test]
async fn test_without_balancer_first_node_wins() {
    let framework = Microscopic::in_memory();
    let _a = instance(&framework, ServiceOptions::new(), "a").await;
    let _b = instance(&framework, ServiceOptions::new(), "b").await;

    assert_eq!(whoami(&framework, 3).await, vec![json!("a"); 3]);
}

#[tokio::test]
async fn test_client_created_before_service() {
    let framework = Microscopic::in_memory();
    let client = framework.create_client("calc");
    client.ready().await.unwrap();
    assert_eq!(client.options(), Some(ServiceOptions::default()));

    let _service = started_service(&framework, "calc", ServiceOptions::new()).await;
    let response = client
        .call("sum", SendOptions::new().with_params(json!([20, 22])))
        .await
        .unwrap();
    assert_eq!(response.result, Some(json!(42)));
}

#[tokio::test]
async fn test_stopped_service_has_no_nodes() {
    let framework = Microscopic::in_memory();
    let service = started_service(&framework, "calc", ServiceOptions::new()).await;
    let client = framework.create_client("calc");
    client
        .call("sum", SendOptions::new().with_params(json!([1, 1])))
        .await
        .unwrap();

    service.stop().await.unwrap();

    assert!(matches!(
        client.call("sum", SendOptions::new()).await,
        Err(ClientError::NoNodes(name)) if name == "calc"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_silent_method_times_out_for_client() {
    let framework = Microscopic::in_memory();
    let service = framework
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    service.add_method(silent_method("hang")).unwrap();
    service.start().await.unwrap();

    let client = framework.create_client("calc");
    let result = client
        .call(
            "hang",
            SendOptions::new().with_timeout(Duration::from_millis(50)),
        )
        .await;

    assert!(result.unwrap_err().is_timeout());
}

#[tokio::test]
async fn test_headers_and_identity_reach_the_method() {
    let framework = Microscopic::in_memory();
    let service = framework
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    service
        .add_method(MethodDefinition::new("inspect").callback(|request, reply| {
            let info = request.info();
            reply
                .ok(json!({
                    "trace": request.header("trace"),
                    "client": info.client.map(|client| client.id),
                    "service": info.service.map(|service| service.name),
                }))
                .unwrap();
        }))
        .unwrap();
    service.start().await.unwrap();

    let client = framework.create_client("calc");
    let response = client
        .call(
            "inspect",
            SendOptions::new().with_header("trace", json!("abc")),
        )
        .await
        .unwrap();

    assert_eq!(
        response.result,
        Some(json!({ "trace": "abc", "client": client.id(), "service": "calc" }))
    );
}

#[tokio::test]
async fn test_plugin_adds_methods() {
    let framework = Microscopic::in_memory();
    let service = framework
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    service
        .register(
            |service: &Service, factor: i64| -> Result<(), ServiceError> {
                service.add_method(MethodDefinition::new("scale").callback(
                    move |request, reply| {
                        let value: i64 = request.param("value").unwrap_or_default();
                        reply.ok(json!(value * factor)).unwrap();
                    },
                ))?;
                Ok(())
            },
            3,
        )
        .unwrap();
    service.start().await.unwrap();

    let response = framework
        .create_client("calc")
        .call("scale", SendOptions::new().with_params(json!({ "value": 5 })))
        .await
        .unwrap();
    assert_eq!(response.result, Some(json!(15)));
}
