use microscopic::{
    BoxError, Extension, Flow, MethodDefinition, Microscopic, Request, RequestEvent,
    RequestMessage, ServiceEvent, ServiceOptions, Status,
};
use serde_json::json;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use microscopic_core::now_millis;

mod common;
use common::{Recorder, silent_method, sum_method, tagged_method};

#[tokio::test]
async fn test_sum_through_handle() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    service.add_method(sum_method()).unwrap();

    let response = service
        .handle(RequestMessage::new("sum").with_params(json!([2, 3])))
        .await
        .unwrap();
    assert_eq!(response.status, Status::Success);
    assert_eq!(response.result, Some(json!(5)));

    let response = service
        .handle(RequestMessage::new("sum").with_params(json!("not numbers")))
        .await
        .unwrap();
    assert_eq!(response.status, Status::Fail);
    assert!(response.error.is_some());
}

#[tokio::test]
async fn test_expired_request_never_reaches_handler() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    service
        .add_method(tagged_method("work", "done", calls.clone()))
        .unwrap();

    let stale = RequestMessage::new("work")
        .with_timeout(10)
        .with_sent(now_millis() - 1_000);
    let response = service.handle(stale).await.unwrap();

    assert_eq!(response.status, Status::Timeout);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_handler_times_out() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    service.add_method(silent_method("hang")).unwrap();

    let response = service
        .handle(RequestMessage::new("hang").with_timeout(50))
        .await
        .unwrap();
    assert_eq!(response.status, Status::Timeout);
    assert!(response.result.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reply_after_timeout_is_dropped() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    service
        .add_method(MethodDefinition::new("slow").handle(|_request: Request| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, BoxError>(json!("late"))
        }))
        .unwrap();

    let response = service
        .handle(RequestMessage::new("slow").with_timeout(20))
        .await
        .unwrap();
    assert_eq!(response.status, Status::Timeout);
    assert!(response.result.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_interrupts_hanging_extension() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    service
        .add_method(tagged_method("work", "done", calls.clone()))
        .unwrap();
    service.ext_request(RequestEvent::Request, |_request: Request| async {
        std::future::pending::<()>().await;
        Ok::<Flow, BoxError>(Flow::Continue)
    });

    let response = tokio::time::timeout(
        Duration::from_secs(1),
        service.handle(RequestMessage::new("work").with_timeout(50)),
    )
    .await
    .expect("timeout must be delivered while the extension hangs")
    .unwrap();

    assert_eq!(response.status, Status::Timeout);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_delivered_before_slow_extension_returns() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    service
        .add_method(tagged_method("work", "done", calls.clone()))
        .unwrap();
    service.ext_request(RequestEvent::PreMethod, |_request: Request| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok::<Flow, BoxError>(Flow::Continue)
    });

    let started = tokio::time::Instant::now();
    let response = service
        .handle(RequestMessage::new("work").with_timeout(50))
        .await
        .unwrap();

    assert_eq!(response.status, Status::Timeout);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_first_writer_wins() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    let second = Arc::new(Mutex::new(None));
    let sink = second.clone();
    service
        .add_method(MethodDefinition::new("twice").callback(move |_, reply| {
            reply.ok(json!(1)).unwrap();
            *sink.lock().unwrap() = Some(reply.ok(json!(2)));
        }))
        .unwrap();

    let response = service.handle(RequestMessage::new("twice")).await.unwrap();

    assert_eq!(response.result, Some(json!(1)));
    let second = second.lock().unwrap().take().unwrap();
    assert_eq!(second.unwrap_err().to_string(), "Response called twice");
}

#[tokio::test]
async fn test_handler_panic_fails_the_response() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    service
        .add_method(MethodDefinition::new("boom").callback(|_, _| panic!("kaboom")))
        .unwrap();
    service.add_method(sum_method()).unwrap();

    let response = service.handle(RequestMessage::new("boom")).await.unwrap();
    assert_eq!(response.status, Status::Fail);
    assert_eq!(response.error.unwrap().message, "handler panicked: kaboom");

    // the service keeps serving
    let response = service
        .handle(RequestMessage::new("sum").with_params(json!([1, 1])))
        .await
        .unwrap();
    assert_eq!(response.result, Some(json!(2)));
}

#[tokio::test]
async fn test_versioned_lookup() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    service
        .add_method(tagged_method("Greet", "v1", calls.clone()))
        .unwrap();
    service
        .add_method(
            MethodDefinition::new("greet")
                .version("2")
                .callback(|_, reply| reply.ok(json!("v2")).unwrap()),
        )
        .unwrap();

    let plain = service.handle(RequestMessage::new("GREET")).await.unwrap();
    assert_eq!(plain.result, Some(json!("v1")));

    let versioned = service
        .handle(RequestMessage::new("greet").with_version("2"))
        .await
        .unwrap();
    assert_eq!(versioned.result, Some(json!("v2")));

    let missing = service
        .handle(RequestMessage::new("greet").with_version("3"))
        .await
        .unwrap();
    assert_eq!(missing.error.unwrap().message, "method not found: greet_3");
}

#[tokio::test]
async fn test_request_extension_order() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let method_log = log.clone();
    service
        .add_method(MethodDefinition::new("work").callback(move |_, reply| {
            method_log.lock().unwrap().push("method");
            reply.ok(json!(null)).unwrap();
        }))
        .unwrap();

    service.ext_request(RequestEvent::PostResponse, Recorder::new("post-response", &log));
    service.ext_request(RequestEvent::PreResponse, Recorder::new("pre-response", &log));
    service.ext_request(RequestEvent::PreMethod, Recorder::new("pre-method", &log));
    service.ext_request(RequestEvent::Request, Recorder::new("request-1", &log));
    service
        .ext("onRequest", Extension::request(Recorder::new("request-2", &log)))
        .unwrap();

    service.handle(RequestMessage::new("work")).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "request-1",
            "request-2",
            "pre-method",
            "method",
            "pre-response",
            "post-response"
        ]
    );
}

#[tokio::test]
async fn test_extension_can_answer_early() {
    let service = Microscopic::in_memory()
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    service
        .add_method(tagged_method("cached", "fresh", calls.clone()))
        .unwrap();
    service.ext_request(RequestEvent::PreMethod, |request: Request| async move {
        request.set_response(Ok(json!("cached")))?;
        Ok::<_, BoxError>(Flow::Continue)
    });

    let response = service.handle(RequestMessage::new("cached")).await.unwrap();

    assert_eq!(response.result, Some(json!("cached")));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_service_extension_order() {
    let framework = Microscopic::in_memory();
    let service = framework
        .create_service("calc", ServiceOptions::new())
        .unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    for (event, label) in [
        (ServiceEvent::PostStop, "post-stop"),
        (ServiceEvent::PreStart, "pre-start"),
        (ServiceEvent::PreStop, "pre-stop"),
        (ServiceEvent::PostStart, "post-start"),
    ] {
        service.ext_service(event, Recorder::new(label, &log));
    }

    service.start().await.unwrap();
    assert!(service.is_started());
    service.stop().await.unwrap();
    assert!(!service.is_started());

    assert_eq!(
        *log.lock().unwrap(),
        vec!["pre-start", "post-start", "pre-stop", "post-stop"]
    );
}
