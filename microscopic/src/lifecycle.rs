//! # Request Lifecycle
//!
//! Every inbound request runs through two chained pipelines:
//!
//! ```text
//! request:  onRequest [resolve method, stamp info, arm timer, extensions]
//!           → onPreMethod → invoke method → onPostMethod
//! response: onPreResponse → deliver → onPostResponse
//! ```
//!
//! The request pipeline is driven by [`RequestDriver`], which stops as soon as
//! the response is terminal. Whatever ends the request pipeline, a still
//! pending response is failed with the carried error, the timer is cleared
//! and the response pipeline runs. Its errors are only logged.

use crate::{
    error::LifecycleError,
    extension::RequestEvent,
    method::Method,
    request::Request,
    service::Service,
};
use microscopic_core::{
    BoxError, Driver, DynStep, Flow, Pipeline, Responder, Sequential, ServiceInfo, Step,
    StepResult, local_ip, now_millis,
};
use futures::future::{Either, select};
use std::{pin::pin, sync::Mutex, time::Duration};
use tracing::Instrument;

/// Per-step hook of the request pipeline: refuses to run anything once the
/// response is terminal, and abandons a running step the moment it becomes
/// terminal.
struct RequestDriver;

impl Driver<Request> for RequestDriver {
    async fn drive<'a>(
        &'a self,
        step: Option<&'a dyn DynStep<Request>>,
        request: &'a Request,
    ) -> StepResult {
        if request.response().is_responded() {
            return Ok(Flow::Stop);
        }
        let Some(step) = step else {
            return Ok(Flow::Continue);
        };

        let settled = pin!(request.response().settled());
        match select(step.run_dyn(request), settled).await {
            Either::Left((outcome, _)) => outcome,
            Either::Right(((), _)) => {
                tracing::trace!("response settled while a step was running");
                Ok(Flow::Stop)
            }
        }
    }
}

/// Run the full lifecycle of one inbound request.
pub(crate) async fn execute(service: Service, request: Request, responder: Responder) {
    let span = tracing::debug_span!(
        "request",
        service = %service.name(),
        method = %Method::key(&request.method_name(), request.version().as_deref()),
        id = ?request.id(),
    );

    async move {
        run_request(&service, &request).await;
        request.disarm_timer();
        run_response(&service, &request, responder).await;
    }
    .instrument(span)
    .await
}

async fn run_request(service: &Service, request: &Request) {
    let response = request.response().clone();
    let mut pipeline: Pipeline<Request, _, _> =
        Pipeline::with_hooks(RequestDriver, move |error: Option<BoxError>| {
            if response.is_responded() {
                return;
            }
            let error = error.unwrap_or_else(|| Box::new(LifecycleError::Unanswered));
            tracing::debug!(%error, "request failed before a response");
            response.respond_if_pending(Err(error));
        });

    pipeline
        .add(ResolveMethod(service.clone()))
        .add(StampInfo(service.clone()))
        .add(ArmTimer)
        .add_group(service.request_extensions(RequestEvent::Request))
        .add_group(service.request_extensions(RequestEvent::PreMethod))
        .add(invoke_method)
        .add_group(service.request_extensions(RequestEvent::PostMethod));

    pipeline.start(request).await;
}

async fn run_response(service: &Service, request: &Request, responder: Responder) {
    let mut pipeline: Pipeline<Request, _, _> =
        Pipeline::with_hooks(Sequential, |error: Option<BoxError>| {
            if let Some(error) = error {
                tracing::error!(%error, "response pipeline failed");
            }
        });

    pipeline
        .add_group(service.request_extensions(RequestEvent::PreResponse))
        .add(Deliver(Mutex::new(Some(responder))))
        .add_group(service.request_extensions(RequestEvent::PostResponse));

    pipeline.start(request).await;
}

struct ResolveMethod(Service);

impl Step<Request> for ResolveMethod {
    async fn run(&self, request: &Request) -> StepResult {
        let name = request.method_name();
        let version = request.version();

        match self.0.get_method(&name, version.as_deref()) {
            Some(method) => {
                tracing::debug!(method = method.name(), "method resolved");
                request.set_method(method);
                Ok(Flow::Continue)
            }
            None => Err(Box::new(LifecycleError::MethodNotFound {
                key: Method::key(&name, version.as_deref()),
            })),
        }
    }
}

struct StampInfo(Service);

impl Step<Request> for StampInfo {
    async fn run(&self, request: &Request) -> StepResult {
        let service = ServiceInfo {
            name: self.0.name().to_string(),
            id: self.0.id(),
            ip: Some(local_ip().to_string()),
        };
        request.update_info(|info| {
            info.received = Some(now_millis());
            info.service = Some(service);
        });
        Ok(Flow::Continue)
    }
}

struct ArmTimer;

impl Step<Request> for ArmTimer {
    async fn run(&self, request: &Request) -> StepResult {
        let Some(timeout) = request.timeout() else {
            return Ok(Flow::Continue);
        };

        let response = request.response().clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout)).await;
            if response.expire() {
                tracing::debug!(timeout, "request timed out");
            }
        });
        request.arm_timer(timer.abort_handle());
        tracing::trace!(timeout, "timer armed");
        Ok(Flow::Continue)
    }
}

async fn invoke_method(request: Request) -> StepResult {
    let Some(method) = request.method() else {
        return Err(Box::new(LifecycleError::MethodNotFound {
            key: Method::key(&request.method_name(), request.version().as_deref()),
        }));
    };

    if request.is_expired() {
        tracing::debug!("request expired before invocation");
        request.response().expire();
        return Ok(Flow::Continue);
    }

    let response = request.response().clone();
    method.run(request, response.create_reply());
    response.settled().await;
    Ok(Flow::Continue)
}

struct Deliver(Mutex<Option<Responder>>);

impl Step<Request> for Deliver {
    async fn run(&self, request: &Request) -> StepResult {
        if !request.response().mark_delivered() {
            return Ok(Flow::Continue);
        }

        let responder = self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(respond) = responder {
            let message = request.response().to_message();
            tracing::debug!(status = ?message.status, "response delivered");
            respond(message);
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{extension::Extension, method::MethodDefinition};
    use microscopic_core::{RequestMessage, ResponseMessage, ServiceOptions, Status};
    use microscopic_std::{Components, testing::StaticRegistry};
    use serde_json::json;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use tokio::sync::oneshot;

    fn service() -> Service {
        Service::new(
            "calc",
            ServiceOptions::new(),
            Arc::new(StaticRegistry::default()),
            Arc::new(Components::with_builtins()),
        )
        .unwrap()
    }

    async fn run(service: &Service, message: RequestMessage) -> ResponseMessage {
        let (tx, rx) = oneshot::channel();
        execute(
            service.clone(),
            Request::new(message),
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        )
        .await;
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method_fails_response() {
        let response = run(&service(), RequestMessage::new("missing").with_version("2")).await;
        assert_eq!(response.status, Status::Fail);
        assert_eq!(response.error.unwrap().message, "method not found: missing_2");
    }

    #[tokio::test]
    async fn test_stamps_service_info() {
        let service = service();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        service
            .add_method(MethodDefinition::new("info").callback(move |request, reply| {
                *sink.lock().unwrap() = Some(request.info());
                reply.ok(json!(null)).unwrap();
            }))
            .unwrap();

        run(&service, RequestMessage::new("info")).await;

        let info = seen.lock().unwrap().clone().unwrap();
        assert!(info.received.is_some());
        let stamped = info.service.unwrap();
        assert_eq!(stamped.name, "calc");
        assert_eq!(stamped.id, service.id());
    }

    #[tokio::test]
    async fn test_stop_without_answer_fails_response() {
        let service = service();
        service
            .add_method(MethodDefinition::new("noop").callback(|_, reply| reply.ok(json!(1)).unwrap()))
            .unwrap();
        service.ext_request(RequestEvent::PreMethod, |_request: Request| async {
            Ok::<Flow, BoxError>(Flow::Stop)
        });

        let response = run(&service, RequestMessage::new("noop")).await;
        assert_eq!(response.status, Status::Fail);
        assert_eq!(
            response.error.unwrap().message,
            "request ended without a response"
        );
    }

    #[tokio::test]
    async fn test_response_extension_error_skips_delivery_only() {
        let service = service();
        service
            .add_method(MethodDefinition::new("noop").callback(|_, reply| reply.ok(json!(1)).unwrap()))
            .unwrap();
        let post = Arc::new(AtomicUsize::new(0));
        let counter = post.clone();
        service
            .ext(
                "onPreResponse",
                Extension::request(|_request: Request| async {
                    Err::<Flow, BoxError>("pre-response failed".into())
                }),
            )
            .unwrap();
        service.ext_request(RequestEvent::PostResponse, move |_request: Request| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<Flow, BoxError>(Flow::Continue)
            }
        });

        let request = Request::new(RequestMessage::new("noop"));
        let delivered = Arc::new(AtomicUsize::new(0));
        let count = delivered.clone();
        execute(
            service.clone(),
            request.clone(),
            Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        assert_eq!(request.response().status(), Status::Success);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(post.load(Ordering::SeqCst), 0);
    }
}
