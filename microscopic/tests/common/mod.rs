#![allow(dead_code)]

use microscopic::{
    BoxError, Flow, MethodDefinition, Microscopic, Request, Service, ServiceOptions, Step,
    StepResult,
};
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

// ============================================================================
// Methods
// ============================================================================

pub async fn sum(request: Request) -> Result<Value, BoxError> {
    let (a, b): (i64, i64) = request.parse_params()?;
    Ok(json!(a + b))
}

pub fn sum_method() -> MethodDefinition {
    MethodDefinition::new("sum").handle(sum)
}

/// A method that counts its invocations and answers with `tag`.
pub fn tagged_method(name: &str, tag: &str, calls: Arc<AtomicUsize>) -> MethodDefinition {
    let tag = tag.to_string();
    MethodDefinition::new(name).callback(move |_, reply| {
        calls.fetch_add(1, Ordering::SeqCst);
        reply.ok(json!(tag)).unwrap();
    })
}

/// A method that never replies.
pub fn silent_method(name: &str) -> MethodDefinition {
    MethodDefinition::new(name).callback(|_, _| {})
}

// ============================================================================
// Extensions
// ============================================================================

/// Appends its label to a shared log every time it runs.
pub struct Recorder {
    pub label: &'static str,
    pub log: Arc<Mutex<Vec<&'static str>>>,
}

impl Recorder {
    pub fn new(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            label,
            log: log.clone(),
        }
    }
}

impl Step<Request> for Recorder {
    async fn run(&self, _request: &Request) -> StepResult {
        self.log.lock().unwrap().push(self.label);
        Ok(Flow::Continue)
    }
}

impl Step<Service> for Recorder {
    async fn run(&self, _service: &Service) -> StepResult {
        self.log.lock().unwrap().push(self.label);
        Ok(Flow::Continue)
    }
}

// ============================================================================
// Setup
// ============================================================================

pub async fn started_service(framework: &Microscopic, name: &str, options: ServiceOptions) -> Service {
    let service = framework.create_service(name, options).unwrap();
    service.add_method(sum_method()).unwrap();
    service.start().await.unwrap();
    service
}
