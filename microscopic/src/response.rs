//! # Response State Machine
//!
//! Every inbound request owns exactly one [`Response`]. It starts pending and
//! moves to exactly one terminal state:
//!
//! ```text
//! Pending ──respond(Ok)──▶ Success
//!    │  └───respond(Err)─▶ Fail
//!    └──────timeout()────▶ Timeout
//! ```
//!
//! The first transition wins. Calling [`Response::respond`] or
//! [`Response::timeout`] on a terminal response is a contract violation: it
//! returns [`ResponseError::CalledTwice`] and is logged at `error` level. The
//! lifecycle's own late writers (an expired timer, an async handler finishing
//! after the timeout) use a quiet variant and are dropped silently.

use crate::error::ResponseError;
use microscopic_core::{BoxError, ErrorPayload, ResponseMessage, Status, now_millis};
use serde_json::Value;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    status: Status,
    result: Option<Value>,
    error: Option<ErrorPayload>,
    responded: Option<i64>,
}

struct Inner {
    id: String,
    state: Mutex<State>,
    settled: watch::Sender<bool>,
    delivered: AtomicBool,
}

/// Handle to the single response of an inbound request.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct Response {
    inner: Arc<Inner>,
}

impl Response {
    /// Create a pending response with a fresh id.
    pub fn new() -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4().to_string(),
                state: Mutex::new(State::default()),
                settled,
                delivered: AtomicBool::new(false),
            }),
        }
    }

    /// The response id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The current status.
    pub fn status(&self) -> Status {
        self.state().status
    }

    /// The result, once the response succeeded.
    pub fn result(&self) -> Option<Value> {
        self.state().result.clone()
    }

    /// The error, once the response failed or timed out.
    pub fn error(&self) -> Option<ErrorPayload> {
        self.state().error.clone()
    }

    /// When the terminal transition happened, in epoch milliseconds.
    pub fn responded_at(&self) -> Option<i64> {
        self.state().responded
    }

    /// Check if the response reached a terminal state.
    pub fn is_responded(&self) -> bool {
        self.state().responded.is_some()
    }

    /// Settle the response with a result or an error.
    ///
    /// `Ok` becomes [`Status::Success`]; `Err` becomes [`Status::Fail`] with
    /// the error converted into an [`ErrorPayload`].
    pub fn respond(&self, outcome: Result<Value, BoxError>) -> Result<(), ResponseError> {
        self.loud(self.settle(|state| apply_outcome(state, outcome)))
    }

    /// Settle the response as timed out.
    pub fn timeout(&self) -> Result<(), ResponseError> {
        self.loud(self.settle(apply_timeout))
    }

    /// Create the reply capability handed to a method handler.
    pub fn create_reply(&self) -> Reply {
        Reply {
            response: self.clone(),
        }
    }

    /// Wait until the response reaches a terminal state.
    pub async fn settled(&self) {
        let mut settled = self.inner.settled.subscribe();
        while !*settled.borrow_and_update() {
            if settled.changed().await.is_err() {
                break;
            }
        }
    }

    /// Snapshot of the response envelope.
    pub fn to_message(&self) -> ResponseMessage {
        let state = self.state();
        ResponseMessage {
            id: self.inner.id.clone(),
            status: state.status,
            result: state.result.clone(),
            error: state.error.clone(),
        }
    }

    /// Settle with `outcome` unless already terminal. Returns whether it won.
    pub(crate) fn respond_if_pending(&self, outcome: Result<Value, BoxError>) -> bool {
        self.settle(|state| apply_outcome(state, outcome)).is_ok()
    }

    /// Time out unless already terminal. Returns whether it won.
    pub(crate) fn expire(&self) -> bool {
        self.settle(apply_timeout).is_ok()
    }

    /// Claim the single hand-off to the caller. Returns `false` if it was
    /// already claimed.
    pub(crate) fn mark_delivered(&self) -> bool {
        !self.inner.delivered.swap(true, Ordering::AcqRel)
    }

    fn settle(&self, apply: impl FnOnce(&mut State)) -> Result<(), ResponseError> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.responded.is_some() {
                return Err(ResponseError::CalledTwice);
            }
            apply(&mut state);
            state.responded = Some(now_millis());
        }
        self.inner.settled.send_replace(true);
        Ok(())
    }

    fn loud(&self, outcome: Result<(), ResponseError>) -> Result<(), ResponseError> {
        if let Err(error) = &outcome {
            tracing::error!(response = %self.inner.id, %error, "terminal transition rejected");
        }
        outcome
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Response")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("responded", &state.responded)
            .finish()
    }
}

fn apply_outcome(state: &mut State, outcome: Result<Value, BoxError>) {
    match outcome {
        Ok(result) => {
            state.status = Status::Success;
            state.result = Some(result);
        }
        Err(error) => {
            state.status = Status::Fail;
            state.error = Some(ErrorPayload::from_error(&*error));
        }
    }
}

fn apply_timeout(state: &mut State) {
    state.status = Status::Timeout;
    state.error = Some(ErrorPayload::new("Timeout"));
}

/// The reply capability a handler uses to settle its response.
///
/// Replying more than once fails with [`ResponseError::CalledTwice`].
#[derive(Clone, Debug)]
pub struct Reply {
    response: Response,
}

impl Reply {
    /// Settle the response with a result or an error.
    pub fn send(&self, outcome: Result<Value, BoxError>) -> Result<(), ResponseError> {
        self.response.respond(outcome)
    }

    /// Settle the response with a result.
    pub fn ok(&self, result: Value) -> Result<(), ResponseError> {
        self.send(Ok(result))
    }

    /// Settle the response with an error.
    pub fn err(&self, error: impl Into<BoxError>) -> Result<(), ResponseError> {
        self.send(Err(error.into()))
    }

    /// Check if the response already reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.response.is_responded()
    }

    pub(crate) fn send_if_pending(&self, outcome: Result<Value, BoxError>) -> bool {
        self.response.respond_if_pending(outcome)
    }
}
