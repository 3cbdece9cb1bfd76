//! Outbound request correlation.
//!
//! Every outbound call owns one [`Completion`]. Three triggers race for it:
//! the transport reporting an error, the transport reporting a response and
//! the local timer. The first one wins and the caller's callback runs exactly
//! once; every later trigger is discarded.

use crate::error::ClientError;
use microscopic_core::{RequestMessage, ResponseMessage, Status, TransportError};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::task::AbortHandle;

/// Receives the mapped outcome of one outbound call.
pub type CallCallback = Box<dyn FnOnce(Result<ResponseMessage, ClientError>) + Send>;

/// Map a transport outcome to what the caller receives.
///
/// | outcome | result |
/// |---|---|
/// | transport error | `Err(ClientError::Transport)` |
/// | status success | `Ok(response)` |
/// | status timeout | `Err(ClientError::Timeout { response: Some(..) })` |
/// | error field set | `Err(ClientError::Remote)` |
/// | anything else | `Err(ClientError::Unknown)` |
pub fn map_outcome(
    outcome: Result<ResponseMessage, TransportError>,
) -> Result<ResponseMessage, ClientError> {
    let response = outcome?;
    match response.status {
        Status::Success => Ok(response),
        Status::Timeout => Err(ClientError::Timeout {
            response: Some(Box::new(response)),
        }),
        _ => match response.error {
            Some(error) => Err(ClientError::Remote(error)),
            None => Err(ClientError::Unknown),
        },
    }
}

/// Single-fire completion of one outbound call.
pub(crate) struct Completion {
    fired: AtomicBool,
    callback: Mutex<Option<CallCallback>>,
    timer: Mutex<Option<AbortHandle>>,
}

impl Completion {
    pub(crate) fn new(callback: CallCallback) -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicBool::new(false),
            callback: Mutex::new(Some(callback)),
            timer: Mutex::new(None),
        })
    }

    /// Start the local deadline.
    ///
    /// The timer task keeps the completion alive, so a call whose transport
    /// never answers still completes with a timeout.
    pub(crate) fn arm(self: &Arc<Self>, timeout: Duration) {
        let completion = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            completion.fire(Err(ClientError::Timeout { response: None }));
        });

        *self.timer.lock().unwrap_or_else(|e| e.into_inner()) = Some(timer.abort_handle());
        if self.is_fired() {
            timer.abort();
        }
    }

    /// Complete with what the transport reported.
    pub(crate) fn complete(&self, outcome: Result<ResponseMessage, TransportError>) {
        self.fire(map_outcome(outcome));
    }

    /// Complete with a local failure.
    pub(crate) fn fail(&self, error: ClientError) {
        self.fire(Err(error));
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn fire(&self, result: Result<ResponseMessage, ClientError>) {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::trace!(ok = result.is_ok(), "late completion discarded");
            return;
        }

        let timer = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(timer) = timer {
            timer.abort();
        }

        let callback = self.callback.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(callback) = callback {
            callback(result);
        }
    }
}

/// A correlated request waiting to be dispatched.
pub(crate) struct OutboundRequest {
    pub(crate) message: RequestMessage,
    pub(crate) completion: Arc<Completion>,
}

impl OutboundRequest {
    pub(crate) fn new(message: RequestMessage, callback: CallCallback) -> Self {
        Self {
            message,
            completion: Completion::new(callback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microscopic_core::ErrorPayload;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Arc<AtomicUsize>, Arc<Mutex<Vec<Result<ResponseMessage, ClientError>>>>, CallCallback) {
        let calls = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(Mutex::new(Vec::new()));
        let (counter, sink) = (calls.clone(), results.clone());
        let callback: CallCallback = Box::new(move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            sink.lock().unwrap().push(result);
        });
        (calls, results, callback)
    }

    #[test]
    fn test_outcome_mapping() {
        let ok = map_outcome(Ok(ResponseMessage::success("1", json!(3)))).unwrap();
        assert_eq!(ok.result, Some(json!(3)));

        match map_outcome(Ok(ResponseMessage::timeout("1"))) {
            Err(ClientError::Timeout { response: Some(response) }) => {
                assert_eq!(response.status, Status::Timeout)
            }
            other => panic!("unexpected {other:?}"),
        }

        match map_outcome(Ok(ResponseMessage::fail("1", ErrorPayload::new("bad input")))) {
            Err(ClientError::Remote(error)) => assert_eq!(error.message, "bad input"),
            other => panic!("unexpected {other:?}"),
        }

        let mut unknown = ResponseMessage::success("1", json!(null));
        unknown.status = Status::Pending;
        unknown.result = None;
        assert!(matches!(map_outcome(Ok(unknown)), Err(ClientError::Unknown)));

        assert!(matches!(
            map_outcome(Err(TransportError::Closed)),
            Err(ClientError::Transport(TransportError::Closed))
        ));
    }

    #[test]
    fn test_first_trigger_wins() {
        let (calls, results, callback) = counting();
        let completion = Completion::new(callback);

        completion.complete(Ok(ResponseMessage::success("1", json!(1))));
        completion.complete(Ok(ResponseMessage::success("1", json!(2))));
        completion.fail(ClientError::Unknown);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let results = results.lock().unwrap();
        assert_eq!(results[0].as_ref().unwrap().result, Some(json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let (calls, results, callback) = counting();
        let completion = Completion::new(callback);
        completion.arm(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.lock().unwrap()[0].as_ref().unwrap_err().is_timeout());

        completion.complete(Ok(ResponseMessage::success("1", json!(1))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_clears_timer() {
        let (calls, results, callback) = counting();
        let completion = Completion::new(callback);
        completion.arm(Duration::from_millis(10));

        completion.complete(Ok(ResponseMessage::success("1", json!("done"))));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.lock().unwrap()[0].is_ok());
    }
}
