//! Pending request table.
//!
//! Before a frame is written to the worker, its correlation id is
//! registered here together with the kind (for timeout errors) and an
//! expiry timer. The reader task calls `route()` for every correlated
//! frame; the requester awaits its oneshot receiver without holding any
//! lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::protocol::{CorrelationId, Frame, MessageKind, Payload};

pub(crate) type ResponseReceiver = oneshot::Receiver<BridgeResult<Frame>>;

struct PendingRequest {
    kind: MessageKind,
    sender: oneshot::Sender<BridgeResult<Frame>>,
    timer: Option<JoinHandle<()>>,
}

impl PendingRequest {
    fn settle(mut self, result: BridgeResult<Frame>) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.sender.send(result).is_ok()
    }
}

/// Correlation-id keyed table of in-flight requests.
pub(crate) struct PendingRequests {
    pending: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CorrelationId, PendingRequest>> {
        self.pending.lock().recover_poison("pending requests")
    }

    /// Register a request and return the receiver for its response.
    ///
    /// Returns `None` if the id is already pending.
    pub(crate) fn register(&self, id: CorrelationId, kind: MessageKind) -> Option<ResponseReceiver> {
        let mut pending = self.lock();
        if pending.contains_key(&id) {
            return None;
        }
        let (sender, receiver) = oneshot::channel();
        pending.insert(
            id,
            PendingRequest {
                kind,
                sender,
                timer: None,
            },
        );
        Some(receiver)
    }

    /// Attach the expiry timer of a registered request.
    ///
    /// If the request already settled the timer is aborted right away.
    pub(crate) fn attach_timer(&self, id: &CorrelationId, timer: JoinHandle<()>) {
        let mut pending = self.lock();
        match pending.get_mut(id) {
            Some(request) => request.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Deliver a correlated frame to its waiter.
    ///
    /// An `error` frame rejects the request with the worker's message.
    /// Returns the frame back when no request matches.
    pub(crate) fn route(&self, frame: Frame) -> Option<Frame> {
        let Some(id) = frame.correlation_id.as_ref() else {
            return Some(frame);
        };
        let Some(request) = self.lock().remove(id) else {
            return Some(frame);
        };
        let worker_error = match &frame.body {
            Payload::Error(error) => Some(error.message.clone()),
            _ => None,
        };
        let result = match worker_error {
            Some(message) => Err(BridgeError::worker(message)),
            None => Ok(frame),
        };
        request.settle(result);
        None
    }

    /// Reject a request whose timer fired.
    pub(crate) fn expire(&self, id: &CorrelationId, timeout: Duration) -> bool {
        let Some(mut request) = self.lock().remove(id) else {
            return false;
        };
        // The timer is the caller; do not abort it.
        request.timer = None;
        let kind = request.kind;
        request.settle(Err(BridgeError::Timeout {
            kind,
            timeout_ms: timeout.as_millis() as u64,
        }))
    }

    /// Drop a request without answering it.
    pub(crate) fn remove(&self, id: &CorrelationId) -> bool {
        match self.lock().remove(id) {
            Some(mut request) => {
                if let Some(timer) = request.timer.take() {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Reject every pending request with `error` and cancel its timer.
    ///
    /// Returns the number of requests rejected.
    pub(crate) fn fail_all(&self, error: BridgeError) -> usize {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for request in drained {
            request.settle(Err(error.clone()));
        }
        count
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorPayload, HealthPayload};

    fn response(id: &str, body: Payload) -> Frame {
        Frame::new(Some(CorrelationId::from(id)), None, body)
    }

    #[tokio::test]
    async fn routes_response_to_registered_waiter() {
        let router = PendingRequests::new();
        let rx = router
            .register(CorrelationId::from("a"), MessageKind::Health)
            .unwrap();

        let unmatched = router.route(response("a", Payload::Health(HealthPayload::default())));
        assert!(unmatched.is_none());
        let frame = rx.await.unwrap().expect("should resolve");
        assert_eq!(frame.kind(), MessageKind::Health);
        assert_eq!(router.pending_count(), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let router = PendingRequests::new();
        let id = CorrelationId::from("dup");
        assert!(router.register(id.clone(), MessageKind::Status).is_some());
        assert!(router.register(id, MessageKind::Status).is_none());
        assert_eq!(router.pending_count(), 1);
    }

    #[test]
    fn unknown_correlation_id_is_returned() {
        let router = PendingRequests::new();
        let frame = response("nobody", Payload::Health(HealthPayload::default()));
        assert_eq!(router.route(frame.clone()), Some(frame));
    }

    #[tokio::test]
    async fn error_frame_rejects_with_worker_message() {
        let router = PendingRequests::new();
        let rx = router
            .register(CorrelationId::from("e"), MessageKind::Clone)
            .unwrap();
        router.route(response(
            "e",
            Payload::Error(ErrorPayload {
                message: "repository not found".to_string(),
                code: None,
            }),
        ));
        assert_eq!(
            rx.await.unwrap(),
            Err(BridgeError::worker("repository not found"))
        );
    }

    #[tokio::test]
    async fn expire_reports_kind_and_timeout() {
        let router = PendingRequests::new();
        let id = CorrelationId::from("t");
        let rx = router.register(id.clone(), MessageKind::Status).unwrap();
        assert!(router.expire(&id, Duration::from_millis(250)));
        assert_eq!(
            rx.await.unwrap(),
            Err(BridgeError::Timeout {
                kind: MessageKind::Status,
                timeout_ms: 250
            })
        );
        assert!(!router.expire(&id, Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn fail_all_rejects_every_waiter() {
        let router = PendingRequests::new();
        let a = router
            .register(CorrelationId::from("a"), MessageKind::Start)
            .unwrap();
        let b = router
            .register(CorrelationId::from("b"), MessageKind::Stop)
            .unwrap();

        assert_eq!(router.fail_all(BridgeError::Restarting), 2);
        assert_eq!(a.await.unwrap(), Err(BridgeError::Restarting));
        assert_eq!(b.await.unwrap(), Err(BridgeError::Restarting));
        assert_eq!(router.pending_count(), 0);
    }
}
