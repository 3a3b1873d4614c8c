//! Broadcast handler registry.
//!
//! Frames without a matching pending request are delivered to every
//! registered handler in registration order. The registry is bounded:
//! registering past capacity evicts the oldest handler.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use log::{error, warn};

use crate::error::LockResultExt;
use crate::protocol::Frame;

/// Callback invoked for every broadcast frame.
pub type FrameHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Identifier returned by `Bridge::add_handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

struct RegistryState {
    next_id: u64,
    handlers: VecDeque<(HandlerId, FrameHandler)>,
}

pub(crate) struct HandlerRegistry {
    capacity: usize,
    state: Mutex<RegistryState>,
}

impl HandlerRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(RegistryState {
                next_id: 1,
                handlers: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().recover_poison("handler registry")
    }

    pub(crate) fn add(&self, handler: FrameHandler) -> HandlerId {
        let mut state = self.lock();
        let id = HandlerId(state.next_id);
        state.next_id += 1;
        if state.handlers.len() >= self.capacity
            && let Some((evicted, _)) = state.handlers.pop_front()
        {
            warn!(
                target: "workbridge::bridge",
                "Handler registry full ({}), evicted {}",
                self.capacity, evicted
            );
        }
        state.handlers.push_back((id, handler));
        id
    }

    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut state = self.lock();
        let before = state.handlers.len();
        state.handlers.retain(|(existing, _)| *existing != id);
        state.handlers.len() != before
    }

    pub(crate) fn ids(&self) -> Vec<HandlerId> {
        self.lock().handlers.iter().map(|(id, _)| *id).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Deliver `frame` to every handler.
    ///
    /// Handlers run outside the registry lock; a panicking handler is
    /// logged and the remaining handlers still run. Returns how many
    /// handlers returned normally.
    pub(crate) fn broadcast(&self, frame: &Frame) -> usize {
        let handlers: Vec<(HandlerId, FrameHandler)> = self.lock().handlers.iter().cloned().collect();
        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(frame))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(
                    target: "workbridge::bridge",
                    "{} panicked while handling {} frame",
                    id,
                    frame.kind()
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LogsPayload, Payload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn log_frame() -> Frame {
        Frame::broadcast(
            Some("app".to_string()),
            Payload::Logs(LogsPayload {
                lines: None,
                entries: vec!["hello".to_string()],
            }),
        )
    }

    #[test]
    fn delivers_in_registration_order() {
        let registry = HandlerRegistry::new(10);
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = order.clone();
            registry.add(Arc::new(move |_frame: &Frame| order.lock().unwrap().push(name)));
        }
        assert_eq!(registry.broadcast(&log_frame()), 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let registry = HandlerRegistry::new(10);
        let hits = Arc::new(AtomicUsize::new(0));
        registry.add(Arc::new(|_frame: &Frame| panic!("faulty handler")));
        let counter = hits.clone();
        registry.add(Arc::new(move |_frame: &Frame| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(registry.broadcast(&log_frame()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let registry = HandlerRegistry::new(2);
        let first = registry.add(Arc::new(|_frame: &Frame| {}));
        let second = registry.add(Arc::new(|_frame: &Frame| {}));
        let third = registry.add(Arc::new(|_frame: &Frame| {}));
        assert_eq!(registry.ids(), vec![second, third]);
        assert!(!registry.remove(first));
        assert!(registry.remove(second));
        assert_eq!(registry.len(), 1);
    }
}
