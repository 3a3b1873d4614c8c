//! Reader task for the worker link.
//!
//! One reader task runs per worker generation. It hands every inbound
//! raw frame to the bridge and reports end-of-stream, which is how a
//! worker crash is detected. The task holds only a weak reference, so a
//! dropped bridge ends it.

use std::sync::Weak;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::BridgeInner;

/// Handle to a running reader task.
///
/// Dropping the handle cancels the task.
pub(super) struct ReaderTaskHandle {
    _join_handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl Drop for ReaderTaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

pub(super) fn spawn_reader_task(
    inbound: mpsc::Receiver<String>,
    bridge: Weak<BridgeInner>,
    generation: u64,
) -> ReaderTaskHandle {
    let cancel_token = CancellationToken::new();
    let join_handle = tokio::spawn(reader_loop(
        inbound,
        bridge,
        generation,
        cancel_token.clone(),
    ));
    ReaderTaskHandle {
        _join_handle: join_handle,
        cancel_token,
    }
}

async fn reader_loop(
    mut inbound: mpsc::Receiver<String>,
    bridge: Weak<BridgeInner>,
    generation: u64,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "workbridge::bridge::reader",
                    "Reader for worker generation {} cancelled",
                    generation
                );
                break;
            }

            line = inbound.recv() => {
                let Some(inner) = bridge.upgrade() else {
                    break;
                };
                match line {
                    Some(raw) => inner.handle_raw_frame(&raw),
                    None => {
                        debug!(
                            target: "workbridge::bridge::reader",
                            "Worker generation {} closed its output",
                            generation
                        );
                        inner.on_link_closed(generation);
                        break;
                    }
                }
            }
        }
    }
}
