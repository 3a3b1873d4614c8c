//! In-process fake worker.
//!
//! `FakeWorker` implements `WorkerLauncher`. Each launch spawns a task
//! that sends `ready`, then answers requests through a scripted
//! responder. Tests can crash the current generation, inject broadcast
//! frames, and count launches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use workbridge::bridge::{LaunchFuture, WorkerLauncher, WorkerLink};
use workbridge::protocol::{ErrorPayload, Frame, Payload, ReadyPayload};

/// How the fake worker answers one request.
pub enum Reply {
    /// Echo the request payload back
    Echo,
    Respond(Payload),
    /// Answer with an `error` frame
    Fail(String),
    /// Never answer
    Silent,
}

type Responder = Arc<dyn Fn(&Frame) -> Reply + Send + Sync>;

enum Control {
    Crash,
    Emit(Frame),
}

struct Shared {
    responder: Mutex<Responder>,
    launches: AtomicUsize,
    requests: Mutex<Vec<Frame>>,
    control: Mutex<Option<mpsc::Sender<Control>>>,
}

#[derive(Clone)]
pub struct FakeWorker {
    shared: Arc<Shared>,
}

impl FakeWorker {
    /// Worker that echoes every request.
    pub fn echo() -> Self {
        Self::with_responder(|_| Reply::Echo)
    }

    pub fn with_responder(responder: impl Fn(&Frame) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                responder: Mutex::new(Arc::new(responder)),
                launches: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                control: Mutex::new(None),
            }),
        }
    }

    /// Replace the responder for later requests.
    pub fn set_responder(&self, responder: impl Fn(&Frame) -> Reply + Send + Sync + 'static) {
        *self.shared.responder.lock().unwrap() = Arc::new(responder);
    }

    pub fn launcher(&self) -> Arc<dyn WorkerLauncher> {
        Arc::new(self.clone())
    }

    pub fn launches(&self) -> usize {
        self.shared.launches.load(Ordering::SeqCst)
    }

    /// Every request received so far, across generations.
    pub fn requests(&self) -> Vec<Frame> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// Kill the current generation: its output stream closes.
    pub async fn crash(&self) {
        let control = self.shared.control.lock().unwrap().take();
        if let Some(control) = control {
            let _ = control.send(Control::Crash).await;
        }
    }

    /// Send an unsolicited frame from the current generation.
    pub async fn emit(&self, frame: Frame) {
        let control = self.shared.control.lock().unwrap().clone();
        if let Some(control) = control {
            let _ = control.send(Control::Emit(frame)).await;
        }
    }

    async fn run(
        shared: Arc<Shared>,
        mut outbound: mpsc::Receiver<String>,
        inbound: mpsc::Sender<String>,
        mut control: mpsc::Receiver<Control>,
    ) {
        let ready = Frame::broadcast(None, Payload::Ready(ReadyPayload::default()));
        if inbound.send(ready.encode().unwrap()).await.is_err() {
            return;
        }
        loop {
            tokio::select! {
                command = control.recv() => match command {
                    Some(Control::Emit(frame)) => {
                        if inbound.send(frame.encode().unwrap()).await.is_err() {
                            return;
                        }
                    }
                    Some(Control::Crash) | None => return,
                },
                raw = outbound.recv() => {
                    let Some(raw) = raw else { return };
                    let request = Frame::parse(&raw).expect("bridge sends valid frames");
                    shared.requests.lock().unwrap().push(request.clone());
                    let responder = shared.responder.lock().unwrap().clone();
                    let body = match responder(&request) {
                        Reply::Echo => request.body.clone(),
                        Reply::Respond(body) => body,
                        Reply::Fail(message) => Payload::Error(ErrorPayload { message, code: None }),
                        Reply::Silent => continue,
                    };
                    if inbound.send(request.reply(body).encode().unwrap()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

impl WorkerLauncher for FakeWorker {
    fn launch(&self) -> LaunchFuture<'_> {
        Box::pin(async move {
            self.shared.launches.fetch_add(1, Ordering::SeqCst);
            let (outbound_tx, outbound_rx) = mpsc::channel(64);
            let (inbound_tx, inbound_rx) = mpsc::channel(64);
            let (control_tx, control_rx) = mpsc::channel(8);
            *self.shared.control.lock().unwrap() = Some(control_tx);
            tokio::spawn(Self::run(
                Arc::clone(&self.shared),
                outbound_rx,
                inbound_tx,
                control_rx,
            ));
            Ok(WorkerLink::detached(outbound_tx, inbound_rx))
        })
    }
}
