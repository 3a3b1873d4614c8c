//! Duplex link to the worker process.
//!
//! The bridge only sees a `WorkerLink`: a channel of outbound raw frames,
//! a channel of inbound raw frames, and optionally the process behind
//! them. End of the inbound channel means the worker is gone.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::WorkerSettings;
use crate::error::{BridgeError, BridgeResult};

/// Capacity of the outbound and inbound frame channels.
const LINK_CHANNEL_CAPACITY: usize = 256;

/// Grace period between SIGTERM and SIGKILL.
#[cfg(unix)]
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Channels connected to a running worker.
pub struct WorkerLink {
    /// Raw frames (one JSON object each, without trailing newline)
    pub outbound: mpsc::Sender<String>,
    /// Raw frames received from the worker; closes when the worker exits
    pub inbound: mpsc::Receiver<String>,
    pub process: Option<WorkerProcess>,
}

impl WorkerLink {
    /// Link with no process behind it, e.g. an in-process worker.
    pub fn detached(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self {
            outbound,
            inbound,
            process: None,
        }
    }
}

pub type LaunchFuture<'a> = Pin<Box<dyn Future<Output = BridgeResult<WorkerLink>> + Send + 'a>>;

/// Starts a worker and returns the link to it.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self) -> LaunchFuture<'_>;
}

/// Launches the worker as a child process speaking newline-delimited
/// JSON over stdin/stdout.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    settings: WorkerSettings,
}

impl ProcessLauncher {
    pub fn new(settings: WorkerSettings) -> Self {
        Self { settings }
    }

    async fn spawn(&self) -> BridgeResult<WorkerLink> {
        let mut command = Command::new(&self.settings.command);
        command
            .args(&self.settings.args)
            .envs(&self.settings.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.settings.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            BridgeError::Initialization(format!(
                "failed to spawn worker {:?}: {}",
                self.settings.command, e
            ))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BridgeError::Initialization(
                "worker stdio was not captured".to_string(),
            ));
        };
        let stderr = child.stderr.take();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(LINK_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(LINK_CHANNEL_CAPACITY);

        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(mut line) = outbound_rx.recv().await {
                line.push('\n');
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    warn!(target: "workbridge::bridge::transport", "Worker stdin write failed: {}", e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    warn!(target: "workbridge::bridge::transport", "Worker stdin flush failed: {}", e);
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        if inbound_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(target: "workbridge::bridge::transport", "Worker stdout closed");
                        break;
                    }
                    Err(e) => {
                        warn!(target: "workbridge::bridge::transport", "Worker stdout read failed: {}", e);
                        break;
                    }
                }
            }
        });

        let mut tasks = vec![writer, reader];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "workbridge::bridge::worker", "{}", line);
                }
            }));
        }

        debug!(
            target: "workbridge::bridge::transport",
            "Spawned worker {:?} (pid {:?})",
            self.settings.command,
            child.id()
        );

        Ok(WorkerLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            process: Some(WorkerProcess { child, tasks }),
        })
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self) -> LaunchFuture<'_> {
        Box::pin(self.spawn())
    }
}

/// Handle to the worker's OS process and its pipe tasks.
pub struct WorkerProcess {
    child: Child,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Terminate the process with platform-appropriate escalation.
    ///
    /// **Unix**: SIGTERM, wait up to 2 seconds, then SIGKILL.
    /// **Other platforms**: kill immediately.
    pub async fn terminate(mut self) {
        for task in &self.tasks {
            task.abort();
        }

        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(TERMINATE_GRACE, self.child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
            debug!(
                target: "workbridge::bridge::transport",
                "Worker pid {} ignored SIGTERM, sending SIGKILL",
                pid
            );
        }

        if let Err(e) = self.child.kill().await {
            warn!(target: "workbridge::bridge::transport", "Failed to kill worker: {}", e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessLauncher {
        ProcessLauncher::new(WorkerSettings {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..WorkerSettings::default()
        })
    }

    #[tokio::test]
    async fn process_launcher_relays_lines_both_ways() {
        let mut link = sh("read line; echo \"$line\"").launch().await.expect("sh should spawn");

        link.outbound
            .send(r#"{"kind":"health","timestamp":1}"#.to_string())
            .await
            .unwrap();
        let echoed = link.inbound.recv().await.expect("line should be echoed");
        assert_eq!(echoed, r#"{"kind":"health","timestamp":1}"#);

        // Process exits after one line: the inbound channel closes.
        assert!(link.inbound.recv().await.is_none());
        if let Some(process) = link.process {
            process.terminate().await;
        }
    }

    #[tokio::test]
    async fn missing_binary_is_an_initialization_error() {
        let launcher = ProcessLauncher::new(WorkerSettings {
            command: "/nonexistent/workbridge-worker".to_string(),
            ..WorkerSettings::default()
        });
        let result = launcher.launch().await;
        assert!(matches!(result, Err(BridgeError::Initialization(_))));
    }

    #[tokio::test]
    async fn terminate_stops_long_running_worker() {
        let mut link = sh("sleep 30").launch().await.expect("sh should spawn");
        let process = link.process.take().expect("process handle");
        assert!(process.id().is_some());

        tokio::time::timeout(Duration::from_secs(5), process.terminate())
            .await
            .expect("terminate should finish within the grace period");
    }
}
