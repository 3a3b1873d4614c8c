pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod reconcile;
pub mod store;

pub use bridge::{Bridge, BridgeHealthStatus, BridgePhase, WorkerLauncher, WorkerLink};
pub use config::{SettingsLoadOutcome, WorkbridgeSettings, load_settings};
pub use context::AppContext;
pub use error::{BridgeError, BridgeResult};
pub use jobs::JobClient;
pub use protocol::{EntityStatus, Frame, Message, MessageKind, Payload};
pub use queue::{MessageQueue, Priority};
pub use reconcile::{ReconciliationLoop, TrackedEntity};
pub use store::MemoryStore;
