//! Wire protocol between the supervisor and the worker process.
//!
//! Frames are newline-delimited JSON objects of the shape
//! `{ kind, correlationId?, entityId?, payload?, timestamp }`.
//!
//! ## Module Structure
//!
//! - `kind` - `MessageKind` enumeration and per-kind properties
//! - `payload` - strongly-typed payload per kind (`Payload` sum type)
//! - `frame` - `Frame`/`Message` types, parsing, and validation
//! - `correlation_id` - `CorrelationId` type for request/response matching

mod correlation_id;
mod frame;
mod kind;
mod payload;

pub use correlation_id::CorrelationId;
pub use frame::{Frame, Message, now_timestamp_ms};
pub(crate) use frame::is_valid_entity_id;
pub use kind::MessageKind;
pub use payload::{
    ClonePayload, ConfigPayload, DeletePayload, EntityStatus, ErrorPayload, HealthPayload,
    LogsPayload, Payload, ReadyPayload, RestartPayload, StartPayload, StatusPayload, StopPayload,
};
