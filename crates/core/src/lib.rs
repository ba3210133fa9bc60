//! Shared domain types for the framewatch job pipeline.
//!
//! Everything in this crate is used on both sides of the process
//! boundary: the service (supervisor, relays, lifecycle controller) and the
//! isolated worker processes. Nothing here touches HTTP.

pub mod backoff;
pub mod channel;
pub mod codec;
pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod job;
pub mod layout;
pub mod marker;
pub mod processor;
pub mod types;
pub mod worker_spec;
