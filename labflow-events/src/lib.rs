//! ABOUTME: Progress bus and SSE serialization for the document pipeline
//! ABOUTME: Single-instance pub/sub keyed by document id with drop-oldest queues

pub mod bus;
pub mod sse;

pub use bus::{BusStats, ProgressBus, Subscription, DEFAULT_QUEUE_CAPACITY};
pub use sse::{document_stream, frame_event, frame_stream, HEARTBEAT_FRAME, HEARTBEAT_INTERVAL};
