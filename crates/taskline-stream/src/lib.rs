//! Stream Consumer: keeps exactly one push connection open per tracked task
//! id and folds its events into a [`TaskStreamBuffer`](taskline_core::TaskStreamBuffer).
//!
//! Connections are never reopened automatically. A dropped connection leaves
//! its buffer in place, marked disconnected, until the caller asks for
//! [`StreamConsumer::reopen`].

pub mod consumer;
pub mod sse;
pub mod transport;

pub use consumer::StreamConsumer;
pub use sse::SseTransport;
pub use transport::{FrameStream, PushTransport, RawFrame};
