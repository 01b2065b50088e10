//! Durable sink for analyzed events.
//!
//! The running computation only sees the [`EventSink`] trait. The production
//! implementation is a Postgres table written one batch per transaction.

pub mod pool;
pub mod sink;
pub mod store;

#[cfg(feature = "test-utils")]
pub mod memory;

pub use pool::connect_storage;
pub use sink::EventSink;
pub use store::EventStore;

#[cfg(feature = "test-utils")]
pub use memory::MemorySink;
