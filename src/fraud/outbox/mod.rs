//! C8–C11 — Async Durability Pipeline: queue -> writer -> publisher -> reclaimer.

pub mod publisher;
pub mod queue;
pub mod reclaim;
pub mod writer;

pub use queue::{OutboxQueue, QueueStats, DEFAULT_CAPACITY};
