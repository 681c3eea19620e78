//! Bulk download engine for archive mirrors
//!
//! Transfers a large, known set of remote files to local disk with:
//! - A persistent work queue with exclusive claims (plugged in through [`WorkQueue`])
//! - A fixed pool of streaming workers that verify size and digest while writing
//! - One supervisor per transfer producing progress ticks and a single terminal classification
//! - A single-owner aggregator for counters, active slots, retries and completion
//! - Optional per-worker bandwidth pacing
//! - Ordered shutdown across all task groups

mod aggregator;
mod collector;
pub mod config;
mod dirs;
mod engine;
pub mod error;
pub mod queue;
pub mod rate;
pub mod request;
pub mod slots;
pub mod speed;
pub mod types;
pub mod verify;
mod worker;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, RequestError, StorageError, TransferError};
pub use queue::WorkQueue;
pub use types::{
    EmptyDir, EngineEvent, EventSink, ExpectedDigest, Overview, RunProgress, WorkItem,
};
pub use verify::{ContentHasher, DigestAlgorithm};
