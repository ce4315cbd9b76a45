//! Background cleanup of the changed index.

mod worker;

pub use worker::{CleanupWorker, CleanupWorkerConfig};
