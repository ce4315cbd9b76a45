//! Application lifecycle management.
//!
//! The `Lifecycle` service owns the expect/realtime state machine. Requests
//! persist an interim status synchronously and hand the long-running work
//! (SSH bootstrap, agent dispatch) to a spawned flow, which records the
//! outcome when it finishes.

mod locks;
mod reconciler;

pub use locks::KeyedLocks;
pub use reconciler::{Lifecycle, LifecycleConfig};
