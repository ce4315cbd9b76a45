//! # hostpilot-model
//!
//! Types shared by the hostpilot control plane and the per-host agent.
//!
//! ## Design Principles
//!
//! - String-valued concepts (kind, status, action) are closed enums,
//!   validated once at the HTTP boundary
//! - Wire payloads are plain serde structs; both roles compile against the
//!   same definitions
//! - Caller-supplied expect values have their own type (`ExpectRequest`)
//!   so realtime-only statuses cannot be requested
//!
//! ## Modules
//!
//! - `types`: `Kind`, `Status`, `ExpectRequest`, `Action`
//! - `resource`: the `ApplicationResource` document persisted per instance
//! - `wire`: agent action requests, health reports, persisted check params

mod error;
mod resource;
mod types;
mod wire;

pub use error::{LifecycleError, ParseError};
pub use resource::*;
pub use types::*;
pub use wire::*;
