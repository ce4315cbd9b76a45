//! hostpilot agent library.
//!
//! The agent runs on every managed host. The control plane drives it over
//! HTTP: each lifecycle action names a shell script, which the agent fetches
//! from the application's script repository on first use and runs locally.
//!
//! ## Modules
//!
//! - `api`: HTTP surface (`/ping`, `/{action}`)
//! - `actions`: maps an action to its script and runs it
//! - `scripts`: fetches and caches scripts in the work directory
//! - `exec`: runs scripts and streams their output into the logs
//! - `health`: the background health check loop

pub mod actions;
pub mod api;
pub mod config;
pub mod exec;
pub mod health;
pub mod scripts;

pub use actions::{ActionError, ActionHandler};
pub use health::HealthChecker;
pub use scripts::ScriptResolver;
