//! hostpilot control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod bootstrap;
pub mod cleanup;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod state;
pub mod store;
