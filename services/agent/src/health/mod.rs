//! Application health checking.
//!
//! After a successful install the control plane sends a `check` action. The
//! agent then runs the check script forever, forwarding each report it prints
//! to the control plane:
//!
//! - a failing script doubles the execution period (5s up to 1h)
//! - output without a valid `{code, msg}` report keeps the current period
//! - a rejected or undeliverable report grows the report period by 5s (up to
//!   60s); an accepted one resets it
//!
//! The loop's parameters are saved to `checkInfo.json` so a restarted agent
//! picks the loop back up on its own.

pub(crate) mod checker;
pub mod params;
pub mod payload;

pub use checker::{
    CheckRunner, HealthChecker, HealthReporter, HttpHealthReporter, ReportError,
    ScriptCheckRunner,
};
pub use params::{CheckParamsError, CHECK_INFO_FILE};
pub use payload::extract_report;
