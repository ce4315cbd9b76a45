//! Lifecycle reconciliation primitives.
//!
//! This library holds the pure parts of reconciliation, shared by the control
//! plane and the agent:
//!
//! - **Transition planning**: given a requested expect value and the current
//!   status, which action to dispatch and which statuses to record.
//! - **Retry schedules**: bounded attempt budgets with fixed or doubling
//!   delays, used for agent dispatch and SSH reachability probes.
//! - **Backoff policies**: unbounded period adjustments used by the agent's
//!   health loop.
//!
//! # Invariants
//!
//! - Planning is deterministic given the same inputs
//! - A failed transition always lands in `Status::Failed`
//! - Backoff periods never exceed their cap and never drop below their initial value

use std::time::Duration;

use hostpilot_model::{Action, ExpectRequest, ResourceStatus, Status};

// =============================================================================
// Transition planning
// =============================================================================

/// A planned lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Action dispatched to the agent.
    pub action: Action,

    /// Expect status persisted when the transition is accepted.
    pub expect: Status,

    /// Realtime status persisted while the action is in flight.
    pub interim: Status,

    /// Realtime status persisted when the action succeeds.
    pub on_success: Status,
}

impl Transition {
    /// Realtime status persisted when the action fails.
    pub const ON_FAILURE: Status = Status::Failed;

    fn new(action: Action, expect: Status, interim: Status, on_success: Status) -> Self {
        Self {
            action,
            expect,
            interim,
            on_success,
        }
    }
}

/// Decide which transition, if any, a request triggers.
///
/// Returns `None` when the request needs no action from the current state,
/// including while another transition is in flight.
pub fn plan_transition(request: ExpectRequest, current: &ResourceStatus) -> Option<Transition> {
    use Status::*;

    let expect = request.stored_expect();
    match (request, current.realtime) {
        (ExpectRequest::Running, NotInstalled) => {
            Some(Transition::new(Action::Install, expect, Installing, Running))
        }
        (ExpectRequest::Running, Stopped) => {
            Some(Transition::new(Action::Start, expect, Starting, Running))
        }
        (ExpectRequest::Running, Failed) => {
            // A failed install is retried as an install; anything else means
            // the software is on the host and only needs starting.
            let action = match current.last_action {
                None | Some(Action::Install) => Action::Install,
                Some(_) => Action::Start,
            };
            let interim = if action == Action::Install {
                Installing
            } else {
                Starting
            };
            Some(Transition::new(action, expect, interim, Running))
        }
        (ExpectRequest::Stopped, Running | Failed) => {
            Some(Transition::new(Action::Stop, expect, Stopping, Stopped))
        }
        (ExpectRequest::Restart, Running | Failed) => {
            Some(Transition::new(Action::Restart, expect, Restarting, Running))
        }
        (ExpectRequest::NotInstalled, Running | Stopped | Failed) => Some(Transition::new(
            Action::Uninstall,
            expect,
            Stopping,
            NotInstalled,
        )),
        _ => None,
    }
}

// =============================================================================
// Retry schedules
// =============================================================================

/// A bounded retry budget.
///
/// `max_attempts` counts every attempt including the first; the schedule
/// yields the sleep before each retry, so it has `max_attempts - 1` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_attempts: u32,
}

impl RetrySchedule {
    /// Delays that double after every retry.
    pub fn exponential(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            multiplier: 2,
            max_attempts,
        }
    }

    /// The same delay before every retry.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1,
            max_attempts,
        }
    }

    /// Delay before retry number `retry` (0-based), or `None` once the budget
    /// is spent.
    pub fn delay_before_retry(&self, retry: u32) -> Option<Duration> {
        if retry + 1 >= self.max_attempts {
            return None;
        }
        let factor = self.multiplier.saturating_pow(retry);
        Some(self.initial_delay.saturating_mul(factor))
    }

    /// All delays of the schedule, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..).map_while(|retry| self.delay_before_retry(retry))
    }
}

/// Agent dispatch: 5 attempts, sleeping 5s, 10s, 20s, 40s in between.
pub const DISPATCH_RETRY: RetrySchedule = RetrySchedule {
    initial_delay: Duration::from_secs(5),
    multiplier: 2,
    max_attempts: 5,
};

/// SSH reachability: 30 probes at a fixed 20s interval (about 10 minutes).
pub const SSH_PROBE_RETRY: RetrySchedule = RetrySchedule {
    initial_delay: Duration::from_secs(20),
    multiplier: 1,
    max_attempts: 30,
};

// =============================================================================
// Backoff policies
// =============================================================================

/// A period that doubles on failure up to a cap and resets on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            current: initial,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the period (capped) and return it.
    pub fn on_failure(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.cap);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// A period that grows by a fixed step on failure up to a cap and resets on
/// success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearBackoff {
    initial: Duration,
    step: Duration,
    cap: Duration,
    current: Duration,
}

impl LinearBackoff {
    pub fn new(initial: Duration, step: Duration, cap: Duration) -> Self {
        Self {
            initial,
            step,
            cap,
            current: initial,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Grow the period by one step (capped) and return it.
    pub fn on_failure(&mut self) -> Duration {
        self.current = self.current.saturating_add(self.step).min(self.cap);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Initial period of both health loop policies.
pub const HEALTH_INITIAL_PERIOD: Duration = Duration::from_secs(5);

/// Cap of the health loop's execution backoff.
pub const HEALTH_EXEC_CAP: Duration = Duration::from_secs(3600);

/// Step and cap of the health loop's report backoff.
pub const HEALTH_REPORT_STEP: Duration = Duration::from_secs(5);
pub const HEALTH_REPORT_CAP: Duration = Duration::from_secs(60);
