//! Cycle state machine and per-tenant runtime bookkeeping
//!
//! Each tenant owns one finite-state cycle at a time. The transition table
//! is enforced here; an illegal transition is a data-integrity failure that
//! kills the single cycle and nothing else.

use crate::error::{AutopilotError, AutopilotResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use shared::{Channel, CycleId, ReinvestmentDirective, Tenant};
use std::time::Duration;
use tokio::sync::watch;

/// Phases of one orchestration cycle
///
/// `Failed` and `Cancelled` are absorbing for the cycle that entered them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    Idle,
    Analyzing,
    Creating,
    Deploying,
    Marketing,
    Monitoring,
    Optimizing,
    Reinvesting,
    Failed,
    Cancelled,
}

impl CyclePhase {
    /// The phase that normally follows this one
    pub fn next(self) -> Option<CyclePhase> {
        match self {
            CyclePhase::Idle => Some(CyclePhase::Analyzing),
            CyclePhase::Analyzing => Some(CyclePhase::Creating),
            CyclePhase::Creating => Some(CyclePhase::Deploying),
            CyclePhase::Deploying => Some(CyclePhase::Marketing),
            CyclePhase::Marketing => Some(CyclePhase::Monitoring),
            CyclePhase::Monitoring => Some(CyclePhase::Optimizing),
            CyclePhase::Optimizing => Some(CyclePhase::Reinvesting),
            CyclePhase::Reinvesting => Some(CyclePhase::Idle),
            CyclePhase::Failed | CyclePhase::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CyclePhase::Idle | CyclePhase::Failed | CyclePhase::Cancelled
        )
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_advance_to(self, to: CyclePhase) -> bool {
        if self.is_terminal() && self != CyclePhase::Idle {
            return false;
        }
        // Any live phase may abort into Failed or Cancelled
        if matches!(to, CyclePhase::Failed | CyclePhase::Cancelled) {
            return !self.is_terminal() || self == CyclePhase::Idle;
        }
        self.next() == Some(to)
    }
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Analyzing => "analyzing",
            CyclePhase::Creating => "creating",
            CyclePhase::Deploying => "deploying",
            CyclePhase::Marketing => "marketing",
            CyclePhase::Monitoring => "monitoring",
            CyclePhase::Optimizing => "optimizing",
            CyclePhase::Reinvesting => "reinvesting",
            CyclePhase::Failed => "failed",
            CyclePhase::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// How a finished cycle ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleEnd {
    Completed,
    Degraded,
    Failed,
    Cancelled,
}

/// User-visible cycle status for the control surface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    Idle,
    Running,
    Degraded,
    Failed,
    Cancelled,
}

/// Per-channel result line of a finished cycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel: Channel,
    pub strategy: String,
    pub success: bool,
    pub detail: String,
}

/// Summary of the most recently finished cycle for one tenant
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub end: CycleEnd,
    pub channels: Vec<ChannelResult>,
    pub revenue: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Live state of a tenant's in-flight cycle
#[derive(Debug)]
pub struct ActiveCycle {
    pub cycle_id: CycleId,
    pub phase: CyclePhase,
    pub started_at: DateTime<Utc>,
    /// Cooperative cancellation signal observed by the dispatcher
    pub cancel_tx: watch::Sender<bool>,
}

/// Everything the orchestrator tracks per tenant
///
/// Holding `active` IS the cycle lease: a tick that finds it occupied skips
/// with an `OrchestrationConflict`, and nothing else may start a cycle.
#[derive(Debug)]
pub struct TenantRuntime {
    pub tenant: Tenant,
    pub active: Option<ActiveCycle>,
    pub consecutive_failures: u32,
    /// Earliest instant the next scheduled tick may start a cycle
    pub next_eligible_at: DateTime<Utc>,
    pub last_report: Option<CycleReport>,
    /// Directive from the last reinvestment evaluation, consumed by the
    /// next cycle as context
    pub pending_directive: Option<ReinvestmentDirective>,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
}

impl TenantRuntime {
    pub fn new(tenant: Tenant) -> Self {
        Self {
            tenant,
            active: None,
            consecutive_failures: 0,
            next_eligible_at: Utc::now(),
            last_report: None,
            pending_directive: None,
            last_cycle_started_at: None,
        }
    }

    /// Acquire the cycle lease, or report the conflict
    pub fn try_begin_cycle(&mut self, now: DateTime<Utc>) -> AutopilotResult<CycleHandle> {
        if self.active.is_some() {
            return Err(AutopilotError::OrchestrationConflict {
                tenant_id: self.tenant.id,
            });
        }

        let cycle_id = CycleId::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active = Some(ActiveCycle {
            cycle_id,
            phase: CyclePhase::Analyzing,
            started_at: now,
            cancel_tx,
        });
        self.last_cycle_started_at = Some(now);

        Ok(CycleHandle {
            cycle_id,
            cancel_rx,
            started_at: now,
        })
    }

    /// Advance the active cycle's phase, enforcing the transition table
    pub fn advance_phase(&mut self, to: CyclePhase) -> AutopilotResult<CyclePhase> {
        let active = self.active.as_mut().ok_or_else(|| {
            AutopilotError::integrity(format!(
                "phase advance to {to} with no active cycle for tenant {}",
                self.tenant.id
            ))
        })?;

        let from = active.phase;
        if !from.can_advance_to(to) {
            return Err(AutopilotError::IllegalTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        active.phase = to;
        Ok(from)
    }

    /// Whether the active cycle has been asked to cancel
    pub fn cancel_requested(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| *a.cancel_tx.borrow())
            .unwrap_or(false)
    }

    /// Signal cooperative cancellation to the active cycle, if any
    pub fn request_cancel(&mut self) -> bool {
        match &self.active {
            Some(active) => {
                let _ = active.cancel_tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Release the lease and record the cycle's report
    pub fn finish_cycle(
        &mut self,
        report: CycleReport,
        backoff: FailureBackoff,
        now: DateTime<Utc>,
    ) {
        match report.end {
            CycleEnd::Failed => {
                self.consecutive_failures += 1;
                let delay = backoff.delay_for(self.consecutive_failures);
                self.next_eligible_at =
                    now + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());
            }
            CycleEnd::Completed | CycleEnd::Degraded | CycleEnd::Cancelled => {
                self.consecutive_failures = 0;
                let interval = ChronoDuration::from_std(self.tenant.cycle_interval)
                    .unwrap_or(ChronoDuration::zero());
                self.next_eligible_at = now + interval;
            }
        }
        self.active = None;
        self.last_report = Some(report);
    }

    /// Whether a scheduled tick should start a cycle for this tenant
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.tenant.autopilot_enabled && self.active.is_none() && now >= self.next_eligible_at
    }

    /// User-visible status derived from the live state and the last report
    pub fn status(&self) -> CycleStatus {
        if self.active.is_some() {
            return CycleStatus::Running;
        }
        match self.last_report.as_ref().map(|r| r.end) {
            Some(CycleEnd::Degraded) => CycleStatus::Degraded,
            Some(CycleEnd::Failed) => CycleStatus::Failed,
            Some(CycleEnd::Cancelled) => CycleStatus::Cancelled,
            Some(CycleEnd::Completed) | None => CycleStatus::Idle,
        }
    }
}

/// Handed to the cycle task when the lease is acquired
#[derive(Debug, Clone)]
pub struct CycleHandle {
    pub cycle_id: CycleId,
    pub cancel_rx: watch::Receiver<bool>,
    pub started_at: DateTime<Utc>,
}

/// Exponential, capped backoff applied after failed cycles
#[derive(Debug, Clone, Copy)]
pub struct FailureBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl FailureBackoff {
    /// Delay before the next eligible tick after `failures` consecutive
    /// failed cycles
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = failures.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1u32 << exp);
        delay.min(self.max)
    }
}

/// Tally of a finished cycle's per-channel results
pub fn summarize_end(channels: &[ChannelResult], cancelled: bool) -> CycleEnd {
    if cancelled {
        return CycleEnd::Cancelled;
    }
    if channels.iter().all(|c| c.success) {
        CycleEnd::Completed
    } else {
        CycleEnd::Degraded
    }
}
