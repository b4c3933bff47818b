//! # Drift Admission
//!
//! Decides, per resource and per check interval, whether now is a safe time to
//! trigger a drift re-validation.
//!
//! The decision is an ordered list of gates evaluated first-match-wins. Any
//! matching gate skips the trigger and schedules a recheck after
//! `check_interval`. When no gate matches, the caller stamps the drift marker
//! and records an event; this function has no side effects.
//!
//! The fleet-wide fraction is computed from a fresh listing at decision time.
//! The limiter is best-effort: concurrent deciders may briefly overshoot it.

use crate::constants::{CONDITION_APPLY, CONDITION_PLAN};
use crate::crd::ConvergenceStatus;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::time::Duration;

/// Tunables for drift admission
#[derive(Debug, Clone, PartialEq)]
pub struct DriftPolicy {
    /// How long to wait before re-evaluating a skipped resource
    pub check_interval: Duration,
    /// Minimum quiet period since the last prerequisite transition
    pub drift_interval: Duration,
    /// Fleet fraction mid-drift-check at which new triggers are blocked (inclusive)
    pub threshold: f64,
    /// Condition types that must be settled before a drift check
    pub prerequisites: [&'static str; 2],
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5 * 60),
            drift_interval: Duration::from_secs(2 * 60 * 60),
            threshold: crate::constants::DEFAULT_DRIFT_THRESHOLD,
            prerequisites: [CONDITION_PLAN, CONDITION_APPLY],
        }
    }
}

/// Drift-relevant view of one resource
#[derive(Debug, Clone, Copy)]
pub struct DriftSubject<'a> {
    pub enabled: bool,
    pub deleting: bool,
    pub generation: i64,
    pub status: Option<&'a ConvergenceStatus>,
    /// When the drift marker was last stamped, if ever
    pub requested_at: Option<DateTime<Utc>>,
}

impl DriftSubject<'_> {
    /// A drift check was requested and has not finished yet: the marker is newer
    /// than the last plan transition, or a prerequisite is still running
    pub fn is_mid_drift_check(&self, policy: &DriftPolicy) -> bool {
        let Some(requested_at) = self.requested_at else {
            return false;
        };
        let Some(status) = self.status else {
            return true;
        };
        let [first, _] = policy.prerequisites;
        let newer_than_first = status
            .condition(first)
            .is_none_or(|c| c.last_transition_time < requested_at);
        newer_than_first
            || policy
                .prerequisites
                .iter()
                .any(|t| status.is_in_progress(t))
    }
}

/// Fleet-wide drift activity at decision time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FleetSnapshot {
    pub total: usize,
    pub in_drift_check: usize,
}

impl FleetSnapshot {
    pub fn from_subjects<'a>(
        subjects: impl IntoIterator<Item = DriftSubject<'a>>,
        policy: &DriftPolicy,
    ) -> Self {
        subjects
            .into_iter()
            .fold(FleetSnapshot::default(), |mut fleet, subject| {
                fleet.total += 1;
                if subject.is_mid_drift_check(policy) {
                    fleet.in_drift_check += 1;
                }
                fleet
            })
    }

    #[allow(
        clippy::cast_precision_loss,
        reason = "Fleet sizes are far below f64 precision limits"
    )]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.in_drift_check as f64 / self.total as f64
        }
    }
}

/// Reason a drift check was not triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftGate {
    Disabled,
    Deleting,
    NoConditions,
    MissingPrerequisites,
    PrerequisiteFailed,
    PrerequisiteInProgress,
    PrerequisiteIncomplete,
    RecentActivity,
    FleetSaturated,
}

impl DriftGate {
    pub fn as_str(self) -> &'static str {
        match self {
            DriftGate::Disabled => "disabled",
            DriftGate::Deleting => "deleting",
            DriftGate::NoConditions => "no_conditions",
            DriftGate::MissingPrerequisites => "missing_prerequisites",
            DriftGate::PrerequisiteFailed => "prerequisite_failed",
            DriftGate::PrerequisiteInProgress => "prerequisite_in_progress",
            DriftGate::PrerequisiteIncomplete => "prerequisite_incomplete",
            DriftGate::RecentActivity => "recent_activity",
            DriftGate::FleetSaturated => "fleet_saturated",
        }
    }
}

impl fmt::Display for DriftGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of drift admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftDecision {
    Skip {
        gate: DriftGate,
        recheck_after: Duration,
    },
    Trigger {
        recheck_after: Duration,
    },
}

impl DriftDecision {
    pub fn is_trigger(&self) -> bool {
        matches!(self, DriftDecision::Trigger { .. })
    }

    pub fn recheck_after(&self) -> Duration {
        match self {
            DriftDecision::Skip { recheck_after, .. }
            | DriftDecision::Trigger { recheck_after } => *recheck_after,
        }
    }
}

/// Inputs shared by every gate predicate
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub subject: &'a DriftSubject<'a>,
    pub fleet: &'a FleetSnapshot,
    pub policy: &'a DriftPolicy,
    pub now: DateTime<Utc>,
}

impl GateInput<'_> {
    fn any_prerequisite(&self, predicate: impl Fn(&ConvergenceStatus, &str) -> bool) -> bool {
        self.subject.status.is_some_and(|status| {
            self.policy
                .prerequisites
                .iter()
                .any(|t| predicate(status, t))
        })
    }
}

pub type GatePredicate = fn(&GateInput<'_>) -> bool;

/// Gates in evaluation order; the first match wins
pub const GATES: &[(DriftGate, GatePredicate)] = &[
    (DriftGate::Disabled, |i| !i.subject.enabled),
    (DriftGate::Deleting, |i| i.subject.deleting),
    (DriftGate::NoConditions, |i| {
        i.subject.status.is_none_or(|s| s.conditions.is_empty())
    }),
    (DriftGate::MissingPrerequisites, |i| {
        i.any_prerequisite(|s, t| s.condition(t).is_none())
    }),
    (DriftGate::PrerequisiteFailed, |i| {
        let generation = i.subject.generation;
        i.any_prerequisite(|s, t| s.is_failed_for(t, generation))
    }),
    (DriftGate::PrerequisiteInProgress, |i| {
        i.any_prerequisite(|s, t| s.is_in_progress(t))
    }),
    (DriftGate::PrerequisiteIncomplete, |i| {
        let generation = i.subject.generation;
        i.any_prerequisite(|s, t| !s.is_complete(t, generation))
    }),
    (DriftGate::RecentActivity, |i| {
        let quiet = TimeDelta::from_std(i.policy.drift_interval).unwrap_or(TimeDelta::MAX);
        let now = i.now;
        i.any_prerequisite(|s, t| {
            s.condition(t)
                .is_some_and(|c| now.signed_duration_since(c.last_transition_time) < quiet)
        })
    }),
    (DriftGate::FleetSaturated, |i| {
        i.fleet.total > 1 && i.fleet.fraction() >= i.policy.threshold
    }),
];

/// First matching gate, if any
pub fn first_gate(input: &GateInput<'_>) -> Option<DriftGate> {
    GATES
        .iter()
        .find(|(_, predicate)| predicate(input))
        .map(|(gate, _)| *gate)
}

/// Decide whether to trigger a drift check for `subject` now
pub fn evaluate(
    subject: &DriftSubject<'_>,
    fleet: &FleetSnapshot,
    policy: &DriftPolicy,
    now: DateTime<Utc>,
) -> DriftDecision {
    let input = GateInput {
        subject,
        fleet,
        policy,
        now,
    };
    match first_gate(&input) {
        Some(gate) => DriftDecision::Skip {
            gate,
            recheck_after: policy.check_interval,
        },
        None => DriftDecision::Trigger {
            recheck_after: policy.check_interval,
        },
    }
}
