//! # Convergence Status
//!
//! Condition and status shapes embedded in the status of every resource kind.
//!
//! These types carry no behaviour beyond simple queries. Mutation goes through
//! [`ConditionManager`](crate::controller::conditions::ConditionManager) so that
//! `lastTransitionTime` is only stamped when a condition actually changes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a condition (True, False, Unknown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Default)]
pub enum ConditionStatus {
    True,
    #[default]
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Closed set of reasons a condition may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Default)]
pub enum ConditionReason {
    #[default]
    NotDetermined,
    Warning,
    Error,
    InProgress,
    Ready,
    Disabled,
    Complete,
    ActionRequired,
    Deleting,
    ErrorDeleting,
    Deleted,
}

impl ConditionReason {
    /// Reasons that mark a negative-polarity deletion condition
    pub fn is_deletion(self) -> bool {
        matches!(
            self,
            ConditionReason::Deleting | ConditionReason::Deleted | ConditionReason::ErrorDeleting
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionReason::NotDetermined => "NotDetermined",
            ConditionReason::Warning => "Warning",
            ConditionReason::Error => "Error",
            ConditionReason::InProgress => "InProgress",
            ConditionReason::Ready => "Ready",
            ConditionReason::Disabled => "Disabled",
            ConditionReason::Complete => "Complete",
            ConditionReason::ActionRequired => "ActionRequired",
            ConditionReason::Deleting => "Deleting",
            ConditionReason::ErrorDeleting => "ErrorDeleting",
            ConditionReason::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition represents one typed observation of a resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, unique within a status
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Generation of the resource when this condition was last computed
    #[serde(default)]
    pub observed_generation: i64,
    /// Last time any field of this condition changed
    pub last_transition_time: DateTime<Utc>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: ConditionReason,
    /// Message describing the condition
    #[serde(default)]
    pub message: String,
    /// Display label, defaults to the type
    #[serde(default)]
    pub name: String,
    /// Underlying error text, only set while the condition is in error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Condition {
    /// True when the condition succeeded for the given generation
    pub fn is_complete(&self, generation: i64) -> bool {
        self.status == ConditionStatus::True && self.observed_generation == generation
    }

    /// True when the condition failed while computing the given generation
    pub fn is_failed_for(&self, generation: i64) -> bool {
        self.status == ConditionStatus::False
            && self.reason == ConditionReason::Error
            && self.observed_generation == generation
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == ConditionStatus::False && self.reason == ConditionReason::InProgress
    }

    pub fn is_action_required(&self) -> bool {
        self.status == ConditionStatus::False && self.reason == ConditionReason::ActionRequired
    }

    /// Deletion is a negative-polarity condition
    pub fn is_deleting(&self) -> bool {
        self.status == ConditionStatus::False && self.reason.is_deletion()
    }
}

/// Default shape of a condition registered on first reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionDefinition {
    pub r#type: &'static str,
    pub name: &'static str,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
}

impl ConditionDefinition {
    /// False/NotDetermined condition labelled with its type
    pub const fn new(r#type: &'static str) -> Self {
        Self {
            r#type,
            name: r#type,
            status: ConditionStatus::False,
            reason: ConditionReason::NotDetermined,
        }
    }

    #[must_use]
    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    #[must_use]
    pub const fn with_status(mut self, status: ConditionStatus) -> Self {
        self.status = status;
        self
    }
}

/// Generation and time of a reconciliation milestone
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStamp {
    pub generation: i64,
    pub timestamp: DateTime<Utc>,
}

impl ReconcileStamp {
    pub fn new(generation: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            generation,
            timestamp,
        }
    }
}

/// Status fields shared by every converged resource kind
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceStatus {
    /// Conditions represent the latest available observations, unique by type
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Stamped at the start of every convergence run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile: Option<ReconcileStamp>,
    /// Stamped when every step of a run completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<ReconcileStamp>,
}

impl ConvergenceStatus {
    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    pub fn condition_mut(&mut self, r#type: &str) -> Option<&mut Condition> {
        self.conditions.iter_mut().find(|c| c.r#type == r#type)
    }

    pub fn is_complete(&self, r#type: &str, generation: i64) -> bool {
        self.condition(r#type)
            .is_some_and(|c| c.is_complete(generation))
    }

    pub fn is_failed_for(&self, r#type: &str, generation: i64) -> bool {
        self.condition(r#type)
            .is_some_and(|c| c.is_failed_for(generation))
    }

    pub fn is_in_progress(&self, r#type: &str) -> bool {
        self.condition(r#type).is_some_and(Condition::is_in_progress)
    }

    pub fn is_deleting(&self, r#type: &str) -> bool {
        self.condition(r#type).is_some_and(Condition::is_deleting)
    }
}
