//! # Condition Manager
//!
//! Mutates the conditions of a single resource's in-memory status.
//!
//! Every mutation snapshots the condition, applies the change and compares the
//! two structurally. `lastTransitionTime` is stamped only when something differs,
//! so repeating a transition with identical arguments is a no-op. Persistence
//! happens once per run in the [`Runner`](super::runner::Runner).

use crate::crd::{
    Condition, ConditionDefinition, ConditionReason, ConditionStatus, Converged,
    ConvergenceStatus,
};
use chrono::Utc;
use std::fmt::Display;
use tracing::debug;

/// Borrowed view over one resource's conditions at a given generation
#[derive(Debug)]
pub struct ConditionManager<'a> {
    status: &'a mut ConvergenceStatus,
    generation: i64,
}

impl<'a> ConditionManager<'a> {
    pub fn new(status: &'a mut ConvergenceStatus, generation: i64) -> Self {
        Self { status, generation }
    }

    pub fn for_resource<K: Converged>(resource: &'a mut K) -> Self {
        let generation = resource.generation_or_zero();
        Self::new(resource.convergence_mut(), generation)
    }

    pub fn get(&self, r#type: &str) -> Option<&Condition> {
        self.status.condition(r#type)
    }

    /// Add the conditions that are not present yet; existing ones are left untouched.
    /// Returns how many were added.
    pub fn register(&mut self, definitions: &[ConditionDefinition]) -> usize {
        let now = Utc::now();
        let mut added = 0;
        for definition in definitions {
            if self.status.condition(definition.r#type).is_some() {
                continue;
            }
            self.status.conditions.push(Condition {
                r#type: definition.r#type.to_string(),
                status: definition.status,
                observed_generation: self.generation,
                last_transition_time: now,
                reason: definition.reason,
                message: String::new(),
                name: definition.name.to_string(),
                detail: None,
            });
            added += 1;
        }
        added
    }

    /// Set every mutable field of a condition, creating it when absent.
    /// Returns whether the condition changed.
    pub fn transition(
        &mut self,
        r#type: &str,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
        detail: Option<String>,
    ) -> bool {
        let now = Utc::now();
        let generation = self.generation;
        let message = message.into();

        let Some(condition) = self.status.condition_mut(r#type) else {
            debug!(condition = r#type, %status, %reason, "condition.created");
            self.status.conditions.push(Condition {
                r#type: r#type.to_string(),
                status,
                observed_generation: generation,
                last_transition_time: now,
                reason,
                message,
                name: r#type.to_string(),
                detail,
            });
            return true;
        };

        let before = condition.clone();
        condition.status = status;
        condition.reason = reason;
        condition.message = message;
        condition.detail = detail;
        condition.observed_generation = generation;
        if condition.name.is_empty() {
            condition.name = r#type.to_string();
        }

        let changed = *condition != before;
        if changed {
            // Never move backwards, even if the local clock does
            condition.last_transition_time = now.max(before.last_transition_time);
            debug!(
                condition = r#type,
                from.status = %before.status,
                from.reason = %before.reason,
                to.status = %status,
                to.reason = %reason,
                "condition.transition"
            );
        }
        changed
    }

    /// True / Ready
    pub fn success(&mut self, r#type: &str, message: impl Into<String>) -> bool {
        self.transition(
            r#type,
            ConditionStatus::True,
            ConditionReason::Ready,
            message,
            None,
        )
    }

    /// False / Error, keeping the error text in `detail`
    pub fn failed(
        &mut self,
        r#type: &str,
        error: &dyn Display,
        message: impl Into<String>,
    ) -> bool {
        self.transition(
            r#type,
            ConditionStatus::False,
            ConditionReason::Error,
            message,
            Some(error.to_string()),
        )
    }

    /// False / ActionRequired: a human has to fix something before retrying helps
    pub fn action_required(&mut self, r#type: &str, message: impl Into<String>) -> bool {
        self.transition(
            r#type,
            ConditionStatus::False,
            ConditionReason::ActionRequired,
            message,
            None,
        )
    }

    pub fn warning(&mut self, r#type: &str, message: impl Into<String>) -> bool {
        self.transition(
            r#type,
            ConditionStatus::False,
            ConditionReason::Warning,
            message,
            None,
        )
    }

    pub fn in_progress(&mut self, r#type: &str, message: impl Into<String>) -> bool {
        self.transition(
            r#type,
            ConditionStatus::False,
            ConditionReason::InProgress,
            message,
            None,
        )
    }

    pub fn deleting(&mut self, r#type: &str, message: impl Into<String>) -> bool {
        self.transition(
            r#type,
            ConditionStatus::False,
            ConditionReason::Deleting,
            message,
            None,
        )
    }

    pub fn is_complete(&self, r#type: &str) -> bool {
        self.status.is_complete(r#type, self.generation)
    }
}
