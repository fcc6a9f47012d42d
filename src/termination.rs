//! Iteration termination policy
//!
//! Decides whether the design iteration loop should stop. Pure policy
//! over values the workflow engine already holds: no I/O, no persistence,
//! no clock. The engine asks after every iteration and requests an undo
//! or a final snapshot based on the answer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the iteration loop stopped (or didn't)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// No stop condition met
    Continue,
    /// Every required design goal is satisfied
    Success,
    /// Checkpoint budget exhausted
    MaxCheckpoints,
    /// No meaningful improvement over the trailing window
    Stagnated,
    /// The user asked to stop
    UserStopped,
    /// Iteration budget exhausted
    MaxIterations,
    /// An unrecoverable error ended the loop
    Error,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::Continue => "continue",
            TerminationReason::Success => "success",
            TerminationReason::MaxCheckpoints => "max_checkpoints",
            TerminationReason::Stagnated => "stagnated",
            TerminationReason::UserStopped => "user_stopped",
            TerminationReason::MaxIterations => "max_iterations",
            TerminationReason::Error => "error",
        };
        f.write_str(s)
    }
}

/// A termination verdict with a human-readable message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationDecision {
    /// Whether the loop should stop now
    pub should_terminate: bool,
    /// Why
    pub reason: TerminationReason,
    /// Message for logs and UI
    pub message: String,
}

impl TerminationDecision {
    /// The keep-going verdict
    pub fn continue_iteration() -> Self {
        Self {
            should_terminate: false,
            reason: TerminationReason::Continue,
            message: "continuing iteration".to_string(),
        }
    }

    /// A stop verdict for `reason`
    pub fn terminate(reason: TerminationReason, message: impl Into<String>) -> Self {
        Self {
            should_terminate: true,
            reason,
            message: message.into(),
        }
    }
}

/// Loop counters and flags the engine feeds into the policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationStatus {
    /// The user requested a manual stop
    pub user_stop_requested: bool,
    /// Every required design goal is currently met
    pub goals_satisfied: bool,
    /// Checkpoints written so far
    pub checkpoint_count: u32,
    /// Design iterations completed so far
    pub iteration_count: u32,
}

/// Termination policy with configurable budgets
///
/// ## Examples
///
/// ```
/// use itervault::{IterationStatus, TerminationChecker, TerminationReason};
///
/// let checker = TerminationChecker::default();
/// let status = IterationStatus { iteration_count: 5, ..Default::default() };
/// let decision = checker.check(&status, &[0.40, 0.55, 0.71]);
/// assert!(!decision.should_terminate);
///
/// let decision = checker.check(&status, &[0.700, 0.701, 0.700]);
/// assert_eq!(decision.reason, TerminationReason::Stagnated);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminationChecker {
    /// Stop after this many checkpoints
    pub max_checkpoints: u32,
    /// Stop after this many iterations
    pub max_iterations: u32,
    /// Trailing metric window used for stagnation detection
    pub stagnation_window: usize,
    /// Relative spread below which the window counts as stagnant
    pub stagnation_threshold: f64,
}

impl Default for TerminationChecker {
    fn default() -> Self {
        Self {
            max_checkpoints: 20,
            max_iterations: 100,
            stagnation_window: 3,
            stagnation_threshold: 0.01,
        }
    }
}

impl TerminationChecker {
    /// Evaluate the stop conditions in priority order
    ///
    /// Priority: user stop, goals satisfied, checkpoint budget, iteration
    /// budget, stagnation. `recent_metrics` is the primary metric series
    /// in iteration order, oldest first; an empty or short series never
    /// counts as stagnant.
    pub fn check(&self, status: &IterationStatus, recent_metrics: &[f64]) -> TerminationDecision {
        if status.user_stop_requested {
            return TerminationDecision::terminate(
                TerminationReason::UserStopped,
                "stopped by user request",
            );
        }
        if status.goals_satisfied {
            return TerminationDecision::terminate(
                TerminationReason::Success,
                "all design goals satisfied",
            );
        }
        if status.checkpoint_count >= self.max_checkpoints {
            return TerminationDecision::terminate(
                TerminationReason::MaxCheckpoints,
                format!("checkpoint limit reached ({})", self.max_checkpoints),
            );
        }
        if status.iteration_count >= self.max_iterations {
            return TerminationDecision::terminate(
                TerminationReason::MaxIterations,
                format!("iteration limit reached ({})", self.max_iterations),
            );
        }
        if self.is_stagnated(recent_metrics) {
            return TerminationDecision::terminate(
                TerminationReason::Stagnated,
                format!(
                    "no meaningful improvement over the last {} iterations",
                    self.stagnation_window
                ),
            );
        }
        TerminationDecision::continue_iteration()
    }

    /// Whether the trailing window of `values` shows no real movement
    ///
    /// Looks at the last `stagnation_window` values: stagnant when their
    /// relative spread `(max - min) / |max|` falls below the threshold.
    /// Too few values is not stagnation; an all-zero window is.
    pub fn is_stagnated(&self, values: &[f64]) -> bool {
        if values.len() < self.stagnation_window {
            return false;
        }
        let window = &values[values.len() - self.stagnation_window..];
        let max = window.iter().cloned().fold(f64::MIN, f64::max);
        let min = window.iter().cloned().fold(f64::MAX, f64::min);
        if max == 0.0 {
            return true;
        }
        (max - min) / max.abs() < self.stagnation_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continue_by_default() {
        let checker = TerminationChecker::default();
        let decision = checker.check(&IterationStatus::default(), &[]);
        assert!(!decision.should_terminate);
        assert_eq!(decision.reason, TerminationReason::Continue);
    }

    #[test]
    fn test_user_stop_wins_over_everything() {
        let checker = TerminationChecker::default();
        let status = IterationStatus {
            user_stop_requested: true,
            goals_satisfied: true,
            checkpoint_count: 99,
            iteration_count: 999,
        };
        let decision = checker.check(&status, &[1.0, 1.0, 1.0]);
        assert_eq!(decision.reason, TerminationReason::UserStopped);
    }

    #[test]
    fn test_success_before_budgets() {
        let checker = TerminationChecker::default();
        let status = IterationStatus {
            goals_satisfied: true,
            checkpoint_count: 25,
            ..Default::default()
        };
        let decision = checker.check(&status, &[]);
        assert_eq!(decision.reason, TerminationReason::Success);
    }

    #[test]
    fn test_checkpoint_budget() {
        let checker = TerminationChecker::default();
        let status = IterationStatus {
            checkpoint_count: 20,
            ..Default::default()
        };
        let decision = checker.check(&status, &[]);
        assert_eq!(decision.reason, TerminationReason::MaxCheckpoints);
        assert!(decision.message.contains("20"));
    }

    #[test]
    fn test_iteration_budget() {
        let checker = TerminationChecker {
            max_iterations: 10,
            ..Default::default()
        };
        let status = IterationStatus {
            iteration_count: 10,
            ..Default::default()
        };
        let decision = checker.check(&status, &[]);
        assert_eq!(decision.reason, TerminationReason::MaxIterations);
    }

    #[test]
    fn test_stagnation_over_flat_window() {
        let checker = TerminationChecker::default();
        let status = IterationStatus {
            iteration_count: 5,
            ..Default::default()
        };
        let decision = checker.check(&status, &[0.42, 0.700, 0.702, 0.701]);
        assert_eq!(decision.reason, TerminationReason::Stagnated);
    }

    #[test]
    fn test_improving_window_is_not_stagnant() {
        let checker = TerminationChecker::default();
        assert!(!checker.is_stagnated(&[0.5, 0.6, 0.8]));
    }

    #[test]
    fn test_short_series_is_not_stagnant() {
        let checker = TerminationChecker::default();
        assert!(!checker.is_stagnated(&[0.5, 0.5]));
        assert!(!checker.is_stagnated(&[]));
    }

    #[test]
    fn test_all_zero_window_is_stagnant() {
        let checker = TerminationChecker::default();
        assert!(checker.is_stagnated(&[0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_only_trailing_window_counts() {
        let checker = TerminationChecker::default();
        // Early movement, flat tail.
        assert!(checker.is_stagnated(&[0.1, 0.9, 0.5, 0.5, 0.5]));
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&TerminationReason::MaxCheckpoints).unwrap();
        assert_eq!(json, "\"max_checkpoints\"");
    }
}
