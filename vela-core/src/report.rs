//! Run reports - per-step results aggregated over a whole run

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Stored config digest matches the desired one.
    UpToDate,
    /// The provider already had the resource; recorded and moved on.
    AlreadyExists,
    /// Nothing in state to destroy.
    AlreadyAbsent,
    /// The run was cancelled before this step was dispatched.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    Provider,
    RetriesExhausted,
    ImmutableDrift,
    ProvisioningTimeout,
    DependencyFailed,
    StateStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "detail")]
pub enum Outcome {
    Created,
    Updated,
    Deleted,
    Skipped(SkipReason),
    Failed(FailureCode),
}

impl Outcome {
    /// Terminal success: dependents of this step may be dispatched.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Skipped(reason) => write!(f, "skipped ({reason:?})"),
            Self::Failed(code) => write!(f, "failed ({code:?})"),
        }
    }
}

/// Result of one plan step, emitted regardless of outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub logical_name: String,
    pub outcome: Outcome,
    pub physical_id: Option<String>,
    /// Human-readable error detail for failed steps.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Aggregated result of an apply or destroy run, persisted as structured
/// output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub environment: String,
    /// "apply" or "destroy".
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One result per plan step, in execution order.
    pub results: Vec<ApplyResult>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_success())
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !r.outcome.is_success())
            .count()
    }

    pub fn result_for(&self, logical_name: &str) -> Option<&ApplyResult> {
        self.results.iter().find(|r| r.logical_name == logical_name)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for result in &self.results {
            match result.outcome {
                Outcome::Created => summary.created += 1,
                Outcome::Updated => summary.updated += 1,
                Outcome::Deleted => summary.deleted += 1,
                Outcome::Skipped(_) => summary.skipped += 1,
                Outcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} skipped, {} failed",
            self.created, self.updated, self.deleted, self.skipped, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, outcome: Outcome) -> ApplyResult {
        let now = Utc::now();
        ApplyResult {
            logical_name: name.to_string(),
            outcome,
            physical_id: None,
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn report_success_and_counts() {
        let report = RunReport {
            environment: "lab".to_string(),
            operation: "apply".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            results: vec![
                result("vpc", Outcome::Created),
                result("subnet", Outcome::Skipped(SkipReason::UpToDate)),
                result("nat", Outcome::Failed(FailureCode::Provider)),
            ],
        };

        assert!(!report.is_success());
        assert_eq!(report.failed_count(), 1);

        let summary = report.summary();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.to_string(), "1 created, 0 updated, 0 deleted, 1 skipped, 1 failed");
    }

    #[test]
    fn outcome_serializes_with_detail() {
        let json = serde_json::to_string(&Outcome::Failed(FailureCode::DependencyFailed)).unwrap();
        assert_eq!(json, r#"{"result":"failed","detail":"dependency_failed"}"#);

        let json = serde_json::to_string(&Outcome::Created).unwrap();
        assert_eq!(json, r#"{"result":"created"}"#);
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = RunReport {
            environment: "lab".to_string(),
            operation: "apply".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            results: vec![result("vpc", Outcome::Skipped(SkipReason::Cancelled))],
        };

        let json = serde_json::to_string_pretty(&report).unwrap();
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.results, report.results);
    }
}
