//! Test result models
//!
//! Defines case statuses, per-case results, and the roll-up summary reported
//! for every unit of the grouping hierarchy.

use serde::Serialize;
use std::fmt;

/// Terminal status of one test case
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped,
    NotRun,
}

impl CaseStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            CaseStatus::Passed => "✓",
            CaseStatus::Failed => "✗",
            CaseStatus::Skipped => "○",
            CaseStatus::NotRun => "-",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CaseStatus::Passed)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Passed => write!(f, "PASS"),
            CaseStatus::Failed => write!(f, "FAIL"),
            CaseStatus::Skipped => write!(f, "SKIP"),
            CaseStatus::NotRun => write!(f, "NOT RUN"),
        }
    }
}

/// Why a case was never started
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotRunReason {
    /// Explicit case while explicit mode is off
    ExplicitOnly,
    /// Regular case while only explicit cases run
    NotExplicit,
    /// The run was cancelled before the case started
    Cancelled,
}

impl fmt::Display for NotRunReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotRunReason::ExplicitOnly => write!(f, "explicit test"),
            NotRunReason::NotExplicit => write!(f, "only explicit tests requested"),
            NotRunReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Error,
    Panic,
}

/// Rendered failure, as carried by events
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
    /// Error chain, outermost first
    pub chain: Vec<String>,
}

impl fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Outcome of one executed case
#[derive(Clone, Debug, Serialize)]
pub struct CaseResult {
    /// Published status, after cleanup failures and fail-skips /
    /// fail-warnings remapping
    pub status: CaseStatus,
    /// What the body itself reported
    pub reported_status: CaseStatus,
    pub elapsed_ms: u64,
    pub output: String,
    pub warnings: Vec<String>,
    pub skip_reason: Option<String>,
    /// Primary failure: the body's, when it failed
    pub failure: Option<FailureInfo>,
    pub cleanup_failures: Vec<FailureInfo>,
}

impl CaseResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: CaseStatus::Skipped,
            reported_status: CaseStatus::Skipped,
            elapsed_ms: 0,
            output: String::new(),
            warnings: Vec::new(),
            skip_reason: Some(reason.into()),
            failure: None,
            cleanup_failures: Vec::new(),
        }
    }

    /// Apply fail-skips / fail-tests-with-warnings to the published status
    pub fn remap(mut self, fail_skips: bool, fail_warnings: bool) -> Self {
        self.status = match self.status {
            CaseStatus::Skipped if fail_skips => CaseStatus::Failed,
            CaseStatus::Passed if fail_warnings && !self.warnings.is_empty() => CaseStatus::Failed,
            status => status,
        };
        self
    }
}

impl fmt::Display for CaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}ms]", self.status.symbol(), self.status, self.elapsed_ms)?;
        if let Some(failure) = &self.failure {
            write!(f, " - {failure}")?;
        } else if let Some(reason) = &self.skip_reason {
            write!(f, " - {reason}")?;
        }
        Ok(())
    }
}

/// Aggregate status of a grouping unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Passed,
    Failed,
    Skipped,
}

/// Roll-up counts for a unit and everything below it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_run: usize,
    /// Setup and cleanup failures outside any single case
    pub errors: usize,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn record(&mut self, status: CaseStatus) {
        self.total += 1;
        match status {
            CaseStatus::Passed => self.passed += 1,
            CaseStatus::Failed => self.failed += 1,
            CaseStatus::Skipped => self.skipped += 1,
            CaseStatus::NotRun => self.not_run += 1,
        }
    }

    /// Add a child's counts; elapsed time is measured per level, not summed
    pub fn merge(&mut self, other: &RunSummary) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.not_run += other.not_run;
        self.errors += other.errors;
    }

    /// Failed if anything failed, passed if anything passed, else skipped
    pub fn status(&self) -> UnitStatus {
        if self.failed > 0 || self.errors > 0 {
            UnitStatus::Failed
        } else if self.passed > 0 {
            UnitStatus::Passed
        } else {
            UnitStatus::Skipped
        }
    }

    pub fn pass_rate(&self) -> f64 {
        let executed = self.passed + self.failed;
        if executed == 0 {
            0.0
        } else {
            (self.passed as f64 / executed as f64) * 100.0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Not run: {} | Errors: {} | Duration: {}ms",
            self.total,
            self.passed,
            self.failed,
            self.skipped,
            self.not_run,
            self.errors,
            self.elapsed_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        for status in [
            CaseStatus::Passed,
            CaseStatus::Failed,
            CaseStatus::Skipped,
            CaseStatus::NotRun,
            CaseStatus::Passed,
        ] {
            summary.record(status);
        }

        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.not_run, 1);
    }

    #[test]
    fn test_unit_status_worst_wins() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.status(), UnitStatus::Skipped);

        summary.record(CaseStatus::Skipped);
        assert_eq!(summary.status(), UnitStatus::Skipped);

        summary.record(CaseStatus::Passed);
        assert_eq!(summary.status(), UnitStatus::Passed);

        summary.errors += 1;
        assert_eq!(summary.status(), UnitStatus::Failed);
    }

    #[test]
    fn test_merge_keeps_own_elapsed() {
        let mut parent = RunSummary {
            elapsed_ms: 10,
            ..Default::default()
        };
        let child = RunSummary {
            total: 2,
            passed: 1,
            failed: 1,
            elapsed_ms: 500,
            ..Default::default()
        };
        parent.merge(&child);

        assert_eq!(parent.total, 2);
        assert_eq!(parent.elapsed_ms, 10);
        assert_eq!(parent.status(), UnitStatus::Failed);
        assert_eq!(parent.pass_rate(), 50.0);
    }

    #[test]
    fn test_remap_fail_skips() {
        let result = CaseResult::skipped("later").remap(true, false);
        assert_eq!(result.status, CaseStatus::Failed);
        assert_eq!(result.reported_status, CaseStatus::Skipped);

        let untouched = CaseResult::skipped("later").remap(false, true);
        assert_eq!(untouched.status, CaseStatus::Skipped);
    }

    #[test]
    fn test_remap_fail_warnings() {
        let mut result = CaseResult::skipped("unused");
        result.status = CaseStatus::Passed;
        result.reported_status = CaseStatus::Passed;
        result.skip_reason = None;

        let clean = result.clone().remap(false, true);
        assert_eq!(clean.status, CaseStatus::Passed);

        result.warnings.push("deprecated API".to_string());
        let warned = result.remap(false, true);
        assert_eq!(warned.status, CaseStatus::Failed);
    }
}
