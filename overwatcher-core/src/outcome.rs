//! Test run outcomes and their exit-code mapping (spec.md §4.7).

use std::fmt;

/// The final result of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Failed,
    Timeout,
    ConfigFailed,
}

impl Outcome {
    /// Exit code precedence, exactly as spec.md §4.7 tabulates it.
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::ConfigFailed => 3,
            Outcome::Timeout => 2,
            Outcome::Failed => 1,
            Outcome::Ok => 0,
        }
    }

    /// Canonical wire name used in logs and the result channel.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Failed => "failed",
            Outcome::Timeout => "timeout",
            Outcome::ConfigFailed => "config failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exit code used when an outcome string is not recognized.
pub const UNKNOWN_OUTCOME_EXIT_CODE: i32 = -98;

/// Exit code used when the result channel could not be drained.
pub const RESULT_DRAIN_FAILURE_EXIT_CODE: i32 = -99;

/// What the driver produced: a decided [`Outcome`], or the −99 case
/// (spec.md §4.7/§7) where the blocking wait for `result` itself failed —
/// here, the `watch::Sender` half of the result cell was dropped (e.g.
/// the engine tore down) without ever recording a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    Decided(Outcome),
    ResultDrainFailed,
}

impl DriverOutcome {
    /// The process exit code this run should report: an outcome's own
    /// mapping, or [`RESULT_DRAIN_FAILURE_EXIT_CODE`] for a drain failure.
    pub fn exit_code(self) -> i32 {
        match self {
            DriverOutcome::Decided(outcome) => outcome.exit_code(),
            DriverOutcome::ResultDrainFailed => RESULT_DRAIN_FAILURE_EXIT_CODE,
        }
    }
}

/// Parses a free-form outcome string (as might arrive from a legacy
/// description or external caller) into an [`Outcome`], falling back to
/// the unknown-outcome exit code per spec.md §4.7/§7.
pub fn exit_code_for_str(outcome: &str) -> i32 {
    match outcome {
        "ok" => Outcome::Ok.exit_code(),
        "failed" => Outcome::Failed.exit_code(),
        "timeout" => Outcome::Timeout.exit_code(),
        "config failed" => Outcome::ConfigFailed.exit_code(),
        _ => UNKNOWN_OUTCOME_EXIT_CODE,
    }
}
