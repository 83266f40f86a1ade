//! Verdict taxonomy and submission-level evaluation
//!
//! The evaluator is a pure function over per-case outcomes: compilation
//! failure dominates everything, otherwise the first failing case in
//! caller order is authoritative, and a full pass is `accepted`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal classification of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    CompilationError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    InternalError,
    /// Only synthesized for historical records that predate the engine;
    /// never produced by evaluation.
    EvaluationUnavailable,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accepted => "accepted",
            Verdict::WrongAnswer => "wrong_answer",
            Verdict::CompilationError => "compilation_error",
            Verdict::RuntimeError => "runtime_error",
            Verdict::TimeLimitExceeded => "time_limit_exceeded",
            Verdict::MemoryLimitExceeded => "memory_limit_exceeded",
            Verdict::InternalError => "internal_error",
            Verdict::EvaluationUnavailable => "evaluation_unavailable",
        };
        write!(f, "{}", s)
    }
}

/// Per-test-case classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseVerdict {
    Passed,
    WrongAnswer { expected: String, actual: String },
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    InternalError,
}

impl CaseVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, CaseVerdict::Passed)
    }

    /// Submission-level verdict this case maps to
    pub fn as_verdict(&self) -> Verdict {
        match self {
            CaseVerdict::Passed => Verdict::Accepted,
            CaseVerdict::WrongAnswer { .. } => Verdict::WrongAnswer,
            CaseVerdict::RuntimeError => Verdict::RuntimeError,
            CaseVerdict::TimeLimitExceeded => Verdict::TimeLimitExceeded,
            CaseVerdict::MemoryLimitExceeded => Verdict::MemoryLimitExceeded,
            CaseVerdict::InternalError => Verdict::InternalError,
        }
    }
}

/// Outcome of running one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseOutcome {
    /// Position in the caller-supplied test-case order
    pub index: usize,
    pub verdict: CaseVerdict,
    /// Wall-clock time in milliseconds
    pub time_ms: u32,
    /// Peak memory estimate in KB
    pub memory_kb: u32,
    /// Program stdout (bounded)
    pub stdout: String,
    /// Program stderr (bounded)
    pub stderr: String,
    pub exit_code: i32,
}

/// Submission-level aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub status: Verdict,
    pub test_cases_passed: u32,
    pub total_test_cases: u32,
    /// 0-100, integer-rounded
    pub score: u32,
}

/// Aggregate per-case outcomes into a submission verdict.
///
/// `total` is the number of test cases supplied by the caller; it is
/// reported back unchanged regardless of how many outcomes exist.
pub fn evaluate(compile_failed: bool, outcomes: &[CaseOutcome], total: usize) -> Aggregate {
    if total == 0 {
        // Zero test cases is a configuration error, never a division
        return Aggregate {
            status: Verdict::InternalError,
            test_cases_passed: 0,
            total_test_cases: 0,
            score: 0,
        };
    }

    let total_u32 = total as u32;

    if compile_failed {
        return Aggregate {
            status: Verdict::CompilationError,
            test_cases_passed: 0,
            total_test_cases: total_u32,
            score: 0,
        };
    }

    let passed = outcomes.iter().filter(|o| o.verdict.passed()).count() as u32;

    let status = match outcomes.iter().find(|o| !o.verdict.passed()) {
        Some(first_failure) => first_failure.verdict.as_verdict(),
        None if outcomes.len() == total => Verdict::Accepted,
        // Fewer outcomes than cases without a recorded failure means the
        // pipeline lost results
        None => Verdict::InternalError,
    };

    Aggregate {
        status,
        test_cases_passed: passed,
        total_test_cases: total_u32,
        score: score(passed, total_u32),
    }
}

/// round(100 * passed / total) with integer arithmetic
pub fn score(passed: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (100 * passed + total / 2) / total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passed(index: usize) -> CaseOutcome {
        CaseOutcome {
            index,
            verdict: CaseVerdict::Passed,
            time_ms: 10,
            memory_kb: 1024,
            stdout: "ok\n".into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    fn failed(index: usize, verdict: CaseVerdict) -> CaseOutcome {
        CaseOutcome {
            index,
            verdict,
            time_ms: 10,
            memory_kb: 1024,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 1,
        }
    }

    #[test]
    fn test_all_pass_is_accepted_with_full_score() {
        let agg = evaluate(false, &[passed(0), passed(1), passed(2)], 3);
        assert_eq!(agg.status, Verdict::Accepted);
        assert_eq!(agg.test_cases_passed, 3);
        assert_eq!(agg.total_test_cases, 3);
        assert_eq!(agg.score, 100);
    }

    #[test]
    fn test_first_failure_is_authoritative() {
        let outcomes = [
            passed(0),
            failed(1, CaseVerdict::TimeLimitExceeded),
            failed(
                2,
                CaseVerdict::WrongAnswer {
                    expected: "8".into(),
                    actual: "7".into(),
                },
            ),
        ];
        let agg = evaluate(false, &outcomes, 3);
        assert_eq!(agg.status, Verdict::TimeLimitExceeded);
        assert_eq!(agg.test_cases_passed, 1);
        assert_eq!(agg.score, 33);
    }

    #[test]
    fn test_compile_failure_dominates() {
        let agg = evaluate(true, &[], 4);
        assert_eq!(agg.status, Verdict::CompilationError);
        assert_eq!(agg.test_cases_passed, 0);
        assert_eq!(agg.total_test_cases, 4);
        assert_eq!(agg.score, 0);
    }

    #[test]
    fn test_zero_test_cases_is_internal_error() {
        let agg = evaluate(false, &[], 0);
        assert_eq!(agg.status, Verdict::InternalError);
        assert_eq!(agg.score, 0);
    }

    #[test]
    fn test_score_rounding() {
        assert_eq!(score(2, 3), 67);
        assert_eq!(score(1, 3), 33);
        assert_eq!(score(1, 2), 50);
        assert_eq!(score(0, 7), 0);
        assert_eq!(score(7, 7), 100);
    }

    #[test]
    fn test_missing_outcomes_without_failure_is_internal_error() {
        let agg = evaluate(false, &[passed(0)], 3);
        assert_eq!(agg.status, Verdict::InternalError);
        assert_eq!(agg.test_cases_passed, 1);
        assert_eq!(agg.total_test_cases, 3);
    }

    #[test]
    fn test_verdict_serialization() {
        assert_eq!(
            serde_json::to_string(&Verdict::WrongAnswer).unwrap(),
            "\"wrong_answer\""
        );
        assert_eq!(
            serde_json::to_string(&Verdict::EvaluationUnavailable).unwrap(),
            "\"evaluation_unavailable\""
        );
        assert_eq!(Verdict::TimeLimitExceeded.to_string(), "time_limit_exceeded");
    }
}
