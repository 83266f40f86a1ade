//! Submission dispatcher
//!
//! Entry point for grading: stages the source, compiles once, runs every
//! test case sequentially against the compiled artifact, aggregates the
//! verdict, and persists the result exactly once per (submission,
//! question) pair.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::languages::LanguageRegistry;
use crate::pool::SandboxPool;
use crate::runner::RunLimits;
use crate::store::{
    CaseReport, CaseResult, GradingResult, ResultStore, VerdictDetail, WrongAnswerDetail,
};
use crate::verdict::{evaluate, CaseOutcome, CaseVerdict};
use crate::worker::{Comparison, ExecutionWorker, TestCase};

/// Bound on per-case output carried in feedback
const OUTPUT_PREVIEW_CHARS: usize = 4096;

/// One grading request; immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    /// Persistence key half; absent for trial runs
    #[serde(default)]
    pub submission_id: Option<i64>,
    #[serde(default)]
    pub question_id: Option<i64>,
    pub language: String,
    pub source_code: String,
    /// Input for an uncompared trial execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_input: Option<String>,
}

/// Result of a trial (custom input) execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub time_ms: u32,
    pub memory_kb: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_output: Option<String>,
}

/// Grading entry point wiring registry, worker, pool, and store
pub struct Dispatcher {
    registry: Arc<LanguageRegistry>,
    worker: ExecutionWorker,
    pool: Arc<SandboxPool>,
    store: Arc<dyn ResultStore>,
    config: EngineConfig,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        worker: ExecutionWorker,
        pool: Arc<SandboxPool>,
        store: Arc<dyn ResultStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            worker,
            pool,
            store,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn pool(&self) -> &Arc<SandboxPool> {
        &self.pool
    }

    /// Default per-run limits from configuration
    pub fn default_limits(&self) -> RunLimits {
        RunLimits::new(self.config.timeout_ms, self.config.memory_limit_mb)
    }

    /// Grade a submission against its test cases.
    ///
    /// Every test case is executed (scores stay accurate); the feedback
    /// carries diagnostic detail for at most the first failure, and hidden
    /// cases never expose their content. Deterministic code failures are
    /// verdicts inside the returned result; `Err` means the request itself
    /// could not be served.
    pub async fn grade(
        &self,
        submission: &Submission,
        test_cases: &[TestCase],
        limits: RunLimits,
        comparison: Comparison,
    ) -> Result<GradingResult, EngineError> {
        if test_cases.is_empty() {
            return Err(EngineError::NoTestCases);
        }
        let runtime = self.registry.resolve(&submission.language)?.clone();

        // Never let two grading passes race on the store's uniqueness
        // invariant for the same submission
        let _guard = match submission.submission_id {
            Some(id) => Some(InFlightGuard::claim(&self.in_flight, id)?),
            None => None,
        };

        let work_dir = tempfile::tempdir()?;
        std::fs::write(work_dir.path().join(&runtime.source_file), &submission.source_code)?;

        let total = test_cases.len();

        let compile = self.worker.compile(work_dir.path(), &runtime).await?;
        if !compile.success {
            let aggregate = evaluate(true, &[], total);
            let result = GradingResult {
                submission_id: submission.submission_id.unwrap_or_default(),
                question_id: submission.question_id.unwrap_or_default(),
                language: submission.language.clone(),
                status: aggregate.status,
                test_cases_passed: aggregate.test_cases_passed,
                total_test_cases: aggregate.total_test_cases,
                score: aggregate.score,
                feedback: Vec::new(),
                note: compile.output,
            };
            self.persist(submission, &result).await?;
            info!(
                submission_id = ?submission.submission_id,
                status = %result.status,
                "Grading finished at compile phase"
            );
            return Ok(result);
        }

        let mut outcomes = Vec::with_capacity(total);
        for (index, test_case) in test_cases.iter().enumerate() {
            let outcome = self
                .worker
                .run_case(
                    work_dir.path(),
                    &runtime,
                    test_case,
                    &limits,
                    comparison,
                    index,
                )
                .await?;
            outcomes.push(outcome);
        }

        let aggregate = evaluate(false, &outcomes, total);
        let feedback = build_feedback(test_cases, &outcomes);

        let result = GradingResult {
            submission_id: submission.submission_id.unwrap_or_default(),
            question_id: submission.question_id.unwrap_or_default(),
            language: submission.language.clone(),
            status: aggregate.status,
            test_cases_passed: aggregate.test_cases_passed,
            total_test_cases: aggregate.total_test_cases,
            score: aggregate.score,
            feedback,
            note: None,
        };
        self.persist(submission, &result).await?;

        info!(
            submission_id = ?submission.submission_id,
            status = %result.status,
            passed = result.test_cases_passed,
            total = result.total_test_cases,
            score = result.score,
            "Grading finished"
        );
        Ok(result)
    }

    /// One uncompared execution against the submission's custom input
    pub async fn trial_run(&self, submission: &Submission) -> Result<TrialOutcome, EngineError> {
        let runtime = self.registry.resolve(&submission.language)?.clone();

        let work_dir = tempfile::tempdir()?;
        std::fs::write(work_dir.path().join(&runtime.source_file), &submission.source_code)?;

        let compile = self.worker.compile(work_dir.path(), &runtime).await?;
        if !compile.success {
            return Ok(TrialOutcome {
                success: false,
                stdout: String::new(),
                stderr: compile.output.clone().unwrap_or_default(),
                exit_code: -1,
                time_ms: 0,
                memory_kb: 0,
                compile_output: compile.output,
            });
        }

        let limits = self.default_limits();
        let run = self
            .worker
            .run_raw(
                work_dir.path(),
                &runtime,
                submission.custom_input.as_deref(),
                &limits,
            )
            .await?;

        Ok(TrialOutcome {
            success: run.is_success(),
            exit_code: run.exit_code(),
            time_ms: run.time_ms,
            memory_kb: run.memory_kb,
            stdout: run.stdout,
            stderr: run.stderr,
            compile_output: None,
        })
    }

    /// Persist only full-keyed submissions; trial grades are ephemeral
    async fn persist(
        &self,
        submission: &Submission,
        result: &GradingResult,
    ) -> Result<(), EngineError> {
        if submission.submission_id.is_some() && submission.question_id.is_some() {
            self.store.upsert(result.clone()).await?;
        }
        Ok(())
    }
}

/// Build the per-case feedback list: hidden cases are redacted, and only
/// the first failing case carries the expected/actual diagnostic.
fn build_feedback(test_cases: &[TestCase], outcomes: &[CaseOutcome]) -> Vec<CaseReport> {
    let first_failure = outcomes.iter().position(|o| !o.verdict.passed());

    outcomes
        .iter()
        .map(|outcome| {
            let test_case = &test_cases[outcome.index];
            let is_diagnostic = first_failure == Some(outcome.index) && !test_case.hidden;

            let details = match (&outcome.verdict, is_diagnostic) {
                (CaseVerdict::WrongAnswer { expected, actual }, true) => {
                    Some(WrongAnswerDetail {
                        expected: expected.clone(),
                        actual: actual.clone(),
                    })
                }
                _ => None,
            };

            let (shown_case, output, error) = if test_case.hidden {
                (None, None, None)
            } else {
                (
                    Some(test_case.clone()),
                    Some(truncate(&outcome.stdout, OUTPUT_PREVIEW_CHARS)),
                    if outcome.stderr.is_empty() {
                        None
                    } else {
                        Some(truncate(&outcome.stderr, OUTPUT_PREVIEW_CHARS))
                    },
                )
            };

            CaseReport {
                test_case: shown_case,
                result: CaseResult {
                    success: outcome.verdict.passed(),
                    output,
                    error,
                    verdict: VerdictDetail {
                        status: outcome.verdict.as_verdict(),
                        details,
                    },
                },
            }
        })
        .collect()
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Claim on the in-flight set, released on drop
struct InFlightGuard {
    set: Arc<Mutex<HashSet<i64>>>,
    id: i64,
}

impl InFlightGuard {
    fn claim(set: &Arc<Mutex<HashSet<i64>>>, id: i64) -> Result<Self, EngineError> {
        let mut claimed = set.lock().unwrap_or_else(|poisoned| {
            warn!("In-flight set lock poisoned, recovering");
            poisoned.into_inner()
        });
        if !claimed.insert(id) {
            return Err(EngineError::AlreadyGrading(id));
        }
        Ok(Self {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut claimed) = self.set.lock() {
            claimed.remove(&self.id);
        }
    }
}
