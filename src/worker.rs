//! Execution worker
//!
//! Orchestrates a single sandboxed run: acquire a lease, execute, release,
//! classify. Compilation happens once per submission; each test case is
//! one leased run of the compiled artifact with the case input on stdin.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::languages::LanguageRuntime;
use crate::pool::SandboxPool;
use crate::retry::{self, BackoffPolicy};
use crate::runner::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};
use crate::verdict::{CaseOutcome, CaseVerdict};

/// One test case, owned by the question and read-only to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    #[serde(rename = "output")]
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// Output comparison strategy, selectable per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Trailing whitespace per line and trailing newlines ignored,
    /// otherwise exact
    #[default]
    TrimmedLines,
    /// Byte-for-byte
    Exact,
    /// Whitespace-separated token sequences
    Tokens,
}

/// Compare program output with expected output under a strategy
pub fn compare_output(actual: &str, expected: &str, mode: Comparison) -> bool {
    match mode {
        Comparison::Exact => actual == expected,
        Comparison::Tokens => {
            actual.split_whitespace().eq(expected.split_whitespace())
        }
        Comparison::TrimmedLines => {
            let normalize = |s: &str| -> Vec<String> {
                let mut lines: Vec<String> =
                    s.lines().map(|line| line.trim_end().to_string()).collect();
                while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
                    lines.pop();
                }
                lines
            };
            normalize(actual) == normalize(expected)
        }
    }
}

/// Result of a compilation attempt
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub success: bool,
    pub output: Option<String>,
}

impl CompileOutcome {
    fn clean() -> Self {
        Self {
            success: true,
            output: None,
        }
    }
}

/// Worker that runs compile and test-case phases through the sandbox pool
pub struct ExecutionWorker {
    runner: Arc<dyn Runner>,
    pool: Arc<SandboxPool>,
    acquire_timeout: Duration,
    backoff: BackoffPolicy,
    compile_limits: RunLimits,
}

impl ExecutionWorker {
    pub fn new(
        runner: Arc<dyn Runner>,
        pool: Arc<SandboxPool>,
        acquire_timeout: Duration,
        backoff: BackoffPolicy,
        compile_limits: RunLimits,
    ) -> Self {
        Self {
            runner,
            pool,
            acquire_timeout,
            backoff,
            compile_limits,
        }
    }

    /// Compile the submission once. Interpreted languages are a no-op.
    /// A failed compile is a deterministic outcome, not an error.
    pub async fn compile(
        &self,
        work_dir: &Path,
        runtime: &LanguageRuntime,
    ) -> Result<CompileOutcome, EngineError> {
        let compile_cmd = match &runtime.compile_command {
            Some(cmd) => cmd,
            None => return Ok(CompileOutcome::clean()),
        };

        debug!(?compile_cmd, "Compiling submission");

        let cmd = CommandSpec::from_vec(compile_cmd).with_work_dir(work_dir);
        let result = self.leased_run(&cmd, &self.compile_limits, None).await?;

        if result.is_success() {
            return Ok(CompileOutcome::clean());
        }

        let message = if !result.stderr.is_empty() {
            result.stderr
        } else if !result.stdout.is_empty() {
            result.stdout
        } else {
            match result.status {
                RunStatus::TimeLimitExceeded => "Compilation timed out".to_string(),
                RunStatus::Signaled(_) => "Compiler crashed".to_string(),
                RunStatus::MemoryLimitExceeded => "Compiler ran out of memory".to_string(),
                RunStatus::Exited(code) => {
                    format!("Compilation failed with exit code {}", code)
                }
            }
        };

        Ok(CompileOutcome {
            success: false,
            output: Some(message),
        })
    }

    /// Run one test case against the compiled artifact and classify the
    /// outcome. Deterministic failures land in the `CaseVerdict`; only
    /// infrastructure failures surface as `Err`.
    pub async fn run_case(
        &self,
        work_dir: &Path,
        runtime: &LanguageRuntime,
        test_case: &TestCase,
        limits: &RunLimits,
        comparison: Comparison,
        index: usize,
    ) -> Result<CaseOutcome, EngineError> {
        let cmd = CommandSpec::from_vec(&runtime.run_command).with_work_dir(work_dir);
        let result = self
            .leased_run(&cmd, limits, Some(&test_case.input))
            .await?;

        let verdict = match result.status {
            RunStatus::Exited(0) => {
                if compare_output(&result.stdout, &test_case.expected_output, comparison) {
                    CaseVerdict::Passed
                } else {
                    CaseVerdict::WrongAnswer {
                        expected: test_case.expected_output.clone(),
                        actual: result.stdout.clone(),
                    }
                }
            }
            RunStatus::Exited(_) | RunStatus::Signaled(_) => CaseVerdict::RuntimeError,
            RunStatus::TimeLimitExceeded => CaseVerdict::TimeLimitExceeded,
            RunStatus::MemoryLimitExceeded => CaseVerdict::MemoryLimitExceeded,
        };

        Ok(CaseOutcome {
            index,
            verdict,
            time_ms: result.time_ms,
            memory_kb: result.memory_kb,
            exit_code: result.exit_code(),
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    /// Run an uncompared execution (trial runs with custom input)
    pub async fn run_raw(
        &self,
        work_dir: &Path,
        runtime: &LanguageRuntime,
        stdin: Option<&str>,
        limits: &RunLimits,
    ) -> Result<RunOutcome, EngineError> {
        let cmd = CommandSpec::from_vec(&runtime.run_command).with_work_dir(work_dir);
        self.leased_run(&cmd, limits, stdin).await
    }

    /// Acquire a lease, run, release. Retried under backoff for
    /// transient provisioning failures only.
    async fn leased_run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome, EngineError> {
        retry::with_backoff(self.backoff, "sandbox_run", || {
            let pool = Arc::clone(&self.pool);
            let runner = Arc::clone(&self.runner);
            let acquire_timeout = self.acquire_timeout;
            let cmd = cmd.clone();
            let limits = *limits;
            let stdin = stdin.map(|s| s.to_string());
            async move {
                let lease = pool.acquire(acquire_timeout).await?;
                let result = runner.run(&cmd, &limits, stdin.as_deref()).await;
                pool.release(&lease).await;
                result
            }
        })
        .await
    }
}
