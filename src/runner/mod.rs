//! Runner module - Execution abstraction layer
//!
//! Provides a unified interface for running one program against one input
//! under resource limits. The runner does NOT:
//! - Compare outputs or determine verdicts
//! - Cache compiled artifacts
//! - Know about submissions or test cases

#[cfg(test)]
pub mod fake;
pub mod process;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::EngineError;

/// Command specification for execution
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        let args: Vec<String> = iter.cloned().collect();
        Self {
            program,
            args,
            work_dir: None,
        }
    }
}

/// Resource limits for a single run
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// Wall-clock time limit in milliseconds
    pub time_ms: u32,
    /// Memory limit in MB
    pub memory_mb: u32,
}

impl RunLimits {
    pub fn new(time_ms: u32, memory_mb: u32) -> Self {
        Self { time_ms, memory_mb }
    }

    pub fn memory_kb(&self) -> u32 {
        self.memory_mb.saturating_mul(1024)
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            time_ms: 5_000,
            memory_mb: 128,
        }
    }
}

/// Raw execution status (no verdict interpretation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Program exited normally with the given exit code
    Exited(i32),
    /// Killed by signal
    Signaled(i32),
    /// Wall-clock watchdog fired
    TimeLimitExceeded,
    /// Memory ceiling exceeded
    MemoryLimitExceeded,
}

impl RunStatus {
    /// Whether the program completed with exit code 0
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }
}

/// Outcome of running one program against one input
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Execution status
    pub status: RunStatus,
    /// Wall-clock time used in milliseconds
    pub time_ms: u32,
    /// Peak memory estimate in KB
    pub memory_kb: u32,
    /// Captured stdout (bounded)
    pub stdout: String,
    /// Captured stderr (bounded)
    pub stderr: String,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Exit code from status (-1 if not applicable)
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Exited(code) => code,
            _ => -1,
        }
    }
}

/// Runner trait for executing programs under limits
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command with the given limits and optional stdin content.
    ///
    /// Deterministic program failures (non-zero exit, signals, limit
    /// violations) are reported through `RunOutcome`; `Err` is reserved
    /// for infrastructure failures.
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome, EngineError>;
}

pub use process::ProcessRunner;
