//! Scripted runner for tests: replays a queue of canned outcomes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};
use crate::error::EngineError;

pub struct ScriptedRunner {
    script: Mutex<VecDeque<Result<RunOutcome, EngineError>>>,
    stdin_log: Mutex<Vec<Option<String>>>,
    delay: Option<Duration>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<Result<RunOutcome, EngineError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            stdin_log: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Delay each run, to hold grading in flight during a test
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn outcome(status: RunStatus, stdout: &str, stderr: &str) -> RunOutcome {
        RunOutcome {
            status,
            time_ms: 10,
            memory_kb: 1024,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.stdin_log.lock().unwrap().len()
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run(
        &self,
        _cmd: &CommandSpec,
        _limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome, EngineError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.stdin_log
            .lock()
            .unwrap()
            .push(stdin.map(|s| s.to_string()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::outcome(RunStatus::Exited(0), "", "")))
    }
}
