//! Process runner implementation
//!
//! Executes untrusted programs as rlimit-constrained children in their own
//! session, with a wall-clock watchdog that kills the whole process group
//! on expiry. Exit status and peak memory come from `wait4`, so every
//! reading belongs to the run that just finished.

use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};
use crate::error::EngineError;

/// Cap on captured stdout/stderr per run
const OUTPUT_CAP_BYTES: usize = 64 * 1024;

/// Fork ceiling per run; RLIMIT_NPROC counts per-UID, so this stays well
/// above the host's baseline while still stopping fork bombs
const MAX_PROCESSES: u64 = 4096;

/// Max file size a run may create (256 MB)
const MAX_FILE_BYTES: u64 = 256 * 1024 * 1024;

/// Address-space headroom above the memory ceiling. The verdict compares
/// the measured peak RSS against the ceiling itself; the rlimit sits
/// higher so runtime mappings that never become resident do not eat the
/// budget, and a program that blows the ceiling shows a reading above it.
const ADDRESS_SPACE_HEADROOM_BYTES: u64 = 64 * 1024 * 1024;

/// Bound on draining the output readers once the child is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runner that executes programs as resource-limited child processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome, EngineError> {
        if cmd.program.is_empty() {
            return Err(EngineError::Internal("empty command".into()));
        }

        debug!(program = %cmd.program, time_ms = limits.time_ms, memory_mb = limits.memory_mb,
            "Spawning limited process");

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &cmd.work_dir {
            command.current_dir(dir);
        }

        let memory_bytes = limits.memory_mb as u64 * 1024 * 1024;
        let address_space_bytes = memory_bytes.saturating_add(ADDRESS_SPACE_HEADROOM_BYTES);
        // CPU limit backs up the wall-clock watchdog; one extra second of
        // headroom so the watchdog fires first on a busy loop.
        let cpu_secs = (limits.time_ms as u64).div_ceil(1000) + 1;
        unsafe {
            command.pre_exec(move || {
                // Own session: the watchdog kills the whole tree by group id
                nix::unistd::setsid().map_err(errno_io)?;
                apply_rlimits(address_space_bytes, cpu_secs)
            });
        }

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", cmd.program, e)))?;
        let pid = child.id() as i32;

        // Stdin writer, output readers, and the wait all run concurrently;
        // a full pipe in either direction cannot stall the watchdog.
        let _stdin_task = spawn_stdin_writer(child.stdin.take(), stdin.map(|s| s.as_bytes().to_vec()));
        let stdout_task = child
            .stdout
            .take()
            .map(|r| tokio::task::spawn_blocking(move || read_capped(r, OUTPUT_CAP_BYTES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|r| tokio::task::spawn_blocking(move || read_capped(r, OUTPUT_CAP_BYTES)));

        let mut wait_task = tokio::task::spawn_blocking(move || wait_for_exit(pid));
        let wall_limit = Duration::from_millis(limits.time_ms as u64);
        let (waited, timed_out) = match tokio::time::timeout(wall_limit, &mut wait_task).await {
            Ok(joined) => (joined, false),
            Err(_) => {
                // Kill the session group; forked descendants die with it,
                // which also closes their inherited pipe write ends
                let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
                (wait_task.await, true)
            }
        };
        let (raw_status, memory_kb) = match waited {
            Ok(Ok(reaped)) => reaped,
            Ok(Err(e)) => return Err(EngineError::Spawn(e.to_string())),
            Err(e) => return Err(EngineError::Internal(format!("wait task failed: {}", e))),
        };
        let elapsed_ms = started.elapsed().as_millis().min(u32::MAX as u128) as u32;

        let stdout = collect_output(stdout_task).await;
        let stderr = collect_output(stderr_task).await;

        let (exit_code, signal) = decode_status(raw_status);
        let status = classify(exit_code, signal, timed_out, memory_kb, limits.memory_kb());

        debug!(?status, time_ms = elapsed_ms, memory_kb, "Process finished");

        Ok(RunOutcome {
            status,
            time_ms: elapsed_ms,
            memory_kb,
            stdout,
            stderr,
        })
    }
}

/// Applied in the child between fork and exec
fn apply_rlimits(address_space_bytes: u64, cpu_secs: u64) -> std::io::Result<()> {
    let set = |resource: Resource, limit: u64| -> std::io::Result<()> {
        setrlimit(resource, limit, limit).map_err(errno_io)
    };

    set(Resource::RLIMIT_AS, address_space_bytes)?;
    set(Resource::RLIMIT_CPU, cpu_secs)?;
    set(Resource::RLIMIT_NPROC, MAX_PROCESSES)?;
    set(Resource::RLIMIT_FSIZE, MAX_FILE_BYTES)?;
    set(Resource::RLIMIT_CORE, 0)?;
    Ok(())
}

fn errno_io(errno: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(errno as i32)
}

/// Reap the child and read its own resource usage. The rusage belongs to
/// this pid alone, never to other children the engine has run.
fn wait_for_exit(pid: i32) -> std::io::Result<(i32, u32)> {
    let mut status: nix::libc::c_int = 0;
    let mut usage: nix::libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { nix::libc::wait4(pid, &mut status, 0, &mut usage) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // ru_maxrss is in KB on Linux
    Ok((status, usage.ru_maxrss.max(0) as u32))
}

fn decode_status(raw: i32) -> (Option<i32>, Option<i32>) {
    if nix::libc::WIFEXITED(raw) {
        (Some(nix::libc::WEXITSTATUS(raw)), None)
    } else if nix::libc::WIFSIGNALED(raw) {
        (None, Some(nix::libc::WTERMSIG(raw)))
    } else {
        (None, None)
    }
}

/// Classify the raw process exit into a `RunStatus`.
///
/// The timeout watchdog takes precedence. The memory reading is this
/// run's own peak RSS; at or above the ceiling the run is a memory
/// verdict regardless of how the program ended.
fn classify(
    exit_code: Option<i32>,
    signal: Option<i32>,
    timed_out: bool,
    memory_kb: u32,
    memory_limit_kb: u32,
) -> RunStatus {
    if timed_out {
        return RunStatus::TimeLimitExceeded;
    }
    if memory_limit_kb > 0 && memory_kb >= memory_limit_kb {
        return RunStatus::MemoryLimitExceeded;
    }

    match (exit_code, signal) {
        (Some(code), _) => RunStatus::Exited(code),
        (None, Some(sig)) => RunStatus::Signaled(sig),
        (None, None) => RunStatus::Signaled(0),
    }
}

fn spawn_stdin_writer(handle: Option<ChildStdin>, input: Option<Vec<u8>>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        if let (Some(mut handle), Some(input)) = (handle, input) {
            // The child may die without draining; EPIPE is its problem
            let _ = handle.write_all(&input);
        }
        // Dropping the handle closes the pipe so line readers see EOF
    })
}

/// Read up to `cap` bytes, draining the rest so the child never blocks on
/// a full pipe.
fn read_capped<R: Read>(mut reader: R, cap: usize) -> Vec<u8> {
    let mut chunk = [0u8; 8192];
    let mut out = Vec::new();
    loop {
        match reader.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if out.len() < cap {
                    let take = (cap - out.len()).min(n);
                    out.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
    out
}

async fn collect_output(task: Option<JoinHandle<Vec<u8>>>) -> String {
    match task {
        Some(handle) => match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, handle).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).to_string(),
            _ => String::new(),
        },
        None => String::new(),
    }
}
