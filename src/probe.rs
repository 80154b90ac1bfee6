//! Runs the external process probe and turns whatever it does into a `Snapshot`.
//!
//! The adapter is fail-open: a probe that cannot be launched, hangs, exits
//! non-zero or prints garbage yields `Snapshot::default()`. Each failure is
//! logged with its kind and counted in [`ProbeStats`].

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;

use crate::error::ProbeError;
use crate::system::snapshot::Snapshot;

/// Anything that can produce one raw snapshot per call without failing.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Snapshot> + Send;
}

/// How to start the probe child process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ProbeCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The running executable's own `probe` subcommand.
    pub fn builtin() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("probe"))
    }
}

/// Outcome counters, one per failure kind.
#[derive(Debug, Default)]
pub struct ProbeStats {
    successes: AtomicU64,
    timeouts: AtomicU64,
    non_zero_exits: AtomicU64,
    malformed_outputs: AtomicU64,
    launch_failures: AtomicU64,
    io_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeCounters {
    pub successes: u64,
    pub timeouts: u64,
    pub non_zero_exits: u64,
    pub malformed_outputs: u64,
    pub launch_failures: u64,
    pub io_failures: u64,
}

impl ProbeCounters {
    pub fn failures(&self) -> u64 {
        self.timeouts
            + self.non_zero_exits
            + self.malformed_outputs
            + self.launch_failures
            + self.io_failures
    }
}

impl ProbeStats {
    fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, err: &ProbeError) {
        let counter = match err {
            ProbeError::Timeout(_) => &self.timeouts,
            ProbeError::NonZeroExit { .. } => &self.non_zero_exits,
            ProbeError::MalformedOutput(_) => &self.malformed_outputs,
            ProbeError::Launch { .. } => &self.launch_failures,
            ProbeError::Io(_) => &self.io_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> ProbeCounters {
        ProbeCounters {
            successes: self.successes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            non_zero_exits: self.non_zero_exits.load(Ordering::Relaxed),
            malformed_outputs: self.malformed_outputs.load(Ordering::Relaxed),
            launch_failures: self.launch_failures.load(Ordering::Relaxed),
            io_failures: self.io_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct ProbeAdapter {
    command: ProbeCommand,
    timeout: Duration,
    stats: Arc<ProbeStats>,
}

impl ProbeAdapter {
    pub fn new(command: ProbeCommand, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            stats: Arc::new(ProbeStats::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> Arc<ProbeStats> {
        Arc::clone(&self.stats)
    }

    /// Run the probe once. Never fails: any error becomes an empty snapshot.
    pub async fn fetch_snapshot(&self, timeout: Duration) -> Snapshot {
        let started = Instant::now();
        match self.run(timeout).await {
            Ok(snapshot) => {
                self.stats.record_success();
                tracing::trace!(
                    processes = snapshot.all_processes.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "probe succeeded"
                );
                snapshot
            }
            Err(err) => {
                self.stats.record_failure(&err);
                tracing::warn!(
                    kind = err.kind(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "probe failed, publishing empty snapshot: {err}"
                );
                Snapshot::default()
            }
        }
    }

    async fn run(&self, timeout: Duration) -> Result<Snapshot, ProbeError> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| ProbeError::Launch {
            program: self.command.program.display().to_string(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(timeout))??;

        if !output.status.success() {
            return Err(ProbeError::NonZeroExit {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(&output.stdout)
    }
}

impl SnapshotSource for ProbeAdapter {
    fn fetch(&self) -> impl Future<Output = Snapshot> + Send {
        self.fetch_snapshot(self.timeout)
    }
}

/// Parse the probe's complete stdout as exactly one snapshot document.
pub fn parse_probe_output(stdout: &[u8]) -> Result<Snapshot, ProbeError> {
    Ok(serde_json::from_slice(stdout)?)
}
