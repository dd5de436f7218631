//! Process execution: the single seam through which every stage runs.
//!
//! [`ProcessRunner`] takes a fully built [`StageInvocation`] and reports
//! how the process ended. [`SystemRunner`] spawns real processes;
//! [`DryRunRunner`] only records what would have been run.

use std::fmt;
use std::process::{Command, ExitStatus};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::stage::StageInvocation;

/// How an external stage process ended.
///
/// `code` is `None` when the process was terminated by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
}

impl StageStatus {
    /// A successful exit.
    pub const SUCCESS: Self = Self { code: Some(0) };

    /// Status for a process that exited with `code`.
    #[must_use]
    pub const fn exited(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// Returns `true` for a zero exit code.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self.code, Some(0))
    }
}

impl From<ExitStatus> for StageStatus {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("termination by signal"),
        }
    }
}

/// Runs external stage processes.
///
/// Implementations block until the process finishes. An `Err` means the
/// process could not be started at all; a started process always yields
/// a [`StageStatus`], successful or not.
pub trait ProcessRunner {
    /// Run `invocation` to completion.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while spawning or waiting on the
    /// process.
    fn run(&mut self, invocation: &StageInvocation) -> std::io::Result<StageStatus>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &mut R {
    fn run(&mut self, invocation: &StageInvocation) -> std::io::Result<StageStatus> {
        (**self).run(invocation)
    }
}

/// [`ProcessRunner`] backed by [`std::process::Command`].
///
/// Stage processes inherit stdin, stdout and stderr, so their own output
/// interleaves with the orchestrator's log.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&mut self, invocation: &StageInvocation) -> std::io::Result<StageStatus> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }
        Ok(command.status()?.into())
    }
}

/// [`ProcessRunner`] that records invocations instead of running them.
///
/// Every invocation succeeds.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner {
    invocations: Vec<StageInvocation>,
}

impl DryRunRunner {
    /// Create an empty dry-run recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            invocations: Vec::new(),
        }
    }

    /// Invocations seen so far, in order.
    #[must_use]
    pub fn invocations(&self) -> &[StageInvocation] {
        &self.invocations
    }

    /// Consume the recorder and return the invocations.
    #[must_use]
    pub fn into_invocations(self) -> Vec<StageInvocation> {
        self.invocations
    }
}

impl ProcessRunner for DryRunRunner {
    fn run(&mut self, invocation: &StageInvocation) -> std::io::Result<StageStatus> {
        info!(command = %invocation, "dry run");
        self.invocations.push(invocation.clone());
        Ok(StageStatus::SUCCESS)
    }
}
