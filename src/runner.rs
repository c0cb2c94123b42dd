//! Blocking execution of resolved invocations.
//!
//! All external commands go through a [`CommandRunner`]. [`SystemRunner`]
//! spawns real processes with process-group isolation and tracks the one
//! running in the global [`ChildSlot`]; tests swap in a runner that records
//! invocations instead.

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, info, warn};

use crate::error::{HookError, Result};
use crate::process_guard::{ChildSlot, CommandProcessGroup};
use crate::toolchain::Invocation;

/// Exit status of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
    /// Captured stdout; empty unless the invocation asked for capture
    pub stdout: Vec<u8>,
}

impl CommandOutcome {
    /// Outcome of a command that exited with `code`
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    pub fn from_status(status: ExitStatus, stdout: Vec<u8>) -> Self {
        Self {
            exit_code: status.code(),
            signal: status.signal(),
            stdout,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Status to propagate as the hook's own exit code.
    ///
    /// Signal deaths map to 128 + signal, like a shell reports them.
    pub fn status_code(&self) -> i32 {
        match (self.exit_code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 1,
        }
    }

    /// Turn a non-zero exit into [`HookError::CommandFailed`]
    pub fn ensure_success(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(HookError::CommandFailed {
                command: command.to_string(),
                code: self.status_code(),
            })
        }
    }
}

/// Executes invocations synchronously, one at a time.
pub trait CommandRunner {
    /// Run `invocation` to completion and report how it exited.
    ///
    /// A non-zero exit is not an error at this level; only failing to start
    /// or wait for the process is.
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutcome>;
}

/// Runs invocations as real child processes.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutcome> {
        debug!(
            program = %invocation.program,
            args = ?invocation.args,
            cwd = %invocation.cwd.display(),
            explicit_env = invocation.env.is_some(),
            "spawning command"
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .in_new_process_group();

        if invocation.capture_stdout {
            cmd.stdout(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit());
        }

        if let Some(env) = &invocation.env {
            cmd.env_clear().envs(env);
        }

        let child = cmd.spawn().map_err(|source| HookError::Spawn {
            command: invocation.display.clone(),
            source,
        })?;
        let ticket = ChildSlot::global().track(child.id());
        let output = child.wait_with_output();
        drop(ticket);

        let output = output?;
        let outcome = CommandOutcome::from_status(output.status, output.stdout);

        if outcome.success() {
            info!(command = %invocation, "command succeeded");
        } else {
            warn!(command = %invocation, code = outcome.status_code(), "command failed");
        }
        Ok(outcome)
    }
}
