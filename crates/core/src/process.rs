//! Downstream process management.
//!
//! The sender launches the receiver as an independent process in its own
//! process group and, on shutdown, signals the whole group. A child that
//! has already exited is not an error.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::error::{Result, UdpcastError};

/// Result of stopping a downstream process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The termination signal was delivered.
    Signalled,
    /// Nothing was left to signal.
    AlreadyExited,
}

/// A running downstream task that must be stopped on parent shutdown.
pub trait Downstream {
    fn id(&self) -> u32;

    /// Request termination. Calling this more than once is harmless.
    fn stop(&mut self) -> Result<StopOutcome>;
}

/// Starts a [`Downstream`].
pub trait Launcher {
    fn launch(&mut self) -> Result<Box<dyn Downstream>>;
}

/// An owned child process running in its own process group.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    stopped: Option<StopOutcome>,
}

impl ChildProcess {
    /// Spawn `command` detached from our stdin, as leader of a new process group.
    pub fn spawn(mut command: Command) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command.stdin(Stdio::null());

        let child = command
            .spawn()
            .map_err(|e| UdpcastError::Launch(format!("{:?}: {e}", command.get_program())))?;
        tracing::info!(pid = child.id(), "downstream process started");

        Ok(Self {
            child,
            stopped: None,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit check; reaps the child if it has exited.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Send SIGTERM to the child's process group.
    ///
    /// A child that already exited is reaped first: an unreaped child still
    /// belongs to its group, so signalling it would report success.
    pub fn stop(&mut self) -> Result<StopOutcome> {
        if let Some(outcome) = self.stopped {
            return Ok(outcome);
        }

        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!(pid = self.id(), %status, "downstream process already exited");
            self.stopped = Some(StopOutcome::AlreadyExited);
            return Ok(StopOutcome::AlreadyExited);
        }

        let outcome = self.signal()?;
        self.stopped = Some(outcome);

        match self.child.try_wait() {
            Ok(Some(status)) => tracing::debug!(pid = self.id(), %status, "downstream process reaped"),
            Ok(None) => {}
            Err(e) => tracing::debug!(pid = self.id(), error = %e, "could not poll downstream process"),
        }
        Ok(outcome)
    }

    #[cfg(unix)]
    fn signal(&mut self) -> Result<StopOutcome> {
        // process_group(0) makes the child its own group leader.
        let pgid = self.child.id() as libc::pid_t;
        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(pgid, libc::SIGTERM) };
        if rc == 0 {
            return Ok(StopOutcome::Signalled);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(StopOutcome::AlreadyExited)
        } else {
            Err(UdpcastError::Signal(err))
        }
    }

    #[cfg(not(unix))]
    fn signal(&mut self) -> Result<StopOutcome> {
        match self.child.kill() {
            Ok(()) => Ok(StopOutcome::Signalled),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(StopOutcome::AlreadyExited),
            Err(e) => Err(UdpcastError::Signal(e)),
        }
    }
}

impl Downstream for ChildProcess {
    fn id(&self) -> u32 {
        ChildProcess::id(self)
    }

    fn stop(&mut self) -> Result<StopOutcome> {
        ChildProcess::stop(self)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.stopped.is_none() {
            if let Err(e) = self.stop() {
                tracing::warn!(pid = self.id(), error = %e, "failed to stop downstream process");
            }
        }
    }
}

/// Launches a fixed program with fixed arguments.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl Launcher for CommandLauncher {
    fn launch(&mut self) -> Result<Box<dyn Downstream>> {
        Ok(Box::new(ChildProcess::spawn(self.command())?))
    }
}
