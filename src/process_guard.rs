//! Cleanup of the running toolchain command when the hook is interrupted
//!
//! The hook runs one external command at a time. That command leads its own
//! process group (`bitbake` forks a server and workers into it) and gets
//! SIGTERM if the hook dies. When the hook itself receives SIGINT, SIGTERM or
//! SIGHUP, the signal thread takes down the current group and exits with
//! 128 + signal.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Time a group gets to exit after SIGTERM before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// PID of the command currently running, if any
#[derive(Debug, Default)]
pub struct ChildSlot {
    pid: Mutex<Option<u32>>,
}

impl ChildSlot {
    /// Slot shared by [`crate::runner::SystemRunner`] and the signal thread
    pub fn global() -> &'static ChildSlot {
        static SLOT: OnceLock<ChildSlot> = OnceLock::new();
        SLOT.get_or_init(ChildSlot::default)
    }

    /// Mark `pid` as running until the returned ticket is dropped
    pub fn track(&self, pid: u32) -> ChildTicket<'_> {
        if let Ok(mut slot) = self.pid.lock() {
            if let Some(previous) = slot.replace(pid) {
                warn!(previous, pid, "replacing a child that was still tracked");
            }
        }
        debug!(pid, "tracking child process");
        ChildTicket { slot: self, pid }
    }

    pub fn current(&self) -> Option<u32> {
        self.pid.lock().ok().and_then(|slot| *slot)
    }

    fn take(&self) -> Option<u32> {
        self.pid.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Clears its PID from the slot on drop
#[must_use = "the child is untracked as soon as the ticket is dropped"]
pub struct ChildTicket<'a> {
    slot: &'a ChildSlot,
    pid: u32,
}

impl Drop for ChildTicket<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.pid.lock() {
            if *slot == Some(self.pid) {
                *slot = None;
            }
        }
        debug!(pid = self.pid, "child process no longer tracked");
    }
}

/// Terminate the process group led by `pgid`.
///
/// Sends SIGTERM, then SIGKILL if the group is still there after `grace`.
/// Returns true when SIGKILL was needed.
pub fn terminate_group(pgid: u32, grace: Duration) -> bool {
    let group = Pid::from_raw(-(pgid as i32));
    if let Err(e) = signal::kill(group, Signal::SIGTERM) {
        debug!(pgid, error = %e, "process group already gone");
        return false;
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        // Fails with ESRCH once every member has exited and been reaped
        if signal::kill(group, None).is_err() {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    warn!(pgid, "process group ignored SIGTERM, sending SIGKILL");
    if let Err(e) = signal::kill(group, Signal::SIGKILL) {
        debug!(pgid, error = %e, "SIGKILL to process group failed");
    }
    true
}

/// Install the SIGINT/SIGTERM/SIGHUP handler thread. Call once at startup.
pub fn install_signal_handlers() -> std::io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "interrupted");
            if let Some(pid) = ChildSlot::global().take() {
                info!(pid, "terminating running command");
                terminate_group(pid, TERMINATE_GRACE);
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Process-group setup for spawned toolchain commands
pub trait CommandProcessGroup {
    /// Lead a new process group and receive SIGTERM when the hook dies
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid and prctl are async-signal-safe
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::from)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
