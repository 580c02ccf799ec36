//! Waiting for, and if necessary killing, a filter subprocess (§4.4).
//!
//! Grounded on the original's `wait_process`/`kill_process` pair, plus the
//! teacher's `reap_child`/`reap_children` opportunistic-reap idiom from
//! `linux::zygote::main_loop`.

use crate::Error;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::thread::sleep;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Opportunistically reaps any already-dead, unrelated children (stragglers
/// from a prior dispatch that this process never got around to waiting
/// on). Called at the top of every dispatch, matching the original's
/// `while(waitpid(-1, &r, WNOHANG) > 0);` sweep.
pub(crate) fn reap_stragglers() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

/// Polls for `pid` to exit, for up to `timeout`, sleeping `POLL_INTERVAL`
/// between attempts.
///
/// Returns `Err(Error::Timeout)` if the budget runs out with the process
/// still alive. A process that turns out to already be gone (caught by a
/// stray `waitpid(-1)` elsewhere) is reported as a plain zero exit, mirroring
/// the original leaving `status` at its zero-initialized value in that case.
fn wait_process(pid: Pid, timeout: Duration) -> Result<WaitStatus, Error> {
    let poll_ms = POLL_INTERVAL.as_millis().max(1) as u64;
    let mut budget = (timeout.as_millis() as u64 / poll_ms).max(1);

    while budget > 0 {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                // Linux can report this even after the process has already
                // been reaped by a `waitpid(-1)` sweep elsewhere; double
                // check it still exists before continuing to poll.
                if kill(pid, None::<Signal>).is_err() {
                    return Ok(WaitStatus::Exited(pid, 0));
                }
            }
            Ok(status) => return Ok(status),
            Err(nix::Error::Sys(Errno::ECHILD)) | Err(nix::Error::Sys(Errno::ESRCH)) => {
                return Ok(WaitStatus::Exited(pid, 0))
            }
            Err(e) => return Err(e.into()),
        }

        sleep(POLL_INTERVAL);
        budget -= 1;
    }

    Err(Error::Timeout)
}

/// Sends `SIGTERM`, waits up to `timeout` for `pid` to exit, and escalates
/// to `SIGKILL` if it hasn't. Always waits again after the `SIGKILL`: the
/// original implementation returns immediately after sending `SIGKILL` and
/// relies on a future dispatch's opportunistic [`reap_stragglers`] sweep to
/// pick up the corpse, but leaving a zombie behind for an indeterminate
/// amount of time is worth closing here instead.
fn kill_process(pid: Pid, timeout: Duration) -> Result<(), Error> {
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        if matches!(e, nix::Error::Sys(Errno::ESRCH)) {
            return Ok(());
        }
        return Err(e.into());
    }

    if wait_process(pid, timeout).is_ok() {
        return Ok(());
    }

    if let Err(e) = kill(pid, Signal::SIGKILL) {
        if matches!(e, nix::Error::Sys(Errno::ESRCH)) {
            return Ok(());
        }
        return Err(e.into());
    }

    tracing::error!(pid = pid.as_raw(), "filter process wouldn't quit, forced termination");

    // SIGKILL cannot be blocked or ignored; a generous fixed wait is enough
    // to guarantee the process is gone before we return, so no dispatch
    // ever hands back an unreaped child.
    let _ = wait_process(pid, Duration::from_secs(5));
    Ok(())
}

/// RAII guard around a forked filter's pid: drops to [`kill_process`] if
/// the caller never explicitly reaped it (a panic, an early `?` return, a
/// framework callback failure mid-dispatch).
pub(crate) struct ChildGuard {
    pid: Pid,
    timeout: Duration,
    reaped: bool,
}

impl ChildGuard {
    pub fn new(pid: Pid, timeout: Duration) -> Self {
        ChildGuard {
            pid,
            timeout,
            reaped: false,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Waits for natural exit within the configured timeout. On timeout,
    /// forces termination and still reports the timeout to the caller, the
    /// way the original logs "timeout waiting" and bails before ever
    /// inspecting an exit status.
    pub fn wait(&mut self) -> Result<WaitStatus, Error> {
        self.reaped = true;
        match wait_process(self.pid, self.timeout) {
            Ok(status) => Ok(status),
            Err(Error::Timeout) => {
                kill_process(self.pid, self.timeout)?;
                Err(Error::Timeout)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = kill_process(self.pid, self.timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{signal, SigHandler};
    use nix::unistd::{fork, ForkResult};

    fn spawn_exit(code: i32) -> Pid {
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => std::process::exit(code),
            ForkResult::Parent { child } => child,
        }
    }

    #[test]
    fn wait_process_reports_the_exit_code() {
        let pid = spawn_exit(7);
        let status = wait_process(pid, Duration::from_secs(5)).unwrap();
        assert_eq!(status, WaitStatus::Exited(pid, 7));
    }

    #[test]
    fn wait_process_times_out_on_a_long_lived_child() {
        let pid = match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                std::thread::sleep(Duration::from_secs(30));
                std::process::exit(0);
            }
            ForkResult::Parent { child } => child,
        };

        let result = wait_process(pid, Duration::from_millis(100));
        assert!(matches!(result, Err(Error::Timeout)));

        let _ = kill(pid, Signal::SIGKILL);
        let _ = waitpid(pid, None);
    }

    #[test]
    fn kill_process_escalates_to_sigkill_when_sigterm_is_ignored() {
        let pid = match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                unsafe {
                    let _ = signal(Signal::SIGTERM, SigHandler::SigIgn);
                }
                loop {
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
            ForkResult::Parent { child } => child,
        };

        kill_process(pid, Duration::from_millis(200)).unwrap();

        assert!(kill(pid, None::<Signal>).is_err(), "child should be gone");
    }

    #[test]
    fn kill_process_on_an_already_reaped_pid_is_idempotent_success() {
        let pid = spawn_exit(0);
        assert_eq!(
            wait_process(pid, Duration::from_secs(5)).unwrap(),
            WaitStatus::Exited(pid, 0)
        );

        // The pid is gone now; asking to kill it again must not error.
        kill_process(pid, Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn reap_stragglers_does_not_panic_on_an_empty_process_table() {
        reap_stragglers();
        reap_stragglers();
    }
}
