//! Forking and plumbing a filter subprocess (§4.2).
//!
//! Grounded on the teacher's `linux::zygote::spawn_job` / `do_exec` pair:
//! pipes are allocated in the parent before forking so that an allocation
//! failure never leaves a half-started child behind, and the child side
//! never returns out of `run_child` — every exit path either execs or
//! kills itself.

use super::fd::{self, Fd};
use super::{CaptureStreams, ChildHandle};
use crate::Error;
use nix::sys::resource::{getrlimit, Resource};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{execv, fork, getpid, ForkResult};
use std::ffi::CString;
use std::time::Duration;

pub(crate) fn fork_filter(
    command: &str,
    env: &[(String, String)],
    capture: CaptureStreams,
) -> Result<ChildHandle, Error> {
    let stdin_pipe = if capture.stdin { Some(fd::pipe()?) } else { None };
    let stdout_pipe = if capture.stdout { Some(fd::pipe()?) } else { None };
    let stderr_pipe = if capture.stderr { Some(fd::pipe()?) } else { None };

    match unsafe { fork()? } {
        ForkResult::Child => run_child(command, env, stdin_pipe, stdout_pipe, stderr_pipe),
        ForkResult::Parent { child } => {
            // Drop the child-side end of each pipe we created; the other
            // end is what the parent keeps talking on.
            let stdin = stdin_pipe.map(|(_read, write)| write);
            let stdout = stdout_pipe.map(|(read, _write)| read);
            let stderr = stderr_pipe.map(|(read, _write)| read);

            for h in [stdin.as_ref(), stdout.as_ref(), stderr.as_ref()]
                .into_iter()
                .flatten()
            {
                h.set_nonblocking()?;
            }

            tracing::debug!(pid = child.as_raw(), command, "forked filter command");
            Ok(ChildHandle {
                pid: child,
                stdin,
                stdout,
                stderr,
            })
        }
    }
}

/// Runs in the forked child only. Never returns: either it execs the
/// filter command, or it kills itself.
fn run_child(
    command: &str,
    env: &[(String, String)],
    stdin_pipe: Option<(Fd, Fd)>,
    stdout_pipe: Option<(Fd, Fd)>,
    stderr_pipe: Option<(Fd, Fd)>,
) -> ! {
    if let Some((read, write)) = stdin_pipe {
        drop(write);
        if read.dup_onto(libc::STDIN_FILENO).is_err() {
            self_destruct();
        }
        drop(read);
    }
    if let Some((read, write)) = stdout_pipe {
        drop(read);
        if write.dup_onto(libc::STDOUT_FILENO).is_err() {
            self_destruct();
        }
        drop(write);
    }
    if let Some((read, write)) = stderr_pipe {
        drop(read);
        if write.dup_onto(libc::STDERR_FILENO).is_err() {
            self_destruct();
        }
        drop(write);
    }

    close_fds_from(3);

    for (key, value) in env {
        std::env::set_var(key, value);
    }

    let shell = CString::new("/bin/sh").expect("no interior nul");
    let flag = CString::new("-c").expect("no interior nul");
    let cmd = match CString::new(command) {
        Ok(c) => c,
        Err(_) => self_destruct(),
    };

    let _ = execv(&shell, &[shell.clone(), flag, cmd]);
    // execv only returns on failure.
    self_destruct();
}

/// Closes every descriptor from `start` up to the process' file descriptor
/// limit. Run right before exec so the filter never inherits anything it
/// wasn't explicitly handed on 0/1/2.
fn close_fds_from(start: i32) {
    let soft = getrlimit(Resource::RLIMIT_NOFILE)
        .map(|(soft, _hard)| soft)
        .unwrap_or(4096);
    let limit = if soft <= 0 || soft > 65536 { 65536 } else { soft as i32 };
    for raw in start..limit {
        let _ = nix::unistd::close(raw);
    }
}

/// Terminates the current process unconditionally. `SIGKILL` cannot be
/// caught or blocked, so the loop only exists to cover the window before
/// the signal is delivered.
fn self_destruct() -> ! {
    loop {
        let _ = kill(getpid(), Signal::SIGKILL);
        std::thread::sleep(Duration::from_secs(1));
    }
}
