//! The file filter's I/O pump (§4.4): the body is already fully spooled to
//! disk before the filter is started, so all that's left to pump is the
//! filter's stderr.
//!
//! Grounded on the original's `process_file_command`, which is the same
//! `select` loop as the pipe pump with the stdin/stdout halves removed.

use super::{fork_filter, CaptureStreams, ChildGuard, FilterOutcome};
use crate::{Error, MessageContext, RejectReason};
use nix::errno::Errno;
use nix::sys::select::{select, FdSet};
use nix::sys::time::TimeVal;
use nix::sys::wait::WaitStatus;
use std::time::Duration;

const CHUNK: usize = 1024;

pub fn run_file_filter(
    ctx: &mut dyn MessageContext,
    command: &str,
    timeout: Duration,
    header: Option<&str>,
) -> Result<FilterOutcome, Error> {
    ctx.cache_data()?;

    let env = ctx.child_environment();
    let child = fork_filter(command, &env, CaptureStreams::file_mode())?;
    let mut guard = ChildGuard::new(child.pid, timeout);
    tracing::debug!(pid = guard.pid().as_raw(), command, "executing file filter");

    let mut stderr = child.stderr;
    let mut reason = RejectReason::new();
    let mut buf = [0u8; CHUNK];

    loop {
        let raw = match stderr.as_ref() {
            Some(fd) => fd.as_raw(),
            None => break,
        };

        let mut rfds = FdSet::new();
        rfds.insert(raw);
        let mut tv = TimeVal::new(timeout.as_secs() as i64, timeout.subsec_micros() as i64);

        let ready = select(raw + 1, Some(&mut rfds), None, None, Some(&mut tv))?;
        if ready == 0 {
            tracing::warn!("timeout while listening to filter command");
            return Err(Error::Timeout);
        }

        match stderr.as_ref().unwrap().read(&mut buf) {
            Ok(0) => stderr = None,
            Ok(n) => reason.fold(&buf[..n]),
            Err(nix::Error::Sys(Errno::EAGAIN)) | Err(nix::Error::Sys(Errno::EINTR)) => {}
            Err(e) => return Err(e.into()),
        }

        if ctx.is_quit() {
            return Err(Error::Cancelled);
        }
    }

    match guard.wait()? {
        WaitStatus::Exited(_, 0) => {
            ctx.done_data(header)?;
            Ok(FilterOutcome::Filtered)
        }
        WaitStatus::Exited(_, code) => {
            tracing::debug!(code, "filter exit code");
            Ok(FilterOutcome::Rejected(reason.finalize()))
        }
        _ => Err(Error::AbnormalExit),
    }
}
