//! The pipe filter's I/O pump (§4.3): feeds the cached body to the filter's
//! stdin, spools its stdout as the replacement body, and folds its stderr
//! into a [`RejectReason`], all under one `select` loop.
//!
//! Grounded on the original's `process_pipe_command`, translated from its
//! fixed `fd_set`/`switch` structure into owned, non-blocking [`Fd`]s that
//! drop out of the select set as each stream reaches EOF.

use super::{fork_filter, CaptureStreams, ChildGuard, FilterOutcome};
use crate::{Error, MessageContext, RejectReason};
use nix::errno::Errno;
use nix::sys::select::{select, FdSet};
use nix::sys::time::TimeVal;
use nix::sys::wait::WaitStatus;
use std::time::Duration;

const CHUNK: usize = 1024;

pub fn run_pipe_filter(
    ctx: &mut dyn MessageContext,
    command: &str,
    timeout: Duration,
    header: Option<&str>,
) -> Result<FilterOutcome, Error> {
    let env = ctx.child_environment();
    let child = fork_filter(command, &env, CaptureStreams::pipe_mode())?;
    let mut guard = ChildGuard::new(child.pid, timeout);
    tracing::debug!(pid = guard.pid().as_raw(), command, "executing pipe filter");

    let mut stdin = child.stdin;
    let mut stdout = child.stdout;
    let mut stderr = child.stderr;
    let mut reason = RejectReason::new();

    // Opens the outgoing body cache even if the filter never writes to
    // stdout, matching the original's zero-length priming write.
    ctx.write_data(Some(&[]))?;

    let mut in_buf = [0u8; CHUNK];
    let mut in_start = 0usize;
    let mut in_len = 0usize;
    let mut out_buf = [0u8; CHUNK];
    let mut err_buf = [0u8; CHUNK];

    let (mut written, mut read) = (0u64, 0u64);

    while stdin.is_some() || stdout.is_some() || stderr.is_some() {
        let mut rfds = FdSet::new();
        let mut wfds = FdSet::new();
        let mut nfds = -1;

        if let Some(fd) = &stdin {
            wfds.insert(fd.as_raw());
            nfds = nfds.max(fd.as_raw());
        }
        if let Some(fd) = &stdout {
            rfds.insert(fd.as_raw());
            nfds = nfds.max(fd.as_raw());
        }
        if let Some(fd) = &stderr {
            rfds.insert(fd.as_raw());
            nfds = nfds.max(fd.as_raw());
        }

        let mut tv = TimeVal::new(timeout.as_secs() as i64, timeout.subsec_micros() as i64);
        let ready = select(nfds + 1, Some(&mut rfds), Some(&mut wfds), None, Some(&mut tv))?;
        if ready == 0 {
            tracing::warn!("timeout while listening to filter command");
            return Err(Error::Timeout);
        }

        let stdin_ready = stdin.as_ref().map_or(false, |fd| wfds.contains(fd.as_raw()));
        let stdout_ready = stdout.as_ref().map_or(false, |fd| rfds.contains(fd.as_raw()));
        let stderr_ready = stderr.as_ref().map_or(false, |fd| rfds.contains(fd.as_raw()));

        if stdin_ready {
            if in_len == 0 {
                match ctx.read_data(&mut in_buf)? {
                    0 => stdin = None,
                    n => {
                        in_start = 0;
                        in_len = n;
                    }
                }
            }

            if in_len > 0 {
                if let Some(fd) = stdin.as_ref() {
                    match fd.write(&in_buf[in_start..in_start + in_len]) {
                        Ok(n) => {
                            written += n as u64;
                            in_start += n;
                            in_len -= n;
                        }
                        Err(nix::Error::Sys(Errno::EPIPE)) => {
                            tracing::info!("filter command closed input early");
                            while ctx.read_data(&mut in_buf)? > 0 {}
                            in_len = 0;
                            stdin = None;
                        }
                        Err(nix::Error::Sys(Errno::EAGAIN)) | Err(nix::Error::Sys(Errno::EINTR)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        if stdout_ready {
            let outcome = stdout.as_ref().unwrap().read(&mut out_buf);
            match outcome {
                Ok(0) => stdout = None,
                Ok(n) => {
                    ctx.write_data(Some(&out_buf[..n]))?;
                    read += n as u64;
                }
                Err(nix::Error::Sys(Errno::EAGAIN)) | Err(nix::Error::Sys(Errno::EINTR)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if stderr_ready {
            let outcome = stderr.as_ref().unwrap().read(&mut err_buf);
            match outcome {
                Ok(0) => stderr = None,
                Ok(n) => reason.fold(&err_buf[..n]),
                Err(nix::Error::Sys(Errno::EAGAIN)) | Err(nix::Error::Sys(Errno::EINTR)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if ctx.is_quit() {
            return Err(Error::Cancelled);
        }
    }

    tracing::debug!(wrote = written, read, "filter pipe loop finished");

    ctx.write_data(None)?;

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
