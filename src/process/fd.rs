//! An owned, non-blocking-capable file descriptor.
//!
//! Modeled on the teacher crate's `linux::fd::Fd`: a thin RAII wrapper so
//! that every exit path — success, an early `?` return, or a panic unwind —
//! closes whatever was opened, instead of relying on a manually-written
//! `cleanup:` block.

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{close, dup2, read, write};
use std::os::unix::io::RawFd;

#[derive(Debug)]
pub struct Fd(RawFd);

impl Fd {
    pub fn new(raw: RawFd) -> Self {
        Fd(raw)
    }

    pub fn as_raw(&self) -> RawFd {
        self.0
    }

    /// Leaks the descriptor, returning the raw value without closing it.
    /// Used when handing a descriptor off to become a child's stdio, where
    /// ownership genuinely transfers to `dup2` + a subsequent `close`.
    pub fn into_raw(self) -> RawFd {
        let raw = self.0;
        std::mem::forget(self);
        raw
    }

    pub fn set_nonblocking(&self) -> nix::Result<()> {
        let flags = fcntl(self.0, FcntlArg::F_GETFL)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(self.0, FcntlArg::F_SETFL(flags))?;
        Ok(())
    }

    pub fn read(&self, buf: &mut [u8]) -> nix::Result<usize> {
        read(self.0, buf)
    }

    pub fn write(&self, buf: &[u8]) -> nix::Result<usize> {
        write(self.0, buf)
    }

    /// Duplicates this descriptor onto `target` (stdin/stdout/stderr in
    /// practice), closing `target` first if it was already open.
    pub fn dup_onto(&self, target: RawFd) -> nix::Result<()> {
        dup2(self.0, target).map(drop)
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        let _ = close(self.0);
    }
}

/// Creates a `O_CLOEXEC` pipe, returning `(read_end, write_end)`.
pub fn pipe() -> nix::Result<(Fd, Fd)> {
    let (r, w) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
    Ok((Fd::new(r), Fd::new(w)))
}
