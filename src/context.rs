//! The framework collaborator this crate is built against.
//!
//! `MessageContext` stands in for `spctx_t` and the `sp_*` functions of the
//! original implementation: it is implemented by the surrounding SMTP proxy
//! framework (out of scope here) and borrowed mutably by the dispatcher for
//! the lifetime of one DATA-phase dispatch.

use std::path::Path;

/// An instruction to the framework (e.g. `fail_data`) itself failed.
///
/// This is error kind 6 in the design doc: distinct from a filter rejection
/// or a resource error, because it means the connection itself is in a bad
/// state and the caller should tear it down rather than just move on to the
/// next message.
#[derive(Debug, thiserror::Error)]
#[error("framework I/O failed")]
pub struct FrameworkError;

/// Per-message state and callbacks owned by the surrounding proxy
/// framework. See `SPEC_FULL.md` §6 for the full contract.
pub trait MessageContext {
    /// Envelope MAIL FROM argument, if the client supplied one.
    fn sender(&self) -> Option<&str>;

    /// Newline-separated RCPT TO arguments, verbatim (no per-recipient
    /// trimming — see the "open question" resolved in the design doc).
    fn recipients(&self) -> Option<&str>;

    /// Client's HELO/EHLO name, if any.
    fn helo(&self) -> Option<&str>;

    /// Textual peer address; IPv6 addresses are detected by the presence of
    /// a colon, matching the original's heuristic.
    fn peer_name(&self) -> &str;

    /// Path to the on-disk spool of the cached message body.
    fn cache_path(&self) -> &Path;

    /// Environment the framework wants exported to a forked filter child
    /// (sender, recipients, client info, cache path, ...). Read once, before
    /// forking; never invoked from inside the child.
    fn child_environment(&self) -> Vec<(String, String)>;

    /// Append a structured `key=value` field to the per-message log line.
    fn add_log(&mut self, key: &str, value: &str);

    /// Fail the pending pre-DATA SMTP command. `None` asks for the
    /// framework's default reply.
    fn fail_pre(&mut self, reply: Option<&str>) -> Result<(), FrameworkError>;

    /// Fail the pending DATA command. `None` asks for the framework's
    /// default reply.
    fn fail_data(&mut self, reply: Option<&str>) -> Result<(), FrameworkError>;

    /// Answer the client's DATA command with `354`, prompting it to stream
    /// the body.
    fn start_data(&mut self) -> Result<(), FrameworkError>;

    /// Spool the incoming body to the temp directory.
    fn cache_data(&mut self) -> Result<(), FrameworkError>;

    /// Pull the next chunk of the cached body. `Ok(0)` means EOF.
    fn read_data(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Append bytes to the outgoing (filtered) body cache. `None` closes
    /// that cache, signaling that no more bytes are coming.
    fn write_data(&mut self, chunk: Option<&[u8]>) -> Result<(), FrameworkError>;

    /// Commit delivery to the real destination, optionally inserting
    /// `header`.
    fn done_data(&mut self, header: Option<&str>) -> Result<(), FrameworkError>;

    /// True once the surrounding process has started shutting down.
    fn is_quit(&self) -> bool;
}
