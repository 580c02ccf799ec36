use crate::context::FrameworkError;

/// Errors that can abort a single dispatch.
///
/// Every variant here surfaces to the dispatcher as `status=FILTER-ERROR`
/// except [`Error::Framework`], which is distinguished so the caller can
/// tear down the whole connection instead of merely failing one message.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("system call failed (errno {0})")]
    Syscall(#[from] nix::Error),

    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("idle timeout waiting on filter command")]
    Timeout,

    #[error("filter command terminated abnormally")]
    AbnormalExit,

    #[error("shutdown requested mid-dispatch")]
    Cancelled,

    #[error("sender or recipients missing for smtp relay filter")]
    MissingEnvelope,

    #[error("downstream smtp peer sent an unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("framework callback failed")]
    Framework(#[from] FrameworkError),
}

impl Error {
    /// Best-effort classification, mirroring the taxonomy in the design doc.
    pub fn is_framework_failure(&self) -> bool {
        matches!(self, Error::Framework(_))
    }
}
