/*!
 * Filter-dispatch engine for an SMTP transparent filtering proxy.
 *
 * This crate is the part of the proxy that runs once a message's DATA phase
 * has been cached to disk by the surrounding proxy framework: it forks and
 * plumbs a filter subprocess (or relays the message to a downstream SMTP
 * host), pumps bytes under a timeout, and translates the verdict into an
 * SMTP accept/reject decision.
 *
 * The surrounding framework (accepting the client connection, speaking the
 * client-side SMTP state machine, spooling the body to a cache file) is not
 * part of this crate. It is modeled as the [`MessageContext`] trait.
 */

mod config;
mod context;
mod dispatcher;
mod error;
mod process;
mod reason;
mod smtp_relay;

pub use config::{Config, ConfigError, FilterType};
pub use context::{FrameworkError, MessageContext};
pub use dispatcher::{Dispatcher, PreDataOutcome};
pub use error::Error;
pub use process::{CaptureStreams, FilterOutcome};
pub use reason::RejectReason;
