//! The entry point a framework calls into for each message (§4.1).
//!
//! Grounded on the original's `cb_check_pre` / `cb_check_data` callback
//! pair: `Dispatcher` holds the parsed [`Config`] and exposes the same two
//! phases, translated from void-returning callbacks with an implicit
//! global into explicit methods over a borrowed configuration.

use crate::config::{Config, FilterType};
use crate::context::MessageContext;
use crate::process::{self, FilterOutcome};
use crate::smtp_relay;
use crate::Error;

/// What the framework should do once a pre-DATA check has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreDataOutcome {
    /// The client's command was already answered; this message is done.
    Terminated,
    /// Nothing to do yet; proceed to the DATA phase as normal.
    Continue,
}

pub struct Dispatcher<'a> {
    config: &'a Config,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Dispatcher { config }
    }

    /// Runs before the client is allowed to send `MAIL`/`RCPT`. Only the
    /// `reject` strategy has anything to do at this point.
    pub fn check_pre(&self, ctx: &mut dyn MessageContext) -> Result<PreDataOutcome, Error> {
        if self.config.filter_type == FilterType::Reject {
            ctx.add_log("status=", "REJECTED");
            ctx.fail_pre(Some(&self.config.reject_response))?;
            return Ok(PreDataOutcome::Terminated);
        }

        Ok(PreDataOutcome::Continue)
    }

    /// Runs once the client has finished the `DATA` phase and the body is
    /// available to filter.
    pub fn check_data(&self, ctx: &mut dyn MessageContext) -> Result<(), Error> {
        if self.config.filter_type == FilterType::Reject {
            ctx.add_log("status=", "REJECTED");
            ctx.fail_data(Some(&self.config.reject_response))?;
            return Ok(());
        }

        ctx.start_data()?;

        let command = match &self.config.command {
            Some(command) => command,
            None => {
                tracing::warn!("no filter command specified, passing message through");
                ctx.cache_data()?;
                ctx.done_data(self.config.header.as_deref())?;
                return Ok(());
            }
        };

        process::reap_stragglers();

        let header = self.config.header.as_deref();
        let outcome = match self.config.filter_type {
            FilterType::Pipe => process::run_pipe_filter(ctx, command, self.config.timeout, header),
            FilterType::File => process::run_file_filter(ctx, command, self.config.timeout, header),
            FilterType::Smtp => smtp_relay::run_smtp_filter(ctx, command, header, self.config.timeout),
            FilterType::Reject => unreachable!("handled above"),
        };

        match outcome {
            Ok(FilterOutcome::Filtered) => {
                ctx.add_log("status=", "FILTERED");
                Ok(())
            }
            Ok(FilterOutcome::Rejected(reason)) => {
                ctx.fail_data(Some(&reason))?;
                ctx.add_log("status=", &reason);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "filter dispatch failed");
                ctx.fail_data(None)?;
                ctx.add_log("status=", "FILTER-ERROR");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FrameworkError;
    use std::path::{Path, PathBuf};

    /// Bare-bones stand-in for the framework, enough to exercise
    /// `check_pre` without forking anything.
    #[derive(Default)]
    struct StubContext {
        logs: Vec<(String, String)>,
        fail_pre_reply: Option<Option<String>>,
        path: PathBuf,
    }

    impl MessageContext for StubContext {
        fn sender(&self) -> Option<&str> {
            None
        }
        fn recipients(&self) -> Option<&str> {
            None
        }
        fn helo(&self) -> Option<&str> {
            None
        }
        fn peer_name(&self) -> &str {
            "127.0.0.1"
        }
        fn cache_path(&self) -> &Path {
            &self.path
        }
        fn child_environment(&self) -> Vec<(String, String)> {
            Vec::new()
        }
        fn add_log(&mut self, key: &str, value: &str) {
            self.logs.push((key.to_string(), value.to_string()));
        }
        fn fail_pre(&mut self, reply: Option<&str>) -> Result<(), FrameworkError> {
            self.fail_pre_reply = Some(reply.map(str::to_string));
            Ok(())
        }
        fn fail_data(&mut self, _reply: Option<&str>) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn start_data(&mut self) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn cache_data(&mut self) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn read_data(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
        fn write_data(&mut self, _chunk: Option<&[u8]>) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn done_data(&mut self, _header: Option<&str>) -> Result<(), FrameworkError> {
            Ok(())
        }
        fn is_quit(&self) -> bool {
            false
        }
    }

    #[test]
    fn reject_type_terminates_pre_data_with_configured_reply() {
        let mut cfg = Config::default();
        cfg.filter_type = FilterType::Reject;
        cfg.reject_response = "550 Not Today".to_string();
        let dispatcher = Dispatcher::new(&cfg);
        let mut ctx = StubContext::default();

        let outcome = dispatcher.check_pre(&mut ctx).unwrap();

        assert_eq!(outcome, PreDataOutcome::Terminated);
        assert_eq!(ctx.fail_pre_reply, Some(Some("550 Not Today".to_string())));
        assert_eq!(ctx.logs, vec![("status=".to_string(), "REJECTED".to_string())]);
    }

    #[test]
    fn non_reject_type_continues_past_pre_data() {
        let mut cfg = Config::default();
        cfg.filter_type = FilterType::Pipe;
        let dispatcher = Dispatcher::new(&cfg);
        let mut ctx = StubContext::default();

        let outcome = dispatcher.check_pre(&mut ctx).unwrap();

        assert_eq!(outcome, PreDataOutcome::Continue);
        assert!(ctx.logs.is_empty());
    }
}
