//! Process-wide, read-only configuration.
//!
//! Mirrors the `pxstate_t` global of the original implementation, but is
//! passed around as an explicit `&Config` rather than reached through a
//! singleton (see the "Shared global state" design note).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REJECT: &str = "530 Email Rejected";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which filter strategy the dispatcher should use for a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Reject,
    Pipe,
    File,
    Smtp,
}

impl Default for FilterType {
    fn default() -> Self {
        FilterType::Pipe
    }
}

/// An invalid value was supplied for a recognized configuration option.
///
/// This crate never decides what to do about a configuration error (exit
/// the process, log and keep prior value, ...): that policy belongs to
/// whatever owns the configuration file parser, which is out of scope here.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for option {option}: {reason}")]
pub struct ConfigError {
    pub option: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub filter_type: FilterType,
    pub command: Option<String>,
    pub reject_response: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub temp_directory: PathBuf,
    pub header: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            filter_type: FilterType::default(),
            command: None,
            reject_response: DEFAULT_REJECT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temp_directory: std::env::temp_dir(),
            header: None,
        }
    }
}

impl Config {
    /// Decodes a single `(name, value)` configuration option, case
    /// insensitively, the way `cb_parse_option` does in the original.
    ///
    /// Returns `Ok(true)` if the option was recognized and applied,
    /// `Ok(false)` if the name is not one this crate handles (e.g.
    /// `DebugFiles`, which only the surrounding framework understands), and
    /// `Err` if the name was recognized but the value was invalid.
    pub fn parse_option(&mut self, name: &str, value: &str) -> Result<bool, ConfigError> {
        if name.eq_ignore_ascii_case("FilterCommand") {
            self.command = Some(value.to_string());
            Ok(true)
        } else if name.eq_ignore_ascii_case("TempDirectory") {
            self.temp_directory = PathBuf::from(value);
            Ok(true)
        } else if name.eq_ignore_ascii_case("FilterTimeout") {
            let secs: i64 = value.parse().map_err(|_| ConfigError {
                option: "FilterTimeout",
                reason: "not an integer".to_string(),
            })?;
            if secs <= 0 {
                return Err(ConfigError {
                    option: "FilterTimeout",
                    reason: "must be > 0".to_string(),
                });
            }
            self.timeout = Duration::from_secs(secs as u64);
            Ok(true)
        } else if name.eq_ignore_ascii_case("FilterType") {
            self.filter_type = if value.eq_ignore_ascii_case("pipe") {
                FilterType::Pipe
            } else if value.eq_ignore_ascii_case("file") {
                FilterType::File
            } else if value.eq_ignore_ascii_case("smtp") {
                FilterType::Smtp
            } else if value.eq_ignore_ascii_case("reject") {
                FilterType::Reject
            } else {
                return Err(ConfigError {
                    option: "FilterType",
                    reason: "must be one of pipe, file, smtp, reject".to_string(),
                });
            };
            Ok(true)
        } else if name.eq_ignore_ascii_case("FilterReject") {
            self.reject_response = value.to_string();
            Ok(true)
        } else if name.eq_ignore_ascii_case("Header") {
            let trimmed = value.trim();
            self.header = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
            Ok(true)
        } else {
            // DebugFiles and anything else is the framework's business.
            Ok(false)
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original() {
        let cfg = Config::default();
        assert_eq!(cfg.filter_type, FilterType::Pipe);
        assert_eq!(cfg.reject_response, "530 Email Rejected");
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert!(cfg.command.is_none());
    }

    #[test]
    fn header_is_trimmed_and_empty_becomes_none() {
        let mut cfg = Config::default();
        assert_eq!(cfg.parse_option("Header", "   \t  ").unwrap(), true);
        assert_eq!(cfg.header, None);
        cfg.parse_option("header", "  X-Filter: ok  ").unwrap();
        assert_eq!(cfg.header.as_deref(), Some("X-Filter: ok"));
    }

    #[test]
    fn filter_type_is_case_insensitive() {
        let mut cfg = Config::default();
        cfg.parse_option("FILTERTYPE", "SMTP").unwrap();
        assert_eq!(cfg.filter_type, FilterType::Smtp);
    }

    #[test]
    fn rejects_bad_timeout() {
        let mut cfg = Config::default();
        assert!(cfg.parse_option("FilterTimeout", "0").is_err());
        assert!(cfg.parse_option("FilterTimeout", "nope").is_err());
    }

    #[test]
    fn debug_files_is_unrecognized() {
        let mut cfg = Config::default();
        assert_eq!(cfg.parse_option("DebugFiles", "1").unwrap(), false);
    }
}
