//! CLI flag parsing and validation, built on `clap`'s derive API.

use std::path::PathBuf;

use clap::Parser;

use crate::{Result, DEFAULT_PORT};

/// A parsed and validated `--run-as=USER[:GROUP]` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAs {
    pub user: String,
    pub group: Option<String>,
}

impl std::str::FromStr for RunAs {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((user, group)) if !user.is_empty() && !group.is_empty() => {
                Ok(RunAs { user: user.to_string(), group: Some(group.to_string()) })
            }
            Some(_) => Err(format!("invalid --run-as value: {s}")),
            None if !s.is_empty() => Ok(RunAs { user: s.to_string(), group: None }),
            None => Err("--run-as requires a non-empty user name".to_string()),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "fanout-relayd", about = "Line-oriented publish/subscribe relay")]
pub struct Config {
    /// TCP port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Fork into the background after binding listeners.
    #[arg(long)]
    pub daemon: bool,

    /// Append-mode log destination. Defaults to stderr when omitted.
    #[arg(long)]
    pub logfile: Option<PathBuf>,

    /// Truncate the log file in place once it exceeds this many MiB.
    #[arg(long, default_value_t = 10)]
    pub max_logfile_size: u64,

    /// Parent writes the forked child's PID here before exiting.
    #[arg(long)]
    pub pidfile: Option<PathBuf>,

    /// 0=ERROR, 1=WARNING (default), 2=INFO, 3=DEBUG.
    #[arg(long, default_value_t = 1)]
    pub debug_level: u8,

    /// Cap concurrent peers; may raise the process fd soft limit. 0 means
    /// derive the cap from the file-descriptor budget.
    #[arg(long, default_value_t = 0)]
    pub client_limit: usize,

    /// Drop privileges to USER[:GROUP] after binding but before entering
    /// the accept loop.
    #[arg(long)]
    pub run_as: Option<RunAs>,
}

impl Config {
    /// Parse `argv`, returning a fatal startup error on malformed flags.
    ///
    /// `clap` handles `--help` itself, printing usage and exiting 0.
    pub fn parse() -> Config {
        <Config as Parser>::parse()
    }

    /// Reject combinations `clap`'s type-level validation can't express.
    pub fn validate(&self) -> Result<()> {
        if self.debug_level > 3 {
            return Err(format!(
                "--debug-level must be 0..=3, got {}",
                self.debug_level
            )
            .into());
        }
        if self.max_logfile_size == 0 && self.logfile.is_some() {
            return Err("--max-logfile-size must be positive when --logfile is given".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn run_as_parses_user_only() {
        assert_eq!(
            RunAs::from_str("nobody").unwrap(),
            RunAs { user: "nobody".to_string(), group: None }
        );
    }

    #[test]
    fn run_as_parses_user_and_group() {
        assert_eq!(
            RunAs::from_str("nobody:nogroup").unwrap(),
            RunAs { user: "nobody".to_string(), group: Some("nogroup".to_string()) }
        );
    }

    #[test]
    fn run_as_rejects_empty_fields() {
        assert!(RunAs::from_str("").is_err());
        assert!(RunAs::from_str("nobody:").is_err());
        assert!(RunAs::from_str(":nogroup").is_err());
    }

    fn sample_config() -> Config {
        Config {
            port: DEFAULT_PORT,
            daemon: false,
            logfile: None,
            max_logfile_size: 10,
            pidfile: None,
            debug_level: 1,
            client_limit: 0,
            run_as: None,
        }
    }

    #[test]
    fn validate_rejects_out_of_range_debug_level() {
        let mut config = sample_config();
        config.debug_level = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_max_logfile_size_with_logfile() {
        let mut config = sample_config();
        config.logfile = Some(PathBuf::from("/tmp/relay.log"));
        config.max_logfile_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(sample_config().validate().is_ok());
    }
}
