//! The major components are:
//! * `engine`: the subscription graph — peers, channels, subscriptions, and counters.
//! * `codec`: newline framing of the inbound byte stream.
//! * `command`: the five-verb protocol parser.
//! * `server`: the accept loop and per-connection task.
//! * `stats`: `info` rendering.
//! * `bootstrap`: fd-limit arithmetic, daemonisation, privilege drop, listener setup.
//! * `config`: CLI flag parsing.
//! * `logging`: leveled, optionally file-backed log setup.

#![warn(clippy::pedantic)]

pub mod bootstrap;
pub mod codec;
pub mod command;
pub mod config;
pub mod engine;
pub mod logging;
pub mod server;
pub mod stats;

mod shutdown;

/// Default port the relay listens on.
pub const DEFAULT_PORT: u16 = 1986;

/// simple Error. It should be specifically defined by enum.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;
