//! Proxy command-line configuration.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, parsed from the command line (or built directly
/// by the integration suites).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// TCP port the host (the scope side) connects to.
    pub scope_port: u16,
    /// TCP port the HTTP client interface listens on.
    pub http_port: u16,
    /// How long `/get-message` parks before answering `<timeout/>`.
    pub poll_timeout: Duration,
    /// Log every message crossing the proxy.
    pub verbose: bool,
    /// Pretty-print STP/1 payloads against the discovered schema.
    pub format_payload: bool,
    /// Where `/snapshot` bodies are written.
    pub snapshot_dir: PathBuf,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            scope_port: 7001,
            http_port: 8002,
            poll_timeout: Duration::from_secs(15),
            verbose: false,
            format_payload: false,
            snapshot_dir: PathBuf::from("."),
        }
    }
}

fn validate_port(value: &str) -> Result<u16, String> {
    value
        .parse::<u16>()
        .map_err(|_| "Invalid port number".to_owned())
}

fn validate_millis(value: &str) -> Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|_| "Invalid millisecond count".to_owned())
}

/// Parse the process arguments into a [`ProxyConfig`].
pub fn parse_args() -> ProxyConfig {
    let defaults = ProxyConfig::default();
    let matches = Command::new("Scope Proxy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bridges a scope host's STP socket to an HTTP debugger client")
        .arg(
            Arg::new("scope-port")
                .long("scope-port")
                .help("Port the scope host connects to")
                .value_parser(validate_port)
                .default_value("7001"),
        )
        .arg(
            Arg::new("http-port")
                .long("http-port")
                .help("Port of the HTTP client interface")
                .value_parser(validate_port)
                .default_value("8002"),
        )
        .arg(
            Arg::new("poll-timeout-ms")
                .long("poll-timeout-ms")
                .help("How long /get-message waits before answering <timeout/>")
                .value_parser(validate_millis)
                .default_value("15000"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Log every message crossing the proxy")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("format-payload")
                .long("format-payload")
                .help("Pretty-print STP/1 payloads using the discovered schema")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("snapshot-dir")
                .long("snapshot-dir")
                .help("Directory markup snapshots are written to")
                .default_value("."),
        )
        .get_matches();

    ProxyConfig {
        scope_port: *matches.get_one("scope-port").unwrap_or(&defaults.scope_port),
        http_port: *matches.get_one("http-port").unwrap_or(&defaults.http_port),
        poll_timeout: matches
            .get_one("poll-timeout-ms")
            .copied()
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_timeout),
        verbose: matches.get_flag("verbose"),
        format_payload: matches.get_flag("format-payload"),
        snapshot_dir: matches
            .get_one::<String>("snapshot-dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.snapshot_dir),
    }
}
