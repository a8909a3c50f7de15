//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::{Destination, TransportOutcome};
use std::collections::HashMap;
use std::path::PathBuf;

/// Telemetry Delivery - durable, prioritized delivery of telemetry payloads
#[derive(Parser, Debug)]
#[command(
    name = "telemetry-delivery",
    author,
    version,
    about = "Durable telemetry delivery engine",
    long_about = "Queues telemetry payloads durably on disk and delivers them with \n\
                  session-first priority, retry backoff and 429 blocking."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TELEMETRY_DELIVERY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TELEMETRY_DELIVERY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Path to configuration file (TOML or JSON); defaults apply when absent
    #[arg(short, long, global = true, env = "TELEMETRY_DELIVERY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the storage directory from configuration
    #[arg(long, global = true, env = "TELEMETRY_DELIVERY_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Override the delivery worker count from configuration
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Durably enqueue a payload file
    Enqueue(EnqueueArgs),

    /// List pending calls per destination
    Status(StatusArgs),

    /// Deliver pending calls until drained, timed out or interrupted
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Destination queue (sessions, logs, crashes)
    #[arg(short, long)]
    pub destination: Destination,

    /// File holding the serialized payload
    #[arg(short, long)]
    pub file: PathBuf,

    /// Request metadata as key=value (repeatable)
    #[arg(long = "meta", value_parser = parse_meta)]
    pub meta: Vec<(String, String)>,
}

impl EnqueueArgs {
    pub fn metadata(&self) -> HashMap<String, String> {
        self.meta.iter().cloned().collect()
    }
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Stop after this many seconds (0 = until drained or interrupted)
    #[arg(long, default_value = "0", env = "TELEMETRY_DELIVERY_TIMEOUT")]
    pub timeout: u64,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "TELEMETRY_DELIVERY_METRICS_PORT")]
    pub metrics_port: u16,

    /// Outcome returned for every attempt (log = log payloads and succeed)
    #[arg(long, value_enum, default_value = "log")]
    pub outcome: OutcomeArg,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Fixed transport behaviour for `run`
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutcomeArg {
    #[default]
    Log,
    Success,
    NotModified,
    PayloadTooLarge,
    TooManyRequests,
    ClientError,
    ServerError,
    NoResponse,
}

impl OutcomeArg {
    /// Scripted outcome for `destination`; `None` means use the logging transport
    pub fn outcome(self, destination: Destination) -> Option<TransportOutcome> {
        let outcome = match self {
            Self::Log => return None,
            Self::Success => TransportOutcome::Success {
                body: Default::default(),
                headers: HashMap::new(),
            },
            Self::NotModified => TransportOutcome::NotModified,
            Self::PayloadTooLarge => TransportOutcome::PayloadTooLarge,
            Self::TooManyRequests => TransportOutcome::TooManyRequests {
                destination,
                retry_after_ms: Some(5_000),
            },
            Self::ClientError => TransportOutcome::Failure {
                status_code: 400,
                headers: HashMap::new(),
            },
            Self::ServerError => TransportOutcome::Failure {
                status_code: 503,
                headers: HashMap::new(),
            },
            Self::NoResponse => TransportOutcome::NoResponse,
        };
        Some(outcome)
    }
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enqueue_with_metadata() {
        let cli = Cli::try_parse_from([
            "telemetry-delivery",
            "--storage-dir",
            "/tmp/store",
            "enqueue",
            "--destination",
            "logs",
            "--file",
            "batch.json",
            "--meta",
            "content-type=application/json",
            "--meta",
            "x-id=a=b",
        ])
        .unwrap();

        assert_eq!(cli.storage_dir, Some(PathBuf::from("/tmp/store")));
        let Commands::Enqueue(args) = cli.command else {
            panic!("expected enqueue");
        };
        assert_eq!(args.destination, Destination::Logs);
        let metadata = args.metadata();
        assert_eq!(metadata["content-type"], "application/json");
        assert_eq!(metadata["x-id"], "a=b");
    }

    #[test]
    fn test_rejects_malformed_metadata() {
        let result = Cli::try_parse_from([
            "telemetry-delivery",
            "enqueue",
            "-d",
            "sessions",
            "-f",
            "s.bin",
            "--meta",
            "novalue",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["telemetry-delivery", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.timeout, 0);
        assert_eq!(args.outcome, OutcomeArg::Log);
        assert!(args.outcome.outcome(Destination::Logs).is_none());
    }

    #[test]
    fn test_scripted_outcome_carries_destination() {
        assert_eq!(
            OutcomeArg::TooManyRequests.outcome(Destination::Crashes),
            Some(TransportOutcome::TooManyRequests {
                destination: Destination::Crashes,
                retry_after_ms: Some(5_000),
            })
        );
    }
}
