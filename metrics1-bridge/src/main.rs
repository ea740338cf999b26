// metrics1 Bridge - Stream a metrics channel as JSON lines
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # metrics1 Bridge
//!
//! Opens one metrics channel and streams it on stdout, one JSON object per
//! line. Any line read on stdin is an inbound payload, which the channel
//! rejects with `protocol-error`. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Sample all /proc metrics every second
//! metrics1-bridge
//!
//! # Load averages only, every 250ms
//! metrics1-bridge --interval 250 --option 'metrics=["load.1min","load.5min"]'
//!
//! # Start from a request file
//! metrics1-bridge --request open.json --id host-metrics
//! ```

mod error;
mod proc_source;
mod transport;

use clap::Parser;
use error::BridgeError;
use metrics1::{MetricsChannel, OpenRequest, Problem};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;
use transport::JsonLinesTransport;

/// metrics1 channel bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Channel identifier written on every frame
    #[arg(long, default_value = "metrics")]
    id: String,

    /// Metrics source (unknown names fall back to "proc")
    #[arg(short, long)]
    source: Option<String>,

    /// Tick interval in milliseconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Extra open option as key=value; the value is parsed as JSON when it can be
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// JSON file holding the base open request
    #[arg(short, long)]
    request: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("metrics1 bridge v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(problem)) => {
            error!("Channel closed: {}", problem);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Bridge failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Drive one channel until it closes; returns its close problem.
async fn run(args: Args) -> Result<Option<Problem>, BridgeError> {
    let request = build_request(&args)?;
    let registry = proc_source::registry();
    let transport = JsonLinesTransport::new(std::io::stdout());
    let mut channel = MetricsChannel::open(args.id, &request, &registry, transport);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    while channel.is_open() {
        tokio::select! {
            _ = channel.run_tick() => {}
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => channel.recv(line.as_bytes()),
                None => {
                    debug!("stdin closed");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing channel");
                channel.close(None);
            }
        }
    }

    info!(
        "Channel {} done: {} ticks, {} messages, {} frames written",
        channel.id(),
        channel.metrics().ticks,
        channel.metrics().messages_sent,
        channel.transport().frames()
    );
    Ok(channel.problem())
}

/// Merge the request file and command-line flags into one open request.
fn build_request(args: &Args) -> Result<OpenRequest, BridgeError> {
    let mut request = match &args.request {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let value: Value = serde_json::from_str(&text)?;
            match value {
                Value::Object(map) => OpenRequest::from(map),
                other => return Err(BridgeError::InvalidRequest(other.to_string())),
            }
        }
        None => OpenRequest::new(),
    };

    for option in &args.options {
        let (key, value) = parse_option(option)?;
        request.insert(key, value);
    }
    if let Some(source) = &args.source {
        request.insert("source", source.as_str());
    }
    if let Some(interval) = args.interval {
        request.insert("interval", interval);
    }
    Ok(request)
}

/// Split `key=value`; values that are not valid JSON are taken as strings.
fn parse_option(option: &str) -> Result<(&str, Value), BridgeError> {
    let (key, raw) = option
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| BridgeError::InvalidOption(option.to_string()))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key, value))
}
