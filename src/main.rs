use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use log::{debug, error, LevelFilter};
use serde::Serialize;

use ssl_inspector::config::{Config, ConfigError, OutputFormat, DEFAULT_CONFIG_FILE};
use ssl_inspector::{diagnose, DiagnosticResult, Endpoint, InspectorError, TrustPool};

mod metrics;

/// Explain why TLS connections to an endpoint would or would not work.
#[derive(Parser, Debug)]
#[command(name = "ssl-inspector", version, about, long_about = None)]
struct Cli {
    /// Endpoint to inspect. Can be https://domain (assuming port 443), a domain,
    /// or a domain and port after a colon (:). Repeat to inspect several endpoints.
    #[arg(short = 'e', long = "endpoint", value_name = "ENDPOINT")]
    endpoints: Vec<String>,

    /// PKCS#12 trust store holding additional trusted root certificates
    #[arg(long = "truststore", value_name = "PATH")]
    truststore: Option<PathBuf>,

    /// Password of the trust store
    #[arg(long = "truststore-password", value_name = "PASSWORD")]
    truststore_password: Option<String>,

    /// Enable debug logging
    #[arg(short = 'X', long = "debug")]
    debug: bool,

    /// Output format: text, json or summary
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Connect and handshake timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Exit code to use when any endpoint would reject connections
    #[arg(long, value_name = "CODE")]
    exit_code: Option<i32>,

    /// Configuration file (defaults to ./ssl-inspector.toml when present)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Push verdicts to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus Push Gateway address
    #[arg(long, value_name = "URL")]
    prometheus_address: Option<String>,
}

/// Process-wide facts shown in the text banner.
struct RunInfo {
    os: &'static str,
    arch: &'static str,
    version: &'static str,
}

impl RunInfo {
    fn current() -> RunInfo {
        RunInfo {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// What happened to one endpoint.
struct Outcome {
    endpoint: Endpoint,
    result: Result<DiagnosticResult, InspectorError>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Report<'a> {
    Diagnosed(&'a DiagnosticResult),
    Failed { endpoint: &'a Endpoint, error: String },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if cli.generate_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };
    let format = config.output_format().unwrap_or(OutputFormat::Text);

    let mut endpoints = Vec::new();
    for raw in config.endpoints.iter().flatten() {
        match Endpoint::parse(raw) {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => {
                debug!("{}", e);
                println!("Supplied endpoint is not well formed: {}", raw);
                exit(1);
            }
        }
    }

    let (store_path, store_password) = config.trust_store_settings();
    let trust_pool = match TrustPool::load(store_path, store_password) {
        Ok(pool) => pool,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };

    if format == OutputFormat::Text {
        print_banner(&RunInfo::current(), &trust_pool);
    }

    let outcomes = inspect_all(endpoints, Arc::new(trust_pool), config.timeout_duration());

    match format {
        OutputFormat::Text => print_text(&outcomes),
        OutputFormat::Json => print_json(&outcomes),
        OutputFormat::Summary => print_summary(&outcomes),
    }

    if let Some(address) = config.prometheus_address() {
        let results: Vec<DiagnosticResult> = outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok().cloned())
            .collect();
        metrics::prom::prometheus_metrics(&results, address);
    }

    exit(exit_status(&outcomes, config.exit_code.unwrap_or(0)));
}

fn init_logging(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .parse_default_env()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    match &cli.config {
        Some(path) => config = config.merge_with(Config::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            debug!("Using configuration from {}", DEFAULT_CONFIG_FILE);
            config = config.merge_with(Config::from_file(DEFAULT_CONFIG_FILE)?);
        }
        None => {}
    }

    let endpoints = if cli.endpoints.is_empty() {
        None
    } else {
        Some(cli.endpoints.clone())
    };
    let config = config.merge_with(Config::from_cli_args(
        endpoints,
        cli.output.clone(),
        cli.exit_code,
        cli.timeout,
        cli.truststore.clone(),
        cli.truststore_password.clone(),
        cli.prometheus.then_some(true),
        cli.prometheus_address.clone(),
    ));
    config.validate()?;
    Ok(config)
}

/// Diagnoses every endpoint on its own thread, returning outcomes in input order.
fn inspect_all(endpoints: Vec<Endpoint>, trust_pool: Arc<TrustPool>, timeout: Duration) -> Vec<Outcome> {
    let (sender, receiver): (Sender<(usize, Outcome)>, Receiver<(usize, Outcome)>) =
        mpsc::channel();
    let total = endpoints.len();

    for (index, endpoint) in endpoints.into_iter().enumerate() {
        let thread_tx = sender.clone();
        let trust_pool = Arc::clone(&trust_pool);
        thread::spawn(move || {
            let result = diagnose(&endpoint, &trust_pool, timeout);
            if thread_tx.send((index, Outcome { endpoint, result })).is_err() {
                debug!("Result receiver closed before endpoint {} finished", index);
            }
        });
    }
    drop(sender);

    let mut outcomes: Vec<(usize, Outcome)> = Vec::with_capacity(total);
    for outcome in receiver {
        outcomes.push(outcome);
    }
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// 1 when any endpoint could not be judged, `invalid_exit_code` when any
/// endpoint would reject connections, 0 otherwise.
fn exit_status(outcomes: &[Outcome], invalid_exit_code: i32) -> i32 {
    if outcomes.iter().any(|outcome| outcome.result.is_err()) {
        1
    } else if outcomes
        .iter()
        .any(|outcome| matches!(&outcome.result, Ok(result) if !result.valid))
    {
        invalid_exit_code
    } else {
        0
    }
}

fn print_banner(run: &RunInfo, trust_pool: &TrustPool) {
    println!();
    println!("\tRunning on:\t\t{}/{}", run.os, run.arch);
    println!("\tScanner Version: \t{}", run.version);
    for anchor in trust_pool.custom_anchors() {
        println!("\tTrusting:\t\t{} ({})", anchor.common_name(), anchor.alias());
    }
    println!();
}

fn print_text(outcomes: &[Outcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(result) if result.valid => {
                println!("All checks passed connecting to {}", result.endpoint);
                if let (Some(protocol), Some(cipher)) = (&result.protocol, &result.cipher) {
                    println!("\tNegotiated {} with {}", protocol, cipher);
                }
            }
            Ok(result) => {
                println!("!!! Connection to {} will not work. !!!", result.endpoint);
                println!();
                println!(
                    "There are {} certificate errors connecting to {}. They are:",
                    result.messages.len(),
                    result.endpoint
                );
                println!();
                for (i, message) in result.messages.iter().enumerate() {
                    println!(" [{}] - {}", i + 1, message);
                }
            }
            Err(e) => println!("Error performing checks against {}: {}", outcome.endpoint, e),
        }
        println!();
    }
}

fn reports(outcomes: &[Outcome]) -> Vec<Report<'_>> {
    outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(result) => Report::Diagnosed(result),
            Err(e) => Report::Failed {
                endpoint: &outcome.endpoint,
                error: e.to_string(),
            },
        })
        .collect()
}

fn print_json(outcomes: &[Outcome]) {
    match serde_json::to_string_pretty(&reports(outcomes)) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize results: {}", e),
    }
}

fn print_summary(outcomes: &[Outcome]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Endpoint", "Verdict", "Findings", "Details"]);

    for outcome in outcomes {
        let (verdict, findings, details) = match &outcome.result {
            Ok(result) if result.valid => ("valid", "0".to_string(), String::new()),
            Ok(result) => (
                "invalid",
                result.messages.len().to_string(),
                result
                    .messages
                    .first()
                    .and_then(|message| message.lines().next())
                    .unwrap_or_default()
                    .to_string(),
            ),
            Err(e) => ("error", "-".to_string(), e.to_string()),
        };
        table.add_row(vec![
            outcome.endpoint.to_string(),
            verdict.to_string(),
            findings,
            details,
        ]);
    }

    println!("{}", table);
}
