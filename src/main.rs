//! mockpeer - scripted MQTT broker for client conformance checks
//!
//! Usage:
//!   mockpeer [OPTIONS] <CLIENT>...
//!
//! Options:
//!   -c, --config <FILE>          Configuration file path
//!   -b, --bind <ADDR>            Bind address (default: 0.0.0.0:1888)
//!   -s, --scenario <NAME>        publish-qos2-timeout | publish-qos1-timeout
//!   --step-timeout <DURATION>    Wait per expected packet (default: 5s)
//!   --retry-interval <DURATION>  Client retry interval (default: 3s)
//!   -l, --log-level              Log level (error, warn, info, debug, trace)
//!   -h, --help                   Print help
//!
//! Exit status: 0 on pass, 1 on fail, 2 if the check could not run.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use humantime_serde::re::humantime::parse_duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mockpeer::config::Config;
use mockpeer::orchestrator::{ClientCommand, Orchestrator, OrchestratorConfig};
use mockpeer::scenario::Scenario;
use mockpeer::script::Verdict;

const HARNESS_ERROR: u8 = 2;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// mockpeer - scripted MQTT broker for client conformance checks
#[derive(Parser, Debug)]
#[command(name = "mockpeer")]
#[command(author = "VibeMQ Contributors")]
#[command(version)]
#[command(about = "Scripted MQTT broker that checks a client's retransmission behaviour")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Scenario to play (publish-qos2-timeout, publish-qos1-timeout)
    #[arg(short, long)]
    scenario: Option<Scenario>,

    /// How long to wait for each expected packet, e.g. "5s"
    #[arg(long, value_parser = parse_duration)]
    step_timeout: Option<Duration>,

    /// Retry interval of the client under test, e.g. "3s"
    #[arg(long, value_parser = parse_duration)]
    retry_interval: Option<Duration>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Client command line, run with the search path pointed at the implementation
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "CLIENT"
    )]
    client: Vec<OsString>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(verdict) => {
            println!("{}", verdict);
            ExitCode::from(verdict.exit_code())
        }
        Err(e) => {
            eprintln!("mockpeer: {}", e);
            ExitCode::from(HARNESS_ERROR)
        }
    }
}

async fn run(args: Args) -> Result<Verdict, Box<dyn std::error::Error>> {
    // Environment overrides apply whether or not a file is given
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::default(),
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(scenario) = args.scenario {
        config.scenario.name = scenario;
    }
    if let Some(step_timeout) = args.step_timeout {
        config.timing.step_timeout = step_timeout;
    }
    if let Some(retry_interval) = args.retry_interval {
        config.timing.retry_interval = retry_interval;
    }
    config.validate()?;

    let client = ClientCommand::from_argv(args.client).ok_or("missing client command")?;
    let scenario = config.scenario.name;
    let script = scenario.script(&config.scenario.params()?)?;

    info!("Scenario: {} ({} steps)", scenario, script.len());
    info!(
        "  Step timeout: {:?}, retry interval: {:?}",
        config.timing.step_timeout, config.timing.retry_interval
    );

    let orchestrator = Orchestrator::bind(OrchestratorConfig::from_config(&config)).await?;
    Ok(orchestrator.run(&script, &client).await?)
}
