//! `pjlink`: command-line control for PJLink projectors.
//!
//! # Architecture Overview
//!
//! ```text
//!   CLI args + config file
//!          │
//!          ▼
//!   ClientRuntime ──► ResilientController ──► CircuitBreaker (per projector)
//!          │                    │
//!          │                    ▼
//!          │             ConnectionPool ──► Connection ──► codec ──► projector
//!          ▼
//!   Reaper (background), metrics exporter (optional)
//! ```
//!
//! Every command prints one JSON document on stdout; logs go to stderr.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

use pjlink_resilient::config::{self, ClientConfig};
use pjlink_resilient::lifecycle::{signals, ClientRuntime};
use pjlink_resilient::observability::{logging, metrics};
use pjlink_resilient::protocol::{Command, DeviceClass, Operation, Response, DEFAULT_PORT};
use pjlink_resilient::resilience::OperationResult;
use pjlink_resilient::Endpoint;

#[derive(Parser)]
#[command(name = "pjlink")]
#[command(about = "Control PJLink projectors with pooling, retries and circuit breaking", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, global = true)]
    metrics_address: Option<SocketAddr>,

    #[command(flatten)]
    target: Target,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Projector name from the configuration file.
    #[arg(short, long, conflicts_with = "host")]
    projector: Option<String>,

    /// Projector host or IP address.
    #[arg(long)]
    host: Option<String>,

    /// Projector port.
    #[arg(long, requires = "host")]
    port: Option<u16>,

    /// PJLink password.
    #[arg(long)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send any command, e.g. `send POWR ?` or `send SVOL 1 --class 2`
    Send {
        /// Four-character operation code.
        operation: String,
        /// Parameter; `?` queries.
        #[arg(default_value = "?")]
        parameter: String,
        /// Device class to address.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
        class: u8,
    },
    /// Switch power or query the power state
    Power { action: Switch },
    /// Select an input (e.g. 31) or pass `status` to query it
    Input { source: String },
    /// Mute video and audio, or query the mute state
    Mute { action: Switch },
    /// Query identity, lamps and error status
    Info,
    /// Query power repeatedly until Ctrl+C
    Poll {
        #[arg(long, default_value_t = 5000)]
        interval_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
    Status,
}

const INFO_QUERIES: [Operation; 8] = [
    Operation::Name,
    Operation::Manufacturer,
    Operation::ProductName,
    Operation::OtherInfo,
    Operation::Class,
    Operation::InputList,
    Operation::Lamp,
    Operation::ErrorStatus,
];

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every command succeeded.
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ClientConfig::default(),
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    logging::init_logging(&level);

    let metrics_address = match cli.metrics_address {
        Some(addr) => Some(addr),
        None if config.observability.metrics_enabled => Some(config.observability.metrics_address.parse()?),
        None => None,
    };
    if let Some(addr) = metrics_address {
        metrics::init_metrics(addr);
    }

    let (endpoint, password) = resolve_target(&cli.target, &config)?;
    let runtime = ClientRuntime::start(&config);
    let password = password.as_deref();

    let ok = match cli.command {
        Commands::Send {
            operation,
            parameter,
            class,
        } => {
            let class = if class == 2 { DeviceClass::Two } else { DeviceClass::One };
            let cmd = build_command(&operation, &parameter, class)?;
            let result = send(&runtime, &endpoint, password, &cmd).await;
            print_json(&result_json(&result))?;
            result.is_success()
        }
        Commands::Power { action } => {
            let cmd = match action {
                Switch::On => Command::power_on(),
                Switch::Off => Command::power_off(),
                Switch::Status => Command::query(Operation::Power),
            };
            let result = send(&runtime, &endpoint, password, &cmd).await;
            print_json(&result_json(&result))?;
            result.is_success()
        }
        Commands::Input { source } => {
            let cmd = if source.eq_ignore_ascii_case("status") {
                Command::query(Operation::Input)
            } else {
                Command::set(Operation::Input, &source)?
            };
            let result = send(&runtime, &endpoint, password, &cmd).await;
            print_json(&result_json(&result))?;
            result.is_success()
        }
        Commands::Mute { action } => {
            let cmd = match action {
                Switch::On => Command::set(Operation::AvMute, "31")?,
                Switch::Off => Command::set(Operation::AvMute, "30")?,
                Switch::Status => Command::query(Operation::AvMute),
            };
            let result = send(&runtime, &endpoint, password, &cmd).await;
            print_json(&result_json(&result))?;
            result.is_success()
        }
        Commands::Info => {
            let mut info = serde_json::Map::new();
            let mut all_ok = true;
            for op in INFO_QUERIES {
                let result = send(&runtime, &endpoint, password, &Command::query(op)).await;
                all_ok &= result.is_success();
                info.insert(op.code().to_string(), result_json(&result));
            }
            print_json(&json!({ "endpoint": endpoint, "info": info }))?;
            all_ok
        }
        Commands::Poll { interval_ms } => {
            poll(&runtime, &endpoint, password, Duration::from_millis(interval_ms.max(1))).await?;
            true
        }
    };

    runtime.stop().await;
    Ok(ok)
}

fn resolve_target(
    target: &Target,
    config: &ClientConfig,
) -> Result<(Endpoint, Option<String>), Box<dyn std::error::Error>> {
    if let Some(name) = &target.projector {
        let projector = config
            .projector(name)
            .ok_or_else(|| format!("no projector named '{name}' in the configuration"))?;
        let password = target.password.clone().or_else(|| projector.password.clone());
        return Ok((projector.endpoint(), password));
    }
    match &target.host {
        Some(host) => Ok((
            Endpoint::new(host.clone(), target.port.unwrap_or(DEFAULT_PORT)),
            target.password.clone(),
        )),
        None => Err("pass --projector NAME or --host HOST".into()),
    }
}

fn build_command(
    operation: &str,
    parameter: &str,
    class: DeviceClass,
) -> Result<Command, pjlink_resilient::Error> {
    match Operation::from_code(operation) {
        Some(op) if !parameter.starts_with('?') => Command::set_at(op, parameter, class),
        Some(op) => Ok(Command::raw(op.code(), parameter, class)),
        None => Ok(Command::raw(operation.to_ascii_uppercase(), parameter, class)),
    }
}

async fn send(
    runtime: &ClientRuntime,
    endpoint: &Endpoint,
    password: Option<&str>,
    cmd: &Command,
) -> OperationResult {
    runtime
        .controller()
        .execute(endpoint, password, cmd, runtime.retry_policy(), runtime.operation_timeout())
        .await
}

async fn poll(
    runtime: &ClientRuntime,
    endpoint: &Endpoint,
    password: Option<&str>,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    signals::spawn_signal_listener(runtime.shutdown().clone());
    let mut shutdown = runtime.shutdown().subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = send(runtime, endpoint, password, &Command::query(Operation::Power)).await;
                let controller = runtime.controller();
                let line = json!({
                    "result": result_json(&result),
                    "circuit": controller.breaker_snapshot(endpoint),
                    "pool": controller.pool_stats(endpoint),
                });
                println!("{}", serde_json::to_string(&line)?);
            }
            _ = shutdown.recv() => break,
        }
    }
    Ok(())
}

fn result_json(result: &OperationResult) -> Value {
    let mut value = serde_json::to_value(result.report()).unwrap_or(Value::Null);
    if let (Some(response), Some(map)) = (result.response(), value.as_object_mut()) {
        if let Some(decoded) = decode(response) {
            map.insert("decoded".to_string(), decoded);
        }
    }
    value
}

/// Typed view of well-known query responses.
fn decode(response: &Response) -> Option<Value> {
    if response.payload() == "OK" {
        return None;
    }
    let decoded = match Operation::from_code(response.operation())? {
        Operation::Power => json!(response.power_state().ok()?),
        Operation::Lamp => json!(response.lamps().ok()?),
        Operation::ErrorStatus => json!(response.error_status().ok()?),
        Operation::AvMute => json!(response.av_mute().ok()?),
        Operation::InputList => json!(response.inputs()),
        Operation::Class => json!(response.device_class().ok()?),
        _ => return None,
    };
    Some(decoded)
}

fn print_json(value: &Value) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
