//! `pjlink-sim`: a small PJLink projector simulator for manual testing.
//!
//! Answers a fixed command table, keeps power/input/mute state per process,
//! and can require a password, answer only Class 1, or report busy (ERR3)
//! on every Nth request to exercise client retries.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use pjlink_resilient::lifecycle::{signals, Shutdown};
use pjlink_resilient::observability::logging;
use pjlink_resilient::protocol::{compute_auth_prefix, parse_request, DecodedRequest, DeviceClass, TERMINATOR};

#[derive(Parser, Clone)]
#[command(name = "pjlink-sim")]
#[command(about = "Simulated PJLink projector", long_about = None)]
struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:4352")]
    bind: SocketAddr,

    /// Require this password.
    #[arg(long)]
    password: Option<String>,

    /// Highest class the device speaks.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=2))]
    class: u8,

    /// Projector name reported by NAME.
    #[arg(long, default_value = "Simulated Projector")]
    name: String,

    /// Answer ERR3 to every Nth request (0 disables).
    #[arg(long, default_value_t = 0)]
    busy_every: u64,

    /// Delay before each answer, in milliseconds.
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug)]
struct DeviceState {
    power: bool,
    input: String,
    mute: String,
    freeze: bool,
    lamp_hours: u32,
}

struct Device {
    cli: Cli,
    class: DeviceClass,
    state: Mutex<DeviceState>,
    requests: AtomicU64,
}

const INPUTS: [&str; 5] = ["11", "12", "31", "32", "51"];

impl Device {
    fn new(cli: Cli) -> Self {
        Self {
            class: if cli.class == 1 { DeviceClass::One } else { DeviceClass::Two },
            cli,
            state: Mutex::new(DeviceState {
                power: false,
                input: "31".to_string(),
                mute: "30".to_string(),
                freeze: false,
                lamp_hours: 1200,
            }),
            requests: AtomicU64::new(0),
        }
    }

    /// The value part of the answer to one request.
    fn answer(&self, request: &DecodedRequest) -> String {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if self.cli.busy_every > 0 && n % self.cli.busy_every == 0 {
            return "ERR3".to_string();
        }

        let mut state = self.state.lock().expect("device state mutex poisoned");
        let query = request.parameter == "?";
        let class2 = self.class == DeviceClass::Two;
        match (request.operation.as_str(), query) {
            ("POWR", true) => (if state.power { "1" } else { "0" }).to_string(),
            ("POWR", false) => match request.parameter.as_str() {
                "0" | "1" => {
                    state.power = request.parameter == "1";
                    "OK".to_string()
                }
                _ => "ERR2".to_string(),
            },
            ("INPT", true) if state.power => state.input.clone(),
            ("INPT", false) if state.power => {
                if INPUTS.contains(&request.parameter.as_str()) {
                    state.input = request.parameter.clone();
                    "OK".to_string()
                } else {
                    "ERR2".to_string()
                }
            }
            ("AVMT", true) if state.power => state.mute.clone(),
            ("AVMT", false) if state.power => match request.parameter.as_str() {
                "10" | "11" | "20" | "21" | "30" | "31" => {
                    state.mute = request.parameter.clone();
                    "OK".to_string()
                }
                _ => "ERR2".to_string(),
            },
            ("INPT" | "AVMT", _) => "ERR3".to_string(),
            ("ERST", true) => "000000".to_string(),
            ("LAMP", true) => format!("{} {}", state.lamp_hours, u8::from(state.power)),
            ("INST", true) => INPUTS.join(" "),
            ("NAME", true) => self.cli.name.clone(),
            ("INF1", true) => "PJSIM".to_string(),
            ("INF2", true) => "PJLink Simulator".to_string(),
            ("INFO", true) => "simulated device".to_string(),
            ("CLSS", true) => self.class.digit().to_string(),
            ("SNUM", true) if class2 => "SIM0001".to_string(),
            ("SVER", true) if class2 => "1.0.0".to_string(),
            ("FILT", true) if class2 => "350".to_string(),
            ("FREZ", true) if class2 => (if state.freeze { "1" } else { "0" }).to_string(),
            ("FREZ", false) if class2 => match request.parameter.as_str() {
                "0" | "1" => {
                    state.freeze = request.parameter == "1";
                    "OK".to_string()
                }
                _ => "ERR2".to_string(),
            },
            ("SVOL" | "MVOL", false) if class2 => match request.parameter.as_str() {
                "0" | "1" => "OK".to_string(),
                _ => "ERR2".to_string(),
            },
            _ if !known(&request.operation) => "ERR1".to_string(),
            _ if !class2 => "ERR1".to_string(),
            _ => "ERR2".to_string(),
        }
    }
}

fn known(code: &str) -> bool {
    pjlink_resilient::Operation::from_code(code).is_some()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level);

    let listener = TcpListener::bind(cli.bind).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        class = cli.class,
        auth = cli.password.is_some(),
        "PJLink simulator listening"
    );

    let device = Arc::new(Device::new(cli));
    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(shutdown.clone());
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "Accepted connection");
                        let device = device.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, device).await {
                                tracing::warn!(%peer, error = %e, "Session error");
                            }
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "Accept error"),
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Shutdown signal received, stopping simulator");
                break;
            }
        }
    }
    Ok(())
}

async fn serve(stream: TcpStream, device: Arc<Device>) -> std::io::Result<()> {
    let mut stream = BufReader::new(stream);

    let expected_prefix = match &device.cli.password {
        Some(password) => {
            let seed = format!("{:08x}", rand::thread_rng().gen::<u32>());
            stream
                .get_mut()
                .write_all(format!("PJLINK 1 {seed}\r").as_bytes())
                .await?;
            compute_auth_prefix(&seed, password).ok()
        }
        None => {
            stream.get_mut().write_all(b"PJLINK 0\r").await?;
            None
        }
    };
    let mut authenticated = expected_prefix.is_none();

    let mut line = Vec::with_capacity(160);
    loop {
        line.clear();
        if stream.read_until(TERMINATOR, &mut line).await? == 0 {
            return Ok(());
        }
        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "Unparseable request, closing");
                return Ok(());
            }
        };

        if !authenticated {
            if request.auth_prefix.is_some() && request.auth_prefix == expected_prefix {
                authenticated = true;
            } else {
                tracing::info!("Bad or missing digest, rejecting session");
                stream.get_mut().write_all(b"PJLINK ERRA\r").await?;
                return Ok(());
            }
        }

        let value = device.answer(&request);
        // A Class 1 device answers in its own class.
        let class = request.class.min(device.class);
        tracing::debug!(
            request = %format!("%{}{} {}", request.class, request.operation, request.parameter),
            answer = %value,
            "Request"
        );
        if device.cli.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(device.cli.delay_ms)).await;
        }
        stream
            .get_mut()
            .write_all(format!("%{}{}={}\r", class, request.operation, value).as_bytes())
            .await?;
    }
}
