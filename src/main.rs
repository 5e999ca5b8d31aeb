//! tun-relay: demo entry point
//!
//! Feeds synthetic packets into a [`TunStack`] so the router and connection
//! actors can be watched without a real tun device.
//!
//! # Usage
//!
//! ```bash
//! # Relay to a local sink on the default redirect port
//! ./tun-relay --sink
//!
//! # Run with custom configuration
//! ./tun-relay -c /path/to/config.json --interval-ms 200 --count 50
//!
//! # Run with environment overrides
//! TUN_RELAY_LOG_LEVEL=debug ./tun-relay --sink
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use tun_relay::config::{apply_env_overrides, create_default_config, load_config_with_env, Config};
use tun_relay::session::PacketTemplate;
use tun_relay::stack::TunStack;

/// Payload carried by every synthetic packet
const DEMO_PAYLOAD: &str = "Hello Fake TCP\n";

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: Option<PathBuf>,
    /// Generate default configuration
    generate_config: bool,
    /// Run a local sink on the redirect address
    sink: bool,
    /// Delay between synthetic packets
    interval_ms: u64,
    /// Number of packets to send, unlimited if `None`
    count: Option<u64>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = None;
        let mut generate_config = false;
        let mut sink = false;
        let mut interval_ms = 1000;
        let mut count = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = Some(PathBuf::from(path));
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--sink" => {
                    sink = true;
                }
                "--interval-ms" => {
                    interval_ms = parse_number(&arg, args.next());
                }
                "--count" => {
                    count = Some(parse_number(&arg, args.next()));
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("tun-relay v{}", tun_relay::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            sink,
            interval_ms,
            count,
        }
    }
}

fn parse_number(flag: &str, value: Option<String>) -> u64 {
    match value.as_deref().map(str::parse) {
        Some(Ok(n)) => n,
        _ => {
            eprintln!("{} expects a number", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"tun-relay v{}

Relays tun-captured TCP payloads to a redirect endpoint, one connection per session.
This binary feeds synthetic packets from 10.0.0.2:12345 to 1.1.1.1:80.

USAGE:
    tun-relay [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: built-in defaults]
    -g, --generate-config   Write a default configuration to --config and exit
    --sink                  Run a local sink on the redirect address that logs what it receives
    --interval-ms <N>       Delay between packets in milliseconds [default: 1000]
    --count <N>             Stop after N packets [default: unlimited]
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    TUN_RELAY_REDIRECT_HOST      Override redirect host
    TUN_RELAY_REDIRECT_PORT      Override redirect port
    TUN_RELAY_MAX_CONNECTIONS    Override maximum concurrent sessions
    TUN_RELAY_LOG_LEVEL          Override log level (trace, debug, info, warn, error)
"#,
        tun_relay::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target)
        .with_span_events(FmtSpan::CLOSE);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn load(args: &Args) -> Result<Config> {
    match args.config_path {
        Some(ref path) => load_config_with_env(path)
            .map_err(|e| anyhow::anyhow!("Failed to load configuration from {:?}: {}", path, e)),
        None => {
            let mut config = Config::default_config();
            apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
            Ok(config)
        }
    }
}

/// Accept connections on the redirect address and log what arrives
async fn run_sink(listener: TcpListener) {
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Sink accept error: {}", e);
                continue;
            }
        };
        info!(%peer, "Sink accepted connection");

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => {
                        debug!(%peer, "Sink connection closed");
                        break;
                    }
                    Ok(n) => {
                        info!(%peer, "Sink received: {:?}", String::from_utf8_lossy(&buf[..n]));
                    }
                    Err(e) => {
                        warn!(%peer, "Sink read error: {}", e);
                        break;
                    }
                }
            }
        });
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        let path = args
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("tun-relay.json"));
        create_default_config(&path)?;
        println!("Generated default configuration at {:?}", path);
        return Ok(());
    }

    let config = load(&args)?;
    init_logging(&config);

    info!("tun-relay v{}", tun_relay::VERSION);
    info!(
        "Redirect target {}, max {} sessions",
        config.router.redirect_target(),
        config.router.max_connections
    );

    if args.sink {
        let listener = TcpListener::bind((config.router.redirect_host.as_str(), config.router.redirect_port))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind sink on {}: {}", config.router.redirect_target(), e))?;
        info!("Sink listening on {}", listener.local_addr()?);
        tokio::spawn(run_sink(listener));
    }

    let stack = TunStack::from_config(&config, None)?;
    stack.start();

    let template = PacketTemplate::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut sent = 0u64;
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                stack.input_packet(template.build(DEMO_PAYLOAD)).await;
                sent += 1;
                debug!(sent, "Fed synthetic packet");
                if args.count.is_some_and(|count| sent >= count) {
                    info!("Sent {} packets", sent);
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    // Let the last payloads drain before tearing connections down
    tokio::time::sleep(Duration::from_millis(100)).await;
    stack.stop().await;

    info!(
        "Shutdown complete after {:.1}s: {}",
        start_time.elapsed().as_secs_f64(),
        serde_json::to_string(&stack.stats().snapshot())?
    );

    Ok(())
}
