//! tsprobe - discover and interrogate terminal servers on the local network

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use tsprobe_core::cli::{print_exit_codes, CliResult, OutputFormat, RecordWriter};
use tsprobe_core::config::{AppConfig, LoggingConfig};
use tsprobe_core::core::client::Client;
use tsprobe_core::core::orchestrator::{DuplicatePolicy, Orchestrator};
use tsprobe_core::core::protocol::MacAddress;
use tsprobe_core::core::simulator::{self, DeviceProfile, SimulatedDevice};
use tsprobe_core::core::transport::{UdpConfig, UdpTransport};
use tsprobe_core::core::workflow::Mode;

/// Terminal server discovery and interrogation
#[derive(Parser, Debug)]
#[command(name = "tsprobe", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "TSPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, global = true, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Verbose output (frame tracing)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Device or broadcast address, optionally with port
    #[arg(short, long)]
    target: Option<String>,

    /// Seconds to wait for replies and workflows
    #[arg(short, long)]
    wait: Option<u64>,

    /// Local address to bind
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Run one workflow per device id even if it answers repeatedly
    #[arg(long)]
    ignore_duplicates: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List devices answering discovery
    Discover(RunArgs),

    /// Probe every request id on each device and record raw replies
    Scan {
        #[command(flatten)]
        run: RunArgs,

        /// Per-probe timeout in milliseconds
        #[arg(long)]
        probe_timeout: Option<u64>,

        /// First request id to probe
        #[arg(long, value_parser = parse_u8)]
        first_id: Option<u8>,

        /// Request id to stop before
        #[arg(long, value_parser = parse_u8)]
        last_id: Option<u8>,
    },

    /// Fetch name, addresses, firmware and serial from each device
    Query(RunArgs),

    /// Answer the protocol as a simulated device
    Simulate(SimulateArgs),

    /// Print the effective configuration
    Config {
        /// Also write it to the default config file
        #[arg(long)]
        save: bool,
    },

    /// Print exit code table
    ExitCodes,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:4800")]
    bind: SocketAddr,

    /// Device name
    #[arg(long)]
    name: Option<String>,

    /// Application id, hex
    #[arg(long, value_parser = parse_u32)]
    apid: Option<u32>,

    /// Model, hex
    #[arg(long, value_parser = parse_u16)]
    model: Option<u16>,

    /// Hardware address
    #[arg(long)]
    mac: Option<MacAddress>,

    /// Reported IPv4 address
    #[arg(long)]
    address: Option<Ipv4Addr>,

    /// Reported netmask
    #[arg(long)]
    netmask: Option<Ipv4Addr>,

    /// Reported gateway
    #[arg(long)]
    gateway: Option<Ipv4Addr>,

    /// Firmware word, hex
    #[arg(long, value_parser = parse_u32)]
    firmware: Option<u32>,

    /// Serial number
    #[arg(long)]
    serial: Option<u16>,

    /// Reject a request id with a status, as ID=STATUS (hex)
    #[arg(long = "reject", value_parser = parse_reject)]
    reject: Vec<(u8, u8)>,

    /// Never answer a request id (hex)
    #[arg(long = "silence", value_parser = parse_u8)]
    silence: Vec<u8>,

    /// Reply latency in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
}

fn parse_hex<T>(s: &str, parse: fn(&str, u32) -> Result<T, std::num::ParseIntError>) -> Result<T, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    parse(digits, 16).map_err(|e| format!("invalid hex value {s}: {e}"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    parse_hex(s, u8::from_str_radix)
}

fn parse_u16(s: &str) -> Result<u16, String> {
    parse_hex(s, u16::from_str_radix)
}

fn parse_u32(s: &str) -> Result<u32, String> {
    parse_hex(s, u32::from_str_radix)
}

fn parse_reject(s: &str) -> Result<(u8, u8), String> {
    let (id, status) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=STATUS, got {s}"))?;
    Ok((parse_u8(id)?, parse_u8(status)?))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = run(cli).await.unwrap_or_else(|e| CliResult::from_anyhow(&e));
    if let Some(msg) = result.message() {
        if result.is_success() {
            eprintln!("{msg}");
        } else {
            eprintln!("Error: {msg}");
        }
    }
    result.to_exit_code()
}

async fn run(cli: Cli) -> anyhow::Result<CliResult> {
    if matches!(cli.command, Commands::ExitCodes) {
        print_exit_codes();
        return Ok(CliResult::success());
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    let _guard = init_logging(&cli, &config.logging)?;
    tracing::debug!("tsprobe v{}", tsprobe_core::VERSION);

    match &cli.command {
        Commands::Discover(args) => probe(&cli, &config, args, Mode::Discover).await,
        Commands::Query(args) => probe(&cli, &config, args, Mode::Query).await,
        Commands::Scan {
            run,
            probe_timeout,
            first_id,
            last_id,
        } => {
            if let Some(ms) = probe_timeout {
                config.scan.probe_timeout_ms = *ms;
            }
            if let Some(id) = first_id {
                config.scan.first_id = *id;
            }
            if let Some(id) = last_id {
                config.scan.last_id = *id;
            }
            config.validate()?;
            let mode = Mode::Scan(config.scan_options());
            probe(&cli, &config, run, mode).await
        }
        Commands::Simulate(args) => simulate(args).await,
        Commands::Config { save } => {
            print!("{}", toml::to_string_pretty(&config).context("rendering config")?);
            if *save {
                let path = config.save()?;
                return Ok(CliResult::success_with_message(format!("Saved {}", path.display())));
            }
            Ok(CliResult::success())
        }
        Commands::ExitCodes => Ok(CliResult::success()),
    }
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?
    };

    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file, guard) = match &logging.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().context("log file path has no file name")?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .try_init()
        .context("installing log subscriber")?;
    Ok(guard)
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: &CancellationToken) -> anyhow::Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received");
        token.cancel();
    })
    .context("installing Ctrl-C handler")
}

async fn probe(cli: &Cli, config: &AppConfig, args: &RunArgs, mode: Mode) -> anyhow::Result<CliResult> {
    let target = config.resolve_target(args.target.as_deref())?;
    let mut run_config = config.orchestrator(target);
    if let Some(secs) = args.wait {
        run_config.wait = Duration::from_secs(secs);
    }
    if args.ignore_duplicates {
        run_config.duplicates = DuplicatePolicy::Ignore;
    }

    let bind = args.bind.unwrap_or(config.network.bind);
    let transport = UdpTransport::bind(&UdpConfig::new(bind).broadcast(true)).await?;
    let client = Client::new(Arc::new(transport));

    let orchestrator = Orchestrator::new(client.clone(), run_config);
    let interrupt = orchestrator.cancel_token();
    cancel_on_interrupt(&interrupt)?;

    let mut writer = RecordWriter::stdout(cli.format);
    let summary = orchestrator.run(mode, &mut writer).await?;
    writer.finish().context("writing records")?;

    client.shutdown();
    tracing::debug!(stats = ?client.stats(), transport = ?client.transport_stats(), "Engine stats");

    Ok(if interrupt.is_cancelled() {
        CliResult::cancelled()
    } else if summary.discovered == 0 {
        CliResult::no_devices(target)
    } else {
        CliResult::success()
    })
}

async fn simulate(args: &SimulateArgs) -> anyhow::Result<CliResult> {
    let defaults = DeviceProfile::default();
    let profile = DeviceProfile {
        name: args.name.clone().unwrap_or(defaults.name),
        apid: args.apid.unwrap_or(defaults.apid),
        model: args.model.unwrap_or(defaults.model),
        mac: args.mac.unwrap_or(defaults.mac),
        address: args.address.unwrap_or(defaults.address),
        netmask: args.netmask.unwrap_or(defaults.netmask),
        gateway: args.gateway.unwrap_or(defaults.gateway),
        firmware: args.firmware.unwrap_or(defaults.firmware),
        serial: args.serial.unwrap_or(defaults.serial),
    };

    let mut device = SimulatedDevice::new(profile).with_latency(Duration::from_millis(args.latency_ms));
    for &(id, status) in &args.reject {
        device = device.reject(id, status);
    }
    for &id in &args.silence {
        device = device.silence(id);
    }

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel)?;
    simulator::serve_udp(&device, args.bind, cancel).await?;
    Ok(CliResult::success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_hex_args() {
        assert_eq!(parse_u8("0x7f"), Ok(0x7f));
        assert_eq!(parse_u32("00555555"), Ok(0x0055_5555));
        assert_eq!(parse_reject("05=04"), Ok((0x05, 0x04)));
        assert!(parse_reject("05").is_err());
        assert!(parse_u8("0x100").is_err());
    }

    #[test]
    fn test_scan_overrides() {
        let cli = Cli::try_parse_from([
            "tsprobe", "-f", "jsonl", "scan", "--target", "10.0.0.255", "--probe-timeout", "250", "--last-id", "20",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::JsonLines);
        match cli.command {
            Commands::Scan {
                run,
                probe_timeout,
                last_id,
                ..
            } => {
                assert_eq!(run.target.as_deref(), Some("10.0.0.255"));
                assert_eq!(probe_timeout, Some(250));
                assert_eq!(last_id, Some(0x20));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
