//! Neuroline command line front end
//!
//! Thin wrapper over the device registry for bench work: enumerate likely
//! transports, stream a board for a while, stamp markers and dump counts.
//!
//! # Usage
//!
//! ```bash
//! # stream the synthetic board for five seconds
//! neuroline stream
//!
//! # stream a DawnEEG8 on a serial port, mirroring rows to a CSV file
//! neuroline stream --board dawneeg8 --serial-port /dev/ttyUSB0 \
//!     --streamer file:///tmp/session.csv:w
//!
//! # list serial ports
//! neuroline devices
//! ```

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use neuroline_core::descriptor::{BoardId, Preset};
use neuroline_core::params::BoardParams;
use neuroline_native::DeviceRegistry;

/// Neuroline acquisition CLI
#[derive(Parser, Debug)]
#[command(name = "neuroline")]
#[command(author, version, about = "Biosignal acquisition for biopotential amplifiers", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream a board and report sample counts (default subcommand)
    Stream {
        /// Board family: synthetic, cyton-wifi, ganglion, gforce-pro,
        /// ant-neuro, dawneeg4/8/16/32
        #[arg(short, long, default_value = "synthetic")]
        board: String,

        /// Serial port path for serial boards
        #[arg(long)]
        serial_port: Option<String>,

        /// MAC address for bluetooth boards (autodiscovery when omitted)
        #[arg(long)]
        mac_address: Option<String>,

        /// Device IP address for networked boards
        #[arg(long)]
        ip_address: Option<String>,

        /// Device port for networked boards
        #[arg(long, default_value = "6677")]
        ip_port: u16,

        /// Transport timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Seconds to stream
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Ring buffer capacity in samples
        #[arg(long, default_value = "450000")]
        buffer_size: usize,

        /// Streamer URI attached at start, e.g. file:///tmp/out.csv:w or
        /// streaming_board://225.1.1.1:6677
        #[arg(long)]
        streamer: Option<String>,

        /// Marker value stamped once per second while streaming
        #[arg(long)]
        marker: Option<f64>,
    },

    /// List candidate devices
    Devices,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Neuroline v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        None => run_stream(StreamArgs::default()),
        Some(Commands::Stream {
            board,
            serial_port,
            mac_address,
            ip_address,
            ip_port,
            timeout,
            duration,
            buffer_size,
            streamer,
            marker,
        }) => run_stream(StreamArgs {
            board,
            serial_port,
            mac_address,
            ip_address,
            ip_port,
            timeout,
            duration,
            buffer_size,
            streamer,
            marker,
        }),
        Some(Commands::Devices) => list_devices(),
    }
}

struct StreamArgs {
    board: String,
    serial_port: Option<String>,
    mac_address: Option<String>,
    ip_address: Option<String>,
    ip_port: u16,
    timeout: Option<u64>,
    duration: u64,
    buffer_size: usize,
    streamer: Option<String>,
    marker: Option<f64>,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            board: "synthetic".to_string(),
            serial_port: None,
            mac_address: None,
            ip_address: None,
            ip_port: 6677,
            timeout: None,
            duration: 5,
            buffer_size: 450_000,
            streamer: None,
            marker: None,
        }
    }
}

fn parse_board(name: &str) -> anyhow::Result<BoardId> {
    match name.to_lowercase().as_str() {
        "synthetic" => Ok(BoardId::Synthetic),
        "cyton-wifi" | "cyton_wifi" => Ok(BoardId::CytonWifi),
        "ganglion" => Ok(BoardId::Ganglion),
        "gforce-pro" | "gforce_pro" => Ok(BoardId::GforcePro),
        "ant-neuro" | "ant_neuro" => Ok(BoardId::AntNeuro),
        "dawneeg4" => Ok(BoardId::DawnEeg4),
        "dawneeg8" => Ok(BoardId::DawnEeg8),
        "dawneeg16" => Ok(BoardId::DawnEeg16),
        "dawneeg32" => Ok(BoardId::DawnEeg32),
        "enophone" => Ok(BoardId::Enophone),
        other => anyhow::bail!("unknown board {other:?}"),
    }
}

fn run_stream(args: StreamArgs) -> anyhow::Result<()> {
    let board_id = parse_board(&args.board)?;
    let params = BoardParams {
        serial_port: args.serial_port.unwrap_or_default(),
        mac_address: args.mac_address.unwrap_or_default(),
        ip_address: args.ip_address.unwrap_or_default(),
        ip_port: args.ip_port,
        timeout: args.timeout.unwrap_or_default(),
        ..Default::default()
    };

    let registry = DeviceRegistry::new();
    info!(board = board_id.name(), "preparing session");
    registry
        .prepare_session(board_id, params)
        .map_err(|e| anyhow::anyhow!("prepare_session failed: {e}"))?;

    let streamer_uri = args.streamer.unwrap_or_default();
    registry
        .start_stream(board_id, args.buffer_size, &streamer_uri)
        .map_err(|e| anyhow::anyhow!("start_stream failed: {e}"))?;
    info!(seconds = args.duration, "streaming");

    let started = Instant::now();
    let mut next_report = started + Duration::from_secs(1);
    while started.elapsed() < Duration::from_secs(args.duration) {
        std::thread::sleep(Duration::from_millis(100));
        if Instant::now() >= next_report {
            next_report += Duration::from_secs(1);
            if let Some(value) = args.marker {
                if let Err(e) = registry.insert_marker(board_id, value, Preset::Default) {
                    warn!(error = %e, "marker insertion failed");
                }
            }
            match registry.get_board_data_count(board_id, Preset::Default) {
                Ok(count) => info!(buffered = count, "capture running"),
                Err(e) => warn!(error = %e, "count query failed"),
            }
        }
    }

    let count = registry
        .get_board_data_count(board_id, Preset::Default)
        .unwrap_or(0);
    let data = registry
        .get_board_data(board_id, count, Preset::Default)
        .map_err(|e| anyhow::anyhow!("get_board_data failed: {e}"))?;
    let descriptor = board_id.descriptor();
    info!(
        samples = data.num_samples,
        rows = data.num_rows,
        "capture finished"
    );
    if data.num_samples > 0 {
        let timestamps = data.row(descriptor.default.timestamp_channel);
        let span = timestamps[data.num_samples - 1] - timestamps[0];
        let markers = data.row(descriptor.default.marker_channel);
        info!(
            span_seconds = span,
            markers = markers.iter().filter(|&&m| m != 0.0).count(),
            "capture summary"
        );
    }

    if let Err(e) = registry.stop_stream(board_id) {
        warn!(error = %e, "stop_stream reported an error");
    }
    registry
        .release_session(board_id)
        .map_err(|e| anyhow::anyhow!("release_session failed: {e}"))?;
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    info!("serial ports:");
    let ports = neuroline_native::transport::serial::SerialTransport::available_ports();
    if ports.is_empty() {
        info!("  (none found)");
    } else {
        for port in ports {
            info!("  {port}");
        }
    }
    info!("bluetooth devices are discovered while preparing a ganglion session");
    Ok(())
}
