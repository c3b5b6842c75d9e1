//! Network-RTK rover client daemon.
//!
//! Bridges a GNSS receiver (serial link, NMEA 0183 out) with an NTRIP
//! caster (RTCM 3 corrections in, GGA position pushes out).
//!
//! Usage:
//!   rtk-client -c /etc/rtk-client/rtk_client.conf
//!   rtk-client -c /etc/rtk-client/rtk_client.conf --stderr   # log to stderr

mod config;
mod device;
mod error;
mod events;
mod nmea;
mod ntrip;
mod rtcm;
mod util;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info};
use tokio::sync::mpsc;

use device::orchestrator::ConnectionManager;
use device::serial::SerialTransport;
use device::DeviceEvent;
use events::{Event, EventBus};
use nmea::{NmeaParser, ParserEvent};
use ntrip::client::NtripClient;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "rtk-client", about = "Network-RTK rover client — NMEA/RTCM/NTRIP coordinator")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/rtk-client/rtk_client.conf")]
    config: PathBuf,

    /// Log to stderr instead of syslog (useful for debugging).
    #[arg(long)]
    stderr: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("rtk-client: config error: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = config::validate_config(&cfg) {
        eprintln!("rtk-client: config validation: {e}");
        process::exit(1);
    }

    let use_syslog = cfg.log_syslog && !cli.stderr;
    setup_logging(use_syslog).expect("failed to set up logging");

    if let Err(e) = util::write_pid_file(&cfg.pid_file) {
        error!("cannot write PID file {}: {e}", cfg.pid_file.display());
    }

    info!(
        "rtk-client starting (caster={}, mode={:?})",
        if cfg.ntrip_enabled() { cfg.ntrip.caster_host.as_str() } else { "<none>" },
        cfg.ntrip.mode
    );

    let bus = EventBus::new();

    // NTRIP client task.  Corrections come back over `rtcm_rx`.
    let (rtcm_tx, mut rtcm_rx) = mpsc::unbounded_channel();
    let (ntrip_client, ntrip_handle, cmd_rx) =
        match NtripClient::new(cfg.ntrip.clone(), bus.clone(), rtcm_tx) {
            Ok(parts) => parts,
            Err(e) => {
                error!("cannot build NTRIP client: {e}");
                process::exit(1);
            }
        };
    tokio::spawn(ntrip_client.run(cmd_rx));

    // Device-side orchestrator.
    let mut manager = ConnectionManager::new(bus.clone());
    if !cfg.serial_dev.is_empty() {
        manager.register(Box::new(SerialTransport::new(&cfg.serial_dev, cfg.serial_baud)));
    }
    if manager.has_transports() && !manager.connect(&cfg.connect_options()) {
        error!("no device transport connected; positions unavailable until one appears");
    }

    if cfg.ntrip_enabled() {
        ntrip_handle.connect();
    }

    // ── Main wiring loop ──────────────────────────────────────────────────────
    let mut parser = NmeaParser::new();
    let mut telemetry = tokio::time::interval(Duration::from_secs(30));
    telemetry.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            Some(ev) = manager.next_event() => {
                if let DeviceEvent::Data(bytes) = ev {
                    for parsed in parser.feed(&bytes) {
                        publish_parser_event(&bus, parsed);
                    }
                }
            }

            Some(frame) = rtcm_rx.recv() => {
                if !manager.send_data(&frame) {
                    debug!("no device link, dropping {}-byte RTCM frame", frame.len());
                }
            }

            _ = telemetry.tick() => {
                if cfg.ntrip_enabled() {
                    let stats = ntrip_handle.stats();
                    let age = stats
                        .correction_age_secs(chrono::Utc::now())
                        .map(|a| format!("{a:.1}s"))
                        .unwrap_or_else(|| "n/a".into());
                    info!(
                        "NTRIP {:?}: {} msgs, {} bytes in, {} bytes out, correction age {age}",
                        ntrip_handle.state(),
                        stats.messages_received, stats.bytes_received, stats.bytes_sent
                    );
                }
                if let Some(fix) = parser.last_position() {
                    info!(
                        "position: {:.7},{:.7} quality={:?} sats={} hdop={:.1} ({} in view)",
                        fix.latitude, fix.longitude, fix.quality, fix.satellites,
                        fix.hdop, parser.satellite_view().len()
                    );
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    ntrip_handle.disconnect();
    manager.disconnect();
    util::remove_pid_file(&cfg.pid_file);
}

/// Map a parser result onto the event bus.
fn publish_parser_event(bus: &EventBus, parsed: ParserEvent) {
    match parsed {
        ParserEvent::Sentence(s)            => bus.publish(Event::NmeaSentence(s)),
        ParserEvent::Position(fix)          => bus.publish(Event::Position(fix)),
        ParserEvent::Satellites(view)       => bus.publish(Event::Satellites(view)),
        ParserEvent::FrameOverflow { dropped } => {
            bus.publish(Event::NmeaFrameOverflow { dropped })
        }
    }
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool) -> anyhow::Result<()> {
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process:  "rtk-client".into(),
            pid:      process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(log::LevelFilter::Info))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }
    Ok(())
}
