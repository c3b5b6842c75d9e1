//! Client configuration file parser.
//!
//! Flat `key = value` format; `#` starts a comment, unknown keys are
//! ignored so old and new configs stay interchangeable.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::ConnectOptions;
use crate::error::{Result, RtkError};
use crate::ntrip::{ConnectionMode, NtripConfig};

const CASTER_PORT:  u16 = 2101;
const GGA_INTERVAL: u64 = 10;
const SERIAL_BAUD:  u32 = 9600;

/// Full client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // ── NTRIP ─────────────────────────────────────────────────────────────────
    pub ntrip: NtripConfig,
    // ── Device link ───────────────────────────────────────────────────────────
    /// Serial device node of the GNSS receiver (empty = no serial link).
    pub serial_dev:  String,
    pub serial_baud: u32,
    /// Port descriptor remembered from a previous session.
    pub remembered_port: Option<String>,
    // ── Connection selection ──────────────────────────────────────────────────
    /// Soft transport preference, folded into priority scoring.
    pub preferred_method: Option<String>,
    /// Hard transport selection; disables fallback.
    pub method: Option<String>,
    pub connection_timeout_secs: u64,
    // ── Process ───────────────────────────────────────────────────────────────
    pub pid_file:   PathBuf,
    pub log_syslog: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ntrip:            NtripConfig::default(),
            serial_dev:       String::new(),
            serial_baud:      SERIAL_BAUD,
            remembered_port:  None,
            preferred_method: None,
            method:           None,
            connection_timeout_secs: 15,
            pid_file:   PathBuf::from("/var/run/rtk-client.pid"),
            log_syslog: true,
        }
    }
}

impl ClientConfig {
    /// Whether an NTRIP caster is configured at all.
    pub fn ntrip_enabled(&self) -> bool {
        !self.ntrip.caster_host.is_empty()
    }

    /// Selection options for the device-side orchestrator.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            method:             self.method.clone(),
            preferred_method:   self.preferred_method.clone(),
            remembered_device:  None,
            remembered_port:    self.remembered_port.clone(),
            profile_hint:       false,
            connection_timeout: Some(Duration::from_secs(self.connection_timeout_secs)),
        }
    }
}

/// Parse `path` as a flat `key = value` configuration file.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| RtkError::Config(format!("cannot read {}: {e}", path.display())))?;
    let mut cfg = ClientConfig::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = match parts.next() {
            Some(k) => k.trim().to_ascii_lowercase(),
            None => continue,
        };
        let val = match parts.next() {
            Some(v) => v.trim().to_string(),
            None => continue,
        };
        if val.is_empty() {
            continue;
        }

        match key.as_str() {
            // NTRIP caster
            "caster_host"     => cfg.ntrip.caster_host = val,
            "caster_port"     => cfg.ntrip.caster_port = val.parse().unwrap_or(CASTER_PORT),
            "mountpoint"      => cfg.ntrip.mountpoint  = val,
            "username"        => cfg.ntrip.username    = val,
            "password"        => cfg.ntrip.password    = val,
            "send_gga"        => cfg.ntrip.send_gga    = parse_bool(&val),
            "connection_mode" => cfg.ntrip.mode        = ConnectionMode::parse(&val),
            "proxy_url"       => cfg.ntrip.proxy_base  = Some(val),
            "websocket_url"   => cfg.ntrip.ws_base     = Some(val),
            "gga_interval"    => {
                cfg.ntrip.gga_interval_secs = val.parse().unwrap_or(GGA_INTERVAL)
            }
            "auto_reconnect"  => cfg.ntrip.auto_reconnect = parse_bool(&val),
            "max_reconnect_attempts" => {
                cfg.ntrip.max_reconnect_attempts = val.parse().unwrap_or(5)
            }
            "secure_context"  => cfg.ntrip.secure_context = parse_bool(&val),
            // Device link
            "serial_dev"      => cfg.serial_dev  = val,
            "serial_baud"     => cfg.serial_baud = val.parse().unwrap_or(SERIAL_BAUD),
            "remembered_port" => cfg.remembered_port = Some(val),
            // Connection selection
            "preferred_method"   => cfg.preferred_method = Some(val),
            "method"             => cfg.method = Some(val),
            "connection_timeout" => {
                cfg.connection_timeout_secs = val.parse().unwrap_or(15)
            }
            // Process
            "pid_file"   => cfg.pid_file   = PathBuf::from(&val),
            "log_syslog" => cfg.log_syslog = parse_bool(&val),
            _ => {} // ignore unknown keys
        }
    }

    Ok(cfg)
}

/// Validate cross-field coherence.  Per-connection requirements (host and
/// mountpoint present) are re-checked by the NTRIP client before every
/// connect.
pub fn validate_config(cfg: &ClientConfig) -> Result<()> {
    if cfg.ntrip_enabled() {
        cfg.ntrip.validate()?;
    }
    if let Some(method) = &cfg.method {
        if method != "serial" && method != "bluetooth" {
            return Err(RtkError::Config(format!("unknown transport method {method:?}")));
        }
    }
    Ok(())
}

fn parse_bool(val: &str) -> bool {
    val == "true" || val == "1" || val == "yes"
}
