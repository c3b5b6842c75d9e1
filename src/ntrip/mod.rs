//! NTRIP client: caster transports, GGA generation, and the connection
//! coordinator that ties them to the corrections path.

pub mod client;
pub mod gga;
pub mod transport;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{Result, RtkError};
use crate::rtcm::RtcmFrame;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Which transport(s) the client may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Try WebSocket, then direct HTTP, then proxy; first success wins.
    #[default]
    Auto,
    WebSocket,
    Direct,
    Proxy,
}

impl ConnectionMode {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "websocket" => ConnectionMode::WebSocket,
            "direct"    => ConnectionMode::Direct,
            "proxy"     => ConnectionMode::Proxy,
            _           => ConnectionMode::Auto,
        }
    }
}

/// The transport actually carrying a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Direct,
    Proxy,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Direct    => write!(f, "direct"),
            TransportKind::Proxy     => write!(f, "proxy"),
        }
    }
}

/// Caster connection parameters.
#[derive(Debug, Clone)]
pub struct NtripConfig {
    pub caster_host: String,
    pub caster_port: u16,
    pub mountpoint:  String,
    pub username:    String,
    pub password:    String,
    pub send_gga:    bool,
    pub mode:        ConnectionMode,
    /// Base URL of the HTTP proxy bridge, e.g. `https://bridge.example/ntrip`.
    pub proxy_base:  Option<String>,
    /// URL of the WebSocket bridge, e.g. `wss://bridge.example/ntrip-ws`.
    pub ws_base:     Option<String>,
    pub gga_interval_secs:      u64,
    pub auto_reconnect:         bool,
    pub max_reconnect_attempts: u32,
    /// Native analogue of running on an HTTPS page: when set, a plain-HTTP
    /// caster must not be contacted directly (mixed content).
    pub secure_context: bool,
}

impl Default for NtripConfig {
    fn default() -> Self {
        Self {
            caster_host: String::new(),
            caster_port: 2101,
            mountpoint:  String::new(),
            username:    String::new(),
            password:    String::new(),
            send_gga:    true,
            mode:        ConnectionMode::Auto,
            proxy_base:  None,
            ws_base:     None,
            gga_interval_secs:      10,
            auto_reconnect:         true,
            max_reconnect_attempts: 5,
            secure_context: false,
        }
    }
}

impl NtripConfig {
    /// Checked before any connection attempt.  A failure here surfaces to
    /// the caller and causes no state change.
    pub fn validate(&self) -> Result<()> {
        if self.caster_host.is_empty() {
            return Err(RtkError::Config("caster_host is required".into()));
        }
        if self.mountpoint.is_empty() {
            return Err(RtkError::Config("mountpoint is required".into()));
        }
        if self.gga_interval_secs < 1 {
            return Err(RtkError::Config("gga_interval must be at least 1s".into()));
        }
        match self.mode {
            ConnectionMode::WebSocket if self.ws_base.is_none() => {
                Err(RtkError::Config("websocket_url is required for websocket mode".into()))
            }
            ConnectionMode::Proxy if self.proxy_base.is_none() => {
                Err(RtkError::Config("proxy_url is required for proxy mode".into()))
            }
            _ => Ok(()),
        }
    }
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// Corrections-stream telemetry.  Owned by the NTRIP client task; everyone
/// else sees cloned snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NtripStats {
    pub messages_received:  u64,
    pub bytes_received:     u64,
    pub bytes_sent:         u64,
    pub last_message_at:    Option<DateTime<Utc>>,
    /// RTCM message type → count.
    pub message_types_seen: BTreeMap<u16, u64>,
}

impl NtripStats {
    pub fn record_frame(&mut self, frame: &RtcmFrame) {
        self.messages_received += 1;
        self.bytes_received += frame.bytes.len() as u64;
        self.last_message_at = Some(Utc::now());
        *self.message_types_seen.entry(frame.msg_type).or_default() += 1;
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }

    /// Seconds since the last RTCM frame, if any was ever received.
    pub fn correction_age_secs(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_message_at
            .map(|t| (now - t).num_milliseconds() as f64 / 1000.0)
    }
}
