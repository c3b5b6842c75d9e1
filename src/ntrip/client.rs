//! NTRIP client coordinator.
//!
//! One task owns the whole client state — the transport session, the GGA
//! cadence, the reconnection timer, and the statistics.  Everything external
//! arrives over channels (commands, bus events) or is awaited by the same
//! task (stream reads, timers), so no two tasks can ever mutate the state
//! concurrently.
//!
//! State machine: `idle → connecting → connected → closing → idle`, with a
//! scheduled reconnect timer as a substate of idle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::nmea::{FixQuality, PositionFix};
use crate::rtcm::{RtcmEvent, RtcmScanner};

use super::gga;
use super::transport::{self, mixed_content_blocked, NtripSession};
use super::{ConnectionMode, NtripConfig, NtripStats, TransportKind};

const BACKOFF_BASE_SECS: f64 = 5.0;
const BACKOFF_CAP_SECS:  f64 = 30.0;
/// Extra pushes after a failed initial GGA, for casters that hold the
/// stream until one arrives.
const GGA_RETRY_OFFSETS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtripState {
    Idle,
    Connecting,
    Connected,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtripCommand {
    Connect,
    Disconnect,
}

/// Why a connected session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DisconnectReason {
    User,
    StreamEnded,
    Transport(String),
}

impl DisconnectReason {
    fn describe(&self) -> String {
        match self {
            DisconnectReason::User         => "disconnect requested".into(),
            DisconnectReason::StreamEnded  => "stream ended".into(),
            DisconnectReason::Transport(m) => m.clone(),
        }
    }
}

/// Control handle held by the application.  Commands are serialized onto
/// the client task; `disconnect` is idempotent.
#[derive(Clone)]
pub struct NtripHandle {
    cmd_tx:   mpsc::UnboundedSender<NtripCommand>,
    stats_rx: watch::Receiver<NtripStats>,
    state_rx: watch::Receiver<NtripState>,
}

impl NtripHandle {
    pub fn connect(&self) {
        let _ = self.cmd_tx.send(NtripCommand::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(NtripCommand::Disconnect);
    }

    /// Coherent snapshot of the corrections-stream statistics.
    pub fn stats(&self) -> NtripStats {
        self.stats_rx.borrow().clone()
    }

    /// Current client state.  The machine holds exactly one state at a
    /// time, so `connected` and `connecting` can never be observed together.
    pub fn state(&self) -> NtripState {
        *self.state_rx.borrow()
    }
}

pub struct NtripClient {
    cfg:        NtripConfig,
    bus:        EventBus,
    /// Valid RTCM frames are handed to the device side through here.
    device_tx:  mpsc::UnboundedSender<Vec<u8>>,
    http:       reqwest::Client,
    scanner:    RtcmScanner,
    stats:      NtripStats,
    stats_tx:   watch::Sender<NtripStats>,
    state_tx:   watch::Sender<NtripState>,
    attempts:   u32,
    last_fix:   Option<PositionFix>,
    cached_gga: Option<String>,
}

impl NtripClient {
    pub fn new(
        cfg:       NtripConfig,
        bus:       EventBus,
        device_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(Self, NtripHandle, mpsc::UnboundedReceiver<NtripCommand>)> {
        // Casters answer with ICY / HTTP 0.9-style status lines.
        let http = reqwest::Client::builder()
            .http09_responses()
            .http1_ignore_invalid_headers_in_responses(true)
            .build()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(NtripStats::default());
        let (state_tx, state_rx) = watch::channel(NtripState::Idle);

        let client = Self {
            cfg,
            bus,
            device_tx,
            http,
            scanner:    RtcmScanner::new(),
            stats:      NtripStats::default(),
            stats_tx,
            state_tx,
            attempts:   0,
            last_fix:   None,
            cached_gga: None,
        };
        Ok((client, NtripHandle { cmd_tx, stats_rx, state_rx }, cmd_rx))
    }

    /// Client task body.  Runs until the command channel closes.
    pub async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<NtripCommand>) {
        let mut bus_rx = self.bus.subscribe();
        let mut reconnect_at: Option<Instant> = None;

        loop {
            // ── idle ──────────────────────────────────────────────────────
            let reconnect_timer = async {
                match reconnect_at {
                    Some(t) => sleep_until(t).await,
                    None    => std::future::pending().await,
                }
            };
            let want_connect = tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None => return,
                    Some(NtripCommand::Connect) => true,
                    Some(NtripCommand::Disconnect) => {
                        if reconnect_at.take().is_some() {
                            info!("NTRIP: pending reconnect canceled");
                        }
                        self.attempts = 0;
                        false
                    }
                },
                _ = reconnect_timer => {
                    reconnect_at = None;
                    info!("NTRIP: reconnect timer fired (attempt {})", self.attempts);
                    true
                }
                ev = bus_rx.recv() => {
                    self.absorb_bus_event(ev);
                    false
                }
            };
            if !want_connect {
                continue;
            }

            // ── connecting ────────────────────────────────────────────────
            if let Err(e) = self.cfg.validate() {
                // Validation failure surfaces to the caller; no state change.
                self.bus.publish(Event::NtripError { message: e.to_string() });
                continue;
            }
            self.set_state(NtripState::Connecting);
            self.bus.publish(Event::NtripConnecting);

            let outcome = {
                let mut ladder = std::pin::pin!(connect_ladder(&self.cfg, &self.http));
                loop {
                    tokio::select! {
                        res = &mut ladder => break Some(res),
                        cmd = cmd_rx.recv() => match cmd {
                            None => return,
                            // Disconnect during connecting aborts the
                            // handshake; dropping the ladder future cancels
                            // whatever attempt is in flight.
                            Some(NtripCommand::Disconnect) => break None,
                            Some(NtripCommand::Connect) => {
                                debug!("NTRIP: already connecting");
                            }
                        },
                    }
                }
            };
            let session = match outcome {
                None => {
                    self.set_state(NtripState::Idle);
                    self.attempts = 0;
                    self.bus.publish(Event::NtripDisconnected {
                        reason: "connect aborted".into(),
                    });
                    continue;
                }
                Some(Err(e)) => {
                    self.set_state(NtripState::Idle);
                    warn!("NTRIP: connection failed: {e}");
                    match self.schedule_reconnect() {
                        Some(at) => reconnect_at = Some(at),
                        None => {
                            self.bus.publish(Event::NtripError { message: e.to_string() });
                        }
                    }
                    continue;
                }
                Some(Ok(s)) => s,
            };

            // ── connected ─────────────────────────────────────────────────
            let kind = session.kind();
            self.set_state(NtripState::Connected);
            self.attempts = 0;
            info!(
                "NTRIP: connected to {}:{}/{} via {kind}",
                self.cfg.caster_host, self.cfg.caster_port, self.cfg.mountpoint
            );
            self.bus.publish(Event::NtripConnected {
                caster_host: self.cfg.caster_host.clone(),
                mountpoint:  self.cfg.mountpoint.clone(),
                mode:        kind,
            });

            let reason = self
                .connected_loop(session, &mut cmd_rx, &mut bus_rx)
                .await;

            // ── closing → idle ────────────────────────────────────────────
            self.set_state(NtripState::Closing);
            self.scanner = RtcmScanner::new();
            self.set_state(NtripState::Idle);
            self.bus.publish(Event::NtripDisconnected { reason: reason.describe() });

            if reason == DisconnectReason::User {
                self.attempts = 0;
            } else if let Some(at) = self.schedule_reconnect() {
                reconnect_at = Some(at);
            }
        }
    }

    /// Drive one connected session until it ends.  The session is consumed
    /// and closed on every exit path.
    async fn connected_loop(
        &mut self,
        mut session: NtripSession,
        cmd_rx:      &mut mpsc::UnboundedReceiver<NtripCommand>,
        bus_rx:      &mut tokio::sync::broadcast::Receiver<Event>,
    ) -> DisconnectReason {
        enum Step {
            Chunk(Result<Option<Vec<u8>>>),
            Command(Option<NtripCommand>),
            Bus(std::result::Result<Event, tokio::sync::broadcast::error::RecvError>),
            GgaTick,
            GgaRetry,
        }

        let mut gga_timer = interval(Duration::from_secs(self.cfg.gga_interval_secs.max(1)));
        gga_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut initial_gga_sent = false;
        let mut gga_retries: Vec<Instant> = Vec::new();

        loop {
            let retry_timer = async {
                match gga_retries.first().copied() {
                    Some(t) => sleep_until(t).await,
                    None    => std::future::pending().await,
                }
            };
            let step = tokio::select! {
                chunk = session.next_chunk() => Step::Chunk(chunk),
                cmd   = cmd_rx.recv()        => Step::Command(cmd),
                ev    = bus_rx.recv()        => Step::Bus(ev),
                _     = gga_timer.tick()     => Step::GgaTick,
                _     = retry_timer          => Step::GgaRetry,
            };

            match step {
                Step::Chunk(Ok(Some(bytes))) => {
                    if self.ingest(&bytes) {
                        // Sourcetable means the caster is waiting for a GGA.
                        self.push_gga(&mut session, true).await;
                    }
                }
                Step::Chunk(Ok(None)) => {
                    session.close().await;
                    return DisconnectReason::StreamEnded;
                }
                Step::Chunk(Err(e)) => {
                    session.close().await;
                    return DisconnectReason::Transport(e.to_string());
                }
                Step::Command(None) | Step::Command(Some(NtripCommand::Disconnect)) => {
                    session.close().await;
                    return DisconnectReason::User;
                }
                Step::Command(Some(NtripCommand::Connect)) => {
                    debug!("NTRIP: already connected, ignoring connect");
                }
                Step::Bus(ev) => self.absorb_bus_event(ev),
                Step::GgaTick => {
                    if !initial_gga_sent {
                        initial_gga_sent = true;
                        if !self.push_gga(&mut session, true).await {
                            let now = Instant::now();
                            gga_retries = GGA_RETRY_OFFSETS.iter().map(|d| now + *d).collect();
                        }
                    } else {
                        self.push_gga(&mut session, false).await;
                    }
                }
                Step::GgaRetry => {
                    gga_retries.remove(0);
                    self.push_gga(&mut session, true).await;
                }
            }
        }
    }

    /// Scan transport bytes for RTCM frames: update statistics, forward to
    /// the device side, publish telemetry.  Returns true when the chunk
    /// carried sourcetable text instead of corrections.
    fn ingest(&mut self, bytes: &[u8]) -> bool {
        let mut sourcetable = false;
        for event in self.scanner.scan(bytes) {
            match event {
                RtcmEvent::Frame(frame) => {
                    self.stats.record_frame(&frame);
                    let _ = self.stats_tx.send(self.stats.clone());
                    if self.device_tx.send(frame.bytes.clone()).is_err() {
                        warn!("device side gone, dropping RTCM frame");
                    }
                    self.bus.publish(Event::NtripRtcm {
                        bytes: frame.bytes,
                        stats: self.stats.clone(),
                    });
                }
                RtcmEvent::Sourcetable => {
                    self.bus.publish(Event::NtripSourcetable);
                    sourcetable = true;
                }
            }
        }
        sourcetable
    }

    /// Push one GGA upstream if the cadence rules produce a sentence.
    /// Returns false only when a send was attempted and failed.
    async fn push_gga(&mut self, session: &mut NtripSession, allow_default: bool) -> bool {
        if !self.cfg.send_gga {
            return true;
        }
        let choice = gga_choice(
            self.last_fix.as_ref(),
            self.cached_gga.as_deref(),
            allow_default,
            Utc::now(),
        );
        let (line, used_defaults) = match choice {
            Some(c) => c,
            None => return true,
        };
        if used_defaults {
            self.bus.publish(Event::NtripUsingDefaultPosition);
        }
        self.cached_gga = Some(line.clone());
        match session.send_gga(&line).await {
            Ok(()) => {
                self.stats.record_sent(line.len());
                let _ = self.stats_tx.send(self.stats.clone());
                debug!("GGA pushed ({} bytes)", line.len());
                true
            }
            Err(e) => {
                warn!("GGA push failed: {e}");
                false
            }
        }
    }

    fn set_state(&self, state: NtripState) {
        let _ = self.state_tx.send(state);
    }

    fn absorb_bus_event(
        &mut self,
        ev: std::result::Result<Event, tokio::sync::broadcast::error::RecvError>,
    ) {
        match ev {
            Ok(Event::Position(fix)) => self.last_fix = Some(fix),
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                debug!("NTRIP: bus subscription lagged by {n} events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {}
        }
    }

    /// Arm the reconnect timer, or return None when reconnection is off or
    /// exhausted (the fatal path).
    fn schedule_reconnect(&mut self) -> Option<Instant> {
        if !self.cfg.auto_reconnect || self.attempts >= self.cfg.max_reconnect_attempts {
            return None;
        }
        let delay = backoff_delay(self.attempts, rand::random::<f64>());
        info!(
            "NTRIP: reconnecting in {:.1}s (attempt {})",
            delay.as_secs_f64(),
            self.attempts
        );
        self.attempts += 1;
        Some(Instant::now() + delay)
    }
}

// ── Connection ladder ─────────────────────────────────────────────────────────

/// Transports to try, in order, for the configured mode.  In auto mode the
/// order is WebSocket, direct, proxy; a mixed-content situation removes
/// direct from consideration entirely.
fn attempt_order(cfg: &NtripConfig) -> Vec<TransportKind> {
    let fallbacks = |cfg: &NtripConfig| {
        let mut v = Vec::new();
        if cfg.ws_base.is_some() {
            v.push(TransportKind::WebSocket);
        }
        if cfg.proxy_base.is_some() {
            v.push(TransportKind::Proxy);
        }
        v
    };
    match cfg.mode {
        ConnectionMode::Auto => {
            let mut v = Vec::new();
            if cfg.ws_base.is_some() {
                v.push(TransportKind::WebSocket);
            }
            if !mixed_content_blocked(cfg) {
                v.push(TransportKind::Direct);
            }
            if cfg.proxy_base.is_some() {
                v.push(TransportKind::Proxy);
            }
            v
        }
        ConnectionMode::WebSocket => vec![TransportKind::WebSocket],
        ConnectionMode::Direct if mixed_content_blocked(cfg) => fallbacks(cfg),
        ConnectionMode::Direct => vec![TransportKind::Direct],
        ConnectionMode::Proxy => vec![TransportKind::Proxy],
    }
}

/// Try each candidate transport once; first success wins.
async fn connect_ladder(cfg: &NtripConfig, http: &reqwest::Client) -> Result<NtripSession> {
    let order = attempt_order(cfg);
    if order.is_empty() {
        return Err(crate::error::RtkError::Config(
            "no usable transport for this mode".into(),
        ));
    }
    let mut last_err = None;
    for kind in order {
        info!("NTRIP: attempting {kind} transport");
        match transport::open(kind, cfg, http).await {
            Ok(session) => return Ok(session),
            Err(e) => {
                warn!("NTRIP: {kind} transport failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("non-empty attempt order"))
}

// ── GGA source selection ──────────────────────────────────────────────────────

/// Pick what to push for one GGA slot.
///
/// A fix with quality 0 is never a GGA source; with no fix at all the
/// cached sentence is re-sent, and — only where a first push is expected,
/// `allow_default` — the seed default is generated.
fn gga_choice(
    fix:           Option<&PositionFix>,
    cached:        Option<&str>,
    allow_default: bool,
    now:           DateTime<Utc>,
) -> Option<(String, bool)> {
    match fix {
        Some(f) if f.quality != FixQuality::NoFix => {
            let out = gga::generate(f, now);
            Some((out.line, out.used_defaults))
        }
        Some(_) => None,
        None => match cached {
            Some(c) => Some((c.to_string(), false)),
            None if allow_default => {
                let out = gga::default_gga(now);
                Some((out.line, out.used_defaults))
            }
            None => None,
        },
    }
}

// ── Reconnect backoff ─────────────────────────────────────────────────────────

/// `min(30s, 5s · 1.5^attempts) · (0.9 + jitter·0.2)` with `jitter ∈ [0, 1)`.
fn backoff_delay(attempts: u32, jitter: f64) -> Duration {
    let exp = BACKOFF_BASE_SECS * 1.5f64.powi(attempts.min(64) as i32);
    let capped = exp.min(BACKOFF_CAP_SECS);
    Duration::from_secs_f64(capped * (0.9 + jitter * 0.2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_with(mode: ConnectionMode) -> NtripConfig {
        NtripConfig {
            caster_host: "caster.example.com".into(),
            mountpoint:  "MOUNT1".into(),
            mode,
            proxy_base:  Some("https://bridge.example/ntrip".into()),
            ws_base:     Some("wss://bridge.example/ntrip-ws".into()),
            ..NtripConfig::default()
        }
    }

    fn fix(quality: FixQuality) -> PositionFix {
        PositionFix {
            latitude:   48.1173,
            longitude:  11.5166667,
            altitude_m: Some(545.4),
            quality,
            satellites: 8,
            hdop:       0.9,
            timestamp:  Utc::now(),
        }
    }

    // ── backoff ──────────────────────────────────────────────────────────

    #[test]
    fn backoff_first_attempt_window() {
        assert_eq!(backoff_delay(0, 0.0), Duration::from_secs_f64(4.5));
        assert_eq!(backoff_delay(0, 1.0), Duration::from_secs_f64(5.5));
    }

    #[test]
    fn backoff_grows_exponentially() {
        // 5 · 1.5³ = 16.875 … 20.625
        assert_eq!(backoff_delay(3, 0.0), Duration::from_secs_f64(16.875));
        assert_eq!(backoff_delay(3, 1.0), Duration::from_secs_f64(20.625));
    }

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        for attempts in [10u32, 20, 64, u32::MAX] {
            let low = backoff_delay(attempts, 0.0);
            let high = backoff_delay(attempts, 1.0);
            assert_eq!(low, Duration::from_secs_f64(27.0));
            assert_eq!(high, Duration::from_secs_f64(33.0));
        }
    }

    // ── attempt order ────────────────────────────────────────────────────

    #[test]
    fn auto_mode_tries_websocket_direct_proxy() {
        assert_eq!(
            attempt_order(&cfg_with(ConnectionMode::Auto)),
            vec![TransportKind::WebSocket, TransportKind::Direct, TransportKind::Proxy]
        );
    }

    #[test]
    fn auto_mode_skips_unconfigured_bridges() {
        let mut cfg = cfg_with(ConnectionMode::Auto);
        cfg.ws_base = None;
        cfg.proxy_base = None;
        assert_eq!(attempt_order(&cfg), vec![TransportKind::Direct]);
    }

    #[test]
    fn mixed_content_removes_direct() {
        let mut cfg = cfg_with(ConnectionMode::Auto);
        cfg.secure_context = true;
        assert_eq!(
            attempt_order(&cfg),
            vec![TransportKind::WebSocket, TransportKind::Proxy]
        );
    }

    #[test]
    fn direct_mode_escalates_on_mixed_content() {
        let mut cfg = cfg_with(ConnectionMode::Direct);
        assert_eq!(attempt_order(&cfg), vec![TransportKind::Direct]);

        cfg.secure_context = true;
        assert_eq!(
            attempt_order(&cfg),
            vec![TransportKind::WebSocket, TransportKind::Proxy]
        );
    }

    #[test]
    fn specific_modes_have_no_fallback() {
        assert_eq!(
            attempt_order(&cfg_with(ConnectionMode::WebSocket)),
            vec![TransportKind::WebSocket]
        );
        assert_eq!(
            attempt_order(&cfg_with(ConnectionMode::Proxy)),
            vec![TransportKind::Proxy]
        );
    }

    // ── GGA source selection ─────────────────────────────────────────────

    #[test]
    fn valid_fix_produces_fresh_gga() {
        let f = fix(FixQuality::RtkFixed);
        let (line, defaults) = gga_choice(Some(&f), None, false, Utc::now()).unwrap();
        assert!(line.starts_with("$GPGGA,"));
        assert!(line.contains(",4,"), "quality digit preserved: {line}");
        assert!(!defaults);
    }

    #[test]
    fn quality_zero_fix_is_never_pushed() {
        let f = fix(FixQuality::NoFix);
        assert_eq!(gga_choice(Some(&f), Some("$GPGGA,cached*00\r\n"), true, Utc::now()), None);
        assert_eq!(gga_choice(Some(&f), None, true, Utc::now()), None);
    }

    #[test]
    fn cached_gga_resent_without_fix() {
        let cached = "$GPGGA,cached*00\r\n";
        let (line, defaults) = gga_choice(None, Some(cached), false, Utc::now()).unwrap();
        assert_eq!(line, cached);
        assert!(!defaults);
    }

    #[test]
    fn default_gga_only_when_allowed() {
        let (line, defaults) = gga_choice(None, None, true, Utc::now()).unwrap();
        assert!(line.contains(",0006.0000000,N,"));
        assert!(defaults);

        assert_eq!(gga_choice(None, None, false, Utc::now()), None);
    }
}
