//! Device-side transports: the byte channel to the GNSS receiver.
//!
//! A transport is a small capability object — availability, priority,
//! connect/disconnect, send — registered once with the orchestrator.  The
//! byte stream and lifecycle signals flow back over a channel, so the
//! orchestrator stays the single consumer and republisher.

pub mod orchestrator;
pub mod serial;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Result;

/// Signals a connected transport sends to the orchestrator.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Raw bytes from the receiver.
    Data(Vec<u8>),
    /// The transport lost its link (not emitted for a requested disconnect).
    Disconnected { name: &'static str },
    Error { message: String },
}

/// Options steering transport selection for one connect call.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Exact transport to use; disables fallback entirely.
    pub method:             Option<String>,
    /// Soft preference, folded into priority scoring.
    pub preferred_method:   Option<String>,
    /// Previously used Bluetooth device id, if remembered.
    pub remembered_device:  Option<String>,
    /// Previously used serial port descriptor, if remembered.
    pub remembered_port:    Option<String>,
    /// A known device profile suggests Bluetooth will work.
    pub profile_hint:       bool,
    pub connection_timeout: Option<Duration>,
}

/// Capability surface of one device transport.
pub trait DeviceTransport: Send {
    fn name(&self) -> &'static str;

    /// Queried on demand at selection time.
    fn is_available(&self) -> bool;

    fn priority(&self, opts: &ConnectOptions) -> i32;

    /// Drive `disconnected → connecting → connected`.  On success the
    /// transport streams [`DeviceEvent`]s into `events` until it dies or
    /// [`DeviceTransport::disconnect`] is called.
    fn connect(
        &mut self,
        opts:   &ConnectOptions,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<()>;

    fn disconnect(&mut self);

    /// Write bytes to the receiver.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

// ── Priority scoring ──────────────────────────────────────────────────────────

/// Bluetooth: base 7, +3 when explicitly preferred, +2 for a remembered
/// device, +1 for a profile hint.
pub fn bluetooth_priority(opts: &ConnectOptions) -> i32 {
    let mut p = 7;
    if opts.preferred_method.as_deref() == Some("bluetooth") {
        p += 3;
    }
    if opts.remembered_device.is_some() {
        p += 2;
    }
    if opts.profile_hint {
        p += 1;
    }
    p
}

/// Serial: base 5, +5 when explicitly preferred, +2 for a remembered port.
pub fn serial_priority(opts: &ConnectOptions) -> i32 {
    let mut p = 5;
    if opts.preferred_method.as_deref() == Some("serial") {
        p += 5;
    }
    if opts.remembered_port.is_some() {
        p += 2;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bluetooth_outranks_serial_by_default() {
        let opts = ConnectOptions::default();
        assert_eq!(bluetooth_priority(&opts), 7);
        assert_eq!(serial_priority(&opts), 5);
    }

    #[test]
    fn preferred_serial_outranks_bluetooth() {
        let opts = ConnectOptions {
            preferred_method: Some("serial".into()),
            ..ConnectOptions::default()
        };
        assert_eq!(serial_priority(&opts), 10);
        assert_eq!(bluetooth_priority(&opts), 7);
    }

    #[test]
    fn remembered_identifiers_and_hints_add_up() {
        let opts = ConnectOptions {
            preferred_method:  Some("bluetooth".into()),
            remembered_device: Some("AA:BB:CC:DD:EE:FF".into()),
            remembered_port:   Some("/dev/ttyUSB0".into()),
            profile_hint:      true,
            ..ConnectOptions::default()
        };
        assert_eq!(bluetooth_priority(&opts), 13);
        assert_eq!(serial_priority(&opts), 7);
    }
}
