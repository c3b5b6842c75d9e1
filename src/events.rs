//! Typed event bus.
//!
//! Cross-component signals travel as one `Event` enum over a
//! `tokio::sync::broadcast` channel: each subsystem publishes its events and
//! any number of observers subscribe.  Slow observers lose the oldest events
//! (`RecvError::Lagged`) rather than back-pressuring the protocol paths.

use tokio::sync::broadcast;

use crate::nmea::{NmeaSentence, PositionFix, SatelliteInfo};
use crate::ntrip::{NtripStats, TransportKind};

/// Every cross-component signal in the system.
#[derive(Debug, Clone)]
pub enum Event {
    /// A new position fix parsed from GGA/RMC.
    Position(PositionFix),
    /// A completed GSV set — the full current satellite view.
    Satellites(Vec<SatelliteInfo>),
    /// Any structurally valid NMEA sentence, typed or unknown.
    NmeaSentence(NmeaSentence),
    /// An unterminated NMEA line overflowed the framer buffer.
    NmeaFrameOverflow { dropped: usize },

    NtripConnecting,
    NtripConnected {
        caster_host: String,
        mountpoint:  String,
        mode:        TransportKind,
    },
    NtripDisconnected { reason: String },
    /// A valid RTCM frame arrived, with a statistics snapshot taken after
    /// the frame was counted.
    NtripRtcm { bytes: Vec<u8>, stats: NtripStats },
    /// The caster answered with its sourcetable (it is waiting for a GGA).
    NtripSourcetable,
    /// A GGA with substituted default fields was pushed to the caster.
    NtripUsingDefaultPosition,
    NtripError { message: String },

    /// Raw bytes from the active device transport.
    DeviceData(Vec<u8>),
    ConnectionConnected { name: &'static str },
    ConnectionDisconnected,
    ConnectionError { message: String },
}

/// Discriminant-only view of [`Event`], for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Position,
    Satellites,
    NmeaSentence,
    NmeaFrameOverflow,
    NtripConnecting,
    NtripConnected,
    NtripDisconnected,
    NtripRtcm,
    NtripSourcetable,
    NtripUsingDefaultPosition,
    NtripError,
    DeviceData,
    ConnectionConnected,
    ConnectionDisconnected,
    ConnectionError,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Position(_)                  => EventKind::Position,
            Event::Satellites(_)                => EventKind::Satellites,
            Event::NmeaSentence(_)              => EventKind::NmeaSentence,
            Event::NmeaFrameOverflow { .. }     => EventKind::NmeaFrameOverflow,
            Event::NtripConnecting              => EventKind::NtripConnecting,
            Event::NtripConnected { .. }        => EventKind::NtripConnected,
            Event::NtripDisconnected { .. }     => EventKind::NtripDisconnected,
            Event::NtripRtcm { .. }             => EventKind::NtripRtcm,
            Event::NtripSourcetable             => EventKind::NtripSourcetable,
            Event::NtripUsingDefaultPosition    => EventKind::NtripUsingDefaultPosition,
            Event::NtripError { .. }            => EventKind::NtripError,
            Event::DeviceData(_)                => EventKind::DeviceData,
            Event::ConnectionConnected { .. }   => EventKind::ConnectionConnected,
            Event::ConnectionDisconnected       => EventKind::ConnectionDisconnected,
            Event::ConnectionError { .. }       => EventKind::ConnectionError,
        }
    }
}

/// Cloneable publish/subscribe handle.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an event.  Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(Event::NtripConnecting);

        assert_eq!(a.recv().await.unwrap().kind(), EventKind::NtripConnecting);
        assert_eq!(b.recv().await.unwrap().kind(), EventKind::NtripConnecting);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(Event::ConnectionDisconnected);
    }
}
