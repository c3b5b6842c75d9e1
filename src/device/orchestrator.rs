//! Connection orchestrator: registers device transports, selects one by
//! priority, and supervises the active link.

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::events::{Event, EventBus};

use super::{ConnectOptions, DeviceEvent, DeviceTransport};

/// Owns the registered transports and at most one active connection.
/// Transports are registered at startup and never removed.
pub struct ConnectionManager {
    bus:        EventBus,
    transports: Vec<Box<dyn DeviceTransport>>,
    active:     Option<usize>,
    event_tx:   mpsc::UnboundedSender<DeviceEvent>,
    event_rx:   mpsc::UnboundedReceiver<DeviceEvent>,
}

impl ConnectionManager {
    pub fn new(bus: EventBus) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            bus,
            transports: Vec::new(),
            active: None,
            event_tx,
            event_rx,
        }
    }

    pub fn register(&mut self, transport: Box<dyn DeviceTransport>) {
        debug!("device: registered {} transport", transport.name());
        self.transports.push(transport);
    }

    pub fn has_transports(&self) -> bool {
        !self.transports.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Attempt to connect.
    ///
    /// With an explicit `opts.method`, only that transport is tried — no
    /// fallback.  Otherwise every available transport is attempted in
    /// descending priority order (registration order breaks ties) until one
    /// succeeds.
    pub fn connect(&mut self, opts: &ConnectOptions) -> bool {
        let candidates: Vec<usize> = match &opts.method {
            Some(method) => {
                match self
                    .transports
                    .iter()
                    .position(|t| t.name() == method && t.is_available())
                {
                    Some(i) => vec![i],
                    None => {
                        warn!("device: requested transport {method:?} is not available");
                        return false;
                    }
                }
            }
            None => {
                let mut avail: Vec<usize> = (0..self.transports.len())
                    .filter(|&i| self.transports[i].is_available())
                    .collect();
                // Stable sort keeps registration order among equal priorities.
                avail.sort_by_key(|&i| std::cmp::Reverse(self.transports[i].priority(opts)));
                avail
            }
        };

        for i in candidates {
            let name = self.transports[i].name();
            info!("device: attempting {name} transport");
            match self.transports[i].connect(opts, self.event_tx.clone()) {
                Ok(()) => {
                    info!("device: connected via {name}");
                    self.active = Some(i);
                    self.bus.publish(Event::ConnectionConnected { name });
                    return true;
                }
                Err(e) => {
                    warn!("device: {name} connect failed: {e}");
                    self.bus
                        .publish(Event::ConnectionError { message: e.to_string() });
                }
            }
        }
        false
    }

    /// Receive the next transport event, maintaining the active slot and
    /// republishing on the bus.  `Data` becomes `device:data`; a
    /// `Disconnected` from the active transport clears the slot.
    pub async fn next_event(&mut self) -> Option<DeviceEvent> {
        let ev = self.event_rx.recv().await?;
        match &ev {
            DeviceEvent::Data(bytes) => {
                self.bus.publish(Event::DeviceData(bytes.clone()));
            }
            DeviceEvent::Disconnected { name } => {
                let was_active = self
                    .active
                    .map(|i| self.transports[i].name() == *name)
                    .unwrap_or(false);
                if was_active {
                    warn!("device: {name} transport disconnected");
                    self.active = None;
                    self.bus.publish(Event::ConnectionDisconnected);
                }
            }
            DeviceEvent::Error { message } => {
                warn!("device: transport error: {message}");
                self.bus
                    .publish(Event::ConnectionError { message: message.clone() });
            }
        }
        Some(ev)
    }

    /// Write to the active transport.  Returns false when none is active;
    /// a write error is a warning, not a teardown — a transmit-only failure
    /// is survivable.
    pub fn send_data(&mut self, bytes: &[u8]) -> bool {
        let Some(i) = self.active else {
            return false;
        };
        if let Err(e) = self.transports[i].send(bytes) {
            warn!("device: send over {} failed: {e}", self.transports[i].name());
        }
        true
    }

    pub fn disconnect(&mut self) {
        if let Some(i) = self.active.take() {
            info!("device: disconnecting {}", self.transports[i].name());
            self.transports[i].disconnect();
            self.bus.publish(Event::ConnectionDisconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::device::{bluetooth_priority, serial_priority};
    use crate::error::RtkError;

    /// Scripted transport for selection tests.
    struct MockTransport {
        name:      &'static str,
        available: bool,
        succeed:   bool,
        base:      i32,
        attempts:  Arc<Mutex<Vec<&'static str>>>,
    }

    impl DeviceTransport for MockTransport {
        fn name(&self) -> &'static str {
            self.name
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn priority(&self, opts: &ConnectOptions) -> i32 {
            match self.name {
                "bluetooth" => bluetooth_priority(opts),
                "serial"    => serial_priority(opts),
                _           => self.base,
            }
        }
        fn connect(
            &mut self,
            _opts:   &ConnectOptions,
            _events: mpsc::UnboundedSender<DeviceEvent>,
        ) -> crate::error::Result<()> {
            self.attempts.lock().unwrap().push(self.name);
            if self.succeed {
                Ok(())
            } else {
                Err(RtkError::Transport("mock refused".into()))
            }
        }
        fn disconnect(&mut self) {}
        fn send(&mut self, _bytes: &[u8]) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn mock(
        name:      &'static str,
        available: bool,
        succeed:   bool,
        attempts:  &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<MockTransport> {
        Box::new(MockTransport {
            name,
            available,
            succeed,
            base: 0,
            attempts: Arc::clone(attempts),
        })
    }

    #[tokio::test]
    async fn default_order_prefers_bluetooth() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = ConnectionManager::new(EventBus::new());
        mgr.register(mock("serial", true, true, &attempts));
        mgr.register(mock("bluetooth", true, true, &attempts));

        assert!(mgr.connect(&ConnectOptions::default()));
        assert_eq!(*attempts.lock().unwrap(), vec!["bluetooth"]);
        assert!(mgr.is_connected());
    }

    #[tokio::test]
    async fn preferred_serial_reorders_attempts() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = ConnectionManager::new(EventBus::new());
        mgr.register(mock("bluetooth", true, false, &attempts));
        mgr.register(mock("serial", true, true, &attempts));

        let opts = ConnectOptions {
            preferred_method: Some("serial".into()),
            ..ConnectOptions::default()
        };
        assert!(mgr.connect(&opts));
        assert_eq!(*attempts.lock().unwrap(), vec!["serial"]);
    }

    #[tokio::test]
    async fn failure_falls_through_to_next_candidate() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = ConnectionManager::new(EventBus::new());
        mgr.register(mock("bluetooth", true, false, &attempts));
        mgr.register(mock("serial", true, true, &attempts));

        assert!(mgr.connect(&ConnectOptions::default()));
        assert_eq!(*attempts.lock().unwrap(), vec!["bluetooth", "serial"]);
    }

    #[tokio::test]
    async fn explicit_method_has_no_fallback() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = ConnectionManager::new(EventBus::new());
        mgr.register(mock("bluetooth", true, false, &attempts));
        mgr.register(mock("serial", true, true, &attempts));

        let opts = ConnectOptions {
            method: Some("bluetooth".into()),
            ..ConnectOptions::default()
        };
        assert!(!mgr.connect(&opts));
        assert_eq!(*attempts.lock().unwrap(), vec!["bluetooth"]);
        assert!(!mgr.is_connected());
    }

    #[tokio::test]
    async fn unavailable_transports_are_skipped() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = ConnectionManager::new(EventBus::new());
        mgr.register(mock("bluetooth", false, true, &attempts));
        mgr.register(mock("serial", true, true, &attempts));

        assert!(mgr.connect(&ConnectOptions::default()));
        assert_eq!(*attempts.lock().unwrap(), vec!["serial"]);

        let opts = ConnectOptions {
            method: Some("bluetooth".into()),
            ..ConnectOptions::default()
        };
        let mut mgr2 = ConnectionManager::new(EventBus::new());
        mgr2.register(mock("bluetooth", false, true, &attempts));
        assert!(!mgr2.connect(&opts));
    }

    #[tokio::test]
    async fn send_without_active_transport_returns_false() {
        let mut mgr = ConnectionManager::new(EventBus::new());
        assert!(!mgr.send_data(b"\xd3\x00\x03"));
    }

    #[tokio::test]
    async fn disconnect_event_clears_active_slot() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        let mut bus_rx = bus.subscribe();
        let mut mgr = ConnectionManager::new(bus);
        mgr.register(mock("serial", true, true, &attempts));
        assert!(mgr.connect(&ConnectOptions::default()));

        // Simulate the transport reporting a lost link.
        mgr.event_tx
            .send(DeviceEvent::Disconnected { name: "serial" })
            .unwrap();
        let ev = mgr.next_event().await.unwrap();
        assert!(matches!(ev, DeviceEvent::Disconnected { name: "serial" }));
        assert!(!mgr.is_connected());

        // connection:connected then connection:disconnected on the bus
        assert!(matches!(
            bus_rx.recv().await.unwrap(),
            Event::ConnectionConnected { name: "serial" }
        ));
        assert!(matches!(
            bus_rx.recv().await.unwrap(),
            Event::ConnectionDisconnected
        ));
    }

    #[tokio::test]
    async fn data_events_republish_on_the_bus() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        let mut bus_rx = bus.subscribe();
        let mut mgr = ConnectionManager::new(bus);
        mgr.register(mock("serial", true, true, &attempts));
        assert!(mgr.connect(&ConnectOptions::default()));

        mgr.event_tx
            .send(DeviceEvent::Data(b"$GPGGA".to_vec()))
            .unwrap();
        mgr.next_event().await.unwrap();

        bus_rx.recv().await.unwrap(); // connection:connected
        match bus_rx.recv().await.unwrap() {
            Event::DeviceData(bytes) => assert_eq!(bytes, b"$GPGGA"),
            other => panic!("expected device data, got {other:?}"),
        }
    }
}
