//! Simulated Transport
//!
//! An in-process stand-in for the glasses. It advertises, accepts a
//! connection, exposes a configurable GATT table and decodes whatever is
//! written to it. Used on hosts without a supported radio stack and by tests.

use crate::domain::errors::TransportError;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    DiscoveredPeripheral, GattService, PeripheralId, Transport, TransportEvent, WriteTarget,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Behaviour of the simulated glasses.
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    pub id: PeripheralId,
    pub name: String,
    pub services: Vec<GattService>,
    /// Whether the peripheral shows up in scans
    pub advertising: bool,
    pub accept_connections: bool,
    /// Connect attempts never resolve
    pub hang_connect: bool,
    pub fail_discovery: bool,
    /// Service discovery never resolves
    pub hang_discovery: bool,
    pub fail_writes: bool,
}

impl SimulatedPeripheral {
    /// Glasses exposing one service with one writable characteristic.
    pub fn glasses(name: &str, service: Uuid, characteristic: Uuid) -> Self {
        Self {
            id: PeripheralId("SIM:AR:GL:00:00:01".to_string()),
            name: name.to_string(),
            services: vec![GattService {
                uuid: service,
                characteristics: vec![characteristic],
            }],
            advertising: true,
            accept_connections: true,
            hang_connect: false,
            fail_discovery: false,
            hang_discovery: false,
            fail_writes: false,
        }
    }
}

pub struct SimulatedTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    peripheral: Mutex<SimulatedPeripheral>,
    scanning: AtomicBool,
    connections: Mutex<Vec<PeripheralId>>,
    writes: Mutex<Vec<Vec<u8>>>,
    connect_calls: AtomicUsize,
    peak_connections: AtomicUsize,
    writes_in_flight: AtomicUsize,
    peak_writes_in_flight: AtomicUsize,
}

impl SimulatedTransport {
    pub fn new(peripheral: SimulatedPeripheral, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            events,
            peripheral: Mutex::new(peripheral),
            scanning: AtomicBool::new(false),
            connections: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            peak_connections: AtomicUsize::new(0),
            writes_in_flight: AtomicUsize::new(0),
            peak_writes_in_flight: AtomicUsize::new(0),
        }
    }

    /// Change the peripheral's behaviour.
    pub fn configure(&self, update: impl FnOnce(&mut SimulatedPeripheral)) {
        update(&mut self.peripheral());
    }

    /// Simulate the glasses going out of range.
    pub fn drop_connection(&self) {
        let dropped: Vec<PeripheralId> = self.connections().drain(..).collect();
        for id in dropped {
            info!("[sim] {} went away", id);
            let _ = self.events.send(TransportEvent::Disconnected(id));
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn live_connections(&self) -> usize {
        self.connections().len()
    }

    pub fn peak_connections(&self) -> usize {
        self.peak_connections.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrent_writes(&self) -> usize {
        self.peak_writes_in_flight.load(Ordering::SeqCst)
    }

    fn peripheral(&self) -> std::sync::MutexGuard<'_, SimulatedPeripheral> {
        self.peripheral.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connections(&self) -> std::sync::MutexGuard<'_, Vec<PeripheralId>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_connected(&self, id: &PeripheralId) -> bool {
        self.connections().contains(id)
    }
}

impl Transport for SimulatedTransport {
    async fn start_scan(&self, _name_filter: &str) -> Result<(), TransportError> {
        self.scanning.store(true, Ordering::SeqCst);

        let peripheral = self.peripheral().clone();
        if peripheral.advertising {
            // Something else is always on the air.
            let _ = self
                .events
                .send(TransportEvent::PeripheralDiscovered(DiscoveredPeripheral {
                    id: PeripheralId("SIM:00:00:00:00:02".to_string()),
                    name: "Unknown".to_string(),
                    signal_strength: -88,
                }));
            let _ = self
                .events
                .send(TransportEvent::PeripheralDiscovered(DiscoveredPeripheral {
                    id: peripheral.id,
                    name: peripheral.name,
                    signal_strength: -52,
                }));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let (id, accept, hang) = {
            let p = self.peripheral();
            (p.id.clone(), p.accept_connections, p.hang_connect)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if *peripheral != id || !accept {
            return Err(TransportError::new("connection refused"));
        }

        let live = {
            let mut connections = self.connections();
            connections.push(id.clone());
            connections.len()
        };
        self.peak_connections.fetch_max(live, Ordering::SeqCst);

        info!("[sim] {} connected", id);
        let _ = self.events.send(TransportEvent::Connected(id));
        Ok(())
    }

    async fn discover_services(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Vec<GattService>, TransportError> {
        if !self.is_connected(peripheral) {
            return Err(TransportError::new("not connected"));
        }

        let (services, fail, hang) = {
            let p = self.peripheral();
            (p.services.clone(), p.fail_discovery, p.hang_discovery)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(TransportError::new("GATT table unreachable"));
        }
        Ok(services)
    }

    async fn write(&self, target: &WriteTarget, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected(&target.peripheral) {
            return Err(TransportError::new("not connected"));
        }

        let in_flight = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writes_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.writes_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.peripheral().fail_writes {
            return Err(TransportError::new("write rejected"));
        }

        match protocol::decode(payload) {
            Ok(message) => info!("[sim] glasses received {:?}", message),
            Err(e) => warn!("[sim] glasses could not parse payload: {}", e),
        }
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(payload.to_vec());
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<(), TransportError> {
        self.connections().retain(|id| id != peripheral);
        Ok(())
    }
}
