//! Transport seam
//!
//! The link manager drives any backend that implements [`Transport`].
//! Requests go through the trait methods; anything the radio reports on its
//! own (advertisements, connection state changes) is pushed as a
//! [`TransportEvent`] onto the channel handed to the backend when it is built.

use crate::domain::errors::TransportError;
use std::fmt;
use std::future::Future;
use uuid::Uuid;

/// Platform identifier of a peripheral (address or device id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    pub id: PeripheralId,
    pub name: String,
    pub signal_strength: i16,
}

/// A GATT service and the characteristics it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Resolved endpoint that accepts message writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub peripheral: PeripheralId,
    pub service: Uuid,
    pub characteristic: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PeripheralDiscovered(DiscoveredPeripheral),
    Connected(PeripheralId),
    Disconnected(PeripheralId),
}

pub trait Transport: Send + Sync + 'static {
    /// Begin reporting advertisements. `name_filter` is a hint; the link
    /// manager still matches names itself.
    fn start_scan(&self, name_filter: &str)
        -> impl Future<Output = Result<(), TransportError>> + Send;

    fn stop_scan(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Request a connection. Success is reported as [`TransportEvent::Connected`].
    fn connect(
        &self,
        peripheral: &PeripheralId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn discover_services(
        &self,
        peripheral: &PeripheralId,
    ) -> impl Future<Output = Result<Vec<GattService>, TransportError>> + Send;

    fn write(
        &self,
        target: &WriteTarget,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release the connection. Must tolerate peripherals that are already gone.
    fn disconnect(
        &self,
        peripheral: &PeripheralId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
