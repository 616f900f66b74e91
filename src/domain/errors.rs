//! Error taxonomy shared by the link, navigation and codec layers.

use crate::domain::models::LinkState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("target device not found before the scan budget ran out")]
    DeviceNotFound,
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("write characteristic not found on the connected device")]
    ServiceNotFound,
    #[error("link is not ready")]
    LinkNotReady,
    #[error("link is busy ({0})")]
    LinkBusy(LinkState),
    #[error("scan failed: {0}")]
    ScanFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("link manager has stopped")]
    ManagerStopped,
}

/// Failure reported by a route provider. Passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RouteError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("route has no steps")]
    EmptySteps,
    #[error("route fetch failed: {0}")]
    RouteFetchFailed(#[from] RouteError),
    #[error("destination is empty")]
    EmptyDestination,
    #[error("not connected to the glasses")]
    NotConnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

/// Failure reported by a transport backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
