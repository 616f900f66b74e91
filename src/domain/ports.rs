//! Seams between the domain logic and its collaborators.

use crate::domain::errors::{LinkError, RouteError};
use crate::domain::models::{NavigationStep, OutboundMessage};
use std::future::Future;

/// Anything that can push an [`OutboundMessage`] to the glasses.
///
/// Implemented by the link manager; periodic tasks and the notification
/// forwarder only ever see this trait.
pub trait MessageSink: Send + Sync + 'static {
    fn send(&self, message: OutboundMessage)
        -> impl Future<Output = Result<(), LinkError>> + Send;
}

/// Turns a destination into an ordered list of navigation steps.
pub trait RouteProvider: Send + Sync + 'static {
    fn fetch_route(
        &self,
        destination: &str,
    ) -> impl Future<Output = Result<Vec<NavigationStep>, RouteError>> + Send;
}
