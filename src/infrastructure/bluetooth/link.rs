//! Link Manager
//!
//! Owns the single connection to the glasses. All state transitions and writes
//! happen on one actor task; callers talk to it through the cloneable
//! [`LinkManager`] handle and read state from a `watch` snapshot without
//! touching the actor.
//!
//! ```text
//! Idle --start_scan--> Scanning --name match--> Connecting --connected--> ServiceDiscovery
//!  ^                      |                          |                          |
//!  |                  (timeout)               (refused/lost)           (char. resolved)
//!  |                      v                          v                          v
//!  +------------------- Idle        Disconnected <------------------------- Ready
//!  +----------------------------------- close ----------+
//! ```
//!
//! Connect and service discovery each run under `connect_timeout`; running
//! out of time counts as a failed connect.
//!
//! Reconnection is never automatic: after a drop the caller scans again.

use crate::domain::errors::{LinkError, TransportError};
use crate::domain::models::{AppEvent, LinkState, MessageSeverity, OutboundMessage, StatusMessage};
use crate::domain::ports::MessageSink;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    DiscoveredPeripheral, GattService, PeripheralId, Transport, TransportEvent, WriteTarget,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Exact advertised name of the glasses
    pub target_name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub scan_timeout: Duration,
    /// Budget for each of connect and service discovery
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    /// Payloads above this size are still written, with a warning
    pub soft_payload_limit: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target_name: protocol::DEVICE_NAME.to_string(),
            service_uuid: protocol::SERVICE_UUID,
            characteristic_uuid: protocol::MESSAGE_CHAR_UUID,
            scan_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(2),
            soft_payload_limit: 512,
        }
    }
}

impl From<&Settings> for LinkConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            target_name: settings.target_device_name.clone(),
            service_uuid: settings.service_uuid,
            characteristic_uuid: settings.characteristic_uuid,
            scan_timeout: settings.scan_timeout(),
            connect_timeout: settings.connect_timeout(),
            write_timeout: settings.write_timeout(),
            soft_payload_limit: settings.soft_payload_limit,
        }
    }
}

/// Identity of an established connection. Lives from the transport's
/// connected event until disconnect or close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    pub id: u64,
    pub peripheral: PeripheralId,
}

enum LinkCommand {
    StartScan {
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Results of work the actor hands off to spawned tasks.
enum Completion {
    ConnectFailed {
        attempt: u64,
        reason: String,
    },
    ServicesResolved {
        attempt: u64,
        result: Result<Vec<GattService>, TransportError>,
    },
}

/// Handle to the link actor.
#[derive(Clone)]
pub struct LinkManager {
    commands: mpsc::UnboundedSender<LinkCommand>,
    state: watch::Receiver<LinkState>,
    ready_link: watch::Receiver<Option<u64>>,
}

impl LinkManager {
    /// Spawn the link actor on the current runtime.
    ///
    /// `transport_events` must be the receiving end of the channel the
    /// transport was built with.
    pub fn spawn<T: Transport>(
        transport: Arc<T>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        config: LinkConfig,
        app_events: mpsc::UnboundedSender<AppEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let (ready_tx, ready_rx) = watch::channel(None);

        let actor = LinkActor {
            transport,
            config,
            state: state_tx,
            ready_link: ready_tx,
            app_events,
            completions: completion_tx,
            attempt: 0,
            pending: None,
            link: None,
            scan_deadline: None,
        };
        let task = tokio::spawn(actor.run(command_rx, transport_events, completion_rx));

        (
            Self {
                commands: command_tx,
                state: state_rx,
                ready_link: ready_rx,
            },
            task,
        )
    }

    /// Start looking for the glasses. Legal from `Idle` and `Disconnected`
    /// (the stale connection is released first); any other state is busy.
    pub async fn start_scan(&self) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LinkCommand::StartScan { reply })
            .map_err(|_| LinkError::ManagerStopped)?;
        rx.await.map_err(|_| LinkError::ManagerStopped)?
    }

    /// Encode and write one message. Fails fast with `LinkNotReady` unless
    /// the link is `Ready`; never waits for readiness.
    pub async fn send_message(&self, message: OutboundMessage) -> Result<(), LinkError> {
        if self.state() != LinkState::Ready {
            return Err(LinkError::LinkNotReady);
        }
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LinkCommand::Send { message, reply })
            .map_err(|_| LinkError::ManagerStopped)?;
        rx.await.map_err(|_| LinkError::ManagerStopped)?
    }

    /// Tear down whatever is in progress and return to `Idle`. Idempotent;
    /// no write reaches the transport after this returns.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(LinkCommand::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Id of the link while it is `Ready`, `None` otherwise. Every new
    /// connection gets a fresh id, so a drop and reconnect between two
    /// reads still shows up as a change.
    pub fn subscribe_ready(&self) -> watch::Receiver<Option<u64>> {
        self.ready_link.clone()
    }
}

impl MessageSink for LinkManager {
    async fn send(&self, message: OutboundMessage) -> Result<(), LinkError> {
        self.send_message(message).await
    }
}

struct ActiveLink {
    handle: LinkHandle,
    target: Option<WriteTarget>,
}

struct LinkActor<T: Transport> {
    transport: Arc<T>,
    config: LinkConfig,
    state: watch::Sender<LinkState>,
    ready_link: watch::Sender<Option<u64>>,
    app_events: mpsc::UnboundedSender<AppEvent>,
    completions: mpsc::UnboundedSender<Completion>,
    /// Bumped on every scan and release; late completions from an older
    /// attempt are dropped.
    attempt: u64,
    pending: Option<PeripheralId>,
    link: Option<ActiveLink>,
    scan_deadline: Option<Instant>,
}

impl<T: Transport> LinkActor<T> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<LinkCommand>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            let deadline = self.scan_deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = transport_events.recv() => self.handle_transport_event(event).await,
                Some(completion) = completions.recv() => self.handle_completion(completion).await,
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_scan_timeout().await;
                }
            }
        }

        debug!("All link handles dropped, shutting down link actor");
        self.release().await;
        self.set_state(LinkState::Idle);
    }

    async fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::StartScan { reply } => {
                let result = self.start_scan().await;
                let _ = reply.send(result);
            }
            LinkCommand::Send { message, reply } => {
                let result = self.write(message).await;
                let _ = reply.send(result);
            }
            LinkCommand::Close { reply } => {
                self.release().await;
                self.set_state(LinkState::Idle);
                let _ = reply.send(());
            }
        }
    }

    fn current(&self) -> LinkState {
        *self.state.borrow()
    }

    fn set_state(&self, next: LinkState) {
        let ready = match (next, self.link.as_ref()) {
            (LinkState::Ready, Some(link)) => Some(link.handle.id),
            _ => None,
        };
        self.ready_link.send_if_modified(|current| {
            let changed = *current != ready;
            *current = ready;
            changed
        });

        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Link state: {} -> {}", previous, next);
            let _ = self.app_events.send(AppEvent::LinkState(next));
        }
    }

    fn report(&self, error: LinkError) {
        warn!("Link error: {}", error);
        let _ = self.app_events.send(AppEvent::LinkError(error));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self
            .app_events
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }

    async fn start_scan(&mut self) -> Result<(), LinkError> {
        match self.current() {
            LinkState::Idle => {}
            LinkState::Disconnected => self.release().await,
            busy => return Err(LinkError::LinkBusy(busy)),
        }

        self.attempt += 1;
        info!(
            "Scanning for {:?} ({:?} budget)",
            self.config.target_name, self.config.scan_timeout
        );

        if let Err(e) = self.transport.start_scan(&self.config.target_name).await {
            error!("Failed to start scan: {}", e);
            self.set_state(LinkState::Idle);
            return Err(LinkError::ScanFailed(e.to_string()));
        }

        self.scan_deadline = Some(Instant::now() + self.config.scan_timeout);
        self.set_state(LinkState::Scanning);
        self.send_log("Scanning for glasses...", MessageSeverity::Info);
        Ok(())
    }

    async fn on_scan_timeout(&mut self) {
        self.scan_deadline = None;
        if self.current() != LinkState::Scanning {
            return;
        }

        info!("Scan budget exhausted without finding {:?}", self.config.target_name);
        if let Err(e) = self.transport.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        self.set_state(LinkState::Idle);
        self.report(LinkError::DeviceNotFound);
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeripheralDiscovered(peripheral) => self.on_discovered(peripheral).await,
            TransportEvent::Connected(id) => self.on_connected(id),
            TransportEvent::Disconnected(id) => self.on_disconnected(id),
        }
    }

    async fn on_discovered(&mut self, peripheral: DiscoveredPeripheral) {
        if self.current() != LinkState::Scanning {
            return;
        }
        debug!(
            "Found device {:?} ({}, {} dBm)",
            peripheral.name, peripheral.id, peripheral.signal_strength
        );
        if peripheral.name != self.config.target_name {
            return;
        }

        info!("Found {} at {}, connecting", peripheral.name, peripheral.id);
        self.scan_deadline = None;
        if let Err(e) = self.transport.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        self.pending = Some(peripheral.id.clone());
        self.set_state(LinkState::Connecting);
        self.send_log("Connecting to glasses...", MessageSeverity::Info);

        let transport = self.transport.clone();
        let completions = self.completions.clone();
        let attempt = self.attempt;
        let budget = self.config.connect_timeout;
        let id = peripheral.id;
        tokio::spawn(async move {
            let reason = match time::timeout(budget, transport.connect(&id)).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no connection within {:?}", budget),
            };
            let _ = completions.send(Completion::ConnectFailed { attempt, reason });
        });
    }

    fn on_connected(&mut self, id: PeripheralId) {
        if self.current() != LinkState::Connecting || self.pending.as_ref() != Some(&id) {
            debug!("Ignoring connected event for {}", id);
            return;
        }

        self.pending = None;
        self.link = Some(ActiveLink {
            handle: LinkHandle {
                id: self.attempt,
                peripheral: id.clone(),
            },
            target: None,
        });
        self.set_state(LinkState::ServiceDiscovery);

        let transport = self.transport.clone();
        let completions = self.completions.clone();
        let attempt = self.attempt;
        let budget = self.config.connect_timeout;
        tokio::spawn(async move {
            let result = time::timeout(budget, transport.discover_services(&id))
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::new(format!(
                        "no service table within {:?}",
                        budget
                    )))
                });
            let _ = completions.send(Completion::ServicesResolved { attempt, result });
        });
    }

    fn on_disconnected(&mut self, id: PeripheralId) {
        let state = self.current();

        if self.pending.as_ref() == Some(&id) {
            self.pending = None;
            self.set_state(LinkState::Disconnected);
            self.report(LinkError::ConnectFailed(
                "peripheral disconnected before the link was established".to_string(),
            ));
            return;
        }

        let Some(link) = self.link.take_if(|link| link.handle.peripheral == id) else {
            debug!("Ignoring disconnect from {}", id);
            return;
        };

        info!("Link {} to {} dropped", link.handle.id, id);
        self.set_state(LinkState::Disconnected);
        match state {
            LinkState::ServiceDiscovery => self.report(LinkError::ConnectFailed(
                "peripheral disconnected during service discovery".to_string(),
            )),
            LinkState::Ready => self.send_log("Glasses disconnected", MessageSeverity::Warning),
            _ => {}
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::ConnectFailed { attempt, reason } => {
                if attempt != self.attempt || self.current() != LinkState::Connecting {
                    return;
                }
                error!("Connect failed: {}", reason);
                // A late success must not leave a second connection behind.
                if let Some(id) = self.pending.take() {
                    if let Err(e) = self.transport.disconnect(&id).await {
                        debug!("Failed to cancel connect to {}: {}", id, e);
                    }
                }
                self.set_state(LinkState::Disconnected);
                self.report(LinkError::ConnectFailed(reason));
            }
            Completion::ServicesResolved { attempt, result } => {
                if attempt != self.attempt || self.current() != LinkState::ServiceDiscovery {
                    return;
                }
                self.on_services(result);
            }
        }
    }

    fn on_services(&mut self, result: Result<Vec<GattService>, TransportError>) {
        if self.link.is_none() {
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(e) => {
                error!("Service discovery failed: {}", e);
                self.set_state(LinkState::Disconnected);
                self.report(LinkError::ConnectFailed(format!(
                    "service discovery failed: {}",
                    e
                )));
                return;
            }
        };
        info!("Found {} services", services.len());

        let resolved = services.iter().any(|service| {
            service.uuid == self.config.service_uuid
                && service.characteristics.contains(&self.config.characteristic_uuid)
        });
        if !resolved {
            // Still physically connected; the caller decides when to close.
            error!(
                "Characteristic {} not found under service {}",
                self.config.characteristic_uuid, self.config.service_uuid
            );
            self.set_state(LinkState::Disconnected);
            self.report(LinkError::ServiceNotFound);
            return;
        }

        let (service, characteristic) = (self.config.service_uuid, self.config.characteristic_uuid);
        if let Some(link) = self.link.as_mut() {
            link.target = Some(WriteTarget {
                peripheral: link.handle.peripheral.clone(),
                service,
                characteristic,
            });
            info!("Write characteristic resolved, link {} ready", link.handle.id);
        }
        self.set_state(LinkState::Ready);
        self.send_log("Connection established!", MessageSeverity::Success);
    }

    async fn write(&mut self, message: OutboundMessage) -> Result<(), LinkError> {
        if self.current() != LinkState::Ready {
            return Err(LinkError::LinkNotReady);
        }
        let Some(target) = self.link.as_ref().and_then(|link| link.target.clone()) else {
            return Err(LinkError::LinkNotReady);
        };

        let payload = protocol::encode(&message);
        if payload.len() > self.config.soft_payload_limit {
            warn!(
                "{} payload is {} bytes, above the {} byte write size",
                message.kind(),
                payload.len(),
                self.config.soft_payload_limit
            );
        }

        match time::timeout(
            self.config.write_timeout,
            self.transport.write(&target, &payload),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!("Sent {} message ({} bytes)", message.kind(), payload.len());
                Ok(())
            }
            Ok(Err(e)) => Err(LinkError::WriteFailed(e.to_string())),
            Err(_) => Err(LinkError::WriteFailed(format!(
                "no ack within {:?}",
                self.config.write_timeout
            ))),
        }
    }

    /// Drop any scan, pending connect, or live link.
    async fn release(&mut self) {
        self.attempt += 1;

        if self.scan_deadline.take().is_some() || self.current() == LinkState::Scanning {
            if let Err(e) = self.transport.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }

        if let Some(id) = self.pending.take() {
            if let Err(e) = self.transport.disconnect(&id).await {
                warn!("Failed to cancel connect to {}: {}", id, e);
            }
        }

        if let Some(link) = self.link.take() {
            info!("Releasing link {} to {}", link.handle.id, link.handle.peripheral);
            if let Err(e) = self.transport.disconnect(&link.handle.peripheral).await {
                warn!("Failed to disconnect {}: {}", link.handle.peripheral, e);
            }
            self.send_log("Disconnected from glasses", MessageSeverity::Info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Direction;
    use crate::infrastructure::bluetooth::simulated::{SimulatedPeripheral, SimulatedTransport};

    struct Harness {
        manager: LinkManager,
        transport: Arc<SimulatedTransport>,
        events: mpsc::UnboundedReceiver<AppEvent>,
    }

    fn harness(peripheral: SimulatedPeripheral) -> Harness {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(SimulatedTransport::new(peripheral, transport_tx));
        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let (manager, _task) =
            LinkManager::spawn(transport.clone(), transport_rx, LinkConfig::default(), app_tx);
        Harness {
            manager,
            transport,
            events: app_rx,
        }
    }

    fn glasses() -> SimulatedPeripheral {
        SimulatedPeripheral::glasses(
            protocol::DEVICE_NAME,
            protocol::SERVICE_UUID,
            protocol::MESSAGE_CHAR_UUID,
        )
    }

    async fn wait_for(manager: &LinkManager, state: LinkState) {
        manager
            .subscribe()
            .wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .unwrap();
    }

    async fn next_error(events: &mut mpsc::UnboundedReceiver<AppEvent>) -> LinkError {
        loop {
            match events.recv().await {
                Some(AppEvent::LinkError(e)) => return e,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    fn nav() -> OutboundMessage {
        OutboundMessage::Nav {
            direction: Direction::Left,
            distance: "0.3 mi".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_connect_and_send() {
        let h = harness(glasses());

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;

        h.manager.send_message(nav()).await.unwrap();
        assert_eq!(h.transport.writes(), vec![protocol::encode(&nav())]);
        assert_eq!(h.transport.live_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_outside_ready_never_touches_transport() {
        let h = harness(glasses());

        assert_eq!(h.manager.send_message(nav()).await, Err(LinkError::LinkNotReady));

        h.transport.configure(|p| p.accept_connections = false);
        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Disconnected).await;
        assert_eq!(h.manager.send_message(nav()).await, Err(LinkError::LinkNotReady));

        assert!(h.transport.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_times_out_without_match() {
        let mut h = harness(glasses());
        h.transport.configure(|p| p.advertising = false);

        let started = Instant::now();
        h.manager.start_scan().await.unwrap();
        assert_eq!(h.manager.state(), LinkState::Scanning);

        assert_eq!(next_error(&mut h.events).await, LinkError::DeviceNotFound);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(h.manager.state(), LinkState::Idle);
        assert!(!h.transport.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_names_are_ignored() {
        let mut h = harness(SimulatedPeripheral::glasses(
            "Not_The_Glasses",
            protocol::SERVICE_UUID,
            protocol::MESSAGE_CHAR_UUID,
        ));

        h.manager.start_scan().await.unwrap();
        assert_eq!(next_error(&mut h.events).await, LinkError::DeviceNotFound);
        assert_eq!(h.transport.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connect_reports_connect_failed() {
        let mut h = harness(glasses());
        h.transport.configure(|p| p.accept_connections = false);

        h.manager.start_scan().await.unwrap();
        assert!(matches!(
            next_error(&mut h.events).await,
            LinkError::ConnectFailed(_)
        ));
        assert_eq!(h.manager.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_characteristic_leaves_link_for_caller_to_close() {
        let mut h = harness(SimulatedPeripheral::glasses(
            protocol::DEVICE_NAME,
            protocol::SERVICE_UUID,
            Uuid::from_u128(0x1234),
        ));

        h.manager.start_scan().await.unwrap();
        assert_eq!(next_error(&mut h.events).await, LinkError::ServiceNotFound);
        assert_eq!(h.manager.state(), LinkState::Disconnected);
        assert_eq!(h.transport.live_connections(), 1);

        h.manager.close().await;
        assert_eq!(h.manager.state(), LinkState::Idle);
        assert_eq!(h.transport.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_connect_times_out() {
        let mut h = harness(glasses());
        h.transport.configure(|p| p.hang_connect = true);

        let started = Instant::now();
        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Connecting).await;

        assert!(matches!(
            next_error(&mut h.events).await,
            LinkError::ConnectFailed(_)
        ));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(h.manager.state(), LinkState::Disconnected);

        // The link is free for another attempt.
        h.transport.configure(|p| p.hang_connect = false);
        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;
        assert_eq!(h.transport.live_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_discovery_times_out() {
        let mut h = harness(glasses());
        h.transport.configure(|p| p.hang_discovery = true);

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::ServiceDiscovery).await;

        time::sleep(Duration::from_secs(3600)).await;
        assert!(matches!(
            next_error(&mut h.events).await,
            LinkError::ConnectFailed(_)
        ));
        assert_eq!(h.manager.state(), LinkState::Disconnected);

        h.manager.close().await;
        assert_eq!(h.transport.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_error_reports_connect_failed() {
        let mut h = harness(glasses());
        h.transport.configure(|p| p.fail_discovery = true);

        h.manager.start_scan().await.unwrap();
        match next_error(&mut h.events).await {
            LinkError::ConnectFailed(reason) => assert!(reason.contains("GATT table unreachable")),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(h.manager.state(), LinkState::Disconnected);
        assert_eq!(h.manager.send_message(nav()).await, Err(LinkError::LinkNotReady));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_during_discovery_reports_connect_failed() {
        let mut h = harness(glasses());
        h.transport.configure(|p| p.hang_discovery = true);

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::ServiceDiscovery).await;
        h.transport.drop_connection();

        match next_error(&mut h.events).await {
            LinkError::ConnectFailed(reason) => assert!(reason.contains("service discovery")),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(h.manager.state(), LinkState::Disconnected);
        assert_eq!(h.transport.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_id_changes_on_reconnect() {
        let h = harness(glasses());
        let ready = h.manager.subscribe_ready();
        assert_eq!(*ready.borrow(), None);

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;
        let first = *ready.borrow();
        assert!(first.is_some());

        h.transport.drop_connection();
        wait_for(&h.manager, LinkState::Disconnected).await;
        assert_eq!(*ready.borrow(), None);

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;
        let second = *ready.borrow();
        assert!(second.is_some());
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_scan_while_ready_is_rejected() {
        let h = harness(glasses());

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;

        assert_eq!(
            h.manager.start_scan().await,
            Err(LinkError::LinkBusy(LinkState::Ready))
        );
        assert_eq!(h.manager.state(), LinkState::Ready);
        assert_eq!(h.transport.connect_calls(), 1);
        assert!(h.transport.peak_connections() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peripheral_drop_then_manual_reconnect() {
        let h = harness(glasses());

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;

        h.transport.drop_connection();
        wait_for(&h.manager, LinkState::Disconnected).await;
        assert_eq!(h.manager.send_message(nav()).await, Err(LinkError::LinkNotReady));

        // Nothing reconnects on its own.
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.manager.state(), LinkState::Disconnected);
        assert_eq!(h.transport.connect_calls(), 1);

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;
        h.manager.send_message(nav()).await.unwrap();

        assert_eq!(h.transport.connect_calls(), 2);
        assert!(h.transport.peak_connections() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let h = harness(glasses());

        h.manager.close().await;
        assert_eq!(h.manager.state(), LinkState::Idle);

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;

        h.manager.close().await;
        h.manager.close().await;
        assert_eq!(h.manager.state(), LinkState::Idle);
        assert_eq!(h.transport.live_connections(), 0);
        assert_eq!(h.manager.send_message(nav()).await, Err(LinkError::LinkNotReady));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_scanning_stops_scan() {
        let h = harness(glasses());
        h.transport.configure(|p| p.advertising = false);

        h.manager.start_scan().await.unwrap();
        h.manager.close().await;

        assert_eq!(h.manager.state(), LinkState::Idle);
        assert!(!h.transport.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_keeps_link_ready() {
        let h = harness(glasses());

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;
        h.transport.configure(|p| p.fail_writes = true);

        assert!(matches!(
            h.manager.send_message(nav()).await,
            Err(LinkError::WriteFailed(_))
        ));
        assert_eq!(h.manager.state(), LinkState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_payload_is_still_written() {
        let h = harness(glasses());

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;

        let long = OutboundMessage::Notify {
            app: "Mail".to_string(),
            title: "x".repeat(1024),
        };
        h.manager.send_message(long.clone()).await.unwrap();
        assert_eq!(h.transport.writes(), vec![protocol::encode(&long)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sends_are_serialized() {
        let h = harness(glasses());

        h.manager.start_scan().await.unwrap();
        wait_for(&h.manager, LinkState::Ready).await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let manager = h.manager.clone();
            tasks.push(tokio::spawn(async move {
                manager
                    .send_message(OutboundMessage::Time {
                        hhmm: format!("10:0{}", i),
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(h.transport.writes().len(), 8);
        assert_eq!(h.transport.peak_concurrent_writes(), 1);
    }
}
