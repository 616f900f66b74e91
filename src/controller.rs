//! Wires user intents to the link and the periodic pushes.

use crate::domain::errors::{LinkError, NavigationError};
use crate::domain::models::{AppEvent, LinkState};
use crate::domain::navigation::StepScheduler;
use crate::domain::notifications::{IncomingNotification, NotificationForwarder};
use crate::domain::ports::RouteProvider;
use crate::domain::settings::Settings;
use crate::domain::time_sync::TimeSyncTicker;
use crate::infrastructure::bluetooth::LinkManager;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Snapshot for the `status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub link: LinkState,
    /// `(steps sent, total)` while navigating
    pub navigation: Option<(usize, usize)>,
}

pub struct Controller<R: RouteProvider> {
    link: Arc<LinkManager>,
    scheduler: StepScheduler<LinkManager>,
    time_sync: TimeSyncTicker<LinkManager>,
    forwarder: NotificationForwarder<LinkManager>,
    routes: R,
}

impl<R: RouteProvider> Controller<R> {
    /// Must be called inside a runtime; the time sync ticker starts right away.
    pub fn new(
        link: LinkManager,
        routes: R,
        settings: &Settings,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let link = Arc::new(link);
        let scheduler = StepScheduler::new(link.clone(), settings.nav_step_interval(), events);
        let time_sync = TimeSyncTicker::spawn(
            link.clone(),
            link.subscribe_ready(),
            settings.time_sync_interval(),
        );
        let forwarder = NotificationForwarder::new(link.clone());

        Self {
            link,
            scheduler,
            time_sync,
            forwarder,
            routes,
        }
    }

    pub async fn connect(&self) -> Result<(), LinkError> {
        self.link.start_scan().await
    }

    /// Stops navigation before dropping the link so no cue is lost mid-write.
    pub async fn disconnect(&self) {
        self.scheduler.stop().await;
        self.link.close().await;
    }

    /// Fetch a route to `destination` and start playing it back.
    ///
    /// Returns the number of steps in the session.
    pub async fn start_navigation(&self, destination: &str) -> Result<usize, NavigationError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(NavigationError::EmptyDestination);
        }
        if !self.link.is_ready() {
            return Err(NavigationError::NotConnected);
        }

        info!("Fetching route to {}", destination);
        let steps = self.routes.fetch_route(destination).await?;
        let total = steps.len();
        self.scheduler.start(steps).await?;
        Ok(total)
    }

    pub async fn stop_navigation(&self) -> bool {
        self.scheduler.stop().await
    }

    pub async fn sync_time(&self) -> Result<(), LinkError> {
        self.time_sync.sync_now().await
    }

    pub async fn forward_notification(
        &self,
        notification: &IncomingNotification,
    ) -> Result<bool, LinkError> {
        self.forwarder
            .forward(&notification.app, &notification.title)
            .await
    }

    pub async fn status(&self) -> ControllerStatus {
        ControllerStatus {
            link: self.link.state(),
            navigation: self.scheduler.progress().await,
        }
    }

    pub async fn shutdown(&self) {
        info!("Shutting down");
        if self.scheduler.stop().await {
            warn!("Navigation was still running at shutdown");
        }
        self.time_sync.stop();
        self.link.close().await;
    }
}
