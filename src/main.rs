use anyhow::Context;
use glasslink::controller::Controller;
use glasslink::domain::models::AppEvent;
use glasslink::domain::notifications::IncomingNotification;
use glasslink::domain::route::DemoRouteProvider;
use glasslink::domain::settings::{Settings, SettingsService};
use glasslink::infrastructure::bluetooth::simulated::{SimulatedPeripheral, SimulatedTransport};
use glasslink::infrastructure::bluetooth::{LinkConfig, LinkManager};
use glasslink::infrastructure::logging;
use glasslink::infrastructure::notification_source::{NotificationClient, NotificationSource};
use glasslink::presentation::console;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn spawn_link(settings: &Settings, events: mpsc::UnboundedSender<AppEvent>) -> LinkManager {
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let config = LinkConfig::from(settings);

    #[cfg(windows)]
    if !settings.simulate_transport {
        use glasslink::infrastructure::bluetooth::winrt::WinRtTransport;

        let transport = Arc::new(WinRtTransport::new(transport_tx));
        return LinkManager::spawn(transport, transport_rx, config, events).0;
    }

    info!("Using simulated glasses");
    let peripheral = SimulatedPeripheral::glasses(
        &settings.target_device_name,
        settings.service_uuid,
        settings.characteristic_uuid,
    );
    let transport = Arc::new(SimulatedTransport::new(peripheral, transport_tx));
    LinkManager::spawn(transport, transport_rx, config, events).0
}

/// `glasslink --notify <app> <title>` hands one notification to a running
/// instance and exits.
fn publish_notification(settings: &Settings, args: &[String]) -> anyhow::Result<()> {
    let [app, title] = args else {
        anyhow::bail!("usage: glasslink --notify <app> <title>");
    };
    let mut client = NotificationClient::connect(&settings.notification_socket_name)?;
    client.publish(&IncomingNotification {
        app: app.clone(),
        title: title.clone(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let settings_service = SettingsService::new().context("Failed to load settings")?;
    let settings = settings_service.get().clone();

    if args.first().map(String::as_str) == Some("--notify") {
        return publish_notification(&settings, &args[1..]);
    }

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting GlassLink");
    if !settings_service.path().exists() {
        match settings_service.save() {
            Ok(()) => info!("Wrote default settings to {}", settings_service.path().display()),
            Err(e) => warn!("Could not write default settings: {}", e),
        }
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (notification_tx, notification_rx) = mpsc::unbounded_channel();

    if let Err(e) = NotificationSource::spawn(&settings.notification_socket_name, notification_tx) {
        warn!("Notification forwarding disabled: {:#}", e);
    }

    let link = spawn_link(&settings, events_tx.clone());
    let controller = Controller::new(link, DemoRouteProvider, &settings, events_tx);

    console::run(controller, events_rx, notification_rx).await
}
