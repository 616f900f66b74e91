//! Line-oriented front-end on stdin/stdout.

use crate::controller::Controller;
use crate::domain::models::{AppEvent, MessageSeverity};
use crate::domain::notifications::IncomingNotification;
use crate::domain::ports::RouteProvider;
use std::io::BufRead;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const HELP: &str = "\
Commands:
  scan                     find and connect to the glasses
  close                    drop the link
  sync                     push the current time now
  nav <destination>        start turn-by-turn playback
  stop                     stop navigation
  notify <app> | <title>   push a notification
  status                   show link and navigation state
  help                     show this list
  quit                     disconnect and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Scan,
    Close,
    Sync,
    Navigate(String),
    Stop,
    Notify { app: String, title: String },
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}', type 'help' for the list")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl UserCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_lowercase().as_str() {
            "scan" | "connect" => Ok(Self::Scan),
            "close" | "disconnect" => Ok(Self::Close),
            "sync" => Ok(Self::Sync),
            "nav" | "navigate" => {
                if rest.is_empty() {
                    return Err(CommandError::Usage("nav <destination>"));
                }
                Ok(Self::Navigate(rest.to_string()))
            }
            "stop" => Ok(Self::Stop),
            "notify" => match rest.split_once('|') {
                Some((app, title)) => Ok(Self::Notify {
                    app: app.trim().to_string(),
                    title: title.trim().to_string(),
                }),
                None => Err(CommandError::Usage("notify <app> | <title>")),
            },
            "status" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

pub fn describe(event: &AppEvent) -> String {
    match event {
        AppEvent::LinkState(state) => format!("link: {}", state),
        AppEvent::LinkError(e) => format!("link error: {}", e),
        AppEvent::NavigationStep {
            index,
            total,
            instruction,
        } => format!("step {}/{}: {}", index + 1, total, instruction),
        AppEvent::NavigationComplete => "navigation complete".to_string(),
        AppEvent::NavigationStopped => "navigation stopped".to_string(),
        AppEvent::LogMessage(status) => {
            let tag = match status.severity {
                MessageSeverity::Info => "info",
                MessageSeverity::Success => "ok",
                MessageSeverity::Warning => "warn",
                MessageSeverity::Error => "error",
            };
            format!("[{}] {}", tag, status.message)
        }
    }
}

/// Blocking stdin reads stay on their own thread so the runtime can shut
/// down while a read is pending.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });
    rx
}

async fn execute<R: RouteProvider>(controller: &Controller<R>, command: UserCommand) {
    match command {
        UserCommand::Scan => match controller.connect().await {
            Ok(()) => println!("scanning..."),
            Err(e) => println!("cannot scan: {}", e),
        },
        UserCommand::Close => {
            controller.disconnect().await;
            println!("link closed");
        }
        UserCommand::Sync => match controller.sync_time().await {
            Ok(()) => println!("time sent"),
            Err(e) => println!("time sync failed: {}", e),
        },
        UserCommand::Navigate(destination) => {
            match controller.start_navigation(&destination).await {
                Ok(total) => println!("navigating to {} ({} steps)", destination, total),
                Err(e) => println!("cannot navigate: {}", e),
            }
        }
        UserCommand::Stop => {
            if !controller.stop_navigation().await {
                println!("no navigation running");
            }
        }
        UserCommand::Notify { app, title } => {
            let notification = IncomingNotification { app, title };
            match controller.forward_notification(&notification).await {
                Ok(true) => println!("notification sent"),
                Ok(false) => println!("dropped: app and title must both be non-empty"),
                Err(e) => println!("notification failed: {}", e),
            }
        }
        UserCommand::Status => {
            let status = controller.status().await;
            match status.navigation {
                Some((sent, total)) => {
                    println!("link: {}, navigation: {}/{} steps sent", status.link, sent, total)
                }
                None => println!("link: {}, navigation: idle", status.link),
            }
        }
        UserCommand::Help => println!("{}", HELP),
        UserCommand::Quit => {}
    }
}

/// Runs until `quit`, end of input or Ctrl-C, then shuts the controller down.
pub async fn run<R: RouteProvider>(
    controller: Controller<R>,
    mut events: mpsc::UnboundedReceiver<AppEvent>,
    mut notifications: mpsc::UnboundedReceiver<IncomingNotification>,
) -> anyhow::Result<()> {
    let mut lines = spawn_stdin_reader();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("{}", HELP);

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    info!("End of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match UserCommand::parse(&line) {
                    Ok(UserCommand::Quit) => break,
                    Ok(command) => execute(&controller, command).await,
                    Err(e) => println!("{}", e),
                }
            }
            Some(event) = events.recv() => println!("{}", describe(&event)),
            Some(notification) = notifications.recv() => {
                match controller.forward_notification(&notification).await {
                    Ok(true) => println!("forwarded notification from {}", notification.app),
                    Ok(false) => {}
                    Err(e) => warn!("Could not forward notification: {}", e),
                }
            }
            result = &mut ctrl_c => {
                result?;
                info!("Interrupted");
                break;
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}
