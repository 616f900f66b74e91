//! Notification listener IPC
//!
//! The phone-side notification listener runs as its own process and hands
//! `(app, title)` pairs over a local socket, one JSON object per line:
//!
//! ```text
//! {"app":"Messages","title":"Lunch?"}
//! ```

use crate::domain::notifications::IncomingNotification;
use anyhow::{Context, Result};
use interprocess::local_socket::{
    prelude::*, GenericFilePath, GenericNamespaced, ListenerOptions, Name, NameType,
    Stream as LocalStream,
};
use std::io::{self, BufRead, BufReader, Write};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

fn socket_name(name: &str) -> io::Result<Name<'static>> {
    if GenericNamespaced::is_supported() {
        name.to_string().to_ns_name::<GenericNamespaced>()
    } else {
        std::env::temp_dir()
            .join(name)
            .to_fs_name::<GenericFilePath>()
    }
}

pub fn parse_line(line: &str) -> Result<IncomingNotification, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Accepts listener connections on a background thread and feeds every
/// notification into `sink`.
pub struct NotificationSource;

impl NotificationSource {
    pub fn spawn(
        name: &str,
        sink: mpsc::UnboundedSender<IncomingNotification>,
    ) -> Result<JoinHandle<()>> {
        let socket = socket_name(name)?;
        let listener = ListenerOptions::new()
            .name(socket)
            .create_sync()
            .with_context(|| format!("Failed to listen on {}", name))?;
        info!("Listening for notifications on {}", name);

        let handle = std::thread::Builder::new()
            .name("notification-source".to_string())
            .spawn(move || {
                for conn in listener.incoming().filter_map(|x| x.ok()) {
                    debug!("Notification listener connected");
                    if let Err(e) = handle_connection(conn, &sink) {
                        error!("Notification connection error: {}", e);
                    }
                    if sink.is_closed() {
                        break;
                    }
                }
            })
            .context("Failed to spawn notification source thread")?;

        Ok(handle)
    }
}

fn handle_connection(
    stream: LocalStream,
    sink: &mpsc::UnboundedSender<IncomingNotification>,
) -> Result<()> {
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(notification) => {
                if sink.send(notification).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Skipping malformed notification line: {}", e),
        }
    }
    Ok(())
}

/// Publishes notifications to a running [`NotificationSource`].
pub struct NotificationClient {
    stream: LocalStream,
}

impl NotificationClient {
    pub fn connect(name: &str) -> Result<Self> {
        let stream = LocalStream::connect(socket_name(name)?)
            .with_context(|| format!("No notification source listening on {}", name))?;
        Ok(Self { stream })
    }

    pub fn publish(&mut self, notification: &IncomingNotification) -> Result<()> {
        let line = serde_json::to_string(notification)? + "\n";
        self.stream.write_all(line.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let n = parse_line(r#"{"app":"Messages","title":"Lunch?"}"#).unwrap();
        assert_eq!(n.app, "Messages");
        assert_eq!(n.title, "Lunch?");
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(parse_line("hello").is_err());
        assert!(parse_line(r#"{"app":"Messages"}"#).is_err());
    }

    #[test]
    fn test_client_to_source() {
        let name = format!("glasslink-test-{}.sock", std::process::id());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _thread = NotificationSource::spawn(&name, tx).unwrap();

        let mut client = NotificationClient::connect(&name).unwrap();
        let sent = IncomingNotification {
            app: "Calendar".to_string(),
            title: "Standup in 5 min".to_string(),
        };
        client.publish(&sent).unwrap();

        assert_eq!(rx.blocking_recv(), Some(sent));
    }
}
