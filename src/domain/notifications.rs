use crate::domain::errors::LinkError;
use crate::domain::models::OutboundMessage;
use crate::domain::ports::MessageSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// A notification as reported by the phone's notification listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingNotification {
    pub app: String,
    pub title: String,
}

/// Pushes phone notifications to the glasses. De-duplication is the
/// listener's job.
pub struct NotificationForwarder<S: MessageSink> {
    sink: Arc<S>,
}

impl<S: MessageSink> NotificationForwarder<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }

    /// Returns `Ok(false)` when the notification was dropped because the app
    /// name or title is empty.
    pub async fn forward(&self, app: &str, title: &str) -> Result<bool, LinkError> {
        if app.is_empty() || title.is_empty() {
            debug!("Dropping notification with empty app or title");
            return Ok(false);
        }

        info!("Forwarding notification from {}", app);
        self.sink
            .send(OutboundMessage::Notify {
                app: app.to_string(),
                title: title.to_string(),
            })
            .await?;
        Ok(true)
    }
}
