//! Test doubles shared by unit tests across the crate.

use crate::domain::errors::LinkError;
use crate::domain::models::OutboundMessage;
use crate::domain::ports::MessageSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Records every message it is asked to send. When `failing` is set every
/// send is attempted (and recorded) but reports `LinkNotReady`.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl MessageSink for RecordingSink {
    async fn send(&self, message: OutboundMessage) -> Result<(), LinkError> {
        self.sent.lock().unwrap().push(message);
        if self.failing.load(Ordering::SeqCst) {
            Err(LinkError::LinkNotReady)
        } else {
            Ok(())
        }
    }
}
