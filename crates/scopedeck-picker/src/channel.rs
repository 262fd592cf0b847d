use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// `type` tag of a directory selection
pub const SELECTED_DIRECTORY: &str = "selected-directory";

/// The only payload the picker sends to its opener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SelectionMessage {
    SelectedDirectory {
        #[serde(rename = "fullPath")]
        full_path: String,
    },
}

/// A message as delivered to the opener
#[derive(Debug, Clone, PartialEq)]
pub struct Posted {
    /// Sender's origin. Recorded for diagnostics, never checked.
    pub origin: String,
    pub data: Value,
}

/// Create a connected picker-side port and opener-side inbox
pub fn message_port(origin: impl Into<String>) -> (MessagePort, MessageInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MessagePort {
            origin: origin.into(),
            tx,
        },
        MessageInbox { rx },
    )
}

/// Picker side of the channel. Posting never waits and never reports
/// whether anyone received the message.
#[derive(Debug, Clone)]
pub struct MessagePort {
    origin: String,
    tx: mpsc::UnboundedSender<Posted>,
}

impl MessagePort {
    pub fn post(&self, data: Value) {
        let posted = Posted {
            origin: self.origin.clone(),
            data,
        };
        if self.tx.send(posted).is_err() {
            debug!(origin = %self.origin, "Opener is gone; message dropped");
        }
    }

    pub fn send_selection(&self, full_path: &str) {
        let message = SelectionMessage::SelectedDirectory {
            full_path: full_path.to_string(),
        };
        match serde_json::to_value(&message) {
            Ok(data) => self.post(data),
            Err(e) => warn!(error = %e, "Failed to encode selection"),
        }
    }
}

/// Opener side of the channel
#[derive(Debug)]
pub struct MessageInbox {
    rx: mpsc::UnboundedReceiver<Posted>,
}

impl MessageInbox {
    /// Apply every incoming message to `display` until all ports are
    /// dropped. Returns how many messages were accepted.
    pub async fn listen(mut self, display: SelectedDirectory) -> usize {
        let mut accepted = 0;
        while let Some(posted) = self.rx.recv().await {
            if accept(&posted, &display) {
                accepted += 1;
            }
        }
        accepted
    }
}

/// The opener's "selected directory" label
#[derive(Debug, Clone)]
pub struct SelectedDirectory {
    slot: Arc<watch::Sender<String>>,
}

impl SelectedDirectory {
    pub fn new(initial: impl Into<String>) -> Self {
        let (slot, _) = watch::channel(initial.into());
        Self {
            slot: Arc::new(slot),
        }
    }

    pub fn get(&self) -> String {
        self.slot.borrow().clone()
    }

    pub fn set(&self, path: impl Into<String>) {
        self.slot.send_replace(path.into());
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.slot.subscribe()
    }
}

/// Overwrite `display` if `posted` is a directory selection; ignore
/// anything else
pub fn accept(posted: &Posted, display: &SelectedDirectory) -> bool {
    match serde_json::from_value::<SelectionMessage>(posted.data.clone()) {
        Ok(SelectionMessage::SelectedDirectory { full_path }) => {
            debug!(origin = %posted.origin, path = %full_path, "Directory selected");
            display.set(full_path);
            true
        }
        Err(_) => {
            debug!(origin = %posted.origin, "Ignoring unrelated message");
            false
        }
    }
}
