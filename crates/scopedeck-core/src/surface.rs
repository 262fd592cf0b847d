use serde::{Deserialize, Serialize};

use scopedeck_backend::SaveReceipt;

use crate::Mode;

/// A user-visible notification (the console's toast)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub success: bool,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn failure(body: impl Into<String>) -> Self {
        Self {
            success: false,
            title: "ERROR: File NOT saved!".to_string(),
            body: body.into(),
        }
    }
}

impl From<SaveReceipt> for Notification {
    fn from(receipt: SaveReceipt) -> Self {
        Self {
            success: receipt.success,
            title: receipt.title,
            body: receipt.body,
        }
    }
}

/// Where the current buffer should be saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTarget {
    pub directory: String,
    pub suffix: String,
}

/// Presentation changes requested by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceUpdate {
    /// Lock or unlock the mode-switching controls
    ControlsDisabled(bool),
    /// The negotiated sample rate, in Hz
    SampleRate { mode: Mode, hz: f64 },
    /// Pulse the mode's tab while it is capturing
    Pulsing { mode: Mode, active: bool },
    /// Live mode: persistent overflow alert on the control surface
    OverflowAlert(bool),
    /// Single mode: overflow counter shown next to the progress bar
    OverflowCount(u32),
    /// Fire-and-forget chart refresh
    RefreshChart,
    Notify(Notification),
}

/// The UI side of a session.
///
/// `apply` is called between suspension points and must not block; anything
/// slow (such as fetching chart data) belongs on another task.
pub trait SessionSurface: Send + Sync {
    fn apply(&self, update: SurfaceUpdate);

    /// Directory and file suffix used when the session autosaves
    fn save_target(&self) -> SaveTarget;
}
