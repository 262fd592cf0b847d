//! # scopedeck-picker
//!
//! Output directory picker for the scopedeck console.
//!
//! The picker runs in a secondary window. It builds a [`DirectoryNode`] tree
//! from the backend's flat directory listing, shows it as a collapsible
//! [`TreeView`], and posts the chosen path back to its opener over a
//! [`MessagePort`]. The opener keeps the latest choice in a
//! [`SelectedDirectory`] slot.

mod channel;
mod launcher;
mod tree;
mod view;

pub use channel::{
    accept, message_port, MessageInbox, MessagePort, Posted, SelectedDirectory, SelectionMessage,
    SELECTED_DIRECTORY,
};
pub use launcher::{OpenOutcome, PickerLauncher, PickerWindow, WindowHost, PICKER_TITLE};
pub use tree::DirectoryNode;
pub use view::{Row, TreeView};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    #[error("No row {row} in a tree of {len} rows")]
    NoSuchRow { row: usize, len: usize },
}
