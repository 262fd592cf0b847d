//! Terminal picker window for the `pick` command.
//!
//! The "window" is a task running a `dialoguer` select loop over the tree
//! view. It talks to the opener only through its message port.

use anyhow::{Context, Result};
use dialoguer::Select;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use scopedeck_backend::Backend;
use scopedeck_core::with_timeout;
use scopedeck_picker::{
    message_port, DirectoryNode, MessagePort, PickerLauncher, PickerWindow,
    SelectedDirectory, TreeView, WindowHost,
};

const DONE: &str = "✓ Done";

/// Opens picker windows fed by the backend's directory listing
pub struct TerminalHost {
    backend: Arc<dyn Backend>,
    separator: String,
    port: MessagePort,
    timeout: Option<Duration>,
}

impl TerminalHost {
    pub fn new(
        backend: Arc<dyn Backend>,
        separator: impl Into<String>,
        port: MessagePort,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            separator: separator.into(),
            port,
            timeout,
        }
    }
}

pub struct TerminalWindow {
    task: JoinHandle<Result<()>>,
}

impl TerminalWindow {
    /// Wait until the user closes the window
    pub async fn closed(self) -> Result<()> {
        self.task.await.context("Picker window panicked")?
    }
}

impl PickerWindow for TerminalWindow {
    fn is_open(&self) -> bool {
        !self.task.is_finished()
    }

    fn focus(&mut self) {
        // A terminal prompt is always in front
        info!("Picker window is already open");
    }
}

impl WindowHost for TerminalHost {
    type Window = TerminalWindow;

    fn open_window(&mut self, title: &str) -> TerminalWindow {
        let backend = Arc::clone(&self.backend);
        let separator = self.separator.clone();
        let port = self.port.clone();
        let timeout = self.timeout;
        let title = title.to_string();

        let task = tokio::spawn(async move {
            // The tree is rebuilt from a fresh listing on every open
            let paths = with_timeout(timeout, "directory_listing", backend.directory_listing())
                .await
                .context("Failed to fetch directory listing")?;
            let tree = DirectoryNode::build(&paths, &separator);
            tokio::task::spawn_blocking(move || run_dialog(&tree, port, &title))
                .await
                .context("Picker dialog panicked")?
        });
        TerminalWindow { task }
    }
}

fn run_dialog(tree: &DirectoryNode, port: MessagePort, title: &str) -> Result<()> {
    if tree.is_empty() {
        warn!("Backend returned no directories");
        return Ok(());
    }
    let mut view = TreeView::render(tree, move |path| port.send_selection(path));

    loop {
        let visible = view.visible_rows();
        let mut items: Vec<String> = visible
            .iter()
            .map(|&i| {
                let row = &view.rows()[i];
                let marker = match (row.is_dir, row.expanded) {
                    (false, _) => " ",
                    (true, false) => "▸",
                    (true, true) => "▾",
                };
                let name = if row.selected {
                    format!("[{}]", row.name)
                } else {
                    row.name.clone()
                };
                format!("{}{} {}", "  ".repeat(row.depth), marker, name)
            })
            .collect();
        items.push(DONE.to_string());

        let current = visible
            .iter()
            .position(|&i| view.rows()[i].selected)
            .unwrap_or(0);
        let choice = Select::new()
            .with_prompt(title)
            .items(&items)
            .default(current)
            .interact_opt()?;

        match choice {
            Some(index) if index < visible.len() => view.click(visible[index])?,
            _ => return Ok(()),
        }
    }
}

/// Open the picker and wait for it to close. Returns the final selection.
pub async fn pick_directory(
    backend: Arc<dyn Backend>,
    separator: &str,
    timeout: Option<Duration>,
    initial: String,
) -> Result<String> {
    let (port, inbox) = message_port("picker");
    let display = SelectedDirectory::new(initial);
    let listener = tokio::spawn(inbox.listen(display.clone()));

    let mut launcher = PickerLauncher::new(TerminalHost::new(backend, separator, port, timeout));
    launcher.open();
    let window = launcher
        .take_window()
        .context("Picker window failed to open")?;
    let result = window.closed().await;

    // Dropping the host drops the last port and ends the listener
    drop(launcher);
    let accepted = listener.await.context("Selection listener panicked")?;
    result?;

    info!(accepted, "Picker closed");
    Ok(display.get())
}
