use tracing::{debug, info};

/// Title of the picker window
pub const PICKER_TITLE: &str = "Select output directory";

/// A live picker window
pub trait PickerWindow {
    fn is_open(&self) -> bool;

    /// Bring the window to the front
    fn focus(&mut self);
}

/// Something that can open picker windows
pub trait WindowHost {
    type Window: PickerWindow;

    fn open_window(&mut self, title: &str) -> Self::Window;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    /// An open window existed and was focused instead
    Focused,
}

/// Opens the picker, keeping at most one window live
pub struct PickerLauncher<H: WindowHost> {
    host: H,
    window: Option<H::Window>,
}

impl<H: WindowHost> PickerLauncher<H> {
    pub fn new(host: H) -> Self {
        Self { host, window: None }
    }

    pub fn open(&mut self) -> OpenOutcome {
        if let Some(window) = self.window.as_mut().filter(|w| w.is_open()) {
            debug!("Picker already open; focusing it");
            window.focus();
            return OpenOutcome::Focused;
        }
        info!(title = PICKER_TITLE, "Opening picker window");
        self.window = Some(self.host.open_window(PICKER_TITLE));
        OpenOutcome::Opened
    }

    pub fn is_open(&self) -> bool {
        self.window.as_ref().is_some_and(|w| w.is_open())
    }

    /// Forget the current window and return it
    pub fn take_window(&mut self) -> Option<H::Window> {
        self.window.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeHost {
        opened: usize,
        open: Arc<AtomicBool>,
        focused: Arc<AtomicUsize>,
    }

    struct FakeWindow {
        open: Arc<AtomicBool>,
        focused: Arc<AtomicUsize>,
    }

    impl PickerWindow for FakeWindow {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn focus(&mut self) {
            self.focused.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl WindowHost for FakeHost {
        type Window = FakeWindow;

        fn open_window(&mut self, _title: &str) -> FakeWindow {
            self.opened += 1;
            self.open.store(true, Ordering::SeqCst);
            FakeWindow {
                open: Arc::clone(&self.open),
                focused: Arc::clone(&self.focused),
            }
        }
    }

    #[test]
    fn test_reopen_focuses_existing_window() {
        let mut launcher = PickerLauncher::new(FakeHost::default());
        assert_eq!(launcher.open(), OpenOutcome::Opened);
        assert_eq!(launcher.open(), OpenOutcome::Focused);
        assert_eq!(launcher.open(), OpenOutcome::Focused);

        assert_eq!(launcher.host.opened, 1);
        assert_eq!(launcher.host.focused.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closed_window_is_replaced() {
        let mut launcher = PickerLauncher::new(FakeHost::default());
        launcher.open();
        launcher.host.open.store(false, Ordering::SeqCst);
        assert!(!launcher.is_open());

        assert_eq!(launcher.open(), OpenOutcome::Opened);
        assert_eq!(launcher.host.opened, 2);
        assert!(launcher.is_open());
    }
}
