//! Terminal rendition of the session surface.

use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use scopedeck_backend::Backend;
use scopedeck_core::{
    BandPower, ChartRefresher, ChartSnapshot, Notification, SaveTarget, SessionSurface,
    SurfaceUpdate,
};
use scopedeck_logging::{LogEvent, Logger};
use scopedeck_picker::SelectedDirectory;

/// Session surface that draws on stderr
pub struct ConsoleSurface {
    directory: SelectedDirectory,
    suffix: String,
    refresher: Option<ChartRefresher>,
    /// Single-mode overflow counter, drawn on the progress line
    overflows: watch::Sender<u32>,
    /// Suppress human-oriented output (JSON mode)
    quiet: bool,
}

impl ConsoleSurface {
    pub fn new(directory: SelectedDirectory, suffix: impl Into<String>) -> Self {
        Self {
            directory,
            suffix: suffix.into(),
            refresher: None,
            overflows: watch::channel(0).0,
            quiet: false,
        }
    }

    pub fn with_refresher(mut self, refresher: ChartRefresher) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn subscribe_overflows(&self) -> watch::Receiver<u32> {
        self.overflows.subscribe()
    }
}

impl SessionSurface for ConsoleSurface {
    fn apply(&self, update: SurfaceUpdate) {
        match update {
            SurfaceUpdate::RefreshChart => {
                if let Some(refresher) = &self.refresher {
                    refresher.request();
                }
            }
            SurfaceUpdate::Notify(note) => {
                if !self.quiet {
                    print_notification(&note);
                }
            }
            SurfaceUpdate::OverflowAlert(true) if !self.quiet => {
                eprintln!(
                    "\n  {} {}",
                    "⚠".bright_yellow(),
                    "Overflow or voltage out of range!".bright_yellow().bold()
                );
            }
            SurfaceUpdate::OverflowCount(count) => {
                self.overflows.send_replace(count);
            }
            SurfaceUpdate::SampleRate { mode, hz } if !self.quiet => {
                eprintln!(
                    "  {} {} rate {}",
                    "•".dimmed(),
                    mode,
                    Logger::format_rate(hz).bright_cyan()
                );
            }
            other => debug!(update = ?other, "Surface update"),
        }
    }

    fn save_target(&self) -> SaveTarget {
        SaveTarget {
            directory: self.directory.get(),
            suffix: self.suffix.clone(),
        }
    }
}

pub fn print_notification(note: &Notification) {
    let title = if note.success {
        note.title.bright_green().bold()
    } else {
        note.title.bright_red().bold()
    };
    eprintln!();
    eprintln!("  {title}");
    eprintln!("  {}", note.body.dimmed());
}

pub fn print_band_power(power: &BandPower) {
    eprintln!("  Band {}..{} Hz", power.band.f_lo, power.band.f_hi);
    for (id, value) in &power.channels {
        match value {
            Some(v) => println!("  {id}: {}", format_power(*v).bright_cyan()),
            None => println!("  {id}: {}", "no data".dimmed()),
        }
    }
}

fn format_power(v: f64) -> String {
    format!("{v:.4e} V^2")
}

/// Chart refresher that logs every snapshot and redraws the status line
pub fn chart_refresher(
    backend: Arc<dyn Backend>,
    bin_size: u32,
    min_interval: Duration,
    timeout: Option<Duration>,
    logger: Arc<Logger>,
    quiet: bool,
) -> ChartRefresher {
    ChartRefresher::spawn(backend, bin_size, min_interval, timeout, move |snapshot| {
        logger.log(&LogEvent::ChartRefreshed {
            points: snapshot.points(),
            peaks: snapshot
                .peaks()
                .into_iter()
                .map(|(id, peak)| (id.to_string(), peak))
                .collect(),
        });
        if !quiet {
            draw_chart_status(&snapshot);
        }
    })
}

fn draw_chart_status(snapshot: &ChartSnapshot) {
    let line = chart_status(snapshot);
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "\r  {} {}", "▸".bright_cyan(), line.dimmed());
    let _ = stderr.flush();
}

fn chart_status(snapshot: &ChartSnapshot) -> String {
    let mut line = format!("{} pts", snapshot.points());
    let peak_hz = snapshot.peak_frequencies();
    for (id, peak) in snapshot.peaks() {
        line.push_str(&format!("  {id}: {peak:.3} V"));
        if let Some(hz) = peak_hz.get(&id) {
            line.push_str(&format!(" @ {hz:.1} Hz"));
        }
    }
    line
}

const BAR_WIDTH: usize = 30;

fn progress_line(percent: usize, overflows: u32) -> String {
    let filled = percent.min(100) * BAR_WIDTH / 100;
    format!(
        "[{}{}] {:>3}%  overflows: {}",
        "#".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        percent,
        overflows
    )
}

/// Redraw the progress line whenever the whole percentage or the overflow
/// count changes
pub fn spawn_progress_bar(
    mut progress: watch::Receiver<f64>,
    mut overflows: watch::Receiver<u32>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shown = None;
        loop {
            tokio::select! {
                changed = progress.changed() => if changed.is_err() { break },
                changed = overflows.changed() => if changed.is_err() { break },
            }
            let percent = progress.borrow_and_update().clamp(0.0, 100.0) as usize;
            let count = *overflows.borrow_and_update();
            if shown == Some((percent, count)) {
                continue;
            }
            shown = Some((percent, count));
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "\r  {}", progress_line(percent, count).bright_cyan());
            let _ = stderr.flush();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopedeck_backend::ChannelId;

    #[test]
    fn test_save_target_follows_selection() {
        let directory = SelectedDirectory::new("C:\\data");
        let surface = ConsoleSurface::new(directory.clone(), "_%H").quiet(true);
        assert_eq!(surface.save_target().directory, "C:\\data");

        directory.set("runs/2024");
        let target = surface.save_target();
        assert_eq!(target.directory, "runs/2024");
        assert_eq!(target.suffix, "_%H");
    }

    #[test]
    fn test_overflow_count_reaches_progress_line() {
        let surface = ConsoleSurface::new(SelectedDirectory::new("data"), "").quiet(true);
        let overflows = surface.subscribe_overflows();
        surface.apply(SurfaceUpdate::OverflowCount(3));
        assert_eq!(*overflows.borrow(), 3);

        let line = progress_line(50, *overflows.borrow());
        assert!(line.starts_with(&format!("[{}{}]", "#".repeat(15), " ".repeat(15))));
        assert!(line.ends_with(" 50%  overflows: 3"), "{line}");
    }

    #[test]
    fn test_chart_status_shows_spectrum_peak() {
        let snapshot = ChartSnapshot {
            axis: scopedeck_backend::TimeAxis {
                time: vec![0.0, 0.01, 0.02, 0.03],
                freq: vec![0.0, 25.0, 50.0],
            },
            traces: [(ChannelId::A, vec![0.5, -1.25, 0.0, 0.25])].into(),
            spectrum: [(ChannelId::A, vec![0.0, 0.1, 2.0])].into(),
        };
        assert_eq!(chart_status(&snapshot), "4 pts  A: 1.250 V @ 50.0 Hz");
    }

    #[test]
    fn test_power_format() {
        assert_eq!(format_power(0.5), "5.0000e-1 V^2");
    }
}
