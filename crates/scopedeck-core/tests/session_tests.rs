use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scopedeck_backend::{
    Backend, BackendError, ChannelConfig, ChannelId, ChannelTraces, Coupling,
    SaveReceipt, SaveRequest, StreamRequest, TimeAxis,
};
use scopedeck_core::{
    AcquisitionSession, Mode, Phase, RejectReason, SaveTarget, SessionOptions, SessionOutcome,
    SessionParameters, SessionSurface, SurfaceUpdate, LIVE_STREAM_DURATION_SECS,
};
use scopedeck_logging::{LogFormat, Logger};
use tokio::time::Instant;

// ============================================================
// Test doubles
// ============================================================

/// What the scripted instrument does on each call
struct Script {
    /// Overflow flag returned by successive pulls (then false)
    overflows: VecDeque<bool>,
    /// Liveness returned by successive checks (then true)
    active: VecDeque<bool>,
    actual_interval: Option<f64>,
    pull_delay: Duration,
    fail_on: Option<&'static str>,
    hang_on: Option<&'static str>,
    fail_reconnect: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            overflows: VecDeque::new(),
            active: VecDeque::new(),
            actual_interval: None,
            pull_delay: Duration::from_millis(10),
            fail_on: None,
            hang_on: None,
            fail_reconnect: false,
        }
    }
}

#[derive(Default)]
struct ScriptedBackend {
    script: Mutex<Script>,
    calls: Mutex<Vec<String>>,
    setups: Mutex<Vec<StreamRequest>>,
    pulled_at: Mutex<Vec<Instant>>,
}

impl ScriptedBackend {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Default::default()
        })
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    async fn scripted(&self, op: &'static str) -> Result<(), BackendError> {
        let (fail, hang) = {
            let script = self.script.lock().unwrap();
            (script.fail_on == Some(op), script.hang_on == Some(op))
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(BackendError::Remote {
                op,
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn set_channel(&self, id: ChannelId, _config: &ChannelConfig) -> Result<(), BackendError> {
        self.record(format!("set_channel {id}"));
        self.scripted("set_channel").await
    }

    async fn stream_setup(&self, request: &StreamRequest) -> Result<f64, BackendError> {
        self.record("stream_setup");
        self.scripted("stream_setup").await?;
        self.setups.lock().unwrap().push(*request);
        let actual = self.script.lock().unwrap().actual_interval;
        Ok(actual.unwrap_or(request.sample_interval))
    }

    async fn stream_pull(&self) -> Result<bool, BackendError> {
        self.record("stream_pull");
        let delay = self.script.lock().unwrap().pull_delay;
        tokio::time::sleep(delay).await;
        self.scripted("stream_pull").await?;
        self.pulled_at.lock().unwrap().push(Instant::now());
        Ok(self.script.lock().unwrap().overflows.pop_front().unwrap_or(false))
    }

    async fn stream_is_active(&self) -> Result<bool, BackendError> {
        self.record("stream_is_active");
        self.scripted("stream_is_active").await?;
        Ok(self.script.lock().unwrap().active.pop_front().unwrap_or(true))
    }

    async fn stream_stop(&self) -> Result<(), BackendError> {
        self.record("stream_stop");
        self.scripted("stream_stop").await
    }

    async fn reconnect(&self) -> Result<(), BackendError> {
        self.record("reconnect");
        if self.script.lock().unwrap().fail_reconnect {
            return Err(BackendError::Disconnected);
        }
        Ok(())
    }

    async fn save_buffer(&self, request: &SaveRequest) -> Result<SaveReceipt, BackendError> {
        self.record(format!("save_buffer {}", request.bin_size));
        Ok(SaveReceipt {
            success: true,
            title: "File saved!".to_string(),
            body: format!("{}\\capture{}.hdf5", request.directory, request.suffix),
        })
    }

    async fn directory_listing(&self) -> Result<Vec<String>, BackendError> {
        Ok(Vec::new())
    }

    async fn time_axis(&self, _bin_size: u32) -> Result<TimeAxis, BackendError> {
        Ok(TimeAxis::default())
    }

    async fn time_series(&self, _bin_size: u32) -> Result<ChannelTraces, BackendError> {
        Ok(ChannelTraces::new())
    }

    async fn spectrum(&self, _bin_size: u32) -> Result<ChannelTraces, BackendError> {
        Ok(ChannelTraces::new())
    }

    async fn band_power(
        &self,
        _f_lo: f64,
        _f_hi: f64,
    ) -> Result<BTreeMap<ChannelId, Option<f64>>, BackendError> {
        Ok(BTreeMap::new())
    }
}

#[derive(Default)]
struct RecordingSurface {
    updates: Mutex<Vec<SurfaceUpdate>>,
}

impl RecordingSurface {
    fn updates(&self) -> Vec<SurfaceUpdate> {
        self.updates.lock().unwrap().clone()
    }

    fn position(&self, pred: impl Fn(&SurfaceUpdate) -> bool) -> Option<usize> {
        self.updates().iter().rposition(pred)
    }
}

impl SessionSurface for RecordingSurface {
    fn apply(&self, update: SurfaceUpdate) {
        self.updates.lock().unwrap().push(update);
    }

    fn save_target(&self) -> SaveTarget {
        SaveTarget {
            directory: "C:\\data".to_string(),
            suffix: "_%H%M".to_string(),
        }
    }
}

/// Helper: a session with channel A enabled
fn session_with(
    backend: Arc<ScriptedBackend>,
    surface: Arc<RecordingSurface>,
    options: SessionOptions,
) -> AcquisitionSession {
    let logger = Arc::new(Logger::new(LogFormat::Compact));
    let mut session = AcquisitionSession::new(backend, surface, logger, options);
    session
        .apply_channel(ChannelId::A, ChannelConfig::new(true, 2.0, Coupling::Dc))
        .unwrap();
    session
}

fn autosave() -> SessionOptions {
    SessionOptions {
        autosave: true,
        ..Default::default()
    }
}

// ============================================================
// Guards
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_start_without_enabled_channel_is_a_no_op() {
    let backend = ScriptedBackend::new(Script::default());
    let surface = Arc::new(RecordingSurface::default());
    let logger = Arc::new(Logger::new(LogFormat::Compact));
    let mut session =
        AcquisitionSession::new(backend.clone(), surface.clone(), logger, Default::default());

    let outcome = session
        .start(SessionParameters::live(1.0, 1e-3).unwrap())
        .await;

    assert_eq!(
        outcome,
        SessionOutcome::Rejected {
            reason: RejectReason::NoChannelEnabled
        }
    );
    assert_eq!(outcome.exit_code(), 1);
    assert!(backend.calls().is_empty());
    assert!(surface.updates().is_empty());
    assert_eq!(session.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_range_is_rejected_while_idle() {
    let backend = ScriptedBackend::new(Script::default());
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend, surface, Default::default());

    assert!(session
        .apply_channel(ChannelId::B, ChannelConfig::new(true, 3.0, Coupling::Ac))
        .is_err());
    assert!(!session.channels().get(ChannelId::B).unwrap().enabled);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_ignored_while_idle() {
    let backend = ScriptedBackend::new(Script::default());
    let surface = Arc::new(RecordingSurface::default());
    let session = session_with(backend, surface, Default::default());

    let handle = session.stop_handle();
    assert!(!handle.stop());
    assert!(!handle.is_requested());
}

// ============================================================
// Single captures
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_single_reports_negotiated_rate() {
    let backend = ScriptedBackend::new(Script {
        active: VecDeque::from([true, false]),
        actual_interval: Some(100e-9),
        ..Default::default()
    });
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend.clone(), surface.clone(), Default::default());

    let outcome = session
        .start(SessionParameters::single(1.0, 150e-9).unwrap())
        .await;

    let SessionOutcome::Completed { stats } = &outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(stats.iterations, 2);
    assert!((stats.sample_rate - 1e7).abs() < 1e-3);
    assert!(surface.updates().iter().any(|u| matches!(
        u,
        SurfaceUpdate::SampleRate { mode: Mode::Single, hz } if (hz - 1e7).abs() < 1e-3
    )));

    // Every channel is pushed before the stream is configured
    let calls = backend.calls();
    assert_eq!(calls[..3], ["set_channel A", "set_channel B", "stream_setup"]);
    assert_eq!(backend.setups.lock().unwrap()[0].stream_duration, 1.0);
    assert_eq!(backend.count("stream_stop"), 1);
    assert_eq!(backend.count("save_buffer"), 0);
    assert_eq!(surface.updates().last(), Some(&SurfaceUpdate::ControlsDisabled(false)));
}

#[tokio::test(start_paused = true)]
async fn test_single_autosaves_once_before_final_refresh() {
    let backend = ScriptedBackend::new(Script {
        active: VecDeque::from([true, true, false]),
        ..Default::default()
    });
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend.clone(), surface.clone(), autosave());

    let outcome = session
        .start(SessionParameters::single(0.5, 1e-3).unwrap())
        .await;

    assert_eq!(outcome.as_str(), "completed");
    assert_eq!(backend.count("save_buffer"), 1);
    assert!(backend.calls().contains(&"save_buffer 1".to_string()));

    let notified = surface
        .position(|u| matches!(u, SurfaceUpdate::Notify(n) if n.success))
        .expect("save notification");
    let refreshed = surface
        .position(|u| *u == SurfaceUpdate::RefreshChart)
        .unwrap();
    assert!(notified < refreshed);
}

#[tokio::test(start_paused = true)]
async fn test_single_counts_overflows() {
    let backend = ScriptedBackend::new(Script {
        overflows: VecDeque::from([true, false, true]),
        active: VecDeque::from([true, true, false]),
        ..Default::default()
    });
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend, surface.clone(), Default::default());

    let outcome = session
        .start(SessionParameters::single(0.5, 1e-3).unwrap())
        .await;

    assert_eq!(outcome.stats().unwrap().warnings, 2);
    let counts: Vec<u32> = surface
        .updates()
        .iter()
        .filter_map(|u| match u {
            SurfaceUpdate::OverflowCount(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![0, 1, 2]);
    assert!(!surface
        .updates()
        .contains(&SurfaceUpdate::OverflowAlert(true)));
}

#[tokio::test(start_paused = true)]
async fn test_single_stop_still_autosaves() {
    let backend = ScriptedBackend::new(Script::default());
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend.clone(), surface, autosave());

    let handle = session.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(handle.stop());
    });

    let outcome = session
        .start(SessionParameters::single(10.0, 1e-3).unwrap())
        .await;

    assert_eq!(outcome.as_str(), "stopped");
    assert_eq!(backend.count("save_buffer"), 1);
    assert!(!session.progress().is_running());
}

// ============================================================
// Live streaming
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_live_stop_takes_effect_within_one_iteration() {
    let backend = ScriptedBackend::new(Script::default());
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend.clone(), surface.clone(), Default::default());

    let handle = session.stop_handle();
    let phase = session.subscribe_phase();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(handle.stop());
        // The request is only honoured at the next stop check
        assert_eq!(*phase.borrow(), Phase::Streaming);
        assert!(handle.is_requested());
        (Instant::now(), phase)
    });

    let outcome = session
        .start(SessionParameters::live(1.0, 1e-3).unwrap())
        .await;
    let (stopped_at, phase) = stopper.await.unwrap();
    assert_eq!(*phase.borrow(), Phase::Idle);

    assert_eq!(outcome.as_str(), "stopped");
    assert_eq!(outcome.exit_code(), 0);
    let late_pulls = backend
        .pulled_at
        .lock()
        .unwrap()
        .iter()
        .filter(|t| **t > stopped_at)
        .count();
    assert!(late_pulls <= 1, "{late_pulls} pulls after stop");
    assert_eq!(backend.count("stream_stop"), 1);
    assert_eq!(session.phase(), Phase::Idle);
    assert!(!session.stop_handle().is_requested());
    assert!(surface.updates().contains(&SurfaceUpdate::Pulsing {
        mode: Mode::Live,
        active: false
    }));
}

#[tokio::test(start_paused = true)]
async fn test_live_restarts_inactive_stream() {
    let backend = ScriptedBackend::new(Script {
        active: VecDeque::from([true, false]),
        actual_interval: Some(100e-9),
        ..Default::default()
    });
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend.clone(), surface, Default::default());

    let handle = session.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
    });

    let outcome = session
        .start(SessionParameters::live(1.0, 150e-9).unwrap())
        .await;

    assert_eq!(outcome.as_str(), "stopped");
    let setups = backend.setups.lock().unwrap().clone();
    assert_eq!(setups.len(), 2);
    assert_eq!(setups[0].sample_interval, 150e-9);
    assert_eq!(setups[1].sample_interval, 100e-9);
    assert_eq!(setups[1].stream_duration, LIVE_STREAM_DURATION_SECS);
    assert_eq!(backend.count("reconnect"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_live_alert_raised_once_and_cleared() {
    let backend = ScriptedBackend::new(Script {
        overflows: VecDeque::from([true, true]),
        ..Default::default()
    });
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend, surface.clone(), Default::default());

    let handle = session.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop();
    });

    session
        .start(SessionParameters::live(0.05, 1e-3).unwrap())
        .await;

    let alerts: Vec<bool> = surface
        .updates()
        .iter()
        .filter_map(|u| match u {
            SurfaceUpdate::OverflowAlert(on) => Some(*on),
            _ => None,
        })
        .collect();
    // Reset at start, raised once, cleared after the window scrolls
    assert_eq!(alerts, vec![false, true, false]);
}

// ============================================================
// Failures
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_failure_reconnects_once_and_returns_to_idle() {
    let backend = ScriptedBackend::new(Script {
        fail_on: Some("stream_pull"),
        fail_reconnect: true,
        ..Default::default()
    });
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend.clone(), surface.clone(), Default::default());

    let outcome = session
        .start(SessionParameters::single(1.0, 1e-3).unwrap())
        .await;

    let SessionOutcome::Failed {
        error, reconnected, ..
    } = &outcome
    else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert!(error.contains("scripted failure"));
    assert!(!reconnected);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(backend.count("reconnect"), 1);
    assert_eq!(backend.count("stream_stop"), 0);
    assert_eq!(session.phase(), Phase::Idle);
    assert!(!session.progress().is_running());
    assert_eq!(surface.updates().last(), Some(&SurfaceUpdate::ControlsDisabled(false)));

    // The session is usable again once the backend recovers
    backend.script.lock().unwrap().fail_on = None;
    backend.script.lock().unwrap().active = VecDeque::from([false]);
    let outcome = session
        .start(SessionParameters::single(1.0, 1e-3).unwrap())
        .await;
    assert_eq!(outcome.as_str(), "completed");
}

#[tokio::test(start_paused = true)]
async fn test_hung_call_times_out_into_failure() {
    let backend = ScriptedBackend::new(Script {
        hang_on: Some("stream_is_active"),
        ..Default::default()
    });
    let surface = Arc::new(RecordingSurface::default());
    let options = SessionOptions {
        call_timeout: Some(Duration::from_secs(1)),
        ..Default::default()
    };
    let mut session = session_with(backend.clone(), surface, options);

    let outcome = session
        .start(SessionParameters::live(1.0, 1e-3).unwrap())
        .await;

    let SessionOutcome::Failed {
        error, reconnected, ..
    } = &outcome
    else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert!(error.contains("timed out"), "{error}");
    assert!(reconnected);
    assert_eq!(backend.count("reconnect"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_failure_fails_the_session() {
    let backend = ScriptedBackend::new(Script {
        active: VecDeque::from([false]),
        fail_on: Some("stream_stop"),
        ..Default::default()
    });
    let surface = Arc::new(RecordingSurface::default());
    let mut session = session_with(backend.clone(), surface, autosave());

    let outcome = session
        .start(SessionParameters::single(1.0, 1e-3).unwrap())
        .await;

    assert_eq!(outcome.as_str(), "failed");
    assert_eq!(backend.count("save_buffer"), 0);
    assert_eq!(backend.count("reconnect"), 1);
}
