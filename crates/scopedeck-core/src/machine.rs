//! Session state machine.
//!
//! Every transition is `(state, event) -> (state, effects)` with no I/O, so the
//! whole poll loop can be exercised without a backend or a real clock. The
//! driver in `session.rs` turns effects into backend calls and surface
//! updates and reports their results back as events.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

use scopedeck_backend::StreamRequest;
use scopedeck_logging::LogEvent;

use crate::{Mode, SessionParameters, SurfaceUpdate};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Configuring,
    Streaming,
    /// Tearing down, either after a stop or while recovering from a failure
    Stopping,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    Completed,
    Stopped,
    Failed { error: String, reconnected: bool },
}

/// Something the driver must do
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Push every channel configuration to the backend
    ApplyChannels,
    Setup(StreamRequest),
    Pull,
    CheckLiveness,
    /// Read the stop request flag (no suspension)
    CheckStop,
    StopStream,
    ClearStopRequest,
    Save { bin_size: u32 },
    Reconnect,
    StartProgress(Duration),
    CancelProgress,
    Surface(SurfaceUpdate),
    Log(LogEvent),
    Finish(Exit),
}

/// Results reported back by the driver
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ChannelsApplied,
    SetupCompleted { actual_interval: f64 },
    Pulled { overflow: bool, at: Instant },
    LivenessChecked { active: bool },
    StopChecked { requested: bool },
    StreamStopped,
    /// Autosave finished; save failures never abort a session
    Saved,
    Failed { op: &'static str, error: String },
    ReconnectFinished { error: Option<String> },
}

/// State of one capture session, from `begin` until `Effect::Finish`
#[derive(Debug, Clone)]
pub struct SessionMachine {
    params: SessionParameters,
    autosave: bool,
    phase: Phase,
    actual_interval: Option<f64>,
    iterations: u64,
    warning_count: u32,
    last_warning: Option<Instant>,
    alert_active: bool,
    pending_exit: Option<Exit>,
    failure: Option<String>,
}

impl SessionMachine {
    /// Enter CONFIGURING. The caller has already checked that the session
    /// was idle and that at least one channel is enabled.
    pub fn begin(params: SessionParameters, autosave: bool) -> (Self, Vec<Effect>) {
        let machine = Self {
            params,
            autosave,
            phase: Phase::Configuring,
            actual_interval: None,
            iterations: 0,
            warning_count: 0,
            last_warning: None,
            alert_active: false,
            pending_exit: None,
            failure: None,
        };

        let effects = vec![
            Effect::Log(LogEvent::SessionStarted {
                mode: params.mode.to_string(),
                stream_duration: params.stream_duration,
                buffer_duration: params.buffer_duration,
                requested_interval: params.requested_sample_interval,
            }),
            Effect::Surface(SurfaceUpdate::ControlsDisabled(true)),
            Effect::Surface(SurfaceUpdate::OverflowAlert(false)),
            Effect::ApplyChannels,
        ];
        (machine, effects)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> Mode {
        self.params.mode
    }

    pub fn params(&self) -> &SessionParameters {
        &self.params
    }

    pub fn actual_interval(&self) -> Option<f64> {
        self.actual_interval
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn warning_count(&self) -> u32 {
        self.warning_count
    }

    pub fn last_warning(&self) -> Option<Instant> {
        self.last_warning
    }

    pub fn alert_active(&self) -> bool {
        self.alert_active
    }

    /// Apply one event and return the effects to run, in order
    pub fn step(&mut self, event: Event) -> Vec<Effect> {
        match (self.phase, event) {
            (Phase::Idle, event) => {
                warn!(?event, "Event delivered to an idle session");
                Vec::new()
            }

            // Any failure before the session is back to idle
            (_, Event::Failed { op, error }) => self.fail(op, error),
            (Phase::Stopping, Event::ReconnectFinished { error }) if self.failure.is_some() => {
                self.finish_failed(error)
            }

            (Phase::Configuring, Event::ChannelsApplied) => {
                let request = self
                    .params
                    .stream_request(self.params.requested_sample_interval);
                vec![Effect::Setup(request)]
            }
            (Phase::Configuring, Event::SetupCompleted { actual_interval }) => {
                self.start_streaming(actual_interval)
            }

            (Phase::Streaming, Event::Pulled { overflow, at }) => self.on_pull(overflow, at),
            (Phase::Streaming, Event::LivenessChecked { active }) => self.on_liveness(active),
            (Phase::Streaming, Event::SetupCompleted { actual_interval }) => {
                // Transparent restart after the backend dropped the stream
                let mut effects = Vec::new();
                if self.actual_interval != Some(actual_interval) {
                    self.actual_interval = Some(actual_interval);
                    effects.push(Effect::Surface(SurfaceUpdate::SampleRate {
                        mode: self.params.mode,
                        hz: 1.0 / actual_interval,
                    }));
                }
                effects.push(Effect::CheckStop);
                effects
            }
            (Phase::Streaming, Event::StopChecked { requested }) => {
                if requested {
                    let mut effects = vec![Effect::Log(LogEvent::StopRequested)];
                    effects.extend(self.begin_stop(Exit::Stopped));
                    effects
                } else {
                    vec![Effect::Pull]
                }
            }

            (Phase::Stopping, Event::StreamStopped) => {
                let mut effects = vec![Effect::ClearStopRequest];
                if self.params.mode == Mode::Single && self.autosave {
                    effects.push(Effect::Save { bin_size: 1 });
                } else {
                    effects.extend(self.finish());
                }
                effects
            }
            (Phase::Stopping, Event::Saved) => self.finish(),

            (phase, event) => {
                warn!(?phase, ?event, "Unexpected session event");
                Vec::new()
            }
        }
    }

    fn start_streaming(&mut self, actual_interval: f64) -> Vec<Effect> {
        self.phase = Phase::Streaming;
        self.actual_interval = Some(actual_interval);
        let mode = self.params.mode;

        let mut effects = vec![
            Effect::Log(LogEvent::IntervalNegotiated {
                requested: self.params.requested_sample_interval,
                actual: actual_interval,
            }),
            Effect::Surface(SurfaceUpdate::SampleRate {
                mode,
                hz: 1.0 / actual_interval,
            }),
            Effect::Surface(SurfaceUpdate::Pulsing { mode, active: true }),
        ];
        if mode == Mode::Single {
            effects.push(Effect::StartProgress(self.params.buffer_window()));
            effects.push(Effect::Surface(SurfaceUpdate::OverflowCount(0)));
        }
        effects.push(Effect::Pull);
        effects
    }

    fn on_pull(&mut self, overflow: bool, at: Instant) -> Vec<Effect> {
        self.iterations += 1;
        let mode = self.params.mode;
        let mut effects = Vec::new();

        if overflow {
            self.warning_count += 1;
            self.last_warning = Some(at);
            effects.push(Effect::Log(LogEvent::OverflowDetected {
                mode: mode.to_string(),
                count: self.warning_count,
            }));
            match mode {
                Mode::Live => {
                    if !self.alert_active {
                        self.alert_active = true;
                        effects.push(Effect::Surface(SurfaceUpdate::OverflowAlert(true)));
                    }
                }
                Mode::Single => {
                    effects.push(Effect::Surface(SurfaceUpdate::OverflowCount(
                        self.warning_count,
                    )));
                }
            }
        } else if mode == Mode::Live && self.alert_active && self.warning_scrolled_out(at) {
            self.alert_active = false;
            effects.push(Effect::Log(LogEvent::AlertCleared));
            effects.push(Effect::Surface(SurfaceUpdate::OverflowAlert(false)));
        }

        effects.push(Effect::Surface(SurfaceUpdate::RefreshChart));
        effects.push(Effect::CheckLiveness);
        effects
    }

    /// The offending sample has left the visible window
    fn warning_scrolled_out(&self, now: Instant) -> bool {
        match self.last_warning {
            Some(last) => now.saturating_duration_since(last) > self.params.buffer_window(),
            None => true,
        }
    }

    fn on_liveness(&mut self, active: bool) -> Vec<Effect> {
        if active {
            return vec![Effect::CheckStop];
        }
        match self.params.mode {
            Mode::Live => {
                let interval = self
                    .actual_interval
                    .unwrap_or(self.params.requested_sample_interval);
                vec![
                    Effect::Log(LogEvent::StreamRestarted {
                        iteration: self.iterations,
                    }),
                    Effect::Setup(self.params.stream_request(interval)),
                ]
            }
            // The one-shot stream ran its full duration
            Mode::Single => self.begin_stop(Exit::Completed),
        }
    }

    fn begin_stop(&mut self, exit: Exit) -> Vec<Effect> {
        self.phase = Phase::Stopping;
        self.pending_exit = Some(exit);
        let mut effects = Vec::new();
        if self.params.mode == Mode::Single {
            effects.push(Effect::CancelProgress);
        }
        effects.push(Effect::Surface(SurfaceUpdate::Pulsing {
            mode: self.params.mode,
            active: false,
        }));
        effects.push(Effect::StopStream);
        effects
    }

    fn finish(&mut self) -> Vec<Effect> {
        let exit = self.pending_exit.take().unwrap_or(Exit::Stopped);
        self.phase = Phase::Idle;
        let mut effects = Vec::new();
        if self.params.mode == Mode::Single {
            effects.push(Effect::Surface(SurfaceUpdate::RefreshChart));
        }
        effects.push(Effect::Surface(SurfaceUpdate::ControlsDisabled(false)));
        effects.push(Effect::Finish(exit));
        effects
    }

    fn fail(&mut self, op: &'static str, error: String) -> Vec<Effect> {
        if self.failure.is_some() {
            // Already recovering; the reconnect outcome decides the rest
            return Vec::new();
        }
        self.phase = Phase::Stopping;
        self.pending_exit = None;
        self.failure = Some(error.clone());

        let mut effects = vec![Effect::Log(LogEvent::RemoteCallFailed {
            op: op.to_string(),
            error,
        })];
        if self.params.mode == Mode::Single {
            effects.push(Effect::CancelProgress);
        }
        effects.push(Effect::Surface(SurfaceUpdate::Pulsing {
            mode: self.params.mode,
            active: false,
        }));
        effects.push(Effect::ClearStopRequest);
        effects.push(Effect::Reconnect);
        effects
    }

    fn finish_failed(&mut self, reconnect_error: Option<String>) -> Vec<Effect> {
        self.phase = Phase::Idle;
        let error = self.failure.take().unwrap_or_default();
        vec![
            Effect::Log(LogEvent::ReconnectAttempted {
                success: reconnect_error.is_none(),
                error: reconnect_error.clone(),
            }),
            Effect::Surface(SurfaceUpdate::ControlsDisabled(false)),
            Effect::Finish(Exit::Failed {
                error,
                reconnected: reconnect_error.is_none(),
            }),
        ]
    }
}
