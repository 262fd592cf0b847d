use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use scopedeck_backend::{Backend, BackendError, ChannelConfig, ChannelId};
use scopedeck_logging::{LogEvent, Logger};

use crate::machine::{Effect, Event, Exit, Phase, SessionMachine};
use crate::{
    save_buffer, with_timeout, ChannelSet, ProgressIndicator, RejectReason, SessionError,
    SessionOutcome, SessionParameters, SessionStats, SessionSurface, SurfaceUpdate, DEFAULT_TICK,
};

/// Runtime knobs of a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on each backend call; `None` waits forever
    pub call_timeout: Option<Duration>,
    /// Save the buffer after every single capture
    pub autosave: bool,
    pub progress_tick: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            call_timeout: Some(Duration::from_secs(10)),
            autosave: false,
            progress_tick: DEFAULT_TICK,
        }
    }
}

/// Cloneable handle used to request a stop from another task or thread
#[derive(Debug, Clone)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    phase: watch::Receiver<Phase>,
}

impl StopHandle {
    /// Ask the running session to stop. Honoured at the next stop check,
    /// which happens once per poll iteration. Returns false, without
    /// recording anything, unless a session is streaming.
    pub fn stop(&self) -> bool {
        if *self.phase.borrow() != Phase::Streaming {
            return false;
        }
        self.requested.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Runs acquisition sessions against one backend
pub struct AcquisitionSession {
    backend: Arc<dyn Backend>,
    surface: Arc<dyn SessionSurface>,
    logger: Arc<Logger>,
    channels: ChannelSet,
    options: SessionOptions,
    phase: watch::Sender<Phase>,
    stop_requested: Arc<AtomicBool>,
    progress: ProgressIndicator,
}

impl AcquisitionSession {
    pub fn new(
        backend: Arc<dyn Backend>,
        surface: Arc<dyn SessionSurface>,
        logger: Arc<Logger>,
        options: SessionOptions,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        let progress = ProgressIndicator::new(options.progress_tick);
        Self {
            backend,
            surface,
            logger,
            channels: ChannelSet::new(),
            options,
            phase,
            stop_requested: Arc::new(AtomicBool::new(false)),
            progress,
        }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn progress(&self) -> &ProgressIndicator {
        &self.progress
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            requested: Arc::clone(&self.stop_requested),
            phase: self.phase.subscribe(),
        }
    }

    /// Change one channel. The new configuration reaches the backend when
    /// the next session starts.
    pub fn apply_channel(&mut self, id: ChannelId, config: ChannelConfig) -> Result<(), SessionError> {
        let phase = self.phase();
        if phase != Phase::Idle {
            return Err(SessionError::Busy(phase));
        }
        self.channels.set(id, config)?;
        debug!(channel = %id, enabled = config.enabled, range = config.range, "Channel updated");
        Ok(())
    }

    /// Run one session to its end.
    ///
    /// Returns immediately with [`SessionOutcome::Rejected`] when a session
    /// is already running or no channel is enabled; nothing is sent to the
    /// backend in that case.
    pub async fn start(&mut self, params: SessionParameters) -> SessionOutcome {
        if self.phase() != Phase::Idle {
            warn!(mode = %params.mode, "Start ignored: a session is already running");
            return SessionOutcome::Rejected {
                reason: RejectReason::AlreadyRunning,
            };
        }
        if !self.channels.any_enabled() {
            info!(mode = %params.mode, "Start ignored: no channel enabled");
            return SessionOutcome::Rejected {
                reason: RejectReason::NoChannelEnabled,
            };
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        let started = Instant::now();
        let (mut machine, effects) = SessionMachine::begin(params, self.options.autosave);
        self.phase.send_replace(machine.phase());
        info!(
            mode = %params.mode,
            buffer_duration = params.buffer_duration,
            sample_interval = params.requested_sample_interval,
            "Session started"
        );

        let mut queue: VecDeque<Effect> = effects.into();
        let exit = loop {
            let Some(effect) = queue.pop_front() else {
                warn!(phase = ?machine.phase(), "Session stalled without finishing");
                self.surface.apply(SurfaceUpdate::ControlsDisabled(false));
                break Exit::Failed {
                    error: "session stalled".to_string(),
                    reconnected: false,
                };
            };
            if let Effect::Finish(exit) = effect {
                break exit;
            }
            if let Some(event) = self.execute(effect).await {
                queue.extend(machine.step(event));
                self.phase.send_replace(machine.phase());
            }
        };

        self.progress.cancel();
        self.phase.send_replace(Phase::Idle);
        self.finish(&machine, exit, started.elapsed())
    }

    fn finish(&self, machine: &SessionMachine, exit: Exit, elapsed: Duration) -> SessionOutcome {
        let stats = SessionStats {
            mode: machine.mode(),
            iterations: machine.iterations(),
            warnings: machine.warning_count(),
            sample_rate: machine.actual_interval().map_or(0.0, |dt| 1.0 / dt),
            total_duration_secs: elapsed.as_secs_f64(),
        };
        let outcome = match exit {
            Exit::Completed => SessionOutcome::Completed { stats },
            Exit::Stopped => SessionOutcome::Stopped { stats },
            Exit::Failed { error, reconnected } => SessionOutcome::Failed {
                stats,
                error,
                reconnected,
            },
        };

        self.logger.log(&LogEvent::SessionFinished {
            outcome: outcome.as_str().to_string(),
            iterations: machine.iterations(),
            warnings: machine.warning_count(),
            duration_secs: elapsed.as_secs_f64(),
        });
        info!(
            outcome = outcome.as_str(),
            iterations = machine.iterations(),
            warnings = machine.warning_count(),
            "Session finished"
        );
        outcome
    }

    /// Await a backend call under the configured timeout, mapping any error
    /// to the failure event
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, Event>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        with_timeout(self.options.call_timeout, op, fut)
            .await
            .map_err(|e| {
                warn!(op, error = %e, "Backend call failed");
                Event::Failed {
                    op,
                    error: e.to_string(),
                }
            })
    }

    async fn execute(&mut self, effect: Effect) -> Option<Event> {
        let event = match effect {
            Effect::ApplyChannels => {
                for (id, config) in self.channels.iter() {
                    if let Err(event) = self
                        .call("set_channel", self.backend.set_channel(id, config))
                        .await
                    {
                        return Some(event);
                    }
                }
                Event::ChannelsApplied
            }
            Effect::Setup(request) => {
                match self.call("stream_setup", self.backend.stream_setup(&request)).await {
                    Ok(actual_interval) => Event::SetupCompleted { actual_interval },
                    Err(event) => event,
                }
            }
            Effect::Pull => match self.call("stream_pull", self.backend.stream_pull()).await {
                Ok(overflow) => Event::Pulled {
                    overflow,
                    at: Instant::now().into_std(),
                },
                Err(event) => event,
            },
            Effect::CheckLiveness => {
                match self
                    .call("stream_is_active", self.backend.stream_is_active())
                    .await
                {
                    Ok(active) => Event::LivenessChecked { active },
                    Err(event) => event,
                }
            }
            Effect::CheckStop => Event::StopChecked {
                requested: self.stop_requested.load(Ordering::SeqCst),
            },
            Effect::StopStream => match self.call("stream_stop", self.backend.stream_stop()).await {
                Ok(()) => Event::StreamStopped,
                Err(event) => event,
            },
            Effect::ClearStopRequest => {
                self.stop_requested.store(false, Ordering::SeqCst);
                return None;
            }
            Effect::Save { bin_size } => {
                let target = self.surface.save_target();
                let note = save_buffer(
                    self.backend.as_ref(),
                    &target,
                    bin_size,
                    self.options.call_timeout,
                )
                .await;
                self.logger.log(&LogEvent::BufferSaved {
                    success: note.success,
                    title: note.title.clone(),
                    body: note.body.clone(),
                });
                self.surface.apply(SurfaceUpdate::Notify(note));
                Event::Saved
            }
            Effect::Reconnect => {
                let result = with_timeout(
                    self.options.call_timeout,
                    "reconnect",
                    self.backend.reconnect(),
                )
                .await;
                if let Err(e) = &result {
                    warn!(error = %e, "Reconnect failed");
                }
                Event::ReconnectFinished {
                    error: result.err().map(|e| e.to_string()),
                }
            }
            Effect::StartProgress(duration) => {
                self.progress.start(duration);
                return None;
            }
            Effect::CancelProgress => {
                self.progress.cancel();
                return None;
            }
            Effect::Surface(update) => {
                self.surface.apply(update);
                return None;
            }
            Effect::Log(event) => {
                self.logger.log(&event);
                return None;
            }
            Effect::Finish(_) => return None,
        };
        Some(event)
    }
}
