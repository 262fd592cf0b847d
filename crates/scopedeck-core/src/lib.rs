//! # scopedeck-core
//!
//! The acquisition session controller.
//!
//! [`SessionMachine`] holds every transition of a capture session as a pure
//! function of (state, event). [`AcquisitionSession`] drives that machine
//! against a [`Backend`](scopedeck_backend::Backend), executing each effect
//! and feeding the result back in. UI concerns are reached only through
//! the [`SessionSurface`] trait.

mod chart;
mod error;
mod machine;
mod outcome;
mod params;
mod power;
mod progress;
mod remote;
mod save;
mod session;
mod surface;

pub use chart::{ChartRefresher, ChartSnapshot};
pub use error::{ParameterError, SessionError};
pub use machine::{Effect, Event, Exit, Phase, SessionMachine};
pub use outcome::{RejectReason, SessionOutcome, SessionStats};
pub use params::{ChannelSet, Mode, SessionParameters, LIVE_STREAM_DURATION_SECS};
pub use power::{band_power, BandPower, FrequencyBand};
pub use progress::{ProgressIndicator, DEFAULT_TICK};
pub use remote::with_timeout;
pub use save::save_buffer;
pub use session::{AcquisitionSession, SessionOptions, StopHandle};
pub use surface::{Notification, SaveTarget, SessionSurface, SurfaceUpdate};
