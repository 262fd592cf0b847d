use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use scopedeck_backend::{Backend, BackendError, ChannelId};

use crate::{with_timeout, ParameterError};

/// Open frequency interval `(f_lo, f_hi)` in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrequencyBand {
    pub f_lo: f64,
    pub f_hi: f64,
}

impl FrequencyBand {
    pub fn new(f_lo: f64, f_hi: f64) -> Result<Self, ParameterError> {
        let valid = f_lo.is_finite() && f_hi.is_finite() && f_lo >= 0.0 && f_lo < f_hi;
        if !valid {
            return Err(ParameterError::InvalidBand { f_lo, f_hi });
        }
        Ok(Self { f_lo, f_hi })
    }
}

/// Buffered signal power inside one band
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandPower {
    pub band: FrequencyBand,
    /// V^2 per channel; `None` where the channel holds no data
    pub channels: BTreeMap<ChannelId, Option<f64>>,
}

/// Integrate the backend's PSD over `band` for every channel
pub async fn band_power(
    backend: &dyn Backend,
    band: FrequencyBand,
    timeout: Option<Duration>,
) -> Result<BandPower, BackendError> {
    let channels = with_timeout(timeout, "band_power", backend.band_power(band.f_lo, band.f_hi)).await?;
    debug!(f_lo = band.f_lo, f_hi = band.f_hi, ?channels, "Band power");
    Ok(BandPower { band, channels })
}
