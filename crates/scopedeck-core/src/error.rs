use thiserror::Error;

use crate::Phase;

#[derive(Error, Debug, PartialEq)]
pub enum ParameterError {
    #[error("{name} must be a positive number, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{name} of {value} s is too long")]
    TooLong { name: &'static str, value: f64 },

    #[error("Invalid voltage range {0}")]
    InvalidRange(f64),

    #[error("Invalid frequency band ({f_lo}, {f_hi}) Hz")]
    InvalidBand { f_lo: f64, f_hi: f64 },
}

#[derive(Error, Debug, PartialEq)]
pub enum SessionError {
    #[error("Session is busy ({0:?}); channel changes are only allowed while idle")]
    Busy(Phase),

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}
