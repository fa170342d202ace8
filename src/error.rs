use std::{
    error::Error,
    fmt::{Display, Formatter},
};

/// A corrupt, truncated, or otherwise unparseable composite file.
///
/// Fatal for the single file it was raised for, never for a whole import run.
#[derive(Debug, Clone)]
pub struct FormatError {
    pub msg: String,
}

impl FormatError {
    pub fn new(msg: impl Into<String>) -> Self {
        FormatError { msg: msg.into() }
    }
}

impl Display for FormatError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "format error: {}", self.msg)
    }
}

impl Error for FormatError {}

/// A timestamp or frequency gap that could not be reconciled while assembling a time series.
///
/// Fatal for the aggregation call it was raised in, reported with the offending partition.
#[derive(Debug, Clone)]
pub struct ContinuityError {
    pub year: i32,
    pub month: u32,
    pub msg: String,
}

impl ContinuityError {
    pub fn new(year: i32, month: u32, msg: impl Into<String>) -> Self {
        ContinuityError {
            year,
            month,
            msg: msg.into(),
        }
    }
}

impl Display for ContinuityError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "continuity error at {}/{}: {}",
            self.year, self.month, self.msg
        )
    }
}

impl Error for ContinuityError {}

/// An invalid argument: unrecognized season token, mismatched array lengths, a duration that
/// does not divide the series frequency. Fail fast, no silent defaults.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub msg: String,
}

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        ConfigError { msg: msg.into() }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "config error: {}", self.msg)
    }
}

impl Error for ConfigError {}
