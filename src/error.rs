//! Error types

use thiserror::Error;

use crate::sweep::Geometry;

pub type CacheResult<T> = Result<T, CacheError>;
pub type DeviceResult<T> = Result<T, DeviceError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors from building or feeding a sweep cache
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A cache needs room for at least one sweep
    #[error("Invalid cache capacity: {0}")]
    InvalidCapacity(usize),

    /// The sweep doesn't have the shape the cache was established with
    #[error("Sweep geometry mismatch: expected {expected}, got {actual}")]
    GeometryMismatch { expected: Geometry, actual: Geometry },
}

/// Errors from sweep sources
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device is not open")]
    NotOpen,

    #[error("Sweep profile {0} out of range")]
    InvalidProfile(usize),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A replayed source has nothing left to give
    #[error("Source exhausted")]
    Exhausted,

    #[error("Hardware error: {0}")]
    Hardware(String),
}

/// Errors from parsing or encoding protocol lines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid number for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Expected {expected} values for {field}, got {actual}")]
    SampleCount {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}
