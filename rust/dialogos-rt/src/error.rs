//! Runtime error taxonomy (spec §7).

use dialogos_core::math::MathError;
use thiserror::Error;

/// Every error kind an executing task can raise. `Cancelled` is not a
/// user-visible error unless it escapes the top frame (spec §7).
#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    #[error("missing insert '{0}'")]
    InterpolationMissingKey(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("index out of range: {0}")]
    Index(String),
    #[error("name error: {0}")]
    Name(String),
    #[error("math error: {0}")]
    Math(#[from] MathError),
    #[error("pattern error: {0}")]
    Pattern(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("fixed point not reached within iteration cap")]
    FixedPointNotReached,
    #[error("task cancelled")]
    Cancelled,
}

pub type RtResult<T> = Result<T, RuntimeError>;
