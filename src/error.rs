//! Error taxonomy for the pipeline.
//!
//! Configuration problems surface at construction and are never silently
//! defaulted. Kernel faults are fatal to the current read: the failed
//! stage keeps its previous artifact (last known good) and no retry is
//! attempted, since the kernels are deterministic in their inputs.

use crate::backend::{BufferId, EventToken, Kernel};

/// A rejected pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Grid dimensions must both be positive.
    InvalidDimensions(usize, usize),
    /// The elevation stage needs at least one noise filter.
    EmptyFilterStack,
    /// Noise filter scales must be positive and finite.
    InvalidFilterScale(f64),
    /// Sea level is a percentage, 0-100.
    InvalidSeaLevel(u8),
    /// The composite stage needs at least one color range.
    EmptyColorTable,
    /// A color range's band is malformed (start > end or outside 0-100).
    InvalidColorRange { start: f32, end: f32 },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidDimensions(w, h) => {
                write!(f, "grid dimensions must be positive, got {}x{}", w, h)
            }
            ConfigError::EmptyFilterStack => write!(f, "noise filter stack is empty"),
            ConfigError::InvalidFilterScale(scale) => {
                write!(f, "noise filter scale must be positive, got {}", scale)
            }
            ConfigError::InvalidSeaLevel(level) => {
                write!(f, "sea level must be 0-100 percent, got {}", level)
            }
            ConfigError::EmptyColorTable => write!(f, "color range table is empty"),
            ConfigError::InvalidColorRange { start, end } => {
                write!(f, "malformed color range band {}%..{}%", start, end)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// A fatal fault in the kernel backend.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelFault {
    /// Dispatch arguments do not match the kernel's signature.
    BadSignature { kernel: Kernel, reason: String },
    /// A buffer handle does not name a live buffer.
    UnknownBuffer(BufferId),
    /// A buffer was read or bound with the wrong element type.
    TypeMismatch { buffer: BufferId, expected: &'static str },
    /// The dispatch shape does not cover a positive index space or does
    /// not match the bound buffers.
    InvalidShape { width: usize, height: usize },
    /// A wait-list token was never issued by this backend.
    UnknownEvent(EventToken),
    /// A required upstream artifact was missing at dispatch time.
    MissingInput(&'static str),
}

impl std::fmt::Display for KernelFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelFault::BadSignature { kernel, reason } => {
                write!(f, "bad argument list for kernel {:?}: {}", kernel, reason)
            }
            KernelFault::UnknownBuffer(id) => write!(f, "unknown buffer handle {:?}", id),
            KernelFault::TypeMismatch { buffer, expected } => {
                write!(f, "buffer {:?} is not of element type {}", buffer, expected)
            }
            KernelFault::InvalidShape { width, height } => {
                write!(f, "invalid dispatch shape {}x{}", width, height)
            }
            KernelFault::UnknownEvent(token) => {
                write!(f, "wait list names unknown event {:?}", token)
            }
            KernelFault::MissingInput(what) => {
                write!(f, "missing upstream artifact: {}", what)
            }
        }
    }
}

impl std::error::Error for KernelFault {}

/// Top-level error returned by the pipeline controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    Config(ConfigError),
    Kernel(KernelFault),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Config(e) => write!(f, "configuration error: {}", e),
            PipelineError::Kernel(e) => write!(f, "kernel fault: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Config(e) => Some(e),
            PipelineError::Kernel(e) => Some(e),
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e)
    }
}

impl From<KernelFault> for PipelineError {
    fn from(e: KernelFault) -> Self {
        PipelineError::Kernel(e)
    }
}
