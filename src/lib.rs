//! Layered terrain synthesis library
//!
//! Generates elevation, smoothed elevation, slope direction, land/sea
//! mask, river network and composited color maps from a seed and a small
//! parameter set, organized as a DAG of cached artifacts with transitive
//! invalidation and lazy, exactly-once regeneration.

pub mod backend;
pub mod composite;
pub mod config;
pub mod direction;
pub mod elevation;
pub mod error;
pub mod events;
pub mod grid;
mod kernels;
pub mod land_mask;
pub mod pipeline;
pub mod rivers;
pub mod slope;
pub mod smoothing;

pub use config::{ColorRange, NoiseFilter, PipelineConfig};
pub use error::{ConfigError, KernelFault, PipelineError};
pub use grid::{Artifact, Grid};
pub use pipeline::{MapKind, Pipeline};
