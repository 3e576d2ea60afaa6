//! Pipeline configuration.
//!
//! The shell (CLI, config file, tests) assembles a `PipelineConfig` and
//! hands it to the controller as plain values; the core never parses
//! files or flags itself. Validation happens once, at construction.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One scaled noise layer of the elevation stack.
///
/// The elevation kernel samples `amplitude * noise((x+off)/scale,
/// (y+off)/scale)`; larger scales give larger terrain features. Filter
/// order matters: accumulation is chained in configured order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseFilter {
    pub scale: f64,
    pub amplitude: f32,
}

impl NoiseFilter {
    pub fn new(scale: f64, amplitude: f32) -> Self {
        Self { scale, amplitude }
    }
}

/// A band of the elevation domain mapped to a linear color gradient.
///
/// `start`/`end` are percentages of the effective sea level when
/// `underwater`, otherwise of the span between effective sea level and
/// the elevation maximum.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
    pub start: f32,
    pub end: f32,
    pub underwater: bool,
    pub start_rgb: [u8; 3],
    pub end_rgb: [u8; 3],
}

impl ColorRange {
    pub fn new(start: f32, end: f32, underwater: bool, start_rgb: [u8; 3], end_rgb: [u8; 3]) -> Self {
        Self {
            start,
            end,
            underwater,
            start_rgb,
            end_rgb,
        }
    }
}

/// Everything the controller needs to build the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub width: usize,
    pub height: usize,
    pub seed: u64,
    /// Sea level as a percentage of the elevation maximum, 0-100.
    pub sea_level: u8,
    /// Ordered noise filter stack for the elevation stage.
    pub filters: Vec<NoiseFilter>,
    /// Ordered color table for the composite stage.
    pub color_ranges: Vec<ColorRange>,
}

impl PipelineConfig {
    pub fn new(width: usize, height: usize, seed: u64, sea_level: u8) -> Self {
        Self {
            width,
            height,
            seed,
            sea_level,
            filters: Self::default_filters(),
            color_ranges: Self::default_color_ranges(),
        }
    }

    /// Three-layer stack: continental shape, regional relief, local detail.
    pub fn default_filters() -> Vec<NoiseFilter> {
        vec![
            NoiseFilter::new(100.0, 80.0),
            NoiseFilter::new(40.0, 40.0),
            NoiseFilter::new(10.0, 15.0),
        ]
    }

    /// Deep sea to shore blues underwater, shore yellow to highland green
    /// above water.
    pub fn default_color_ranges() -> Vec<ColorRange> {
        vec![
            ColorRange::new(0.0, 100.0, true, [30, 80, 160], [91, 154, 255]),
            ColorRange::new(0.0, 100.0, false, [255, 243, 114], [76, 211, 27]),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions(self.width, self.height));
        }
        if self.sea_level > 100 {
            return Err(ConfigError::InvalidSeaLevel(self.sea_level));
        }
        if self.filters.is_empty() {
            return Err(ConfigError::EmptyFilterStack);
        }
        for filter in &self.filters {
            if !(filter.scale > 0.0) || !filter.scale.is_finite() {
                return Err(ConfigError::InvalidFilterScale(filter.scale));
            }
        }
        if self.color_ranges.is_empty() {
            return Err(ConfigError::EmptyColorTable);
        }
        for range in &self.color_ranges {
            let ordered = range.start <= range.end;
            let in_domain = (0.0..=100.0).contains(&range.start) && (0.0..=100.0).contains(&range.end);
            if !ordered || !in_domain {
                return Err(ConfigError::InvalidColorRange {
                    start: range.start,
                    end: range.end,
                });
            }
        }
        Ok(())
    }
}
