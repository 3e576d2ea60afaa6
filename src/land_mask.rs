//! Land/sea mask stage.
//!
//! Thresholds the elevation grid against the sea level, expressed as a
//! percentage of the current elevation maximum. Cells strictly above the
//! threshold are land (1), everything else is sea (0); a cell exactly at
//! the threshold is sea. Host-side, no kernel dispatch.

use image::{Rgb, RgbImage};

use crate::error::KernelFault;
use crate::grid::{Artifact, Grid};

pub struct LandMaskStage {
    sea_level: u8,
    valid: bool,
    generation: u64,
    artifact: Option<Artifact<u8>>,
}

impl LandMaskStage {
    pub fn new(sea_level: u8) -> Self {
        Self {
            sea_level,
            valid: false,
            generation: 0,
            artifact: None,
        }
    }

    pub fn set_sea_level(&mut self, sea_level: u8) {
        self.sea_level = sea_level;
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn grid(&self) -> Result<&Grid<u8>, KernelFault> {
        self.artifact
            .as_ref()
            .map(|a| &a.grid)
            .ok_or(KernelFault::MissingInput("land mask"))
    }

    pub fn image(&self) -> Result<&RgbImage, KernelFault> {
        self.artifact
            .as_ref()
            .map(|a| &a.image)
            .ok_or(KernelFault::MissingInput("land mask"))
    }

    /// Regenerate from a valid elevation grid if invalid.
    pub fn ensure(&mut self, elevation: &Grid<f32>) -> Result<(), KernelFault> {
        if self.valid && self.artifact.is_some() {
            return Ok(());
        }
        let threshold = elevation.max_value() * self.sea_level as f32 / 100.0;
        let data: Vec<u8> = elevation
            .as_slice()
            .iter()
            .map(|&v| u8::from(v > threshold))
            .collect();
        let grid = Grid::from_vec(elevation.width, elevation.height, data);
        let image = render(&grid);
        self.artifact = Some(Artifact { grid, image });
        self.valid = true;
        self.generation += 1;
        Ok(())
    }
}

fn render(grid: &Grid<u8>) -> RgbImage {
    RgbImage::from_fn(grid.width as u32, grid.height as u32, |x, y| {
        let v = grid.get(x as usize, y as usize) * 255;
        Rgb([v, v, v])
    })
}
