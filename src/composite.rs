//! Composite stage.
//!
//! Paints the final color map. Each configured color range is mapped
//! from its percentage band to an absolute elevation band relative to
//! the effective sea level, then painted by one chained kernel dispatch;
//! later ranges overwrite earlier ones where bands touch, and cells no
//! band covers stay black. Rivers are overlaid afterwards on the host.

use image::{Rgb, RgbImage};

use crate::backend::{BufferId, Kernel, KernelArg, KernelBackend};
use crate::config::ColorRange;
use crate::error::KernelFault;
use crate::grid::{Artifact, Grid};

/// Visit counts above this paint the river overlay.
const RIVER_THRESHOLD: u32 = 200;

pub struct CompositeStage {
    sea_level: u8,
    color_ranges: Vec<ColorRange>,
    valid: bool,
    generation: u64,
    artifact: Option<Artifact<[u8; 3]>>,
}

impl CompositeStage {
    pub fn new(sea_level: u8, color_ranges: Vec<ColorRange>) -> Self {
        Self {
            sea_level,
            color_ranges,
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

    pub fn grid(&self) -> Result<&Grid<[u8; 3]>, KernelFault> {
        self.artifact
            .as_ref()
            .map(|a| &a.grid)
            .ok_or(KernelFault::MissingInput("composite"))
    }

    pub fn image(&self) -> Result<&RgbImage, KernelFault> {
        self.artifact
            .as_ref()
            .map(|a| &a.image)
            .ok_or(KernelFault::MissingInput("composite"))
    }

    /// Regenerate from valid elevation and river grids if invalid.
    pub fn ensure(
        &mut self,
        backend: &dyn KernelBackend,
        elevation: &Grid<f32>,
        rivers: &Grid<u32>,
    ) -> Result<(), KernelFault> {
        if self.valid && self.artifact.is_some() {
            return Ok(());
        }
        let artifact = self.regenerate(backend, elevation, rivers)?;
        self.artifact = Some(artifact);
        self.valid = true;
        self.generation += 1;
        Ok(())
    }

    fn regenerate(
        &self,
        backend: &dyn KernelBackend,
        elevation: &Grid<f32>,
        rivers: &Grid<u32>,
    ) -> Result<Artifact<[u8; 3]>, KernelFault> {
        let (width, height) = (elevation.width, elevation.height);
        let max = elevation.max_value();
        let sea = max * self.sea_level as f32 / 100.0;

        let elev_buf = backend.upload_f32(elevation.as_slice().to_vec());
        let r_buf = backend.alloc_u8(width * height);
        let g_buf = backend.alloc_u8(width * height);
        let b_buf = backend.alloc_u8(width * height);
        let channels = self.paint(
            backend,
            [elev_buf, r_buf, g_buf, b_buf],
            (width, height),
            sea,
            max,
        );
        for buf in [elev_buf, r_buf, g_buf, b_buf] {
            backend.release(buf);
        }
        let (r, g, b) = channels?;

        let data: Vec<[u8; 3]> = r
            .iter()
            .zip(&g)
            .zip(&b)
            .zip(rivers.as_slice())
            .map(|(((&cr, &cg), &cb), &visits)| {
                if visits > RIVER_THRESHOLD {
                    [cr, cg, 255]
                } else {
                    [cr, cg, cb]
                }
            })
            .collect();
        let grid = Grid::from_vec(width, height, data);
        let image = render(&grid);
        Ok(Artifact { grid, image })
    }

    fn paint(
        &self,
        backend: &dyn KernelBackend,
        [elev_buf, r_buf, g_buf, b_buf]: [BufferId; 4],
        (width, height): (usize, usize),
        sea: f32,
        max: f32,
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), KernelFault> {
        let mut events = Vec::with_capacity(self.color_ranges.len());
        for range in &self.color_ranges {
            // Percent band to absolute elevation band. Underwater bands
            // split [0, sea], the rest split [sea, max].
            let (band_start, band_end) = if range.underwater {
                (range.start * sea / 100.0, range.end * sea / 100.0)
            } else {
                (
                    sea + range.start * (max - sea) / 100.0,
                    sea + range.end * (max - sea) / 100.0,
                )
            };
            let event = backend.dispatch(
                Kernel::ColorBand,
                (width, height),
                &[
                    KernelArg::Buffer(elev_buf),
                    KernelArg::Buffer(r_buf),
                    KernelArg::Buffer(g_buf),
                    KernelArg::Buffer(b_buf),
                    KernelArg::F32(band_start),
                    KernelArg::F32(band_end),
                    KernelArg::Rgb(range.start_rgb),
                    KernelArg::Rgb(range.end_rgb),
                    KernelArg::I32(width as i32),
                    KernelArg::I32(height as i32),
                ],
                &events,
            )?;
            events.push(event);
        }
        let r = backend.read_u8(r_buf, &events)?;
        let g = backend.read_u8(g_buf, &events)?;
        let b = backend.read_u8(b_buf, &events)?;
        Ok((r, g, b))
    }
}

fn render(grid: &Grid<[u8; 3]>) -> RgbImage {
    RgbImage::from_fn(grid.width as u32, grid.height as u32, |x, y| {
        Rgb(*grid.get(x as usize, y as usize))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;

    #[test]
    fn test_flat_grid_at_full_sea_level_paints_start_color() {
        // A constant grid at sea level 100 collapses the above-water band
        // to a single point: every cell takes the range's start color.
        // Sea level 100 (not 50) is deliberate: with the band formulas
        // above, only a degenerate band yields fraction 0. See DESIGN.md,
        // "Composite band edges".
        let backend = CpuBackend::new();
        let elevation = Grid::new_with(4, 4, 50.0f32);
        let rivers = Grid::new_with(4, 4, 0u32);
        let ranges = vec![ColorRange::new(0.0, 100.0, false, [10, 20, 30], [200, 200, 200])];
        let mut stage = CompositeStage::new(100, ranges);
        stage.ensure(&backend, &elevation, &rivers).unwrap();
        for (_, _, &rgb) in stage.grid().unwrap().iter() {
            assert_eq!(rgb, [10, 20, 30]);
        }
    }

    #[test]
    fn test_underwater_and_land_bands_split_at_sea_level() {
        // Max 100, sea 50: cell at 0 sits at the underwater band start,
        // cell at 100 at the land band end.
        let backend = CpuBackend::new();
        let elevation = Grid::from_vec(2, 1, vec![0.0f32, 100.0]);
        let rivers = Grid::new_with(2, 1, 0u32);
        let ranges = vec![
            ColorRange::new(0.0, 100.0, true, [0, 0, 100], [0, 0, 200]),
            ColorRange::new(0.0, 100.0, false, [100, 100, 0], [0, 200, 0]),
        ];
        let mut stage = CompositeStage::new(50, ranges);
        stage.ensure(&backend, &elevation, &rivers).unwrap();
        let grid = stage.grid().unwrap();
        assert_eq!(*grid.get(0, 0), [0, 0, 100]);
        assert_eq!(*grid.get(1, 0), [0, 200, 0]);
    }

    #[test]
    fn test_river_overlay_forces_blue_channel() {
        let backend = CpuBackend::new();
        let elevation = Grid::new_with(2, 1, 50.0f32);
        let rivers = Grid::from_vec(2, 1, vec![201u32, 200]);
        let ranges = vec![ColorRange::new(0.0, 100.0, false, [10, 20, 30], [10, 20, 30])];
        let mut stage = CompositeStage::new(100, ranges);
        stage.ensure(&backend, &elevation, &rivers).unwrap();
        let grid = stage.grid().unwrap();
        assert_eq!(*grid.get(0, 0), [10, 20, 255]); // above threshold
        assert_eq!(*grid.get(1, 0), [10, 20, 30]); // at threshold, untouched
    }

    #[test]
    fn test_uncovered_cells_stay_black() {
        let backend = CpuBackend::new();
        let elevation = Grid::from_vec(2, 1, vec![10.0f32, 100.0]);
        let rivers = Grid::new_with(2, 1, 0u32);
        // Only the top half of the land span is covered.
        let ranges = vec![ColorRange::new(50.0, 100.0, false, [1, 2, 3], [4, 5, 6])];
        let mut stage = CompositeStage::new(0, ranges);
        stage.ensure(&backend, &elevation, &rivers).unwrap();
        let grid = stage.grid().unwrap();
        assert_eq!(*grid.get(0, 0), [0, 0, 0]);
        assert_eq!(*grid.get(1, 0), [4, 5, 6]);
    }
}
