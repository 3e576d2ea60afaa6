//! Slope stage.
//!
//! Discretizes the mean heightfield into a per-cell downhill direction
//! code. The finite-difference gradient is computed on the host (central
//! differences inside, one-sided at the borders); the octant
//! classification of the descent vector runs as a kernel.

use image::{Rgb, RgbImage};

use crate::backend::{BufferId, Kernel, KernelArg, KernelBackend};
use crate::error::KernelFault;
use crate::grid::{Artifact, Grid};

/// Grayscale step per direction code; 7 * 35 still fits a byte.
const CODE_SHADE: u8 = 35;

pub struct SlopeStage {
    valid: bool,
    generation: u64,
    artifact: Option<Artifact<u8>>,
}

impl SlopeStage {
    pub fn new() -> Self {
        Self {
            valid: false,
            generation: 0,
            artifact: None,
        }
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
            .ok_or(KernelFault::MissingInput("slope"))
    }

    pub fn image(&self) -> Result<&RgbImage, KernelFault> {
        self.artifact
            .as_ref()
            .map(|a| &a.image)
            .ok_or(KernelFault::MissingInput("slope"))
    }

    /// Regenerate from a valid mean-elevation grid if invalid.
    pub fn ensure(
        &mut self,
        backend: &dyn KernelBackend,
        mean: &Grid<f32>,
    ) -> Result<(), KernelFault> {
        if self.valid && self.artifact.is_some() {
            return Ok(());
        }
        let artifact = self.regenerate(backend, mean)?;
        self.artifact = Some(artifact);
        self.valid = true;
        self.generation += 1;
        Ok(())
    }

    fn regenerate(
        &self,
        backend: &dyn KernelBackend,
        mean: &Grid<f32>,
    ) -> Result<Artifact<u8>, KernelFault> {
        let (width, height) = (mean.width, mean.height);
        let (gx, gy) = gradient(mean);

        let gx_buf = backend.upload_f32(gx);
        let gy_buf = backend.upload_f32(gy);
        let dst = backend.alloc_u8(width * height);
        let data = classify(backend, gx_buf, gy_buf, dst, width, height);
        backend.release(gx_buf);
        backend.release(gy_buf);
        backend.release(dst);

        let grid = Grid::from_vec(width, height, data?);
        let image = render(&grid);
        Ok(Artifact { grid, image })
    }
}

impl Default for SlopeStage {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(
    backend: &dyn KernelBackend,
    gx: BufferId,
    gy: BufferId,
    dst: BufferId,
    width: usize,
    height: usize,
) -> Result<Vec<u8>, KernelFault> {
    let event = backend.dispatch(
        Kernel::SlopeDirection,
        (width, height),
        &[
            KernelArg::Buffer(gx),
            KernelArg::Buffer(gy),
            KernelArg::Buffer(dst),
            KernelArg::I32(width as i32),
            KernelArg::I32(height as i32),
        ],
        &[],
    )?;
    backend.read_u8(dst, &[event])
}

/// Ascent gradients along x (east) and y (south): central differences
/// in the interior, one-sided at the borders, zero on a single-cell axis.
pub(crate) fn gradient(grid: &Grid<f32>) -> (Vec<f32>, Vec<f32>) {
    let (width, height) = (grid.width, grid.height);
    let src = grid.as_slice();
    let mut gx = vec![0.0f32; width * height];
    let mut gy = vec![0.0f32; width * height];

    for y in 0..height {
        let base = y * width;
        if width > 1 {
            gx[base] = src[base + 1] - src[base];
            gx[base + width - 1] = src[base + width - 1] - src[base + width - 2];
            for x in 1..width - 1 {
                gx[base + x] = (src[base + x + 1] - src[base + x - 1]) * 0.5;
            }
        }
    }
    for x in 0..width {
        if height > 1 {
            gy[x] = src[width + x] - src[x];
            let last = (height - 1) * width;
            gy[last + x] = src[last + x] - src[last - width + x];
            for y in 1..height - 1 {
                gy[y * width + x] = (src[(y + 1) * width + x] - src[(y - 1) * width + x]) * 0.5;
            }
        }
    }
    (gx, gy)
}

fn render(grid: &Grid<u8>) -> RgbImage {
    RgbImage::from_fn(grid.width as u32, grid.height as u32, |x, y| {
        let v = grid.get(x as usize, y as usize) * CODE_SHADE;
        Rgb([v, v, v])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::direction::Direction;

    #[test]
    fn test_gradient_matches_finite_differences() {
        // Row [0, 1, 4]: one-sided at the ends, central in the middle.
        let grid = Grid::from_vec(3, 1, vec![0.0, 1.0, 4.0]);
        let (gx, gy) = gradient(&grid);
        assert_eq!(gx, vec![1.0, 2.0, 3.0]);
        assert_eq!(gy, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_gradient_along_columns() {
        let grid = Grid::from_vec(1, 3, vec![0.0, 1.0, 4.0]);
        let (gx, gy) = gradient(&grid);
        assert_eq!(gx, vec![0.0, 0.0, 0.0]);
        assert_eq!(gy, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_eastward_ascent_descends_west() {
        // Ascent east with a slight southward lean: descent is strictly
        // inside the west sector everywhere.
        let backend = CpuBackend::new();
        let mean = Grid::from_vec(
            4,
            4,
            (0..16)
                .map(|i| (i % 4) as f32 + (i / 4) as f32 * 0.1)
                .collect(),
        );
        let mut stage = SlopeStage::new();
        stage.ensure(&backend, &mean).unwrap();
        for (_, _, &code) in stage.grid().unwrap().iter() {
            assert_eq!(code, Direction::West.code());
        }
    }

    #[test]
    fn test_flat_grid_is_all_north() {
        let backend = CpuBackend::new();
        let mean = Grid::new_with(3, 3, 5.0f32);
        let mut stage = SlopeStage::new();
        stage.ensure(&backend, &mean).unwrap();
        for (_, _, &code) in stage.grid().unwrap().iter() {
            assert_eq!(code, Direction::North.code());
        }
    }
}
