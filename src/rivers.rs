//! River stage.
//!
//! Traces rivers through the slope direction field: a fixed number of
//! uniformly random start cells, each walked downhill until it leaves
//! the grid or hits the step cap, counting visits per cell. The stage
//! draws its start points from its own seeded stream, derived from the
//! master seed by name, so re-seeding the pipeline re-seeds the rivers
//! in lockstep without coupling them to the elevation stream.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use image::{Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::backend::{BufferId, Kernel, KernelArg, KernelBackend};
use crate::error::KernelFault;
use crate::grid::{Artifact, Grid};

/// River traces started per generation.
pub const RIVER_STARTS: usize = 100;

/// Visit counts are scaled up after masking so faint single-visit
/// channels survive byte rendering.
const VISIT_SCALE: u32 = 10;

const SEED_STREAM: &str = "rivers";

/// Stable per-stream seed derivation from the master seed.
pub(crate) fn derive_seed(master: u64, stream: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    master.hash(&mut hasher);
    stream.hash(&mut hasher);
    hasher.finish()
}

pub struct RiverStage {
    seed: u64,
    valid: bool,
    generation: u64,
    artifact: Option<Artifact<u32>>,
}

impl RiverStage {
    pub fn new(master_seed: u64) -> Self {
        Self {
            seed: derive_seed(master_seed, SEED_STREAM),
            valid: false,
            generation: 0,
            artifact: None,
        }
    }

    pub fn set_master_seed(&mut self, master_seed: u64) {
        self.seed = derive_seed(master_seed, SEED_STREAM);
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

    pub fn grid(&self) -> Result<&Grid<u32>, KernelFault> {
        self.artifact
            .as_ref()
            .map(|a| &a.grid)
            .ok_or(KernelFault::MissingInput("rivers"))
    }

    pub fn image(&self) -> Result<&RgbImage, KernelFault> {
        self.artifact
            .as_ref()
            .map(|a| &a.image)
            .ok_or(KernelFault::MissingInput("rivers"))
    }

    /// Regenerate from valid slope and land-mask grids if invalid.
    pub fn ensure(
        &mut self,
        backend: &dyn KernelBackend,
        directions: &Grid<u8>,
        mask: &Grid<u8>,
    ) -> Result<(), KernelFault> {
        if self.valid && self.artifact.is_some() {
            return Ok(());
        }
        let artifact = self.regenerate(backend, directions, mask)?;
        self.artifact = Some(artifact);
        self.valid = true;
        self.generation += 1;
        Ok(())
    }

    fn regenerate(
        &self,
        backend: &dyn KernelBackend,
        directions: &Grid<u8>,
        mask: &Grid<u8>,
    ) -> Result<Artifact<u32>, KernelFault> {
        let (width, height) = (directions.width, directions.height);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut starts_x = Vec::with_capacity(RIVER_STARTS);
        let mut starts_y = Vec::with_capacity(RIVER_STARTS);
        for _ in 0..RIVER_STARTS {
            starts_x.push(rng.gen_range(0..width as u32));
            starts_y.push(rng.gen_range(0..height as u32));
        }

        let dir_buf = backend.upload_u8(directions.as_slice().to_vec());
        let visit_buf = backend.alloc_u32(width * height);
        let sx_buf = backend.upload_u32(starts_x);
        let sy_buf = backend.upload_u32(starts_y);
        let raw = trace(backend, [dir_buf, visit_buf, sx_buf, sy_buf], width, height);
        for buf in [dir_buf, visit_buf, sx_buf, sy_buf] {
            backend.release(buf);
        }
        let raw = raw?;

        // Clip to land, then amplify.
        let data: Vec<u32> = raw
            .iter()
            .zip(mask.as_slice())
            .map(|(&count, &land)| {
                if land == 0 {
                    0
                } else {
                    count.saturating_mul(VISIT_SCALE)
                }
            })
            .collect();
        let grid = Grid::from_vec(width, height, data);
        let image = render(&grid);
        Ok(Artifact { grid, image })
    }
}

fn trace(
    backend: &dyn KernelBackend,
    [dir_buf, visit_buf, sx_buf, sy_buf]: [BufferId; 4],
    width: usize,
    height: usize,
) -> Result<Vec<u32>, KernelFault> {
    // The cap bounds a trace by the cell count, so direction-field
    // cycles terminate after covering the grid at most once over.
    let max_steps = (width * height) as u32;
    let event = backend.dispatch(
        Kernel::TraceRivers,
        (RIVER_STARTS, 1),
        &[
            KernelArg::Buffer(dir_buf),
            KernelArg::Buffer(visit_buf),
            KernelArg::Buffer(sx_buf),
            KernelArg::Buffer(sy_buf),
            KernelArg::I32(width as i32),
            KernelArg::I32(height as i32),
            KernelArg::U32(max_steps),
        ],
        &[],
    )?;
    backend.read_u32(visit_buf, &[event])
}

fn render(grid: &Grid<u32>) -> RgbImage {
    RgbImage::from_fn(grid.width as u32, grid.height as u32, |x, y| {
        let v = (*grid.get(x as usize, y as usize)).min(255) as u8;
        Rgb([v, v, v])
    })
}
