//! Elevation stage.
//!
//! Builds the base heightfield: a flat baseline plus one accumulated
//! noise octave per configured filter, finished with an island-shaping
//! radial falloff so the landmass sits inside the frame. Every octave is
//! one kernel dispatch chained on the completion tokens of the previous
//! ones; the whole stage is a pure function of (seed, filter stack,
//! dimensions).

use image::{Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::backend::{BufferId, Kernel, KernelArg, KernelBackend};
use crate::config::NoiseFilter;
use crate::error::KernelFault;
use crate::grid::{Artifact, Grid};

/// Every cell starts at mid-gray before the octaves accumulate.
const BASELINE: f32 = 127.5;

/// Per-filter coordinate offsets are drawn from this range, so two
/// filters with the same scale still sample disjoint noise regions.
const SUB_SEED_RANGE: i32 = 1_000_000;

pub struct ElevationStage {
    width: usize,
    height: usize,
    seed: u64,
    filters: Vec<NoiseFilter>,
    valid: bool,
    generation: u64,
    artifact: Option<Artifact<f32>>,
}

impl ElevationStage {
    pub fn new(width: usize, height: usize, seed: u64, filters: Vec<NoiseFilter>) -> Self {
        Self {
            width,
            height,
            seed,
            filters,
            valid: false,
            generation: 0,
            artifact: None,
        }
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// How many times this stage has regenerated its artifact.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn grid(&self) -> Result<&Grid<f32>, KernelFault> {
        self.artifact
            .as_ref()
            .map(|a| &a.grid)
            .ok_or(KernelFault::MissingInput("elevation"))
    }

    pub fn image(&self) -> Result<&RgbImage, KernelFault> {
        self.artifact
            .as_ref()
            .map(|a| &a.image)
            .ok_or(KernelFault::MissingInput("elevation"))
    }

    /// Regenerate if invalid. On a kernel fault the previous artifact is
    /// kept in place and the stage stays invalid.
    pub fn ensure(&mut self, backend: &dyn KernelBackend) -> Result<(), KernelFault> {
        if self.valid && self.artifact.is_some() {
            return Ok(());
        }
        let artifact = self.regenerate(backend)?;
        self.artifact = Some(artifact);
        self.valid = true;
        self.generation += 1;
        Ok(())
    }

    fn regenerate(&self, backend: &dyn KernelBackend) -> Result<Artifact<f32>, KernelFault> {
        let (width, height) = (self.width, self.height);

        // One offset per filter, always drawn in filter order from the
        // same seeded stream so the stack is reproducible as a whole.
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let sub_seeds: Vec<i32> = self
            .filters
            .iter()
            .map(|_| rng.gen_range(0..SUB_SEED_RANGE))
            .collect();

        let buf = backend.upload_f32(vec![BASELINE; width * height]);
        let data = self.accumulate(backend, buf, &sub_seeds);
        backend.release(buf);

        let grid = Grid::from_vec(width, height, data?);
        let image = render(&grid);
        Ok(Artifact { grid, image })
    }

    fn accumulate(
        &self,
        backend: &dyn KernelBackend,
        buf: BufferId,
        sub_seeds: &[i32],
    ) -> Result<Vec<f32>, KernelFault> {
        let shape = (self.width, self.height);
        let mut events = Vec::with_capacity(self.filters.len() + 1);
        for (filter, &sub_seed) in self.filters.iter().zip(sub_seeds) {
            let event = backend.dispatch(
                Kernel::NoiseOctave,
                shape,
                &[
                    KernelArg::Buffer(buf),
                    KernelArg::I32(self.width as i32),
                    KernelArg::I32(self.height as i32),
                    KernelArg::I32(sub_seed),
                    KernelArg::F32(filter.scale as f32),
                    KernelArg::F32(filter.amplitude),
                ],
                &events,
            )?;
            events.push(event);
        }
        let island = backend.dispatch(
            Kernel::IslandFilter,
            shape,
            &[
                KernelArg::Buffer(buf),
                KernelArg::I32(self.width as i32),
                KernelArg::I32(self.height as i32),
            ],
            &events,
        )?;
        events.push(island);
        backend.read_f32(buf, &events)
    }
}

/// Clamped-to-byte grayscale rendering of a heightfield.
pub(crate) fn render(grid: &Grid<f32>) -> RgbImage {
    RgbImage::from_fn(grid.width as u32, grid.height as u32, |x, y| {
        let v = grid.get(x as usize, y as usize).clamp(0.0, 255.0) as u8;
        Rgb([v, v, v])
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::backend::{CpuBackend, EventToken};
    use crate::config::NoiseFilter;

    fn stage(seed: u64, filters: Vec<NoiseFilter>) -> ElevationStage {
        ElevationStage::new(5, 5, seed, filters)
    }

    /// Delegates to a real backend until `fail` is set, then refuses
    /// every dispatch.
    struct FlakyBackend {
        inner: CpuBackend,
        fail: Cell<bool>,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: CpuBackend::new(),
                fail: Cell::new(false),
            }
        }
    }

    impl KernelBackend for FlakyBackend {
        fn upload_f32(&self, data: Vec<f32>) -> BufferId {
            self.inner.upload_f32(data)
        }

        fn alloc_f32(&self, len: usize) -> BufferId {
            self.inner.alloc_f32(len)
        }

        fn upload_u8(&self, data: Vec<u8>) -> BufferId {
            self.inner.upload_u8(data)
        }

        fn alloc_u8(&self, len: usize) -> BufferId {
            self.inner.alloc_u8(len)
        }

        fn upload_u32(&self, data: Vec<u32>) -> BufferId {
            self.inner.upload_u32(data)
        }

        fn alloc_u32(&self, len: usize) -> BufferId {
            self.inner.alloc_u32(len)
        }

        fn release(&self, buffer: BufferId) {
            self.inner.release(buffer)
        }

        fn dispatch(
            &self,
            kernel: Kernel,
            shape: (usize, usize),
            args: &[KernelArg],
            wait_for: &[EventToken],
        ) -> Result<EventToken, KernelFault> {
            if self.fail.get() {
                return Err(KernelFault::BadSignature {
                    kernel,
                    reason: "device offline".into(),
                });
            }
            self.inner.dispatch(kernel, shape, args, wait_for)
        }

        fn read_f32(
            &self,
            buffer: BufferId,
            wait_for: &[EventToken],
        ) -> Result<Vec<f32>, KernelFault> {
            self.inner.read_f32(buffer, wait_for)
        }

        fn read_u8(
            &self,
            buffer: BufferId,
            wait_for: &[EventToken],
        ) -> Result<Vec<u8>, KernelFault> {
            self.inner.read_u8(buffer, wait_for)
        }

        fn read_u32(
            &self,
            buffer: BufferId,
            wait_for: &[EventToken],
        ) -> Result<Vec<u32>, KernelFault> {
            self.inner.read_u32(buffer, wait_for)
        }
    }

    #[test]
    fn test_zero_amplitude_leaves_baseline_at_center() {
        let backend = CpuBackend::new();
        let mut stage = stage(1, vec![NoiseFilter::new(10.0, 0.0)]);
        stage.ensure(&backend).unwrap();
        let grid = stage.grid().unwrap();
        // Center survives the island falloff untouched, corners are sea.
        assert_eq!(*grid.get(2, 2), 127.5);
        assert_eq!(*grid.get(0, 0), 0.0);
        assert_eq!(*grid.get(4, 4), 0.0);
    }

    #[test]
    fn test_same_seed_same_grid() {
        let backend = CpuBackend::new();
        let mut a = stage(42, vec![NoiseFilter::new(10.0, 5.0)]);
        let mut b = stage(42, vec![NoiseFilter::new(10.0, 5.0)]);
        a.ensure(&backend).unwrap();
        b.ensure(&backend).unwrap();
        assert_eq!(a.grid().unwrap(), b.grid().unwrap());
    }

    #[test]
    fn test_different_seed_different_grid() {
        let backend = CpuBackend::new();
        let mut a = stage(42, vec![NoiseFilter::new(10.0, 5.0)]);
        let mut b = stage(43, vec![NoiseFilter::new(10.0, 5.0)]);
        a.ensure(&backend).unwrap();
        b.ensure(&backend).unwrap();
        assert_ne!(a.grid().unwrap(), b.grid().unwrap());
    }

    #[test]
    fn test_fault_keeps_previous_artifact() {
        let backend = FlakyBackend::new();
        let mut stage = stage(1, vec![NoiseFilter::new(10.0, 5.0)]);
        stage.ensure(&backend).unwrap();
        let before = stage.grid().unwrap().clone();

        backend.fail.set(true);
        stage.invalidate();
        assert!(stage.ensure(&backend).is_err());
        assert!(!stage.is_valid());
        // Last known good stays readable, and no generation is counted.
        assert_eq!(stage.grid().unwrap(), &before);
        assert_eq!(stage.generation(), 1);

        backend.fail.set(false);
        stage.ensure(&backend).unwrap();
        assert!(stage.is_valid());
        assert_eq!(stage.generation(), 2);
    }

    #[test]
    fn test_regeneration_releases_buffers() {
        let backend = CpuBackend::new();
        let mut stage = stage(1, vec![NoiseFilter::new(10.0, 5.0)]);
        for _ in 0..10 {
            stage.invalidate();
            stage.ensure(&backend).unwrap();
        }
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_one_dispatch_per_filter_plus_island() {
        let backend = CpuBackend::new();
        let mut stage = stage(
            1,
            vec![NoiseFilter::new(100.0, 80.0), NoiseFilter::new(10.0, 15.0)],
        );
        stage.ensure(&backend).unwrap();
        assert_eq!(backend.dispatch_count(), 3);

        // A second ensure on a valid stage dispatches nothing.
        stage.ensure(&backend).unwrap();
        assert_eq!(backend.dispatch_count(), 3);
    }
}
