//! Pipeline controller.
//!
//! Owns the six stages, the kernel backend and the dependency graph, and
//! is the sole mutation point. Parameter setters publish an event, which
//! updates the stages that cache the parameter and marks every transitive
//! dependent invalid in one graph traversal; nothing recomputes until the
//! next read. Reads force dependencies valid depth-first, strictly
//! sequentially, so each invalid stage regenerates exactly once no matter
//! how many dependents pull on it.

use image::RgbImage;

use crate::backend::CpuBackend;
use crate::composite::CompositeStage;
use crate::config::PipelineConfig;
use crate::elevation::ElevationStage;
use crate::error::{ConfigError, KernelFault, PipelineError};
use crate::events::{DependencyGraph, Event};
use crate::grid::Grid;
use crate::land_mask::LandMaskStage;
use crate::rivers::RiverStage;
use crate::slope::SlopeStage;
use crate::smoothing::SmoothingStage;

/// The queryable artifacts of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapKind {
    Elevation,
    MeanElevation,
    Slope,
    LandMask,
    River,
    Composite,
}

impl MapKind {
    pub const ALL: [MapKind; 6] = [
        MapKind::Elevation,
        MapKind::MeanElevation,
        MapKind::Slope,
        MapKind::LandMask,
        MapKind::River,
        MapKind::Composite,
    ];
}

pub struct Pipeline {
    backend: CpuBackend,
    graph: DependencyGraph<MapKind>,
    seed: u64,
    sea_level: u8,
    elevation: ElevationStage,
    smoothing: SmoothingStage,
    slope: SlopeStage,
    land_mask: LandMaskStage,
    rivers: RiverStage,
    composite: CompositeStage,
}

impl Pipeline {
    /// Validate the configuration, wire the stage graph and eagerly
    /// generate every artifact once.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let mut graph = DependencyGraph::new();
        graph.add_edge(MapKind::Elevation, MapKind::MeanElevation);
        graph.add_edge(MapKind::Elevation, MapKind::LandMask);
        graph.add_edge(MapKind::Elevation, MapKind::Composite);
        graph.add_edge(MapKind::MeanElevation, MapKind::Slope);
        graph.add_edge(MapKind::Slope, MapKind::River);
        graph.add_edge(MapKind::LandMask, MapKind::River);
        graph.add_edge(MapKind::River, MapKind::Composite);

        let mut pipeline = Self {
            backend: CpuBackend::new(),
            graph,
            seed: config.seed,
            sea_level: config.sea_level,
            elevation: ElevationStage::new(
                config.width,
                config.height,
                config.seed,
                config.filters,
            ),
            smoothing: SmoothingStage::new(),
            slope: SlopeStage::new(),
            land_mask: LandMaskStage::new(config.sea_level),
            rivers: RiverStage::new(config.seed),
            composite: CompositeStage::new(config.sea_level, config.color_ranges),
        };
        // The composite sits at the sink of the graph, so forcing it
        // forces everything.
        pipeline.ensure(MapKind::Composite)?;
        Ok(pipeline)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn sea_level(&self) -> u8 {
        self.sea_level
    }

    /// Re-seed the pipeline. Equal values are a no-op; otherwise every
    /// artifact is invalidated and regenerates on the next read.
    pub fn set_seed(&mut self, seed: u64) {
        if seed == self.seed {
            return;
        }
        self.seed = seed;
        self.publish(Event::Seed(seed));
    }

    /// Move the sea level (percent of the elevation maximum). Equal
    /// values are a no-op; elevation and its smoothing are unaffected.
    pub fn set_sea_level(&mut self, sea_level: u8) -> Result<(), PipelineError> {
        if sea_level > 100 {
            return Err(ConfigError::InvalidSeaLevel(sea_level).into());
        }
        if sea_level == self.sea_level {
            return Ok(());
        }
        self.sea_level = sea_level;
        self.publish(Event::SeaLevel(sea_level));
        Ok(())
    }

    /// Drop every cached artifact; the next read rebuilds the pipeline
    /// from the elevation down.
    pub fn invalidate_all(&mut self) {
        self.publish(Event::Invalidated);
    }

    /// The rendered image for one artifact, regenerating as needed.
    pub fn image(&mut self, kind: MapKind) -> Result<&RgbImage, PipelineError> {
        self.ensure(kind)?;
        let image = match kind {
            MapKind::Elevation => self.elevation.image()?,
            MapKind::MeanElevation => self.smoothing.image()?,
            MapKind::Slope => self.slope.image()?,
            MapKind::LandMask => self.land_mask.image()?,
            MapKind::River => self.rivers.image()?,
            MapKind::Composite => self.composite.image()?,
        };
        Ok(image)
    }

    pub fn elevation_grid(&mut self) -> Result<&Grid<f32>, PipelineError> {
        self.ensure(MapKind::Elevation)?;
        Ok(self.elevation.grid()?)
    }

    pub fn mean_elevation_grid(&mut self) -> Result<&Grid<f32>, PipelineError> {
        self.ensure(MapKind::MeanElevation)?;
        Ok(self.smoothing.grid()?)
    }

    pub fn slope_grid(&mut self) -> Result<&Grid<u8>, PipelineError> {
        self.ensure(MapKind::Slope)?;
        Ok(self.slope.grid()?)
    }

    pub fn land_mask_grid(&mut self) -> Result<&Grid<u8>, PipelineError> {
        self.ensure(MapKind::LandMask)?;
        Ok(self.land_mask.grid()?)
    }

    pub fn river_grid(&mut self) -> Result<&Grid<u32>, PipelineError> {
        self.ensure(MapKind::River)?;
        Ok(self.rivers.grid()?)
    }

    pub fn composite_grid(&mut self) -> Result<&Grid<[u8; 3]>, PipelineError> {
        self.ensure(MapKind::Composite)?;
        Ok(self.composite.grid()?)
    }

    /// How many times a stage has regenerated since construction.
    pub fn generation(&self, kind: MapKind) -> u64 {
        match kind {
            MapKind::Elevation => self.elevation.generation(),
            MapKind::MeanElevation => self.smoothing.generation(),
            MapKind::Slope => self.slope.generation(),
            MapKind::LandMask => self.land_mask.generation(),
            MapKind::River => self.rivers.generation(),
            MapKind::Composite => self.composite.generation(),
        }
    }

    /// Total kernel dispatches issued by the backend so far.
    pub fn dispatch_count(&self) -> usize {
        self.backend.dispatch_count()
    }

    /// Backend buffers currently allocated. Zero between reads: stages
    /// release their buffers once the read-back has landed.
    pub fn live_buffer_count(&self) -> usize {
        self.backend.live_buffer_count()
    }

    fn publish(&mut self, event: Event) {
        let sources: Vec<MapKind> = match event {
            Event::Seed(seed) => {
                self.elevation.set_seed(seed);
                self.rivers.set_master_seed(seed);
                vec![MapKind::Elevation]
            }
            Event::SeaLevel(sea_level) => {
                self.land_mask.set_sea_level(sea_level);
                self.composite.set_sea_level(sea_level);
                vec![MapKind::LandMask, MapKind::Composite]
            }
            Event::Invalidated => vec![MapKind::Elevation],
        };
        for kind in self.graph.invalidation_closure(&sources) {
            self.mark_invalid(kind);
        }
    }

    fn mark_invalid(&mut self, kind: MapKind) {
        match kind {
            MapKind::Elevation => self.elevation.invalidate(),
            MapKind::MeanElevation => self.smoothing.invalidate(),
            MapKind::Slope => self.slope.invalidate(),
            MapKind::LandMask => self.land_mask.invalidate(),
            MapKind::River => self.rivers.invalidate(),
            MapKind::Composite => self.composite.invalidate(),
        }
    }

    /// Force one artifact valid, forcing its dependencies first. Each
    /// stage skips regeneration when already valid, so shared
    /// dependencies run once per invalidation regardless of fan-out.
    fn ensure(&mut self, kind: MapKind) -> Result<(), KernelFault> {
        match kind {
            MapKind::Elevation => self.elevation.ensure(&self.backend),
            MapKind::MeanElevation => {
                self.ensure(MapKind::Elevation)?;
                let Self {
                    backend,
                    elevation,
                    smoothing,
                    ..
                } = self;
                smoothing.ensure(backend, elevation.grid()?)
            }
            MapKind::Slope => {
                self.ensure(MapKind::MeanElevation)?;
                let Self {
                    backend,
                    smoothing,
                    slope,
                    ..
                } = self;
                slope.ensure(backend, smoothing.grid()?)
            }
            MapKind::LandMask => {
                self.ensure(MapKind::Elevation)?;
                let Self {
                    elevation,
                    land_mask,
                    ..
                } = self;
                land_mask.ensure(elevation.grid()?)
            }
            MapKind::River => {
                self.ensure(MapKind::Slope)?;
                self.ensure(MapKind::LandMask)?;
                let Self {
                    backend,
                    slope,
                    land_mask,
                    rivers,
                    ..
                } = self;
                rivers.ensure(backend, slope.grid()?, land_mask.grid()?)
            }
            MapKind::Composite => {
                self.ensure(MapKind::River)?;
                let Self {
                    backend,
                    elevation,
                    rivers,
                    composite,
                    ..
                } = self;
                composite.ensure(backend, elevation.grid()?, rivers.grid()?)
            }
        }
    }
}
