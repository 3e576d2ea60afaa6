//! Numeric kernel bodies.
//!
//! Each function here is the body of one named kernel the backend can
//! dispatch over a 2D index space. Bodies are data-parallel across grid
//! rows (rayon); river tracing is parallel across start points with
//! atomic visit counters. All bodies are pure functions of their inputs,
//! so a dispatch is bit-for-bit reproducible.

use noise::{NoiseFn, Perlin};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::direction::Direction;
use crate::error::KernelFault;

/// Seed of the shared Perlin basis. Variation between filters comes from
/// the per-filter coordinate offset, not from reseeding the basis.
const NOISE_BASIS_SEED: u32 = 0;

fn check_grid_len(len: usize, width: usize, height: usize) -> Result<(), KernelFault> {
    if width == 0 || height == 0 || len != width * height {
        return Err(KernelFault::InvalidShape { width, height });
    }
    Ok(())
}

/// Accumulate one scaled noise octave into `dst`:
/// `dst += amplitude * perlin((x + offset) / scale, (y + offset) / scale)`.
pub(crate) fn noise_octave(
    dst: &mut [f32],
    width: usize,
    height: usize,
    sub_seed: i32,
    scale: f64,
    amplitude: f32,
) -> Result<(), KernelFault> {
    check_grid_len(dst.len(), width, height)?;
    if !(scale > 0.0) || !scale.is_finite() {
        return Err(KernelFault::InvalidShape { width, height });
    }
    let perlin = Perlin::new(NOISE_BASIS_SEED);
    let offset = sub_seed as f64;

    dst.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let ny = (y as f64 + offset) / scale;
        for (x, cell) in row.iter_mut().enumerate() {
            let nx = (x as f64 + offset) / scale;
            *cell += amplitude * perlin.get([nx, ny]) as f32;
        }
    });
    Ok(())
}

/// Island-shaping post-filter: scale each cell by a smooth radial falloff
/// of its normalized distance from the grid center, in place. Pushes the
/// borders toward sea so continents sit inside the frame.
pub(crate) fn island_filter(
    dst: &mut [f32],
    width: usize,
    height: usize,
) -> Result<(), KernelFault> {
    check_grid_len(dst.len(), width, height)?;
    let cx = (width as f32 - 1.0) * 0.5;
    let cy = (height as f32 - 1.0) * 0.5;
    let max_radius = (cx * cx + cy * cy).sqrt();

    dst.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let dy = y as f32 - cy;
        for (x, cell) in row.iter_mut().enumerate() {
            let dx = x as f32 - cx;
            let d = if max_radius > 0.0 {
                (dx * dx + dy * dy).sqrt() / max_radius
            } else {
                0.0
            };
            let t = (1.0 - d * d).max(0.0);
            *cell *= t * t * (3.0 - 2.0 * t);
        }
    });
    Ok(())
}

/// Box average with the window shrunk (never wrapped or padded) at the
/// grid borders.
pub(crate) fn box_mean(
    src: &[f32],
    dst: &mut [f32],
    radius: i32,
    width: usize,
    height: usize,
) -> Result<(), KernelFault> {
    check_grid_len(src.len(), width, height)?;
    check_grid_len(dst.len(), width, height)?;
    if radius < 0 {
        return Err(KernelFault::InvalidShape { width, height });
    }
    let r = radius as usize;

    dst.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r).min(height - 1);
        for (x, cell) in row.iter_mut().enumerate() {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r).min(width - 1);
            let mut sum = 0.0f64;
            for wy in y0..=y1 {
                let row_base = wy * width;
                for wx in x0..=x1 {
                    sum += src[row_base + wx] as f64;
                }
            }
            let count = ((y1 - y0 + 1) * (x1 - x0 + 1)) as f64;
            *cell = (sum / count) as f32;
        }
    });
    Ok(())
}

/// Classify per-cell ascent gradients into descent direction codes.
/// `gx`/`gy` are the finite-difference gradients along x (east) and
/// y (south); the descent vector is their negation.
pub(crate) fn slope_direction(
    gx: &[f32],
    gy: &[f32],
    dst: &mut [u8],
    width: usize,
    height: usize,
) -> Result<(), KernelFault> {
    check_grid_len(gx.len(), width, height)?;
    check_grid_len(gy.len(), width, height)?;
    check_grid_len(dst.len(), width, height)?;

    dst.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let base = y * width;
        for (x, cell) in row.iter_mut().enumerate() {
            let east = -gx[base + x];
            let north = gy[base + x];
            *cell = Direction::from_descent(east, north).code();
        }
    });
    Ok(())
}

/// Trace one river per start point: repeatedly step to the neighbor named
/// by the current cell's direction code, bumping a visit counter at every
/// visited cell, until the trace leaves the grid or hits the step cap.
/// The cap makes direction-field cycles terminate instead of spinning.
pub(crate) fn trace_rivers(
    directions: &[u8],
    visits: &mut [u32],
    starts_x: &[u32],
    starts_y: &[u32],
    width: usize,
    height: usize,
    max_steps: u32,
) -> Result<(), KernelFault> {
    check_grid_len(directions.len(), width, height)?;
    check_grid_len(visits.len(), width, height)?;
    if starts_x.len() != starts_y.len() {
        return Err(KernelFault::InvalidShape {
            width: starts_x.len(),
            height: starts_y.len(),
        });
    }

    let counters: Vec<AtomicU32> = visits.iter().map(|&v| AtomicU32::new(v)).collect();

    (0..starts_x.len()).into_par_iter().for_each(|i| {
        let mut x = starts_x[i] as i64;
        let mut y = starts_y[i] as i64;
        let mut steps = 0u32;
        while x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height {
            let idx = y as usize * width + x as usize;
            counters[idx].fetch_add(1, Ordering::Relaxed);
            if steps >= max_steps {
                break;
            }
            let Some(dir) = Direction::from_code(directions[idx]) else {
                break;
            };
            let (dx, dy) = dir.offset();
            x += dx as i64;
            y += dy as i64;
            steps += 1;
        }
    });

    for (slot, counter) in visits.iter_mut().zip(counters) {
        *slot = counter.into_inner();
    }
    Ok(())
}

/// Paint every cell whose elevation lies inside the closed absolute band
/// `[band_start, band_end]`, interpolating start to end color per channel
/// by the cell's fractional position. A degenerate band paints the start
/// color (fraction 0).
#[allow(clippy::too_many_arguments)]
pub(crate) fn color_band(
    elevation: &[f32],
    r: &mut [u8],
    g: &mut [u8],
    b: &mut [u8],
    band_start: f32,
    band_end: f32,
    start_rgb: [u8; 3],
    end_rgb: [u8; 3],
    width: usize,
    height: usize,
) -> Result<(), KernelFault> {
    check_grid_len(elevation.len(), width, height)?;
    check_grid_len(r.len(), width, height)?;
    check_grid_len(g.len(), width, height)?;
    check_grid_len(b.len(), width, height)?;

    let span = band_end - band_start;
    elevation
        .par_iter()
        .zip(r.par_iter_mut())
        .zip(g.par_iter_mut())
        .zip(b.par_iter_mut())
        .for_each(|(((&v, cr), cg), cb)| {
            if v < band_start || v > band_end {
                return;
            }
            let frac = if span > 0.0 { (v - band_start) / span } else { 0.0 };
            *cr = lerp_channel(start_rgb[0], end_rgb[0], frac);
            *cg = lerp_channel(start_rgb[1], end_rgb[1], frac);
            *cb = lerp_channel(start_rgb[2], end_rgb[2], frac);
        });
    Ok(())
}

fn lerp_channel(start: u8, end: u8, frac: f32) -> u8 {
    (start as f32 * (1.0 - frac) + end as f32 * frac) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_octave_deterministic() {
        let mut a = vec![127.5f32; 16];
        let mut b = vec![127.5f32; 16];
        noise_octave(&mut a, 4, 4, 42, 10.0, 5.0).unwrap();
        noise_octave(&mut b, 4, 4, 42, 10.0, 5.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_noise_octave_rejects_bad_shape() {
        let mut buf = vec![0.0f32; 15];
        assert!(noise_octave(&mut buf, 4, 4, 0, 10.0, 1.0).is_err());
    }

    #[test]
    fn test_island_filter_center_kept_corners_zeroed() {
        let mut buf = vec![100.0f32; 25];
        island_filter(&mut buf, 5, 5).unwrap();
        // Center distance 0: untouched. Corner distance 1: zeroed.
        assert_eq!(buf[2 * 5 + 2], 100.0);
        assert_eq!(buf[0], 0.0);
        assert_eq!(buf[24], 0.0);
    }

    #[test]
    fn test_box_mean_constant_grid() {
        let src = vec![3.0f32; 12];
        let mut dst = vec![0.0f32; 12];
        box_mean(&src, &mut dst, 2, 4, 3).unwrap();
        for v in dst {
            assert!((v - 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_box_mean_shrinks_window_at_edges() {
        // 2x1 grid, radius 1: both cells average over both values.
        let src = vec![0.0f32, 10.0];
        let mut dst = vec![0.0f32; 2];
        box_mean(&src, &mut dst, 1, 2, 1).unwrap();
        assert_eq!(dst, vec![5.0, 5.0]);
    }

    #[test]
    fn test_box_mean_interior_window() {
        // 3x1, radius 1: middle averages all three, edges average two.
        let src = vec![0.0f32, 3.0, 6.0];
        let mut dst = vec![0.0f32; 3];
        box_mean(&src, &mut dst, 1, 3, 1).unwrap();
        assert_eq!(dst, vec![1.5, 3.0, 4.5]);
    }

    #[test]
    fn test_slope_direction_tilted_plane() {
        // Ascent toward the east with a slight southward lean: descent is
        // strictly inside the west sector.
        let gx = vec![1.0f32; 4];
        let gy = vec![0.1f32; 4];
        let mut dst = vec![255u8; 4];
        slope_direction(&gx, &gy, &mut dst, 2, 2).unwrap();
        assert_eq!(dst, vec![Direction::West.code(); 4]);
    }

    #[test]
    fn test_trace_rivers_walks_off_grid() {
        // All cells point east; a trace from (0,0) visits the whole row.
        let directions = vec![Direction::East.code(); 4];
        let mut visits = vec![0u32; 4];
        trace_rivers(&directions, &mut visits, &[0], &[0], 4, 1, 100).unwrap();
        assert_eq!(visits, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_trace_rivers_cycle_hits_step_cap() {
        // Two cells pointing at each other: without the cap this would
        // never terminate.
        let directions = vec![Direction::East.code(), Direction::West.code()];
        let mut visits = vec![0u32; 2];
        trace_rivers(&directions, &mut visits, &[0], &[0], 2, 1, 10).unwrap();
        assert_eq!(visits.iter().sum::<u32>(), 11); // start visit + 10 steps
    }

    #[test]
    fn test_color_band_interpolates_channels() {
        let elevation = vec![0.0f32, 5.0, 10.0, 20.0];
        let mut r = vec![0u8; 4];
        let mut g = vec![0u8; 4];
        let mut b = vec![0u8; 4];
        color_band(
            &elevation,
            &mut r,
            &mut g,
            &mut b,
            0.0,
            10.0,
            [0, 100, 200],
            [100, 200, 0],
            4,
            1,
        )
        .unwrap();
        assert_eq!((r[0], g[0], b[0]), (0, 100, 200)); // band start
        assert_eq!((r[1], g[1], b[1]), (50, 150, 100)); // midpoint
        assert_eq!((r[2], g[2], b[2]), (100, 200, 0)); // band end
        assert_eq!((r[3], g[3], b[3]), (0, 0, 0)); // outside band untouched
    }

    #[test]
    fn test_color_band_degenerate_band_paints_start() {
        let elevation = vec![50.0f32];
        let mut r = vec![0u8; 1];
        let mut g = vec![0u8; 1];
        let mut b = vec![0u8; 1];
        color_band(
            &elevation,
            &mut r,
            &mut g,
            &mut b,
            50.0,
            50.0,
            [10, 20, 30],
            [200, 200, 200],
            1,
            1,
        )
        .unwrap();
        assert_eq!((r[0], g[0], b[0]), (10, 20, 30));
    }
}
