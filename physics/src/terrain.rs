/*!
Region terrain heightfield.

Ingestion keeps the region's long-standing pipeline: the host's 256x256
height grid (1 m spacing) is bilinearly upsampled 2x to 512x512 (0.5 m
spacing), then copied into a 514x514 sample array with a one-sample
border-clamped guard band so edge lookups never index out of range.
Heights at or below zero are raised to a hair above it, which keeps the
contact solver from seeing a degenerate zero-thickness floor.

Heights are sampled directly in the region's Z-up frame; height and
surface-normal lookups bilinearly interpolate the guarded grid.
*/

use thiserror::Error;

use crate::types::Vec3;

/// Host-side heightmap edge length (samples at 1 m spacing).
pub const SOURCE_SIDE: usize = 256;
/// Stored samples per side: 2x upsample plus the guard band.
const SAMPLE_SIDE: usize = 2 * SOURCE_SIDE + 2;
/// Minimum stored height.
const HEIGHT_FLOOR: f32 = 1.0e-7;

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("terrain heightmap must have {expected} samples, got {got}")]
    BadSampleCount { expected: usize, got: usize },
    #[error("terrain heightmap contains a non-finite sample at index {0}")]
    NonFiniteSample(usize),
}

#[derive(Debug)]
pub struct Terrain {
    /// X-major `SAMPLE_SIDE`^2 grid; sample (sx, sy) sits at world
    /// ((sx-1)*0.5, (sy-1)*0.5).
    samples: Vec<f32>,
}

impl Terrain {
    /// Builds the guarded sample grid from a row-major (`[y*256 + x]`)
    /// host heightmap.
    pub fn build(heights: &[f32]) -> Result<Self, TerrainError> {
        let expected = SOURCE_SIDE * SOURCE_SIDE;
        if heights.len() != expected {
            return Err(TerrainError::BadSampleCount {
                expected,
                got: heights.len(),
            });
        }
        if let Some(bad) = heights.iter().position(|h| !h.is_finite()) {
            return Err(TerrainError::NonFiniteSample(bad));
        }

        let fine = upsample_2x(heights);
        let fine_side = 2 * SOURCE_SIDE;

        let mut samples = vec![0.0f32; SAMPLE_SIDE * SAMPLE_SIDE];
        for sx in 0..SAMPLE_SIDE {
            let fx = clip(sx as isize - 1, fine_side - 1);
            for sy in 0..SAMPLE_SIDE {
                let fy = clip(sy as isize - 1, fine_side - 1);
                let h = fine[fy * fine_side + fx];
                samples[sx * SAMPLE_SIDE + sy] = if h <= 0.0 { HEIGHT_FLOOR } else { h };
            }
        }
        Ok(Self { samples })
    }

    fn sample(&self, sx: usize, sy: usize) -> f32 {
        self.samples[sx * SAMPLE_SIDE + sy]
    }

    /// Bilinearly interpolated terrain height at a world X/Y position.
    pub fn height_at(&self, x: f32, y: f32) -> f32 {
        let max = (SAMPLE_SIDE - 1) as f32;
        let u = (x * 2.0 + 1.0).clamp(0.0, max);
        let v = (y * 2.0 + 1.0).clamp(0.0, max);
        let u0 = u.floor() as usize;
        let v0 = v.floor() as usize;
        let u1 = (u0 + 1).min(SAMPLE_SIDE - 1);
        let v1 = (v0 + 1).min(SAMPLE_SIDE - 1);
        let fu = u - u0 as f32;
        let fv = v - v0 as f32;

        let h00 = self.sample(u0, v0);
        let h10 = self.sample(u1, v0);
        let h01 = self.sample(u0, v1);
        let h11 = self.sample(u1, v1);
        let h0 = h00 + (h10 - h00) * fu;
        let h1 = h01 + (h11 - h01) * fu;
        h0 + (h1 - h0) * fv
    }

    /// Upward surface normal at a world X/Y position, from central height
    /// differences at half-sample spacing.
    pub fn normal_at(&self, x: f32, y: f32) -> Vec3 {
        const D: f32 = 0.25;
        let dx = (self.height_at(x + D, y) - self.height_at(x - D, y)) / (2.0 * D);
        let dy = (self.height_at(x, y + D) - self.height_at(x, y - D)) / (2.0 * D);
        let n = Vec3::new(-dx, -dy, 1.0);
        n / n.norm()
    }
}

fn clip(v: isize, max: usize) -> usize {
    v.clamp(0, max as isize) as usize
}

/// Separable bilinear 2x upsample of a row-major square grid.
fn upsample_2x(src: &[f32]) -> Vec<f32> {
    let side = SOURCE_SIDE;
    let out_side = side * 2;
    let mut out = vec![0.0f32; out_side * out_side];
    for oy in 0..out_side {
        let yf = oy as f32 * 0.5;
        let y0 = yf.floor() as usize;
        let y1 = (y0 + 1).min(side - 1);
        let ty = yf - y0 as f32;
        for ox in 0..out_side {
            let xf = ox as f32 * 0.5;
            let x0 = xf.floor() as usize;
            let x1 = (x0 + 1).min(side - 1);
            let tx = xf - x0 as f32;

            let h00 = src[y0 * side + x0];
            let h10 = src[y0 * side + x1];
            let h01 = src[y1 * side + x0];
            let h11 = src[y1 * side + x1];
            let h0 = h00 + (h10 - h00) * tx;
            let h1 = h01 + (h11 - h01) * tx;
            out[oy * out_side + ox] = h0 + (h1 - h0) * ty;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(height: f32) -> Vec<f32> {
        vec![height; SOURCE_SIDE * SOURCE_SIDE]
    }

    #[test]
    fn wrong_sample_count_is_rejected() {
        let err = Terrain::build(&[0.0; 10]).unwrap_err();
        assert!(matches!(err, TerrainError::BadSampleCount { .. }));
    }

    #[test]
    fn flat_terrain_reads_back_its_height_everywhere() {
        let t = Terrain::build(&flat(21.5)).unwrap();
        for &(x, y) in &[(0.0, 0.0), (128.0, 128.0), (255.0, 1.0), (10.3, 77.7)] {
            assert!((t.height_at(x, y) - 21.5).abs() < 1.0e-4);
        }
    }

    #[test]
    fn non_positive_heights_are_raised_above_zero() {
        let t = Terrain::build(&flat(-5.0)).unwrap();
        let h = t.height_at(100.0, 100.0);
        assert!(h > 0.0);
        assert!(h < 1.0e-5);
    }

    #[test]
    fn lookups_past_the_border_clamp_to_the_edge() {
        // The guard band makes out-of-region lookups return edge heights.
        let mut src = flat(3.0);
        src[0] = 9.0; // corner (0, 0)
        let t = Terrain::build(&src).unwrap();
        assert!((t.height_at(-10.0, -10.0) - 9.0).abs() < 1.0e-4);
        assert!((t.height_at(400.0, 400.0) - 3.0).abs() < 1.0e-4);
    }

    #[test]
    fn sloped_terrain_interpolates_between_samples() {
        // Height equals x over a linear ramp.
        let mut src = flat(0.0);
        for y in 0..SOURCE_SIDE {
            for x in 0..SOURCE_SIDE {
                src[y * SOURCE_SIDE + x] = x as f32;
            }
        }
        let t = Terrain::build(&src).unwrap();
        assert!((t.height_at(10.0, 50.0) - 10.0).abs() < 1.0e-3);
        assert!((t.height_at(10.25, 50.0) - 10.25).abs() < 1.0e-2);
        assert!((t.height_at(10.5, 50.0) - 10.5).abs() < 1.0e-3);
    }

    #[test]
    fn ramp_normal_leans_against_the_slope() {
        let mut src = flat(0.0);
        for y in 0..SOURCE_SIDE {
            for x in 0..SOURCE_SIDE {
                src[y * SOURCE_SIDE + x] = x as f32;
            }
        }
        let t = Terrain::build(&src).unwrap();
        let n = t.normal_at(100.0, 100.0);
        assert!(n.x < -0.1);
        assert!(n.z > 0.5);
        assert!((n.norm() - 1.0).abs() < 1.0e-5);
        // Flat ground points straight up.
        let flat_t = Terrain::build(&flat(5.0)).unwrap();
        let fn_ = flat_t.normal_at(100.0, 100.0);
        assert!((fn_.z - 1.0).abs() < 1.0e-5);
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        let mut src = flat(1.0);
        src[1234] = f32::NAN;
        let err = Terrain::build(&src).unwrap_err();
        assert!(matches!(err, TerrainError::NonFiniteSample(1234)));
    }
}
