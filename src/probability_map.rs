//! Image-driven 2-D sampler: builds a cumulative
//! distribution over an image's pixel intensities and draws `(x, y)`
//! samples from it, optionally as an alternative initial-conditions
//! source for the iterative map.
//!
//! Grounded on `histogram/mod.rs`'s row-major pixel layout and its use
//! of [`crate::rng::Rng`] for sampling.

use crate::rng::Rng;

/// A built cumulative distribution over one image's pixel intensities.
pub struct ProbabilityMap {
    width: u32,
    height: u32,
    /// Row-major running sum of per-pixel intensity; `cumulative[i]` is
    /// the total intensity of pixels `0..=i`. Monotonically
    /// non-decreasing; the final entry is the image's total intensity.
    cumulative: Vec<f64>,
}

impl ProbabilityMap {
    /// Builds the cumulative distribution from `intensity`, a row-major
    /// array of `width * height` non-negative per-pixel weights (e.g.
    /// luma).
    pub fn build(width: u32, height: u32, intensity: &[f64]) -> ProbabilityMap {
        assert_eq!(intensity.len(), (width as usize) * (height as usize));
        let mut cumulative = Vec::with_capacity(intensity.len());
        let mut running = 0.0;
        for &v in intensity {
            running += v.max(0.0);
            cumulative.push(running);
        }
        ProbabilityMap { width, height, cumulative }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total intensity across the image; zero means every sample falls
    /// back to the image's center pixel.
    pub fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// Draws the pixel index whose cumulative bucket contains `key`, via
    /// binary search for the first index whose cumulative value is
    /// `>= key`.
    fn sample_index(&self, key: f64) -> usize {
        match self.cumulative.binary_search_by(|v| v.partial_cmp(&key).unwrap()) {
            Ok(i) => i,
            Err(i) => i.min(self.cumulative.len() - 1),
        }
    }

    fn index_to_xy(&self, index: usize) -> (u32, u32) {
        let x = (index as u32) % self.width;
        let y = (index as u32) / self.width;
        (x, y)
    }

    /// Draws one `(x, y)` pixel coordinate, weighted by intensity.
    pub fn sample_pixel(&self, rng: &mut Rng) -> (u32, u32) {
        let total = self.total();
        if total <= 0.0 || self.cumulative.is_empty() {
            return (self.width / 2, self.height / 2);
        }
        let key = rng.uniform01() * total;
        self.index_to_xy(self.sample_index(key))
    }

    /// Draws a pixel coordinate and adds uniform jitter within that
    /// pixel's unit cell, returning normalized `[0,1) x [0,1)`
    /// coordinates.
    pub fn sample_jittered(&self, rng: &mut Rng) -> (f64, f64) {
        let (x, y) = self.sample_pixel(rng);
        let fx = (x as f64 + rng.uniform01()) / self.width as f64;
        let fy = (y as f64 + rng.uniform01()) / self.height as f64;
        (fx, fy)
    }

    /// As [`Self::sample_jittered`], but perturbs the sample by a small
    /// Gaussian instead of uniform jitter, for a softer source.
    pub fn sample_gaussian(&self, rng: &mut Rng, sigma_pixels: f64) -> (f64, f64) {
        let (x, y) = self.sample_pixel(rng);
        let (dx, dy) = rng.normal_pair();
        let fx = (x as f64 + 0.5 + dx * sigma_pixels) / self.width as f64;
        let fy = (y as f64 + 0.5 + dy * sigma_pixels) / self.height as f64;
        (fx.clamp(0.0, 1.0), fy.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_samples_uniformly_in_index_space() {
        let intensity = vec![1.0; 16];
        let map = ProbabilityMap::build(4, 4, &intensity);
        assert_eq!(map.total(), 16.0);

        let mut rng = Rng::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(map.sample_pixel(&mut rng));
        }
        assert!(seen.len() > 4, "flat image should hit more than a handful of pixels");
    }

    #[test]
    fn all_mass_on_one_pixel_always_samples_it() {
        let mut intensity = vec![0.0; 9];
        intensity[4] = 1.0;
        let map = ProbabilityMap::build(3, 3, &intensity);
        let mut rng = Rng::new();
        for _ in 0..50 {
            assert_eq!(map.sample_pixel(&mut rng), (1, 1));
        }
    }

    #[test]
    fn zero_intensity_image_falls_back_to_center() {
        let intensity = vec![0.0; 16];
        let map = ProbabilityMap::build(4, 4, &intensity);
        let mut rng = Rng::new();
        assert_eq!(map.sample_pixel(&mut rng), (2, 2));
    }

    #[test]
    fn jittered_sample_stays_within_unit_square() {
        let intensity = vec![1.0; 16];
        let map = ProbabilityMap::build(4, 4, &intensity);
        let mut rng = Rng::new();
        for _ in 0..100 {
            let (x, y) = map.sample_jittered(&mut rng);
            assert!((0.0..1.0).contains(&x));
            assert!((0.0..1.0).contains(&y));
        }
    }
}
