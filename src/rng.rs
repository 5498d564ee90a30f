//! Process-wide random source.
//!
//! A single, explicit, non-thread-safe handle created once at process
//! start and passed by reference into the inner iteration loop, rather
//! than a shared global — keeps the hot loop free of synchronization.

use rand::{Rng as _, SeedableRng};
use rand::rngs::StdRng;

pub struct Rng {
    inner: StdRng,
}

impl Rng {
    pub fn new() -> Rng {
        Rng { inner: StdRng::from_os_rng() }
    }

    /// Uniform variate in `[0, 1)`.
    pub fn uniform01(&mut self) -> f64 {
        self.inner.random::<f64>()
    }

    /// Uniform variate in `[lo, hi)`.
    pub fn uniform_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.uniform01()
    }

    /// Uniform integer in `[0, bound)`.
    pub fn uniform_index(&mut self, bound: usize) -> usize {
        self.inner.random_range(0..bound)
    }

    /// A pair of independent unit-normal variates via polar Box-Muller.
    pub fn normal_pair(&mut self) -> (f64, f64) {
        loop {
            let x = 2.0 * self.uniform01() - 1.0;
            let y = 2.0 * self.uniform01() - 1.0;
            let w = x * x + y * y;
            if w < 1.0 && w > 0.0 {
                let mul = (-2.0 * w.ln() / w).sqrt();
                return (x * mul, y * mul);
            }
        }
    }

    /// A single unit-normal variate (discards the second polar sample).
    pub fn normal(&mut self) -> f64 {
        self.normal_pair().0
    }
}

impl Default for Rng {
    fn default() -> Rng {
        Rng::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform01_stays_in_range() {
        let mut rng = Rng::new();
        for _ in 0..1000 {
            let v = rng.uniform01();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn normal_pair_is_finite() {
        let mut rng = Rng::new();
        for _ in 0..1000 {
            let (a, b) = rng.normal_pair();
            assert!(a.is_finite() && b.is_finite());
        }
    }
}
