//! The de Jong chaotic map: inner iteration loop, initial-conditions
//! distributions, and timed-budget scheduling.
//!
//! Grounded on `original_source/src/de-jong.c`'s `de_jong_calculate`
//! (the inner loop, rotation/aspect matrix, blur table, oversample
//! jitter table, tileable wrap) and `iterative-map.c`'s
//! `iterative_map_calculate_timed`/`limit_iterations` (timed-budget
//! scheduling). The GTK idle-handler scheduling loop itself is out of
//! scope here — see `bin/fyre_worker.rs` for the tokio equivalent — but
//! the `calculation-start`/`-stop`/`-finished` signal emissions are kept
//! as a `tokio::sync::broadcast` channel for supervisory signaling.

use std::time::Instant;

use tokio::sync::broadcast;

use crate::error::FyreError;
use crate::histogram::HistogramImager;
use crate::param::dejong::{DeJongParams, InitialConditions};
use crate::param::image::ImageParams;
use crate::param::ParamHolder;
use crate::rng::Rng;

const OVERSAMPLE_TABLE_SIZE: usize = 32;
const BLUR_RATIO_PERIOD: u32 = 1024;
const MIN_ITERATIONS: i64 = 1_000;
const MAX_ITERATIONS: i64 = 10_000_000;
const DEFAULT_RENDER_TIME_SECS: f64 = 0.015;
const DEFAULT_ITER_SPEED_ESTIMATE: f64 = 200_000.0;

/// Broadcast on `calculation-start`/`-stop`/`-finished`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapEvent {
    Start,
    Stop,
    Finished,
}

/// Owns a [`HistogramImager`] and iterates the de Jong map into it.
pub struct DeJongMap {
    params: DeJongParams,
    image_params: ImageParams,
    imager: HistogramImager,
    rng: Rng,

    point_x: f64,
    point_y: f64,
    remaining_transient_iterations: u32,
    iterations: u64,
    calc_dirty: bool,

    iter_speed_estimate: f64,
    render_time_secs: f64,
    is_running: bool,

    events: broadcast::Sender<MapEvent>,
}

impl DeJongMap {
    pub fn new() -> DeJongMap {
        let (events, _) = broadcast::channel(16);
        let mut map = DeJongMap {
            params: DeJongParams::default(),
            image_params: ImageParams::default(),
            imager: HistogramImager::new(),
            rng: Rng::new(),
            point_x: 0.0,
            point_y: 0.0,
            remaining_transient_iterations: 0,
            iterations: 0,
            calc_dirty: true,
            iter_speed_estimate: DEFAULT_ITER_SPEED_ESTIMATE,
            render_time_secs: DEFAULT_RENDER_TIME_SECS,
            is_running: false,
            events,
        };
        map.imager.apply_params(&map.image_params);
        map
    }

    pub fn params(&self) -> &DeJongParams {
        &self.params
    }

    pub fn image_params(&self) -> &ImageParams {
        &self.image_params
    }

    pub fn imager(&self) -> &HistogramImager {
        &self.imager
    }

    pub fn imager_mut(&mut self) -> &mut HistogramImager {
        &mut self.imager
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Adds to the iteration count on the cluster controller's behalf,
    /// for remote workers' reported progress.
    pub fn add_remote_iterations(&mut self, delta: u64) {
        self.iterations += delta;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: MapEvent) {
        let _ = self.events.send(event);
    }

    /// Sets a de Jong parameter by name, marking the calculation dirty
    /// if it materially changed, which resets the calculation.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), FyreError> {
        if self.params.set(name, value)? {
            self.calc_dirty = true;
        }
        Ok(())
    }

    pub fn replace_params(&mut self, params: DeJongParams) {
        self.params = params;
        self.calc_dirty = true;
    }

    pub fn load_params(&mut self, text: &str) -> Result<(), FyreError> {
        self.params.load_string(text)?;
        self.calc_dirty = true;
        Ok(())
    }

    pub fn save_params(&self) -> String {
        self.params.save_string()
    }

    /// Sets an image/render parameter by name. This never marks the
    /// calculation dirty; a size change only invalidates the histogram
    /// imager's own cached state.
    pub fn set_image_param(&mut self, name: &str, value: &str) -> Result<(), FyreError> {
        self.image_params.set(name, value)?;
        self.imager.apply_params(&self.image_params);
        Ok(())
    }

    pub fn mark_calc_dirty(&mut self) {
        self.calc_dirty = true;
    }

    fn reset_calc(&mut self) {
        self.imager.clear();
        self.iterations = 0;
        self.remaining_transient_iterations = 0;
        self.point_x = self.rng.uniform01();
        self.point_y = self.rng.uniform01();
        self.calc_dirty = false;
    }

    /// Runs `iterations` steps of the de Jong map, plotting into the
    /// owned histogram imager.
    pub fn calculate(&mut self, iterations: u32) {
        self.imager.apply_params(&self.image_params);
        if self.calc_dirty {
            self.reset_calc();
        }

        let p = self.params.clone();
        let tileable = p.tileable;
        let rotation_enabled = p.rotation.abs() > 0.0001;
        let blur_enabled = p.blur_ratio > 0.0001 && p.blur_radius > 0.00001;
        let aspect_enabled = !(0.9999..=1.0001).contains(&p.aspect);
        let matrix_enabled = aspect_enabled || rotation_enabled;
        let emphasize_transient = p.emphasize_transient;
        let oversample_enabled = self.imager.oversample() > 1;

        let mut plot = self.imager.prepare_plots();
        let hist_width = plot.hist_width() as i64;
        let hist_height = self.imager.hist_height() as i64;

        let scale = hist_width as f64 / 5.0 * p.zoom;
        let xcenter = hist_width as f64 / 2.0 + p.xoffset * scale;
        let ycenter = hist_height as f64 / 2.0 + p.yoffset * scale;

        let (mat_a, mat_b, mat_c, mat_d) = if matrix_enabled {
            if rotation_enabled {
                let (sin_r, cos_r) = p.rotation.sin_cos();
                (cos_r * p.aspect, sin_r / p.aspect, -sin_r * p.aspect, cos_r / p.aspect)
            } else {
                (p.aspect, 0.0, 0.0, 1.0 / p.aspect)
            }
        } else {
            (0.0, 0.0, 0.0, 0.0)
        };

        let blur_table: Option<Vec<f64>> = if blur_enabled {
            let size = find_upper_pow2(iterations / 50);
            let mut table = vec![0.0f64; size];
            let mut i = 0;
            while i < size {
                let (a, b) = self.rng.normal_pair();
                table[i] = a * p.blur_radius;
                if i + 1 < size {
                    table[i + 1] = b * p.blur_radius;
                }
                i += 2;
            }
            Some(table)
        } else {
            None
        };
        let mut blur_index = 0usize;
        let blur_ratio_threshold = (p.blur_ratio * BLUR_RATIO_PERIOD as f64) as u32;
        let mut blur_ratio_index: u32 = 0;

        let mut oversample_table = [0f64; OVERSAMPLE_TABLE_SIZE];
        if oversample_enabled {
            for slot in oversample_table.iter_mut() {
                *slot = self.rng.uniform01() * 2.0 - 1.0;
            }
        }
        let mut oversample_index = 0usize;

        let mut point_x = self.point_x;
        let mut point_y = self.point_y;
        let mut remaining_transient = self.remaining_transient_iterations;

        for _ in 0..iterations {
            if emphasize_transient {
                if remaining_transient > 0 {
                    remaining_transient -= 1;
                } else {
                    remaining_transient = p.transient_iterations - 1;
                    let (ix, iy) = initial_point(p.initial_conditions, &mut self.rng);
                    point_x = p.initial_xscale * ix + p.initial_xoffset;
                    point_y = p.initial_yscale * iy + p.initial_yoffset;
                }
            }

            let new_x = (p.a * point_y).sin() - (p.b * point_x).cos();
            let new_y = (p.c * point_x).sin() - (p.d * point_y).cos();
            point_x = new_x;
            point_y = new_y;

            let (mut x, mut y) = if matrix_enabled {
                (point_x * mat_a + point_y * mat_b, point_x * mat_c + point_y * mat_d)
            } else {
                (point_x, point_y)
            };

            if let Some(table) = &blur_table {
                if blur_ratio_index < blur_ratio_threshold {
                    x += table[blur_index];
                    blur_index = (blur_index + 1) & (table.len() - 1);
                    y += table[blur_index];
                    blur_index = (blur_index + 1) & (table.len() - 1);
                }
                blur_ratio_index = (blur_ratio_index + 1) & (BLUR_RATIO_PERIOD - 1);
            }

            x = x * scale + xcenter;
            y = y * scale + ycenter;

            if oversample_enabled {
                x += oversample_table[oversample_index];
                oversample_index = (oversample_index + 1) & (OVERSAMPLE_TABLE_SIZE - 1);
                y += oversample_table[oversample_index];
                oversample_index = (oversample_index + 1) & (OVERSAMPLE_TABLE_SIZE - 1);
            }

            let ix = floor_to_i64(x);
            let iy = floor_to_i64(y);

            let (ix, iy) = if tileable {
                (ix.rem_euclid(hist_width), iy.rem_euclid(hist_height))
            } else if ix < 0 || ix >= hist_width || iy < 0 || iy >= hist_height {
                continue;
            } else {
                (ix, iy)
            };

            plot.plot(ix as u32, iy as u32);
        }

        self.point_x = point_x;
        self.point_y = point_y;
        self.remaining_transient_iterations = remaining_transient;
        self.iterations += iterations as u64;

        self.imager.finish_plots(plot);
        self.emit(MapEvent::Finished);
    }

    /// Splits `iterations` into ~10 blocks, interpolating `self.params`
    /// between `a` and `b` at a random point on each block's segment,
    /// producing true motion blur as block count grows.
    pub fn calculate_motion(&mut self, iterations: u32, continuation: bool, a: &DeJongParams, b: &DeJongParams) {
        let blocksize = (iterations / 10).max(1);
        let mut done = 0u32;
        let mut first = true;

        while done < iterations {
            let alpha = self.rng.uniform01();
            let mut params = self.params.clone();
            params.interpolate_linear(alpha, a, b);
            self.params = params;

            if first {
                self.calc_dirty = !continuation;
                first = false;
            }

            let this_block = blocksize.min(iterations - done);
            self.calculate(this_block);
            done += this_block;
        }
    }

    /// Runs `iter_speed_estimate * seconds` iterations (clamped to
    /// `[1_000, 10_000_000]`), then updates the speed estimate from the
    /// measured elapsed time.
    pub fn calculate_timed(&mut self, seconds: f64) -> f64 {
        let iterations = limit_iterations((self.iter_speed_estimate * seconds + 0.5) as i64);
        let start = Instant::now();
        self.calculate(iterations);
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.iter_speed_estimate = iterations as f64 / elapsed;
        }
        elapsed
    }

    pub fn calculate_motion_timed(
        &mut self,
        seconds: f64,
        continuation: bool,
        a: &DeJongParams,
        b: &DeJongParams,
    ) -> f64 {
        let iterations = limit_iterations((self.iter_speed_estimate * seconds + 0.5) as i64);
        let start = Instant::now();
        self.calculate_motion(iterations, continuation, a, b);
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.iter_speed_estimate = iterations as f64 / elapsed;
        }
        elapsed
    }

    pub fn render_time(&self) -> f64 {
        self.render_time_secs
    }

    pub fn set_render_time(&mut self, secs: f64) {
        self.render_time_secs = secs;
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn start_calculation(&mut self) -> bool {
        if self.is_running {
            return false;
        }
        self.is_running = true;
        self.emit(MapEvent::Start);
        true
    }

    pub fn stop_calculation(&mut self) -> bool {
        if !self.is_running {
            return false;
        }
        self.is_running = false;
        self.emit(MapEvent::Stop);
        true
    }
}

impl Default for DeJongMap {
    fn default() -> DeJongMap {
        DeJongMap::new()
    }
}

fn limit_iterations(iters: i64) -> u32 {
    iters.clamp(MIN_ITERATIONS, MAX_ITERATIONS) as u32
}

/// Smallest power of two `>= x`, with a floor of 2 so the blur table's
/// `& (size-1)` index wrap always has at least two slots.
fn find_upper_pow2(x: u32) -> usize {
    let mut p: usize = 1;
    while (p as u32) < x {
        p <<= 1;
    }
    p.max(2)
}

#[inline]
fn floor_to_i64(v: f64) -> i64 {
    if v < 0.0 {
        v as i64 - 1
    } else {
        v as i64
    }
}

fn initial_point(kind: InitialConditions, rng: &mut Rng) -> (f64, f64) {
    match kind {
        InitialConditions::SquareUniform => (rng.uniform01() * 2.0 - 1.0, rng.uniform01() * 2.0 - 1.0),
        InitialConditions::Gaussian => rng.normal_pair(),
        InitialConditions::CircularUniform => loop {
            let i = rng.uniform01() * 2.0 - 1.0;
            let j = rng.uniform01() * 2.0 - 1.0;
            if i * i + j * j <= 1.0 {
                break (i, j);
            }
        },
        InitialConditions::Radial => {
            let theta = rng.uniform01() * std::f64::consts::TAU;
            let radius = rng.uniform01();
            (theta.cos() * radius, theta.sin() * radius)
        }
        InitialConditions::Sphere => {
            let (vx, vy) = rng.normal_pair();
            let (vz, _) = rng.normal_pair();
            let mag = (vx * vx + vy * vy + vz * vz).sqrt();
            (vx / mag, vy / mag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculate_plots_points_and_advances_iteration_count() {
        let mut map = DeJongMap::new();
        map.calculate(10_000);
        assert_eq!(map.iterations(), 10_000);
        assert!(map.imager().total_points_plotted() > 0.0);
    }

    #[test]
    fn changing_a_parameter_marks_calculation_dirty_and_resets_on_next_run() {
        let mut map = DeJongMap::new();
        map.calculate(5_000);
        let plotted_before = map.imager().total_points_plotted();
        map.set_param("zoom", "2.5").unwrap();
        map.calculate(5_000);
        // A dirty reset clears the histogram before the new burst plots,
        // so totals shouldn't simply add the two bursts' iteration counts.
        assert!(map.imager().total_points_plotted() <= plotted_before + 5_000.0);
        assert_eq!(map.iterations(), 5_000);
    }

    #[test]
    fn tileable_never_rejects_points() {
        let mut map = DeJongMap::new();
        map.set_param("tileable", "true").unwrap();
        map.calculate(2_000);
        assert_eq!(map.imager().total_points_plotted(), 2_000.0);
    }

    #[test]
    fn calculate_timed_respects_iteration_limits() {
        let mut map = DeJongMap::new();
        // A huge requested duration must clamp to MAX_ITERATIONS, not run forever.
        map.calculate_timed(1_000_000.0);
        assert!(map.iterations() as i64 <= MAX_ITERATIONS);
        assert!(map.iterations() > 0);
    }

    #[test]
    fn motion_blur_interpolates_between_endpoints() {
        let mut map = DeJongMap::new();
        let mut a = DeJongParams::default();
        a.a = 1.0;
        let mut b = DeJongParams::default();
        b.a = 5.0;
        map.calculate_motion(10_000, false, &a, &b);
        assert!(map.params().a >= 1.0 && map.params().a <= 5.0);
    }

    #[test]
    fn start_stop_calculation_emits_events() {
        let mut map = DeJongMap::new();
        let mut rx = map.subscribe();
        assert!(map.start_calculation());
        assert!(!map.start_calculation());
        assert_eq!(rx.try_recv().unwrap(), MapEvent::Start);
        assert!(map.stop_calculation());
        assert_eq!(rx.try_recv().unwrap(), MapEvent::Stop);
    }
}
