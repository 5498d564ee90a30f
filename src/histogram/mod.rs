//! 2-D histogram accumulator and image generator.
//!
//! Grounded on `original_source/src/histogram-imager.c`: pixel-scale and
//! color-table generation, the oversample linearize/nonlinearize gamma
//! tables, the quality metric, and the var-int run-length stream codec
//! are all ported from there. The plot-bracket API is reshaped from the
//! original's `HISTOGRAM_IMAGER_PLOT` macro (which mutates a borrowed
//! `HistogramPlot` in place) into an owned `HistogramPlot` that takes the
//! histogram buffer out of the imager for the duration of a plotting
//! burst, in an ownership style used elsewhere in this crate for scoped
//! resources.

use crate::param::image::ImageParams;
use crate::param::ColorRgba;
use crate::varint;
use std::time::Instant;

/// One color table entry: 8-bit-per-channel RGBA, ready to blit.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

struct ColorTable {
    entries: Vec<Rgba8>,
    quality: Vec<f32>,
    filled_size: usize,
}

impl ColorTable {
    fn new() -> ColorTable {
        ColorTable { entries: Vec::new(), quality: Vec::new(), filled_size: 0 }
    }

    fn resize(&mut self, size: usize) {
        self.filled_size = size;
        if self.entries.len() < size {
            self.entries.resize(size, Rgba8::default());
            self.quality.resize(size, 0.0);
        }
    }
}

#[derive(Default)]
struct OversampleTables {
    gamma: f64,
    oversample: u32,
    linearize: Vec<u32>,
    nonlinearize: Vec<u8>,
}

/// An in-progress plotting burst. Owns the histogram buffer, taken out
/// of the imager by [`HistogramImager::prepare_plots`] and returned by
/// [`HistogramImager::finish_plots`].
pub struct HistogramPlot {
    histogram: Vec<u32>,
    hist_width: u32,
    local_density: u32,
    local_count: u64,
}

impl HistogramPlot {
    /// Increments the bucket at `(x, y)` and returns its new count.
    #[inline]
    pub fn plot(&mut self, x: u32, y: u32) -> u32 {
        let idx = (x + self.hist_width * y) as usize;
        self.increment(idx, 1)
    }

    #[inline]
    fn increment(&mut self, idx: usize, amount: u32) -> u32 {
        self.local_count += amount as u64;
        let bucket = &mut self.histogram[idx];
        *bucket += amount;
        if *bucket > self.local_density {
            self.local_density = *bucket;
        }
        *bucket
    }

    pub fn hist_width(&self) -> u32 {
        self.hist_width
    }
}

/// Stores the 2-D histogram and renders it to an RGBA image through a
/// gamma-corrected, exposure-scaled color table.
pub struct HistogramImager {
    width: u32,
    height: u32,
    oversample: u32,
    exposure: f64,
    gamma: f64,
    oversample_gamma: f64,
    fgcolor: ColorRgba,
    bgcolor: ColorRgba,
    clamped: bool,

    size_dirty: bool,

    total_points_plotted: f64,
    peak_density: u64,
    render_start: Instant,

    histogram: Option<Vec<u32>>,
    image: Option<Vec<Rgba8>>,

    color_table: ColorTable,
    oversample_tables: OversampleTables,
}

impl HistogramImager {
    pub fn new() -> HistogramImager {
        let defaults = ImageParams::default();
        let mut imager = HistogramImager {
            width: defaults.width,
            height: defaults.height,
            oversample: defaults.oversample,
            exposure: defaults.exposure,
            gamma: defaults.gamma,
            oversample_gamma: defaults.oversample_gamma,
            fgcolor: defaults.fgcolor,
            bgcolor: defaults.bgcolor,
            clamped: defaults.clamped,
            size_dirty: false,
            total_points_plotted: 0.0,
            peak_density: 0,
            render_start: Instant::now(),
            histogram: None,
            image: None,
            color_table: ColorTable::new(),
            oversample_tables: OversampleTables::default(),
        };
        imager.reset_stats();
        imager
    }

    /// Applies a render/size parameter set. Size changes mark the
    /// histogram and image stale; render-parameter changes never do.
    pub fn apply_params(&mut self, params: &ImageParams) {
        if self.width != params.width || self.height != params.height || self.oversample != params.oversample {
            self.width = params.width;
            self.height = params.height;
            self.oversample = params.oversample;
            self.size_dirty = true;
        }
        self.exposure = params.exposure;
        self.gamma = params.gamma;
        self.oversample_gamma = params.oversample_gamma;
        self.fgcolor = params.fgcolor;
        self.bgcolor = params.bgcolor;
        self.clamped = params.clamped;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn oversample(&self) -> u32 {
        self.oversample
    }

    pub fn hist_width(&self) -> u32 {
        self.width * self.oversample
    }

    pub fn hist_height(&self) -> u32 {
        self.height * self.oversample
    }

    pub fn total_points_plotted(&self) -> f64 {
        self.total_points_plotted
    }

    pub fn peak_density(&self) -> u64 {
        self.peak_density
    }

    pub fn elapsed_time(&self) -> f64 {
        self.render_start.elapsed().as_secs_f64()
    }

    pub fn image(&self) -> Option<&[Rgba8]> {
        self.image.as_deref()
    }

    fn check_dirty_flags(&mut self) {
        if self.size_dirty {
            self.histogram = None;
            self.image = None;
            self.size_dirty = false;
        }
    }

    fn require_histogram(&mut self) {
        if self.histogram.is_none() {
            let n = (self.hist_width() * self.hist_height()) as usize;
            self.histogram = Some(vec![0u32; n]);
            self.reset_stats();
        }
    }

    fn reset_stats(&mut self) {
        self.total_points_plotted = 0.0;
        self.peak_density = 0;
        self.render_start = Instant::now();
    }

    /// Zeroes the histogram and resets plotting statistics.
    pub fn clear(&mut self) {
        self.check_dirty_flags();
        if let Some(histogram) = &mut self.histogram {
            histogram.iter_mut().for_each(|v| *v = 0);
        }
        self.reset_stats();
    }

    /// Begins a plotting burst: the caller plots into the returned
    /// [`HistogramPlot`], then MUST hand it back to [`Self::finish_plots`].
    pub fn prepare_plots(&mut self) -> HistogramPlot {
        self.check_dirty_flags();
        self.require_histogram();
        HistogramPlot {
            histogram: self.histogram.take().expect("require_histogram just allocated it"),
            hist_width: self.hist_width(),
            local_density: 0,
            local_count: 0,
        }
    }

    pub fn finish_plots(&mut self, plot: HistogramPlot) {
        self.total_points_plotted += plot.local_count as f64;
        if plot.local_density as u64 > self.peak_density {
            self.peak_density = plot.local_density as u64;
        }
        self.histogram = Some(plot.histogram);
    }

    /// `fscale`: converts a raw histogram count into a luminance in
    /// `[0, 1]`. Zero until at least one point has been plotted.
    pub fn pixel_scale(&self) -> f64 {
        if self.total_points_plotted == 0.0 {
            return 0.0;
        }
        let density = self.total_points_plotted
            / (self.width as f64 * self.height as f64 * self.oversample as f64 * self.oversample as f64);
        (self.exposure / density).min(0.5)
    }

    fn max_usable_density(&self) -> u64 {
        let max_luma = if self.clamped {
            1.0
        } else {
            let channel_luma = |fg: u16, bg: u16| -> f64 {
                let delta = fg as i32 - bg as i32;
                if delta == 0 {
                    0.0
                } else {
                    let clamped = if delta > 0 { 65535 } else { 0 };
                    (clamped as f64 - bg as f64) / delta as f64
                }
            };
            [
                channel_luma(self.fgcolor.r, self.bgcolor.r),
                channel_luma(self.fgcolor.g, self.bgcolor.g),
                channel_luma(self.fgcolor.b, self.bgcolor.b),
                channel_luma(self.fgcolor.a, self.bgcolor.a),
            ]
            .into_iter()
            .fold(0.0f64, f64::max)
        };

        let max_luma = max_luma.powf(self.gamma);
        let fscale = self.pixel_scale();
        let max_usable = if fscale > 0.0 { max_luma / fscale + 1.0 } else { f64::INFINITY };
        max_usable.min(1e15) as u64
    }

    fn generate_color_table(&mut self, force: bool) {
        let fscale = self.pixel_scale();
        let mut usable_density = self.max_usable_density();
        if usable_density > self.peak_density {
            usable_density = self.peak_density;
        }
        let color_table_size = (usable_density + 1) as usize;
        if !force && self.color_table.filled_size == color_table_size {
            return;
        }
        self.color_table.resize(color_table_size);

        let one_over_gamma = 1.0 / self.gamma;
        let mut distance = 0.0f64;
        let mut previous: Option<[i32; 4]> = None;

        for count in 0..self.color_table.filled_size {
            let mut luma = (count as f64 * fscale).powf(one_over_gamma);
            if self.clamped && luma > 1.0 {
                luma = 1.0;
            }

            let lerp = |bg: u16, fg: u16| -> i32 {
                (((bg as f64) * (1.0 - luma) + (fg as f64) * luma) as i32 >> 8).clamp(0, 255)
            };
            let current = [
                lerp(self.bgcolor.r, self.fgcolor.r),
                lerp(self.bgcolor.g, self.fgcolor.g),
                lerp(self.bgcolor.b, self.fgcolor.b),
                lerp(self.bgcolor.a, self.fgcolor.a),
            ];

            if let Some(prev) = previous {
                let sum_sq: i32 = current.iter().zip(prev.iter()).map(|(c, p)| (c - p) * (c - p)).sum();
                distance += (sum_sq as f64).sqrt();
            }
            previous = Some(current);

            self.color_table.entries[count] =
                Rgba8 { r: current[0] as u8, g: current[1] as u8, b: current[2] as u8, a: current[3] as u8 };

            // Grounded on histogram-imager.c's color table generator, which
            // stores count/distance (not distance/count) as the quality
            // weight — confirmed against the reference source directly.
            self.color_table.quality[count] = if distance > 0.0 { (count as f64 / distance) as f32 } else { 0.0 };
        }
    }

    fn require_oversample_tables(&mut self) {
        const LINEAR_BITS: u32 = 12;
        let nonlinearize_size = (1usize << LINEAR_BITS) * self.oversample as usize * self.oversample as usize;

        let need_realloc =
            self.oversample_tables.oversample != self.oversample || self.oversample_tables.linearize.is_empty();
        let need_regenerate = need_realloc || self.oversample_tables.gamma != self.oversample_gamma;

        if need_realloc {
            self.oversample_tables.linearize = vec![0u32; 256];
            self.oversample_tables.nonlinearize = vec![0u8; nonlinearize_size];
            self.oversample_tables.oversample = self.oversample;
        }

        if need_regenerate {
            let gamma = self.oversample_gamma;
            let inv_gamma = 1.0 / gamma;
            let max_linear = ((1u32 << LINEAR_BITS) - 1) as f64;
            for (i, slot) in self.oversample_tables.linearize.iter_mut().enumerate() {
                *slot = ((i as f64 / 255.0).powf(gamma) * max_linear + 0.5) as u32;
            }
            let n = self.oversample_tables.nonlinearize.len();
            for (i, slot) in self.oversample_tables.nonlinearize.iter_mut().enumerate() {
                *slot = ((i as f64 / (n as f64 - 1.0)).powf(inv_gamma) * 255.0 + 0.5) as u8;
            }
            self.oversample_tables.gamma = self.oversample_gamma;
        }
    }

    /// Rebuilds [`Self::image`] from the current histogram, downsampling
    /// `oversample x oversample` buckets per output pixel when enabled.
    pub fn update_image(&mut self) {
        self.check_dirty_flags();
        self.require_histogram();
        self.generate_color_table(true);
        if self.oversample > 1 {
            self.require_oversample_tables();
        }

        let oversample = self.oversample as usize;
        let hist_clamp = self.color_table.filled_size.saturating_sub(1);
        let hist_width = self.hist_width() as usize;
        let width = self.width as usize;
        let height = self.height as usize;

        let histogram = self.histogram.as_ref().expect("require_histogram just allocated it");
        let table = &self.color_table.entries;
        let mut image = vec![Rgba8::default(); width * height];

        if oversample > 1 {
            let linearize = &self.oversample_tables.linearize;
            let nonlinearize = &self.oversample_tables.nonlinearize;

            for y in 0..height {
                for x in 0..width {
                    let mut channels = [0u32; 4];
                    for sy in 0..oversample {
                        for sx in 0..oversample {
                            let hx = x * oversample + sx;
                            let hy = y * oversample + sy;
                            let count = histogram[hx + hist_width * hy] as usize;
                            let c = table[count.min(hist_clamp)];
                            channels[0] += linearize[c.r as usize];
                            channels[1] += linearize[c.g as usize];
                            channels[2] += linearize[c.b as usize];
                            channels[3] += linearize[c.a as usize];
                        }
                    }
                    image[y * width + x] = Rgba8 {
                        r: nonlinearize[channels[0] as usize],
                        g: nonlinearize[channels[1] as usize],
                        b: nonlinearize[channels[2] as usize],
                        a: nonlinearize[channels[3] as usize],
                    };
                }
            }
        } else {
            for y in 0..height {
                for x in 0..width {
                    let count = histogram[x + hist_width * y] as usize;
                    image[y * width + x] = table[count.min(hist_clamp)];
                }
            }
        }

        self.image = Some(image);
    }

    /// A quantitative rendering-quality metric: higher is better, +∞
    /// means the image can't usefully improve further.
    pub fn compute_quality(&mut self) -> f64 {
        self.check_dirty_flags();
        self.require_histogram();
        self.generate_color_table(false);

        if self.color_table.filled_size < 1 {
            return f64::INFINITY;
        }

        let hist_clamp = self.color_table.filled_size - 1;
        let width = self.hist_width() as usize;
        let height = self.hist_height() as usize;
        let x_scale = (width >> 8).max(1);
        let y_scale = (height >> 8).max(1);

        let histogram = self.histogram.as_ref().expect("require_histogram just allocated it");
        let quality = &self.color_table.quality;

        let mut denominator: u64 = 0;
        let mut num_saturated: u64 = 0;
        let mut numerator: f64 = 0.0;

        let mut y = 0;
        while y < height {
            let mut x = 0;
            while x < width {
                let count = histogram[x + width * y] as usize;
                if count > hist_clamp {
                    num_saturated += 1;
                } else if count > 0 {
                    numerator += quality[count] as f64;
                    denominator += 1;
                }
                x += x_scale;
            }
            y += y_scale;
        }

        if denominator == 0 || denominator < num_saturated / 100 {
            return f64::INFINITY;
        }
        numerator / denominator as f64
    }

    /// Run-length-encodes nonzero buckets (clearing them) into a
    /// var-int stream, stopping once `buffer_size` would be exceeded.
    /// Buckets left unexported stay zero-or-nonzero as-is, so a later
    /// call naturally resumes: already-exported buckets read back as
    /// zero and get folded into the next skip run.
    pub fn export_stream(&mut self, buffer_size: usize) -> Vec<u8> {
        self.check_dirty_flags();
        self.require_histogram();

        let mut out = Vec::new();
        let mut remaining = buffer_size.saturating_sub(varint::MAX_SIZE) as i64;
        let histogram = self.histogram.as_mut().expect("require_histogram just allocated it");
        let mut skipped: u32 = 0;

        for bucket in histogram.iter_mut() {
            if remaining <= 0 {
                break;
            }
            if *bucket != 0 {
                if skipped != 0 {
                    remaining -= varint::write(&mut out, skipped << 1) as i64;
                    if remaining < 0 {
                        break;
                    }
                    skipped = 0;
                }
                remaining -= varint::write(&mut out, (*bucket << 1) | 1) as i64;
                *bucket = 0;
            } else {
                skipped += 1;
            }
        }

        out
    }

    /// The inverse of [`Self::export_stream`]: replays skip/plot tokens
    /// through the normal plotting path so `peak_density` and
    /// `total_points_plotted` stay consistent.
    pub fn merge_stream(&mut self, data: &[u8]) {
        let mut plot = self.prepare_plots();
        let total = plot.histogram.len();
        let mut idx = 0usize;
        let mut pos = 0usize;

        while idx < total && pos < data.len() {
            let (token, n) = match varint::read(&data[pos..]) {
                Some(v) => v,
                None => break,
            };
            pos += n;
            if token & 1 != 0 {
                plot.increment(idx, token >> 1);
                idx += 1;
            } else {
                idx += (token >> 1) as usize;
            }
        }

        self.finish_plots(plot);
    }
}

impl Default for HistogramImager {
    fn default() -> HistogramImager {
        HistogramImager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_imager_has_zero_pixel_scale() {
        let imager = HistogramImager::new();
        assert_eq!(imager.pixel_scale(), 0.0);
    }

    #[test]
    fn plotting_accumulates_totals() {
        let mut imager = HistogramImager::new();
        let mut plot = imager.prepare_plots();
        for _ in 0..100 {
            plot.plot(1, 1);
        }
        imager.finish_plots(plot);
        assert_eq!(imager.total_points_plotted(), 100.0);
        assert!(imager.pixel_scale() > 0.0);
    }

    #[test]
    fn update_image_produces_background_before_any_plots() {
        let mut imager = HistogramImager::new();
        imager.update_image();
        let image = imager.image().unwrap();
        assert_eq!(image.len(), (imager.width() * imager.height()) as usize);
        // Every bucket is 0, mapping to luma 0 (fully background).
        let bg = image[0];
        assert!(image.iter().all(|&p| p == bg));
    }

    #[test]
    fn export_then_merge_round_trips_histogram() {
        let mut imager = HistogramImager::new();
        let mut other = HistogramImager::new();

        let mut plot = imager.prepare_plots();
        plot.plot(3, 4);
        plot.plot(3, 4);
        plot.plot(10, 10);
        imager.finish_plots(plot);

        let exported = imager.export_stream(1 << 20);
        other.merge_stream(&exported);

        assert_eq!(other.total_points_plotted(), 3.0);

        let mut reference_plot = HistogramImager::new().prepare_plots();
        reference_plot.plot(3, 4);
        reference_plot.plot(3, 4);
        reference_plot.plot(10, 10);
        // `other`'s merged histogram should match a freshly plotted one
        // bucket-for-bucket.
        let merged = other.prepare_plots();
        assert_eq!(merged.histogram, reference_plot.histogram);
    }

    #[test]
    fn quality_is_infinite_before_any_plots() {
        let mut imager = HistogramImager::new();
        assert_eq!(imager.compute_quality(), f64::INFINITY);
    }
}
