// THEORY:
// First and second order statistics of a multi-band image. Per band: count, sum,
// mean, variance and standard deviation, which is what the bin-count heuristic
// needs before the histogram pass starts. Across bands: the mean pixel, the
// second moment matrix (`correlation`, `E[v_r * v_c]`), the covariance matrix and
// the same three quantities pooled over every component, which is what
// dimensionality-reduction normalization consumes.
//
// Each worker keeps raw moments in `f64`: count, sum and sum of squares per band,
// and per pixel a band-by-band sum of products. Raw moments merge by addition
// (matrices included), so the reduction stays order independent. Float addition
// is not associative, so sums over non-integral data can differ in the last bits
// between thread layouts; integral data below 2^53 sums exactly.
//
// Per-band moments exclude single samples (no-data, non-finite). The cross-band
// moments need whole pixels: a pixel is relevant only if every one of its bands
// passed those checks, otherwise it is tallied in `excluded_pixels`.
//
// Non-finite samples (NaN, +inf, -inf) would poison every moment. With
// `ignore_infinite` (the default) they are skipped and tallied in `ignored`.

use crate::core_modules::accumulator::{NoData, PersistentAccumulator, Reduction};
use crate::core_modules::sample::Sample;
use crate::core_modules::tile::Tile;
use crate::error::Result;
use std::ops::Index;

pub type StatisticsAccumulator<T> = PersistentAccumulator<T, StatisticsReduction>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticsOptions {
    /// Skip NaN and infinite samples instead of letting them reach the sums.
    pub ignore_infinite: bool,
    /// Divide the variance by `n - 1` instead of `n` when `n > 1`.
    pub unbiased: bool,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        Self {
            ignore_infinite: true,
            unbiased: true,
        }
    }
}

/// Raw moments of one band, as held by a worker slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub count: u64,
    pub ignored: u64,
    pub sum: f64,
    pub sum_of_squares: f64,
}

impl Moments {
    fn add(&mut self, other: &Moments) {
        self.count += other.count;
        self.ignored += other.ignored;
        self.sum += other.sum;
        self.sum_of_squares += other.sum_of_squares;
    }
}

/// Raw cross-band moments over relevant pixels, as held by a worker slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelMoments {
    pub relevant: u64,
    pub excluded: u64,
    /// Per band sum over relevant pixels.
    pub sum: Vec<f64>,
    /// Row-major `bands x bands` sums of `v_r * v_c`.
    pub products: Vec<f64>,
}

impl PixelMoments {
    fn new(bands: usize) -> Self {
        Self {
            relevant: 0,
            excluded: 0,
            sum: vec![0.0; bands],
            products: vec![0.0; bands * bands],
        }
    }

    fn add_pixel(&mut self, values: &[f64]) {
        let bands = values.len();
        self.relevant += 1;
        for (r, &vr) in values.iter().enumerate() {
            self.sum[r] += vr;
            let row = &mut self.products[r * bands..(r + 1) * bands];
            for (product, &vc) in row.iter_mut().zip(values) {
                *product += vr * vc;
            }
        }
    }

    fn add(&mut self, other: &PixelMoments) {
        self.relevant += other.relevant;
        self.excluded += other.excluded;
        for (mine, theirs) in self.sum.iter_mut().zip(&other.sum) {
            *mine += theirs;
        }
        for (mine, theirs) in self.products.iter_mut().zip(&other.products) {
            *mine += theirs;
        }
    }
}

/// Partial state of one statistics worker.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsPartial {
    pub bands: Vec<Moments>,
    pub pixels: PixelMoments,
}

/// Merged statistics of one band. A band without samples reports zeros.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStatistics {
    pub count: u64,
    /// Non-finite samples skipped because of `ignore_infinite`.
    pub ignored: u64,
    pub sum: f64,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
}

impl BandStatistics {
    pub fn from_moments(moments: &Moments, unbiased: bool) -> Self {
        let n = moments.count;
        if n == 0 {
            return Self {
                count: 0,
                ignored: moments.ignored,
                sum: 0.0,
                mean: 0.0,
                variance: 0.0,
                std_dev: 0.0,
            };
        }
        let nf = n as f64;
        let mean = moments.sum / nf;
        let squared_deviation = (moments.sum_of_squares - moments.sum * mean).max(0.0);
        let divisor = if unbiased && n > 1 { nf - 1.0 } else { nf };
        let variance = squared_deviation / divisor;
        Self {
            count: n,
            ignored: moments.ignored,
            sum: moments.sum,
            mean,
            variance,
            std_dev: variance.sqrt(),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.count == 0
    }
}

/// `n / (n - 1)` for the unbiased estimator, 1 otherwise.
fn regularization(n: u64, unbiased: bool) -> f64 {
    if unbiased && n > 1 {
        n as f64 / (n as f64 - 1.0)
    } else {
        1.0
    }
}

/// Statistics of whole pixels, over the pixels where every band is valid.
/// Matrices are row-major `bands x bands`. No relevant pixel reports zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossBandStatistics {
    pub bands: usize,
    pub relevant_pixels: u64,
    /// Pixels left out because at least one band was no-data or non-finite.
    pub excluded_pixels: u64,
    pub mean: Vec<f64>,
    /// Second moment matrix, `sum(v_r * v_c) / n`.
    pub correlation: Vec<f64>,
    pub covariance: Vec<f64>,
    /// Mean of every component of every relevant pixel.
    pub component_mean: f64,
    pub component_correlation: f64,
    pub component_covariance: f64,
}

impl CrossBandStatistics {
    pub fn from_moments(moments: &PixelMoments, bands: usize, unbiased: bool) -> Self {
        let n = moments.relevant;
        let mut stats = Self {
            bands,
            relevant_pixels: n,
            excluded_pixels: moments.excluded,
            mean: vec![0.0; bands],
            correlation: vec![0.0; bands * bands],
            covariance: vec![0.0; bands * bands],
            component_mean: 0.0,
            component_correlation: 0.0,
            component_covariance: 0.0,
        };
        if n == 0 {
            return stats;
        }
        let nf = n as f64;
        for (mean, sum) in stats.mean.iter_mut().zip(&moments.sum) {
            *mean = sum / nf;
        }
        let regul = regularization(n, unbiased);
        for r in 0..bands {
            for c in 0..bands {
                let i = r * bands + c;
                stats.correlation[i] = moments.products[i] / nf;
                stats.covariance[i] = regul * (stats.correlation[i] - stats.mean[r] * stats.mean[c]);
            }
        }

        let components = n * bands as u64;
        let cf = components as f64;
        let squared_norms: f64 = (0..bands).map(|b| moments.products[b * bands + b]).sum();
        stats.component_mean = moments.sum.iter().sum::<f64>() / cf;
        stats.component_correlation = squared_norms / cf;
        stats.component_covariance = regularization(components, unbiased)
            * (stats.component_correlation - stats.component_mean * stats.component_mean);
        stats
    }

    pub fn covariance(&self, r: usize, c: usize) -> f64 {
        self.covariance[r * self.bands + c]
    }

    pub fn correlation(&self, r: usize, c: usize) -> f64 {
        self.correlation[r * self.bands + c]
    }
}

/// Merged result of a statistics pass. Indexing by band gives that band's
/// statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsResult {
    bands: Vec<BandStatistics>,
    cross: CrossBandStatistics,
}

impl StatisticsResult {
    pub fn bands(&self) -> &[BandStatistics] {
        &self.bands
    }

    pub fn cross_band(&self) -> &CrossBandStatistics {
        &self.cross
    }
}

impl Index<usize> for StatisticsResult {
    type Output = BandStatistics;

    fn index(&self, band: usize) -> &BandStatistics {
        &self.bands[band]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsReduction {
    options: StatisticsOptions,
}

impl StatisticsReduction {
    pub fn new(options: StatisticsOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> StatisticsOptions {
        self.options
    }

    pub fn accumulator<T: Sample>(self) -> StatisticsAccumulator<T> {
        PersistentAccumulator::new(self)
    }
}

impl<T: Sample> Reduction<T> for StatisticsReduction {
    type Partial = StatisticsPartial;
    type Output = StatisticsResult;

    fn validate(&self, _bands: usize) -> Result<()> {
        Ok(())
    }

    fn identity(&self, bands: usize) -> StatisticsPartial {
        StatisticsPartial {
            bands: vec![Moments::default(); bands],
            pixels: PixelMoments::new(bands),
        }
    }

    fn fold(&self, partial: &mut StatisticsPartial, tile: &Tile<T>, no_data: &NoData<T>) {
        let mut values = Vec::with_capacity(tile.bands());
        for pixel in tile.pixels() {
            values.clear();
            for (moments, &s) in partial.bands.iter_mut().zip(pixel) {
                if no_data.excludes(s) {
                    continue;
                }
                let v = s.to_f64_lossy();
                if self.options.ignore_infinite && !v.is_finite() {
                    moments.ignored += 1;
                    continue;
                }
                moments.count += 1;
                moments.sum += v;
                moments.sum_of_squares += v * v;
                values.push(v);
            }
            if values.len() == pixel.len() {
                partial.pixels.add_pixel(&values);
            } else {
                partial.pixels.excluded += 1;
            }
        }
    }

    fn combine(&self, partials: &[StatisticsPartial], bands: usize) -> StatisticsResult {
        let mut totals = vec![Moments::default(); bands];
        let mut pixels = PixelMoments::new(bands);
        for partial in partials {
            for (total, moments) in totals.iter_mut().zip(&partial.bands) {
                total.add(moments);
            }
            pixels.add(&partial.pixels);
        }
        StatisticsResult {
            bands: totals
                .iter()
                .map(|m| BandStatistics::from_moments(m, self.options.unbiased))
                .collect(),
            cross: CrossBandStatistics::from_moments(&pixels, bands, self.options.unbiased),
        }
    }
}
