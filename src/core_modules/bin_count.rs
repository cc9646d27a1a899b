// THEORY:
// Scott's normal reference rule picks a histogram bin width from the sample
// standard deviation: `h = 3.5 * sigma * n^(-1/3)`. The bin count is then the data
// range divided by `h`, rounded up. Every degenerate input (one sample, no spread,
// empty range, non-finite moments) collapses to a single bin, never to zero and
// never to a division by zero.
//
// A heavy-tailed band can have a tiny sigma next to a huge range, so the count is
// capped at `MAX_AUTO_BINS`.

use crate::core_modules::min_max::MinMaxResult;
use crate::core_modules::sample::Sample;
use crate::core_modules::statistics::BandStatistics;

/// Upper bound on a heuristically chosen bin count.
pub const MAX_AUTO_BINS: usize = 65_536;

pub fn scott_bin_count(count: u64, std_dev: f64, min: f64, max: f64) -> usize {
    if count <= 1 || !std_dev.is_finite() || std_dev <= 0.0 {
        return 1;
    }
    let width = 3.5 * std_dev * (count as f64).powf(-1.0 / 3.0);
    let range = max - min;
    if !width.is_finite() || width <= 0.0 || range.is_nan() || range <= 0.0 {
        return 1;
    }
    let bins = (range / width).ceil();
    if !bins.is_finite() {
        return MAX_AUTO_BINS;
    }
    (bins as usize).clamp(1, MAX_AUTO_BINS)
}

/// Applies the rule per band, with the range taken from a min/max pass.
pub fn bin_counts<T: Sample>(statistics: &[BandStatistics], min_max: &MinMaxResult<T>) -> Vec<usize> {
    statistics
        .iter()
        .enumerate()
        .map(|(band, stats)| match min_max.bounds(band) {
            Some((min, max)) => {
                scott_bin_count(stats.count, stats.std_dev, min.to_f64_lossy(), max.to_f64_lossy())
            }
            None => 1,
        })
        .collect()
}
