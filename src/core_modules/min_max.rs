// THEORY:
// Per-band minimum and maximum, the cheapest global reduction and the one most
// other passes depend on (histogram bounds, display dynamics).
//
// The partial state of a worker is three same-length vectors: running min,
// running max and the number of samples that reached them. Slots start at the
// type's sentinels (largest value for min, lowest value for max), so the first
// real sample always replaces them. Merging takes the elementwise min/max and the
// sum of counts.
//
// A band whose count is still zero after merging is "degenerate": its min/max are
// still the sentinels. That is a legitimate result (every sample was no-data) and
// the caller decides what to substitute.

use crate::core_modules::accumulator::{NoData, PersistentAccumulator, Reduction};
use crate::core_modules::sample::Sample;
use crate::core_modules::tile::Tile;
use crate::error::Result;

/// Convenience alias for a min/max accumulator over `T` samples.
pub type MinMaxAccumulator<T> = PersistentAccumulator<T, MinMax>;

/// The min/max reduction. Stateless; all state lives in the partials.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinMax;

/// Running per-band extrema of one worker, and also the merged result.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxResult<T> {
    min: Vec<T>,
    max: Vec<T>,
    counts: Vec<u64>,
}

impl<T: Sample> MinMaxResult<T> {
    fn identity(bands: usize) -> Self {
        Self {
            min: vec![T::min_sentinel(); bands],
            max: vec![T::max_sentinel(); bands],
            counts: vec![0; bands],
        }
    }

    pub fn min(&self) -> &[T] {
        &self.min
    }

    pub fn max(&self) -> &[T] {
        &self.max
    }

    /// Number of samples per band that took part in the reduction.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn bands(&self) -> usize {
        self.min.len()
    }

    /// True if no sample of `band` was visited since the last reset.
    pub fn is_degenerate(&self, band: usize) -> bool {
        self.counts.get(band).is_none_or(|&count| count == 0)
    }

    /// `(min, max)` of `band`, or `None` for a degenerate band.
    pub fn bounds(&self, band: usize) -> Option<(T, T)> {
        if self.is_degenerate(band) {
            return None;
        }
        Some((self.min[band], self.max[band]))
    }
}

impl MinMax {
    pub fn accumulator<T: Sample>() -> MinMaxAccumulator<T> {
        PersistentAccumulator::new(MinMax)
    }

    pub fn accumulator_with_no_data<T: Sample>(no_data: NoData<T>) -> MinMaxAccumulator<T> {
        PersistentAccumulator::new(MinMax).with_no_data(no_data)
    }
}

impl<T: Sample> Reduction<T> for MinMax {
    type Partial = MinMaxResult<T>;
    type Output = MinMaxResult<T>;

    fn validate(&self, _bands: usize) -> Result<()> {
        Ok(())
    }

    fn identity(&self, bands: usize) -> MinMaxResult<T> {
        MinMaxResult::identity(bands)
    }

    fn fold(&self, partial: &mut MinMaxResult<T>, tile: &Tile<T>, no_data: &NoData<T>) {
        let MinMaxResult { min, max, counts } = partial;
        for pixel in tile.pixels() {
            for (band, &s) in pixel.iter().enumerate() {
                if no_data.excludes(s) || s.is_nan() {
                    continue;
                }
                if s < min[band] {
                    min[band] = s;
                }
                if s > max[band] {
                    max[band] = s;
                }
                counts[band] += 1;
            }
        }
    }

    fn combine(&self, partials: &[MinMaxResult<T>], bands: usize) -> MinMaxResult<T> {
        let mut merged = MinMaxResult::identity(bands);
        for partial in partials {
            for band in 0..bands {
                if partial.min[band] < merged.min[band] {
                    merged.min[band] = partial.min[band];
                }
                if partial.max[band] > merged.max[band] {
                    merged.max[band] = partial.max[band];
                }
                merged.counts[band] += partial.counts[band];
            }
        }
        merged
    }
}
