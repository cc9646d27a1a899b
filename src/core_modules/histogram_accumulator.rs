// THEORY:
// The histogram pass usually runs after a min/max pass over the same image: the
// bounds of each band's histogram come from the previous merged result, the bin
// count either from the caller or from the Scott's-rule heuristic fed by a
// statistics pass. Each worker keeps one `Histogram` per band and the merge is a
// plain bin-by-bin sum, so strip and thread layout cannot change the result.
//
// Sub-sampling keeps the pixels whose row-major index in the image is a multiple
// of the rate. The stride is anchored to the image, not to the region a worker
// happens to receive, so the same pass visits the same pixels for every thread
// count and strip size.

use crate::core_modules::accumulator::{NoData, PersistentAccumulator, Reduction};
use crate::core_modules::histogram::{BinSpec, Histogram};
use crate::core_modules::min_max::MinMaxResult;
use crate::core_modules::sample::Sample;
use crate::core_modules::tile::Tile;
use crate::error::{Result, StatsError};

pub type HistogramAccumulator<T> = PersistentAccumulator<T, HistogramReduction>;

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramReduction {
    specs: Vec<BinSpec>,
    sub_sampling: usize,
}

impl HistogramReduction {
    /// One explicit bin layout per band.
    pub fn new(specs: Vec<BinSpec>) -> Self {
        Self {
            specs,
            sub_sampling: 1,
        }
    }

    /// The same layout for each of `bands` bands.
    pub fn uniform(bands: usize, spec: BinSpec) -> Self {
        Self::new(vec![spec; bands])
    }

    /// Bounds from a merged min/max pass, `bins` bins per band. Degenerate
    /// bands get a single bin at zero.
    pub fn from_min_max<T: Sample>(min_max: &MinMaxResult<T>, bins: usize) -> Self {
        let bins = vec![bins; min_max.bands()];
        Self::from_min_max_with_bins(min_max, &bins)
    }

    /// Bounds from a merged min/max pass with a bin count per band.
    pub fn from_min_max_with_bins<T: Sample>(min_max: &MinMaxResult<T>, bins: &[usize]) -> Self {
        let specs = bins
            .iter()
            .enumerate()
            .map(|(band, &bins)| match min_max.bounds(band) {
                Some((min, max)) => BinSpec::new(bins, min.to_f64_lossy(), max.to_f64_lossy()),
                None => BinSpec::new(1, 0.0, 0.0),
            })
            .collect();
        Self::new(specs)
    }

    /// Counts only every `rate`-th pixel. A rate of zero is rejected at reset.
    pub fn with_sub_sampling(mut self, rate: usize) -> Self {
        self.sub_sampling = rate;
        self
    }

    pub fn specs(&self) -> &[BinSpec] {
        &self.specs
    }

    pub fn sub_sampling(&self) -> usize {
        self.sub_sampling
    }

    pub fn accumulator<T: Sample>(self) -> HistogramAccumulator<T> {
        PersistentAccumulator::new(self)
    }
}

impl<T: Sample> Reduction<T> for HistogramReduction {
    type Partial = Vec<Histogram>;
    type Output = Vec<Histogram>;

    fn validate(&self, bands: usize) -> Result<()> {
        if self.specs.len() != bands {
            return Err(StatsError::BandMismatch {
                expected: self.specs.len(),
                actual: bands,
            });
        }
        if self.sub_sampling == 0 {
            return Err(StatsError::InvalidSubSampling);
        }
        self.specs
            .iter()
            .enumerate()
            .try_for_each(|(band, spec)| spec.validate(band))
    }

    fn identity(&self, _bands: usize) -> Vec<Histogram> {
        self.specs.iter().map(Histogram::from_spec).collect()
    }

    fn fold(&self, partial: &mut Vec<Histogram>, tile: &Tile<T>, no_data: &NoData<T>) {
        let rate = self.sub_sampling.max(1) as u64;
        for (index, pixel) in tile.pixels().enumerate() {
            if rate > 1 && tile.scan_index(index) % rate != 0 {
                continue;
            }
            for (histogram, &s) in partial.iter_mut().zip(pixel) {
                if no_data.excludes(s) {
                    continue;
                }
                histogram.add(s.to_f64_lossy());
            }
        }
    }

    fn combine(&self, partials: &[Vec<Histogram>], _bands: usize) -> Vec<Histogram> {
        let mut merged: Vec<Histogram> = self.specs.iter().map(Histogram::from_spec).collect();
        for partial in partials {
            for (total, histogram) in merged.iter_mut().zip(partial) {
                total.merge_from(histogram);
            }
        }
        merged
    }
}
