// THEORY:
// A `Histogram` is a fixed set of equal-width bins over `[min, max]` and the
// number of samples that fell in each. It is both the partial state of one
// histogram worker (per band) and the merged result handed to consumers.
//
// Binning rule: `floor((v - min) / (max - min) * bins)`, clamped into
// `[0, bins - 1]`. Clamping is what keeps the total frequency equal to the number
// of samples visited: `v == max` lands in the last bin instead of falling off the
// end, and values outside the bounds land in the boundary bins. A histogram whose
// bounds coincide has exactly one bin holding everything.
//
// Spans are computed on halved values (`max / 2 - min / 2`), which stays finite
// for any pair of finite bounds, including a band running from `f64::MIN` to
// `f64::MAX`. A sample is then checked against the edges of its bin so that
// binning always agrees with `bin_min`/`bin_max`.
//
// Quantiles interpolate linearly inside the bin where the cumulative frequency
// crosses `p`, walking from the low end for `p < 0.5` and from the high end
// otherwise. Walking from the nearer end keeps tail quantiles (the ones display
// stretching asks for) accurate when the frequencies are very unbalanced. Empty
// bins never answer a quantile, so `quantile(0.0)` and `quantile(1.0)` are the
// outer edges of the occupied bins, not the histogram bounds.

use crate::error::{Result, StatsError};

/// Half of `hi - lo`, finite for any finite pair.
#[inline]
fn half_span(lo: f64, hi: f64) -> f64 {
    hi * 0.5 - lo * 0.5
}

/// `lo + t * (hi - lo)` without forming `hi - lo`.
#[inline]
fn lerp(lo: f64, hi: f64, t: f64) -> f64 {
    let half = t * half_span(lo, hi);
    lo + half + half
}

/// Bin layout of one band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinSpec {
    pub bins: usize,
    pub min: f64,
    pub max: f64,
}

impl BinSpec {
    pub fn new(bins: usize, min: f64, max: f64) -> Self {
        Self { bins, min, max }
    }

    /// Checks the layout for `band`. Degenerate bounds (`min == max`) are valid.
    pub fn validate(&self, band: usize) -> Result<()> {
        if self.bins == 0 {
            return Err(StatsError::InvalidBinCount {
                band,
                bins: self.bins,
            });
        }
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(StatsError::InvalidBounds {
                band,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    min: f64,
    max: f64,
    frequencies: Vec<u64>,
}

impl Histogram {
    /// An empty histogram. `min == max` forces a single bin.
    pub fn new(bins: usize, min: f64, max: f64) -> Self {
        let bins = if min == max { 1 } else { bins.max(1) };
        Self {
            min,
            max,
            frequencies: vec![0; bins],
        }
    }

    pub fn from_spec(spec: &BinSpec) -> Self {
        Self::new(spec.bins, spec.min, spec.max)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn bin_count(&self) -> usize {
        self.frequencies.len()
    }

    pub fn frequencies(&self) -> &[u64] {
        &self.frequencies
    }

    /// Frequency of `bin`; zero for an index past the last bin.
    pub fn frequency(&self, bin: usize) -> u64 {
        self.frequencies.get(bin).copied().unwrap_or(0)
    }

    pub fn total_frequency(&self) -> u64 {
        self.frequencies.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_frequency() == 0
    }

    /// Half the width of one bin.
    fn half_bin_width(&self) -> f64 {
        half_span(self.min, self.max) / self.bin_count() as f64
    }

    /// Lower edge of `bin`.
    pub fn bin_min(&self, bin: usize) -> f64 {
        let offset = bin as f64 * self.half_bin_width();
        self.min + offset + offset
    }

    /// Upper edge of `bin`. The last bin ends exactly at `max`.
    pub fn bin_max(&self, bin: usize) -> f64 {
        if bin + 1 >= self.bin_count() {
            return self.max;
        }
        self.bin_min(bin + 1)
    }

    /// Bin receiving `value`, or `None` for NaN.
    #[inline]
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        if value.is_nan() {
            return None;
        }
        let last = self.bin_count() - 1;
        if self.max <= self.min {
            return Some(0);
        }
        let scaled = half_span(self.min, value) / half_span(self.min, self.max) * self.bin_count() as f64;
        let bin = if scaled <= 0.0 {
            0
        } else if scaled >= last as f64 {
            last
        } else {
            scaled as usize
        };
        // rounding can put a sample next to its bin
        if bin > 0 && value < self.bin_min(bin) {
            Some(bin - 1)
        } else if bin < last && value >= self.bin_min(bin + 1) {
            Some(bin + 1)
        } else {
            Some(bin)
        }
    }

    /// Counts `value` once. Returns false if it could not be binned (NaN).
    #[inline]
    pub fn add(&mut self, value: f64) -> bool {
        match self.bin_index(value) {
            Some(bin) => {
                self.frequencies[bin] += 1;
                true
            }
            None => false,
        }
    }

    /// Adds the frequencies of `other` bin by bin. Both histograms must have
    /// been built from the same layout.
    pub fn merge_from(&mut self, other: &Histogram) {
        debug_assert_eq!(self.bin_count(), other.bin_count());
        for (mine, theirs) in self.frequencies.iter_mut().zip(&other.frequencies) {
            *mine += theirs;
        }
    }

    /// The value below which a fraction `p` of the samples lie.
    ///
    /// `None` for an empty histogram. `p` is clamped into `[0, 1]`.
    pub fn quantile(&self, p: f64) -> Option<f64> {
        let total = self.total_frequency();
        if total == 0 || p.is_nan() {
            return None;
        }
        let p = p.clamp(0.0, 1.0);
        let total = total as f64;
        let bins = self.bin_count();

        if p < 0.5 {
            let mut cumulated = 0u64;
            let mut p_n = 0.0;
            for bin in 0..bins {
                let f_n = self.frequencies[bin];
                cumulated += f_n;
                let p_prev = p_n;
                p_n = cumulated as f64 / total;
                if f_n > 0 && p_n >= p {
                    let proportion = f_n as f64 / total;
                    let t = (p - p_prev) / proportion;
                    return Some(lerp(self.bin_min(bin), self.bin_max(bin), t));
                }
            }
        } else {
            let mut cumulated = 0u64;
            let mut p_n = 1.0;
            for bin in (0..bins).rev() {
                let f_n = self.frequencies[bin];
                cumulated += f_n;
                let p_prev = p_n;
                p_n = 1.0 - cumulated as f64 / total;
                if f_n > 0 && p_n <= p {
                    let proportion = f_n as f64 / total;
                    let t = (p_prev - p) / proportion;
                    return Some(lerp(self.bin_max(bin), self.bin_min(bin), t));
                }
            }
        }
        None
    }

    /// Fraction of the samples at or below `value`, interpolated within the bin
    /// containing it. `None` for an empty histogram or a NaN value.
    pub fn percentile(&self, value: f64) -> Option<f64> {
        let total = self.total_frequency();
        if total == 0 || value.is_nan() {
            return None;
        }
        if value < self.min {
            return Some(0.0);
        }
        if value >= self.max {
            return Some(1.0);
        }
        let bin = self.bin_index(value)?;
        let below: u64 = self.frequencies[..bin].iter().sum();
        let lo = self.bin_min(bin);
        let half_width = half_span(lo, self.bin_max(bin));
        let within = if half_width > 0.0 {
            half_span(lo, value) / half_width
        } else {
            1.0
        };
        let covered = below as f64 + within * self.frequencies[bin] as f64;
        Some((covered / total as f64).clamp(0.0, 1.0))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn binning_clamps_boundaries() {
        let mut h = Histogram::new(4, 0.0, 8.0);
        for v in [-5.0, 0.0, 1.9, 2.0, 7.99, 8.0, 100.0] {
            assert!(h.add(v));
        }
        assert_eq!(h.frequencies(), &[3, 1, 0, 3]);
        assert_eq!(h.total_frequency(), 7);
    }

    #[test]
    fn nan_is_not_binned() {
        let mut h = Histogram::new(2, 0.0, 1.0);
        assert!(!h.add(f64::NAN));
        assert!(h.add(f64::INFINITY));
        assert!(h.add(f64::NEG_INFINITY));
        assert_eq!(h.frequencies(), &[1, 1]);
    }

    #[test]
    fn degenerate_bounds_force_one_bin() {
        let mut h = Histogram::new(16, 3.0, 3.0);
        assert_eq!(h.bin_count(), 1);
        h.add(3.0);
        h.add(3.0);
        assert_eq!(h.frequency(0), 2);
        assert_eq!(h.bin_min(0), 3.0);
        assert_eq!(h.bin_max(0), 3.0);
        assert_eq!(h.quantile(0.1), Some(3.0));
        assert_eq!(h.quantile(0.9), Some(3.0));
    }

    #[test]
    fn bin_edges() {
        let h = Histogram::new(3, 0.0, 1.5);
        assert!(approx(h.bin_min(1), 0.5));
        assert!(approx(h.bin_max(1), 1.0));
        assert_eq!(h.bin_max(2), 1.5);
        assert_eq!(h.frequency(10), 0);
    }

    #[test]
    fn quantiles_interpolate_uniform_data() {
        let mut h = Histogram::new(10, 0.0, 10.0);
        for i in 0..1000 {
            h.add((i as f64 + 0.5) / 100.0);
        }
        assert!(approx(h.quantile(0.0).unwrap(), 0.0));
        assert!(approx(h.quantile(0.25).unwrap(), 2.5));
        assert!(approx(h.quantile(0.5).unwrap(), 5.0));
        assert!(approx(h.quantile(0.98).unwrap(), 9.8));
        assert!(approx(h.quantile(1.0).unwrap(), 10.0));
    }

    #[test]
    fn quantile_of_two_equal_bins() {
        let mut h = Histogram::new(2, 0.0, 15.0);
        for v in 0..16 {
            h.add(v as f64);
        }
        assert_eq!(h.frequencies(), &[8, 8]);
        assert!(approx(h.quantile(0.5).unwrap(), 7.5));
        assert!(approx(h.quantile(0.25).unwrap(), 3.75));
    }

    #[test]
    fn empty_histogram_has_no_quantiles() {
        let h = Histogram::new(8, 0.0, 1.0);
        assert!(h.is_empty());
        assert_eq!(h.quantile(0.5), None);
        assert_eq!(h.percentile(0.5), None);
    }

    #[test]
    fn percentile_inverts_quantile() {
        let mut h = Histogram::new(4, 0.0, 4.0);
        for (bin, count) in [(0.5, 10), (1.5, 30), (2.5, 40), (3.5, 20)] {
            for _ in 0..count {
                h.add(bin);
            }
        }
        assert_eq!(h.percentile(-1.0), Some(0.0));
        assert_eq!(h.percentile(4.0), Some(1.0));
        assert!(approx(h.percentile(2.0).unwrap(), 0.4));
        assert!(approx(h.percentile(2.5).unwrap(), 0.6));
        let q = h.quantile(0.3).unwrap();
        assert!(approx(h.percentile(q).unwrap(), 0.3));
    }

    #[test]
    fn merge_adds_bin_by_bin() {
        let mut a = Histogram::new(2, 0.0, 2.0);
        let mut b = Histogram::new(2, 0.0, 2.0);
        a.add(0.2);
        b.add(1.7);
        b.add(1.1);
        a.merge_from(&b);
        assert_eq!(a.frequencies(), &[1, 2]);
        assert_eq!(b.frequencies(), &[0, 2]);
    }

    #[test]
    fn full_range_bounds_do_not_overflow() {
        let mut h = Histogram::new(2, f64::MIN, f64::MAX);
        for v in [f64::MIN, -1.0, 1.0, f64::MAX] {
            assert!(h.add(v));
        }
        assert_eq!(h.frequencies(), &[2, 2]);
        assert_eq!(h.bin_min(1), 0.0);
        assert_eq!(h.bin_max(1), f64::MAX);
        assert!(approx(h.quantile(0.5).unwrap(), 0.0));
        assert!(approx(h.percentile(0.0).unwrap(), 0.5));
    }

    #[test]
    fn empty_edge_bins_do_not_answer_quantiles() {
        let mut h = Histogram::new(2, 0.0, 10.0);
        h.add(7.0);
        assert_eq!(h.quantile(0.0), Some(5.0));
        assert_eq!(h.quantile(1.0), Some(10.0));

        let mut h = Histogram::new(4, 0.0, 10.0);
        for _ in 0..3 {
            h.add(7.0);
        }
        assert_eq!(h.quantile(0.0), Some(5.0));
        assert_eq!(h.quantile(1.0), Some(7.5));
        assert!(approx(h.quantile(0.5).unwrap(), 6.25));
    }

    #[test]
    fn bin_spec_validation() {
        assert!(BinSpec::new(4, 0.0, 1.0).validate(0).is_ok());
        assert!(BinSpec::new(4, 1.0, 1.0).validate(0).is_ok());
        assert!(matches!(
            BinSpec::new(0, 0.0, 1.0).validate(2),
            Err(StatsError::InvalidBinCount { band: 2, bins: 0 })
        ));
        assert!(BinSpec::new(4, 2.0, 1.0).validate(0).is_err());
        assert!(BinSpec::new(4, 0.0, f64::INFINITY).validate(0).is_err());
    }
}
