// THEORY:
// Display dynamics are the usual consumer of a merged histogram: a contrast
// stretch maps the `[low, high]` range of each band onto the full display range,
// where `low` and `high` cut away a fraction of the darkest and brightest samples.
//
// An empty band has no quantiles. Instead of failing the whole image, the band
// gets a caller-chosen fallback range (typically the no-data value) and a
// warning is logged.

use crate::core_modules::histogram::Histogram;
use crate::error::{Result, StatsError};

/// Checks that the clip fractions leave something to display.
pub fn validate_clip(low_clip: f64, high_clip: f64) -> Result<()> {
    let in_range = |f: f64| (0.0..1.0).contains(&f);
    if !in_range(low_clip) || !in_range(high_clip) || low_clip + high_clip >= 1.0 {
        return Err(StatsError::InvalidClip {
            low: low_clip,
            high: high_clip,
        });
    }
    Ok(())
}

/// `(quantile(low_clip), quantile(1 - high_clip))` of one histogram, or `None`
/// if the histogram is empty.
pub fn quantile_range(histogram: &Histogram, low_clip: f64, high_clip: f64) -> Result<Option<(f64, f64)>> {
    validate_clip(low_clip, high_clip)?;
    let low = histogram.quantile(low_clip);
    let high = histogram.quantile(1.0 - high_clip);
    Ok(low.zip(high))
}

/// Per-band stretch ranges; empty bands get `fallback`.
pub fn dynamics_ranges(
    histograms: &[Histogram],
    low_clip: f64,
    high_clip: f64,
    fallback: (f64, f64),
) -> Result<Vec<(f64, f64)>> {
    validate_clip(low_clip, high_clip)?;
    let ranges = histograms
        .iter()
        .enumerate()
        .map(|(band, histogram)| {
            let low = histogram.quantile(low_clip);
            let high = histogram.quantile(1.0 - high_clip);
            match low.zip(high) {
                Some(range) => range,
                None => {
                    log::warn!(
                        "band {} has no samples, using fallback range [{}, {}]",
                        band,
                        fallback.0,
                        fallback.1
                    );
                    fallback
                }
            }
        })
        .collect();
    Ok(ranges)
}
