// THEORY:
// The `pipeline` module is the blocking streaming driver. One call to `run` is
// one complete pass: reset the accumulator, walk the image strip by strip, fan
// every strip out across a fixed pool of workers, join, and merge once at the end.
//
// Key architectural principles:
// 1.  **Bounded memory**: only one strip is read at a time. Its height comes from
//     `StripSize`, either a fixed line count or a byte budget.
// 2.  **Fork-join per strip**: the workers of a strip run on a dedicated rayon
//     pool sized to the configured thread count. `install` returns only when all
//     of them are done, which is the barrier between strips.
// 3.  **Ownership instead of locks**: each worker receives its slot by value
//     (`WorkerSlot`) and hands it back after the barrier, so no slot is ever
//     shared between threads.
// 4.  **All or nothing**: the first failing worker aborts the pass. Nothing
//     partial is ever exposed.

use crate::core_modules::accumulator::{PersistentAccumulator, Reduction};
use crate::core_modules::region::{split_for_workers, split_into_strips, Region, StripSize};
use crate::core_modules::sample::Sample;
use crate::core_modules::tile::ImageSource;
use crate::error::{Result, StatsError};
use rayon::prelude::*;

/// Configuration shared by both streaming drivers.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Worker slots per pass; also the size of the worker pool.
    pub threads: usize,
    /// Height of the streaming strips.
    pub strip: StripSize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            strip: StripSize::Auto,
        }
    }
}

impl StreamingConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_strip(mut self, strip: StripSize) -> Self {
        self.strip = strip;
        self
    }
}

/// Checks `region` against the source and cuts it into streaming strips.
pub(crate) fn plan_strips<T: Sample>(
    config: &StreamingConfig,
    source: &dyn ImageSource<T>,
    region: &Region,
) -> Result<Vec<Region>> {
    let extent = source.extent();
    if !extent.contains(region) {
        return Err(StatsError::RegionOutOfBounds {
            region: *region,
            extent,
        });
    }
    let lines = config
        .strip
        .lines_per_strip(region.width, source.band_count(), std::mem::size_of::<T>());
    let strips = split_into_strips(region, lines);
    log::debug!(
        "streaming {}x{} region as {} strips of up to {} lines on {} workers",
        region.width,
        region.height,
        strips.len(),
        lines,
        config.threads
    );
    Ok(strips)
}

/// The blocking driver. Owns its worker pool; reuse it across passes.
pub struct StreamingPipeline {
    config: StreamingConfig,
    pool: rayon::ThreadPool,
}

impl StreamingPipeline {
    pub fn new(config: StreamingConfig) -> Result<Self> {
        if config.threads == 0 {
            return Err(StatsError::NoWorkers);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|index| format!("raster-stats-{}", index))
            .build()?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// One complete pass over the whole source.
    pub fn run<'a, T, R>(
        &self,
        accumulator: &'a mut PersistentAccumulator<T, R>,
        source: &dyn ImageSource<T>,
    ) -> Result<&'a R::Output>
    where
        T: Sample,
        R: Reduction<T>,
    {
        self.run_region(accumulator, source, source.extent())
    }

    /// One complete pass over `region` of the source.
    pub fn run_region<'a, T, R>(
        &self,
        accumulator: &'a mut PersistentAccumulator<T, R>,
        source: &dyn ImageSource<T>,
        region: Region,
    ) -> Result<&'a R::Output>
    where
        T: Sample,
        R: Reduction<T>,
    {
        let strips = plan_strips(&self.config, source, &region)?;
        accumulator.reset(self.config.threads, source.band_count())?;

        for strip in &strips {
            let regions = split_for_workers(strip, self.config.threads);
            let mut slots = accumulator.checkout_slots()?;

            let outcomes: Vec<Result<()>> = self.pool.install(|| {
                slots
                    .par_iter_mut()
                    .zip(regions.par_iter())
                    .map(|(slot, sub_region)| slot.accumulate_region(source, sub_region))
                    .collect()
            });

            accumulator.checkin_slots(slots)?;
            if let Some(err) = outcomes.into_iter().find_map(Result::err) {
                accumulator.abort();
                return Err(err);
            }
        }

        let output = accumulator.merge()?;
        log::info!(
            "pass complete: {} pixels in {} strips",
            region.area(),
            strips.len()
        );
        Ok(output)
    }
}
