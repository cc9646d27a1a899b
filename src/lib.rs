// THEORY:
// This file is the entry point of the `raster_stats` library crate. The public
// API is two layers deep:
//
// 1.  **Drivers** (`pipeline::StreamingPipeline`, `parallel_pipeline::ParallelPipeline`)
//     own the streaming loop: split the image into strips, fan each strip out to
//     the workers, join, and merge at the end of the pass.
// 2.  **Accumulators** (`core_modules`) own the numerics: min/max, moments and
//     histograms, each a `Reduction` plugged into the shared
//     `PersistentAccumulator` lifecycle.
//
// A typical caller runs three passes over the same source: min/max for the
// bounds, statistics for the bin count, then the histogram itself.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::accumulator::{NoData, PassState, PersistentAccumulator, Reduction};
pub use core_modules::histogram::{BinSpec, Histogram};
pub use core_modules::histogram_accumulator::HistogramReduction;
pub use core_modules::min_max::{MinMax, MinMaxResult};
pub use core_modules::region::{Region, StripSize};
pub use core_modules::statistics::{
    BandStatistics, CrossBandStatistics, StatisticsOptions, StatisticsReduction, StatisticsResult,
};
pub use core_modules::tile::{GeneratedImage, ImageSource, MemoryImage, Tile};
pub use error::{Result, StatsError};
