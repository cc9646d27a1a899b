// THEORY:
// A single error type for the whole engine. The variants fall into three
// families and callers are expected to treat them differently:
//
// 1.  **Configuration errors** (`NoWorkers`, `BandMismatch`, `InvalidBinCount`, ...)
//     are raised synchronously, before any pixel is read.
// 2.  **Lifecycle errors** (`InvalidState`, `SlotsCheckedOut`, ...) mean an
//     accumulator was driven out of order: accumulate before reset, merge twice.
// 3.  **Read and execution errors** (`Read`, `Image`, `WorkerFailed`) abort the
//     pass in progress. The accumulator is left `Aborted` and must be reset.
//
// Degenerate data (every sample filtered out, empty regions) is NOT an error.

use crate::core_modules::accumulator::PassState;
use crate::core_modules::region::Region;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StatsError>;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("worker thread count must be at least 1")]
    NoWorkers,

    #[error("image has no bands")]
    NoBands,

    #[error("band count mismatch: expected {expected}, got {actual}")]
    BandMismatch { expected: usize, actual: usize },

    #[error("invalid bin count {bins} for band {band}")]
    InvalidBinCount { band: usize, bins: usize },

    #[error("invalid histogram bounds for band {band}: [{min}, {max}]")]
    InvalidBounds { band: usize, min: f64, max: f64 },

    #[error("sub-sampling rate must be at least 1")]
    InvalidSubSampling,

    #[error("invalid clip fractions: low {low}, high {high}")]
    InvalidClip { low: f64, high: f64 },

    #[error("thread id {thread_id} out of range for {threads} worker slots")]
    ThreadOutOfRange { thread_id: usize, threads: usize },

    #[error("region {region:?} lies outside the image extent {extent:?}")]
    RegionOutOfBounds { region: Region, extent: Region },

    #[error("tile data holds {actual} samples, region {region:?} with {bands} bands needs {expected}")]
    TileSize {
        region: Region,
        bands: usize,
        expected: usize,
        actual: usize,
    },

    #[error("cannot {operation} while the accumulator is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PassState,
    },

    #[error("worker slots are checked out; check them in before {operation}")]
    SlotsCheckedOut { operation: &'static str },

    #[error("returned worker slots do not match the checked-out set")]
    SlotMismatch,

    #[error("failed to read region {region:?}")]
    Read {
        region: Region,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("image error")]
    Image(#[from] image::ImageError),

    #[error("failed to build the worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("worker task failed: {0}")]
    WorkerFailed(String),

    #[error("pass aborted: {0}")]
    PassAborted(String),
}

impl StatsError {
    /// Wraps an arbitrary reader failure for `region`.
    pub fn read<E>(region: Region, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Read {
            region,
            source: Box::new(source),
        }
    }

    /// True for errors raised before any accumulation work started.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StatsError::NoWorkers
                | StatsError::NoBands
                | StatsError::BandMismatch { .. }
                | StatsError::InvalidBinCount { .. }
                | StatsError::InvalidBounds { .. }
                | StatsError::InvalidSubSampling
                | StatsError::InvalidClip { .. }
                | StatsError::ThreadOutOfRange { .. }
                | StatsError::RegionOutOfBounds { .. }
                | StatsError::TileSize { .. }
        )
    }
}
