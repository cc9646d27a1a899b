// THEORY:
// The `PersistentAccumulator` is the computational core of the engine. It turns an
// order-independent reduction (min/max, histogram, moments) into something that
// can be fed from many disjoint regions, by many threads, across many streaming
// strips, and still produce exactly one correct result per pass.
//
// Key architectural principles:
// 1.  **Reduction vs. lifecycle**: a `Reduction` only knows its own algebra:
//     an identity element, how to fold a tile into a partial, and how to combine
//     partials. Everything else (per-thread storage, no-data configuration,
//     ordering rules) lives here, once, for every reduction.
// 2.  **Thread arena**: partial state is one slot per worker, allocated at `reset`
//     and never resized mid-pass. A worker identifies its slot by `thread_id`.
//     For parallel work the driver checks slots out as owned `WorkerSlot`s and
//     moves each into its worker, so "a slot is written by one thread at a time"
//     is enforced by ownership instead of by convention.
// 3.  **Explicit state machine**: `Idle -> Accumulating -> Merged`, with `Aborted`
//     for passes that failed half-way. Out-of-order calls (accumulate before reset,
//     merge twice, merge while slots are out) are errors, not silent garbage.
//
//        state \ op     reset          accumulate   checkout   merge
//        Idle           Accumulating   error        error      error
//        Accumulating   Accumulating   ok           ok         Merged
//        Merged         Accumulating   error        error      error
//        Aborted        Accumulating   error        error      error
//
// 4.  **Stable result**: `merge` runs once per pass; `result` can be read any
//     number of times afterwards and always returns the same value.

use crate::core_modules::region::Region;
use crate::core_modules::sample::Sample;
use crate::core_modules::tile::{ImageSource, Tile};
use crate::error::{Result, StatsError};
use std::sync::Arc;

/// Lifecycle state of a `PersistentAccumulator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Never reset; no slots allocated.
    Idle,
    /// Slots allocated and accepting samples.
    Accumulating,
    /// `merge` has produced the result of the pass.
    Merged,
    /// A worker failed mid-pass; the partial state is meaningless.
    Aborted,
}

/// Optional sentinel value excluded from every reduction.
///
/// Exclusion is per sample: a pixel whose first band equals the no-data value
/// still contributes its other bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoData<T> {
    pub value: T,
    pub enabled: bool,
}

impl<T: Sample> NoData<T> {
    pub fn disabled() -> Self {
        Self {
            value: T::zero(),
            enabled: false,
        }
    }

    pub fn enabled(value: T) -> Self {
        Self {
            value,
            enabled: true,
        }
    }

    /// True if `sample` must be skipped. A NaN no-data value matches NaN samples.
    #[inline]
    pub fn excludes(&self, sample: T) -> bool {
        self.enabled
            && (sample == self.value || (self.value.is_nan() && sample.is_nan()))
    }
}

impl<T: Sample> Default for NoData<T> {
    fn default() -> Self {
        Self::disabled()
    }
}

/// The algebra of one order-independent reduction.
///
/// `combine` must be associative and commutative over partials, and folding
/// the identity must be a no-op, otherwise strip and thread layout would leak
/// into the result.
pub trait Reduction<T: Sample>: Send + Sync {
    type Partial: Send;
    type Output: Clone + Send;

    /// Rejects configurations that cannot work for `bands` bands.
    fn validate(&self, bands: usize) -> Result<()>;

    fn identity(&self, bands: usize) -> Self::Partial;

    fn fold(&self, partial: &mut Self::Partial, tile: &Tile<T>, no_data: &NoData<T>);

    fn combine(&self, partials: &[Self::Partial], bands: usize) -> Self::Output;
}

/// Exclusive access to one worker's partial state for the duration of a strip.
pub struct WorkerSlot<T: Sample, R: Reduction<T>> {
    thread_id: usize,
    bands: usize,
    no_data: NoData<T>,
    reduction: Arc<R>,
    partial: R::Partial,
}

impl<T: Sample, R: Reduction<T>> WorkerSlot<T, R> {
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// Folds an already-read tile into this slot.
    pub fn accumulate_tile(&mut self, tile: &Tile<T>) -> Result<()> {
        if tile.bands() != self.bands {
            return Err(StatsError::BandMismatch {
                expected: self.bands,
                actual: tile.bands(),
            });
        }
        self.reduction.fold(&mut self.partial, tile, &self.no_data);
        Ok(())
    }

    /// Reads `region` from `source` and folds it. Empty regions are skipped
    /// without touching the source.
    pub fn accumulate_region(&mut self, source: &dyn ImageSource<T>, region: &Region) -> Result<()> {
        if region.is_empty() {
            return Ok(());
        }
        let tile = source.read_region(region)?.within(source.extent());
        log::trace!(
            "worker {} folded {}x{} at ({}, {})",
            self.thread_id,
            region.width,
            region.height,
            region.x,
            region.y
        );
        self.accumulate_tile(&tile)
    }
}

/// A reduction plus its per-thread arena and pass lifecycle.
pub struct PersistentAccumulator<T: Sample, R: Reduction<T>> {
    reduction: Arc<R>,
    no_data: NoData<T>,
    /// One slot per worker; `None` while checked out.
    arena: Vec<Option<R::Partial>>,
    bands: usize,
    state: PassState,
    merged: Option<R::Output>,
}

impl<T: Sample, R: Reduction<T>> PersistentAccumulator<T, R> {
    pub fn new(reduction: R) -> Self {
        Self {
            reduction: Arc::new(reduction),
            no_data: NoData::disabled(),
            arena: Vec::new(),
            bands: 0,
            state: PassState::Idle,
            merged: None,
        }
    }

    pub fn with_no_data(mut self, no_data: NoData<T>) -> Self {
        self.no_data = no_data;
        self
    }

    /// Changes the no-data configuration. Not allowed in the middle of a pass.
    pub fn set_no_data(&mut self, no_data: NoData<T>) -> Result<()> {
        if self.state == PassState::Accumulating {
            return Err(StatsError::InvalidState {
                operation: "change the no-data value",
                state: self.state,
            });
        }
        self.no_data = no_data;
        Ok(())
    }

    pub fn no_data(&self) -> NoData<T> {
        self.no_data
    }

    pub fn reduction(&self) -> &R {
        &self.reduction
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn threads(&self) -> usize {
        self.arena.len()
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Starts a new pass: validates the configuration and re-initializes every
    /// slot to the reduction's identity. Any previous result is discarded.
    pub fn reset(&mut self, threads: usize, bands: usize) -> Result<()> {
        if threads == 0 {
            return Err(StatsError::NoWorkers);
        }
        if bands == 0 {
            return Err(StatsError::NoBands);
        }
        self.reduction.validate(bands)?;

        self.arena = (0..threads)
            .map(|_| Some(self.reduction.identity(bands)))
            .collect();
        self.bands = bands;
        self.merged = None;
        self.state = PassState::Accumulating;
        Ok(())
    }

    fn ensure_accumulating(&self, operation: &'static str) -> Result<()> {
        if self.state != PassState::Accumulating {
            return Err(StatsError::InvalidState {
                operation,
                state: self.state,
            });
        }
        if self.arena.iter().any(Option::is_none) {
            return Err(StatsError::SlotsCheckedOut { operation });
        }
        Ok(())
    }

    /// Folds `tile` into slot `thread_id`.
    pub fn accumulate_tile(&mut self, tile: &Tile<T>, thread_id: usize) -> Result<()> {
        self.ensure_accumulating("accumulate")?;
        let threads = self.arena.len();
        if thread_id >= threads {
            return Err(StatsError::ThreadOutOfRange { thread_id, threads });
        }
        if tile.bands() != self.bands {
            return Err(StatsError::BandMismatch {
                expected: self.bands,
                actual: tile.bands(),
            });
        }
        if let Some(partial) = self.arena[thread_id].as_mut() {
            self.reduction.fold(partial, tile, &self.no_data);
        }
        Ok(())
    }

    /// Reads `region` from `source` and folds it into slot `thread_id`.
    /// A read failure aborts the pass.
    pub fn threaded_accumulate(
        &mut self,
        source: &dyn ImageSource<T>,
        region: &Region,
        thread_id: usize,
    ) -> Result<()> {
        self.ensure_accumulating("accumulate")?;
        if region.is_empty() {
            return Ok(());
        }
        match source.read_region(region) {
            Ok(tile) => self.accumulate_tile(&tile.within(source.extent()), thread_id),
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    /// Hands every slot to the caller, in `thread_id` order.
    pub fn checkout_slots(&mut self) -> Result<Vec<WorkerSlot<T, R>>> {
        self.ensure_accumulating("check out worker slots")?;
        let slots = self
            .arena
            .iter_mut()
            .enumerate()
            .filter_map(|(thread_id, slot)| {
                slot.take().map(|partial| WorkerSlot {
                    thread_id,
                    bands: self.bands,
                    no_data: self.no_data,
                    reduction: Arc::clone(&self.reduction),
                    partial,
                })
            })
            .collect();
        Ok(slots)
    }

    /// Returns checked-out slots. Every slot must come back exactly once.
    pub fn checkin_slots(&mut self, slots: Vec<WorkerSlot<T, R>>) -> Result<()> {
        if self.state != PassState::Accumulating {
            return Err(StatsError::InvalidState {
                operation: "check in worker slots",
                state: self.state,
            });
        }
        for slot in slots {
            let thread_id = slot.thread_id;
            if !matches!(self.arena.get(thread_id), Some(None)) {
                self.abort();
                return Err(StatsError::SlotMismatch);
            }
            self.arena[thread_id] = Some(slot.partial);
        }
        if self.arena.iter().any(Option::is_none) {
            self.abort();
            return Err(StatsError::SlotMismatch);
        }
        Ok(())
    }

    /// Marks the current pass as unusable. Only `reset` recovers.
    pub fn abort(&mut self) {
        if self.state == PassState::Accumulating {
            log::warn!("accumulation pass aborted; reset required before reuse");
        }
        self.arena.clear();
        self.merged = None;
        self.state = PassState::Aborted;
    }

    /// Combines every slot into the pass result. Allowed once per pass.
    pub fn merge(&mut self) -> Result<&R::Output> {
        self.ensure_accumulating("merge")?;
        let partials: Vec<R::Partial> = self.arena.iter_mut().filter_map(Option::take).collect();
        let output = self.reduction.combine(&partials, self.bands);
        self.arena = partials.into_iter().map(Some).collect();
        self.state = PassState::Merged;
        Ok(self.merged.insert(output))
    }

    /// The merged result of the last completed pass.
    pub fn result(&self) -> Option<&R::Output> {
        self.merged.as_ref()
    }
}
