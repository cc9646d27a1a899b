// THEORY:
// The `parallel_pipeline` module is the async counterpart of `pipeline`. The
// pass algorithm is identical (same strips, same worker split, same merge), so
// both drivers produce identical results for the same configuration. What
// changes is how the workers run and how the end of a pass is observed:
//
// 1.  **Blocking work off the runtime**: each worker slot is moved into its own
//     `spawn_blocking` task together with a handle to the source. The task hands
//     the slot back with its outcome, so ownership returns to the driver at the
//     barrier even when the worker failed.
// 2.  **Explicit barrier**: `join_all` over the strip's tasks is the only place
//     a strip ends. A panicking worker surfaces as a `JoinError` and aborts the
//     pass like a read failure would.
// 3.  **Observable completion**: the driver publishes its progress on a `watch`
//     channel. Other tasks hold a `PassCompletion` and `wait()` for the pass to
//     end instead of polling the accumulator. Every pass announces itself with
//     `Starting` before anything else, and a handle never resolves twice on the
//     same finished status, so a waiter cannot mistake the previous pass's
//     outcome for the current one.

use crate::core_modules::accumulator::{PassState, PersistentAccumulator, Reduction};
use crate::core_modules::region::{split_for_workers, Region};
use crate::core_modules::sample::Sample;
use crate::core_modules::tile::ImageSource;
use crate::error::{Result, StatsError};
use crate::pipeline::{plan_strips, StreamingConfig};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;

/// Progress of the pass a `ParallelPipeline` is driving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassStatus {
    /// No pass has started yet.
    Idle,
    /// A pass was requested and is planning its strips.
    Starting,
    /// Strip `strip` (zero-based) of `strips` is in flight.
    Running { strip: usize, strips: usize },
    /// The last pass merged successfully.
    Complete,
    /// The last pass failed; the message is the error that aborted it.
    Aborted(String),
}

impl PassStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, PassStatus::Complete | PassStatus::Aborted(_))
    }
}

/// An awaitable handle on the end of a pass.
#[derive(Debug, Clone)]
pub struct PassCompletion {
    receiver: watch::Receiver<PassStatus>,
}

impl PassCompletion {
    pub fn status(&self) -> PassStatus {
        self.receiver.borrow().clone()
    }

    /// Resolves at the end of the first pass that finishes after this handle
    /// last looked at the status. A `Complete` or `Aborted` published before
    /// `subscribe`, or already returned by an earlier `wait`, does not count.
    pub async fn wait(&mut self) -> Result<()> {
        let closed = || StatsError::PassAborted("pipeline dropped before the pass finished".to_string());
        loop {
            match self.receiver.has_changed() {
                Ok(true) => {}
                Ok(false) => self.receiver.changed().await.map_err(|_| closed())?,
                Err(_) => {
                    // pipeline dropped
                    let status = self.receiver.borrow().clone();
                    return match status {
                        PassStatus::Aborted(reason) => Err(StatsError::PassAborted(reason)),
                        _ => Err(closed()),
                    };
                }
            }
            let status = self.receiver.borrow_and_update().clone();
            match status {
                PassStatus::Complete => return Ok(()),
                PassStatus::Aborted(reason) => return Err(StatsError::PassAborted(reason)),
                _ => continue,
            }
        }
    }
}

pub struct ParallelPipeline {
    config: StreamingConfig,
    status: watch::Sender<PassStatus>,
}

impl ParallelPipeline {
    pub fn new(config: StreamingConfig) -> Result<Self> {
        if config.threads == 0 {
            return Err(StatsError::NoWorkers);
        }
        let (status, _) = watch::channel(PassStatus::Idle);
        Ok(Self { config, status })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn status(&self) -> PassStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> PassCompletion {
        PassCompletion {
            receiver: self.status.subscribe(),
        }
    }

    pub async fn run<'a, T, R>(
        &self,
        accumulator: &'a mut PersistentAccumulator<T, R>,
        source: Arc<dyn ImageSource<T>>,
    ) -> Result<&'a R::Output>
    where
        T: Sample,
        R: Reduction<T> + 'static,
        R::Partial: 'static,
    {
        let region = source.extent();
        self.run_region(accumulator, source, region).await
    }

    pub async fn run_region<'a, T, R>(
        &self,
        accumulator: &'a mut PersistentAccumulator<T, R>,
        source: Arc<dyn ImageSource<T>>,
        region: Region,
    ) -> Result<&'a R::Output>
    where
        T: Sample,
        R: Reduction<T> + 'static,
        R::Partial: 'static,
    {
        self.status.send_replace(PassStatus::Starting);
        if let Err(err) = self.drive(accumulator, &source, region).await {
            if accumulator.state() == PassState::Accumulating {
                accumulator.abort();
            }
            self.status.send_replace(PassStatus::Aborted(err.to_string()));
            return Err(err);
        }
        match accumulator.merge() {
            Ok(output) => {
                log::info!("async pass complete: {} pixels", region.area());
                self.status.send_replace(PassStatus::Complete);
                Ok(output)
            }
            Err(err) => {
                self.status.send_replace(PassStatus::Aborted(err.to_string()));
                Err(err)
            }
        }
    }

    async fn drive<T, R>(
        &self,
        accumulator: &mut PersistentAccumulator<T, R>,
        source: &Arc<dyn ImageSource<T>>,
        region: Region,
    ) -> Result<()>
    where
        T: Sample,
        R: Reduction<T> + 'static,
        R::Partial: 'static,
    {
        let threads = self.config.threads;
        let strips = plan_strips(&self.config, &**source, &region)?;
        accumulator.reset(threads, source.band_count())?;

        for (index, strip) in strips.iter().enumerate() {
            self.status.send_replace(PassStatus::Running {
                strip: index,
                strips: strips.len(),
            });
            let regions = split_for_workers(strip, threads);
            let slots = accumulator.checkout_slots()?;

            let tasks = slots.into_iter().zip(regions).map(|(mut slot, sub_region)| {
                let source = Arc::clone(source);
                tokio::task::spawn_blocking(move || {
                    let outcome = slot.accumulate_region(&*source, &sub_region);
                    (slot, outcome)
                })
            });
            let joined = join_all(tasks).await;

            let mut returned = Vec::with_capacity(joined.len());
            let mut failure = None;
            for task in joined {
                match task {
                    Ok((slot, outcome)) => {
                        returned.push(slot);
                        if let Err(err) = outcome {
                            failure.get_or_insert(err);
                        }
                    }
                    Err(join_error) => {
                        failure.get_or_insert(StatsError::WorkerFailed(join_error.to_string()));
                    }
                }
            }
            if let Some(err) = failure {
                accumulator.abort();
                return Err(err);
            }
            accumulator.checkin_slots(returned)?;
        }
        Ok(())
    }
}
