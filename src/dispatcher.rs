//! Bounded concurrent dispatch of probe work.
//!
//! [`Dispatcher::run_all`] turns a list of work items into spawned tasks,
//! keeps at most `workers` of them in flight and drains their outcomes in
//! completion order. Each outcome goes through a [`ResultSink`], the only
//! place results are appended and progress is printed, behind one lock.
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::{future, stream, StreamExt};
use log::{debug, warn};
use thiserror::Error;

use crate::probe::ProbeError;

/// One worker per available processing unit.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// What to do when a single item faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// The first fault aborts the batch and is returned to the caller.
    #[default]
    Propagate,
    /// Faults are logged and the item counts as having no result.
    /// Fatal probe errors still abort.
    Isolate,
}

/// Shared flag asking running dispatches to stop submitting work.
///
/// Items already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// A worker task panicked. Surfaces when its outcome is collected.
    #[error("a worker panicked: {message}")]
    Panicked { message: String },
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        match self {
            DispatchError::Probe(e) => e.is_fatal(),
            DispatchError::Panicked { .. } => false,
        }
    }
}

type Describe<R> = Box<dyn Fn(&R) -> String + Send + Sync>;

/// Where and how a dispatch reports its progress.
///
/// Every finished item prints `"{label} {done}/{total}\r"`. Items that
/// produced a result additionally print a line built by the describe
/// function, if one is set.
pub struct Progress<R> {
    label: String,
    writer: Option<Box<dyn Write + Send>>,
    describe: Option<Describe<R>>,
}

impl<R> Progress<R> {
    /// Counts without printing anything.
    pub fn silent() -> Self {
        Self {
            label: String::new(),
            writer: None,
            describe: None,
        }
    }

    pub fn stdout(label: impl Into<String>) -> Self {
        Self::to_writer(label, io::stdout())
    }

    pub fn to_writer(label: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        Self {
            label: label.into(),
            writer: Some(Box::new(writer)),
            describe: None,
        }
    }

    pub fn describe(mut self, describe: impl Fn(&R) -> String + Send + Sync + 'static) -> Self {
        self.describe = Some(Box::new(describe));
        self
    }

    fn print(&mut self, done: usize, total: usize, result: Option<&R>) -> io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        // One buffer, one write: a progress update is never split.
        let mut line = format!("{} {}/{}\r", self.label, done, total);
        if let (Some(result), Some(describe)) = (result, self.describe.as_ref()) {
            line.push('\n');
            line.push_str(&describe(result));
            line.push('\n');
        }
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }
}

impl<R> fmt::Debug for Progress<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("label", &self.label)
            .field("silent", &self.writer.is_none())
            .finish()
    }
}

struct SinkState<R> {
    results: Vec<R>,
    completed: usize,
    total: usize,
    progress: Progress<R>,
}

/// Collects results and prints progress under a single lock.
///
/// The lock is held for one append plus one progress write, nothing else.
pub struct ResultSink<R> {
    state: Mutex<SinkState<R>>,
}

impl<R> ResultSink<R> {
    pub fn new(total: usize, progress: Progress<R>) -> Self {
        Self {
            state: Mutex::new(SinkState {
                results: Vec::with_capacity(total),
                completed: 0,
                total,
                progress,
            }),
        }
    }

    /// Counts one finished item, keeping its result if it has one.
    pub fn record(&self, result: Option<R>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let SinkState {
            results,
            completed,
            total,
            progress,
        } = &mut *state;

        *completed += 1;
        if let Err(e) = progress.print(*completed, *total, result.as_ref()) {
            debug!("Could not print progress: {e}");
        }
        if let Some(result) = result {
            results.push(result);
        }
    }

    pub fn completed(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completed
    }

    pub fn into_results(self) -> Vec<R> {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .results
    }
}

/// Runs work items on a bounded pool of tokio tasks.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: usize,
    policy: FaultPolicy,
    stop: StopSignal,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(default_workers())
    }
}

impl Dispatcher {
    /// A dispatcher running at most `workers` items at once (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            policy: FaultPolicy::default(),
            stop: StopSignal::new(),
        }
    }

    pub fn with_policy(mut self, policy: FaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn policy(&self) -> FaultPolicy {
        self.policy
    }

    /// Runs `worker` on every item and returns the results it produced.
    ///
    /// Results come back in completion order, which differs between runs.
    /// `Ok(None)` from the worker means "nothing found" and only advances
    /// progress. Faults are handled according to the [`FaultPolicy`]; a
    /// propagated fault leaves items still in flight running detached.
    ///
    /// Once the stop signal is set no further items are started and the
    /// results gathered so far are returned.
    pub async fn run_all<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        worker: F,
        progress: Progress<R>,
    ) -> Result<Vec<R>, DispatchError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<Option<R>, ProbeError>> + Send + 'static,
    {
        let sink = ResultSink::new(items.len(), progress);
        let stop = self.stop.clone();

        let mut outcomes = stream::iter(items)
            .take_while(move |_| future::ready(!stop.is_set()))
            .map(|item| tokio::spawn(worker(item)))
            .buffer_unordered(self.workers);

        while let Some(joined) = outcomes.next().await {
            let outcome = match joined {
                Ok(result) => result.map_err(DispatchError::from),
                Err(e) if e.is_panic() => Err(DispatchError::Panicked {
                    message: panic_message(e.into_panic()),
                }),
                Err(_) => Err(DispatchError::Probe(ProbeError::Cancelled)),
            };

            match outcome {
                Ok(result) => sink.record(result),
                Err(e) if e.is_fatal() || self.policy == FaultPolicy::Propagate => return Err(e),
                Err(e) => {
                    warn!("{e}");
                    sink.record(None);
                }
            }
        }

        if self.stop.is_set() {
            debug!(
                "Dispatch stopped after {} items",
                sink.completed()
            );
        }
        Ok(sink.into_results())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
