//! Plot Dispatcher - Inline or background rendering of figures
//!
//! A `PlotDispatcher` is created in one of two modes and never switches:
//! - Synchronous: render and output on the calling thread, errors go straight
//!   back to the caller.
//! - Asynchronous: jobs go to a single named worker thread through a queue of
//!   depth 1. `submit` returns a `PendingPlot`; `wait` blocks until that job is
//!   done and yields its outcome.
//!
//! Worker failures (errors and panics) come back as a `TaskFailure` holding the
//! original `DiagError` and a backtrace. The `FailurePolicy` decides what
//! happens when `plot` retrieves one: terminate the process (default) or
//! return it to the caller.
//!
//! Only the primary rank renders; every other rank returns immediately.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::error::{DiagError, Result, TaskFailure};
use crate::figure::Figure;
use crate::output::{FigureOutput, FigureTarget};

/// Anything that can draw a figure from data it owns.
pub trait PlotProducer: Send + 'static {
    fn render(&self) -> Result<Figure>;
}

impl<F> PlotProducer for F
where
    F: Fn() -> Result<Figure> + Send + 'static,
{
    fn render(&self) -> Result<Figure> {
        self()
    }
}

pub struct PlotJob {
    pub producer: Box<dyn PlotProducer>,
    pub target: FigureTarget,
}

impl PlotJob {
    pub fn new(producer: impl PlotProducer, target: FigureTarget) -> Self {
        Self {
            producer: Box::new(producer),
            target,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    Synchronous,
    Asynchronous,
}

impl DispatchMode {
    pub fn from_asynchronous(asynchronous: bool) -> Self {
        if asynchronous {
            DispatchMode::Asynchronous
        } else {
            DispatchMode::Synchronous
        }
    }
}

/// What `plot` does with a failure retrieved from the worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log at error level and exit the process with status 1.
    #[default]
    Exit,
    /// Return `DiagError::Async` to the caller.
    Propagate,
}

type Outcome = std::result::Result<(), TaskFailure>;

struct Envelope {
    job: PlotJob,
    reply: Sender<Outcome>,
}

struct Worker {
    queue: Option<Sender<Envelope>>,
    handle: Option<JoinHandle<()>>,
}

/// Handle to a submitted job.
pub struct PendingPlot {
    tag: String,
    reply: Receiver<Outcome>,
}

impl PendingPlot {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Block until the job has finished.
    pub fn wait(self) -> Outcome {
        match self.reply.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskFailure::new(self.tag, DiagError::WorkerLost)),
        }
    }
}

fn execute(output: &FigureOutput, job: PlotJob) -> Result<()> {
    let figure = job.producer.render()?;
    output.output(figure, &job.target)?;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_worker(output: FigureOutput, queue: Receiver<Envelope>) {
    for Envelope { job, reply } in queue.iter() {
        let tag = job.target.tag.clone();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| execute(&output, job))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TaskFailure::new(tag, err)),
            Err(payload) => Err(TaskFailure::new(
                tag,
                DiagError::WorkerPanic(panic_message(payload.as_ref())),
            )),
        };
        if reply.send(outcome).is_err() {
            debug!("Plot result dropped, nobody is waiting for it");
        }
    }
}

pub struct PlotDispatcher {
    name: String,
    mode: DispatchMode,
    policy: FailurePolicy,
    output: FigureOutput,
    worker: Option<Worker>,
}

impl PlotDispatcher {
    pub fn new(name: &str, mode: DispatchMode, output: FigureOutput) -> Result<Self> {
        let worker = match mode {
            DispatchMode::Synchronous => None,
            DispatchMode::Asynchronous => {
                let (tx, rx) = bounded::<Envelope>(1);
                let worker_output = output.clone();
                let handle = thread::Builder::new()
                    .name(format!("plot-{name}"))
                    .spawn(move || run_worker(worker_output, rx))?;
                Some(Worker {
                    queue: Some(tx),
                    handle: Some(handle),
                })
            }
        };
        debug!("PlotDispatcher '{}' created ({:?})", name, mode);
        Ok(Self {
            name: name.to_string(),
            mode,
            policy: FailurePolicy::default(),
            output,
            worker,
        })
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn output(&self) -> &FigureOutput {
        &self.output
    }

    /// Render and output `job` according to the dispatch mode.
    /// No-op on non-primary ranks.
    pub fn plot(&self, is_primary: bool, job: PlotJob) -> Result<()> {
        if !is_primary {
            return Ok(());
        }
        match self.mode {
            DispatchMode::Synchronous => execute(&self.output, job),
            DispatchMode::Asynchronous => {
                let pending = self.submit(job)?;
                match pending.wait() {
                    Ok(()) => Ok(()),
                    Err(failure) => self.on_failure(failure),
                }
            }
        }
    }

    /// Render on the calling thread whatever the mode.
    pub fn plot_inline(&self, is_primary: bool, job: PlotJob) -> Result<()> {
        if !is_primary {
            return Ok(());
        }
        execute(&self.output, job)
    }

    /// Queue `job`. Blocks only while another job is already waiting in the queue.
    /// In synchronous mode the job runs before this returns.
    pub fn submit(&self, job: PlotJob) -> Result<PendingPlot> {
        let tag = job.target.tag.clone();
        let (reply_tx, reply_rx) = bounded(1);
        match self.worker.as_ref().and_then(|w| w.queue.as_ref()) {
            Some(queue) => queue
                .send(Envelope {
                    job,
                    reply: reply_tx,
                })
                .map_err(|_| DiagError::WorkerLost)?,
            None if self.mode == DispatchMode::Synchronous => {
                let outcome = execute(&self.output, job).map_err(|e| TaskFailure::new(tag.clone(), e));
                reply_tx
                    .send(outcome)
                    .map_err(|_| DiagError::WorkerLost)?;
            }
            None => return Err(DiagError::WorkerLost),
        }
        Ok(PendingPlot {
            tag,
            reply: reply_rx,
        })
    }

    fn on_failure(&self, failure: TaskFailure) -> Result<()> {
        match self.policy {
            FailurePolicy::Propagate => Err(failure.into()),
            FailurePolicy::Exit => {
                let mut chain = vec![failure.to_string()];
                let mut source = std::error::Error::source(&failure);
                while let Some(err) = source {
                    chain.push(err.to_string());
                    source = err.source();
                }
                error!(
                    "Critical error in asynchronous plots ({}): {}\nbacktrace:\n{}",
                    self.name,
                    chain.join("\n  caused by: "),
                    failure.backtrace
                );
                crate::shutdown::exit(1)
            }
        }
    }

    /// Close the queue and wait for the worker to finish everything queued.
    pub fn teardown(&mut self) {
        let Some(worker) = self.worker.as_mut() else {
            return;
        };
        drop(worker.queue.take());
        if let Some(handle) = worker.handle.take() {
            if handle.join().is_err() {
                warn!("Plot worker '{}' terminated abnormally", self.name);
            } else {
                info!("Plot worker '{}' drained", self.name);
            }
        }
    }
}

impl Drop for PlotDispatcher {
    fn drop(&mut self) {
        self.teardown();
    }
}
