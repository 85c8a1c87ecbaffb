//! # Async Result
//!
//! A single-assignment completion cell usable from both blocking threads and
//! runtime tasks.
//!
//! ## Invariants
//!
//! 1. The state moves `pending -> {completed, failed, cancelled}` at most once.
//!    Later `complete`/`fail`/`cancel` calls are ignored and return `false`.
//! 2. Every listener registered before settlement runs exactly once, in
//!    registration order, on the thread that settled the result. The listener
//!    list is then dropped.
//! 3. A listener registered after settlement runs immediately on the calling
//!    thread with the stored outcome.
//!
//! `get_or_timeout` parks the calling thread. Never call it from a dispatcher
//! or I/O worker; attach a listener there instead.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;

/// Terminal state of an `AsyncResult`.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Completed(T),
    Failed(Arc<anyhow::Error>),
    Cancelled,
}

/// Why a blocking `get` did not produce a value.
#[derive(Debug, Clone)]
pub enum TaskError {
    Timeout,
    Cancelled,
    Failed(Arc<anyhow::Error>),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "task did not complete in time"),
            Self::Cancelled => write!(f, "task was cancelled"),
            Self::Failed(e) => write!(f, "task failed: {:#}", e),
        }
    }
}

impl std::error::Error for TaskError {}

type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

struct State<T> {
    outcome: Option<Outcome<T>>,
    listeners: Vec<Listener<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

pub struct AsyncResult<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + 'static> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> AsyncResult<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State { outcome: None, listeners: Vec::new() }),
                settled: Condvar::new(),
            }),
        }
    }

    pub fn completed(value: T) -> Self {
        let result = Self::new();
        result.complete(value);
        result
    }

    pub fn failed(error: anyhow::Error) -> Self {
        let result = Self::new();
        result.fail(error);
        result
    }

    pub fn complete(&self, value: T) -> bool {
        self.settle(Outcome::Completed(value))
    }

    pub fn fail(&self, error: anyhow::Error) -> bool {
        self.settle(Outcome::Failed(Arc::new(error)))
    }

    pub fn cancel(&self) -> bool {
        self.settle(Outcome::Cancelled)
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.listeners)
        };
        self.inner.settled.notify_all();

        for listener in listeners {
            listener(&outcome);
        }
        true
    }

    /// Runs `listener` once the result settles, or right away if it already has.
    pub fn add_listener(&self, listener: impl FnOnce(&Outcome<T>) + Send + 'static) -> &Self {
        let settled = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_none() {
                state.listeners.push(Box::new(listener));
                return self;
            }
            state.outcome.clone()
        };
        if let Some(outcome) = settled {
            listener(&outcome);
        }
        self
    }

    /// Runs `f` only when the result completes successfully.
    pub fn on_complete(&self, f: impl FnOnce(&T) + Send + 'static) -> &Self {
        self.add_listener(move |outcome| {
            if let Outcome::Completed(value) = outcome {
                f(value);
            }
        })
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Some(Outcome::Cancelled))
    }

    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.inner.state.lock().outcome.clone()
    }

    /// Blocks up to `timeout` for the outcome.
    pub fn get(&self, timeout: Duration) -> Result<T, TaskError> {
        // a timeout too large to represent waits without a deadline
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();
        while state.outcome.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.inner.settled.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.settled.wait(&mut state),
            }
        }
        match &state.outcome {
            Some(Outcome::Completed(value)) => Ok(value.clone()),
            Some(Outcome::Failed(e)) => Err(TaskError::Failed(e.clone())),
            Some(Outcome::Cancelled) => Err(TaskError::Cancelled),
            None => Err(TaskError::Timeout),
        }
    }

    /// Blocks up to `timeout`; any outcome other than completion yields `default`.
    pub fn get_or_timeout(&self, timeout: Duration, default: T) -> T {
        self.get(timeout).unwrap_or(default)
    }

    /// A result completing with `f(value)`. Failure and cancellation pass through.
    pub fn map<U, F>(&self, f: F) -> AsyncResult<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like `map`, but an `Err` from `f` fails the mapped result.
    pub fn try_map<U, F>(&self, f: F) -> AsyncResult<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(&T) -> anyhow::Result<U> + Send + 'static,
    {
        let mapped = AsyncResult::new();
        let target = mapped.clone();
        self.add_listener(move |outcome| {
            match outcome {
                Outcome::Completed(value) => match f(value) {
                    Ok(value) => target.complete(value),
                    Err(e) => target.fail(e),
                },
                Outcome::Failed(e) => target.settle(Outcome::Failed(e.clone())),
                Outcome::Cancelled => target.cancel(),
            };
        });
        mapped
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.state.lock().outcome {
            None => "pending",
            Some(Outcome::Completed(_)) => "completed",
            Some(Outcome::Failed(_)) => "failed",
            Some(Outcome::Cancelled) => "cancelled",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}
