//! Single-assignment result cells polled by the frame loop.
//!
//! A [`Pollable`] is handed out synchronously by every loader operation that may need
//! the network. The frame loop polls it with [`Pollable::is_ready`] and reads it with
//! [`Pollable::get_result`]; a background task settles it exactly once. Clones share
//! the same cell, so repeated polls of the same request observe the same value.

use std::{
    fmt,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use tokio::sync::watch;

use crate::ResourceError;

/// Shared failure of a fetch. Every waiter of a single flight sees the same error.
pub type Failure = Arc<ResourceError>;

type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

/// Settled state of a [`Pollable`].
#[derive(Debug)]
pub enum Outcome<T> {
    Ready(T),
    Failed(Failure),
}

struct Cell<T> {
    outcome: OnceLock<Outcome<T>>,
    continuations: Mutex<Vec<Continuation<T>>>,
    settled: watch::Sender<bool>,
}

pub struct Pollable<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for Pollable<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pollable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.outcome.get() {
            None => write!(f, "Pollable(pending)"),
            Some(Outcome::Ready(value)) => f.debug_tuple("Pollable").field(value).finish(),
            Some(Outcome::Failed(err)) => write!(f, "Pollable(failed: {err})"),
        }
    }
}

impl<T: Send + Sync + 'static> Pollable<T> {
    /// A cell that a background task will settle later.
    pub fn pending() -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            cell: Arc::new(Cell {
                outcome: OnceLock::new(),
                continuations: Mutex::new(Vec::new()),
                settled,
            }),
        }
    }

    /// A cell that is ready from the start, for data that was already cached.
    pub fn ready(value: T) -> Self {
        let pollable = Self::pending();
        pollable.resolve(value);
        pollable
    }

    pub fn failed(error: impl Into<Failure>) -> Self {
        let pollable = Self::pending();
        pollable.fail(error);
        pollable
    }

    /// Settles the cell with a value. Returns `false` if it was already settled, in
    /// which case the cell is left untouched.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Outcome::Ready(value))
    }

    /// Settles the cell with an error. Returns `false` if it was already settled.
    pub fn fail(&self, error: impl Into<Failure>) -> bool {
        self.settle(Outcome::Failed(error.into()))
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        if self.cell.outcome.set(outcome).is_err() {
            return false;
        }
        let continuations = std::mem::take(
            &mut *self
                .cell
                .continuations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if let Some(outcome) = self.cell.outcome.get() {
            for continuation in continuations {
                continuation(outcome);
            }
        }
        self.cell.settled.send_replace(true);
        true
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.cell.outcome.get(), Some(Outcome::Ready(_)))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.cell.outcome.get(), Some(Outcome::Failed(_)))
    }

    /// Ready or failed.
    pub fn is_settled(&self) -> bool {
        self.cell.outcome.get().is_some()
    }

    /// The value, once ready. Never blocks; `None` while pending or after a failure.
    pub fn get_result(&self) -> Option<&T> {
        match self.cell.outcome.get() {
            Some(Outcome::Ready(value)) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Failure> {
        match self.cell.outcome.get() {
            Some(Outcome::Failed(err)) => Some(err),
            _ => None,
        }
    }

    /// Whether both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Runs `f` once the cell settles, or right away if it already has.
    pub fn on_settle(&self, f: impl FnOnce(&Outcome<T>) + Send + 'static) {
        {
            let mut continuations = self
                .cell
                .continuations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // `settle` stores the outcome before draining under this lock, so either we
            // see the outcome here or our continuation is drained afterwards.
            if self.cell.outcome.get().is_none() {
                continuations.push(Box::new(f));
                return;
            }
        }
        if let Some(outcome) = self.cell.outcome.get() {
            f(outcome);
        }
    }

    /// A derived cell holding `f(value)`; failures are forwarded unchanged.
    pub fn map<U, F>(&self, f: F) -> Pollable<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like [`Pollable::map`], but `f` may fail the derived cell.
    pub fn try_map<U, F>(&self, f: F) -> Pollable<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> Result<U, ResourceError> + Send + 'static,
    {
        let derived = Pollable::pending();
        let target = derived.clone();
        self.on_settle(move |outcome| match outcome {
            Outcome::Ready(value) => match f(value) {
                Ok(mapped) => {
                    target.resolve(mapped);
                }
                Err(err) => {
                    target.fail(err);
                }
            },
            Outcome::Failed(err) => {
                target.fail(Arc::clone(err));
            }
        });
        derived
    }

    /// Waits until the cell settles. Meant for bootstrap and tests; the frame loop
    /// polls instead.
    pub async fn wait(&self) -> Result<&T, Failure> {
        let mut settled = self.cell.settled.subscribe();
        // The sender lives in the cell, so the channel cannot close while we hold it.
        let _ = settled.wait_for(|done| *done).await;
        match self.cell.outcome.get() {
            Some(Outcome::Ready(value)) => Ok(value),
            Some(Outcome::Failed(err)) => Err(Arc::clone(err)),
            None => Err(Arc::new(ResourceError::NotLoaded("pollable".into()))),
        }
    }
}
