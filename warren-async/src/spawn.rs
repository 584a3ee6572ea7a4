// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

use std::{
    any::Any,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc,
    },
    task::{Context, Poll},
};

use thiserror::Error;
use tracing::Instrument as _;

/// Wrapper around an async runtime.
#[derive(Clone)]
pub struct Spawner {
    inner: tokio::runtime::Handle,
    spawned: Arc<AtomicUsize>,
}

impl Spawner {
    /// Try to create a [`Spawner`] from the ambient async context.
    ///
    /// Returns `None` if the current thread does not have access to an
    /// async context.
    pub fn from_current() -> Option<Self> {
        tokio::runtime::Handle::try_current().map(Self::tokio).ok()
    }

    /// Create a [`Spawner`] from a [`tokio::runtime::Handle`].
    pub fn tokio(inner: tokio::runtime::Handle) -> Self {
        Self {
            inner,
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn an asynchronous task, returning a handle to it.
    ///
    /// The returned [`Task`] can be `.await`ed to retrieve the task's
    /// output; the task runs regardless of whether the handle is polled.
    /// The task executes in the [`tracing::Span`] active at the call site.
    ///
    /// # Cancellation
    ///
    /// Dropping the [`Task`] aborts the task. To keep it running in the
    /// background, call [`Task::detach`]. There is no guarantee a detached
    /// task runs to completion -- the runtime may drop it on shutdown.
    pub fn spawn<T>(&self, task: T) -> Task<T::Output>
    where
        T: Future + Send + 'static,
        T::Output: Send + 'static,
    {
        let gauge = Arc::clone(&self.spawned);
        self.inner
            .spawn(
                async move {
                    gauge.fetch_add(1, Relaxed);
                    let out = task.await;
                    gauge.fetch_sub(1, Relaxed);
                    out
                }
                .in_current_span(),
            )
            .into()
    }

    /// Number of tasks spawned through this [`Spawner`] whose futures have
    /// not resolved yet. Includes detached tasks.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Relaxed)
    }
}

/// A handle to a task spawned via [`Spawner::spawn`].
///
/// Dropping a [`Task`] aborts the task, ie. `spawner.spawn(fut);` is a
/// no-op. Call [`Task::detach`] to keep the task running without the
/// handle.
#[must_use = "spawned tasks must be awaited or detached"]
pub struct Task<T> {
    task: tokio::task::JoinHandle<T>,
    abort_on_drop: bool,
}

impl<T> Task<T> {
    /// Abort the task corresponding to this handle.
    ///
    /// The task is not guaranteed to be cancelled by the time this
    /// returns -- if it is currently being polled, cancellation takes
    /// effect once that poll returns.
    pub fn abort(&self) {
        self.task.abort()
    }

    /// Continue running the task in the background.
    pub fn detach(mut self) {
        self.abort_on_drop = false;
    }
}

impl<T> From<tokio::task::JoinHandle<T>> for Task<T> {
    fn from(task: tokio::task::JoinHandle<T>) -> Self {
        Self {
            task,
            abort_on_drop: true,
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if self.abort_on_drop {
            self.abort()
        }
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task)
            .poll(cx)
            .map(|t| t.map_err(JoinError::from))
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked")]
    Panicked(Box<dyn Any + Send + 'static>),
}

impl JoinError {
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Consumes the join error, resuming the panic the task died with.
    ///
    /// # Panics
    ///
    /// Panics (with its own message) if the task was cancelled rather than
    /// panicked.
    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        match self {
            Self::Cancelled => panic!("task was cancelled, not panicked"),
            Self::Panicked(payload) => payload,
        }
    }
}

impl From<tokio::task::JoinError> for JoinError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_panic() {
            Self::Panicked(e.into_panic())
        } else {
            Self::Cancelled
        }
    }
}
