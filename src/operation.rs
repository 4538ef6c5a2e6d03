//! Lifecycle management for a single asynchronous unit of work.
//!
//! An [`AsyncOperation`] wraps work that eventually produces a `Result<T, E>` and
//! exposes its progress as an [`AsyncState`]. It is the building block used by
//! the auth provider and by every [`Mutation`](crate::mutation::Mutation).
//!
//! # Liveness and generations
//!
//! Work handed to [`AsyncOperation::run`] is spawned on the Tokio runtime, so it
//! settles even when nobody awaits the returned [`RunHandle`]. Whether that
//! settlement is *applied* depends on two checks made at the moment it arrives:
//!
//! 1. The operation must still be alive. [`AsyncOperation::destroy`] (or dropping
//!    the operation) flips a cancellation token; later settlements are discarded.
//! 2. The run must still be the latest trigger. Every `run`, `set_data`,
//!    `set_error` and `reset` starts a new generation, and a settlement only
//!    lands if its generation is current. A slow first run can therefore never
//!    overwrite the outcome of a second one.
//!
//! Discarded settlements are not errors. The underlying work is never aborted,
//! its effect on the state is simply dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use bookshelf::operation::{AsyncOperation, AsyncState};
//!
//! # async fn example() {
//! let operation = AsyncOperation::<u32, String>::new();
//!
//! let handle = operation.run(async { Ok(42) });
//! assert!(operation.state().is_loading());
//!
//! assert_eq!(handle.await, Ok(42));
//! assert_eq!(operation.state(), AsyncState::Resolved(42));
//! # }
//! ```

mod state;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub use state::{AsyncState, Status};

/// Error returned when [`AsyncOperation::try_run`] is called without work.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
    #[error(
        "The argument passed to run must be a promise. Maybe a function that's passed isn't returning anything?"
    )]
    NotAFuture,
}

struct Shared<T, E> {
    state: watch::Sender<AsyncState<T, E>>,
    generation: AtomicU64,
    alive: CancellationToken,
}

impl<T, E> Shared<T, E> {
    /// Replaces the state and starts a new generation.
    ///
    /// Returns `None` when the operation has been destroyed.
    fn transition(&self, next: AsyncState<T, E>) -> Option<u64> {
        if self.alive.is_cancelled() {
            return None;
        }

        let mut generation = 0;
        // The generation bump happens under the watch lock so that it is
        // ordered with respect to `settle`.
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = next;
        });
        Some(generation)
    }

    fn settle(&self, generation: u64, result: &Result<T, E>)
    where
        T: Clone,
        E: Clone,
    {
        let applied = self.state.send_if_modified(|state| {
            if self.alive.is_cancelled() || self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *state = result.clone().into();
            true
        });

        if !applied {
            trace!(
                generation,
                alive = !self.alive.is_cancelled(),
                "discarding stale settlement"
            );
        }
    }
}

/// A reusable state machine around one in-flight asynchronous unit of work.
///
/// See the [module documentation](self) for the liveness and generation rules.
///
/// Dropping the operation destroys it.
pub struct AsyncOperation<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> AsyncOperation<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates an idle operation.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(AsyncState::Idle)
    }

    /// Creates an operation pre-seeded with the given state.
    ///
    /// ```
    /// use bookshelf::operation::{AsyncOperation, AsyncState};
    ///
    /// let operation = AsyncOperation::<(), String>::with_state(AsyncState::Rejected("Test".into()));
    /// assert!(operation.state().is_error());
    /// ```
    #[must_use]
    pub fn with_state(initial: AsyncState<T, E>) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            shared: Arc::new(Shared {
                state,
                generation: AtomicU64::new(0),
                alive: CancellationToken::new(),
            }),
        }
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> AsyncState<T, E> {
        self.shared.state.borrow().clone()
    }

    /// Returns the current status.
    pub fn status(&self) -> Status {
        self.shared.state.borrow().status()
    }

    /// Returns `false` once the operation has been destroyed.
    pub fn is_alive(&self) -> bool {
        !self.shared.alive.is_cancelled()
    }

    /// Starts `work`, moving the operation to [`Status::Pending`] before returning.
    ///
    /// The work is spawned, so it must be called from within a Tokio runtime.
    /// The returned handle resolves with exactly the work's result, whether or
    /// not the settlement was applied to the state.
    pub fn run<F>(&self, work: F) -> RunHandle<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let generation = self.shared.transition(AsyncState::Pending);
        let shared = Arc::clone(&self.shared);

        let join = tokio::spawn(async move {
            let result = work.await;
            match generation {
                Some(generation) => shared.settle(generation, &result),
                None => trace!("operation destroyed before run, result not applied"),
            }
            result
        });

        RunHandle { join }
    }

    /// Like [`run`](Self::run), but rejects a missing unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::NotAFuture`] when `work` is `None`. The state is left
    /// untouched in that case.
    pub fn try_run<F>(&self, work: Option<F>) -> Result<RunHandle<T, E>, RunError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        work.map(|work| self.run(work)).ok_or(RunError::NotAFuture)
    }

    /// Resolves the operation with a locally known value.
    pub fn set_data(&self, data: T) {
        self.shared.transition(AsyncState::Resolved(data));
    }

    /// Rejects the operation with a locally known error.
    pub fn set_error(&self, error: E) {
        self.shared.transition(AsyncState::Rejected(error));
    }

    /// Returns to [`Status::Idle`].
    ///
    /// A run still in flight keeps going, but its settlement is discarded.
    pub fn reset(&self) {
        self.shared.transition(AsyncState::Idle);
    }

    /// Streams state changes, starting with the current state.
    ///
    /// Intermediate states may be coalesced when the consumer falls behind. The
    /// stream ends once the operation is dropped and no run is left in flight.
    pub fn subscribe(&self) -> BoxStream<'static, AsyncState<T, E>> {
        WatchStream::new(self.shared.state.subscribe()).boxed()
    }

    /// Returns a raw watch receiver for the state.
    pub fn watch(&self) -> watch::Receiver<AsyncState<T, E>> {
        self.shared.state.subscribe()
    }
}

impl<T, E> AsyncOperation<T, E> {
    /// Ends the operation's scope. No transition is observable afterwards.
    pub fn destroy(&self) {
        self.shared.alive.cancel();
    }
}

impl<T, E> Default for AsyncOperation<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Drop for AsyncOperation<T, E> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T, E> fmt::Debug for AsyncOperation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("status", &self.shared.state.borrow().status())
            .field("generation", &self.shared.generation.load(Ordering::SeqCst))
            .field("alive", &!self.shared.alive.is_cancelled())
            .finish()
    }
}

/// The awaitable returned by [`AsyncOperation::run`].
///
/// Resolves with the result of the wrapped work. Dropping the handle does not
/// cancel the work.
///
/// # Panics
///
/// Polling panics if the wrapped work panicked (the panic is resumed) or if the
/// runtime shut down before the work finished.
#[derive(Debug)]
pub struct RunHandle<T, E> {
    join: JoinHandle<Result<T, E>>,
}

impl<T, E> RunHandle<T, E> {
    /// Returns `true` if the wrapped work has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl<T, E> Future for RunHandle<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(error)) => match error.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(error) => panic!("run task did not complete: {error}"),
            },
        }
    }
}
