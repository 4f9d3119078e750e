//! Single-flight coordination of access-token refreshes.
//!
//! At most one refresh call is in flight per session. Every request that
//! needs a refresh while one is running attaches to the same shared future
//! and observes the same outcome.
//!
//! A *generation* counter tracks credential rotations. A request remembers
//! the generation it attached its credential under; when it is rejected
//! after the generation has moved on, the credential it carried was already
//! replaced and it retries with the current one instead of refreshing again.
//! That keeps the refresh count at one even when rejections arrive after
//! the refresh has already completed.
//!
//! Every change to the stored session (refresh outcome, login, logout)
//! happens under [`RefreshCoordinator::transition`] and rotates the
//! generation before the guard is released. A refresh that finishes after
//! the generation moved on discards its outcome instead of persisting or
//! clearing anything.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::store::Secret;

/// Why a refresh could not produce a new access credential.
///
/// Clonable because one outcome is delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshFailure {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh rejected with status {status}")]
    Rejected { status: u16 },

    #[error("refresh request failed: {message}")]
    Transport { message: String },

    #[error("refresh response did not contain an access token")]
    MalformedResponse,

    #[error("failed to persist refreshed credentials: {message}")]
    Persist { message: String },

    #[error("session ended while the request was in flight")]
    SignedOut,
}

pub type RefreshOutcome = Result<Secret, RefreshFailure>;

pub(crate) type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// What a rejected request should do next.
pub(crate) enum RefreshTicket {
    /// The credential was rotated after this request attached its own.
    Rotated,

    /// Await this refresh (possibly started by this very call).
    Wait(SharedRefresh),
}

struct RefreshState {
    generation: u64,
    in_flight: Option<SharedRefresh>,
}

pub(crate) struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    transitions: AsyncMutex<()>,
    started: AtomicU64,
}

impl RefreshCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState {
                generation: 0,
                in_flight: None,
            }),
            transitions: AsyncMutex::new(()),
            started: AtomicU64::new(0),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// The refresh currently running, if any.
    pub(crate) fn in_flight(&self) -> Option<SharedRefresh> {
        self.state.lock().in_flight.clone()
    }

    /// Serialize changes to the stored session. Hold the guard across the
    /// store write and the following [`rotate`](Self::rotate).
    pub(crate) async fn transition(&self) -> AsyncMutexGuard<'_, ()> {
        self.transitions.lock().await
    }

    /// Record a credential rotation.
    pub(crate) fn rotate(&self) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.generation
    }

    /// Number of refreshes started since construction.
    pub(crate) fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Join the running refresh, or start one with `start` unless the
    /// credential already rotated past `seen_generation`.
    ///
    /// `start` is only invoked when a new refresh is actually needed, and
    /// receives the generation the refresh starts from.
    pub(crate) fn join_or_start<F, Fut>(
        self: &Arc<Self>,
        seen_generation: u64,
        start: F,
    ) -> RefreshTicket
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = RefreshOutcome> + Send + 'static,
    {
        let mut state = self.state.lock();

        if let Some(running) = &state.in_flight {
            return RefreshTicket::Wait(running.clone());
        }

        if state.generation != seen_generation {
            return RefreshTicket::Rotated;
        }

        self.started.fetch_add(1, Ordering::Relaxed);
        let refresh = Self::publish(Arc::clone(self), start(state.generation))
            .boxed()
            .shared();
        state.in_flight = Some(refresh.clone());
        RefreshTicket::Wait(refresh)
    }

    /// Clear the slot once `work` is done. `work` persists and rotates
    /// before it returns, so anyone who sees the slot empty reads the
    /// settled credential.
    async fn publish<Fut>(coordinator: Arc<Self>, work: Fut) -> RefreshOutcome
    where
        Fut: Future<Output = RefreshOutcome> + Send,
    {
        let outcome = work.await;
        coordinator.state.lock().in_flight = None;
        outcome
    }
}
