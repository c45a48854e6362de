use std::{
    error, fmt, mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::oneshot;

use crate::{
    clock::{Clock, System},
    providers::IdentityProvider,
    retry::{self, RetryPolicy},
    AccessToken, User,
};

/// How a renewal cycle ended, as seen by every request that waited on it
#[derive(Clone, Debug)]
pub enum RenewalOutcome {
    /// The provider issued a new set of tokens
    Renewed(Arc<User>),
    /// Every attempt failed and the cached credentials were discarded
    Failed,
}

impl RenewalOutcome {
    /// The renewed access token, if renewal succeeded
    pub fn access_token(&self) -> Option<AccessToken> {
        match self {
            Self::Renewed(user) => Some(user.access_token().to_owned()),
            Self::Failed => None,
        }
    }
}

/// Coordinates silent renewal so that at most one renewal runs at a time
///
/// Requests that find the access token expired while a renewal is already
/// under way wait for that renewal rather than starting their own, and all
/// of them receive its outcome in the order they started waiting.
///
/// The coordinator is a cheap handle: clone it to share the same renewal
/// state between every client of one session.
#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    state: Mutex<State>,
}

enum State {
    Idle,
    Renewing(PendingQueue),
}

/// Requests waiting on the renewal in flight
#[derive(Default)]
struct PendingQueue {
    waiters: Vec<oneshot::Sender<RenewalOutcome>>,
}

impl PendingQueue {
    fn push(&mut self) -> oneshot::Receiver<RenewalOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Releases every waiter, oldest first, and reports how many were still listening
    fn release(self, outcome: &RenewalOutcome) -> usize {
        self.waiters
            .into_iter()
            .map(|waiter| waiter.send(outcome.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }
}

impl RenewalCoordinator {
    /// Constructs a coordinator over `provider` using the system clock
    pub fn new<P>(provider: P, policy: RetryPolicy) -> Self
    where
        P: IdentityProvider + 'static,
    {
        Self::new_with_clock(provider, policy, System)
    }

    /// Constructs a coordinator that judges expiry using the given clock
    pub fn new_with_clock<P, C>(provider: P, policy: RetryPolicy, clock: C) -> Self
    where
        P: IdentityProvider + 'static,
        C: Clock + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                provider: Arc::new(provider),
                clock: Arc::new(clock),
                policy,
                state: Mutex::new(State::Idle),
            }),
        }
    }

    /// Whether a renewal is currently in flight
    pub fn is_renewing(&self) -> bool {
        matches!(*self.inner.lock_state(), State::Renewing(_))
    }

    /// How many requests are waiting on the renewal in flight
    pub fn pending_requests(&self) -> usize {
        match &*self.inner.lock_state() {
            State::Idle => 0,
            State::Renewing(queue) => queue.len(),
        }
    }

    /// Obtains an access token suitable for attaching to a request
    ///
    /// Returns `None` when nobody is signed in or when the token had expired
    /// and could not be renewed. In both cases the request should go out
    /// without a token and let the server's answer speak for itself.
    pub async fn access_token(&self) -> Option<AccessToken> {
        let Some(user) = self.inner.provider.get_user().await else {
            tracing::trace!("no signed-in user, request will be sent without a token");
            return None;
        };

        let now = self.inner.clock.now();
        if !user.is_expired_at(now) {
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!(
                    token.expiry = user.expiry().0,
                    token.until_expired = user.until_expired_at(now).0,
                    "using cached access token"
                );
            }
            return Some(user.access_token().to_owned());
        }

        tracing::debug!(token.expiry = user.expiry().0, "access token expired");
        self.renew().await.access_token()
    }

    /// Waits for a renewal, starting one if none is in flight
    ///
    /// The renewal itself runs on its own task, so dropping the returned
    /// future only stops this caller from waiting; the renewal carries on
    /// for everyone else.
    pub async fn renew(&self) -> RenewalOutcome {
        let waiter = self.enqueue();
        waiter.await.unwrap_or(RenewalOutcome::Failed)
    }

    fn enqueue(&self) -> oneshot::Receiver<RenewalOutcome> {
        // Checking and claiming the renewal happen under one lock with no
        // suspension point in between.
        let mut state = self.inner.lock_state();
        let (waiter, guard) = match &mut *state {
            State::Renewing(queue) => {
                let waiter = queue.push();
                tracing::debug!(
                    waiters = queue.len(),
                    "renewal already in flight, waiting for it"
                );
                (waiter, None)
            }
            State::Idle => {
                let mut queue = PendingQueue::default();
                let waiter = queue.push();
                *state = State::Renewing(queue);

                let guard = RenewalGuard {
                    inner: Arc::clone(&self.inner),
                    outcome: None,
                };
                (waiter, Some(guard))
            }
        };

        // A runtime that is shutting down drops the task in place, and the
        // guard's drop needs the lock.
        drop(state);

        if let Some(guard) = guard {
            tracing::debug!("starting silent renewal");
            tokio::spawn(run_renewal(guard));
        }

        waiter
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RenewalCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenewalCoordinator")
            .field("policy", &self.inner.policy)
            .field("renewing", &self.is_renewing())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

/// Exclusive ownership of the renewal in flight
///
/// Dropping the guard, on any path, returns the coordinator to idle and
/// releases every waiter. A guard dropped before an outcome was recorded
/// (for instance because the renewal task panicked) releases them as failed.
struct RenewalGuard {
    inner: Arc<Inner>,
    outcome: Option<RenewalOutcome>,
}

impl RenewalGuard {
    fn complete(mut self, outcome: RenewalOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for RenewalGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or(RenewalOutcome::Failed);

        let queue = match mem::replace(&mut *self.inner.lock_state(), State::Idle) {
            State::Renewing(queue) => queue,
            State::Idle => PendingQueue::default(),
        };

        let waiters = queue.len();
        let released = queue.release(&outcome);
        tracing::debug!(
            waiters,
            released,
            renewed = matches!(outcome, RenewalOutcome::Renewed(_)),
            "renewal settled"
        );
    }
}

async fn run_renewal(guard: RenewalGuard) {
    let inner = Arc::clone(&guard.inner);

    match retry::silent_renew(&*inner.provider, &inner.policy).await {
        Ok(user) => guard.complete(RenewalOutcome::Renewed(user)),
        Err(error) => {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "silent renewal failed, discarding cached credentials"
            );

            if let Err(error) = inner.provider.remove_user().await {
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    "unable to discard cached credentials"
                );
            }

            guard.complete(RenewalOutcome::Failed);
        }
    }
}
