//! Scripted identity providers for exercising renewal without an authority
//!
//! Enabled with the `testing` feature.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::{
    clock::{DurationSecs, ManualClock, UnixTime},
    providers::{BoxError, IdentityProvider},
    AccessToken, User,
};

/// The time every scripted provider considers to be "now"
pub const NOW: UnixTime = UnixTime(1_700_000_000);

/// A clock frozen at [`NOW`]
pub fn clock() -> ManualClock {
    ManualClock::new(NOW)
}

/// What a scripted provider does on its next silent renewal
#[derive(Clone, Copy, Debug)]
pub enum Step {
    /// Succeed with a fresh access token
    Renew(&'static str),
    /// Fail immediately
    Fail,
    /// Never answer
    Hang,
}

/// The error returned by [`Step::Fail`]
#[derive(Debug)]
pub struct ScriptedFailure;

impl fmt::Display for ScriptedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scripted renewal failure")
    }
}

impl std::error::Error for ScriptedFailure {}

/// An identity provider that follows a script of renewal outcomes
///
/// Once the script runs out, every further renewal fails.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    user: Mutex<Option<Arc<User>>>,
    steps: Mutex<VecDeque<Step>>,
    gate: Option<Arc<Semaphore>>,
    forget_on_remove: bool,
    lookups: AtomicUsize,
    attempts: AtomicUsize,
    removals: AtomicUsize,
}

impl ScriptedProvider {
    /// Nobody is signed in
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Signed in with an access token that is valid at [`NOW`]
    pub fn fresh(access_token: &str) -> Self {
        Self::with_user(User::new(
            AccessToken::from(access_token.to_owned()),
            NOW,
            DurationSecs(3_600),
        ))
    }

    /// Signed in with an access token that expired before [`NOW`]
    pub fn expired() -> Self {
        Self::with_user(User::new(
            AccessToken::from_static("expired-token"),
            NOW - DurationSecs(3_600),
            DurationSecs(3_000),
        ))
    }

    fn with_user(user: User) -> Self {
        Self {
            user: Mutex::new(Some(Arc::new(user))),
            ..Self::default()
        }
    }

    /// Appends steps to the renewal script
    pub fn with_steps(self, steps: impl IntoIterator<Item = Step>) -> Self {
        lock(&self.steps).extend(steps);
        self
    }

    /// Holds every renewal attempt until a permit is added to `gate`
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Signs the user out when asked to remove it
    ///
    /// By default removal is only counted, so the expired user stays around.
    pub fn forgetting_on_remove(mut self) -> Self {
        self.forget_on_remove = true;
        self
    }

    /// How many times the cached user was looked up
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Acquire)
    }

    /// How many silent renewal attempts were made
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    /// How many times the user was asked to be removed
    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::Acquire)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn get_user(&self) -> Option<Arc<User>> {
        self.lookups.fetch_add(1, Ordering::AcqRel);
        lock(&self.user).clone()
    }

    async fn signin_silent(&self) -> Result<Arc<User>, BoxError> {
        self.attempts.fetch_add(1, Ordering::AcqRel);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let step = lock(&self.steps).pop_front().unwrap_or(Step::Fail);
        match step {
            Step::Renew(token) => {
                let user = Arc::new(User::new(
                    AccessToken::from_static(token),
                    NOW,
                    DurationSecs(3_600),
                ));
                *lock(&self.user) = Some(user.clone());
                Ok(user)
            }
            Step::Fail => Err(ScriptedFailure.into()),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn remove_user(&self) -> Result<(), BoxError> {
        self.removals.fetch_add(1, Ordering::AcqRel);
        if self.forget_on_remove {
            *lock(&self.user) = None;
        }
        Ok(())
    }
}
