//! Identity providers and the stores that persist their users

use std::{error, sync::Arc};

use async_trait::async_trait;

use crate::{clock::Clock, TokenStatus, User};

#[cfg(feature = "file")]
pub mod file;
pub mod memory;
#[cfg(feature = "oidc")]
pub mod oidc;

#[cfg(feature = "file")]
pub use file::FileUserStore;
pub use memory::InMemoryUserStore;
#[cfg(feature = "oidc")]
pub use oidc::OidcProvider;

/// A type-erased error returned across provider and store boundaries
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// The client side of an identity provider
///
/// The provider owns the current user and its tokens. Everything else only
/// reads them through [`get_user()`][Self::get_user()] and asks for a new
/// set through [`signin_silent()`][Self::signin_silent()].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Gets the cached user, if anyone is signed in
    ///
    /// Implementations must answer from local state and never go to the network.
    async fn get_user(&self) -> Option<Arc<User>>;

    /// Renews the user's tokens without user interaction
    async fn signin_silent(&self) -> Result<Arc<User>, BoxError>;

    /// Discards the cached user and anything persisted for it
    async fn remove_user(&self) -> Result<(), BoxError>;
}

#[async_trait]
impl<P: IdentityProvider + ?Sized> IdentityProvider for Arc<P> {
    async fn get_user(&self) -> Option<Arc<User>> {
        (**self).get_user().await
    }

    async fn signin_silent(&self) -> Result<Arc<User>, BoxError> {
        (**self).signin_silent().await
    }

    async fn remove_user(&self) -> Result<(), BoxError> {
        (**self).remove_user().await
    }
}

/// A place where a signed-in user survives between sessions
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Loads the persisted user, if any
    async fn load(&self) -> Result<Option<User>, BoxError>;

    /// Persists a user, replacing any previous one
    async fn save(&self, user: &User) -> Result<(), BoxError>;

    /// Removes the persisted user
    ///
    /// Removing from an empty store is not an error.
    async fn remove(&self) -> Result<(), BoxError>;
}

/// Whether someone is signed in with an access token that has not yet expired
pub async fn is_authenticated<P, C>(provider: &P, clock: &C) -> bool
where
    P: IdentityProvider + ?Sized,
    C: Clock + ?Sized,
{
    provider
        .get_user()
        .await
        .map_or(false, |user| user.status_with_clock(clock) == TokenStatus::Fresh)
}
