//! An in-memory user store

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use super::{BoxError, UserStore};
use crate::User;

/// A user store that lives only as long as the process
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    user: ArcSwapOption<User>,
}

impl InMemoryUserStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn load(&self) -> Result<Option<User>, BoxError> {
        Ok(self.user.load_full().map(|user| (*user).clone()))
    }

    async fn save(&self, user: &User) -> Result<(), BoxError> {
        self.user.store(Some(user.clone().into()));
        Ok(())
    }

    async fn remove(&self) -> Result<(), BoxError> {
        self.user.store(None);
        Ok(())
    }
}
