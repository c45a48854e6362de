//! A user store backed by a local JSON file

use std::{io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};

use super::{BoxError, UserStore};
use crate::User;

/// A user store that keeps the signed-in user in a local file
///
/// The file holds tokens, so on Unix it is created readable by the owner only.
#[derive(Debug)]
pub struct FileUserStore {
    path: PathBuf,
}

impl FileUserStore {
    /// Constructs a new file user store
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_user(&self) -> Result<Option<User>, io::Error> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };

        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn write_user(&self, user: &User) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(user)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn remove_user(&self) -> Result<(), io::Error> {
        match fs::remove_file(&self.path).await {
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn load(&self) -> Result<Option<User>, BoxError> {
        Ok(self.read_user().await?)
    }

    async fn save(&self, user: &User) -> Result<(), BoxError> {
        tracing::trace!(path = %self.path.display(), "persisting user");
        Ok(self.write_user(user).await?)
    }

    async fn remove(&self) -> Result<(), BoxError> {
        tracing::debug!(path = %self.path.display(), "removing persisted user");
        Ok(self.remove_user().await?)
    }
}
