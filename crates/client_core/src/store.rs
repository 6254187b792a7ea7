//! Remote collaborators consumed by the controllers, plus their SQLite-backed
//! implementations for offline use.

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{
        NewSimCard, NewTeam, NewUser, Record, SimCardId, SimCardRecord, TeamId, TeamRecord,
        UserId, UserRecord,
    },
    error::ApiException,
};
use storage::Storage;

/// A local file picked by the user, ready to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl LocalFile {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Extension taken from the filename, falling back to the MIME subtype.
    pub fn extension(&self) -> String {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| is_plain_extension(ext))
            .or_else(|| self.mime_type.split('/').nth(1).filter(|ext| is_plain_extension(ext)))
            .unwrap_or("bin")
            .to_ascii_lowercase()
    }
}

fn is_plain_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    async fn list(&self) -> Result<Vec<R>>;
    async fn create(&self, draft: R::Draft) -> Result<R>;
    async fn delete(&self, id: R::Id) -> Result<()>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Uploads `file` under `key` and returns a stable URL for it.
    async fn upload(&self, key: &str, file: &LocalFile) -> Result<String>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Message suitable for a notification: the remote error text when the
/// failure came from a store, the full error chain otherwise.
pub fn remote_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ApiException>() {
        Some(api) => api.message.clone(),
        None => format!("{err:#}"),
    }
}

fn missing(table: &str, id: impl std::fmt::Display) -> anyhow::Error {
    anyhow::Error::new(ApiException::not_found(format!(
        "no row with id {id} in {table}"
    )))
}

#[async_trait]
impl RecordStore<UserRecord> for Storage {
    async fn list(&self) -> Result<Vec<UserRecord>> {
        self.list_users().await
    }

    async fn create(&self, draft: NewUser) -> Result<UserRecord> {
        self.create_user(&draft).await
    }

    async fn delete(&self, id: UserId) -> Result<()> {
        if self.delete_user(id).await? {
            Ok(())
        } else {
            Err(missing(UserRecord::TABLE, id))
        }
    }
}

#[async_trait]
impl RecordStore<TeamRecord> for Storage {
    async fn list(&self) -> Result<Vec<TeamRecord>> {
        self.list_teams().await
    }

    async fn create(&self, draft: NewTeam) -> Result<TeamRecord> {
        self.create_team(&draft).await
    }

    async fn delete(&self, id: TeamId) -> Result<()> {
        if self.delete_team(id).await? {
            Ok(())
        } else {
            Err(missing(TeamRecord::TABLE, id))
        }
    }
}

#[async_trait]
impl RecordStore<SimCardRecord> for Storage {
    async fn list(&self) -> Result<Vec<SimCardRecord>> {
        self.list_sim_cards().await
    }

    async fn create(&self, draft: NewSimCard) -> Result<SimCardRecord> {
        self.create_sim_card(&draft).await
    }

    async fn delete(&self, id: SimCardId) -> Result<()> {
        if self.delete_sim_card(id).await? {
            Ok(())
        } else {
            Err(missing(SimCardRecord::TABLE, id))
        }
    }
}

#[async_trait]
impl ArtifactStore for Storage {
    async fn upload(&self, key: &str, file: &LocalFile) -> Result<String> {
        self.store_artifact(key, &file.bytes, Some(&file.mime_type))
            .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.remove_artifact(key).await?;
        Ok(())
    }
}
