//! Credential store: the persisted collection of member accounts.
//!
//! Handlers and maintenance jobs only see the [`UserStore`] trait. The JSON
//! backend keeps the json-server `db.json` layout; the Postgres backend is
//! selected when `DATABASE_URL` is configured.

mod json;
mod postgres;

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::models::{StoreSummary, UserRecord};

pub use json::{JsonFileStore, read_document};
pub use postgres::PgUserStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read store at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write store at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("username `{0}` is already taken")]
    Duplicate(String),
}

/// In-place modification applied to a single record under the store's write lock.
pub type RecordEdit = Box<dyn FnOnce(&mut UserRecord) + Send>;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a record by its username.
    async fn get(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Replace the record with the same username, or add it when absent.
    /// A new record with id 0 is assigned the next free id.
    async fn upsert(&self, record: UserRecord) -> Result<UserRecord, StoreError>;

    /// Add a record whose username must not exist yet.
    async fn insert(&self, record: UserRecord) -> Result<UserRecord, StoreError>;

    /// Apply `edit` to the named record and persist it. Returns `None` when
    /// the username is unknown.
    async fn update(
        &self,
        username: &str,
        edit: RecordEdit,
    ) -> Result<Option<UserRecord>, StoreError>;

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError>;

    async fn summary(&self) -> Result<StoreSummary, StoreError> {
        let records = self.list().await?;
        Ok(StoreSummary::from_records(&records))
    }
}

/// Open the backend selected by configuration.
pub async fn open(
    database_url: Option<&str>,
    data_file: PathBuf,
) -> Result<Arc<dyn UserStore>, StoreError> {
    match database_url {
        Some(url) => {
            info!("using postgres credential store");
            Ok(Arc::new(PgUserStore::connect(url).await?))
        }
        None => {
            info!(path = %data_file.display(), "using JSON credential store");
            Ok(Arc::new(JsonFileStore::open(data_file).await?))
        }
    }
}
