use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{fs, io::AsyncWriteExt, sync::RwLock};
use tracing::{debug, warn};

use super::{RecordEdit, StoreError, UserStore};
use crate::models::UserRecord;

/// On-disk layout shared with json-server: a `users` collection plus any
/// other collections the frontend keeps, which are carried through untouched.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Read and parse a store document without taking ownership of it.
///
/// A missing file is an empty document.
pub async fn read_document(path: &Path) -> Result<StoreDocument, StoreError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StoreDocument::default()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_slice(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// JSON document store held in memory and flushed whole on every write.
///
/// Flushes go through a sibling temp file that is renamed over the target,
/// so readers only ever observe a complete document.
pub struct JsonFileStore {
    path: PathBuf,
    document: RwLock<StoreDocument>,
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let document = read_document(&path).await?;

        ensure_unique(&document.users)?;
        debug!(path = %path.display(), users = document.users.len(), "loaded JSON store");

        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    async fn flush(&self, document: &StoreDocument) -> Result<(), StoreError> {
        let mut body = serde_json::to_vec_pretty(document)?;
        body.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| self.write_error(source))?;
        }

        let tmp_path = self.temp_path();
        let result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &self.path).await
        }
        .await;

        if let Err(source) = result {
            if let Err(err) = fs::remove_file(&tmp_path).await {
                if err.kind() != ErrorKind::NotFound {
                    warn!(?err, path = %tmp_path.display(), "failed to remove temp store file");
                }
            }
            return Err(self.write_error(source));
        }

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("db.json");
        self.path.with_file_name(format!(".{file_name}.tmp"))
    }

    fn write_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

fn ensure_unique(users: &[UserRecord]) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for record in users {
        if !seen.insert(record.username.as_str()) {
            return Err(StoreError::Duplicate(record.username.clone()));
        }
    }
    Ok(())
}

fn next_id(users: &[UserRecord]) -> u64 {
    users.iter().map(|user| user.id).max().unwrap_or(0) + 1
}

#[async_trait]
impl UserStore for JsonFileStore {
    async fn get(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let guard = self.document.read().await;
        Ok(guard
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn upsert(&self, mut record: UserRecord) -> Result<UserRecord, StoreError> {
        let mut guard = self.document.write().await;

        let existing = guard
            .users
            .iter()
            .position(|user| user.username == record.username);

        // The displaced record, restored if the flush fails.
        let previous = match existing {
            Some(index) => Some(std::mem::replace(&mut guard.users[index], record.clone())),
            None => {
                if record.id == 0 {
                    record.id = next_id(&guard.users);
                }
                guard.users.push(record.clone());
                None
            }
        };

        if let Err(err) = self.flush(&guard).await {
            match (existing, previous) {
                (Some(index), Some(previous)) => guard.users[index] = previous,
                _ => {
                    guard.users.pop();
                }
            }
            return Err(err);
        }
        Ok(record)
    }

    async fn insert(&self, mut record: UserRecord) -> Result<UserRecord, StoreError> {
        let mut guard = self.document.write().await;

        if guard
            .users
            .iter()
            .any(|user| user.username == record.username)
        {
            return Err(StoreError::Duplicate(record.username));
        }

        record.id = next_id(&guard.users);
        guard.users.push(record.clone());

        if let Err(err) = self.flush(&guard).await {
            guard.users.pop();
            return Err(err);
        }
        Ok(record)
    }

    async fn update(
        &self,
        username: &str,
        edit: RecordEdit,
    ) -> Result<Option<UserRecord>, StoreError> {
        let mut guard = self.document.write().await;

        let Some(index) = guard.users.iter().position(|user| user.username == username) else {
            return Ok(None);
        };

        let previous = guard.users[index].clone();
        edit(&mut guard.users[index]);
        // The username is the identity key and cannot be edited away.
        guard.users[index].username = previous.username.clone();
        let updated = guard.users[index].clone();

        if let Err(err) = self.flush(&guard).await {
            guard.users[index] = previous;
            return Err(err);
        }
        Ok(Some(updated))
    }

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        let guard = self.document.read().await;
        Ok(guard.users.clone())
    }
}
