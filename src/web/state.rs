use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    models::{Role, UserRecord},
    store::{self, UserStore},
    web::{auth, uploads::UploadSettings},
};

const SEED_ADMIN_USERNAME: &str = "admin";

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn UserStore>,
    uploads: UploadSettings,
}

impl AppState {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let store = store::open(config.database_url.as_deref(), config.data_file.clone())
            .await
            .context("failed to open credential store")?;

        Ok(Self::with_store(
            store,
            UploadSettings {
                dir: config.upload_dir.clone(),
                max_bytes: config.max_upload_bytes,
            },
        ))
    }

    pub fn with_store(store: Arc<dyn UserStore>, uploads: UploadSettings) -> Self {
        Self { store, uploads }
    }

    /// Make sure at least one administrator can log in.
    pub async fn ensure_seed_admin(&self, password: &str) -> Result<()> {
        let users = self
            .store
            .list()
            .await
            .context("failed to verify admin presence")?;

        if users.iter().any(|user| user.role.is_admin()) {
            return Ok(());
        }

        if users.iter().any(|user| user.username == SEED_ADMIN_USERNAME) {
            warn!(
                "no administrator exists and the username '{SEED_ADMIN_USERNAME}' is taken by a member; skipping admin seed"
            );
            return Ok(());
        }

        let password_hash = auth::hash_password_blocking(password.to_string())
            .await
            .context("failed to hash seed admin password")?;

        let mut admin = UserRecord::new(SEED_ADMIN_USERNAME, password_hash, Role::Admin);
        admin.full_name = "Administrator".to_string();
        self.store
            .insert(admin)
            .await
            .context("failed to insert seed admin user")?;

        info!(
            "Seeded default admin user '{SEED_ADMIN_USERNAME}'. Change its password promptly."
        );
        Ok(())
    }

    pub fn store(&self) -> &dyn UserStore {
        self.store.as_ref()
    }

    pub fn upload_settings(&self) -> &UploadSettings {
        &self.uploads
    }
}
