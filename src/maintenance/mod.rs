//! One-shot maintenance jobs run from the command line.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    store::UserStore,
    web::auth::{hash_password_blocking, is_password_hash},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub hashed: usize,
    pub skipped: usize,
}

/// Hash every password that is not already stored as a one-way hash.
///
/// Records are upserted one at a time and the run stops at the first failure,
/// so an aborted run leaves the earlier records migrated. Rerunning is safe:
/// hashed records are never touched again.
pub async fn migrate_passwords(store: &dyn UserStore) -> Result<MigrationReport> {
    let users = store
        .list()
        .await
        .context("failed to load users for password migration")?;

    let mut report = MigrationReport::default();

    for mut user in users {
        if is_password_hash(&user.password) {
            info!(username = %user.username, "password already hashed, skipping");
            report.skipped += 1;
            continue;
        }

        if user.password.is_empty() {
            warn!(username = %user.username, "account has an empty password; hashing it anyway");
        }

        let plaintext = std::mem::take(&mut user.password);
        user.password = hash_password_blocking(plaintext)
            .await
            .with_context(|| format!("failed to hash password for `{}`", user.username))?;

        let username = user.username.clone();
        store
            .upsert(user)
            .await
            .with_context(|| format!("failed to save migrated password for `{username}`"))?;

        info!(%username, "password hashed");
        report.hashed += 1;
    }

    info!(
        hashed = report.hashed,
        skipped = report.skipped,
        "password migration finished"
    );
    Ok(report)
}
