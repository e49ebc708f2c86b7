use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};

use super::{RecordEdit, StoreError, UserStore};
use crate::models::{CertificateRef, DownloadEntry, Role, UserRecord};

const USER_COLUMNS: &str = "id, username, password, role, full_name, email, certificates, downloads, download_history, profile_image";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    password: String,
    role: String,
    full_name: String,
    email: String,
    certificates: Json<Vec<CertificateRef>>,
    downloads: i64,
    download_history: Json<Vec<DownloadEntry>>,
    profile_image: Option<String>,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id.max(0) as u64,
            username: row.username,
            password: row.password,
            role: Role::parse(&row.role),
            full_name: row.full_name,
            email: row.email,
            certificates: row.certificates.0,
            downloads: row.downloads.max(0) as u64,
            download_history: row.download_history.0,
            profile_image: row.profile_image,
        }
    }
}

/// Credential store backed by the `users` table.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRecord::from))
    }

    async fn upsert(&self, record: UserRecord) -> Result<UserRecord, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (username, password, role, full_name, email, certificates, downloads, download_history, profile_image)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (username) DO UPDATE SET
                password = EXCLUDED.password,
                role = EXCLUDED.role,
                full_name = EXCLUDED.full_name,
                email = EXCLUDED.email,
                certificates = EXCLUDED.certificates,
                downloads = EXCLUDED.downloads,
                download_history = EXCLUDED.download_history,
                profile_image = EXCLUDED.profile_image,
                updated_at = NOW()
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&record.username)
        .bind(&record.password)
        .bind(record.role.as_str())
        .bind(&record.full_name)
        .bind(&record.email)
        .bind(Json(&record.certificates))
        .bind(record.downloads as i64)
        .bind(Json(&record.download_history))
        .bind(&record.profile_image)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn insert(&self, record: UserRecord) -> Result<UserRecord, StoreError> {
        let result = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (username, password, role, full_name, email, certificates, downloads, download_history, profile_image)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&record.username)
        .bind(&record.password)
        .bind(record.role.as_str())
        .bind(&record.full_name)
        .bind(&record.email)
        .bind(Json(&record.certificates))
        .bind(record.downloads as i64)
        .bind(Json(&record.download_history))
        .bind(&record.profile_image)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.into()),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(StoreError::Duplicate(record.username))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update(
        &self,
        username: &str,
        edit: RecordEdit,
    ) -> Result<Option<UserRecord>, StoreError> {
        let mut transaction = self.pool.begin().await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 FOR UPDATE"
        ))
        .bind(username)
        .fetch_optional(&mut *transaction)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = UserRecord::from(row);
        edit(&mut record);

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET
                password = $2,
                role = $3,
                full_name = $4,
                email = $5,
                certificates = $6,
                downloads = $7,
                download_history = $8,
                profile_image = $9,
                updated_at = NOW()
             WHERE username = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(&record.password)
        .bind(record.role.as_str())
        .bind(&record.full_name)
        .bind(&record.email)
        .bind(Json(&record.certificates))
        .bind(record.downloads as i64)
        .bind(Json(&record.download_history))
        .bind(&record.profile_image)
        .fetch_one(&mut *transaction)
        .await?;

        transaction.commit().await?;

        Ok(Some(row.into()))
    }

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserRecord::from).collect())
    }
}
