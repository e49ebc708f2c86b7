use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    #[serde(other)]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Reference to a certificate PDF issued to a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRef {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEntry {
    pub certificate: String,
    pub downloaded_at: DateTime<Utc>,
}

/// A stored member account, including its password hash.
///
/// Every field other than `username` and `password` defaults when absent so
/// that documents written by older versions of the app load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: u64,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub certificates: Vec<CertificateRef>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub download_history: Vec<DownloadEntry>,
    #[serde(default)]
    pub profile_image: Option<String>,
}

impl UserRecord {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>, role: Role) -> Self {
        Self {
            id: 0,
            username: username.into(),
            password: password_hash.into(),
            role,
            full_name: String::new(),
            email: String::new(),
            certificates: Vec::new(),
            downloads: 0,
            download_history: Vec::new(),
            profile_image: None,
        }
    }

    pub fn to_public(&self) -> PublicUser {
        PublicUser::from(self)
    }
}

/// The shape of a user that is allowed to leave the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: u64,
    pub username: String,
    pub role: Role,
    pub full_name: String,
    pub email: String,
    pub certificates: Vec<CertificateRef>,
    pub downloads: u64,
    pub download_history: Vec<DownloadEntry>,
    pub profile_image: Option<String>,
}

impl From<&UserRecord> for PublicUser {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id,
            username: record.username.clone(),
            role: record.role,
            full_name: record.full_name.clone(),
            email: record.email.clone(),
            certificates: record.certificates.clone(),
            downloads: record.downloads,
            download_history: record.download_history.clone(),
            profile_image: record.profile_image.clone(),
        }
    }
}

/// Counts reported to the status indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub user_count: usize,
    pub last_user: Option<String>,
}

impl StoreSummary {
    /// `last_user` is the most recently registered account, i.e. the highest id.
    pub fn from_records(records: &[UserRecord]) -> Self {
        let last_user = records
            .iter()
            .max_by_key(|record| record.id)
            .map(|record| record.username.clone());

        Self {
            user_count: records.len(),
            last_user,
        }
    }
}

// json-server writes ids either as numbers or as numeric strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(value) => Ok(value),
        RawId::Text(value) => value.trim().parse().map_err(serde::de::Error::custom),
    }
}
