use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    models::{PublicUser, Role, UserRecord},
    store::{StoreError, UserStore},
    web::{ApiJson, ApiRejection, AppState},
};

const LEGACY_BCRYPT_PREFIXES: &[&str] = &["$2a$", "$2b$", "$2y$"];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user not found")]
    NotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("username `{0}` is already registered")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
}

/// Session payload returned on a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub user: PublicUser,
    pub role: Role,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<LoginOutcome>, ApiRejection> {
    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return Err(AuthError::Invalid("username and password are required".to_string()).into());
    }

    let outcome = authenticate(state.store(), username, &request.password).await?;
    info!(username = %outcome.user.username, role = outcome.role.as_str(), "login succeeded");
    Ok(Json(outcome))
}

pub async fn register_user(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), ApiRejection> {
    let user = register(state.store(), request).await?;
    info!(username = %user.username, "registered new member");
    Ok((StatusCode::CREATED, Json(user)))
}

/// Verify a username/password pair against the credential store.
pub async fn authenticate(
    store: &dyn UserStore,
    username: &str,
    password: &str,
) -> Result<LoginOutcome, AuthError> {
    let record = store
        .get(username.trim())
        .await?
        .ok_or(AuthError::NotFound)?;

    let stored = record.password.clone();
    let supplied = password.to_string();
    let matches = tokio::task::spawn_blocking(move || verify_password(&supplied, &stored))
        .await
        .map_err(|err| AuthError::Hash(err.to_string()))?;

    if !matches {
        return Err(AuthError::InvalidCredentials);
    }

    Ok(LoginOutcome {
        user: record.to_public(),
        role: record.role,
    })
}

/// Create a `user`-role account with a freshly hashed password.
pub async fn register(
    store: &dyn UserStore,
    request: RegisterRequest,
) -> Result<PublicUser, AuthError> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(AuthError::Invalid("username is required".to_string()));
    }
    if request.password.trim().is_empty() {
        return Err(AuthError::Invalid("password is required".to_string()));
    }

    let password_hash = hash_password_blocking(request.password).await?;

    let mut record = UserRecord::new(username, password_hash, Role::User);
    record.full_name = request.full_name.trim().to_string();
    record.email = request.email.trim().to_string();

    match store.insert(record).await {
        Ok(saved) => Ok(saved.to_public()),
        Err(StoreError::Duplicate(name)) => Err(AuthError::Conflict(name)),
        Err(err) => Err(err.into()),
    }
}

/// Replace a member's password with a fresh hash.
pub async fn set_password(
    store: &dyn UserStore,
    username: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    if new_password.trim().is_empty() {
        return Err(AuthError::Invalid("password is required".to_string()));
    }

    let password_hash = hash_password_blocking(new_password.to_string()).await?;
    store
        .update(
            username,
            Box::new(move |record| record.password = password_hash),
        )
        .await?
        .ok_or(AuthError::NotFound)?;

    Ok(())
}

/// Authenticate the `Authorization: Basic` credentials carried by a request.
pub async fn basic_user(state: &AppState, headers: &HeaderMap) -> Result<LoginOutcome, AuthError> {
    let (username, password) =
        parse_basic_credentials(headers).ok_or(AuthError::InvalidCredentials)?;

    match authenticate(state.store(), &username, &password).await {
        Err(AuthError::NotFound) => Err(AuthError::InvalidCredentials),
        other => other,
    }
}

pub fn parse_basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub async fn hash_password_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| AuthError::Hash(err.to_string()))?
        .map_err(|err| AuthError::Hash(err.to_string()))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    if is_legacy_bcrypt(password_hash) {
        warn!("account still holds a legacy bcrypt hash; reset its password");
        return false;
    }

    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

/// Whether a stored password value is already a one-way hash.
pub fn is_password_hash(value: &str) -> bool {
    if is_legacy_bcrypt(value) {
        return true;
    }

    value.starts_with("$argon2")
        && PasswordHash::new(value)
            .map(|hash| hash.hash.is_some())
            .unwrap_or(false)
}

fn is_legacy_bcrypt(value: &str) -> bool {
    LEGACY_BCRYPT_PREFIXES
        .iter()
        .any(|prefix| value.starts_with(prefix))
}
