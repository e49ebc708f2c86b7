use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::{
    models::{CertificateRef, DownloadEntry, PublicUser},
    web::{
        ApiJson, ApiRejection, AppState,
        auth::{self, AuthError},
        json_error,
    },
};

use super::auth::{require_admin_user, require_self_or_admin};

#[derive(Deserialize)]
pub struct UpdatePasswordRequest {
    password: String,
}

#[derive(Deserialize)]
pub struct CertificateRequest {
    title: String,
    url: String,
}

#[derive(Deserialize)]
pub struct DownloadRequest {
    certificate: String,
}

pub async fn update_user_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    ApiJson(request): ApiJson<UpdatePasswordRequest>,
) -> Result<StatusCode, ApiRejection> {
    let admin = require_admin_user(&state, &headers).await?;

    auth::set_password(state.store(), &username, &request.password).await?;

    info!(
        admin = %admin.user.username,
        %username,
        "password reset by administrator"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_certificate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    ApiJson(request): ApiJson<CertificateRequest>,
) -> Result<Json<PublicUser>, ApiRejection> {
    let admin = require_admin_user(&state, &headers).await?;

    let title = request.title.trim().to_string();
    let url = request.url.trim().to_string();
    if title.is_empty() || url.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Certificate title and url are required.",
        ));
    }

    let certificate = CertificateRef {
        title,
        url,
        issued_at: Some(Utc::now()),
    };
    let updated = state
        .store()
        .update(
            &username,
            Box::new(move |record| record.certificates.push(certificate)),
        )
        .await?
        .ok_or(AuthError::NotFound)?;

    info!(
        admin = %admin.user.username,
        %username,
        certificates = updated.certificates.len(),
        "certificate attached"
    );
    Ok(Json(updated.to_public()))
}

pub async fn record_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    ApiJson(request): ApiJson<DownloadRequest>,
) -> Result<Json<PublicUser>, ApiRejection> {
    require_self_or_admin(&state, &headers, &username).await?;

    let certificate = request.certificate.trim().to_string();
    if certificate.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Certificate reference is required.",
        ));
    }

    let entry = DownloadEntry {
        certificate,
        downloaded_at: Utc::now(),
    };
    let updated = state
        .store()
        .update(
            &username,
            Box::new(move |record| {
                record.downloads += 1;
                record.download_history.push(entry);
            }),
        )
        .await?
        .ok_or(AuthError::NotFound)?;

    Ok(Json(updated.to_public()))
}
