use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    models::{PublicUser, StoreSummary},
    web::{ApiRejection, AppState, auth::AuthError},
};

/// Password hashes never leave the server, whoever is asking.
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<PublicUser>>, ApiRejection> {
    let users = state.store().list().await?;
    Ok(Json(users.iter().map(PublicUser::from).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<PublicUser>, ApiRejection> {
    let record = state
        .store()
        .get(&username)
        .await?
        .ok_or(AuthError::NotFound)?;
    Ok(Json(record.to_public()))
}

pub async fn summary(State(state): State<AppState>) -> Result<Json<StoreSummary>, ApiRejection> {
    Ok(Json(state.store().summary().await?))
}
