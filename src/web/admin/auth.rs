use axum::http::{HeaderMap, StatusCode};

use crate::web::{
    ApiRejection, AppState,
    auth::{self, LoginOutcome},
    json_error,
};

/// Re-verify the request's Basic credentials and require the admin role.
pub async fn require_admin_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<LoginOutcome, ApiRejection> {
    let caller = auth::basic_user(state, headers).await?;

    if !caller.role.is_admin() {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "Administrator access is required.",
        ));
    }

    Ok(caller)
}

/// Allow the named member themselves or any admin.
pub async fn require_self_or_admin(
    state: &AppState,
    headers: &HeaderMap,
    username: &str,
) -> Result<LoginOutcome, ApiRejection> {
    let caller = auth::basic_user(state, headers).await?;

    if caller.role.is_admin() || caller.user.username == username {
        return Ok(caller);
    }

    Err(json_error(
        StatusCode::FORBIDDEN,
        "You may only modify your own account.",
    ))
}
