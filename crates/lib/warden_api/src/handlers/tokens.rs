//! Token request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use warden_core::RequestContext;
use warden_core::models::auth::IssuedToken;

use crate::AppState;
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub authentication_token: IssuedToken,
}

/// `POST /v1/tokens/authentication`: exchange email + password for a bearer token.
pub async fn login_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<LoginRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let token = state
        .access
        .login(&body.email, &body.password, ctx.cancellation())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            authentication_token: token,
        }),
    ))
}
