//! Account request handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use warden_core::models::auth::{IssuedToken, User, UserId};
use warden_core::{AccessSummary, NewAccount, Page, PageMetadata, RequestContext, UserUpdate};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::current_user;

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminFlagRequest {
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<User>,
    pub metadata: PageMetadata,
}

#[derive(Debug, Serialize)]
pub struct ActivationResponse {
    pub activation_token: IssuedToken,
}

/// `POST /v1/users`: create an inactive account.
///
/// The activation token never goes back to the registrant. An operator
/// fetches one through [`reissue_activation_handler`] and delivers it.
pub async fn register_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<NewAccount>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let registration = state.access.register(body, ctx.cancellation()).await?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            user: registration.user,
        }),
    ))
}

/// `POST /v1/users/{id}/activation`: issue a fresh activation token for an
/// inactive account, replacing any earlier one.
pub async fn reissue_activation_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<UserId>,
) -> AppResult<(StatusCode, Json<ActivationResponse>)> {
    let token = state.access.reissue_activation(id, ctx.cancellation()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ActivationResponse {
            activation_token: token,
        }),
    ))
}

/// `PUT /v1/users/activated`: spend an activation token.
pub async fn activate_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<ActivateRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = state.access.activate(&body.token, ctx.cancellation()).await?;
    Ok(Json(UserResponse { user }))
}

/// `GET /v1/users/me`
pub async fn me_handler(Extension(ctx): Extension<RequestContext>) -> AppResult<Json<UserResponse>> {
    let user = current_user(&ctx)?.clone();
    Ok(Json(UserResponse { user }))
}

/// `GET /v1/users/me/access`: the caller's own roles and permissions.
pub async fn my_access_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> AppResult<Json<AccessSummary>> {
    let id = current_user(&ctx)?.id;
    let summary = state.access.access_summary(id, ctx.cancellation()).await?;
    Ok(Json(summary))
}

/// `PATCH /v1/users/me`: edit the caller's own email and/or password.
pub async fn update_profile_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<UserUpdate>,
) -> AppResult<Json<UserResponse>> {
    let id = current_user(&ctx)?.id;
    let user = state.access.update_user(id, body, ctx.cancellation()).await?;
    Ok(Json(UserResponse { user }))
}

/// `PUT /v1/users/me/password`: change password and revoke existing sessions.
pub async fn change_password_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<PasswordRequest>,
) -> AppResult<Json<UserResponse>> {
    let id = current_user(&ctx)?.id;
    let user = state
        .access
        .change_password(id, &body.password, ctx.cancellation())
        .await?;
    Ok(Json(UserResponse { user }))
}

/// `GET /v1/users?page=&limit=`
pub async fn list_users_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(page): Query<Page>,
) -> AppResult<Json<UsersResponse>> {
    let listing = state.access.list_users(page, ctx.cancellation()).await?;
    Ok(Json(UsersResponse {
        users: listing.items,
        metadata: listing.metadata,
    }))
}

/// `GET /v1/users/{id}`
pub async fn get_user_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<UserId>,
) -> AppResult<Json<UserResponse>> {
    let user = state.access.user(id, ctx.cancellation()).await?;
    Ok(Json(UserResponse { user }))
}

/// `PATCH /v1/users/{id}`: operator edit of email and/or password.
pub async fn update_user_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<UserId>,
    Json(body): Json<UserUpdate>,
) -> AppResult<Json<UserResponse>> {
    let user = state.access.update_user(id, body, ctx.cancellation()).await?;
    Ok(Json(UserResponse { user }))
}

/// `DELETE /v1/users/{id}`
pub async fn delete_user_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<UserId>,
) -> AppResult<StatusCode> {
    state.access.delete_user(id, ctx.cancellation()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /v1/users/{id}/admin`
pub async fn set_admin_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<UserId>,
    Json(body): Json<AdminFlagRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = state
        .access
        .set_admin(id, body.is_admin, ctx.cancellation())
        .await?;
    Ok(Json(UserResponse { user }))
}
