//! Role, permission and override handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use warden_core::models::auth::{Permission, PermissionId, Role, RoleId, UserId};
use warden_core::permissions::{Decision, PermissionOverrides};
use warden_core::{AccessSummary, Page, PageMetadata, RequestContext};

use crate::AppState;
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct PermissionNameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub permission_ids: Vec<PermissionId>,
}

#[derive(Debug, Deserialize)]
pub struct RoleIdsRequest {
    pub role_ids: Vec<RoleId>,
}

#[derive(Debug, Serialize)]
pub struct RolesResponse {
    pub roles: Vec<Role>,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub permissions: Vec<Permission>,
    pub metadata: PageMetadata,
}

/// `POST /v1/permissions`
pub async fn create_permission_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<PermissionNameRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    let permission = state
        .access
        .create_permission(&body.name, ctx.cancellation())
        .await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

/// `GET /v1/permissions?page=&limit=`
pub async fn list_permissions_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(page): Query<Page>,
) -> AppResult<Json<PermissionsResponse>> {
    let listing = state.access.list_permissions(page, ctx.cancellation()).await?;
    Ok(Json(PermissionsResponse {
        permissions: listing.items,
        metadata: listing.metadata,
    }))
}

/// `GET /v1/permissions/{id}`
pub async fn get_permission_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<PermissionId>,
) -> AppResult<Json<Permission>> {
    Ok(Json(state.access.permission(id, ctx.cancellation()).await?))
}

/// `PATCH /v1/permissions/{id}`: rename.
pub async fn rename_permission_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<PermissionId>,
    Json(body): Json<PermissionNameRequest>,
) -> AppResult<Json<Permission>> {
    let permission = state
        .access
        .rename_permission(id, &body.name, ctx.cancellation())
        .await?;
    Ok(Json(permission))
}

/// `DELETE /v1/permissions/{id}`
pub async fn delete_permission_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<PermissionId>,
) -> AppResult<StatusCode> {
    state.access.delete_permission(id, ctx.cancellation()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/roles`
pub async fn create_role_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreateRoleRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let role = state
        .access
        .create_role(&body.name, &body.permission_ids, ctx.cancellation())
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// `GET /v1/roles/{id}`
pub async fn get_role_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<RoleId>,
) -> AppResult<Json<Role>> {
    Ok(Json(state.access.role(id, ctx.cancellation()).await?))
}

/// `DELETE /v1/roles/{id}`
pub async fn delete_role_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<RoleId>,
) -> AppResult<StatusCode> {
    state.access.delete_role(id, ctx.cancellation()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /v1/users/{id}/roles`: add the listed roles to the user.
pub async fn assign_roles_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(user): Path<UserId>,
    Json(body): Json<RoleIdsRequest>,
) -> AppResult<Json<RolesResponse>> {
    let roles = state
        .access
        .assign_roles(user, &body.role_ids, ctx.cancellation())
        .await?;
    Ok(Json(RolesResponse { roles }))
}

/// `DELETE /v1/users/{id}/roles/{role_id}`
pub async fn unassign_role_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((user, role)): Path<(UserId, RoleId)>,
) -> AppResult<Json<RolesResponse>> {
    let roles = state
        .access
        .unassign_roles(user, &[role], ctx.cancellation())
        .await?;
    Ok(Json(RolesResponse { roles }))
}

/// `PUT /v1/users/{id}/permissions/{permission_id}/grant`
pub async fn grant_permission_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((user, permission)): Path<(UserId, PermissionId)>,
) -> AppResult<Json<PermissionOverrides>> {
    let overrides = state
        .access
        .grant_permission(user, permission, ctx.cancellation())
        .await?;
    Ok(Json(overrides))
}

/// `PUT /v1/users/{id}/permissions/{permission_id}/revoke`
pub async fn revoke_permission_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((user, permission)): Path<(UserId, PermissionId)>,
) -> AppResult<Json<PermissionOverrides>> {
    let overrides = state
        .access
        .revoke_permission(user, permission, ctx.cancellation())
        .await?;
    Ok(Json(overrides))
}

/// `GET /v1/users/{id}/access`
pub async fn access_summary_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(user): Path<UserId>,
) -> AppResult<Json<AccessSummary>> {
    Ok(Json(state.access.access_summary(user, ctx.cancellation()).await?))
}

/// `GET /v1/users/{id}/access/{permission}`: why the user does or does not hold it.
pub async fn explain_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((user, permission)): Path<(UserId, String)>,
) -> AppResult<Json<Decision>> {
    // Unknown users would otherwise explain as `missing`.
    state.access.user(user, ctx.cancellation()).await?;
    let decision = state
        .access
        .explain(user, &permission, ctx.cancellation())
        .await?;
    Ok(Json(decision))
}
