//! Authentication middleware: bearer extraction, identity attachment and
//! route guards.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header::AUTHORIZATION, header::VARY},
    middleware::Next,
    response::Response,
};
use tokio_util::sync::CancellationToken;
use tracing::error;
use warden_core::auth::authorize::check_authenticated;
use warden_core::models::auth::User;
use warden_core::{AuthError, Identity, RequestContext, Requirement};

use crate::AppState;
use crate::error::AppError;

/// The bearer secret from `Authorization`, if the header is a bearer credential.
///
/// Any other shape counts as no credential.
pub fn bearer_credential(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// Axum middleware run on every route: resolves the bearer credential and
/// inserts a [`RequestContext`] carrying the identity into request extensions.
///
/// A presented but unknown or expired token fails the request here.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cancel = CancellationToken::new();
    // Dropping the request future cancels work derived from it.
    let _cancel_on_drop = cancel.clone().drop_guard();

    let identity = state
        .access
        .authenticate(bearer_credential(request.headers()), &cancel)
        .await?;
    if identity == Identity::Rejected {
        return Err(AuthError::TokenExpiredOrUnknown.into());
    }

    let mut ctx = RequestContext::with_cancellation(cancel);
    ctx.attach(identity)?;
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Authorization"));
    Ok(response)
}

/// State for [`enforce`]: the app plus what the guarded routes demand.
#[derive(Clone)]
pub struct Guard {
    pub state: AppState,
    pub requirement: Requirement,
}

impl Guard {
    pub fn authenticated(state: &AppState) -> Self {
        Self {
            state: state.clone(),
            requirement: Requirement::Authenticated,
        }
    }

    pub fn permission(state: &AppState, name: &str) -> Self {
        Self {
            state: state.clone(),
            requirement: Requirement::Permission(name.to_string()),
        }
    }
}

/// Axum middleware: rejects the request unless its identity meets the guard.
pub async fn enforce(
    State(guard): State<Guard>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = request_context(&request)?;
    guard
        .state
        .access
        .enforce(&guard.requirement, ctx.identity()?, ctx.cancellation())
        .await?;
    Ok(next.run(request).await)
}

fn request_context(request: &Request) -> Result<RequestContext, AppError> {
    request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .ok_or_else(|| {
            error!(uri = %request.uri(), "guard ran without the authentication middleware");
            AuthError::IdentityNotAttached.into()
        })
}

/// The activated user behind a guarded request.
pub fn current_user(ctx: &RequestContext) -> Result<&User, AppError> {
    Ok(check_authenticated(ctx.identity()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_credential(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_credential(&headers("bearer abc")), Some("abc"));
    }

    #[test]
    fn other_shapes_are_no_credential() {
        assert_eq!(bearer_credential(&HeaderMap::new()), None);
        assert_eq!(bearer_credential(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_credential(&headers("Bearer")), None);
    }
}
