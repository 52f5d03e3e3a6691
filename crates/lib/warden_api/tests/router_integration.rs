//! Integration tests: build the router over an in-memory store and drive it
//! with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use warden_api::{AppState, config::ApiConfig};
use warden_core::models::auth::UserId;
use warden_core::{AccessControl, AuthConfig, MemoryStore, NewAccount};

const PASSWORD: &str = "pa55word-long";

fn app() -> (Router, AppState) {
    let auth = AuthConfig {
        bcrypt_cost: 4,
        ..AuthConfig::default()
    };
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        pg_connection_url: String::new(),
        auth: auth.clone(),
    };
    let state = AppState {
        access: AccessControl::new(Arc::new(MemoryStore::new()), auth),
        config,
    };
    (warden_api::router(state.clone()), state)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let req = match body {
        Some(b) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.expect("request");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse JSON")
    };
    (status, headers, json)
}

/// Register, activate and log in directly through the core.
async fn signed_in(state: &AppState, email: &str, admin: bool) -> (UserId, String) {
    let cancel = CancellationToken::new();
    let reg = state
        .access
        .register(
            NewAccount {
                email: email.into(),
                password: PASSWORD.into(),
            },
            &cancel,
        )
        .await
        .unwrap();
    let user = state.access.activate(&reg.activation.secret, &cancel).await.unwrap();
    if admin {
        state.access.set_admin(user.id, true, &cancel).await.unwrap();
    }
    let token = state.access.login(email, PASSWORD, &cancel).await.unwrap();
    (user.id, token.secret)
}

#[tokio::test]
async fn healthcheck_is_public() {
    let (app, _) = app();
    let (status, _, json) = send(&app, Method::GET, "/v1/healthcheck", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "available");
}

#[tokio::test]
async fn register_activate_login_flow() {
    let (app, state) = app();
    let (_, admin) = signed_in(&state, "root@example.com", true).await;

    let (status, _, json) = send(
        &app,
        Method::POST,
        "/v1/users",
        None,
        Some(json!({"email": "alice@example.com", "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["user"]["is_activated"], false);
    assert!(json["user"].get("password_hash").is_none());
    assert!(json.get("activation").is_none());
    assert!(!json.to_string().contains("token"));
    let user_id = json["user"]["id"].as_i64().unwrap();

    // Logging in works before activation, but the account cannot act yet.
    let (status, _, json) = send(
        &app,
        Method::POST,
        "/v1/tokens/authentication",
        None,
        Some(json!({"email": "alice@example.com", "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let bearer = json["authentication_token"]["token"].as_str().unwrap().to_string();

    let (status, _, _) = send(&app, Method::GET, "/v1/users/me", Some(&bearer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Only an operator can mint the activation token.
    let activation_uri = format!("/v1/users/{user_id}/activation");
    let (status, _, _) = send(&app, Method::POST, &activation_uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = send(&app, Method::POST, &activation_uri, Some(&bearer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, json) = send(&app, Method::POST, &activation_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let activation = json["activation_token"]["token"].as_str().unwrap().to_string();

    let (status, _, json) = send(
        &app,
        Method::PUT,
        "/v1/users/activated",
        None,
        Some(json!({"token": activation})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["is_activated"], true);

    let (status, headers, json) =
        send(&app, Method::GET, "/v1/users/me", Some(&bearer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["email"], "alice@example.com");
    assert_eq!(headers[header::VARY], "Authorization");

    let (status, _, _) = send(&app, Method::POST, &activation_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let (app, _) = app();
    let body = json!({"email": "dup@example.com", "password": PASSWORD});
    let (status, _, _) = send(&app, Method::POST, "/v1/users", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _, json) = send(&app, Method::POST, "/v1/users", None, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "conflict");
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let (app, state) = app();
    signed_in(&state, "bob@example.com", false).await;

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/v1/tokens/authentication",
        None,
        Some(json!({"email": "bob@example.com", "password": "wrong-password"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_and_unknown_tokens_are_distinguished() {
    let (app, _) = app();

    let (status, headers, json) = send(&app, Method::GET, "/v1/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");
    assert!(headers.get(header::WWW_AUTHENTICATE).is_none());

    let never_issued = "AAAAAAAAAAAAAAAAAAAAAA";
    let (status, headers, json) =
        send(&app, Method::GET, "/v1/users/me", Some(never_issued), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "invalid_token");
    assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
}

#[tokio::test]
async fn plain_user_cannot_edit_the_catalogue() {
    let (app, state) = app();
    let (_, token) = signed_in(&state, "carol@example.com", false).await;

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/v1/permissions",
        Some(&token),
        Some(json!({"name": "posts.write"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn grant_and_revoke_through_the_api() {
    let (app, state) = app();
    let (_, admin) = signed_in(&state, "root@example.com", true).await;
    let (user_id, user_token) = signed_in(&state, "dave@example.com", false).await;

    let (status, _, perm) = send(
        &app,
        Method::POST,
        "/v1/permissions",
        Some(&admin),
        Some(json!({"name": warden_api::USERS_READ})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let perm_id = perm["id"].as_i64().unwrap();

    let access_uri = format!("/v1/users/{user_id}/access");
    let (status, _, _) = send(&app, Method::GET, &access_uri, Some(&user_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let grant_uri = format!("/v1/users/{user_id}/permissions/{perm_id}/grant");
    let (status, _, json) = send(&app, Method::PUT, &grant_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["granted"][0]["name"], warden_api::USERS_READ);

    let (status, _, json) = send(&app, Method::GET, &access_uri, Some(&user_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["effective"], json!([warden_api::USERS_READ]));

    let revoke_uri = format!("/v1/users/{user_id}/permissions/{perm_id}/revoke");
    let (status, _, json) = send(&app, Method::PUT, &revoke_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["granted"], json!([]));

    let (status, _, _) = send(&app, Method::GET, &access_uri, Some(&user_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn roles_carry_permissions_and_revocation_wins() {
    let (app, state) = app();
    let (_, admin) = signed_in(&state, "root@example.com", true).await;
    let (user_id, _) = signed_in(&state, "erin@example.com", false).await;

    let (_, _, perm) = send(
        &app,
        Method::POST,
        "/v1/permissions",
        Some(&admin),
        Some(json!({"name": "posts.write"})),
    )
    .await;
    let perm_id = perm["id"].as_i64().unwrap();

    let (status, _, role) = send(
        &app,
        Method::POST,
        "/v1/roles",
        Some(&admin),
        Some(json!({"name": "editor", "permission_ids": [perm_id]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_i64().unwrap();

    let (status, _, json) = send(
        &app,
        Method::PUT,
        &format!("/v1/users/{user_id}/roles"),
        Some(&admin),
        Some(json!({"role_ids": [role_id]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["roles"][0]["name"], "editor");

    let explain_uri = format!("/v1/users/{user_id}/access/posts.write");
    let (_, _, json) = send(&app, Method::GET, &explain_uri, Some(&admin), None).await;
    assert_eq!(json["granted"], true);
    assert_eq!(json["source"], json!({"kind": "role", "role": "editor"}));

    send(
        &app,
        Method::PUT,
        &format!("/v1/users/{user_id}/permissions/{perm_id}/revoke"),
        Some(&admin),
        None,
    )
    .await;
    let (_, _, json) = send(&app, Method::GET, &explain_uri, Some(&admin), None).await;
    assert_eq!(json["granted"], false);
    assert_eq!(json["source"], json!({"kind": "revoked"}));

    let (status, _, json) = send(
        &app,
        Method::DELETE,
        &format!("/v1/users/{user_id}/roles/{role_id}"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["roles"], json!([]));
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let (app, state) = app();
    let (_, admin) = signed_in(&state, "root@example.com", true).await;
    let (status, _, _) = send(&app, Method::GET, "/v1/users/999/access", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn password_change_revokes_sessions() {
    let (app, state) = app();
    let (_, token) = signed_in(&state, "frank@example.com", false).await;

    let (status, _, _) = send(
        &app,
        Method::PUT,
        "/v1/users/me/password",
        Some(&token),
        Some(json!({"password": "another-long-one"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, Method::GET, "/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn operators_list_read_and_edit_users() {
    let (app, state) = app();
    let (_, admin) = signed_in(&state, "root@example.com", true).await;
    let (user_id, user_token) = signed_in(&state, "gus@example.com", false).await;
    signed_in(&state, "hal@example.com", false).await;

    let (status, _, _) = send(&app, Method::GET, "/v1/users", Some(&user_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, json) =
        send(&app, Method::GET, "/v1/users?page=1&limit=2", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["users"].as_array().unwrap().len(), 2);
    assert_eq!(json["metadata"]["total_records"], 3);
    assert_eq!(json["metadata"]["last_page"], 2);

    let (status, _, json) =
        send(&app, Method::GET, "/v1/users?limit=1000", Some(&admin), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "validation_error");

    let user_uri = format!("/v1/users/{user_id}");
    let (status, _, json) = send(&app, Method::GET, &user_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["email"], "gus@example.com");

    let (status, _, _) = send(
        &app,
        Method::PATCH,
        &user_uri,
        Some(&user_token),
        Some(json!({"email": "sneaky@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, json) = send(
        &app,
        Method::PATCH,
        &user_uri,
        Some(&admin),
        Some(json!({"email": "gus2@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["email"], "gus2@example.com");

    let (status, _, _) = send(
        &app,
        Method::PATCH,
        &user_uri,
        Some(&admin),
        Some(json!({"email": "hal@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn users_edit_their_own_profile() {
    let (app, state) = app();
    let (_, token) = signed_in(&state, "ivan@example.com", false).await;

    let (status, _, json) = send(
        &app,
        Method::PATCH,
        "/v1/users/me",
        Some(&token),
        Some(json!({"email": "ivan.new@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["email"], "ivan.new@example.com");

    let (status, _, _) = send(
        &app,
        Method::PATCH,
        "/v1/users/me",
        Some(&token),
        Some(json!({"password": "short"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _, _) = send(
        &app,
        Method::PATCH,
        "/v1/users/me",
        None,
        Some(json!({"email": "anon@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn permissions_are_listed_read_and_renamed() {
    let (app, state) = app();
    let (_, admin) = signed_in(&state, "root@example.com", true).await;
    let (_, user_token) = signed_in(&state, "jo@example.com", false).await;

    let (_, _, perm) = send(
        &app,
        Method::POST,
        "/v1/permissions",
        Some(&admin),
        Some(json!({"name": "posts.edit"})),
    )
    .await;
    let perm_uri = format!("/v1/permissions/{}", perm["id"]);

    let (status, _, json) = send(&app, Method::GET, "/v1/permissions", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["permissions"][0]["name"], "posts.edit");
    assert_eq!(json["metadata"]["total_records"], 1);

    let (status, _, _) = send(
        &app,
        Method::PATCH,
        &perm_uri,
        Some(&user_token),
        Some(json!({"name": "posts.write"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, json) = send(
        &app,
        Method::PATCH,
        &perm_uri,
        Some(&admin),
        Some(json!({"name": "posts.write"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "posts.write");

    let (status, _, json) = send(&app, Method::GET, &perm_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "posts.write");

    let (status, _, _) =
        send(&app, Method::GET, "/v1/permissions/999", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
