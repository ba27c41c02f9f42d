// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{AuthMethod, JwksDocument, PublicJwk, SESSION_COOKIE},
    oauth::LinkedIdentityView,
    state::AppState,
};

pub mod health;
pub mod jwt;
pub mod oauth;
pub mod session;

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(health::root))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route(
            "/session",
            get(session::current_session).post(session::login),
        )
        .route("/logout", post(session::logout))
        .route("/jwt/publickey", get(jwt::public_keys))
        .route("/jwt/session", post(jwt::issue_token))
        .route("/oauth/github", get(oauth::begin))
        .route("/oauth/github/callback", get(oauth::callback))
        .route("/session/oauth", get(oauth::linked_identities))
        .route(
            "/session/oauth/github/repoaccess",
            get(oauth::repo_access),
        )
        .with_state(state);

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "session_cookie",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(SESSION_COOKIE))),
        );
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::root,
        health::liveness,
        health::readiness,
        session::login,
        session::current_session,
        session::logout,
        jwt::public_keys,
        jwt::issue_token,
        oauth::begin,
        oauth::callback,
        oauth::linked_identities,
        oauth::repo_access
    ),
    components(
        schemas(
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks,
            session::LoginRequest,
            session::SessionResponse,
            jwt::TokenResponse,
            oauth::RepoAccessResponse,
            AuthMethod,
            JwksDocument,
            PublicJwk,
            LinkedIdentityView
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Session", description = "Direct login and session lifecycle"),
        (name = "JWT", description = "Token minting and public verification keys"),
        (name = "OAuth", description = "GitHub login and repository access")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::testutil::{Harness, TEST_PASSWORD, TEST_USERNAME, TEST_USER_ID};
    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
            Request, Response, StatusCode,
        },
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn with_cookie(method: &str, uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn login_request(username: &str, password: &str) -> Request<Body> {
        Request::post("/session")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "username": username, "password": password }).to_string(),
            ))
            .unwrap()
    }

    /// `name=value` part of the response's Set-Cookie header.
    fn cookie_pair(response: &Response<Body>) -> String {
        let header = response.headers()[SET_COOKIE].to_str().unwrap();
        header.split(';').next().unwrap().to_string()
    }

    /// `name=value` of the Set-Cookie header for `name`.
    fn named_cookie(response: &Response<Body>, name: &str) -> String {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().split(';').next().unwrap().to_string())
            .find(|pair| pair.starts_with(&format!("{name}=")))
            .unwrap_or_else(|| panic!("no {name} cookie set"))
    }

    async fn logged_in(app: &Router) -> String {
        let response = send(app, login_request(TEST_USERNAME, TEST_PASSWORD)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        cookie_pair(&response)
    }

    #[tokio::test]
    async fn health_endpoints_report_ready() {
        let h = Harness::new();
        let app = router(h.app_state());

        for uri in ["/", "/health/live"] {
            assert_eq!(send(&app, get(uri)).await.status(), StatusCode::OK, "{uri}");
        }
        let ready = send(&app, get("/health/ready")).await;
        assert_eq!(ready.status(), StatusCode::OK);
        let body = json_body(ready).await;
        assert_eq!(body["checks"]["signing_key"], "ok");
        assert_eq!(body["checks"]["published_keys"], 1);
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let h = Harness::new();
        let app = router(h.app_state());
        let response = send(&app, get("/health/live")).await;
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn login_sets_a_hardened_cookie() {
        let h = Harness::new();
        let app = router(h.app_state());
        let response = send(&app, login_request(TEST_USERNAME, TEST_PASSWORD)).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let header = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        for attribute in ["HttpOnly", "Secure", "SameSite=Lax", "Path=/", "Max-Age=3600"] {
            assert!(header.contains(attribute), "{attribute} missing from {header}");
        }
        let body = json_body(response).await;
        assert_eq!(body["user_id"], TEST_USER_ID);
        assert_eq!(body["auth_method"], "session");
    }

    #[tokio::test]
    async fn wrong_password_looks_like_any_other_auth_failure() {
        let h = Harness::new();
        let app = router(h.app_state());

        let response = send(&app, login_request(TEST_USERNAME, "wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(SET_COOKIE).is_none());
        let wrong_password = json_body(response).await;

        let no_credentials = json_body(send(&app, get("/session")).await).await;
        assert_eq!(wrong_password, no_credentials);
        assert_eq!(wrong_password["error_code"], "unauthenticated");
    }

    #[tokio::test]
    async fn blank_login_is_a_bad_request() {
        let h = Harness::new();
        let app = router(h.app_state());
        let response = send(&app, login_request("  ", "x")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_mints_verifiable_jwt() {
        let h = Harness::new();
        let app = router(h.app_state());
        let cookie = logged_in(&app).await;

        let response = send(&app, with_cookie("POST", "/jwt/session?scope=repo:read&ttl_secs=120", &cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "no-store");
        let body = json_body(response).await;

        let claims: Claims = h.tokens.verify(body["token"].as_str().unwrap()).unwrap();
        assert_eq!(claims.sub, TEST_USER_ID);
        assert_eq!(claims.scope.as_deref(), Some("repo:read"));
        assert_eq!(claims.exp - claims.iat, 120);
        assert_eq!(body["key_id"], h.keys.active_key().unwrap().key_id());

        let jwks = json_body(send(&app, get("/jwt/publickey")).await).await;
        assert_eq!(jwks["keys"][0]["kid"], body["key_id"]);
    }

    #[tokio::test]
    async fn key_set_is_revalidated_and_lists_a_fresh_rotation() {
        let h = Harness::new();
        let app = router(h.app_state());
        let cookie = logged_in(&app).await;

        let rotated = h.keys.rotate().unwrap();
        let minted = json_body(send(&app, with_cookie("POST", "/jwt/session", &cookie)).await).await;
        assert_eq!(minted["key_id"], rotated.as_str());

        let response = send(&app, get("/jwt/publickey")).await;
        assert_eq!(response.headers()["cache-control"], "no-cache");
        let jwks = json_body(response).await;
        assert_eq!(jwks["keys"][0]["kid"], rotated.as_str());
    }

    #[tokio::test]
    async fn token_lifetime_is_bounded() {
        let h = Harness::new();
        let app = router(h.app_state());
        let cookie = logged_in(&app).await;

        for ttl in ["0", "301", "-5", "9223372036854775807"] {
            let uri = format!("/jwt/session?ttl_secs={ttl}");
            let response = send(&app, with_cookie("POST", &uri, &cookie)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{ttl}");
            assert_eq!(json_body(response).await["error_code"], "invalid_ttl");
        }
    }

    #[tokio::test]
    async fn bearer_token_cannot_mint_tokens_but_can_read_session() {
        let h = Harness::new();
        let app = router(h.app_state());
        let token = h
            .tokens
            .issue(&TEST_USER_ID.into(), None, chrono::Duration::seconds(60))
            .unwrap()
            .token;
        let bearer = |method: &str, uri: &str| {
            Request::builder()
                .method(method)
                .uri(uri)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap()
        };

        let minted = send(&app, bearer("POST", "/jwt/session")).await;
        assert_eq!(minted.status(), StatusCode::UNAUTHORIZED);

        let current = send(&app, bearer("GET", "/session")).await;
        assert_eq!(current.status(), StatusCode::OK);
        assert_eq!(json_body(current).await["auth_method"], "bearer");
    }

    #[tokio::test]
    async fn logout_invalidates_and_clears_cookie() {
        let h = Harness::new();
        let app = router(h.app_state());
        let cookie = logged_in(&app).await;

        let response = send(&app, with_cookie("POST", "/logout", &cookie)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cleared = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(cleared.contains("Max-Age=0"), "{cleared}");
        assert_eq!(h.store.session_count(), 0);

        let after = send(&app, with_cookie("GET", "/session", &cookie)).await;
        assert_eq!(after.status(), StatusCode::UNAUTHORIZED);

        // Idempotent, with or without a cookie
        let again = send(&app, with_cookie("POST", "/logout", &cookie)).await;
        assert_eq!(again.status(), StatusCode::NO_CONTENT);
        let bare = send(&app, Request::post("/logout").body(Body::empty()).unwrap()).await;
        assert_eq!(bare.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn logout_removes_an_expired_session() {
        let h = Harness::new();
        let app = router(h.app_state());
        let cookie = logged_in(&app).await;

        h.clock.advance(chrono::Duration::hours(2));
        let response = send(&app, with_cookie("POST", "/logout", &cookie)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(h.store.session_count(), 0);
    }

    fn state_of(location: &str) -> String {
        url::Url::parse(location)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    /// Start a GitHub login; returns the state nonce and the browser's
    /// state cookie.
    async fn begin_github(app: &Router, uri: &str) -> (String, String) {
        let begin = send(app, get(uri)).await;
        assert_eq!(begin.status(), StatusCode::SEE_OTHER);
        let location = begin.headers()[LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("https://provider.test/authorize"));

        let set_cookie = begin.headers()[SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        (state_of(&location), named_cookie(&begin, oauth::OAUTH_STATE_COOKIE))
    }

    #[tokio::test]
    async fn github_login_flow_ends_in_a_session() {
        let h = Harness::new();
        let app = router(h.app_state());

        let (nonce, state_cookie) = begin_github(&app, "/oauth/github?redirect=/dashboard").await;
        assert!(state_cookie.starts_with(&format!("{}={nonce}.", oauth::OAUTH_STATE_COOKIE)));

        let callback_uri = format!("/oauth/github/callback?state={nonce}&code=validcode");
        let callback = send(&app, with_cookie("GET", &callback_uri, &state_cookie)).await;
        assert_eq!(callback.status(), StatusCode::SEE_OTHER);
        assert_eq!(callback.headers()[LOCATION], "/dashboard");
        let cookie = named_cookie(&callback, SESSION_COOKIE);
        assert_eq!(named_cookie(&callback, oauth::OAUTH_STATE_COOKIE), "oauth_state=");

        let me = json_body(send(&app, with_cookie("GET", "/session", &cookie)).await).await;
        assert_eq!(me["user_id"], "42");

        let links = json_body(send(&app, with_cookie("GET", "/session/oauth", &cookie)).await).await;
        assert_eq!(links[0]["provider"], "github");
        assert_eq!(links[0]["provider_user_id"], "gh123");
        assert!(links[0].get("grant").is_none());

        let access = send(
            &app,
            with_cookie("GET", "/session/oauth/github/repoaccess?repo=octocat/writable", &cookie),
        )
        .await;
        assert_eq!(access.status(), StatusCode::OK);
        assert_eq!(json_body(access).await["allowed"], true);

        let bad_repo = send(
            &app,
            with_cookie("GET", "/session/oauth/github/repoaccess?repo=nope", &cookie),
        )
        .await;
        assert_eq!(bad_repo.status(), StatusCode::BAD_REQUEST);

        // Replay of the same callback
        let replay = send(&app, with_cookie("GET", &callback_uri, &state_cookie)).await;
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
        assert!(replay.headers().get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn callback_must_come_from_the_browser_that_began_the_login() {
        let h = Harness::new();
        let app = router(h.app_state());

        // An attacker starts a login and hands the victim its callback URL.
        let (attacker_nonce, _) = begin_github(&app, "/oauth/github").await;
        let (_, victim_cookie) = begin_github(&app, "/oauth/github").await;
        let callback_uri = format!("/oauth/github/callback?state={attacker_nonce}&code=validcode");

        let cookieless = send(&app, get(&callback_uri)).await;
        assert_eq!(cookieless.status(), StatusCode::UNAUTHORIZED);
        assert!(cookieless.headers().get(SET_COOKIE).is_none());
        assert_eq!(json_body(cookieless).await["error_code"], "unauthenticated");

        let other_browser = send(&app, with_cookie("GET", &callback_uri, &victim_cookie)).await;
        assert_eq!(other_browser.status(), StatusCode::UNAUTHORIZED);
        assert!(other_browser.headers().get(SET_COOKIE).is_none());

        let forged_cookie = format!("{}={attacker_nonce}.AAAA", oauth::OAUTH_STATE_COOKIE);
        let forged = send(&app, with_cookie("GET", &callback_uri, &forged_cookie)).await;
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(h.store.session_count(), 0);
    }

    #[tokio::test]
    async fn callback_without_state_or_with_provider_error_is_rejected() {
        let h = Harness::new();
        let app = router(h.app_state());

        let missing = send(&app, get("/oauth/github/callback?code=validcode")).await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let declined = send(&app, get("/oauth/github/callback?state=x&error=access_denied")).await;
        assert_eq!(declined.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn openapi_document_lists_every_route() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        for path in [
            "/session",
            "/logout",
            "/jwt/publickey",
            "/jwt/session",
            "/oauth/github",
            "/oauth/github/callback",
            "/session/oauth",
            "/session/oauth/github/repoaccess",
        ] {
            assert!(doc["paths"].get(path).is_some(), "{path}");
        }
        assert!(doc["components"]["securitySchemes"].get("session_cookie").is_some());
    }
}
