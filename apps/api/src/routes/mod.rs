pub mod health;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Router,
};

use crate::auth::handlers as auth;
use crate::billing::handlers as billing;
use crate::clients::handlers as clients;
use crate::media::handlers as media;
use crate::notifications::handlers as notifications;
use crate::referrals::handlers as referrals;
use crate::state::AppState;

/// Bare OPTIONS requests get an empty 200; CORS preflights are answered by the CORS layer.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/plans", get(billing::handle_list_plans))
        .route("/api/auth", post(auth::handle_auth).options(preflight))
        .route(
            "/api/subscriptions",
            get(billing::handle_get_subscription)
                .post(billing::handle_post_subscription)
                .options(preflight),
        )
        .route(
            "/api/referrals",
            get(referrals::handle_get_referrals)
                .post(referrals::handle_post_referral)
                .options(preflight),
        )
        .route(
            "/api/client-profiles",
            get(clients::handle_get_profiles)
                .post(clients::handle_upsert_profile)
                .options(preflight),
        )
        .route(
            "/api/notifications",
            get(notifications::handle_get_notifications).options(preflight),
        )
        .route(
            "/api/fetch-media",
            post(media::handle_fetch_media).options(preflight),
        )
        .route(
            "/api/media-proxy",
            get(media::handle_media_proxy).options(preflight),
        )
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request},
        response::Response,
    };
    use serde_json::{json, Value};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use crate::config::{AuthConfig, Config, DropboxConfig, DEFAULT_MAGIC_LINK_TTL_MINUTES};

    pub(crate) fn test_config(secret: Option<&str>) -> Config {
        Config {
            database_url: "postgres://localhost/estate_media_test".to_string(),
            port: 0,
            rust_log: "info".to_string(),
            app_env: "test".to_string(),
            app_url: "http://localhost:3000".to_string(),
            auth: AuthConfig {
                secret: secret.map(str::to_string),
                allowed_emails: Vec::new(),
                auto_signup: false,
                magic_link_ttl_minutes: DEFAULT_MAGIC_LINK_TTL_MINUTES,
            },
            paypal: None,
            dropbox: DropboxConfig::default(),
            google_drive_api_key: None,
            mail: None,
        }
    }

    /// Router over a pool that never connects; only routes that fail before
    /// touching the database are exercised here.
    fn app(secret: Option<&str>) -> Router {
        let config = test_config(secret);
        let db = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        build_router(AppState::new(db, config).unwrap())
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        app.oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let res = send(app(None), Method::GET, "/health", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_plans_catalog() {
        let res = send(app(None), Method::GET, "/api/plans", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body[2]["tier"], "business");
        assert_eq!(body[0]["dailyOrderLimit"], 1);
    }

    #[tokio::test]
    async fn test_options_answered_and_other_methods_rejected() {
        for uri in ["/api/auth", "/api/subscriptions", "/api/media-proxy"] {
            let res = send(app(None), Method::OPTIONS, uri, None).await;
            assert_eq!(res.status(), StatusCode::OK, "OPTIONS {uri}");
        }
        let res = send(app(None), Method::PUT, "/api/auth", None).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        let res = send(app(None), Method::DELETE, "/api/notifications", None).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_unknown_auth_action() {
        let res = send(
            app(Some("s3cret")),
            Method::POST,
            "/api/auth",
            Some(json!({ "action": "reset_everything" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"]["code"], "UNKNOWN_ACTION");
    }

    #[tokio::test]
    async fn test_logout_clears_cookie() {
        let res = send(
            app(None),
            Method::POST,
            "/api/auth?action=logout",
            None,
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let cookie = res
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("em_session=;"));
        assert!(cookie.contains("Max-Age=0"));
        assert_eq!(json_body(res).await, json!({ "success": true }));
    }

    #[tokio::test]
    async fn test_session_without_cookie() {
        let res = send(
            app(Some("s3cret")),
            Method::POST,
            "/api/auth",
            Some(json!({ "action": "session" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(res.headers().get(header::SET_COOKIE).is_some());
        assert_eq!(json_body(res).await["error"]["code"], "SESSION_MISSING");
    }

    #[tokio::test]
    async fn test_session_with_forged_cookie() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/auth?action=session")
            .header(header::COOKIE, "em_session=bm90.dmFsaWQ")
            .body(Body::empty())
            .unwrap();
        let res = app(Some("s3cret")).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["error"]["code"], "SESSION_INVALID");
    }

    #[tokio::test]
    async fn test_session_without_secret_is_server_error() {
        let res = send(
            app(None),
            Method::POST,
            "/api/auth",
            Some(json!({ "action": "session" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_send_magic_link_rejects_bad_email() {
        let res = send(
            app(Some("s3cret")),
            Method::POST,
            "/api/auth",
            Some(json!({ "action": "send_magic_link", "email": "not-an-email" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"]["code"], "INVALID_EMAIL");
    }

    #[tokio::test]
    async fn test_send_magic_link_without_mailer() {
        let res = send(
            app(Some("s3cret")),
            Method::POST,
            "/api/auth",
            Some(json!({ "action": "send_magic_link", "email": "a@x.com" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_login_code_format() {
        let res = send(
            app(Some("s3cret")),
            Method::POST,
            "/api/auth",
            Some(json!({ "action": "verify_login_code", "email": "a@x.com", "code": "12ab" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"]["code"], "INVALID_CODE_FORMAT");
    }

    #[tokio::test]
    async fn test_expired_or_forged_magic_link() {
        let res = send(
            app(Some("s3cret")),
            Method::POST,
            "/api/auth",
            Some(json!({ "action": "verify_magic_link", "token": "abc.def" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["error"]["code"], "INVALID_MAGIC_LINK");
    }

    #[tokio::test]
    async fn test_subscriptions_require_email() {
        let res = send(app(None), Method::GET, "/api/subscriptions", None).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let res = send(app(None), Method::GET, "/api/client-profiles?email=nope", None).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_free_tier_paypal_activation_is_invalid_tier() {
        // PayPal is not configured here; the tier must be rejected first.
        let res = send(
            app(None),
            Method::POST,
            "/api/subscriptions",
            Some(json!({
                "action": "activate_paypal",
                "email": "agent@x.com",
                "tier": "free",
                "paypalSubscriptionId": "I-BW452GLLEP1G",
            })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"]["code"], "INVALID_TIER");
    }

    #[tokio::test]
    async fn test_paypal_activation_rejects_path_like_ids() {
        for id in ["../../v1/oauth2/token", "I-1/cancel", "I-1?fields=all"] {
            let res = send(
                app(None),
                Method::POST,
                "/api/subscriptions",
                Some(json!({
                    "action": "activate_paypal",
                    "email": "agent@x.com",
                    "tier": "business",
                    "paypalSubscriptionId": id,
                })),
            )
            .await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{id}");
            assert_eq!(json_body(res).await["error"]["code"], "INVALID_SUBSCRIPTION_ID");
        }
    }

    #[tokio::test]
    async fn test_self_invite_rejected() {
        let res = send(
            app(None),
            Method::POST,
            "/api/referrals",
            Some(json!({
                "action": "invite",
                "referrerEmail": "Agent@X.com",
                "inviteeEmail": "agent@x.com",
            })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"]["code"], "SELF_INVITE");
    }

    #[tokio::test]
    async fn test_fetch_media_rejects_unknown_links() {
        let res = send(
            app(None),
            Method::POST,
            "/api/fetch-media",
            Some(json!({ "url": "https://example.com/photos" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"]["code"], "INVALID_MEDIA_LINK");
    }

    #[tokio::test]
    async fn test_fetch_media_without_credentials() {
        let res = send(
            app(None),
            Method::POST,
            "/api/fetch-media",
            Some(json!({ "url": "https://drive.google.com/drive/folders/abc" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_media_proxy_requires_params() {
        let res = send(
            app(None),
            Method::GET,
            "/api/media-proxy?link=https%3A%2F%2Fwww.dropbox.com%2Fsh%2Fa%2Fb",
            None,
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
