//! Admin HTTP API served next to the bot.
//!
//! ```text
//! GET  /db/courses/          catalog courses
//! GET  /db/categories/       catalog categories
//! GET  /db/nosologies/       catalog nosologies
//! POST /db/reload/           force a catalog reload
//! GET  /telegram/webhook/    current Telegram webhook info
//! POST /telegram/webhook/    set the webhook (`?url=...`)
//! POST /logs/export/         upload buffered action records to the CRM disk
//! GET  /server_time          no auth
//! ```
//!
//! Every route except `/server_time` requires `x-api-key: login:password`.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use teloxide::prelude::*;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::action_log::ActionLogger;
use crate::catalog::Catalog;
use crate::config::AdminSettings;
use crate::crm::BitrixClient;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Router state; every field is cheap to clone
#[derive(Clone)]
pub struct AdminState {
    pub catalog: Arc<Catalog>,
    pub bot: Bot,
    pub crm: Option<Arc<BitrixClient>>,
    pub action_log: Arc<ActionLogger>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(
        settings: &AdminSettings,
        catalog: Arc<Catalog>,
        bot: Bot,
        crm: Option<Arc<BitrixClient>>,
        action_log: Arc<ActionLogger>,
    ) -> Self {
        Self {
            catalog,
            bot,
            crm,
            action_log,
            api_key: Arc::from(format!("{}:{}", settings.login, settings.password)),
        }
    }
}

#[derive(Deserialize)]
pub struct WebhookQuery {
    url: String,
}

fn json_error(status: StatusCode, msg: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "ok": false, "error": format!("{msg}") }))).into_response()
}

/// Compare in time that depends only on the longer input
fn keys_match(given: &[u8], expected: &[u8]) -> bool {
    let len = given.len().max(expected.len());
    let length_diff = (given.len() ^ expected.len()) as u64;
    let diff = (0..len).fold(0u8, |acc, i| {
        let a = given.get(i).copied().unwrap_or(0);
        let b = expected.get(i).copied().unwrap_or(0);
        acc | (a ^ b)
    });
    (u64::from(diff) | length_diff) == 0
}

async fn require_api_key(
    State(state): State<AdminState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(API_KEY_HEADER)
        .is_some_and(|value| keys_match(value.as_bytes(), state.api_key.as_bytes()));

    if !authorized {
        warn!(
            path = %request.uri().path(),
            "Rejected admin request without a valid api key"
        );
        return json_error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    next.run(request).await
}

pub fn build_router(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/db/courses/", get(list_courses))
        .route("/db/categories/", get(list_categories))
        .route("/db/nosologies/", get(list_nosologies))
        .route("/db/reload/", axum::routing::post(reload_catalog))
        .route("/telegram/webhook/", get(webhook_info).post(set_webhook))
        .route("/logs/export/", axum::routing::post(export_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/server_time", get(server_time))
        .merge(protected)
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn serve(settings: &AdminSettings, state: AdminState) -> Result<()> {
    let listener = TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("Failed to bind admin API on {}", settings.bind))?;
    info!(bind = %settings.bind, "Admin API listening");

    axum::serve(listener, build_router(state))
        .await
        .context("Admin API server error")
}

async fn server_time() -> Json<serde_json::Value> {
    Json(json!({ "server_time": Utc::now().to_rfc3339() }))
}

async fn list_courses(State(state): State<AdminState>) -> Response {
    match state.catalog.snapshot().await {
        Ok(snapshot) => Json(snapshot.courses.clone()).into_response(),
        Err(e) => json_error(StatusCode::BAD_GATEWAY, e),
    }
}

async fn list_categories(State(state): State<AdminState>) -> Response {
    match state.catalog.snapshot().await {
        Ok(snapshot) => Json(snapshot.categories.clone()).into_response(),
        Err(e) => json_error(StatusCode::BAD_GATEWAY, e),
    }
}

async fn list_nosologies(State(state): State<AdminState>) -> Response {
    match state.catalog.snapshot().await {
        Ok(snapshot) => Json(snapshot.nosologies.clone()).into_response(),
        Err(e) => json_error(StatusCode::BAD_GATEWAY, e),
    }
}

async fn reload_catalog(State(state): State<AdminState>) -> Response {
    match state.catalog.reload().await {
        Ok(snapshot) => {
            info!(courses = snapshot.courses.len(), "Catalog reloaded via admin API");
            Json(json!({ "ok": true })).into_response()
        }
        Err(e) => {
            error!(error = %e, "Catalog reload via admin API failed");
            json_error(StatusCode::BAD_GATEWAY, e)
        }
    }
}

async fn webhook_info(State(state): State<AdminState>) -> Response {
    match state.bot.get_webhook_info().await {
        Ok(info) => Json(info).into_response(),
        Err(e) => json_error(StatusCode::BAD_GATEWAY, e),
    }
}

async fn set_webhook(
    State(state): State<AdminState>,
    Query(query): Query<WebhookQuery>,
) -> Response {
    let url = match reqwest::Url::parse(&query.url) {
        Ok(url) => url,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, format!("invalid url: {e}")),
    };

    match state.bot.set_webhook(url.clone()).await {
        Ok(_) => {
            info!(url = %url, "Webhook set via admin API");
            Json(json!({ "ok": true, "url": url.as_str() })).into_response()
        }
        Err(e) => json_error(StatusCode::BAD_GATEWAY, e),
    }
}

async fn export_logs(State(state): State<AdminState>) -> Response {
    let Some(crm) = state.crm.as_ref() else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "CRM is not configured");
    };
    let Some(folder_id) = crm.settings().logs_folder_id else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "logs folder is not configured");
    };

    let content = match state.action_log.export_recent() {
        Ok(content) => content,
        Err(e) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let records = state.action_log.recent().len();
    let file_name = ActionLogger::export_file_name(Utc::now());

    match crm.upload_file(folder_id, &file_name, &content).await {
        Ok(file_id) => {
            info!(file_id, records, "Action log exported");
            Json(json!({
                "ok": true,
                "file_id": file_id,
                "file_name": file_name,
                "records": records,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Action log export failed");
            json_error(StatusCode::BAD_GATEWAY, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, Category, Course, StaticCatalogSource};
    use crate::config::BitrixSettings;
    use crate::recovery::RecoveryConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(crm: Option<Arc<BitrixClient>>) -> AdminState {
        let snapshot = CatalogSnapshot::new(
            vec![Category {
                id: "1".into(),
                name: "Онкология".into(),
            }],
            vec![],
            vec![Course {
                id: "10".into(),
                name: "Курс А".into(),
                coefficient: 1000.0,
                category_id: "1".into(),
                nosology_ids: vec![],
                fixed_price: false,
            }],
        );
        let settings = AdminSettings {
            bind: "127.0.0.1:0".parse().unwrap(),
            login: "admin".into(),
            password: "secret".into(),
        };
        let catalog = Catalog::new(
            Box::new(StaticCatalogSource::new(snapshot)),
            Duration::from_secs(60),
        );
        AdminState::new(
            &settings,
            Arc::new(catalog),
            Bot::new("123:test"),
            crm,
            Arc::new(ActionLogger::new(reqwest::Client::new(), None, 16)),
        )
    }

    async fn call(
        state: AdminState,
        method: &str,
        uri: &str,
        key: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        let response = build_router(state)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match(b"admin:secret", b"admin:secret"));
        assert!(!keys_match(b"admin:secreT", b"admin:secret"));
        assert!(!keys_match(b"admin", b"admin:secret"));
    }

    #[test]
    fn test_keys_match_checks_length_past_the_shorter_key() {
        // A prefix of the key or the key with a NUL tail must not pass
        assert!(!keys_match(b"", b"admin:secret"));
        assert!(!keys_match(b"admin:secret\0", b"admin:secret"));
        assert!(!keys_match(b"admin:secret", b"admin:secret\0"));
        assert!(keys_match(b"", b""));
    }

    #[tokio::test]
    async fn test_server_time_needs_no_key() {
        let (status, body) = call(state(None), "GET", "/server_time", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["server_time"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_missing_or_wrong_key_is_rejected() {
        let (status, _) = call(state(None), "GET", "/db/courses/", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(state(None), "GET", "/db/courses/", Some("admin:nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_catalog_listing() {
        let (status, body) = call(state(None), "GET", "/db/courses/", Some("admin:secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "Курс А");

        let (status, body) =
            call(state(None), "GET", "/db/categories/", Some("admin:secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "1");

        let (_, body) = call(state(None), "GET", "/db/nosologies/", Some("admin:secret")).await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_reload() {
        let (status, body) = call(state(None), "POST", "/db/reload/", Some("admin:secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_export_requires_crm_folder() {
        let (status, _) = call(state(None), "POST", "/logs/export/", Some("admin:secret")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let crm = BitrixClient::new(
            reqwest::Client::new(),
            BitrixSettings {
                webhook_url: "https://example.bitrix24.ru/rest/1/abc/".into(),
                logs_folder_id: None,
                lead_title: "lead".into(),
            },
            RecoveryConfig::default(),
        );
        let state = state(Some(Arc::new(crm)));
        let (status, body) = call(state, "POST", "/logs/export/", Some("admin:secret")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_set_webhook_rejects_bad_url() {
        let uri = "/telegram/webhook/?url=not%20a%20url";
        let (status, _) = call(state(None), "POST", uri, Some("admin:secret")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
