//! HTTP status surface
//!
//! Serves the fleet status document and the configuration endpoints that
//! drive live reloads.

mod health;
pub use health::{HealthPoller, HealthSnapshot, POLL_INTERVAL, ReceiverHealth, parse_status};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::FleetConfig;
use crate::module::manager::{BandStatus, Manager};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub health: HealthSnapshot,
    /// Where accepted configuration is persisted
    pub config_path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct StatusDocument {
    pub bands: Vec<BandStatus>,
    pub receivers: Vec<ReceiverHealth>,
    pub one_shot: bool,
}

#[derive(Debug, Serialize)]
pub struct ConfigUpdate {
    pub persisted: bool,
    pub reloaded: bool,
    pub reload_error: Option<String>,
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn status(State(state): State<AppState>) -> Json<StatusDocument> {
    Json(StatusDocument {
        bands: state.manager.detailed_status().await,
        receivers: state.health.read().await.clone(),
        one_shot: state.manager.is_one_shot(),
    })
}

async fn get_config(State(state): State<AppState>) -> Json<FleetConfig> {
    Json(state.manager.config().await.redacted())
}

fn error_response(code: StatusCode, message: String) -> Response {
    (code, Json(json!({ "error": message }))).into_response()
}

async fn put_config(State(state): State<AppState>, Json(mut config): Json<FleetConfig>) -> Response {
    let current = state.manager.config().await;
    config.restore_secrets(&current);

    if let Err(e) = config.validate() {
        warn!("Rejected configuration update: {}", e);
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    if let Err(e) = config.save(&state.config_path) {
        error!("Failed to persist configuration: {:#}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e));
    }
    info!("Configuration saved to {}", state.config_path.display());

    let update = match state.manager.reload(config).await {
        Ok(()) => ConfigUpdate {
            persisted: true,
            reloaded: true,
            reload_error: None,
        },
        Err(e) => {
            warn!("Reload finished with errors: {:#}", e);
            ConfigUpdate {
                persisted: true,
                reloaded: false,
                reload_error: Some(format!("{:#}", e)),
            }
        }
    };
    Json(update).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(status))
        .route("/api/config", get(get_config).put(put_config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the status port. Failure here is fatal at startup.
pub async fn bind(port: u16) -> Result<tokio::net::TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status surface on {}", addr))
}

pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> Result<()> {
    info!("Status surface listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::REDACTED;
    use crate::module::job::test_support::{SPOT_LINE, StubRecorder, decoder_script, test_deps};
    use crate::module::clock::SystemClock;
    use crate::module::publisher::tests::MemoryPublisherFactory;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tempfile::TempDir;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn yaml(dir: &TempDir, decoder: &std::path::Path, bands: &str) -> String {
        format!(
            "publisher:\n  enabled: true\n  host: broker.local\n  password: brokerpw\n\
             receivers:\n  - name: r1\n    host: kiwi.local\n    password: kiwipw\n\
             bands:\n{}\
             decoder:\n  decoder_path: {}\n  work_dir: {}\n",
            bands,
            decoder.display(),
            dir.path().join("work").display()
        )
    }

    const B20: &str = "  - name: b20\n    frequency_khz: 14097.0\n    receiver_name: r1\n";
    const B40: &str = "  - name: b40\n    frequency_khz: 7040.0\n    receiver_name: r1\n";

    async fn app(dir: &TempDir) -> (Router, Arc<Manager>) {
        let decoder = decoder_script(dir.path(), SPOT_LINE, 0);
        let config = FleetConfig::from_yaml(&yaml(dir, &decoder, B20)).unwrap();
        let mut deps = test_deps(StubRecorder::new(true));
        deps.clock = Arc::new(SystemClock);
        let manager = Arc::new(Manager::new(
            config,
            deps,
            Arc::new(MemoryPublisherFactory::default()),
            false,
        ));
        manager.start_all().await.unwrap();

        let state = AppState {
            manager: manager.clone(),
            health: Arc::new(RwLock::new(Vec::new())),
            config_path: dir.path().join("wspr.yaml"),
        };
        (router(state), manager)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn put(body: String) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri("/api/config")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let dir = TempDir::new().unwrap();
        let (app, manager) = app(&dir).await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["one_shot"], false);
        assert_eq!(json["bands"][0]["name"], "b20");
        assert_eq!(json["bands"][0]["state"], "waiting");
        assert_eq!(json["receivers"].as_array().unwrap().len(), 0);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_config_redacts_passwords() {
        let dir = TempDir::new().unwrap();
        let (app, manager) = app(&dir).await;

        let response = app
            .oneshot(Request::builder().uri("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["publisher"]["password"], REDACTED);
        assert_eq!(json["receivers"][0]["password"], REDACTED);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_put_config_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let (app, manager) = app(&dir).await;

        let mut config = manager.config().await.redacted();
        config.bands.extend(FleetConfig::from_yaml(&yaml(&dir, &config.decoder.decoder_path, B40)).unwrap().bands);
        let body = serde_json::to_string(&config).unwrap();

        let response = app.oneshot(put(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["persisted"], true);
        assert_eq!(json["reloaded"], true);
        assert!(json["reload_error"].is_null());

        assert!(manager.job("b40").await.is_some());
        let saved = FleetConfig::load(dir.path().join("wspr.yaml")).unwrap();
        assert_eq!(saved.publisher.password, "brokerpw");
        assert_eq!(saved.receivers[0].password, "kiwipw");
        assert_eq!(saved.bands.len(), 2);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_put_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (app, manager) = app(&dir).await;

        let mut config = manager.config().await;
        config.bands[0].receiver_name = "nowhere".to_string();
        let response = app.oneshot(put(serde_json::to_string(&config).unwrap())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("nowhere"));
        assert!(!dir.path().join("wspr.yaml").exists());
        assert_eq!(manager.config().await.bands[0].receiver_name, "r1");

        manager.shutdown().await.unwrap();
    }
}
