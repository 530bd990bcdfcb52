use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::auth;
use crate::config::{AuthConfig, CameraEntry, ServerConfig};
use crate::discovery::DEFAULT_MAX_DEVICES;
use crate::errors::CameraServerError;
use crate::registry::CameraRegistry;
use crate::stream;

/// Routes served by the main API listener.
pub fn api_router(registry: Arc<CameraRegistry>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/api/cameras", get(get_cameras).post(set_cameras))
        .route("/api/cameras/:id/restart", post(restart_camera))
        .route("/api/cameras/:id", delete(delete_camera))
        .route("/api/devices", get(list_devices))
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/cam/:id/video", get(camera_video))
        .route("/cam/:id/snapshot", get(camera_snapshot))
        .with_state(registry)
}

/// Routes served on a camera's dedicated port: a minimal viewer page plus
/// the same video endpoints, scoped to that one camera.
pub fn camera_router(registry: Arc<CameraRegistry>, camera_id: String) -> Router {
    Router::new()
        .route("/", get(camera_page))
        .route("/video", get(scoped_video))
        .route("/snapshot", get(scoped_snapshot))
        .with_state((registry, camera_id))
}

fn error_response(err: CameraServerError) -> Response {
    (err.status_code(), Json(json!({ "error": err.to_string() }))).into_response()
}

async fn index_page(State(registry): State<Arc<CameraRegistry>>) -> Html<String> {
    let config = registry.current_config().await;
    let mut rows = String::new();
    for camera in &config.cameras {
        rows.push_str(&format!(
            "<li><a href=\"/cam/{id}/video\">{name}</a> \
             (<a href=\"/cam/{id}/snapshot\">snapshot</a>, port {port})</li>\n",
            id = camera.id,
            name = camera.name,
            port = camera.port.map(|p| p.to_string()).unwrap_or_default(),
        ));
    }
    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>Cameras</title></head><body>\n\
         <h1>Cameras</h1>\n<ul>\n{}</ul>\n\
         <p><a href=\"/health\">health</a> | <a href=\"/api/devices\">devices</a></p>\n\
         </body></html>",
        rows
    ))
}

async fn get_cameras(State(registry): State<Arc<CameraRegistry>>) -> Response {
    let config = registry.current_config().await;
    Json(config_document(&config)).into_response()
}

/// The document shape returned by the configuration endpoints. Credentials
/// never leave the server.
fn config_document(config: &ServerConfig) -> serde_json::Value {
    json!({
        "host": config.host,
        "auth": { "enabled": config.auth.enabled },
        "auth_error": config.auth_error,
        "cameras": config.cameras,
    })
}

#[derive(Debug, Deserialize)]
pub struct CamerasUpdate {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    pub cameras: Vec<CameraEntry>,
}

async fn set_cameras(
    State(registry): State<Arc<CameraRegistry>>,
    headers: HeaderMap,
    Json(update): Json<CamerasUpdate>,
) -> Response {
    let current = registry.current_config().await;
    if !auth::check_basic_auth(&headers, &current.auth) {
        return auth::unauthorized();
    }

    let new_config = ServerConfig {
        host: update.host.unwrap_or(current.host),
        auth: update.auth.unwrap_or(current.auth),
        cameras: update.cameras,
        auth_error: false,
    };
    match registry.apply_configuration(new_config).await {
        Ok(applied) => Json(config_document(&applied)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn restart_camera(
    State(registry): State<Arc<CameraRegistry>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let config = registry.current_config().await;
    if !auth::check_basic_auth(&headers, &config.auth) {
        return auth::unauthorized();
    }
    match registry.restart_camera(&id).await {
        Ok(()) => Json(json!({ "restarted": id })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_camera(
    State(registry): State<Arc<CameraRegistry>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let config = registry.current_config().await;
    if !auth::check_basic_auth(&headers, &config.auth) {
        return auth::unauthorized();
    }
    match registry.remove_camera(&id).await {
        Ok(updated) => Json(config_document(&updated)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DevicesQuery {
    #[serde(default)]
    pub max: Option<u32>,
    #[serde(default)]
    pub probe_missing: Option<bool>,
}

async fn list_devices(
    State(registry): State<Arc<CameraRegistry>>,
    Query(query): Query<DevicesQuery>,
) -> Response {
    let max = query.max.unwrap_or(DEFAULT_MAX_DEVICES);
    let probe = query.probe_missing.unwrap_or(false);
    debug!("Device discovery requested (max {}, probe {})", max, probe);
    let devices = registry.list_devices(max, probe).await;
    Json(json!({ "devices": devices })).into_response()
}

async fn get_health(State(registry): State<Arc<CameraRegistry>>) -> Response {
    // Degraded cameras are reported in the body; the endpoint itself stays
    // 200 as long as the server answers.
    Json(registry.health().await).into_response()
}

async fn get_metrics(State(registry): State<Arc<CameraRegistry>>) -> Response {
    let text = registry.metrics().await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response()
}

async fn camera_video(
    State(registry): State<Arc<CameraRegistry>>,
    Path(id): Path<String>,
) -> Response {
    video_response(registry, id).await
}

async fn camera_snapshot(
    State(registry): State<Arc<CameraRegistry>>,
    Path(id): Path<String>,
) -> Response {
    snapshot_response(registry, id).await
}

async fn camera_page(
    State((registry, camera_id)): State<(Arc<CameraRegistry>, String)>,
) -> Response {
    let name = match registry.camera(&camera_id).await {
        Ok((entry, _)) => entry.name,
        Err(e) => return error_response(e),
    };
    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>{name}</title></head><body>\n\
         <h1>{name}</h1>\n<img src=\"/video\" alt=\"{name}\">\n</body></html>",
        name = name
    ))
    .into_response()
}

async fn scoped_video(
    State((registry, camera_id)): State<(Arc<CameraRegistry>, String)>,
) -> Response {
    video_response(registry, camera_id).await
}

async fn scoped_snapshot(
    State((registry, camera_id)): State<(Arc<CameraRegistry>, String)>,
) -> Response {
    snapshot_response(registry, camera_id).await
}

/// Shared MJPEG response builder for both routers.
pub async fn video_response(registry: Arc<CameraRegistry>, id: String) -> Response {
    match registry.camera(&id).await {
        Ok((entry, source)) => {
            debug!("Viewer connected to camera '{}'", id);
            let body = Body::from_stream(stream::mjpeg_stream(source, &entry));
            (
                [
                    (header::CONTENT_TYPE, stream::mjpeg_content_type()),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
                body,
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn snapshot_response(registry: Arc<CameraRegistry>, id: String) -> Response {
    match registry.snapshot(&id).await {
        Ok(jpeg) => (
            [
                (header::CONTENT_TYPE, "image/jpeg".to_string()),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            jpeg,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
