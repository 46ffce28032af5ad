use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::controller::{Refusal, WriteOutcome};
use crate::registry::ProfileId;
use crate::schedule::{is_valid_schedule, Schedule};
use crate::session::App;
use crate::settings::SettingsPatch;
use crate::state::StatusResponse;

type AppRef = Arc<App>;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppRef) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/devices/{index}", put(api_set_device))
        .route("/api/devices/{index}/toggle", post(api_toggle))
        .route("/api/voice", post(api_voice))
        .route("/api/schedules", get(api_schedules))
        .route(
            "/api/schedules/{key}",
            get(api_get_schedule)
                .put(api_put_schedule)
                .delete(api_delete_schedule),
        )
        .route("/api/schedules/{key}/enabled", put(api_enable_schedule))
        .route("/api/profile", post(api_switch_profile))
        .route(
            "/api/settings",
            get(api_settings)
                .put(api_update_settings)
                .delete(api_reset_settings),
        )
        .with_state(app)
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

// ---------------------------------------------------------------------------
// Status + devices
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StatusBody {
    profile_name: String,
    #[serde(flatten)]
    status: StatusResponse,
}

async fn api_status(State(app): State<AppRef>) -> impl IntoResponse {
    let session = app.session().await;
    let language = app.language().await;
    let st = session.shared.read().await;
    Json(StatusBody {
        profile_name: session.name.clone(),
        status: st.to_status(language, session.store.is_connected()),
    })
}

#[derive(Deserialize)]
struct SetDevice {
    on: bool,
}

async fn api_set_device(
    State(app): State<AppRef>,
    Path(index): Path<usize>,
    Json(body): Json<SetDevice>,
) -> Response {
    let session = app.session().await;
    if session.registry.get(index).is_none() {
        return error(StatusCode::NOT_FOUND, format!("no device at index {index}"));
    }
    let outcome = session.controller.set_device(index, body.on).await;
    let status = match outcome {
        WriteOutcome::Written => StatusCode::OK,
        WriteOutcome::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        WriteOutcome::RolledBack => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "outcome": outcome }))).into_response()
}

async fn api_toggle(State(app): State<AppRef>, Path(index): Path<usize>) -> Response {
    let session = app.session().await;
    match session.controller.toggle(index).await {
        Ok(on) => (StatusCode::ACCEPTED, Json(json!({ "on": on }))).into_response(),
        Err(Refusal::UnknownDevice) => {
            error(StatusCode::NOT_FOUND, format!("no device at index {index}"))
        }
        Err(Refusal::NotConnected) => error(StatusCode::SERVICE_UNAVAILABLE, "store not connected"),
    }
}

// ---------------------------------------------------------------------------
// Voice
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct VoiceText {
    text: String,
}

async fn api_voice(State(app): State<AppRef>, Json(body): Json<VoiceText>) -> impl IntoResponse {
    let session = app.session().await;
    let matched = session.dispatcher.read().await.process(&body.text).await;
    Json(json!({ "matched": matched }))
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ScheduleBody {
    key: String,
    exists: bool,
    valid: bool,
    on: String,
    off: String,
    schedule: Schedule,
}

impl ScheduleBody {
    fn new(key: &str, stored: Option<Schedule>) -> Self {
        let exists = stored.is_some();
        let schedule = stored.unwrap_or_else(Schedule::default_draft);
        Self {
            key: key.to_string(),
            exists,
            valid: is_valid_schedule(&schedule),
            on: schedule.on_time(),
            off: schedule.off_time(),
            schedule,
        }
    }
}

async fn api_schedules(State(app): State<AppRef>) -> impl IntoResponse {
    let session = app.session().await;
    Json(session.schedules.all().await)
}

async fn api_get_schedule(State(app): State<AppRef>, Path(key): Path<String>) -> Response {
    let session = app.session().await;
    if session.registry.index_of_key(&key).is_none() {
        return error(StatusCode::NOT_FOUND, format!("no device with key {key}"));
    }
    let stored = session.schedules.get(&key).await;
    Json(ScheduleBody::new(&key, stored)).into_response()
}

async fn api_put_schedule(
    State(app): State<AppRef>,
    Path(key): Path<String>,
    Json(schedule): Json<Schedule>,
) -> Response {
    let session = app.session().await;
    if session.registry.index_of_key(&key).is_none() {
        return error(StatusCode::NOT_FOUND, format!("no device with key {key}"));
    }
    if !is_valid_schedule(&schedule) {
        warn!(%key, "saving schedule that does not validate");
    }
    if session.schedules.update(&key, schedule.clone()).await {
        Json(ScheduleBody::new(&key, Some(schedule))).into_response()
    } else {
        error(StatusCode::BAD_GATEWAY, "schedule save failed")
    }
}

async fn api_delete_schedule(State(app): State<AppRef>, Path(key): Path<String>) -> Response {
    let session = app.session().await;
    if session.schedules.delete(&key).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error(StatusCode::BAD_GATEWAY, "schedule delete failed")
    }
}

#[derive(Deserialize)]
struct EnableBody {
    enabled: bool,
}

async fn api_enable_schedule(
    State(app): State<AppRef>,
    Path(key): Path<String>,
    Json(body): Json<EnableBody>,
) -> Response {
    let session = app.session().await;
    if session.schedules.get(&key).await.is_none() {
        return error(StatusCode::NOT_FOUND, format!("no schedule for {key}"));
    }
    if session.schedules.enable(&key, body.enabled).await {
        let stored = session.schedules.get(&key).await;
        Json(ScheduleBody::new(&key, stored)).into_response()
    } else {
        error(StatusCode::BAD_GATEWAY, "schedule save failed")
    }
}

// ---------------------------------------------------------------------------
// Profile + settings
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SwitchProfile {
    id: ProfileId,
}

async fn api_switch_profile(State(app): State<AppRef>, Json(body): Json<SwitchProfile>) -> Response {
    match app.switch_profile(body.id).await {
        Ok(()) => Json(json!({
            "profile": body.id,
            "name": app.profile_name(body.id),
        }))
        .into_response(),
        Err(e) => error(StatusCode::BAD_REQUEST, format!("{e:#}")),
    }
}

async fn api_settings(State(app): State<AppRef>) -> impl IntoResponse {
    Json(app.settings().await)
}

async fn api_update_settings(
    State(app): State<AppRef>,
    Json(patch): Json<SettingsPatch>,
) -> Response {
    match app.update_settings(&patch).await {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }
}

async fn api_reset_settings(State(app): State<AppRef>) -> Response {
    match app.reset_settings().await {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppRef, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("http api listening on http://{addr}");

    axum::serve(listener, router(app))
        .await
        .context("web server error")?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::settings::SettingsDb;
    use crate::voice::LogSpeaker;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> AppRef {
        let db = SettingsDb::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let app = App::open(Config::default(), db, Arc::new(LogSpeaker))
            .await
            .unwrap();
        // Let the listeners take their initial snapshots.
        tokio::time::sleep(Duration::from_millis(10)).await;
        Arc::new(app)
    }

    async fn call(app: &AppRef, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = router(app.clone())
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn status_reports_profile_a_devices() {
        let app = app().await;
        let (status, json) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["profile"], "firebase1");
        assert_eq!(json["profile_name"], "IoT System Demo");
        assert_eq!(json["connected"], true);
        assert_eq!(json["devices"].as_array().unwrap().len(), 8);
        assert_eq!(json["devices"][0]["label"], "Máy cho ăn");
    }

    #[tokio::test]
    async fn set_device_writes_and_reports_outcome() {
        let app = app().await;
        let (status, json) = call(&app, "PUT", "/api/devices/4", Some(json!({"on": true}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "written");

        let (_, json) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(json["devices"][4]["on"], true);
        assert_eq!(json["active_devices"], 1);
    }

    #[tokio::test]
    async fn unknown_device_is_404() {
        let app = app().await;
        let (status, _) = call(&app, "PUT", "/api/devices/8", Some(json!({"on": true}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "POST", "/api/devices/99/toggle", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn toggle_is_accepted() {
        let app = app().await;
        let (status, json) = call(&app, "POST", "/api/devices/7/toggle", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["on"], true);

        let (_, status) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(status["devices"][7]["on"], true);
    }

    #[tokio::test]
    async fn voice_hit_and_miss() {
        let app = app().await;
        let (_, json) = call(&app, "POST", "/api/voice", Some(json!({"text": "Bật đèn"}))).await;
        assert_eq!(json["matched"], true);
        let (_, json) = call(&app, "POST", "/api/voice", Some(json!({"text": "xin chào"}))).await;
        assert_eq!(json["matched"], false);

        let session = app.session().await;
        assert_eq!(session.shared.read().await.board.is_on(7), Some(true));
    }

    #[tokio::test]
    async fn schedule_defaults_then_saves() {
        let app = app().await;
        app.switch_profile(ProfileId::Nckh).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (status, json) = call(&app, "GET", "/api/schedules/LED", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exists"], false);
        assert_eq!(json["on"], "06:00");
        assert_eq!(json["schedule"]["enabled"], false);

        let record = json!({
            "hour_on": "06", "minute_on": "00",
            "hour_off": "18", "minute_off": "00",
            "enabled": true
        });
        let (status, _) = call(&app, "PUT", "/api/schedules/LED", Some(record.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (_, json) = call(&app, "GET", "/api/schedules/LED", None).await;
        assert_eq!(json["exists"], true);
        assert_eq!(json["valid"], true);
        assert_eq!(json["schedule"], record);

        let (status, json) = call(
            &app,
            "PUT",
            "/api/schedules/LED/enabled",
            Some(json!({"enabled": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["schedule"]["enabled"], false);

        let (status, _) = call(&app, "DELETE", "/api/schedules/LED", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, json) = call(&app, "GET", "/api/schedules/LED", None).await;
        assert_eq!(json["exists"], false);
    }

    #[tokio::test]
    async fn schedule_unknown_key_is_404() {
        let app = app().await;
        let (status, _) = call(&app, "GET", "/api/schedules/NOPE", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn profile_switch_changes_topology() {
        let app = app().await;
        let (status, json) = call(&app, "POST", "/api/profile", Some(json!({"id": "firebase2"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "NCKH");

        let (_, json) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(json["profile"], "firebase2");
        assert_eq!(json["devices"].as_array().unwrap().len(), 7);
        assert_eq!(json["devices"][6]["path"], "Control/LED");
    }

    #[tokio::test]
    async fn settings_patch_switches_language() {
        let app = app().await;
        let (status, json) = call(&app, "PUT", "/api/settings", Some(json!({"language": "en"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["language"], "en");
        assert_eq!(json["themeMode"], "system");

        let (_, json) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(json["devices"][0]["label"], "Auto Feeder");
        let (_, json) = call(&app, "POST", "/api/voice", Some(json!({"text": "lights on"}))).await;
        assert_eq!(json["matched"], true);
    }

    #[tokio::test]
    async fn settings_delete_resets_to_defaults() {
        let app = app().await;
        call(&app, "PUT", "/api/settings", Some(json!({"language": "en", "themeMode": "dark"}))).await;

        let (status, json) = call(&app, "DELETE", "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["language"], "vi");
        assert_eq!(json["themeMode"], "system");
        assert_eq!(json["currentFirebaseId"], "firebase1");

        let (_, json) = call(&app, "POST", "/api/voice", Some(json!({"text": "bật đèn"}))).await;
        assert_eq!(json["matched"], true);
    }
}
