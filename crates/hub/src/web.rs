use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use irrigation_timers::{Interval, Timer, TimerId};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use sysinfo::{Disks, System};
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info};

use crate::db::Db;
use crate::runner::day_time_at;
use crate::state::{SharedState, StatusResponse};

// ---------------------------------------------------------------------------
// Shared handler state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub shared: SharedState,
    /// Woken after every timer change so the runner replans.
    pub wake: Arc<Notify>,
    pub offset: UtcOffset,
    /// Held from a timer write until its intervals are published.
    mutations: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(db: Db, shared: SharedState, wake: Arc<Notify>, offset: UtcOffset) -> Self {
        Self {
            db,
            shared,
            wake,
            offset,
            mutations: Arc::new(Mutex::new(())),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("timer {0} not found")]
    NotFound(TimerId),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(e) => {
                error!("api: {e:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn json_body(payload: Result<Json<Timer>, JsonRejection>) -> ApiResult<Timer> {
    let Json(timer) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    timer
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("invalid timer: {e}")))?;
    Ok(timer)
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/timers", get(list_timers))
        .route("/timer", post(create_timer))
        .route("/timer/{id}", put(update_timer).delete(delete_timer))
        .route("/intervals", get(list_intervals))
        .route("/stats", get(stats))
        .route("/logs", get(logs).delete(clear_logs))
        .route("/status", get(status));

    Router::new().nest("/api/v1", api).with_state(state)
}

async fn healthcheck() -> Json<bool> {
    Json(true)
}

async fn list_timers(State(app): State<AppState>) -> ApiResult<Json<Vec<Timer>>> {
    Ok(Json(app.db.list_timers().await?))
}

async fn create_timer(
    State(app): State<AppState>,
    payload: Result<Json<Timer>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Timer>)> {
    let timer = json_body(payload)?;
    if timer.id.is_some() {
        return Err(ApiError::Forbidden(
            "timer cannot be posted with an id".to_string(),
        ));
    }

    let _guard = app.mutations.lock().await;
    let stored = app.db.insert_timer(&timer).await?;
    info!(
        id = ?stored.id,
        name = %stored.name,
        start = %stored.start_time,
        duration = stored.duration,
        "timer created"
    );
    timers_changed(&app, format!("timer {} created", describe(&stored))).await;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_timer(
    State(app): State<AppState>,
    Path(id): Path<TimerId>,
    payload: Result<Json<Timer>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Timer>)> {
    let timer = json_body(payload)?;
    if timer.id.is_some_and(|body_id| body_id != id) {
        return Err(ApiError::BadRequest(format!(
            "body id does not match path id {id}"
        )));
    }

    let _guard = app.mutations.lock().await;
    let stored = app
        .db
        .update_timer(id, &timer)
        .await?
        .ok_or(ApiError::NotFound(id))?;
    info!(
        id,
        name = %stored.name,
        start = %stored.start_time,
        duration = stored.duration,
        "timer updated"
    );
    timers_changed(&app, format!("timer {} updated", describe(&stored))).await;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn delete_timer(
    State(app): State<AppState>,
    Path(id): Path<TimerId>,
) -> ApiResult<Json<bool>> {
    let _guard = app.mutations.lock().await;
    if !app.db.delete_timer(id).await? {
        return Err(ApiError::NotFound(id));
    }
    info!(id, "timer deleted");
    timers_changed(&app, format!("timer {id} deleted")).await;
    Ok(Json(true))
}

async fn list_intervals(State(app): State<AppState>) -> Json<Vec<Interval>> {
    Json(app.shared.read().await.intervals.clone())
}

async fn stats() -> impl IntoResponse {
    let mut sys = System::new();
    sys.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let (total, available) = disks
        .list()
        .iter()
        .fold((0u64, 0u64), |(t, a), d| (t + d.total_space(), a + d.available_space()));

    let body = format!(
        "Memory: {} used of {}\nStorage: {} used of {}\n",
        megabytes(sys.used_memory()),
        megabytes(sys.total_memory()),
        megabytes(total.saturating_sub(available)),
        megabytes(total),
    );
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

async fn logs(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        st.render_log(),
    )
}

async fn clear_logs(State(app): State<AppState>) -> StatusCode {
    app.shared.write().await.clear_events();
    StatusCode::NO_CONTENT
}

async fn status(State(app): State<AppState>) -> Json<StatusResponse> {
    let now = day_time_at(OffsetDateTime::now_utc(), app.offset);
    let st = app.shared.read().await;
    Json(st.to_status(now))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Re-derive intervals from the stored collection and wake the runner.
///
/// Callers hold `mutations`. The write has already committed, so a failed
/// reload only leaves the previous intervals in place and is logged.
async fn timers_changed(app: &AppState, detail: String) {
    let timers = app.db.list_timers().await;
    {
        let mut st = app.shared.write().await;
        st.record_timer(detail);
        match timers {
            Ok(timers) => st.set_timers(&timers),
            Err(e) => {
                error!("intervals not recomputed: {e:#}");
                st.record_error(format!("intervals not recomputed: {e:#}"));
            }
        }
    }
    app.wake.notify_one();
}

fn describe(timer: &Timer) -> String {
    match timer.id {
        Some(id) => format!("{id} '{}'", timer.name),
        None => format!("'{}'", timer.name),
    }
}

fn megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    #[cfg(feature = "tls")]
    {
        if let (Ok(cert), Ok(key)) = (env::var("TLS_CERT_PATH"), env::var("TLS_KEY_PATH")) {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
                .await
                .with_context(|| format!("failed to load tls cert {cert} / key {key}"))?;
            info!(%addr, "web api listening on https://{addr}/api/v1");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await
                .context("web server error")?;
            return Ok(());
        }
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "web api listening on http://{addr}/api/v1");

    axum::serve(listener, app).await.context("web server error")?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{insert_unreadable_row, memory_db};
    use crate::state::HubState;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use irrigation_timers::{derive_intervals, DayTime};
    use serde_json::{json, Value};
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn state_for(db: Db) -> AppState {
        AppState::new(
            db,
            Arc::new(RwLock::new(HubState::new(17))),
            Arc::new(Notify::new()),
            UtcOffset::UTC,
        )
    }

    async fn app_state() -> AppState {
        state_for(memory_db().await)
    }

    async fn call(
        state: &AppState,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, String) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn timer_json(name: &str, start: &str, duration: u32) -> Value {
        json!({ "name": name, "startTime": start, "duration": duration })
    }

    async fn create(state: &AppState, name: &str, start: &str, duration: u32) -> Timer {
        let (status, body) = call(
            state,
            Method::POST,
            "/api/v1/timer",
            Some(timer_json(name, start, duration)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        serde_json::from_str(&body).unwrap()
    }

    // -- basics -------------------------------------------------------------

    #[tokio::test]
    async fn healthcheck_is_true() {
        let state = app_state().await;
        let (status, body) = call(&state, Method::GET, "/api/v1/healthcheck", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "true");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let state = app_state().await;
        let (status, _) = call(&state, Method::GET, "/api/v2/timers", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- create -------------------------------------------------------------

    #[tokio::test]
    async fn create_returns_timer_with_id() {
        let state = app_state().await;
        let created = create(&state, "front", "06:00:00", 600).await;
        assert!(created.id.is_some());
        assert_eq!(created.start_time.to_string(), "06:00:00");

        let (_, body) = call(&state, Method::GET, "/api/v1/timers", None).await;
        let listed: Vec<Timer> = serde_json::from_str(&body).unwrap();
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn create_with_id_is_forbidden() {
        let state = app_state().await;
        let mut body = timer_json("front", "06:00:00", 600);
        body["id"] = json!(5);
        let (status, text) = call(&state, Method::POST, "/api/v1/timer", Some(body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(text, "timer cannot be posted with an id");
    }

    #[tokio::test]
    async fn create_invalid_is_bad_request() {
        let state = app_state().await;
        for body in [
            timer_json("", "06:00:00", 600),
            timer_json("front", "06:00:00", 0),
            timer_json("front", "25:00:00", 60),
            json!({ "name": "front" }),
        ] {
            let (status, _) = call(&state, Method::POST, "/api/v1/timer", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        assert_eq!(state.db.count_timers().await.unwrap(), 0);
    }

    // -- update -------------------------------------------------------------

    #[tokio::test]
    async fn update_replaces_timer() {
        let state = app_state().await;
        let created = create(&state, "front", "06:00:00", 600).await;
        let id = created.id.unwrap();

        let (status, body) = call(
            &state,
            Method::PUT,
            &format!("/api/v1/timer/{id}"),
            Some(timer_json("lawn", "05:00:00", 900)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let updated: Timer = serde_json::from_str(&body).unwrap();
        assert_eq!(updated.id, Some(id));
        assert_eq!(updated.name, "lawn");
    }

    #[tokio::test]
    async fn update_unknown_is_404() {
        let state = app_state().await;
        let (status, text) = call(
            &state,
            Method::PUT,
            "/api/v1/timer/99",
            Some(timer_json("lawn", "05:00:00", 900)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(text, "timer 99 not found");
    }

    #[tokio::test]
    async fn update_with_mismatched_id_is_bad_request() {
        let state = app_state().await;
        let created = create(&state, "front", "06:00:00", 600).await;
        let id = created.id.unwrap();

        let mut body = timer_json("lawn", "05:00:00", 900);
        body["id"] = json!(id + 1);
        let uri = format!("/api/v1/timer/{id}");
        let (status, _) = call(&state, Method::PUT, &uri, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- delete -------------------------------------------------------------

    #[tokio::test]
    async fn delete_then_delete_again() {
        let state = app_state().await;
        let id = create(&state, "front", "06:00:00", 600).await.id.unwrap();
        let uri = format!("/api/v1/timer/{id}");

        let (status, body) = call(&state, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "true");

        let (status, _) = call(&state, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- intervals ------------------------------------------------------------

    #[tokio::test]
    async fn intervals_follow_every_mutation() {
        let state = app_state().await;
        create(&state, "a", "10:00:00", 65).await;
        let b = create(&state, "b", "10:01:00", 10).await;
        create(&state, "c", "23:55:00", 600).await;

        let (_, body) = call(&state, Method::GET, "/api/v1/intervals", None).await;
        let intervals: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            intervals,
            json!([
                { "startTime": "10:00:00", "endTime": "10:01:10" },
                { "startTime": "23:55:00", "endTime": "00:05:00" },
            ])
        );

        let uri = format!("/api/v1/timer/{}", b.id.unwrap());
        call(&state, Method::DELETE, &uri, None).await;
        let (_, body) = call(&state, Method::GET, "/api/v1/intervals", None).await;
        let intervals: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(intervals[0]["endTime"], "10:01:05");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_leave_intervals_current() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("hub.db").display());
        let db = Db::connect(&url).await.unwrap();
        db.migrate().await.unwrap();
        let state = state_for(db.clone());

        for round in 0..10u32 {
            let mut set = tokio::task::JoinSet::new();
            for i in 0..20u32 {
                let state = state.clone();
                let start = DayTime::wrapping((round * 20 + i) * 120).to_string();
                set.spawn(async move {
                    let body = timer_json(&format!("t{round}-{i}"), &start, 60);
                    call(&state, Method::POST, "/api/v1/timer", Some(body)).await
                });
            }
            while let Some(joined) = set.join_next().await {
                let (status, body) = joined.unwrap();
                assert_eq!(status, StatusCode::CREATED, "{body}");
            }

            let stored = db.list_timers().await.unwrap();
            assert_eq!(stored.len() as u32, (round + 1) * 20);
            assert_eq!(
                state.shared.read().await.intervals,
                derive_intervals(&stored),
                "round {round}"
            );
        }
    }

    #[tokio::test]
    async fn failed_reload_still_returns_the_stored_timer() {
        let state = app_state().await;
        insert_unreadable_row(&state.db).await;

        let created = create(&state, "front", "06:00:00", 600).await;
        assert!(created.id.is_some());
        assert_eq!(created.name, "front");

        let (_, body) = call(&state, Method::GET, "/api/v1/logs", None).await;
        assert!(body.contains("[timer] timer"), "{body}");
        assert!(body.contains("[error] intervals not recomputed"), "{body}");
    }

    // -- logs, stats, status --------------------------------------------------

    #[tokio::test]
    async fn logs_record_changes_and_can_be_cleared() {
        let state = app_state().await;
        create(&state, "front", "06:00:00", 600).await;

        let (status, body) = call(&state, Method::GET, "/api/v1/logs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("[timer] timer 1 'front' created"), "{body}");

        let (status, _) = call(&state, Method::DELETE, "/api/v1/logs", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = call(&state, Method::GET, "/api/v1/logs", None).await;
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn stats_reports_memory_and_storage() {
        let state = app_state().await;
        let (status, body) = call(&state, Method::GET, "/api/v1/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("Memory: "));
        assert!(body.contains("Storage: "));
    }

    #[tokio::test]
    async fn status_reports_valve_and_intervals() {
        let state = app_state().await;
        create(&state, "front", "06:00:00", 600).await;
        let (status, body) = call(&state, Method::GET, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["valve"]["on"], false);
        assert_eq!(json["intervals"][0]["startTime"], "06:00:00");
    }
}
