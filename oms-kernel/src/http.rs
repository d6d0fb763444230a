/**
 * REST API - HTTP surface of the kernel
 *
 * ROLE:
 * Device ingestion, current-state queries, alert management and kernel
 * health, served by axum next to the /ws realtime endpoint.
 *
 * ROUTES:
 * - /health, /system/health                 open
 * - /ws                                     open (realtime channel)
 * - /api/occupancy[...]                     snapshots, ingest, manual override
 * - /api/devices                            device liveness
 * - /api/alerts[...]                        list, get, resolve, stats
 *
 * SECURITY:
 * When an API key is configured, every /api route requires a matching `x-api-key`
 * header. Without one the API is open (development mode, logged at startup).
 */

use crate::alerts::{AlertQuery, AlertStats};
use crate::error::{KernelError, ValidationErrors};
use crate::events::ManualOverride;
use crate::health::KernelHealth;
use crate::ingest::ReadingIn;
use crate::models::{Alert, DeviceLiveness, OccupancySnapshot};
use crate::realtime::ws_handler;
use crate::state::SharedState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

pub type AppState = SharedState;

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/ws", get(ws_handler))
        .route("/api/occupancy", get(list_occupancy))
        .route("/api/occupancy/formatted", get(list_formatted))
        .route("/api/occupancy/ingest", post(ingest_reading))
        .route("/api/occupancy/manual", post(manual_override))
        .route("/api/occupancy/{bus_id}", get(get_occupancy))
        .route("/api/devices", get(list_devices))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/stats/overview", get(alert_stats))
        .route("/api/alerts/{id}", get(get_alert))
        .route("/api/alerts/{id}/resolve", put(resolve_alert))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = req.headers().get("x-api-key").and_then(|v| v.to_str().ok());
    if !api_key_allows(req.uri().path(), state.config.http.api_key.as_deref(), provided) {
        tracing::warn!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn api_key_allows(path: &str, expected: Option<&str>, provided: Option<&str>) -> bool {
    if !path.starts_with("/api/") {
        return true;
    }
    match expected {
        None => true,
        Some(key) => provided == Some(key),
    }
}

async fn get_system_health(State(state): State<AppState>) -> Json<KernelHealth> {
    Json(state.health().await)
}

async fn list_occupancy(State(state): State<AppState>) -> Json<Vec<OccupancySnapshot>> {
    Json(state.store.list())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormattedOccupancy {
    bus_id: String,
    occupancy_percentage: u32,
    formatted: String,
}

async fn list_formatted(State(state): State<AppState>) -> Json<Vec<FormattedOccupancy>> {
    let lines = state
        .store
        .list()
        .iter()
        .map(|s| FormattedOccupancy {
            bus_id: s.bus_id.clone(),
            occupancy_percentage: s.percentage(),
            formatted: s.formatted(),
        })
        .collect();
    Json(lines)
}

async fn get_occupancy(
    State(state): State<AppState>,
    Path(bus_id): Path<String>,
) -> Result<Json<OccupancySnapshot>, KernelError> {
    state
        .store
        .get(&bus_id)
        .map(Json)
        .ok_or_else(|| KernelError::not_found("bus", bus_id))
}

/// Unreadable JSON is a 400 with a `body` field error like any other input problem.
fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, KernelError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        let mut errors = ValidationErrors::new();
        errors.push("body", rejection.body_text());
        KernelError::Validation(errors)
    })
}

async fn ingest_reading(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<OccupancySnapshot>), KernelError> {
    let reading = ReadingIn::from_json(json_body(body)?)?;
    let snapshot = state.pipeline.ingest(reading).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn manual_override(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<OccupancySnapshot>, KernelError> {
    let request = ManualOverride::from_json(json_body(body)?)?;
    state.pipeline.manual_override(request).await.map(Json)
}

async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceLiveness>> {
    Json(state.devices.list())
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> Json<Vec<Alert>> {
    Json(state.alerts.list(&query).await)
}

async fn alert_stats(State(state): State<AppState>) -> Json<AlertStats> {
    Json(state.alerts.stats(OffsetDateTime::now_utc()).await)
}

async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Alert>, KernelError> {
    state
        .alerts
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| KernelError::not_found("alert", id))
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Alert>, KernelError> {
    state.alerts.resolve(&id).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::models::{AlertType, Severity};
    use crate::state::KernelState;
    use axum::response::IntoResponse;
    use oms_devkit::OmsMessageBuilder;

    fn state() -> AppState {
        KernelState::new(KernelConfig::default())
    }

    fn reading(bus: &str, occupancy: u32) -> Result<Json<Value>, JsonRejection> {
        Ok(Json(OmsMessageBuilder::occupancy_v1(
            bus,
            "CAM001",
            occupancy,
            Some(40),
            "2024-01-01T00:00:00Z",
        )))
    }

    async fn body_json(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_api_key_gate() {
        assert!(api_key_allows("/api/occupancy", None, None));
        assert!(api_key_allows("/health", Some("secret"), None));
        assert!(api_key_allows("/ws", Some("secret"), None));
        assert!(!api_key_allows("/api/occupancy", Some("secret"), None));
        assert!(!api_key_allows("/api/alerts", Some("secret"), Some("wrong")));
        assert!(api_key_allows("/api/alerts", Some("secret"), Some("secret")));
    }

    #[tokio::test]
    async fn test_ingest_returns_created_and_is_queryable() {
        let state = state();
        let (status, Json(stored)) = ingest_reading(State(state.clone()), reading("TJ001", 12))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(fetched) = get_occupancy(State(state.clone()), Path("TJ001".into()))
            .await
            .unwrap();
        assert_eq!(fetched, stored);

        let Json(all) = list_occupancy(State(state)).await;
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_validation_is_400() {
        let state = state();
        let bad = Ok(Json(serde_json::json!({"bus_id": "TJ001"})));
        let res = ingest_reading(State(state.clone()), bad).await.into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.len(), 0);
    }

    #[tokio::test]
    async fn test_mistyped_fields_are_400_with_field_errors() {
        let state = state();
        let bad = Ok(Json(serde_json::json!({
            "bus_id": "TJ001", "device_id": "CAM001", "occupancy": 3,
            "ts_device": "2024-01-01T00:00:00Z", "route_name": true
        })));
        let res = ingest_reading(State(state.clone()), bad).await.into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = body_json(res).await;
        assert_eq!(body["errors"][0]["field"], "route_name");

        let missing_user = Ok(Json(serde_json::json!({"busId": "TJ001", "occupancyCount": 10})));
        let res = manual_override(State(state.clone()), missing_user).await.into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = body_json(res).await;
        assert_eq!(body["errors"][0]["field"], "submittedBy");
        assert_eq!(state.store.len(), 0);
    }

    #[tokio::test]
    async fn test_numeric_route_id_accepted() {
        let state = state();
        let mut payload = OmsMessageBuilder::occupancy_v1("TJ001", "CAM001", 3, None, "2024-01-01T00:00:00");
        payload["route_id"] = serde_json::json!(7);
        let (status, Json(stored)) = ingest_reading(State(state), Ok(Json(payload))).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(stored.route_id, "7");
        assert_eq!(stored.formatted().split(" | ").next(), Some("Rute: 7"));
    }

    #[tokio::test]
    async fn test_unknown_bus_and_alert_are_404() {
        let state = state();
        let res = get_occupancy(State(state.clone()), Path("NOPE".into()))
            .await
            .into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = get_alert(State(state.clone()), Path("missing".into()))
            .await
            .into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = resolve_alert(State(state), Path("missing".into()))
            .await
            .into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let state = state();
        let alert = state
            .alerts
            .create(AlertType::Maintenance, Some("TJ001"), Severity::Medium, "door check".into())
            .await;

        let Json(first) = resolve_alert(State(state.clone()), Path(alert.id.clone()))
            .await
            .unwrap();
        assert!(!first.is_active);
        assert!(first.resolved_at.is_some());

        let Json(second) = resolve_alert(State(state.clone()), Path(alert.id.clone()))
            .await
            .unwrap();
        assert_eq!(second.resolved_at, first.resolved_at);

        let Json(stats) = alert_stats(State(state)).await;
        assert_eq!(stats.total_alerts, 1);
        assert_eq!(stats.resolved_alerts, 1);
        assert_eq!(stats.active_alerts, 0);
    }

    #[tokio::test]
    async fn test_alert_listing_filters() {
        let state = state();
        let _ = ingest_reading(State(state.clone()), reading("TJ001", 39)).await.unwrap();
        let _ = ingest_reading(State(state.clone()), reading("TJ002", 37)).await.unwrap();

        let Json(all) = list_alerts(State(state.clone()), Query(AlertQuery::default())).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].bus_id.as_deref(), Some("TJ002"), "newest first");

        let query: AlertQuery = serde_json::from_value(serde_json::json!({"severity": "CRITICAL"})).unwrap();
        let Json(critical) = list_alerts(State(state), Query(query)).await;
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].bus_id.as_deref(), Some("TJ001"));
    }

    #[tokio::test]
    async fn test_formatted_and_manual() {
        let state = state();
        let Json(snap) = manual_override(
            State(state.clone()),
            Ok(Json(OmsMessageBuilder::manual_override_v1("TJ001", 10, "guard-1"))),
        )
        .await
        .unwrap();
        assert_eq!(snap.capacity, 40);

        let Json(lines) = list_formatted(State(state)).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].occupancy_percentage, 25);
        assert_eq!(
            lines[0].formatted,
            "Rute: Unknown | Arah: Unknown | Peron: Unknown | Kapasitas: 10 / 40 | No Bus: TJ001 | Estimasi: -- mnt"
        );
    }

    #[tokio::test]
    async fn test_router_builds_and_devices_listed() {
        let state = state();
        let _router = build_router(state.clone());
        let _ = ingest_reading(State(state.clone()), reading("TJ001", 1)).await.unwrap();
        let Json(devices) = list_devices(State(state)).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, "CAM001");
    }
}
