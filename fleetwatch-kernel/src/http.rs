/**
 * API REST FLEETWATCH - Lecture des vues dérivées du moteur
 *
 * RÔLE :
 * Expose au dashboard (consommateur) les historiques, statuts online/offline,
 * risques, agrégats par unité, trajets et heat points.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, réponses JSON
 * - Chaque handler prend le verrou moteur une fois : vue cohérente
 * - /routes/{id} : fetch historique à la demande, erreurs visibles (502/504),
 *   requête supplantée = 204 sans corps (ce n'est pas une erreur)
 */

use crate::engine::SharedEngine;
use crate::fetch::FetchError;
use crate::health::{HealthTracker, KernelHealth};
use crate::heat;
use crate::models::{EntityView, HeatPoint, Ping, RiskRecord, RoutePoint, UnitReport};
use crate::prefs;
use crate::route_fetch::{RouteFetcher, RouteWindow};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine,
    pub health_tracker: HealthTracker,
    /// Absent = trajets reconstruits depuis l'historique local
    pub routes: Option<Arc<RouteFetcher>>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/entities", get(list_entities))
        .route("/entities/{id}", get(get_entity))
        .route("/entities/{id}/history", get(get_history))
        .route("/entities/{id}/active", put(put_active))
        .route("/risks", get(list_risks))
        .route("/units", get(get_units))
        .route("/routes/{id}", get(get_route))
        .route("/heat", post(post_heat))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.engine))
}

// GET /entities
async fn list_entities(State(app): State<AppState>) -> Json<Vec<EntityView>> {
    let now = OffsetDateTime::now_utc();
    Json(app.engine.lock().entity_views(now))
}

// GET /entities/{id}
async fn get_entity(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EntityView>, StatusCode> {
    let now = OffsetDateTime::now_utc();
    let engine = app.engine.lock();
    let Some(view) = engine.entity_view(&id, now) else { return Err(StatusCode::NOT_FOUND); };
    Ok(Json(view))
}

// GET /entities/{id}/history (vide si inconnue)
async fn get_history(State(app): State<AppState>, Path(id): Path<String>) -> Json<Vec<Ping>> {
    Json(app.engine.lock().history(&id).to_vec())
}

#[derive(Debug, Deserialize)]
struct ActiveBody {
    active: bool,
}

// PUT /entities/{id}/active
async fn put_active(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ActiveBody>,
) -> (StatusCode, Json<Value>) {
    // écriture disque hors du verrou moteur : l'acteur d'ingestion n'attend pas
    let store = app.engine.lock().prefs();
    match prefs::set_active(store.as_ref(), &id, body.active) {
        Ok(()) => {
            info!(entity_id = %id, active = body.active, "[http] active flag updated");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "entity_id": id, "active": body.active })),
            )
        }
        Err(e) => {
            warn!(entity_id = %id, error = %e, "[http] failed to persist active flag");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}

// GET /risks
async fn list_risks(State(app): State<AppState>) -> Json<Vec<RiskRecord>> {
    let now = OffsetDateTime::now_utc();
    Json(app.engine.lock().risks(now))
}

// GET /units
async fn get_units(State(app): State<AppState>) -> Json<UnitReport> {
    let now = OffsetDateTime::now_utc();
    Json(app.engine.lock().unit_report(now))
}

#[derive(Debug, Deserialize)]
struct RouteParams {
    from: Option<String>,
    to: Option<String>,
    /// Clé logique d'annulation (une par vue carte)
    key: Option<String>,
}

// GET /routes/{id}
async fn get_route(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RouteParams>,
) -> Response {
    let Some(fetcher) = app.routes.clone() else {
        let route: Vec<RoutePoint> = app.engine.lock().local_route(&id);
        return Json(route).into_response();
    };

    let key = params.key.unwrap_or_else(|| "route".to_string());
    let window = RouteWindow {
        from: params.from,
        to: params.to,
    };
    match fetcher.fetch_route(&key, &id, &window).await {
        Ok(route) => Json(route).into_response(),
        Err(FetchError::Cancelled) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(entity_id = %id, error = %e, "[http] route fetch failed");
            let code = match e {
                FetchError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            (code, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

// POST /heat (points bruts → heat points)
async fn post_heat(Json(body): Json<Value>) -> Json<Vec<HeatPoint>> {
    let raw = match body {
        Value::Array(items) => items,
        other => crate::route::extract_records(other),
    };
    Json(heat::normalize(&raw))
}
