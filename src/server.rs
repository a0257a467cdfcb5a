use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::{collections::HashSet, path::PathBuf};
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use crate::completion::CompletionIndex;
use crate::config::normalize_competitor_code;
use crate::deadline::{is_locked, session_windows};
use crate::error::AppError;
use crate::ranking::RankingEditor;
use crate::results::ResultEntry;
use crate::season;
use crate::store::Services;
use crate::submission::{truncate_ranking, SubmissionCoordinator};
use crate::types::*;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub submissions: SubmissionCoordinator,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        let submissions = SubmissionCoordinator::new(services.sessions.clone(), services.predictions.clone());
        AppState { services, submissions }
    }
}

pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/api/races", get(list_races))
        .route("/api/races/next", get(next_race))
        .route("/api/races/:race_id", get(race_detail))
        .route(
            "/api/races/:race_id/predict/:session_type",
            get(predict_form).post(submit_prediction),
        )
        .route(
            "/api/races/:race_id/predict/:session_type/reorder",
            axum::routing::post(reorder_ranking),
        )
        .route("/api/competitors", get(list_competitors))
        .route("/api/season", get(season_form).post(save_season))
        .route(
            "/api/admin/results/:race_id/:session_type",
            get(result_form).post(save_result),
        )
        .with_state(state);

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };
    app.layer(TraceLayer::new_for_http())
}

pub async fn serve(addr: &str, state: AppState, static_dir: Option<PathBuf>) -> Result<(), AppError> {
    let app = router(state, static_dir);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Config(format!("bind {addr}: {e}")))?;
    info!("prediction server listening at http://{addr}/");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Config(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

// ── Helpers ────────────────────────────────────────────────────────────

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn normalize_ranking(raw: &[String]) -> Vec<String> {
    raw.iter().filter_map(|id| normalize_competitor_code(id)).collect()
}

async fn completion_index(services: &Services, session: Option<&UserSession>) -> Result<CompletionIndex, AppError> {
    match session {
        Some(session) => {
            let keys = services.predictions.predicted_sessions(session).await?;
            Ok(CompletionIndex::for_user(session.user_id(), keys))
        }
        None => Ok(CompletionIndex::anonymous()),
    }
}

/// Rejects ids that are repeated or not on the active roster.
fn validate_ranking(ranking: &[String], roster: &[Competitor]) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for id in ranking {
        if !roster.iter().any(|c| c.id == *id) {
            return Err(AppError::BadRequest(format!("{id} is not on the grid.")));
        }
        if !seen.insert(id.as_str()) {
            return Err(AppError::BadRequest(format!("{id} appears twice in the ranking.")));
        }
    }
    Ok(())
}

/// The race plus a check that the weekend actually has this session.
async fn race_with_session(services: &Services, race_id: i64, session_type: SessionType) -> Result<Race, AppError> {
    let race = services.require_race(race_id).await?;
    if !race.sessions().contains(&session_type) {
        return Err(AppError::NotFound(format!("{session_type} session for race {race_id}")));
    }
    Ok(race)
}

// ── Handlers ───────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_races(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<RaceCard>>, AppError> {
    let token = bearer_token(&headers);
    let session = state.services.optional_session(token.as_deref()).await?;
    let races = state.services.catalog.list_races().await?;
    let index = completion_index(&state.services, session.as_ref()).await?;
    Ok(Json(races.iter().map(|race| index.race_card(race)).collect()))
}

/// The first race still to start, or null once the season is over.
async fn next_race(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Option<RaceCard>>, AppError> {
    let token = bearer_token(&headers);
    let session = state.services.optional_session(token.as_deref()).await?;
    let now = Utc::now();
    let races = state.services.catalog.list_races().await?;
    let next = races
        .iter()
        .filter_map(|race| race.race_start.filter(|start| *start > now).map(|start| (start, race)))
        .min_by_key(|(start, _)| *start)
        .map(|(_, race)| race);
    let Some(race) = next else {
        return Ok(Json(None));
    };
    let index = completion_index(&state.services, session.as_ref()).await?;
    Ok(Json(Some(index.race_card(race))))
}

async fn race_detail(
    State(state): State<AppState>,
    Path(race_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<RaceDetail>, AppError> {
    let token = bearer_token(&headers);
    let session = state.services.optional_session(token.as_deref()).await?;
    let race = state.services.require_race(race_id).await?;
    let index = completion_index(&state.services, session.as_ref()).await?;

    let mut sessions = session_windows(&race, Utc::now());
    if let Some(session) = session.as_ref() {
        for window in sessions.iter_mut() {
            window.predicted = Some(index.has_prediction(session.user_id(), race.id, window.session_type));
        }
    }
    let complete = index.is_complete(&race);
    Ok(Json(RaceDetail {
        race,
        sessions,
        complete,
    }))
}

async fn predict_form(
    State(state): State<AppState>,
    Path((race_id, session_type)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Result<Json<PredictForm>, AppError> {
    let session_type: SessionType = session_type.parse()?;
    let token = bearer_token(&headers);
    let session = state.services.optional_session(token.as_deref()).await?;
    let race = race_with_session(&state.services, race_id, session_type).await?;
    let roster = state.services.require_roster().await?;

    let saved = match session.as_ref() {
        Some(session) => {
            state
                .services
                .predictions
                .get_prediction(session, race_id, session_type)
                .await?
        }
        None => None,
    };
    let editor = match saved.as_ref() {
        Some(prediction) => RankingEditor::seeded(&roster, &prediction.competitors),
        None => RankingEditor::from_roster(&roster),
    };
    let starts_at = race.session_start(session_type);
    Ok(Json(PredictForm {
        race_id,
        title: session_type.title(),
        locked: is_locked(starts_at, Utc::now()),
        starts_at,
        competitors: roster,
        has_saved_prediction: saved.is_some(),
        view: editor.view(session_type),
    }))
}

async fn reorder_ranking(
    Path((_race_id, session_type)): Path<(i64, String)>,
    Json(request): Json<ReorderRequest>,
) -> Result<Json<RankingView>, AppError> {
    let session_type: SessionType = session_type.parse()?;
    let mut editor = RankingEditor::new(normalize_ranking(&request.ranking));
    editor.apply(request.op);
    Ok(Json(editor.view(session_type)))
}

async fn submit_prediction(
    State(state): State<AppState>,
    Path((race_id, session_type_raw)): Path<(i64, String)>,
    headers: HeaderMap,
    Json(request): Json<SubmitRankingRequest>,
) -> Result<Json<SubmitRankingResponse>, AppError> {
    let Some(token) = bearer_token(&headers) else {
        return Err(AppError::NotAuthenticated);
    };
    state.services.require_session(Some(token.as_str())).await?;
    let session_type: SessionType = session_type_raw.parse()?;
    let race = race_with_session(&state.services, race_id, session_type).await?;
    if is_locked(race.session_start(session_type), Utc::now()) {
        return Err(AppError::SessionLocked(session_type));
    }
    let ranking = truncate_ranking(&normalize_ranking(&request.ranking), session_type);
    if ranking.is_empty() {
        return Err(AppError::BadRequest("Ranking is empty.".to_string()));
    }
    let roster = state.services.require_roster().await?;
    validate_ranking(&ranking, &roster)?;

    // Detached from the request future; a dropped connection does not cancel it.
    let submissions = state.submissions.clone();
    let write = tokio::spawn(async move {
        submissions
            .submit(Some(token.as_str()), race_id, &session_type_raw, &ranking)
            .await
    });
    let prediction = write
        .await
        .map_err(|e| AppError::Storage(format!("prediction write aborted: {e}")))??;

    Ok(Json(SubmitRankingResponse {
        prediction,
        redirect_to: format!("/races/{race_id}"),
    }))
}

async fn list_competitors(State(state): State<AppState>) -> Result<Json<Vec<Competitor>>, AppError> {
    Ok(Json(state.services.require_roster().await?))
}

async fn season_form(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<SeasonForm>, AppError> {
    let token = bearer_token(&headers);
    Ok(Json(season::load_form(&state.services, token.as_deref()).await?))
}

async fn save_season(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SeasonPicksRequest>,
) -> Result<Json<SeasonPicks>, AppError> {
    let token = bearer_token(&headers);
    Ok(Json(season::save_picks(&state.services, token.as_deref(), &request).await?))
}

async fn result_form(
    State(state): State<AppState>,
    Path((race_id, session_type)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Result<Json<ResultForm>, AppError> {
    let session_type: SessionType = session_type.parse()?;
    let token = bearer_token(&headers);
    ResultEntry::new(&state.services).require_admin(token.as_deref()).await?;
    race_with_session(&state.services, race_id, session_type).await?;

    let roster = state.services.require_roster().await?;
    let result = state.services.results.get_result(race_id, session_type).await?;
    let editor = match result.as_ref() {
        Some(result) => RankingEditor::seeded(&roster, &result.competitors),
        None => RankingEditor::from_roster(&roster),
    };
    let order = editor.order();
    let mut competitors = roster;
    competitors.sort_by_key(|c| order.iter().position(|id| *id == c.id).unwrap_or(usize::MAX));
    Ok(Json(ResultForm {
        race_id,
        session_type,
        limit: session_type.limit(),
        result,
        competitors,
    }))
}

async fn save_result(
    State(state): State<AppState>,
    Path((race_id, session_type)): Path<(i64, String)>,
    headers: HeaderMap,
    Json(request): Json<SubmitRankingRequest>,
) -> Result<Json<ResultSaved>, AppError> {
    let session_type: SessionType = session_type.parse()?;
    let token = bearer_token(&headers);
    let ranking = normalize_ranking(&request.ranking);
    let saved = ResultEntry::new(&state.services)
        .save(token.as_deref(), race_id, session_type, &ranking)
        .await?;
    Ok(Json(saved))
}
