//! Seams to the hosted backend.
//!
//! Each concern the handlers need from the backend is a trait here, so
//! handlers and coordinators take an injected implementation:
//! `supabase::SupabaseBackend` in production, `memory::MemoryBackend` for
//! local runs and tests.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AppError;
use crate::types::{
    Competitor, Prediction, PredictionKey, Race, RaceResult, SeasonPicks, SessionType, Team,
    UserSession,
};

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Resolves an access token into a live session. `Ok(None)` when the token
    /// is unknown or expired.
    async fn current_session(&self, access_token: &str) -> Result<Option<UserSession>, AppError>;

    async fn is_admin(&self, session: &UserSession) -> Result<bool, AppError>;
}

#[async_trait]
pub trait RaceCatalog: Send + Sync {
    /// All races ordered by round.
    async fn list_races(&self) -> Result<Vec<Race>, AppError>;

    async fn get_race(&self, race_id: i64) -> Result<Option<Race>, AppError>;

    /// The active roster.
    async fn list_competitors(&self) -> Result<Vec<Competitor>, AppError>;

    async fn list_teams(&self) -> Result<Vec<Team>, AppError>;
}

#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Insert or replace the prediction for `(user, race, session type)`.
    async fn upsert_prediction(&self, session: &UserSession, prediction: &Prediction) -> Result<(), AppError>;

    async fn get_prediction(
        &self,
        session: &UserSession,
        race_id: i64,
        session_type: SessionType,
    ) -> Result<Option<Prediction>, AppError>;

    /// Every `(race, session type)` the user has a stored prediction for.
    async fn predicted_sessions(&self, session: &UserSession) -> Result<Vec<PredictionKey>, AppError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn upsert_result(&self, session: &UserSession, result: &RaceResult) -> Result<(), AppError>;

    async fn get_result(&self, race_id: i64, session_type: SessionType) -> Result<Option<RaceResult>, AppError>;

    /// Runs the external points procedure for one session of a race.
    async fn calculate_points(
        &self,
        session: &UserSession,
        race_id: i64,
        session_type: SessionType,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait SeasonStore: Send + Sync {
    async fn upsert_season_picks(&self, session: &UserSession, picks: &SeasonPicks) -> Result<(), AppError>;

    async fn get_season_picks(&self, session: &UserSession) -> Result<Option<SeasonPicks>, AppError>;
}

/// The set of backend handles the server works with.
#[derive(Clone)]
pub struct Services {
    pub sessions: Arc<dyn SessionProvider>,
    pub catalog: Arc<dyn RaceCatalog>,
    pub predictions: Arc<dyn PredictionStore>,
    pub results: Arc<dyn ResultStore>,
    pub season: Arc<dyn SeasonStore>,
}

impl Services {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: SessionProvider + RaceCatalog + PredictionStore + ResultStore + SeasonStore + 'static,
    {
        Services {
            sessions: backend.clone(),
            catalog: backend.clone(),
            predictions: backend.clone(),
            results: backend.clone(),
            season: backend,
        }
    }

    /// Resolves the caller's session right now; a missing or stale token is
    /// `NotAuthenticated`.
    pub async fn require_session(&self, access_token: Option<&str>) -> Result<UserSession, AppError> {
        let Some(token) = access_token else {
            return Err(AppError::NotAuthenticated);
        };
        self.sessions
            .current_session(token)
            .await?
            .ok_or(AppError::NotAuthenticated)
    }

    pub async fn optional_session(&self, access_token: Option<&str>) -> Result<Option<UserSession>, AppError> {
        match access_token {
            Some(token) => self.sessions.current_session(token).await,
            None => Ok(None),
        }
    }

    pub async fn require_race(&self, race_id: i64) -> Result<Race, AppError> {
        self.catalog
            .get_race(race_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Race {race_id}")))
    }

    pub async fn require_roster(&self) -> Result<Vec<Competitor>, AppError> {
        let roster = self.catalog.list_competitors().await?;
        if roster.is_empty() {
            return Err(AppError::NotFound("Competitor roster".to_string()));
        }
        Ok(roster)
    }
}
