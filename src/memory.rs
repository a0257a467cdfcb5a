use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::Mutex,
};
use tracing::info;

use crate::config::resolve_repo_path;
use crate::error::AppError;
use crate::store::{PredictionStore, RaceCatalog, ResultStore, SeasonStore, SessionProvider};
use crate::types::*;

type PredictionSlot = (String, i64, SessionType);

#[derive(Default)]
struct MemoryState {
    races: Vec<Race>,
    competitors: Vec<Competitor>,
    teams: Vec<Team>,
    tokens: HashMap<String, AuthUser>,
    admins: HashSet<String>,
    predictions: HashMap<PredictionSlot, Prediction>,
    results: HashMap<(i64, SessionType), RaceResult>,
    season: HashMap<String, SeasonPicks>,
    scoring_runs: Vec<(i64, SessionType)>,
    write_failure: Option<String>,
    scoring_failure: Option<String>,
}

/// Process-local stand-in for the hosted backend. Used for local runs
/// (`backend: "memory"`) and throughout the tests.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    pub fn with_default_roster() -> Self {
        let backend = MemoryBackend::new();
        {
            let mut guard = backend.lock();
            guard.competitors = default_roster();
            guard.teams = default_teams();
        }
        backend
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let backend = MemoryBackend::with_default_roster();
        let calendar = config.calendar_path.trim();
        if !calendar.is_empty() {
            let races = load_calendar(&resolve_repo_path(calendar))?;
            info!("memory backend loaded {} races from {calendar}", races.len());
            for race in races {
                backend.add_race(race);
            }
        }
        for user in &config.dev_users {
            backend.add_user(
                &user.token,
                AuthUser {
                    id: user.id.clone(),
                    email: user.email.clone(),
                },
                user.is_admin,
            );
        }
        Ok(backend)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_race(&self, race: Race) {
        let mut guard = self.lock();
        guard.races.retain(|r| r.id != race.id);
        guard.races.push(race);
        guard.races.sort_by_key(|r| (r.round, r.id));
    }

    pub fn set_roster(&self, competitors: Vec<Competitor>) {
        self.lock().competitors = competitors;
    }

    pub fn add_user(&self, token: &str, user: AuthUser, is_admin: bool) {
        let mut guard = self.lock();
        if is_admin {
            guard.admins.insert(user.id.clone());
        }
        guard.tokens.insert(token.to_string(), user);
    }

    pub fn revoke_token(&self, token: &str) {
        self.lock().tokens.remove(token);
    }

    /// Make every following write fail with `message` until cleared.
    pub fn fail_writes(&self, message: Option<&str>) {
        self.lock().write_failure = message.map(|m| m.to_string());
    }

    pub fn fail_scoring(&self, message: Option<&str>) {
        self.lock().scoring_failure = message.map(|m| m.to_string());
    }

    pub fn stored_prediction(&self, user_id: &str, race_id: i64, session_type: SessionType) -> Option<Prediction> {
        self.lock()
            .predictions
            .get(&(user_id.to_string(), race_id, session_type))
            .cloned()
    }

    pub fn prediction_count(&self) -> usize {
        self.lock().predictions.len()
    }

    pub fn scoring_runs(&self) -> Vec<(i64, SessionType)> {
        self.lock().scoring_runs.clone()
    }

    fn check_writable(guard: &MemoryState) -> Result<(), AppError> {
        match &guard.write_failure {
            Some(message) => Err(AppError::Storage(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SessionProvider for MemoryBackend {
    async fn current_session(&self, access_token: &str) -> Result<Option<UserSession>, AppError> {
        let guard = self.lock();
        Ok(guard.tokens.get(access_token).map(|user| UserSession {
            user: user.clone(),
            access_token: access_token.to_string(),
        }))
    }

    async fn is_admin(&self, session: &UserSession) -> Result<bool, AppError> {
        Ok(self.lock().admins.contains(session.user_id()))
    }
}

#[async_trait]
impl RaceCatalog for MemoryBackend {
    async fn list_races(&self) -> Result<Vec<Race>, AppError> {
        Ok(self.lock().races.clone())
    }

    async fn get_race(&self, race_id: i64) -> Result<Option<Race>, AppError> {
        Ok(self.lock().races.iter().find(|r| r.id == race_id).cloned())
    }

    async fn list_competitors(&self) -> Result<Vec<Competitor>, AppError> {
        Ok(self
            .lock()
            .competitors
            .iter()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }

    async fn list_teams(&self) -> Result<Vec<Team>, AppError> {
        Ok(self.lock().teams.clone())
    }
}

#[async_trait]
impl PredictionStore for MemoryBackend {
    async fn upsert_prediction(&self, session: &UserSession, prediction: &Prediction) -> Result<(), AppError> {
        let mut guard = self.lock();
        Self::check_writable(&guard)?;
        let key = (session.user_id().to_string(), prediction.race_id, prediction.session_type);
        guard.predictions.insert(key, prediction.clone());
        Ok(())
    }

    async fn get_prediction(
        &self,
        session: &UserSession,
        race_id: i64,
        session_type: SessionType,
    ) -> Result<Option<Prediction>, AppError> {
        Ok(self.stored_prediction(session.user_id(), race_id, session_type))
    }

    async fn predicted_sessions(&self, session: &UserSession) -> Result<Vec<PredictionKey>, AppError> {
        let guard = self.lock();
        Ok(guard
            .predictions
            .keys()
            .filter(|(user_id, _, _)| user_id == session.user_id())
            .map(|(_, race_id, session_type)| PredictionKey {
                race_id: *race_id,
                session_type: *session_type,
            })
            .collect())
    }
}

#[async_trait]
impl ResultStore for MemoryBackend {
    async fn upsert_result(&self, _session: &UserSession, result: &RaceResult) -> Result<(), AppError> {
        let mut guard = self.lock();
        Self::check_writable(&guard)?;
        guard
            .results
            .insert((result.race_id, result.session_type), result.clone());
        Ok(())
    }

    async fn get_result(&self, race_id: i64, session_type: SessionType) -> Result<Option<RaceResult>, AppError> {
        Ok(self.lock().results.get(&(race_id, session_type)).cloned())
    }

    async fn calculate_points(
        &self,
        _session: &UserSession,
        race_id: i64,
        session_type: SessionType,
    ) -> Result<(), AppError> {
        let mut guard = self.lock();
        if let Some(message) = &guard.scoring_failure {
            return Err(AppError::Storage(message.clone()));
        }
        guard.scoring_runs.push((race_id, session_type));
        Ok(())
    }
}

#[async_trait]
impl SeasonStore for MemoryBackend {
    async fn upsert_season_picks(&self, session: &UserSession, picks: &SeasonPicks) -> Result<(), AppError> {
        let mut guard = self.lock();
        Self::check_writable(&guard)?;
        guard.season.insert(session.user_id().to_string(), picks.clone());
        Ok(())
    }

    async fn get_season_picks(&self, session: &UserSession) -> Result<Option<SeasonPicks>, AppError> {
        Ok(self.lock().season.get(session.user_id()).cloned())
    }
}

// ── Seed data ──────────────────────────────────────────────────────────

/// Accepts either a bare array of races or `{ "races": [...] }`.
pub fn load_calendar(path: &Path) -> Result<Vec<Race>, AppError> {
    if !path.is_file() {
        return Err(AppError::Config(format!("calendar not found at {}", path.display())));
    }
    let data = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read calendar {}: {e}", path.display())))?;
    let value: Value = serde_json::from_str(&data)
        .map_err(|e| AppError::Config(format!("parse calendar {}: {e}", path.display())))?;
    let list = if value.is_array() {
        value
    } else if let Some(races) = value.get("races") {
        races.clone()
    } else {
        return Err(AppError::Config(format!(
            "Calendar {} must be an array of races or an object with a \"races\" array.",
            path.display()
        )));
    };
    serde_json::from_value(list)
        .map_err(|e| AppError::Config(format!("parse calendar {}: {e}", path.display())))
}

pub fn default_roster() -> Vec<Competitor> {
    [
        ("VER", "Max Verstappen", "red_bull"),
        ("NOR", "Lando Norris", "mclaren"),
        ("LEC", "Charles Leclerc", "ferrari"),
        ("PIA", "Oscar Piastri", "mclaren"),
        ("HAM", "Lewis Hamilton", "ferrari"),
        ("RUS", "George Russell", "mercedes"),
        ("SAI", "Carlos Sainz", "williams"),
        ("PER", "Sergio Perez", "cadillac"),
        ("ALO", "Fernando Alonso", "aston_martin"),
        ("HUL", "Nico Hulkenberg", "audi"),
    ]
    .into_iter()
    .map(|(id, name, team)| Competitor {
        id: id.to_string(),
        name: name.to_string(),
        team: Some(team.to_string()),
        active: true,
    })
    .collect()
}

pub fn default_teams() -> Vec<Team> {
    [
        ("aston_martin", "Aston Martin"),
        ("audi", "Audi"),
        ("cadillac", "Cadillac"),
        ("ferrari", "Ferrari"),
        ("mclaren", "McLaren"),
        ("mercedes", "Mercedes"),
        ("red_bull", "Red Bull Racing"),
        ("williams", "Williams"),
    ]
    .into_iter()
    .map(|(id, name)| Team {
        id: id.to_string(),
        name: name.to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race(id: i64, round: u32, name: &str) -> Race {
        Race {
            id,
            name: name.to_string(),
            round,
            city: None,
            qualifying_start: None,
            sprint_start: None,
            race_start: None,
        }
    }

    #[tokio::test]
    async fn test_races_sorted_by_round_and_replaced_by_id() {
        let backend = MemoryBackend::new();
        backend.add_race(race(10, 3, "Round 3"));
        backend.add_race(race(11, 1, "Round 1"));
        backend.add_race(race(12, 2, "Round 2"));
        backend.add_race(race(11, 1, "Renamed"));

        let races = backend.list_races().await.unwrap();
        let ids: Vec<i64> = races.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![11, 12, 10]);
        assert_eq!(races[0].name, "Renamed");
        assert!(backend.get_race(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_competitors_hidden() {
        let backend = MemoryBackend::with_default_roster();
        let mut roster = default_roster();
        roster[0].active = false;
        backend.set_roster(roster);

        let active = backend.list_competitors().await.unwrap();
        assert_eq!(active.len(), 9);
        assert!(active.iter().all(|c| c.id != "VER"));
    }

    #[tokio::test]
    async fn test_predicted_sessions_scoped_to_user() {
        let backend = MemoryBackend::new();
        backend.add_user("a", AuthUser { id: "ua".to_string(), email: None }, false);
        backend.add_user("b", AuthUser { id: "ub".to_string(), email: None }, true);
        let a = backend.current_session("a").await.unwrap().unwrap();
        let b = backend.current_session("b").await.unwrap().unwrap();
        let prediction = Prediction {
            user_id: "ua".to_string(),
            race_id: 1,
            session_type: SessionType::Race,
            competitors: vec!["VER".to_string()],
        };

        backend.upsert_prediction(&a, &prediction).await.unwrap();

        assert_eq!(backend.predicted_sessions(&a).await.unwrap().len(), 1);
        assert!(backend.predicted_sessions(&b).await.unwrap().is_empty());
        assert!(!backend.is_admin(&a).await.unwrap());
        assert!(backend.is_admin(&b).await.unwrap());
    }

    #[test]
    fn test_load_calendar_accepts_both_shapes() {
        let dir = std::env::temp_dir().join(format!("f1-predictor-calendar-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let race = r#"{"id": 1, "name": "Bahrain Grand Prix", "round": 1, "raceStart": "2026-04-12T15:00:00Z"}"#;

        let bare = dir.join("bare.json");
        fs::write(&bare, format!("[{race}]")).unwrap();
        let wrapped = dir.join("wrapped.json");
        fs::write(&wrapped, format!("{{\"races\": [{race}]}}")).unwrap();
        let invalid = dir.join("invalid.json");
        fs::write(&invalid, "{\"rounds\": []}").unwrap();

        let races = load_calendar(&bare).unwrap();
        assert_eq!(races.len(), 1);
        assert!(!races[0].has_sprint());
        assert!(races[0].qualifying_start.is_none());
        assert_eq!(load_calendar(&wrapped).unwrap(), races);
        assert!(matches!(load_calendar(&invalid), Err(AppError::Config(_))));
        assert!(matches!(load_calendar(&dir.join("missing.json")), Err(AppError::Config(_))));

        fs::remove_dir_all(&dir).ok();
    }
}
