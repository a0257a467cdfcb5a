use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

use crate::error::AppError;

// ── Constants ──────────────────────────────────────────────────────────

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
pub const BACKEND_MEMORY: &str = "memory";
pub const BACKEND_SUPABASE: &str = "supabase";
pub const SUPABASE_REST_PATH: &str = "/rest/v1";
pub const SUPABASE_AUTH_USER_PATH: &str = "/auth/v1/user";
pub const SEASON_DRIVER_KIND: &str = "season_driver";
pub const SEASON_TEAM_KIND: &str = "season_team";

// ── Session types ──────────────────────────────────────────────────────

/// The three predictable sessions of a race weekend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[serde(alias = "qualy")]
    Qualifying,
    Sprint,
    Race,
}

/// Where a session type's rows live in the hosted database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageTarget {
    pub prediction_table: &'static str,
    pub result_table: &'static str,
    pub column: &'static str,
    pub scoring_rpc: &'static str,
}

impl SessionType {
    pub const ALL: [SessionType; 3] = [SessionType::Qualifying, SessionType::Sprint, SessionType::Race];

    /// Number of positions that are predicted, shown in the scored zone and stored.
    pub fn limit(self) -> usize {
        match self {
            SessionType::Qualifying => 3,
            SessionType::Sprint => 8,
            SessionType::Race => 10,
        }
    }

    pub fn storage(self) -> StorageTarget {
        match self {
            SessionType::Qualifying => StorageTarget {
                prediction_table: "predictions_qualifying",
                result_table: "results_qualifying",
                column: "top_3_drivers",
                scoring_rpc: "calc_points_qualy",
            },
            SessionType::Sprint => StorageTarget {
                prediction_table: "predictions_sprint",
                result_table: "results_sprint",
                column: "top_8_drivers",
                scoring_rpc: "calc_points_sprint",
            },
            SessionType::Race => StorageTarget {
                prediction_table: "predictions_race",
                result_table: "results_race",
                column: "top_10_drivers",
                scoring_rpc: "calc_points_race",
            },
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            SessionType::Qualifying => "qualifying",
            SessionType::Sprint => "sprint",
            SessionType::Race => "race",
        }
    }

    pub fn title(self) -> String {
        let name = match self {
            SessionType::Qualifying => "Qualifying",
            SessionType::Sprint => "Sprint",
            SessionType::Race => "Grand Prix",
        };
        format!("{name} Top {}", self.limit())
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for SessionType {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "qualifying" | "qualy" => Ok(SessionType::Qualifying),
            "sprint" => Ok(SessionType::Sprint),
            "race" => Ok(SessionType::Race),
            _ => Err(AppError::InvalidSessionType(raw.to_string())),
        }
    }
}

// ── Domain types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    pub id: i64,
    pub name: String,
    pub round: u32,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub qualifying_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sprint_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub race_start: Option<DateTime<Utc>>,
}

impl Race {
    /// A weekend has a sprint exactly when a sprint start is scheduled.
    pub fn has_sprint(&self) -> bool {
        self.sprint_start.is_some()
    }

    pub fn session_start(&self, session_type: SessionType) -> Option<DateTime<Utc>> {
        match session_type {
            SessionType::Qualifying => self.qualifying_start,
            SessionType::Sprint => self.sprint_start,
            SessionType::Race => self.race_start,
        }
    }

    /// Session types that exist for this weekend, in display order.
    pub fn sessions(&self) -> Vec<SessionType> {
        SessionType::ALL
            .into_iter()
            .filter(|session_type| *session_type != SessionType::Sprint || self.has_sprint())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Competitor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub user_id: String,
    pub race_id: i64,
    pub session_type: SessionType,
    pub competitors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    pub race_id: i64,
    pub session_type: SessionType,
    pub competitors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonPicks {
    pub user_id: String,
    pub driver_id: String,
    pub team_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PredictionKey {
    pub race_id: i64,
    pub session_type: SessionType,
}

// ── Auth ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A resolved login: the user plus the access token that proved it.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user: AuthUser,
    pub access_token: String,
}

impl UserSession {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

// ── Config ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevUser {
    pub token: String,
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub supabase_url: String,
    #[serde(default)]
    pub supabase_anon_key: String,
    #[serde(default)]
    pub bind_addr: String,
    #[serde(default)]
    pub static_dir: String,
    #[serde(default)]
    pub calendar_path: String,
    #[serde(default)]
    pub dev_users: Vec<DevUser>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BACKEND_MEMORY.to_string(),
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            static_dir: String::new(),
            calendar_path: String::new(),
            dev_users: Vec::new(),
        }
    }
}

// ── API payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceCard {
    pub id: i64,
    pub name: String,
    pub round: u32,
    pub city: Option<String>,
    pub has_sprint: bool,
    pub race_start: Option<DateTime<Utc>>,
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionWindow {
    pub session_type: SessionType,
    pub title: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub locked: bool,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceDetail {
    pub race: Race,
    pub sessions: Vec<SessionWindow>,
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingView {
    pub session_type: SessionType,
    pub limit: usize,
    pub ranking: Vec<String>,
    pub scored: Vec<String>,
    pub unscored: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictForm {
    pub race_id: i64,
    pub title: String,
    pub locked: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub competitors: Vec<Competitor>,
    pub has_saved_prediction: bool,
    #[serde(flatten)]
    pub view: RankingView,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRankingRequest {
    pub ranking: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRankingResponse {
    pub prediction: Prediction,
    pub redirect_to: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReorderOp {
    MoveUp { index: usize },
    MoveDown { index: usize },
    Move { from: usize, to: usize },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub ranking: Vec<String>,
    pub op: ReorderOp,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultForm {
    pub race_id: i64,
    pub session_type: SessionType,
    pub limit: usize,
    pub result: Option<RaceResult>,
    pub competitors: Vec<Competitor>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSaved {
    pub result: RaceResult,
    pub points_updated: bool,
    pub scoring_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonPicksRequest {
    pub driver_id: String,
    pub team_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonForm {
    pub picks: Option<SeasonPicks>,
    pub competitors: Vec<Competitor>,
    pub teams: Vec<Team>,
}

// ── Backend row types ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RaceRow {
    pub id: Value,
    pub race_name: Option<String>,
    pub round: Option<i64>,
    pub city_name: Option<String>,
    pub qualifying_start: Option<DateTime<Utc>>,
    pub sprint_race_start: Option<DateTime<Utc>>,
    pub race_start: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct DriverRow {
    pub driver_id: String,
    pub driver_name: Option<String>,
    pub team_id: Option<String>,
    pub active: Option<bool>,
}

#[derive(Deserialize)]
pub struct TeamRow {
    pub team_id: String,
    pub team_name: Option<String>,
}

#[derive(Deserialize)]
pub struct ProfileRow {
    pub is_admin: Option<bool>,
}

#[derive(Deserialize)]
pub struct RaceIdRow {
    pub race_id: Value,
}

#[derive(Deserialize)]
pub struct SeasonPredictionRow {
    #[serde(rename = "type")]
    pub kind: String,
    pub prediction_data: Value,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_type_parsing() {
        assert_eq!("qualifying".parse::<SessionType>(), Ok(SessionType::Qualifying));
        assert_eq!("QUALY".parse::<SessionType>(), Ok(SessionType::Qualifying));
        assert_eq!(" sprint ".parse::<SessionType>(), Ok(SessionType::Sprint));
        assert_eq!("race".parse::<SessionType>(), Ok(SessionType::Race));
        assert_eq!(
            "fp1".parse::<SessionType>(),
            Err(AppError::InvalidSessionType("fp1".to_string()))
        );
        let parsed: SessionType = serde_json::from_str("\"qualy\"").unwrap();
        assert_eq!(parsed, SessionType::Qualifying);
    }

    #[test]
    fn test_limits_and_columns_agree() {
        for session_type in SessionType::ALL {
            let column = session_type.storage().column;
            assert_eq!(column, format!("top_{}_drivers", session_type.limit()));
        }
    }

    #[test]
    fn test_race_sessions_follow_sprint_start() {
        let start = Utc.with_ymd_and_hms(2026, 4, 18, 14, 0, 0).unwrap();
        let mut race = Race {
            id: 4,
            name: "Chinese Grand Prix".to_string(),
            round: 4,
            city: None,
            qualifying_start: Some(start),
            sprint_start: None,
            race_start: Some(start),
        };
        assert_eq!(race.sessions(), vec![SessionType::Qualifying, SessionType::Race]);
        race.sprint_start = Some(start);
        assert_eq!(race.sessions(), SessionType::ALL.to_vec());
        assert_eq!(race.session_start(SessionType::Sprint), Some(start));
    }
}
