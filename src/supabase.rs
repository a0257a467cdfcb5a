use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::{append_backend_log, required_value};
use crate::error::AppError;
use crate::store::{PredictionStore, RaceCatalog, ResultStore, SeasonStore, SessionProvider};
use crate::types::*;

const USER_AGENT: &str = "f1-predictor";

/// Client for the hosted backend: GoTrue for sessions, PostgREST for tables
/// and RPC. Writes go out with the user's own access token so row-level
/// security applies as it did for the browser client.
pub struct SupabaseBackend {
  client: reqwest::Client,
  base_url: String,
  anon_key: String,
}

impl SupabaseBackend {
  pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
    let base_url = required_value(&config.supabase_url, "SUPABASE_URL").map_err(AppError::Config)?;
    let anon_key = required_value(&config.supabase_anon_key, "SUPABASE_ANON_KEY").map_err(AppError::Config)?;
    let client = reqwest::Client::builder()
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| AppError::Config(format!("build http client: {e}")))?;
    Ok(SupabaseBackend {
      client,
      base_url,
      anon_key,
    })
  }

  fn rest_url(&self, path: &str) -> String {
    format!("{}{SUPABASE_REST_PATH}/{path}", self.base_url)
  }

  fn request(&self, method: Method, url: &str, bearer: Option<&str>) -> RequestBuilder {
    let token = bearer.unwrap_or(&self.anon_key);
    self
      .client
      .request(method, url)
      .header("apikey", &self.anon_key)
      .header("Authorization", format!("Bearer {token}"))
  }

  async fn send(&self, label: &str, url: &str, request: RequestBuilder, body: Option<&Value>) -> Result<(StatusCode, String), AppError> {
    let body_log = body
      .map(|b| serde_json::to_string_pretty(b).unwrap_or_else(|_| b.to_string()))
      .unwrap_or_default();
    append_backend_log(
      &format!("{label} request"),
      &format!("url: {url}\nAuthorization: Bearer [redacted]\nbody:\n{body_log}"),
    );
    let resp = request.send().await.map_err(|e| {
      append_backend_log(&format!("{label} error"), &format!("send failed: {e}"));
      AppError::Storage(format!("backend request failed: {e}"))
    })?;
    let status = resp.status();
    let text = resp.text().await.map_err(|e| {
      append_backend_log(&format!("{label} error"), &format!("read failed: {e}"));
      AppError::Storage(format!("backend read failed: {e}"))
    })?;
    append_backend_log(&format!("{label} response"), &format!("status: {status}\nbody:\n{text}"));
    Ok((status, text))
  }

  async fn send_checked(&self, label: &str, url: &str, request: RequestBuilder, body: Option<&Value>) -> Result<String, AppError> {
    let (status, text) = self.send(label, url, request, body).await?;
    if !status.is_success() {
      return Err(AppError::Storage(postgrest_error_message(status, &text)));
    }
    Ok(text)
  }

  async fn select<T: DeserializeOwned>(
    &self,
    bearer: Option<&str>,
    table: &str,
    query: &[(&str, String)],
  ) -> Result<Vec<T>, AppError> {
    let url = self.rest_url(table);
    let request = self.request(Method::GET, &url, bearer).query(query);
    let text = self.send_checked(&format!("select {table}"), &url, request, None).await?;
    serde_json::from_str(&text).map_err(|e| AppError::Storage(format!("parse {table} rows: {e}")))
  }

  async fn upsert(&self, bearer: &str, table: &str, on_conflict: &str, rows: Value) -> Result<(), AppError> {
    let url = self.rest_url(table);
    let request = self
      .request(Method::POST, &url, Some(bearer))
      .query(&[("on_conflict", on_conflict)])
      .header("Prefer", "resolution=merge-duplicates,return=minimal")
      .json(&rows);
    self
      .send_checked(&format!("upsert {table}"), &url, request, Some(&rows))
      .await
      .map(|_| ())
  }

  async fn rpc(&self, bearer: &str, name: &str, args: Value) -> Result<(), AppError> {
    let url = self.rest_url(&format!("rpc/{name}"));
    let request = self.request(Method::POST, &url, Some(bearer)).json(&args);
    self
      .send_checked(&format!("rpc {name}"), &url, request, Some(&args))
      .await
      .map(|_| ())
  }

  async fn predicted_races(&self, session: &UserSession, session_type: SessionType) -> Result<Vec<PredictionKey>, AppError> {
    let rows: Vec<RaceIdRow> = self
      .select(
        Some(&session.access_token),
        session_type.storage().prediction_table,
        &[
          ("select", "race_id".to_string()),
          ("user_id", format!("eq.{}", session.user_id())),
        ],
      )
      .await?;
    Ok(rows
      .iter()
      .filter_map(|row| value_to_i64(&row.race_id))
      .map(|race_id| PredictionKey { race_id, session_type })
      .collect())
  }
}

#[async_trait]
impl SessionProvider for SupabaseBackend {
  async fn current_session(&self, access_token: &str) -> Result<Option<UserSession>, AppError> {
    let url = format!("{}{SUPABASE_AUTH_USER_PATH}", self.base_url);
    let request = self.request(Method::GET, &url, Some(access_token));
    let (status, text) = self.send("auth user", &url, request, None).await?;
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
      return Ok(None);
    }
    if !status.is_success() {
      return Err(AppError::Storage(postgrest_error_message(status, &text)));
    }
    let user: AuthUser =
      serde_json::from_str(&text).map_err(|e| AppError::Storage(format!("parse auth user: {e}")))?;
    Ok(Some(UserSession {
      user,
      access_token: access_token.to_string(),
    }))
  }

  async fn is_admin(&self, session: &UserSession) -> Result<bool, AppError> {
    let rows: Vec<ProfileRow> = self
      .select(
        Some(&session.access_token),
        "profiles",
        &[
          ("select", "is_admin".to_string()),
          ("id", format!("eq.{}", session.user_id())),
        ],
      )
      .await?;
    Ok(rows.first().and_then(|row| row.is_admin).unwrap_or(false))
  }
}

#[async_trait]
impl RaceCatalog for SupabaseBackend {
  async fn list_races(&self) -> Result<Vec<Race>, AppError> {
    let rows: Vec<RaceRow> = self
      .select(None, "races", &[("select", "*".to_string()), ("order", "round.asc".to_string())])
      .await?;
    Ok(rows.into_iter().filter_map(race_from_row).collect())
  }

  async fn get_race(&self, race_id: i64) -> Result<Option<Race>, AppError> {
    let rows: Vec<RaceRow> = self
      .select(None, "races", &[("select", "*".to_string()), ("id", format!("eq.{race_id}"))])
      .await?;
    Ok(rows.into_iter().find_map(race_from_row))
  }

  async fn list_competitors(&self) -> Result<Vec<Competitor>, AppError> {
    let rows: Vec<DriverRow> = self
      .select(
        None,
        "drivers",
        &[
          ("select", "*".to_string()),
          ("active", "eq.true".to_string()),
          ("order", "driver_name.asc".to_string()),
        ],
      )
      .await?;
    Ok(rows.into_iter().map(competitor_from_row).collect())
  }

  async fn list_teams(&self) -> Result<Vec<Team>, AppError> {
    let rows: Vec<TeamRow> = self
      .select(None, "teams", &[("select", "*".to_string()), ("order", "team_id.asc".to_string())])
      .await?;
    Ok(rows
      .into_iter()
      .map(|row| Team {
        name: row.team_name.unwrap_or_else(|| row.team_id.clone()),
        id: row.team_id,
      })
      .collect())
  }
}

#[async_trait]
impl PredictionStore for SupabaseBackend {
  async fn upsert_prediction(&self, session: &UserSession, prediction: &Prediction) -> Result<(), AppError> {
    let target = prediction.session_type.storage();
    let mut row = serde_json::Map::new();
    row.insert("user_id".to_string(), json!(session.user_id()));
    row.insert("race_id".to_string(), json!(prediction.race_id));
    row.insert(target.column.to_string(), json!(prediction.competitors));
    self
      .upsert(&session.access_token, target.prediction_table, "user_id,race_id", Value::Object(row))
      .await
  }

  async fn get_prediction(
    &self,
    session: &UserSession,
    race_id: i64,
    session_type: SessionType,
  ) -> Result<Option<Prediction>, AppError> {
    let target = session_type.storage();
    let rows: Vec<Value> = self
      .select(
        Some(&session.access_token),
        target.prediction_table,
        &[
          ("select", target.column.to_string()),
          ("user_id", format!("eq.{}", session.user_id())),
          ("race_id", format!("eq.{race_id}")),
        ],
      )
      .await?;
    Ok(rows.first().map(|row| Prediction {
      user_id: session.user_id().to_string(),
      race_id,
      session_type,
      competitors: ranking_from_row(row, target.column),
    }))
  }

  async fn predicted_sessions(&self, session: &UserSession) -> Result<Vec<PredictionKey>, AppError> {
    let (race, qualifying, sprint) = tokio::try_join!(
      self.predicted_races(session, SessionType::Race),
      self.predicted_races(session, SessionType::Qualifying),
      self.predicted_races(session, SessionType::Sprint),
    )?;
    Ok(race.into_iter().chain(qualifying).chain(sprint).collect())
  }
}

#[async_trait]
impl ResultStore for SupabaseBackend {
  async fn upsert_result(&self, session: &UserSession, result: &RaceResult) -> Result<(), AppError> {
    let target = result.session_type.storage();
    let mut row = serde_json::Map::new();
    row.insert("race_id".to_string(), json!(result.race_id));
    row.insert(target.column.to_string(), json!(result.competitors));
    self
      .upsert(&session.access_token, target.result_table, "race_id", Value::Object(row))
      .await
  }

  async fn get_result(&self, race_id: i64, session_type: SessionType) -> Result<Option<RaceResult>, AppError> {
    let target = session_type.storage();
    let rows: Vec<Value> = self
      .select(
        None,
        target.result_table,
        &[
          ("select", target.column.to_string()),
          ("race_id", format!("eq.{race_id}")),
        ],
      )
      .await?;
    Ok(rows.first().map(|row| RaceResult {
      race_id,
      session_type,
      competitors: ranking_from_row(row, target.column),
    }))
  }

  async fn calculate_points(
    &self,
    session: &UserSession,
    race_id: i64,
    session_type: SessionType,
  ) -> Result<(), AppError> {
    self
      .rpc(
        &session.access_token,
        session_type.storage().scoring_rpc,
        json!({ "p_race_id": race_id }),
      )
      .await
  }
}

#[async_trait]
impl SeasonStore for SupabaseBackend {
  async fn upsert_season_picks(&self, session: &UserSession, picks: &SeasonPicks) -> Result<(), AppError> {
    let rows = json!([
      {
        "user_id": session.user_id(),
        "race_id": Value::Null,
        "type": SEASON_DRIVER_KIND,
        "prediction_data": { "driver_id": picks.driver_id },
      },
      {
        "user_id": session.user_id(),
        "race_id": Value::Null,
        "type": SEASON_TEAM_KIND,
        "prediction_data": { "team_id": picks.team_id },
      }
    ]);
    self
      .upsert(&session.access_token, "predictions", "user_id,race_id,type", rows)
      .await
  }

  async fn get_season_picks(&self, session: &UserSession) -> Result<Option<SeasonPicks>, AppError> {
    let rows: Vec<SeasonPredictionRow> = self
      .select(
        Some(&session.access_token),
        "predictions",
        &[
          ("select", "type,prediction_data".to_string()),
          ("user_id", format!("eq.{}", session.user_id())),
          ("race_id", "is.null".to_string()),
          ("type", format!("in.({SEASON_DRIVER_KIND},{SEASON_TEAM_KIND})")),
        ],
      )
      .await?;
    Ok(season_picks_from_rows(session.user_id(), &rows))
  }
}

// ── Row mapping ────────────────────────────────────────────────────────

pub fn value_to_i64(value: &Value) -> Option<i64> {
  match value {
    Value::Number(num) => num.as_i64(),
    Value::String(raw) => raw.parse::<i64>().ok(),
    _ => None,
  }
}

pub fn race_from_row(row: RaceRow) -> Option<Race> {
  let id = value_to_i64(&row.id)?;
  let round = row.round.and_then(|r| u32::try_from(r).ok()).unwrap_or(0);
  Some(Race {
    id,
    name: row.race_name.unwrap_or_else(|| format!("Round {round}")),
    round,
    city: row.city_name,
    qualifying_start: row.qualifying_start,
    sprint_start: row.sprint_race_start,
    race_start: row.race_start,
  })
}

pub fn competitor_from_row(row: DriverRow) -> Competitor {
  Competitor {
    name: row.driver_name.unwrap_or_else(|| row.driver_id.clone()),
    id: row.driver_id,
    team: row.team_id,
    active: row.active.unwrap_or(true),
  }
}

pub fn ranking_from_row(row: &Value, column: &str) -> Vec<String> {
  row
    .get(column)
    .and_then(|v| v.as_array())
    .map(|items| {
      items
        .iter()
        .filter_map(|item| item.as_str().map(|s| s.to_string()))
        .collect()
    })
    .unwrap_or_default()
}

pub fn season_picks_from_rows(user_id: &str, rows: &[SeasonPredictionRow]) -> Option<SeasonPicks> {
  let mut driver_id = None;
  let mut team_id = None;
  for row in rows {
    match row.kind.as_str() {
      SEASON_DRIVER_KIND => {
        driver_id = row.prediction_data.get("driver_id").and_then(|v| v.as_str()).map(|s| s.to_string());
      }
      SEASON_TEAM_KIND => {
        team_id = row.prediction_data.get("team_id").and_then(|v| v.as_str()).map(|s| s.to_string());
      }
      _ => {}
    }
  }
  Some(SeasonPicks {
    user_id: user_id.to_string(),
    driver_id: driver_id?,
    team_id: team_id?,
  })
}

/// PostgREST and GoTrue both answer errors with a JSON object; pass its
/// message through untouched.
pub fn postgrest_error_message(status: StatusCode, body: &str) -> String {
  let parsed: Option<Value> = serde_json::from_str(body).ok();
  let message = parsed.as_ref().and_then(|value| {
    ["message", "msg", "error_description", "error"]
      .iter()
      .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
      .map(|s| s.to_string())
  });
  match message {
    Some(message) if !message.trim().is_empty() => message,
    _ if body.trim().is_empty() => format!("backend error {status}"),
    _ => format!("backend error {status}: {}", body.trim()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_race_row_mapping() {
    let row: RaceRow = serde_json::from_value(json!({
      "id": "24",
      "race_name": "Belgian Grand Prix",
      "round": 13,
      "city_name": "Spa",
      "fp1_start": "2026-07-17T11:30:00+00:00",
      "qualifying_start": "2026-07-18T14:00:00+00:00",
      "sprint_race_start": null,
      "race_start": "2026-07-19T13:00:00+00:00"
    }))
    .unwrap();
    let race = race_from_row(row).unwrap();
    assert_eq!(race.id, 24);
    assert_eq!(race.round, 13);
    assert_eq!(race.city.as_deref(), Some("Spa"));
    assert!(!race.has_sprint());
    assert!(race.race_start.is_some());
  }

  #[test]
  fn test_race_row_without_id_dropped() {
    let row: RaceRow = serde_json::from_value(json!({ "id": null, "race_name": "Ghost" })).unwrap();
    assert!(race_from_row(row).is_none());
  }

  #[test]
  fn test_ranking_column_extraction() {
    let row = json!({ "top_3_drivers": ["VER", "NOR", 7, "LEC"] });
    assert_eq!(ranking_from_row(&row, "top_3_drivers"), vec!["VER", "NOR", "LEC"]);
    assert!(ranking_from_row(&row, "top_10_drivers").is_empty());
  }

  #[test]
  fn test_season_rows_need_both_picks() {
    let rows: Vec<SeasonPredictionRow> = serde_json::from_value(json!([
      { "type": "season_driver", "prediction_data": { "driver_id": "NOR" } },
      { "type": "season_team", "prediction_data": { "team_id": "mclaren" } }
    ]))
    .unwrap();
    let picks = season_picks_from_rows("u1", &rows).unwrap();
    assert_eq!(picks.driver_id, "NOR");
    assert_eq!(picks.team_id, "mclaren");
    assert!(season_picks_from_rows("u1", &rows[..1]).is_none());
  }

  #[test]
  fn test_error_message_passthrough() {
    let body = r#"{"code":"42501","message":"new row violates row-level security policy"}"#;
    assert_eq!(
      postgrest_error_message(StatusCode::FORBIDDEN, body),
      "new row violates row-level security policy"
    );
    assert_eq!(
      postgrest_error_message(StatusCode::BAD_GATEWAY, ""),
      "backend error 502 Bad Gateway"
    );
    assert_eq!(
      postgrest_error_message(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
      "backend error 500 Internal Server Error: boom"
    );
  }

  #[test]
  fn test_storage_targets_are_total() {
    let tables: Vec<&str> = SessionType::ALL.iter().map(|t| t.storage().prediction_table).collect();
    assert_eq!(tables, vec!["predictions_qualifying", "predictions_sprint", "predictions_race"]);
    assert_eq!(SessionType::Qualifying.storage().scoring_rpc, "calc_points_qualy");
    assert_eq!(SessionType::Race.storage().column, "top_10_drivers");
  }
}
