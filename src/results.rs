use std::collections::HashSet;
use tracing::{error, info};

use crate::error::AppError;
use crate::store::Services;
use crate::submission::truncate_ranking;
use crate::types::{RaceResult, ResultSaved, SessionType, UserSession};

/// Official result entry. Only admins get here; the result is stored first
/// and the points procedure runs afterwards.
pub struct ResultEntry<'a> {
    services: &'a Services,
}

impl<'a> ResultEntry<'a> {
    pub fn new(services: &'a Services) -> Self {
        ResultEntry { services }
    }

    pub async fn require_admin(&self, access_token: Option<&str>) -> Result<UserSession, AppError> {
        let session = self.services.require_session(access_token).await?;
        if !self.services.sessions.is_admin(&session).await? {
            return Err(AppError::Forbidden);
        }
        Ok(session)
    }

    pub async fn save(
        &self,
        access_token: Option<&str>,
        race_id: i64,
        session_type: SessionType,
        ordered_ids: &[String],
    ) -> Result<ResultSaved, AppError> {
        let session = self.require_admin(access_token).await?;
        let race = self.services.require_race(race_id).await?;
        if !race.sessions().contains(&session_type) {
            return Err(AppError::NotFound(format!("{session_type} session for race {race_id}")));
        }

        let competitors = truncate_ranking(ordered_ids, session_type);
        validate_result(&competitors, session_type)?;
        let result = RaceResult {
            race_id,
            session_type,
            competitors,
        };
        self.services.results.upsert_result(&session, &result).await?;
        info!("stored official {session_type} result for race {race_id}");

        // A failed points run does not undo the stored result.
        let scoring = self
            .services
            .results
            .calculate_points(&session, race_id, session_type)
            .await;
        let scoring_error = match scoring {
            Ok(()) => None,
            Err(err) => {
                error!("points calculation for race {race_id} {session_type} failed: {err}");
                Some(err.to_string())
            }
        };
        Ok(ResultSaved {
            result,
            points_updated: scoring_error.is_none(),
            scoring_error,
        })
    }
}

fn validate_result(competitors: &[String], session_type: SessionType) -> Result<(), AppError> {
    if competitors.len() < session_type.limit() {
        return Err(AppError::BadRequest(format!(
            "A {session_type} result needs {} competitors, got {}.",
            session_type.limit(),
            competitors.len()
        )));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = competitors.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(AppError::BadRequest(format!("{dup} appears twice in the result.")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{default_roster, MemoryBackend};
    use crate::types::{AuthUser, Race};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryBackend>, Services) {
        let backend = Arc::new(MemoryBackend::with_default_roster());
        backend.add_user("admin", AuthUser { id: "a1".to_string(), email: None }, true);
        backend.add_user("player", AuthUser { id: "p1".to_string(), email: None }, false);
        backend.add_race(Race {
            id: 9,
            name: "Miami Grand Prix".to_string(),
            round: 6,
            city: Some("Miami".to_string()),
            qualifying_start: Some(Utc.with_ymd_and_hms(2026, 5, 2, 20, 0, 0).unwrap()),
            sprint_start: None,
            race_start: Some(Utc.with_ymd_and_hms(2026, 5, 3, 20, 0, 0).unwrap()),
        });
        let services = Services::from_backend(backend.clone());
        (backend, services)
    }

    fn grid() -> Vec<String> {
        default_roster().into_iter().map(|c| c.id).collect()
    }

    #[tokio::test]
    async fn test_admin_saves_and_scores() {
        let (backend, services) = setup();
        let saved = ResultEntry::new(&services)
            .save(Some("admin"), 9, SessionType::Qualifying, &grid())
            .await
            .unwrap();

        assert_eq!(saved.result.competitors, grid()[..3].to_vec());
        assert!(saved.points_updated);
        assert_eq!(backend.scoring_runs(), vec![(9, SessionType::Qualifying)]);
        let stored = services.results.get_result(9, SessionType::Qualifying).await.unwrap();
        assert_eq!(stored, Some(saved.result));
    }

    #[tokio::test]
    async fn test_non_admin_forbidden() {
        let (_backend, services) = setup();
        let entry = ResultEntry::new(&services);
        let result = entry.save(Some("player"), 9, SessionType::Race, &grid()).await;
        assert_eq!(result.unwrap_err(), AppError::Forbidden);
        let result = entry.save(None, 9, SessionType::Race, &grid()).await;
        assert_eq!(result.unwrap_err(), AppError::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_sprint_result_needs_sprint_weekend() {
        let (_backend, services) = setup();
        let result = ResultEntry::new(&services)
            .save(Some("admin"), 9, SessionType::Sprint, &grid())
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_scoring_failure_keeps_result() {
        let (backend, services) = setup();
        backend.fail_scoring(Some("function calc_points_race does not exist"));
        let saved = ResultEntry::new(&services)
            .save(Some("admin"), 9, SessionType::Race, &grid())
            .await
            .unwrap();
        assert!(!saved.points_updated);
        assert_eq!(
            saved.scoring_error.as_deref(),
            Some("function calc_points_race does not exist")
        );
        assert!(services.results.get_result(9, SessionType::Race).await.unwrap().is_some());
    }

    #[test]
    fn test_validate_result() {
        let ids = |raw: &[&str]| raw.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(validate_result(&ids(&["VER", "NOR", "LEC"]), SessionType::Qualifying).is_ok());
        assert!(validate_result(&ids(&["VER", "NOR"]), SessionType::Qualifying).is_err());
        assert!(validate_result(&ids(&["VER", "NOR", "VER"]), SessionType::Qualifying).is_err());
    }
}
