use std::collections::HashSet;

use crate::types::{PredictionKey, Race, RaceCard, SessionType};

/// A weekend is complete when qualifying and the race are predicted, plus the
/// sprint on sprint weekends.
pub fn is_complete<F>(race: &Race, user_id: &str, has_prediction: F) -> bool
where
    F: Fn(&str, i64, SessionType) -> bool,
{
    race.sessions()
        .into_iter()
        .all(|session_type| has_prediction(user_id, race.id, session_type))
}

/// Completion lookups for one user, built from a single fetch of their
/// predicted sessions. Lives for one request only.
#[derive(Debug, Default)]
pub struct CompletionIndex {
    user_id: Option<String>,
    keys: HashSet<PredictionKey>,
}

impl CompletionIndex {
    pub fn anonymous() -> Self {
        CompletionIndex::default()
    }

    pub fn for_user(user_id: &str, keys: impl IntoIterator<Item = PredictionKey>) -> Self {
        CompletionIndex {
            user_id: Some(user_id.to_string()),
            keys: keys.into_iter().collect(),
        }
    }

    pub fn has_prediction(&self, user_id: &str, race_id: i64, session_type: SessionType) -> bool {
        self.user_id.as_deref() == Some(user_id) && self.keys.contains(&PredictionKey { race_id, session_type })
    }

    pub fn is_complete(&self, race: &Race) -> bool {
        match self.user_id.as_deref() {
            Some(user_id) => is_complete(race, user_id, |u, r, t| self.has_prediction(u, r, t)),
            None => false,
        }
    }

    pub fn race_card(&self, race: &Race) -> RaceCard {
        RaceCard {
            id: race.id,
            name: race.name.clone(),
            round: race.round,
            city: race.city.clone(),
            has_sprint: race.has_sprint(),
            race_start: race.race_start,
            complete: self.is_complete(race),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn race(with_sprint: bool) -> Race {
        Race {
            id: 4,
            name: "Chinese Grand Prix".to_string(),
            round: 2,
            city: Some("Shanghai".to_string()),
            qualifying_start: Some(Utc.with_ymd_and_hms(2026, 3, 14, 7, 0, 0).unwrap()),
            sprint_start: with_sprint.then(|| Utc.with_ymd_and_hms(2026, 3, 14, 3, 0, 0).unwrap()),
            race_start: Some(Utc.with_ymd_and_hms(2026, 3, 15, 7, 0, 0).unwrap()),
        }
    }

    fn keys(types: &[SessionType]) -> Vec<PredictionKey> {
        types
            .iter()
            .map(|session_type| PredictionKey { race_id: 4, session_type: *session_type })
            .collect()
    }

    #[test]
    fn test_sprint_weekend_needs_sprint_pick() {
        let weekend = race(true);
        let partial = CompletionIndex::for_user("u1", keys(&[SessionType::Qualifying, SessionType::Race]));
        assert!(!partial.is_complete(&weekend));

        let full = CompletionIndex::for_user(
            "u1",
            keys(&[SessionType::Qualifying, SessionType::Race, SessionType::Sprint]),
        );
        assert!(full.is_complete(&weekend));
    }

    #[test]
    fn test_regular_weekend_ignores_sprint() {
        let weekend = race(false);
        let index = CompletionIndex::for_user("u1", keys(&[SessionType::Qualifying, SessionType::Race]));
        assert!(index.is_complete(&weekend));

        let with_stray_sprint = CompletionIndex::for_user("u1", keys(&SessionType::ALL));
        assert!(with_stray_sprint.is_complete(&weekend));
    }

    #[test]
    fn test_missing_race_pick_is_incomplete() {
        let index = CompletionIndex::for_user("u1", keys(&[SessionType::Qualifying]));
        assert!(!index.is_complete(&race(false)));
    }

    #[test]
    fn test_predicate_receives_user_and_race() {
        let weekend = race(false);
        let complete = is_complete(&weekend, "u9", |user_id, race_id, _| user_id == "u9" && race_id == 4);
        assert!(complete);
        assert!(!is_complete(&weekend, "u8", |user_id, _, _| user_id == "u9"));
    }

    #[test]
    fn test_anonymous_never_complete() {
        let card = CompletionIndex::anonymous().race_card(&race(true));
        assert!(!card.complete);
        assert!(card.has_sprint);
    }
}
