use chrono::{DateTime, Utc};

use crate::types::{Race, SessionType, SessionWindow};

/// A session is closed for predictions once it starts. An unscheduled session
/// is never open.
pub fn is_locked(start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match start {
        Some(start) => now >= start,
        None => true,
    }
}

/// Lock state of one session of a weekend. `None` when the weekend has no
/// such session (sprint on a regular weekend).
pub fn session_locked(race: &Race, session_type: SessionType, now: DateTime<Utc>) -> Option<bool> {
    if !race.sessions().contains(&session_type) {
        return None;
    }
    Some(is_locked(race.session_start(session_type), now))
}

pub fn session_windows(race: &Race, now: DateTime<Utc>) -> Vec<SessionWindow> {
    race.sessions()
        .into_iter()
        .map(|session_type| {
            let starts_at = race.session_start(session_type);
            SessionWindow {
                session_type,
                title: session_type.title(),
                starts_at,
                locked: is_locked(starts_at, now),
                limit: session_type.limit(),
                predicted: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, hour, 0, 0).unwrap()
    }

    fn race(sprint: Option<DateTime<Utc>>) -> Race {
        Race {
            id: 1,
            name: "Australian Grand Prix".to_string(),
            round: 1,
            city: Some("Melbourne".to_string()),
            qualifying_start: Some(ts(5)),
            sprint_start: sprint,
            race_start: Some(ts(10)),
        }
    }

    #[test]
    fn test_open_before_start() {
        assert!(!is_locked(Some(ts(5)), ts(4)));
        assert!(!is_locked(Some(ts(5)), ts(5) - Duration::seconds(1)));
    }

    #[test]
    fn test_locked_at_and_after_start() {
        assert!(is_locked(Some(ts(5)), ts(5)));
        assert!(is_locked(Some(ts(5)), ts(6)));
    }

    #[test]
    fn test_unscheduled_is_always_locked() {
        assert!(is_locked(None, ts(0)));
        assert!(is_locked(None, Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_sprint_omitted_without_schedule() {
        let windows = session_windows(&race(None), ts(0));
        let types: Vec<SessionType> = windows.iter().map(|w| w.session_type).collect();
        assert_eq!(types, vec![SessionType::Qualifying, SessionType::Race]);
        assert_eq!(session_locked(&race(None), SessionType::Sprint, ts(0)), None);
    }

    #[test]
    fn test_windows_evaluated_per_session() {
        let weekend = race(Some(ts(7)));
        let windows = session_windows(&weekend, ts(6));
        assert_eq!(windows.len(), 3);
        assert!(windows[0].locked);
        assert_eq!(windows[1].session_type, SessionType::Sprint);
        assert!(!windows[1].locked);
        assert!(!windows[2].locked);
        assert_eq!(windows[2].limit, 10);
    }
}
