use tracing::info;

use crate::config::normalize_competitor_code;
use crate::error::AppError;
use crate::store::Services;
use crate::types::{SeasonForm, SeasonPicks, SeasonPicksRequest};

/// Season-long picks: the drivers' champion and the constructors' champion.
pub async fn load_form(services: &Services, access_token: Option<&str>) -> Result<SeasonForm, AppError> {
    let session = services.require_session(access_token).await?;
    let picks = services.season.get_season_picks(&session).await?;
    let mut competitors = services.catalog.list_competitors().await?;
    competitors.sort_by(|a, b| a.name.cmp(&b.name));
    let teams = services.catalog.list_teams().await?;
    Ok(SeasonForm {
        picks,
        competitors,
        teams,
    })
}

pub async fn save_picks(
    services: &Services,
    access_token: Option<&str>,
    request: &SeasonPicksRequest,
) -> Result<SeasonPicks, AppError> {
    let session = services.require_session(access_token).await?;

    let driver_id = normalize_competitor_code(&request.driver_id)
        .ok_or_else(|| AppError::BadRequest("Pick a driver and a team before saving.".to_string()))?;
    let team_id = request.team_id.trim().to_string();
    if team_id.is_empty() {
        return Err(AppError::BadRequest("Pick a driver and a team before saving.".to_string()));
    }

    let roster = services.catalog.list_competitors().await?;
    if !roster.iter().any(|c| c.id == driver_id) {
        return Err(AppError::NotFound(format!("Driver {driver_id}")));
    }
    let teams = services.catalog.list_teams().await?;
    if !teams.iter().any(|t| t.id == team_id) {
        return Err(AppError::NotFound(format!("Team {team_id}")));
    }

    let picks = SeasonPicks {
        user_id: session.user_id().to_string(),
        driver_id,
        team_id,
    };
    services.season.upsert_season_picks(&session, &picks).await?;
    info!("stored season picks for user {}", picks.user_id);
    Ok(picks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::types::AuthUser;
    use std::sync::Arc;

    fn setup() -> Services {
        let backend = Arc::new(MemoryBackend::with_default_roster());
        backend.add_user("tok", AuthUser { id: "u1".to_string(), email: None }, false);
        Services::from_backend(backend)
    }

    fn request(driver: &str, team: &str) -> SeasonPicksRequest {
        SeasonPicksRequest {
            driver_id: driver.to_string(),
            team_id: team.to_string(),
        }
    }

    #[tokio::test]
    async fn test_picks_overwrite() {
        let services = setup();
        save_picks(&services, Some("tok"), &request("ver", "red_bull")).await.unwrap();
        save_picks(&services, Some("tok"), &request("NOR", "mclaren")).await.unwrap();

        let form = load_form(&services, Some("tok")).await.unwrap();
        let picks = form.picks.unwrap();
        assert_eq!(picks.driver_id, "NOR");
        assert_eq!(picks.team_id, "mclaren");
        assert_eq!(form.competitors.first().map(|c| c.name.as_str()), Some("Carlos Sainz"));
    }

    #[tokio::test]
    async fn test_picks_validated() {
        let services = setup();
        assert!(matches!(
            save_picks(&services, Some("tok"), &request("", "ferrari")).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            save_picks(&services, Some("tok"), &request("XXX", "ferrari")).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            save_picks(&services, Some("tok"), &request("LEC", "brawn")).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(
            save_picks(&services, None, &request("LEC", "ferrari")).await,
            Err(AppError::NotAuthenticated)
        );
    }
}
