use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AppError;
use crate::store::{PredictionStore, SessionProvider};
use crate::types::{Prediction, SessionType};

/// First `limit(session_type)` entries, order kept.
pub fn truncate_ranking(ordered: &[String], session_type: SessionType) -> Vec<String> {
    ordered.iter().take(session_type.limit()).cloned().collect()
}

/// Persists a user's finishing-order prediction for one session of a race.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    sessions: Arc<dyn SessionProvider>,
    predictions: Arc<dyn PredictionStore>,
}

impl SubmissionCoordinator {
    pub fn new(sessions: Arc<dyn SessionProvider>, predictions: Arc<dyn PredictionStore>) -> Self {
        SubmissionCoordinator { sessions, predictions }
    }

    /// The session is resolved again here, not trusted from page load, since
    /// it can expire while the user is ordering the list.
    pub async fn submit(
        &self,
        access_token: Option<&str>,
        race_id: i64,
        session_type: &str,
        ordered_ids: &[String],
    ) -> Result<Prediction, AppError> {
        let session = match access_token {
            Some(token) => self.sessions.current_session(token).await?,
            None => None,
        };
        let Some(session) = session else {
            warn!("prediction for race {race_id} rejected: no session");
            return Err(AppError::NotAuthenticated);
        };
        let session_type: SessionType = session_type.parse()?;

        let prediction = Prediction {
            user_id: session.user_id().to_string(),
            race_id,
            session_type,
            competitors: truncate_ranking(ordered_ids, session_type),
        };
        let target = session_type.storage();
        if let Err(err) = self.predictions.upsert_prediction(&session, &prediction).await {
            warn!("save into {} failed for race {race_id}: {err}", target.prediction_table);
            return Err(err);
        }
        info!(
            "stored {} prediction for user {} race {race_id} ({} picks); completion refreshes on next read",
            session_type,
            prediction.user_id,
            prediction.competitors.len()
        );
        Ok(prediction)
    }
}
