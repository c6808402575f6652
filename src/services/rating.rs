use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::events::EventPropagator;
use crate::services::ServiceError;
use crate::store::operations::ratings::Rating;
use crate::store::Store;
use crate::validation::validate_score;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSubmission {
    pub rating: Rating,
    pub created: bool,
}

/// Accepts rating writes and hands each committed change to the propagator.
#[derive(Clone)]
pub struct RatingMutationService {
    store: Arc<Store>,
    propagator: EventPropagator,
}

impl RatingMutationService {
    pub fn new(store: Arc<Store>, propagator: EventPropagator) -> Self {
        Self { store, propagator }
    }

    pub fn submit(&self, release_id: u64, score: f64, user_id: u64) -> Result<RatingSubmission, ServiceError> {
        validate_score(score).map_err(ServiceError::Validation)?;

        let release = self
            .store
            .get_release(release_id)?
            .filter(|release| release.is_active())
            .ok_or(ServiceError::NotFound {
                entity: "release",
                id: release_id,
            })?;
        let user = self.store.get_user(user_id)?.ok_or(ServiceError::NotFound {
            entity: "user",
            id: user_id,
        })?;

        let write = self.store.upsert_rating(
            user.id,
            release.id,
            score,
            user.weighting_score,
            Uuid::new_v4(),
            Utc::now(),
        )?;

        // The write is committed and its event sits in the outbox; a publish
        // failure here is recovered by the relay, not reported to the caller.
        if let Err(error) = self.propagator.publish_committed(&write.event) {
            tracing::warn!(
                event_id = %write.event.event_id,
                release_id,
                user_id,
                error = %error,
                "Publishing rating event failed; left for outbox relay"
            );
        }

        tracing::info!(release_id, user_id, score, created = write.created, "Rating submitted");
        Ok(RatingSubmission {
            rating: write.rating,
            created: write.created,
        })
    }
}
