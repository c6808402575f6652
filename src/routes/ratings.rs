use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::Deserialize;

use crate::extractors::{ActingUser, JsonBody};
use crate::response::{created, ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:release_id/ratings", post(submit_rating))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRatingRequest {
    pub score: f64,
}

pub async fn submit_rating(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(release_id): Path<u64>,
    JsonBody(req): JsonBody<SubmitRatingRequest>,
) -> Result<Response, AppError> {
    let submission = state.ratings().submit(release_id, req.score, user_id)?;
    if submission.created {
        Ok(created(submission).into_response())
    } else {
        Ok(ok(submission).into_response())
    }
}
