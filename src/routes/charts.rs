use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::constants::DEFAULT_CHART_LIMIT;
use crate::response::{ok, AppError};
use crate::services::ChartFilter;
use crate::state::AppState;
use crate::store::operations::catalog::ReleaseType;

pub fn router() -> Router<AppState> {
    Router::new().route("/top", get(top_chart))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopChartQuery {
    pub limit: Option<usize>,
    pub genre_id: Option<u64>,
    pub year: Option<i32>,
    pub release_type: Option<String>,
    pub include_esoteric: Option<bool>,
}

impl TopChartQuery {
    fn filter(&self) -> Result<ChartFilter, AppError> {
        let release_type = match self.release_type.as_deref() {
            Some(raw) => Some(ReleaseType::parse(raw).ok_or_else(|| {
                AppError::bad_request("VALIDATION_ERROR", &format!("unknown release type '{}'", raw))
            })?),
            None => None,
        };
        Ok(ChartFilter {
            genre_id: self.genre_id,
            year: self.year,
            release_type,
            include_esoteric: self.include_esoteric.unwrap_or(false),
        })
    }
}

pub async fn top_chart(
    State(state): State<AppState>,
    query: Result<Query<TopChartQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Query(query) = query.map_err(|rejection| {
        tracing::warn!(error = %rejection, "Invalid chart query");
        AppError::bad_request("INVALID_QUERY", "Malformed query parameters")
    })?;

    let filter = query.filter()?;
    let chart = state
        .charts()
        .get_top_chart(query.limit.unwrap_or(DEFAULT_CHART_LIMIT), &filter)?;
    Ok(ok(chart))
}
