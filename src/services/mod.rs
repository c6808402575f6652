pub mod chart;
pub mod rating;

use thiserror::Error;

use crate::store::StoreError;

pub use chart::{ChartEntry, ChartFilter, ChartRunReport, ChartScoringService, TopChart};
pub use rating::{RatingMutationService, RatingSubmission};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
