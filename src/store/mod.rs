pub mod keys;
pub mod migrate;
pub mod operations;
pub mod trees;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use thiserror::Error;

#[derive(Debug)]
pub struct Store {
    db: Db,
    pub users: sled::Tree,
    pub artists: sled::Tree,
    pub releases: sled::Tree,
    pub ratings: sled::Tree,
    pub reviews: sled::Tree,
    pub config_versions: sled::Tree,
    // Derived / aggregate trees
    pub user_weight_stats: sled::Tree,
    pub rating_summaries: sled::Tree,
    pub chart_scores: sled::Tree,
    pub chart_score_ranks: sled::Tree,
    // Messaging and coordination
    pub outbox: sled::Tree,
    pub applied_revisions: sled::Tree,
    pub cluster_locks: sled::Tree,
    // Secondary index trees
    pub ratings_by_release: sled::Tree,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: entity={entity}, key={key}")]
    NotFound { entity: String, key: String },
    #[error("conflict: entity={entity}, key={key}")]
    Conflict { entity: String, key: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("migration error at version {version}: {message}")]
    Migration { version: u32, message: String },
}

impl StoreError {
    pub(crate) fn not_found(entity: &str, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            key: key.to_string(),
        }
    }
}

/// Flatten a sled transaction error whose abort payload is already a `StoreError`.
pub(crate) fn flatten_tx_error(error: sled::transaction::TransactionError<StoreError>) -> StoreError {
    match error {
        sled::transaction::TransactionError::Abort(store_error) => store_error,
        sled::transaction::TransactionError::Storage(storage_error) => {
            StoreError::Sled(storage_error)
        }
    }
}

impl Store {
    pub fn open(sled_path: &str) -> Result<Self, StoreError> {
        let db = sled::open(sled_path)?;
        let users = db.open_tree(trees::USERS)?;
        let artists = db.open_tree(trees::ARTISTS)?;
        let releases = db.open_tree(trees::RELEASES)?;
        let ratings = db.open_tree(trees::RATINGS)?;
        let reviews = db.open_tree(trees::REVIEWS)?;
        let config_versions = db.open_tree(trees::CONFIG_VERSIONS)?;
        let user_weight_stats = db.open_tree(trees::USER_WEIGHT_STATS)?;
        let rating_summaries = db.open_tree(trees::RATING_SUMMARIES)?;
        let chart_scores = db.open_tree(trees::CHART_SCORES)?;
        let chart_score_ranks = db.open_tree(trees::CHART_SCORE_RANKS)?;
        let outbox = db.open_tree(trees::OUTBOX)?;
        let applied_revisions = db.open_tree(trees::APPLIED_REVISIONS)?;
        let cluster_locks = db.open_tree(trees::CLUSTER_LOCKS)?;
        let ratings_by_release = db.open_tree(trees::RATINGS_BY_RELEASE)?;

        Ok(Self {
            db,
            users,
            artists,
            releases,
            ratings,
            reviews,
            config_versions,
            user_weight_stats,
            rating_summaries,
            chart_scores,
            chart_score_ranks,
            outbox,
            applied_revisions,
            cluster_locks,
            ratings_by_release,
        })
    }

    pub fn run_migrations(&self) -> Result<(), StoreError> {
        migrate::run(self)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    pub(crate) fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
