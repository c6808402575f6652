use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;

use crate::store::keys;
use crate::store::{flatten_tx_error, Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartScore {
    pub release_id: u64,
    pub total_ratings: u64,
    pub effective_votes: f64,
    pub weighted_avg_rating: f64,
    pub bayesian_score: f64,
    pub is_esoteric: bool,
    pub last_updated: DateTime<Utc>,
}

fn abort_serde(error: serde_json::Error) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(StoreError::Serialization(error))
}

fn read_score(
    tree: &TransactionalTree,
    key: &[u8],
) -> Result<Option<ChartScore>, ConflictableTransactionError<StoreError>> {
    match tree.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw).map_err(abort_serde)?)),
        None => Ok(None),
    }
}

impl Store {
    /// Insert or replace a score together with its rank index entry.
    pub fn put_chart_score(&self, score: &ChartScore) -> Result<(), StoreError> {
        let key = keys::id_key(score.release_id);
        let encoded = Self::serialize(score)?;

        (&self.chart_scores, &self.chart_score_ranks)
            .transaction(|(scores, ranks)| {
                if let Some(previous) = read_score(scores, &key)? {
                    ranks.remove(&keys::chart_rank_key(previous.bayesian_score, previous.release_id)[..])?;
                }
                scores.insert(&key[..], encoded.as_slice())?;
                ranks.insert(&keys::chart_rank_key(score.bayesian_score, score.release_id)[..], &[])?;
                Ok(())
            })
            .map_err(flatten_tx_error)
    }

    pub fn get_chart_score(&self, release_id: u64) -> Result<Option<ChartScore>, StoreError> {
        match self.chart_scores.get(keys::id_key(release_id))? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn delete_chart_score(&self, release_id: u64) -> Result<bool, StoreError> {
        let key = keys::id_key(release_id);

        (&self.chart_scores, &self.chart_score_ranks)
            .transaction(|(scores, ranks)| {
                let Some(previous) = read_score(scores, &key)? else {
                    return Ok(false);
                };
                scores.remove(&key[..])?;
                ranks.remove(&keys::chart_rank_key(previous.bayesian_score, previous.release_id)[..])?;
                Ok(true)
            })
            .map_err(flatten_tx_error)
    }

    /// Release ids that currently have a score row.
    pub fn chart_score_ids(&self) -> Result<Vec<u64>, StoreError> {
        let mut ids = Vec::with_capacity(self.chart_scores.len());
        for item in self.chart_scores.iter() {
            let (key, _) = item?;
            if let Some(id) = keys::decode_id(&key) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Scores ordered by score descending, then release id ascending, read
    /// lazily from the rank index.
    pub fn ranked_chart_scores(&self) -> impl Iterator<Item = Result<ChartScore, StoreError>> + '_ {
        self.chart_score_ranks.iter().filter_map(move |item| {
            let release_id = match item {
                Ok((key, _)) => keys::decode_pair_tail(&key)?,
                Err(error) => return Some(Err(error.into())),
            };
            // A row deleted between the index read and this lookup is skipped.
            self.get_chart_score(release_id).transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn score(release_id: u64, bayesian_score: f64) -> ChartScore {
        ChartScore {
            release_id,
            total_ratings: 1,
            effective_votes: 1.0,
            weighted_avg_rating: bayesian_score,
            bayesian_score,
            is_esoteric: true,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn listing_orders_by_score_then_id() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        for (id, value) in [(4, 3.1), (2, 3.5), (9, 3.5), (1, 2.0)] {
            store.put_chart_score(&score(id, value)).unwrap();
        }

        let order: Vec<u64> = store
            .ranked_chart_scores()
            .map(|s| s.unwrap().release_id)
            .collect();
        assert_eq!(order, vec![2, 9, 4, 1]);
    }

    #[test]
    fn put_replaces_existing_score() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        store.put_chart_score(&score(4, 3.1)).unwrap();
        store.put_chart_score(&score(4, 3.6)).unwrap();
        assert_eq!(store.get_chart_score(4).unwrap().unwrap().bayesian_score, 3.6);
        // The superseded rank entry is gone.
        assert_eq!(store.chart_score_ranks.len(), 1);
    }

    #[test]
    fn ranked_iteration_stops_early_and_skips_deleted() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        for (id, value) in [(1, 3.0), (2, 3.9), (3, 3.4)] {
            store.put_chart_score(&score(id, value)).unwrap();
        }
        assert!(store.delete_chart_score(2).unwrap());
        assert!(!store.delete_chart_score(2).unwrap());

        let top: Vec<u64> = store
            .ranked_chart_scores()
            .take(1)
            .map(|s| s.unwrap().release_id)
            .collect();
        assert_eq!(top, vec![3]);
        assert_eq!(store.chart_score_ids().unwrap(), vec![1, 3]);
    }
}
