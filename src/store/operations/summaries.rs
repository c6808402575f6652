use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;

use crate::events::RatingChangeEvent;
use crate::store::keys;
use crate::store::{flatten_tx_error, Store, StoreError};

/// Per-release running aggregate. The incremental path keeps it roughly
/// current; the chart refresh overwrites it with exact values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemRatingSummary {
    pub release_id: u64,
    pub total_rating_count: u64,
    pub average_score: f64,
    pub weighted_score_sum: f64,
    pub weighted_count_sum: f64,
    pub bayesian_score: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl ItemRatingSummary {
    pub fn empty(release_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            release_id,
            total_rating_count: 0,
            average_score: 0.0,
            weighted_score_sum: 0.0,
            weighted_count_sum: 0.0,
            bayesian_score: None,
            updated_at: now,
        }
    }

    /// Fold one rating change into the running average.
    ///
    /// Returns `false` when the event cannot move the average (an update of a
    /// release with no counted ratings, or an unchanged score).
    pub fn apply(&mut self, event: &RatingChangeEvent, now: DateTime<Utc>) -> bool {
        if event.is_created {
            let count = self.total_rating_count as f64;
            self.average_score = (self.average_score * count + event.new_score) / (count + 1.0);
            self.total_rating_count += 1;
            self.updated_at = now;
            return true;
        }

        let Some(old_score) = event.old_score else {
            return false;
        };
        if self.total_rating_count == 0 || old_score == event.new_score {
            return false;
        }
        let count = self.total_rating_count as f64;
        self.average_score = (self.average_score * count - old_score + event.new_score) / count;
        self.updated_at = now;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryApply {
    Applied,
    /// The event left the summary untouched but its revision is now recorded.
    Unchanged,
    /// The summary already accounts for this revision of the rating, either
    /// from an earlier delivery or from a chart reconciliation.
    Duplicate,
}

/// A summary row exactly as stored, taken before a reconciliation reads the
/// ratings so that concurrent consumer writes can be detected.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot(Option<sled::IVec>);

fn abort_serde(error: serde_json::Error) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(StoreError::Serialization(error))
}

fn read_revision(
    tree: &TransactionalTree,
    key: &[u8],
) -> Result<u64, ConflictableTransactionError<StoreError>> {
    Ok(tree
        .get(key)?
        .and_then(|raw| <[u8; 8]>::try_from(raw.as_ref()).ok())
        .map_or(0, u64::from_be_bytes))
}

impl Store {
    pub fn get_summary(&self, release_id: u64) -> Result<Option<ItemRatingSummary>, StoreError> {
        match self.rating_summaries.get(keys::id_key(release_id))? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn summary_snapshot(&self, release_id: u64) -> Result<SummarySnapshot, StoreError> {
        Ok(SummarySnapshot(self.rating_summaries.get(keys::id_key(release_id))?))
    }

    /// Highest revision of `(user, release)` the queue's summary accounts for.
    pub fn applied_revision(&self, queue: &str, release_id: u64, user_id: u64) -> Result<u64, StoreError> {
        Ok(self
            .applied_revisions
            .get(keys::applied_revision_key(queue, release_id, user_id))?
            .and_then(|raw| <[u8; 8]>::try_from(raw.as_ref()).ok())
            .map_or(0, u64::from_be_bytes))
    }

    /// Apply a rating change to its release summary at most once per queue.
    ///
    /// The summary write and the rating's revision watermark commit together.
    /// An event whose revision is not above the watermark is a redelivery or
    /// was already counted by a reconciliation, and is skipped.
    pub fn apply_rating_event(
        &self,
        queue: &str,
        event: &RatingChangeEvent,
        now: DateTime<Utc>,
    ) -> Result<SummaryApply, StoreError> {
        let summary_key = keys::id_key(event.item_id);
        let marker_key = keys::applied_revision_key(queue, event.item_id, event.user_id);

        (&self.rating_summaries, &self.applied_revisions)
            .transaction(|(summaries, applied)| {
                if read_revision(applied, &marker_key)? >= event.revision && event.revision > 0 {
                    return Ok(SummaryApply::Duplicate);
                }

                let mut summary = match summaries.get(summary_key)? {
                    Some(raw) => serde_json::from_slice(&raw).map_err(abort_serde)?,
                    None => ItemRatingSummary::empty(event.item_id, now),
                };
                let outcome = if summary.apply(event, now) {
                    summaries.insert(&summary_key[..], serde_json::to_vec(&summary).map_err(abort_serde)?)?;
                    SummaryApply::Applied
                } else {
                    SummaryApply::Unchanged
                };

                applied.insert(marker_key.as_slice(), &event.revision.to_be_bytes())?;
                Ok(outcome)
            })
            .map_err(flatten_tx_error)
    }

    /// Overwrite a summary with exactly computed values, unless it changed
    /// since `expected` was taken.
    ///
    /// `revisions` lists the `(user_id, revision)` of every rating the exact
    /// values include. Their watermarks move up with the summary, so events for
    /// those revisions that are still queued are skipped instead of counted a
    /// second time. Returns `false` when the summary moved and nothing was written.
    pub fn reconcile_summary(
        &self,
        queue: &str,
        expected: &SummarySnapshot,
        summary: &ItemRatingSummary,
        revisions: &[(u64, u64)],
    ) -> Result<bool, StoreError> {
        let summary_key = keys::id_key(summary.release_id);
        let encoded = Self::serialize(summary)?;

        (&self.rating_summaries, &self.applied_revisions)
            .transaction(|(summaries, applied)| {
                if summaries.get(summary_key)? != expected.0 {
                    return Ok(false);
                }
                summaries.insert(&summary_key[..], encoded.as_slice())?;

                for &(user_id, revision) in revisions {
                    let marker_key = keys::applied_revision_key(queue, summary.release_id, user_id);
                    if read_revision(applied, &marker_key)? < revision {
                        applied.insert(marker_key.as_slice(), &revision.to_be_bytes())?;
                    }
                }
                Ok(true)
            })
            .map_err(flatten_tx_error)
    }
}
