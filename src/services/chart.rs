use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::{CHART_PROGRESS_LOG_EVERY, RATING_SUMMARY_QUEUE, SUMMARY_RECONCILE_ATTEMPTS, UNKNOWN_ARTIST};
use crate::scoring::{bayesian_score, is_esoteric, round2, VoteTally};
use crate::services::ServiceError;
use crate::store::operations::catalog::{Release, ReleaseType};
use crate::store::operations::chart_scores::ChartScore;
use crate::store::operations::summaries::ItemRatingSummary;
use crate::store::{Store, StoreError};
use crate::validation::validate_chart_limit;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartFilter {
    pub genre_id: Option<u64>,
    pub year: Option<i32>,
    pub release_type: Option<ReleaseType>,
    pub include_esoteric: bool,
}

impl ChartFilter {
    fn admits(&self, score: &ChartScore, release: &Release) -> bool {
        if score.is_esoteric && !self.include_esoteric {
            return false;
        }
        if self.genre_id.is_some() && release.genre_id != self.genre_id {
            return false;
        }
        if self.year.is_some() && release.year() != self.year {
            return false;
        }
        if self.release_type.is_some_and(|wanted| release.release_type != wanted) {
            return false;
        }
        release.is_active()
    }

    fn title(&self, limit: usize) -> String {
        let mut title = format!("Top {} Releases", limit);
        if let Some(genre_id) = self.genre_id {
            title.push_str(&format!(" (Genre {})", genre_id));
        }
        if let Some(year) = self.year {
            title.push_str(&format!(" ({})", year));
        }
        if let Some(release_type) = self.release_type {
            title.push_str(&format!(" [{}]", release_type.as_str()));
        }
        title
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub rank: usize,
    pub release_id: u64,
    pub title: String,
    pub artist_name: String,
    pub release_year: Option<i32>,
    pub release_type: ReleaseType,
    pub bayesian_score: f64,
    pub weighted_avg_rating: f64,
    pub effective_votes: f64,
    pub total_ratings: u64,
    pub is_esoteric: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopChart {
    pub chart_type: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub entries: Vec<ChartEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChartRunReport {
    pub processed: usize,
    pub failed: usize,
    /// Rows removed because their release is no longer active.
    pub pruned: usize,
}

/// Exact aggregates of one release's ratings at the time of reading.
struct ReleaseTally {
    votes: VoteTally,
    plain_avg: f64,
    /// `(user_id, revision)` of every rating counted.
    revisions: Vec<(u64, u64)>,
}

/// Authoritative weighted chart scores, recomputed from raw ratings.
#[derive(Clone)]
pub struct ChartScoringService {
    store: Arc<Store>,
}

impl ChartScoringService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn tally(&self, release_id: u64) -> Result<ReleaseTally, StoreError> {
        let ratings = self.store.ratings_for_release(release_id)?;
        let rater_ids: Vec<u64> = ratings.iter().map(|rating| rating.user_id).collect();
        let weights = self.store.get_user_weights(&rater_ids)?;

        let votes = VoteTally::from_votes(ratings.iter().map(|rating| {
            let weight = weights.get(&rating.user_id).copied().unwrap_or(0.0);
            (rating.score, weight)
        }));
        let plain_avg = if ratings.is_empty() {
            0.0
        } else {
            ratings.iter().map(|rating| rating.score).sum::<f64>() / ratings.len() as f64
        };
        Ok(ReleaseTally {
            votes,
            plain_avg,
            revisions: ratings.iter().map(|rating| (rating.user_id, rating.revision)).collect(),
        })
    }

    /// Weighted Bayesian score of one release using current rater weights.
    pub fn calculate_bayesian_score(&self, release_id: u64) -> Result<f64, ServiceError> {
        let tally = self.tally(release_id)?;
        Ok(bayesian_score(&tally.votes))
    }

    /// Recompute, persist and reconcile one release.
    ///
    /// The summary is snapshotted before the ratings are read and only
    /// replaced if no consumer wrote it in between; otherwise the tally is
    /// taken again.
    fn recompute_one(&self, release_id: u64, now: DateTime<Utc>) -> Result<ChartScore, StoreError> {
        for attempt in 1..=SUMMARY_RECONCILE_ATTEMPTS {
            let snapshot = self.store.summary_snapshot(release_id)?;
            let tally = self.tally(release_id)?;
            let score = ChartScore {
                release_id,
                total_ratings: tally.votes.total_ratings,
                effective_votes: tally.votes.effective_votes,
                weighted_avg_rating: round2(tally.votes.weighted_avg()),
                bayesian_score: bayesian_score(&tally.votes),
                is_esoteric: is_esoteric(tally.votes.effective_votes),
                last_updated: now,
            };
            let summary = ItemRatingSummary {
                release_id,
                total_rating_count: tally.votes.total_ratings,
                average_score: tally.plain_avg,
                weighted_score_sum: tally.votes.weighted_sum,
                weighted_count_sum: tally.votes.effective_votes,
                bayesian_score: Some(score.bayesian_score),
                updated_at: now,
            };

            if self
                .store
                .reconcile_summary(RATING_SUMMARY_QUEUE, &snapshot, &summary, &tally.revisions)?
            {
                self.store.put_chart_score(&score)?;
                return Ok(score);
            }
            tracing::debug!(release_id, attempt, "Summary moved during recompute, retrying");
        }

        Err(StoreError::Conflict {
            entity: "rating_summary".to_string(),
            key: release_id.to_string(),
        })
    }

    /// Drop chart rows of releases that are no longer active.
    fn prune_inactive(&self, active: &HashSet<u64>) -> Result<usize, StoreError> {
        let mut pruned = 0;
        for release_id in self.store.chart_score_ids()? {
            if !active.contains(&release_id) && self.store.delete_chart_score(release_id)? {
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// Recompute every active release. A failing release is logged and
    /// skipped; it never aborts the run.
    pub fn recompute_all(&self) -> Result<ChartRunReport, ServiceError> {
        let release_ids = self.store.list_active_release_ids()?;
        let total = release_ids.len();
        let now = Utc::now();
        let mut report = ChartRunReport::default();

        tracing::info!(total, "Chart recompute started");
        for &release_id in &release_ids {
            match self.recompute_one(release_id, now) {
                Ok(_) => report.processed += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(release_id, error = %error, "Chart score update failed, skipping");
                }
            }

            let done = report.processed + report.failed;
            if done % CHART_PROGRESS_LOG_EVERY == 0 {
                tracing::info!(done, total, "Chart recompute progress");
            }
        }

        let active: HashSet<u64> = release_ids.into_iter().collect();
        report.pruned = self.prune_inactive(&active)?;

        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            pruned = report.pruned,
            "Chart recompute complete"
        );
        Ok(report)
    }

    pub fn get_top_chart(&self, limit: usize, filter: &ChartFilter) -> Result<TopChart, ServiceError> {
        validate_chart_limit(limit).map_err(ServiceError::Validation)?;

        let mut entries = Vec::with_capacity(limit);
        let mut last_updated: Option<DateTime<Utc>> = None;

        for score in self.store.ranked_chart_scores() {
            if entries.len() >= limit {
                break;
            }
            let score = score?;
            let Some(release) = self.store.get_release(score.release_id)? else {
                continue;
            };
            if !filter.admits(&score, &release) {
                continue;
            }

            let artist_name = match release.artist_id {
                Some(artist_id) => self.store.get_artist(artist_id)?.map(|artist| artist.name),
                None => None,
            }
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

            last_updated = Some(last_updated.map_or(score.last_updated, |seen| seen.max(score.last_updated)));
            entries.push(ChartEntry {
                rank: entries.len() + 1,
                release_id: score.release_id,
                title: release.title.clone(),
                artist_name,
                release_year: release.year(),
                release_type: release.release_type,
                bayesian_score: score.bayesian_score,
                weighted_avg_rating: score.weighted_avg_rating,
                effective_votes: score.effective_votes,
                total_ratings: score.total_ratings,
                is_esoteric: score.is_esoteric,
            });
        }

        Ok(TopChart {
            chart_type: filter.title(limit),
            last_updated,
            entries,
        })
    }
}
