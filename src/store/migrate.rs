use crate::store::keys;
use crate::store::operations::chart_scores::ChartScore;
use crate::store::operations::ratings::Rating;
use crate::store::trees;
use crate::store::{Store, StoreError};

const VERSION_KEY: &str = "_meta:version";

type MigrationFn = fn(&Store) -> Result<(), StoreError>;

fn migrations() -> Vec<(&'static str, MigrationFn)> {
    vec![
        ("001_initial", m001_initial),
        ("002_ratings_by_release_index", m002_ratings_by_release_index),
        ("003_chart_rank_index", m003_chart_rank_index),
    ]
}

/// Apply every migration newer than the persisted version.
///
/// Each migration must be idempotent: the process can die after the migration
/// body succeeds but before its version is recorded, and the body is then
/// replayed on the next start. Versions only move forward.
pub fn run(store: &Store) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    let all = migrations();

    for (index, (name, func)) in all.iter().enumerate() {
        let version = (index + 1) as u32;
        if version > current {
            tracing::info!(version, name, "Running migration");
            func(store)?;
            set_version(store, version)?;
            tracing::info!(version, name, "Migration complete");
        } else {
            tracing::debug!(version, name, "Migration already applied, skipping");
        }
    }

    Ok(())
}

pub fn get_current_version(store: &Store) -> Result<u32, StoreError> {
    match store.config_versions.get(VERSION_KEY.as_bytes())? {
        Some(raw) => {
            let bytes: [u8; 4] = raw.as_ref().try_into().map_err(|_| StoreError::Migration {
                version: 0,
                message: format!("corrupt version marker ({} bytes)", raw.len()),
            })?;
            Ok(u32::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

pub fn set_version(store: &Store, version: u32) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    if version < current {
        return Err(StoreError::Migration {
            version,
            message: format!("Refuse to downgrade from {} to {}", current, version),
        });
    }

    store
        .config_versions
        .insert(VERSION_KEY.as_bytes(), &version.to_be_bytes())?;
    Ok(())
}

fn m001_initial(_store: &Store) -> Result<(), StoreError> {
    Ok(())
}

/// Rebuild the per-release rating index from the primary ratings tree.
fn m002_ratings_by_release_index(store: &Store) -> Result<(), StoreError> {
    for item in store.ratings.iter() {
        let (_, value) = item?;
        let rating: Rating = Store::deserialize(&value)?;
        store.ratings_by_release.insert(
            keys::rating_by_release_key(rating.release_id, rating.user_id),
            &[],
        )?;
    }

    Ok(())
}

/// Build the score-ordered chart index and drop the per-event marker tree that
/// revision watermarks replaced.
fn m003_chart_rank_index(store: &Store) -> Result<(), StoreError> {
    store.chart_score_ranks.clear()?;
    for item in store.chart_scores.iter() {
        let (_, value) = item?;
        let score: ChartScore = Store::deserialize(&value)?;
        store
            .chart_score_ranks
            .insert(keys::chart_rank_key(score.bayesian_score, score.release_id), &[])?;
    }

    store.db.drop_tree(trees::LEGACY_APPLIED_EVENTS)?;
    Ok(())
}
