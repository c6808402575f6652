use std::time::Duration;

use chrono::{NaiveDate, Utc};

use chart_backend::store::operations::catalog::{Artist, Release, ReleaseStatus, ReleaseType};
use chart_backend::store::operations::users::User;
use chart_backend::store::Store;

pub fn seed_user(store: &Store, id: u64, weight: f64) {
    store
        .create_user(&User::new(id, &format!("user-{id}"), Utc::now()))
        .expect("create user");
    if weight > 0.0 {
        store.apply_user_weights(&[(id, weight)]).expect("set weight");
    }
}

pub fn seed_artist(store: &Store, id: u64, name: &str) {
    store
        .create_artist(&Artist {
            id,
            name: name.to_string(),
        })
        .expect("create artist");
}

pub fn seed_release(store: &Store, id: u64, artist_id: Option<u64>, genre_id: Option<u64>, year: i32) {
    seed_release_with(store, id, artist_id, genre_id, year, ReleaseType::Album, ReleaseStatus::Active);
}

pub fn seed_release_with(
    store: &Store,
    id: u64,
    artist_id: Option<u64>,
    genre_id: Option<u64>,
    year: i32,
    release_type: ReleaseType,
    status: ReleaseStatus,
) {
    store
        .create_release(&Release {
            id,
            artist_id,
            genre_id,
            title: format!("Release {id}"),
            release_type,
            release_date: NaiveDate::from_ymd_opt(year, 6, 1),
            status,
            created_at: Utc::now(),
        })
        .expect("create release");
}

/// Poll `done` until it holds or five seconds pass.
pub async fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}
