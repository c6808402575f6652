//! Cluster-wide mutual exclusion for scheduled jobs.
//!
//! Every instance may schedule the same job; whichever takes the lease first
//! runs it and the rest skip that firing. Leases expire on their own so a
//! crashed holder never blocks the job permanently.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::store::keys;
use crate::store::{Store, StoreError};

/// Proof of a held lease, needed to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub key: String,
    pub owner: String,
}

pub trait LockProvider: Send + Sync {
    /// Take the named lease without waiting. `None` when someone else holds it.
    fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<LockGuard>, StoreError>;

    /// Give the lease back. Returns `false` if it had already expired and
    /// been taken over.
    fn release(&self, guard: &LockGuard) -> Result<bool, StoreError>;
}

/// Leases kept in the shared `cluster_locks` tree.
pub struct SledLockProvider {
    store: Arc<Store>,
    instance_id: String,
}

impl SledLockProvider {
    pub fn new(store: Arc<Store>, instance_id: &str) -> Self {
        Self {
            store,
            instance_id: instance_id.to_string(),
        }
    }
}

impl LockProvider for SledLockProvider {
    fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<LockGuard>, StoreError> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|_| StoreError::Validation(format!("lease out of range for {}", key)))?;
        let owner = format!("{}:{}", self.instance_id, Uuid::new_v4());
        let now = Utc::now();

        if self.store.try_acquire_lease(key, &owner, now, now + lease)? {
            Ok(Some(LockGuard {
                key: key.to_string(),
                owner,
            }))
        } else {
            Ok(None)
        }
    }

    fn release(&self, guard: &LockGuard) -> Result<bool, StoreError> {
        self.store.release_lease(&guard.key, &guard.owner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    Ran(T),
    /// Another holder had the lock; the body did not run.
    Skipped,
}

impl<T> LockOutcome<T> {
    pub fn ran(&self) -> bool {
        matches!(self, Self::Ran(_))
    }
}

/// Releases the lease when dropped, including on panic or cancellation.
struct HeldLock<'a> {
    provider: &'a dyn LockProvider,
    guard: LockGuard,
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        match self.provider.release(&self.guard) {
            Ok(true) => tracing::debug!(key = %self.guard.key, "Lock released"),
            Ok(false) => tracing::warn!(key = %self.guard.key, "Lock lease expired before release"),
            Err(error) => {
                tracing::error!(key = %self.guard.key, error = %error, "Lock release failed; lease will expire")
            }
        }
    }
}

#[derive(Clone)]
pub struct ClusterLock {
    provider: Arc<dyn LockProvider>,
}

impl ClusterLock {
    pub fn new(provider: Arc<dyn LockProvider>) -> Self {
        Self { provider }
    }

    pub fn sled(store: Arc<Store>, instance_id: &str) -> Self {
        Self::new(Arc::new(SledLockProvider::new(store, instance_id)))
    }

    /// Run `body` under `LOCK:{job_name}` if the lock is free right now.
    pub async fn try_run<F, Fut, T>(
        &self,
        job_name: &str,
        lease: Duration,
        body: F,
    ) -> Result<LockOutcome<T>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = keys::lock_key(job_name);
        let Some(guard) = self.provider.try_acquire(&key, lease)? else {
            tracing::info!(job = job_name, key = %key, "Lock held elsewhere, skipping run");
            return Ok(LockOutcome::Skipped);
        };

        let _held = HeldLock {
            provider: self.provider.as_ref(),
            guard,
        };
        tracing::debug!(job = job_name, key = %key, "Lock acquired");
        Ok(LockOutcome::Ran(body().await))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn second_run_skips_while_first_holds_lock() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db").to_str().unwrap()).unwrap());
        let lock_a = ClusterLock::sled(store.clone(), "a");
        let lock_b = ClusterLock::sled(store.clone(), "b");
        let lease = Duration::from_secs(300);

        let outcome = lock_a
            .try_run("job", lease, || async {
                lock_b.try_run("job", lease, || async { 1 }).await.unwrap()
            })
            .await
            .unwrap();

        assert_eq!(outcome, LockOutcome::Ran(LockOutcome::Skipped));
        assert!(store.get_lease("LOCK:job").unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_is_released_after_body_error() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db").to_str().unwrap()).unwrap());
        let lock = ClusterLock::sled(store.clone(), "a");

        let outcome = lock
            .try_run("job", Duration::from_secs(300), || async { Err::<(), &str>("boom") })
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Ran(Err("boom")));

        let again = lock
            .try_run("job", Duration::from_secs(300), || async { 2 })
            .await
            .unwrap();
        assert!(again.ran());
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db").to_str().unwrap()).unwrap());
        let crashed = SledLockProvider::new(store.clone(), "crashed");
        // Acquired and never released.
        crashed
            .try_acquire("LOCK:job", Duration::from_millis(1))
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let outcome = ClusterLock::sled(store, "b")
            .try_run("job", Duration::from_secs(300), || async { "ran" })
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Ran("ran"));
    }
}
