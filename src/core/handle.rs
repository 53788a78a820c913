//! Expiring, single-flight cache for expensive client handles.
//!
//! Building a storage or compute handle costs network round trips (credential
//! exchange, journal registration, container validation). A handle is built
//! at most once per lifetime: concurrent callers wait on the same
//! initialization instead of racing their own.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Cached handle rebuilt after `ttl`
pub struct CachedHandle<T: ?Sized> {
    label: &'static str,
    ttl: Duration,
    slot: Mutex<Option<(Arc<T>, Instant)>>,
}

impl<T: ?Sized> CachedHandle<T> {
    pub fn new(label: &'static str, ttl: Duration) -> Self {
        Self {
            label,
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached handle, building it with `init` when missing or expired.
    ///
    /// The lock is held across `init`, so only one build runs at a time. A
    /// failed build leaves the slot empty and the error goes to the caller.
    pub async fn get_or_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some((handle, expires_at)) = slot.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(Arc::clone(handle));
            }
            debug!(handle = self.label, "Cached handle expired");
        }

        *slot = None;
        let handle = init().await?;
        *slot = Some((Arc::clone(&handle), Instant::now() + self.ttl));
        debug!(handle = self.label, ttl_secs = self.ttl.as_secs(), "Built handle");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_callers_share_one_build() {
        let cache: Arc<CachedHandle<String>> =
            Arc::new(CachedHandle::new("test", Duration::from_secs(60)));
        let builds = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                tokio::spawn(async move {
                    cache
                        .get_or_init(|| async {
                            builds.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, ()>(Arc::new("handle".to_string()))
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().as_str(), "handle");
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_handle_is_rebuilt() {
        let cache: CachedHandle<u32> = CachedHandle::new("test", Duration::from_millis(200));
        let first = cache
            .get_or_init(|| async { Ok::<_, ()>(Arc::new(1)) })
            .await
            .unwrap();
        assert_eq!(*first, 1);

        let cached = cache
            .get_or_init(|| async { Ok::<_, ()>(Arc::new(99)) })
            .await
            .unwrap();
        assert_eq!(*cached, 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = cache
            .get_or_init(|| async { Ok::<_, ()>(Arc::new(2)) })
            .await
            .unwrap();
        assert_eq!(*second, 2);
    }

    #[tokio::test]
    async fn test_failed_build_is_not_cached() {
        let cache: CachedHandle<u32> = CachedHandle::new("test", Duration::from_secs(60));
        let failed = cache
            .get_or_init(|| async { Err::<Arc<u32>, _>("boom") })
            .await;
        assert_eq!(failed.unwrap_err(), "boom");

        let ok = cache
            .get_or_init(|| async { Ok::<_, &str>(Arc::new(7)) })
            .await
            .unwrap();
        assert_eq!(*ok, 7);
    }
}
