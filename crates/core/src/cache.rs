use chrono::{DateTime, Duration, Utc};
use std::future::Future;

/// A single cached value that is refetched once older than `ttl`.
///
/// The caller passes the clock in, which keeps expiry testable.
#[derive(Debug)]
pub struct TtlCache<T> {
    value: Option<T>,
    fetched_at: Option<DateTime<Utc>>,
    ttl: Duration,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            value: None,
            fetched_at: None,
            ttl,
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.fetched_at.is_some_and(|at| now - at < self.ttl)
    }

    /// Returns the cached value, fetching first if it is missing or stale.
    /// A failed fetch leaves the cache empty.
    pub async fn get_or_refresh<F, Fut, E>(&mut self, now: DateTime<Utc>, fetch: F) -> Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = match self.value.take() {
            Some(v) if self.is_fresh(now) => v,
            _ => {
                self.fetched_at = None;
                let v = fetch().await?;
                self.fetched_at = Some(now);
                v
            }
        };
        Ok(self.value.insert(value))
    }

    pub fn invalidate(&mut self) {
        self.value = None;
        self.fetched_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fetches_once_within_ttl() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let mut cache = TtlCache::new(Duration::seconds(60));
        let t0 = Utc::now();

        for offset in [0, 30, 59] {
            let v = cache
                .get_or_refresh(t0 + Duration::seconds(offset), move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec!["Vendas".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(v.len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_expiry_and_invalidate() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let mut cache = TtlCache::new(Duration::seconds(60));
        let t0 = Utc::now();
        let fetch = move || async move { Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst)) };

        assert_eq!(*cache.get_or_refresh(t0, fetch).await.unwrap(), 0);
        assert_eq!(*cache.get_or_refresh(t0 + Duration::seconds(61), fetch).await.unwrap(), 1);
        cache.invalidate();
        assert_eq!(*cache.get_or_refresh(t0 + Duration::seconds(62), fetch).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let mut cache: TtlCache<u32> = TtlCache::new(Duration::seconds(60));
        let t0 = Utc::now();
        let err = cache
            .get_or_refresh(t0, || async { Err::<u32, _>("down") })
            .await
            .unwrap_err();
        assert_eq!(err, "down");
        let v = cache.get_or_refresh(t0, || async { Ok::<_, &str>(7) }).await.unwrap();
        assert_eq!(*v, 7);
    }
}
