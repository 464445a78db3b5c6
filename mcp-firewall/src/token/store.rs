//! Token record persistence.
//!
//! The store is a small capability set (`put`, `get`, `extend_ttl`). The
//! in-memory backend is process-local and swept by a background task; the
//! remote backend lives in [`super::remote`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::{Duration, OffsetDateTime};

use crate::error::FirewallError;
use crate::task::{ShutdownSignal, Task};
use crate::token::TokenRecord;

pub type DynTokenStore = Arc<dyn TokenStore>;

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn put(&self, record: TokenRecord) -> Result<(), FirewallError>;

    /// Returns `None` for unknown or expired handles.
    async fn get(&self, handle: &str) -> Result<Option<TokenRecord>, FirewallError>;

    async fn extend_ttl(&self, handle: &str) -> Result<(), FirewallError>;

    fn backend_name(&self) -> &'static str;
}

pub struct MemoryTokenStore {
    records: RwLock<HashMap<String, TokenRecord>>,
    ttl: Duration,
}

impl MemoryTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn sweep(&self) {
        let now = OffsetDateTime::now_utc();
        self.records.write().retain(|_, record| record.expires_at > now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.read().len()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, record: TokenRecord) -> Result<(), FirewallError> {
        self.records.write().insert(record.handle.clone(), record);
        Ok(())
    }

    async fn get(&self, handle: &str) -> Result<Option<TokenRecord>, FirewallError> {
        let records = self.records.read();
        Ok(records.get(handle).filter(|record| !record.is_expired()).cloned())
    }

    async fn extend_ttl(&self, handle: &str) -> Result<(), FirewallError> {
        if let Some(record) = self.records.write().get_mut(handle) {
            record.expires_at = OffsetDateTime::now_utc() + self.ttl;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Periodically removes expired records from the in-memory store.
pub struct SweepTask {
    pub store: Arc<MemoryTokenStore>,
    pub interval: std::time::Duration,
}

#[async_trait]
impl Task for SweepTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "token store sweep";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!("Task started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_signal.wait() => {
                    break;
                }
            }

            self.store.sweep();
        }

        debug!("Task terminated");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::DEFAULT_TTL;

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = MemoryTokenStore::new(DEFAULT_TTL);
        let record = TokenRecord::new("c1", DEFAULT_TTL);
        let handle = record.handle.clone();

        store.put(record).await.expect("memory put is infallible");

        let fetched = store.get(&handle).await.expect("memory get is infallible");
        assert!(fetched.is_some_and(|r| r.conversation_id == "c1"));
    }

    #[tokio::test]
    async fn expired_records_are_invisible_and_swept() {
        let store = MemoryTokenStore::new(DEFAULT_TTL);
        let mut record = TokenRecord::new("c1", DEFAULT_TTL);
        record.expires_at = OffsetDateTime::now_utc() - Duration::seconds(1);
        let handle = record.handle.clone();

        store.put(record).await.expect("memory put is infallible");

        assert!(
            store
                .get(&handle)
                .await
                .expect("memory get is infallible")
                .is_none()
        );

        assert_eq!(store.len(), 1);
        store.sweep();
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn extend_ttl_pushes_expiry_forward() {
        let store = MemoryTokenStore::new(DEFAULT_TTL);
        let mut record = TokenRecord::new("c1", DEFAULT_TTL);
        record.expires_at = OffsetDateTime::now_utc() + Duration::seconds(5);
        let handle = record.handle.clone();

        store.put(record).await.expect("memory put is infallible");
        store.extend_ttl(&handle).await.expect("extend_ttl is infallible");

        let fetched = store
            .get(&handle)
            .await
            .expect("memory get is infallible")
            .expect("record present");
        assert!(fetched.expires_at > OffsetDateTime::now_utc() + Duration::hours(23));
    }
}
