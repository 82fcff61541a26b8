//! Retry and timeout wrapper for content stores

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::{
    ContentId, ContentStore, MkdirOptions, RemoteEntry, RemotePath, RemoveOptions, StoreStat,
    WriteOptions,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

const MAX_DELAY: Duration = Duration::from_secs(30);

/// Doubling delay schedule with a bounded number of retries
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    next: Duration,
    remaining: u32,
}

impl ExponentialBackoff {
    pub fn new(base_delay_ms: u64, max_retries: u32) -> Self {
        ExponentialBackoff {
            next: Duration::from_millis(base_delay_ms),
            remaining: max_retries,
        }
    }

    /// Delay before the next attempt, or `None` once retries are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_DELAY);
        Some(delay)
    }
}

/// Wraps a store so every call is bounded by a timeout and transient
/// failures are retried with backoff
pub struct RetryingStore<S> {
    inner: S,
    retries: u32,
    base_delay_ms: u64,
    timeout: Duration,
}

impl<S: ContentStore> RetryingStore<S> {
    pub fn new(inner: S, retries: u32, base_delay_ms: u64, timeout: Duration) -> Self {
        RetryingStore {
            inner,
            retries,
            base_delay_ms,
            timeout,
        }
    }

    pub fn from_config(inner: S, config: &StoreConfig) -> Self {
        Self::new(
            inner,
            config.retry_attempts,
            config.retry_base_delay_ms,
            Duration::from_secs(config.op_timeout_secs),
        )
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, op: &'static str, path: &RemotePath, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff::new(self.base_delay_ms, self.retries);

        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(Error::StoreTimeout {
                    path: path.to_string(),
                    op,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if let Some(delay) = backoff.next_delay() {
                        warn!("Store {} of {} failed, retrying in {:?}: {}", op, path, delay, e);
                        tokio::time::sleep(delay).await;
                    } else {
                        error!("Store {} of {} failed after max retries: {}", op, path, e);
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: ContentStore> ContentStore for RetryingStore<S> {
    async fn list(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>> {
        self.run("list", path, || self.inner.list(path)).await
    }

    async fn read(&self, path: &RemotePath) -> Result<Bytes> {
        self.run("read", path, || self.inner.read(path)).await
    }

    async fn write(
        &self,
        path: &RemotePath,
        data: Bytes,
        options: WriteOptions,
    ) -> Result<Option<ContentId>> {
        self.run("write", path, || self.inner.write(path, data.clone(), options))
            .await
    }

    async fn mkdir(&self, path: &RemotePath, options: MkdirOptions) -> Result<()> {
        self.run("mkdir", path, || self.inner.mkdir(path, options)).await
    }

    async fn remove(&self, path: &RemotePath, options: RemoveOptions) -> Result<()> {
        self.run("remove", path, || self.inner.remove(path, options)).await
    }

    async fn stat(&self, path: &RemotePath) -> Result<StoreStat> {
        self.run("stat", path, || self.inner.stat(path)).await
    }
}
