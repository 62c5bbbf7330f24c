//! Reachability probes consumed by health checks.
//!
//! Only the boolean verdict matters here; diagnosing *why* something is
//! unreachable belongs to the operator, not the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::store::KeyValueStore;

/// HTTP reachability capability.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn is_reachable(&self, url: &str) -> bool;
}

/// Probe that issues a GET and accepts 2xx/3xx.
pub struct ReqwestProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn is_reachable(&self, url: &str) -> bool {
        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status.is_redirection()
            }
            Err(err) => {
                debug!(url, error = %err, "HTTP probe failed");
                false
            }
        }
    }
}

/// Backing-store reachability capability.
#[async_trait]
pub trait StoreProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe that round-trips a `keys()` call against the store.
pub struct KvStoreProbe {
    store: Arc<dyn KeyValueStore>,
}

impl KvStoreProbe {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreProbe for KvStoreProbe {
    async fn is_reachable(&self) -> bool {
        match self.store.keys().await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "Store probe failed");
                false
            }
        }
    }
}
