//! Per-platform session cache.
//!
//! One gateway session exists per normalized platform URL. Sessions are
//! created on first use and live until their platform is removed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::store::layout::normalize_platform_url;

use super::client::HttpGateway;
use super::gateway::RemoteGateway;

/// Builds a fresh gateway session for a platform URL.
pub trait GatewayFactory: Send + Sync {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn RemoteGateway>>;
}

/// Factory for [`HttpGateway`] sessions.
pub struct HttpGatewayFactory {
    config: RemoteConfig,
}

impl HttpGatewayFactory {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }
}

impl GatewayFactory for HttpGatewayFactory {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn RemoteGateway>> {
        Ok(Arc::new(HttpGateway::new(base_url, self.config.clone())?))
    }
}

/// Maps normalized platform URLs to live gateway sessions.
pub struct SessionRegistry {
    factory: Box<dyn GatewayFactory>,
    sessions: Mutex<HashMap<String, Arc<dyn RemoteGateway>>>,
}

impl SessionRegistry {
    pub fn new(factory: Box<dyn GatewayFactory>) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registry backed by real HTTP sessions.
    pub fn http(config: RemoteConfig) -> Self {
        Self::new(Box::new(HttpGatewayFactory::new(config)))
    }

    /// Session for `platform_url`, created on first use.
    pub fn session(&self, platform_url: &str) -> Result<Arc<dyn RemoteGateway>> {
        let key = normalize_platform_url(platform_url);
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| Error::Config("session registry lock poisoned".to_string()))?;

        if let Some(existing) = sessions.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let gateway = self.factory.connect(&key)?;
        sessions.insert(key.clone(), Arc::clone(&gateway));
        tracing::debug!(platform = %key, "Opened remote session");
        Ok(gateway)
    }

    pub fn is_cached(&self, platform_url: &str) -> bool {
        let key = normalize_platform_url(platform_url);
        self.sessions
            .lock()
            .map(|sessions| sessions.contains_key(&key))
            .unwrap_or(false)
    }

    /// Drop the session for `platform_url`, logging out remotely first.
    ///
    /// A failed logout is logged and otherwise ignored.
    pub async fn evict(&self, platform_url: &str) {
        let key = normalize_platform_url(platform_url);
        let removed = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&key),
            Err(_) => None,
        };

        if let Some(gateway) = removed {
            if let Err(e) = gateway.logout().await {
                tracing::warn!(platform = %key, error = %e, "Logout failed during eviction");
            }
            tracing::debug!(platform = %key, "Evicted remote session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::{MockGateway, MockGatewayFactory};

    #[test]
    fn test_session_reused_per_normalized_url() {
        let mock = MockGateway::new();
        let registry = SessionRegistry::new(Box::new(MockGatewayFactory::new(mock.clone())));

        let a = registry.session("https://cloud.example.com/").unwrap();
        let b = registry.session("https://cloud.example.com/console/api").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.is_cached("https://cloud.example.com"));
        assert!(!registry.is_cached("https://other.example.com"));
    }

    #[tokio::test]
    async fn test_evict_logs_out() {
        let mock = MockGateway::new();
        let registry = SessionRegistry::new(Box::new(MockGatewayFactory::new(mock.clone())));
        registry.session("https://cloud.example.com").unwrap();

        registry.evict("https://cloud.example.com/").await;
        assert!(!registry.is_cached("https://cloud.example.com"));
        assert_eq!(mock.call_count("logout"), 1);

        // Evicting an unknown platform is a no-op
        registry.evict("https://cloud.example.com").await;
        assert_eq!(mock.call_count("logout"), 1);
    }

    #[test]
    fn test_http_factory_builds_session() {
        let registry = SessionRegistry::http(RemoteConfig::default());
        assert!(registry.session("https://cloud.example.com").is_ok());
    }
}
