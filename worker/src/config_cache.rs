use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use database::Database;
use reddalert_core::{ConfigSnapshot, CoreError, TenantConfig};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Tenant config reader: the only path the pipeline uses to read
/// tenant config. Holds a copy-on-write snapshot, invalidated when a
/// tenant's monotonic config version moves or the TTL lapses. A failed
/// refresh keeps the previous snapshot.
pub struct ConfigCache {
    db: Arc<Database>,
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    state: Mutex<CacheState>,
    ttl: Duration,
}

#[derive(Default)]
struct CacheState {
    versions: HashMap<Uuid, i64>,
    refreshed_at: Option<Instant>,
}

impl ConfigCache {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self {
            db,
            snapshot: RwLock::new(Arc::new(ConfigSnapshot::default())),
            state: Mutex::new(CacheState::default()),
            ttl,
        }
    }

    /// Current snapshot; readers never block writers.
    pub async fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Refresh when stale, then return the (possibly unchanged) snapshot.
    pub async fn refresh_if_stale(&self) -> Arc<ConfigSnapshot> {
        let mut state = self.state.lock().await;

        let ttl_expired = state
            .refreshed_at
            .map_or(true, |at| at.elapsed() >= self.ttl);

        let needs_refresh = if ttl_expired {
            true
        } else {
            match self.db.config_versions().await {
                Ok(current) => current != state.versions,
                Err(e) => {
                    warn!("config version check failed, keeping snapshot: {e}");
                    false
                }
            }
        };

        if needs_refresh {
            match self.reload().await {
                Ok(versions) => {
                    state.versions = versions;
                    state.refreshed_at = Some(Instant::now());
                }
                Err(e) => {
                    warn!("config refresh failed, keeping previous snapshot: {e}");
                }
            }
        }

        drop(state);
        self.snapshot().await
    }

    /// Force a reload regardless of versions or TTL.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let versions = self.reload().await?;
        let mut state = self.state.lock().await;
        state.versions = versions;
        state.refreshed_at = Some(Instant::now());
        Ok(())
    }

    async fn reload(&self) -> Result<HashMap<Uuid, i64>, CoreError> {
        let configs = self.db.load_tenant_configs().await?;
        let mut tenants: HashMap<Uuid, Arc<TenantConfig>> = HashMap::with_capacity(configs.len());
        let mut versions = HashMap::with_capacity(configs.len());
        for config in configs {
            versions.insert(config.tenant.id, config.tenant.config_version);
            tenants.insert(config.tenant.id, Arc::new(config));
        }

        debug!("config snapshot refreshed: {} tenants", tenants.len());
        *self.snapshot.write().await = Arc::new(ConfigSnapshot { tenants });
        Ok(versions)
    }
}
