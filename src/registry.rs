//! Holds the current [`SiteDescriptor`] and keeps it fresh.
//!
//! `SiteInfoRegistry` is the single point of truth other components read the current site
//! from. It refreshes the descriptor on demand (delegating to the configured
//! [`DataSource`](crate::datasource::DataSource)) and exposes the latest known value without
//! blocking on a network round trip for readers that just want the last-known state.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::datasource::DataSource;
use crate::error::NodeResult;
use crate::site::SiteDescriptor;

/// Caches and refreshes the site descriptor for a single configured IP address.
pub struct SiteInfoRegistry {
    data_source: Arc<dyn DataSource>,
    ip_address: String,
    current: RwLock<SiteDescriptor>,
}

impl SiteInfoRegistry {
    /// Build a registry backed by `data_source`, tracking the site at `ip_address`.
    pub async fn new(data_source: Arc<dyn DataSource>, ip_address: impl Into<String>) -> NodeResult<Self> {
        let ip_address = ip_address.into();
        let current = data_source.site_info(&ip_address).await?;
        Ok(Self {
            data_source,
            ip_address,
            current: RwLock::new(current),
        })
    }

    /// Re-resolve the site descriptor from the data source and cache the result.
    pub async fn refresh(&self) -> NodeResult<SiteDescriptor> {
        let descriptor = self.data_source.site_info(&self.ip_address).await?;
        *self.current.write().await = descriptor.clone();
        if descriptor.is_valid && !descriptor.is_pending() {
            info!(
                camera_id = %descriptor.camera_id,
                target_phase = descriptor.target_phase,
                "site info refreshed"
            );
        }
        Ok(descriptor)
    }

    /// The most recently cached descriptor, without triggering a refresh.
    pub async fn current(&self) -> SiteDescriptor {
        self.current.read().await.clone()
    }

    /// Install a callback fired by the underlying data source when it resolves (or
    /// re-resolves) the camera id on its own, e.g. after a `cam_db` reconnect. The registry's
    /// cache is updated to match before the callback's caller sees the new value via
    /// [`Self::current`].
    pub fn on_recovery(self: &Arc<Self>, callback: Arc<dyn Fn(SiteDescriptor) + Send + Sync>) {
        let registry = Arc::clone(self);
        self.data_source.set_recovery_callback(Arc::new(move |descriptor: SiteDescriptor| {
            let registry = Arc::clone(&registry);
            let descriptor_for_cache = descriptor.clone();
            tokio::spawn(async move {
                *registry.current.write().await = descriptor_for_cache;
            });
            callback(descriptor);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::manual::ManualDataSource;

    #[tokio::test]
    async fn new_seeds_current_from_data_source() {
        let registry = SiteInfoRegistry::new(Arc::new(ManualDataSource::new()), "10.0.0.1")
            .await
            .expect("registry");
        let current = registry.current().await;
        assert!(!current.supports_signal_inference);
    }

    #[tokio::test]
    async fn refresh_updates_cache() {
        let registry = SiteInfoRegistry::new(Arc::new(ManualDataSource::new()), "10.0.0.1")
            .await
            .expect("registry");
        let refreshed = registry.refresh().await.expect("refresh");
        assert_eq!(refreshed, registry.current().await);
    }
}
