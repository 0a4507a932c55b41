//! Manual data source: no network, a fixed descriptor, no signal inference.

use async_trait::async_trait;

use super::{DataSource, PhaseInfo, RecoveryCallback};
use crate::error::{NodeError, NodeResult};
use crate::site::SiteDescriptor;

/// Data source used in `operation_mode = "manual"`: there is no remote database, the site
/// descriptor is the fixed, inference-incapable one from [`SiteDescriptor::manual_fixed`].
#[derive(Debug, Default)]
pub struct ManualDataSource;

impl ManualDataSource {
    /// Construct a manual data source.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DataSource for ManualDataSource {
    async fn connect(&self) -> NodeResult<()> {
        Ok(())
    }

    async fn disconnect(&self) {}

    fn is_connected(&self) -> bool {
        true
    }

    fn set_ip(&self, _ip: &str) {}

    async fn site_info(&self, _ip_address: &str) -> NodeResult<SiteDescriptor> {
        Ok(SiteDescriptor::manual_fixed())
    }

    fn supports_signal_data(&self) -> bool {
        false
    }

    async fn phase_info(&self, _intersection_id: &str) -> NodeResult<PhaseInfo> {
        Err(NodeError::NotSupported(
            "manual data source has no signal data".to_string(),
        ))
    }

    async fn movement_info(&self, _intersection_id: &str) -> NodeResult<[i32; 16]> {
        Err(NodeError::NotSupported(
            "manual data source has no signal data".to_string(),
        ))
    }

    fn set_recovery_callback(&self, _callback: RecoveryCallback) {}
}
