//! Data sources for site descriptors and signal plan rows.
//!
//! A [`DataSource`] is this node's one collaborator outside the process: it resolves a
//! camera's [`SiteDescriptor`](crate::site::SiteDescriptor) and, when signal inference is
//! supported, answers the phase/movement queries the inference engine needs. There are two
//! implementations: [`manual::ManualDataSource`] (fixed, no network) and
//! [`remote::RemoteDataSource`] (two independent VoltDB-style backends, each with its own
//! retry and background-reconnect policy).

pub mod manual;
pub mod reconnect;
pub mod remote;
pub mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{NodeError, NodeResult};
use crate::site::SiteDescriptor;

/// Raw phase-duration row from `signal_db`: a monotonic cycle counter plus 16 durations, 8 per
/// ring (A_RING_1..8 then B_RING_1..8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseInfo {
    /// Monotonically increasing cycle counter (`LC_CNT`), wraps per the DB's own rules.
    pub lc_cnt: i32,
    /// 16 phase durations in seconds, ring A slots 0..8 then ring B slots 8..16.
    pub durations: [i32; 16],
}

/// Invoked whenever a [`DataSource`] (re)resolves a non-pending [`SiteDescriptor`], so
/// listeners such as [`crate::registry::SiteInfoRegistry`] can pick up the change without
/// polling. Always called outside any lock the data source itself holds.
pub type RecoveryCallback = Arc<dyn Fn(SiteDescriptor) + Send + Sync>;

/// A source of site descriptors and (optionally) signal-plan rows.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Attempt the initial connection(s). Never fails outright: if a backend is unreachable,
    /// a background reconnect task takes over and this still returns `Ok`, mirroring "partial
    /// connection is allowed" from the original source.
    async fn connect(&self) -> NodeResult<()>;

    /// Tear down connections and stop any background reconnect tasks.
    async fn disconnect(&self);

    /// Whether at least one backing database connection is currently up.
    fn is_connected(&self) -> bool;

    /// Record this node's own IP address, invalidating any cached camera-id resolution so the
    /// next [`Self::site_info`] call re-resolves against the new address.
    fn set_ip(&self, ip: &str);

    /// Resolve (lazily, if not already known) the [`SiteDescriptor`] for `ip_address`.
    async fn site_info(&self, ip_address: &str) -> NodeResult<SiteDescriptor>;

    /// Whether this source currently has a usable `signal_db` connection.
    fn supports_signal_data(&self) -> bool;

    /// Fetch the current phase-duration row for an intersection. Only meaningful when
    /// [`Self::supports_signal_data`] is `true`.
    async fn phase_info(&self, intersection_id: &str) -> NodeResult<PhaseInfo>;

    /// Fetch the current movement-number row (16 values, same slot layout as [`PhaseInfo`]).
    async fn movement_info(&self, intersection_id: &str) -> NodeResult<[i32; 16]>;

    /// Register a callback invoked when the site descriptor changes. Replaces any previously
    /// set callback.
    fn set_recovery_callback(&self, callback: RecoveryCallback);
}

/// Extract an `i32` from a JSON row value, treating numbers encoded as strings as valid too
/// (the remote DB's JSON encoder is not consistent about numeric vs. string columns).
pub(crate) fn value_as_i32(value: &Value) -> NodeResult<i32> {
    if let Some(n) = value.as_i64() {
        return Ok(n as i32);
    }
    if let Some(s) = value.as_str() {
        return s
            .parse::<i32>()
            .map_err(|_| NodeError::QueryFailed(format!("expected integer, got '{s}'")));
    }
    Err(NodeError::QueryFailed(format!(
        "expected integer column, got {value}"
    )))
}

/// Extract a `String` from a JSON row value.
pub(crate) fn value_as_string(value: &Value) -> NodeResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| NodeError::QueryFailed(format!("expected string column, got {value}")))
}
