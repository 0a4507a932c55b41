//! Remote data source: two independent backends (`cam_db`, `signal_db`), each with its own
//! retry policy and background reconnect task.
//!
//! Grounded on the original `VoltDBSource`: connection is best-effort and partial (either
//! backend may be down at any time without the node refusing to start), `cam_db`'s recovery
//! loop runs for the lifetime of the source, and `signal_db`'s recovery loop stops trying
//! once it reconnects once. Unlike the original, the background loops only flip the
//! connected flag; camera-id re-resolution happens lazily on the next [`DataSource::site_info`]
//! call, which already fires the recovery callback — this avoids a second code path that
//! duplicates the resolve-and-publish logic for no behavioral difference the engine can
//! observe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::reconnect::Backoff;
use super::transport::QueryTransport;
use super::{value_as_i32, value_as_string, DataSource, PhaseInfo, RecoveryCallback};
use crate::config::DbConfig;
use crate::error::{NodeError, NodeResult};
use crate::site::{self, SiteDescriptor};

const TEST_QUERY: &str = "SELECT 1";

struct BackgroundTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Remote data source backed by `cam_db` (camera-id lookup) and `signal_db` (phase plan rows).
pub struct RemoteDataSource {
    cam_db: DbConfig,
    signal_db: DbConfig,
    transport: Arc<dyn QueryTransport>,
    cam_db_connected: Arc<AtomicBool>,
    signal_db_connected: Arc<AtomicBool>,
    ip_address: StdMutex<String>,
    descriptor: StdMutex<SiteDescriptor>,
    recovery_callback: StdMutex<Option<RecoveryCallback>>,
    cam_db_task: tokio::sync::Mutex<Option<BackgroundTask>>,
    signal_db_task: tokio::sync::Mutex<Option<BackgroundTask>>,
}

impl RemoteDataSource {
    /// Build a remote data source from its two backend configs and a transport.
    pub fn new(cam_db: DbConfig, signal_db: DbConfig, transport: Arc<dyn QueryTransport>) -> Self {
        Self {
            cam_db,
            signal_db,
            transport,
            cam_db_connected: Arc::new(AtomicBool::new(false)),
            signal_db_connected: Arc::new(AtomicBool::new(false)),
            ip_address: StdMutex::new(String::new()),
            descriptor: StdMutex::new(site::parse(site::PENDING_CAM_ID)),
            recovery_callback: StdMutex::new(None),
            cam_db_task: tokio::sync::Mutex::new(None),
            signal_db_task: tokio::sync::Mutex::new(None),
        }
    }

    async fn query_with_retry(
        &self,
        db: &DbConfig,
        sql: &str,
    ) -> NodeResult<super::transport::QueryResponse> {
        let mut last_err = None;
        for attempt in 1..=db.retry.max_attempts {
            match self.transport.query(&db.host, db.port, sql).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(attempt, max_attempts = db.retry.max_attempts, error = %e, "query attempt failed");
                    last_err = Some(e);
                    if attempt < db.retry.max_attempts {
                        tokio::time::sleep(std::time::Duration::from_millis(db.retry.delay_ms)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| NodeError::QueryFailed("no attempts made".to_string())))
    }

    async fn test_connection(&self, db: &DbConfig) -> bool {
        self.transport.query(&db.host, db.port, TEST_QUERY).await.is_ok()
    }

    async fn lookup_cam_id(&self, ip_address: &str) -> NodeResult<String> {
        if !self.cam_db_connected.load(Ordering::SeqCst) {
            return Err(NodeError::DbUnavailable("cam_db not connected".to_string()));
        }
        let sql =
            format!("SELECT spot_camr_id FROM SOITGCAMRINFO WHERE edge_sys_2k_ip = '{ip_address}'");
        let response = self.query_with_retry(&self.cam_db, &sql).await?;
        let row = response
            .first_row()
            .ok_or_else(|| NodeError::QueryFailed(format!("no cam id found for ip {ip_address}")))?;
        let first = row
            .first()
            .ok_or_else(|| NodeError::QueryFailed("cam id row has no columns".to_string()))?;
        value_as_string(first)
    }

    /// Re-resolve the camera id if the current descriptor is still pending (or unset) and
    /// `cam_db` is up, publish the result, and fire the recovery callback. Returns the
    /// current descriptor either way. Prefers the IP recorded via [`DataSource::set_ip`] over
    /// `ip_address` once one has been set, so a later `set_ip` call takes effect immediately.
    async fn refresh_descriptor(&self, ip_address: &str) -> SiteDescriptor {
        let needs_resolution = {
            let current = self.descriptor.lock().expect("descriptor lock poisoned");
            current.is_pending() || current.camera_id.is_empty()
        };

        if !needs_resolution || !self.cam_db_connected.load(Ordering::SeqCst) {
            return self.descriptor.lock().expect("descriptor lock poisoned").clone();
        }

        let stored_ip = self.ip_address.lock().expect("ip lock poisoned").clone();
        let ip_address = if stored_ip.is_empty() { ip_address } else { &stored_ip };

        match self.lookup_cam_id(ip_address).await {
            Ok(cam_id) => {
                let descriptor = site::parse(&cam_id);
                info!(
                    camera_id = %descriptor.camera_id,
                    intersection_id = %descriptor.intersection_id,
                    target_phase = descriptor.target_phase,
                    "camera id resolved"
                );
                *self.descriptor.lock().expect("descriptor lock poisoned") = descriptor.clone();

                let callback = self
                    .recovery_callback
                    .lock()
                    .expect("callback lock poisoned")
                    .clone();
                if let Some(callback) = callback {
                    callback(descriptor.clone());
                }
                descriptor
            }
            Err(e) => {
                debug!(error = %e, "camera id lookup failed, publishing pending sentinel");
                let descriptor = site::parse(site::PENDING_CAM_ID);
                *self.descriptor.lock().expect("descriptor lock poisoned") = descriptor.clone();
                descriptor
            }
        }
    }

    fn spawn_cam_db_recovery(&self) -> BackgroundTask {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let transport = Arc::clone(&self.transport);
        let cam_db = self.cam_db.clone();
        let connected = Arc::clone(&self.cam_db_connected);

        let handle = tokio::spawn(async move {
            let mut backoff = Backoff::new(&cam_db.background_reconnect);
            let check_interval =
                std::time::Duration::from_secs(cam_db.background_reconnect.check_interval_sec);
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = tokio::time::sleep(check_interval) => {}
                }
                if connected.load(Ordering::SeqCst) {
                    continue;
                }
                let delay = backoff.next_delay();
                info!(delay_ms = delay.as_millis() as u64, "cam_db reconnect attempt scheduled");
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if transport.query(&cam_db.host, cam_db.port, TEST_QUERY).await.is_ok() {
                    connected.store(true, Ordering::SeqCst);
                    backoff.reset();
                    info!("cam_db reconnected");
                } else {
                    warn!("cam_db reconnect attempt failed");
                }
            }
        });

        BackgroundTask { cancel: cancel_tx, handle }
    }

    fn spawn_signal_db_recovery(&self) -> BackgroundTask {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let transport = Arc::clone(&self.transport);
        let signal_db = self.signal_db.clone();
        let connected = Arc::clone(&self.signal_db_connected);

        let handle = tokio::spawn(async move {
            let mut backoff = Backoff::new(&signal_db.background_reconnect);
            let check_interval =
                std::time::Duration::from_secs(signal_db.background_reconnect.check_interval_sec);
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = tokio::time::sleep(check_interval) => {}
                }
                if connected.load(Ordering::SeqCst) {
                    break;
                }
                let delay = backoff.next_delay();
                info!(delay_ms = delay.as_millis() as u64, "signal_db reconnect attempt scheduled");
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if transport.query(&signal_db.host, signal_db.port, TEST_QUERY).await.is_ok() {
                    connected.store(true, Ordering::SeqCst);
                    info!("signal_db reconnected");
                    break;
                }
                warn!("signal_db reconnect attempt failed");
            }
        });

        BackgroundTask { cancel: cancel_tx, handle }
    }
}

#[async_trait]
impl DataSource for RemoteDataSource {
    async fn connect(&self) -> NodeResult<()> {
        if self.test_connection(&self.cam_db).await {
            self.cam_db_connected.store(true, Ordering::SeqCst);
            info!(host = %self.cam_db.host, port = self.cam_db.port, "cam_db connected");
        } else {
            warn!("cam_db initial connection failed, starting background reconnect");
            if self.cam_db.background_reconnect.enabled {
                let task = self.spawn_cam_db_recovery();
                *self.cam_db_task.lock().await = Some(task);
            }
        }

        if !self.signal_db.enabled {
            info!("signal_db disabled in configuration, skipping");
        } else if self.test_connection(&self.signal_db).await {
            self.signal_db_connected.store(true, Ordering::SeqCst);
            info!(host = %self.signal_db.host, port = self.signal_db.port, "signal_db connected");
        } else {
            warn!("signal_db initial connection failed, starting background reconnect");
            if self.signal_db.background_reconnect.enabled {
                let task = self.spawn_signal_db_recovery();
                *self.signal_db_task.lock().await = Some(task);
            }
        }

        Ok(())
    }

    async fn disconnect(&self) {
        for task_slot in [&self.cam_db_task, &self.signal_db_task] {
            if let Some(task) = task_slot.lock().await.take() {
                let _ = task.cancel.send(());
                let _ = task.handle.await;
            }
        }
        self.cam_db_connected.store(false, Ordering::SeqCst);
        self.signal_db_connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.cam_db_connected.load(Ordering::SeqCst) || self.signal_db_connected.load(Ordering::SeqCst)
    }

    fn set_ip(&self, ip: &str) {
        *self.ip_address.lock().expect("ip lock poisoned") = ip.to_string();
        *self.descriptor.lock().expect("descriptor lock poisoned") = site::parse(site::PENDING_CAM_ID);
    }

    async fn site_info(&self, ip_address: &str) -> NodeResult<SiteDescriptor> {
        Ok(self.refresh_descriptor(ip_address).await)
    }

    fn supports_signal_data(&self) -> bool {
        self.signal_db.enabled && self.signal_db_connected.load(Ordering::SeqCst)
    }

    async fn phase_info(&self, intersection_id: &str) -> NodeResult<PhaseInfo> {
        if !self.supports_signal_data() {
            return Err(NodeError::DbUnavailable("signal_db not connected".to_string()));
        }

        let mut columns = String::from("LC_CNT");
        for ring in ['A', 'B'] {
            for i in 1..=8 {
                columns.push_str(&format!(", {ring}_RING_{i}_PHAS_HR"));
            }
        }
        let sql = format!(
            "SELECT {columns} FROM SOITDSPOTINTSSTTS WHERE SPOT_INTS_ID = {intersection_id}"
        );

        let response = self.query_with_retry(&self.signal_db, &sql).await?;
        let row = response
            .first_row()
            .ok_or_else(|| NodeError::PlanMalformed("no phase duration row returned".to_string()))?;
        if row.len() < 17 {
            return Err(NodeError::PlanMalformed(format!(
                "phase duration row has {} columns, expected 17",
                row.len()
            )));
        }

        let lc_cnt = value_as_i32(&row[0])?;
        let mut durations = [0i32; 16];
        for (i, slot) in durations.iter_mut().enumerate() {
            *slot = value_as_i32(&row[i + 1])?;
        }

        Ok(PhaseInfo { lc_cnt, durations })
    }

    async fn movement_info(&self, intersection_id: &str) -> NodeResult<[i32; 16]> {
        if !self.supports_signal_data() {
            return Err(NodeError::DbUnavailable("signal_db not connected".to_string()));
        }

        let mut columns = Vec::with_capacity(16);
        for ring in ['A', 'B'] {
            for i in 1..=8 {
                columns.push(format!("{ring}_RING_{i}_PHAS_MVMT_NO"));
            }
        }
        let sql = format!(
            "SELECT {} FROM SOITDINTSPHASINFO WHERE SPOT_INTS_ID = {intersection_id} AND OPER_SE_CD = '0' ORDER BY CLCT_DT DESC LIMIT 1",
            columns.join(", ")
        );

        let response = self.query_with_retry(&self.signal_db, &sql).await?;
        let row = response
            .first_row()
            .ok_or_else(|| NodeError::PlanMalformed("no movement row returned".to_string()))?;
        if row.len() < 16 {
            return Err(NodeError::PlanMalformed(format!(
                "movement row has {} columns, expected 16",
                row.len()
            )));
        }

        let mut movements = [0i32; 16];
        for (i, slot) in movements.iter_mut().enumerate() {
            *slot = value_as_i32(&row[i])?;
        }
        Ok(movements)
    }

    fn set_recovery_callback(&self, callback: RecoveryCallback) {
        *self.recovery_callback.lock().expect("callback lock poisoned") = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackgroundReconnectConfig, RetryConfig};
    use serde_json::json;
    use std::sync::Mutex as StdTestMutex;

    struct FakeTransport {
        responses: StdTestMutex<Vec<NodeResult<super::super::transport::QueryResponse>>>,
    }

    #[async_trait]
    impl QueryTransport for FakeTransport {
        async fn query(
            &self,
            _host: &str,
            _port: u16,
            _query: &str,
        ) -> NodeResult<super::super::transport::QueryResponse> {
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                return Err(NodeError::DbUnavailable("exhausted".to_string()));
            }
            responses.remove(0)
        }
    }

    fn db_config() -> DbConfig {
        DbConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 21212,
            retry: RetryConfig {
                max_attempts: 2,
                delay_ms: 1,
            },
            background_reconnect: BackgroundReconnectConfig {
                enabled: false,
                initial_delay_ms: 10,
                max_delay_ms: 20,
                backoff_multiplier: 2.0,
                check_interval_sec: 1,
                jitter_factor: 0.0,
            },
        }
    }

    fn ok_response(row: Vec<serde_json::Value>) -> NodeResult<super::super::transport::QueryResponse> {
        Ok(super::super::transport::QueryResponse {
            status: 1,
            results: vec![super::super::transport::QueryResult { data: vec![row] }],
        })
    }

    #[tokio::test]
    async fn connect_marks_both_backends_up_when_test_queries_succeed() {
        let transport = Arc::new(FakeTransport {
            responses: StdTestMutex::new(vec![ok_response(vec![json!(1)]), ok_response(vec![json!(1)])]),
        });
        let source = RemoteDataSource::new(db_config(), db_config(), transport);
        source.connect().await.expect("connect");

        assert!(source.cam_db_connected.load(Ordering::SeqCst));
        assert!(source.supports_signal_data());
    }

    #[tokio::test]
    async fn site_info_resolves_camera_id_once_cam_db_is_up() {
        let transport = Arc::new(FakeTransport {
            responses: StdTestMutex::new(vec![
                ok_response(vec![json!(1)]),
                ok_response(vec![json!(1)]),
                ok_response(vec![json!("8082_07_04")]),
            ]),
        });
        let source = RemoteDataSource::new(db_config(), db_config(), transport);
        source.connect().await.expect("connect");

        let descriptor = source.site_info("10.0.0.1").await.expect("site info");
        assert_eq!(descriptor.intersection_id, "8082");
        assert_eq!(descriptor.target_phase, 4);
    }

    #[tokio::test]
    async fn site_info_publishes_pending_sentinel_when_lookup_fails() {
        let transport = Arc::new(FakeTransport {
            responses: StdTestMutex::new(vec![ok_response(vec![json!(1)]), ok_response(vec![json!(1)])]),
        });
        let source = RemoteDataSource::new(db_config(), db_config(), transport);
        source.connect().await.expect("connect");

        let descriptor = source.site_info("10.0.0.1").await.expect("site info");
        assert!(descriptor.is_pending());
        assert!(!descriptor.supports_signal_inference);
    }

    #[tokio::test]
    async fn is_connected_reflects_either_backend_being_up() {
        let transport = Arc::new(FakeTransport {
            responses: StdTestMutex::new(vec![ok_response(vec![json!(1)])]),
        });
        let mut signal_db = db_config();
        signal_db.background_reconnect.enabled = false;
        let source = RemoteDataSource::new(db_config(), signal_db, transport);
        assert!(!source.is_connected());

        source.connect().await.expect("connect");
        assert!(source.is_connected());
    }

    #[tokio::test]
    async fn set_ip_invalidates_the_cached_descriptor_and_is_used_on_next_resolution() {
        let transport = Arc::new(FakeTransport {
            responses: StdTestMutex::new(vec![
                ok_response(vec![json!(1)]),
                ok_response(vec![json!(1)]),
                ok_response(vec![json!("8082_07_04")]),
                ok_response(vec![json!("9091_03_02")]),
            ]),
        });
        let source = RemoteDataSource::new(db_config(), db_config(), transport);
        source.connect().await.expect("connect");

        let first = source.site_info("10.0.0.1").await.expect("site info");
        assert_eq!(first.intersection_id, "8082");

        source.set_ip("10.0.0.2");
        let second = source.site_info("10.0.0.1").await.expect("site info");
        assert_eq!(second.intersection_id, "9091");
    }

    #[tokio::test]
    async fn phase_info_errors_when_signal_db_down() {
        let transport = Arc::new(FakeTransport {
            responses: StdTestMutex::new(vec![]),
        });
        let mut signal_db = db_config();
        signal_db.background_reconnect.enabled = false;
        let source = RemoteDataSource::new(db_config(), signal_db, transport);

        assert!(source.phase_info("8082").await.is_err());
    }
}
