//! Signal-inference engine: reconstructs the target phase's green/red cycle from periodic
//! plan queries and emits green-on/green-off transition events on its own schedule, without
//! querying the DB on every tick.
//!
//! Grounded on the original `SignalCalculator`: a one-shot `sync()` establishes the current
//! plan and cycle position, then a background task sleeps until the next scheduled
//! transition, waking only to emit an event or to perform a periodic resync every
//! [`SYNC_INTERVAL_CYCLES`] completed cycles.

pub mod plan;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use self::plan::PhasePlan;
use crate::datasource::DataSource;
use crate::error::{NodeError, NodeResult};
use crate::special_site::SignalDirectionSource;

/// Resync with the signal-plan database every this many completed cycles.
const SYNC_INTERVAL_CYCLES: u32 = 3;

/// A green-on or green-off transition for the target phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// The target phase just turned green.
    GreenOn,
    /// The target phase just turned red.
    GreenOff,
}

/// A single observed transition, ready to hand to downstream consumers.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    /// Which way the phase transitioned.
    pub kind: TransitionKind,
    /// Wall-clock time the transition was observed, Unix seconds.
    pub timestamp: i64,
    /// `1` for green, `0` for red — mirrors the phase code used on the wire.
    pub phase_code: i32,
    /// Length of the phase just entered: green duration for `GreenOn`, red gap for
    /// `GreenOff`.
    pub duration_seconds: i64,
    /// Opaque per-lane carryover counts, passed through unchanged from whatever was last set
    /// via [`SignalInferenceEngine::set_residual_cars`].
    pub residual_cars: HashMap<i32, i32>,
}

/// Callback invoked for every transition, outside any lock the engine holds.
pub type TransitionCallback = Arc<dyn Fn(TransitionEvent) + Send + Sync>;

#[derive(Debug, Clone)]
struct EngineState {
    plan: PhasePlan,
    lc_cnt: i32,
    current_interval_idx: usize,
    cycle_count: u32,
}

struct BackgroundTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Reconstructs and tracks the target phase's green/red cycle for one intersection.
pub struct SignalInferenceEngine {
    data_source: Arc<dyn DataSource>,
    intersection_id: String,
    target_signal: i32,
    state: Arc<RwLock<Option<EngineState>>>,
    signal_on: Arc<AtomicBool>,
    callback: Arc<RwLock<Option<TransitionCallback>>>,
    residual_cars: Arc<RwLock<HashMap<i32, i32>>>,
    task: tokio::sync::Mutex<Option<BackgroundTask>>,
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

impl SignalInferenceEngine {
    /// Build an engine for `intersection_id`/`target_signal`, reading phase data from
    /// `data_source`.
    pub fn new(data_source: Arc<dyn DataSource>, intersection_id: impl Into<String>, target_signal: i32) -> Self {
        Self {
            data_source,
            intersection_id: intersection_id.into(),
            target_signal,
            state: Arc::new(RwLock::new(None)),
            signal_on: Arc::new(AtomicBool::new(false)),
            callback: Arc::new(RwLock::new(None)),
            residual_cars: Arc::new(RwLock::new(HashMap::new())),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Install the callback invoked on every transition. Replaces any previous callback.
    pub async fn set_callback(&self, callback: TransitionCallback) {
        *self.callback.write().await = Some(callback);
    }

    /// Replace the opaque residual-car carryover map included in future transition events.
    pub async fn set_residual_cars(&self, cars: HashMap<i32, i32>) {
        *self.residual_cars.write().await = cars;
    }

    /// Resynchronize with the signal-plan database: fetch movement/duration rows, rebuild the
    /// phase plan, and compute the sleep time until the next transition. Falls back to the
    /// cached plan (if any) when the database query fails, per the original's "don't retry,
    /// let the background reconnect handle it" policy. Returns `NodeError::DbUnavailable` if
    /// there is neither fresh data nor a cached plan to fall back to.
    pub async fn sync(&self) -> NodeResult<i32> {
        let movement = self.data_source.movement_info(&self.intersection_id).await;
        let phase = self.data_source.phase_info(&self.intersection_id).await;

        match (movement, phase) {
            (Ok(mvmt), Ok(phase_info)) => {
                let plan = PhasePlan::build(self.target_signal, &mvmt, &phase_info.durations)?;
                let position = plan.position_for(phase_info.lc_cnt);
                self.signal_on.store(position.signal_on, Ordering::SeqCst);

                *self.state.write().await = Some(EngineState {
                    plan,
                    lc_cnt: phase_info.lc_cnt,
                    current_interval_idx: position.interval_idx,
                    cycle_count: 0,
                });

                debug!(lc_cnt = phase_info.lc_cnt, sleep = position.sleep_seconds, "resync succeeded");
                Ok(position.sleep_seconds)
            }
            (movement_result, phase_result) => {
                if let Err(e) = movement_result {
                    warn!(error = %e, "movement query failed during resync");
                }
                if let Err(e) = phase_result {
                    warn!(error = %e, "phase duration query failed during resync");
                }

                let mut guard = self.state.write().await;
                match guard.as_mut() {
                    Some(state) => {
                        // The DB is unreachable so `lc_cnt` can't advance with it; estimate
                        // position from the start of the currently-known green interval rather
                        // than trusting an increasingly stale reading.
                        state.lc_cnt = state.plan.green_intervals[0].0;
                        let position = state.plan.position_for(state.lc_cnt);
                        state.current_interval_idx = position.interval_idx;
                        self.signal_on.store(position.signal_on, Ordering::SeqCst);
                        info!("signal db unreachable, continuing with cached plan");
                        Ok(position.sleep_seconds)
                    }
                    None => Err(NodeError::DbUnavailable(
                        "no signal data available and no cached plan".to_string(),
                    )),
                }
            }
        }
    }

    /// Start signal inference: an initial `sync()` followed by the background monitor task.
    /// Fails immediately (without spawning anything) if there is no data to work with yet, or
    /// if the configured descriptor does not support inference.
    pub async fn start(&self) -> NodeResult<()> {
        if !self.data_source.supports_signal_data() {
            return Err(NodeError::NotSupported(
                "data source does not support signal data".to_string(),
            ));
        }
        if self.target_signal <= 0 {
            return Err(NodeError::DescriptorInvalid(format!(
                "invalid target phase {}",
                self.target_signal
            )));
        }

        let initial_sleep = self.sync().await?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = self.spawn_monitor(initial_sleep, cancel_rx);
        *self.task.lock().await = Some(BackgroundTask { cancel: cancel_tx, handle });

        Ok(())
    }

    /// Stop the monitor task and await its exit. In-flight sleeps are cancelled essentially
    /// immediately via the racing cancellation signal.
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.cancel.send(());
            let _ = task.handle.await;
        }
    }

    fn spawn_monitor(&self, initial_sleep: i32, mut cancel_rx: oneshot::Receiver<()>) -> JoinHandle<()> {
        let data_source = Arc::clone(&self.data_source);
        let intersection_id = self.intersection_id.clone();
        let target_signal = self.target_signal;
        let state = Arc::clone(&self.state);
        let signal_on = Arc::clone(&self.signal_on);
        let callback = Arc::clone(&self.callback);
        let residual_cars = Arc::clone(&self.residual_cars);

        tokio::spawn(async move {
            async fn emit(
                callback: &Arc<RwLock<Option<TransitionCallback>>>,
                residual_cars: &Arc<RwLock<HashMap<i32, i32>>>,
                kind: TransitionKind,
                duration_seconds: i64,
            ) {
                let cb = callback.read().await.clone();
                if let Some(cb) = cb {
                    let event = TransitionEvent {
                        kind,
                        timestamp: now_unix(),
                        phase_code: if matches!(kind, TransitionKind::GreenOn) { 1 } else { 0 },
                        duration_seconds,
                        residual_cars: residual_cars.read().await.clone(),
                    };
                    cb(event);
                }
            }

            async fn interruptible_sleep(seconds: i32, cancel_rx: &mut oneshot::Receiver<()>) -> bool {
                if seconds <= 0 {
                    return true;
                }
                tokio::select! {
                    _ = cancel_rx => false,
                    _ = tokio::time::sleep(Duration::from_secs(seconds as u64)) => true,
                }
            }

            if !interruptible_sleep(initial_sleep, &mut cancel_rx).await {
                return;
            }

            {
                let guard = state.read().await;
                if let Some(s) = guard.as_ref() {
                    let (on, off) = s.plan.green_intervals[s.current_interval_idx];
                    if signal_on.load(Ordering::SeqCst) {
                        drop(guard);
                        emit(&callback, &residual_cars, TransitionKind::GreenOff, (off - on) as i64).await;
                        signal_on.store(false, Ordering::SeqCst);

                        let guard = state.read().await;
                        if let Some(s) = guard.as_ref() {
                            let (next_idx, red_gap) = s.plan.red_gap_after(s.current_interval_idx, off);
                            drop(guard);
                            if !interruptible_sleep(red_gap, &mut cancel_rx).await {
                                return;
                            }
                            state.write().await.as_mut().map(|s| s.current_interval_idx = next_idx);
                        }
                    }
                }
            }

            loop {
                let (on, off, should_resync) = {
                    let guard = state.read().await;
                    let Some(s) = guard.as_ref() else { return };
                    let (on, off) = s.plan.green_intervals[s.current_interval_idx];
                    (on, off, s.cycle_count >= SYNC_INTERVAL_CYCLES)
                };

                if should_resync {
                    let resync_position = {
                        // Re-run the same resync logic as `sync()` inline so the loop owns the
                        // single source of truth for state transitions.
                        match (
                            data_source.movement_info(&intersection_id).await,
                            data_source.phase_info(&intersection_id).await,
                        ) {
                            (Ok(mvmt), Ok(phase_info)) => {
                                match PhasePlan::build(target_signal, &mvmt, &phase_info.durations) {
                                    Ok(plan) => {
                                        let position = plan.position_for(phase_info.lc_cnt);
                                        let mut guard = state.write().await;
                                        if let Some(s) = guard.as_mut() {
                                            s.plan = plan;
                                            s.lc_cnt = phase_info.lc_cnt;
                                            s.current_interval_idx = position.interval_idx;
                                            s.cycle_count = 0;
                                        }
                                        Some(position)
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "resync plan parse failed, keeping previous plan");
                                        None
                                    }
                                }
                            }
                            _ => {
                                let mut guard = state.write().await;
                                if let Some(s) = guard.as_mut() {
                                    s.cycle_count = 0;
                                }
                                None
                            }
                        }
                    };

                    if let Some(position) = resync_position {
                        if position.signal_on {
                            // The resync landed mid-green: the green-on transition for this
                            // interval was crossed while the query was in flight. Emit the
                            // GreenOn/GreenOff pair it should have produced instead of falling
                            // through to the unconditional GreenOn emit below, which would
                            // double-count the interval and skip the red gap entirely.
                            signal_on.store(true, Ordering::SeqCst);
                            let (on, off) = {
                                let guard = state.read().await;
                                let Some(s) = guard.as_ref() else { return };
                                s.plan.green_intervals[position.interval_idx]
                            };
                            emit(&callback, &residual_cars, TransitionKind::GreenOn, (off - on) as i64).await;

                            if !interruptible_sleep(position.sleep_seconds, &mut cancel_rx).await {
                                return;
                            }

                            let (next_idx, red_gap) = {
                                let guard = state.read().await;
                                let Some(s) = guard.as_ref() else { return };
                                s.plan.red_gap_after(s.current_interval_idx, off)
                            };

                            emit(&callback, &residual_cars, TransitionKind::GreenOff, red_gap as i64).await;
                            signal_on.store(false, Ordering::SeqCst);

                            if !interruptible_sleep(red_gap, &mut cancel_rx).await {
                                return;
                            }

                            let mut guard = state.write().await;
                            if let Some(s) = guard.as_mut() {
                                s.current_interval_idx = next_idx;
                                if next_idx == 0 {
                                    s.cycle_count += 1;
                                }
                            }
                        } else {
                            signal_on.store(false, Ordering::SeqCst);
                            if !interruptible_sleep(position.sleep_seconds, &mut cancel_rx).await {
                                return;
                            }
                        }
                        continue;
                    }
                }

                emit(&callback, &residual_cars, TransitionKind::GreenOn, (off - on) as i64).await;
                signal_on.store(true, Ordering::SeqCst);
                let prev_on_time = now_unix();

                let wait = off - on;
                if !interruptible_sleep(wait, &mut cancel_rx).await {
                    return;
                }

                // Wall-clock drift since the scheduled wake time: a slow task poll or paused
                // process eats into the gap before the next transition.
                let drift = (now_unix() - prev_on_time - wait as i64).max(0) as i32;

                let (next_idx, red_gap) = {
                    let guard = state.read().await;
                    let Some(s) = guard.as_ref() else { return };
                    s.plan.red_gap_after(s.current_interval_idx, off)
                };

                emit(&callback, &residual_cars, TransitionKind::GreenOff, red_gap as i64).await;
                signal_on.store(false, Ordering::SeqCst);

                if !interruptible_sleep((red_gap - drift).max(0), &mut cancel_rx).await {
                    return;
                }

                let mut guard = state.write().await;
                if let Some(s) = guard.as_mut() {
                    s.current_interval_idx = next_idx;
                    if next_idx == 0 {
                        s.cycle_count += 1;
                    }
                }
            }
        })
    }

    /// Whether the target phase is green right now.
    pub fn is_green(&self) -> bool {
        self.signal_on.load(Ordering::SeqCst)
    }

    /// Seconds until the next green/red transition, or an error if no plan is known yet.
    pub async fn time_to_next_change(&self) -> NodeResult<i32> {
        let guard = self.state.read().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| NodeError::DbUnavailable("no signal plan known yet".to_string()))?;
        let position = state.plan.position_for(state.lc_cnt);
        Ok(position.sleep_seconds)
    }

    /// Total cycle duration in seconds, or an error if no plan is known yet.
    pub async fn cycle_duration(&self) -> NodeResult<i32> {
        let guard = self.state.read().await;
        guard
            .as_ref()
            .map(|s| s.plan.cycle_duration)
            .ok_or_else(|| NodeError::DbUnavailable("no signal plan known yet".to_string()))
    }

    /// Current cycle counter (`LC_CNT`), or an error if no plan is known yet.
    pub async fn current_lc(&self) -> NodeResult<i32> {
        let guard = self.state.read().await;
        guard
            .as_ref()
            .map(|s| s.lc_cnt)
            .ok_or_else(|| NodeError::DbUnavailable("no signal plan known yet".to_string()))
    }

    /// Force an immediate resync, bypassing the `SYNC_INTERVAL_CYCLES` schedule.
    pub async fn force_sync(&self) -> NodeResult<i32> {
        self.sync().await
    }
}

impl SignalDirectionSource for SignalInferenceEngine {
    fn direction_for_special_site(&self) -> i32 {
        if self.is_green() {
            crate::special_site::DIRECTION_STRAIGHT
        } else {
            crate::special_site::DIRECTION_LEFT
        }
    }
}
