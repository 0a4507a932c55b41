//! Special Site vehicle-direction override.
//!
//! A "Special Site" is an intersection where the ROI-based direction classifier is
//! known to be unreliable for some movements, so its output is overridden using the
//! signal phase (straight/left mode) or filtered down to right turns only (right mode).
//! Grounded on the original `SpecialSiteAdapter`.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::{SpecialSiteConfig, VehicleConfig};

/// ROI direction code meaning "straight through".
pub const DIRECTION_STRAIGHT: i32 = 11;
/// ROI direction code meaning "left turn" (protected).
pub const DIRECTION_LEFT: i32 = 21;
/// ROI direction code meaning "left turn" (permitted).
pub const DIRECTION_LEFT_PERMITTED: i32 = 22;
/// ROI direction code meaning "right turn", low end of the inclusive range.
pub const DIRECTION_RIGHT_LOW: i32 = 31;
/// ROI direction code meaning "right turn", high end of the inclusive range.
pub const DIRECTION_RIGHT_HIGH: i32 = 32;
/// ROI direction code meaning "U-turn".
pub const DIRECTION_U_TURN: i32 = 41;
/// Sentinel meaning "ignore this vehicle, do not forward a direction for it".
pub const DIRECTION_IGNORE: i32 = -1;

/// Supplies the current target-phase-derived direction for Special Site's straight/left mode.
///
/// Implemented by [`crate::engine::SignalInferenceEngine`]; kept as a trait so the adapter can
/// be tested without a running engine.
pub trait SignalDirectionSource: Send + Sync {
    /// `DIRECTION_STRAIGHT` while the target phase is green, `DIRECTION_LEFT` while red.
    fn direction_for_special_site(&self) -> i32;
}

/// Applies the Special Site override rules to ROI-classified vehicle directions.
pub struct SpecialSiteAdapter {
    config: SpecialSiteConfig,
    active: bool,
    signal_source: Option<Arc<dyn SignalDirectionSource>>,
}

impl SpecialSiteAdapter {
    /// Build an adapter from its config. Special Site only ever activates in 2k-only camera
    /// mode with exactly one of `straight_left`/`right` set; any other combination disables
    /// it even if `config.enabled` is `true`, logging a warning rather than failing startup
    /// (config validation should already have ruled out the "both" and "neither" cases, but
    /// this is the last line of defense before it affects live traffic).
    pub fn new(config: SpecialSiteConfig, vehicle: &VehicleConfig) -> Self {
        let active = if config.enabled {
            let camera_mode_ok = vehicle.two_k_enabled && !vehicle.four_k_enabled;
            let exactly_one_mode = config.straight_left != config.right;
            if camera_mode_ok && exactly_one_mode {
                true
            } else {
                warn!(
                    two_k_enabled = vehicle.two_k_enabled,
                    four_k_enabled = vehicle.four_k_enabled,
                    straight_left = config.straight_left,
                    right = config.right,
                    "special site mode requires 2k-only camera mode and exactly one of straight_left/right, disabling"
                );
                false
            }
        } else {
            false
        };

        Self {
            config,
            active,
            signal_source: None,
        }
    }

    /// Whether the adapter is actually overriding directions (config enabled AND camera mode
    /// compatible).
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Connect the signal-phase source used by straight/left mode's fallback decision.
    pub fn set_signal_source(&mut self, source: Arc<dyn SignalDirectionSource>) {
        self.signal_source = Some(source);
    }

    fn direction_by_signal(&self) -> i32 {
        match &self.signal_source {
            Some(source) => source.direction_for_special_site(),
            None => {
                debug!("no signal source connected, defaulting to straight");
                DIRECTION_STRAIGHT
            }
        }
    }

    /// Override `roi_direction` for `object_id` per the Special Site rules. Returns
    /// [`DIRECTION_IGNORE`] for vehicles that should not be forwarded at all, or the original
    /// `roi_direction` unchanged when the adapter is inactive.
    pub fn determine_vehicle_direction(&self, object_id: i64, in_roi: bool, roi_direction: i32) -> i32 {
        if !self.active {
            return roi_direction;
        }

        if roi_direction == DIRECTION_U_TURN {
            trace!(object_id, "special site: ignoring u-turn vehicle");
            return DIRECTION_IGNORE;
        }

        if roi_direction < -1 {
            trace!(object_id, roi_direction, "special site: ignoring reverse-direction vehicle");
            return DIRECTION_IGNORE;
        }

        if self.config.straight_left {
            self.straight_left_direction(object_id, in_roi, roi_direction)
        } else {
            self.right_only_direction(object_id, roi_direction)
        }
    }

    fn straight_left_direction(&self, object_id: i64, in_roi: bool, roi_direction: i32) -> i32 {
        trace!(object_id, in_roi, roi_direction, "special site straight_left mode");

        if (DIRECTION_RIGHT_LOW..=DIRECTION_RIGHT_HIGH).contains(&roi_direction) {
            debug!(object_id, roi_direction, "special site: ignoring right-turn roi vehicle");
            return DIRECTION_IGNORE;
        }

        if roi_direction == DIRECTION_STRAIGHT {
            debug!(object_id, "special site: straight roi vehicle, direction kept");
            return DIRECTION_STRAIGHT;
        }

        if roi_direction == DIRECTION_LEFT || roi_direction == DIRECTION_LEFT_PERMITTED {
            debug!(object_id, roi_direction, "special site: left-turn roi vehicle, direction kept");
            return roi_direction;
        }

        if !in_roi || roi_direction <= 0 {
            let signal_direction = self.direction_by_signal();
            debug!(
                object_id,
                signal_direction, "special site: outside roi, falling back to signal-based direction"
            );
            return signal_direction;
        }

        warn!(object_id, roi_direction, "special site straight_left: unexpected roi_direction, passing through");
        roi_direction
    }

    fn right_only_direction(&self, object_id: i64, roi_direction: i32) -> i32 {
        if (DIRECTION_RIGHT_LOW..=DIRECTION_RIGHT_HIGH).contains(&roi_direction) {
            debug!(object_id, roi_direction, "special site: right-turn vehicle processed");
            return roi_direction;
        }

        debug!(object_id, roi_direction, "special site: ignoring non-right-turn vehicle");
        DIRECTION_IGNORE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSignal(i32);

    impl SignalDirectionSource for FixedSignal {
        fn direction_for_special_site(&self) -> i32 {
            self.0
        }
    }

    fn straight_left_config() -> SpecialSiteConfig {
        SpecialSiteConfig {
            enabled: true,
            straight_left: true,
            right: false,
        }
    }

    fn right_config() -> SpecialSiteConfig {
        SpecialSiteConfig {
            enabled: true,
            straight_left: false,
            right: true,
        }
    }

    fn two_k_only() -> VehicleConfig {
        VehicleConfig {
            two_k_enabled: true,
            four_k_enabled: false,
        }
    }

    #[test]
    fn inactive_when_4k_enabled() {
        let adapter = SpecialSiteAdapter::new(
            straight_left_config(),
            &VehicleConfig {
                two_k_enabled: true,
                four_k_enabled: true,
            },
        );
        assert!(!adapter.is_active());
    }

    #[test]
    fn inactive_when_both_straight_left_and_right_set() {
        let adapter = SpecialSiteAdapter::new(
            SpecialSiteConfig {
                enabled: true,
                straight_left: true,
                right: true,
            },
            &two_k_only(),
        );
        assert!(!adapter.is_active());
    }

    #[test]
    fn inactive_passes_through_unchanged() {
        let adapter = SpecialSiteAdapter::new(
            SpecialSiteConfig {
                enabled: false,
                straight_left: true,
                right: false,
            },
            &two_k_only(),
        );
        assert_eq!(adapter.determine_vehicle_direction(1, true, 31), 31);
    }

    #[test]
    fn u_turn_always_ignored() {
        let adapter = SpecialSiteAdapter::new(straight_left_config(), &two_k_only());
        assert_eq!(adapter.determine_vehicle_direction(1, true, DIRECTION_U_TURN), DIRECTION_IGNORE);
    }

    #[test]
    fn straight_left_ignores_right_turns() {
        let adapter = SpecialSiteAdapter::new(straight_left_config(), &two_k_only());
        assert_eq!(adapter.determine_vehicle_direction(1, true, 31), DIRECTION_IGNORE);
        assert_eq!(adapter.determine_vehicle_direction(1, true, 32), DIRECTION_IGNORE);
    }

    #[test]
    fn straight_left_keeps_straight_and_left() {
        let adapter = SpecialSiteAdapter::new(straight_left_config(), &two_k_only());
        assert_eq!(adapter.determine_vehicle_direction(1, true, DIRECTION_STRAIGHT), DIRECTION_STRAIGHT);
        assert_eq!(adapter.determine_vehicle_direction(1, true, DIRECTION_LEFT), DIRECTION_LEFT);
        assert_eq!(
            adapter.determine_vehicle_direction(1, true, DIRECTION_LEFT_PERMITTED),
            DIRECTION_LEFT_PERMITTED
        );
    }

    #[test]
    fn straight_left_falls_back_to_signal_outside_roi() {
        let mut adapter = SpecialSiteAdapter::new(straight_left_config(), &two_k_only());
        adapter.set_signal_source(Arc::new(FixedSignal(DIRECTION_LEFT)));
        assert_eq!(adapter.determine_vehicle_direction(1, false, 0), DIRECTION_LEFT);
        assert_eq!(adapter.determine_vehicle_direction(1, true, 0), DIRECTION_LEFT);
    }

    #[test]
    fn straight_left_defaults_to_straight_without_signal_source() {
        let adapter = SpecialSiteAdapter::new(straight_left_config(), &two_k_only());
        assert_eq!(adapter.determine_vehicle_direction(1, false, 0), DIRECTION_STRAIGHT);
    }

    #[test]
    fn right_mode_keeps_only_right_turns() {
        let adapter = SpecialSiteAdapter::new(right_config(), &two_k_only());
        assert_eq!(adapter.determine_vehicle_direction(1, true, 31), 31);
        assert_eq!(adapter.determine_vehicle_direction(1, true, DIRECTION_STRAIGHT), DIRECTION_IGNORE);
    }
}
