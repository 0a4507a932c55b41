//! Site descriptor parsing.
//!
//! A [`SiteDescriptor`] captures everything downstream components need to know about the
//! intersection a camera is watching: its intersection id, the signal target phase the node
//! should track, and whether signal inference is even possible at this site. Descriptors are
//! immutable once built and are replaced wholesale (never mutated in place) whenever the
//! camera id is (re-)resolved — see [`crate::registry::SiteInfoRegistry`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Sentinel camera id published while the real id has not yet been resolved from the DB.
pub const PENDING_CAM_ID: &str = "__PENDING_CAM_ID__";

static CAMERA_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4,5})_(\d{2})_(\d{2})$").expect("static pattern is valid"));

/// How a [`SiteDescriptor`]'s camera id was (or should be) sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteMode {
    /// No remote database; camera id configured directly.
    Manual,
    /// Camera id resolved from the remote cam_db.
    Remote,
    /// Not yet determined.
    Unknown,
}

/// Immutable description of an intersection and the signal phase this node tracks there.
///
/// Built once by [`parse`] and replaced atomically (never mutated) whenever the camera id is
/// re-resolved, so readers holding a cloned `SiteDescriptor` never observe a half-updated
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteDescriptor {
    /// Intersection id, a string of 4-5 decimal digits (or `"0000"` while pending).
    pub intersection_id: String,
    /// Raw camera id string as resolved from the DB (or configured manually).
    pub camera_id: String,
    /// Target phase number in `0..99`. `0` means "no inference".
    pub target_phase: i32,
    /// Where the camera id came from.
    pub mode: SiteMode,
    /// Whether this descriptor is well-formed.
    pub is_valid: bool,
    /// Whether signal inference can run for this descriptor (`target_phase > 0`).
    pub supports_signal_inference: bool,
}

impl SiteDescriptor {
    /// An invalid, inference-incapable descriptor for an empty or unrecognized camera id.
    fn invalid(camera_id: &str, mode: SiteMode) -> Self {
        Self {
            intersection_id: String::new(),
            camera_id: camera_id.to_string(),
            target_phase: 0,
            mode,
            is_valid: false,
            supports_signal_inference: false,
        }
    }

    /// The fixed descriptor used by the Manual data source: no network, no inference.
    pub fn manual_fixed() -> Self {
        Self {
            intersection_id: String::new(),
            camera_id: String::new(),
            target_phase: 0,
            mode: SiteMode::Manual,
            is_valid: true,
            supports_signal_inference: false,
        }
    }

    /// `true` if `camera_id` equals the pending sentinel.
    pub fn is_pending(&self) -> bool {
        self.camera_id == PENDING_CAM_ID
    }
}

/// Parse a raw camera id string into a [`SiteDescriptor`].
///
/// - Empty string -> invalid, inference-incapable.
/// - [`PENDING_CAM_ID`] -> valid, intersection id `"0000"`, target 0, inference-incapable.
/// - `DDDD(D)?_dd_dd` -> intersection id from the first group; target phase derived per the
///   rule below. Any other shape, or a numeric conversion failure, is treated as invalid
///   rather than propagated — this runs unattended, so a malformed id must degrade gracefully
///   instead of taking the node down.
///
/// Target phase rule: if `b` is even, target = `b`; else if `a` is odd, target = `a`; else
/// target = 0.
pub fn parse(camera_id: &str) -> SiteDescriptor {
    if camera_id.is_empty() {
        return SiteDescriptor::invalid(camera_id, SiteMode::Remote);
    }

    if camera_id == PENDING_CAM_ID {
        return SiteDescriptor {
            intersection_id: "0000".to_string(),
            camera_id: camera_id.to_string(),
            target_phase: 0,
            mode: SiteMode::Remote,
            is_valid: true,
            supports_signal_inference: false,
        };
    }

    let Some(captures) = CAMERA_ID_PATTERN.captures(camera_id) else {
        return SiteDescriptor::invalid(camera_id, SiteMode::Remote);
    };

    let intersection_id = captures[1].to_string();
    let (Ok(a), Ok(b)) = (captures[2].parse::<i32>(), captures[3].parse::<i32>()) else {
        return SiteDescriptor::invalid(camera_id, SiteMode::Remote);
    };

    let target_phase = if b % 2 == 0 {
        b
    } else if a % 2 == 1 {
        a
    } else {
        0
    };

    SiteDescriptor {
        intersection_id,
        camera_id: camera_id.to_string(),
        target_phase,
        mode: SiteMode::Remote,
        is_valid: true,
        supports_signal_inference: target_phase > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_camera_id_is_invalid() {
        let d = parse("");
        assert!(!d.is_valid);
        assert!(!d.supports_signal_inference);
    }

    #[test]
    fn pending_sentinel_is_valid_but_inference_incapable() {
        let d = parse(PENDING_CAM_ID);
        assert!(d.is_valid);
        assert!(!d.supports_signal_inference);
        assert_eq!(d.intersection_id, "0000");
        assert_eq!(d.target_phase, 0);
        assert!(d.is_pending());
    }

    #[test]
    fn malformed_shape_is_invalid() {
        for bad in ["abc", "8082_07", "8082_07_004", "80_07_04"] {
            let d = parse(bad);
            assert!(!d.is_valid, "expected {bad} to be invalid");
        }
    }

    #[test]
    fn b_even_selects_b() {
        let d = parse("8082_07_04");
        assert_eq!(d.intersection_id, "8082");
        assert_eq!(d.target_phase, 4);
        assert!(d.supports_signal_inference);
    }

    #[test]
    fn b_odd_a_odd_selects_a() {
        let d = parse("8082_07_03");
        assert_eq!(d.target_phase, 7);
    }

    #[test]
    fn b_even_selects_b_again() {
        let d = parse("8082_08_06");
        assert_eq!(d.target_phase, 6);
    }

    #[test]
    fn b_odd_a_even_yields_zero() {
        let d = parse("8082_08_05");
        assert_eq!(d.target_phase, 0);
        assert!(!d.supports_signal_inference);
    }

    #[test]
    fn five_digit_intersection_id_is_accepted() {
        let d = parse("80821_07_04");
        assert_eq!(d.intersection_id, "80821");
        assert_eq!(d.target_phase, 4);
    }
}
