//! Signal-inference and Special Site direction-decision core for an intersection-edge traffic
//! analytics node.
//!
//! The node resolves which intersection and signal phase a camera is watching
//! ([`site`]/[`registry`]), reconstructs that phase's green/red cycle from periodic database
//! reads without polling on every tick ([`engine`]), and, at intersections where the ROI-based
//! direction classifier is unreliable, overrides classified vehicle directions using that
//! reconstructed phase ([`special_site`]). [`datasource`] abstracts over where the underlying
//! rows come from: a fixed manual configuration, or two independent remote database backends
//! each with their own retry and reconnect policy.

pub mod config;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod logging;
pub mod registry;
pub mod site;
pub mod special_site;
