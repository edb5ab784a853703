//! Latest-marker rotation.
//!
//! This module provides:
//! - `marker`: the `-latest` naming convention
//! - `timestamp`: the supported timestamp layouts for generated names
//! - `rotator`: moving the marker from the current file onto a new one
//! - `echoes`: rename destinations the watch side should not re-queue

pub mod echoes;
pub mod marker;
pub mod rotator;
pub mod timestamp;

pub use echoes::RenameEchoes;
pub use marker::{LatestMarker, LATEST_TOKEN};
pub use rotator::{LatestRotator, Rotation, RotationError};
pub use timestamp::{InvalidLayout, TimestampLayout};
