//! Plate text handling: OCR normalisation, target membership and
//! alert cooldown.

mod cooldown;
mod normalize;
mod targets;

pub use cooldown::CooldownTracker;
pub use normalize::{is_canonical, normalize, CanonicalPlate};
pub use targets::{normalize_target, TargetPlateSet};
