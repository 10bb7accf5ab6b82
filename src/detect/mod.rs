mod backend;
mod backends;
mod registry;
mod result;

pub use backend::PlateDetector;
pub use backends::{NullDetector, ScriptedDetector};
pub use registry::{DetectorFactory, DetectorRegistry};
pub use result::{BoundingBox, PlateReading};
