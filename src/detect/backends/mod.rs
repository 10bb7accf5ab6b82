pub mod null;
pub mod scripted;

pub use null::NullDetector;
pub use scripted::ScriptedDetector;
