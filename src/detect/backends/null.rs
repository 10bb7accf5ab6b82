use anyhow::Result;

use crate::detect::backend::PlateDetector;
use crate::detect::result::PlateReading;
use crate::frame::Frame;

/// Detector that never finds a plate. Streams video without recognition.
#[derive(Debug, Default)]
pub struct NullDetector;

impl PlateDetector for NullDetector {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<PlateReading> {
        Ok(PlateReading::none())
    }
}
