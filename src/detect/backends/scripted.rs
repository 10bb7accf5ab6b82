use anyhow::Result;

use crate::detect::backend::PlateDetector;
use crate::detect::result::{BoundingBox, PlateReading};
use crate::frame::Frame;

/// Replays a fixed list of raw OCR texts, one per frame, in a loop.
///
/// An empty string in the script stands for a frame without a plate. The
/// reported box is centred and sized like a typical plate crop.
#[derive(Clone, Debug)]
pub struct ScriptedDetector {
    script: Vec<String>,
    cursor: usize,
}

impl ScriptedDetector {
    pub fn new<S: Into<String>>(script: impl IntoIterator<Item = S>) -> Self {
        Self {
            script: script.into_iter().map(Into::into).collect(),
            cursor: 0,
        }
    }
}

impl PlateDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<PlateReading> {
        if self.script.is_empty() {
            return Ok(PlateReading::none());
        }
        let text = self.script[self.cursor % self.script.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        if text.trim().is_empty() {
            return Ok(PlateReading::none());
        }
        Ok(PlateReading {
            raw_text: text,
            bbox: Some(centred_plate_box(frame.width, frame.height)),
        })
    }
}

fn centred_plate_box(width: u32, height: u32) -> BoundingBox {
    let w = (width / 3).max(1);
    let h = (w / 4).clamp(1, height.max(1));
    BoundingBox {
        x: width.saturating_sub(w) / 2,
        y: (height.saturating_sub(h)) / 2,
        width: w,
        height: h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 120 * 90 * 3], 120, 90, 1).unwrap()
    }

    #[test]
    fn replays_script_in_a_loop() -> Result<()> {
        let mut detector = ScriptedDetector::new(["B2156TOR", "", "B1001Z22"]);
        let frame = frame();
        assert_eq!(detector.detect(&frame)?.raw_text, "B2156TOR");
        assert!(detector.detect(&frame)?.is_empty());
        assert_eq!(detector.detect(&frame)?.raw_text, "B1001Z22");
        assert_eq!(detector.detect(&frame)?.raw_text, "B2156TOR");
        Ok(())
    }

    #[test]
    fn box_has_plate_proportions() -> Result<()> {
        let mut detector = ScriptedDetector::new(["B2156TOR"]);
        let bbox = detector.detect(&frame())?.bbox.expect("bbox");
        assert_eq!(bbox.width, 40);
        assert_eq!(bbox.height, 10);
        assert!(bbox.x + bbox.width <= 120);
        assert!((bbox.aspect_ratio() - 4.0).abs() < f32::EPSILON);
        Ok(())
    }

    #[test]
    fn empty_script_reads_nothing() -> Result<()> {
        let mut detector = ScriptedDetector::new(Vec::<String>::new());
        assert!(detector.detect(&frame())?.is_empty());
        Ok(())
    }
}
