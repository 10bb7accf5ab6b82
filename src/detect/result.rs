use serde::Serialize;

/// Pixel-space rectangle around a plate candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Output of one detector call: raw OCR text plus where it was found.
///
/// Empty `raw_text` means no candidate in this frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlateReading {
    pub raw_text: String,
    pub bbox: Option<BoundingBox>,
}

impl PlateReading {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_text.trim().is_empty()
    }
}
