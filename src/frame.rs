//! Captured frames and their annotated, encoded form.
//!
//! - `Frame`: one RGB24 image as read from a capture device.
//! - `Overlay`: what the viewer should see drawn on top of a frame.
//! - `EncodedFrame`: the annotated JPEG handed to stream consumers.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::Serialize;

use crate::detect::BoundingBox;
use crate::plate::CanonicalPlate;

/// Height of the status bar drawn when no bounding box is available.
const STATUS_BAR_HEIGHT: u32 = 12;
/// Outline thickness for plate boxes.
const BOX_THICKNESS: i32 = 2;
/// Label glyphs are 5x7 pixels on a 6 pixel advance.
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = 6;
const LABEL_MARGIN: u32 = 2;
const COLOR_LABEL_ON_BAR: Rgb<u8> = Rgb([0, 0, 0]);

const COLOR_SEARCHING: Rgb<u8> = Rgb([255, 255, 0]);
const COLOR_PLATE: Rgb<u8> = Rgb([255, 255, 0]);
const COLOR_TARGET: Rgb<u8> = Rgb([0, 255, 0]);

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured RGB24 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Local>,
    /// Per-source sequence number, starting at 1.
    pub sequence: u64,
}

impl Frame {
    /// Build a frame from tightly packed RGB24 pixels.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Local::now(),
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Copy of the frame as an `image` buffer.
    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    /// Encode the frame unmodified as JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_jpeg(&self.to_image()?, quality)
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Overlay
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayStatus {
    /// No plate read this frame.
    Searching,
    /// A plate was read but it is not a target.
    Plate,
    /// A target plate is in view.
    Target,
}

/// Display state for one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Overlay {
    pub status: OverlayStatus,
    pub label: String,
    pub bbox: Option<BoundingBox>,
}

impl Overlay {
    pub fn searching() -> Self {
        Self {
            status: OverlayStatus::Searching,
            label: "Searching for plates...".to_string(),
            bbox: None,
        }
    }

    pub fn plate(plate: &CanonicalPlate, bbox: Option<BoundingBox>) -> Self {
        Self {
            status: OverlayStatus::Plate,
            label: format!("Plate detected: {}", plate),
            bbox,
        }
    }

    pub fn target(plate: &CanonicalPlate, bbox: Option<BoundingBox>) -> Self {
        Self {
            status: OverlayStatus::Target,
            label: format!("*** MATCH! {} ***", plate),
            bbox,
        }
    }

    fn color(&self) -> Rgb<u8> {
        match self.status {
            OverlayStatus::Searching => COLOR_SEARCHING,
            OverlayStatus::Plate => COLOR_PLATE,
            OverlayStatus::Target => COLOR_TARGET,
        }
    }

    /// Draw the overlay onto `image`.
    ///
    /// With a box, the label sits just above it (or below when the box
    /// touches the top edge). Boxes are clipped to the image; without a
    /// visible box the label is written on a status bar.
    pub fn draw(&self, image: &mut RgbImage) {
        let color = self.color();
        if let Some(rect) = self.bbox.and_then(|b| clip(b, image.width(), image.height())) {
            for inset in 0..BOX_THICKNESS {
                let (x, y) = (rect.left() + inset, rect.top() + inset);
                let w = rect.width().saturating_sub(2 * inset as u32);
                let h = rect.height().saturating_sub(2 * inset as u32);
                if w == 0 || h == 0 {
                    break;
                }
                draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w, h), color);
            }
            let top = rect.top() as u32;
            let y = if top >= GLYPH_HEIGHT + LABEL_MARGIN {
                top - GLYPH_HEIGHT - LABEL_MARGIN
            } else {
                rect.bottom() as u32 + 1 + LABEL_MARGIN
            };
            draw_label(image, &self.label, rect.left() as u32, y, color);
            return;
        }
        let bar = STATUS_BAR_HEIGHT.min(image.height());
        if bar > 0 && image.width() > 0 {
            draw_filled_rect_mut(image, Rect::at(0, 0).of_size(image.width(), bar), color);
            let y = STATUS_BAR_HEIGHT.saturating_sub(GLYPH_HEIGHT) / 2;
            draw_label(image, &self.label, LABEL_MARGIN, y, COLOR_LABEL_ON_BAR);
        }
    }
}

/// Write `text` with the built-in bitmap font, clipped to the image.
///
/// Letters render upper-case; characters without a glyph advance as blanks.
fn draw_label(image: &mut RgbImage, text: &str, x: u32, y: u32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let mut cursor = x;
    for ch in text.chars() {
        if cursor >= width {
            break;
        }
        if let Some(rows) = glyph(ch.to_ascii_uppercase()) {
            for (row, bits) in rows.iter().enumerate() {
                let py = y + row as u32;
                if py >= height {
                    break;
                }
                for col in 0..GLYPH_WIDTH {
                    let px = cursor + col;
                    if px < width && (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        image.put_pixel(px, py, color);
                    }
                }
            }
        }
        cursor += GLYPH_ADVANCE;
    }
}

fn glyph(ch: char) -> Option<[u8; GLYPH_HEIGHT as usize]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '*' => [0x00, 0x04, 0x15, 0x0E, 0x15, 0x04, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        _ => return None,
    };
    Some(rows)
}

fn clip(bbox: BoundingBox, width: u32, height: u32) -> Option<Rect> {
    if bbox.x >= width || bbox.y >= height || bbox.width == 0 || bbox.height == 0 {
        return None;
    }
    let w = bbox.width.min(width - bbox.x);
    let h = bbox.height.min(height - bbox.y);
    Some(Rect::at(bbox.x as i32, bbox.y as i32).of_size(w, h))
}

// ----------------------------------------------------------------------------
// EncodedFrame
// ----------------------------------------------------------------------------

/// Annotated JPEG emitted on a session's frame stream.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub captured_at: DateTime<Local>,
    pub status: OverlayStatus,
    pub label: String,
    pub jpeg: Vec<u8>,
}

/// Draw `overlay` on a copy of `frame` and encode it.
pub fn annotate_and_encode(frame: &Frame, overlay: &Overlay, quality: u8) -> Result<EncodedFrame> {
    let mut image = frame.to_image()?;
    overlay.draw(&mut image);
    Ok(EncodedFrame {
        sequence: frame.sequence,
        captured_at: frame.captured_at,
        status: overlay.status,
        label: overlay.label.clone(),
        jpeg: encode_jpeg(&image, quality)?,
    })
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("encode JPEG")?;
    Ok(out)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate::normalize;

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![40u8; (width * height * 3) as usize], width, height, 1).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::from_rgb(vec![0u8; 10], 4, 4, 1).is_err());
    }

    #[test]
    fn bbox_is_drawn_in_status_color() {
        let frame = gray_frame(64, 48);
        let overlay = Overlay::target(
            &normalize("B1001ZZZ"),
            Some(BoundingBox {
                x: 10,
                y: 10,
                width: 20,
                height: 8,
            }),
        );
        let mut image = frame.to_image().unwrap();
        overlay.draw(&mut image);
        assert_eq!(*image.get_pixel(10, 10), COLOR_TARGET);
        assert_eq!(*image.get_pixel(11, 11), COLOR_TARGET);
        assert_eq!(*image.get_pixel(20, 14), Rgb([40, 40, 40]));
    }

    #[test]
    fn out_of_frame_box_falls_back_to_status_bar() {
        let frame = gray_frame(32, 32);
        let overlay = Overlay::plate(
            &normalize("B2156TOR"),
            Some(BoundingBox {
                x: 100,
                y: 100,
                width: 10,
                height: 10,
            }),
        );
        let mut image = frame.to_image().unwrap();
        overlay.draw(&mut image);
        assert_eq!(*image.get_pixel(0, 0), COLOR_PLATE);
        assert_eq!(*image.get_pixel(5, STATUS_BAR_HEIGHT + 1), Rgb([40, 40, 40]));
    }

    fn painted(image: &RgbImage, rows: std::ops::Range<u32>, color: Rgb<u8>) -> usize {
        rows.flat_map(|y| (0..image.width()).map(move |x| (x, y)))
            .filter(|&(x, y)| *image.get_pixel(x, y) == color)
            .count()
    }

    #[test]
    fn label_is_written_above_the_box() {
        let frame = gray_frame(160, 48);
        let overlay = Overlay::target(
            &normalize("B1001ZZZ"),
            Some(BoundingBox {
                x: 4,
                y: 20,
                width: 40,
                height: 10,
            }),
        );
        let mut image = frame.to_image().unwrap();
        overlay.draw(&mut image);
        // Glyph rows sit between the top edge and the box.
        assert!(painted(&image, 11..18, COLOR_TARGET) > 20);
        assert_eq!(painted(&image, 0..11, COLOR_TARGET), 0);
    }

    #[test]
    fn label_goes_below_a_box_at_the_top_edge() {
        let frame = gray_frame(160, 48);
        let overlay = Overlay::plate(
            &normalize("B2156TOR"),
            Some(BoundingBox {
                x: 0,
                y: 2,
                width: 30,
                height: 8,
            }),
        );
        let mut image = frame.to_image().unwrap();
        overlay.draw(&mut image);
        assert!(painted(&image, 12..19, COLOR_PLATE) > 20);
    }

    #[test]
    fn status_bar_carries_the_label() {
        let frame = gray_frame(160, 24);
        let mut image = frame.to_image().unwrap();
        Overlay::searching().draw(&mut image);
        assert!(painted(&image, 0..STATUS_BAR_HEIGHT, COLOR_LABEL_ON_BAR) > 20);
        assert_eq!(painted(&image, STATUS_BAR_HEIGHT..24, COLOR_LABEL_ON_BAR), 0);
    }

    #[test]
    fn every_plate_character_has_a_glyph() {
        for ch in ('A'..='Z').chain('0'..='9') {
            assert!(glyph(ch).is_some(), "missing glyph for {}", ch);
        }
        assert!(glyph(' ').is_none());
    }

    #[test]
    fn encodes_jpeg_with_label() {
        let frame = gray_frame(32, 24);
        let encoded = annotate_and_encode(&frame, &Overlay::searching(), 80).unwrap();
        assert_eq!(&encoded.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(encoded.status, OverlayStatus::Searching);
        assert_eq!(encoded.sequence, 1);
    }
}
