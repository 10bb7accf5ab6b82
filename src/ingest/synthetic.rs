//! Synthetic capture backend.
//!
//! Produces a moving test pattern for a configured set of camera indices.
//! Used for demos, soak runs and tests on machines without cameras.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::collections::BTreeSet;

use super::backend::{CaptureBackend, FrameSource};
use crate::frame::Frame;
use crate::CameraIndex;

/// Configuration for the synthetic backend.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Indices that behave as present cameras.
    pub indices: BTreeSet<CameraIndex>,
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            indices: BTreeSet::from([0]),
            width: 640,
            height: 480,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SyntheticBackend {
    config: SyntheticConfig,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, index: CameraIndex) -> Result<Box<dyn FrameSource>> {
        if !self.config.indices.contains(&index) {
            return Err(anyhow!("synthetic camera {} not present", index));
        }
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!("synthetic camera {} has zero-sized frames", index));
        }
        log::info!("SyntheticSource: connected to synthetic://{}", index);
        Ok(Box::new(SyntheticSource {
            index,
            width: self.config.width,
            height: self.config.height,
            frame_count: 0,
            scene_state: index as u8,
        }))
    }
}

struct SyntheticSource {
    index: CameraIndex,
    width: u32,
    height: u32,
    frame_count: u64,
    /// Shifts every 50 frames to simulate something entering the scene.
    scene_state: u8,
}

impl SyntheticSource {
    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut rng = rand::thread_rng();
        let width = self.width as usize;
        let mut pixels = vec![0u8; width * self.height as usize * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let (x, y) = ((i % width) as u64, (i / width) as u64);
            let base = x + y + self.frame_count * 2 + self.scene_state as u64 * 40;
            let noise: u8 = rng.gen_range(0..4);
            px[0] = ((base % 256) as u8).wrapping_add(noise);
            px[1] = (((base / 2) % 256) as u8).wrapping_add(noise);
            px[2] = (((x * 255) / width.max(1) as u64) as u8).wrapping_add(noise);
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(pixels, self.width, self.height, self.frame_count)
    }

    fn describe(&self) -> String {
        format!("synthetic://{}", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SyntheticConfig {
        SyntheticConfig {
            indices: BTreeSet::from([0, 2]),
            width: 32,
            height: 24,
        }
    }

    #[test]
    fn configured_indices_produce_frames() -> Result<()> {
        let backend = SyntheticBackend::new(small_config());
        let mut source = backend.open(2)?;
        let first = source.read_frame()?;
        let second = source.read_frame()?;
        assert_eq!((first.width, first.height), (32, 24));
        assert_eq!(first.pixels().len(), 32 * 24 * 3);
        assert_eq!(second.sequence, first.sequence + 1);
        assert_eq!(source.describe(), "synthetic://2");
        Ok(())
    }

    #[test]
    fn other_indices_are_absent() {
        let backend = SyntheticBackend::new(small_config());
        assert!(backend.open(1).is_err());
    }
}
