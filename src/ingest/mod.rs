//! Camera capture backends.
//!
//! A camera is addressed by a small integer index. Each backend is one
//! strategy for turning an index into an open device:
//! - V4L2 devices (`/dev/video<index>`, feature: ingest-v4l2)
//! - Synthetic test pattern (testing, demos)
//!
//! `CaptureChain` tries the configured backends in order and only accepts a
//! device that both opens and delivers a frame.

mod backend;
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

pub use backend::{CaptureBackend, CaptureChain, FrameSource, OpenedCapture};
pub use synthetic::{SyntheticBackend, SyntheticConfig};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Backend, V4l2Config};

use crate::config::CameraSettings;

/// Build the capture chain named in configuration, in order.
pub fn chain_from_settings(settings: &CameraSettings) -> Result<CaptureChain> {
    let mut chain = CaptureChain::default();
    for name in &settings.backends {
        match name.as_str() {
            "synthetic" => chain.push(SyntheticBackend::new(SyntheticConfig {
                indices: settings.synthetic_indices.iter().copied().collect(),
                width: settings.width,
                height: settings.height,
            })),
            "v4l2" => {
                #[cfg(feature = "ingest-v4l2")]
                {
                    chain.push(V4l2Backend::new(V4l2Config {
                        device_prefix: "/dev/video".to_string(),
                        target_fps: settings.target_fps,
                        width: settings.width,
                        height: settings.height,
                    }));
                }
                #[cfg(not(feature = "ingest-v4l2"))]
                {
                    return Err(anyhow!("capture backend v4l2 requires the ingest-v4l2 feature"));
                }
            }
            other => return Err(anyhow!("unknown capture backend '{}'", other)),
        }
    }
    Ok(chain)
}
