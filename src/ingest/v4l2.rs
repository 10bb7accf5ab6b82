//! V4L2 capture backend.
//!
//! Opens `/dev/video<index>` through libv4l, negotiates a capture format and
//! hands RGB24 frames to the session loop. YUYV and NV12 buffers are
//! converted in-process.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::backend::{CaptureBackend, FrameSource};
use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::frame::Frame;
use crate::CameraIndex;

/// Capture parameters requested from every V4L2 device.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device node prefix; the camera index is appended.
    pub device_prefix: String,
    /// Requested frame rate. Drivers may ignore it.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device_prefix: "/dev/video".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct V4l2Backend {
    config: V4l2Config,
}

impl V4l2Backend {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }
}

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(&self, index: CameraIndex) -> Result<Box<dyn FrameSource>> {
        let device = format!("{}{}", self.config.device_prefix, index);
        Ok(Box::new(DeviceV4l2Source::connect(device, &self.config)?))
    }
}

struct DeviceV4l2Source {
    device_path: String,
    state: DeviceV4l2State,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceV4l2Source {
    fn connect(device_path: String, config: &V4l2Config) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&device_path)
            .with_context(|| format!("open v4l2 device {}", device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = match &format.fourcc.repr {
            b"YUYV" => PixelFormat::Yuyv,
            b"RGB3" => PixelFormat::Rgb24,
            b"NV12" => PixelFormat::Nv12,
            other => {
                return Err(anyhow!(
                    "{}: unsupported pixel format {}",
                    device_path,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", device_path, err);
            }
        }

        let state = DeviceV4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            device_path,
            format.width,
            format.height
        );
        Ok(Self {
            device_path,
            state,
            format: pixel_format,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl FrameSource for DeviceV4l2Source {
    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let rgb = self.state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, _meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            normalize_to_rgb(buf, width, height, format)
        })?;

        self.frame_count += 1;
        Frame::from_rgb(rgb, width, height, self.frame_count)
    }

    fn describe(&self) -> String {
        self.device_path.clone()
    }
}
