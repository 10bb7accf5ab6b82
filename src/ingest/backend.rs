use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::frame::Frame;
use crate::CameraIndex;

/// An open capture device.
///
/// Dropping the source releases the device.
pub trait FrameSource: Send {
    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Human-readable device description for logs.
    fn describe(&self) -> String;
}

/// One way of reaching a camera by index (a driver, a platform API, a
/// test pattern).
pub trait CaptureBackend: Send + Sync {
    /// Backend identifier used in configuration.
    fn name(&self) -> &'static str;

    /// Open the camera at `index`. The returned source has not been read yet.
    fn open(&self, index: CameraIndex) -> Result<Box<dyn FrameSource>>;
}

/// A source that has been opened and proven readable.
pub struct OpenedCapture {
    pub source: Box<dyn FrameSource>,
    pub backend: &'static str,
    /// The frame read while proving the device.
    pub first_frame: Frame,
}

impl std::fmt::Debug for OpenedCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedCapture")
            .field("source", &self.source.describe())
            .field("backend", &self.backend)
            .field("first_frame", &self.first_frame.sequence)
            .finish()
    }
}

/// Ordered list of capture backends tried for every open.
#[derive(Clone, Default)]
pub struct CaptureChain {
    backends: Vec<Arc<dyn CaptureBackend>>,
}

impl CaptureChain {
    pub fn new(backends: Vec<Arc<dyn CaptureBackend>>) -> Self {
        Self { backends }
    }

    pub fn push<B: CaptureBackend + 'static>(&mut self, backend: B) {
        self.backends.push(Arc::new(backend));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Open `index` with the first backend that yields a readable device.
    ///
    /// A backend that opens but cannot produce a frame is released before
    /// the next one is tried.
    pub fn open(&self, index: CameraIndex) -> Result<OpenedCapture> {
        let mut failures = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            let mut source = match backend.open(index) {
                Ok(source) => source,
                Err(err) => {
                    log::debug!("camera {}: {} open failed: {:#}", index, backend.name(), err);
                    failures.push(format!("{}: {:#}", backend.name(), err));
                    continue;
                }
            };
            match source.read_frame() {
                Ok(first_frame) => {
                    log::debug!(
                        "camera {}: opened {} via {}",
                        index,
                        source.describe(),
                        backend.name()
                    );
                    return Ok(OpenedCapture {
                        source,
                        backend: backend.name(),
                        first_frame,
                    });
                }
                Err(err) => {
                    log::debug!(
                        "camera {}: {} opened but unreadable: {:#}",
                        index,
                        backend.name(),
                        err
                    );
                    failures.push(format!("{}: unreadable: {:#}", backend.name(), err));
                }
            }
        }
        if failures.is_empty() {
            return Err(anyhow!("camera {}: no capture backends configured", index));
        }
        Err(anyhow!("camera {}: {}", index, failures.join("; ")))
    }

    /// Open and immediately release `index`. Returns true when readable.
    pub fn probe(&self, index: CameraIndex) -> bool {
        self.open(index).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource;

    impl FrameSource for FixedSource {
        fn read_frame(&mut self) -> Result<Frame> {
            Frame::from_rgb(vec![0u8; 12], 2, 2, 1)
        }

        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    struct DeadSource(Arc<AtomicUsize>);

    impl FrameSource for DeadSource {
        fn read_frame(&mut self) -> Result<Frame> {
            Err(anyhow!("no signal"))
        }

        fn describe(&self) -> String {
            "dead".into()
        }
    }

    impl Drop for DeadSource {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Unreadable(Arc<AtomicUsize>);

    impl CaptureBackend for Unreadable {
        fn name(&self) -> &'static str {
            "unreadable"
        }

        fn open(&self, _index: CameraIndex) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(DeadSource(self.0.clone())))
        }
    }

    struct Missing;

    impl CaptureBackend for Missing {
        fn name(&self) -> &'static str {
            "missing"
        }

        fn open(&self, index: CameraIndex) -> Result<Box<dyn FrameSource>> {
            Err(anyhow!("no device {}", index))
        }
    }

    struct Working;

    impl CaptureBackend for Working {
        fn name(&self) -> &'static str {
            "working"
        }

        fn open(&self, _index: CameraIndex) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(FixedSource))
        }
    }

    #[test]
    fn falls_through_to_first_readable_backend() -> Result<()> {
        let released = Arc::new(AtomicUsize::new(0));
        let mut chain = CaptureChain::default();
        chain.push(Missing);
        chain.push(Unreadable(released.clone()));
        chain.push(Working);

        let opened = chain.open(3)?;
        assert_eq!(opened.backend, "working");
        assert_eq!(released.load(Ordering::SeqCst), 1, "unreadable source released");
        Ok(())
    }

    #[test]
    fn reports_every_failure() {
        let mut chain = CaptureChain::default();
        chain.push(Missing);
        chain.push(Unreadable(Arc::new(AtomicUsize::new(0))));
        let err = chain.open(1).unwrap_err().to_string();
        assert!(err.contains("missing"));
        assert!(err.contains("unreadable"));
        assert!(!chain.probe(1));
    }

    #[test]
    fn empty_chain_fails() {
        assert!(CaptureChain::default().open(0).is_err());
    }
}
