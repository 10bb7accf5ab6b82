//! camera_probe - open one camera through the configured capture backends
//! and time a handful of frame reads.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use plate_watch::{ingest::chain_from_settings, CameraIndex, WatchConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera index to open.
    #[arg(long, default_value_t = 0)]
    index: CameraIndex,
    /// Number of frames to read after the device opens.
    #[arg(long, default_value_t = 30)]
    frames: u32,
    /// Capture backends to try, comma separated (overrides config).
    #[arg(long, value_delimiter = ',')]
    backends: Vec<String>,
    /// Probe indices 0..probe_limit instead of reading from one camera.
    #[arg(long)]
    scan: bool,
    /// Write the first frame to this JPEG file.
    #[arg(long)]
    save: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = WatchConfig::load()?;
    if !args.backends.is_empty() {
        cfg.camera.backends = args.backends.clone();
    }
    let chain = chain_from_settings(&cfg.camera)?;

    if args.scan {
        let found: Vec<CameraIndex> = (0..cfg.camera.probe_limit)
            .filter(|index| chain.probe(*index))
            .collect();
        if found.is_empty() {
            println!("no cameras found in 0..{}", cfg.camera.probe_limit);
        }
        for index in found {
            println!("Camera {}", index);
        }
        return Ok(());
    }

    let started = Instant::now();
    let mut opened = chain.open(args.index)?;
    println!(
        "camera {} opened via {} ({}) in {:?}: {}x{}",
        args.index,
        opened.backend,
        opened.source.describe(),
        started.elapsed(),
        opened.first_frame.width,
        opened.first_frame.height
    );

    if let Some(path) = &args.save {
        let jpeg = opened.first_frame.encode_jpeg(cfg.camera.jpeg_quality)?;
        std::fs::write(path, jpeg).with_context(|| format!("write {}", path.display()))?;
        println!("first frame written to {}", path.display());
    }

    let started = Instant::now();
    let mut failures = 0u32;
    for n in 0..args.frames {
        match opened.source.read_frame() {
            Ok(frame) => log::debug!("frame {} ok (sequence {})", n, frame.sequence),
            Err(err) => {
                failures += 1;
                log::warn!("frame {} failed: {:#}", n, err);
            }
        }
    }
    let elapsed = started.elapsed();
    let ok = args.frames - failures;
    println!(
        "read {}/{} frames in {:?} ({:.1} fps)",
        ok,
        args.frames,
        elapsed,
        ok as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    if failures == args.frames && args.frames > 0 {
        return Err(anyhow!("camera {} produced no frames", args.index));
    }
    Ok(())
}
