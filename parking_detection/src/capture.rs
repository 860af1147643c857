use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{
    imageops::{self, FilterType},
    RgbImage,
};

use crate::error::{Error, Result};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Something that hands out camera frames at the capture resolution.
///
/// Calls block until a frame is available. Each execution context opens its
/// own source; sources are never shared across threads.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<RgbImage>;
}

fn load_frame(path: &Path, (width, height): (u32, u32)) -> Result<RgbImage> {
    let frame = image::open(path)
        .map_err(|source| Error::FrameLoad {
            path: path.to_path_buf(),
            source,
        })?
        .into_rgb8();
    if frame.dimensions() == (width, height) {
        return Ok(frame);
    }
    Ok(imageops::resize(&frame, width, height, FilterType::Triangle))
}

/// Re-reads one image file per capture; an external capture daemon keeps
/// overwriting it with the latest camera frame.
#[derive(Debug, Clone)]
pub struct StillFrameSource {
    path: PathBuf,
    resolution: (u32, u32),
}

impl StillFrameSource {
    pub fn new(path: impl Into<PathBuf>, resolution: (u32, u32)) -> Self {
        Self {
            path: path.into(),
            resolution,
        }
    }
}

impl FrameSource for StillFrameSource {
    fn capture(&mut self) -> Result<RgbImage> {
        load_frame(&self.path, self.resolution)
    }
}

/// Cycles through the image files of a directory in file name order.
#[derive(Debug, Clone)]
pub struct ReplayFrameSource {
    frames: Vec<PathBuf>,
    next: usize,
    resolution: (u32, u32),
}

impl ReplayFrameSource {
    pub fn open(dir: &Path, resolution: (u32, u32)) -> Result<Self> {
        let mut frames = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_frame {
                frames.push(path);
            }
        }
        if frames.is_empty() {
            return Err(Error::NoFrames(dir.to_path_buf()));
        }
        frames.sort();
        Ok(Self {
            frames,
            next: 0,
            resolution,
        })
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplayFrameSource {
    fn capture(&mut self) -> Result<RgbImage> {
        let path = &self.frames[self.next];
        self.next = (self.next + 1) % self.frames.len();
        load_frame(path, self.resolution)
    }
}

/// A directory replays its frames, anything else is treated as a live still.
pub fn open_frame_source(path: &Path, resolution: (u32, u32)) -> Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        let source = ReplayFrameSource::open(path, resolution)?;
        tracing::info!(dir = %path.display(), frames = source.len(), "Replaying frames");
        Ok(Box::new(source))
    } else {
        tracing::info!(path = %path.display(), "Reading frames from still image");
        Ok(Box::new(StillFrameSource::new(path, resolution)))
    }
}
