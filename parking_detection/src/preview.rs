use std::{
    fs,
    io::{self, BufRead},
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use image::{GrayImage, ImageFormat, Rgb, RgbImage};
use spot_broadcast::SpotStatus;
use tokio_util::sync::CancellationToken;

use crate::{
    capture::FrameSource,
    context::Context,
    error::{Error, Result},
    geometry::{Spot, SpotRect},
};

pub const EMPTY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const OCCUPIED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const QUIT_KEY: &str = "q";

const FRAME_WEIGHT: f32 = 0.7;
const MASK_WEIGHT: f32 = 0.3;
const BORDER: u32 = 2;

/// Where annotated preview frames go.
pub trait PreviewSink: Send {
    fn present(&mut self, frame: RgbImage) -> Result<()>;
}

/// Keeps the most recent preview frame as a PNG at a fixed path.
///
/// Frames are written next to the target and renamed over it, so a viewer
/// polling the file never reads a half-written image.
#[derive(Debug, Clone)]
pub struct PngPreviewSink {
    path: PathBuf,
    staging: PathBuf,
}

impl PngPreviewSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let staging = path.with_extension("partial");
        Self { path, staging }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreviewSink for PngPreviewSink {
    fn present(&mut self, frame: RgbImage) -> Result<()> {
        frame.save_with_format(&self.staging, ImageFormat::Png)?;
        fs::rename(&self.staging, &self.path)?;
        Ok(())
    }
}

/// `0.7 * frame + 0.3 * mask`, the mask spread over all three channels.
pub fn blend_mask(frame: &RgbImage, mask: &GrayImage) -> Result<RgbImage> {
    if frame.dimensions() != mask.dimensions() {
        return Err(Error::FrameSize {
            expected: mask.dimensions(),
            actual: frame.dimensions(),
        });
    }
    let (width, height) = frame.dimensions();
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let shade = mask.get_pixel(x, y)[0] as f32 * MASK_WEIGHT;
        let pixel = frame.get_pixel(x, y);
        Rgb(pixel
            .0
            .map(|c| (c as f32 * FRAME_WEIGHT + shade).round().min(255.0) as u8))
    }))
}

/// Draw a rectangle border with given thickness, clipped to the image.
pub fn draw_rect(img: &mut RgbImage, rect: SpotRect, color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let [x0, y0, x1, y1] = rect.corners();
    let (x1, y1) = (x1.min(w - 1), y1.min(h - 1));
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 >= w || yy0 >= h || xx0 > xx1 || yy0 > yy1 {
            continue;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

/// Mask overlay plus one outline per spot, green when empty and red when
/// occupied or not yet classified.
pub fn annotate(
    frame: &RgbImage,
    mask: &GrayImage,
    spots: &[Spot],
    slots: &[Option<SpotStatus>],
) -> Result<RgbImage> {
    let mut out = blend_mask(frame, mask)?;
    for spot in spots {
        let color = match slots.get(spot.index).copied().flatten() {
            Some(SpotStatus::Empty) => EMPTY_COLOR,
            _ => OCCUPIED_COLOR,
        };
        draw_rect(&mut out, spot.rect, color, BORDER);
    }
    Ok(out)
}

/// Local live view. Runs on its own thread with its own frame source and
/// only reads the status cache; classification stays with the sampler.
pub struct PreviewRenderer {
    ctx: Context,
    source: Box<dyn FrameSource>,
    sink: Box<dyn PreviewSink>,
    interval: Duration,
    max_capture_failures: u32,
    stop: CancellationToken,
}

impl PreviewRenderer {
    pub fn new(
        ctx: Context,
        source: Box<dyn FrameSource>,
        sink: Box<dyn PreviewSink>,
        interval: Duration,
        max_capture_failures: u32,
    ) -> Self {
        let stop = ctx.shutdown.child_token();
        Self {
            ctx,
            source,
            sink,
            interval,
            max_capture_failures: max_capture_failures.max(1),
            stop,
        }
    }

    /// Stops this renderer alone; process shutdown stops it too.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn render_once(&mut self) -> Result<()> {
        let frame = self.source.capture()?;
        let slots = self.ctx.cache.slots();
        let annotated = annotate(&frame, &self.ctx.mask, &self.ctx.spots, &slots)?;
        self.sink.present(annotated)
    }

    pub fn run(mut self) -> Result<()> {
        let mut failures = 0;
        while !self.stop.is_cancelled() {
            let started = Instant::now();
            match self.render_once() {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "Preview frame failed");
                    if failures >= self.max_capture_failures {
                        return Err(Error::CaptureGaveUp {
                            attempts: failures,
                            source: Box::new(e),
                        });
                    }
                }
            }
            if let Some(rest) = self.interval.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        tracing::info!("Preview stopped");
        Ok(())
    }

    pub fn spawn(self) -> io::Result<JoinHandle<Result<()>>> {
        thread::Builder::new()
            .name("preview".into())
            .spawn(move || {
                let result = self.run();
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Preview gave up");
                }
                result
            })
    }
}

/// Cancel `shutdown` when a line consisting of the quit key arrives.
pub fn watch_for_quit<R: BufRead>(input: R, shutdown: &CancellationToken) {
    for line in input.lines() {
        match line {
            Ok(line) if line.trim() == QUIT_KEY => {
                tracing::info!("Quit key pressed");
                shutdown.cancel();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Stopped reading the keyboard");
                return;
            }
        }
        if shutdown.is_cancelled() {
            return;
        }
    }
}

/// Detached stdin watcher; ends with the process.
pub fn spawn_quit_listener(shutdown: CancellationToken) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("quit-key".into())
        .spawn(move || watch_for_quit(io::stdin().lock(), &shutdown))
}
