use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use spot_broadcast::BroadcastArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PreviewMode {
    /// Live annotated feed in a desktop window; `q` in the window quits.
    Window,
    /// Latest annotated frame rewritten as a PNG, for rigs without a display.
    Png,
    Off,
}

/// Classify parking spots from a camera feed and broadcast their status.
#[derive(Debug, Clone, Parser)]
#[command(name = "parking_detection", version)]
pub struct Config {
    /// Single-channel mask; every separate white region is one parking spot.
    #[arg(long, default_value = "mask_crop.png")]
    pub mask: PathBuf,

    /// Latest camera frame, or a directory of frames to replay.
    #[arg(long, default_value = "frame.jpg")]
    pub frames: PathBuf,

    /// Capture width in pixels.
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// Capture height in pixels.
    #[arg(long, default_value_t = 480)]
    pub height: u32,

    #[arg(long, default_value_t = 1000)]
    pub sample_period_ms: u64,

    /// Exported linear spot model (JSON). Without it a uniformity heuristic is used.
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Luma standard deviation at or below which the heuristic calls a spot empty.
    #[arg(long, default_value_t = 18.0)]
    pub uniformity_threshold: f32,

    #[arg(long, value_enum, default_value_t = PreviewMode::Window)]
    pub preview: PreviewMode,

    /// Target file of the `png` preview.
    #[arg(long, default_value = "preview.png")]
    pub preview_path: PathBuf,

    #[arg(long, default_value_t = 100)]
    pub preview_interval_ms: u64,

    /// Consecutive capture failures before a loop gives up.
    #[arg(long, default_value_t = 5)]
    pub max_capture_failures: u32,

    #[command(flatten)]
    pub broadcast: BroadcastArgs,
}

impl Config {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn preview_interval(&self) -> Duration {
        Duration::from_millis(self.preview_interval_ms)
    }
}
