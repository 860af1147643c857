use std::path::PathBuf;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The spot mask is missing or undecodable. Fatal at startup.
    #[error("failed to load mask {path}: {source}")]
    MaskLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to load frame {path}: {source}")]
    FrameLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no image files in {0}")]
    NoFrames(PathBuf),

    #[error("frame is {actual:?}, expected {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("spot {index} lies outside the {width}x{height} frame")]
    CropOutOfBounds { index: usize, width: u32, height: u32 },

    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("model expects {expected} weights, found {actual}")]
    ModelShape { expected: usize, actual: usize },

    #[error("giving up after {attempts} consecutive capture failures: {source}")]
    CaptureGaveUp {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("status update has {actual} slots, cache holds {expected}")]
    SlotCount { expected: usize, actual: usize },

    #[error("preview window failed: {0}")]
    Window(String),

    #[error("classifier failed: {0}")]
    Classify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
