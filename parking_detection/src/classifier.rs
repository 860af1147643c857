use std::{fs, path::Path, sync::Arc};

use image::{
    imageops::{self, FilterType},
    RgbImage,
};
use serde::Deserialize;
use spot_broadcast::SpotStatus;

use crate::{
    error::{Error, Result},
    geometry::Spot,
};

/// Decides whether one cropped spot is empty.
///
/// Implementations are stateless per call; an `Err` means "no verdict for
/// this crop" and the caller keeps the spot's previous status.
pub trait SpotClassifier: Send + Sync {
    fn classify(&self, crop: &RgbImage) -> Result<SpotStatus>;
}

/// Cut a spot's rectangle out of a frame, clipped to the frame edges.
pub fn crop_spot(frame: &RgbImage, spot: &Spot) -> Result<RgbImage> {
    let (frame_width, frame_height) = frame.dimensions();
    let rect = spot.rect;
    if rect.x >= frame_width || rect.y >= frame_height || rect.width == 0 || rect.height == 0 {
        return Err(Error::CropOutOfBounds {
            index: spot.index,
            width: frame_width,
            height: frame_height,
        });
    }
    let width = rect.width.min(frame_width - rect.x);
    let height = rect.height.min(frame_height - rect.y);
    Ok(imageops::crop_imm(frame, rect.x, rect.y, width, height).to_image())
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    width: u32,
    height: u32,
    weights: Vec<f32>,
    bias: f32,
}

/// Linear decision function exported from the trained spot model.
///
/// Input is the crop resized to `width x height`, flattened row by row with
/// each pixel as blue, green, red scaled to `[0, 1]`. A positive decision
/// means occupied.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    width: u32,
    height: u32,
    weights: Vec<f32>,
    bias: f32,
}

impl LinearClassifier {
    pub fn new(width: u32, height: u32, weights: Vec<f32>, bias: f32) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if weights.len() != expected || expected == 0 {
            return Err(Error::ModelShape {
                expected,
                actual: weights.len(),
            });
        }
        Ok(Self {
            width,
            height,
            weights,
            bias,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let model_load = |reason: String| Error::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| model_load(e.to_string()))?;
        let model: ModelFile = serde_json::from_str(&text).map_err(|e| model_load(e.to_string()))?;
        Self::new(model.width, model.height, model.weights, model.bias)
    }

    pub fn decision(&self, crop: &RgbImage) -> f32 {
        let resized = imageops::resize(crop, self.width, self.height, FilterType::Triangle);
        let dot: f32 = resized
            .pixels()
            .flat_map(|pixel| {
                let [r, g, b] = pixel.0;
                [b, g, r]
            })
            .zip(&self.weights)
            .map(|(value, weight)| value as f32 / 255.0 * weight)
            .sum();
        dot + self.bias
    }
}

impl SpotClassifier for LinearClassifier {
    fn classify(&self, crop: &RgbImage) -> Result<SpotStatus> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(Error::Classify("empty crop".to_string()));
        }
        let decision = self.decision(crop);
        if !decision.is_finite() {
            return Err(Error::Classify(format!("decision is {decision}")));
        }
        Ok(SpotStatus::from_empty(decision <= 0.0))
    }
}

/// Model-free fallback: bare tarmac is close to uniform, a parked car is not.
#[derive(Debug, Clone, Copy)]
pub struct UniformityClassifier {
    pub max_std_dev: f32,
}

impl UniformityClassifier {
    pub fn new(max_std_dev: f32) -> Self {
        Self { max_std_dev }
    }

    fn luma_std_dev(crop: &RgbImage) -> f32 {
        let luma: Vec<f32> = crop
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
            })
            .collect();
        let n = luma.len() as f32;
        let mean = luma.iter().sum::<f32>() / n;
        (luma.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt()
    }
}

impl SpotClassifier for UniformityClassifier {
    fn classify(&self, crop: &RgbImage) -> Result<SpotStatus> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(Error::Classify("empty crop".to_string()));
        }
        Ok(SpotStatus::from_empty(
            Self::luma_std_dev(crop) <= self.max_std_dev,
        ))
    }
}

/// The exported model when one is configured, the uniformity heuristic otherwise.
pub fn from_model_path(
    model: Option<&Path>,
    uniformity_threshold: f32,
) -> Result<Arc<dyn SpotClassifier>> {
    match model {
        Some(path) => {
            let classifier = LinearClassifier::load(path)?;
            tracing::info!(path = %path.display(), "Loaded spot model");
            Ok(Arc::new(classifier))
        }
        None => {
            tracing::info!(
                max_std_dev = uniformity_threshold,
                "No spot model configured, using uniformity heuristic"
            );
            Ok(Arc::new(UniformityClassifier::new(uniformity_threshold)))
        }
    }
}
