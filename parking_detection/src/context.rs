use std::sync::Arc;

use image::GrayImage;
use spot_broadcast::Hub;
use tokio_util::sync::CancellationToken;

use crate::{
    classifier::{self, SpotClassifier},
    config::Config,
    error::Result,
    geometry::{self, Spot},
    status::StatusCache,
};

/// Everything the sampler, the preview thread and the server share, built
/// once at startup.
#[derive(Clone)]
pub struct Context {
    pub spots: Arc<[Spot]>,
    /// Mask at capture resolution, kept for the preview overlay.
    pub mask: Arc<GrayImage>,
    pub cache: StatusCache,
    pub classifier: Arc<dyn SpotClassifier>,
    pub hub: Arc<Hub>,
    pub shutdown: CancellationToken,
}

impl Context {
    pub fn build(config: &Config) -> Result<Self> {
        let mask = geometry::load_mask(&config.mask, config.resolution())?;
        let spots: Arc<[Spot]> = geometry::extract_spots(&mask).into();
        tracing::info!(count = spots.len(), mask = %config.mask.display(), "Detected parking spots");

        let classifier =
            classifier::from_model_path(config.model.as_deref(), config.uniformity_threshold)?;

        Ok(Self {
            cache: StatusCache::new(spots.len()),
            spots,
            mask: Arc::new(mask),
            classifier,
            hub: Arc::new(Hub::new(config.broadcast.hub_settings())),
            shutdown: CancellationToken::new(),
        })
    }
}
