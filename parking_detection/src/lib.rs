//! Live half of the parking occupancy pipeline: spot geometry from a mask,
//! per-spot classification of camera frames, the shared status cache, the
//! sampling loop that feeds the broadcast hub, and the local preview.

pub mod capture;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod geometry;
pub mod preview;
pub mod sampler;
pub mod status;
pub mod window;
