//! Shared broadcast half of the parking occupancy pipeline: the wire
//! snapshot, the subscriber hub and the WebSocket server in front of it.

pub mod cli;
pub mod error;
pub mod hub;
pub mod server;
pub mod snapshot;
pub mod telemetry;

pub use cli::BroadcastArgs;
pub use error::{Error, Result};
pub use hub::{DeliveryReport, Hub, HubSettings, SubscriberId};
pub use snapshot::{ParkingSnapshot, SpotStatus};
