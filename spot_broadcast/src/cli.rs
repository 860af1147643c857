use std::{net::SocketAddr, time::Duration};

use clap::Args;

use crate::hub::HubSettings;

/// Broadcast options shared by every binary that serves snapshots.
#[derive(Debug, Clone, Args)]
pub struct BroadcastArgs {
    /// Port the WebSocket server listens on, on all interfaces.
    #[arg(long, default_value_t = 8765)]
    pub port: u16,
    /// Give up on a subscriber whose queue stays full this long.
    #[arg(long, default_value_t = 2000)]
    pub send_timeout_ms: u64,
    /// Snapshots a subscriber may have pending.
    #[arg(long, default_value_t = 4)]
    pub queue_depth: usize,
}

impl BroadcastArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            queue_depth: self.queue_depth,
        }
    }
}
