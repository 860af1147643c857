use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use spot_broadcast::{server, BroadcastArgs, Hub, ParkingSnapshot, SpotStatus};
use tokio_util::sync::CancellationToken;

/// Serve synthetic, alternating parking snapshots for client development.
#[derive(Debug, Parser)]
#[command(name = "mock_broadcaster", version)]
struct Args {
    #[arg(long, default_value_t = 10)]
    num_spots: usize,

    #[arg(long, default_value_t = 5000)]
    period_ms: u64,

    #[command(flatten)]
    broadcast: BroadcastArgs,
}

/// Tick `n` (from 1) marks spot `i` occupied when `i` and `n` share parity:
/// odd spots on odd ticks, even spots on even ticks.
fn alternating_snapshot(num_spots: usize, tick: u64) -> ParkingSnapshot {
    ParkingSnapshot::new(
        (0..num_spots)
            .map(|i| SpotStatus::from_empty(i as u64 % 2 != tick % 2))
            .collect(),
    )
}

async fn send_mock_updates(
    hub: Arc<Hub>,
    num_spots: usize,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    for tick in 1.. {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }

        let snapshot = alternating_snapshot(num_spots, tick);
        match hub.broadcast(&snapshot).await {
            Ok(delivery) => tracing::info!(
                tick,
                occupied = snapshot.occupied_count(),
                delivered = delivery.delivered,
                dropped = delivery.dropped.len(),
                "Sent mock parking snapshot"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to broadcast mock snapshot"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    spot_broadcast::telemetry::init();
    let args = Args::parse();

    let hub = Arc::new(Hub::new(args.broadcast.hub_settings()));
    let shutdown = CancellationToken::new();
    tracing::info!(spots = args.num_spots, period_ms = args.period_ms, "Starting mock broadcaster");

    let updates_task = tokio::spawn(send_mock_updates(
        hub.clone(),
        args.num_spots,
        Duration::from_millis(args.period_ms),
        shutdown.clone(),
    ));
    let server_task = tokio::spawn({
        let (addr, shutdown) = (args.broadcast.listen_addr(), shutdown.clone());
        async move {
            let result = server::serve(addr, hub, shutdown.clone()).await;
            shutdown.cancel();
            result
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }

    updates_task.await?;
    server_task.await?.context("WebSocket server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupied(snapshot: &ParkingSnapshot) -> Vec<usize> {
        snapshot
            .statuses()
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == SpotStatus::Occupied)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn first_tick_occupies_odd_spots() {
        let snapshot = alternating_snapshot(10, 1);
        assert_eq!(snapshot.len(), 10);
        assert_eq!(occupied(&snapshot), vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn second_tick_flips_to_even_spots() {
        assert_eq!(occupied(&alternating_snapshot(10, 2)), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn pattern_keeps_alternating() {
        for tick in 1..=6 {
            let expected = alternating_snapshot(10, if tick % 2 == 1 { 1 } else { 2 });
            assert_eq!(alternating_snapshot(10, tick), expected);
        }
    }

    #[test]
    fn wire_shape_of_the_first_tick() {
        let json = alternating_snapshot(3, 1).to_json().unwrap();
        assert_eq!(json, r#"{"spot_0":"empty","spot_1":"occupied","spot_2":"empty"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_ticks_in_order() {
        let hub = Arc::new(Hub::default());
        let (_, mut rx) = hub.register().await;
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(send_mock_updates(
            hub.clone(),
            4,
            Duration::from_secs(5),
            shutdown.clone(),
        ));

        for tick in 1..=3 {
            let payload = rx.recv().await.unwrap();
            assert_eq!(
                ParkingSnapshot::from_json(&payload).unwrap(),
                alternating_snapshot(4, tick)
            );
        }

        shutdown.cancel();
        task.await.unwrap();
    }
}
