use std::time::Duration;

use image::RgbImage;
use spot_broadcast::SpotStatus;
use tokio::time::MissedTickBehavior;

use crate::{
    capture::FrameSource,
    classifier::{crop_spot, SpotClassifier},
    context::Context,
    error::{Error, Result},
    geometry::Spot,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Spots that got a fresh verdict this tick.
    pub classified: usize,
    /// Spots whose classification failed and kept their previous status.
    pub retained: usize,
}

/// Classify every spot of one frame in index order.
///
/// A spot that cannot be cropped or classified keeps its slot from `previous`.
pub fn classify_frame(
    frame: &RgbImage,
    spots: &[Spot],
    classifier: &dyn SpotClassifier,
    previous: &[Option<SpotStatus>],
) -> (Vec<Option<SpotStatus>>, TickReport) {
    let mut report = TickReport::default();
    let slots = spots
        .iter()
        .map(|spot| match crop_spot(frame, spot).and_then(|crop| classifier.classify(&crop)) {
            Ok(status) => {
                report.classified += 1;
                Some(status)
            }
            Err(e) => {
                tracing::warn!(spot = spot.index, error = %e, "Classification failed, keeping previous status");
                report.retained += 1;
                previous.get(spot.index).copied().flatten()
            }
        })
        .collect();
    (slots, report)
}

/// The authoritative sampling loop: capture, classify, publish, broadcast.
pub struct Sampler {
    ctx: Context,
    source: Box<dyn FrameSource>,
    period: Duration,
    max_capture_failures: u32,
}

impl Sampler {
    pub fn new(
        ctx: Context,
        source: Box<dyn FrameSource>,
        period: Duration,
        max_capture_failures: u32,
    ) -> Self {
        Self {
            ctx,
            source,
            period,
            max_capture_failures: max_capture_failures.max(1),
        }
    }

    /// One tick up to the cache write. The capture blocks, bounded by the frame source.
    pub fn sample(&mut self) -> Result<TickReport> {
        let frame = self.source.capture()?;
        let previous = self.ctx.cache.slots();
        let (slots, report) = classify_frame(
            &frame,
            &self.ctx.spots,
            self.ctx.classifier.as_ref(),
            &previous,
        );
        self.ctx.cache.publish(slots)?;
        Ok(report)
    }

    pub async fn run(mut self) -> Result<()> {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0;

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }

            match self.sample() {
                Ok(report) => {
                    failures = 0;
                    tracing::debug!(
                        classified = report.classified,
                        retained = report.retained,
                        "Sampled frame"
                    );
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "Sampling failed");
                    if failures >= self.max_capture_failures {
                        return Err(Error::CaptureGaveUp {
                            attempts: failures,
                            source: Box::new(e),
                        });
                    }
                    continue;
                }
            }

            let snapshot = self.ctx.cache.snapshot();
            match self.ctx.hub.broadcast(&snapshot).await {
                Ok(delivery) => tracing::debug!(
                    addressed = delivery.addressed,
                    delivered = delivery.delivered,
                    dropped = delivery.dropped.len(),
                    "Broadcast parking snapshot"
                ),
                Err(e) => tracing::error!(error = %e, "Failed to broadcast snapshot"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::{GrayImage, Rgb};
    use spot_broadcast::{Hub, ParkingSnapshot};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{geometry::SpotRect, status::StatusCache};

    /// White crops are empty, black crops are occupied, anything else fails.
    struct ByShade;

    impl SpotClassifier for ByShade {
        fn classify(&self, crop: &RgbImage) -> Result<SpotStatus> {
            match crop.get_pixel(0, 0).0 {
                [255, 255, 255] => Ok(SpotStatus::Empty),
                [0, 0, 0] => Ok(SpotStatus::Occupied),
                other => Err(Error::Classify(format!("unexpected shade {other:?}"))),
            }
        }
    }

    struct FixedFrame(RgbImage);

    impl FrameSource for FixedFrame {
        fn capture(&mut self) -> Result<RgbImage> {
            Ok(self.0.clone())
        }
    }

    struct DeadCamera;

    impl FrameSource for DeadCamera {
        fn capture(&mut self) -> Result<RgbImage> {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "camera unplugged",
            )))
        }
    }

    /// Left third white, middle third black, right third grey.
    fn frame() -> RgbImage {
        RgbImage::from_fn(30, 10, |x, _| match x {
            0..=9 => Rgb([255, 255, 255]),
            10..=19 => Rgb([0, 0, 0]),
            _ => Rgb([128, 128, 128]),
        })
    }

    fn spots() -> Vec<Spot> {
        [(0, 0), (10, 0), (20, 0), (40, 0)]
            .into_iter()
            .enumerate()
            .map(|(index, (x, y))| Spot {
                index,
                rect: SpotRect::new(x, y, 5, 5),
            })
            .collect()
    }

    fn context(spots: Vec<Spot>) -> Context {
        Context {
            cache: StatusCache::new(spots.len()),
            spots: spots.into(),
            mask: Arc::new(GrayImage::new(30, 10)),
            classifier: Arc::new(ByShade),
            hub: Arc::new(Hub::default()),
            shutdown: CancellationToken::new(),
        }
    }

    #[test]
    fn failed_spots_keep_their_previous_status() {
        let previous = vec![
            None,
            None,
            Some(SpotStatus::Empty),
            Some(SpotStatus::Occupied),
        ];
        let (slots, report) = classify_frame(&frame(), &spots(), &ByShade, &previous);

        assert_eq!(
            slots,
            vec![
                Some(SpotStatus::Empty),
                Some(SpotStatus::Occupied),
                Some(SpotStatus::Empty),
                Some(SpotStatus::Occupied),
            ]
        );
        assert_eq!(
            report,
            TickReport {
                classified: 2,
                retained: 2
            }
        );
    }

    #[test]
    fn sample_publishes_a_full_tick() {
        let ctx = context(spots());
        let mut sampler = Sampler::new(
            ctx.clone(),
            Box::new(FixedFrame(frame())),
            Duration::from_secs(1),
            3,
        );

        sampler.sample().unwrap();
        let view = ctx.cache.view();
        assert_eq!(view.generation, 1);
        assert_eq!(view.slots.len(), 4);
        assert_eq!(view.slots[0], Some(SpotStatus::Empty));
        assert_eq!(view.slots[1], Some(SpotStatus::Occupied));
    }

    #[tokio::test(start_paused = true)]
    async fn run_broadcasts_each_tick_until_shutdown() {
        let ctx = context(spots()[..2].to_vec());
        let (_, mut rx) = ctx.hub.register().await;
        let sampler = Sampler::new(
            ctx.clone(),
            Box::new(FixedFrame(frame())),
            Duration::from_secs(1),
            3,
        );
        let task = tokio::spawn(sampler.run());

        for _ in 0..2 {
            let payload = rx.recv().await.unwrap();
            let snapshot = ParkingSnapshot::from_json(&payload).unwrap();
            assert_eq!(
                snapshot.statuses(),
                &[SpotStatus::Empty, SpotStatus::Occupied]
            );
        }

        ctx.shutdown.cancel();
        task.await.unwrap().unwrap();
        assert!(ctx.cache.view().generation >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_gives_up_after_repeated_capture_failures() {
        let ctx = context(spots());
        let (_, mut rx) = ctx.hub.register().await;
        let sampler = Sampler::new(ctx.clone(), Box::new(DeadCamera), Duration::from_secs(1), 3);

        let err = sampler.run().await.unwrap_err();
        assert!(matches!(err, Error::CaptureGaveUp { attempts: 3, .. }));
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.cache.view().generation, 0);
    }
}
