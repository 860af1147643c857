use anyhow::{Context as _, Result};
use clap::Parser;
use parking_detection::{
    capture,
    config::{Config, PreviewMode},
    context::Context,
    preview::{self, PngPreviewSink, PreviewRenderer, PreviewSink},
    sampler::Sampler,
    window::{self, LatestFrame, WindowPreviewSink},
};
use spot_broadcast::server;

#[tokio::main]
async fn main() -> Result<()> {
    spot_broadcast::telemetry::init();
    let config = Config::parse();

    // no spot geometry, no service
    let ctx = Context::build(&config).context("failed to prepare parking spots")?;
    if ctx.cache.is_empty() {
        tracing::warn!(mask = %config.mask.display(), "Mask has no spots, snapshots will be empty");
    }

    let sampler = Sampler::new(
        ctx.clone(),
        capture::open_frame_source(&config.frames, config.resolution())?,
        config.sample_period(),
        config.max_capture_failures,
    );

    let latest = LatestFrame::default();
    let sink: Option<Box<dyn PreviewSink>> = match config.preview {
        PreviewMode::Window => Some(Box::new(WindowPreviewSink::new(latest.clone()))),
        PreviewMode::Png => {
            let sink = PngPreviewSink::new(&config.preview_path);
            preview::spawn_quit_listener(ctx.shutdown.clone())?;
            tracing::info!(
                path = %sink.path().display(),
                "Writing preview frames, type `q` + Enter to quit"
            );
            Some(Box::new(sink))
        }
        PreviewMode::Off => None,
    };
    let preview = match sink {
        Some(sink) => {
            let renderer = PreviewRenderer::new(
                ctx.clone(),
                capture::open_frame_source(&config.frames, config.resolution())?,
                sink,
                config.preview_interval(),
                config.max_capture_failures,
            );
            let stop = renderer.stop_token();
            Some((renderer.spawn()?, stop))
        }
        None => None,
    };

    let server_task = tokio::spawn({
        let (hub, shutdown) = (ctx.hub.clone(), ctx.shutdown.clone());
        let addr = config.broadcast.listen_addr();
        async move {
            let result = server::serve(addr, hub, shutdown.clone()).await;
            shutdown.cancel();
            result
        }
    });
    let sampler_task = tokio::spawn({
        let shutdown = ctx.shutdown.clone();
        async move {
            let result = sampler.run().await;
            shutdown.cancel();
            result
        }
    });

    if config.preview == PreviewMode::Window {
        let shutdown = ctx.shutdown.clone();
        let (size, repaint) = (config.resolution(), config.preview_interval());
        match tokio::task::block_in_place(|| window::run(latest, shutdown, repaint, size)) {
            Ok(()) => ctx.shutdown.cancel(),
            Err(e) => {
                tracing::error!(error = %e, "Preview window unavailable, running headless");
                if let Some((_, stop)) = &preview {
                    stop.cancel();
                }
            }
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            ctx.shutdown.cancel();
        }
        _ = ctx.shutdown.cancelled() => tracing::info!("Shutting down"),
    }

    let served = server_task.await?;
    let sampled = sampler_task.await?;
    if let Some((handle, _)) = preview {
        match tokio::task::spawn_blocking(move || handle.join()).await? {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Preview ended with an error"),
            Err(_) => tracing::error!("Preview thread panicked"),
        }
    }

    served.context("WebSocket server failed")?;
    sampled.context("sampler stopped")?;
    Ok(())
}
