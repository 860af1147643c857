use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use eframe::egui;
use image::RgbImage;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    preview::PreviewSink,
};

pub const WINDOW_TITLE: &str = "Parking Spot Detection";

/// Hand-off between the renderer thread and the window. Only the newest
/// frame is kept; the window skips whatever it was too slow to show.
#[derive(Debug, Clone, Default)]
pub struct LatestFrame(Arc<Mutex<Option<RgbImage>>>);

impl LatestFrame {
    fn put(&self, frame: RgbImage) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    pub fn take(&self) -> Option<RgbImage> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[derive(Debug, Clone)]
pub struct WindowPreviewSink {
    latest: LatestFrame,
}

impl WindowPreviewSink {
    pub fn new(latest: LatestFrame) -> Self {
        Self { latest }
    }
}

impl PreviewSink for WindowPreviewSink {
    fn present(&mut self, frame: RgbImage) -> Result<()> {
        self.latest.put(frame);
        Ok(())
    }
}

pub fn to_color_image(frame: &RgbImage) -> egui::ColorImage {
    let (width, height) = frame.dimensions();
    egui::ColorImage::from_rgb([width as usize, height as usize], frame.as_raw())
}

/// The titled live view. Pressing `q` inside it shuts the whole process down,
/// and it closes itself once shutdown starts anywhere else.
pub struct PreviewWindow {
    latest: LatestFrame,
    texture: Option<egui::TextureHandle>,
    shutdown: CancellationToken,
    repaint: Duration,
}

impl PreviewWindow {
    pub fn new(latest: LatestFrame, shutdown: CancellationToken, repaint: Duration) -> Self {
        Self {
            latest,
            texture: None,
            shutdown,
            repaint,
        }
    }

    fn should_close(&self, quit_pressed: bool) -> bool {
        if quit_pressed {
            tracing::info!("Quit key pressed");
            self.shutdown.cancel();
        }
        self.shutdown.is_cancelled()
    }
}

impl eframe::App for PreviewWindow {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        let quit_pressed = ctx.input(|i| i.key_pressed(egui::Key::Q));
        if self.should_close(quit_pressed) {
            frame.close();
            return;
        }

        if let Some(latest) = self.latest.take() {
            let image = to_color_image(&latest);
            let options = egui::TextureOptions::default();
            if let Some(texture) = self.texture.as_mut() {
                texture.set(image, options);
            } else {
                self.texture = Some(ctx.load_texture("preview", image, options));
            }
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| match &self.texture {
                Some(texture) => {
                    ui.image(texture.id(), texture.size_vec2());
                }
                None => {
                    ui.label("Waiting for the first frame");
                }
            });

        ctx.request_repaint_after(self.repaint);
    }
}

/// Open the window and block until it closes. Must run on the main thread.
pub fn run(
    latest: LatestFrame,
    shutdown: CancellationToken,
    repaint: Duration,
    (width, height): (u32, u32),
) -> Result<()> {
    let options = eframe::NativeOptions {
        initial_window_size: Some(egui::vec2(width as f32, height as f32)),
        ..Default::default()
    };
    eframe::run_native(
        WINDOW_TITLE,
        options,
        Box::new(move |_| Box::new(PreviewWindow::new(latest, shutdown, repaint))),
    )
    .map_err(|e| Error::Window(e.to_string()))
}
