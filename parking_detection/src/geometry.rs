use std::path::Path;

use image::{
    imageops::{self, FilterType},
    GrayImage,
};

use crate::error::{Error, Result};

/// Axis-aligned rectangle in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpotRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SpotRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Inclusive corner coordinates `[x0, y0, x1, y1]`.
    pub fn corners(&self) -> [u32; 4] {
        [
            self.x,
            self.y,
            self.x + self.width.saturating_sub(1),
            self.y + self.height.saturating_sub(1),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Spot {
    pub index: usize,
    pub rect: SpotRect,
}

/// Load the spot mask as 8-bit luma at the capture resolution.
///
/// Nearest-neighbour resizing keeps the mask binary, so component count and
/// order survive the resize.
pub fn load_mask(path: &Path, (width, height): (u32, u32)) -> Result<GrayImage> {
    let mask = image::open(path)
        .map_err(|source| Error::MaskLoad {
            path: path.to_path_buf(),
            source,
        })?
        .into_luma8();
    if mask.dimensions() == (width, height) {
        return Ok(mask);
    }
    tracing::debug!(
        from = ?mask.dimensions(),
        to = ?(width, height),
        "Resizing mask to capture resolution"
    );
    Ok(imageops::resize(&mask, width, height, FilterType::Nearest))
}

/// One spot per 4-connected non-zero region, numbered in raster discovery order.
pub fn extract_spots(mask: &GrayImage) -> Vec<Spot> {
    let (width, height) = mask.dimensions();
    let at = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;
    let lit = |x: u32, y: u32| mask.get_pixel(x, y)[0] != 0;

    let mut seen = vec![false; width as usize * height as usize];
    let mut stack = Vec::new();
    let mut spots = Vec::new();

    for y in 0..height {
        for x in 0..width {
            if seen[at(x, y)] || !lit(x, y) {
                continue;
            }
            seen[at(x, y)] = true;
            stack.push((x, y));
            let [mut x0, mut y0, mut x1, mut y1] = [x, y, x, y];

            while let Some((cx, cy)) = stack.pop() {
                x0 = x0.min(cx);
                y0 = y0.min(cy);
                x1 = x1.max(cx);
                y1 = y1.max(cy);

                let neighbours = [
                    (cx.wrapping_sub(1), cy),
                    (cx + 1, cy),
                    (cx, cy.wrapping_sub(1)),
                    (cx, cy + 1),
                ];
                for (nx, ny) in neighbours {
                    if nx >= width || ny >= height || seen[at(nx, ny)] || !lit(nx, ny) {
                        continue;
                    }
                    seen[at(nx, ny)] = true;
                    stack.push((nx, ny));
                }
            }

            spots.push(Spot {
                index: spots.len(),
                rect: SpotRect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1),
            });
        }
    }
    spots
}
