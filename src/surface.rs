//! The 200x200 drawing surface and the two host primitives the pipeline relies on.

use crate::stroke::Point;
use image::{Rgba, RgbaImage};
use std::path::Path;

pub const SURFACE_SIZE: usize = 200;

/// Opaque black, the stroke colour.
pub const FOREGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Pixel read access to a drawing host.
pub trait PixelSource {
    /// (width, height) in pixels.
    fn dimensions(&self) -> (usize, usize);

    /// Row-major RGBA bytes of the given region. Pixels outside the surface read as
    /// transparent black.
    fn image_data(&self, x: usize, y: usize, width: usize, height: usize) -> Vec<u8>;
}

/// Write access to a drawing host.
pub trait DrawTarget {
    /// Fills a closed polygon using the non-zero winding rule.
    fn fill_polygon(&mut self, polygon: &[Point], color: Rgba<u8>);

    /// Resets the whole surface to fully transparent.
    fn clear(&mut self);
}

/// In-process drawing surface.
#[derive(Debug, Clone)]
pub struct DrawingSurface {
    pixels: RgbaImage,
    scanline: ScanlineBuffer,
}

impl Default for DrawingSurface {
    fn default() -> Self {
        DrawingSurface::new()
    }
}

impl DrawingSurface {
    /// A fully transparent 200x200 surface.
    pub fn new() -> DrawingSurface {
        DrawingSurface::with_size(SURFACE_SIZE, SURFACE_SIZE)
    }

    pub fn with_size(width: usize, height: usize) -> DrawingSurface {
        DrawingSurface {
            pixels: RgbaImage::new(width as u32, height as u32),
            scanline: ScanlineBuffer::default(),
        }
    }

    /// Resets every pixel to fully transparent.
    pub fn clear(&mut self) {
        self.pixels.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.pixels.get_pixel(x, y)
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        self.pixels.put_pixel(x, y, color);
    }

    /// Number of pixels with a non-zero alpha.
    pub fn painted_pixels(&self) -> usize {
        self.pixels.pixels().filter(|p| p.0[3] != 0).count()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
        self.pixels.save(path)
    }
}

impl PixelSource for DrawingSurface {
    fn dimensions(&self) -> (usize, usize) {
        (self.pixels.width() as usize, self.pixels.height() as usize)
    }

    fn image_data(&self, x: usize, y: usize, width: usize, height: usize) -> Vec<u8> {
        let (w, h) = self.dimensions();
        let mut data = vec![0u8; width * height * 4];
        for row in 0..height {
            let sy = y + row;
            if sy >= h {
                break;
            }
            for col in 0..width {
                let sx = x + col;
                if sx >= w {
                    break;
                }
                let offset = (row * width + col) * 4;
                data[offset..offset + 4]
                    .copy_from_slice(&self.pixels.get_pixel(sx as u32, sy as u32).0);
            }
        }
        data
    }
}

impl DrawTarget for DrawingSurface {
    fn fill_polygon(&mut self, polygon: &[Point], color: Rgba<u8>) {
        if polygon.len() < 3 {
            return;
        }
        let (w, h) = (self.pixels.width() as usize, self.pixels.height() as usize);

        let (min_y, max_y) = polygon
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.y), hi.max(p.y))
            });
        if !min_y.is_finite() || !max_y.is_finite() {
            return;
        }
        let first_row = (min_y - 0.5).ceil().max(0.0) as usize;
        let last_row = ((max_y - 0.5).floor().min(h as f32 - 1.0)).max(-1.0);
        if last_row < 0.0 {
            return;
        }

        for row in first_row..=last_row as usize {
            // Sample at pixel centres.
            let y = row as f32 + 0.5;
            for (x0, x1) in self.scanline.spans(polygon, y) {
                let start = (x0 - 0.5).ceil().max(0.0) as usize;
                let end = ((x1 - 0.5).ceil().min(w as f32)).max(0.0) as usize;
                for col in start..end {
                    self.pixels.put_pixel(col as u32, row as u32, color);
                }
            }
        }
    }

    fn clear(&mut self) {
        DrawingSurface::clear(self);
    }
}

/// Edge crossings of one scanline, reused between rows.
#[derive(Debug, Clone, Default)]
struct ScanlineBuffer {
    /// (x, winding direction) of each edge crossing.
    crossings: Vec<(f32, i32)>,
}

impl ScanlineBuffer {
    /// Horizontal spans of the scanline at `y` that lie inside `polygon` under the
    /// non-zero winding rule.
    fn spans(&mut self, polygon: &[Point], y: f32) -> Vec<(f32, f32)> {
        self.crossings.clear();

        let n = polygon.len();
        for i in 0..n {
            let p1 = polygon[i];
            let p2 = polygon[(i + 1) % n];
            // Half-open so a vertex on the scanline is counted once.
            let direction = if p1.y <= y && y < p2.y {
                1
            } else if p2.y <= y && y < p1.y {
                -1
            } else {
                continue;
            };
            let x = p1.x + (y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y);
            self.crossings.push((x, direction));
        }

        self.crossings
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut spans = Vec::new();
        let mut winding = 0;
        let mut span_start = 0.0;
        for &(x, direction) in &self.crossings {
            let was_inside = winding != 0;
            winding += direction;
            match (was_inside, winding != 0) {
                (false, true) => span_start = x,
                (true, false) => spans.push((span_start, x)),
                _ => {}
            }
        }
        spans
    }
}
