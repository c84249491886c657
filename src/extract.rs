//! Drawing surface to classifier input.

use crate::error::{ExtractError, ModelError};
use crate::surface::{PixelSource, SURFACE_SIZE};
use image::{GrayImage, Luma};
use ndarray::prelude::*;

/// Side of the square intensity grid fed to the classifier.
pub const GRID_SIZE: usize = 28;

/// A 28x28x1 grid of intensities in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityTensor(Array3<f32>);

impl IntensityTensor {
    /// Wraps `values`, checking the (28, 28, 1) shape.
    pub fn from_array(values: Array3<f32>) -> Result<IntensityTensor, ModelError> {
        if values.dim() != (GRID_SIZE, GRID_SIZE, 1) {
            return Err(ModelError::shape("intensity tensor", "(28, 28, 1)", values.shape()));
        }
        Ok(IntensityTensor(values))
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.0.view()
    }

    /// A single-example batch of shape (1, 28, 28, 1).
    pub fn into_batch(self) -> Array4<f32> {
        self.0.insert_axis(Axis(0))
    }

    pub fn to_luma_image(&self) -> GrayImage {
        GrayImage::from_fn(GRID_SIZE as u32, GRID_SIZE as u32, |x, y| {
            let v = self.0[[y as usize, x as usize, 0]];
            Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8])
        })
    }
}

/// Downsamples the surface's alpha channel to a 28x28 grid.
///
/// Nearest-neighbour point sampling: output cell (x, y) reads source pixel
/// (floor(x * 200/28), floor(y * 200/28)). No averaging, aliasing is accepted.
pub fn extract<S: PixelSource + ?Sized>(surface: &S) -> Result<IntensityTensor, ExtractError> {
    let (width, height) = surface.dimensions();
    if (width, height) != (SURFACE_SIZE, SURFACE_SIZE) {
        return Err(ExtractError::SurfaceSize {
            width,
            height,
            expected: SURFACE_SIZE,
        });
    }

    let data = surface.image_data(0, 0, SURFACE_SIZE, SURFACE_SIZE);
    if data.len() != SURFACE_SIZE * SURFACE_SIZE * 4 {
        return Err(ExtractError::ShortRead {
            width: SURFACE_SIZE,
            height: SURFACE_SIZE,
            got: data.len(),
        });
    }

    let grid = Array3::from_shape_fn((GRID_SIZE, GRID_SIZE, 1), |(y, x, _)| {
        // floor(x * 200 / 28)
        let src_x = x * SURFACE_SIZE / GRID_SIZE;
        let src_y = y * SURFACE_SIZE / GRID_SIZE;
        let alpha = data[(src_y * SURFACE_SIZE + src_x) * 4 + 3];
        alpha as f32 / 255.0
    });

    IntensityTensor::from_array(grid).map_err(ExtractError::Shape)
}
