//! The bundled MNIST data: one sprite PNG plus a raw label file.
//!
//! The sprite holds one example per row, 784 pixels wide, grayscale read from the red
//! channel. The label file holds 10 bytes per example, a one-hot encoding of the digit.

use crate::data::{one_hot, InMemorySource, IMAGE_PIXELS};
use crate::error::DataError;
use crate::model::NUM_CLASSES;
use image::RgbaImage;
use ndarray::prelude::*;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteOptions {
    /// Leading rows used for training, the rest are the test split.
    pub train_elements: usize,
    /// Seeds the shuffled walk over each split.
    pub seed: u64,
}

impl Default for SpriteOptions {
    fn default() -> Self {
        SpriteOptions {
            train_elements: 55_000,
            seed: 0,
        }
    }
}

/// Reads the sprite and label files from disk.
pub fn load_sprite(
    images_png: impl AsRef<Path>,
    labels_bin: impl AsRef<Path>,
    options: SpriteOptions,
) -> Result<InMemorySource, DataError> {
    let images_png = images_png.as_ref();
    let labels_bin = labels_bin.as_ref();

    let sprite = image::open(images_png)?.to_rgba8();
    let labels = fs::read(labels_bin).map_err(|source| DataError::Io {
        path: labels_bin.display().to_string(),
        source,
    })?;
    info!(
        images = %images_png.display(),
        labels = %labels_bin.display(),
        examples = sprite.height(),
        "loaded dataset sprite"
    );
    decode_sprite(&sprite, &labels, options)
}

/// Turns an already decoded sprite and its label bytes into a data source.
pub fn decode_sprite(
    sprite: &RgbaImage,
    labels: &[u8],
    options: SpriteOptions,
) -> Result<InMemorySource, DataError> {
    if sprite.width() as usize != IMAGE_PIXELS {
        return Err(DataError::Malformed {
            message: format!(
                "sprite is {} pixels wide, expected {IMAGE_PIXELS}",
                sprite.width()
            ),
        });
    }
    let examples = sprite.height() as usize;
    if labels.len() != examples * NUM_CLASSES {
        return Err(DataError::Malformed {
            message: format!(
                "{} label bytes for {examples} examples, expected {}",
                labels.len(),
                examples * NUM_CLASSES
            ),
        });
    }

    let images = Array2::from_shape_fn((examples, IMAGE_PIXELS), |(row, col)| {
        sprite.get_pixel(col as u32, row as u32)[0] as f32 / 255.0
    });
    let digits = labels
        .chunks_exact(NUM_CLASSES)
        .enumerate()
        .map(|(row, bytes)| decode_label(row, bytes))
        .collect::<Result<Vec<_>, _>>()?;
    let labels = one_hot(&digits)?;

    InMemorySource::split(images, labels, options.train_elements, options.seed)
}

/// The digit of one 10-byte label row, which must hold a single 1 and zeros elsewhere.
fn decode_label(row: usize, bytes: &[u8]) -> Result<usize, DataError> {
    let malformed = || DataError::Malformed {
        message: format!("label row {row} is not one-hot: {bytes:?}"),
    };
    let mut hot = bytes.iter().enumerate().filter(|(_, &b)| b != 0).map(|(i, _)| i);
    match (hot.next(), hot.next()) {
        (Some(digit), None) if bytes[digit] == 1 => Ok(digit),
        _ => Err(malformed()),
    }
}
