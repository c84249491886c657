//! Batched image/label pairs for training.

use crate::error::{DataError, ModelError};
use crate::model::{INPUT_SIZE, NUM_CLASSES};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Pixels in one flattened 28x28 image.
pub const IMAGE_PIXELS: usize = INPUT_SIZE * INPUT_SIZE;

/// n images (n, 28, 28, 1) with their one-hot labels (n, 10).
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Array2<f32>,
}

impl Batch {
    /// Pairs images and labels, checking both shapes and the example count.
    pub fn new(images: Array4<f32>, labels: Array2<f32>) -> Result<Batch, ModelError> {
        let (n, height, width, channels) = images.dim();
        if (height, width, channels) != (INPUT_SIZE, INPUT_SIZE, 1) {
            return Err(ModelError::shape("batch images", "(n, 28, 28, 1)", images.shape()));
        }
        if labels.dim() != (n, NUM_CLASSES) {
            return Err(ModelError::shape("batch labels", format!("({n}, 10)"), labels.shape()));
        }
        Ok(Batch { images, labels })
    }

    pub fn len(&self) -> usize {
        self.images.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The examples at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Batch {
        Batch {
            images: self.images.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }
}

/// The external dataset loader.
pub trait DataSource {
    fn next_train_batch(&mut self, n: usize) -> Result<Batch, DataError>;
    fn next_test_batch(&mut self, n: usize) -> Result<Batch, DataError>;
}

/// One split of an in-memory dataset, walked in a shuffled order that wraps around.
#[derive(Debug, Clone)]
struct Split {
    name: &'static str,
    /// (examples, 784)
    images: Array2<f32>,
    /// (examples, 10)
    labels: Array2<f32>,
    order: Vec<usize>,
    cursor: usize,
}

impl Split {
    fn new(name: &'static str, images: Array2<f32>, labels: Array2<f32>, rng: &mut StdRng) -> Split {
        let mut order: Vec<usize> = (0..images.nrows()).collect();
        order.shuffle(rng);
        Split {
            name,
            images,
            labels,
            order,
            cursor: 0,
        }
    }

    fn next_batch(&mut self, n: usize) -> Result<Batch, DataError> {
        if self.order.is_empty() {
            return Err(DataError::Empty {
                split: self.name,
                requested: n,
            });
        }
        let indices: Vec<usize> = (0..n)
            .map(|_| {
                let idx = self.order[self.cursor];
                self.cursor = (self.cursor + 1) % self.order.len();
                idx
            })
            .collect();

        let images = self
            .images
            .select(Axis(0), &indices)
            .into_shape((n, INPUT_SIZE, INPUT_SIZE, 1))
            .map_err(|source| {
                DataError::Shape(ModelError::Reshape {
                    layer: "batch images",
                    source,
                })
            })?;
        let labels = self.labels.select(Axis(0), &indices);
        Batch::new(images, labels).map_err(DataError::Shape)
    }
}

/// A data source over arrays already in memory.
///
/// Each split hands out examples following its own shuffled order, wrapping around when
/// exhausted, so any batch size can be served.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    train: Split,
    test: Split,
}

impl InMemorySource {
    /// `*_images` are (examples, 784) and `*_labels` (examples, 10).
    pub fn new(
        train_images: Array2<f32>,
        train_labels: Array2<f32>,
        test_images: Array2<f32>,
        test_labels: Array2<f32>,
        seed: u64,
    ) -> Result<InMemorySource, DataError> {
        for (split, images, labels) in [
            ("train", &train_images, &train_labels),
            ("test", &test_images, &test_labels),
        ] {
            if images.ncols() != IMAGE_PIXELS || labels.dim() != (images.nrows(), NUM_CLASSES) {
                return Err(DataError::Malformed {
                    message: format!(
                        "{split} split: images {:?} and labels {:?} do not pair up",
                        images.shape(),
                        labels.shape()
                    ),
                });
            }
        }
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(InMemorySource {
            train: Split::new("train", train_images, train_labels, &mut rng),
            test: Split::new("test", test_images, test_labels, &mut rng),
        })
    }

    /// Splits one (examples, 784) / (examples, 10) set: the first `train_elements` rows train,
    /// the rest test.
    pub fn split(
        images: Array2<f32>,
        labels: Array2<f32>,
        train_elements: usize,
        seed: u64,
    ) -> Result<InMemorySource, DataError> {
        let total = images.nrows();
        if labels.nrows() != total {
            return Err(DataError::Malformed {
                message: format!("{total} images but {} labels", labels.nrows()),
            });
        }
        let cut = train_elements.min(total);
        let (train_images, test_images) = images.view().split_at(Axis(0), cut);
        let (train_labels, test_labels) = labels.view().split_at(Axis(0), cut);
        InMemorySource::new(
            train_images.to_owned(),
            train_labels.to_owned(),
            test_images.to_owned(),
            test_labels.to_owned(),
            seed,
        )
    }

    pub fn train_len(&self) -> usize {
        self.train.order.len()
    }

    pub fn test_len(&self) -> usize {
        self.test.order.len()
    }
}

impl DataSource for InMemorySource {
    fn next_train_batch(&mut self, n: usize) -> Result<Batch, DataError> {
        self.train.next_batch(n)
    }

    fn next_test_batch(&mut self, n: usize) -> Result<Batch, DataError> {
        self.test.next_batch(n)
    }
}

/// One-hot encodes digit labels. A label outside 0..=9 is malformed data.
pub fn one_hot(labels: &[usize]) -> Result<Array2<f32>, DataError> {
    let mut out = Array2::zeros((labels.len(), NUM_CLASSES));
    for (i, &label) in labels.iter().enumerate() {
        if label >= NUM_CLASSES {
            return Err(DataError::Malformed {
                message: format!("label {label} of example {i} is not a digit"),
            });
        }
        out[[i, label]] = 1.0;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(train: usize, test: usize) -> InMemorySource {
        let images = Array2::from_shape_fn((train + test, IMAGE_PIXELS), |(i, _)| i as f32);
        let labels = one_hot(&(0..train + test).map(|i| i % 10).collect::<Vec<_>>()).unwrap();
        InMemorySource::split(images, labels, train, 9).unwrap()
    }

    #[test]
    fn batches_have_the_classifier_shapes() {
        let mut data = source(20, 5);
        let batch = data.next_train_batch(8).unwrap();
        assert_eq!(batch.images.dim(), (8, 28, 28, 1));
        assert_eq!(batch.labels.dim(), (8, 10));
        for (image, label) in batch.images.outer_iter().zip(batch.labels.outer_iter()) {
            // every pixel of example i holds i, and its label is i % 10
            let i = image[[0, 0, 0]] as usize;
            assert_eq!(label[i % 10], 1.0);
            assert_eq!(label.sum(), 1.0);
        }
    }

    #[test]
    fn splits_do_not_overlap() {
        let mut data = source(20, 5);
        assert_eq!((data.train_len(), data.test_len()), (20, 5));
        let test = data.next_test_batch(5).unwrap();
        assert!(test.images.iter().all(|&v| v >= 20.0));
        let train = data.next_train_batch(20).unwrap();
        assert!(train.images.iter().all(|&v| v < 20.0));
    }

    #[test]
    fn requests_larger_than_a_split_wrap_around() {
        let mut data = source(4, 2);
        let batch = data.next_train_batch(10).unwrap();
        assert_eq!(batch.len(), 10);
        let mut seen: Vec<usize> = batch
            .images
            .outer_iter()
            .map(|img| img[[0, 0, 0]] as usize)
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn empty_split_is_an_error() {
        let mut data = source(4, 0);
        assert!(matches!(
            data.next_test_batch(1),
            Err(DataError::Empty { split: "test", .. })
        ));
    }

    #[test]
    fn batch_new_checks_label_count() {
        let images = Array4::<f32>::zeros((3, 28, 28, 1));
        assert!(Batch::new(images.clone(), Array2::zeros((2, 10))).is_err());
        assert!(Batch::new(images, Array2::zeros((3, 10))).is_ok());
    }

    #[test]
    fn one_hot_rejects_labels_past_nine() {
        assert_eq!(one_hot(&[2, 0]).unwrap(), array![
            [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0f32]
        ]);
        assert!(matches!(one_hot(&[3, 10]), Err(DataError::Malformed { .. })));
    }
}
