use crate::config::{Regime, TrainingConfig};
use crate::data::{Batch, DataSource};
use crate::error::{DataError, ModelError, TrainError};
use crate::model::{count_correct, Classifier, INPUT_SIZE, NUM_CLASSES};
use crate::optim::{categorical_cross_entropy, Adam, Optimizer};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Statistics for one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean training loss over all examples of the epoch.
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
    /// Wall-clock duration of the epoch, validation included.
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub regime: Regime,
    pub train_examples: usize,
    pub test_examples: usize,
    pub epochs: Vec<EpochStats>,
    pub elapsed_ms: u64,
}

impl TrainingReport {
    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

/// Fits a [`Classifier`] on batches pulled from a [`DataSource`].
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    pub config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Trainer {
        Trainer { config }
    }

    /// Train the model in place.
    ///
    /// Pulls one training and one validation batch sized by `regime`, then runs the configured
    /// number of epochs of shuffled mini-batch Adam. The validation batch is only used for
    /// monitoring. On error, updates already applied to the model are kept.
    pub fn train(
        &self,
        model: &mut Classifier,
        data: &mut dyn DataSource,
        regime: Regime,
    ) -> Result<TrainingReport, TrainError> {
        let config = &self.config;
        let volume = config.volume(regime);
        let start = Instant::now();

        let train_batch = data.next_train_batch(volume.train)?;
        check_batch(&train_batch, volume.train, "train")?;
        let test_batch = data.next_test_batch(volume.test)?;
        check_batch(&test_batch, volume.test, "test")?;
        info!(
            ?regime,
            train = volume.train,
            test = volume.test,
            epochs = config.epochs,
            batch_size = config.batch_size,
            "training started"
        );

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut optimizer = Adam::new(config.learning_rate);
        let mut indices: Vec<usize> = (0..train_batch.len()).collect();
        let steps_per_epoch = indices.len().div_ceil(config.batch_size.max(1));

        let pb = if config.progress {
            ProgressBar::new((config.epochs * steps_per_epoch) as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut epochs = Vec::with_capacity(config.epochs);
        for epoch in 1..=config.epochs {
            let epoch_start = Instant::now();
            indices.shuffle(&mut rng);

            let mut loss_sum = 0.0;
            let mut correct = 0;
            // The last mini-batch may be smaller.
            for batch_indices in indices.chunks(config.batch_size.max(1)) {
                let mini = train_batch.select(batch_indices);

                // ----------
                model.zero_grad();
                let probs = model.forward_train(mini.images.view())?;
                let (loss, dprobs) = categorical_cross_entropy(probs.view(), mini.labels.view())?;
                if !loss.is_finite() {
                    return Err(ModelError::NonFiniteLoss {
                        step: optimizer.steps() as usize + 1,
                    }
                    .into());
                }
                model.backward(dprobs)?;
                optimizer.step(model.params_mut());
                // ----------

                loss_sum += loss * mini.len() as f32;
                correct += count_correct(probs.view(), mini.labels.view());
                debug!(step = optimizer.steps(), loss, "optimisation step");
                pb.inc(1);
            }

            let (val_loss, val_accuracy) = evaluate(model, &test_batch, config.batch_size)?;
            let stats = EpochStats {
                epoch,
                loss: loss_sum / train_batch.len() as f32,
                accuracy: correct as f32 / train_batch.len() as f32,
                val_loss,
                val_accuracy,
                elapsed_ms: epoch_start.elapsed().as_millis() as u64,
            };
            pb.set_message(format!("val acc {:.3}", stats.val_accuracy));
            info!(
                epoch,
                loss = stats.loss,
                accuracy = stats.accuracy,
                val_loss = stats.val_loss,
                val_accuracy = stats.val_accuracy,
                "epoch done"
            );
            epochs.push(stats);
        }
        pb.finish_and_clear();

        let report = TrainingReport {
            regime,
            train_examples: train_batch.len(),
            test_examples: test_batch.len(),
            epochs,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(elapsed_ms = report.elapsed_ms, "training completed");
        Ok(report)
    }
}

/// Trains with the default configuration (10 epochs, mini-batches of 512).
pub fn train(
    model: &mut Classifier,
    data: &mut dyn DataSource,
    regime: Regime,
) -> Result<TrainingReport, TrainError> {
    Trainer::default().train(model, data, regime)
}

/// Mean loss and accuracy of the model on `batch`, predicted in parallel chunks.
pub fn evaluate(
    model: &Classifier,
    batch: &Batch,
    chunk_size: usize,
) -> Result<(f32, f32), ModelError> {
    let n = batch.len();
    if n == 0 {
        return Ok((0.0, 0.0));
    }
    let chunk_size = chunk_size.max(1);
    let starts: Vec<usize> = (0..n).step_by(chunk_size).collect();

    let (loss_sum, correct) = starts
        .par_iter()
        .map(|&start| -> Result<(f32, usize), ModelError> {
            let end = (start + chunk_size).min(n);
            let images = batch.images.slice(s![start..end, .., .., ..]);
            let labels = batch.labels.slice(s![start..end, ..]);
            let probs = model.predict(images)?;
            let (loss, _) = categorical_cross_entropy(probs.view(), labels)?;
            Ok((loss * (end - start) as f32, count_correct(probs.view(), labels)))
        })
        .try_reduce(|| (0.0, 0), |a, b| Ok((a.0 + b.0, a.1 + b.1)))?;

    Ok((loss_sum / n as f32, correct as f32 / n as f32))
}

fn check_batch(batch: &Batch, requested: usize, split: &str) -> Result<(), DataError> {
    let n = batch.len();
    if n != requested {
        return Err(DataError::Malformed {
            message: format!("{split} batch has {n} examples, requested {requested}"),
        });
    }
    if batch.images.dim() != (n, INPUT_SIZE, INPUT_SIZE, 1) {
        return Err(DataError::Shape(ModelError::shape(
            "batch images",
            format!("({n}, {INPUT_SIZE}, {INPUT_SIZE}, 1)"),
            batch.images.shape(),
        )));
    }
    if batch.labels.dim() != (n, NUM_CLASSES) {
        return Err(DataError::Shape(ModelError::shape(
            "batch labels",
            format!("({n}, {NUM_CLASSES})"),
            batch.labels.shape(),
        )));
    }
    if let Some(i) = batch.images.iter().position(|v| !v.is_finite()) {
        return Err(DataError::Malformed {
            message: format!("{split} batch has a non-finite pixel at flat index {i}"),
        });
    }
    Ok(())
}
