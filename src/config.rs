//! Training presets and the optional JSON configuration file.

use crate::error::ConfigError;
use crate::freehand::StrokeOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Named data-volume preset for a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Small,
    Large,
}

/// How many examples a training run requests from the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVolume {
    pub train: usize,
    pub test: usize,
}

impl Default for DataVolume {
    fn default() -> Self {
        DataVolume {
            train: 5500,
            test: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Seeds both the shuffling and, through the app, the weight initialisation.
    pub seed: Option<u64>,
    pub small: DataVolume,
    pub large: DataVolume,
    /// Draw an indicatif progress bar while fitting.
    pub progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 10,
            batch_size: 512,
            learning_rate: 0.001,
            seed: None,
            // Both presets request the same volume for now.
            small: DataVolume::default(),
            large: DataVolume::default(),
            progress: false,
        }
    }
}

impl TrainingConfig {
    pub fn volume(&self, regime: Regime) -> DataVolume {
        match regime {
            Regime::Small => self.small,
            Regime::Large => self.large,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };
        if self.epochs == 0 {
            return invalid("epochs must be at least 1");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid("learning_rate must be a positive number");
        }
        for volume in [self.small, self.large] {
            if volume.train == 0 || volume.test == 0 {
                return invalid("data volumes must request at least one example per split");
            }
        }
        Ok(())
    }
}

/// Everything the `--config` file can set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub training: TrainingConfig,
    pub stroke: StrokeOptions,
}

impl AppConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.training.validate()?;
        Ok(config)
    }
}
