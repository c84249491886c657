//! Error types, one enum per failure kind.
//!
//! Data loading, training and analysis each fail with their own type so that the
//! command layer (see [`crate::app`]) is the only place that turns a failure into a
//! user-visible message.

use thiserror::Error;

/// Errors raised inside the network (shape mismatches, missing forward caches).
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{layer}: expected shape {expected}, got {got:?}")]
    Shape {
        layer: &'static str,
        expected: String,
        got: Vec<usize>,
    },

    #[error("{layer}: backward called before a training forward pass")]
    MissingCache { layer: &'static str },

    #[error("{layer}: {source}")]
    Reshape {
        layer: &'static str,
        #[source]
        source: ndarray::ShapeError,
    },

    #[error("non-finite loss at optimisation step {step}")]
    NonFiniteLoss { step: usize },

    #[error("invalid initialisation: {message}")]
    Init { message: String },
}

impl ModelError {
    pub(crate) fn shape(layer: &'static str, expected: impl Into<String>, got: &[usize]) -> Self {
        ModelError::Shape {
            layer,
            expected: expected.into(),
            got: got.to_vec(),
        }
    }
}

/// The external data source could not supply a batch.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image")]
    Image(#[from] image::ImageError),

    #[error("malformed dataset: {message}")]
    Malformed { message: String },

    #[error("requested {requested} examples but the {split} split is empty")]
    Empty { split: &'static str, requested: usize },

    #[error("batch has the wrong shape")]
    Shape(#[source] ModelError),
}

/// The drawing surface could not be turned into an intensity tensor.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("surface returned {got} bytes for a {width}x{height} region")]
    ShortRead {
        width: usize,
        height: usize,
        got: usize,
    },

    #[error("surface is {width}x{height}, expected {expected}x{expected}")]
    SurfaceSize {
        width: usize,
        height: usize,
        expected: usize,
    },

    #[error("extracted tensor has the wrong shape")]
    Shape(#[source] ModelError),
}

/// A training run failed. Parameter updates applied before the failure are kept.
#[derive(Error, Debug)]
pub enum TrainError {
    #[error("error loading training data")]
    DataLoad(#[from] DataError),

    #[error("error fitting the model")]
    Fit(#[from] ModelError),
}

/// Extraction or prediction failed. The cause is logged where it happens and not carried.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("error analyzing data")]
pub struct AnalysisError;

/// Configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}
