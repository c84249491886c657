//! The command layer: what the train/analyze/clear controls do.
//!
//! This is the only place where failures become user-visible messages.

use crate::analyze::analyze;
use crate::config::{Regime, TrainingConfig};
use crate::data::DataSource;
use crate::freehand::StrokeOptions;
use crate::model::Classifier;
use crate::sketchpad::Sketchpad;
use crate::train::{Trainer, TrainingReport};
use std::error::Error as _;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TrainSmall,
    TrainLarge,
    Analyze,
    Clear,
}

/// Whether the classifier can be trusted for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// Fresh random weights.
    Untrained,
    Ready,
    /// The last training run failed part way. Weights are unreliable until a run succeeds.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Trained(TrainingReport),
    Digit(usize),
    Cleared,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Trained(report) => match report.last() {
                Some(stats) => write!(
                    f,
                    "Model trained, validation accuracy {:.3}",
                    stats.val_accuracy
                ),
                None => write!(f, "Model trained"),
            },
            Response::Digit(digit) => write!(f, "You drew a {digit}"),
            Response::Cleared => Ok(()),
        }
    }
}

/// A command that did not go through, worded for the user.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("Error training model")]
    TrainingFailed,
    #[error("Error analyzing data")]
    AnalysisFailed,
    #[error("Train the model before analyzing")]
    NotTrained,
    #[error("The model is already trained")]
    AlreadyTrained,
}

pub struct App {
    sketchpad: Sketchpad,
    model: Classifier,
    state: ModelState,
    data: Box<dyn DataSource>,
    trainer: Trainer,
}

impl App {
    pub fn new(
        data: Box<dyn DataSource>,
        training: TrainingConfig,
        stroke: StrokeOptions,
    ) -> Result<App, crate::error::ModelError> {
        Ok(App {
            sketchpad: Sketchpad::new(stroke),
            model: Classifier::new(training.seed)?,
            state: ModelState::Untrained,
            data,
            trainer: Trainer::new(training),
        })
    }

    pub fn dispatch(&mut self, command: Command) -> Result<Response, CommandError> {
        match command {
            Command::TrainSmall => self.train(Regime::Small),
            Command::TrainLarge => self.train(Regime::Large),
            Command::Analyze => self.analyze(),
            Command::Clear => {
                self.sketchpad.clear();
                Ok(Response::Cleared)
            }
        }
    }

    fn train(&mut self, regime: Regime) -> Result<Response, CommandError> {
        match self.state {
            ModelState::Ready => return Err(CommandError::AlreadyTrained),
            ModelState::Failed => {
                // Start over from fresh weights.
                warn!("retrying training after a failed run");
                self.model = Classifier::new(self.trainer.config.seed).map_err(|e| {
                    error!(error = %e, "could not rebuild the classifier");
                    CommandError::TrainingFailed
                })?;
            }
            ModelState::Untrained => {}
        }

        // `&mut self` keeps analysis and a second run out until this returns.
        match self
            .trainer
            .train(&mut self.model, self.data.as_mut(), regime)
        {
            Ok(report) => {
                self.state = ModelState::Ready;
                info!(?regime, "model ready");
                Ok(Response::Trained(report))
            }
            Err(e) => {
                self.state = ModelState::Failed;
                error!(error = %e, cause = ?e.source().map(|s| s.to_string()), "training failed");
                Err(CommandError::TrainingFailed)
            }
        }
    }

    fn analyze(&mut self) -> Result<Response, CommandError> {
        if self.state != ModelState::Ready {
            return Err(CommandError::NotTrained);
        }
        analyze(self.sketchpad.surface(), &self.model)
            .map(Response::Digit)
            .map_err(|_| CommandError::AnalysisFailed)
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    /// Analysis is only offered once a training run has succeeded.
    pub fn can_analyze(&self) -> bool {
        self.state == ModelState::Ready
    }

    pub fn can_train(&self) -> bool {
        matches!(self.state, ModelState::Untrained | ModelState::Failed)
    }

    pub fn sketchpad(&self) -> &Sketchpad {
        &self.sketchpad
    }

    pub fn sketchpad_mut(&mut self) -> &mut Sketchpad {
        &mut self.sketchpad
    }
}
