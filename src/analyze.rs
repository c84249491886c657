use crate::error::AnalysisError;
use crate::extract::extract;
use crate::model::{argmax, Classifier};
use crate::surface::PixelSource;
use tracing::{debug, error};

/// Classifies whatever is drawn on `surface`. Returns the digit, 0 to 9.
///
/// Failures are logged here and reported as a bare [`AnalysisError`]. Nothing is mutated.
pub fn analyze<S: PixelSource + ?Sized>(
    surface: &S,
    model: &Classifier,
) -> Result<usize, AnalysisError> {
    let tensor = extract(surface).map_err(|e| {
        error!(error = %e, "tensor extraction failed");
        AnalysisError
    })?;
    let probs = model.predict(tensor.into_batch().view()).map_err(|e| {
        error!(error = %e, "prediction failed");
        AnalysisError
    })?;

    let digit = argmax(probs.row(0));
    debug!(digit, probability = probs[[0, digit]], "analyzed drawing");
    Ok(digit)
}
