use crate::error::ModelError;
use crate::model::Module;
use ndarray::prelude::*;

#[derive(Debug, Clone, Default)]
pub struct Relu {
    last_input: Option<ArrayD<f32>>,
}

impl Relu {
    pub fn new() -> Relu {
        Relu::default()
    }
}

/// NaN passes through, so a corrupt value surfaces in the loss.
fn relu(x: f32) -> f32 {
    if x < 0.0 {
        0.0
    } else {
        x
    }
}

impl Module for Relu {
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        Ok(input.mapv_into(relu))
    }

    fn forward_train(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let out = input.mapv(relu);
        self.last_input = Some(input);
        Ok(out)
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let last_input = self
            .last_input
            .as_ref()
            .ok_or(ModelError::MissingCache { layer: "relu" })?;
        if dz.shape() != last_input.shape() {
            return Err(ModelError::shape(
                "relu backward",
                format!("{:?}", last_input.shape()),
                dz.shape(),
            ));
        }
        let mut dz = dz;
        dz.zip_mut_with(last_input, |g, &x| {
            if x <= 0.0 {
                *g = 0.0;
            }
        });
        Ok(dz)
    }

    fn zero_grad(&mut self) {}
}

/// Row-wise softmax over (batch, classes).
#[derive(Debug, Clone, Default)]
pub struct Softmax {
    last_output: Option<Array2<f32>>,
}

impl Softmax {
    pub fn new() -> Softmax {
        Softmax::default()
    }

    fn softmax(input: ArrayD<f32>) -> Result<Array2<f32>, ModelError> {
        let shape = input.shape().to_vec();
        let mut out = input
            .into_dimensionality::<Ix2>()
            .map_err(|_| ModelError::shape("softmax", "(batch, classes)", &shape))?;
        for mut row in out.rows_mut() {
            // exp(x - max) for stability
            let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            row.mapv_inplace(|x| (x - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|x| x / sum);
        }
        Ok(out)
    }
}

impl Module for Softmax {
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        Ok(Softmax::softmax(input)?.into_dyn())
    }

    fn forward_train(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let out = Softmax::softmax(input)?;
        self.last_output = Some(out.clone());
        Ok(out.into_dyn())
    }

    /// Jacobian-vector product: dx_i = p_i * (g_i - sum_j g_j p_j)
    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let probs = self
            .last_output
            .as_ref()
            .ok_or(ModelError::MissingCache { layer: "softmax" })?;
        let shape = dz.shape().to_vec();
        let dz = dz
            .into_dimensionality::<Ix2>()
            .map_err(|_| ModelError::shape("softmax backward", "(batch, classes)", &shape))?;
        if dz.dim() != probs.dim() {
            return Err(ModelError::shape(
                "softmax backward",
                format!("{:?}", probs.shape()),
                &shape,
            ));
        }

        let weighted = (&dz * probs).sum_axis(Axis(1)).insert_axis(Axis(1));
        Ok((probs * &(dz - &weighted)).into_dyn())
    }

    fn zero_grad(&mut self) {}
}
