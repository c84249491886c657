use crate::error::ModelError;
use crate::layers::{variance_scaling, Param, ParamView};
use crate::model::Module;
use ndarray::prelude::*;
use rand::Rng;

/// Fully connected layer: z = a_prev . W + b
#[derive(Debug, Clone)]
pub struct Dense {
    input_size: usize,
    output_size: usize,
    /// (input_size, output_size)
    pub weights: Param<Ix2>,
    /// (output_size)
    pub bias: Param<Ix1>,
    /// (batch_size, input_size), the previous layer's activation
    last_input: Option<Array2<f32>>,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        rng: &mut R,
    ) -> Result<Dense, ModelError> {
        Ok(Dense {
            input_size,
            output_size,
            weights: Param::new(variance_scaling((input_size, output_size), input_size, rng)?),
            bias: Param::new(Array1::zeros(output_size)),
            last_input: None,
        })
    }

    fn check_input(&self, input: ArrayD<f32>) -> Result<Array2<f32>, ModelError> {
        let shape = input.shape().to_vec();
        let expected = || format!("(batch, {})", self.input_size);
        let input = input
            .into_dimensionality::<Ix2>()
            .map_err(|_| ModelError::shape("dense", expected(), &shape))?;
        if input.ncols() != self.input_size {
            return Err(ModelError::shape("dense", expected(), &shape));
        }
        Ok(input)
    }

    fn affine(&self, input: &Array2<f32>) -> Array2<f32> {
        // (batch_size, input_size) x (input_size, output_size) = (batch_size, output_size)
        input.dot(&self.weights.value) + &self.bias.value
    }
}

impl Module for Dense {
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let input = self.check_input(input)?;
        Ok(self.affine(&input).into_dyn())
    }

    fn forward_train(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let input = self.check_input(input)?;
        let out = self.affine(&input);
        self.last_input = Some(input);
        Ok(out.into_dyn())
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let last_input = self
            .last_input
            .as_ref()
            .ok_or(ModelError::MissingCache { layer: "dense" })?;
        let shape = dz.shape().to_vec();
        let dz = dz
            .into_dimensionality::<Ix2>()
            .map_err(|_| ModelError::shape("dense backward", "(batch, output_size)", &shape))?;
        if dz.dim() != (last_input.nrows(), self.output_size) {
            return Err(ModelError::shape(
                "dense backward",
                format!("({}, {})", last_input.nrows(), self.output_size),
                &shape,
            ));
        }

        // w: (batch_size, input_size)^T x (batch_size, output_size) = (input_size, output_size)
        self.weights.grad += &last_input.t().dot(&dz);
        self.bias.grad += &dz.sum_axis(Axis(0));

        // (batch_size, output_size) x (input_size, output_size)^T = (batch_size, input_size)
        Ok(dz.dot(&self.weights.value.t()).into_dyn())
    }

    fn zero_grad(&mut self) {
        self.weights.zero_grad();
        self.bias.zero_grad();
    }

    fn params(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.weights.view(), self.bias.view()]
    }

    fn params_mut(&mut self) -> Vec<ParamView<'_>> {
        vec![self.weights.view_mut(), self.bias.view_mut()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn gradients_of_a_sum_loss() {
        let mut dense = Dense::new(3, 2, &mut StdRng::seed_from_u64(1)).unwrap();
        let input = array![[1.0, 2.0, 3.0], [0.5, 0.0, -1.0f32]];
        let out = dense.forward_train(input.clone().into_dyn()).unwrap();
        assert_eq!(out.shape(), &[2, 2]);

        let dinput = dense.backward(ArrayD::ones(out.raw_dim())).unwrap();
        // dL/dW[i][j] = sum over the batch of x[i]
        assert_abs_diff_eq!(dense.weights.grad[[0, 1]], 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(dense.weights.grad[[2, 0]], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(dense.bias.grad[0], 2.0, epsilon = 1e-6);
        // dL/dx[i] = sum over outputs of W[i][j]
        let expected = dense.weights.value.sum_axis(Axis(1));
        assert_abs_diff_eq!(dinput[[1, 2]], expected[2], epsilon = 1e-6);
    }

    #[test]
    fn zero_grad_resets_accumulated_gradients() {
        let mut dense = Dense::new(2, 2, &mut StdRng::seed_from_u64(1)).unwrap();
        let out = dense.forward_train(array![[1.0, 1.0f32]].into_dyn()).unwrap();
        dense.backward(ArrayD::ones(out.raw_dim())).unwrap();
        assert!(dense.weights.grad.iter().any(|&g| g != 0.0));
        dense.zero_grad();
        assert!(dense.weights.grad.iter().all(|&g| g == 0.0));
        assert!(dense.bias.grad.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let dense = Dense::new(4, 2, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(dense.forward(Array2::<f32>::zeros((1, 3)).into_dyn()).is_err());
    }
}
