pub use crate::layers::activations::{Relu, Softmax};
pub use crate::layers::conv::{Conv2d, Flatten, MaxPool2d};
pub use crate::layers::fc::Dense;
pub use crate::model::Module;

use crate::error::ModelError;
use ndarray::prelude::*;
use ndarray::ShapeBuilder;
use ndarray_rand::rand_distr::{Distribution, Normal};
use ndarray_rand::RandomExt;
use rand::Rng;

pub mod activations;
pub mod conv;
pub mod fc;

#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    Conv(Conv2d),
    Pool(MaxPool2d),
    Relu(Relu),
    Softmax(Softmax),
    Flatten(Flatten),
}

impl Module for Layer {
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        match self {
            Layer::Dense(l) => l.forward(input),
            Layer::Conv(l) => l.forward(input),
            Layer::Pool(l) => l.forward(input),
            Layer::Relu(l) => l.forward(input),
            Layer::Softmax(l) => l.forward(input),
            Layer::Flatten(l) => l.forward(input),
        }
    }

    fn forward_train(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        match self {
            Layer::Dense(l) => l.forward_train(input),
            Layer::Conv(l) => l.forward_train(input),
            Layer::Pool(l) => l.forward_train(input),
            Layer::Relu(l) => l.forward_train(input),
            Layer::Softmax(l) => l.forward_train(input),
            Layer::Flatten(l) => l.forward_train(input),
        }
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        match self {
            Layer::Dense(l) => l.backward(dz),
            Layer::Conv(l) => l.backward(dz),
            Layer::Pool(l) => l.backward(dz),
            Layer::Relu(l) => l.backward(dz),
            Layer::Softmax(l) => l.backward(dz),
            Layer::Flatten(l) => l.backward(dz),
        }
    }

    fn zero_grad(&mut self) {
        match self {
            Layer::Dense(l) => l.zero_grad(),
            Layer::Conv(l) => l.zero_grad(),
            _ => (), // no weights
        }
    }

    fn params(&self) -> Vec<ArrayViewD<'_, f32>> {
        match self {
            Layer::Dense(l) => l.params(),
            Layer::Conv(l) => l.params(),
            _ => Vec::new(),
        }
    }

    fn params_mut(&mut self) -> Vec<ParamView<'_>> {
        match self {
            Layer::Dense(l) => l.params_mut(),
            Layer::Conv(l) => l.params_mut(),
            _ => Vec::new(),
        }
    }
}

/// A trainable tensor and its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Param<D: Dimension> {
    pub value: Array<f32, D>,
    pub grad: Array<f32, D>,
}

impl<D: Dimension> Param<D> {
    pub fn new(value: Array<f32, D>) -> Self {
        let grad = Array::zeros(value.raw_dim());
        Param { value, grad }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        self.value.view().into_dyn()
    }

    pub fn view_mut(&mut self) -> ParamView<'_> {
        ParamView {
            value: self.value.view_mut().into_dyn(),
            grad: self.grad.view().into_dyn(),
        }
    }
}

/// What an optimizer needs to update one parameter in place.
pub struct ParamView<'a> {
    pub value: ArrayViewMutD<'a, f32>,
    pub grad: ArrayViewD<'a, f32>,
}

/// Normal distribution with samples beyond two standard deviations redrawn.
#[derive(Debug, Clone, Copy)]
pub struct TruncatedNormal {
    normal: Normal<f32>,
    bound: f32,
}

impl TruncatedNormal {
    pub fn new(std_dev: f32) -> Result<Self, ModelError> {
        let normal = Normal::new(0.0, std_dev).map_err(|e| ModelError::Init {
            message: e.to_string(),
        })?;
        Ok(TruncatedNormal {
            normal,
            bound: 2.0 * std_dev,
        })
    }
}

impl Distribution<f32> for TruncatedNormal {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        loop {
            let v = self.normal.sample(rng);
            if v.abs() <= self.bound {
                return v;
            }
        }
    }
}

/// Variance scaling initialisation (scale 1, fan-in mode, truncated normal).
pub fn variance_scaling<Sh, D, R>(
    shape: Sh,
    fan_in: usize,
    rng: &mut R,
) -> Result<Array<f32, D>, ModelError>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    if fan_in == 0 {
        return Err(ModelError::Init {
            message: "fan-in must be positive".to_string(),
        });
    }
    let std_dev = (1.0 / fan_in as f32).sqrt();
    Ok(Array::random_using(shape, TruncatedNormal::new(std_dev)?, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn variance_scaling_stays_within_two_std_devs() {
        let mut rng = StdRng::seed_from_u64(7);
        let w: Array2<f32> = variance_scaling((64, 25), 25, &mut rng).unwrap();
        let bound = 2.0 * (1.0f32 / 25.0).sqrt();
        assert!(w.iter().all(|v| v.abs() <= bound));
        assert!(w.iter().any(|&v| v != 0.0));

        let mean = w.mean().unwrap();
        assert!(mean.abs() < 0.05, "mean {mean}");
    }

    #[test]
    fn zero_fan_in_is_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(variance_scaling::<_, Ix2, _>((2, 2), 0, &mut rng).is_err());
    }
}
