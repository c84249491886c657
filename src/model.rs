use crate::error::ModelError;
use crate::layers::{Conv2d, Dense, Flatten, Layer, MaxPool2d, ParamView, Relu, Softmax};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;
/// Side of the square input image.
pub const INPUT_SIZE: usize = 28;

pub trait Module {
    /// Inference pass. Nothing is cached, the layer is left untouched.
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError>;

    /// Same as `forward`, but keeps what `backward` needs.
    fn forward_train(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError>;

    /// Backward pass
    ///
    /// Receives dLoss/dz, where z is this layer's output from the last `forward_train`, and
    /// combines it with the local gradients using the chain rule. It should:
    /// - return dLoss/dx, shaped like the layer input
    /// - add dLoss/dw into the layer's own parameter gradients
    ///
    /// The dz/dx Jacobian is never materialized, each layer computes the product directly.
    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError>;

    fn zero_grad(&mut self);

    fn params(&self) -> Vec<ArrayViewD<'_, f32>> {
        Vec::new()
    }

    fn params_mut(&mut self) -> Vec<ParamView<'_>> {
        Vec::new()
    }
}

/// Sequential stack of layers.
#[derive(Debug, Clone, Default)]
pub struct NN {
    pub layers: Vec<Layer>,
}

impl Module for NN {
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        self.layers.iter().try_fold(input, |x, layer| layer.forward(x))
    }

    fn forward_train(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        self.layers
            .iter_mut()
            .try_fold(input, |x, layer| layer.forward_train(x))
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        // Iterate layers in reverse order, mutate each as we go
        self.layers
            .iter_mut()
            .rev()
            .try_fold(dz, |g, layer| layer.backward(g))
    }

    fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
    }

    fn params(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.layers.iter().flat_map(|l| l.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<ParamView<'_>> {
        self.layers.iter_mut().flat_map(|l| l.params_mut()).collect()
    }
}

/// The digit classifier.
///
/// conv 5x5x8 -> relu -> pool 2 -> conv 5x5x16 -> relu -> pool 2 -> flatten -> dense 10 -> softmax
///
/// Takes images as (batch, 28, 28, 1) and returns (batch, 10) class probabilities.
#[derive(Debug, Clone)]
pub struct Classifier {
    net: NN,
}

impl Classifier {
    /// Builds the network with fresh weights. `seed` makes the initialisation reproducible.
    pub fn new(seed: Option<u64>) -> Result<Classifier, ModelError> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // 28 -> 24 -> 12 -> 8 -> 4
        let layers = vec![
            Layer::Conv(Conv2d::new(1, 8, 5, &mut rng)?),
            Layer::Relu(Relu::new()),
            Layer::Pool(MaxPool2d::new(2)),
            Layer::Conv(Conv2d::new(8, 16, 5, &mut rng)?),
            Layer::Relu(Relu::new()),
            Layer::Pool(MaxPool2d::new(2)),
            Layer::Flatten(Flatten::new()),
            Layer::Dense(Dense::new(16 * 4 * 4, NUM_CLASSES, &mut rng)?),
            Layer::Softmax(Softmax::new()),
        ];
        Ok(Classifier {
            net: NN { layers },
        })
    }

    /// Class probabilities for a (batch, 28, 28, 1) batch. Rows sum to 1.
    pub fn predict(&self, images: ArrayView4<f32>) -> Result<Array2<f32>, ModelError> {
        let input = to_channels_first(images)?;
        into_probabilities(self.net.forward(input)?)
    }

    pub fn forward_train(&mut self, images: ArrayView4<f32>) -> Result<Array2<f32>, ModelError> {
        let input = to_channels_first(images)?;
        into_probabilities(self.net.forward_train(input)?)
    }

    /// Backpropagates dLoss/dprobabilities through the whole network.
    pub fn backward(&mut self, dprobs: Array2<f32>) -> Result<(), ModelError> {
        self.net.backward(dprobs.into_dyn())?;
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        self.net.zero_grad();
    }

    pub fn params(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.net.params()
    }

    pub fn params_mut(&mut self) -> Vec<ParamView<'_>> {
        self.net.params_mut()
    }

    pub fn num_params(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }
}

/// (batch, h, w, c) -> (batch, c, h, w), after checking the image shape.
fn to_channels_first(images: ArrayView4<f32>) -> Result<ArrayD<f32>, ModelError> {
    let (_, height, width, channels) = images.dim();
    if (height, width, channels) != (INPUT_SIZE, INPUT_SIZE, 1) {
        return Err(ModelError::shape(
            "classifier input",
            format!("(batch, {INPUT_SIZE}, {INPUT_SIZE}, 1)"),
            images.shape(),
        ));
    }
    debug!(batch = images.dim().0, "classifier input");
    Ok(images.permuted_axes([0, 3, 1, 2]).to_owned().into_dyn())
}

fn into_probabilities(out: ArrayD<f32>) -> Result<Array2<f32>, ModelError> {
    let shape = out.shape().to_vec();
    out.into_dimensionality::<Ix2>()
        .map_err(|_| ModelError::shape("classifier output", "(batch, 10)", &shape))
}

/// Index of the largest value. Ties go to the lowest index, an empty row gives 0.
pub fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Number of rows whose predicted class matches the one-hot label.
pub fn count_correct(probs: ArrayView2<f32>, labels: ArrayView2<f32>) -> usize {
    probs
        .outer_iter()
        .zip(labels.outer_iter())
        .filter(|(p, y)| argmax(p.view()) == argmax(y.view()))
        .count()
}
