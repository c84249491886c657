use crate::error::ModelError;
use crate::layers::{variance_scaling, Param, ParamView};
use crate::model::Module;
use ndarray::prelude::*;
use ndarray::Zip;
use rand::Rng;
use tracing::trace;

/// 2D convolution, no padding, stride 1.
///
/// Works on (batch, channels, height, width) tensors.
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    /// img2col layout: (out_channels, in_channels * k^2)
    pub kernels: Param<Ix2>,
    /// One bias per output channel.
    pub bias: Param<Ix1>,
    cache: Option<ConvCache>,
}

#[derive(Debug, Clone)]
struct ConvCache {
    /// (batch, locations, in_channels * k^2)
    patches: Array3<f32>,
    in_height: usize,
    in_width: usize,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        rng: &mut R,
    ) -> Result<Conv2d, ModelError> {
        let fan_in = in_channels * kernel_size * kernel_size;
        Ok(Conv2d {
            in_channels,
            out_channels,
            kernel_size,
            kernels: Param::new(variance_scaling((out_channels, fan_in), fan_in, rng)?),
            bias: Param::new(Array1::zeros(out_channels)),
            cache: None,
        })
    }

    fn check_input(&self, input: ArrayD<f32>) -> Result<Array4<f32>, ModelError> {
        let shape = input.shape().to_vec();
        let expected = || format!("(batch, {}, h >= {k}, w >= {k})", self.in_channels, k = self.kernel_size);
        let input = input
            .into_dimensionality::<Ix4>()
            .map_err(|_| ModelError::shape("conv2d", expected(), &shape))?;
        let (_, channels, height, width) = input.dim();
        if channels != self.in_channels || height < self.kernel_size || width < self.kernel_size {
            return Err(ModelError::shape("conv2d", expected(), &shape));
        }
        Ok(input)
    }

    /// The img2col convolution.
    ///
    /// Each input location the kernel can sit on becomes one row of a patches matrix
    /// (locations, in_channels * k^2). The convolution is then a single matmul per
    /// example: kernels (out_channels, in_channels * k^2) x patches^T gives
    /// (out_channels, locations), which is laid back out as feature maps.
    ///
    /// Returns the output (batch, out_channels, h-k+1, w-k+1) and the patches.
    fn convolve(&self, input: &Array4<f32>) -> (Array4<f32>, Array3<f32>) {
        let (batch_size, in_channels, height, width) = input.dim();
        let k = self.kernel_size;
        let (out_height, out_width) = (height - k + 1, width - k + 1);
        let nb_locations = out_height * out_width;

        let mut out = Array4::zeros((batch_size, self.out_channels, out_height, out_width));
        let mut patches = Array3::zeros((batch_size, nb_locations, in_channels * k * k));
        let kernels = &self.kernels.value;
        let bias = &self.bias.value;

        Zip::from(out.outer_iter_mut())
            .and(patches.outer_iter_mut())
            .and(input.outer_iter())
            .par_for_each(|mut feature_maps, mut patches_mat, example| {
                // Windows come in row-major location order, each flattened as (c, ky, kx).
                let windows = example.windows((in_channels, k, k));
                for (mut row, window) in patches_mat.rows_mut().into_iter().zip(windows) {
                    row.iter_mut().zip(window.iter()).for_each(|(r, &v)| *r = v);
                }

                let flat = kernels.dot(&patches_mat.t());
                for ((channel, location), &v) in flat.indexed_iter() {
                    feature_maps[[channel, location / out_width, location % out_width]] =
                        v + bias[channel];
                }
            });

        (out, patches)
    }
}

impl Module for Conv2d {
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let input = self.check_input(input)?;
        Ok(self.convolve(&input).0.into_dyn())
    }

    fn forward_train(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let input = self.check_input(input)?;
        trace!(shape = ?input.shape(), "conv2d forward");
        let (_, _, in_height, in_width) = input.dim();
        let (out, patches) = self.convolve(&input);
        self.cache = Some(ConvCache {
            patches,
            in_height,
            in_width,
        });
        Ok(out.into_dyn())
    }

    /// With img2col the forward is out = kernels . patches^T, per example. So:
    /// - dL/dkernels = dz . patches, summed over the batch
    /// - dL/dbias = dz summed over locations and batch
    /// - dL/dpatches = kernels^T . dz, then every patch column is scattered back (+=) onto
    ///   the k x k input window it was read from.
    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(ModelError::MissingCache { layer: "conv2d" })?;
        let (batch_size, nb_locations, patch_len) = cache.patches.dim();
        let k = self.kernel_size;
        let (in_height, in_width) = (cache.in_height, cache.in_width);
        let (out_height, out_width) = (in_height - k + 1, in_width - k + 1);

        let expected = [batch_size, self.out_channels, out_height, out_width];
        if dz.shape() != expected {
            return Err(ModelError::shape("conv2d backward", format!("{expected:?}"), dz.shape()));
        }
        let dz: Array3<f32> = dz
            .to_shape((batch_size, self.out_channels, nb_locations))
            .map_err(|source| ModelError::Reshape {
                layer: "conv2d backward",
                source,
            })?
            .into_owned();

        let mut dkernels = Array2::<f32>::zeros((self.out_channels, patch_len));
        for (dz_example, patches) in dz.outer_iter().zip(cache.patches.outer_iter()) {
            dkernels += &dz_example.dot(&patches);
        }
        self.kernels.grad += &dkernels;
        self.bias.grad += &dz.sum_axis(Axis(2)).sum_axis(Axis(0));

        let kernels = &self.kernels.value;
        let in_channels = self.in_channels;
        let mut dinput = Array4::<f32>::zeros((batch_size, in_channels, in_height, in_width));
        Zip::from(dinput.outer_iter_mut())
            .and(dz.outer_iter())
            .par_for_each(|mut dinput_example, dz_example| {
                // (in_channels * k^2, locations)
                let dpatches = kernels.t().dot(&dz_example);
                for (location, column) in dpatches.columns().into_iter().enumerate() {
                    let (top_y, top_x) = (location / out_width, location % out_width);
                    for (i, &g) in column.iter().enumerate() {
                        let channel = i / (k * k);
                        let offset = i % (k * k);
                        dinput_example[[channel, top_y + offset / k, top_x + offset % k]] += g;
                    }
                }
            });

        Ok(dinput.into_dyn())
    }

    fn zero_grad(&mut self) {
        self.kernels.zero_grad();
        self.bias.zero_grad();
    }

    fn params(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.kernels.view(), self.bias.view()]
    }

    fn params_mut(&mut self) -> Vec<ParamView<'_>> {
        vec![self.kernels.view_mut(), self.bias.view_mut()]
    }
}

/// Max pooling with a square window and a stride equal to the window.
///
/// Trailing rows/columns that do not fill a window are dropped.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    pool_size: usize,
    cache: Option<PoolCache>,
}

#[derive(Debug, Clone)]
struct PoolCache {
    /// Flat (y * width + x) input index of each window's maximum.
    argmax: Array4<usize>,
    in_height: usize,
    in_width: usize,
}

impl MaxPool2d {
    pub fn new(pool_size: usize) -> MaxPool2d {
        MaxPool2d {
            pool_size,
            cache: None,
        }
    }

    fn check_input(&self, input: ArrayD<f32>) -> Result<Array4<f32>, ModelError> {
        let shape = input.shape().to_vec();
        let expected = || format!("(batch, channels, h >= {k}, w >= {k})", k = self.pool_size);
        let input = input
            .into_dimensionality::<Ix4>()
            .map_err(|_| ModelError::shape("max_pool2d", expected(), &shape))?;
        let (_, _, height, width) = input.dim();
        if self.pool_size == 0 || height < self.pool_size || width < self.pool_size {
            return Err(ModelError::shape("max_pool2d", expected(), &shape));
        }
        Ok(input)
    }

    fn pool(&self, input: &Array4<f32>) -> (Array4<f32>, Array4<usize>) {
        let (batch_size, channels, height, width) = input.dim();
        let k = self.pool_size;
        let out_dim = (batch_size, channels, height / k, width / k);
        let mut out = Array4::<f32>::zeros(out_dim);
        let mut argmax = Array4::<usize>::zeros(out_dim);

        Zip::indexed(&mut out)
            .and(&mut argmax)
            .for_each(|(b, c, oy, ox), max, idx| {
                let mut best = f32::NEG_INFINITY;
                let mut best_idx = oy * k * width + ox * k;
                for y in oy * k..(oy + 1) * k {
                    for x in ox * k..(ox + 1) * k {
                        let v = input[[b, c, y, x]];
                        // First maximum wins, so ties route the gradient to one input only.
                        // A NaN wins over any number.
                        if v > best || (v.is_nan() && !best.is_nan()) {
                            best = v;
                            best_idx = y * width + x;
                        }
                    }
                }
                *max = best;
                *idx = best_idx;
            });

        (out, argmax)
    }
}

impl Module for MaxPool2d {
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let input = self.check_input(input)?;
        Ok(self.pool(&input).0.into_dyn())
    }

    fn forward_train(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let input = self.check_input(input)?;
        let (_, _, in_height, in_width) = input.dim();
        let (out, argmax) = self.pool(&input);
        self.cache = Some(PoolCache {
            argmax,
            in_height,
            in_width,
        });
        Ok(out.into_dyn())
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(ModelError::MissingCache { layer: "max_pool2d" })?;
        if dz.shape() != cache.argmax.shape() {
            return Err(ModelError::shape(
                "max_pool2d backward",
                format!("{:?}", cache.argmax.shape()),
                dz.shape(),
            ));
        }
        let (batch_size, channels, _, _) = cache.argmax.dim();
        let width = cache.in_width;
        let mut dinput = Array4::<f32>::zeros((batch_size, channels, cache.in_height, width));

        for ((b, c, oy, ox), &idx) in cache.argmax.indexed_iter() {
            dinput[[b, c, idx / width, idx % width]] += dz[[b, c, oy, ox]];
        }

        Ok(dinput.into_dyn())
    }

    fn zero_grad(&mut self) {}
}

/// (batch, ...) -> (batch, features)
#[derive(Debug, Clone, Default)]
pub struct Flatten {
    input_shape: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Flatten {
        Flatten::default()
    }
}

impl Module for Flatten {
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let Some(&batch_size) = input.shape().first() else {
            return Err(ModelError::shape("flatten", "(batch, ...)", input.shape()));
        };
        let features = input.shape()[1..].iter().product::<usize>();
        Ok(input
            .to_shape((batch_size, features))
            .map_err(|source| ModelError::Reshape {
                layer: "flatten",
                source,
            })?
            .into_owned()
            .into_dyn())
    }

    fn forward_train(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        self.input_shape = Some(input.shape().to_vec());
        self.forward(input)
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>, ModelError> {
        let shape = self
            .input_shape
            .as_ref()
            .ok_or(ModelError::MissingCache { layer: "flatten" })?;
        Ok(dz
            .to_shape(shape.as_slice())
            .map_err(|source| ModelError::Reshape {
                layer: "flatten backward",
                source,
            })?
            .into_owned())
    }

    fn zero_grad(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn conv(in_channels: usize, out_channels: usize, k: usize) -> Conv2d {
        Conv2d::new(in_channels, out_channels, k, &mut StdRng::seed_from_u64(3)).unwrap()
    }

    /// Direct (non img2col) convolution for comparison.
    fn naive_conv(layer: &Conv2d, input: &Array4<f32>) -> Array4<f32> {
        let (b, c, h, w) = input.dim();
        let k = layer.kernel_size;
        let kernels = layer
            .kernels
            .value
            .to_shape((layer.out_channels, c, k, k))
            .unwrap()
            .into_owned();
        Array4::from_shape_fn((b, layer.out_channels, h - k + 1, w - k + 1), |(n, o, y, x)| {
            let mut acc = layer.bias.value[o];
            for ci in 0..c {
                for ky in 0..k {
                    for kx in 0..k {
                        acc += kernels[[o, ci, ky, kx]] * input[[n, ci, y + ky, x + kx]];
                    }
                }
            }
            acc
        })
    }

    #[test]
    fn img2col_matches_direct_convolution() {
        let mut layer = conv(2, 3, 3);
        layer.bias.value = array![0.1, -0.2, 0.3];
        let input = Array4::from_shape_fn((2, 2, 6, 5), |(n, c, y, x)| {
            ((n * 7 + c * 5 + y * 3 + x) % 11) as f32 / 11.0 - 0.5
        });
        let out = layer.forward(input.clone().into_dyn()).unwrap();
        assert_eq!(out.shape(), &[2, 3, 4, 3]);
        let expected = naive_conv(&layer, &input);
        for (a, b) in out.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn conv_rejects_wrong_channel_count() {
        let layer = conv(1, 4, 5);
        let err = layer.forward(Array4::<f32>::zeros((1, 3, 28, 28)).into_dyn());
        assert!(matches!(err, Err(ModelError::Shape { layer: "conv2d", .. })));
    }

    #[test]
    fn conv_backward_needs_a_training_forward() {
        let mut layer = conv(1, 2, 3);
        let err = layer.backward(Array4::<f32>::zeros((1, 2, 2, 2)).into_dyn());
        assert!(matches!(err, Err(ModelError::MissingCache { .. })));
    }

    #[test]
    fn conv_gradients_match_finite_differences() {
        let mut layer = conv(1, 2, 3);
        let input = Array4::from_shape_fn((1, 1, 5, 5), |(_, _, y, x)| (y * 5 + x) as f32 / 25.0);
        // Loss = sum of outputs, so dz is all ones.
        let out = layer.forward_train(input.clone().into_dyn()).unwrap();
        let dinput = layer.backward(ArrayD::ones(out.raw_dim())).unwrap();

        let eps = 1e-2;
        let loss = |layer: &Conv2d, input: &Array4<f32>| {
            layer.forward(input.clone().into_dyn()).unwrap().sum()
        };

        let mut bumped = layer.clone();
        bumped.kernels.value[[1, 4]] += eps;
        let numeric = (loss(&bumped, &input) - loss(&layer, &input)) / eps;
        assert_abs_diff_eq!(layer.kernels.grad[[1, 4]], numeric, epsilon = 1e-2);

        let mut bumped_input = input.clone();
        bumped_input[[0, 0, 2, 2]] += eps;
        let numeric = (loss(&layer, &bumped_input) - loss(&layer, &input)) / eps;
        assert_abs_diff_eq!(dinput[[0, 0, 2, 2]], numeric, epsilon = 1e-2);

        // Every output location sees the bias once.
        assert_abs_diff_eq!(layer.bias.grad[0], 9.0, epsilon = 1e-5);
    }

    #[test]
    fn max_pool_picks_window_maxima() {
        let mut pool = MaxPool2d::new(2);
        let input = array![[[
            [1.0, 2.0, 0.0, 0.0],
            [3.0, 4.0, 0.0, 5.0],
            [-1.0, -2.0, 7.0, 7.0],
            [-3.0, -4.0, 7.0, 7.0f32]
        ]]];
        let out = pool.forward_train(input.into_dyn()).unwrap();
        assert_eq!(out, array![[[[4.0, 5.0], [-1.0, 7.0f32]]]].into_dyn());

        let dinput = pool.backward(ArrayD::ones(out.raw_dim())).unwrap();
        // Ties send the gradient to the first maximum only.
        assert_eq!(dinput.sum(), 4.0);
        assert_eq!(dinput[[0, 0, 1, 1]], 1.0);
        assert_eq!(dinput[[0, 0, 2, 2]], 1.0);
        assert_eq!(dinput[[0, 0, 3, 3]], 0.0);
    }

    #[test]
    fn max_pool_keeps_nan() {
        let pool = MaxPool2d::new(2);
        let input = array![[[[1.0, 2.0], [f32::NAN, 3.0f32]]]];
        let out = pool.forward(input.into_dyn()).unwrap();
        assert!(out[[0, 0, 0, 0]].is_nan());
    }

    #[test]
    fn max_pool_drops_incomplete_windows() {
        let pool = MaxPool2d::new(2);
        let out = pool.forward(Array4::<f32>::ones((1, 1, 5, 5)).into_dyn()).unwrap();
        assert_eq!(out.shape(), &[1, 1, 2, 2]);
    }

    #[test]
    fn flatten_round_trips_gradients() {
        let mut flatten = Flatten::new();
        let input = Array4::<f32>::ones((2, 3, 4, 4)).into_dyn();
        let out = flatten.forward_train(input).unwrap();
        assert_eq!(out.shape(), &[2, 48]);
        let back = flatten.backward(out).unwrap();
        assert_eq!(back.shape(), &[2, 3, 4, 4]);
    }
}
