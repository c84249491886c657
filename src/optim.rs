use crate::error::ModelError;
use crate::layers::ParamView;
use ndarray::prelude::*;
use ndarray::Zip;

/// Probabilities are clipped to [EPSILON, 1 - EPSILON] before taking the log.
const EPSILON: f32 = 1e-7;

/// Categorical cross-entropy, averaged over the batch.
///
/// `probs` and `labels` are both (batch_size, num_classes), labels one-hot.
/// Returns the mean loss and dLoss/dprobs.
pub fn categorical_cross_entropy(
    probs: ArrayView2<f32>,
    labels: ArrayView2<f32>,
) -> Result<(f32, Array2<f32>), ModelError> {
    if probs.dim() != labels.dim() || probs.nrows() == 0 {
        return Err(ModelError::shape(
            "cross entropy",
            format!("labels shaped like the predictions {:?}", probs.shape()),
            labels.shape(),
        ));
    }
    let batch_size = probs.nrows() as f32;
    let clipped = probs.mapv(|p| p.clamp(EPSILON, 1.0 - EPSILON));

    // -sum(y * log(p)) per example, then the batch mean
    let loss = -(&labels * &clipped.mapv(f32::ln)).sum() / batch_size;
    let grad = Zip::from(&labels)
        .and(&clipped)
        .map_collect(|&y, &p| -y / p / batch_size);

    Ok((loss, grad))
}

pub trait Optimizer {
    /// Run one optimization step.
    /// Note:
    /// - Assumes forward+backward pass have been done.
    /// - May mutate the optimizer internal state (e.g. moment estimates).
    /// - Parameters must come in the same order on every call.
    fn step(&mut self, params: Vec<ParamView<'_>>);
}

/// Adam, with the usual bias-corrected moment estimates.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Number of steps taken so far.
    t: i32,
    /// First and second moment estimates, one pair per parameter.
    moments: Vec<(ArrayD<f32>, ArrayD<f32>)>,
}

impl Default for Adam {
    fn default() -> Self {
        Adam::new(0.001)
    }
}

impl Adam {
    pub fn new(learning_rate: f32) -> Adam {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            moments: Vec::new(),
        }
    }

    pub fn steps(&self) -> i32 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: Vec<ParamView<'_>>) {
        self.t += 1;
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.epsilon);
        let bias1 = 1.0 - beta1.powi(self.t);
        let bias2 = 1.0 - beta2.powi(self.t);
        let lr = self.learning_rate;

        for (i, mut p) in params.into_iter().enumerate() {
            if self.moments.len() <= i {
                let zeros = ArrayD::zeros(p.value.raw_dim());
                self.moments.push((zeros.clone(), zeros));
            }
            let (m, v) = &mut self.moments[i];

            Zip::from(&mut p.value)
                .and(&p.grad)
                .and(m)
                .and(v)
                .for_each(|w, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *w -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Param;
    use approx::assert_abs_diff_eq;

    #[test]
    fn cross_entropy_of_a_confident_hit() {
        let probs = array![[0.9, 0.1], [0.5, 0.5]];
        let labels = array![[1.0, 0.0], [0.0, 1.0]];
        let (loss, grad) = categorical_cross_entropy(probs.view(), labels.view()).unwrap();
        let expected = -(0.9f32.ln() + 0.5f32.ln()) / 2.0;
        assert_abs_diff_eq!(loss, expected, epsilon = 1e-6);
        assert_abs_diff_eq!(grad[[0, 0]], -1.0 / 0.9 / 2.0, epsilon = 1e-6);
        assert_eq!(grad[[0, 1]], 0.0);
    }

    #[test]
    fn cross_entropy_stays_finite_on_zero_probabilities() {
        let probs = array![[0.0, 1.0]];
        let labels = array![[1.0, 0.0]];
        let (loss, grad) = categorical_cross_entropy(probs.view(), labels.view()).unwrap();
        assert!(loss.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn cross_entropy_rejects_mismatched_labels() {
        let probs = Array2::<f32>::zeros((2, 10));
        let labels = Array2::<f32>::zeros((3, 10));
        assert!(categorical_cross_entropy(probs.view(), labels.view()).is_err());
    }

    #[test]
    fn first_adam_step_moves_by_the_learning_rate() {
        let mut param = Param::new(array![1.0f32, -1.0, 0.5]);
        param.grad = array![0.5, -2.0, 0.0];
        let mut adam = Adam::new(0.1);
        adam.step(vec![param.view_mut()]);

        // m_hat = g and v_hat = g^2 after one step, so the update is lr * sign(g)
        assert_abs_diff_eq!(param.value[0], 0.9, epsilon = 1e-5);
        assert_abs_diff_eq!(param.value[1], -0.9, epsilon = 1e-5);
        assert_abs_diff_eq!(param.value[2], 0.5, epsilon = 1e-6);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn adam_minimizes_a_quadratic() {
        // f(w) = (w - 3)^2
        let mut param = Param::new(array![0.0f32]);
        let mut adam = Adam::new(0.1);
        for _ in 0..500 {
            param.grad = param.value.mapv(|w| 2.0 * (w - 3.0));
            adam.step(vec![param.view_mut()]);
        }
        assert_abs_diff_eq!(param.value[0], 3.0, epsilon = 0.05);
    }
}
