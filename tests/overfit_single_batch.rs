use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{distributions::Uniform, Rng, SeedableRng};
use rsdigit::data::one_hot;
use rsdigit::model::Classifier;
use rsdigit::optim::{categorical_cross_entropy, Adam, Optimizer};

/// Generate a batch of 28x28 images in three easily told apart classes:
/// a horizontal bar, a vertical bar and a centred square, plus some noise.
fn gen_test_batch(batch_size: usize, rng: &mut StdRng) -> (Array4<f32>, Vec<usize>) {
    let noise = Uniform::new(0.0, 0.2);
    let labels: Vec<usize> = (0..batch_size).map(|i| i % 3).collect();
    let mut images = Array4::<f32>::zeros((batch_size, 28, 28, 1));
    for (mut image, &label) in images.outer_iter_mut().zip(&labels) {
        for ((y, x, _), v) in image.indexed_iter_mut() {
            let on = match label {
                0 => (12..16).contains(&y) && (4..24).contains(&x),
                1 => (4..24).contains(&y) && (12..16).contains(&x),
                _ => (9..19).contains(&y) && (9..19).contains(&x),
            };
            *v = if on { 1.0 } else { rng.sample(noise) };
        }
    }
    (images, labels)
}

#[test]
/// Test that Adam can train the digit classifier to overfit a small batch.
fn test_adam_can_overfit_single_batch() -> Result<(), Box<dyn std::error::Error>> {
    const MAX_RETRIES: u64 = 3;
    const OVERFITTED_LOSS_VALUE: f32 = 0.1;
    const MAX_OPTIM_STEPS: usize = 300;
    let mut last_error = String::new();

    for attempt in 1..=MAX_RETRIES {
        let mut rng = StdRng::seed_from_u64(attempt);
        let mut model = Classifier::new(Some(attempt))?;
        let mut optimizer = Adam::new(0.01);

        let (images, labels) = gen_test_batch(12, &mut rng);
        let labels = one_hot(&labels)?;

        let mut avg_loss = f32::MAX;
        for optim_step in 1..=MAX_OPTIM_STEPS {
            model.zero_grad();
            let probs = model.forward_train(images.view())?;
            let (loss, dprobs) = categorical_cross_entropy(probs.view(), labels.view())?;
            avg_loss = loss;
            if avg_loss < OVERFITTED_LOSS_VALUE {
                println!("Reached loss<{OVERFITTED_LOSS_VALUE} in attempt {attempt} with {optim_step} optimisation steps");
                return Ok(());
            }
            if optim_step % 50 == 0 {
                println!("step {optim_step}, loss {avg_loss}");
            }

            model.backward(dprobs)?;
            optimizer.step(model.params_mut());
        }
        last_error = format!("Attempt {attempt} failed: Final loss was {avg_loss}");
        println!("{}", last_error);
    }
    Err(format!(
        "Failed to overfit after {MAX_RETRIES} attempts. Last error: {last_error}"
    ))?
}
