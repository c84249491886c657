use ndarray::Array2;
use rsdigit::analyze::analyze;
use rsdigit::app::{App, Command, Response};
use rsdigit::config::{DataVolume, TrainingConfig};
use rsdigit::data::{one_hot, InMemorySource, IMAGE_PIXELS};
use rsdigit::extract::{extract, GRID_SIZE};
use rsdigit::freehand::StrokeOptions;
use rsdigit::model::Classifier;
use rsdigit::sketchpad::{FrameLoop, Sketchpad};
use rsdigit::stroke::PointerEvent;

/// A pointer session drawing a "1": press, a vertical drag, release.
fn one_stroke() -> Vec<PointerEvent> {
    let mut events = vec![PointerEvent::Down { x: 100.0, y: 30.0 }];
    events.extend((0..=28).map(|i| PointerEvent::Move {
        x: 100.0,
        y: 30.0 + i as f32 * 5.0,
    }));
    events.push(PointerEvent::Up);
    events
}

#[test]
fn replayed_stroke_reaches_the_tensor() {
    let mut pad = Sketchpad::new(StrokeOptions::default());
    let mut frames = FrameLoop::new();
    let events = one_stroke();
    frames.replay(&mut pad, &events);
    assert_eq!(frames.frames(), events.len() as u64 + 1);
    assert!(pad.surface().painted_pixels() > 0);
    // The path is gone after release, the pixels stay.
    assert!(pad.recorder().path().is_empty());

    let tensor = extract(pad.surface()).unwrap();
    let view = tensor.view();
    assert_eq!(view.dim(), (GRID_SIZE, GRID_SIZE, 1));
    // Column 14 samples source x = 100, right on the stroke.
    assert_eq!(view[[14, 14, 0]], 1.0);
    // Far corners stay blank.
    assert_eq!(view[[0, 0, 0]], 0.0);
    assert_eq!(view[[27, 27, 0]], 0.0);
    assert!(view.iter().all(|&v| (0.0..=1.0).contains(&v)));

    // Extraction does not touch the surface.
    assert_eq!(extract(pad.surface()).unwrap(), tensor);
}

#[test]
fn moves_without_a_press_draw_nothing() {
    let mut pad = Sketchpad::new(StrokeOptions::default());
    let events: Vec<PointerEvent> = one_stroke()
        .into_iter()
        .filter(|e| !matches!(e, PointerEvent::Down { .. }))
        .collect();
    FrameLoop::new().replay(&mut pad, &events);
    assert_eq!(pad.surface().painted_pixels(), 0);
    assert!(extract(pad.surface()).unwrap().view().iter().all(|&v| v == 0.0));
}

#[test]
fn untrained_model_still_names_a_digit() {
    let mut pad = Sketchpad::new(StrokeOptions::default());
    FrameLoop::new().replay(&mut pad, &one_stroke());
    let model = Classifier::new(Some(8)).unwrap();
    let digit = analyze(pad.surface(), &model).unwrap();
    assert!(digit <= 9);
}

#[test]
fn train_then_analyze_through_the_app() {
    let volume = DataVolume { train: 24, test: 8 };
    let config = TrainingConfig {
        epochs: 2,
        batch_size: 8,
        seed: Some(4),
        small: volume,
        large: volume,
        ..TrainingConfig::default()
    };
    let images = Array2::from_shape_fn((12, IMAGE_PIXELS), |(i, p)| {
        if i % 2 == 0 && p % 28 == 14 {
            1.0
        } else {
            0.0
        }
    });
    let labels = one_hot(&(0..12).map(|i| if i % 2 == 0 { 1 } else { 0 }).collect::<Vec<_>>()).unwrap();
    let data = InMemorySource::new(images.clone(), labels.clone(), images, labels, 3).unwrap();

    let mut app = App::new(Box::new(data), config, StrokeOptions::default()).unwrap();
    FrameLoop::new().replay(app.sketchpad_mut(), &one_stroke());

    let Response::Trained(report) = app.dispatch(Command::TrainSmall).unwrap() else {
        panic!("training did not report");
    };
    assert_eq!(report.epochs.len(), 2);
    assert!(report.epochs.iter().all(|e| e.loss.is_finite()));

    let answer = app.dispatch(Command::Analyze).unwrap();
    assert!(answer.to_string().starts_with("You drew a "));
}
