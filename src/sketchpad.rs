//! Ties pointer input to the drawing surface.
//!
//! Pointer events only touch the recorder. Painting happens in [`Sketchpad::tick`], which
//! the host calls once per frame; it reads whatever path the recorder holds at that moment
//! and fills its outline. Input sampling rate and render rate are independent.

use crate::freehand::{stroke_outline, StrokeOptions};
use crate::stroke::{PointerEvent, StrokeRecorder};
use crate::surface::{DrawTarget, DrawingSurface, PixelSource, FOREGROUND};
use tracing::trace;

/// The host's frame presentation mechanism.
pub trait FrameClock {
    /// Asks for another callback on the next frame. Must not block.
    fn request_frame(&mut self);
}

/// Recorder and surface for one drawing session.
#[derive(Debug, Clone, Default)]
pub struct Sketchpad<S = DrawingSurface> {
    recorder: StrokeRecorder,
    surface: S,
    options: StrokeOptions,
}

impl Sketchpad<DrawingSurface> {
    pub fn new(options: StrokeOptions) -> Self {
        Sketchpad::with_surface(DrawingSurface::new(), options)
    }
}

impl<S: PixelSource + DrawTarget> Sketchpad<S> {
    pub fn with_surface(surface: S, options: StrokeOptions) -> Self {
        Sketchpad {
            recorder: StrokeRecorder::new(),
            surface,
            options,
        }
    }

    pub fn handle(&mut self, event: PointerEvent) {
        self.recorder.handle(event);
    }

    /// One frame: repaint the current stroke, then ask for the next frame.
    pub fn tick(&mut self, clock: &mut impl FrameClock) {
        self.render();
        clock.request_frame();
    }

    /// Fills the outline of the current path. Returns the number of outline points.
    pub fn render(&mut self) -> usize {
        let outline = stroke_outline(self.recorder.path(), &self.options);
        if !outline.is_empty() {
            trace!(points = outline.len(), "filling stroke outline");
            self.surface.fill_polygon(&outline, FOREGROUND);
        }
        outline.len()
    }

    pub fn clear(&mut self) {
        self.surface.clear();
    }

    pub fn recorder(&self) -> &StrokeRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut StrokeRecorder {
        &mut self.recorder
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

/// Frame clock for hosts without a display.
///
/// Frames are requested by [`Sketchpad::tick`] and delivered by [`FrameLoop::replay`],
/// which interleaves one frame after every pointer event.
#[derive(Debug, Default)]
pub struct FrameLoop {
    pending: bool,
    frames: u64,
}

impl FrameClock for FrameLoop {
    fn request_frame(&mut self) {
        self.pending = true;
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        FrameLoop::default()
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Runs the pending frame, if any.
    pub fn run_frame<S: PixelSource + DrawTarget>(&mut self, pad: &mut Sketchpad<S>) -> bool {
        if !std::mem::take(&mut self.pending) {
            return false;
        }
        self.frames += 1;
        pad.tick(self);
        true
    }

    /// Feeds `events` to `pad`, rendering a frame after each one.
    pub fn replay<S: PixelSource + DrawTarget>(
        &mut self,
        pad: &mut Sketchpad<S>,
        events: &[PointerEvent],
    ) {
        if self.frames == 0 {
            self.request_frame();
        }
        self.run_frame(pad);
        for &event in events {
            pad.handle(event);
            self.run_frame(pad);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::Point;

    fn moves(points: &[(f32, f32)]) -> Vec<PointerEvent> {
        points
            .iter()
            .map(|&(x, y)| PointerEvent::Move { x, y })
            .collect()
    }

    #[test]
    fn short_paths_paint_nothing() {
        let mut pad = Sketchpad::new(StrokeOptions::default());
        assert_eq!(pad.render(), 0);

        pad.recorder_mut().begin();
        pad.recorder_mut().extend(Point::new(50.0, 50.0));
        assert_eq!(pad.render(), 0);
        assert_eq!(pad.surface().painted_pixels(), 0);
    }

    #[test]
    fn begin_end_without_points_paints_nothing() {
        let mut pad = Sketchpad::new(StrokeOptions::default());
        pad.recorder_mut().begin();
        pad.render();
        pad.recorder_mut().end();
        pad.render();
        assert!(pad.recorder().path().is_empty());
        assert_eq!(pad.surface().painted_pixels(), 0);
    }

    #[test]
    fn corner_path_marks_pixels_along_the_path() {
        let mut pad = Sketchpad::new(StrokeOptions::default());
        pad.recorder_mut().begin();
        for (x, y) in [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)] {
            pad.recorder_mut().extend(Point::new(x, y));
        }
        assert!(pad.render() > 0);
        assert!(pad.surface().painted_pixels() > 0);
        assert_eq!(pad.surface().pixel(2, 2).0[3], 255);
    }

    #[test]
    fn strokes_persist_after_release_until_cleared() {
        let mut pad = Sketchpad::new(StrokeOptions::default());
        let mut frames = FrameLoop::new();
        let mut events = vec![PointerEvent::Down { x: 40.0, y: 40.0 }];
        events.extend(moves(&[(40.0, 40.0), (80.0, 60.0), (120.0, 100.0), (140.0, 150.0)]));
        events.push(PointerEvent::Up);

        frames.replay(&mut pad, &events);
        assert_eq!(frames.frames(), events.len() as u64 + 1);
        assert!(pad.recorder().path().is_empty());
        let painted = pad.surface().painted_pixels();
        assert!(painted > 0);

        // More frames without input change nothing.
        frames.replay(&mut pad, &[]);
        assert_eq!(pad.surface().painted_pixels(), painted);

        pad.clear();
        assert_eq!(pad.surface().painted_pixels(), 0);
    }

    #[test]
    fn redrawing_the_same_path_is_idempotent() {
        let mut pad = Sketchpad::new(StrokeOptions::default());
        pad.recorder_mut().begin();
        for (x, y) in [(20.0, 20.0), (60.0, 30.0), (90.0, 90.0)] {
            pad.recorder_mut().extend(Point::new(x, y));
        }
        pad.render();
        let once = pad.surface().as_image().clone();
        pad.render();
        assert_eq!(&once, pad.surface().as_image());
    }
}
