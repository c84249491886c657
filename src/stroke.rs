use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// A coordinate in drawing-surface space, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Point {
        Point { x, y }
    }

    pub fn dot(self, other: Point) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn len(self) -> f32 {
        self.x.hypot(self.y)
    }

    pub fn dist(self, other: Point) -> f32 {
        (self - other).len()
    }

    pub fn dist_sq(self, other: Point) -> f32 {
        let d = self - other;
        d.dot(d)
    }

    /// Perpendicular vector, rotated a quarter turn.
    pub fn perp(self) -> Point {
        Point::new(self.y, -self.x)
    }

    /// Unit vector in the same direction. The zero vector stays zero.
    pub fn unit(self) -> Point {
        let len = self.len();
        if len == 0.0 {
            self
        } else {
            Point::new(self.x / len, self.y / len)
        }
    }

    pub fn lerp(self, other: Point, t: f32) -> Point {
        self + (other - self) * t
    }

    /// Rotates `self` around `center` by `angle` radians.
    pub fn rotate_around(self, center: Point, angle: f32) -> Point {
        let (s, c) = angle.sin_cos();
        let p = self - center;
        Point::new(p.x * c - p.y * s, p.x * s + p.y * c) + center
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;
    fn mul(self, rhs: f32) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Point {
        Point::new(x, y)
    }
}

/// Pointer input as delivered by the host, in surface-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PointerEvent {
    Down { x: f32, y: f32 },
    Move { x: f32, y: f32 },
    Up,
    Leave,
}

/// Accumulates the points of the current gesture.
///
/// Only the gesture in progress is kept: releasing the pointer drops the path, the
/// stroke survives only as pixels on the drawing surface.
#[derive(Debug, Default, Clone)]
pub struct StrokeRecorder {
    active: bool,
    path: Vec<Point>,
}

impl StrokeRecorder {
    pub fn new() -> StrokeRecorder {
        StrokeRecorder::default()
    }

    /// Starts a gesture with an empty path.
    pub fn begin(&mut self) {
        self.active = true;
        self.path.clear();
    }

    /// Appends `point` while a gesture is active, does nothing otherwise.
    pub fn extend(&mut self, point: Point) {
        if self.active {
            self.path.push(point);
        }
    }

    /// Ends the gesture and drops its path.
    pub fn end(&mut self) {
        self.active = false;
        self.path.clear();
    }

    pub fn handle(&mut self, event: PointerEvent) {
        match event {
            // The press position is not recorded, the path starts with the first move.
            PointerEvent::Down { .. } => self.begin(),
            PointerEvent::Move { x, y } => self.extend(Point::new(x, y)),
            PointerEvent::Up | PointerEvent::Leave => self.end(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn path(&self) -> &[Point] {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_is_ignored_outside_a_gesture() {
        let mut recorder = StrokeRecorder::new();
        recorder.extend(Point::new(1.0, 2.0));
        assert!(recorder.path().is_empty());

        recorder.begin();
        recorder.extend(Point::new(1.0, 2.0));
        recorder.extend(Point::new(3.0, 4.0));
        assert_eq!(recorder.path(), &[Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);

        recorder.end();
        recorder.extend(Point::new(5.0, 6.0));
        assert!(recorder.path().is_empty());
        assert!(!recorder.is_active());
    }

    #[test]
    fn begin_then_end_leaves_an_empty_path() {
        let mut recorder = StrokeRecorder::new();
        assert!(recorder.path().is_empty());
        recorder.begin();
        recorder.end();
        assert!(recorder.path().is_empty());
    }

    #[test]
    fn begin_discards_a_previous_path() {
        let mut recorder = StrokeRecorder::new();
        recorder.begin();
        recorder.extend(Point::new(1.0, 1.0));
        recorder.begin();
        assert!(recorder.path().is_empty());
        assert!(recorder.is_active());
    }

    #[test]
    fn pointer_events_drive_the_recorder() {
        let mut recorder = StrokeRecorder::new();
        recorder.handle(PointerEvent::Move { x: 0.0, y: 0.0 });
        recorder.handle(PointerEvent::Down { x: 1.0, y: 1.0 });
        recorder.handle(PointerEvent::Move { x: 2.0, y: 2.0 });
        assert_eq!(recorder.path(), &[Point::new(2.0, 2.0)]);
        recorder.handle(PointerEvent::Leave);
        assert!(recorder.path().is_empty());
    }

    #[test]
    fn pointer_events_parse_from_json() {
        let events: Vec<PointerEvent> = serde_json::from_str(
            r#"[{"kind":"down","x":1,"y":2},{"kind":"move","x":3.5,"y":4},{"kind":"up"}]"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![
                PointerEvent::Down { x: 1.0, y: 2.0 },
                PointerEvent::Move { x: 3.5, y: 4.0 },
                PointerEvent::Up
            ]
        );
    }

    #[test]
    fn rotate_a_quarter_turn() {
        let p = Point::new(1.0, 0.0).rotate_around(Point::default(), std::f32::consts::FRAC_PI_2);
        assert!((p.x - 0.0).abs() < 1e-6);
        assert!((p.y - 1.0).abs() < 1e-6);
    }
}
