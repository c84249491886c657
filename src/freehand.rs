//! Variable-width stroke outlines.
//!
//! A path is first smoothed into [`StrokePoint`]s (position, simulated pressure, direction,
//! running length), then offset on both sides by a pressure-dependent radius. The left
//! side, an end cap, the reversed right side and a start cap form one closed polygon that
//! can be filled directly. Everything is recomputed from scratch on each call, so it is
//! safe to run every frame on a path that is still growing.

use crate::stroke::Point;
use serde::{Deserialize, Serialize};

/// How fast simulated pressure follows the pointer speed.
const RATE_OF_PRESSURE_CHANGE: f32 = 0.275;
/// Slightly more than a half turn so the last cap point does not land on the first one.
const FIXED_PI: f32 = std::f32::consts::PI + 0.0001;
/// Points closer than this to the end of the stroke are folded into the end cap.
const END_NOISE_THRESHOLD: f32 = 3.0;
const CORNER_STEPS: usize = 13;
const END_CAP_STEPS: usize = 29;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokeOptions {
    /// Base diameter of the stroke.
    pub size: f32,
    /// How much pressure affects the width, in [-1, 1]. Zero gives a constant width.
    pub thinning: f32,
    /// Minimum spacing between outline points, as a fraction of `size`.
    pub smoothing: f32,
    /// How strongly input points are pulled towards the previous stroke point.
    pub streamline: f32,
    /// Derive pressure from pointer speed instead of reading it from the input.
    pub simulate_pressure: bool,
    /// Distance over which the start tapers to a point. Zero disables the taper.
    pub taper_start: f32,
    /// Distance over which the end tapers to a point. Zero disables the taper.
    pub taper_end: f32,
    pub cap_start: bool,
    pub cap_end: bool,
    /// The path is complete: the final input point is used as is.
    pub last: bool,
}

impl Default for StrokeOptions {
    fn default() -> Self {
        StrokeOptions {
            size: 16.0,
            thinning: 0.5,
            smoothing: 0.5,
            streamline: 0.5,
            simulate_pressure: true,
            taper_start: 0.0,
            taper_end: 0.0,
            cap_start: true,
            cap_end: true,
            last: false,
        }
    }
}

/// A smoothed path point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokePoint {
    pub point: Point,
    pub pressure: f32,
    /// Unit vector pointing back towards the previous stroke point.
    pub vector: Point,
    /// Distance to the previous stroke point.
    pub distance: f32,
    /// Length of the stroke up to and including this point.
    pub running_length: f32,
}

/// Outline polygon for `path`. Paths with fewer than two points have no outline.
pub fn stroke_outline(path: &[Point], options: &StrokeOptions) -> Vec<Point> {
    if path.len() < 2 {
        return Vec::new();
    }
    outline_points(&stroke_points(path, options), options)
}

/// Streamlines the raw input into stroke points.
pub fn stroke_points(path: &[Point], options: &StrokeOptions) -> Vec<StrokePoint> {
    let Some(&origin) = path.first() else {
        return Vec::new();
    };
    let t = 0.15 + (1.0 - options.streamline) * 0.85;

    let pts: Vec<Point> = match path {
        // Two points give too little to smooth, subdivide the segment.
        [a, b] => (0..5).map(|i| a.lerp(*b, i as f32 / 4.0)).collect(),
        [a] => vec![*a, *a + Point::new(1.0, 1.0)],
        _ => path.to_vec(),
    };

    let mut out = vec![StrokePoint {
        point: origin,
        pressure: 0.25,
        vector: Point::new(1.0, 1.0),
        distance: 0.0,
        running_length: 0.0,
    }];

    let max = pts.len() - 1;
    let mut running_length = 0.0;
    let mut reached_min_length = false;
    let mut prev = out[0];

    for (i, &input) in pts.iter().enumerate().skip(1) {
        let point = if options.last && i == max {
            input
        } else {
            prev.point.lerp(input, t)
        };
        if point == prev.point {
            continue;
        }

        let distance = point.dist(prev.point);
        running_length += distance;

        // Hold the stroke back until it is at least one brush wide.
        if i < max && !reached_min_length {
            if running_length < options.size {
                continue;
            }
            reached_min_length = true;
        }

        prev = StrokePoint {
            point,
            pressure: 0.5,
            vector: (prev.point - point).unit(),
            distance,
            running_length,
        };
        out.push(prev);
    }

    out[0].vector = out.get(1).map(|p| p.vector).unwrap_or_default();
    out
}

fn stroke_radius(size: f32, thinning: f32, pressure: f32) -> f32 {
    size * (0.5 - thinning * (0.5 - pressure))
}

fn simulated_pressure(prev_pressure: f32, distance: f32, size: f32) -> f32 {
    let speed = (distance / size).min(1.0);
    let rest = (1.0 - speed).min(1.0);
    (prev_pressure + (rest - prev_pressure) * (speed * RATE_OF_PRESSURE_CHANGE)).min(1.0)
}

fn ease_out_quad(t: f32) -> f32 {
    t * (2.0 - t)
}

fn ease_out_cubic(t: f32) -> f32 {
    let t = t - 1.0;
    t * t * t + 1.0
}

/// Offsets the stroke points into a closed outline.
pub fn outline_points(points: &[StrokePoint], options: &StrokeOptions) -> Vec<Point> {
    let (Some(&first), Some(&last)) = (points.first(), points.last()) else {
        return Vec::new();
    };
    if options.size <= 0.0 {
        return Vec::new();
    }

    let size = options.size;
    let total_length = last.running_length;
    let taper_start = options.taper_start.max(0.0);
    let taper_end = options.taper_end.max(0.0);
    let min_distance = (size * options.smoothing).powi(2);

    let mut left: Vec<Point> = Vec::new();
    let mut right: Vec<Point> = Vec::new();

    let mut prev_pressure = points.iter().take(10).fold(first.pressure, |acc, p| {
        let pressure = if options.simulate_pressure {
            simulated_pressure(acc, p.distance, size)
        } else {
            p.pressure
        };
        (acc + pressure) / 2.0
    });

    let mut radius = stroke_radius(size, options.thinning, last.pressure);
    let mut first_radius: Option<f32> = None;
    let mut prev_vector = first.vector;
    let mut pl = first.point;
    let mut pr = first.point;
    let mut prev_was_sharp = false;

    for (i, sp) in points.iter().enumerate() {
        let is_last = i == points.len() - 1;
        if !is_last && total_length - sp.running_length < END_NOISE_THRESHOLD {
            continue;
        }

        let mut pressure = sp.pressure;
        if options.thinning != 0.0 {
            if options.simulate_pressure {
                pressure = simulated_pressure(prev_pressure, sp.distance, size);
            }
            radius = stroke_radius(size, options.thinning, pressure);
        } else {
            radius = size / 2.0;
        }
        first_radius.get_or_insert(radius);

        let ts = if sp.running_length < taper_start {
            ease_out_quad(sp.running_length / taper_start)
        } else {
            1.0
        };
        let remaining = total_length - sp.running_length;
        let te = if remaining < taper_end {
            ease_out_cubic(remaining / taper_end)
        } else {
            1.0
        };
        radius = (radius * ts.min(te)).max(0.01);

        let next_vector = if is_last {
            sp.vector
        } else {
            points[i + 1].vector
        };
        let next_dpr = if is_last {
            1.0
        } else {
            sp.vector.dot(next_vector)
        };
        let prev_dpr = sp.vector.dot(prev_vector);

        let is_sharp = prev_dpr < 0.0 && !prev_was_sharp;
        let next_is_sharp = next_dpr < 0.0;

        if is_sharp || next_is_sharp {
            // Wrap the corner in a half circle.
            let offset = prev_vector.perp() * radius;
            for step in 0..=CORNER_STEPS {
                let t = step as f32 / CORNER_STEPS as f32;
                left.push((sp.point - offset).rotate_around(sp.point, FIXED_PI * t));
                right.push((sp.point + offset).rotate_around(sp.point, -FIXED_PI * t));
            }
            if let (Some(&l), Some(&r)) = (left.last(), right.last()) {
                pl = l;
                pr = r;
            }
            if next_is_sharp {
                prev_was_sharp = true;
            }
            continue;
        }
        prev_was_sharp = false;

        if is_last {
            let offset = sp.vector.perp() * radius;
            left.push(sp.point - offset);
            right.push(sp.point + offset);
            continue;
        }

        let offset = next_vector.lerp(sp.vector, next_dpr).perp() * radius;

        let tl = sp.point - offset;
        if i <= 1 || pl.dist_sq(tl) > min_distance {
            left.push(tl);
            pl = tl;
        }
        let tr = sp.point + offset;
        if i <= 1 || pr.dist_sq(tr) > min_distance {
            right.push(tr);
            pr = tr;
        }

        prev_pressure = pressure;
        prev_vector = sp.vector;
    }

    let first_point = first.point;
    let last_point = if points.len() > 1 {
        last.point
    } else {
        first.point + Point::new(1.0, 1.0)
    };
    let tapered = taper_start > 0.0 || taper_end > 0.0;

    let mut start_cap = Vec::new();
    let mut end_cap = Vec::new();

    if points.len() == 1 {
        if !tapered || options.last {
            // A single stroke point draws a dot.
            let r = first_radius.unwrap_or(radius);
            let start = first_point + (first_point - last_point).perp().unit() * -r;
            return (1..=CORNER_STEPS)
                .map(|step| {
                    let t = step as f32 / CORNER_STEPS as f32;
                    start.rotate_around(first_point, FIXED_PI * 2.0 * t)
                })
                .collect();
        }
    } else {
        if taper_start > 0.0 {
            // Tapered to a point, no cap.
        } else if options.cap_start {
            if let Some(&r0) = right.first() {
                for step in 1..=CORNER_STEPS {
                    let t = step as f32 / CORNER_STEPS as f32;
                    start_cap.push(r0.rotate_around(first_point, FIXED_PI * t));
                }
            }
        } else if let (Some(&l0), Some(&r0)) = (left.first(), right.first()) {
            let corners = l0 - r0;
            let a = corners * 0.5;
            let b = corners * 0.51;
            start_cap.extend([first_point - a, first_point - b, first_point + b, first_point + a]);
        }

        let direction = (-last.vector).perp();
        if taper_end > 0.0 {
            end_cap.push(last_point);
        } else if options.cap_end {
            let start = last_point + direction * radius;
            for step in 1..END_CAP_STEPS {
                let t = step as f32 / END_CAP_STEPS as f32;
                end_cap.push(start.rotate_around(last_point, FIXED_PI * 3.0 * t));
            }
        } else {
            end_cap.extend([
                last_point + direction * radius,
                last_point + direction * (radius * 0.99),
                last_point - direction * (radius * 0.99),
                last_point - direction * radius,
            ]);
        }
    }

    let mut outline = left;
    outline.extend(end_cap);
    outline.extend(right.into_iter().rev());
    outline.extend(start_cap);
    outline
}
