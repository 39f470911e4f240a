use std::f32::consts::TAU;

use rand::Rng;

const INNER_RADIUS_RATIO: f32 = 0.18;
const OUTER_RADIUS_RATIO: f32 = 0.42;
const MAX_ATTEMPTS: usize = 30;

const MIN_X: f32 = 4.0;
const MAX_X: f32 = 96.0;
const MIN_Y: f32 = 6.0;
const MAX_Y: f32 = 90.0;

const FALLBACK_X: (f32, f32) = (8.0, 82.0);
const FALLBACK_Y: (f32, f32) = (12.0, 62.0);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Bubble anchor in percent of the viewport, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BubblePosition {
    pub x: f32,
    pub y: f32,
}

impl BubblePosition {
    pub fn within_bounds(&self) -> bool {
        (MIN_X..=MAX_X).contains(&self.x) && (MIN_Y..=MAX_Y).contains(&self.y)
    }
}

/// Samples a point on the ring around the countdown display. Falls back to
/// the fixed safe rectangle when the viewport is unknown or every attempt
/// lands outside the edge insets.
pub fn pick_bubble_position<R: Rng + ?Sized>(viewport: Viewport, rng: &mut R) -> BubblePosition {
    let Viewport { width, height } = viewport;
    let size = width.min(height);
    if !(size > 0.0) {
        return fallback_position(rng);
    }

    let min_radius = size * INNER_RADIUS_RATIO;
    let max_radius = size * OUTER_RADIUS_RATIO;
    let center_x = width / 2.0;
    let center_y = height / 2.0;

    for _ in 0..MAX_ATTEMPTS {
        let angle = rng.gen_range(0.0..TAU);
        let radius = rng.gen_range(min_radius..max_radius);
        let x_px = center_x + angle.cos() * radius;
        let y_px = center_y + angle.sin() * radius;
        let candidate = BubblePosition {
            x: x_px / width * 100.0,
            y: y_px / height * 100.0,
        };
        if candidate.within_bounds() {
            return candidate;
        }
    }

    fallback_position(rng)
}

fn fallback_position<R: Rng + ?Sized>(rng: &mut R) -> BubblePosition {
    BubblePosition {
        x: rng.gen_range(FALLBACK_X.0..FALLBACK_X.1),
        y: rng.gen_range(FALLBACK_Y.0..FALLBACK_Y.1),
    }
}
