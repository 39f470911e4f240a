use std::{
    f32::consts::TAU,
    time::{Duration, Instant},
};

use egui::{self, ecolor::Hsva, Color32, Pos2, Rect, Vec2};
use rand::Rng;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const PARTICLES_PER_CORNER: usize = 6;
const SPREAD_DEGREES: f32 = 65.0;
const PARTICLE_TTL: Duration = Duration::from_millis(3200);
/// Normalized units: 1.0 is the full viewport height per second.
const START_SPEED: f32 = 1.6;
const GRAVITY: f32 = 1.4;
const DRAG_PER_SECOND: f32 = 0.35;
const DRIFT_PIECES: usize = 26;

#[derive(Debug, Clone, Copy)]
struct Cannon {
    origin: Pos2,
    angle_degrees: f32,
}

const LOWER_LEFT: Cannon = Cannon {
    origin: Pos2 { x: 0.0, y: 0.7 },
    angle_degrees: 60.0,
};
const LOWER_RIGHT: Cannon = Cannon {
    origin: Pos2 { x: 1.0, y: 0.7 },
    angle_degrees: 120.0,
};

#[derive(Debug, Clone)]
struct Particle {
    pos: Pos2,
    vel: Vec2,
    hue: f32,
    size: f32,
    spin: f32,
    born_at: Instant,
}

/// Corner cannons firing every animation frame for a fixed duration.
#[derive(Debug, Default)]
pub struct ConfettiBurst {
    particles: Vec<Particle>,
    emit_until: Option<Instant>,
    next_emit_at: Option<Instant>,
    last_step: Option<Instant>,
}

impl ConfettiBurst {
    pub fn launch(&mut self, now: Instant, duration: Duration) {
        self.emit_until = Some(now + duration);
        self.next_emit_at = Some(now);
        self.last_step.get_or_insert(now);
    }

    pub fn step<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) {
        let dt = self
            .last_step
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0)
            .min(0.1);
        self.last_step = Some(now);

        for particle in &mut self.particles {
            particle.vel.y += GRAVITY * dt;
            particle.vel *= (1.0 - DRAG_PER_SECOND * dt).max(0.0);
            particle.pos += particle.vel * dt;
            particle.spin += dt * 6.0;
        }
        self.particles
            .retain(|particle| now.saturating_duration_since(particle.born_at) < PARTICLE_TTL);

        let Some(until) = self.emit_until else {
            return;
        };
        while let Some(at) = self.next_emit_at.filter(|at| *at <= now) {
            if at >= until {
                self.next_emit_at = None;
                self.emit_until = None;
                break;
            }
            for cannon in [LOWER_LEFT, LOWER_RIGHT] {
                for _ in 0..PARTICLES_PER_CORNER {
                    self.particles.push(fire(cannon, at, rng));
                }
            }
            self.next_emit_at = Some(at + FRAME_INTERVAL);
        }
    }

    pub fn is_active(&self) -> bool {
        self.emit_until.is_some() || !self.particles.is_empty()
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn draw(&self, painter: &egui::Painter, screen: Rect, now: Instant) {
        for particle in &self.particles {
            let age = now.saturating_duration_since(particle.born_at).as_secs_f32();
            let fade = (1.0 - age / PARTICLE_TTL.as_secs_f32()).clamp(0.0, 1.0);
            let center = Pos2::new(
                screen.left() + particle.pos.x * screen.width(),
                screen.top() + particle.pos.y * screen.height(),
            );
            let squash = particle.spin.cos().abs().max(0.2);
            let rect = Rect::from_center_size(center, Vec2::new(particle.size, particle.size * squash));
            painter.rect_filled(rect, 1.0, hue_color(particle.hue, 0.85, 0.95, fade));
        }
    }
}

fn fire<R: Rng + ?Sized>(cannon: Cannon, at: Instant, rng: &mut R) -> Particle {
    let half_spread = SPREAD_DEGREES / 2.0;
    let angle = (cannon.angle_degrees + rng.gen_range(-half_spread..=half_spread)).to_radians();
    let speed = START_SPEED * rng.gen_range(0.5..=1.5);
    Particle {
        pos: cannon.origin,
        vel: Vec2::new(angle.cos() * speed * 0.6, -angle.sin() * speed),
        hue: rng.gen_range(0.0..360.0),
        size: rng.gen_range(5.0..=9.0),
        spin: rng.gen_range(0.0..TAU),
        born_at: at,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriftPiece {
    pub left: f32,
    pub size: f32,
    pub delay: f32,
    pub duration: f32,
    pub opacity: f32,
    pub hue: f32,
}

/// Slow background confetti shown once the countdown has celebrated.
#[derive(Debug, Clone)]
pub struct ConfettiDrift {
    pieces: Vec<DriftPiece>,
}

impl ConfettiDrift {
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let pieces = (0..DRIFT_PIECES)
            .map(|_| DriftPiece {
                left: rng.gen_range(0.0..100.0),
                size: rng.gen_range(4.0..8.0),
                delay: rng.gen_range(0.0..8.0),
                duration: rng.gen_range(7.0..12.0),
                opacity: rng.gen_range(0.4..0.85),
                hue: rng.gen_range(10.0f32..340.0).round(),
            })
            .collect();
        Self { pieces }
    }

    pub fn pieces(&self) -> &[DriftPiece] {
        &self.pieces
    }

    pub fn draw(&self, painter: &egui::Painter, screen: Rect, elapsed: Duration) {
        let elapsed = elapsed.as_secs_f32();
        for piece in &self.pieces {
            let t = elapsed - piece.delay;
            if t < 0.0 {
                continue;
            }
            let progress = (t % piece.duration) / piece.duration;
            let x = screen.left()
                + piece.left / 100.0 * screen.width()
                + (progress * TAU).sin() * 18.0;
            let y = screen.top() - 20.0 + progress * (screen.height() + 40.0);
            let rect = Rect::from_center_size(Pos2::new(x, y), Vec2::new(piece.size, piece.size * 1.6));
            painter.rect_filled(rect, 1.0, hue_color(piece.hue, 0.85, 0.95, piece.opacity));
        }
    }
}

pub fn hue_color(hue_degrees: f32, saturation: f32, value: f32, alpha: f32) -> Color32 {
    Color32::from(Hsva::new(
        hue_degrees.rem_euclid(360.0) / 360.0,
        saturation,
        value,
        alpha,
    ))
}
