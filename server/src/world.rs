//! Live entities shared by every connection.

use crate::registry::Registry;
use blobfield_shared::config::GameplayConfig;
use blobfield_shared::geometry::grown_radius;
use blobfield_shared::protocol::{PlayerMsg, SporeMsg};
use std::sync::atomic::{AtomicU64, Ordering};

/// Anything occupying a circle in the plane.
pub trait Circle {
    /// `(x, y, radius)`
    fn circle(&self) -> (f64, f64, f64);
}

/// A controllable entity, owned by one in-game connection.
#[derive(Debug, Clone)]
pub struct Player {
    pub name: String,
    pub x: f64,
    pub y: f64,
    radius: f64,
    /// Heading in radians
    pub direction: f64,
    pub speed: f64,
    pub color: u32,
    /// Tells a respawned player apart from the one it replaced under the same id
    pub generation: u64,
}

impl Player {
    pub fn spawn(name: impl Into<String>, x: f64, y: f64, color: u32, config: &GameplayConfig) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            radius: config.player_start_radius,
            direction: 0.0,
            speed: config.player_speed,
            color,
            generation: 0,
        }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Grow by the mass of an absorbed circle. Only called once a consumption
    /// claim has passed validation.
    pub fn absorb(&mut self, absorbed_radius: f64) {
        self.radius = grown_radius(self.radius, absorbed_radius);
    }

    /// Advance along the current heading.
    pub fn advance(&mut self, dt: f64) {
        self.x += self.speed * self.direction.cos() * dt;
        self.y += self.speed * self.direction.sin() * dt;
    }

    pub fn to_msg(&self, id: u64) -> PlayerMsg {
        PlayerMsg {
            id,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            radius: self.radius,
            direction: self.direction,
            speed: self.speed,
            color: self.color,
        }
    }
}

impl Circle for Player {
    fn circle(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.radius)
    }
}

/// A passive entity. Immutable once spawned; only ever removed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spore {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl Spore {
    pub fn to_msg(&self, id: u64) -> SporeMsg {
        SporeMsg {
            id,
            x: self.x,
            y: self.y,
            radius: self.radius,
        }
    }
}

impl Circle for Spore {
    fn circle(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.radius)
    }
}

/// The shared mutable world: exactly two registries.
#[derive(Default)]
pub struct World {
    pub players: Registry<Player>,
    pub spores: Registry<Spore>,
    generations: AtomicU64,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// A generation number no player has had before.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Mutate player `id` only while it is still incarnation `generation`.
    pub fn update_player<R>(
        &self,
        id: u64,
        generation: u64,
        mutate: impl FnOnce(&mut Player) -> R,
    ) -> Option<R> {
        self.players
            .update(id, |player| (player.generation == generation).then(|| mutate(player)))
            .flatten()
    }

    /// Remove player `id` only if it is still incarnation `generation`.
    pub fn remove_player(&self, id: u64, generation: u64) -> Option<Player> {
        self.players.remove_if(id, |player| player.generation == generation)
    }

    pub fn is_live(&self, id: u64, generation: u64) -> bool {
        self.update_player(id, generation, |_| ()).is_some()
    }
}

/// Generate a color from player ID using golden angle hue distribution.
pub fn color_from_id(id: u64) -> u32 {
    let hue = (id.wrapping_mul(137) % 360) as f64;
    hsv_to_rgb(hue, 0.55, 0.95)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> u32 {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h as u32 / 60 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let channel = |f: f64| ((f + m) * 255.0).round() as u32;
    (channel(r) << 16) | (channel(g) << 8) | channel(b)
}
