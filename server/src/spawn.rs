//! Collision-avoiding spawn placement.

use crate::registry::Registry;
use crate::world::Circle;
use blobfield_shared::geometry::circles_overlap;
use rand::Rng;

/// Parameters of the random search.
#[derive(Debug, Clone, Copy)]
pub struct SpawnSearch {
    /// Half-extent of the square sampled first
    pub initial_bound: f64,
    /// Failed samples tolerated before the square doubles
    pub max_tries: u32,
}

impl Default for SpawnSearch {
    fn default() -> Self {
        Self {
            initial_bound: 3000.0,
            max_tries: 25,
        }
    }
}

/// A set of circles a new entity must not overlap.
pub trait Obstacles {
    fn blocks(&self, x: f64, y: f64, radius: f64) -> bool;
}

impl<T: Circle + Clone> Obstacles for Registry<T> {
    fn blocks(&self, x: f64, y: f64, radius: f64) -> bool {
        self.snapshot().iter().any(|(_, object)| {
            let (ox, oy, or) = object.circle();
            circles_overlap(x, y, radius, ox, oy, or)
        })
    }
}

/// An absent set blocks nothing.
impl<O: Obstacles> Obstacles for Option<&O> {
    fn blocks(&self, x: f64, y: f64, radius: f64) -> bool {
        self.is_some_and(|obstacles| obstacles.blocks(x, y, radius))
    }
}

/// Pick a point where a circle of `radius` overlaps nothing in `avoid`.
///
/// Samples uniformly in `[-bound, bound]^2`, doubling `bound` after every
/// `max_tries` misses, so the search always ends.
pub fn spawn_coords(
    rng: &mut impl Rng,
    radius: f64,
    avoid: &[&dyn Obstacles],
    search: SpawnSearch,
) -> (f64, f64) {
    let mut bound = search.initial_bound;
    let mut tries = 0;

    loop {
        let x = rng.gen_range(-bound..bound);
        let y = rng.gen_range(-bound..bound);

        if !avoid.iter().any(|obstacles| obstacles.blocks(x, y, radius)) {
            return (x, y);
        }

        tries += 1;
        if tries >= search.max_tries {
            bound *= 2.0;
            tries = 0;
        }
    }
}
