//! Plane geometry for circular entities.
//!
//! Mass is area: `mass = PI * radius^2`. Distances are compared squared so no
//! root is taken on the hot paths.

use std::f64::consts::PI;

/// Area of a circle with the given radius
pub fn radius_to_mass(radius: f64) -> f64 {
    PI * radius * radius
}

/// Radius of a circle with the given area
pub fn mass_to_radius(mass: f64) -> f64 {
    (mass / PI).sqrt()
}

/// Radius after absorbing a circle of radius `absorbed`.
pub fn grown_radius(radius: f64, absorbed: f64) -> f64 {
    mass_to_radius(radius_to_mass(radius) + radius_to_mass(absorbed))
}

/// Squared distance between two points
pub fn dist_sq(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = ax - bx;
    let dy = ay - by;
    dx * dx + dy * dy
}

/// Whether two circles touch or overlap.
pub fn circles_overlap(ax: f64, ay: f64, ar: f64, bx: f64, by: f64, br: f64) -> bool {
    let reach = ar + br;
    dist_sq(ax, ay, bx, by) <= reach * reach
}
