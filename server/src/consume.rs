//! Plausibility checks for client consumption claims.
//!
//! A claim is never trusted: the server re-derives distance and mass from its
//! own copy of the world before anything is removed or grown.

use crate::world::Circle;
use blobfield_shared::config::GameplayConfig;
use blobfield_shared::geometry::{dist_sq, radius_to_mass};

/// What the claimant says it ate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Spore,
    Player,
}

/// Why a claim was ignored.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("{kind:?} {id} does not exist")]
    UnknownTarget { kind: TargetKind, id: u64 },
    #[error("a player cannot consume itself")]
    SelfTarget,
    #[error("mass {claimant:.1} is not more than {ratio} x target mass {target:.1}")]
    TooSmall { claimant: f64, target: f64, ratio: f64 },
    #[error("too far from target (dist_sq {dist_sq:.1} > threshold_sq {threshold_sq:.1})")]
    TooFar { dist_sq: f64, threshold_sq: f64 },
}

/// Check mass and proximity of a claim against an existing target.
pub fn validate_claim(
    config: &GameplayConfig,
    claimant: &impl Circle,
    target: &impl Circle,
    kind: TargetKind,
) -> Result<(), Rejection> {
    let (cx, cy, cr) = claimant.circle();
    let (tx, ty, tr) = target.circle();

    if kind == TargetKind::Player {
        check_mass(cr, tr, config.player_mass_ratio)?;
    }
    check_proximity(cx, cy, cr, tx, ty, tr, config.consume_buffer)
}

fn check_mass(claimant_radius: f64, target_radius: f64, ratio: f64) -> Result<(), Rejection> {
    let claimant = radius_to_mass(claimant_radius);
    let target = radius_to_mass(target_radius);
    if claimant > target * ratio {
        Ok(())
    } else {
        Err(Rejection::TooSmall {
            claimant,
            target,
            ratio,
        })
    }
}

fn check_proximity(
    cx: f64,
    cy: f64,
    cr: f64,
    tx: f64,
    ty: f64,
    tr: f64,
    buffer: f64,
) -> Result<(), Rejection> {
    let dist_sq = dist_sq(cx, cy, tx, ty);
    let threshold = cr + buffer + tr;
    let threshold_sq = threshold * threshold;
    if dist_sq > threshold_sq {
        return Err(Rejection::TooFar {
            dist_sq,
            threshold_sq,
        });
    }
    Ok(())
}
