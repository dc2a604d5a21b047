//! Momentum and velocity mappings
//!
//! Ships carry momentum; thrust, bounces and blasts change momentum, and the
//! active model turns it into the velocity used for movement. The model is
//! chosen once per match and passed to every physics computation.

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Fraction of the speed limit a velocity is clamped to before inverting
const MAX_SPEED_FRACTION: f64 = 1.0 - 1e-9;

/// Physics formulation for the whole match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum PhysicsModel {
    /// Unit mass: velocity equals momentum
    #[default]
    Newtonian,
    /// Special-relativistic mapping with speed limit `c`
    Relativistic { c: f64 },
}

impl PhysicsModel {
    pub fn new(relativistic: bool, speed_limit: f64) -> Self {
        if relativistic && speed_limit > 0.0 {
            PhysicsModel::Relativistic { c: speed_limit }
        } else {
            PhysicsModel::Newtonian
        }
    }

    pub fn is_relativistic(&self) -> bool {
        matches!(self, PhysicsModel::Relativistic { .. })
    }

    /// Velocity for a momentum
    pub fn velocity(&self, momentum: DVec2) -> DVec2 {
        match *self {
            PhysicsModel::Newtonian => momentum,
            PhysicsModel::Relativistic { c } => {
                let gamma = (1.0 + momentum.length_squared() / (c * c)).sqrt();
                momentum / gamma
            }
        }
    }

    /// Momentum for a velocity; speeds at or beyond the limit are clamped just below it
    pub fn momentum(&self, velocity: DVec2) -> DVec2 {
        match *self {
            PhysicsModel::Newtonian => velocity,
            PhysicsModel::Relativistic { c } => {
                let max_speed = c * MAX_SPEED_FRACTION;
                let v = if velocity.length() > max_speed {
                    velocity.normalize_or_zero() * max_speed
                } else {
                    velocity
                };
                let gamma = 1.0 / (1.0 - v.length_squared() / (c * c)).sqrt();
                v * gamma
            }
        }
    }

    /// Average acceleration over `window` ticks of constant `force`
    ///
    /// Exact for the Newtonian model; the relativistic model uses the secant
    /// between the velocities at both ends of the window.
    pub fn acceleration(&self, momentum: DVec2, force: DVec2, window: f64) -> DVec2 {
        match *self {
            PhysicsModel::Newtonian => force,
            PhysicsModel::Relativistic { .. } if window > 0.0 => {
                (self.velocity(momentum + force * window) - self.velocity(momentum)) / window
            }
            PhysicsModel::Relativistic { .. } => DVec2::ZERO,
        }
    }

    /// Kinetic energy of a unit-mass body with this momentum
    pub fn kinetic_energy(&self, momentum: DVec2) -> f64 {
        match *self {
            PhysicsModel::Newtonian => 0.5 * momentum.length_squared(),
            PhysicsModel::Relativistic { c } => {
                c * c * ((1.0 + momentum.length_squared() / (c * c)).sqrt() - 1.0)
            }
        }
    }
}

/// Bounce and damage rules for one match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsRules {
    pub model: PhysicsModel,
    /// Restitution against walls
    pub wall_bounce: f64,
    /// Restitution between ships
    pub ship_bounce: f64,
    pub wall_collision_damage: bool,
    pub ship_collision_damage: bool,
    /// Energy lost per unit of kinetic energy lost in a collision
    pub collision_damage_factor: f64,
}

impl Default for PhysicsRules {
    fn default() -> Self {
        Self {
            model: PhysicsModel::Newtonian,
            wall_bounce: 0.5,
            ship_bounce: 0.9,
            wall_collision_damage: false,
            ship_collision_damage: false,
            collision_damage_factor: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newtonian_is_identity() {
        let model = PhysicsModel::Newtonian;
        let p = DVec2::new(3.0, -4.0);
        assert_eq!(model.velocity(p), p);
        assert_eq!(model.momentum(p), p);
        assert!((model.kinetic_energy(p) - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_relativistic_speed_stays_below_limit() {
        let model = PhysicsModel::new(true, 10.0);
        let v = model.velocity(DVec2::new(1e6, 0.0));
        assert!(v.length() < 10.0);
        assert!(v.length() > 9.99);
    }

    #[test]
    fn test_relativistic_round_trip() {
        let model = PhysicsModel::new(true, 10.0);
        let v = DVec2::new(6.0, 2.0);
        let back = model.velocity(model.momentum(v));
        assert!((back - v).length() < 1e-9);
    }

    #[test]
    fn test_relativistic_energy_matches_newtonian_at_low_speed() {
        let model = PhysicsModel::new(true, 1000.0);
        let p = DVec2::new(0.5, 0.0);
        let ke = model.kinetic_energy(p);
        assert!((ke - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_newtonian_acceleration_is_force() {
        let model = PhysicsModel::Newtonian;
        let f = DVec2::new(0.5, -0.25);
        assert_eq!(model.acceleration(DVec2::new(3.0, 1.0), f, 0.5), f);
    }

    #[test]
    fn test_relativistic_acceleration_shrinks_near_limit() {
        let model = PhysicsModel::new(true, 10.0);
        let f = DVec2::new(1.0, 0.0);
        let slow = model.acceleration(DVec2::ZERO, f, 1.0);
        let fast = model.acceleration(DVec2::new(100.0, 0.0), f, 1.0);
        assert!(fast.x < slow.x);
        assert!(fast.x > 0.0);
    }

    #[test]
    fn test_zero_speed_limit_falls_back_to_newtonian() {
        assert_eq!(PhysicsModel::new(true, 0.0), PhysicsModel::Newtonian);
    }
}
