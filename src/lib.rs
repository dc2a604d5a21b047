//! Tick Arena - a deterministic arena combat simulator for scripted ships
//!
//! Core modules:
//! - `sim`: Deterministic simulation (solver, geometry, collisions, world, tick loop)
//! - `script`: Embedded Lua sandbox, script API and CPU watchdog
//! - `loader`: Resolving ship and stage scripts on disk
//! - `results`: Ranks, scores and statistics reported by the stage
//! - `settings`: Match configuration

pub mod error;
pub mod loader;
pub mod results;
pub mod script;
pub mod settings;
pub mod sim;

pub use error::EngineError;
pub use results::{MatchResult, TeamResult};
pub use settings::MatchSettings;
pub use sim::{Engine, EnginePhase};

/// Game configuration constants
pub mod consts {
    /// Ship geometry
    pub const SHIP_RADIUS: f64 = 8.0;
    pub const SHIP_SIZE: f64 = 16.0;
    /// Maximum momentum change a thruster can apply in one tick
    pub const MAX_THRUSTER_FORCE: f64 = 1.0;

    /// Lasers
    pub const LASER_SPEED: f64 = 25.0;
    pub const LASER_HEAT: u32 = 5;
    pub const LASER_DAMAGE: f64 = 4.0;
    pub const MAX_LASERS: usize = 500;

    /// Torpedoes
    pub const TORPEDO_SPEED: f64 = 12.0;
    pub const TORPEDO_HEAT: u32 = 100;
    pub const TORPEDO_AMMO: u32 = 100;
    pub const TORPEDO_BLAST_RADIUS: f64 = 100.0;
    pub const TORPEDO_BLAST_FORCE: f64 = 30.0;
    pub const TORPEDO_BLAST_DAMAGE: f64 = 30.0;
    pub const MAX_TORPEDOES: usize = 100;

    /// Energy, power and shields
    pub const DEFAULT_ENERGY: f64 = 100.0;
    pub const DEFAULT_POWER: f64 = 100.0;
    pub const POWER_REGEN: f64 = 0.5;
    pub const SHIELDS_DECAY: f64 = 0.98;

    /// Longest distance a ship may travel in one collision sub-step
    pub const COLLISION_FRAME: f64 = 4.0;
    /// Offset pulled back from polygon vertices when testing vision
    pub const VERTEX_FUDGE: f64 = 0.01;
    /// Separation applied after a bounce so the next search starts clear
    pub const COLLISION_NUDGE: f64 = 1e-4;
    /// Decimal places kept in ship speed
    pub const SPEED_PRECISION: i32 = 5;

    /// Stage capacity
    pub const MAX_WALLS: usize = 400;
    pub const MAX_ZONES: usize = 400;
    pub const MAX_STARTS: usize = 400;
    pub const MAX_STAGE_SHIPS: usize = 50;
    pub const MAX_STAGE_TEXTS: usize = 50;
    pub const DEFAULT_ARENA_WIDTH: f64 = 800.0;
    pub const DEFAULT_ARENA_HEIGHT: f64 = 600.0;

    /// User graphics capacity (per team, and separately for the stage)
    pub const MAX_USER_RECTANGLES: usize = 500;
    pub const MAX_USER_LINES: usize = 500;
    pub const MAX_USER_CIRCLES: usize = 500;
    pub const MAX_USER_TEXTS: usize = 100;

    /// Results and bookkeeping
    pub const MAX_SCORE_STATS: usize = 20;
    pub const CPU_TIME_TICKS: usize = 30;
    pub const MAX_NAME_LENGTH: usize = 30;
    pub const MAX_CONSOLE_LINES: usize = 100;
}

/// Round to a fixed number of decimal places
#[inline]
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Clamp `value` into `[low, high]`
#[inline]
pub fn limit(low: f64, value: f64, high: f64) -> f64 {
    value.max(low).min(high)
}

/// Sign of `x` as -1, 0 or 1
#[inline]
pub fn signum(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_and_limit() {
        assert_eq!(round_to(1.234_567_89, 5), 1.234_57);
        assert_eq!(limit(8.0, 3.0, 100.0), 8.0);
        assert_eq!(limit(8.0, 300.0, 100.0), 100.0);
        assert_eq!(signum(-2.0), -1.0);
        assert_eq!(signum(0.0), 0.0);
    }
}
