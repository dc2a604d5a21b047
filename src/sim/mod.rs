//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Fixed ticks only
//! - Seeded RNG only
//! - Stable iteration order (by ship, laser and torpedo index)
//! - Scripts reach the world only through the engine

pub mod collision;
pub mod events;
pub mod geometry;
pub mod physics;
pub mod solver;
pub mod state;
pub mod tick;
pub mod world;

pub use collision::{ArenaBounds, move_and_check_collisions};
pub use events::{
    ArenaEvent, ConsoleHandler, EventHandler, EventLog, SensorHub, StageSensors, TeamSensors,
};
pub use geometry::{Circle2D, Line2D, Rect, Wall, Zone, has_vision};
pub use physics::{PhysicsModel, PhysicsRules};
pub use state::{Laser, Rgba, Ship, ShipProperties, Team, Torpedo};
pub use tick::{Engine, EnginePhase};
pub use world::World;
