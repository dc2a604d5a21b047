//! Match configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to its
//! default. The stage may override battle mode and the physics toggles
//! while it configures the arena.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::sim::physics::{PhysicsModel, PhysicsRules};

/// Physics knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    pub relativistic: bool,
    /// Speed limit for the relativistic model
    pub speed_limit: f64,
    /// Restitution against walls
    pub wall_bounce: f64,
    /// Restitution between ships
    pub ship_bounce: f64,
    pub wall_collision_damage: bool,
    pub ship_collision_damage: bool,
    pub collision_damage_factor: f64,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            relativistic: false,
            speed_limit: 20.0,
            wall_bounce: 0.5,
            ship_bounce: 0.9,
            wall_collision_damage: false,
            ship_collision_damage: false,
            collision_damage_factor: 1.0,
        }
    }
}

impl PhysicsSettings {
    pub fn rules(&self) -> PhysicsRules {
        PhysicsRules {
            model: PhysicsModel::new(self.relativistic, self.speed_limit),
            wall_bounce: self.wall_bounce,
            ship_bounce: self.ship_bounce,
            wall_collision_damage: self.wall_collision_damage,
            ship_collision_damage: self.ship_collision_damage,
            collision_damage_factor: self.collision_damage_factor,
        }
    }
}

/// CPU watchdog timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    /// Milliseconds between watchdog ticks
    pub interval_ms: u64,
    /// Watchdog ticks a single callback may run for
    pub deadline_ticks: u64,
    /// Lua instructions between cancellation checks
    pub hook_instructions: u32,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            deadline_ticks: 2,
            hook_instructions: 1000,
        }
    }
}

/// Everything needed to set up a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Seed for start placement
    pub seed: u64,
    /// Ships per user team
    pub team_size: usize,
    /// Lasers, torpedoes, energy, power and shields
    pub battle_mode: bool,
    pub physics: PhysicsSettings,
    pub watchdog: WatchdogSettings,
    /// Hard stop for `run_to_completion`
    pub max_ticks: u64,
    /// Record user graphics
    pub user_gfx: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            team_size: 1,
            battle_mode: true,
            physics: PhysicsSettings::default(),
            watchdog: WatchdogSettings::default(),
            max_ticks: 100_000,
            user_gfx: true,
        }
    }
}

impl MatchSettings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded match settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"seed": 42, "physics": {"relativistic": true}}"#;
        let settings = MatchSettings::from_json(json).unwrap();
        assert_eq!(settings.seed, 42);
        assert_eq!(settings.team_size, 1);
        assert!(settings.physics.relativistic);
        assert_eq!(settings.physics.speed_limit, 20.0);
        assert!(settings.physics.rules().model.is_relativistic());
        assert_eq!(settings.watchdog, WatchdogSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("match.json");
        let mut settings = MatchSettings::default();
        settings.max_ticks = 500;
        settings.physics.wall_bounce = 0.25;
        settings.save(&path).unwrap();
        assert_eq!(MatchSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MatchSettings::load(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        assert!(matches!(MatchSettings::from_json("{seed"), Err(SettingsError::Parse(_))));
    }
}
