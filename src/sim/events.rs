//! Physics events and the handlers they fan out to
//!
//! The world emits one [`ArenaEvent`] per occurrence. Every registered
//! [`EventHandler`] sees every event, in registration order; handlers are
//! side-effect only. The built-in [`SensorHub`] turns the same stream into
//! the per-team and stage sensor buffers handed to scripts.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::state::{GfxKind, Ship};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipDestroyed {
    pub time: u64,
    pub ship: usize,
    /// Ships credited with the kill; empty when nothing caused it
    pub destroyers: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipHitWall {
    pub time: u64,
    pub ship: usize,
    pub bounce_angle: f64,
    pub bounce_force: f64,
    pub damage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipHitShip {
    pub time: u64,
    pub ship: usize,
    pub target: usize,
    /// Direction the impulse pushed `ship`
    pub ship_angle: f64,
    pub ship_force: f64,
    /// Direction the impulse pushed `target`
    pub target_angle: f64,
    pub target_force: f64,
    pub damage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaserFired {
    pub time: u64,
    pub ship: usize,
    pub laser: u64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaserHit {
    pub time: u64,
    pub shooter: usize,
    pub target: usize,
    pub laser: u64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub damage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorpedoFired {
    pub time: u64,
    pub ship: usize,
    pub torpedo: u64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorpedoExploded {
    pub time: u64,
    pub ship: usize,
    pub torpedo: u64,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorpedoHit {
    pub time: u64,
    pub shooter: usize,
    pub target: usize,
    pub torpedo: u64,
    pub hit_angle: f64,
    pub hit_force: f64,
    pub damage: f64,
}

/// Everything the world reports to collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArenaEvent {
    ShipDestroyed(ShipDestroyed),
    ShipHitWall(ShipHitWall),
    ShipHitShip(ShipHitShip),
    ShipFiredLaser(LaserFired),
    LaserHitShip(LaserHit),
    LaserDestroyed { time: u64, laser: u64 },
    ShipFiredTorpedo(TorpedoFired),
    TorpedoExploded(TorpedoExploded),
    TorpedoHitShip(TorpedoHit),
    TorpedoDestroyed { time: u64, torpedo: u64 },
    StageText { time: u64, text: String, x: f64, y: f64 },
    /// `team` is None for the stage's own graphics
    TooManyUserGfx { team: Option<usize>, kind: GfxKind },
}

/// Receiver for world events; override only what you need
pub trait EventHandler {
    fn ship_destroyed(&mut self, _event: &ShipDestroyed) {}
    fn ship_hit_wall(&mut self, _event: &ShipHitWall) {}
    fn ship_hit_ship(&mut self, _event: &ShipHitShip) {}
    fn ship_fired_laser(&mut self, _event: &LaserFired) {}
    fn laser_hit_ship(&mut self, _event: &LaserHit) {}
    fn laser_destroyed(&mut self, _time: u64, _laser: u64) {}
    fn ship_fired_torpedo(&mut self, _event: &TorpedoFired) {}
    fn torpedo_exploded(&mut self, _event: &TorpedoExploded) {}
    fn torpedo_hit_ship(&mut self, _event: &TorpedoHit) {}
    fn torpedo_destroyed(&mut self, _time: u64, _torpedo: u64) {}
    fn stage_text(&mut self, _time: u64, _text: &str, _x: f64, _y: f64) {}
    fn too_many_user_gfx(&mut self, _team: Option<usize>, _kind: GfxKind) {}

    /// Dispatch to the per-kind method
    fn handle(&mut self, event: &ArenaEvent) {
        match event {
            ArenaEvent::ShipDestroyed(e) => self.ship_destroyed(e),
            ArenaEvent::ShipHitWall(e) => self.ship_hit_wall(e),
            ArenaEvent::ShipHitShip(e) => self.ship_hit_ship(e),
            ArenaEvent::ShipFiredLaser(e) => self.ship_fired_laser(e),
            ArenaEvent::LaserHitShip(e) => self.laser_hit_ship(e),
            ArenaEvent::LaserDestroyed { time, laser } => self.laser_destroyed(*time, *laser),
            ArenaEvent::ShipFiredTorpedo(e) => self.ship_fired_torpedo(e),
            ArenaEvent::TorpedoExploded(e) => self.torpedo_exploded(e),
            ArenaEvent::TorpedoHitShip(e) => self.torpedo_hit_ship(e),
            ArenaEvent::TorpedoDestroyed { time, torpedo } => {
                self.torpedo_destroyed(*time, *torpedo)
            }
            ArenaEvent::StageText { time, text, x, y } => self.stage_text(*time, text, *x, *y),
            ArenaEvent::TooManyUserGfx { team, kind } => self.too_many_user_gfx(*team, *kind),
        }
    }
}

/// Records every event into a shared list, for replay writers and tests
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<ArenaEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the recorded events
    pub fn events(&self) -> Rc<RefCell<Vec<ArenaEvent>>> {
        Rc::clone(&self.events)
    }
}

impl EventHandler for EventLog {
    fn handle(&mut self, event: &ArenaEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

/// Sensor buffers for one team, filled between two `run` calls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSensors {
    pub hit_by_ship: Vec<ShipHitShip>,
    pub hit_by_laser: Vec<LaserHit>,
    pub hit_by_torpedo: Vec<TorpedoHit>,
    pub hit_wall: Vec<ShipHitWall>,
    pub ship_destroyed: Vec<ShipDestroyed>,
    pub ship_fired_laser: Vec<LaserFired>,
    pub ship_fired_torpedo: Vec<TorpedoFired>,
    pub laser_hit_ship: Vec<LaserHit>,
    pub stage_events: Vec<String>,
}

/// Sensor buffers for the stage, which sees everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSensors {
    pub ship_hit_ship: Vec<ShipHitShip>,
    pub laser_hit_ship: Vec<LaserHit>,
    pub torpedo_hit_ship: Vec<TorpedoHit>,
    pub ship_hit_wall: Vec<ShipHitWall>,
    pub ship_destroyed: Vec<ShipDestroyed>,
    pub ship_fired_laser: Vec<LaserFired>,
    pub ship_fired_torpedo: Vec<TorpedoFired>,
}

/// Routes events into team and stage sensors, honoring team vision
#[derive(Debug, Clone, Default)]
pub struct SensorHub {
    pub teams: Vec<TeamSensors>,
    pub stage: StageSensors,
}

impl SensorHub {
    pub fn new(num_teams: usize) -> Self {
        Self {
            teams: vec![TeamSensors::default(); num_teams],
            stage: StageSensors::default(),
        }
    }

    /// File one event; `vision[team][ship]` says whether a team can see a ship
    pub fn record(&mut self, event: &ArenaEvent, ships: &[Ship], vision: &[Vec<bool>]) {
        let team_of = |ship: usize| ships.get(ship).map(|s| s.team_index);
        let sees = |team: usize, ship: usize| {
            vision.get(team).and_then(|v| v.get(ship)).copied().unwrap_or(false)
        };
        match event {
            ArenaEvent::ShipHitShip(e) => {
                let a = team_of(e.ship);
                let b = team_of(e.target);
                if let Some(t) = a.and_then(|t| self.teams.get_mut(t)) {
                    t.hit_by_ship.push(e.clone());
                }
                if b != a {
                    if let Some(t) = b.and_then(|t| self.teams.get_mut(t)) {
                        t.hit_by_ship.push(e.clone());
                    }
                }
                self.stage.ship_hit_ship.push(e.clone());
            }
            ArenaEvent::LaserHitShip(e) => {
                if let Some(t) = team_of(e.target).and_then(|t| self.teams.get_mut(t)) {
                    t.hit_by_laser.push(e.clone());
                }
                if let Some(t) = team_of(e.shooter).and_then(|t| self.teams.get_mut(t)) {
                    t.laser_hit_ship.push(e.clone());
                }
                self.stage.laser_hit_ship.push(e.clone());
            }
            ArenaEvent::TorpedoHitShip(e) => {
                if let Some(t) = team_of(e.target).and_then(|t| self.teams.get_mut(t)) {
                    t.hit_by_torpedo.push(e.clone());
                }
                self.stage.torpedo_hit_ship.push(e.clone());
            }
            ArenaEvent::ShipHitWall(e) => {
                if let Some(t) = team_of(e.ship).and_then(|t| self.teams.get_mut(t)) {
                    t.hit_wall.push(e.clone());
                }
                self.stage.ship_hit_wall.push(e.clone());
            }
            ArenaEvent::ShipDestroyed(e) => {
                let owner = team_of(e.ship);
                for (i, t) in self.teams.iter_mut().enumerate() {
                    if owner == Some(i) || sees(i, e.ship) {
                        t.ship_destroyed.push(e.clone());
                    }
                }
                self.stage.ship_destroyed.push(e.clone());
            }
            ArenaEvent::ShipFiredLaser(e) => {
                let owner = team_of(e.ship);
                for (i, t) in self.teams.iter_mut().enumerate() {
                    if owner != Some(i) && sees(i, e.ship) {
                        t.ship_fired_laser.push(e.clone());
                    }
                }
                self.stage.ship_fired_laser.push(e.clone());
            }
            ArenaEvent::ShipFiredTorpedo(e) => {
                let owner = team_of(e.ship);
                for (i, t) in self.teams.iter_mut().enumerate() {
                    if owner != Some(i) && sees(i, e.ship) {
                        t.ship_fired_torpedo.push(e.clone());
                    }
                }
                self.stage.ship_fired_torpedo.push(e.clone());
            }
            _ => {}
        }
    }

    /// Message from the stage to one team
    pub fn push_stage_event(&mut self, team: usize, text: impl Into<String>) {
        if let Some(t) = self.teams.get_mut(team) {
            t.stage_events.push(text.into());
        }
    }

    /// Hand a team its buffered sensors and start a fresh buffer
    pub fn take_team(&mut self, team: usize) -> TeamSensors {
        self.teams.get_mut(team).map(std::mem::take).unwrap_or_default()
    }

    pub fn take_stage(&mut self) -> StageSensors {
        std::mem::take(&mut self.stage)
    }

    pub fn clear(&mut self) {
        self.teams.iter_mut().for_each(|t| *t = TeamSensors::default());
        self.stage = StageSensors::default();
    }
}

/// Logs kills and graphics overflows through `log`
///
/// Names are captured when the handler is created, after ship names are final.
#[derive(Debug, Clone)]
pub struct ConsoleHandler {
    ship_names: Vec<String>,
    ship_teams: Vec<usize>,
    team_names: Vec<String>,
    reported_gfx: HashSet<(Option<usize>, GfxKind)>,
}

impl ConsoleHandler {
    pub fn new(ship_names: Vec<String>, ship_teams: Vec<usize>, team_names: Vec<String>) -> Self {
        Self {
            ship_names,
            ship_teams,
            team_names,
            reported_gfx: HashSet::new(),
        }
    }

    fn ship_name(&self, index: usize) -> &str {
        self.ship_names.get(index).map(String::as_str).unwrap_or("?")
    }
}

impl EventHandler for ConsoleHandler {
    fn ship_destroyed(&mut self, event: &ShipDestroyed) {
        let victim = self.ship_name(event.ship);
        if event.destroyers.is_empty() {
            log::info!("== {} destroyed @ {}", victim, event.time);
        }
        for &destroyer in &event.destroyers {
            let name = self.ship_name(destroyer);
            if destroyer == event.ship {
                log::info!("== {} destroyed itself @ {}", name, event.time);
                continue;
            }
            let friendly = self.ship_teams.get(destroyer) == self.ship_teams.get(event.ship);
            log::info!(
                "== {} destroyed {} ship: {} @ {}",
                name,
                if friendly { "friendly" } else { "enemy" },
                victim,
                event.time
            );
            log::info!("== {} destroyed by: {} @ {}", victim, name, event.time);
        }
    }

    fn too_many_user_gfx(&mut self, team: Option<usize>, kind: GfxKind) {
        if !self.reported_gfx.insert((team, kind)) {
            return;
        }
        let owner = match team {
            Some(t) => self.team_names.get(t).map(String::as_str).unwrap_or("?"),
            None => "stage",
        };
        log::warn!("{owner}: too many user graphics {}, further ones are dropped", kind.as_str());
    }

    fn stage_text(&mut self, time: u64, text: &str, _x: f64, _y: f64) {
        log::debug!("stage text @ {time}: {text}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ships() -> Vec<Ship> {
        // Ships 0 and 1 on team 0, ship 2 on team 1
        vec![Ship::new(0, 0, true), Ship::new(1, 0, true), Ship::new(2, 1, true)]
    }

    #[test]
    fn test_fired_laser_needs_vision() {
        let ships = ships();
        let mut hub = SensorHub::new(2);
        let fired = ArenaEvent::ShipFiredLaser(LaserFired {
            time: 1,
            ship: 2,
            laser: 7,
            x: 0.0,
            y: 0.0,
            heading: 0.0,
        });
        let blind = vec![vec![false; 3], vec![false; 3]];
        hub.record(&fired, &ships, &blind);
        assert!(hub.teams[0].ship_fired_laser.is_empty());
        assert_eq!(hub.stage.ship_fired_laser.len(), 1);

        let seeing = vec![vec![false, false, true], vec![false; 3]];
        hub.record(&fired, &ships, &seeing);
        assert_eq!(hub.teams[0].ship_fired_laser.len(), 1);
        // Never reported to the firing team
        assert!(hub.teams[1].ship_fired_laser.is_empty());
    }

    #[test]
    fn test_laser_hit_goes_to_both_sides() {
        let ships = ships();
        let mut hub = SensorHub::new(2);
        let hit = ArenaEvent::LaserHitShip(LaserHit {
            time: 3,
            shooter: 0,
            target: 2,
            laser: 1,
            x: 0.0,
            y: 0.0,
            heading: 0.0,
            damage: 4.0,
        });
        hub.record(&hit, &ships, &[]);
        assert_eq!(hub.teams[0].laser_hit_ship.len(), 1);
        assert_eq!(hub.teams[1].hit_by_laser.len(), 1);
        let taken = hub.take_team(1);
        assert_eq!(taken.hit_by_laser.len(), 1);
        assert!(hub.teams[1].hit_by_laser.is_empty());
    }

    #[test]
    fn test_friendly_collision_recorded_once() {
        let ships = ships();
        let mut hub = SensorHub::new(2);
        let hit = ArenaEvent::ShipHitShip(ShipHitShip {
            time: 1,
            ship: 0,
            target: 1,
            ship_angle: 0.0,
            ship_force: 1.0,
            target_angle: 0.0,
            target_force: 1.0,
            damage: 0.0,
        });
        hub.record(&hit, &ships, &[]);
        assert_eq!(hub.teams[0].hit_by_ship.len(), 1);
        assert!(hub.teams[1].hit_by_ship.is_empty());
    }

    #[test]
    fn test_event_log_shares_events() {
        let mut log = EventLog::new();
        let events = log.events();
        log.handle(&ArenaEvent::LaserDestroyed { time: 1, laser: 9 });
        assert_eq!(events.borrow().len(), 1);
    }
}
