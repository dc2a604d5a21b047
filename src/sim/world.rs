//! The arena and everything in it
//!
//! `World` owns the stage layout, every ship and team, live projectiles and
//! user graphics. It exposes the operations scripts and the stage drive
//! (placement, firing, zone queries, graphics) and fans every physics event
//! out to the sensor hub and the registered handlers.

use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use super::collision::{ArenaBounds, move_and_check_collisions};
use super::events::{ArenaEvent, EventHandler, LaserFired, SensorHub, ShipDestroyed, TorpedoFired};
use super::geometry::{Circle2D, Line2D, Rect, Wall, Zone, has_vision};
use super::physics::PhysicsRules;
use super::state::{
    GfxPrimitive, Laser, Rgba, Ship, ShipProperties, StageText, Team, Torpedo, UserGfx,
};
use crate::consts::*;
use crate::limit;
use crate::results::{Standings, TeamResult};

/// Perturbation attempts from one candidate before drawing a fresh one
const PLACEMENT_ATTEMPTS: usize = 1000;
/// Fresh candidates tried before giving up on a clear spot
const PLACEMENT_RESTARTS: usize = 100;

pub struct World {
    pub width: f64,
    pub height: f64,
    /// Inner walls followed by the four out-of-bounds walls once built
    pub walls: Vec<Wall>,
    /// Arena boundary followed by inner wall edges
    pub wall_lines: Vec<Line2D>,
    pub inner_wall_lines: Vec<Line2D>,
    pub zones: Vec<Zone>,
    pub starts: Vec<DVec2>,
    start_index: usize,
    /// Stage-ship scripts declared during configure, relative to the stage
    pub stage_ship_paths: Vec<String>,
    base_walls_built: bool,

    pub ships: Vec<Ship>,
    /// State at the start of the tick, before scripts ran
    pub old_ships: Vec<Ship>,
    /// State at the start of the previous tick
    pub prev_ships: Vec<Ship>,
    pub properties: Vec<ShipProperties>,
    pub teams: Vec<Team>,

    pub lasers: Vec<Laser>,
    pub torpedoes: Vec<Torpedo>,
    next_laser_id: u64,
    next_torpedo_id: u64,

    pub stage_gfx: UserGfx,
    pub stage_texts: Vec<StageText>,
    pub user_gfx_enabled: bool,

    pub rules: PhysicsRules,
    pub battle_mode: bool,
    pub time: u64,
    /// `team_vision[team][ship]`: the team sees that enemy ship this tick
    pub team_vision: Vec<Vec<bool>>,
    /// True once this tick's physics pass has run
    pub physics_over: bool,

    pub sensors: SensorHub,
    /// Stage-reported results, indexed by team
    pub results: Vec<TeamResult>,
    pub standings: Standings,
    pub round_over: bool,
    pub game_over: bool,

    rng: Pcg32,
    handlers: Vec<Box<dyn EventHandler>>,
}

impl World {
    pub fn new(seed: u64, rules: PhysicsRules, battle_mode: bool) -> Self {
        Self {
            width: DEFAULT_ARENA_WIDTH,
            height: DEFAULT_ARENA_HEIGHT,
            walls: Vec::new(),
            wall_lines: Vec::new(),
            inner_wall_lines: Vec::new(),
            zones: Vec::new(),
            starts: Vec::new(),
            start_index: 0,
            stage_ship_paths: Vec::new(),
            base_walls_built: false,
            ships: Vec::new(),
            old_ships: Vec::new(),
            prev_ships: Vec::new(),
            properties: Vec::new(),
            teams: Vec::new(),
            lasers: Vec::new(),
            torpedoes: Vec::new(),
            next_laser_id: 0,
            next_torpedo_id: 0,
            stage_gfx: UserGfx::default(),
            stage_texts: Vec::new(),
            user_gfx_enabled: true,
            rules,
            battle_mode,
            time: 0,
            team_vision: Vec::new(),
            physics_over: false,
            sensors: SensorHub::default(),
            results: Vec::new(),
            standings: Standings::new(),
            round_over: false,
            game_over: false,
            rng: Pcg32::seed_from_u64(seed),
            handlers: Vec::new(),
        }
    }

    pub fn add_event_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Route one event to the sensors and every handler
    pub fn emit(&mut self, event: ArenaEvent) {
        self.sensors.record(&event, &self.ships, &self.team_vision);
        for handler in self.handlers.iter_mut() {
            handler.handle(&event);
        }
    }

    // Stage layout

    pub fn set_size(&mut self, width: f64, height: f64) {
        self.width = width.max(SHIP_SIZE);
        self.height = height.max(SHIP_SIZE);
    }

    pub fn add_wall(&mut self, left: f64, bottom: f64, width: f64, height: f64) -> bool {
        if self.inner_wall_lines.len() / 4 >= MAX_WALLS {
            return false;
        }
        let wall = Wall::new(left, bottom, width, height);
        self.inner_wall_lines.extend_from_slice(&wall.lines());
        self.walls.push(wall);
        true
    }

    pub fn add_zone(&mut self, left: f64, bottom: f64, width: f64, height: f64, tag: &str) -> bool {
        if self.zones.len() >= MAX_ZONES {
            return false;
        }
        self.zones.push(Zone::new(left, bottom, width, height, tag));
        true
    }

    pub fn add_start(&mut self, x: f64, y: f64) -> bool {
        if self.starts.len() >= MAX_STARTS {
            return false;
        }
        self.starts.push(DVec2::new(x, y));
        true
    }

    pub fn add_stage_ship(&mut self, path: &str) -> bool {
        if self.stage_ship_paths.len() >= MAX_STAGE_SHIPS {
            return false;
        }
        self.stage_ship_paths.push(path.replace('\\', "/"));
        true
    }

    /// Close the arena: out-of-bounds walls plus the four boundary lines
    pub fn build_base_walls(&mut self) {
        if self.base_walls_built {
            return;
        }
        let (w, h) = (self.width, self.height);
        self.walls.extend([
            Wall::new(-4.0, -4.0, 4.0, h + 8.0),
            Wall::new(w, -4.0, 4.0, h + 8.0),
            Wall::new(0.0, -4.0, w, 4.0),
            Wall::new(0.0, h, w, 4.0),
        ]);
        self.wall_lines = Rect::new(0.0, 0.0, w, h).lines().to_vec();
        self.wall_lines.extend_from_slice(&self.inner_wall_lines);
        self.base_walls_built = true;
    }

    /// Install teams and their ships; ship indices follow team order
    pub fn set_teams(&mut self, teams: Vec<Team>, properties: Vec<ShipProperties>) {
        let mut ships = Vec::with_capacity(properties.len());
        for team in &teams {
            for index in team.ship_indices() {
                ships.push(Ship::new(index, team.index, self.battle_mode));
            }
        }
        self.sensors = SensorHub::new(teams.len());
        self.team_vision = vec![vec![false; ships.len()]; teams.len()];
        self.old_ships = ships.clone();
        self.prev_ships = ships.clone();
        self.ships = ships;
        self.properties = properties;
        self.results = teams
            .iter()
            .map(|t| TeamResult::new(t.name.clone(), !t.stage_ship))
            .collect();
        self.teams = teams;
    }

    // Placement

    /// Inside a wall rectangle or touching any wall line
    pub fn is_ship_in_wall(&self, pos: DVec2) -> bool {
        if self.walls.iter().any(|w| w.rect.contains_strict(pos)) {
            return true;
        }
        let hull = Circle2D::new(pos, SHIP_RADIUS);
        self.wall_lines.iter().any(|line| hull.intersects_line(line))
    }

    /// Overlapping any other alive ship
    pub fn is_ship_in_ship(&self, index: usize, pos: DVec2) -> bool {
        let hull = Circle2D::new(pos, SHIP_RADIUS);
        self.ships.iter().any(|s| {
            s.index != index && s.alive && hull.overlaps(&Circle2D::new(s.pos, SHIP_RADIUS))
        })
    }

    fn random_start(&mut self) -> DVec2 {
        let span_x = (self.width - SHIP_SIZE).max(f64::EPSILON);
        let span_y = (self.height - SHIP_SIZE).max(f64::EPSILON);
        DVec2::new(
            SHIP_RADIUS + self.rng.random_range(0.0..span_x),
            SHIP_RADIUS + self.rng.random_range(0.0..span_y),
        )
    }

    /// Next declared start point, or a random one once they run out
    pub fn next_start(&mut self) -> DVec2 {
        match self.starts.get(self.start_index) {
            Some(&start) => {
                self.start_index += 1;
                start
            }
            None => self.random_start(),
        }
    }

    /// Nearest clear spot reached by random nudges from `pos`
    ///
    /// When every attempt is blocked the last candidate is returned anyway,
    /// overlap included, so a crowded stage still starts.
    pub fn place_ship_safely(&mut self, index: usize, pos: DVec2) -> DVec2 {
        let mut candidate = pos;
        for _ in 0..PLACEMENT_RESTARTS {
            for _ in 0..PLACEMENT_ATTEMPTS {
                if !self.is_ship_in_wall(candidate) && !self.is_ship_in_ship(index, candidate) {
                    return candidate;
                }
                let dx = self.rng.random_range(-SHIP_RADIUS..SHIP_RADIUS);
                let dy = self.rng.random_range(-SHIP_RADIUS..SHIP_RADIUS);
                candidate = DVec2::new(
                    limit(SHIP_RADIUS, candidate.x + dx, self.width - SHIP_RADIUS),
                    limit(SHIP_RADIUS, candidate.y + dy, self.height - SHIP_RADIUS),
                );
            }
            candidate = self.random_start();
        }
        log::warn!("no clear spot found for ship {index}, placing anyway");
        candidate
    }

    /// Restore one ship's per-round state and give it a start position
    ///
    /// Stage ships are placed but stay dead until the stage revives them.
    pub fn init_ship_round(&mut self, index: usize) {
        let Some(props) = self.properties.get(index) else {
            return;
        };
        let alive = !props.disabled && !props.stage_ship;
        self.ships[index].reset_for_round(alive);
        let start = self.next_start();
        let pos = self.place_ship_safely(index, start);
        self.ships[index].pos = pos;
    }

    /// Reset every ship for a new round, placing them in index order
    pub fn init_round(&mut self) {
        for ship in self.ships.iter_mut() {
            ship.alive = false;
        }
        for index in 0..self.ships.len() {
            self.init_ship_round(index);
        }
        self.update_ships_alive();
        self.old_ships = self.ships.clone();
        self.prev_ships = self.ships.clone();
    }

    /// Start the next round: projectiles cleared, user ships reset and
    /// re-placed. Stage ships keep their state.
    pub fn next_round(&mut self) {
        self.reset();
        let user_ships: Vec<usize> = (0..self.ships.len())
            .filter(|&i| self.properties.get(i).is_some_and(|p| !p.stage_ship))
            .collect();
        for &i in &user_ships {
            self.ships[i].alive = false;
        }
        for i in user_ships {
            self.init_ship_round(i);
        }
        self.round_over = false;
        self.update_ships_alive();
        self.old_ships = self.ships.clone();
        self.prev_ships = self.ships.clone();
    }

    /// Clear projectiles and stage texts between rounds
    pub fn reset(&mut self) {
        self.start_index = 0;
        for laser in std::mem::take(&mut self.lasers) {
            self.emit(ArenaEvent::LaserDestroyed {
                time: self.time,
                laser: laser.id,
            });
        }
        for torpedo in std::mem::take(&mut self.torpedoes) {
            self.emit(ArenaEvent::TorpedoDestroyed {
                time: self.time,
                torpedo: torpedo.id,
            });
        }
        self.stage_texts.clear();
    }

    // Per-tick bookkeeping

    pub fn update_ships_alive(&mut self) {
        for team in self.teams.iter_mut() {
            team.ships_alive = self.ships[team.ship_indices()].iter().filter(|s| s.alive).count();
        }
    }

    /// A team sees an enemy ship if any of its alive ships has a clear line to it
    pub fn update_team_vision(&mut self) {
        for (t, team) in self.teams.iter().enumerate() {
            for (s, target) in self.ships.iter().enumerate() {
                let visible = t != target.team_index
                    && target.alive
                    && team.ships_alive > 0
                    && self.ships[team.ship_indices()].iter().any(|own| {
                        let sight = Line2D::from_points(own.pos, target.pos);
                        own.alive && has_vision(&sight, &self.inner_wall_lines)
                    });
                self.team_vision[t][s] = visible;
            }
        }
    }

    /// Roll snapshots: previous <- old, old <- current
    pub fn roll_snapshots(&mut self) {
        self.prev_ships = std::mem::replace(&mut self.old_ships, self.ships.clone());
    }

    pub fn clear_stale(&mut self) {
        let time = self.time;
        for team in self.teams.iter_mut() {
            team.gfx.clear_stale(time);
        }
        self.stage_gfx.clear_stale(time);
        self.stage_texts.retain(|t| !t.is_stale(time));
    }

    /// Move everything through one tick and report what happened
    pub fn run_physics(&mut self) {
        let bounds = ArenaBounds {
            wall_lines: &self.wall_lines,
            inner_lines: &self.inner_wall_lines,
        };
        let events = move_and_check_collisions(
            &mut self.ships,
            &mut self.lasers,
            &mut self.torpedoes,
            &bounds,
            &self.rules,
            self.time,
        );
        for event in events {
            self.emit(event);
        }
        self.physics_over = true;
    }

    /// Enemy ships the team can see, from the start-of-tick snapshot
    pub fn visible_enemies(&self, team: usize) -> Vec<usize> {
        self.team_vision
            .get(team)
            .map(|row| row.iter().enumerate().filter(|(_, v)| **v).map(|(i, _)| i).collect())
            .unwrap_or_default()
    }

    // Ship actions

    pub fn fire_thruster(&mut self, index: usize, angle: f64, force: f64) {
        let ship = &mut self.ships[index];
        if ship.alive && ship.thruster_enabled {
            ship.thruster_angle = angle;
            ship.thruster_force = limit(0.0, force, MAX_THRUSTER_FORCE);
        }
    }

    /// Request a laser shot; returns whether the gun fired
    ///
    /// A shot whose first segment is blocked still heats the gun but
    /// creates no bolt.
    pub fn fire_laser(&mut self, index: usize, heading: f64) -> bool {
        let ship = &self.ships[index];
        if !ship.alive
            || !ship.laser_enabled
            || ship.laser_gun_heat > 0
            || self.lasers.len() >= MAX_LASERS
        {
            return false;
        }
        let src = ship.pos;
        self.ships[index].laser_gun_heat = LASER_HEAT;
        let laser = Laser::new(self.next_laser_id, index, self.time, src, heading);
        if !has_vision(&laser.line(), &self.inner_wall_lines) {
            return true;
        }
        self.next_laser_id += 1;
        let event = ArenaEvent::ShipFiredLaser(LaserFired {
            time: self.time,
            ship: index,
            laser: laser.id,
            x: src.x,
            y: src.y,
            heading,
        });
        self.lasers.push(laser);
        self.emit(event);
        true
    }

    pub fn fire_torpedo(&mut self, index: usize, heading: f64, distance: f64) -> bool {
        let ship = &self.ships[index];
        if !ship.alive
            || !ship.torpedo_enabled
            || ship.torpedo_gun_heat > 0
            || ship.torpedo_ammo == 0
            || self.torpedoes.len() >= MAX_TORPEDOES
        {
            return false;
        }
        let src = ship.pos;
        let ship = &mut self.ships[index];
        ship.torpedo_ammo -= 1;
        ship.torpedo_gun_heat = TORPEDO_HEAT;
        let distance = distance.max(0.0);
        let torpedo = Torpedo::new(self.next_torpedo_id, index, self.time, src, heading, distance);
        self.next_torpedo_id += 1;
        let event = ArenaEvent::ShipFiredTorpedo(TorpedoFired {
            time: self.time,
            ship: index,
            torpedo: torpedo.id,
            x: src.x,
            y: src.y,
            heading,
            distance: torpedo.distance,
        });
        self.torpedoes.push(torpedo);
        self.emit(event);
        true
    }

    /// Move power into shields; returns the amount moved
    pub fn charge_shields(&mut self, index: usize, amount: f64) -> f64 {
        let ship = &mut self.ships[index];
        if !ship.alive || !ship.shields_enabled || !ship.power_enabled {
            return 0.0;
        }
        let moved = limit(0.0, amount, ship.power);
        ship.power -= moved;
        ship.shields += moved;
        moved
    }

    // Zones

    fn zones_tagged<'a>(&'a self, tag: Option<&'a str>) -> impl Iterator<Item = &'a Zone> + 'a {
        self.zones.iter().filter(move |z| tag.is_none_or(|t| z.tag == t))
    }

    /// Whether the ship is inside a zone with `tag` (any zone if None)
    pub fn in_zone(&self, index: usize, tag: Option<&str>) -> bool {
        let pos = self.ships[index].pos;
        self.zones_tagged(tag).any(|z| z.contains(pos))
    }

    /// Whether the ship entered or crossed a zone during the last movement
    ///
    /// Before this tick's physics has run, the last movement is the one
    /// between the previous and the old snapshot.
    pub fn touched_zone(&self, index: usize, tag: Option<&str>) -> bool {
        let (from, to) = if self.physics_over {
            (self.old_ships[index].pos, self.ships[index].pos)
        } else {
            (self.prev_ships[index].pos, self.old_ships[index].pos)
        };
        self.zones_tagged(tag).any(|z| z.touched(from, to))
    }

    // Graphics

    /// Record a primitive for a team (or the stage when `team` is None)
    ///
    /// Over the cap the primitive is dropped, the team is flagged errored
    /// and a [`ArenaEvent::TooManyUserGfx`] is emitted.
    pub fn add_gfx(&mut self, team: Option<usize>, primitive: GfxPrimitive) -> bool {
        if !self.user_gfx_enabled {
            return true;
        }
        let kind = primitive.kind();
        let accepted = match team {
            Some(t) => self.teams.get_mut(t).is_some_and(|team| team.gfx.push(primitive)),
            None => self.stage_gfx.push(primitive),
        };
        if !accepted {
            if let Some(t) = team.and_then(|t| self.teams.get_mut(t)) {
                t.errored = true;
            }
            self.emit(ArenaEvent::TooManyUserGfx { team, kind });
        }
        accepted
    }

    pub fn add_stage_text(
        &mut self,
        text: &str,
        x: f64,
        y: f64,
        font_size: u32,
        color: Rgba,
        draw_ticks: u64,
    ) -> bool {
        if self.stage_texts.len() >= MAX_STAGE_TEXTS {
            return false;
        }
        self.stage_texts.push(StageText {
            text: text.to_string(),
            pos: DVec2::new(x, y),
            font_size,
            color,
            start_time: self.time,
            draw_ticks,
        });
        self.emit(ArenaEvent::StageText {
            time: self.time,
            text: text.to_string(),
            x,
            y,
        });
        true
    }

    // Stage admin

    /// Kill a ship outside of combat; reported with no destroyers
    pub fn destroy_ship(&mut self, index: usize) {
        if let Some(ship) = self.ships.get_mut(index).filter(|s| s.alive) {
            ship.alive = false;
            self.emit(ArenaEvent::ShipDestroyed(ShipDestroyed {
                time: self.time,
                ship: index,
                destroyers: Vec::new(),
            }));
        }
    }

    /// Set a ship's energy; at or below zero the ship is destroyed
    pub fn set_ship_energy(&mut self, index: usize, energy: f64) {
        let Some(ship) = self.ships.get_mut(index) else {
            return;
        };
        ship.energy = energy;
        if energy <= 0.0 {
            self.destroy_ship(index);
        }
    }

    /// Bring a dead ship back at a clear spot near where it died
    pub fn revive_ship(&mut self, index: usize) {
        let Some(ship) = self.ships.get(index) else {
            return;
        };
        if ship.alive || self.properties.get(index).is_some_and(|p| p.disabled) {
            return;
        }
        let last_pos = ship.pos;
        let pos = self.place_ship_safely(index, last_pos);
        let ship = &mut self.ships[index];
        ship.pos = pos;
        ship.alive = true;
        if ship.energy <= 0.0 {
            ship.energy = DEFAULT_ENERGY;
        }
    }

    pub fn move_ship(&mut self, index: usize, x: f64, y: f64) {
        if index < self.ships.len() {
            let pos = self.place_ship_safely(index, DVec2::new(x, y));
            self.ships[index].pos = pos;
        }
    }

    pub fn team_index(&self, name: &str) -> Option<usize> {
        self.teams.iter().position(|t| t.name == name)
    }

    /// Rename a team, keeping its result entry in step
    pub fn rename_team(&mut self, team: usize, name: &str) {
        if let Some(t) = self.teams.get_mut(team) {
            t.name = name.to_string();
        }
        if let Some(r) = self.results.get_mut(team) {
            r.name = name.to_string();
        }
    }

    // Results

    pub fn set_winner(&mut self, name: &str) {
        self.standings.set_winner(&self.results, name);
    }

    pub fn set_rank(&mut self, name: &str, rank: u32) {
        self.standings.set_rank(&mut self.results, name, rank);
    }

    pub fn set_score(&mut self, name: &str, score: f64) {
        self.standings.set_score(&mut self.results, name, score);
    }

    pub fn set_statistic(&mut self, name: &str, key: &str, value: f64) -> bool {
        self.standings.set_statistic(&mut self.results, name, key, value)
    }

    pub fn process_results(&mut self) {
        self.standings.process(&mut self.results);
    }
}
