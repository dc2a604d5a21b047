//! Ship, team and projectile state
//!
//! Everything the tick loop snapshots and the scripts observe lives here.
//! Ship indices are stable for the whole match; each team owns a contiguous
//! index range fixed at creation.

use std::collections::VecDeque;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use super::geometry::Line2D;
use super::physics::PhysicsModel;
use crate::consts::*;
use crate::round_to;

/// 8-bit RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(255, 255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Rgba::WHITE
    }
}

/// Fixed identity of a ship, settled once initialization completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipProperties {
    pub name: String,
    pub ship_color: Rgba,
    pub laser_color: Rgba,
    pub thruster_color: Rgba,
    pub shields_color: Rgba,
    pub stage_ship: bool,
    /// Placeholder for a team that failed to load or was disabled
    pub disabled: bool,
    /// Controlled by a script (false for placeholders)
    pub owned_by_script: bool,
}

impl ShipProperties {
    pub fn new(name: impl Into<String>, stage_ship: bool, disabled: bool) -> Self {
        Self {
            name: name.into(),
            ship_color: Rgba::WHITE,
            laser_color: Rgba::rgb(0, 255, 0),
            thruster_color: Rgba::rgb(255, 0, 0),
            shields_color: Rgba::rgb(100, 200, 255),
            stage_ship,
            disabled,
            owned_by_script: !disabled,
        }
    }
}

/// Mutable per-tick ship state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ship {
    pub index: usize,
    pub team_index: usize,
    pub pos: DVec2,
    /// Direction of travel; kept from the previous tick while stopped
    pub heading: f64,
    /// Rounded to [`SPEED_PRECISION`] decimals
    pub speed: f64,
    pub momentum: DVec2,
    pub thruster_angle: f64,
    pub thruster_force: f64,
    pub energy: f64,
    pub power: f64,
    pub shields: f64,
    pub torpedo_ammo: u32,
    pub laser_gun_heat: u32,
    pub torpedo_gun_heat: u32,
    pub hit_wall: bool,
    pub hit_ship: bool,
    pub alive: bool,
    pub laser_enabled: bool,
    pub torpedo_enabled: bool,
    pub thruster_enabled: bool,
    pub energy_enabled: bool,
    pub power_enabled: bool,
    pub shields_enabled: bool,
    pub show_name: bool,
    pub kills: f64,
    pub friendly_kills: f64,
    pub damage: f64,
    pub friendly_damage: f64,
    pub shielded_damage: f64,
}

impl Ship {
    pub fn new(index: usize, team_index: usize, battle_mode: bool) -> Self {
        Self {
            index,
            team_index,
            pos: DVec2::ZERO,
            heading: 0.0,
            speed: 0.0,
            momentum: DVec2::ZERO,
            thruster_angle: 0.0,
            thruster_force: 0.0,
            energy: DEFAULT_ENERGY,
            power: DEFAULT_POWER,
            shields: 0.0,
            torpedo_ammo: TORPEDO_AMMO,
            laser_gun_heat: LASER_HEAT,
            torpedo_gun_heat: TORPEDO_HEAT,
            hit_wall: false,
            hit_ship: false,
            alive: false,
            laser_enabled: battle_mode,
            torpedo_enabled: battle_mode,
            thruster_enabled: true,
            energy_enabled: battle_mode,
            power_enabled: battle_mode,
            shields_enabled: battle_mode,
            show_name: true,
            kills: 0.0,
            friendly_kills: 0.0,
            damage: 0.0,
            friendly_damage: 0.0,
            shielded_damage: 0.0,
        }
    }

    /// Restore the per-round fields; placement is handled by the world
    pub fn reset_for_round(&mut self, alive: bool) {
        self.alive = alive;
        self.speed = 0.0;
        self.heading = 0.0;
        self.momentum = DVec2::ZERO;
        self.thruster_angle = 0.0;
        self.thruster_force = 0.0;
        self.energy = DEFAULT_ENERGY;
        self.torpedo_ammo = TORPEDO_AMMO;
        self.laser_gun_heat = LASER_HEAT;
        self.torpedo_gun_heat = TORPEDO_HEAT;
        self.hit_wall = false;
        self.hit_ship = false;
        self.power = DEFAULT_POWER;
        self.shields = 0.0;
    }

    /// Per-tick cooldowns and regeneration, applied before the team's `run`
    pub fn begin_tick(&mut self) {
        self.thruster_force = 0.0;
        self.laser_gun_heat = self.laser_gun_heat.saturating_sub(1);
        self.torpedo_gun_heat = self.torpedo_gun_heat.saturating_sub(1);
        self.power = DEFAULT_POWER.min(self.power + POWER_REGEN);
        self.shields *= SHIELDS_DECAY;
    }

    /// Apply hull damage through shields; returns energy actually lost
    ///
    /// Ships with energy disabled take no damage. Energy at or below zero
    /// kills the ship immediately.
    pub fn take_damage(&mut self, amount: f64) -> f64 {
        if !self.energy_enabled || amount <= 0.0 || !self.alive {
            return 0.0;
        }
        let mut remaining = amount;
        if self.shields_enabled && self.shields > 0.0 {
            let absorbed = self.shields.min(remaining);
            self.shields -= absorbed;
            self.shielded_damage += absorbed;
            remaining -= absorbed;
        }
        self.energy -= remaining;
        if self.energy <= 0.0 {
            self.alive = false;
        }
        remaining
    }

    /// Recompute speed and heading from momentum
    ///
    /// Speed is rounded so scripts can compare it to zero; a stopped ship
    /// keeps its previous heading and drops any residual momentum.
    pub fn sync_motion(&mut self, model: &PhysicsModel) {
        let velocity = model.velocity(self.momentum);
        self.speed = round_to(velocity.length(), SPEED_PRECISION);
        if self.speed.abs() < 1e-6 {
            self.speed = 0.0;
            self.momentum = DVec2::ZERO;
        } else {
            self.heading = velocity.y.atan2(velocity.x);
        }
    }

    /// Set speed and heading directly (stage admin)
    pub fn set_velocity(&mut self, model: &PhysicsModel, speed: f64, heading: f64) {
        let v = DVec2::from_angle(heading) * speed.max(0.0);
        self.momentum = model.momentum(v);
        self.heading = heading;
        self.sync_motion(model);
    }
}

/// A laser bolt; `pos` is the leading tip, `delta` the per-tick displacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Laser {
    pub id: u64,
    pub ship_index: usize,
    pub fire_time: u64,
    pub src: DVec2,
    pub pos: DVec2,
    pub heading: f64,
    pub delta: DVec2,
    pub dead: bool,
}

impl Laser {
    /// A bolt whose first segment runs from `src` one laser step along `heading`
    pub fn new(id: u64, ship_index: usize, fire_time: u64, src: DVec2, heading: f64) -> Self {
        let delta = DVec2::from_angle(heading) * LASER_SPEED;
        Self {
            id,
            ship_index,
            fire_time,
            src,
            pos: src + delta,
            heading,
            delta,
            dead: false,
        }
    }

    /// Segment covered during the last tick
    pub fn line(&self) -> Line2D {
        Line2D::from_points(self.pos - self.delta, self.pos)
    }
}

/// A torpedo flying to a commanded distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Torpedo {
    pub id: u64,
    pub ship_index: usize,
    pub fire_time: u64,
    pub src: DVec2,
    pub pos: DVec2,
    pub heading: f64,
    pub distance: f64,
    pub distance_traveled: f64,
}

impl Torpedo {
    /// Spawned at the hull edge, so the hull counts toward the distance flown
    pub fn new(
        id: u64,
        ship_index: usize,
        fire_time: u64,
        src: DVec2,
        heading: f64,
        distance: f64,
    ) -> Self {
        Self {
            id,
            ship_index,
            fire_time,
            src,
            pos: src + DVec2::from_angle(heading) * SHIP_RADIUS,
            heading,
            distance,
            distance_traveled: SHIP_RADIUS,
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.distance - self.distance_traveled).max(0.0)
    }

    pub fn advance(&mut self, dist: f64) {
        self.pos += DVec2::from_angle(self.heading) * dist;
        self.distance_traveled += dist;
    }
}

/// Rolling CPU time samples for one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub samples: Vec<u64>,
    pub total_micros: u64,
    pub total_calls: u64,
}

impl Default for CpuUsage {
    fn default() -> Self {
        Self {
            samples: vec![0; CPU_TIME_TICKS],
            total_micros: 0,
            total_calls: 0,
        }
    }
}

impl CpuUsage {
    pub fn record(&mut self, micros: u64) {
        let slot = (self.total_calls % CPU_TIME_TICKS as u64) as usize;
        self.samples[slot] = micros;
        self.total_micros += micros;
        self.total_calls += 1;
    }

    pub fn average_micros(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_micros as f64 / self.total_calls as f64
        }
    }
}

/// Kinds of user graphics, each with its own cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GfxKind {
    Rectangle,
    Line,
    Circle,
    Text,
}

impl GfxKind {
    pub fn cap(&self) -> usize {
        match self {
            GfxKind::Rectangle => MAX_USER_RECTANGLES,
            GfxKind::Line => MAX_USER_LINES,
            GfxKind::Circle => MAX_USER_CIRCLES,
            GfxKind::Text => MAX_USER_TEXTS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GfxKind::Rectangle => "rectangles",
            GfxKind::Line => "lines",
            GfxKind::Circle => "circles",
            GfxKind::Text => "texts",
        }
    }
}

/// Fill and outline shared by shape primitives
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeStyle {
    pub fill: Rgba,
    pub outline_thickness: f64,
    pub outline: Rgba,
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            fill: Rgba::WHITE,
            outline_thickness: 0.0,
            outline: Rgba::WHITE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GfxRectangle {
    pub left: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub style: ShapeStyle,
    pub start_time: u64,
    pub draw_ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GfxLine {
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub length: f64,
    pub thickness: f64,
    pub style: ShapeStyle,
    pub start_time: u64,
    pub draw_ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GfxCircle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub style: ShapeStyle,
    pub start_time: u64,
    pub draw_ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GfxText {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: u32,
    pub color: Rgba,
    pub start_time: u64,
    pub draw_ticks: u64,
}

/// Any user graphics primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GfxPrimitive {
    Rectangle(GfxRectangle),
    Line(GfxLine),
    Circle(GfxCircle),
    Text(GfxText),
}

impl GfxPrimitive {
    pub fn kind(&self) -> GfxKind {
        match self {
            GfxPrimitive::Rectangle(_) => GfxKind::Rectangle,
            GfxPrimitive::Line(_) => GfxKind::Line,
            GfxPrimitive::Circle(_) => GfxKind::Circle,
            GfxPrimitive::Text(_) => GfxKind::Text,
        }
    }
}

/// One owner's transient graphics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserGfx {
    pub rectangles: Vec<GfxRectangle>,
    pub lines: Vec<GfxLine>,
    pub circles: Vec<GfxCircle>,
    pub texts: Vec<GfxText>,
}

impl UserGfx {
    pub fn count(&self, kind: GfxKind) -> usize {
        match kind {
            GfxKind::Rectangle => self.rectangles.len(),
            GfxKind::Line => self.lines.len(),
            GfxKind::Circle => self.circles.len(),
            GfxKind::Text => self.texts.len(),
        }
    }

    /// Store a primitive; false when its kind is at capacity
    pub fn push(&mut self, primitive: GfxPrimitive) -> bool {
        if self.count(primitive.kind()) >= primitive.kind().cap() {
            return false;
        }
        match primitive {
            GfxPrimitive::Rectangle(g) => self.rectangles.push(g),
            GfxPrimitive::Line(g) => self.lines.push(g),
            GfxPrimitive::Circle(g) => self.circles.push(g),
            GfxPrimitive::Text(g) => self.texts.push(g),
        }
        true
    }

    /// Drop everything whose draw window has ended by `time`
    pub fn clear_stale(&mut self, time: u64) {
        let live = |start: u64, ticks: u64| start.saturating_add(ticks) > time;
        self.rectangles.retain(|g| live(g.start_time, g.draw_ticks));
        self.lines.retain(|g| live(g.start_time, g.draw_ticks));
        self.circles.retain(|g| live(g.start_time, g.draw_ticks));
        self.texts.retain(|g| live(g.start_time, g.draw_ticks));
    }

    pub fn is_empty(&self) -> bool {
        self.rectangles.is_empty()
            && self.lines.is_empty()
            && self.circles.is_empty()
            && self.texts.is_empty()
    }
}

/// Text the stage shows on the arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageText {
    pub text: String,
    pub pos: DVec2,
    pub font_size: u32,
    pub color: Rgba,
    pub start_time: u64,
    pub draw_ticks: u64,
}

impl StageText {
    pub fn is_stale(&self, time: u64) -> bool {
        self.start_time.saturating_add(self.draw_ticks) <= time
    }
}

/// A group of ships controlled by one script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub index: usize,
    pub name: String,
    /// Name the script was loaded under
    pub source: String,
    pub first_ship_index: usize,
    pub num_ships: usize,
    pub ships_alive: usize,
    pub stage_ship: bool,
    pub disabled: bool,
    pub errored: bool,
    pub has_round_over: bool,
    pub has_game_over: bool,
    pub cpu: CpuUsage,
    pub gfx: UserGfx,
    /// Most recent script output and error lines
    pub console: VecDeque<String>,
}

impl Team {
    pub fn new(
        index: usize,
        name: impl Into<String>,
        source: impl Into<String>,
        first_ship_index: usize,
        num_ships: usize,
        stage_ship: bool,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            source: source.into(),
            first_ship_index,
            num_ships,
            ships_alive: 0,
            stage_ship,
            disabled: false,
            errored: false,
            has_round_over: false,
            has_game_over: false,
            cpu: CpuUsage::default(),
            gfx: UserGfx::default(),
            console: VecDeque::new(),
        }
    }

    pub fn ship_indices(&self) -> std::ops::Range<usize> {
        self.first_ship_index..self.first_ship_index + self.num_ships
    }

    pub fn log_line(&mut self, line: impl Into<String>) {
        if self.console.len() >= MAX_CONSOLE_LINES {
            self.console.pop_front();
        }
        self.console.push_back(line.into());
    }
}
