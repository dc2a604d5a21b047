//! Continuous collision detection and response for one tick
//!
//! Each tick is split into sub-steps small enough that no ship covers more
//! than [`COLLISION_FRAME`] units in one. Inside a sub-step the engine looks
//! for the earliest upcoming event (a ship touching a wall face, a wall
//! corner or another ship, or a torpedo reaching its commanded distance),
//! moves everything up to that instant, resolves the one event and repeats
//! until the sub-step is used up. Contact times come from exact polynomial
//! roots of the constant-acceleration motion.
//!
//! Lasers move once per tick after the ships have settled, and a single
//! attribution pass at the end reports every ship that died during the tick.

use glam::DVec2;

use super::events::{
    ArenaEvent, LaserHit, ShipDestroyed, ShipHitShip, ShipHitWall, TorpedoExploded, TorpedoHit,
};
use super::geometry::{Circle2D, Line2D, has_vision, vertex_sight_line};
use super::physics::PhysicsRules;
use super::solver::{newton_bisect, positive_minimum, solve_quadratic, solve_quartic};
use super::state::{Laser, Ship, Torpedo};
use crate::consts::*;

/// Upper bound on sub-steps per tick
const MAX_INTERVALS: usize = 10_000;
/// Events resolved per sub-step before the rest of it is run without checks
const MAX_EVENTS_PER_SUBSTEP: usize = 1000;
/// A sub-step is done when less than this fraction of it remains
const TIME_EPS: f64 = 1e-6;
/// Normal speed below which a thrusting ship rests against a wall instead of bouncing
const RESTING_SPEED: f64 = 0.05;
/// Scan resolution when the quartic iteration fails to converge
const FALLBACK_SCAN_SEGMENTS: usize = 16;

/// Static segments ships and lasers collide with
#[derive(Debug, Clone, Copy)]
pub struct ArenaBounds<'a> {
    /// Arena boundary plus every inner wall edge
    pub wall_lines: &'a [Line2D],
    /// Inner wall edges only; these also block vision
    pub inner_lines: &'a [Line2D],
}

/// Kinematics of one ship for the current window
#[derive(Debug, Clone, Default)]
struct ShipMove {
    force: DVec2,
    velocity: DVec2,
    accel: DVec2,
    /// Normals of walls the ship is resting against this tick
    resting: Vec<DVec2>,
}

impl ShipMove {
    fn offset_at(&self, t: f64) -> DVec2 {
        self.velocity * t + 0.5 * self.accel * t * t
    }

    fn velocity_at(&self, t: f64) -> DVec2 {
        self.velocity + self.accel * t
    }

    /// Upper bound on distance covered within `window`
    fn reach(&self, window: f64) -> f64 {
        self.velocity.length() * window + 0.5 * self.accel.length() * window * window
    }

    /// Thrust with the components pushing into resting walls removed
    fn effective_force(&self) -> DVec2 {
        self.resting.iter().fold(self.force, |f, n| {
            let into = f.dot(*n);
            if into < 0.0 { f - *n * into } else { f }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Contact {
    Wall { ship: usize, normal: DVec2 },
    Corner { ship: usize, corner: DVec2 },
    Ship { ship: usize, other: usize },
    Torpedo { index: usize },
}

/// Keep `contact` at time `t` if it falls inside the window and strictly before the best so far
fn earlier(best: &mut Option<(f64, Contact)>, t: f64, contact: Contact, window: f64) {
    if t.is_nan() || t > window {
        return;
    }
    if best.is_none_or(|(best_t, _)| t < best_t) {
        *best = Some((t, contact));
    }
}

/// Earliest positive root of a quartic within `window`
///
/// If the closed-form iteration fails, scans the window for the first
/// downward sign change of `f` and refines it with [`newton_bisect`].
fn earliest_quartic_root<F>(coeffs: [f64; 5], window: f64, mut f: F) -> f64
where
    F: FnMut(f64) -> (f64, f64),
{
    let [a, b, c, d, e] = coeffs;
    match solve_quartic(a, b, c, d, e) {
        Ok(roots) => positive_minimum(&roots),
        Err(_) => {
            log::trace!("quartic did not converge, scanning window {window}");
            let mut prev = 0.0;
            let mut prev_value = f(0.0).0;
            for k in 1..=FALLBACK_SCAN_SEGMENTS {
                let t = window * k as f64 / FALLBACK_SCAN_SEGMENTS as f64;
                let value = f(t).0;
                if prev_value > 0.0 && value <= 0.0 {
                    return newton_bisect(&mut f, (prev, t), 1e-12, 1e-12).unwrap_or(f64::NAN);
                }
                prev = t;
                prev_value = value;
            }
            f64::NAN
        }
    }
}

/// Advance ships, torpedoes and lasers through one tick
///
/// Returns every event in the order it happened.
pub fn move_and_check_collisions(
    ships: &mut [Ship],
    lasers: &mut Vec<Laser>,
    torpedoes: &mut Vec<Torpedo>,
    bounds: &ArenaBounds<'_>,
    rules: &PhysicsRules,
    time: u64,
) -> Vec<ArenaEvent> {
    let was_alive: Vec<bool> = ships.iter().map(|s| s.alive).collect();
    let mut pass = CollisionPass::new(ships, bounds, rules, time);
    pass.move_ships(torpedoes);
    pass.move_lasers(lasers);
    pass.attribute_kills(&was_alive);
    for ship in pass.ships.iter_mut().filter(|s| s.alive) {
        ship.sync_motion(&rules.model);
    }
    pass.events
}

struct CollisionPass<'a, 'b> {
    ships: &'a mut [Ship],
    moves: Vec<ShipMove>,
    /// `hits[attacker][target]`: attacker damaged target this tick
    hits: Vec<Vec<bool>>,
    events: Vec<ArenaEvent>,
    bounds: &'a ArenaBounds<'b>,
    rules: &'a PhysicsRules,
    time: u64,
}

impl<'a, 'b> CollisionPass<'a, 'b> {
    fn new(
        ships: &'a mut [Ship],
        bounds: &'a ArenaBounds<'b>,
        rules: &'a PhysicsRules,
        time: u64,
    ) -> Self {
        let n = ships.len();
        let moves = ships
            .iter_mut()
            .map(|ship| {
                let mut m = ShipMove::default();
                if ship.alive {
                    ship.hit_wall = false;
                    ship.hit_ship = false;
                    if ship.thruster_enabled {
                        m.force = DVec2::from_angle(ship.thruster_angle) * ship.thruster_force;
                    }
                }
                m
            })
            .collect();
        Self {
            ships,
            moves,
            hits: vec![vec![false; n]; n],
            events: Vec::new(),
            bounds,
            rules,
            time,
        }
    }

    fn alive(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.ships.len()).filter(|&i| self.ships[i].alive)
    }

    /// Recompute velocity and acceleration for a window of `window` ticks
    fn refresh_kinematics(&mut self, window: f64) {
        let model = self.rules.model;
        for (ship, m) in self.ships.iter().zip(self.moves.iter_mut()) {
            if ship.alive {
                let force = m.effective_force();
                m.velocity = model.velocity(ship.momentum);
                m.accel = model.acceleration(ship.momentum, force, window);
            } else {
                m.velocity = DVec2::ZERO;
                m.accel = DVec2::ZERO;
            }
        }
    }

    fn sub_step_count(&mut self) -> usize {
        self.refresh_kinematics(1.0);
        self.alive()
            .map(|i| {
                let m = &self.moves[i];
                let distance = m.offset_at(1.0).length();
                (distance / COLLISION_FRAME).ceil() as usize
            })
            .max()
            .unwrap_or(1)
            .clamp(1, MAX_INTERVALS)
    }

    fn move_ships(&mut self, torpedoes: &mut Vec<Torpedo>) {
        let intervals = self.sub_step_count();
        let dt_sub = 1.0 / intervals as f64;
        for _ in 0..intervals {
            let mut time_to_do = dt_sub;
            let mut resolved = 0;
            while time_to_do > TIME_EPS * dt_sub {
                self.refresh_kinematics(time_to_do);
                let next = if resolved < MAX_EVENTS_PER_SUBSTEP {
                    self.next_contact(torpedoes, time_to_do)
                } else {
                    None
                };
                let step = next.map_or(time_to_do, |(t, _)| t.min(time_to_do));
                self.advance(torpedoes, step);
                time_to_do -= step;
                if let Some((_, contact)) = next {
                    self.resolve(contact, torpedoes);
                    resolved += 1;
                    if resolved == MAX_EVENTS_PER_SUBSTEP {
                        log::debug!("collision cascade capped at tick {}", self.time);
                    }
                }
            }
        }
    }

    fn advance(&mut self, torpedoes: &mut [Torpedo], step: f64) {
        for (ship, m) in self.ships.iter_mut().zip(self.moves.iter()) {
            if ship.alive {
                ship.pos += m.offset_at(step);
                ship.momentum += m.effective_force() * step;
            }
        }
        for torpedo in torpedoes.iter_mut() {
            let dist = (TORPEDO_SPEED * step).min(torpedo.remaining());
            torpedo.advance(dist);
        }
    }

    fn next_contact(&self, torpedoes: &[Torpedo], window: f64) -> Option<(f64, Contact)> {
        let mut best = None;
        for i in self.alive() {
            for line in self.bounds.wall_lines {
                if let Some((t, normal)) = self.wall_contact(i, line, window) {
                    earlier(&mut best, t, Contact::Wall { ship: i, normal }, window);
                }
            }
        }
        for i in self.alive() {
            for line in self.bounds.inner_lines {
                let t = self.corner_contact(i, line.p1, window);
                earlier(&mut best, t, Contact::Corner { ship: i, corner: line.p1 }, window);
            }
        }
        for i in self.alive() {
            for j in self.alive().filter(|&j| j > i) {
                let t = self.ship_contact(i, j, window);
                earlier(&mut best, t, Contact::Ship { ship: i, other: j }, window);
            }
        }
        for (index, torpedo) in torpedoes.iter().enumerate() {
            // Zero when already at its distance: goes off at once
            let t = torpedo.remaining() / TORPEDO_SPEED;
            earlier(&mut best, t, Contact::Torpedo { index }, window);
        }
        best
    }

    /// Time the hull reaches the face of `line`, and the normal pointing at the ship
    fn wall_contact(&self, i: usize, line: &Line2D, window: f64) -> Option<(f64, DVec2)> {
        let pos = self.ships[i].pos;
        let m = &self.moves[i];
        let d0 = line.signed_distance(pos);
        let normal = line.normal() * d0.signum();
        if d0 == 0.0 || normal == DVec2::ZERO {
            return None;
        }
        if line.distance_to(pos) - m.reach(window) > SHIP_RADIUS {
            return None;
        }
        let [t1, t2] = solve_quadratic(
            0.5 * normal.dot(m.accel),
            normal.dot(m.velocity),
            d0.abs() - SHIP_RADIUS,
        );
        let t = positive_minimum(&[t1, t2]);
        if t.is_nan() || t > window || normal.dot(m.velocity_at(t)) >= 0.0 {
            return None;
        }
        let contact = pos + m.offset_at(t) - normal * SHIP_RADIUS;
        if !(0.0..=1.0).contains(&line.projection_param(contact)) {
            return None;
        }
        has_vision(&vertex_sight_line(pos, contact), self.bounds.inner_lines).then_some((t, normal))
    }

    fn corner_contact(&self, i: usize, corner: DVec2, window: f64) -> f64 {
        let pos = self.ships[i].pos;
        let m = &self.moves[i];
        let delta = pos - corner;
        if delta.length() - m.reach(window) > SHIP_RADIUS {
            return f64::NAN;
        }
        let t = earliest_contact(delta, m.velocity, m.accel, SHIP_RADIUS, window);
        if t.is_nan() || !has_vision(&vertex_sight_line(pos, corner), self.bounds.inner_lines) {
            return f64::NAN;
        }
        t
    }

    fn ship_contact(&self, i: usize, j: usize, window: f64) -> f64 {
        let (a, b) = (&self.moves[i], &self.moves[j]);
        let delta = self.ships[j].pos - self.ships[i].pos;
        if delta.length() - a.reach(window) - b.reach(window) > SHIP_SIZE {
            return f64::NAN;
        }
        earliest_contact(delta, b.velocity - a.velocity, b.accel - a.accel, SHIP_SIZE, window)
    }

    fn resolve(&mut self, contact: Contact, torpedoes: &mut Vec<Torpedo>) {
        match contact {
            Contact::Wall { ship, normal } => self.bounce_off_wall(ship, normal),
            Contact::Corner { ship, corner } => {
                let normal = (self.ships[ship].pos - corner).normalize_or_zero();
                self.bounce_off_wall(ship, normal);
            }
            Contact::Ship { ship, other } => self.bounce_ships(ship, other),
            Contact::Torpedo { index } => {
                let torpedo = torpedoes.remove(index);
                self.explode(&torpedo);
            }
        }
    }

    /// Reflect the normal momentum, scaled by the wall restitution
    fn bounce_off_wall(&mut self, i: usize, normal: DVec2) {
        let rules = self.rules;
        let model = rules.model;
        let p = self.ships[i].momentum;
        let pn = p.dot(normal);
        if pn >= 0.0 {
            return;
        }
        let pushing = self.moves[i].force.dot(normal) < 0.0;
        let mut impulse = -(1.0 + rules.wall_bounce) * pn;
        if pushing && rules.wall_bounce * -pn < RESTING_SPEED {
            impulse = -pn;
            self.moves[i].resting.push(normal);
        }
        let new_p = p + normal * impulse;
        let damage = if rules.wall_collision_damage {
            let lost = model.kinetic_energy(p) - model.kinetic_energy(new_p);
            lost.max(0.0) * rules.collision_damage_factor
        } else {
            0.0
        };

        let ship = &mut self.ships[i];
        ship.momentum = new_p;
        ship.pos += normal * COLLISION_NUDGE;
        ship.hit_wall = true;
        let dealt = self.deal_damage(None, i, damage);
        self.ships[i].sync_motion(&model);
        self.events.push(ArenaEvent::ShipHitWall(ShipHitWall {
            time: self.time,
            ship: i,
            bounce_angle: normal.y.atan2(normal.x),
            bounce_force: impulse,
            damage: dealt,
        }));
    }

    /// One-dimensional impulse along the line of centers
    fn bounce_ships(&mut self, i: usize, j: usize) {
        let rules = self.rules;
        let model = rules.model;
        let normal = (self.ships[j].pos - self.ships[i].pos).try_normalize().unwrap_or(DVec2::X);
        let (p1, p2) = (self.ships[i].momentum, self.ships[j].momentum);
        let (p1n, p2n) = (p1.dot(normal), p2.dot(normal));
        let e = rules.ship_bounce;
        let d1 = normal * (0.5 * ((1.0 - e) * p1n + (1.0 + e) * p2n) - p1n);
        let d2 = normal * (0.5 * ((1.0 + e) * p1n + (1.0 - e) * p2n) - p2n);
        let (new_p1, new_p2) = (p1 + d1, p2 + d2);

        let damage = if rules.ship_collision_damage {
            let before = model.kinetic_energy(p1) + model.kinetic_energy(p2);
            let after = model.kinetic_energy(new_p1) + model.kinetic_energy(new_p2);
            (before - after).max(0.0) * rules.collision_damage_factor
        } else {
            0.0
        };

        self.ships[i].momentum = new_p1;
        self.ships[j].momentum = new_p2;
        self.ships[i].pos -= normal * COLLISION_NUDGE;
        self.ships[j].pos += normal * COLLISION_NUDGE;
        self.ships[i].hit_ship = true;
        self.ships[j].hit_ship = true;
        let dealt =
            self.deal_damage(Some(j), i, 0.5 * damage) + self.deal_damage(Some(i), j, 0.5 * damage);
        self.ships[i].sync_motion(&model);
        self.ships[j].sync_motion(&model);

        self.events.push(ArenaEvent::ShipHitShip(ShipHitShip {
            time: self.time,
            ship: i,
            target: j,
            ship_angle: d1.y.atan2(d1.x),
            ship_force: d1.length(),
            target_angle: d2.y.atan2(d2.x),
            target_force: d2.length(),
            damage: dealt,
        }));
    }

    /// Blast force and damage fall off with the square of the distance fraction
    fn explode(&mut self, torpedo: &Torpedo) {
        let model = self.rules.model;
        let shooter = torpedo.ship_index;
        let targets: Vec<usize> = self.alive().collect();
        for target in targets {
            let offset = self.ships[target].pos - torpedo.pos;
            let distance = offset.length();
            if distance >= TORPEDO_BLAST_RADIUS {
                continue;
            }
            let factor = (1.0 - distance / TORPEDO_BLAST_RADIUS).powi(2);
            let direction = offset
                .try_normalize()
                .unwrap_or_else(|| DVec2::from_angle(torpedo.heading));
            let force = factor * TORPEDO_BLAST_FORCE;
            self.ships[target].momentum += direction * force;
            let dealt = self.deal_damage(Some(shooter), target, factor * TORPEDO_BLAST_DAMAGE);
            self.ships[target].sync_motion(&model);
            self.events.push(ArenaEvent::TorpedoHitShip(TorpedoHit {
                time: self.time,
                shooter,
                target,
                torpedo: torpedo.id,
                hit_angle: direction.y.atan2(direction.x),
                hit_force: force,
                damage: dealt,
            }));
        }
        self.events.push(ArenaEvent::TorpedoExploded(TorpedoExploded {
            time: self.time,
            ship: shooter,
            torpedo: torpedo.id,
            x: torpedo.pos.x,
            y: torpedo.pos.y,
        }));
    }

    /// Apply hull damage and credit the attacker; returns the energy the target lost
    fn deal_damage(&mut self, attacker: Option<usize>, target: usize, amount: f64) -> f64 {
        let ship = &self.ships[target];
        if !ship.alive || !ship.energy_enabled || amount <= 0.0 {
            return 0.0;
        }
        let target_team = ship.team_index;
        let dealt = self.ships[target].take_damage(amount);
        if let Some(a) = attacker.filter(|&a| a < self.ships.len()) {
            self.hits[a][target] = true;
            // Shield-absorbed damage earns no score
            let score = dealt / DEFAULT_ENERGY;
            let attacker = &mut self.ships[a];
            if attacker.team_index == target_team {
                attacker.friendly_damage += score;
            } else {
                attacker.damage += score;
            }
        }
        dealt
    }

    fn move_lasers(&mut self, lasers: &mut Vec<Laser>) {
        let time = self.time;
        // Fresh bolts first hit whatever sits on their spawn segment
        for laser in lasers.iter_mut().filter(|l| l.fire_time == time) {
            self.laser_strike(laser);
        }
        for laser in lasers.iter_mut().filter(|l| !l.dead) {
            laser.pos += laser.delta;
            self.laser_strike(laser);
        }
        for laser in lasers.iter_mut().filter(|l| !l.dead) {
            let line = laser.line();
            if self.bounds.wall_lines.iter().any(|wall| wall.intersects(&line)) {
                laser.dead = true;
            }
        }
        let events = &mut self.events;
        lasers.retain(|laser| {
            if laser.dead {
                events.push(ArenaEvent::LaserDestroyed { time, laser: laser.id });
            }
            !laser.dead
        });
    }

    /// Hit the lowest-indexed ship on the bolt's segment; bolts fired this tick spare the shooter
    fn laser_strike(&mut self, laser: &mut Laser) {
        if laser.dead {
            return;
        }
        let line = laser.line();
        let fresh = laser.fire_time == self.time;
        let target = self.alive().find(|&i| {
            !(fresh && i == laser.ship_index)
                && Circle2D::new(self.ships[i].pos, SHIP_RADIUS).intersects_line(&line)
        });
        let Some(target) = target else {
            return;
        };
        laser.dead = true;
        let dealt = self.deal_damage(Some(laser.ship_index), target, LASER_DAMAGE);
        self.events.push(ArenaEvent::LaserHitShip(LaserHit {
            time: self.time,
            shooter: laser.ship_index,
            target,
            laser: laser.id,
            x: laser.pos.x,
            y: laser.pos.y,
            heading: laser.heading,
            damage: dealt,
        }));
    }

    /// Report each ship that died this tick, sharing the kill among its attackers
    fn attribute_kills(&mut self, was_alive: &[bool]) {
        for target in 0..self.ships.len() {
            if !was_alive[target] || self.ships[target].alive {
                continue;
            }
            let destroyers: Vec<usize> =
                (0..self.ships.len()).filter(|&a| self.hits[a][target]).collect();
            let share = 1.0 / destroyers.len().max(1) as f64;
            let target_team = self.ships[target].team_index;
            for &a in &destroyers {
                if self.ships[a].team_index == target_team {
                    self.ships[a].friendly_kills += share;
                } else {
                    self.ships[a].kills += share;
                }
            }
            self.events.push(ArenaEvent::ShipDestroyed(ShipDestroyed {
                time: self.time,
                ship: target,
                destroyers,
            }));
        }
    }
}

/// First time `|delta + dv·t + ½·da·t²|` shrinks to `radius` while closing
fn earliest_contact(delta: DVec2, dv: DVec2, da: DVec2, radius: f64, window: f64) -> f64 {
    let half = 0.5 * da;
    let coeffs = [
        half.dot(half),
        2.0 * half.dot(dv),
        dv.dot(dv) + 2.0 * half.dot(delta),
        2.0 * dv.dot(delta),
        delta.dot(delta) - radius * radius,
    ];
    let separation = |t: f64| {
        let d = delta + dv * t + half * t * t;
        let rate = dv + da * t;
        (d.length_squared() - radius * radius, 2.0 * d.dot(rate))
    };
    let t = earliest_quartic_root(coeffs, window, separation);
    if t.is_nan() || t > window || separation(t).1 >= 0.0 {
        return f64::NAN;
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::geometry::{Rect, Wall};
    use crate::sim::physics::PhysicsModel;
    use proptest::prelude::*;

    fn arena_lines(width: f64, height: f64) -> Vec<Line2D> {
        Rect::new(0.0, 0.0, width, height).lines().to_vec()
    }

    fn ship_at(index: usize, team: usize, x: f64, y: f64) -> Ship {
        let mut ship = Ship::new(index, team, true);
        ship.alive = true;
        ship.pos = DVec2::new(x, y);
        ship
    }

    fn run_ticks(
        ships: &mut [Ship],
        lasers: &mut Vec<Laser>,
        torpedoes: &mut Vec<Torpedo>,
        walls: &[Line2D],
        inner: &[Line2D],
        rules: &PhysicsRules,
        ticks: std::ops::RangeInclusive<u64>,
    ) -> Vec<ArenaEvent> {
        let bounds = ArenaBounds {
            wall_lines: walls,
            inner_lines: inner,
        };
        let mut events = Vec::new();
        for time in ticks {
            let tick = move_and_check_collisions(ships, lasers, torpedoes, &bounds, rules, time);
            events.extend(tick);
        }
        events
    }

    fn count(events: &[ArenaEvent], pred: impl Fn(&ArenaEvent) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn test_head_on_restitution() {
        let rules = PhysicsRules::default();
        let walls = arena_lines(1000.0, 1000.0);
        let mut ships = vec![
            ship_at(0, 0, 300.0, 500.0),
            ship_at(1, 1, 300.0 + SHIP_SIZE + 10.0, 500.0),
        ];
        ships[1].momentum = DVec2::new(-5.0, 0.0);
        let events = run_ticks(&mut ships, &mut vec![], &mut vec![], &walls, &[], &rules, 1..=6);

        assert_eq!(count(&events, |e| matches!(e, ArenaEvent::ShipHitShip(_))), 1);
        let v0 = ships[0].momentum.x;
        let v1 = ships[1].momentum.x;
        assert!((v0 - -4.75).abs() < 1e-9);
        assert!((v1 - -0.25).abs() < 1e-9);
        assert!(((v1 - v0) - rules.ship_bounce * 5.0).abs() < 1e-9);
        assert!(ships[0].pos.distance(ships[1].pos) >= SHIP_SIZE);
    }

    #[test]
    fn test_wall_bounce_reflects_momentum() {
        let rules = PhysicsRules::default();
        let walls = arena_lines(800.0, 600.0);
        let mut ships = vec![ship_at(0, 0, 50.0, 300.0)];
        ships[0].momentum = DVec2::new(-5.0, 0.0);
        let events = run_ticks(&mut ships, &mut vec![], &mut vec![], &walls, &[], &rules, 1..=12);

        assert_eq!(count(&events, |e| matches!(e, ArenaEvent::ShipHitWall(_))), 1);
        assert!((ships[0].momentum.x - 2.5).abs() < 1e-9);
        assert!(ships[0].pos.x >= SHIP_RADIUS);
        assert!(ships[0].alive);
    }

    #[test]
    fn test_inner_wall_corner_bounce() {
        let rules = PhysicsRules::default();
        let mut walls = arena_lines(800.0, 600.0);
        let inner = Wall::new(200.0, 200.0, 100.0, 100.0).lines().to_vec();
        walls.extend_from_slice(&inner);
        let mut ships = vec![ship_at(0, 0, 150.0, 150.0)];
        ships[0].momentum = DVec2::new(3.0, 3.0);
        let events =
            run_ticks(&mut ships, &mut vec![], &mut vec![], &walls, &inner, &rules, 1..=20);

        assert_eq!(count(&events, |e| matches!(e, ArenaEvent::ShipHitWall(_))), 1);
        assert!((ships[0].momentum - DVec2::new(-1.5, -1.5)).length() < 1e-9);
        assert!(ships[0].pos.distance(DVec2::new(200.0, 200.0)) >= SHIP_RADIUS);
    }

    #[test]
    fn test_thrust_into_wall_rests() {
        let rules = PhysicsRules::default();
        let walls = arena_lines(800.0, 600.0);
        let mut ships = vec![ship_at(0, 0, 20.0, 300.0)];
        for time in 1..=30 {
            ships[0].thruster_angle = std::f64::consts::PI;
            ships[0].thruster_force = MAX_THRUSTER_FORCE;
            run_ticks(&mut ships, &mut vec![], &mut vec![], &walls, &[], &rules, time..=time);
            assert!(ships[0].pos.x >= SHIP_RADIUS - 1e-9, "tick {time}: {}", ships[0].pos.x);
        }
    }

    #[test]
    fn test_laser_spares_shooter_and_hits_target() {
        let rules = PhysicsRules::default();
        let walls = arena_lines(800.0, 600.0);
        let mut ships = vec![ship_at(0, 0, 100.0, 100.0), ship_at(1, 1, 140.0, 100.0)];
        let mut lasers = vec![Laser::new(1, 0, 1, ships[0].pos, 0.0)];
        let events = run_ticks(&mut ships, &mut lasers, &mut vec![], &walls, &[], &rules, 1..=1);

        let hits: Vec<&LaserHit> = events
            .iter()
            .filter_map(|e| match e {
                ArenaEvent::LaserHitShip(hit) => Some(hit),
                _ => None,
            })
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target, 1);
        assert!((ships[1].energy - (DEFAULT_ENERGY - LASER_DAMAGE)).abs() < 1e-12);
        assert_eq!(ships[0].energy, DEFAULT_ENERGY);
        assert!(lasers.is_empty());
        assert!((ships[0].damage - LASER_DAMAGE / DEFAULT_ENERGY).abs() < 1e-12);
    }

    #[test]
    fn test_shielded_hit_scores_only_hull_damage() {
        let rules = PhysicsRules::default();
        let walls = arena_lines(800.0, 600.0);
        let mut ships = vec![ship_at(0, 0, 100.0, 100.0), ship_at(1, 1, 140.0, 100.0)];
        ships[1].shields_enabled = true;
        ships[1].shields = LASER_DAMAGE / 2.0;
        let mut lasers = vec![Laser::new(1, 0, 1, ships[0].pos, 0.0)];
        run_ticks(&mut ships, &mut lasers, &mut vec![], &walls, &[], &rules, 1..=1);

        assert_eq!(ships[1].shields, 0.0);
        assert!((ships[1].energy - (DEFAULT_ENERGY - LASER_DAMAGE / 2.0)).abs() < 1e-12);
        assert!((ships[0].damage - LASER_DAMAGE / 2.0 / DEFAULT_ENERGY).abs() < 1e-12);
    }

    #[test]
    fn test_shooter_chasing_own_laser_is_not_hit() {
        let rules = PhysicsRules::default();
        let walls = arena_lines(800.0, 600.0);
        let mut ships = vec![ship_at(0, 0, 100.0, 100.0)];
        ships[0].momentum = DVec2::new(20.0, 0.0);
        let mut lasers = vec![Laser::new(1, 0, 1, ships[0].pos, 0.0)];
        let events = run_ticks(&mut ships, &mut lasers, &mut vec![], &walls, &[], &rules, 1..=1);
        assert_eq!(count(&events, |e| matches!(e, ArenaEvent::LaserHitShip(_))), 0);
        assert_eq!(lasers.len(), 1);
    }

    #[test]
    fn test_laser_destroyed_once_at_wall() {
        let rules = PhysicsRules::default();
        let walls = arena_lines(800.0, 600.0);
        let mut ships = vec![ship_at(0, 0, 100.0, 100.0)];
        let mut lasers = vec![Laser::new(7, 0, 1, ships[0].pos, std::f64::consts::PI)];
        let events = run_ticks(&mut ships, &mut lasers, &mut vec![], &walls, &[], &rules, 1..=8);
        let destroyed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ArenaEvent::LaserDestroyed { laser: 7, .. }))
            .collect();
        assert_eq!(destroyed.len(), 1);
        assert!(lasers.is_empty());
    }

    #[test]
    fn test_torpedo_blast_kills_and_credits() {
        let rules = PhysicsRules::default();
        let walls = arena_lines(800.0, 600.0);
        let mut ships = vec![ship_at(0, 0, 100.0, 100.0), ship_at(1, 1, 160.0, 100.0)];
        ships[1].energy = 10.0;
        let mut torpedoes = vec![Torpedo::new(3, 0, 1, ships[0].pos, 0.0, 50.0)];
        let events = run_ticks(&mut ships, &mut vec![], &mut torpedoes, &walls, &[], &rules, 1..=4);

        assert!(torpedoes.is_empty());
        assert_eq!(count(&events, |e| matches!(e, ArenaEvent::TorpedoExploded(_))), 1);
        let destroyed: Vec<&ShipDestroyed> = events
            .iter()
            .filter_map(|e| match e {
                ArenaEvent::ShipDestroyed(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(destroyed.len(), 1);
        assert_eq!(destroyed[0].ship, 1);
        assert_eq!(destroyed[0].destroyers, vec![0]);
        assert!(!ships[1].alive);
        assert!((ships[0].kills - 1.0).abs() < 1e-12);
        // The shooter caught the edge of its own blast
        assert!(ships[0].alive);
        assert!((ships[0].energy - (DEFAULT_ENERGY - 0.25 * TORPEDO_BLAST_DAMAGE)).abs() < 1e-6);
        assert!(ships[0].friendly_damage > 0.0);
    }

    #[test]
    fn test_dead_ship_does_not_move() {
        let rules = PhysicsRules::default();
        let walls = arena_lines(800.0, 600.0);
        let mut ships = vec![ship_at(0, 0, 100.0, 100.0)];
        ships[0].alive = false;
        ships[0].momentum = DVec2::new(5.0, 0.0);
        let events = run_ticks(&mut ships, &mut vec![], &mut vec![], &walls, &[], &rules, 1..=3);
        assert!(events.is_empty());
        assert_eq!(ships[0].pos, DVec2::new(100.0, 100.0));
    }

    #[test]
    fn test_relativistic_ship_stays_in_arena() {
        let rules = PhysicsRules {
            model: PhysicsModel::new(true, 20.0),
            ..PhysicsRules::default()
        };
        let walls = arena_lines(200.0, 200.0);
        let mut ships = vec![ship_at(0, 0, 100.0, 100.0)];
        ships[0].momentum = DVec2::new(60.0, 25.0);
        run_ticks(&mut ships, &mut vec![], &mut vec![], &walls, &[], &rules, 1..=40);
        let p = ships[0].pos;
        assert!(p.x >= SHIP_RADIUS - 1e-6 && p.x <= 200.0 - SHIP_RADIUS + 1e-6);
        assert!(p.y >= SHIP_RADIUS - 1e-6 && p.y <= 200.0 - SHIP_RADIUS + 1e-6);
        assert!(ships[0].speed < 20.0);
    }

    proptest! {
        #[test]
        fn test_ship_never_leaves_arena(
            x in 20.0f64..780.0,
            y in 20.0f64..580.0,
            px in -15.0f64..15.0,
            py in -15.0f64..15.0,
            angle in -3.14f64..3.14,
        ) {
            let rules = PhysicsRules::default();
            let walls = arena_lines(800.0, 600.0);
            let mut ships = vec![ship_at(0, 0, x, y)];
            ships[0].momentum = DVec2::new(px, py);
            for time in 1..=30 {
                ships[0].thruster_angle = angle;
                ships[0].thruster_force = MAX_THRUSTER_FORCE;
                run_ticks(&mut ships, &mut vec![], &mut vec![], &walls, &[], &rules, time..=time);
                let p = ships[0].pos;
                prop_assert!(p.x >= SHIP_RADIUS - 1e-6 && p.x <= 800.0 - SHIP_RADIUS + 1e-6);
                prop_assert!(p.y >= SHIP_RADIUS - 1e-6 && p.y <= 600.0 - SHIP_RADIUS + 1e-6);
            }
        }
    }
}
