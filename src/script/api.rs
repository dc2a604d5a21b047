//! Handles scripts use to see and act on the arena
//!
//! Every handle holds the shared world and the engine's [`CallGate`]. A
//! handle only works while a callback of its owner is running; a ship
//! handle stashed in a global and used after its callback returned raises a
//! Lua error instead of touching state. Borrows of the world never outlive a
//! single method call.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use mlua::{Lua, LuaSerdeExt, Table, UserData, UserDataMethods, UserDataRef, Value, Variadic};

use crate::consts::*;
use crate::limit;
use crate::sim::events::{StageSensors, TeamSensors};
use crate::sim::physics::PhysicsModel;
use crate::sim::state::{
    GfxCircle, GfxLine, GfxPrimitive, GfxRectangle, GfxText, Rgba, ShapeStyle, Ship, ShipProperties,
};
use crate::sim::world::World;

/// Whose callback is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Team(usize),
    Stage,
}

/// Which lifecycle callback is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Configure,
    Init,
    Run,
    RoundOver,
    GameOver,
}

/// The callback currently running, if any
#[derive(Debug, Default)]
pub struct CallGate {
    active: Cell<Option<(Owner, CallPhase)>>,
}

impl CallGate {
    pub fn enter(&self, owner: Owner, phase: CallPhase) {
        self.active.set(Some((owner, phase)));
    }

    pub fn exit(&self) {
        self.active.set(None);
    }

    pub fn current(&self) -> Option<(Owner, CallPhase)> {
        self.active.get()
    }
}

/// Shared state behind every handle
#[derive(Clone)]
pub struct ApiContext {
    pub world: Rc<RefCell<World>>,
    pub gate: Rc<CallGate>,
}

fn denied(what: &str) -> mlua::Error {
    mlua::Error::RuntimeError(format!("{what} used outside of its callback"))
}

impl ApiContext {
    pub fn new(world: Rc<RefCell<World>>, gate: Rc<CallGate>) -> Self {
        Self { world, gate }
    }

    fn require(&self, what: &str, allowed: impl Fn(Owner, CallPhase) -> bool) -> mlua::Result<()> {
        match self.gate.current() {
            Some((owner, phase)) if allowed(owner, phase) => Ok(()),
            _ => Err(denied(what)),
        }
    }

    fn world(&self) -> mlua::Result<Ref<'_, World>> {
        self.world
            .try_borrow()
            .map_err(|_| mlua::Error::RuntimeError("world is busy".into()))
    }

    fn world_mut(&self) -> mlua::Result<RefMut<'_, World>> {
        self.world
            .try_borrow_mut()
            .map_err(|_| mlua::Error::RuntimeError("world is busy".into()))
    }
}

// Ship handle

/// One ship, as seen by its own team (or by the stage)
#[derive(Clone)]
pub struct ShipHandle {
    ctx: ApiContext,
    pub index: usize,
    pub team: usize,
}

const SHIP_NUMBERS: &[(&str, fn(&Ship) -> f64)] = &[
    ("x", |s| s.pos.x),
    ("y", |s| s.pos.y),
    ("heading", |s| s.heading),
    ("speed", |s| s.speed),
    ("energy", |s| s.energy),
    ("power", |s| s.power),
    ("shields", |s| s.shields),
    ("thrusterAngle", |s| s.thruster_angle),
    ("thrusterForce", |s| s.thruster_force),
];

const SHIP_COUNTERS: &[(&str, fn(&Ship) -> u32)] = &[
    ("laserGunHeat", |s| s.laser_gun_heat),
    ("torpedoGunHeat", |s| s.torpedo_gun_heat),
    ("torpedoAmmo", |s| s.torpedo_ammo),
];

const SHIP_FLAGS: &[(&str, fn(&Ship) -> bool)] = &[
    ("alive", |s| s.alive),
    ("hitWall", |s| s.hit_wall),
    ("hitShip", |s| s.hit_ship),
    ("laserEnabled", |s| s.laser_enabled),
    ("torpedoEnabled", |s| s.torpedo_enabled),
    ("thrusterEnabled", |s| s.thruster_enabled),
    ("energyEnabled", |s| s.energy_enabled),
    ("powerEnabled", |s| s.power_enabled),
    ("shieldsEnabled", |s| s.shields_enabled),
];

impl ShipHandle {
    pub fn new(ctx: ApiContext, index: usize, team: usize) -> Self {
        Self { ctx, index, team }
    }

    fn owned_by_caller(&self, owner: Owner) -> bool {
        owner == Owner::Team(self.team)
    }

    /// Readable by the owning team and by the stage
    fn read<R>(&self, f: impl FnOnce(&World, usize) -> R) -> mlua::Result<R> {
        let team = self.team;
        self.ctx
            .require("ship", |owner, _| owner == Owner::Stage || owner == Owner::Team(team))?;
        Ok(f(&*self.ctx.world()?, self.index))
    }

    /// Weapons and thrusters: only from the owning team's `run`
    fn act<R>(&self, f: impl FnOnce(&mut World, usize) -> R) -> mlua::Result<R> {
        self.ctx.require("ship", |owner, phase| {
            self.owned_by_caller(owner) && phase == CallPhase::Run
        })?;
        Ok(f(&mut *self.ctx.world_mut()?, self.index))
    }

    /// Identity changes: only from the owning team's `init`
    fn setup(&self, f: impl FnOnce(&mut World, usize)) -> mlua::Result<()> {
        self.ctx.require("ship setup", |owner, phase| {
            self.owned_by_caller(owner) && phase == CallPhase::Init
        })?;
        f(&mut *self.ctx.world_mut()?, self.index);
        Ok(())
    }

    fn set_color(
        &self,
        pick: fn(&mut ShipProperties) -> &mut Rgba,
        rgb: (f64, f64, f64),
    ) -> mlua::Result<()> {
        self.setup(|w, i| {
            if let Some(props) = w.properties.get_mut(i) {
                *pick(props) = Rgba::rgb(channel(rgb.0), channel(rgb.1), channel(rgb.2));
            }
        })
    }
}

impl UserData for ShipHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        for &(name, get) in SHIP_NUMBERS {
            methods.add_method(name, move |_, this, ()| this.read(|w, i| get(&w.ships[i])));
        }
        for &(name, get) in SHIP_COUNTERS {
            methods.add_method(name, move |_, this, ()| this.read(|w, i| get(&w.ships[i])));
        }
        for &(name, get) in SHIP_FLAGS {
            methods.add_method(name, move |_, this, ()| this.read(|w, i| get(&w.ships[i])));
        }
        methods.add_method("index", |_, this, ()| Ok(this.index));
        methods.add_method("name", |_, this, ()| this.read(|w, i| w.properties[i].name.clone()));
        methods.add_method("teamName", |_, this, ()| {
            this.read(|w, _| w.teams[this.team].name.clone())
        });
        methods.add_method("isStageShip", |_, this, ()| {
            this.read(|w, i| w.properties[i].stage_ship)
        });

        methods.add_method("fireThruster", |_, this, (angle, force): (f64, f64)| {
            this.act(|w, i| w.fire_thruster(i, angle, force))
        });
        methods.add_method("fireLaser", |_, this, heading: f64| {
            this.act(|w, i| w.fire_laser(i, heading))
        });
        methods.add_method("fireTorpedo", |_, this, (heading, distance): (f64, f64)| {
            this.act(|w, i| w.fire_torpedo(i, heading, distance))
        });
        methods.add_method("chargeShields", |_, this, amount: f64| {
            this.act(|w, i| w.charge_shields(i, amount))
        });

        methods.add_method("setName", |_, this, name: String| {
            this.setup(|w, i| {
                if let Some(props) = w.properties.get_mut(i) {
                    props.name = clip_name(&name);
                }
            })
        });
        methods.add_method("setShipColor", |_, this, rgb: (f64, f64, f64)| {
            this.set_color(|p| &mut p.ship_color, rgb)
        });
        methods.add_method("setLaserColor", |_, this, rgb: (f64, f64, f64)| {
            this.set_color(|p| &mut p.laser_color, rgb)
        });
        methods.add_method("setThrusterColor", |_, this, rgb: (f64, f64, f64)| {
            this.set_color(|p| &mut p.thruster_color, rgb)
        });
        methods.add_method("setShieldsColor", |_, this, rgb: (f64, f64, f64)| {
            this.set_color(|p| &mut p.shields_color, rgb)
        });
    }
}

/// Trim a script-chosen name to the allowed length
pub fn clip_name(name: &str) -> String {
    name.trim().chars().take(MAX_NAME_LENGTH).collect()
}

fn channel(v: f64) -> u8 {
    limit(0.0, v.round(), 255.0) as u8
}

// World handle

/// left, bottom, width, height and an optional tag
type RectRow = (f64, f64, f64, f64, Option<String>);

/// Read-only view of the arena layout and zone queries
#[derive(Clone)]
pub struct WorldHandle {
    ctx: ApiContext,
    owner: Owner,
}

impl WorldHandle {
    pub fn new(ctx: ApiContext, owner: Owner) -> Self {
        Self { ctx, owner }
    }

    fn read<R>(&self, f: impl FnOnce(&World) -> R) -> mlua::Result<R> {
        self.ctx.require("world", |owner, _| owner == self.owner)?;
        Ok(f(&*self.ctx.world()?))
    }

    fn rect_list(lua: &Lua, rects: Vec<RectRow>) -> mlua::Result<Table> {
        let list = lua.create_table()?;
        for (i, (left, bottom, width, height, tag)) in rects.into_iter().enumerate() {
            let t = lua.create_table()?;
            t.set("left", left)?;
            t.set("bottom", bottom)?;
            t.set("width", width)?;
            t.set("height", height)?;
            if let Some(tag) = tag {
                t.set("tag", tag)?;
            }
            list.set(i + 1, t)?;
        }
        Ok(list)
    }
}

impl UserData for WorldHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("time", |_, this, ()| this.read(|w| w.time));
        methods.add_method("width", |_, this, ()| this.read(|w| w.width));
        methods.add_method("height", |_, this, ()| this.read(|w| w.height));
        methods.add_method("walls", |lua, this, ()| {
            let walls: Vec<RectRow> = this.read(|w| {
                let inner = w.inner_wall_lines.len() / 4;
                w.walls[..inner]
                    .iter()
                    .map(|wall| {
                        let r = &wall.rect;
                        (r.left, r.bottom, r.width, r.height, None)
                    })
                    .collect()
            })?;
            WorldHandle::rect_list(lua, walls)
        });
        methods.add_method("zones", |lua, this, ()| {
            let zones: Vec<RectRow> = this.read(|w| {
                w.zones
                    .iter()
                    .map(|z| {
                        let r = &z.rect;
                        (r.left, r.bottom, r.width, r.height, Some(z.tag.clone()))
                    })
                    .collect()
            })?;
            WorldHandle::rect_list(lua, zones)
        });
        methods.add_method("constants", |lua, _, ()| constants_table(lua));
        methods.add_method(
            "inZone",
            |_, this, (ship, tag): (UserDataRef<ShipHandle>, Option<String>)| {
                this.read(|w| w.in_zone(ship.index, tag.as_deref()))
            },
        );
        methods.add_method(
            "touchedZone",
            |_, this, (ship, tag): (UserDataRef<ShipHandle>, Option<String>)| {
                this.read(|w| w.touched_zone(ship.index, tag.as_deref()))
            },
        );
        methods.add_method("inAnyZone", |_, this, ship: UserDataRef<ShipHandle>| {
            this.read(|w| w.in_zone(ship.index, None))
        });
        methods.add_method("touchedAnyZone", |_, this, ship: UserDataRef<ShipHandle>| {
            this.read(|w| w.touched_zone(ship.index, None))
        });
    }
}

fn constants_table(lua: &Lua) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    t.set("SHIP_RADIUS", SHIP_RADIUS)?;
    t.set("LASER_SPEED", LASER_SPEED)?;
    t.set("LASER_HEAT", LASER_HEAT)?;
    t.set("LASER_DAMAGE", LASER_DAMAGE)?;
    t.set("TORPEDO_SPEED", TORPEDO_SPEED)?;
    t.set("TORPEDO_HEAT", TORPEDO_HEAT)?;
    t.set("TORPEDO_BLAST_RADIUS", TORPEDO_BLAST_RADIUS)?;
    t.set("TORPEDO_BLAST_FORCE", TORPEDO_BLAST_FORCE)?;
    t.set("TORPEDO_BLAST_DAMAGE", TORPEDO_BLAST_DAMAGE)?;
    t.set("MAX_THRUSTER_FORCE", MAX_THRUSTER_FORCE)?;
    t.set("DEFAULT_ENERGY", DEFAULT_ENERGY)?;
    t.set("DEFAULT_POWER", DEFAULT_POWER)?;
    Ok(t)
}

// Graphics

/// Optional trailing numeric arguments
struct Extra(Vec<f64>);

impl Extra {
    fn at(&self, i: usize, default: f64) -> f64 {
        self.0.get(i).copied().unwrap_or(default)
    }

    fn color(&self, i: usize) -> Rgba {
        if self.0.len() < i + 3 {
            return Rgba::WHITE;
        }
        Rgba::new(
            channel(self.at(i, 255.0)),
            channel(self.at(i + 1, 255.0)),
            channel(self.at(i + 2, 255.0)),
            channel(self.at(i + 3, 255.0)),
        )
    }

    fn ticks(&self, i: usize) -> u64 {
        self.at(i, 1.0).max(1.0) as u64
    }

    /// Fill color, outline thickness and outline color starting at `i`
    fn style(&self, i: usize) -> ShapeStyle {
        ShapeStyle {
            fill: self.color(i),
            outline_thickness: self.at(i + 4, 0.0).max(0.0),
            outline: self.color(i + 5),
        }
    }
}

/// Transient drawing for a team or the stage
#[derive(Clone)]
pub struct Gfx {
    ctx: ApiContext,
    owner: Owner,
}

impl Gfx {
    pub fn new(ctx: ApiContext, owner: Owner) -> Self {
        Self { ctx, owner }
    }

    fn draw(&self, primitive: impl FnOnce(u64) -> GfxPrimitive) -> mlua::Result<bool> {
        self.ctx.require("gfx", |owner, _| owner == self.owner)?;
        let mut world = self.ctx.world_mut()?;
        let primitive = primitive(world.time);
        let team = match self.owner {
            Owner::Team(t) => Some(t),
            Owner::Stage => None,
        };
        Ok(world.add_gfx(team, primitive))
    }
}

impl UserData for Gfx {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method(
            "drawRectangle",
            |_, this, (left, bottom, width, height, extra): (f64, f64, f64, f64, Variadic<f64>)| {
                let extra = Extra(extra.to_vec());
                this.draw(|time| {
                    GfxPrimitive::Rectangle(GfxRectangle {
                        left,
                        bottom,
                        width,
                        height,
                        rotation: extra.at(0, 0.0),
                        style: extra.style(1),
                        start_time: time,
                        draw_ticks: extra.ticks(10),
                    })
                })
            },
        );
        methods.add_method(
            "drawLine",
            |_, this, (x, y, angle, length, extra): (f64, f64, f64, f64, Variadic<f64>)| {
                let extra = Extra(extra.to_vec());
                this.draw(|time| {
                    GfxPrimitive::Line(GfxLine {
                        x,
                        y,
                        angle,
                        length,
                        thickness: extra.at(0, 1.0).max(0.0),
                        style: extra.style(1),
                        start_time: time,
                        draw_ticks: extra.ticks(10),
                    })
                })
            },
        );
        methods.add_method(
            "drawCircle",
            |_, this, (x, y, radius, extra): (f64, f64, f64, Variadic<f64>)| {
                let extra = Extra(extra.to_vec());
                this.draw(|time| {
                    GfxPrimitive::Circle(GfxCircle {
                        x,
                        y,
                        radius,
                        style: extra.style(0),
                        start_time: time,
                        draw_ticks: extra.ticks(9),
                    })
                })
            },
        );
        methods.add_method(
            "drawText",
            |_, this, (text, x, y, extra): (String, f64, f64, Variadic<f64>)| {
                let extra = Extra(extra.to_vec());
                this.draw(|time| {
                    GfxPrimitive::Text(GfxText {
                        text,
                        x,
                        y,
                        font_size: extra.at(0, 12.0).max(1.0) as u32,
                        color: extra.color(1),
                        start_time: time,
                        draw_ticks: extra.ticks(5),
                    })
                })
            },
        );
    }
}

// Stage builder

/// Arena construction, valid only during the stage's `configure`
#[derive(Clone)]
pub struct StageBuilder {
    ctx: ApiContext,
    speed_limit: f64,
}

impl StageBuilder {
    pub fn new(ctx: ApiContext, speed_limit: f64) -> Self {
        Self { ctx, speed_limit }
    }

    fn build<R>(&self, f: impl FnOnce(&mut World) -> R) -> mlua::Result<R> {
        self.ctx.require("stage builder", |owner, phase| {
            owner == Owner::Stage && phase == CallPhase::Configure
        })?;
        Ok(f(&mut *self.ctx.world_mut()?))
    }
}

impl UserData for StageBuilder {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("setSize", |_, this, (w, h): (f64, f64)| {
            this.build(|world| world.set_size(w, h))
        });
        methods.add_method("addWall", |_, this, (l, b, w, h): (f64, f64, f64, f64)| {
            this.build(|world| world.add_wall(l, b, w, h))
        });
        methods.add_method(
            "addZone",
            |_, this, (l, b, w, h, tag): (f64, f64, f64, f64, Option<String>)| {
                this.build(|world| world.add_zone(l, b, w, h, tag.as_deref().unwrap_or("")))
            },
        );
        methods.add_method("addStart", |_, this, (x, y): (f64, f64)| {
            this.build(|world| world.add_start(x, y))
        });
        methods.add_method("addStageShip", |_, this, path: String| {
            this.build(|world| world.add_stage_ship(&path))
        });
        methods.add_method("setBattleMode", |_, this, on: bool| {
            this.build(|world| world.battle_mode = on)
        });
        methods.add_method("setRelativistic", |_, this, on: bool| {
            let limit = this.speed_limit;
            this.build(|world| world.rules.model = PhysicsModel::new(on, limit))
        });
        methods.add_method("setWallCollisionDamage", |_, this, on: bool| {
            this.build(|world| world.rules.wall_collision_damage = on)
        });
        methods.add_method("setShipCollisionDamage", |_, this, on: bool| {
            this.build(|world| world.rules.ship_collision_damage = on)
        });
    }
}

// Admin

/// Referee powers, for the stage's callbacks after `configure`
#[derive(Clone)]
pub struct Admin {
    ctx: ApiContext,
}

type ShipRef = UserDataRef<ShipHandle>;

impl Admin {
    pub fn new(ctx: ApiContext) -> Self {
        Self { ctx }
    }

    fn admin<R>(&self, f: impl FnOnce(&mut World) -> R) -> mlua::Result<R> {
        self.ctx.require("admin", |owner, phase| {
            owner == Owner::Stage && phase != CallPhase::Configure
        })?;
        Ok(f(&mut *self.ctx.world_mut()?))
    }

    fn ship<R>(
        &self,
        ship: &ShipRef,
        f: impl FnOnce(&mut Ship, &PhysicsModel) -> R,
    ) -> mlua::Result<R> {
        self.admin(|w| {
            let model = w.rules.model;
            f(&mut w.ships[ship.index], &model)
        })
    }
}

const ADMIN_TOGGLES: &[(&str, fn(&mut Ship, bool))] = &[
    ("setShipLaserEnabled", |s, on| s.laser_enabled = on),
    ("setShipTorpedoEnabled", |s, on| s.torpedo_enabled = on),
    ("setShipThrusterEnabled", |s, on| s.thruster_enabled = on),
    ("setShipEnergyEnabled", |s, on| s.energy_enabled = on),
    ("setShipPowerEnabled", |s, on| s.power_enabled = on),
    ("setShipShieldsEnabled", |s, on| s.shields_enabled = on),
    ("setShipShowName", |s, on| s.show_name = on),
];

impl UserData for Admin {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("destroyShip", |_, this, ship: ShipRef| {
            this.admin(|w| w.destroy_ship(ship.index))
        });
        methods.add_method("reviveShip", |_, this, ship: ShipRef| {
            this.admin(|w| w.revive_ship(ship.index))
        });
        methods.add_method("moveShip", |_, this, (ship, x, y): (ShipRef, f64, f64)| {
            this.admin(|w| w.move_ship(ship.index, x, y))
        });
        methods.add_method("setShipSpeed", |_, this, (ship, speed): (ShipRef, f64)| {
            this.ship(&ship, |s, model| {
                let heading = s.heading;
                s.set_velocity(model, speed, heading)
            })
        });
        methods.add_method("setShipHeading", |_, this, (ship, heading): (ShipRef, f64)| {
            this.ship(&ship, |s, model| {
                let speed = s.speed;
                s.set_velocity(model, speed, heading)
            })
        });
        methods.add_method("setShipEnergy", |_, this, (ship, energy): (ShipRef, f64)| {
            this.admin(|w| w.set_ship_energy(ship.index, energy))
        });
        for &(name, set) in ADMIN_TOGGLES {
            methods.add_method(name, move |_, this, (ship, on): (ShipRef, bool)| {
                this.ship(&ship, |s, _| set(s, on))
            });
        }
        methods.add_method("shipEnergy", |_, this, ship: ShipRef| {
            this.ship(&ship, |s, _| s.energy)
        });
        methods.add_method("shipKills", |_, this, ship: ShipRef| this.ship(&ship, |s, _| s.kills));
        methods.add_method("shipDamage", |_, this, ship: ShipRef| {
            this.ship(&ship, |s, _| s.damage)
        });
        methods.add_method("shipFriendlyKills", |_, this, ship: ShipRef| {
            this.ship(&ship, |s, _| s.friendly_kills)
        });
        methods.add_method("shipShowName", |_, this, ship: ShipRef| {
            this.ship(&ship, |s, _| s.show_name)
        });

        methods.add_method("setWinner", |_, this, name: String| {
            this.admin(|w| w.set_winner(&name))
        });
        methods.add_method("setRank", |_, this, (name, rank): (String, u32)| {
            this.admin(|w| w.set_rank(&name, rank))
        });
        methods.add_method("setScore", |_, this, (name, score): (String, f64)| {
            this.admin(|w| w.set_score(&name, score))
        });
        methods.add_method("setStatistic", |_, this, (name, key, value): (String, String, f64)| {
            this.admin(|w| w.set_statistic(&name, &key, value))
        });
        methods.add_method("roundOver", |_, this, ()| this.admin(|w| w.round_over = true));
        methods.add_method("gameOver", |_, this, ()| this.admin(|w| w.game_over = true));
        methods.add_method(
            "drawText",
            |_, this, (text, x, y, extra): (String, f64, f64, Variadic<f64>)| {
                let extra = Extra(extra.to_vec());
                let size = extra.at(0, 20.0).max(1.0) as u32;
                this.admin(|w| w.add_stage_text(&text, x, y, size, extra.color(1), extra.ticks(5)))
            },
        );
        methods.add_method("sendEvent", |_, this, (team, text): (String, String)| {
            this.admin(|w| {
                if let Some(t) = w.team_index(&team) {
                    w.sensors.push_stage_event(t, text);
                }
            })
        });
    }
}

// Argument builders

/// Enemy ships a team can see, from the start-of-tick snapshot
pub fn enemies_table(lua: &Lua, world: &World, team: usize) -> mlua::Result<Table> {
    let list = lua.create_table()?;
    for (n, i) in world.visible_enemies(team).into_iter().enumerate() {
        let ship = &world.old_ships[i];
        let t = lua.create_table()?;
        t.set("index", i)?;
        t.set("x", ship.pos.x)?;
        t.set("y", ship.pos.y)?;
        t.set("heading", ship.heading)?;
        t.set("speed", ship.speed)?;
        t.set("energy", ship.energy)?;
        t.set("name", world.properties[i].name.as_str())?;
        t.set("teamName", world.teams[ship.team_index].name.as_str())?;
        t.set("isStageShip", world.properties[i].stage_ship)?;
        list.set(n + 1, t)?;
    }
    Ok(list)
}

pub fn team_sensors_value(lua: &Lua, sensors: &TeamSensors) -> mlua::Result<Value> {
    lua.to_value(sensors)
}

pub fn stage_sensors_value(lua: &Lua, sensors: &StageSensors) -> mlua::Result<Value> {
    lua.to_value(sensors)
}

/// One ship handle, or a 1-based array when `as_list` is set
pub fn ship_handles(
    lua: &Lua,
    ctx: &ApiContext,
    ships: &[(usize, usize)],
    as_list: bool,
) -> mlua::Result<Value> {
    if !as_list {
        if let Some(&(index, team)) = ships.first() {
            let handle = lua.create_userdata(ShipHandle::new(ctx.clone(), index, team))?;
            return Ok(Value::UserData(handle));
        }
    }
    let list = lua.create_table()?;
    for (n, &(index, team)) in ships.iter().enumerate() {
        list.set(n + 1, ShipHandle::new(ctx.clone(), index, team))?;
    }
    Ok(Value::Table(list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::physics::PhysicsRules;
    use crate::sim::state::Team;

    fn setup() -> (Lua, ApiContext) {
        let mut world = World::new(5, PhysicsRules::default(), true);
        world.build_base_walls();
        world.set_teams(
            vec![Team::new(0, "a", "a", 0, 1, false), Team::new(1, "b", "b", 1, 1, false)],
            vec![ShipProperties::new("a", false, false), ShipProperties::new("b", false, false)],
        );
        world.add_start(100.0, 100.0);
        world.add_start(400.0, 100.0);
        world.init_round();
        let ctx = ApiContext::new(Rc::new(RefCell::new(world)), Rc::new(CallGate::default()));
        (Lua::new(), ctx)
    }

    #[test]
    fn test_ship_handle_gated_by_owner_and_phase() {
        let (lua, ctx) = setup();
        lua.globals()
            .set("ship", ShipHandle::new(ctx.clone(), 0, 0))
            .unwrap();

        // No callback running
        assert!(lua.load("return ship:x()").eval::<f64>().is_err());

        ctx.gate.enter(Owner::Team(0), CallPhase::Init);
        assert_eq!(lua.load("return ship:x()").eval::<f64>().unwrap(), 100.0);
        lua.load("ship:setName('  Sitting Duck  ')").exec().unwrap();
        assert!(lua.load("ship:fireLaser(0)").exec().is_err());

        ctx.gate.enter(Owner::Team(0), CallPhase::Run);
        ctx.world.borrow_mut().ships[0].torpedo_gun_heat = 0;
        assert!(lua.load("return ship:fireTorpedo(0, 50)").eval::<bool>().unwrap());
        assert!(lua.load("ship:setName('late')").exec().is_err());

        ctx.gate.enter(Owner::Team(1), CallPhase::Run);
        assert!(lua.load("return ship:energy()").eval::<f64>().is_err());

        ctx.gate.enter(Owner::Stage, CallPhase::Run);
        assert_eq!(lua.load("return ship:name()").eval::<String>().unwrap(), "Sitting Duck");
        assert_eq!(lua.load("return ship:torpedoAmmo()").eval::<u32>().unwrap(), TORPEDO_AMMO - 1);
    }

    #[test]
    fn test_thruster_force_clamped() {
        let (lua, ctx) = setup();
        lua.globals().set("ship", ShipHandle::new(ctx.clone(), 0, 0)).unwrap();
        ctx.gate.enter(Owner::Team(0), CallPhase::Run);
        lua.load("ship:fireThruster(1.5, 7)").exec().unwrap();
        let world = ctx.world.borrow();
        assert_eq!(world.ships[0].thruster_force, MAX_THRUSTER_FORCE);
        assert_eq!(world.ships[0].thruster_angle, 1.5);
    }

    #[test]
    fn test_builder_only_in_configure() {
        let (lua, ctx) = setup();
        lua.globals().set("builder", StageBuilder::new(ctx.clone(), 20.0)).unwrap();
        ctx.gate.enter(Owner::Stage, CallPhase::Configure);
        assert!(lua.load("return builder:addZone(0, 0, 10, 10, 'goal')").eval::<bool>().unwrap());
        lua.load("builder:setRelativistic(true)").exec().unwrap();
        ctx.gate.enter(Owner::Stage, CallPhase::Init);
        assert!(lua.load("builder:addWall(0, 0, 10, 10)").exec().is_err());
        let world = ctx.world.borrow();
        assert_eq!(world.zones[0].tag, "goal");
        assert!(world.rules.model.is_relativistic());
    }

    #[test]
    fn test_admin_results_and_events() {
        let (lua, ctx) = setup();
        lua.globals().set("admin", Admin::new(ctx.clone())).unwrap();
        lua.globals().set("duck", ShipHandle::new(ctx.clone(), 1, 1)).unwrap();
        ctx.gate.enter(Owner::Stage, CallPhase::Run);
        lua.load(
            r#"
            admin:setScore("a", 3)
            admin:setScore("nobody", 9)
            admin:setStatistic("b", "laps", 2)
            admin:sendEvent("a", "go")
            admin:setShipLaserEnabled(duck, false)
            admin:destroyShip(duck)
            admin:gameOver()
            "#,
        )
        .exec()
        .unwrap();
        let world = ctx.world.borrow();
        assert_eq!(world.results[0].score, 3.0);
        assert_eq!(world.results[1].stats[0].key, "laps");
        assert_eq!(world.sensors.teams[0].stage_events, vec!["go".to_string()]);
        assert!(!world.ships[1].laser_enabled);
        assert!(!world.ships[1].alive);
        assert!(world.game_over);
    }

    #[test]
    fn test_gfx_optional_arguments() {
        let (lua, ctx) = setup();
        lua.globals().set("gfx", Gfx::new(ctx.clone(), Owner::Team(0))).unwrap();
        ctx.gate.enter(Owner::Team(0), CallPhase::Run);
        lua.load("gfx:drawCircle(10, 10, 5)\ngfx:drawText('hi', 1, 2, 14, 255, 0, 0, 255, 3)")
            .exec()
            .unwrap();
        let world = ctx.world.borrow();
        let gfx = &world.teams[0].gfx;
        assert_eq!(gfx.circles[0].style.fill, Rgba::WHITE);
        assert_eq!(gfx.circles[0].draw_ticks, 1);
        assert_eq!(gfx.texts[0].color, Rgba::rgb(255, 0, 0));
        assert_eq!(gfx.texts[0].font_size, 14);
        assert_eq!(gfx.texts[0].draw_ticks, 3);
    }

    #[test]
    fn test_sensor_tables_use_script_names() {
        let lua = Lua::new();
        let mut sensors = TeamSensors::default();
        sensors.stage_events.push("hello".into());
        lua.globals().set("sensors", team_sensors_value(&lua, &sensors).unwrap()).unwrap();
        assert_eq!(lua.load("return sensors.stageEvents[1]").eval::<String>().unwrap(), "hello");
        assert_eq!(lua.load("return #sensors.hitByLaser").eval::<i64>().unwrap(), 0);
    }
}
