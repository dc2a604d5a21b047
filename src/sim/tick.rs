//! Match lifecycle and the per-tick sequence
//!
//! The engine owns the world, one sandbox per team, the stage sandbox and
//! the watchdog. It drives scripts through configure, init, run, roundOver
//! and gameOver, containing team failures and surfacing stage failures.

use std::cell::{Ref, RefCell};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use mlua::{IntoLuaMulti, Lua};

use super::events::{ConsoleHandler, EventHandler};
use super::state::{Ship, ShipProperties, Team};
use super::world::World;
use crate::consts::MAX_NAME_LENGTH;
use crate::error::{EngineError, LoadError, ScriptError};
use crate::loader::{Loader, ScriptSource, relative_dir};
use crate::results::{MatchResult, ShipSummary, TeamResult, TeamSummary, ranked};
use crate::script::api::{
    Admin, ApiContext, CallGate, CallPhase, Gfx, Owner, StageBuilder, WorldHandle, enemies_table,
    ship_handles, stage_sensors_value, team_sensors_value,
};
use crate::script::sandbox::{Callback, ScriptSandbox};
use crate::script::watchdog::Watchdog;
use crate::settings::MatchSettings;

/// Where the engine is in the match lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Uninitialized,
    StageConfigured,
    ShipsInitialized,
    Running,
    RoundOver,
    GameOver,
    /// The watchdog is stopped or the stage failed; nothing more runs
    Terminal,
}

/// A ship script waiting to be loaded into a team
struct ShipEntry {
    requested: String,
    source: Result<ScriptSource, LoadError>,
    stage_ship: bool,
}

pub struct Engine {
    settings: MatchSettings,
    loader: Box<dyn Loader>,
    world: Rc<RefCell<World>>,
    gate: Rc<CallGate>,
    watchdog: Watchdog,
    stage: Option<ScriptSandbox>,
    stage_name: String,
    /// Stages base directory and the stage's own directory
    stage_dirs: Option<(PathBuf, PathBuf)>,
    /// Indexed by team; None once a team is disabled
    sandboxes: Vec<Option<ScriptSandbox>>,
    phase: EnginePhase,
}

impl Engine {
    pub fn new(settings: MatchSettings, loader: Box<dyn Loader>) -> Result<Self, EngineError> {
        let watchdog = Watchdog::spawn(
            Duration::from_millis(settings.watchdog.interval_ms.max(1)),
            settings.watchdog.deadline_ticks,
        )
        .map_err(EngineError::Watchdog)?;
        let mut world = World::new(settings.seed, settings.physics.rules(), settings.battle_mode);
        world.user_gfx_enabled = settings.user_gfx;
        Ok(Self {
            settings,
            loader,
            world: Rc::new(RefCell::new(world)),
            gate: Rc::new(CallGate::default()),
            watchdog,
            stage: None,
            stage_name: String::new(),
            stage_dirs: None,
            sandboxes: Vec::new(),
            phase: EnginePhase::Uninitialized,
        })
    }

    pub fn add_event_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.world.borrow_mut().add_event_handler(handler);
    }

    fn expect_phase(&self, expected: &[EnginePhase]) -> Result<(), EngineError> {
        if expected.contains(&self.phase) {
            return Ok(());
        }
        let names: Vec<String> = expected.iter().map(|p| format!("{p:?}")).collect();
        Err(EngineError::InvalidPhase {
            expected: names.join(" or "),
            actual: format!("{:?}", self.phase),
        })
    }

    fn ctx(&self) -> ApiContext {
        ApiContext::new(Rc::clone(&self.world), Rc::clone(&self.gate))
    }

    // Stage setup

    /// Load a stage from `stages_dir` and run its `configure`
    pub fn init_stage(&mut self, stages_dir: &Path, name: &str) -> Result<(), EngineError> {
        self.expect_phase(&[EnginePhase::Uninitialized])?;
        let source = self.loader.load(stages_dir, name)?;
        self.stage_dirs = Some((stages_dir.to_path_buf(), source.dir.clone()));
        let chunk = source.path.display().to_string();
        self.configure_stage(&source.name, &chunk, &source.code)
    }

    /// Configure a stage from in-memory source; it cannot declare stage ships
    pub fn init_stage_source(&mut self, name: &str, code: &str) -> Result<(), EngineError> {
        self.expect_phase(&[EnginePhase::Uninitialized])?;
        self.configure_stage(name, name, code)
    }

    fn configure_stage(&mut self, name: &str, chunk: &str, code: &str) -> Result<(), EngineError> {
        let console = script_console(Rc::clone(&self.world), None, format!("stage {name}"));
        let hook = self.settings.watchdog.hook_instructions;
        let sandbox = ScriptSandbox::load(name, chunk, code, &self.watchdog, hook, console)
            .map_err(|source| EngineError::Stage {
                name: name.to_string(),
                source,
            })?;
        self.stage = Some(sandbox);
        self.stage_name = name.to_string();

        let builder = StageBuilder::new(self.ctx(), self.settings.physics.speed_limit);
        self.stage_call(Callback::Configure, CallPhase::Configure, |_| Ok(builder))?;

        let mut world = self.world.borrow_mut();
        world.build_base_walls();
        log::info!(
            "Stage {name}: {}x{}, {} walls, {} zones, {} starts, {} stage ships",
            world.width,
            world.height,
            world.inner_wall_lines.len() / 4,
            world.zones.len(),
            world.starts.len(),
            world.stage_ship_paths.len()
        );
        self.phase = EnginePhase::StageConfigured;
        Ok(())
    }

    // Ship setup

    /// Load one team per name from `ships_dir`, then run every `init`
    pub fn init_ships(&mut self, ships_dir: &Path, names: &[String]) -> Result<(), EngineError> {
        self.expect_phase(&[EnginePhase::StageConfigured])?;
        let entries = names
            .iter()
            .map(|name| ShipEntry {
                requested: name.clone(),
                source: self.loader.load(ships_dir, name),
                stage_ship: false,
            })
            .collect();
        self.setup_ships(entries)
    }

    /// Like [`Engine::init_ships`] with in-memory `(name, code)` pairs
    pub fn init_ships_sources(&mut self, sources: &[(&str, &str)]) -> Result<(), EngineError> {
        self.expect_phase(&[EnginePhase::StageConfigured])?;
        let entries = sources
            .iter()
            .map(|&(name, code)| ShipEntry {
                requested: name.to_string(),
                source: Ok(ScriptSource {
                    path: PathBuf::from(name),
                    dir: PathBuf::new(),
                    name: name.to_string(),
                    code: code.to_string(),
                }),
                stage_ship: false,
            })
            .collect();
        self.setup_ships(entries)
    }

    fn stage_ship_entries(&self) -> Vec<ShipEntry> {
        let paths = self.world.borrow().stage_ship_paths.clone();
        paths
            .into_iter()
            .map(|path| {
                let source = match &self.stage_dirs {
                    Some((base, dir)) => {
                        let name = relative_dir(base, dir).join(&path);
                        self.loader.load(base, &name.to_string_lossy())
                    }
                    None => Err(LoadError::NotFound(PathBuf::from(&path))),
                };
                ShipEntry {
                    requested: path,
                    source,
                    stage_ship: true,
                }
            })
            .collect()
    }

    fn setup_ships(&mut self, mut entries: Vec<ShipEntry>) -> Result<(), EngineError> {
        entries.extend(self.stage_ship_entries());
        if entries.is_empty() {
            return Err(EngineError::NoTeams);
        }

        let team_size = self.settings.team_size.max(1);
        let mut teams = Vec::with_capacity(entries.len());
        let mut properties = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            let name = match &entry.source {
                Ok(src) => src.name.clone(),
                Err(_) => entry.requested.clone(),
            };
            let num_ships = if entry.stage_ship { 1 } else { team_size };
            teams.push(Team::new(
                index,
                name.clone(),
                entry.requested.clone(),
                properties.len(),
                num_ships,
                entry.stage_ship,
            ));
            for _ in 0..num_ships {
                properties.push(ShipProperties::new(name.clone(), entry.stage_ship, false));
            }
        }
        self.world.borrow_mut().set_teams(teams, properties);

        self.sandboxes = Vec::with_capacity(entries.len());
        let hook = self.settings.watchdog.hook_instructions;
        for (t, entry) in entries.into_iter().enumerate() {
            let loaded = entry.source.map_err(|e| ScriptError::Load {
                name: entry.requested.clone(),
                message: e.to_string(),
            });
            let sandbox = loaded.and_then(|src| {
                let chunk = src.path.display().to_string();
                let console = script_console(Rc::clone(&self.world), Some(t), src.name.clone());
                ScriptSandbox::load(&src.name, &chunk, &src.code, &self.watchdog, hook, console)
            });
            match sandbox {
                Ok(sandbox) => {
                    let mut world = self.world.borrow_mut();
                    world.teams[t].has_round_over = sandbox.has(Callback::RoundOver);
                    world.teams[t].has_game_over = sandbox.has(Callback::GameOver);
                    drop(world);
                    self.sandboxes.push(Some(sandbox));
                }
                Err(err) => {
                    self.sandboxes.push(None);
                    let mut world = self.world.borrow_mut();
                    log::warn!("{}: {err}", entry.requested);
                    mark_disabled(&mut world, t);
                    world.teams[t].errored = true;
                    world.teams[t].log_line(err.to_string());
                }
            }
        }
        self.world.borrow_mut().init_round();

        let num_teams = self.sandboxes.len();
        for t in 0..num_teams {
            let (ships, as_list) = {
                let world = self.world.borrow();
                let team = &world.teams[t];
                let ships: Vec<(usize, usize)> = team.ship_indices().map(|i| (i, t)).collect();
                (ships, team.num_ships > 1)
            };
            let ctx = self.ctx();
            let result = self.team_call(t, Callback::Init, CallPhase::Init, |lua| {
                Ok((
                    ship_handles(lua, &ctx, &ships, as_list)?,
                    WorldHandle::new(ctx.clone(), Owner::Team(t)),
                    Gfx::new(ctx.clone(), Owner::Team(t)),
                ))
            });
            if let Err(err) = result {
                self.team_failed(t, err, true);
            }
        }

        self.finalize_names();
        {
            let world = self.world.borrow();
            let handler = ConsoleHandler::new(
                world.properties.iter().map(|p| p.name.clone()).collect(),
                world.ships.iter().map(|s| s.team_index).collect(),
                world.teams.iter().map(|t| t.name.clone()).collect(),
            );
            drop(world);
            self.add_event_handler(Box::new(handler));
        }

        let ctx = self.ctx();
        let all_ships: Vec<(usize, usize)> = self
            .world
            .borrow()
            .ships
            .iter()
            .map(|s| (s.index, s.team_index))
            .collect();
        self.stage_call(Callback::Init, CallPhase::Init, |lua| {
            Ok((
                ship_handles(lua, &ctx, &all_ships, true)?,
                WorldHandle::new(ctx.clone(), Owner::Stage),
                Admin::new(ctx.clone()),
                Gfx::new(ctx.clone(), Owner::Stage),
            ))
        })?;

        let world = self.world.borrow();
        for team in &world.teams {
            log::info!(
                "Team {} ({} ship{}){}",
                team.name,
                team.num_ships,
                if team.num_ships == 1 { "" } else { "s" },
                if team.disabled { " [disabled]" } else { "" }
            );
        }
        drop(world);
        self.phase = EnginePhase::ShipsInitialized;
        Ok(())
    }

    /// Single-ship teams take their ship's name; duplicates get " 2", " 3", ...
    fn finalize_names(&mut self) {
        let mut world = self.world.borrow_mut();
        for t in 0..world.teams.len() {
            let team = &world.teams[t];
            if team.num_ships == 1 && !team.disabled {
                let name = world.properties[team.first_ship_index].name.clone();
                world.rename_team(t, &name);
            }
        }
        let ship_names = dedupe(world.properties.iter().map(|p| p.name.clone()));
        for (props, name) in world.properties.iter_mut().zip(ship_names) {
            props.name = name;
        }
        let team_names = dedupe(world.teams.iter().map(|t| t.name.clone()));
        for (t, name) in team_names.into_iter().enumerate() {
            world.rename_team(t, &name);
        }
    }

    // Script calls

    fn team_call<A: IntoLuaMulti>(
        &self,
        team: usize,
        callback: Callback,
        phase: CallPhase,
        args: impl FnOnce(&Lua) -> mlua::Result<A>,
    ) -> Result<Duration, ScriptError> {
        let Some(sandbox) = self.sandboxes.get(team).and_then(Option::as_ref) else {
            return Ok(Duration::ZERO);
        };
        if !sandbox.has(callback) {
            return Ok(Duration::ZERO);
        }
        let args = args(sandbox.lua()).map_err(|e| ScriptError::Runtime {
            callback: callback.name().to_string(),
            message: e.to_string(),
        })?;
        self.gate.enter(Owner::Team(team), phase);
        let result = sandbox.call(callback, args, &self.watchdog);
        self.gate.exit();
        result
    }

    /// Stage callbacks; any failure ends the match
    fn stage_call<A: IntoLuaMulti>(
        &mut self,
        callback: Callback,
        phase: CallPhase,
        args: impl FnOnce(&Lua) -> mlua::Result<A>,
    ) -> Result<(), EngineError> {
        let Some(sandbox) = self.stage.as_ref().filter(|s| s.has(callback)) else {
            return Ok(());
        };
        let to_script_err = |e: mlua::Error| ScriptError::Runtime {
            callback: callback.name().to_string(),
            message: e.to_string(),
        };
        let result = args(sandbox.lua()).map_err(to_script_err).and_then(|args| {
            self.gate.enter(Owner::Stage, phase);
            let result = sandbox.call(callback, args, &self.watchdog);
            self.gate.exit();
            result
        });
        match result {
            Ok(_) => Ok(()),
            Err(source) => {
                log::error!("stage {}: {source}", self.stage_name);
                self.phase = EnginePhase::Terminal;
                Err(EngineError::Stage {
                    name: self.stage_name.clone(),
                    source,
                })
            }
        }
    }

    fn record_cpu(&self, team: usize, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.world.borrow_mut().teams[team].cpu.record(micros);
    }

    /// Contain a team failure; fatal ones (and any failure in `init`) disable the team
    fn team_failed(&mut self, team: usize, err: ScriptError, always_disable: bool) {
        let disable = always_disable || err.is_fatal();
        let mut world = self.world.borrow_mut();
        log::warn!("{}: {err}", world.teams[team].name);
        world.teams[team].errored = true;
        world.teams[team].log_line(err.to_string());
        if disable {
            mark_disabled(&mut world, team);
            world.sensors.take_team(team);
            let range = world.teams[team].ship_indices();
            for i in range {
                world.destroy_ship(i);
            }
            drop(world);
            if let Some(slot) = self.sandboxes.get_mut(team) {
                *slot = None;
            }
        }
    }

    // Ticks

    /// Advance the match by one tick
    pub fn process_tick(&mut self) -> Result<(), EngineError> {
        self.expect_phase(&[EnginePhase::ShipsInitialized, EnginePhase::Running])?;
        self.phase = EnginePhase::Running;
        {
            let mut world = self.world.borrow_mut();
            world.time += 1;
            world.physics_over = false;
            world.update_ships_alive();
            world.update_team_vision();
            world.clear_stale();
            world.roll_snapshots();
        }

        for t in 0..self.sandboxes.len() {
            let sensors = {
                let mut world = self.world.borrow_mut();
                let team = &world.teams[t];
                if team.disabled || team.ships_alive == 0 {
                    world.sensors.take_team(t);
                    continue;
                }
                let range = team.ship_indices();
                for i in range {
                    if world.ships[i].alive {
                        world.ships[i].begin_tick();
                    }
                }
                world.sensors.take_team(t)
            };
            let result = self.team_call(t, Callback::Run, CallPhase::Run, |lua| {
                let enemies = enemies_table(lua, &self.world.borrow(), t)?;
                Ok((enemies, team_sensors_value(lua, &sensors)?))
            });
            match result {
                Ok(elapsed) => self.record_cpu(t, elapsed),
                Err(err) => self.team_failed(t, err, false),
            }
        }

        self.world.borrow_mut().run_physics();

        let sensors = self.world.borrow_mut().sensors.take_stage();
        self.stage_call(Callback::Run, CallPhase::Run, |lua| stage_sensors_value(lua, &sensors))
    }

    pub fn is_round_over(&self) -> bool {
        self.world.borrow().round_over
    }

    pub fn is_game_over(&self) -> bool {
        self.world.borrow().game_over
    }

    /// Run `roundOver` callbacks and reset user ships for the next round
    pub fn process_round_over(&mut self) -> Result<(), EngineError> {
        self.expect_phase(&[EnginePhase::ShipsInitialized, EnginePhase::Running])?;
        self.phase = EnginePhase::RoundOver;
        log::info!("Round over @ {}", self.time());
        self.lifecycle_callbacks(Callback::RoundOver, CallPhase::RoundOver)?;
        {
            let mut world = self.world.borrow_mut();
            world.next_round();
            world.sensors.clear();
        }
        self.phase = EnginePhase::Running;
        Ok(())
    }

    /// Run `gameOver` callbacks and settle ranks and the winner
    pub fn process_game_over(&mut self) -> Result<(), EngineError> {
        self.expect_phase(&[
            EnginePhase::ShipsInitialized,
            EnginePhase::Running,
            EnginePhase::RoundOver,
        ])?;
        self.phase = EnginePhase::GameOver;
        log::info!("Game over @ {}", self.time());
        self.lifecycle_callbacks(Callback::GameOver, CallPhase::GameOver)?;
        let mut world = self.world.borrow_mut();
        world.game_over = true;
        world.process_results();
        if let Some(winner) = &world.standings.winner {
            log::info!("Winner: {winner}");
        }
        Ok(())
    }

    fn lifecycle_callbacks(
        &mut self,
        callback: Callback,
        phase: CallPhase,
    ) -> Result<(), EngineError> {
        for t in 0..self.sandboxes.len() {
            if self.world.borrow().teams[t].disabled {
                continue;
            }
            let defined = self.sandboxes[t].as_ref().is_some_and(|s| s.has(callback));
            if !defined {
                continue;
            }
            match self.team_call(t, callback, phase, |_| Ok(())) {
                Ok(elapsed) => self.record_cpu(t, elapsed),
                Err(err) => self.team_failed(t, err, false),
            }
        }
        self.stage_call(callback, phase, |_| Ok(()))
    }

    /// Tick until the stage ends the game or the tick limit is reached
    pub fn run_to_completion(&mut self) -> Result<MatchResult, EngineError> {
        while !self.is_game_over() {
            if self.time() >= self.settings.max_ticks {
                log::info!("Tick limit {} reached", self.settings.max_ticks);
                break;
            }
            self.process_tick()?;
            if self.is_round_over() && !self.is_game_over() {
                self.process_round_over()?;
            }
        }
        self.process_game_over()?;
        Ok(self.results())
    }

    /// Stop the watchdog; the engine accepts no further calls
    pub fn close(&mut self) {
        self.watchdog.shutdown();
        self.phase = EnginePhase::Terminal;
    }

    // Queries

    pub fn results(&self) -> MatchResult {
        let world = self.world.borrow();
        let shown: Vec<TeamResult> =
            world.results.iter().filter(|r| r.show_result).cloned().collect();
        let teams = world
            .teams
            .iter()
            .map(|team| TeamSummary {
                name: team.name.clone(),
                disabled: team.disabled,
                errored: team.errored,
                cpu_total_micros: team.cpu.total_micros,
                cpu_average_micros: team.cpu.average_micros(),
                ships: team
                    .ship_indices()
                    .map(|i| {
                        let ship = &world.ships[i];
                        ShipSummary {
                            name: world.properties[i].name.clone(),
                            alive: ship.alive,
                            energy: ship.energy,
                            kills: ship.kills,
                            friendly_kills: ship.friendly_kills,
                            damage: ship.damage,
                            friendly_damage: ship.friendly_damage,
                            shielded_damage: ship.shielded_damage,
                        }
                    })
                    .collect(),
            })
            .collect();
        MatchResult {
            winner: world.standings.winner.clone(),
            ticks: world.time,
            ranked: ranked(&shown),
            teams,
        }
    }

    pub fn ships(&self) -> Ref<'_, [Ship]> {
        Ref::map(self.world.borrow(), |w| w.ships.as_slice())
    }

    pub fn teams(&self) -> Ref<'_, [Team]> {
        Ref::map(self.world.borrow(), |w| w.teams.as_slice())
    }

    pub fn world(&self) -> Ref<'_, World> {
        self.world.borrow()
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn time(&self) -> u64 {
        self.world.borrow().time
    }

    /// Recent script output and errors for one team
    pub fn console(&self, team: usize) -> Vec<String> {
        self.world
            .borrow()
            .teams
            .get(team)
            .map(|t| t.console.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// `print` sink for a sandbox: the log, plus the team console
fn script_console(
    world: Rc<RefCell<World>>,
    team: Option<usize>,
    label: String,
) -> impl Fn(&str) + 'static {
    move |line: &str| {
        log::info!(target: "tick_arena::script", "[{label}] {line}");
        let Some(t) = team else {
            return;
        };
        if let Ok(mut world) = world.try_borrow_mut() {
            if let Some(team) = world.teams.get_mut(t) {
                team.log_line(line);
            }
        }
    }
}

fn mark_disabled(world: &mut World, team: usize) {
    let range = world.teams[team].ship_indices();
    world.teams[team].disabled = true;
    for props in &mut world.properties[range] {
        props.disabled = true;
        props.owned_by_script = false;
    }
}

/// Repeated names take the first free " 2", " 3", ... suffix
fn dedupe(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    names
        .map(|name| {
            let base: String = name.chars().take(MAX_NAME_LENGTH - 7).collect();
            let mut unique = name;
            let mut n = 1;
            while taken.contains(&unique) {
                n += 1;
                unique = format!("{base} {n}");
            }
            taken.insert(unique.clone());
            unique
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::*;
    use crate::loader::FsLoader;
    use crate::sim::events::{ArenaEvent, EventLog};

    const SITTER: &str = "function run(enemies, sensors) end";

    fn settings() -> MatchSettings {
        let mut settings = MatchSettings::default();
        settings.watchdog.interval_ms = 20;
        settings.max_ticks = 200;
        settings
    }

    fn engine(stage: &str, ships: &[(&str, &str)]) -> Engine {
        let mut engine = Engine::new(settings(), Box::new(FsLoader)).unwrap();
        engine.init_stage_source("test stage", stage).unwrap();
        engine.init_ships_sources(ships).unwrap();
        engine
    }

    const TWO_STARTS: &str = r#"
        function configure(builder)
            builder:addStart(100, 300)
            builder:addStart(200, 300)
        end
    "#;

    #[test]
    fn test_lifecycle_phases() {
        let mut engine = Engine::new(settings(), Box::new(FsLoader)).unwrap();
        assert!(matches!(engine.process_tick(), Err(EngineError::InvalidPhase { .. })));
        engine.init_stage_source("s", TWO_STARTS).unwrap();
        assert_eq!(engine.phase(), EnginePhase::StageConfigured);
        assert!(matches!(
            engine.init_stage_source("s", TWO_STARTS),
            Err(EngineError::InvalidPhase { .. })
        ));
        engine.init_ships_sources(&[("a", SITTER)]).unwrap();
        assert_eq!(engine.phase(), EnginePhase::ShipsInitialized);
        engine.process_tick().unwrap();
        assert_eq!(engine.phase(), EnginePhase::Running);
        assert_eq!(engine.time(), 1);
        engine.close();
        assert_eq!(engine.phase(), EnginePhase::Terminal);
        assert!(engine.process_tick().is_err());
    }

    #[test]
    fn test_no_teams() {
        let mut engine = Engine::new(settings(), Box::new(FsLoader)).unwrap();
        engine.init_stage_source("s", "").unwrap();
        assert!(matches!(engine.init_ships_sources(&[]), Err(EngineError::NoTeams)));
    }

    #[test]
    fn test_stage_ends_game_and_names_winner() {
        let stage = r#"
            function configure(builder) builder:addStart(100, 300) builder:addStart(500, 300) end
            function init(ships, world, admin, gfx) stage = { world = world, admin = admin } end
            function run(sensors)
                if stage.world:time() == 5 then
                    stage.admin:setScore("fast", 2)
                    stage.admin:setScore("slow", 1)
                    stage.admin:gameOver()
                end
            end
        "#;
        let fast = r#"
            function init(ship, world, gfx) me = ship end
            function run(enemies, sensors) me:fireThruster(0, 1) end
        "#;
        let mut engine = engine(stage, &[("fast", fast), ("slow", SITTER)]);
        let result = engine.run_to_completion().unwrap();
        assert_eq!(result.ticks, 5);
        assert_eq!(result.winner.as_deref(), Some("fast"));
        assert_eq!(result.ranked[0].name, "fast");
        assert_eq!(result.ranked[1].rank, 2);
        assert!(engine.ships()[0].pos.x > 100.0);
        assert_eq!(engine.ships()[1].pos.x, 500.0);
        assert_eq!(engine.phase(), EnginePhase::GameOver);
    }

    #[test]
    fn test_watchdog_disables_runaway_team() {
        let spinner = "function run() while true do end end";
        let mut engine = engine(TWO_STARTS, &[("spinner", spinner), ("sitter", SITTER)]);
        let log = EventLog::new();
        let events = log.events();
        engine.add_event_handler(Box::new(log));
        engine.process_tick().unwrap();
        {
            let teams = engine.teams();
            assert!(teams[0].disabled);
            assert!(teams[0].errored);
            assert!(!teams[1].disabled);
        }
        assert!(!engine.ships()[0].alive);
        assert!(engine.ships()[1].alive);
        let reported = events.borrow().iter().any(|e| {
            matches!(e, ArenaEvent::ShipDestroyed(d) if d.ship == 0 && d.destroyers.is_empty())
        });
        assert!(reported);

        // Skipped from now on
        engine.process_tick().unwrap();
        assert_eq!(engine.teams()[0].cpu.total_calls, 0);
        assert_eq!(engine.teams()[1].cpu.total_calls, 2);
    }

    #[test]
    fn test_runtime_error_only_marks_team() {
        let flaky = "function run() error('bad aim') end";
        let mut engine = engine(TWO_STARTS, &[("flaky", flaky), ("sitter", SITTER)]);
        engine.process_tick().unwrap();
        engine.process_tick().unwrap();
        let teams = engine.teams();
        assert!(teams[0].errored);
        assert!(!teams[0].disabled);
        assert!(engine.ships()[0].alive);
        assert!(engine.console(0).iter().any(|l| l.contains("bad aim")));
    }

    #[test]
    fn test_load_failure_leaves_placeholder() {
        let mut engine = engine(TWO_STARTS, &[("broken", "function run( end"), ("sitter", SITTER)]);
        assert!(engine.teams()[0].disabled);
        assert!(!engine.ships()[0].alive);
        engine.process_tick().unwrap();
        let result = engine.results();
        assert!(result.teams[0].disabled);
        assert!(!result.teams[1].disabled);
    }

    #[test]
    fn test_init_failure_disables_team() {
        let bad_init = "function init(ship) error('no') end\nfunction run() end";
        let engine = engine(TWO_STARTS, &[("bad", bad_init), ("sitter", SITTER)]);
        assert!(engine.teams()[0].disabled);
        assert!(!engine.ships()[0].alive);
    }

    #[test]
    fn test_stage_error_is_fatal() {
        let stage = "function run() error('referee fell over') end";
        let mut engine = engine(stage, &[("a", SITTER)]);
        let err = engine.process_tick().unwrap_err();
        assert!(matches!(err, EngineError::Stage { .. }));
        assert_eq!(engine.phase(), EnginePhase::Terminal);
    }

    #[test]
    fn test_duplicate_names_suffixed() {
        let named = "function init(ship) ship:setName('Twin') end";
        let engine = engine(TWO_STARTS, &[("a", named), ("b", named)]);
        let world = engine.world();
        assert_eq!(world.properties[0].name, "Twin");
        assert_eq!(world.properties[1].name, "Twin 2");
        assert_eq!(world.teams[1].name, "Twin 2");
        assert_eq!(world.results[1].name, "Twin 2");
    }

    #[test]
    fn test_dedupe_skips_taken_suffix() {
        let names = ["A", "A", "A 2"].map(String::from);
        assert_eq!(dedupe(names.into_iter()), vec!["A", "A 2", "A 2 2"]);

        let long = "x".repeat(MAX_NAME_LENGTH);
        let names = dedupe([long.clone(), long.clone()].into_iter());
        assert_eq!(names[0], long);
        assert_eq!(names[1], format!("{} 2", &long[..MAX_NAME_LENGTH - 7]));
    }

    #[test]
    fn test_team_of_two_gets_ship_list() {
        let pair = r#"
            function init(ships, world, gfx)
                count = #ships
                ships[2]:setName("second")
            end
            function run() print("ships", count) end
        "#;
        let mut settings = settings();
        settings.team_size = 2;
        let mut engine = Engine::new(settings, Box::new(FsLoader)).unwrap();
        engine.init_stage_source("s", "").unwrap();
        engine.init_ships_sources(&[("pair", pair)]).unwrap();
        engine.process_tick().unwrap();
        assert_eq!(engine.world().properties[1].name, "second");
        assert_eq!(engine.console(0), vec!["ships\t2".to_string()]);
    }

    #[test]
    fn test_laser_hit_reaches_target_sensors() {
        let shooter = r#"
            function init(ship) me = ship end
            function run(enemies, sensors)
                if not fired and me:laserGunHeat() == 0 and #enemies > 0 then
                    fired = me:fireLaser(0)
                end
            end
        "#;
        let target = r#"
            function run(enemies, sensors)
                if #sensors.hitByLaser > 0 then print("hit by", sensors.hitByLaser[1].shooter) end
            end
        "#;
        let mut engine = engine(TWO_STARTS, &[("shooter", shooter), ("target", target)]);
        for _ in 0..12 {
            engine.process_tick().unwrap();
        }
        assert_eq!(engine.console(1), vec!["hit by\t0".to_string()]);
        assert!((engine.ships()[1].energy - (DEFAULT_ENERGY - LASER_DAMAGE)).abs() < 1e-9);
        assert!((engine.ships()[0].damage - LASER_DAMAGE / DEFAULT_ENERGY).abs() < 1e-9);
    }

    #[test]
    fn test_round_over_resets_ships() {
        let stage = r#"
            function configure(builder) builder:addStart(100, 300) builder:addStart(200, 300) end
            function init(ships, world, admin) ref = { world = world, admin = admin } end
            function run() if ref.world:time() == 3 then ref.admin:roundOver() end end
        "#;
        let mover = r#"
            function init(ship) me = ship end
            function run() me:fireThruster(math.pi, 1) end
            function roundOver() print("round done") end
        "#;
        let mut engine = engine(stage, &[("mover", mover), ("sitter", SITTER)]);
        for _ in 0..3 {
            engine.process_tick().unwrap();
        }
        assert!(engine.is_round_over());
        assert!(engine.ships()[0].pos.x < 100.0);
        engine.process_round_over().unwrap();
        assert!(!engine.is_round_over());
        let ship = engine.ships()[0].clone();
        assert_eq!(ship.pos.x, 100.0);
        assert_eq!(ship.speed, 0.0);
        assert_eq!(ship.laser_gun_heat, LASER_HEAT);
        assert_eq!(engine.console(0), vec!["round done".to_string()]);
        engine.process_tick().unwrap();
        assert_eq!(engine.time(), 4);
    }

    #[test]
    fn test_lifecycle_callbacks_count_cpu() {
        let stage = r#"
            function init(ships, world, admin) ref = { world = world, admin = admin } end
            function run() if ref.world:time() == 2 then ref.admin:roundOver() end end
        "#;
        let polite = r#"
            function run() end
            function roundOver() end
            function gameOver() end
        "#;
        let mut engine = engine(stage, &[("polite", polite), ("sitter", SITTER)]);
        engine.process_tick().unwrap();
        engine.process_tick().unwrap();
        engine.process_round_over().unwrap();
        assert_eq!(engine.teams()[0].cpu.total_calls, 3);
        assert_eq!(engine.teams()[1].cpu.total_calls, 2);
        engine.process_game_over().unwrap();
        assert_eq!(engine.teams()[0].cpu.total_calls, 4);
        assert_eq!(engine.teams()[1].cpu.total_calls, 2);
    }

    #[test]
    fn test_admin_drains_ship_energy() {
        let stage = r#"
            function init(ships, world, admin)
                ref = { ships = ships, world = world, admin = admin }
            end
            function run()
                if ref.world:time() == 1 then ref.admin:setShipEnergy(ref.ships[1], -5) end
            end
        "#;
        let log = EventLog::new();
        let events = log.events();
        let mut engine = engine(stage, &[("victim", SITTER), ("sitter", SITTER)]);
        engine.add_event_handler(Box::new(log));
        engine.process_tick().unwrap();
        engine.process_tick().unwrap();
        assert!(!engine.ships()[0].alive);
        assert_eq!(engine.teams()[0].ships_alive, 0);
        assert!(engine.ships()[1].alive);
        let destroyed = events
            .borrow()
            .iter()
            .filter(|e| matches!(e, ArenaEvent::ShipDestroyed(d) if d.ship == 0))
            .count();
        assert_eq!(destroyed, 1);
    }

    #[test]
    fn test_inactive_team_sensors_do_not_pile_up() {
        let stage = r#"
            function init(ships, world, admin) ref = { admin = admin } end
            function run()
                ref.admin:sendEvent("broken", "ping")
                ref.admin:sendEvent("sitter", "ping")
            end
        "#;
        let mut engine = engine(stage, &[("broken", "function run( end"), ("sitter", SITTER)]);
        for _ in 0..5 {
            engine.process_tick().unwrap();
        }
        // Only the last tick's events are pending, for both teams
        let world = engine.world();
        assert_eq!(world.sensors.teams[0].stage_events, vec!["ping".to_string()]);
        assert_eq!(world.sensors.teams[1].stage_events, vec!["ping".to_string()]);
    }

    #[test]
    fn test_retained_handle_rejected_outside_callback() {
        let stage = r#"
            function init(ships, world, admin) first = ships[1] end
            function run() ok, err = pcall(function() first:fireLaser(0) end) assert(not ok) end
        "#;
        let mut engine = engine(stage, &[("a", SITTER)]);
        engine.process_tick().unwrap();
    }

    #[test]
    fn test_ships_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let stages = dir.path().join("stages");
        let ships = dir.path().join("ships");
        std::fs::create_dir_all(stages.join("arena")).unwrap();
        std::fs::create_dir_all(&ships).unwrap();
        std::fs::write(
            stages.join("arena").join("main.lua"),
            "function configure(b) b:addStageShip('guard.lua') end",
        )
        .unwrap();
        std::fs::write(stages.join("arena").join("guard.lua"), SITTER).unwrap();
        std::fs::write(ships.join("sitter.lua"), SITTER).unwrap();

        let mut engine = Engine::new(settings(), Box::new(FsLoader)).unwrap();
        engine.init_stage(&stages, "arena").unwrap();
        engine.init_ships(&ships, &["sitter.lua".to_string()]).unwrap();
        let world = engine.world();
        assert_eq!(world.teams.len(), 2);
        assert!(world.teams[1].stage_ship);
        assert!(!world.teams[1].disabled);
        assert!(world.properties[1].stage_ship);
        assert!(!world.ships[1].alive);
        assert!(!world.results[1].show_result);
        drop(world);
        assert_eq!(engine.results().ranked.len(), 1);
    }
}
