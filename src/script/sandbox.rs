//! One embedded Lua runtime per team (and one for the stage)
//!
//! Scripts get a reduced standard library, a `print` routed to the team
//! console, and an instruction hook that aborts the running call once the
//! watchdog raises its kill flag. Callback presence is detected once, right
//! after the chunk runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, IntoLuaMulti, Lua, LuaOptions, StdLib, Value, Variadic, VmState};

use super::watchdog::Watchdog;
use crate::error::ScriptError;

/// Message raised inside Lua when the watchdog fires
const CANCELLED_MESSAGE: &str = "script cancelled by watchdog";

/// Base-library functions that reach the filesystem
const REMOVED_GLOBALS: &[&str] = &["dofile", "loadfile"];

/// Lifecycle entry points a script may define
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    Configure,
    Init,
    Run,
    RoundOver,
    GameOver,
}

impl Callback {
    pub const ALL: [Callback; 5] = [
        Callback::Configure,
        Callback::Init,
        Callback::Run,
        Callback::RoundOver,
        Callback::GameOver,
    ];

    /// Global function name in the script
    pub fn name(&self) -> &'static str {
        match self {
            Callback::Configure => "configure",
            Callback::Init => "init",
            Callback::Run => "run",
            Callback::RoundOver => "roundOver",
            Callback::GameOver => "gameOver",
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

pub struct ScriptSandbox {
    label: String,
    lua: Lua,
    /// Bitset of defined callbacks
    defined: u8,
}

impl ScriptSandbox {
    /// Create a runtime and run the script's top-level chunk
    ///
    /// `console` receives every line the script prints.
    pub fn load(
        label: &str,
        chunk_name: &str,
        code: &str,
        watchdog: &Watchdog,
        hook_instructions: u32,
        console: impl Fn(&str) + 'static,
    ) -> Result<Self, ScriptError> {
        let load_err = |e: mlua::Error| ScriptError::Load {
            name: label.to_string(),
            message: e.to_string(),
        };
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::new()).map_err(load_err)?;
        install_globals(&lua, console).map_err(load_err)?;
        install_kill_hook(&lua, watchdog.kill_flag(), hook_instructions);

        watchdog.arm();
        let result = lua.load(code).set_name(chunk_name).exec();
        let killed = watchdog.disarm();
        match result {
            Err(_) if killed => {
                return Err(ScriptError::Load {
                    name: label.to_string(),
                    message: CANCELLED_MESSAGE.to_string(),
                });
            }
            Err(e) => return Err(load_err(e)),
            Ok(()) => {}
        }

        let globals = lua.globals();
        let defined = Callback::ALL
            .iter()
            .filter(|cb| matches!(globals.get::<Value>(cb.name()), Ok(Value::Function(_))))
            .fold(0, |bits, cb| bits | cb.bit());
        log::debug!("{label}: loaded {chunk_name}, callbacks {defined:#07b}");
        Ok(Self {
            label: label.to_string(),
            lua,
            defined,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn has(&self, callback: Callback) -> bool {
        self.defined & callback.bit() != 0
    }

    /// Invoke a callback under the watchdog; returns the time it took
    ///
    /// Missing callbacks are skipped and take no time.
    pub fn call(
        &self,
        callback: Callback,
        args: impl IntoLuaMulti,
        watchdog: &Watchdog,
    ) -> Result<Duration, ScriptError> {
        if !self.has(callback) {
            return Ok(Duration::ZERO);
        }
        let runtime_err = |e: mlua::Error| ScriptError::Runtime {
            callback: callback.name().to_string(),
            message: e.to_string(),
        };
        let function: Function = self.lua.globals().get(callback.name()).map_err(runtime_err)?;

        watchdog.arm();
        let start = Instant::now();
        let result = function.call::<()>(args);
        let elapsed = start.elapsed();
        let killed = watchdog.disarm();

        match result {
            Ok(()) => Ok(elapsed),
            Err(_) if killed => {
                log::warn!(
                    "{}: {} killed by watchdog after {:?}",
                    self.label,
                    callback.name(),
                    elapsed
                );
                Err(ScriptError::Cancelled {
                    callback: callback.name().to_string(),
                })
            }
            Err(e) => Err(runtime_err(e)),
        }
    }
}

fn install_globals(lua: &Lua, console: impl Fn(&str) + 'static) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in REMOVED_GLOBALS {
        globals.set(*name, Value::Nil)?;
    }
    let tostring: Function = globals.get("tostring")?;
    let print = lua.create_function(move |_, args: Variadic<Value>| {
        let mut parts = Vec::with_capacity(args.len());
        for value in args {
            parts.push(tostring.call::<String>(value)?);
        }
        console(&parts.join("\t"));
        Ok(())
    })?;
    globals.set("print", print)
}

fn install_kill_hook(lua: &Lua, kill: Arc<AtomicBool>, every: u32) {
    lua.set_hook(HookTriggers::new().every_nth_instruction(every.max(1)), move |_lua, _debug| {
        if kill.load(Ordering::SeqCst) {
            Err(mlua::Error::RuntimeError(CANCELLED_MESSAGE.into()))
        } else {
            Ok(VmState::Continue)
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn watchdog() -> Watchdog {
        Watchdog::spawn(Duration::from_millis(10), 2).unwrap()
    }

    fn load(code: &str, watchdog: &Watchdog) -> Result<ScriptSandbox, ScriptError> {
        ScriptSandbox::load("test", "test.lua", code, watchdog, 100, |_| {})
    }

    #[test]
    fn test_detects_defined_callbacks() {
        let wd = watchdog();
        let sandbox = load("function run() end\nfunction roundOver() end\ninit = 5", &wd).unwrap();
        assert!(sandbox.has(Callback::Run));
        assert!(sandbox.has(Callback::RoundOver));
        assert!(!sandbox.has(Callback::Init));
        assert!(!sandbox.has(Callback::GameOver));
        assert_eq!(sandbox.call(Callback::Init, (), &wd).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_syntax_error_is_load_error() {
        let wd = watchdog();
        let err = load("function run( end", &wd).err().unwrap();
        assert!(matches!(err, ScriptError::Load { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_runtime_error_contained() {
        let wd = watchdog();
        let sandbox = load("function run() error('boom') end", &wd).unwrap();
        let err = sandbox.call(Callback::Run, (), &wd).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { .. }));
        assert!(err.to_string().contains("boom"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_infinite_loop_cancelled() {
        let wd = watchdog();
        let sandbox = load("function run() while true do end end", &wd).unwrap();
        let err = sandbox.call(Callback::Run, (), &wd).unwrap_err();
        assert!(matches!(err, ScriptError::Cancelled { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_print_goes_to_console() {
        let wd = watchdog();
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&lines);
        let code = "function run(n) print('tick', n, nil) end";
        let sandbox = ScriptSandbox::load("t", "t.lua", code, &wd, 100, move |l| {
            sink.borrow_mut().push(l.to_string())
        })
        .unwrap();
        sandbox.call(Callback::Run, 3, &wd).unwrap();
        assert_eq!(*lines.borrow(), vec!["tick\t3\tnil".to_string()]);
    }

    #[test]
    fn test_file_access_removed() {
        let wd = watchdog();
        let sandbox = load("function run() return dofile('x') end", &wd).unwrap();
        assert!(sandbox.call(Callback::Run, (), &wd).is_err());
        assert!(load("io.write('x')", &wd).is_err());
    }
}
