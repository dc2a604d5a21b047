//! Embedded Lua scripting: sandboxes, the script-facing API and the CPU watchdog

pub mod api;
pub mod sandbox;
pub mod watchdog;

pub use api::{
    Admin, ApiContext, CallGate, CallPhase, Gfx, Owner, ShipHandle, StageBuilder, WorldHandle,
};
pub use sandbox::{Callback, ScriptSandbox};
pub use watchdog::Watchdog;
