//! CPU deadline enforcement for script callbacks
//!
//! One background thread advances a tick counter at a fixed interval. When a
//! callback is armed and the counter passes its deadline, the thread raises
//! the shared kill flag. The Lua instruction hook installed by each sandbox
//! polls that flag and aborts the running call. The thread never touches
//! simulation state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Default)]
struct Shared {
    ticks: AtomicU64,
    expires_at: AtomicU64,
    active: AtomicBool,
    shutdown: AtomicBool,
}

pub struct Watchdog {
    shared: Arc<Shared>,
    kill: Arc<AtomicBool>,
    deadline_ticks: u64,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start the timer thread
    pub fn spawn(interval: Duration, deadline_ticks: u64) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let kill = Arc::new(AtomicBool::new(false));
        let handle = {
            let shared = Arc::clone(&shared);
            let kill = Arc::clone(&kill);
            thread::Builder::new()
                .name("script-watchdog".into())
                .spawn(move || timer_loop(&shared, &kill, interval))?
        };
        Ok(Self {
            shared,
            kill,
            deadline_ticks: deadline_ticks.max(1),
            handle: Some(handle),
        })
    }

    /// Flag polled by sandbox instruction hooks
    pub fn kill_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.kill)
    }

    /// Start timing a callback
    pub fn arm(&self) {
        self.kill.store(false, Ordering::SeqCst);
        let now = self.shared.ticks.load(Ordering::SeqCst);
        self.shared.expires_at.store(now + self.deadline_ticks, Ordering::SeqCst);
        self.shared.active.store(true, Ordering::SeqCst);
    }

    /// Stop timing; returns true if the callback was killed
    pub fn disarm(&self) -> bool {
        self.shared.active.store(false, Ordering::SeqCst);
        self.kill.swap(false, Ordering::SeqCst)
    }

    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }

    /// Stop and join the timer thread
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: &Shared, kill: &AtomicBool, interval: Duration) {
    loop {
        thread::park_timeout(interval);
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let now = shared.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if shared.active.load(Ordering::SeqCst) && now >= shared.expires_at.load(Ordering::SeqCst) {
            log::trace!("watchdog deadline passed at tick {now}");
            kill.store(true, Ordering::SeqCst);
        }
    }
}
