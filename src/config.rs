//! Process-wide configuration, passed explicitly rather than read from
//! module-level singletons (spec §9 "Global state").

use std::path::PathBuf;
use std::time::Duration;

/// Compile-time global instance cap (spec §6).
pub const GLOBAL_INSTANCE_LIMIT: usize = 10;

/// Options consumed when starting a new Instance (spec §6 CLI surface).
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub program: String,
    pub auto_yes: bool,
    pub simple_mode: bool,
    pub web_server_enabled: bool,
    pub web_server_port: u16,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            auto_yes: false,
            simple_mode: false,
            web_server_enabled: false,
            web_server_port: 8765,
        }
    }
}

/// Tick cadences and the instance cap, constructed once and handed to the
/// [`crate::supervisor::Supervisor`] — never read from a singleton.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub instance_limit: usize,
    pub metadata_tick: Duration,
    pub preview_tick_initial: Duration,
    pub preview_tick_steady: Duration,
    /// How long the fast ("initial") preview cadence lasts before relaxing.
    pub preview_tick_relax_after: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            instance_limit: GLOBAL_INSTANCE_LIMIT,
            metadata_tick: Duration::from_millis(500), // 2 Hz
            preview_tick_initial: Duration::from_millis(250),
            preview_tick_steady: Duration::from_millis(500),
            preview_tick_relax_after: Duration::from_secs(5),
        }
    }
}

/// Resolves `<config_dir>` and the fixed paths under it (spec §6 on-disk
/// layout), mirroring `AppState::data_dir()` in the teacher.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Resolve against `$HOME/.fleetbench`. Panics if `HOME` cannot be
    /// resolved — the teacher does the same in `AppState::data_dir()`
    /// (`dirs::home_dir().expect(...)`), and the spec requires `HOME` to
    /// resolve as an environment precondition (§6).
    pub fn new() -> Self {
        let home = dirs::home_dir().expect("HOME must resolve to locate the config directory");
        Self {
            root: home.join(".fleetbench"),
        }
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join("worktrees")
    }

    pub fn daemon_pid_file(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    pub fn ensure_root(&self) -> std::io::Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
        }
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
