//! Error taxonomy for the session supervisor.
//!
//! One `thiserror` enum per concern, aggregated into [`FleetError`] — the
//! same split the teacher uses (`RepoError`/`GitError`/`SessionError`/...
//! rolled into `DaemonError`), adapted to this crate's components.

use std::path::PathBuf;
use thiserror::Error;

/// Worktree Manager errors (spec §4.A).
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("path is not inside a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("worktree path already exists: {0}")]
    PathExists(PathBuf),

    #[error("branch '{0}' is checked out in another worktree")]
    BranchCheckedOutElsewhere(String),

    #[error("git command failed: {command}\n{output}")]
    GitCommand { command: String, output: String },

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("push helper unavailable or unauthenticated: {0}")]
    PushHelperUnavailable(String),

    #[error("{0}")]
    Composite(String),
}

/// Terminal Session errors (spec §4.B).
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("tmux session already exists: {0}")]
    SessionAlreadyExists(String),

    #[error("tmux session did not appear within timeout: {0}")]
    StartTimeout(String),

    #[error("tmux command failed: {command}\n{output}")]
    TmuxCommand { command: String, output: String },

    #[error("session is not running")]
    NotRunning,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Composite(String),
}

/// Snapshot Store errors (spec §4.E).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create data directory: {0}")]
    CreateDir(#[source] std::io::Error),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse state.json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no instance named '{0}' in the store")]
    NotFound(String),
}

/// Instance-level errors (spec §4.D).
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("title must not be empty")]
    EmptyTitle,

    #[error("title '{0}' exceeds 32 characters")]
    TitleTooLong(String),

    #[error("instance is currently checked out elsewhere")]
    CheckedOutElsewhere,

    #[error("operation not available in in_place mode")]
    InPlaceUnsupported,

    #[error("instance is not paused")]
    NotPaused,

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error("{0}")]
    Composite(String),
}

/// Supervisor-level errors (spec §4.F).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("global instance limit of {0} reached")]
    LimitReached(usize),

    #[error("an instance named '{0}' already exists")]
    DuplicateTitle(String),

    #[error("no instance named '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Web Session Gateway errors (spec §4.G).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no instance named '{0}'")]
    NoSuchInstance(String),

    #[error(transparent)]
    Instance(#[from] InstanceError),
}

/// Top-level crate error.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Terminal(#[from] TerminalError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Instance(#[from] InstanceError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub type Result<T> = std::result::Result<T, FleetError>;
