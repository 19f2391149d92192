//! Instance (spec §4.D): composes one Worktree, one TerminalSession, and
//! metadata into a single lifecycle-managed agent.
//!
//! Grounded on `ccm-daemon/src/session.rs`'s `Session` (field layout,
//! `new`/`start`/`stop`/`status` shape), adapted to own a tmux-backed
//! `TerminalSession` plus an optional dedicated `Worktree` instead of a
//! directly-forked PTY.

use crate::diff::DiffStats;
use crate::error::InstanceError;
use crate::sanitize::tmux_session_name;
use crate::store::{DiffStatsRecord, InstanceStatus, SnapshotRecord, WorktreeDescriptor};
use crate::terminal::TerminalSession;
use crate::worktree::{Worktree, WorktreeManager};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

const MAX_TITLE_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct NewInstanceOptions {
    pub title: String,
    pub path: PathBuf,
    pub program: String,
    pub auto_yes: bool,
    pub in_place: bool,
    /// No real host terminal will ever attach to this Instance (spec §4.B
    /// "no-TTY" mode, used by the web-only driver): forces fixed 80x24 and
    /// skips window-size tracking if `Attach()` is ever invoked anyway.
    pub headless: bool,
}

pub struct Instance {
    title: String,
    path: PathBuf,
    program: String,
    status: InstanceStatus,
    auto_yes: bool,
    in_place: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    height: u16,
    width: u16,
    terminal: TerminalSession,
    worktree: Option<Worktree>,
    diff_stats: DiffStats,
}

impl Instance {
    /// Validate the title, manufacture a `TerminalSession`, and leave the
    /// Worktree unset — `Start()` is what actually creates it. Status
    /// starts at `Loading`.
    pub fn new(opts: NewInstanceOptions) -> Result<Self, InstanceError> {
        if opts.title.is_empty() {
            return Err(InstanceError::EmptyTitle);
        }
        if opts.title.len() > MAX_TITLE_LEN {
            return Err(InstanceError::TitleTooLong(opts.title));
        }

        let terminal_name = tmux_session_name(&opts.title);
        let now = Utc::now();

        Ok(Self {
            title: opts.title,
            path: opts.path,
            program: opts.program.clone(),
            status: InstanceStatus::Loading,
            auto_yes: opts.auto_yes,
            in_place: opts.in_place,
            created_at: now,
            updated_at: now,
            height: 24,
            width: 80,
            terminal: if opts.headless {
                TerminalSession::new_headless(terminal_name, &opts.program)
            } else {
                TerminalSession::new(terminal_name, &opts.program)
            },
            worktree: None,
            diff_stats: DiffStats::default(),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    pub fn set_auto_yes(&mut self, value: bool) {
        self.auto_yes = value;
        self.touch();
    }

    pub fn in_place(&self) -> bool {
        self.in_place
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// If the multiplexer already has this session, `Restore()`; otherwise
    /// create the worktree (unless `in_place`) and `Start` the terminal.
    /// Best-effort cleans up the worktree on failure.
    pub async fn start(
        &mut self,
        first_time: bool,
        worktrees: &WorktreeManager,
    ) -> Result<(), InstanceError> {
        if self.terminal.tmux_alive().await {
            self.terminal.restore()?;
            self.status = InstanceStatus::Running;
            self.touch();
            return Ok(());
        }

        let work_dir = if self.in_place {
            self.path.clone()
        } else {
            if first_time || self.worktree.is_none() {
                let wt = worktrees.setup(&self.path, &self.title)?;
                self.worktree = Some(wt);
            }
            self.worktree
                .as_ref()
                .expect("just set above")
                .worktree_path
                .clone()
        };

        if let Err(e) = self
            .terminal
            .start(&self.program, &work_dir, self.auto_yes)
            .await
        {
            if !self.in_place {
                if let Some(wt) = self.worktree.take() {
                    let _ = worktrees.cleanup(&wt);
                }
            }
            return Err(InstanceError::from(e));
        }

        self.status = InstanceStatus::Running;
        self.touch();
        Ok(())
    }

    /// Close the terminal session, then clean up the worktree. Aggregates
    /// errors rather than stopping at the first.
    pub async fn kill(&mut self, worktrees: &WorktreeManager) -> Result<(), InstanceError> {
        let mut errors = Vec::new();

        if let Err(e) = self.terminal.close().await {
            errors.push(e.to_string());
        }
        if !self.in_place {
            if let Some(wt) = self.worktree.take() {
                if let Err(e) = worktrees.cleanup(&wt) {
                    errors.push(e.to_string());
                }
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(InstanceError::Composite(errors.remove(0))),
            _ => Err(InstanceError::Composite(errors.join("; "))),
        }
    }

    /// Stop the terminal session; keep worktree and branch intact.
    pub async fn pause(&mut self) -> Result<(), InstanceError> {
        if self.in_place {
            return Err(InstanceError::InPlaceUnsupported);
        }
        self.terminal.close().await?;
        self.status = InstanceStatus::Paused;
        self.touch();
        Ok(())
    }

    /// Re-open the terminal session against the existing worktree.
    pub async fn resume(&mut self) -> Result<(), InstanceError> {
        if self.in_place {
            return Err(InstanceError::InPlaceUnsupported);
        }
        if self.status != InstanceStatus::Paused {
            return Err(InstanceError::NotPaused);
        }
        let wt = self
            .worktree
            .as_ref()
            .ok_or(InstanceError::InPlaceUnsupported)?;
        self.terminal
            .start(&self.program, &wt.worktree_path, self.auto_yes)
            .await?;
        self.status = InstanceStatus::Running;
        self.touch();
        Ok(())
    }

    pub fn send_prompt(&self, text: &str) -> Result<(), InstanceError> {
        Ok(self.terminal.send_keys(text.as_bytes())?)
    }

    pub fn tap_enter(&self) -> Result<(), InstanceError> {
        Ok(self.terminal.tap_enter()?)
    }

    pub async fn preview(&self) -> Result<String, InstanceError> {
        Ok(self.terminal.capture_pane_content().await?)
    }

    pub async fn has_updated(&mut self) -> Result<(bool, bool), InstanceError> {
        Ok(self.terminal.has_updated(self.auto_yes).await?)
    }

    /// Recompute diff via the Worktree Manager and cache it on the Instance.
    pub fn update_diff_stats(&mut self, worktrees: &WorktreeManager) {
        if let Some(wt) = &self.worktree {
            self.diff_stats = worktrees.diff(wt);
        }
    }

    pub fn diff_stats(&self) -> &DiffStats {
        &self.diff_stats
    }

    pub fn get_git_worktree(&self) -> Option<&Worktree> {
        self.worktree.as_ref()
    }

    pub async fn tmux_alive(&self) -> bool {
        self.terminal.tmux_alive().await
    }

    pub fn started(&self) -> bool {
        matches!(
            self.status,
            InstanceStatus::Running | InstanceStatus::Ready | InstanceStatus::Paused
        )
    }

    pub fn paused(&self) -> bool {
        self.status == InstanceStatus::Paused
    }

    pub fn set_status(&mut self, status: InstanceStatus) {
        self.status = status;
        self.touch();
    }

    pub fn set_size(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
    }

    pub fn terminal_mut(&mut self) -> &mut TerminalSession {
        &mut self.terminal
    }

    pub fn terminal(&self) -> &TerminalSession {
        &self.terminal
    }

    /// Flat record for the Snapshot Store. Only meaningful once Started.
    pub fn to_record(&self) -> SnapshotRecord {
        SnapshotRecord {
            title: self.title.clone(),
            path: self.path.clone(),
            branch: self
                .worktree
                .as_ref()
                .map(|w| w.branch_name.clone())
                .unwrap_or_default(),
            status: self.status,
            height: self.height,
            width: self.width,
            created_at: self.created_at,
            updated_at: self.updated_at,
            auto_yes: self.auto_yes,
            program: self.program.clone(),
            worktree: self.worktree.as_ref().map(|w| WorktreeDescriptor {
                repo_path: w.repo_path.clone(),
                worktree_path: w.worktree_path.clone(),
                session_name: self.terminal.name().to_string(),
                branch_name: w.branch_name.clone(),
                base_commit_sha: w.base_commit_sha.clone(),
            }),
            diff_stats: DiffStatsRecord {
                added: self.diff_stats.added,
                removed: self.diff_stats.removed,
                content: self.diff_stats.content.clone(),
            },
        }
    }

    /// Rebuild an Instance from a persisted record. The worktree is *not*
    /// recreated if the on-disk directory already exists — it is simply
    /// attached from the descriptor.
    pub fn from_record(record: SnapshotRecord) -> Result<Self, InstanceError> {
        let opts = NewInstanceOptions {
            title: record.title,
            path: record.path,
            program: record.program,
            auto_yes: record.auto_yes,
            in_place: record.worktree.is_none(),
            // `headless` is not part of the persisted schema (spec §6); a
            // reloaded Instance is never headless even if it was before.
            headless: false,
        };
        let mut instance = Self::new(opts)?;
        instance.status = record.status;
        instance.created_at = record.created_at;
        instance.updated_at = record.updated_at;
        instance.height = record.height;
        instance.width = record.width;
        instance.diff_stats = DiffStats {
            added: record.diff_stats.added,
            removed: record.diff_stats.removed,
            content: record.diff_stats.content,
        };

        if let Some(descriptor) = record.worktree {
            if descriptor.worktree_path.exists() {
                instance.worktree = Some(Worktree {
                    repo_path: descriptor.repo_path,
                    worktree_path: descriptor.worktree_path,
                    branch_name: descriptor.branch_name,
                    base_commit_sha: descriptor.base_commit_sha,
                });
            }
        }

        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(title: &str) -> NewInstanceOptions {
        NewInstanceOptions {
            title: title.to_string(),
            path: PathBuf::from("/tmp/repo"),
            program: "claude".to_string(),
            auto_yes: false,
            in_place: false,
            headless: false,
        }
    }

    #[test]
    fn headless_option_selects_a_headless_terminal() {
        let mut opts = opts("demo");
        opts.headless = true;
        let instance = Instance::new(opts).unwrap();
        assert!(instance.terminal().is_headless());
    }

    #[test]
    fn new_rejects_empty_title() {
        let err = Instance::new(opts("")).unwrap_err();
        assert!(matches!(err, InstanceError::EmptyTitle));
    }

    #[test]
    fn new_rejects_title_over_32_chars() {
        let long = "x".repeat(33);
        let err = Instance::new(opts(&long)).unwrap_err();
        assert!(matches!(err, InstanceError::TitleTooLong(_)));
    }

    #[test]
    fn new_starts_in_loading_status() {
        let instance = Instance::new(opts("demo")).unwrap();
        assert_eq!(instance.status(), InstanceStatus::Loading);
        assert!(!instance.started());
    }

    #[test]
    fn to_record_round_trips_basic_fields() {
        let instance = Instance::new(opts("demo")).unwrap();
        let record = instance.to_record();
        assert_eq!(record.title, "demo");
        assert_eq!(record.program, "claude");
        assert!(record.worktree.is_none());
    }
}
