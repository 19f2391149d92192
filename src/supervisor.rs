//! Supervisor (spec §4.F): owns the Instance set, the global cap, the two
//! periodic ticks, and delete/quit mutation ordering.
//!
//! Grounded on `ccm-daemon/src/state.rs`'s `AppState` (`Arc<RwLock<...>>`
//! shared-state idiom, title/id-indexed map) plus `main.rs`'s tick-loop
//! shape, adapted to two distinct cadences and a process-wide cancellation
//! token instead of a single gRPC-request-driven loop.

use crate::config::{Paths, SupervisorConfig};
use crate::error::SupervisorError;
use crate::instance::Instance;
use crate::store::{InstanceStatus, SnapshotStore};
use crate::worktree::WorktreeManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Rate-limits the per-Instance tick-error warn log to once a minute.
struct ErrorRateLimiter {
    last_logged: HashMap<String, Instant>,
}

impl ErrorRateLimiter {
    fn new() -> Self {
        Self {
            last_logged: HashMap::new(),
        }
    }

    fn should_log(&mut self, title: &str) -> bool {
        let now = Instant::now();
        match self.last_logged.get(title) {
            Some(last) if now.duration_since(*last) < std::time::Duration::from_secs(60) => false,
            _ => {
                self.last_logged.insert(title.to_string(), now);
                true
            }
        }
    }
}

/// Shared, title-indexed Instance set plus the collaborators every mutation
/// needs. A single `Supervisor` is the only writer to the Snapshot Store and
/// the only place that may set an Instance to `Attached`.
///
/// Each Instance is behind its own `Mutex` so a long-lived operation on one
/// Instance (`Attach`, in particular, which can block for the whole lifetime
/// of a host terminal session) only ever holds that Instance's lock, never
/// the map's. The map's `RwLock` is held only for the instant it takes to
/// look up and clone an `Arc`.
pub struct Supervisor {
    instances: RwLock<HashMap<String, Arc<Mutex<Instance>>>>,
    worktrees: WorktreeManager,
    store: SnapshotStore,
    config: SupervisorConfig,
    attach_lock: Mutex<()>,
    errors: Mutex<ErrorRateLimiter>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(paths: &Paths, config: SupervisorConfig) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            worktrees: WorktreeManager::new(paths.worktrees_dir()),
            store: SnapshotStore::new(paths.state_file()),
            config,
            attach_lock: Mutex::new(()),
            errors: Mutex::new(ErrorRateLimiter::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Clone the Instance's `Arc` under a brief read lock; the caller then
    /// locks the Instance itself without holding the map lock.
    async fn get_arc(&self, title: &str) -> Option<Arc<Mutex<Instance>>> {
        self.instances.read().await.get(title).cloned()
    }

    /// Load persisted Instances, reconciling stale `in_place` entries (spec
    /// §4.F) before handing the set back to the caller for `Start`.
    pub async fn load(&self, cwd: &std::path::Path) -> Result<(), SupervisorError> {
        let records = self.store.load_instances()?;
        let mut loaded = Vec::new();
        let mut stale_titles = Vec::new();

        for record in records {
            let in_place = record.worktree.is_none();
            let title = record.title.clone();
            let path = record.path.clone();
            let instance = Instance::from_record(record)?;

            if in_place && path == cwd && !instance.tmux_alive().await {
                stale_titles.push(title);
                continue;
            }
            loaded.push(instance);
        }

        let mut instances = self.instances.write().await;
        for instance in loaded {
            instances.insert(instance.title().to_string(), Arc::new(Mutex::new(instance)));
        }
        drop(instances);

        for title in stale_titles {
            if let Err(e) = self.store.delete_instance(&title) {
                warn!(%title, error = %e, "failed to reconcile stale in_place instance");
            }
        }
        Ok(())
    }

    /// Enforce the global cap and uniqueness, then insert and `Start` the
    /// Instance.
    pub async fn create(
        &self,
        mut instance: Instance,
        first_time: bool,
    ) -> Result<(), SupervisorError> {
        {
            let instances = self.instances.read().await;
            if instances.len() >= self.config.instance_limit {
                return Err(SupervisorError::LimitReached(self.config.instance_limit));
            }
            if instances.contains_key(instance.title()) {
                return Err(SupervisorError::DuplicateTitle(instance.title().to_string()));
            }
        }

        instance.start(first_time, &self.worktrees).await?;
        let title = instance.title().to_string();

        let mut instances = self.instances.write().await;
        instances.insert(title, Arc::new(Mutex::new(instance)));
        drop(instances);

        self.persist().await?;
        Ok(())
    }

    /// Mutation order for delete (spec §4.F): branch-checked-out-elsewhere
    /// check → remove from the Snapshot Store → kill the Instance. A
    /// failure partway through is logged; the store and live set converge
    /// on the next `load()`.
    pub async fn delete(&self, title: &str) -> Result<(), SupervisorError> {
        let arc = self
            .get_arc(title)
            .await
            .ok_or_else(|| SupervisorError::NotFound(title.to_string()))?;

        {
            let instance = arc.lock().await;
            if !instance.in_place() {
                if let Some(wt) = instance.get_git_worktree() {
                    if self.worktrees.is_branch_checked_out(wt).unwrap_or(false) {
                        return Err(SupervisorError::Instance(
                            crate::error::InstanceError::CheckedOutElsewhere,
                        ));
                    }
                }
            }
        }

        if let Err(e) = self.store.delete_instance(title) {
            warn!(%title, error = %e, "failed to remove instance from snapshot store before kill");
        }

        let mut instances = self.instances.write().await;
        let removed = instances
            .remove(title)
            .ok_or_else(|| SupervisorError::NotFound(title.to_string()))?;
        drop(instances);

        let mut instance = removed.lock().await;
        if let Err(e) = instance.kill(&self.worktrees).await {
            warn!(%title, error = %e, "instance kill failed after store removal");
        }
        Ok(())
    }

    /// Save the live set; `in_place` Instances are terminated and dropped
    /// from the snapshot so they do not reappear on next run (spec §4.F).
    pub async fn quit(&self) -> Result<(), SupervisorError> {
        self.cancel.cancel();

        let all: Vec<(String, Arc<Mutex<Instance>>)> = {
            let instances = self.instances.read().await;
            instances
                .iter()
                .map(|(t, a)| (t.clone(), Arc::clone(a)))
                .collect()
        };

        let mut in_place_titles = Vec::new();
        for (title, arc) in &all {
            if arc.lock().await.in_place() {
                in_place_titles.push(title.clone());
            }
        }

        for title in &in_place_titles {
            let removed = {
                let mut instances = self.instances.write().await;
                instances.remove(title)
            };
            if let Some(arc) = removed {
                let mut instance = arc.lock().await;
                if let Err(e) = instance.kill(&self.worktrees).await {
                    warn!(%title, error = %e, "in_place instance kill failed on quit");
                }
            }
        }

        let remaining: Vec<(String, Arc<Mutex<Instance>>)> = {
            let instances = self.instances.read().await;
            instances
                .iter()
                .map(|(t, a)| (t.clone(), Arc::clone(a)))
                .collect()
        };
        let mut records = Vec::with_capacity(remaining.len());
        for (_, arc) in remaining {
            records.push(arc.lock().await.to_record());
        }
        self.store.save_instances(&records)?;
        Ok(())
    }

    async fn persist(&self) -> Result<(), SupervisorError> {
        let all: Vec<Arc<Mutex<Instance>>> =
            self.instances.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(all.len());
        for arc in all {
            records.push(arc.lock().await.to_record());
        }
        self.store.save_instances(&records)?;
        Ok(())
    }

    /// Serializes raw-mode entry process-wide (spec §9 "Host controlling
    /// terminal"): at most one Instance may be Attached at a time. The map
    /// lock is released as soon as the Instance's own `Arc` is cloned, so an
    /// attach in progress on one Instance never blocks ticks or requests
    /// against any other Instance.
    pub async fn attach(&self, title: &str) -> Result<(), SupervisorError> {
        let arc = self
            .get_arc(title)
            .await
            .ok_or_else(|| SupervisorError::NotFound(title.to_string()))?;
        let _guard = self.attach_lock.lock().await;
        let mut instance = arc.lock().await;
        instance
            .terminal_mut()
            .attach()
            .await
            .map_err(crate::error::InstanceError::from)?;
        Ok(())
    }

    /// Metadata tick (2 Hz): for every non-Paused Started Instance, derive
    /// status from `HasUpdated`, auto-confirm prompts when `auto_yes`, then
    /// refresh diff stats.
    pub async fn run_metadata_tick(&self) {
        let mut interval = tokio::time::interval(self.config.metadata_tick);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            for title in self.started_not_paused_titles().await {
                let Some(arc) = self.get_arc(&title).await else {
                    continue;
                };
                let mut instance = arc.lock().await;

                match instance.has_updated().await {
                    Ok((updated, has_prompt)) => {
                        if has_prompt && instance.auto_yes() {
                            let _ = instance.tap_enter();
                            instance.set_status(InstanceStatus::Running);
                        } else if updated {
                            instance.set_status(InstanceStatus::Running);
                        } else {
                            instance.set_status(InstanceStatus::Ready);
                        }
                        instance.update_diff_stats(&self.worktrees);
                    }
                    Err(e) => {
                        let mut limiter = self.errors.lock().await;
                        if limiter.should_log(&title) {
                            error!(%title, error = %e, "metadata tick failed");
                        }
                    }
                }
            }
        }
    }

    /// Preview tick: starts fast (250 ms) and relaxes to the steady 500 ms
    /// cadence after the configured warm-up window, notifying observers
    /// that the current instance's preview may have changed.
    pub async fn run_preview_tick<F: Fn()>(&self, on_tick: F) {
        let started = Instant::now();
        let mut cadence = self.config.preview_tick_initial;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(cadence) => {}
            }

            on_tick();

            if started.elapsed() >= self.config.preview_tick_relax_after {
                cadence = self.config.preview_tick_steady;
            }
        }
    }

    pub async fn instance_titles(&self) -> Vec<String> {
        self.instances.read().await.keys().cloned().collect()
    }

    pub async fn started_not_paused_titles(&self) -> Vec<String> {
        let all: Vec<Arc<Mutex<Instance>>> =
            self.instances.read().await.values().cloned().collect();
        let mut titles = Vec::new();
        for arc in all {
            let instance = arc.lock().await;
            if instance.started() && !instance.paused() {
                titles.push(instance.title().to_string());
            }
        }
        titles
    }

    /// Used by the Web Gateway's poll loop and `GetContent` (spec §4.G).
    pub async fn preview(&self, title: &str) -> Result<String, SupervisorError> {
        let arc = self
            .get_arc(title)
            .await
            .ok_or_else(|| SupervisorError::NotFound(title.to_string()))?;
        let instance = arc.lock().await;
        Ok(instance.preview().await?)
    }

    pub async fn status_and_auto_yes(&self, title: &str) -> Option<(InstanceStatus, bool)> {
        let arc = self.get_arc(title).await?;
        let instance = arc.lock().await;
        Some((instance.status(), instance.auto_yes()))
    }

    pub async fn prompt_sentinel_present(&self, title: &str, capture: &str) -> Option<bool> {
        let arc = self.get_arc(title).await?;
        let instance = arc.lock().await;
        Some(instance.terminal().prompt_sentinel_present(capture))
    }

    pub async fn send_input(&self, title: &str, text: &str) -> Result<(), SupervisorError> {
        let arc = self
            .get_arc(title)
            .await
            .ok_or_else(|| SupervisorError::NotFound(title.to_string()))?;
        let instance = arc.lock().await;
        instance.send_prompt(text)?;
        Ok(())
    }

    pub async fn resize(&self, title: &str, cols: u16, rows: u16) -> Result<(), SupervisorError> {
        let arc = self
            .get_arc(title)
            .await
            .ok_or_else(|| SupervisorError::NotFound(title.to_string()))?;
        let mut instance = arc.lock().await;
        instance.set_size(cols, rows);
        instance
            .terminal_mut()
            .set_detached_size(cols, rows)
            .map_err(crate::error::InstanceError::from)?;
        Ok(())
    }

    /// Stage, commit, and optionally push an Instance's outstanding changes
    /// (spec §4.A `PushChanges`). `in_place` Instances have no managed
    /// worktree, so the Supervisor drives direct git commands against the
    /// user's own working directory instead of delegating to the Worktree
    /// Manager.
    pub async fn push_changes(
        &self,
        title: &str,
        message: &str,
        do_push: bool,
    ) -> Result<(), SupervisorError> {
        let arc = self
            .get_arc(title)
            .await
            .ok_or_else(|| SupervisorError::NotFound(title.to_string()))?;
        let instance = arc.lock().await;

        if instance.in_place() {
            crate::git::commit_and_push(instance.path(), message, do_push)
                .map_err(crate::error::InstanceError::from)?;
        } else {
            let wt = instance
                .get_git_worktree()
                .ok_or(crate::error::InstanceError::InPlaceUnsupported)
                .map_err(SupervisorError::Instance)?;
            self.worktrees
                .push_changes(wt, message, do_push)
                .map_err(crate::error::InstanceError::from)?;
        }
        Ok(())
    }

    pub async fn with_instance<R>(
        &self,
        title: &str,
        f: impl FnOnce(&Instance) -> R,
    ) -> Option<R> {
        let arc = self.get_arc(title).await?;
        let instance = arc.lock().await;
        Some(f(&instance))
    }

    pub async fn with_instance_mut<R>(
        &self,
        title: &str,
        f: impl FnOnce(&mut Instance) -> R,
    ) -> Option<R> {
        let arc = self.get_arc(title).await?;
        let mut instance = arc.lock().await;
        Some(f(&mut instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::NewInstanceOptions;
    use tempfile::TempDir;

    fn supervisor(dir: &TempDir) -> Arc<Supervisor> {
        let paths = Paths::with_root(dir.path().to_path_buf());
        Arc::new(Supervisor::new(&paths, SupervisorConfig::default()))
    }

    fn opts(title: &str) -> NewInstanceOptions {
        NewInstanceOptions {
            title: title.to_string(),
            path: std::path::PathBuf::from("/tmp/repo"),
            program: "claude".to_string(),
            auto_yes: false,
            in_place: true,
            headless: false,
        }
    }

    #[tokio::test]
    async fn duplicate_title_is_rejected_before_start() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);

        let mut instances = sup.instances.write().await;
        instances.insert(
            "demo".to_string(),
            Arc::new(Mutex::new(Instance::new(opts("demo")).unwrap())),
        );
        drop(instances);

        let err = sup
            .create(Instance::new(opts("demo")).unwrap(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::DuplicateTitle(_)));
    }

    #[tokio::test]
    async fn delete_unknown_title_errors() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        let err = sup.delete("missing").await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound(_)));
    }

    #[test]
    fn error_rate_limiter_suppresses_repeats_within_a_minute() {
        let mut limiter = ErrorRateLimiter::new();
        assert!(limiter.should_log("demo"));
        assert!(!limiter.should_log("demo"));
    }
}
