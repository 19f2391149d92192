//! Worktree Manager (spec §4.A): per-session Git worktrees on a dedicated
//! branch, plus diff computation against a recorded base commit.

use crate::diff::{self, DiffStats};
use crate::error::WorktreeError;
use crate::git;
use crate::sanitize::{branch_name, sanitize_branch_slug};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// A per-session isolated checkout (spec §3 "Worktree").
#[derive(Debug, Clone)]
pub struct Worktree {
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub base_commit_sha: String,
}

/// Creates, tracks, and tears down per-session worktrees.
pub struct WorktreeManager {
    worktrees_dir: PathBuf,
}

impl WorktreeManager {
    pub fn new(worktrees_dir: PathBuf) -> Self {
        Self { worktrees_dir }
    }

    /// Compute `repo_path` by walking up from `session_path`, derive the
    /// branch/worktree names from `title`, scrub stale references, record
    /// the base commit, and add the worktree. Best-effort teardown on any
    /// failure after the repo has been mutated.
    pub fn setup(&self, session_path: &Path, title: &str) -> Result<Worktree, WorktreeError> {
        let repo_path = git::discover_repo_root(session_path)?;
        let repo = git::open(&repo_path)?;

        let slug = sanitize_branch_slug(title);
        let branch = branch_name(title);
        let worktree_name = slug.clone();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let worktree_path = self.worktrees_dir.join(format!("{slug}_{nanos}"));

        if worktree_path.exists() {
            return Err(WorktreeError::PathExists(worktree_path));
        }

        git::scrub_stale_references(&repo, &branch, &worktree_name);

        let base_commit_sha = git::head_commit_sha(&repo)?;

        if let Err(e) = git::add_worktree(&repo, &branch, &base_commit_sha, &worktree_name, &worktree_path)
        {
            let _ = git::delete_branch(&repo, &branch);
            if worktree_path.exists() {
                let _ = std::fs::remove_dir_all(&worktree_path);
            }
            return Err(e);
        }

        Ok(Worktree {
            repo_path,
            worktree_path,
            branch_name: branch,
            base_commit_sha,
        })
    }

    /// Remove the worktree (force), delete its branch, and prune dangling
    /// references. Aggregates failures rather than stopping at the first.
    pub fn cleanup(&self, wt: &Worktree) -> Result<(), WorktreeError> {
        let repo = git::open(&wt.repo_path)?;
        let worktree_name = wt
            .branch_name
            .strip_prefix("session/")
            .unwrap_or(&wt.branch_name)
            .to_string();

        let mut errors = git::remove_worktree(&repo, &worktree_name, &wt.worktree_path);
        if let Err(e) = git::delete_branch(&repo, &wt.branch_name) {
            errors.push(e);
        }
        git::prune_dangling_worktrees(&repo);

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.into_iter().next().unwrap()),
            _ => Err(WorktreeError::Composite(
                errors
                    .into_iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }

    /// True iff some *other* checkout of the repo has `wt.branch_name`
    /// checked out as HEAD (the worktree's own, expected checkout of its
    /// branch does not count).
    pub fn is_branch_checked_out(&self, wt: &Worktree) -> Result<bool, WorktreeError> {
        let repo = git::open(&wt.repo_path)?;
        git::is_branch_checked_out_elsewhere(&repo, &wt.branch_name, &wt.worktree_path)
    }

    /// Stage intent-to-add for untracked files and compute the unified diff
    /// against `base_commit_sha`. Never panics; I/O or git failures are
    /// surfaced through the `Err` arm of the `Result`, which callers fold
    /// into the `error` field of the snapshot record.
    pub fn diff(&self, wt: &Worktree) -> DiffStats {
        match diff::compute_diff(&wt.worktree_path, &wt.base_commit_sha) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(branch = %wt.branch_name, error = %e, "diff computation failed");
                DiffStats::default()
            }
        }
    }

    /// Stage all, commit, and optionally push via the host's configured
    /// credential helper. Pushing is a pluggable strategy (spec §9): if git2
    /// cannot authenticate, the caller sees a clear error rather than a
    /// silent no-op.
    pub fn push_changes(
        &self,
        wt: &Worktree,
        message: &str,
        do_push: bool,
    ) -> Result<(), WorktreeError> {
        let repo = git::open(&wt.worktree_path)?;

        let mut index = repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let parent = repo.head()?.peel_to_commit()?;
        let sig = repo
            .signature()
            .map_err(|_| WorktreeError::Composite("no git identity configured".to_string()))?;
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;

        if do_push {
            let mut remote = repo
                .find_remote("origin")
                .map_err(|_| WorktreeError::PushHelperUnavailable("no 'origin' remote".to_string()))?;
            let mut callbacks = git2::RemoteCallbacks::new();
            callbacks.credentials(|_url, username, _allowed| {
                git2::Cred::ssh_key_from_agent(username.unwrap_or("git"))
            });
            let mut push_opts = git2::PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            let refspec = format!("refs/heads/{}", wt.branch_name);
            remote
                .push(&[&refspec], Some(&mut push_opts))
                .map_err(|e| WorktreeError::PushHelperUnavailable(e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use tempfile::TempDir;

    fn init_source_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        dir
    }

    #[test]
    fn setup_then_cleanup_round_trips() {
        let repo_dir = init_source_repo();
        let worktrees_root = TempDir::new().unwrap();
        let manager = WorktreeManager::new(worktrees_root.path().to_path_buf());

        let wt = manager.setup(repo_dir.path(), "Demo Session").unwrap();
        assert_eq!(wt.branch_name, "session/demo-session");
        assert!(wt.worktree_path.exists());
        assert!(wt.worktree_path.join("README.md").exists());

        manager.cleanup(&wt).unwrap();
        assert!(!wt.worktree_path.exists());
    }

    #[test]
    fn setup_rejects_non_repo_path() {
        let non_repo = TempDir::new().unwrap();
        let worktrees_root = TempDir::new().unwrap();
        let manager = WorktreeManager::new(worktrees_root.path().to_path_buf());

        let err = manager.setup(non_repo.path(), "demo").unwrap_err();
        assert!(matches!(err, WorktreeError::NotAGitRepo(_)));
    }

    #[test]
    fn diff_reports_zero_on_fresh_worktree() {
        let repo_dir = init_source_repo();
        let worktrees_root = TempDir::new().unwrap();
        let manager = WorktreeManager::new(worktrees_root.path().to_path_buf());

        let wt = manager.setup(repo_dir.path(), "demo").unwrap();
        let stats = manager.diff(&wt);
        assert_eq!(stats.added, 0);
        assert_eq!(stats.removed, 0);
    }
}
