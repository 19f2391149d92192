//! Low-level git2 wrapper used by [`crate::worktree`].
//!
//! Kept as a thin, mostly-associated-fn surface mirroring the teacher's
//! `GitOps`, reworked around repo-root discovery by walking up from an
//! arbitrary path, branch-checked-out-elsewhere detection, and a
//! worktree-add call that places the worktree at a caller-supplied path
//! rather than deriving one from the branch name (spec §4.A pins its own
//! `<slug>_<nanoTimestamp>` scheme, computed in `worktree.rs`).

use crate::error::WorktreeError;
use git2::{BranchType, Repository, WorktreeAddOptions};
use std::path::{Path, PathBuf};

/// Walk up from `start` until a git repository is found. Mirrors
/// `git rev-parse --show-toplevel`.
pub fn discover_repo_root(start: &Path) -> Result<PathBuf, WorktreeError> {
    let start = start
        .canonicalize()
        .map_err(|_| WorktreeError::NotAGitRepo(start.to_path_buf()))?;
    let repo =
        Repository::discover(&start).map_err(|_| WorktreeError::NotAGitRepo(start.clone()))?;
    repo.workdir()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| WorktreeError::NotAGitRepo(start))
}

pub fn open(repo_path: &Path) -> Result<Repository, WorktreeError> {
    Repository::open(repo_path).map_err(WorktreeError::from)
}

/// Current HEAD commit SHA, recorded as a Worktree's `base_commit_sha`.
pub fn head_commit_sha(repo: &Repository) -> Result<String, WorktreeError> {
    let head = repo.head()?;
    let commit = head.peel_to_commit()?;
    Ok(commit.id().to_string())
}

/// True iff some checkout of `repo` other than `exclude_path` currently has
/// `branch` as HEAD. `exclude_path` is the worktree whose own (expected)
/// checkout of `branch` should not count as "elsewhere".
pub fn is_branch_checked_out_elsewhere(
    repo: &Repository,
    branch: &str,
    exclude_path: &Path,
) -> Result<bool, WorktreeError> {
    let excluded = exclude_path.canonicalize().ok();
    let main_is_excluded = repo
        .workdir()
        .and_then(|p| p.canonicalize().ok())
        .is_some()
        && repo.workdir().and_then(|p| p.canonicalize().ok()) == excluded;

    if !main_is_excluded {
        if let Ok(head) = repo.head() {
            if head.is_branch() && head.shorthand() == Some(branch) {
                return Ok(true);
            }
        }
    }

    let names = repo.worktrees()?;
    for name in names.iter().flatten() {
        let wt = match repo.find_worktree(name) {
            Ok(wt) => wt,
            Err(_) => continue,
        };
        let wt_path = wt.path();
        if let Some(ex) = &excluded {
            if wt_path.canonicalize().ok().as_ref() == Some(ex) {
                continue;
            }
        }
        let wt_repo = match Repository::open(wt_path) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if let Ok(head) = wt_repo.head() {
            if head.is_branch() && head.shorthand() == Some(branch) {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

/// Remove any stale branch ref and any stale worktree registration for
/// `branch`/`worktree_name`, so `Setup()` can create a clean one.
pub fn scrub_stale_references(repo: &Repository, branch: &str, worktree_name: &str) {
    if let Ok(mut b) = repo.find_branch(branch, BranchType::Local) {
        let _ = b.delete();
    }
    if let Ok(wt) = repo.find_worktree(worktree_name) {
        let mut opts = git2::WorktreePruneOptions::new();
        opts.valid(true).working_tree(true);
        let _ = wt.prune(Some(&mut opts));
    }
}

/// Create a fresh branch at `base_sha` and add a worktree for it at
/// `worktree_path`. `worktree_name` is the internal name git2 registers the
/// worktree under (distinct from the directory name and the branch name).
pub fn add_worktree(
    repo: &Repository,
    branch: &str,
    base_sha: &str,
    worktree_name: &str,
    worktree_path: &Path,
) -> Result<(), WorktreeError> {
    if worktree_path.exists() {
        return Err(WorktreeError::PathExists(worktree_path.to_path_buf()));
    }

    let oid = git2::Oid::from_str(base_sha)?;
    let commit = repo.find_commit(oid)?;
    let branch_ref = repo.branch(branch, &commit, false)?.into_reference();

    let mut opts = WorktreeAddOptions::new();
    opts.reference(Some(&branch_ref));
    repo.worktree(worktree_name, worktree_path, Some(&opts))?;
    Ok(())
}

/// Remove a worktree's directory and prune its git-internal registration.
/// Collects rather than short-circuits on failure; caller aggregates.
pub fn remove_worktree(
    repo: &Repository,
    worktree_name: &str,
    worktree_path: &Path,
) -> Vec<WorktreeError> {
    let mut errors = Vec::new();

    match repo.find_worktree(worktree_name) {
        Ok(wt) => {
            let mut opts = git2::WorktreePruneOptions::new();
            opts.valid(true).working_tree(true);
            if let Err(e) = wt.prune(Some(&mut opts)) {
                errors.push(WorktreeError::from(e));
            }
        }
        Err(e) => errors.push(WorktreeError::from(e)),
    }

    if worktree_path.exists() {
        if let Err(e) = std::fs::remove_dir_all(worktree_path) {
            errors.push(WorktreeError::from(e));
        }
    }

    errors
}

/// Delete a local branch if present. Not an error if it is already gone.
pub fn delete_branch(repo: &Repository, branch: &str) -> Result<(), WorktreeError> {
    match repo.find_branch(branch, BranchType::Local) {
        Ok(mut b) => b.delete().map_err(WorktreeError::from),
        Err(_) => Ok(()),
    }
}

/// `git worktree prune` equivalent, best-effort.
pub fn prune_dangling_worktrees(repo: &Repository) {
    if let Ok(names) = repo.worktrees() {
        for name in names.iter().flatten() {
            if let Ok(wt) = repo.find_worktree(name) {
                if wt.validate().is_err() {
                    let mut opts = git2::WorktreePruneOptions::new();
                    opts.valid(true);
                    let _ = wt.prune(Some(&mut opts));
                }
            }
        }
    }
}

/// Stage all, commit on the current branch, and optionally push — the
/// direct-commands path `PushChanges` uses for `in_place` Instances (spec
/// §4.A), which have no managed worktree for the Worktree Manager to act on.
pub fn commit_and_push(repo_path: &Path, message: &str, do_push: bool) -> Result<(), WorktreeError> {
    let repo = open(repo_path)?;

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
        let branch = repo
            .head()?
            .shorthand()
            .ok_or_else(|| WorktreeError::Composite("HEAD is not on a branch".to_string()))?
            .to_string();
        let mut remote = repo
            .find_remote("origin")
            .map_err(|_| WorktreeError::PushHelperUnavailable("no 'origin' remote".to_string()))?;
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(|_url, username, _allowed| {
            git2::Cred::ssh_key_from_agent(username.unwrap_or("git"))
        });
        let mut push_opts = git2::PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{branch}");
        remote
            .push(&[&refspec], Some(&mut push_opts))
            .map_err(|e| WorktreeError::PushHelperUnavailable(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        let _ = Command::new("git")
            .args(["-C", dir.path().to_str().unwrap(), "branch", "-M", "main"])
            .output();
        (dir, repo)
    }

    #[test]
    fn discover_repo_root_walks_up_from_subdir() {
        let (dir, _repo) = init_repo();
        let sub = dir.path().join("a/b/c");
        std::fs::create_dir_all(&sub).unwrap();
        let found = discover_repo_root(&sub).unwrap();
        assert_eq!(
            found.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn head_commit_sha_is_stable_hex() {
        let (_dir, repo) = init_repo();
        let sha = head_commit_sha(&repo).unwrap();
        assert_eq!(sha.len(), 40);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn add_then_remove_worktree_round_trips() {
        let (dir, repo) = init_repo();
        let base = head_commit_sha(&repo).unwrap();
        let wt_path = dir.path().join("wt-1");
        add_worktree(&repo, "session/demo", &base, "demo", &wt_path).unwrap();
        assert!(wt_path.join("README.md").exists());

        let errors = remove_worktree(&repo, "demo", &wt_path);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert!(!wt_path.exists());
    }

    #[test]
    fn add_worktree_rejects_existing_path() {
        let (dir, repo) = init_repo();
        let base = head_commit_sha(&repo).unwrap();
        let wt_path = dir.path().join("already-there");
        std::fs::create_dir_all(&wt_path).unwrap();
        let err = add_worktree(&repo, "session/demo", &base, "demo", &wt_path).unwrap_err();
        assert!(matches!(err, WorktreeError::PathExists(_)));
    }
}
