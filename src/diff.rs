//! Unified-diff computation for the Worktree Manager (spec §4.A `Diff()`).

use crate::error::WorktreeError;
use git2::{Commit, DiffFormat, DiffOptions, Oid, Repository};
use std::path::Path;

/// Result of diffing a worktree against its recorded base commit.
#[derive(Debug, Clone, Default)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub content: String,
}

/// Diff `worktree_path`'s working tree against `base_commit_sha`.
///
/// Untracked files are included as additions by diffing with
/// `include_untracked`/`show_untracked_content` rather than mutating the
/// index with an explicit intent-to-add — git2 has no direct intent-to-add
/// flag, and this produces the same "appears in the diff" effect the spec
/// asks for without leaving stray index entries behind.
pub fn compute_diff(worktree_path: &Path, base_commit_sha: &str) -> Result<DiffStats, WorktreeError> {
    let repo = Repository::open(worktree_path)?;
    let base_tree = base_commit(&repo, base_commit_sha)?.tree()?;

    let mut opts = DiffOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .show_untracked_content(true);

    let diff = repo.diff_tree_to_workdir_with_index(Some(&base_tree), Some(&mut opts))?;

    let mut added = 0usize;
    let mut removed = 0usize;
    let mut content = String::new();

    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        let origin = line.origin();
        if matches!(origin, '+' | '-' | ' ') {
            content.push(origin);
        }
        content.push_str(&String::from_utf8_lossy(line.content()));

        match origin {
            '+' => added += 1,
            '-' => removed += 1,
            _ => {}
        }
        true
    })?;

    Ok(DiffStats {
        added,
        removed,
        content,
    })
}

fn base_commit<'a>(repo: &'a Repository, sha: &str) -> Result<Commit<'a>, WorktreeError> {
    let oid = Oid::from_str(sha)?;
    Ok(repo.find_commit(oid)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo_with_commit() -> (TempDir, Repository, String) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();

        fs::write(dir.path().join("tracked.txt"), "one\ntwo\nthree\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("tracked.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        let commit_id = repo
            .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        (dir, repo, commit_id.to_string())
    }

    #[test]
    fn empty_diff_against_own_head_is_zero() {
        let (dir, _repo, base) = init_repo_with_commit();
        let stats = compute_diff(dir.path(), &base).unwrap();
        assert_eq!(stats.added, 0);
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.content, "");
    }

    #[test]
    fn counts_additions_and_removals_excluding_headers() {
        let (dir, _repo, base) = init_repo_with_commit();
        // one line changed (1 removal + 1 addition), one line added
        fs::write(
            dir.path().join("tracked.txt"),
            "one\ntwo-changed\nthree\nfour\n",
        )
        .unwrap();

        let stats = compute_diff(dir.path(), &base).unwrap();
        assert_eq!(stats.added, 2);
        assert_eq!(stats.removed, 1);
        assert!(!stats.content.contains("+++"));
        assert!(!stats.content.starts_with("+++"));
        assert!(stats.content.contains("two-changed"));
    }

    #[test]
    fn untracked_file_counts_as_pure_addition() {
        let (dir, _repo, base) = init_repo_with_commit();
        fs::write(dir.path().join("new.txt"), "a\nb\n").unwrap();

        let stats = compute_diff(dir.path(), &base).unwrap();
        assert_eq!(stats.added, 2);
        assert_eq!(stats.removed, 0);
        assert!(stats.content.contains('a'));
    }
}
