//! Typed git porcelain.
//!
//! Every operation shells out to `git` and returns `(status, text)`:
//! status 0 with stdout on success, the exit code with combined output on
//! failure. With versioning disabled every operation is a no-op returning
//! `(0, "none")`, so callers never need to special-case a session that
//! opted out of git.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::config::VersioningKind;

/// The disposable branch all agent commits land on.
pub const AGENT_BRANCH: &str = "devon_agent";

/// Commit message used for the repo bootstrap commit.
pub const BOOTSTRAP_COMMIT_MESSAGE: &str = "Initialized Repo";

/// Commit message for the first commit on the agent branch.
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

/// `(status, text)` of one git operation.
pub type GitOutcome = (i32, String);

/// Working-tree status split the way the bootstrap wants it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub unstaged: Vec<String>,
    pub staged: Vec<String>,
    pub untracked: Vec<String>,
}

impl ChangeSet {
    pub fn is_clean(&self) -> bool {
        self.unstaged.is_empty() && self.staged.is_empty() && self.untracked.is_empty()
    }

    /// Parses `git status --porcelain` output.
    fn parse(text: &str) -> Self {
        let mut changes = ChangeSet::default();
        for line in text.lines() {
            if line.len() < 3 {
                continue;
            }
            let (index, worktree) = (line.as_bytes()[0], line.as_bytes()[1]);
            let file = line[3..].to_string();
            if index == b'?' && worktree == b'?' {
                changes.untracked.push(file);
                continue;
            }
            if index != b' ' {
                changes.staged.push(file.clone());
            }
            if worktree != b' ' {
                changes.unstaged.push(file);
            }
        }
        changes
    }
}

/// Format of a patch produced by [`GitVersioning::diff_patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffFormat {
    Patch,
    Unified,
}

pub struct GitVersioning {
    path: PathBuf,
    kind: VersioningKind,
}

impl GitVersioning {
    pub fn new(path: impl Into<PathBuf>, kind: VersioningKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn enabled(&self) -> bool {
        self.kind == VersioningKind::Git
    }

    /// Turns every subsequent operation into a no-op.
    pub fn disable(&mut self) {
        self.kind = VersioningKind::None;
    }

    fn run(&self, args: &[&str]) -> GitOutcome {
        if !self.enabled() {
            return (0, "none".to_string());
        }
        debug!(?args, "git");
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .output();
        match output {
            Ok(output) => {
                let code = output.status.code().unwrap_or(-1);
                let stdout = String::from_utf8_lossy(&output.stdout);
                if code == 0 {
                    (0, stdout.into_owned())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    (code, format!("{stdout}{stderr}").trim().to_string())
                }
            }
            Err(e) => (-1, format!("failed to run git: {e}")),
        }
    }

    pub fn is_git_repo(&self) -> bool {
        if !self.enabled() {
            return true;
        }
        let (code, text) = self.run(&["rev-parse", "--is-inside-work-tree"]);
        code == 0 && text.trim() == "true"
    }

    /// Creates an empty repo on branch `main` with one bootstrap commit.
    pub fn initialize_repo(&self) -> GitOutcome {
        let (code, text) = self.run(&["init", "--initial-branch", "main"]);
        if code != 0 {
            return (code, text);
        }
        let (code, text) = self.run(&[
            "commit",
            "--allow-empty",
            "-m",
            BOOTSTRAP_COMMIT_MESSAGE,
        ]);
        if code != 0 {
            return (code, text);
        }
        (0, "main".to_string())
    }

    pub fn current_branch(&self) -> GitOutcome {
        let (code, text) = self.run(&["branch", "--show-current"]);
        (code, text.trim().to_string())
    }

    pub fn check_branch_exists(&self, branch: &str) -> bool {
        if !self.enabled() {
            return true;
        }
        let reference = format!("refs/heads/{branch}");
        let (code, _) = self.run(&["show-ref", "--verify", "--quiet", &reference]);
        code == 0
    }

    pub fn create_and_switch_branch(&self, branch: &str) -> GitOutcome {
        self.run(&["checkout", "-b", branch])
    }

    pub fn switch_branch(&self, branch: &str) -> GitOutcome {
        self.run(&["checkout", branch])
    }

    /// Force-deletes a branch; stale agent branches are usually unmerged.
    pub fn delete_branch(&self, branch: &str) -> GitOutcome {
        self.run(&["branch", "-D", branch])
    }

    /// Stages everything and commits. On success the text is the new HEAD
    /// hash; a clean tree with `allow_empty == false` is a failure.
    pub fn commit_all_files(&self, message: &str, allow_empty: bool) -> GitOutcome {
        if !self.enabled() {
            return (0, "none".to_string());
        }
        let (code, text) = self.run(&["add", "-A"]);
        if code != 0 {
            return (code, text);
        }
        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        let (code, text) = self.run(&args);
        if code != 0 {
            return (code, text);
        }
        self.last_commit_hash()
    }

    /// Resolves a revision to a commit hash.
    pub fn commit_hash(&self, revision: &str) -> GitOutcome {
        let (code, text) = self.run(&["rev-parse", revision]);
        (code, text.trim().to_string())
    }

    pub fn last_commit_hash(&self) -> GitOutcome {
        self.commit_hash("HEAD")
    }

    pub fn commits_on_current_branch(&self) -> GitOutcome {
        self.run(&["log", "--oneline"])
    }

    /// Raw porcelain status text.
    pub fn status_porcelain(&self) -> GitOutcome {
        self.run(&["status", "--porcelain"])
    }

    /// `(unstaged, staged, untracked)` of the working tree.
    pub fn check_for_changes(&self) -> (i32, ChangeSet) {
        let (code, text) = self.status_porcelain();
        if code != 0 || !self.enabled() {
            return (code, ChangeSet::default());
        }
        (0, ChangeSet::parse(&text))
    }

    /// Commits strictly between `old` and `new`, newest first.
    pub fn find_new_commits(&self, old: &str, new: &str) -> GitOutcome {
        let range = format!("{old}..{new}");
        self.run(&["rev-list", &range])
    }

    pub fn diff_patch(&self, src: &str, dst: &str, format: DiffFormat) -> GitOutcome {
        match format {
            DiffFormat::Patch => self.run(&["diff", "-p", src, dst]),
            DiffFormat::Unified => self.run(&["diff", "--unified=3", src, dst]),
        }
    }

    /// Files whose contents differ between two commits.
    pub fn changed_files_between(&self, src: &str, dst: &str) -> GitOutcome {
        self.run(&["diff", "--name-only", src, dst])
    }

    pub fn apply_patch(&self, patch_file: &Path) -> GitOutcome {
        let file = patch_file.to_string_lossy();
        self.run(&["apply", "--whitespace=nowarn", &file])
    }

    pub fn reset_hard(&self, commit: &str) -> GitOutcome {
        self.run(&["reset", "--hard", commit])
    }

    /// Removes untracked files and directories.
    pub fn clean_untracked(&self) -> GitOutcome {
        self.run(&["clean", "-fd"])
    }

    /// Contents of `path` at `commit`. A path absent from the commit is a
    /// non-zero status; the checkpoint differ maps that to an empty side.
    pub fn show(&self, commit: &str, path: &str) -> GitOutcome {
        let spec = format!("{commit}:{path}");
        self.run(&["show", &spec])
    }

    pub fn merge_branch(&self, branch: &str) -> GitOutcome {
        self.run(&["merge", branch])
    }

    pub fn abort_merge(&self) -> GitOutcome {
        self.run(&["merge", "--abort"])
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn ensure_git_identity() {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            // SAFETY: set before any test spawns git, and every test sets
            // the same values.
            unsafe {
                std::env::set_var("GIT_AUTHOR_NAME", "tester");
                std::env::set_var("GIT_AUTHOR_EMAIL", "tester@example.com");
                std::env::set_var("GIT_COMMITTER_NAME", "tester");
                std::env::set_var("GIT_COMMITTER_EMAIL", "tester@example.com");
            }
        });
    }

    fn init_repo() -> (tempfile::TempDir, GitVersioning) {
        ensure_git_identity();
        let dir = tempfile::tempdir().unwrap();
        let git = GitVersioning::new(dir.path(), VersioningKind::Git);
        let (code, text) = git.initialize_repo();
        assert_eq!(code, 0, "{text}");
        (dir, git)
    }

    #[test]
    fn test_disabled_driver_is_a_no_op() {
        let git = GitVersioning::new("/nonexistent", VersioningKind::None);
        assert_eq!(git.run(&["status"]), (0, "none".to_string()));
        assert!(git.is_git_repo());
        assert!(git.check_branch_exists("anything"));
        assert_eq!(git.commit_all_files("msg", false), (0, "none".to_string()));
    }

    #[test]
    fn test_initialize_creates_main_with_bootstrap_commit() {
        let (_dir, git) = init_repo();
        assert!(git.is_git_repo());
        let (code, branch) = git.current_branch();
        assert_eq!(code, 0);
        assert_eq!(branch, "main");
        let (code, log) = git.commits_on_current_branch();
        assert_eq!(code, 0);
        assert!(log.contains(BOOTSTRAP_COMMIT_MESSAGE));
    }

    #[test]
    fn test_commit_all_files_returns_head_hash() {
        let (dir, git) = init_repo();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();

        let (code, hash) = git.commit_all_files("add a.txt", false);
        assert_eq!(code, 0, "{hash}");
        let (_, head) = git.last_commit_hash();
        assert_eq!(hash, head);
    }

    #[test]
    fn test_commit_with_clean_tree_fails_without_allow_empty() {
        let (_dir, git) = init_repo();
        let (code, _) = git.commit_all_files("nothing changed", false);
        assert_ne!(code, 0);
        let (code, _) = git.commit_all_files("empty checkpoint", true);
        assert_eq!(code, 0);
    }

    #[test]
    fn test_branch_lifecycle() {
        let (_dir, git) = init_repo();
        assert!(!git.check_branch_exists(AGENT_BRANCH));

        let (code, _) = git.create_and_switch_branch(AGENT_BRANCH);
        assert_eq!(code, 0);
        assert!(git.check_branch_exists(AGENT_BRANCH));
        assert_eq!(git.current_branch().1, AGENT_BRANCH);

        let (code, _) = git.switch_branch("main");
        assert_eq!(code, 0);
        let (code, _) = git.delete_branch(AGENT_BRANCH);
        assert_eq!(code, 0);
        assert!(!git.check_branch_exists(AGENT_BRANCH));
    }

    #[test]
    fn test_check_for_changes_buckets() {
        let (dir, git) = init_repo();
        fs::write(dir.path().join("tracked.txt"), "v1").unwrap();
        git.commit_all_files("add tracked", false);

        fs::write(dir.path().join("tracked.txt"), "v2").unwrap();
        fs::write(dir.path().join("new.txt"), "untracked").unwrap();

        let (code, changes) = git.check_for_changes();
        assert_eq!(code, 0);
        assert_eq!(changes.unstaged, vec!["tracked.txt"]);
        assert_eq!(changes.untracked, vec!["new.txt"]);
        assert!(changes.staged.is_empty());
        assert!(!changes.is_clean());
    }

    #[test]
    fn test_find_new_commits_is_exclusive_of_old() {
        let (dir, git) = init_repo();
        let (_, first) = git.last_commit_hash();
        fs::write(dir.path().join("a.txt"), "1").unwrap();
        let (_, second) = git.commit_all_files("second", false);
        fs::write(dir.path().join("a.txt"), "2").unwrap();
        let (_, third) = git.commit_all_files("third", false);

        let (code, commits) = git.find_new_commits(&first, "HEAD");
        assert_eq!(code, 0);
        let listed: Vec<&str> = commits.lines().collect();
        assert_eq!(listed, vec![third.as_str(), second.as_str()]);
    }

    #[test]
    fn test_show_absent_path_is_non_zero() {
        let (dir, git) = init_repo();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        git.commit_all_files("add a.txt", false);

        let (code, text) = git.show("HEAD", "a.txt");
        assert_eq!(code, 0);
        assert_eq!(text, "alpha");

        let (code, _) = git.show("HEAD", "missing.txt");
        assert_ne!(code, 0);
    }

    #[test]
    fn test_reset_hard_and_clean_restore_tree() {
        let (dir, git) = init_repo();
        fs::write(dir.path().join("a.txt"), "v1").unwrap();
        let (_, keep) = git.commit_all_files("v1", false);

        fs::write(dir.path().join("a.txt"), "v2").unwrap();
        git.commit_all_files("v2", false);
        fs::write(dir.path().join("junk.txt"), "junk").unwrap();

        assert_eq!(git.reset_hard(&keep).0, 0);
        assert_eq!(git.clean_untracked().0, 0);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v1");
        assert!(!dir.path().join("junk.txt").exists());
    }

    #[test]
    fn test_diff_patch_applies_across_branches() {
        let (dir, git) = init_repo();
        fs::write(dir.path().join("a.txt"), "base\n").unwrap();
        let (_, base) = git.commit_all_files("base", false);

        git.create_and_switch_branch(AGENT_BRANCH);
        fs::write(dir.path().join("a.txt"), "agent work\n").unwrap();
        let (_, tip) = git.commit_all_files("agent work", false);

        let (code, patch) = git.diff_patch(&base, &tip, DiffFormat::Patch);
        assert_eq!(code, 0);
        assert!(patch.contains("agent work"));

        let (code, unified) = git.diff_patch(&base, &tip, DiffFormat::Unified);
        assert_eq!(code, 0);
        assert!(unified.contains("@@"));

        let patch_file = dir.path().join("work.patch");
        fs::write(&patch_file, &patch).unwrap();
        git.switch_branch("main");
        let (code, text) = git.apply_patch(&patch_file);
        assert_eq!(code, 0, "{text}");
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "agent work\n"
        );
    }
}
