//! Git bootstrap state machine.
//!
//! A new session ends up on a fresh `devon_agent` branch with an initial
//! checkpoint; a loaded session resumes on `devon_agent`, folding in any
//! work the user did on their own branch in the meantime. Every fallible
//! git step surfaces its error as a `GitError` event and blocks on a
//! `GitResolve`: the user either fixes the problem (`resolved`, retry) or
//! gives up on versioning (`nogit`).

use anyhow::Result;
use tracing::{info, warn};

use devon_types::{ChatTurn, Event, EventPayload, GitResolveAction};

use crate::config::VersioningKind;
use crate::versioning::{AGENT_BRANCH, INITIAL_COMMIT_MESSAGE};

use super::Session;

impl Session {
    /// Appends a `GitAskUser` prompt and blocks for the resolution.
    /// `None` means the session is terminating.
    fn ask_git(&mut self, message: &str) -> Option<GitResolveAction> {
        self.event_log.append(Event::new(
            EventPayload::GitAskUser(message.to_string()),
            "system",
            "user",
        ));
        let event = self.event_log.wait_for_tail(
            |e| matches!(e.payload, EventPayload::GitResolve(_)),
            &self.status,
        )?;
        match event.payload {
            EventPayload::GitResolve(resolution) => Some(resolution.action),
            _ => None,
        }
    }

    /// Surfaces a git failure and blocks for `nogit` or `resolved`.
    fn report_git_error(&mut self, text: &str) -> Option<GitResolveAction> {
        warn!(text, "git step failed");
        self.event_log.append(Event::new(
            EventPayload::GitError(text.to_string()),
            "system",
            "user",
        ));
        let event = self.event_log.wait_for_tail(
            |e| matches!(e.payload, EventPayload::GitResolve(_)),
            &self.status,
        )?;
        match event.payload {
            EventPayload::GitResolve(resolution) => Some(resolution.action),
            _ => None,
        }
    }

    /// Turns versioning off for the rest of the session.
    fn disable_git(&mut self) {
        info!("versioning disabled for this session");
        self.versioning.disable();
        self.config.versioning_type = VersioningKind::None;
    }

    /// Retries `step` until it succeeds, the user disables git, or the
    /// session terminates. The user is the retry oracle; there is no
    /// bounded retry count. Returns the success text, or `None` when git
    /// ended up disabled or the session is stopping.
    fn retry_git<F>(&mut self, mut step: F) -> Option<String>
    where
        F: FnMut(&mut Self) -> (i32, String),
    {
        loop {
            let (code, text) = step(self);
            if code == 0 {
                return Some(text);
            }
            match self.report_git_error(&text) {
                Some(GitResolveAction::Resolved) => {}
                Some(_) => {
                    self.disable_git();
                    return None;
                }
                None => return None,
            }
        }
    }

    /// Bootstraps a brand-new session. On success the working tree is on
    /// `devon_agent` with an initial checkpoint recorded.
    pub(crate) fn bootstrap_new(&mut self) -> Result<()> {
        if !self.versioning.enabled() {
            return Ok(());
        }

        if !self.versioning.is_git_repo() {
            let prompt = format!(
                "No git repository found at {}; initialize one?",
                self.config.path.display()
            );
            match self.ask_git(&prompt) {
                Some(GitResolveAction::Yes | GitResolveAction::Resolved) => {
                    if self.retry_git(|s| s.versioning.initialize_repo()).is_none() {
                        return Ok(());
                    }
                }
                Some(_) => {
                    self.disable_git();
                    return Ok(());
                }
                None => return Ok(()),
            }
        }

        // The branch the user is on becomes the merge target; refusing to
        // start from devon_agent keeps the agent branch disposable.
        let user_branch = loop {
            let (code, branch) = self.versioning.current_branch();
            if code != 0 {
                match self.report_git_error(&branch) {
                    Some(GitResolveAction::Resolved) => {}
                    Some(_) => {
                        self.disable_git();
                        return Ok(());
                    }
                    None => return Ok(()),
                }
                continue;
            }
            if branch == AGENT_BRANCH {
                match self.report_git_error(
                    "the repository is already on devon_agent; check out your own branch first",
                ) {
                    Some(GitResolveAction::Resolved) => {}
                    Some(_) => {
                        self.disable_git();
                        return Ok(());
                    }
                    None => return Ok(()),
                }
                continue;
            }
            break branch;
        };
        self.config.set_user_branch(&user_branch);

        let (tip_code, user_tip) = self.versioning.last_commit_hash();
        let merged_commit = (tip_code == 0).then_some(user_tip);
        let (_, changes) = self.versioning.check_for_changes();
        if !changes.is_clean() {
            info!("the working tree has uncommitted changes; they move to the agent branch");
        }

        if self.versioning.check_branch_exists(AGENT_BRANCH) {
            match self.ask_git(
                "A stale devon_agent branch exists from a previous session; delete it?",
            ) {
                Some(GitResolveAction::Yes | GitResolveAction::Resolved) => {
                    if self
                        .retry_git(|s| s.versioning.delete_branch(AGENT_BRANCH))
                        .is_none()
                    {
                        return Ok(());
                    }
                }
                Some(_) => {
                    self.disable_git();
                    return Ok(());
                }
                None => return Ok(()),
            }
        }

        if self
            .retry_git(|s| s.versioning.create_and_switch_branch(AGENT_BRANCH))
            .is_none()
        {
            return Ok(());
        }
        let Some(initial_hash) =
            self.retry_git(|s| s.versioning.commit_all_files(INITIAL_COMMIT_MESSAGE, true))
        else {
            return Ok(());
        };

        self.record_checkpoint(INITIAL_COMMIT_MESSAGE, initial_hash, merged_commit)?;
        info!(%user_branch, "git bootstrap complete");
        Ok(())
    }

    /// Restores the git invariants of a persisted session, or declares it
    /// corrupted and starts over as a new task.
    pub(crate) fn bootstrap_load(&mut self) -> Result<()> {
        if !self.versioning.enabled() {
            return Ok(());
        }

        if !self.versioning.is_git_repo() {
            return self.recover_corrupted("the session repository is missing");
        }
        if !self.versioning.check_branch_exists(AGENT_BRANCH) {
            return self.recover_corrupted("the devon_agent branch no longer exists");
        }
        let Some(user_branch) = self.config.user_branch().map(str::to_string) else {
            return self.recover_corrupted("the session metadata lost the user branch");
        };

        let (code, branch) = self.versioning.current_branch();
        if code != 0 {
            return self.recover_corrupted(&branch);
        }

        if branch == user_branch {
            // The user kept committing on their own branch; fold that work
            // into the agent branch before resuming.
            if let Some(base) = self
                .config
                .checkpoints
                .iter()
                .rev()
                .find_map(|c| c.merged_commit.clone())
            {
                let (code, commits) = self.versioning.find_new_commits(&base, &user_branch);
                if code == 0 && !commits.trim().is_empty() {
                    info!(
                        count = commits.lines().count(),
                        "user commits since the session was saved"
                    );
                }
            }
            let (_, changes) = self.versioning.check_for_changes();
            if !changes.is_clean() {
                info!("the user branch has uncommitted changes");
            }
            if self.versioning.switch_branch(AGENT_BRANCH).0 != 0 {
                return self.recover_corrupted("could not switch to the agent branch");
            }
            let (code, text) = self.versioning.merge_branch(&user_branch);
            if code != 0 {
                self.versioning.abort_merge();
                return self.recover_corrupted(&format!("merging the user branch failed: {text}"));
            }
            self.agent.push_history(ChatTurn::new(
                "user",
                format!(
                    "Note: the user continued working on branch {user_branch}; \
                     their commits have been merged into your working branch."
                ),
            ));
        } else if branch != AGENT_BRANCH {
            let prompt = format!(
                "The session repository is on unexpected branch '{branch}'; \
                 switch back to devon_agent?"
            );
            match self.ask_git(&prompt) {
                Some(GitResolveAction::Yes | GitResolveAction::Resolved) => {
                    if self.versioning.switch_branch(AGENT_BRANCH).0 != 0 {
                        return self.recover_corrupted("could not switch to the agent branch");
                    }
                }
                _ => {
                    return self.recover_corrupted("the session is parked on an unknown branch");
                }
            }
        }

        // Every checkpointed commit must still be reachable on the agent
        // branch, or reverting would be a lie.
        let (code, log) = self.versioning.commits_on_current_branch();
        if code != 0 {
            return self.recover_corrupted(&log);
        }
        for checkpoint in self.config.checkpoints.clone() {
            if !checkpoint.has_commit() {
                continue;
            }
            let prefix: String = checkpoint.commit_hash.chars().take(7).collect();
            let present = log.lines().any(|line| {
                line.split_whitespace()
                    .next()
                    .is_some_and(|hash| hash.starts_with(&prefix) || prefix.starts_with(hash))
            });
            if !present {
                return self.recover_corrupted(&format!(
                    "checkpoint commit {prefix} is no longer on the agent branch"
                ));
            }
        }

        // Tell the agent about anything that moved under it while away.
        let mut drift = Vec::new();
        if let Some(last) = self.config.checkpoints.iter().rev().find(|c| c.has_commit()) {
            let (code, commits) = self.versioning.find_new_commits(&last.commit_hash, "HEAD");
            if code == 0 && !commits.trim().is_empty() {
                drift.push(format!(
                    "{} commit(s) landed on the agent branch after the last checkpoint",
                    commits.lines().count()
                ));
            }
        }
        let (_, changes) = self.versioning.check_for_changes();
        if !changes.is_clean() {
            drift.push("the working tree has uncommitted changes".to_string());
        }
        if !drift.is_empty() {
            self.agent.push_history(ChatTurn::new(
                "user",
                format!("Note: since your last checkpoint, {}.", drift.join(" and ")),
            ));
        }

        info!(%user_branch, "session resumed on the agent branch");
        Ok(())
    }

    /// A loaded session whose git invariants cannot be restored: wipe the
    /// checkpoints, re-initialize state, and proceed as a new task.
    fn recover_corrupted(&mut self, reason: &str) -> Result<()> {
        warn!(reason, "session corrupted; starting over");
        self.config.checkpoints.clear();
        let status = self.status.get();
        self.init_state();
        self.status.set(status);
        self.bootstrap_new()
    }
}
