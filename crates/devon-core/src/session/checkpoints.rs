//! Checkpoint create, revert, diff, and merge.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use devon_types::{Checkpoint, CheckpointNote, Event, EventPayload, NO_COMMIT, SessionStatus};

use crate::state::SessionState;
use crate::versioning::{AGENT_BRANCH, DiffFormat};

use super::Session;

/// Before/after contents of one file between two checkpoints. A side that
/// does not exist in its commit is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub file: String,
    pub before: String,
    pub after: String,
}

impl Session {
    /// Commits the working tree and records a checkpoint bundling the
    /// commit, the agent history, a state snapshot, and the event-log
    /// position. A clean tree records the [`NO_COMMIT`] sentinel.
    pub fn create_checkpoint(&mut self, message: &str) -> Result<Checkpoint> {
        let (code, text) = self.versioning.commit_all_files(message, false);
        let commit_hash = if code == 0 {
            text
        } else {
            debug!(%text, "nothing committed for checkpoint");
            NO_COMMIT.to_string()
        };
        self.record_checkpoint(message, commit_hash, None)
    }

    /// Appends a checkpoint record plus its observer event.
    pub(crate) fn record_checkpoint(
        &mut self,
        message: &str,
        commit_hash: String,
        merged_commit: Option<String>,
    ) -> Result<Checkpoint> {
        let checkpoint = Checkpoint {
            checkpoint_id: Checkpoint::new_id(),
            commit_message: message.to_string(),
            commit_hash,
            merged_commit,
            agent_history: self.agent.history(),
            state: self.config.state.to_snapshot()?,
            event_id: self.event_log.len(),
        };
        info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            commit = %checkpoint.commit_hash,
            "checkpoint recorded"
        );
        self.config.checkpoints.push(checkpoint.clone());
        self.event_log.append(Event::new(
            EventPayload::Checkpoint(CheckpointNote {
                checkpoint_id: checkpoint.checkpoint_id.clone(),
                commit_message: checkpoint.commit_message.clone(),
                commit_hash: checkpoint.commit_hash.clone(),
            }),
            "system",
            "user",
        ));
        Ok(checkpoint)
    }

    fn find_checkpoint(&self, checkpoint_id: &str) -> Result<(usize, Checkpoint)> {
        self.config
            .checkpoints
            .iter()
            .position(|c| c.checkpoint_id == checkpoint_id)
            .map(|i| (i, self.config.checkpoints[i].clone()))
            .with_context(|| format!("no checkpoint with id {checkpoint_id}"))
    }

    /// Rewinds repo, log, state, and agent history to a checkpoint, then
    /// re-runs setup and enters `running`.
    ///
    /// Afterwards the log ends at the checkpoint's observer event
    /// (`len == event_id + 1`) and the checkpoint list ends at the
    /// reverted entry, so reverting twice is the same as reverting once.
    pub fn revert(&mut self, checkpoint_id: &str) -> Result<()> {
        let (index, checkpoint) = self.find_checkpoint(checkpoint_id)?;

        if checkpoint.has_commit() && self.versioning.enabled() {
            let (code, text) = self.versioning.reset_hard(&checkpoint.commit_hash);
            if code != 0 {
                bail!("git reset --hard failed: {text}");
            }
            let (code, text) = self.versioning.clean_untracked();
            if code != 0 {
                warn!(%text, "git clean failed after revert");
            }
        }

        self.event_log.truncate(checkpoint.event_id + 1);
        self.cursor = checkpoint.event_id;
        self.config.state = SessionState::from_snapshot(&checkpoint.state)?;
        self.agent.restore_history(checkpoint.agent_history.clone());
        self.config.checkpoints.truncate(index + 1);

        self.setup()?;
        self.status.set(SessionStatus::Running);
        info!(checkpoint_id, "session reverted");
        Ok(())
    }

    /// Per-file before/after contents between two checkpoints.
    pub fn diff_checkpoints(&self, src_id: &str, dst_id: &str) -> Result<Vec<FileDiff>> {
        let (_, src) = self.find_checkpoint(src_id)?;
        let (_, dst) = self.find_checkpoint(dst_id)?;
        if src.commit_hash == dst.commit_hash {
            return Ok(Vec::new());
        }
        if !src.has_commit() || !dst.has_commit() {
            bail!("both checkpoints need a commit to diff");
        }

        let (code, names) = self
            .versioning
            .changed_files_between(&src.commit_hash, &dst.commit_hash);
        if code != 0 {
            bail!("git diff failed: {names}");
        }

        let mut diffs = Vec::new();
        for file in names.lines().filter(|line| !line.trim().is_empty()) {
            // A path absent from one commit diffs against the empty string.
            let before = match self.versioning.show(&src.commit_hash, file) {
                (0, text) => text,
                _ => String::new(),
            };
            let after = match self.versioning.show(&dst.commit_hash, file) {
                (0, text) => text,
                _ => String::new(),
            };
            diffs.push(FileDiff {
                file: file.to_string(),
                before,
                after,
            });
        }
        Ok(diffs)
    }

    /// Applies the agent's checkpointed work onto the user branch as one
    /// commit. Only valid from the agent branch; returns false without
    /// touching the user branch when any sub-step fails.
    pub fn merge(&mut self, commit_message: &str) -> bool {
        if !self.versioning.enabled() {
            warn!("merge unavailable: versioning is disabled");
            return false;
        }
        let (code, branch) = self.versioning.current_branch();
        if code != 0 || branch != AGENT_BRANCH {
            warn!(%branch, "merge is only valid from the agent branch");
            return false;
        }
        let Some(user_branch) = self.config.user_branch().map(str::to_string) else {
            warn!("merge unavailable: user branch unknown");
            return false;
        };
        let Some(dest) = self
            .config
            .checkpoints
            .iter()
            .rev()
            .find(|c| c.has_commit())
            .map(|c| c.commit_hash.clone())
        else {
            warn!("merge unavailable: no checkpoint with a commit");
            return false;
        };

        let (code, src) = self.versioning.commit_hash(&user_branch);
        if code != 0 {
            warn!(text = %src, "could not resolve the user branch tip");
            return false;
        }

        let (code, patch) = self.versioning.diff_patch(&src, &dest, DiffFormat::Patch);
        if code != 0 {
            warn!(text = %patch, "could not compute the merge patch");
            return false;
        }
        if patch.trim().is_empty() {
            info!("nothing to merge; user branch already matches");
            return true;
        }

        let patch_file = match tempfile::NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, "could not stage the merge patch");
                return false;
            }
        };
        if std::fs::write(patch_file.path(), &patch).is_err() {
            warn!("could not write the merge patch");
            return false;
        }

        if self.versioning.switch_branch(&user_branch).0 != 0 {
            return false;
        }

        let (apply_code, apply_text) = self.versioning.apply_patch(patch_file.path());
        let merged = if apply_code == 0 {
            let (commit_code, commit_text) =
                self.versioning.commit_all_files(commit_message, false);
            if commit_code != 0 {
                warn!(text = %commit_text, "merge commit failed");
                // The patch is already applied; put the user branch back.
                self.versioning.reset_hard(&src);
                false
            } else {
                true
            }
        } else {
            warn!(text = %apply_text, "merge patch did not apply");
            false
        };

        let (back, text) = self.versioning.switch_branch(AGENT_BRANCH);
        if back != 0 {
            warn!(%text, "could not switch back to the agent branch");
        }
        merged
    }
}
