//! Git bootstrap state machine: new sessions, stale branches, prompts,
//! and corrupted-session recovery.

use std::fs;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;

use devon_core::agent::ScriptedAgent;
use devon_core::config::{SessionConfig, VersioningKind};
use devon_core::persist::SessionDoc;
use devon_core::session::Session;
use devon_core::versioning::{AGENT_BRANCH, GitVersioning};
use devon_types::{
    Event, EventLog, EventPayload, GitResolution, GitResolveAction, SessionStatus,
};

/// Session setup moves the process working directory, so tests in this
/// file run one at a time.
fn cwd_guard() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

fn ensure_git_identity() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        // SAFETY: set before any test spawns git, with constant values.
        unsafe {
            std::env::set_var("GIT_AUTHOR_NAME", "tester");
            std::env::set_var("GIT_AUTHOR_EMAIL", "tester@example.com");
            std::env::set_var("GIT_COMMITTER_NAME", "tester");
            std::env::set_var("GIT_COMMITTER_EMAIL", "tester@example.com");
        }
    });
}

fn seeded_repo() -> tempfile::TempDir {
    ensure_git_identity();
    let dir = tempfile::tempdir().unwrap();
    let git = GitVersioning::new(dir.path(), VersioningKind::Git);
    let (code, text) = git.initialize_repo();
    assert_eq!(code, 0, "{text}");
    fs::write(dir.path().join("f.txt"), "v1\n").unwrap();
    let (code, text) = git.commit_all_files("seed f.txt", false);
    assert_eq!(code, 0, "{text}");
    dir
}

fn git_session(dir: &tempfile::TempDir) -> Session {
    let config =
        SessionConfig::new("bootstrap-session", dir.path()).with_versioning(VersioningKind::Git);
    let agent = Box::new(ScriptedAgent::new("devon", Vec::new()));
    Session::new(config, agent, EventLog::new())
}

/// Answers the first `GitAskUser` prompt with the given action.
fn spawn_git_responder(log: EventLog, action: GitResolveAction) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            if let Some(event) = log.last()
                && matches!(event.payload, EventPayload::GitAskUser(_))
            {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        log.append(Event::new(
            EventPayload::GitResolve(GitResolution { action }),
            "user",
            "system",
        ));
    })
}

#[test]
fn test_new_session_lands_on_agent_branch_with_initial_checkpoint() {
    let _guard = cwd_guard();
    let dir = seeded_repo();
    let git = GitVersioning::new(dir.path(), VersioningKind::Git);
    let (_, user_tip) = git.last_commit_hash();

    let mut session = git_session(&dir);
    session.setup().unwrap();
    session.start();
    session.run_event_loop().unwrap();

    assert_eq!(git.current_branch().1, AGENT_BRANCH);
    assert_eq!(session.config.user_branch(), Some("main"));
    assert_eq!(session.config.checkpoints.len(), 1);

    let initial = &session.config.checkpoints[0];
    assert_eq!(initial.commit_message, "Initial commit");
    assert!(initial.has_commit());
    assert_eq!(initial.merged_commit.as_deref(), Some(user_tip.as_str()));

    // The checkpoint is observable on the log.
    let kinds: Vec<&str> = session
        .event_log
        .snapshot()
        .iter()
        .map(Event::kind)
        .collect();
    assert!(kinds.contains(&"Checkpoint"), "{kinds:?}");

    session.teardown().unwrap();
    // Teardown handed the repo back and removed the agent branch.
    assert_eq!(git.current_branch().1, "main");
    assert!(!git.check_branch_exists(AGENT_BRANCH));
}

#[test]
fn test_stale_agent_branch_deleted_on_approval() {
    let _guard = cwd_guard();
    let dir = seeded_repo();
    let git = GitVersioning::new(dir.path(), VersioningKind::Git);
    git.create_and_switch_branch(AGENT_BRANCH);
    fs::write(dir.path().join("stale.txt"), "stale\n").unwrap();
    git.commit_all_files("stale work", false);
    git.switch_branch("main");

    let mut session = git_session(&dir);
    let responder = spawn_git_responder(session.event_log.clone(), GitResolveAction::Yes);
    session.setup().unwrap();
    session.start();
    session.run_event_loop().unwrap();
    responder.join().unwrap();

    // The stale branch was replaced by a fresh one.
    assert_eq!(git.current_branch().1, AGENT_BRANCH);
    assert!(!dir.path().join("stale.txt").exists());
    assert_eq!(session.config.checkpoints.len(), 1);

    session.teardown().unwrap();
}

#[test]
fn test_stale_agent_branch_decline_disables_git() {
    let _guard = cwd_guard();
    let dir = seeded_repo();
    let git = GitVersioning::new(dir.path(), VersioningKind::Git);
    git.create_and_switch_branch(AGENT_BRANCH);
    git.switch_branch("main");

    let mut session = git_session(&dir);
    let responder = spawn_git_responder(session.event_log.clone(), GitResolveAction::No);
    session.setup().unwrap();
    session.start();
    session.run_event_loop().unwrap();
    responder.join().unwrap();

    assert_eq!(session.config.versioning_type, VersioningKind::None);
    // Nothing was created or switched.
    assert_eq!(git.current_branch().1, "main");
    assert!(session.config.checkpoints.is_empty());

    session.teardown().unwrap();
}

#[test]
fn test_corrupted_load_wipes_checkpoints_and_reseeds_task() {
    let _guard = cwd_guard();
    let dir = seeded_repo();

    // A persisted session that claims checkpoints on a branch that no
    // longer exists.
    let mut config =
        SessionConfig::new("corrupted-session", dir.path()).with_versioning(VersioningKind::Git);
    config.set_user_branch("main");
    config.checkpoints.push(devon_types::Checkpoint {
        checkpoint_id: devon_types::Checkpoint::new_id(),
        commit_message: "ghost".to_string(),
        commit_hash: "0123456789abcdef0123456789abcdef01234567".to_string(),
        merged_commit: None,
        agent_history: Vec::new(),
        state: serde_json::json!({}),
        event_id: 0,
    });
    let doc = SessionDoc {
        config,
        event_history: vec![Event::new(
            EventPayload::Task(Some("old task".to_string())),
            "user",
            "devon",
        )],
    };

    let mut session = Session::from_doc(doc, Box::new(ScriptedAgent::new("devon", Vec::new())));
    session.setup().unwrap();
    session.start();
    session.run_event_loop().unwrap();
    assert_eq!(session.get_status(), SessionStatus::Terminated);

    // The old history is gone; a fresh new-task seed took its place.
    let events = session.event_log.snapshot();
    assert_eq!(
        events[0].payload,
        EventPayload::Task(Some("ask user for what to do".to_string()))
    );

    // The ghost checkpoint was wiped; only the fresh initial one remains.
    assert_eq!(session.config.checkpoints.len(), 1);
    assert_eq!(session.config.checkpoints[0].commit_message, "Initial commit");

    let git = GitVersioning::new(dir.path(), VersioningKind::Git);
    assert_eq!(git.current_branch().1, AGENT_BRANCH);

    session.teardown().unwrap();
}

#[test]
fn test_load_merges_user_branch_drift() {
    let _guard = cwd_guard();
    let dir = seeded_repo();

    // First session: bootstrap, then save without tearing down the branch.
    let mut first = git_session(&dir);
    first.setup().unwrap();
    first.start();
    first.run_event_loop().unwrap();
    let doc = first.to_doc();

    // Put the shell back where it came from without touching the repo.
    let git = GitVersioning::new(dir.path(), VersioningKind::Git);
    for i in 0..first.environments.len() {
        first.environments.at_mut(i).teardown().unwrap();
    }

    // The user goes back to their branch and keeps working.
    git.switch_branch("main");
    fs::write(dir.path().join("user.txt"), "user work\n").unwrap();
    let (code, text) = git.commit_all_files("user kept going", false);
    assert_eq!(code, 0, "{text}");

    // Second session: loaded from the document, still on the user branch.
    let mut second = Session::from_doc(doc, Box::new(ScriptedAgent::new("devon", Vec::new())));
    second.setup().unwrap();
    second.start();
    second.run_event_loop().unwrap();

    // Resumed on the agent branch with the user's commit folded in.
    assert_eq!(git.current_branch().1, AGENT_BRANCH);
    let (_, log) = git.commits_on_current_branch();
    assert!(log.contains("user kept going"), "{log}");
    assert!(dir.path().join("user.txt").exists());
    // Checkpoints survived the load.
    assert_eq!(second.config.checkpoints.len(), 1);

    second.teardown().unwrap();
}
