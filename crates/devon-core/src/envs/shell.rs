//! Interactive shell environments.
//!
//! A login shell is spawned once at setup and reused for every command, so
//! exported variables and `cd` persist across tool calls. Output is
//! collected by a child-aware timed reader: while the shell has live child
//! processes the reader only waits; once they are gone it drains both pipes
//! through a short readiness window, then retrieves the exit code with an
//! `echo $?` probe in a second read window.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tempfile::TempDir;
use tracing::{debug, warn};

use super::{Environment, EnvironmentRecord};
use crate::tools::{Tool, ToolTable};

/// Poll interval while shell children are alive.
const CHILD_POLL: Duration = Duration::from_millis(50);

/// Readiness window used to drain remaining output once children exit.
const SETTLE: Duration = Duration::from_millis(200);

/// Ceiling on the exit-code probe and the post-command drain.
const PROBE_WINDOW: Duration = Duration::from_secs(5);

/// Deadline for the warm-up command run right after spawn.
const WARMUP_TIMEOUT: Duration = Duration::from_secs(10);

/// The command outlived its deadline. The shell process stays alive;
/// caller policy decides cleanup.
#[derive(Debug)]
pub struct ShellTimeout {
    pub timeout: Duration,
    pub partial: String,
}

impl fmt::Display for ShellTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timeout: command did not finish within {} seconds",
            self.timeout.as_secs()
        )
    }
}

impl Error for ShellTimeout {}

/// The shell process exited while a command was being read.
#[derive(Debug)]
pub struct ShellExited {
    pub partial: String,
}

impl fmt::Display for ShellExited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shell process exited unexpectedly")
    }
}

impl Error for ShellExited {}

#[cfg(unix)]
fn set_nonblocking(fd: std::os::fd::RawFd) -> Result<()> {
    // SAFETY: the fd belongs to a pipe we own for the life of the channel;
    // fcntl on it does not touch any Rust-managed memory.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        bail!("fcntl(F_GETFL) failed: {}", io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        bail!("fcntl(F_SETFL) failed: {}", io::Error::last_os_error());
    }
    Ok(())
}

/// Reads whatever is available right now without blocking.
fn read_available(reader: &mut impl Read, buf: &mut String) -> Result<usize> {
    let mut total = 0;
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.push_str(&String::from_utf8_lossy(&chunk[..n]));
                total += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e).context("read shell pipe"),
        }
    }
    Ok(total)
}

/// Direct children of `pid`, via `/proc/<pid>/task/*/children` with a
/// `/proc` scan fallback for kernels without the children file.
fn child_pids(pid: u32) -> Vec<u32> {
    let mut pids = Vec::new();
    let mut saw_children_file = false;
    if let Ok(entries) = fs::read_dir(format!("/proc/{pid}/task")) {
        for entry in entries.flatten() {
            if let Ok(text) = fs::read_to_string(entry.path().join("children")) {
                saw_children_file = true;
                pids.extend(text.split_whitespace().filter_map(|p| p.parse::<u32>().ok()));
            }
        }
    }
    if saw_children_file {
        return pids;
    }

    let Ok(entries) = fs::read_dir("/proc") else {
        return pids;
    };
    for entry in entries.flatten() {
        let Some(candidate) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if let Ok(stat) = fs::read_to_string(entry.path().join("stat"))
            && parent_of(&stat) == Some(pid)
        {
            pids.push(candidate);
        }
    }
    pids
}

/// Parses the ppid out of a `/proc/<pid>/stat` line. The comm field may
/// contain spaces and parentheses, so fields are counted from the last ')'.
fn parent_of(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// The long-lived interactive shell and its pipes.
struct ShellChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

impl ShellChannel {
    fn spawn(dir: &Path) -> Result<Self> {
        let mut child = Command::new("/bin/bash")
            .arg("-l")
            .current_dir(dir)
            // Non-interactive dumb terminal: suppresses colors and
            // progress bars in well-behaved tools.
            .env("TERM", "dumb")
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawn interactive shell")?;

        let stdin = child.stdin.take().context("shell stdin missing")?;
        let stdout = child.stdout.take().context("shell stdout missing")?;
        let stderr = child.stderr.take().context("shell stderr missing")?;

        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            set_nonblocking(stdout.as_raw_fd())?;
            set_nonblocking(stderr.as_raw_fd())?;
        }

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
        })
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.write_all(b"\n"))
            .and_then(|()| self.stdin.flush())
            .context("write to shell stdin")
    }

    fn drain_into(&mut self, out: &mut String, err: &mut String) -> Result<usize> {
        let mut n = read_available(&mut self.stdout, out)?;
        n += read_available(&mut self.stderr, err)?;
        Ok(n)
    }

    /// Submits one command and collects its output window.
    fn execute(&mut self, input: &str, timeout: Duration) -> Result<(String, i32)> {
        if !self.alive() {
            return Err(ShellExited {
                partial: String::new(),
            }
            .into());
        }

        // Drop bytes left over from a previous window.
        let mut stale_out = String::new();
        let mut stale_err = String::new();
        let stale = self.drain_into(&mut stale_out, &mut stale_err)?;
        if stale > 0 {
            debug!(bytes = stale, "dropped stale shell output");
        }

        // Empty command: a bare newline, exit code 0.
        if input.trim().is_empty() {
            self.write_line("")?;
            return Ok((String::new(), 0));
        }

        self.write_line(input)?;

        let deadline = Instant::now() + timeout;
        let mut out = String::new();
        let mut err = String::new();

        // Buffered output is collected on completion, so while a child is
        // running the reader only has to wait for it. The leading sleep
        // gives the shell time to fork before the first check.
        loop {
            thread::sleep(CHILD_POLL);
            self.drain_into(&mut out, &mut err)?;
            if !self.alive() {
                self.drain_into(&mut out, &mut err)?;
                out.push_str(&err);
                return Err(ShellExited { partial: out }.into());
            }
            if child_pids(self.pid()).is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                out.push_str(&err);
                return Err(ShellTimeout {
                    timeout,
                    partial: out,
                }
                .into());
            }
        }

        self.settle_drain(&mut out, &mut err)?;

        // Second read window: the exit code of the command. A failed write
        // here usually means the command was an `exit`.
        if let Err(e) = self.write_line("echo $?") {
            out.push_str(&err);
            if !self.alive() {
                return Err(ShellExited { partial: out }.into());
            }
            return Err(e);
        }
        let exit_code = self.read_exit_code(&mut out, &mut err, timeout, deadline)?;

        out.push_str(&err);
        Ok((out, exit_code))
    }

    /// Drains remaining output until the pipes have been quiet for
    /// [`SETTLE`], bounded by [`PROBE_WINDOW`].
    fn settle_drain(&mut self, out: &mut String, err: &mut String) -> Result<()> {
        let start = Instant::now();
        let mut last_activity = Instant::now();
        loop {
            let n = self.drain_into(out, err)?;
            if n > 0 {
                last_activity = Instant::now();
            } else if last_activity.elapsed() >= SETTLE {
                return Ok(());
            }
            if start.elapsed() >= PROBE_WINDOW {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Reads the `echo $?` window. Late command output can still arrive
    /// here; the code is the last parseable stdout line, the rest is
    /// credited back to the command. A probe still pending past the
    /// command deadline means a foreground command is holding the shell.
    fn read_exit_code(
        &mut self,
        out: &mut String,
        err: &mut String,
        timeout: Duration,
        deadline: Instant,
    ) -> Result<i32> {
        let start = Instant::now();
        let mut probe = String::new();
        loop {
            read_available(&mut self.stderr, err)?;
            read_available(&mut self.stdout, &mut probe)?;
            let complete = probe.ends_with('\n')
                && probe
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .is_some_and(|line| line.trim().parse::<i32>().is_ok());
            if complete {
                break;
            }
            if !self.alive() {
                out.push_str(&probe);
                out.push_str(err);
                return Err(ShellExited {
                    partial: std::mem::take(out),
                }
                .into());
            }
            if Instant::now() >= deadline {
                out.push_str(&probe);
                out.push_str(err);
                return Err(ShellTimeout {
                    timeout,
                    partial: std::mem::take(out),
                }
                .into());
            }
            if start.elapsed() >= PROBE_WINDOW {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let lines: Vec<&str> = probe.lines().collect();
        let code_line = lines.iter().rposition(|line| !line.trim().is_empty());
        let exit_code = code_line.and_then(|i| lines[i].trim().parse::<i32>().ok());
        // Late command output that arrived before the code line is credited
        // back to the command window.
        let keep = match (code_line, exit_code) {
            (Some(i), Some(_)) => i,
            _ => lines.len(),
        };
        for line in &lines[..keep] {
            out.push_str(line);
            out.push('\n');
        }
        match exit_code {
            Some(code) => Ok(code),
            None => {
                warn!("could not parse exit code from shell probe");
                Ok(-1)
            }
        }
    }

    fn shutdown(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// The default execution environment: a shell rooted at the session path.
///
/// Setup changes the process working directory to the session path and
/// restores it at teardown; one session per process.
pub struct LocalShellEnvironment {
    path: PathBuf,
    old_dir: Option<PathBuf>,
    shell: Option<ShellChannel>,
    tools: ToolTable,
    default_tool: Option<Arc<dyn Tool>>,
}

impl LocalShellEnvironment {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            old_dir: None,
            shell: None,
            tools: ToolTable::new(),
            default_tool: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Environment for LocalShellEnvironment {
    fn name(&self) -> &str {
        "local"
    }

    fn setup(&mut self) -> Result<()> {
        if self.old_dir.is_none() {
            self.old_dir = Some(std::env::current_dir().context("read working directory")?);
        }
        std::env::set_current_dir(&self.path)
            .with_context(|| format!("chdir to {}", self.path.display()))?;

        if let Some(previous) = self.shell.take() {
            previous.shutdown();
        }
        let mut shell = ShellChannel::spawn(&self.path)?;
        // Absorb login-profile output before the first real command.
        if let Err(e) = shell.execute("true", WARMUP_TIMEOUT) {
            warn!(error = %e, "shell warm-up failed");
        }
        self.shell = Some(shell);
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        if let Some(shell) = self.shell.take() {
            shell.shutdown();
        }
        if let Some(old_dir) = self.old_dir.take() {
            std::env::set_current_dir(&old_dir)
                .with_context(|| format!("restore working directory {}", old_dir.display()))?;
        }
        Ok(())
    }

    fn execute(&mut self, input: &str, timeout: Duration) -> Result<(String, i32)> {
        self.shell
            .as_mut()
            .context("shell environment is not set up")?
            .execute(input, timeout)
    }

    fn tools(&self) -> &ToolTable {
        &self.tools
    }

    fn tools_mut(&mut self) -> &mut ToolTable {
        &mut self.tools
    }

    fn default_tool(&self) -> Option<Arc<dyn Tool>> {
        self.default_tool.clone()
    }

    fn set_default_tool(&mut self, tool: Arc<dyn Tool>) {
        self.default_tool = Some(tool);
    }

    fn record(&mut self) -> EnvironmentRecord {
        let cwd = self.shell.as_mut().and_then(|shell| {
            shell
                .execute("pwd", Duration::from_secs(5))
                .ok()
                .map(|(output, _)| PathBuf::from(output.trim()))
        });
        EnvironmentRecord::LocalShellEnvironment {
            path: self.path.clone(),
            cwd,
            old_dir: self.old_dir.clone(),
        }
    }
}

/// Copies `src` into `dst` (file or directory tree).
fn copy_any(src: &Path, dst_dir: &Path) -> Result<()> {
    let name = src
        .file_name()
        .with_context(|| format!("seed path has no file name: {}", src.display()))?;
    let target = dst_dir.join(name);
    if src.is_dir() {
        copy_tree(src, &target)
    } else {
        fs::copy(src, &target)
            .map(|_| ())
            .with_context(|| format!("copy {}", src.display()))
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// A shell environment rooted at a scratch directory seeded with copies of
/// the given source paths.
pub struct TempDirShellEnvironment {
    inner: LocalShellEnvironment,
    seed_paths: Vec<PathBuf>,
    /// Keeps the scratch directory alive until the environment drops.
    _scratch: Option<TempDir>,
}

impl TempDirShellEnvironment {
    pub fn new(seed_paths: Vec<PathBuf>) -> Result<Self> {
        let scratch = tempfile::tempdir().context("create scratch directory")?;
        Ok(Self {
            inner: LocalShellEnvironment::new(scratch.path()),
            seed_paths,
            _scratch: Some(scratch),
        })
    }

    /// Rehydrates from a persisted record; the scratch directory is reused
    /// as a plain path.
    pub fn from_record(path: PathBuf, seed_paths: Vec<PathBuf>) -> Self {
        Self {
            inner: LocalShellEnvironment::new(path),
            seed_paths,
            _scratch: None,
        }
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }
}

impl Environment for TempDirShellEnvironment {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn setup(&mut self) -> Result<()> {
        for seed in &self.seed_paths {
            copy_any(seed, self.inner.path())?;
        }
        self.inner.setup()
    }

    fn teardown(&mut self) -> Result<()> {
        self.inner.teardown()
    }

    fn execute(&mut self, input: &str, timeout: Duration) -> Result<(String, i32)> {
        self.inner.execute(input, timeout)
    }

    fn tools(&self) -> &ToolTable {
        self.inner.tools()
    }

    fn tools_mut(&mut self) -> &mut ToolTable {
        self.inner.tools_mut()
    }

    fn default_tool(&self) -> Option<Arc<dyn Tool>> {
        self.inner.default_tool()
    }

    fn set_default_tool(&mut self, tool: Arc<dyn Tool>) {
        self.inner.default_tool = Some(tool);
    }

    fn record(&mut self) -> EnvironmentRecord {
        EnvironmentRecord::TempDirShellEnvironment {
            path: self.inner.path().to_path_buf(),
            seed_paths: self.seed_paths.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_of_handles_parenthesized_comm() {
        let stat = "1234 (weird name) with) parens) S 42 1234 1234 0 -1";
        assert_eq!(parent_of(stat), Some(42));
    }

    #[test]
    fn test_child_pids_of_own_process() {
        // The test harness has no reason to have children of this process
        // named after an impossible pid.
        assert!(child_pids(u32::MAX - 1).is_empty());
    }

    #[test]
    fn test_copy_any_copies_files_and_trees() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), "alpha").unwrap();
        fs::create_dir(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested/b.txt"), "beta").unwrap();

        copy_any(&src.path().join("a.txt"), dst.path()).unwrap();
        copy_any(&src.path().join("nested"), dst.path()).unwrap();

        assert_eq!(fs::read_to_string(dst.path().join("a.txt")).unwrap(), "alpha");
        assert_eq!(
            fs::read_to_string(dst.path().join("nested/b.txt")).unwrap(),
            "beta"
        );
    }
}
