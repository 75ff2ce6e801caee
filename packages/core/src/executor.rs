//! Command execution abstraction with privilege escalation support.
//!
//! Every inventory and action command goes through a [`CommandExecutor`].
//! The production implementation is [`ExecutionContext`], which runs the
//! command directly or, in elevated mode, wrapped in the configured
//! administrator-approval tool (`osascript`, `pkexec` or `sudo`). A run never
//! fails with an error: launch problems, non-zero exits, declined prompts and
//! timeouts all come back as a [`CommandOutput`] with `success == false`.

use std::fmt;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Prompt shown by the macOS administrator dialog.
pub const ELEVATION_PROMPT: &str = "volctl needs administrator access to manage volumes";

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Privilege escalation method for executing commands that require root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeEscalation {
    /// Execute directly without privilege escalation.
    None,
    /// Use `osascript ... with administrator privileges` (macOS GUI prompt).
    Osascript,
    /// Use `pkexec` for GUI-based privilege escalation (polkit).
    Pkexec,
    /// Use `sudo` for TTY-based privilege escalation.
    Sudo,
}

impl PrivilegeEscalation {
    /// The native approval tool of the current platform.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            PrivilegeEscalation::Osascript
        } else {
            PrivilegeEscalation::Pkexec
        }
    }
}

impl Default for PrivilegeEscalation {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Renders the command as a POSIX shell line, quoting unsafe arguments.
    pub fn to_shell_string(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// Quotes one shell word. Words made only of safe characters pass through.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Escapes text for embedding inside an AppleScript double-quoted string.
pub fn applescript_escape(text: &str) -> String {
    text.replace('\\', r"\\").replace('"', "\\\"")
}

/// Builds the `do shell script` source that runs `shell_line` as administrator.
pub fn administrator_script(shell_line: &str, prompt: &str) -> String {
    format!(
        "do shell script \"{}\" with administrator privileges with prompt \"{}\"",
        applescript_escape(shell_line),
        applescript_escape(prompt)
    )
}

/// Raw result of one command run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    /// Exit code, `None` when the process never started or was killed.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: Some(0),
            timed_out: false,
        }
    }

    /// Run that exited with `code` and the given stderr.
    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: code == 0,
            exit_code: Some(code),
            timed_out: false,
        }
    }

    /// Process could not be started.
    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            success: false,
            exit_code: None,
            timed_out: false,
        }
    }

    fn timeout() -> Self {
        Self {
            stdout: String::new(),
            stderr: "timed out".to_string(),
            success: false,
            exit_code: None,
            timed_out: true,
        }
    }

    /// Classifies a failed run into the error taxonomy.
    pub fn into_result(self, command: &CommandLine, timeout: Duration) -> Result<CommandOutput> {
        if self.success {
            return Ok(self);
        }
        let command = command.to_shell_string();
        if self.timed_out {
            return Err(Error::CommandTimeout {
                command,
                timeout_secs: timeout.as_secs(),
            });
        }
        // diskutil reports some failures on stdout.
        let stderr = match self.stderr.trim() {
            "" => self.stdout.trim().to_string(),
            text => text.to_string(),
        };
        if is_cancellation(self.exit_code, &stderr) {
            return Err(Error::AuthenticationCancelled);
        }
        if is_permission_failure(&stderr) {
            return Err(Error::PermissionDenied {
                command,
                message: stderr,
            });
        }
        match self.exit_code {
            Some(code) => Err(Error::CommandExit {
                command,
                code,
                stderr,
            }),
            None => Err(Error::CommandLaunch {
                command,
                message: stderr,
            }),
        }
    }

    /// Best failure text: stderr, or stdout when the tool reports errors there.
    pub fn failure_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "command did not run".to_string(),
        }
    }
}

fn is_cancellation(exit_code: Option<i32>, stderr: &str) -> bool {
    // pkexec exits 126 when the dialog is dismissed; osascript reports -128.
    exit_code == Some(126) || stderr.contains("User canceled") || stderr.contains("(-128)")
}

fn is_permission_failure(stderr: &str) -> bool {
    let lowered = stderr.to_ascii_lowercase();
    [
        "incorrect password",
        "permission denied",
        "not privileged",
        "operation not permitted",
    ]
    .iter()
    .any(|needle| lowered.contains(needle))
}

/// Runs external commands.
///
/// Implementations must never panic: every failure is reported through
/// [`CommandOutput::success`].
pub trait CommandExecutor: Send + Sync {
    fn run(&self, command: &CommandLine, elevated: bool) -> CommandOutput;

    /// Deadline applied to a run, used when classifying timeouts.
    fn timeout_for(&self, elevated: bool) -> Duration {
        let _ = elevated;
        Duration::from_secs(30)
    }

    /// Runs the command and classifies failures as [`Error`]s.
    fn run_checked(&self, command: &CommandLine, elevated: bool) -> Result<CommandOutput> {
        self.run(command, elevated)
            .into_result(command, self.timeout_for(elevated))
    }
}

/// Execution context for running system commands.
///
/// Holds how privileged commands are wrapped and how long any command may run.
///
/// # Example
///
/// ```
/// use volctl_core::executor::{ExecutionContext, PrivilegeEscalation};
///
/// // Default: the platform's native approval prompt
/// let ctx = ExecutionContext::default();
///
/// // For terminal sessions
/// let tty_ctx = ExecutionContext::with_escalation(PrivilegeEscalation::Sudo);
/// assert_eq!(tty_ctx.escalation(), PrivilegeEscalation::Sudo);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    escalation: PrivilegeEscalation,
    timeout: Duration,
    elevated_timeout: Duration,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            escalation: PrivilegeEscalation::platform_default(),
            timeout: Duration::from_secs(30),
            elevated_timeout: Duration::from_secs(120),
        }
    }
}

impl ExecutionContext {
    /// Creates a context with the platform default escalation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an execution context with a specific escalation method.
    pub fn with_escalation(escalation: PrivilegeEscalation) -> Self {
        Self {
            escalation,
            ..Self::default()
        }
    }

    /// Sets the deadlines for plain and elevated runs.
    pub fn with_timeouts(mut self, timeout: Duration, elevated_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.elevated_timeout = elevated_timeout;
        self
    }

    /// Returns the current privilege escalation method.
    pub fn escalation(&self) -> PrivilegeEscalation {
        self.escalation
    }

    /// Returns the command line actually launched for `command`.
    pub fn launch_line(&self, command: &CommandLine, elevated: bool) -> CommandLine {
        if !elevated || running_as_root() {
            return command.clone();
        }
        match self.escalation {
            PrivilegeEscalation::None => command.clone(),
            PrivilegeEscalation::Osascript => CommandLine::new("osascript").arg("-e").arg(
                administrator_script(&command.to_shell_string(), ELEVATION_PROMPT),
            ),
            PrivilegeEscalation::Pkexec => CommandLine::new("pkexec")
                .arg(command.program.clone())
                .args(command.args.iter().cloned()),
            PrivilegeEscalation::Sudo => CommandLine::new("sudo")
                .arg(command.program.clone())
                .args(command.args.iter().cloned()),
        }
    }
}

impl CommandExecutor for ExecutionContext {
    fn run(&self, command: &CommandLine, elevated: bool) -> CommandOutput {
        let launch = self.launch_line(command, elevated);
        let timeout = self.timeout_for(elevated);
        debug!(command = %command, elevated, "running command");

        let output = run_with_deadline(&launch, timeout);
        if output.timed_out {
            warn!(command = %command, ?timeout, "command timed out");
        } else if !output.success {
            debug!(command = %command, code = ?output.exit_code, detail = %output.failure_text(), "command failed");
        }
        output
    }

    fn timeout_for(&self, elevated: bool) -> Duration {
        if elevated {
            self.elevated_timeout
        } else {
            self.timeout
        }
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

/// Runs a command, killing it once `timeout` has elapsed.
fn run_with_deadline(command: &CommandLine, timeout: Duration) -> CommandOutput {
    let mut child = match Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return CommandOutput::launch_failure(format!(
                "failed to execute '{}': {}",
                command.program, e
            ));
        }
    };

    // Pipes are drained concurrently so a chatty child never blocks on a full buffer.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let deadline = Instant::now() + timeout;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                // Readers are left detached: a grandchild may still hold the pipes.
                return CommandOutput::timeout();
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return CommandOutput::launch_failure(format!(
                    "failed to wait for '{}': {}",
                    command.program, e
                ));
            }
        }
    };

    CommandOutput {
        stdout: collect(stdout),
        stderr: collect(stderr),
        success: status.success(),
        exit_code: status.code(),
        timed_out: false,
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

/// One invocation seen by a [`ScriptedExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: String,
    pub elevated: bool,
}

struct ScriptRule {
    command: String,
    elevated: Option<bool>,
    output: CommandOutput,
}

/// Executor double answering from a rule table.
///
/// Rules match on the exact shell string of the command. Later rules take
/// precedence over earlier ones; unmatched commands fail with exit code 1.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<ScriptRule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `command` (any privilege mode) with `output`.
    pub fn on(self, command: impl Into<String>, output: CommandOutput) -> Self {
        self.push(command.into(), None, output);
        self
    }

    /// Answers `command` only when run in the given privilege mode.
    pub fn on_mode(self, command: impl Into<String>, elevated: bool, output: CommandOutput) -> Self {
        self.push(command.into(), Some(elevated), output);
        self
    }

    /// Adds a rule to an executor that is already shared.
    pub fn push(&self, command: String, elevated: Option<bool>, output: CommandOutput) {
        self.rules.lock().push(ScriptRule {
            command,
            elevated,
            output,
        });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls whose command starts with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.command.starts_with(prefix))
            .count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn run(&self, command: &CommandLine, elevated: bool) -> CommandOutput {
        let line = command.to_shell_string();
        self.calls.lock().push(RecordedCall {
            command: line.clone(),
            elevated,
        });
        self.rules
            .lock()
            .iter()
            .rev()
            .find(|r| r.command == line && r.elevated.is_none_or(|e| e == elevated))
            .map(|r| r.output.clone())
            .unwrap_or_else(|| CommandOutput::exit(1, format!("no scripted answer for '{line}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/dev/disk2s1"), "/dev/disk2s1");
        assert_eq!(shell_quote("My Drive"), "'My Drive'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_to_shell_string() {
        let cmd = CommandLine::new("mount")
            .args(["-t", "msdos"])
            .arg("/dev/disk0s1")
            .arg("/Volumes/EFI disk0s1");
        assert_eq!(
            cmd.to_shell_string(),
            "mount -t msdos /dev/disk0s1 '/Volumes/EFI disk0s1'"
        );
    }

    #[test]
    fn test_administrator_script_escaping() {
        let script = administrator_script(r#"echo "a\b""#, "prompt");
        assert_eq!(
            script,
            r#"do shell script "echo \"a\\b\"" with administrator privileges with prompt "prompt""#
        );
    }

    #[test]
    fn test_launch_line_wrappers() {
        let cmd = CommandLine::new("diskutil").args(["unmount", "force", "/dev/disk2s1"]);

        let none = ExecutionContext::with_escalation(PrivilegeEscalation::None);
        assert_eq!(none.launch_line(&cmd, true), cmd);

        let plain = ExecutionContext::with_escalation(PrivilegeEscalation::Sudo);
        assert_eq!(plain.launch_line(&cmd, false), cmd);

        if !running_as_root() {
            let sudo = plain.launch_line(&cmd, true);
            assert_eq!(sudo.program, "sudo");
            assert_eq!(sudo.args[0], "diskutil");

            let osa = ExecutionContext::with_escalation(PrivilegeEscalation::Osascript)
                .launch_line(&cmd, true);
            assert_eq!(osa.program, "osascript");
            assert_eq!(osa.args[0], "-e");
            assert!(osa.args[1].contains("do shell script \"diskutil unmount force /dev/disk2s1\""));
        }
    }

    #[test]
    fn test_into_result_classification() {
        let cmd = CommandLine::new("diskutil").arg("mount");
        let timeout = Duration::from_secs(5);

        assert!(CommandOutput::ok("fine").into_result(&cmd, timeout).is_ok());
        assert!(matches!(
            CommandOutput::exit(126, "").into_result(&cmd, timeout),
            Err(Error::AuthenticationCancelled)
        ));
        assert!(matches!(
            CommandOutput::exit(1, "execution error: User canceled. (-128)")
                .into_result(&cmd, timeout),
            Err(Error::AuthenticationCancelled)
        ));
        assert!(matches!(
            CommandOutput::exit(1, "mount: Operation not permitted").into_result(&cmd, timeout),
            Err(Error::PermissionDenied { .. })
        ));
        assert!(matches!(
            CommandOutput::exit(1, "Resource busy").into_result(&cmd, timeout),
            Err(Error::CommandExit { code: 1, .. })
        ));
        assert!(matches!(
            CommandOutput::launch_failure("No such file").into_result(&cmd, timeout),
            Err(Error::CommandLaunch { .. })
        ));
        assert!(matches!(
            CommandOutput::timeout().into_result(&cmd, timeout),
            Err(Error::CommandTimeout { timeout_secs: 5, .. })
        ));
    }

    #[test]
    fn test_scripted_executor_rules() {
        let exec = ScriptedExecutor::new()
            .on("diskutil list", CommandOutput::ok("first"))
            .on("diskutil list", CommandOutput::ok("second"))
            .on_mode("diskutil mount /dev/disk2s1", true, CommandOutput::ok(""));

        let list = CommandLine::new("diskutil").arg("list");
        assert_eq!(exec.run(&list, false).stdout, "second");

        let mount = CommandLine::new("diskutil").args(["mount", "/dev/disk2s1"]);
        assert!(!exec.run(&mount, false).success);
        assert!(exec.run(&mount, true).success);

        assert_eq!(exec.call_count(), 3);
        assert_eq!(exec.count_prefix("diskutil mount"), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_real_commands() {
        let ctx = ExecutionContext::with_escalation(PrivilegeEscalation::None);

        let echo = ctx.run(&CommandLine::new("echo").arg("hello"), false);
        assert!(echo.success);
        assert_eq!(echo.stdout.trim(), "hello");

        let missing = ctx.run(&CommandLine::new("volctl-no-such-binary"), false);
        assert!(!missing.success);
        assert_eq!(missing.exit_code, None);
        assert!(missing.stderr.contains("volctl-no-such-binary"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_enforces_deadline() {
        let ctx = ExecutionContext::with_escalation(PrivilegeEscalation::None)
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200));

        let started = Instant::now();
        let out = ctx.run(&CommandLine::new("sleep").arg("5"), false);
        assert!(out.timed_out);
        assert!(!out.success);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
