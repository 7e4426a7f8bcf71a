//! Whitelisted external process execution with a per-call deadline.
//!
//! Commands are spawned directly (never through a shell) from inside the project base.

use crate::{AgentError, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use taskwing_protocol::normalize_relative;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub const ALLOWED_COMMANDS: &[&str] = &["git", "head", "tail", "wc", "find"];
pub const MAX_OUTPUT_BYTES: usize = 10_000;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const READ_ONLY_GIT_SUBCOMMANDS: &[&str] = &[
    "log",
    "show",
    "diff",
    "status",
    "blame",
    "ls-files",
    "rev-parse",
    "shortlog",
    "describe",
    "grep",
    "rev-list",
];

/// `branch` and `tag` run only in list mode; these are the flags allowed there.
const GIT_BRANCH_LIST_FLAGS: &[&str] = &[
    "--list", "-l", "-a", "--all", "-r", "--remotes", "-v", "-vv", "--verbose", "--contains",
    "--no-contains", "--merged", "--no-merged", "--points-at", "--sort", "--format",
    "--show-current", "--column", "--no-column", "--color", "--no-color", "-i", "--ignore-case",
];

/// Flags in list mode whose value may follow as a separate argument.
const GIT_LIST_VALUE_FLAGS: &[&str] = &[
    "--contains", "--no-contains", "--merged", "--no-merged", "--points-at", "--sort", "--format",
];

const FORBIDDEN_FIND_ACTIONS: &[&str] = &[
    "-exec", "-execdir", "-ok", "-okdir", "-delete", "-fprint", "-fprint0", "-fprintf", "-fls",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: Option<i32>,
    pub truncated: bool,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr, as fed back to a model.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.trim().is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        if self.truncated {
            out.push_str(&format!("\n... (output truncated at {MAX_OUTPUT_BYTES} bytes)"));
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    base: PathBuf,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    #[must_use]
    pub fn is_allowed(command: &str) -> bool {
        ALLOWED_COMMANDS.contains(&command)
    }

    /// Checks the whitelist and argument policy without spawning anything.
    pub fn validate(command: &str, args: &[String]) -> Result<()> {
        if !Self::is_allowed(command) {
            return Err(AgentError::CommandNotAllowed(format!(
                "{command} (allowed: {})",
                ALLOWED_COMMANDS.join(", ")
            )));
        }

        for arg in args {
            let value = arg
                .split_once('=')
                .filter(|(flag, _)| flag.starts_with('-'))
                .map_or(arg.as_str(), |(_, value)| value);
            if value.starts_with('-') || value.is_empty() {
                continue;
            }
            if value.starts_with('/') || value.starts_with('~') || value.contains("..") {
                normalize_relative(value)?;
            }
        }

        match command {
            "git" => {
                if let Some(arg) = args
                    .iter()
                    .find(|arg| *arg == "--output" || arg.starts_with("--output="))
                {
                    return Err(AgentError::ToolDenied(format!(
                        "git option {arg} writes files"
                    )));
                }
                let position = args.iter().position(|arg| !arg.starts_with('-'));
                if let Some(position) = position {
                    let sub = args[position].as_str();
                    if sub == "branch" || sub == "tag" {
                        validate_git_listing(sub, &args[position + 1..])?;
                    } else if !READ_ONLY_GIT_SUBCOMMANDS.contains(&sub) {
                        return Err(AgentError::ToolDenied(format!(
                            "git {sub} is not a read-only subcommand"
                        )));
                    }
                }
            }
            "find" => {
                if let Some(action) = args
                    .iter()
                    .find(|arg| FORBIDDEN_FIND_ACTIONS.contains(&arg.as_str()))
                {
                    return Err(AgentError::ToolDenied(format!(
                        "find action {action} is not permitted"
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn run(
        &self,
        command: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        self.run_in(&self.base, command, args, cancel).await
    }

    /// Like [`run`](Self::run) but with an explicit working directory.
    pub async fn run_in(
        &self,
        dir: &Path,
        command: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        Self::validate(command, args)?;
        debug!("exec {command} {}", args.join(" "));

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if command == "git" {
            cmd.env("GIT_TERMINAL_PROMPT", "0").env("GIT_PAGER", "cat");
        }

        let child = cmd.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound && command == "git" {
                AgentError::GitUnavailable(err.to_string())
            } else {
                AgentError::IoError(err)
            }
        })?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(output) => output?,
                Err(_) => {
                    return Err(AgentError::BudgetExceeded(format!(
                        "{command} exceeded {} ms",
                        self.timeout.as_millis()
                    )))
                }
            },
        };

        let (stdout, stdout_truncated) = truncate_output(&output.stdout, MAX_OUTPUT_BYTES);
        let remaining = MAX_OUTPUT_BYTES.saturating_sub(stdout.len());
        let (stderr, stderr_truncated) = truncate_output(&output.stderr, remaining);
        Ok(CommandOutput {
            stdout,
            stderr,
            status: output.status.code(),
            truncated: stdout_truncated || stderr_truncated,
        })
    }
}

/// `git branch` / `git tag` are read-only only in list mode: every flag must be a listing flag,
/// and a bare name (which would create a ref) needs an explicit `--list` / `-l`.
fn validate_git_listing(sub: &str, rest: &[String]) -> Result<()> {
    let explicit_list = rest.iter().any(|arg| arg == "--list" || arg == "-l");
    let mut expects_value = false;
    for arg in rest {
        if expects_value {
            expects_value = false;
            continue;
        }
        if arg == "--" {
            continue;
        }
        if arg.starts_with('-') {
            let flag = arg.split_once('=').map_or(arg.as_str(), |(flag, _)| flag);
            if !GIT_BRANCH_LIST_FLAGS.contains(&flag) {
                return Err(AgentError::ToolDenied(format!(
                    "git {sub} {arg} is not a listing option"
                )));
            }
            expects_value = !arg.contains('=') && GIT_LIST_VALUE_FLAGS.contains(&flag);
        } else if !explicit_list {
            return Err(AgentError::ToolDenied(format!(
                "git {sub} {arg} would create a ref; pass --list to match patterns"
            )));
        }
    }
    Ok(())
}

fn truncate_output(bytes: &[u8], cap: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= cap {
        return (text.into_owned(), false);
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwing_protocol::{ErrorCode, HasErrorCode};

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn non_whitelisted_commands_are_rejected() {
        for command in ["rm", "sh", "bash", "curl", "cat"] {
            let err = ProcessRunner::validate(command, &[]).expect_err("denied");
            assert_eq!(err.code(), ErrorCode::CommandNotAllowed);
        }
        assert!(ProcessRunner::validate("wc", &args(&["-l", "main.go"])).is_ok());
    }

    #[test]
    fn path_arguments_must_stay_inside_base() {
        let err = ProcessRunner::validate("head", &args(&["-n", "5", "/etc/passwd"]))
            .expect_err("absolute");
        assert_eq!(err.code(), ErrorCode::PathTraversal);
        let err = ProcessRunner::validate("find", &args(&["../..", "-name", "*.go"]))
            .expect_err("traversal");
        assert_eq!(err.code(), ErrorCode::PathTraversal);
        assert!(ProcessRunner::validate("find", &args(&["internal/..", "-name", "*.go"])).is_ok());
    }

    #[test]
    fn mutating_subcommands_are_denied() {
        let err = ProcessRunner::validate("git", &args(&["push", "origin"])).expect_err("push");
        assert_eq!(err.code(), ErrorCode::ToolDenied);
        let err = ProcessRunner::validate("find", &args(&[".", "-delete"])).expect_err("delete");
        assert_eq!(err.code(), ErrorCode::ToolDenied);
        assert!(ProcessRunner::validate("git", &args(&["--no-pager", "log", "-5"])).is_ok());
    }

    #[test]
    fn ref_mutations_are_denied() {
        for argv in [
            &["branch", "-D", "main"][..],
            &["branch", "feature"],
            &["branch", "-m", "old", "new"],
            &["tag", "evil"],
            &["tag", "-a", "v1", "-m", "msg"],
            &["tag", "-d", "v1"],
        ] {
            let err = ProcessRunner::validate("git", &args(argv)).expect_err("ref mutation");
            assert_eq!(err.code(), ErrorCode::ToolDenied, "git {argv:?}");
        }
        for argv in [
            &["branch"][..],
            &["branch", "-a"],
            &["branch", "-r", "--contains", "abc1234"],
            &["branch", "--list", "feat*"],
            &["tag", "-l", "v1.*"],
            &["tag", "--sort=-creatordate"],
        ] {
            assert!(ProcessRunner::validate("git", &args(argv)).is_ok(), "git {argv:?}");
        }
    }

    #[test]
    fn output_redirection_is_denied() {
        for argv in [
            &["log", "--output=clobber.txt"][..],
            &["diff", "--output", "patch.diff"],
        ] {
            let err = ProcessRunner::validate("git", &args(argv)).expect_err("output file");
            assert_eq!(err.code(), ErrorCode::ToolDenied);
        }
        let err = ProcessRunner::validate("find", &args(&[".", "-fprint0", "out.txt"]))
            .expect_err("fprint0");
        assert_eq!(err.code(), ErrorCode::ToolDenied);
        assert!(ProcessRunner::validate("git", &args(&["log", "--oneline", "-5"])).is_ok());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let (text, truncated) = truncate_output("héllo".as_bytes(), 2);
        assert!(truncated);
        assert_eq!(text, "h");
    }

    #[tokio::test]
    async fn runs_whitelisted_command_in_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").expect("write");
        let runner = ProcessRunner::new(dir.path());
        let output = match runner
            .run("wc", &args(&["-l", "a.txt"]), &CancellationToken::new())
            .await
        {
            Ok(output) => output,
            Err(AgentError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                eprintln!("skipping: wc not installed");
                return;
            }
            Err(err) => panic!("wc failed: {err}"),
        };
        assert!(output.success());
        assert!(output.stdout.trim_start().starts_with('3'));
    }

    #[tokio::test]
    async fn cancelled_token_aborts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ProcessRunner::new(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = runner.run("find", &args(&["."]), &cancel).await;
        assert!(matches!(
            result,
            Err(AgentError::Cancelled | AgentError::IoError(_))
        ));
    }
}
