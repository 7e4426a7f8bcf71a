//! The four tools bound to tool-calling agents.

use crate::model::{ToolCall, ToolSchema};
use crate::process::ProcessRunner;
use crate::{AgentError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use taskwing_protocol::{relative_display, resolve_within};
use taskwing_watcher::Classifier;
use tokio_util::sync::CancellationToken;

pub const READ_FILE: &str = "read_file";
pub const GREP_SEARCH: &str = "grep_search";
pub const LIST_DIR: &str = "list_dir";
pub const EXEC_COMMAND: &str = "exec_command";

pub const DEFAULT_MAX_LINES: usize = 500;
pub const MAX_GREP_MATCHES: usize = 50;
pub const DEFAULT_LIST_DEPTH: usize = 2;
pub const MAX_LIST_ITEMS: usize = 150;

const MAX_MATCH_LINE_CHARS: usize = 200;

const DEFAULT_INCLUDES: &[&str] = &[
    "*.go", "*.ts", "*.tsx", "*.js", "*.jsx", "*.py", "*.rs", "*.java", "*.kt", "*.swift", "*.c",
    "*.cpp", "*.h", "*.hpp", "*.cs", "*.rb", "*.php", "*.vue", "*.svelte", "*.md", "*.yaml",
    "*.yml", "*.toml", "*.json",
];

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// Repo-relative file path
    pub path: String,
    /// Maximum number of lines to return (default 500)
    #[serde(default)]
    pub max_lines: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GrepSearchArgs {
    /// Regular expression to search for
    pub pattern: String,
    /// Repo-relative directory or file to search (default: whole repo)
    #[serde(default)]
    pub path: Option<String>,
    /// Comma-separated glob(s) restricting file names, e.g. "*.go,*.md"
    #[serde(default)]
    pub include: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDirArgs {
    /// Repo-relative directory (default: repo root)
    #[serde(default)]
    pub path: Option<String>,
    /// Depth to descend (default 2)
    #[serde(default)]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecCommandArgs {
    /// One of: git, head, tail, wc, find
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AgentTools {
    base: PathBuf,
    classifier: Classifier,
    runner: ProcessRunner,
}

impl AgentTools {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            runner: ProcessRunner::new(base.clone()),
            base,
            classifier: Classifier::default(),
        }
    }

    #[must_use]
    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn schemas() -> Vec<ToolSchema> {
        vec![
            tool_schema::<ReadFileArgs>(
                READ_FILE,
                "Read a repository file with line numbers. Paths are relative to the repo root.",
            ),
            tool_schema::<GrepSearchArgs>(
                GREP_SEARCH,
                "Search repository files for a regular expression (max 50 matches).",
            ),
            tool_schema::<ListDirArgs>(
                LIST_DIR,
                "List a directory tree (max 150 items), skipping vendored and hidden directories.",
            ),
            tool_schema::<ExecCommandArgs>(
                EXEC_COMMAND,
                "Run a read-only command: git, head, tail, wc or find. Output is capped at 10000 bytes.",
            ),
        ]
    }

    /// Dispatches a model tool call by name.
    pub async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> Result<String> {
        let arguments = normalize_arguments(&call.arguments);
        match call.name.as_str() {
            READ_FILE => {
                let args: ReadFileArgs = decode(arguments)?;
                self.read_file(&args.path, args.max_lines)
            }
            GREP_SEARCH => {
                let args: GrepSearchArgs = decode(arguments)?;
                self.grep_search(&args.pattern, args.path.as_deref(), args.include.as_deref())
            }
            LIST_DIR => {
                let args: ListDirArgs = decode(arguments)?;
                self.list_dir(args.path.as_deref(), args.max_depth)
            }
            EXEC_COMMAND => {
                let args: ExecCommandArgs = decode(arguments)?;
                self.exec_command(&args.command, &args.args, cancel).await
            }
            other => Err(AgentError::ToolDenied(format!("unknown tool: {other}"))),
        }
    }

    pub fn read_file(&self, path: &str, max_lines: Option<usize>) -> Result<String> {
        let resolved = resolve_within(&self.base, path)?;
        if !resolved.is_file() {
            return Err(AgentError::FileNotFound(path.to_string()));
        }
        let bytes = std::fs::read(&resolved)?;
        let text = String::from_utf8_lossy(&bytes);
        let limit = max_lines.unwrap_or(DEFAULT_MAX_LINES).max(1);

        let total = text.lines().count();
        let mut out = String::new();
        for (idx, line) in text.lines().take(limit).enumerate() {
            out.push_str(&format!("{:>5}: {line}\n", idx + 1));
        }
        if total > limit {
            out.push_str(&format!(
                "... (truncated: showing {limit} of {total} lines)\n"
            ));
        }
        Ok(out)
    }

    pub fn grep_search(
        &self,
        pattern: &str,
        path: Option<&str>,
        include: Option<&str>,
    ) -> Result<String> {
        let regex = Regex::new(pattern)
            .map_err(|err| AgentError::InvalidArgument(format!("invalid pattern: {err}")))?;
        let start = resolve_within(&self.base, path.unwrap_or_default())?;
        if !start.exists() {
            return Err(AgentError::FileNotFound(path.unwrap_or_default().to_string()));
        }
        let includes = build_includes(include)?;

        let mut matches: Vec<String> = Vec::new();
        let mut truncated = false;
        'files: for file in self.walk(&start) {
            let Some(name) = file.file_name() else {
                continue;
            };
            if !includes.is_match(Path::new(name)) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            let rel = relative_display(&self.base, &file).unwrap_or_default();
            for (idx, line) in content.lines().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                if matches.len() >= MAX_GREP_MATCHES {
                    truncated = true;
                    break 'files;
                }
                let line: String = line.trim().chars().take(MAX_MATCH_LINE_CHARS).collect();
                matches.push(format!("{rel}:{}: {line}", idx + 1));
            }
        }

        if matches.is_empty() {
            return Ok("No matches found".to_string());
        }
        let mut out = matches.join("\n");
        if truncated {
            out.push_str(&format!("\n... (truncated at {MAX_GREP_MATCHES} matches)"));
        }
        Ok(out)
    }

    pub fn list_dir(&self, path: Option<&str>, max_depth: Option<usize>) -> Result<String> {
        let start = resolve_within(&self.base, path.unwrap_or_default())?;
        if !start.is_dir() {
            return Err(AgentError::FileNotFound(path.unwrap_or(".").to_string()));
        }
        let depth = max_depth.unwrap_or(DEFAULT_LIST_DEPTH).max(1);

        let mut lines = Vec::new();
        let truncated = self.list_into(&start, 0, depth, &mut lines);
        let mut out = lines.join("\n");
        if truncated {
            out.push_str(&format!("\n... (truncated at {MAX_LIST_ITEMS} items)"));
        }
        Ok(out)
    }

    pub async fn exec_command(
        &self,
        command: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let output = self.runner.run(command, args, cancel).await?;
        let mut text = output.combined();
        if !output.success() {
            text.push_str(&format!(
                "\n(exit status {})",
                output
                    .status
                    .map_or_else(|| "unknown".to_string(), |code| code.to_string())
            ));
        }
        Ok(text)
    }

    /// Returns `true` when the item cap was hit.
    fn list_into(&self, dir: &Path, level: usize, max_depth: usize, out: &mut Vec<String>) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        let mut entries: Vec<(String, bool, PathBuf)> = entries
            .flatten()
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().is_ok_and(|ft| ft.is_dir());
                (name, is_dir, entry.path())
            })
            .filter(|(name, _, _)| !self.classifier.skips_segment(name))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (name, is_dir, path) in entries {
            if out.len() >= MAX_LIST_ITEMS {
                return true;
            }
            let indent = "  ".repeat(level);
            if is_dir {
                out.push(format!("{indent}{name}/"));
                if level + 1 < max_depth && self.list_into(&path, level + 1, max_depth, out) {
                    return true;
                }
            } else {
                out.push(format!("{indent}{name}"));
            }
        }
        false
    }

    fn walk(&self, start: &Path) -> Vec<PathBuf> {
        if start.is_file() {
            return vec![start.to_path_buf()];
        }
        let classifier = self.classifier.clone();
        let mut builder = WalkBuilder::new(start);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .sort_by_file_name(|a, b| a.cmp(b));
        builder.filter_entry(move |entry| {
            entry.depth() == 0 || !classifier.skips_segment(&entry.file_name().to_string_lossy())
        });
        builder
            .build()
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(ignore::DirEntry::into_path)
            .collect()
    }
}

fn build_includes(include: Option<&str>) -> Result<GlobSet> {
    let patterns: Vec<String> = match include.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => DEFAULT_INCLUDES.iter().map(|s| (*s).to_string()).collect(),
    };
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(&pattern)
            .map_err(|err| AgentError::InvalidArgument(format!("invalid include glob: {err}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|err| AgentError::InvalidArgument(format!("invalid include globs: {err}")))
}

/// Some models send arguments as a JSON-encoded string rather than an object.
fn normalize_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    }
}

fn decode<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|err| AgentError::InvalidArgument(format!("invalid tool arguments: {err}")))
}

fn tool_schema<T: JsonSchema>(name: &str, description: &str) -> ToolSchema {
    let schema = schemars::schema_for!(T);
    ToolSchema {
        name: name.to_string(),
        description: description.to_string(),
        parameters: serde_json::to_value(&schema).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskwing_protocol::{ErrorCode, HasErrorCode};

    fn fixture() -> (tempfile::TempDir, AgentTools) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("internal/api")).expect("mkdir");
        std::fs::create_dir_all(root.join("node_modules/lib")).expect("mkdir");
        std::fs::create_dir_all(root.join(".cache")).expect("mkdir");
        std::fs::write(
            root.join("internal/api/handler.go"),
            "package api\n\nfunc Login() {}\nfunc Logout() {}\n",
        )
        .expect("write");
        std::fs::write(root.join("node_modules/lib/index.js"), "function Login() {}").expect("write");
        std::fs::write(root.join("README.md"), "# Demo\nLogin flow\n").expect("write");
        let tools = AgentTools::new(root);
        (dir, tools)
    }

    #[test]
    fn read_file_rejects_traversal_and_absolute() {
        let (_dir, tools) = fixture();
        for path in ["../etc/passwd", "/etc/passwd", "internal/../../x"] {
            let err = tools.read_file(path, None).expect_err("must reject");
            assert_eq!(err.code(), ErrorCode::PathTraversal, "{path}");
        }
    }

    #[test]
    fn read_file_truncates_with_annotation() {
        let (_dir, tools) = fixture();
        let out = tools
            .read_file("internal/api/handler.go", Some(2))
            .expect("read");
        assert!(out.contains("    1: package api"));
        assert!(out.contains("(truncated: showing 2 of 4 lines)"));
        let missing = tools.read_file("nope.go", None).expect_err("missing");
        assert_eq!(missing.code(), ErrorCode::FileNotFound);
    }

    #[test]
    fn grep_skips_ignored_dirs_and_relativizes() {
        let (_dir, tools) = fixture();
        let out = tools.grep_search("Login", None, None).expect("grep");
        assert!(out.contains("internal/api/handler.go:3: func Login() {}"));
        assert!(out.contains("README.md:2: Login flow"));
        assert!(!out.contains("node_modules"));

        let go_only = tools.grep_search("Login", None, Some("*.go")).expect("grep");
        assert!(!go_only.contains("README.md"));
        assert_eq!(
            tools.grep_search("Nowhere", None, None).expect("grep"),
            "No matches found"
        );
    }

    #[test]
    fn grep_caps_matches() {
        let (dir, tools) = fixture();
        let body: Vec<String> = (0..80).map(|i| format!("needle {i}")).collect();
        std::fs::write(dir.path().join("many.md"), body.join("\n")).expect("write");
        let out = tools.grep_search("needle", None, None).expect("grep");
        assert_eq!(out.lines().filter(|l| l.starts_with("many.md:")).count(), 50);
        assert!(out.ends_with("(truncated at 50 matches)"));
    }

    #[test]
    fn list_dir_hides_ignored_entries() {
        let (_dir, tools) = fixture();
        let out = tools.list_dir(None, None).expect("list");
        assert!(out.contains("internal/"));
        assert!(out.contains("  api/"));
        assert!(!out.contains("handler.go"), "depth 2 stops at internal/api");
        assert!(!out.contains("node_modules"));
        assert!(!out.contains(".cache"));
        assert!(out.contains("README.md"));
    }

    #[tokio::test]
    async fn exec_command_enforces_whitelist() {
        let (_dir, tools) = fixture();
        let call = ToolCall::new("1", EXEC_COMMAND, json!({"command": "rm", "args": ["-rf", "."]}));
        let err = tools
            .execute(&call, &CancellationToken::new())
            .await
            .expect_err("denied");
        assert_eq!(err.code(), ErrorCode::CommandNotAllowed);
    }

    #[tokio::test]
    async fn execute_accepts_string_encoded_arguments() {
        let (_dir, tools) = fixture();
        let call = ToolCall::new(
            "1",
            READ_FILE,
            Value::String(r#"{"path":"README.md"}"#.to_string()),
        );
        let out = tools
            .execute(&call, &CancellationToken::new())
            .await
            .expect("read");
        assert!(out.contains("# Demo"));
    }

    #[test]
    fn schemas_cover_all_tools() {
        let names: Vec<String> = AgentTools::schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec![READ_FILE, GREP_SEARCH, LIST_DIR, EXEC_COMMAND]);
    }
}
