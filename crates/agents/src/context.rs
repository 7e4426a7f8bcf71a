//! Bounded, labeled file excerpts used as prompt input, plus the internal import graph.

use crate::process::ProcessRunner;
use ignore::WalkBuilder;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use taskwing_protocol::{relative_display, resolve_within};
use taskwing_watcher::{Category, Classifier};
use tokio_util::sync::CancellationToken;

pub const ROOT_MARKDOWN_CAP: usize = 4_000;
pub const DOCS_MARKDOWN_CAP: usize = 3_000;
pub const PRIMARY_MANIFEST_CAP: usize = 3_000;
pub const SECONDARY_MANIFEST_CAP: usize = 2_000;
pub const ENTRY_POINT_LINES: usize = 80;
pub const DISCOVERED_FILE_CAP: usize = 1_500;

const MAX_DOCS_FILES: usize = 12;
const MAX_ENTRY_POINTS: usize = 6;
const MAX_DISCOVERED_FILES: usize = 20;
const GIT_LOG_LIMIT: &str = "-30";

const PRIMARY_MANIFESTS: &[&str] = &[
    "go.mod",
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "Pipfile",
];

const SECONDARY_MANIFESTS: &[&str] = &[
    "Dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    "Makefile",
    "justfile",
    "tsconfig.json",
];

const ENTRY_POINT_CANDIDATES: &[&str] = &[
    "main.go",
    "cmd/main.go",
    "src/main.rs",
    "src/lib.rs",
    "index.ts",
    "index.js",
    "src/index.ts",
    "src/index.js",
    "src/main.ts",
    "main.py",
    "app.py",
    "manage.py",
];

const IMPORT_ROOTS: &[&str] = &["internal", "pkg", "cmd"];

static GO_MODULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^module\s+(\S+)").expect("static regex"));
static GO_SINGLE_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^import\s+(?:[\w.]+\s+)?"([^"]+)""#).expect("static regex"));
static GO_IMPORT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)import\s*\((.*?)\)").expect("static regex"));
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("static regex"));

/// Package directory → internal packages it imports (both relative to the module root).
pub type ImportGraph = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone)]
pub struct ContextGatherer {
    base: PathBuf,
    classifier: Classifier,
}

impl ContextGatherer {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            classifier: Classifier::default(),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Root markdown files (README first), then markdown under `docs/`.
    #[must_use]
    pub fn gather_markdown(&self) -> String {
        let mut out = String::new();

        let mut root_docs: Vec<String> = read_dir_names(&self.base)
            .into_iter()
            .filter(|name| name.to_ascii_lowercase().ends_with(".md"))
            .collect();
        root_docs.sort_by_key(|name| (!name.eq_ignore_ascii_case("README.md"), name.clone()));
        for name in root_docs {
            self.append_excerpt(&mut out, &name, ROOT_MARKDOWN_CAP);
        }

        let docs_dir = self.base.join("docs");
        if docs_dir.is_dir() {
            for rel in self
                .walk_files(&docs_dir)
                .into_iter()
                .filter(|rel| rel.to_ascii_lowercase().ends_with(".md"))
                .take(MAX_DOCS_FILES)
            {
                self.append_excerpt(&mut out, &rel, DOCS_MARKDOWN_CAP);
            }
        }
        out
    }

    /// Dependency and build manifests present at the root.
    #[must_use]
    pub fn gather_manifests(&self) -> String {
        let mut out = String::new();
        for name in PRIMARY_MANIFESTS {
            self.append_excerpt(&mut out, name, PRIMARY_MANIFEST_CAP);
        }
        for name in SECONDARY_MANIFESTS {
            self.append_excerpt(&mut out, name, SECONDARY_MANIFEST_CAP);
        }
        out
    }

    /// First lines of well-known entry points, including `cmd/*/main.go`.
    #[must_use]
    pub fn gather_entry_points(&self) -> String {
        let mut candidates: Vec<String> = ENTRY_POINT_CANDIDATES
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let cmd_dir = self.base.join("cmd");
        if cmd_dir.is_dir() {
            let mut subdirs = read_dir_names(&cmd_dir);
            subdirs.sort();
            candidates.extend(subdirs.into_iter().map(|name| format!("cmd/{name}/main.go")));
        }

        let mut out = String::new();
        let mut taken = 0;
        for rel in candidates {
            if taken >= MAX_ENTRY_POINTS {
                break;
            }
            let path = self.base.join(&rel);
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let head: Vec<&str> = content.lines().take(ENTRY_POINT_LINES).collect();
            let mut excerpt = head.join("\n");
            if content.lines().count() > ENTRY_POINT_LINES {
                excerpt.push_str(&format!("\n... (first {ENTRY_POINT_LINES} lines)"));
            }
            push_labeled(&mut out, &rel, &excerpt);
            taken += 1;
        }
        out
    }

    /// Excerpts of explicit repo-relative paths; unsafe or missing paths are skipped.
    #[must_use]
    pub fn gather_files(&self, paths: &[String]) -> String {
        let mut out = String::new();
        for raw in paths {
            let Ok(path) = resolve_within(&self.base, raw) else {
                debug!("skipping unsafe context path {raw}");
                continue;
            };
            let Some(rel) = relative_display(&self.base, &path) else {
                continue;
            };
            self.append_excerpt(&mut out, &rel, DISCOVERED_FILE_CAP);
        }
        out
    }

    /// Code files under the base in walk order, skipping ignored and hidden directories.
    #[must_use]
    pub fn discover_source_files(&self, limit: usize) -> Vec<String> {
        self.walk_files(&self.base)
            .into_iter()
            .filter(|rel| self.classifier.classify(Path::new(rel)) == Category::Code)
            .take(limit)
            .collect()
    }

    /// Prompt context for code analysis: the changed files in watch mode, otherwise entry
    /// points, a sample of discovered sources and the internal import graph.
    #[must_use]
    pub fn gather_code_context(&self, changed: &[String]) -> String {
        if !changed.is_empty() {
            return self.gather_files(changed);
        }

        let mut out = self.gather_entry_points();
        let discovered = self.discover_source_files(MAX_DISCOVERED_FILES);
        out.push_str(&self.gather_files(&discovered));
        let graph = self.import_graph();
        if !graph.is_empty() {
            push_labeled(&mut out, "import graph", &render_import_graph(&graph));
        }
        out
    }

    /// Recent history and authorship, via the whitelisted runner. Empty when git is missing.
    pub async fn git_summary(&self, runner: &ProcessRunner, cancel: &CancellationToken) -> String {
        let mut out = String::new();
        let log_args = ["log", "--oneline", "--no-decorate", GIT_LOG_LIMIT].map(String::from);
        match runner.run("git", &log_args, cancel).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                push_labeled(&mut out, "git log", output.stdout.trim_end());
            }
            Ok(_) => return out,
            Err(err) => {
                debug!("git summary unavailable: {err}");
                return out;
            }
        }
        let shortlog_args = ["shortlog", "-sn", "--no-merges", "HEAD"].map(String::from);
        if let Ok(output) = runner.run("git", &shortlog_args, cancel).await {
            if output.success() && !output.stdout.trim().is_empty() {
                push_labeled(&mut out, "git contributors", output.stdout.trim_end());
            }
        }
        out
    }

    /// Edges between packages under `internal/`, `pkg/` and `cmd/` whose import path starts
    /// with the module prefix declared in `go.mod`. Test files are excluded.
    #[must_use]
    pub fn import_graph(&self) -> ImportGraph {
        let mut graph = ImportGraph::new();
        let Ok(go_mod) = std::fs::read_to_string(self.base.join("go.mod")) else {
            return graph;
        };
        let Some(module) = GO_MODULE
            .captures(&go_mod)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
        else {
            return graph;
        };
        let prefix = format!("{module}/");

        for root in IMPORT_ROOTS {
            let dir = self.base.join(root);
            if !dir.is_dir() {
                continue;
            }
            for rel in self.walk_files(&dir) {
                if !rel.ends_with(".go") || rel.ends_with("_test.go") {
                    continue;
                }
                let Ok(source) = std::fs::read_to_string(self.base.join(&rel)) else {
                    continue;
                };
                let package = rel
                    .rsplit_once('/')
                    .map_or_else(|| rel.clone(), |(dir, _)| dir.to_string());
                for import in parse_go_imports(&source) {
                    let Some(target) = import.strip_prefix(&prefix) else {
                        continue;
                    };
                    if target != package {
                        graph
                            .entry(package.clone())
                            .or_default()
                            .insert(target.to_string());
                    }
                }
            }
        }
        graph
    }

    fn append_excerpt(&self, out: &mut String, rel: &str, cap: usize) {
        let path = self.base.join(rel);
        let Ok(bytes) = std::fs::read(&path) else {
            return;
        };
        let text = String::from_utf8_lossy(&bytes);
        push_labeled(out, rel, &truncate_bytes(&text, cap));
    }

    fn walk_files(&self, start: &Path) -> Vec<String> {
        let classifier = self.classifier.clone();
        let mut builder = WalkBuilder::new(start);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .sort_by_file_name(|a, b| a.cmp(b));
        builder.filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !classifier.skips_segment(&name)
        });

        let mut out = Vec::new();
        for entry in builder.build().flatten() {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            if let Some(rel) = relative_display(&self.base, entry.path()) {
                out.push(rel);
            }
        }
        out
    }
}

/// Import paths from single-line and parenthesized Go import declarations.
#[must_use]
pub fn parse_go_imports(source: &str) -> Vec<String> {
    let mut out: Vec<String> = GO_SINGLE_IMPORT
        .captures_iter(source)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect();
    for block in GO_IMPORT_BLOCK.captures_iter(source) {
        let Some(body) = block.get(1) else {
            continue;
        };
        for line in body.as_str().lines() {
            let line = line.split("//").next().unwrap_or_default();
            if let Some(path) = QUOTED.captures(line).and_then(|caps| caps.get(1)) {
                out.push(path.as_str().to_string());
            }
        }
    }
    out
}

#[must_use]
pub fn render_import_graph(graph: &ImportGraph) -> String {
    graph
        .iter()
        .map(|(from, targets)| {
            let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
            format!("{from} -> {}", targets.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cuts `text` to at most `cap` bytes on a char boundary, marking the cut.
#[must_use]
pub fn truncate_bytes(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated)", &text[..end])
}

fn push_labeled(out: &mut String, label: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    out.push_str("=== ");
    out.push_str(label);
    out.push_str(" ===\n");
    out.push_str(body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
}

fn read_dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_file() || ft.is_dir()))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect()
}
