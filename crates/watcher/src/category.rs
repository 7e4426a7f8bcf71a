use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// Routing category of a changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Docs,
    Code,
    Deps,
    Config,
    Git,
    Ignore,
}

impl Category {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Docs => "docs",
            Self::Code => "code",
            Self::Deps => "deps",
            Self::Config => "config",
            Self::Git => "git",
            Self::Ignore => "ignore",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    ".git",
    "dist",
    "build",
    "__pycache__",
    ".next",
    "coverage",
    "out",
];

pub const DEFAULT_HIDDEN_ALLOWLIST: &[&str] = &[".env.example", ".github"];

const DEPENDENCY_MANIFESTS: &[&str] = &[
    "go.mod",
    "go.sum",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.toml",
    "Cargo.lock",
    "requirements.txt",
    "Pipfile",
    "pyproject.toml",
];

const CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml", "toml"];

const CONFIG_FILENAMES: &[&str] = &[
    "Dockerfile",
    "docker-compose.yaml",
    "docker-compose.yml",
    "Makefile",
    "justfile",
    ".env.example",
];

pub const CODE_EXTENSIONS: &[&str] = &[
    "go", "ts", "tsx", "js", "jsx", "py", "rs", "java", "kt", "swift", "c", "cpp", "h", "hpp",
    "cs", "rb", "php", "vue", "svelte",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub ignored_dirs: Vec<String>,
    pub hidden_allowlist: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|s| (*s).to_string()).collect(),
            hidden_allowlist: DEFAULT_HIDDEN_ALLOWLIST
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

/// Pure mapping from a repo-relative path to its [`Category`].
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    #[must_use]
    pub const fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    #[must_use]
    pub fn is_hidden_allowed(&self, name: &str) -> bool {
        self.config.hidden_allowlist.iter().any(|allowed| allowed == name)
    }

    #[must_use]
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.config.ignored_dirs.iter().any(|ignored| ignored == name)
    }

    /// True when a directory segment should not be descended into or watched.
    #[must_use]
    pub fn skips_segment(&self, name: &str) -> bool {
        if self.is_ignored_dir(name) {
            return true;
        }
        name.starts_with('.') && !self.is_hidden_allowed(name)
    }

    pub fn classify(&self, relative: &Path) -> Category {
        let segments: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let Some(file_name) = segments.last() else {
            return Category::Ignore;
        };

        if segments
            .iter()
            .any(|segment| segment.starts_with('.') && !self.is_hidden_allowed(segment))
        {
            return Category::Ignore;
        }

        if segments.iter().any(|segment| self.is_ignored_dir(segment)) {
            return Category::Ignore;
        }

        if DEPENDENCY_MANIFESTS.contains(&file_name.as_str()) {
            return Category::Deps;
        }

        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        let parent_is_docs = segments.len() >= 2 && segments[segments.len() - 2] == "docs";
        if extension.as_deref() == Some("md") || parent_is_docs {
            return Category::Docs;
        }

        if extension
            .as_deref()
            .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext))
            || CONFIG_FILENAMES.contains(&file_name.as_str())
        {
            return Category::Config;
        }

        if extension
            .as_deref()
            .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext))
        {
            return Category::Code;
        }

        Category::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, Classifier};
    use std::path::Path;

    fn classify(path: &str) -> Category {
        Classifier::default().classify(Path::new(path))
    }

    #[test]
    fn hidden_names_are_ignored_except_allowlist() {
        assert_eq!(classify(".env"), Category::Ignore);
        assert_eq!(classify(".cache/data.go"), Category::Ignore);
        assert_eq!(classify(".env.example"), Category::Config);
        assert_eq!(classify(".github/workflows/ci.yml"), Category::Config);
    }

    #[test]
    fn ignored_directories_win_anywhere_in_path() {
        assert_eq!(classify("web/node_modules/react/index.js"), Category::Ignore);
        assert_eq!(classify("vendor/lib/x.go"), Category::Ignore);
        assert_eq!(classify("pkg/__pycache__/m.py"), Category::Ignore);
        assert_eq!(classify("coverage/lcov.md"), Category::Ignore);
    }

    #[test]
    fn manifests_are_deps_before_config() {
        assert_eq!(classify("go.mod"), Category::Deps);
        assert_eq!(classify("Cargo.toml"), Category::Deps);
        assert_eq!(classify("web/pnpm-lock.yaml"), Category::Deps);
        assert_eq!(classify("pyproject.toml"), Category::Deps);
    }

    #[test]
    fn markdown_and_docs_dir_are_docs() {
        assert_eq!(classify("README.md"), Category::Docs);
        assert_eq!(classify("docs/architecture.txt"), Category::Docs);
        assert_eq!(classify("docs/example.go"), Category::Docs);
    }

    #[test]
    fn config_and_code() {
        assert_eq!(classify("deploy/values.yaml"), Category::Config);
        assert_eq!(classify("Dockerfile"), Category::Config);
        assert_eq!(classify("Makefile"), Category::Config);
        assert_eq!(classify("internal/x.go"), Category::Code);
        assert_eq!(classify("web/App.svelte"), Category::Code);
        assert_eq!(classify("assets/logo.png"), Category::Ignore);
        assert_eq!(classify(""), Category::Ignore);
    }
}
