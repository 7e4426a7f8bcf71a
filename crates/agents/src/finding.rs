//! Findings, their evidence, and verification outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use taskwing_protocol::normalize_relative;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    Feature,
    Decision,
    Dependency,
    Pattern,
    Risk,
    Todo,
    Constraint,
    Refinement,
    Plan,
}

impl FindingType {
    pub const ALL: [Self; 9] = [
        Self::Feature,
        Self::Decision,
        Self::Dependency,
        Self::Pattern,
        Self::Risk,
        Self::Todo,
        Self::Constraint,
        Self::Refinement,
        Self::Plan,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Decision => "decision",
            Self::Dependency => "dependency",
            Self::Pattern => "pattern",
            Self::Risk => "risk",
            Self::Todo => "todo",
            Self::Constraint => "constraint",
            Self::Refinement => "refinement",
            Self::Plan => "plan",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let needle = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == needle)
    }
}

impl std::fmt::Display for FindingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Canonical score assigned when only a label is known.
    #[must_use]
    pub const fn score(self) -> f64 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.7,
            Self::Low => 0.4,
        }
    }

    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" | "med" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    #[default]
    Code,
    Doc,
    Git,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub grep_pattern: String,
    #[serde(default)]
    pub evidence_type: EvidenceType,
}

impl Evidence {
    pub fn new(file_path: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            snippet: snippet.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_lines(mut self, start_line: u32, end_line: u32) -> Self {
        self.start_line = start_line;
        self.end_line = end_line;
        self.normalized()
    }

    #[must_use]
    pub fn with_grep_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.grep_pattern = pattern.into();
        self
    }

    #[must_use]
    pub fn with_type(mut self, evidence_type: EvidenceType) -> Self {
        self.evidence_type = evidence_type;
        self
    }

    /// Located evidence never ends before it starts.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.start_line > 0 && self.end_line < self.start_line {
            self.end_line = self.start_line;
        }
        self
    }

    /// Git evidence is either typed as such or points into a `.git` directory.
    #[must_use]
    pub fn is_git(&self) -> bool {
        let path = self.file_path.replace('\\', "/");
        self.evidence_type == EvidenceType::Git
            || path == ".git"
            || path.starts_with(".git/")
            || path.contains("/.git/")
            || path.ends_with("/.git")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Partial,
    Rejected,
    Skipped,
}

impl VerificationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Partial => "partial",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }

    /// Ordering used when two verifications of the same finding are merged.
    #[must_use]
    pub const fn strength(self) -> u8 {
        match self {
            Self::Verified => 4,
            Self::Partial => 3,
            Self::Skipped => 2,
            Self::Pending => 1,
            Self::Rejected => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvidenceCheckResult {
    pub file_exists: bool,
    pub snippet_found: bool,
    pub line_numbers_match: bool,
    pub similarity_score: f64,
    #[serde(default)]
    pub actual_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub confidence_delta: f64,
    pub evidence_results: Vec<EvidenceCheckResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tradeoffs: Option<String>,
    pub confidence: Confidence,
    pub confidence_score: f64,
    pub source_agent: String,
    #[serde(default)]
    pub source_files: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub verification_status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_result: Option<VerificationResult>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Finding {
    /// Builds a medium-confidence, unverified finding.
    pub fn new(
        finding_type: FindingType,
        title: impl Into<String>,
        description: impl Into<String>,
        source_agent: impl Into<String>,
    ) -> Self {
        Self {
            finding_type,
            title: title.into().trim().to_string(),
            description: description.into(),
            why: None,
            tradeoffs: None,
            confidence: Confidence::Medium,
            confidence_score: Confidence::Medium.score(),
            source_agent: source_agent.into(),
            source_files: Vec::new(),
            evidence: Vec::new(),
            verification_status: VerificationStatus::Pending,
            verification_result: None,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self.confidence_score = confidence.score();
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.set_score(score);
        self
    }

    /// Adds a repo-relative source file; absolute or escaping paths are dropped.
    #[must_use]
    pub fn with_source_file(mut self, path: &str) -> Self {
        self.push_source_file(path);
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence.normalized());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Clamps to `[0, 1]`, rounds to three decimals and re-derives the label.
    pub fn set_score(&mut self, score: f64) {
        let score = if score.is_finite() { score } else { 0.0 };
        self.confidence_score = (score.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;
        self.confidence = Confidence::from_score(self.confidence_score);
    }

    pub fn push_source_file(&mut self, path: &str) -> bool {
        let Ok(relative) = normalize_relative(path) else {
            return false;
        };
        let display = relative.to_string_lossy().replace('\\', "/");
        if display.is_empty() || self.source_files.contains(&display) {
            return false;
        }
        self.source_files.push(display);
        true
    }

    /// Rejects findings that break the data-model invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("finding title must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(format!(
                "confidence_score {} is outside [0, 1]",
                self.confidence_score
            ));
        }
        for path in &self.source_files {
            match normalize_relative(path) {
                Ok(normalized) if normalized.to_string_lossy().replace('\\', "/") == *path => {}
                _ => return Err(format!("source file is not repo-relative: {path}")),
            }
        }
        Ok(())
    }

    /// Deduplication key: normalized title joined with the producing agent.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        format!("{}|{}", normalize_title(&self.title), self.source_agent.trim())
    }
}

/// Lower-cases, strips punctuation and collapses whitespace.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn label_and_score_stay_consistent() {
        for label in [Confidence::High, Confidence::Medium, Confidence::Low] {
            assert_eq!(Confidence::from_score(label.score()), label);
        }
        let mut finding = Finding::new(FindingType::Feature, "Auth", "", "doc");
        finding.set_score(1.7);
        assert_eq!(finding.confidence_score, 1.0);
        assert_eq!(finding.confidence, Confidence::High);
        finding.set_score(-3.0);
        assert_eq!(finding.confidence, Confidence::Low);
    }

    #[test]
    fn source_files_must_be_relative() {
        let finding = Finding::new(FindingType::Risk, "r", "", "code")
            .with_source_file("/etc/passwd")
            .with_source_file("../outside.go")
            .with_source_file("./internal/x.go")
            .with_source_file("internal/x.go");
        assert_eq!(finding.source_files, vec!["internal/x.go".to_string()]);
        assert!(finding.validate().is_ok());
    }

    #[test]
    fn empty_title_is_invalid() {
        let finding = Finding::new(FindingType::Todo, "   ", "", "code");
        assert!(finding.validate().is_err());
    }

    #[test]
    fn evidence_end_line_is_normalized() {
        let evidence = Evidence::new("a.go", "x").with_lines(10, 0);
        assert_eq!(evidence.end_line, 10);
        let unlocated = Evidence::new("a.go", "x").with_lines(0, 0);
        assert_eq!(unlocated.end_line, 0);
    }

    #[test]
    fn git_evidence_detection() {
        assert!(Evidence::new(".git", "abc").is_git());
        assert!(Evidence::new("svc/.git/", "abc").is_git());
        assert!(Evidence::new("x.go", "").with_type(EvidenceType::Git).is_git());
        assert!(!Evidence::new("gitignore.md", "").is_git());
    }

    #[test]
    fn canonical_key_ignores_case_and_punctuation() {
        let a = Finding::new(FindingType::Feature, "Auth: JWT", "", "doc");
        let b = Finding::new(FindingType::Feature, "auth   jwt!", "", "doc");
        let c = Finding::new(FindingType::Feature, "Auth: JWT", "", "code");
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_ne!(a.canonical_key(), c.canonical_key());
    }

    #[test]
    fn finding_serializes_type_field() {
        let finding = Finding::new(FindingType::Dependency, "tokio", "", "deps");
        let value = serde_json::to_value(&finding).expect("serialize");
        assert_eq!(value["type"], "dependency");
        assert_eq!(value["verification_status"], "pending");
        assert_eq!(value["confidence"], "medium");
    }
}
