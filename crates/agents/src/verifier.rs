//! Deterministic evidence re-check against the working copy and git history.
//!
//! No model is involved: each evidence locator is re-read, compared with whitespace-normalized
//! matching and token similarity, and the finding's confidence is nudged by the aggregate.

use crate::finding::{
    Evidence, EvidenceCheckResult, Finding, VerificationResult, VerificationStatus,
};
use crate::process::ProcessRunner;
use crate::AgentError;
use log::debug;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use taskwing_protocol::{normalize_relative, resolve_within};
use tokio_util::sync::CancellationToken;

pub const VERIFIED_DELTA: f64 = 0.1;
pub const PARTIAL_STRICT_DELTA: f64 = 0.0;
pub const PARTIAL_DELTA: f64 = -0.1;
pub const REJECTED_DELTA: f64 = -0.3;

pub const GREP_FALLBACK_SIMILARITY: f64 = 0.6;
pub const GIT_EXACT_SIMILARITY: f64 = 1.0;
pub const GIT_HASH_SIMILARITY: f64 = 0.9;
pub const GIT_WORDS_SIMILARITY: f64 = 0.7;
pub const PARTIAL_THRESHOLD: f64 = 0.5;

const SNIPPET_ELSEWHERE_SIMILARITY: f64 = 0.8;
const ACTUAL_CONTENT_CAP: usize = 500;
const MIN_HASH_PREFIX: usize = 7;

#[derive(Debug, Clone)]
pub struct Verifier {
    base: PathBuf,
    runner: ProcessRunner,
}

impl Verifier {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            runner: ProcessRunner::new(base.clone()),
            base,
        }
    }

    #[must_use]
    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    pub async fn verify_findings(
        &self,
        findings: Vec<Finding>,
        cancel: &CancellationToken,
    ) -> Vec<Finding> {
        let mut out = Vec::with_capacity(findings.len());
        for finding in findings {
            out.push(self.verify_finding(finding, cancel).await);
        }
        out
    }

    /// Checks every evidence of `finding`, records the result and adjusts its confidence.
    pub async fn verify_finding(&self, mut finding: Finding, cancel: &CancellationToken) -> Finding {
        let mut results = Vec::with_capacity(finding.evidence.len());
        for evidence in &finding.evidence {
            results.push(self.check_evidence(evidence, cancel).await);
        }
        let (status, delta) = aggregate(&finding.evidence, &results);
        debug!(
            "verified '{}' from {}: {} ({delta:+.1})",
            finding.title,
            finding.source_agent,
            status.as_str()
        );

        if status != VerificationStatus::Skipped {
            let score = finding.confidence_score + delta;
            finding.set_score(score);
        }
        finding.verification_status = status;
        finding.verification_result = Some(VerificationResult {
            status,
            confidence_delta: delta,
            evidence_results: results,
        });
        finding
    }

    pub async fn check_evidence(
        &self,
        evidence: &Evidence,
        cancel: &CancellationToken,
    ) -> EvidenceCheckResult {
        if evidence.is_git() {
            self.check_git_evidence(evidence, cancel).await
        } else {
            self.check_file_evidence(evidence).await
        }
    }

    pub async fn check_file_evidence(&self, evidence: &Evidence) -> EvidenceCheckResult {
        let mut result = EvidenceCheckResult::default();
        let path = match resolve_within(&self.base, &evidence.file_path) {
            Ok(path) => path,
            Err(err) => {
                result.error_message = Some(err.to_string());
                return result;
            }
        };
        let is_file = tokio::fs::metadata(&path)
            .await
            .is_ok_and(|meta| meta.is_file());
        if !is_file {
            result.error_message = Some(format!("file not found: {}", evidence.file_path));
            return result;
        }
        result.file_exists = true;

        if evidence.snippet.trim().is_empty() {
            result.snippet_found = true;
            result.line_numbers_match = true;
            result.similarity_score = 1.0;
            return result;
        }

        let content = match tokio::fs::read(&path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                result.error_message = Some(err.to_string());
                return result;
            }
        };
        let normalized_content = normalize_whitespace(&content);
        let normalized_snippet = normalize_whitespace(&evidence.snippet);

        result.snippet_found = normalized_content.contains(&normalized_snippet);
        if result.snippet_found {
            result.similarity_score = 1.0;
        }

        if evidence.start_line > 0 {
            let excerpt = extract_lines(&content, evidence.start_line, evidence.end_line);
            result.actual_content = truncate_chars(&excerpt, ACTUAL_CONTENT_CAP);
            let normalized_range = normalize_whitespace(&excerpt);
            if !normalized_range.is_empty()
                && (normalized_range == normalized_snippet
                    || normalized_range.contains(&normalized_snippet))
            {
                result.line_numbers_match = true;
                result.similarity_score = 1.0;
            } else {
                let similarity = jaccard_similarity(&normalized_range, &normalized_snippet);
                result.similarity_score = if result.snippet_found {
                    similarity.max(SNIPPET_ELSEWHERE_SIMILARITY)
                } else {
                    similarity
                };
            }
        }

        if !result.snippet_found && !result.line_numbers_match {
            let pattern = evidence.grep_pattern.trim();
            if !pattern.is_empty() && content.contains(pattern) {
                result.similarity_score = result.similarity_score.max(GREP_FALLBACK_SIMILARITY);
            } else {
                let whole_file = best_window_similarity(&content, &evidence.snippet);
                result.similarity_score = result.similarity_score.max(whole_file);
            }
        }
        result
    }

    pub async fn check_git_evidence(
        &self,
        evidence: &Evidence,
        cancel: &CancellationToken,
    ) -> EvidenceCheckResult {
        let mut result = EvidenceCheckResult::default();
        let git_root = match self.git_root_for(&evidence.file_path) {
            Ok(root) => root,
            Err(err) => {
                result.error_message = Some(err.to_string());
                return result;
            }
        };

        let args = ["log", "--all", "--oneline", "-500"].map(String::from);
        let log = match self.runner.run_in(&git_root, "git", &args, cancel).await {
            Ok(output) if output.success() => output.stdout,
            Ok(output) => {
                result.error_message = Some(format!("git log failed: {}", output.stderr.trim()));
                return result;
            }
            Err(err) => {
                result.error_message = Some(err.to_string());
                return result;
            }
        };
        result.file_exists = true;
        result.line_numbers_match = true;

        let snippet = evidence.snippet.trim();
        if snippet.is_empty() {
            result.snippet_found = true;
            result.similarity_score = 1.0;
            return result;
        }

        match match_git_log(&log, snippet) {
            Some(hit) => {
                result.snippet_found = hit.found;
                result.similarity_score = hit.similarity;
                result.actual_content = hit.line;
            }
            None => {
                result.error_message = Some("snippet not found in git history".to_string());
            }
        }
        result
    }

    /// `.git…` evidence uses the base; `<svc>/.git/…` uses `<svc>` inside the base.
    fn git_root_for(&self, file_path: &str) -> Result<PathBuf, AgentError> {
        let path = file_path.replace('\\', "/");
        let Some(idx) = path.find(".git") else {
            return Ok(self.base.clone());
        };
        let prefix = path[..idx].trim_end_matches('/');
        if prefix.is_empty() {
            return Ok(self.base.clone());
        }
        normalize_relative(prefix)?;
        let root = resolve_within(&self.base, prefix)?;
        if root.is_dir() {
            Ok(root)
        } else {
            Err(AgentError::FileNotFound(prefix.to_string()))
        }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GitLogHit {
    found: bool,
    similarity: f64,
    line: String,
}

/// Matches a snippet against `git log --oneline` output: exact text, then every word
/// (case-insensitive), then a commit hash prefix.
fn match_git_log(log: &str, snippet: &str) -> Option<GitLogHit> {
    if log.contains(snippet) {
        return Some(GitLogHit {
            found: true,
            similarity: GIT_EXACT_SIMILARITY,
            line: matching_line(log, |line| line.contains(snippet)),
        });
    }

    let words: Vec<String> = snippet.split_whitespace().map(str::to_lowercase).collect();
    if !words.is_empty() {
        let lowered_log = log.to_lowercase();
        if words.iter().all(|word| lowered_log.contains(word.as_str())) {
            let first = words[0].as_str();
            return Some(GitLogHit {
                found: false,
                similarity: GIT_WORDS_SIMILARITY,
                line: matching_line(log, |line| line.to_lowercase().contains(first)),
            });
        }
    }

    if is_hex_prefix(snippet) {
        let lowered = snippet.to_ascii_lowercase();
        if let Some(line) = log.lines().find(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|hash| hash.starts_with(&lowered) || lowered.starts_with(hash))
        }) {
            return Some(GitLogHit {
                found: true,
                similarity: GIT_HASH_SIMILARITY,
                line: truncate_chars(line, ACTUAL_CONTENT_CAP),
            });
        }
    }
    None
}

/// Folds per-evidence results into a status and confidence delta.
///
/// Strict: file exists, snippet found, and lines match (or the evidence is unlocated).
/// Partial: file exists and similarity above 0.5.
#[must_use]
pub fn aggregate(evidence: &[Evidence], results: &[EvidenceCheckResult]) -> (VerificationStatus, f64) {
    if results.is_empty() {
        return (VerificationStatus::Skipped, 0.0);
    }
    let strict: Vec<bool> = evidence
        .iter()
        .zip(results)
        .map(|(ev, res)| {
            res.file_exists && res.snippet_found && (res.line_numbers_match || ev.start_line == 0)
        })
        .collect();
    let partial: Vec<bool> = results
        .iter()
        .zip(&strict)
        .map(|(res, strict)| *strict || (res.file_exists && res.similarity_score > PARTIAL_THRESHOLD))
        .collect();

    if strict.iter().all(|s| *s) {
        return (VerificationStatus::Verified, VERIFIED_DELTA);
    }
    if partial.iter().all(|p| *p) {
        let delta = if strict.iter().any(|s| *s) {
            PARTIAL_STRICT_DELTA
        } else {
            PARTIAL_DELTA
        };
        return (VerificationStatus::Partial, delta);
    }
    if partial.iter().any(|p| *p) {
        return (VerificationStatus::Partial, PARTIAL_DELTA);
    }
    (VerificationStatus::Rejected, REJECTED_DELTA)
}

/// Trims every line, collapses internal whitespace runs and drops blank lines.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Token-set Jaccard similarity over lower-cased alphanumeric tokens.
#[must_use]
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Lines `start..=end` (1-based); an `end` before `start` means the single line `start`.
fn extract_lines(content: &str, start: u32, end: u32) -> String {
    let start = start as usize;
    let end = (end as usize).max(start);
    content
        .lines()
        .skip(start.saturating_sub(1))
        .take(end - start + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Best Jaccard score between the snippet and any same-height window of the file.
fn best_window_similarity(content: &str, snippet: &str) -> f64 {
    let lines: Vec<&str> = content.lines().collect();
    let height = snippet.lines().filter(|l| !l.trim().is_empty()).count().max(1);
    if lines.is_empty() {
        return 0.0;
    }
    let mut best: f64 = 0.0;
    for window in lines.windows(height.min(lines.len())) {
        best = best.max(jaccard_similarity(&window.join("\n"), snippet));
        if best >= 1.0 {
            break;
        }
    }
    best
}

fn is_hex_prefix(snippet: &str) -> bool {
    snippet.len() >= MIN_HASH_PREFIX && snippet.chars().all(|c| c.is_ascii_hexdigit())
}

fn matching_line(log: &str, pred: impl Fn(&str) -> bool) -> String {
    log.lines()
        .find(|line| pred(line))
        .map(|line| truncate_chars(line, ACTUAL_CONTENT_CAP))
        .unwrap_or_default()
}

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    text.chars().take(cap).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Confidence, EvidenceType, FindingType};
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "package x\n\nimport \"fmt\"\n\nfunc Hello() {\n\tfmt.Println(\"hi\")\n}\n\nfunc Bye() {\n\treturn\n}\n// tail\n";

    fn fixture() -> (tempfile::TempDir, Verifier) {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("internal")).expect("mkdir");
        std::fs::write(dir.path().join("internal/x.go"), SOURCE).expect("write");
        std::fs::write(dir.path().join("README.md"), "v1\n## Auth: JWT\n").expect("write");
        let verifier = Verifier::new(dir.path());
        (dir, verifier)
    }

    fn finding_with(evidence: Vec<Evidence>) -> Finding {
        let mut finding = Finding::new(FindingType::Pattern, "Hello", "", "code");
        finding.evidence = evidence;
        finding
    }

    #[tokio::test]
    async fn exact_lines_verify_and_raise_confidence() {
        let (_dir, verifier) = fixture();
        let finding = finding_with(vec![Evidence::new("internal/x.go", "func Hello() {\n  fmt.Println(\"hi\")")
            .with_lines(5, 6)]);
        let before = finding.confidence_score;
        let verified = verifier
            .verify_finding(finding, &CancellationToken::new())
            .await;
        assert_eq!(verified.verification_status, VerificationStatus::Verified);
        assert!(verified.confidence_score > before);
        assert_eq!(verified.confidence, Confidence::High);
        let result = verified.verification_result.expect("result");
        assert!(result.evidence_results[0].line_numbers_match);
    }

    #[tokio::test]
    async fn missing_snippet_is_rejected() {
        let (_dir, verifier) = fixture();
        let finding = finding_with(vec![Evidence::new("internal/x.go", "NOT THERE").with_lines(10, 12)]);
        let before = finding.confidence_score;
        let verified = verifier
            .verify_finding(finding, &CancellationToken::new())
            .await;
        assert_eq!(verified.verification_status, VerificationStatus::Rejected);
        let result = verified.verification_result.expect("result");
        assert_eq!(result.confidence_delta, REJECTED_DELTA);
        assert!(result.evidence_results[0].similarity_score < 0.5);
        assert!((verified.confidence_score - (before - 0.3)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn traversal_evidence_never_reads() {
        let (_dir, verifier) = fixture();
        let result = verifier
            .check_file_evidence(&Evidence::new("../../etc/passwd", "root"))
            .await;
        assert!(!result.file_exists);
        assert!(result.actual_content.is_empty());
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("escapes")));
    }

    #[tokio::test]
    async fn snippet_elsewhere_is_partial() {
        let (_dir, verifier) = fixture();
        let finding = finding_with(vec![Evidence::new("internal/x.go", "func Bye() {").with_lines(1, 2)]);
        let verified = verifier
            .verify_finding(finding, &CancellationToken::new())
            .await;
        assert_eq!(verified.verification_status, VerificationStatus::Partial);
        assert_eq!(
            verified.verification_result.expect("result").confidence_delta,
            PARTIAL_DELTA
        );
    }

    #[tokio::test]
    async fn grep_pattern_fallback_scores_point_six() {
        let (_dir, verifier) = fixture();
        let evidence = Evidence::new("internal/x.go", "something unrelated entirely")
            .with_grep_pattern("fmt.Println");
        let result = verifier.check_file_evidence(&evidence).await;
        assert!(!result.snippet_found);
        assert_eq!(result.similarity_score, GREP_FALLBACK_SIMILARITY);
    }

    #[tokio::test]
    async fn no_evidence_is_skipped_without_delta() {
        let (_dir, verifier) = fixture();
        let finding = finding_with(Vec::new());
        let before = finding.confidence_score;
        let verified = verifier
            .verify_finding(finding, &CancellationToken::new())
            .await;
        assert_eq!(verified.verification_status, VerificationStatus::Skipped);
        assert_eq!(verified.confidence_score, before);
    }

    #[tokio::test]
    async fn reverification_is_stable() {
        let (_dir, verifier) = fixture();
        let finding = finding_with(vec![
            Evidence::new("README.md", "Auth: JWT"),
            Evidence::new("internal/x.go", "func Bye()").with_lines(9, 9),
        ]);
        let cancel = CancellationToken::new();
        let once = verifier.verify_finding(finding, &cancel).await;
        let twice = verifier.verify_finding(once.clone(), &cancel).await;
        assert_eq!(once.verification_status, twice.verification_status);
        assert_eq!(once.verification_result, twice.verification_result);
    }

    #[tokio::test]
    async fn git_evidence_without_repository_fails_softly() {
        let (_dir, verifier) = fixture();
        let evidence = Evidence::new(".git", "initial commit").with_type(EvidenceType::Git);
        let result = verifier
            .check_evidence(&evidence, &CancellationToken::new())
            .await;
        assert!(!result.snippet_found);
        assert!(result.error_message.is_some());
    }

    #[test]
    fn git_log_matching_prefers_words_over_hash() {
        let log = "a1b2c3d4 Add JWT auth middleware\n9f8e7d6c Initial commit\n";
        let exact = match_git_log(log, "Initial commit").expect("exact");
        assert_eq!(exact.similarity, GIT_EXACT_SIMILARITY);
        assert_eq!(exact.line, "9f8e7d6c Initial commit");

        let words = match_git_log(log, "jwt MIDDLEWARE").expect("words");
        assert_eq!(words.similarity, GIT_WORDS_SIMILARITY);

        // An upper-case hash is not an exact hit but every "word" of it is in the log.
        let upper = match_git_log(log, "A1B2C3D4").expect("upper-case hash");
        assert_eq!(upper.similarity, GIT_WORDS_SIMILARITY);

        let longer = match_git_log(log, "a1b2c3d4e5f6").expect("full hash");
        assert_eq!(longer.similarity, GIT_HASH_SIMILARITY);
        assert!(longer.line.starts_with("a1b2c3d4"));

        assert!(match_git_log(log, "nothing like it").is_none());
    }

    #[test]
    fn aggregate_mixed_results_are_partial() {
        let evidence = vec![Evidence::new("a", "x"), Evidence::new("b", "y")];
        let strict = EvidenceCheckResult {
            file_exists: true,
            snippet_found: true,
            line_numbers_match: true,
            similarity_score: 1.0,
            ..EvidenceCheckResult::default()
        };
        let missing = EvidenceCheckResult::default();
        assert_eq!(
            aggregate(&evidence, &[strict.clone(), missing]),
            (VerificationStatus::Partial, PARTIAL_DELTA)
        );
        let similar = EvidenceCheckResult {
            file_exists: true,
            similarity_score: 0.7,
            ..EvidenceCheckResult::default()
        };
        assert_eq!(
            aggregate(&evidence, &[strict, similar]),
            (VerificationStatus::Partial, PARTIAL_STRICT_DELTA)
        );
    }

    #[test]
    fn whitespace_normalization_and_similarity() {
        assert_eq!(normalize_whitespace("  a   b \n\n\t c  "), "a b\nc");
        assert_eq!(jaccard_similarity("Login page", "login   PAGE"), 1.0);
        assert!((jaccard_similarity("login page", "login service") - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard_similarity("", "x"), 0.0);
    }
}
