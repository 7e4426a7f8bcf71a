use super::{AgentConfig, AgentCore, Input, Output};
use crate::process::ProcessRunner;
use crate::verifier::Verifier;
use crate::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Re-checks the evidence of findings handed over in `existing_context["findings"]`.
#[derive(Clone)]
pub struct VerificationAgent {
    pub(crate) core: AgentCore,
    command_timeout: Duration,
}

impl VerificationAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            core: AgentCore::new(
                "verification",
                "Checks finding evidence against the working tree and git history",
                "",
                config,
            ),
            command_timeout: config.command_timeout,
        }
    }

    pub async fn run(&self, input: &Input, cancel: &CancellationToken) -> Result<Output> {
        let findings = input.context_findings();
        let verifier = Verifier::new(&input.base_path).with_runner(
            ProcessRunner::new(&input.base_path).with_timeout(self.command_timeout),
        );
        let verified = verifier.verify_findings(findings, cancel).await;
        if cancel.is_cancelled() {
            return Err(crate::AgentError::Cancelled);
        }
        Ok(Output::empty(self.core.name()).with_findings(verified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Evidence, Finding, FindingType, VerificationStatus};

    #[tokio::test]
    async fn verifies_handed_over_findings() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("main.go"), "package main\n\nfunc main() {}\n")
            .expect("write");
        let findings = vec![
            Finding::new(FindingType::Pattern, "Has main", "", "code")
                .with_evidence(Evidence::new("main.go", "func main() {}")),
            Finding::new(FindingType::Risk, "Phantom", "", "code")
                .with_evidence(Evidence::new("main.go", "func phantomHandler(w http.ResponseWriter)")),
        ];
        let input = Input::bootstrap(dir.path()).with_context(
            "findings",
            serde_json::to_value(&findings).expect("serialize"),
        );

        let output = VerificationAgent::new(&AgentConfig::default())
            .run(&input, &CancellationToken::new())
            .await
            .expect("run");

        let statuses: Vec<_> = output
            .findings
            .iter()
            .map(|f| f.verification_status)
            .collect();
        assert_eq!(
            statuses,
            vec![VerificationStatus::Verified, VerificationStatus::Rejected]
        );
        assert!((output.findings[0].confidence_score - 0.8).abs() < 1e-9);
        assert!((output.findings[1].confidence_score - 0.4).abs() < 1e-9);
    }
}
