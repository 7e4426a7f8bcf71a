use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use taskwing_agents::agent::{DocAgent, ReactCodeAgent};
use taskwing_agents::model::{ChatResponse, ToolCall};
use taskwing_agents::tools::{AgentTools, READ_FILE};
use taskwing_agents::{
    registry, Agent, AgentConfig, FindingType, Input, Orchestrator, ScriptedModel, Verifier,
    VerificationStatus,
};
use taskwing_protocol::{ErrorCode, HasErrorCode};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn doc_change_yields_verified_feature() {
    let repo = tempfile::tempdir().expect("tempdir");
    std::fs::write(repo.path().join("README.md"), "v1\n## Auth: JWT\n").expect("write readme");

    let model = Arc::new(ScriptedModel::new("scripted").then_text(
        r#"```json
{"findings":[{"type":"feature","title":"Auth: JWT","description":"Authentication uses JWT.",
  "evidence":[{"file_path":"README.md","snippet":"Auth: JWT"}]}]}
```"#,
    ));
    let agent = Agent::Doc(DocAgent::new(&AgentConfig::default().with_model(model.clone())));
    let input = Input::watch(repo.path(), vec!["README.md".to_string()]);
    let cancel = CancellationToken::new();
    let output = agent.run(&input, &cancel).await.expect("doc run");

    assert_eq!(output.agent_name, "doc");
    assert_eq!(output.findings.len(), 1);
    let finding = &output.findings[0];
    assert_eq!(finding.finding_type, FindingType::Feature);
    assert_eq!(finding.title, "Auth: JWT");
    assert_eq!(finding.source_files, vec!["README.md".to_string()]);
    let prompt = &model.calls()[0].messages[0].content;
    assert!(prompt.contains("## Auth: JWT"), "changed file is in the prompt");

    let before = finding.confidence_score;
    let verified = Verifier::new(repo.path())
        .verify_findings(output.findings, &cancel)
        .await;
    assert_eq!(verified[0].verification_status, VerificationStatus::Verified);
    assert!((verified[0].confidence_score - (before + 0.1)).abs() < 1e-9);
}

#[tokio::test]
async fn read_file_refuses_to_leave_the_base() {
    let repo = tempfile::tempdir().expect("tempdir");
    let tools = AgentTools::new(repo.path());
    let call = ToolCall::new("c1", READ_FILE, json!({"path": "../etc/passwd"}));
    let err = tools
        .execute(&call, &CancellationToken::new())
        .await
        .expect_err("traversal");
    assert_eq!(err.code(), ErrorCode::PathTraversal);
}

#[tokio::test]
async fn react_loop_stops_at_the_iteration_bound() {
    let repo = tempfile::tempdir().expect("tempdir");
    std::fs::write(repo.path().join("main.go"), "package main\n").expect("write");
    let model = Arc::new(ScriptedModel::new("looping").repeating(ChatResponse::tool_calls(vec![
        ToolCall::new("c1", READ_FILE, json!({"path": "main.go"})),
    ])));
    let config = AgentConfig::default()
        .with_model(model.clone())
        .with_max_iterations(3);
    let agent = Agent::ReactCode(ReactCodeAgent::new(&config));

    let output = agent
        .run(&Input::bootstrap(repo.path()), &CancellationToken::new())
        .await
        .expect("react run");
    assert_eq!(model.call_count(), 3);
    assert!(output.findings.is_empty());
    assert_eq!(output.agent_name, "react_code");
}

#[tokio::test]
async fn registry_agents_run_together() {
    let repo = tempfile::tempdir().expect("tempdir");
    std::fs::write(repo.path().join("go.mod"), "module example.com/demo\n\ngo 1.22\n")
        .expect("write go.mod");
    let model = ScriptedModel::new("scripted")
        .repeating(ChatResponse::text(
            r#"{"findings":[{"type":"dependency","title":"Go 1.22 toolchain"}]}"#,
        ))
        .shared();
    let config = AgentConfig::default().with_model(model);
    let agents: Vec<Agent> = ["deps", "duplicate", "verification"]
        .iter()
        .map(|id| registry::create(id, &config).expect("builtin"))
        .collect();

    let outputs = Orchestrator::new()
        .run_all(agents, &Input::bootstrap(repo.path()), &CancellationToken::new())
        .await;
    let names: Vec<&str> = outputs.iter().map(|o| o.agent_name.as_str()).collect();
    assert_eq!(names, vec!["deps", "duplicate", "verification"]);
    assert_eq!(outputs[0].findings[0].title, "Go 1.22 toolchain");
    assert!(outputs.iter().all(|o| o.error.is_none()));
}
