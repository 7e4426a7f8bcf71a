use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskwing_agents::{AgentConfig, ScriptedModel, SharedModel};
use taskwing_engine::notifier::RecordingSubscriber;
use taskwing_engine::{
    ActivityLog, ChangePipeline, Config, Dispatcher, DispatcherOptions, EngineServices,
};
use taskwing_watcher::{Category, DebounceDelays, FileChangeEvent, Operation};

#[tokio::test]
async fn ten_go_changes_become_one_code_run() {
    let repo = tempfile::tempdir().expect("tempdir");
    for idx in 0..10 {
        std::fs::write(
            repo.path().join(format!("svc{idx}.go")),
            format!("package svc\n\nfunc Handler{idx}() {{}}\n"),
        )
        .expect("write");
    }
    let model = Arc::new(ScriptedModel::new("scripted").then_text(r#"{"findings":[]}"#));
    let activity = ActivityLog::in_memory(100);
    let dispatcher = Dispatcher::new(
        repo.path(),
        DispatcherOptions {
            agent_config: AgentConfig::default().with_model(model.clone()),
            activity: Some(activity.clone()),
            ..DispatcherOptions::default()
        },
    );
    let pipeline = ChangePipeline::new(DebounceDelays::default(), dispatcher, Some(activity.clone()));

    let started = Instant::now();
    for idx in 0..10 {
        pipeline.submit(FileChangeEvent::new(
            format!("svc{idx}.go"),
            Operation::Modify,
            Category::Code,
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(pipeline.pending_len(), 10);

    tokio::time::sleep(Duration::from_millis(900)).await;
    let reports = pipeline.dispatcher().wait_idle().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].agent, "code");
    assert_eq!(reports[0].changed_files.len(), 10);
    assert_eq!(reports[0].changed_files[0], "svc0.go");
    assert_eq!(model.call_count(), 1);
    let prompt = &model.calls()[0].messages[0].content;
    assert!(prompt.contains("svc9.go"));

    let summary = activity.summary();
    assert_eq!(summary.file_changes, 10);
    assert_eq!(summary.agent_runs, 1);
}

#[tokio::test]
async fn doc_batch_lands_in_the_knowledge_store_and_notifies() {
    let repo = tempfile::tempdir().expect("tempdir");
    std::fs::write(repo.path().join("README.md"), "v1\n## Auth: JWT\n").expect("write");
    let services = EngineServices::open(repo.path(), Config::default()).expect("services");
    let recorder = Arc::new(RecordingSubscriber::default());
    services.notifier.subscribe(recorder.clone());

    let model: SharedModel = Arc::new(ScriptedModel::new("scripted").then_text(
        r#"{"findings":[{"type":"feature","title":"Auth: JWT","description":"JWT auth.",
            "evidence":[{"file_path":"README.md","snippet":"Auth: JWT"}]}]}"#,
    ));
    let dispatcher = Dispatcher::new(repo.path(), services.dispatcher_options(Some(model)));
    let report = dispatcher
        .run_batch(
            Category::Docs,
            vec![FileChangeEvent::new("README.md", Operation::Modify, Category::Docs)],
        )
        .await
        .expect("report");
    assert_eq!(report.findings, 1);
    assert!(report.error.is_none());

    let stored = services.knowledge.list().expect("list");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].source_files, vec!["README.md".to_string()]);
    assert_eq!(recorder.seen(), vec!["added:Auth: JWT", "batch:1+0"]);

    services.activity.flush().await;
    let persisted = std::fs::read_to_string(repo.path().join(".taskwing/activity.json"))
        .expect("activity persisted");
    assert!(persisted.contains("Auth: JWT"));
}
