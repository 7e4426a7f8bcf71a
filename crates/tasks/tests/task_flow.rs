use pretty_assertions::assert_eq;
use taskwing_tasks::{
    summarize, ArchiveStore, ClearScope, NewTask, TaskError, TaskStatus, TaskStore,
};

#[test]
fn login_reference_is_ambiguous_between_two_tasks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TaskStore::open(dir.path()).expect("open");
    store.add(NewTask::titled("Login page")).expect("page");
    store.add(NewTask::titled("Login service")).expect("service");

    let resolution = store.resolve("login").expect("resolve");
    assert!(!resolution.resolved);
    assert!(resolution.matches.len() >= 2);
    for hit in &resolution.matches {
        assert!(hit.score >= 0.3 && hit.score < 0.9, "score {}", hit.score);
    }
    assert!(resolution.message.contains(&resolution.matches[0].title));
    assert!(matches!(store.find("login"), Err(TaskError::Ambiguous { .. })));

    let page = store.find("login page").expect("exact title");
    assert_eq!(page.title, "Login page");
}

#[test]
fn done_tasks_move_to_the_archive_and_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TaskStore::open(dir.path()).expect("open");
    let archive = ArchiveStore::for_root(dir.path());

    let created = store
        .add_many(vec![
            NewTask::titled("Schema"),
            NewTask {
                title: "Endpoints".into(),
                depends_on: vec![0],
                ..NewTask::default()
            },
        ])
        .expect("batch");
    store.mark_done(&created[0].id).expect("done");
    store.set_current(&created[0].id).expect("current");

    let summary = summarize(&store.list().expect("list"), store.current().expect("current"), 5);
    assert_eq!(summary.ready.len(), 1);
    assert_eq!(summary.ready[0].id, created[1].id);

    let removed = store.clear(ClearScope::Done).expect("clear");
    archive.archive_all(removed).expect("archive");
    assert_eq!(store.current().expect("current"), None);

    let remaining = store.list().expect("list");
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].dependencies.is_empty());
    assert_eq!(remaining[0].status, TaskStatus::Todo);

    let bundle = archive.export_bundle().expect("export");
    let other = tempfile::tempdir().expect("tempdir");
    let fresh = ArchiveStore::for_root(other.path());
    let report = fresh.import_bundle(bundle).expect("import");
    assert_eq!(report.imported, 1);
    assert_eq!(fresh.index().expect("index"), archive.index().expect("index"));
    assert_eq!(fresh.get(&created[0].id).expect("entry").task.title, "Schema");
}
