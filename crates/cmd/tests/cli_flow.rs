use cmd::commands::{Command, run};
use cmd::common;
use std::path::PathBuf;
use studio::StudioConfig;
use tempfile::TempDir;

const USER: &str = "ann";

struct Home {
    dir: TempDir,
    source: String,
}

impl Home {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sales.csv");
        std::fs::write(&path, "a;b;city\n1;10;Oslo\n2;;Lima\n3;30;Oslo\n").unwrap();
        let source = path.display().to_string();
        Self { dir, source }
    }

    fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    fn studio_home(&self) -> PathBuf {
        self.dir.path().join("home")
    }

    async fn run(&self, command: Command) -> studio::ApiResponse {
        invoke(self.studio_home(), command).await
    }
}

/// Each invocation reopens the home, the way separate processes would.
async fn invoke(studio_home: PathBuf, command: Command) -> studio::ApiResponse {
    let api = common::open_api(&studio_home, StudioConfig::default())
        .await
        .unwrap();
    run(&api, &studio_home, USER, &command).await.unwrap()
}

#[tokio::test]
async fn test_session_survives_across_invocations() {
    let home = Home::new();
    let source = home.source.clone();

    let init = home.run(Command::Init { source: source.clone() }).await;
    assert!(init.success, "{:?}", init.error);
    assert_eq!(init.session.unwrap().columns, 3);

    let applied = home
        .run(Command::Apply {
            source: source.clone(),
            op: Some(r#"{"type": "impute", "columns": ["b"], "strategy": "median"}"#.to_string()),
            op_file: None,
        })
        .await;
    assert!(applied.success, "{:?}", applied.error);

    let op_file = home.path().join("drop.yaml");
    std::fs::write(&op_file, "type: drop_columns\ncolumns: [city]\n").unwrap();
    let dropped = home
        .run(Command::Apply {
            source: source.clone(),
            op: None,
            op_file: Some(op_file),
        })
        .await;
    assert!(dropped.success, "{:?}", dropped.error);
    assert_eq!(dropped.session.unwrap().columns, 2);

    let undone = home.run(Command::Undo { source: source.clone() }).await;
    assert_eq!(undone.session.unwrap().columns, 3);

    let history = home.run(Command::History { source: source.clone() }).await;
    let entries = history.data.unwrap();
    assert_eq!(entries.as_array().unwrap().len(), 3);
    assert_eq!(entries[1]["is_current"], serde_json::json!(true));

    let page = home
        .run(Command::Preview {
            source: source.clone(),
            offset: 1,
            limit: 1,
        })
        .await;
    let preview = page.preview.unwrap();
    assert_eq!(preview.rows.len(), 1);
    assert_eq!(preview.rows[0][1].as_deref(), Some("20.0"));
}

#[tokio::test]
async fn test_save_writes_artifact_and_ends_session() {
    let home = Home::new();
    let source = home.source.clone();
    assert!(home.run(Command::Init { source: source.clone() }).await.success);

    let saved = home
        .run(Command::Save {
            source: source.clone(),
            name: "sales-clean".to_string(),
            description: "first pass".to_string(),
        })
        .await;
    assert!(saved.success, "{:?}", saved.error);
    let location = saved.data.unwrap()["location"].as_str().unwrap().to_string();
    assert!(std::path::Path::new(&location).is_file());
    assert!(location.starts_with(&home.path().join("home").join("artifacts").display().to_string()));

    let status = home.run(Command::Status { source }).await;
    assert_eq!(status.error_code(), Some("NOT_FOUND"));
}

#[tokio::test]
async fn test_failures_are_responses() {
    let home = Home::new();
    let source = home.source.clone();

    let missing = home.run(Command::Undo { source: source.clone() }).await;
    assert!(!missing.success);
    assert_eq!(missing.error_code(), Some("NOT_FOUND"));

    assert!(home.run(Command::Init { source: source.clone() }).await.success);
    let malformed = home
        .run(Command::Apply {
            source: source.clone(),
            op: Some("{\"type\": \"teleport\"}".to_string()),
            op_file: None,
        })
        .await;
    assert_eq!(malformed.error_code(), Some("INVALID_OPERATION"));

    let cleared = home.run(Command::Clear { source }).await;
    assert_eq!(cleared.data.unwrap()["cleared"], serde_json::json!(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations_keep_every_apply() {
    let home = Home::new();
    let source = home.source.clone();
    assert!(home.run(Command::Init { source: source.clone() }).await.success);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let op = format!(r#"{{"type": "feature", "name": "f{}", "expression": "@a + {}"}}"#, i, i);
        tasks.push(tokio::spawn(invoke(
            home.studio_home(),
            Command::Apply {
                source: source.clone(),
                op: Some(op),
                op_file: None,
            },
        )));
    }
    for task in tasks {
        let applied = task.await.unwrap();
        assert!(applied.success, "{:?}", applied.error);
    }

    let status = home.run(Command::Status { source }).await;
    let session = status.session.unwrap();
    assert_eq!(session.history_len, 9);
    assert_eq!(session.columns, 3 + 8);
}
