use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use graphkb::{
    config::Config,
    engine::{EngineError, EngineInvocation, EngineOutput, EngineRunner},
    indexing::BuildError,
    service::{ContextSource, KnowledgeBaseService},
};
use tempfile::TempDir;
use uuid::Uuid;

const LEASE: &str = "The lease between Acme Corp and Jane Doe runs for five years. \
Rent of two thousand dollars is due on the first day of each month. \
The tenant may terminate early with ninety days of written notice. \
A security deposit equal to one month of rent is held by the landlord.";

/// Behaves like the engine: `index` writes artifact tables, `query` prints an answer.
#[derive(Default)]
struct FakeEngine {
    invocations: Mutex<Vec<EngineInvocation>>,
}

impl FakeEngine {
    fn invocations(&self) -> Vec<EngineInvocation> {
        self.invocations.lock().expect("invocations").clone()
    }
}

#[async_trait]
impl EngineRunner for FakeEngine {
    async fn run(&self, invocation: EngineInvocation) -> Result<EngineOutput, EngineError> {
        self.invocations
            .lock()
            .expect("invocations")
            .push(invocation.clone());

        let root = PathBuf::from(invocation.flag_value("--root").expect("--root"));
        let stdout = match invocation.subcommand() {
            Some("index") => {
                for table in ["create_final_entities", "create_final_relationships"] {
                    fs::write(root.join("output").join(format!("{table}.parquet")), b"PAR1")
                        .expect("write artifact");
                }
                "All workflows completed successfully.".to_string()
            }
            Some("query") => "SUCCESS: Local Search Response:\nThe lease runs for five years.".into(),
            other => panic!("unexpected subcommand {other:?}"),
        };

        Ok(EngineOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

fn config(temp: &TempDir, api_key: Option<&str>) -> Arc<Config> {
    let mut config = Config::with_data_dir(temp.path());
    config.openai_api_key = api_key.map(str::to_string);
    Arc::new(config)
}

#[tokio::test]
async fn full_lifecycle_with_graph_and_fallback() {
    let temp = TempDir::new().expect("tempdir");
    let engine = Arc::new(FakeEngine::default());
    let service = KnowledgeBaseService::with_runner(config(&temp, Some("sk-test")), engine.clone());
    let id = Uuid::new_v4();

    let path = service
        .save_document(id, "lease.pdf", LEASE)
        .expect("save document");
    assert_eq!(path, temp.path().join(id.to_string()).join("input/lease.txt"));
    let stored = fs::read_to_string(&path).expect("read stored");
    assert!(stored.contains("five years.\n\nRent"));

    // Before the build the graph has nothing, so retrieval falls back to keywords.
    let context = service
        .retrieve_context(id, "security deposit", "local", None)
        .await
        .expect("fallback context");
    assert_eq!(context.source, ContextSource::Fallback);
    assert!(context.text.starts_with("[From: lease.txt]\nA security deposit"));

    assert!(service.build_index(id, false).await.expect("build"));
    let stats = service.stats(id).expect("stats");
    assert!(stats.has_index && stats.has_documents);
    assert_eq!(stats.artifact_count, 2);
    assert!(temp.path().join(id.to_string()).join("settings.yaml").is_file());

    let answer = service
        .query(id, "How long is the lease?", "global", false)
        .await
        .expect("graph answer");
    assert!(answer.ends_with("The lease runs for five years."));

    let invocations = engine.invocations();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[1].flag_value("--method"), Some("global"));
    assert!(
        invocations
            .iter()
            .all(|invocation| invocation.args.iter().all(|arg| !arg.contains("sk-test")))
    );

    assert!(service.delete(id).await);
    assert!(!temp.path().join(id.to_string()).exists());
    assert!(service.query(id, "anything", "local", false).await.is_none());
}

#[tokio::test]
async fn conversations_are_isolated() {
    let temp = TempDir::new().expect("tempdir");
    let service = KnowledgeBaseService::with_runner(
        config(&temp, Some("sk-test")),
        Arc::new(FakeEngine::default()),
    );
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    service.save_document(first, "lease.txt", LEASE).expect("save");
    assert!(service.build_index(first, false).await.expect("build"));

    assert!(service.search(second, "lease", None).is_none());
    assert!(service.query(second, "lease", "local", false).await.is_none());
    assert!(service.list_documents(second).expect("list").is_empty());
    assert_eq!(service.list_documents(first).expect("list").len(), 1);

    assert!(!service.delete(second).await);
    assert!(service.stats(first).expect("stats").has_index);
}

#[tokio::test]
async fn build_without_credentials_spawns_nothing() {
    let temp = TempDir::new().expect("tempdir");
    let engine = Arc::new(FakeEngine::default());
    let service = KnowledgeBaseService::with_runner(config(&temp, None), engine.clone());
    let id = Uuid::new_v4();
    service.save_document(id, "lease.txt", LEASE).expect("save");

    assert!(!service.build_index(id, false).await.expect("build result"));
    assert!(matches!(
        service.build_index_report(id, false).await,
        Err(BuildError::MissingCredential)
    ));
    assert!(engine.invocations().is_empty());
    assert_eq!(service.metrics_snapshot().builds_failed, 2);
}

#[cfg(unix)]
#[tokio::test]
async fn real_process_runner_drives_a_stand_in_binary() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().expect("tempdir");
    let script = temp.path().join("graphrag");
    fs::write(
        &script,
        concat!(
            "#!/bin/sh\n",
            "[ -n \"$GRAPHRAG_API_KEY\" ] || { echo 'missing key' >&2; exit 9; }\n",
            "case \"$1\" in\n",
            "  index) touch \"$3/output/create_final_entities.parquet\"; echo indexed ;;\n",
            "  query) echo \"answer for: $9\" ;;\n",
            "esac\n",
        ),
    )
    .expect("write script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

    let data = temp.path().join("data");
    let mut config = Config::with_data_dir(&data);
    config.openai_api_key = Some("sk-test".into());
    config.graphrag_binary = script.display().to_string();
    let service = KnowledgeBaseService::new(Arc::new(config));
    let id = Uuid::new_v4();

    service.save_document(id, "lease.txt", LEASE).expect("save");
    let report = service
        .build_index_report(id, true)
        .await
        .expect("build report");
    assert_eq!(report.artifact_count, 1);

    let answer = service
        .query(id, "who pays rent", "local", false)
        .await
        .expect("answer");
    assert_eq!(answer, "answer for: who pays rent");
}
