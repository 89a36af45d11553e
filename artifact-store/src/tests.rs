use crate::*;
use std::env;
use threadscope_core::{
    ExtractionOutcome, ExtractionResult, InsightRecord, RelevanceVerdict, ThreadRecord,
};

fn temp_dir() -> PathBuf {
    env::temp_dir().join(format!("test_threadscope_{}", uuid::Uuid::new_v4()))
}

fn thread(id: &str) -> ThreadRecord {
    ThreadRecord {
        id: id.to_string(),
        title: format!("Thread {}", id),
        selftext: "How do I teach my dad to use email?".to_string(),
        url: String::new(),
        permalink: format!("/r/AgingParents/comments/{}/", id),
        subreddit: "AgingParents".to_string(),
        author: "someone".to_string(),
        score: 12,
        num_comments: 3,
        created_utc: 1_700_000_000.0,
        query_origins: vec![],
        comments: vec![],
    }
}

fn success(id: &str) -> ExtractionResult {
    ExtractionResult::new(
        &thread(id),
        ExtractionOutcome::Success {
            verdict: RelevanceVerdict {
                relevant: true,
                rationale: "yes".to_string(),
            },
            insights: InsightRecord::default(),
            attempts: 1,
        },
    )
}

#[test]
fn test_artifact_paths_use_prefix() {
    let paths = ArtifactPaths::new("results", "tech_education");
    assert_eq!(
        paths.threads(),
        PathBuf::from("results/tech_education_reddit_threads.json")
    );
    assert_eq!(
        paths.checkpoint(),
        PathBuf::from("results/tech_education_analysis_checkpoint.json")
    );
    assert_eq!(
        paths.report(),
        PathBuf::from("results/tech_education_market_validation_report.md")
    );
}

#[tokio::test]
async fn test_json_write_then_read() {
    let dir = temp_dir();
    let path = dir.join("nested").join("threads.json");
    let threads = vec![thread("a"), thread("b")];

    write_json_atomic(&path, &threads).await.unwrap();
    let back: Vec<ThreadRecord> = read_json(&path).await.unwrap();
    assert_eq!(back, threads);

    // Overwrite leaves no temp files behind.
    write_json_atomic(&path, &threads[..1]).await.unwrap();
    let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .collect();
    assert_eq!(entries.len(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_read_missing_and_corrupt_artifacts() {
    let dir = temp_dir();
    let missing = dir.join("missing.json");
    let err = read_json::<Vec<ThreadRecord>>(&missing).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Artifact(ArtifactError::NotFound { .. })
    ));

    let corrupt = dir.join("corrupt.json");
    write_text_atomic(&corrupt, "[{\"id\": ").await.unwrap();
    let err = read_json::<Vec<ThreadRecord>>(&corrupt).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Artifact(ArtifactError::Corrupt { .. })
    ));

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_checkpoint_round_trip_and_discard() {
    let dir = temp_dir();
    let store = CheckpointStore::new(dir.join("concept_analysis_checkpoint.json"));

    let mut checkpoint = store.load("concept").await.unwrap();
    assert!(checkpoint.is_empty());

    assert!(checkpoint.upsert(success("a")));
    assert!(checkpoint.upsert(success("a")));
    assert!(checkpoint.upsert(success("b")));
    store.save(&mut checkpoint).await.unwrap();
    assert!(checkpoint.updated_at.is_some());

    let loaded = store.load("concept").await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.contains("a"));
    assert!(loaded.contains("b"));

    store.discard().await.unwrap();
    assert!(!store.path().exists());
    // Discarding twice is fine.
    store.discard().await.unwrap();

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_checkpoint_for_other_concept_is_rejected() {
    let dir = temp_dir();
    let store = CheckpointStore::new(dir.join("checkpoint.json"));

    let mut checkpoint = Checkpoint::new("first");
    checkpoint.upsert(success("a"));
    store.save(&mut checkpoint).await.unwrap();

    let err = store.load("second").await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Artifact(ArtifactError::Corrupt { .. })
    ));

    std::fs::remove_dir_all(&dir).ok();
}
