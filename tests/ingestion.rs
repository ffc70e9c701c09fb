//! Ingestion against file-backed stores shared by several connections.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{pipeline_config, temp_stores, FixedExtractor, ScriptedProvider, DIMS};
use kh::embeddings::chunk_text;
use kh::error::Error;
use kh::extraction::{ExtractedEntity, Extraction, RuleBasedExtractor};
use kh::graph::GraphStore;
use kh::ingestion::{Pipeline, PoolSettings, WorkerPool};
use kh::model::{GraphFilter, NewDocument, QueueStatus, SubjectKind};
use kh::storage::{EnqueueOptions, SqliteStorage};
use kh::stores::Stores;
use kh::vector::{VectorRecord, VectorStore};

const BODY: &str = "Alice Smith works at Acme Corp in Berlin. She maintains the ingestion \
    pipeline, which depends on SQLite for durable storage and on Ollama for embeddings.";

fn add_document(stores: &mut Stores, title: &str, content: &str) -> String {
    stores
        .relational
        .ingest_document(&NewDocument::new(title, content), EnqueueOptions::default(), "test")
        .unwrap()
        .document_id
}

#[tokio::test]
async fn transient_failures_complete_on_third_attempt() {
    let (_dir, paths, mut stores) = temp_stores();
    let doc_id = add_document(&mut stores, "notes", BODY);
    let pipeline = Pipeline::new(ScriptedProvider::new(2), RuleBasedExtractor::new(), pipeline_config());

    // Each drain sweeps the previous failure back to pending before claiming.
    for _ in 0..3 {
        pipeline.drain(&mut stores, "w1", None).await.unwrap();
    }

    // A second connection sees the committed state.
    let observer = paths.open(DIMS).unwrap();
    let item = observer.relational.get_queue_item_by_subject(&doc_id).unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.attempts, 3);
    assert_eq!(pipeline.provider().calls(), 3);

    let chunks = observer.relational.get_chunks(&doc_id).unwrap();
    let records = observer.vectors.subject_records(&doc_id).unwrap();
    assert!(!chunks.is_empty());
    assert_eq!(records.len(), chunks.len());
    let ids: HashSet<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), records.len());
}

#[tokio::test]
async fn reprocessing_from_another_connection_keeps_entities_unique() {
    let (_dir, paths, mut stores) = temp_stores();
    let doc_id = add_document(&mut stores, "people", BODY);
    let extraction = Extraction {
        entities: vec![
            ExtractedEntity::new("PERSON", "Alice", 0.9),
            ExtractedEntity::new("ORG", "Acme", 0.8),
        ],
        relations: vec![],
    };
    let pipeline = Pipeline::new(ScriptedProvider::new(0), FixedExtractor(extraction), pipeline_config());

    pipeline.drain(&mut stores, "w1", None).await.unwrap();

    let mut other = paths.open(DIMS).unwrap();
    other
        .relational
        .enqueue(&doc_id, SubjectKind::Document, EnqueueOptions::default(), "test")
        .unwrap();
    let report = pipeline.drain(&mut other, "w2", None).await.unwrap();
    assert_eq!(report.completed, 1);

    let graph = stores.graph.query(&GraphFilter::default()).unwrap();
    assert_eq!(graph.entities.len(), 2);
    let names: HashSet<_> = graph.entities.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains("Alice"));
    assert!(names.contains("Acme"));
}

#[tokio::test]
async fn chunking_and_reprocessing_are_deterministic() {
    let config = pipeline_config();
    assert_eq!(chunk_text(BODY, &config.chunking), chunk_text(BODY, &config.chunking));

    let (_dir, _paths, mut stores) = temp_stores();
    let doc_id = add_document(&mut stores, "notes", BODY);
    let pipeline = Pipeline::new(ScriptedProvider::new(0), RuleBasedExtractor::new(), config);

    pipeline.drain(&mut stores, "w1", None).await.unwrap();
    let first = stores.vectors.subject_records(&doc_id).unwrap();

    stores
        .relational
        .enqueue(&doc_id, SubjectKind::Document, EnqueueOptions::default(), "test")
        .unwrap();
    pipeline.drain(&mut stores, "w1", None).await.unwrap();
    let second = stores.vectors.subject_records(&doc_id).unwrap();

    assert_eq!(first.len(), second.len());
    assert_eq!(stores.vectors.count().unwrap(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.embedding, b.embedding);
    }
}

#[tokio::test]
async fn wrong_dimensions_are_rejected_everywhere() {
    let (_dir, paths, mut stores) = temp_stores();
    let doc_id = add_document(&mut stores, "notes", BODY);
    let pipeline = Pipeline::new(
        ScriptedProvider::new(0).with_dims(DIMS + 1),
        RuleBasedExtractor::new(),
        pipeline_config(),
    );

    let outcome = pipeline.process_next(&mut stores, "w1").await.unwrap().unwrap();
    assert_eq!(outcome.status, QueueStatus::Failed);
    assert!(!outcome.retryable);
    assert_eq!(stores.vectors.count().unwrap(), 0);

    let record = VectorRecord {
        id: format!("{doc_id}:0"),
        subject_id: doc_id.clone(),
        subject_kind: SubjectKind::Document,
        chunk_index: 0,
        content: "text".to_string(),
        embedding: vec![0.5; DIMS + 2],
        metadata: serde_json::json!({}),
    };
    let err = stores.vectors.upsert(&[record]).unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected, actual } if expected == DIMS && actual == DIMS + 2));
    assert_eq!(stores.vectors.count().unwrap(), 0);

    // Stores created at one width refuse to open at another.
    let err = paths.open(DIMS * 2).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn concurrent_claims_never_hand_out_an_item_twice() {
    const ITEMS: usize = 40;
    const CLAIMERS: usize = 6;

    let (_dir, paths, mut stores) = temp_stores();
    for n in 0..ITEMS {
        add_document(&mut stores, "doc", &format!("document number {n} with some body text"));
    }
    drop(stores);

    let handles: Vec<_> = (0..CLAIMERS)
        .map(|n| {
            let path = paths.relational.clone();
            std::thread::spawn(move || {
                let mut storage = SqliteStorage::open(&path).unwrap();
                let worker = format!("claimer-{n}");
                let mut claimed = Vec::new();
                loop {
                    match storage.claim_next(&worker) {
                        Ok(Some(item)) => claimed.push(item.id),
                        Ok(None) => break,
                        Err(err) if err.is_busy_database() => {}
                        Err(err) => panic!("claim failed: {err}"),
                    }
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), ITEMS);
    assert_eq!(unique.len(), ITEMS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_drains_the_queue() {
    const ITEMS: usize = 12;

    let (_dir, paths, mut stores) = temp_stores();
    for n in 0..ITEMS {
        add_document(&mut stores, "doc", &format!("Bob Jones wrote report {n} about Acme Corp."));
    }

    let pipeline = Arc::new(Pipeline::new(
        ScriptedProvider::new(0),
        RuleBasedExtractor::new(),
        pipeline_config(),
    ));
    let pool = WorkerPool::spawn(
        Arc::clone(&pipeline),
        &paths,
        PoolSettings {
            workers: 3,
            poll_interval: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(50),
        },
    )
    .unwrap();
    assert_eq!(pool.size(), 3);

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let stats = stores.relational.queue_stats().unwrap();
        if stats.completed == ITEMS {
            break;
        }
        assert!(Instant::now() < deadline, "queue not drained: {stats:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let report = pool.shutdown().await;
    assert_eq!(report.processed, ITEMS);
    assert_eq!(report.crashed, 0);
    assert!(stores.vectors.count().unwrap() >= ITEMS);
}
