use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;

use kb_service::{DatasetIndexer, Error, InsertDataRequest, Providers};
use kb_storage::{models::TrainingJob, vector::RetryPolicy};
use kb_testkit::{MemoryMetadataStore, MemoryVectorStore};

use super::{DATASET, StubEmbedding, TEAM, collection};

struct Fixture {
	vectors: Arc<MemoryVectorStore>,
	metadata: Arc<MemoryMetadataStore>,
	embedding: Arc<StubEmbedding>,
	indexer: DatasetIndexer,
}
impl Fixture {
	fn new() -> Self {
		let vectors = Arc::new(MemoryVectorStore::new());
		let metadata = Arc::new(MemoryMetadataStore::new());
		let embedding = StubEmbedding::new(vec![0.5, 0.5, 0.0]);
		let indexer = DatasetIndexer::new(
			vectors.clone(),
			metadata.clone(),
			Providers::new(embedding.clone(), None),
			RetryPolicy { max_retries: 2, delay: Duration::from_millis(1) },
		);

		metadata.add_collection(collection("c1", None, false));

		Self { vectors, metadata, embedding, indexer }
	}
}

fn request(q: &str, a: &str) -> InsertDataRequest {
	InsertDataRequest {
		team_id: TEAM.to_string(),
		dataset_id: DATASET.to_string(),
		collection_id: "c1".to_string(),
		q: q.to_string(),
		a: a.to_string(),
		model: String::new(),
		extra_indexes: vec!["vector search".to_string()],
	}
}

#[tokio::test]
async fn row_indexes_reference_the_inserted_vectors() {
	let fixture = Fixture::new();
	let response = fixture
		.indexer
		.insert_data(request("What is HNSW?", "A graph index."))
		.await
		.expect("Insert must succeed.");
	let rows = fixture.metadata.rows();

	assert_eq!(response.insert_ids.len(), 3);
	assert_eq!(response.tokens, 3);
	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0].id, response.data_id);

	let data_ids: Vec<&str> = rows[0].indexes.iter().map(|index| index.data_id.as_str()).collect();
	let kinds: Vec<&str> = rows[0].indexes.iter().map(|index| index.kind.as_str()).collect();

	assert_eq!(data_ids, response.insert_ids.iter().map(String::as_str).collect::<Vec<_>>());
	assert_eq!(kinds, vec!["question", "answer", "custom"]);
	assert!(response.insert_ids.iter().all(|id| fixture.vectors.contains(id)));
}

#[tokio::test]
async fn transient_vector_failures_are_retried() {
	let fixture = Fixture::new();

	fixture.vectors.fail_next_inserts(2);

	fixture.indexer.insert_data(request("q", "")).await.expect("Insert must succeed on retry.");

	assert_eq!(fixture.vectors.insert_attempts(), 3);
	assert_eq!(fixture.metadata.rows().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_write_no_row() {
	let fixture = Fixture::new();

	fixture.vectors.fail_next_inserts(3);

	let err = fixture.indexer.insert_data(request("q", "")).await.expect_err("Expected failure.");

	assert!(matches!(err, Error::Storage { .. }));
	assert!(fixture.metadata.rows().is_empty());
	assert!(fixture.vectors.is_empty());
}

#[tokio::test]
async fn unknown_collection_is_rejected_before_embedding() {
	let fixture = Fixture::new();
	let mut req = request("q", "a");

	req.collection_id = "missing".to_string();

	let err = fixture.indexer.insert_data(req).await.expect_err("Expected missing collection.");

	assert!(matches!(err, Error::NotFound { .. }));
	assert_eq!(fixture.embedding.calls(), 0);
}

#[tokio::test]
async fn delete_collection_cascades_to_rows_jobs_and_vectors() {
	let fixture = Fixture::new();

	fixture.indexer.insert_data(request("q1", "a1")).await.expect("Insert must succeed.");
	fixture.indexer.insert_data(request("q2", "a2")).await.expect("Insert must succeed.");
	fixture.metadata.add_training_job(TrainingJob {
		id: "job-1".to_string(),
		team_id: TEAM.to_string(),
		dataset_id: DATASET.to_string(),
		collection_id: "c1".to_string(),
		created_at: OffsetDateTime::now_utc(),
	});

	let existed = fixture
		.indexer
		.delete_collection(TEAM, DATASET, "c1")
		.await
		.expect("Delete must succeed.");

	assert!(existed);
	assert_eq!(fixture.metadata.row_count("c1"), 0);
	assert_eq!(fixture.metadata.training_count("c1"), 0);
	assert!(fixture.vectors.is_empty());

	let again = fixture
		.indexer
		.delete_collection(TEAM, DATASET, "c1")
		.await
		.expect("Repeated delete must succeed.");

	assert!(!again);
}
