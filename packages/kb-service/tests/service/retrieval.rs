use std::sync::Arc;

use time::OffsetDateTime;

use kb_service::{
	EmbeddingProvider, Error, HybridRetriever, Providers, RerankProvider, SearchRequest,
};
use kb_testkit::{MemoryMetadataStore, MemoryVectorStore};

use super::{
	DATASET, FailingEmbedding, FailingRerank, StubEmbedding, StubRerank, TEAM, collection, row,
};

struct Fixture {
	vectors: Arc<MemoryVectorStore>,
	metadata: Arc<MemoryMetadataStore>,
}
impl Fixture {
	/// c1 holds r1..r3 plus r6 (same text as r1) and the vector-less r4; c2 is forbidden.
	fn seeded() -> Self {
		let vectors = Arc::new(MemoryVectorStore::new());
		let metadata = Arc::new(MemoryMetadataStore::new());
		let at = OffsetDateTime::UNIX_EPOCH;

		metadata.add_collection(collection("c1", Some("f1"), false));
		metadata.add_collection(collection("c2", None, true));

		for (row_id, collection_id, q, score) in [
			("r1", "c1", "alpha one", 0.9),
			("r2", "c1", "alpha two", 0.8),
			("r3", "c1", "alpha three", 0.7),
			("r5", "c2", "alpha five", 0.95),
			("r6", "c1", "alpha one", 0.85),
		] {
			let id = vectors.seed(TEAM, DATASET, collection_id, vec![score, 0.0, 0.0, 0.0], at);

			metadata.add_row(row(row_id, collection_id, q, &[&id], at));
		}

		metadata.add_row(row("r4", "c1", "alpha four", &[], at));

		Self { vectors, metadata }
	}

	fn retriever(
		&self,
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Option<Arc<dyn RerankProvider>>,
	) -> HybridRetriever {
		HybridRetriever::new(
			self.vectors.clone(),
			self.metadata.clone(),
			Providers::new(embedding, rerank),
			kb_config::Search::default(),
		)
	}
}

fn request(limit: u32, use_rerank: bool) -> SearchRequest {
	SearchRequest {
		team_id: TEAM.to_string(),
		query: "Alpha".to_string(),
		model: String::new(),
		dataset_ids: vec![DATASET.to_string()],
		limit,
		similarity_floor: 0.0,
		use_rerank,
		forbid_collection_ids: Vec::new(),
		collection_ids: None,
	}
}

fn ids(items: &[kb_service::RetrievalCandidate]) -> Vec<&str> {
	items.iter().map(|item| item.id.as_str()).collect()
}

#[tokio::test]
async fn without_rerank_only_embedding_recall_contributes() {
	let fixture = Fixture::seeded();
	let rerank = StubRerank::new(&[("r4", 0.99)]);
	let retriever = fixture.retriever(
		StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]),
		Some(rerank.clone() as Arc<dyn RerankProvider>),
	);
	let response = retriever.search(request(10, false)).await.expect("Search must succeed.");

	assert_eq!(ids(&response.items), vec!["r1", "r2", "r3"]);
	assert!(!response.used_rerank);
	assert!(!response.rerank_degraded);
	assert_eq!(rerank.calls(), 0);
	assert_eq!(response.embedding_tokens, 1);
	assert_eq!(response.items[0].source_name, "c1.md");
	assert_eq!(response.items[0].source_id.as_deref(), Some("f1"));
}

#[tokio::test]
async fn output_is_bounded_by_limit() {
	let fixture = Fixture::seeded();
	let retriever = fixture.retriever(StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]), None);
	let response = retriever.search(request(1, false)).await.expect("Search must succeed.");

	assert_eq!(ids(&response.items), vec!["r1"]);
	assert_eq!(response.limit, 1);
}

#[tokio::test]
async fn rerank_merges_full_text_and_filters_the_floor() {
	let fixture = Fixture::seeded();
	let retriever = fixture.retriever(
		StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]),
		Some(StubRerank::new(&[("r4", 0.9), ("r1", 0.6), ("r2", 0.2)]) as Arc<dyn RerankProvider>),
	);
	let mut req = request(10, true);

	req.similarity_floor = 0.3;

	let response = retriever.search(req).await.expect("Search must succeed.");

	// r3 was never scored by the reranker, so it follows the reranked items.
	assert_eq!(ids(&response.items), vec!["r4", "r1", "r3"]);
	assert!(response.used_rerank);
	assert_eq!(response.items[0].score, 0.9);
}

#[tokio::test]
async fn rerank_failure_degrades_to_recall_order() {
	let fixture = Fixture::seeded();
	let retriever = fixture.retriever(
		StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]),
		Some(Arc::new(FailingRerank) as Arc<dyn RerankProvider>),
	);
	let response = retriever.search(request(3, true)).await.expect("Search must not fail.");

	assert_eq!(ids(&response.items), vec!["r1", "r2", "r3"]);
	assert!(response.rerank_degraded);
	assert!(!response.used_rerank);
}

#[tokio::test]
async fn floor_applies_to_native_scores_without_rerank() {
	let fixture = Fixture::seeded();
	let retriever = fixture.retriever(StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]), None);
	let mut req = request(10, false);

	req.similarity_floor = 0.8;

	let response = retriever.search(req).await.expect("Search must succeed.");

	assert_eq!(ids(&response.items), vec!["r1", "r2"]);
	assert!(response.items.iter().all(|item| item.score >= 0.8));
}

#[tokio::test]
async fn zero_floor_still_drops_negative_scores_without_rerank() {
	let fixture = Fixture::seeded();
	let retriever = fixture.retriever(StubEmbedding::new(vec![-1.0, 0.0, 0.0, 0.0]), None);
	let response = retriever.search(request(10, false)).await.expect("Search must succeed.");

	assert!(response.items.is_empty());

	let mut req = request(10, false);

	req.similarity_floor = -0.75;

	let response = retriever.search(req).await.expect("Search must succeed.");

	assert_eq!(ids(&response.items), vec!["r3"]);
}

#[tokio::test]
async fn collection_allow_list_restricts_both_recall_paths() {
	let fixture = Fixture::seeded();
	let at = OffsetDateTime::UNIX_EPOCH;
	let id = fixture.vectors.seed(TEAM, DATASET, "c3", vec![0.5, 0.0, 0.0, 0.0], at);

	fixture.metadata.add_collection(collection("c3", None, false));
	fixture.metadata.add_row(row("r7", "c3", "alpha seven", &[&id], at));

	let retriever = fixture.retriever(StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]), None);
	let mut req = request(10, false);

	req.collection_ids = Some(vec!["c3".to_string()]);

	let response = retriever.search(req).await.expect("Search must succeed.");

	assert_eq!(ids(&response.items), vec!["r7"]);

	// r4 only reaches the pool through lexical recall.
	let retriever = fixture.retriever(
		StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]),
		Some(StubRerank::new(&[("r4", 0.9), ("r7", 0.5)]) as Arc<dyn RerankProvider>),
	);
	let mut req = request(10, true);

	req.collection_ids = Some(vec!["c3".to_string()]);

	let response = retriever.search(req).await.expect("Search must succeed.");

	assert_eq!(ids(&response.items), vec!["r7"]);
	assert!(response.used_rerank);
}

#[tokio::test]
async fn empty_collection_allow_list_returns_nothing() {
	let fixture = Fixture::seeded();
	let embedding = StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]);
	let retriever = fixture.retriever(embedding.clone(), None);
	let mut req = request(10, false);

	req.collection_ids = Some(Vec::new());

	let response = retriever.search(req).await.expect("Search must succeed.");

	assert!(response.items.is_empty());
	assert_eq!(embedding.calls(), 0);
	assert_eq!(fixture.vectors.recall_calls(), 0);
}

#[tokio::test]
async fn caller_forbid_list_is_extended_with_forbidden_collections() {
	let fixture = Fixture::seeded();
	let retriever = fixture.retriever(StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]), None);
	let mut req = request(10, false);

	req.forbid_collection_ids = vec!["c1".to_string()];

	let response = retriever.search(req).await.expect("Search must succeed.");

	assert!(response.items.is_empty());
}

#[tokio::test]
async fn rows_of_missing_collections_are_skipped() {
	let fixture = Fixture::seeded();
	let at = OffsetDateTime::UNIX_EPOCH;
	let id = fixture.vectors.seed(TEAM, DATASET, "c9", vec![0.99, 0.0, 0.0, 0.0], at);

	fixture.metadata.add_row(row("r9", "c9", "alpha nine", &[&id], at));

	let retriever = fixture.retriever(StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]), None);
	let response = retriever.search(request(10, false)).await.expect("Search must succeed.");

	assert_eq!(ids(&response.items), vec!["r1", "r2", "r3"]);
}

#[tokio::test]
async fn empty_scope_skips_provider_calls() {
	let fixture = Fixture::seeded();
	let embedding = StubEmbedding::new(vec![1.0, 0.0, 0.0, 0.0]);
	let retriever = fixture.retriever(embedding.clone(), None);
	let mut req = request(10, false);

	req.dataset_ids.clear();

	let empty_scope = retriever.search(req).await.expect("Search must succeed.");
	let mut req = request(10, false);

	req.query = "   ".to_string();

	let blank_query = retriever.search(req).await.expect("Search must succeed.");

	assert!(empty_scope.items.is_empty());
	assert!(blank_query.items.is_empty());
	assert_eq!(embedding.calls(), 0);
	assert_eq!(fixture.vectors.recall_calls(), 0);
}

#[tokio::test]
async fn embedding_failure_is_a_hard_error() {
	let fixture = Fixture::seeded();
	let retriever = fixture.retriever(Arc::new(FailingEmbedding), None);
	let err = retriever.search(request(10, false)).await.expect_err("Expected embedding failure.");

	assert!(matches!(err, Error::Provider { .. }));
}
