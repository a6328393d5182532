mod service {
	mod audit;
	mod indexing;
	mod retrieval;

	use std::{
		collections::HashMap,
		sync::{
			Arc,
			atomic::{AtomicUsize, Ordering},
		},
	};

	use time::OffsetDateTime;

	use kb_service::{
		BoxFuture, EmbeddingOutput, EmbeddingProvider, Error, RerankDocument, RerankProvider,
		RerankScore, Result,
	};
	use kb_storage::models::{Collection, DataIndex, NewMetadataRow};

	pub const TEAM: &str = "team-1";
	pub const DATASET: &str = "dataset-1";

	/// Returns the same vector for every text and counts calls.
	pub struct StubEmbedding {
		pub vector: Vec<f32>,
		pub calls: AtomicUsize,
	}
	impl StubEmbedding {
		pub fn new(vector: Vec<f32>) -> Arc<Self> {
			Arc::new(Self { vector, calls: AtomicUsize::new(0) })
		}

		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl EmbeddingProvider for StubEmbedding {
		fn embed<'a>(
			&'a self,
			_model: &'a str,
			texts: &'a [String],
		) -> BoxFuture<'a, Result<EmbeddingOutput>> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let vectors = vec![self.vector.clone(); texts.len()];
			let token_len = texts.len() as u32;

			Box::pin(async move { Ok(EmbeddingOutput { vectors, token_len }) })
		}
	}

	pub struct FailingEmbedding;
	impl EmbeddingProvider for FailingEmbedding {
		fn embed<'a>(
			&'a self,
			_model: &'a str,
			_texts: &'a [String],
		) -> BoxFuture<'a, Result<EmbeddingOutput>> {
			Box::pin(async { Err(Error::Provider { message: "embedding offline".to_string() }) })
		}
	}

	/// Scores only the ids it was given; every other document is left unreturned.
	pub struct StubRerank {
		pub scores: HashMap<String, f32>,
		pub calls: AtomicUsize,
	}
	impl StubRerank {
		pub fn new(scores: &[(&str, f32)]) -> Arc<Self> {
			Arc::new(Self {
				scores: scores.iter().map(|(id, score)| (id.to_string(), *score)).collect(),
				calls: AtomicUsize::new(0),
			})
		}

		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl RerankProvider for StubRerank {
		fn rerank<'a>(
			&'a self,
			_query: &'a str,
			docs: &'a [RerankDocument],
		) -> BoxFuture<'a, Result<Vec<RerankScore>>> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let scores = docs
				.iter()
				.filter_map(|doc| {
					self.scores
						.get(&doc.id)
						.map(|score| RerankScore { id: doc.id.clone(), score: *score })
				})
				.collect();

			Box::pin(async move { Ok(scores) })
		}
	}

	pub struct FailingRerank;
	impl RerankProvider for FailingRerank {
		fn rerank<'a>(
			&'a self,
			_query: &'a str,
			_docs: &'a [RerankDocument],
		) -> BoxFuture<'a, Result<Vec<RerankScore>>> {
			Box::pin(async { Err(Error::Provider { message: "rerank timed out".to_string() }) })
		}
	}

	pub fn collection(id: &str, file_id: Option<&str>, forbid: bool) -> Collection {
		Collection {
			id: id.to_string(),
			team_id: TEAM.to_string(),
			dataset_id: DATASET.to_string(),
			name: format!("{id}.md"),
			file_id: file_id.map(str::to_string),
			raw_link: None,
			forbid,
			created_at: OffsetDateTime::UNIX_EPOCH,
			updated_at: OffsetDateTime::UNIX_EPOCH,
		}
	}

	pub fn row(
		id: &str,
		collection_id: &str,
		q: &str,
		vector_ids: &[&str],
		updated_at: OffsetDateTime,
	) -> NewMetadataRow {
		NewMetadataRow {
			id: id.to_string(),
			team_id: TEAM.to_string(),
			dataset_id: DATASET.to_string(),
			collection_id: collection_id.to_string(),
			q: q.to_string(),
			a: String::new(),
			indexes: vector_ids
				.iter()
				.map(|data_id| DataIndex {
					data_id: data_id.to_string(),
					kind: "question".to_string(),
					text: q.to_string(),
				})
				.collect(),
			full_text: q.to_lowercase(),
			updated_at,
		}
	}
}
