//! Backend-agnostic vector storage.
//!
//! Every backend implements [`VectorStoreDriver`]. The process picks one at startup through
//! [`connect`] and hands the resulting trait object to the retriever, the auditor and the indexer.

pub mod pg;
pub mod qdrant;

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;

use crate::{
	BoxFuture, Error, Result,
	db::Db,
	models::{EmbeddingRecallItem, TimeWindow, VectorDataItem},
};

pub trait VectorStoreDriver
where
	Self: Send + Sync,
{
	fn backend(&self) -> &'static str;

	/// Creates indexes or collections when absent. Idempotent.
	fn init(&self) -> BoxFuture<'_, Result<()>>;

	/// Writes the whole batch or nothing. Ids come back in input order.
	fn insert<'a>(&'a self, batch: &'a InsertBatch) -> BoxFuture<'a, Result<InsertResult>>;

	fn emb_recall<'a>(
		&'a self,
		query: &'a VectorQuery,
	) -> BoxFuture<'a, Result<Vec<EmbeddingRecallItem>>>;

	fn get_vector_count<'a>(&'a self, scope: &'a VectorCountScope) -> BoxFuture<'a, Result<u64>>;

	/// Vectors created inside `window`, fetched page by page.
	fn get_vector_data_by_time(
		&self,
		window: TimeWindow,
	) -> BoxFuture<'_, Result<Vec<VectorDataItem>>>;

	/// Removes the matching vectors and returns how many were actually deleted.
	fn delete<'a>(&'a self, filter: &'a DeleteFilter) -> BoxFuture<'a, Result<u64>>;
}

#[derive(Clone, Debug)]
pub struct InsertBatch {
	pub team_id: String,
	pub dataset_id: String,
	pub collection_id: String,
	pub vectors: Vec<Vec<f32>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InsertResult {
	pub insert_ids: Vec<String>,
}

/// Typed nearest-neighbour request. Drivers lower it into bound parameters or native filters.
#[derive(Clone, Debug)]
pub struct VectorQuery {
	pub team_id: String,
	pub dataset_ids: Vec<String>,
	pub vector: Vec<f32>,
	pub limit: u32,
	pub similarity_floor: Option<f32>,
	pub forbid_collection_ids: Vec<String>,
	/// Restricts recall to these collections. `Some(vec![])` matches nothing.
	pub only_collection_ids: Option<Vec<String>>,
	pub ef_search: u32,
}
impl VectorQuery {
	pub fn new(team_id: impl Into<String>, dataset_ids: Vec<String>, vector: Vec<f32>) -> Self {
		Self {
			team_id: team_id.into(),
			dataset_ids,
			vector,
			limit: 10,
			similarity_floor: None,
			forbid_collection_ids: Vec::new(),
			only_collection_ids: None,
			ef_search: 100,
		}
	}

	pub fn limit(mut self, limit: u32) -> Self {
		self.limit = limit;

		self
	}

	pub fn similarity_floor(mut self, floor: Option<f32>) -> Self {
		self.similarity_floor = floor;

		self
	}

	pub fn forbid(mut self, collection_ids: Vec<String>) -> Self {
		self.forbid_collection_ids = collection_ids;

		self
	}

	pub fn only(mut self, collection_ids: Vec<String>) -> Self {
		self.only_collection_ids = Some(collection_ids);

		self
	}

	pub fn ef_search(mut self, ef_search: u32) -> Self {
		self.ef_search = ef_search;

		self
	}

	/// True when the query cannot match anything and the backend call can be skipped.
	pub fn matches_nothing(&self) -> bool {
		self.limit == 0
			|| self.dataset_ids.is_empty()
			|| self.only_collection_ids.as_ref().is_some_and(Vec::is_empty)
	}

	pub fn admits(&self, score: f32) -> bool {
		self.similarity_floor.is_none_or(|floor| score >= floor)
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VectorCountScope {
	pub team_id: String,
	pub dataset_id: Option<String>,
	pub collection_id: Option<String>,
}
impl VectorCountScope {
	pub fn team(team_id: impl Into<String>) -> Self {
		Self { team_id: team_id.into(), dataset_id: None, collection_id: None }
	}

	pub fn collection(
		team_id: impl Into<String>,
		dataset_id: impl Into<String>,
		collection_id: impl Into<String>,
	) -> Self {
		Self {
			team_id: team_id.into(),
			dataset_id: Some(dataset_id.into()),
			collection_id: Some(collection_id.into()),
		}
	}

	pub fn dataset(mut self, dataset_id: impl Into<String>) -> Self {
		self.dataset_id = Some(dataset_id.into());

		self
	}
}

/// Delete scope. Every non-empty field narrows the match; at least one besides `team_id` is
/// required.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteFilter {
	pub team_id: String,
	pub dataset_ids: Vec<String>,
	pub collection_ids: Vec<String>,
	pub id: Option<String>,
	pub id_list: Vec<String>,
}
impl DeleteFilter {
	pub fn team(team_id: impl Into<String>) -> Self {
		Self { team_id: team_id.into(), ..Default::default() }
	}

	pub fn datasets(mut self, dataset_ids: Vec<String>) -> Self {
		self.dataset_ids = dataset_ids;

		self
	}

	pub fn collections(mut self, collection_ids: Vec<String>) -> Self {
		self.collection_ids = collection_ids;

		self
	}

	pub fn id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());

		self
	}

	pub fn ids(mut self, ids: Vec<String>) -> Self {
		self.id_list = ids;

		self
	}

	pub fn validate(&self) -> Result<()> {
		if self.team_id.trim().is_empty() {
			return Err(Error::InvalidArgument("Vector delete requires a team id.".to_string()));
		}

		let scoped = !self.dataset_ids.is_empty()
			|| !self.collection_ids.is_empty()
			|| self.id.as_deref().is_some_and(|id| !id.is_empty())
			|| !self.id_list.is_empty();

		if !scoped {
			return Err(Error::InvalidArgument(
				"Vector delete requires dataset ids, collection ids, or vector ids.".to_string(),
			));
		}

		Ok(())
	}

	/// Union of `id` and `id_list`, or `None` when neither is set.
	pub fn vector_ids(&self) -> Option<Vec<String>> {
		let mut ids = self.id_list.clone();

		if let Some(id) = self.id.as_ref().filter(|id| !id.is_empty()) {
			if !self.id_list.is_empty() {
				// Both set: AND semantics means only `id` can match, and only if it is listed.
				return Some(if self.id_list.contains(id) { vec![id.clone()] } else { Vec::new() });
			}

			ids.push(id.clone());
		}

		if ids.is_empty() { None } else { Some(ids) }
	}

	pub fn matches(&self, item: &VectorDataItem) -> bool {
		if item.team_id != self.team_id {
			return false;
		}
		if !self.dataset_ids.is_empty() && !self.dataset_ids.contains(&item.dataset_id) {
			return false;
		}
		if !self.collection_ids.is_empty() && !self.collection_ids.contains(&item.collection_id) {
			return false;
		}

		match self.vector_ids() {
			Some(ids) => ids.contains(&item.id),
			None => true,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub delay: Duration,
}
impl RetryPolicy {
	pub fn from_config(cfg: &kb_config::InsertRetry) -> Self {
		Self { max_retries: cfg.max_retries, delay: Duration::from_millis(cfg.delay_ms) }
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_retries: 2, delay: Duration::from_millis(500) }
	}
}

/// Inserts `batch`, retrying transient failures with a fixed delay.
pub async fn insert_with_retry(
	driver: &dyn VectorStoreDriver,
	batch: &InsertBatch,
	policy: RetryPolicy,
) -> Result<InsertResult> {
	let mut attempt = 0_u32;

	loop {
		match driver.insert(batch).await {
			Ok(result) => return Ok(result),
			Err(err) if err.is_transient() && attempt < policy.max_retries => {
				attempt += 1;

				tracing::warn!(
					error = %err,
					backend = driver.backend(),
					collection_id = %batch.collection_id,
					attempt,
					"Vector insert failed. Retrying."
				);

				tokio::time::sleep(policy.delay).await;
			},
			Err(err) => return Err(err),
		}
	}
}

pub async fn connect(
	cfg: &kb_config::VectorStore,
	db: &Db,
) -> Result<Arc<dyn VectorStoreDriver>> {
	let driver: Arc<dyn VectorStoreDriver> = match cfg.backend {
		kb_config::VectorBackend::Pgvector =>
			Arc::new(pg::PgVectorStore::new(db.pool.clone(), cfg.vector_dim, cfg.scan_page_size)),
		kb_config::VectorBackend::Qdrant => {
			let qdrant = cfg.qdrant.as_ref().ok_or_else(|| {
				Error::InvalidArgument(
					"Qdrant backend selected without a qdrant section.".to_string(),
				)
			})?;

			Arc::new(qdrant::QdrantVectorStore::new(qdrant, cfg.vector_dim, cfg.scan_page_size)?)
		},
	};

	driver.init().await?;

	tracing::info!(backend = driver.backend(), vector_dim = cfg.vector_dim, "Vector store ready.");

	Ok(driver)
}

pub(crate) fn format_vector_text(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8);

	out.push('[');

	for (i, value) in vec.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}

pub(crate) fn now_utc() -> OffsetDateTime {
	OffsetDateTime::now_utc()
}
