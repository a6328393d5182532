//! In-memory stand-ins for the storage traits.
//!
//! They follow the Postgres implementations closely enough for service tests: same filter
//! semantics, same half-open windows, same paging contract. Failure injection hooks let tests
//! drive the retry and per-item error paths.

use std::{
	collections::{BTreeSet, HashSet},
	sync::Mutex,
};

use time::OffsetDateTime;

use kb_storage::{
	BoxFuture, Error, Result,
	files::FileStore,
	metadata::{FullTextQuery, MetadataStore},
	models::{
		Collection, CollectionRef, EmbeddingRecallItem, FileBlob, FullTextHit, MetadataRow,
		NewMetadataRow, TimeWindow, TrainingJob, VectorDataItem,
	},
	vector::{
		DeleteFilter, InsertBatch, InsertResult, VectorCountScope, VectorQuery, VectorStoreDriver,
	},
};

#[derive(Default)]
pub struct MemoryVectorStore {
	state: Mutex<VectorState>,
}

#[derive(Default)]
struct VectorState {
	next_id: u64,
	points: Vec<(VectorDataItem, Vec<f32>)>,
	transient_insert_failures: u32,
	lose_next_delete: bool,
	insert_attempts: u32,
	recall_calls: u32,
}

impl MemoryVectorStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// The next `count` inserts fail with a transient error.
	pub fn fail_next_inserts(&self, count: u32) {
		self.lock().transient_insert_failures = count;
	}

	/// Another writer removes the targets of the next delete just before it runs.
	pub fn lose_next_delete(&self) {
		self.lock().lose_next_delete = true;
	}

	pub fn insert_attempts(&self) -> u32 {
		self.lock().insert_attempts
	}

	pub fn recall_calls(&self) -> u32 {
		self.lock().recall_calls
	}

	pub fn len(&self) -> usize {
		self.lock().points.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn contains(&self, id: &str) -> bool {
		self.lock().points.iter().any(|(item, _)| item.id == id)
	}

	/// Seeds one vector with an explicit creation time and returns its id.
	pub fn seed(
		&self,
		team_id: &str,
		dataset_id: &str,
		collection_id: &str,
		vector: Vec<f32>,
		created_at: OffsetDateTime,
	) -> String {
		let mut state = self.lock();

		state.push(team_id, dataset_id, collection_id, vector, created_at)
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, VectorState> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn insert_now(&self, batch: &InsertBatch) -> Result<InsertResult> {
		let mut state = self.lock();

		state.insert_attempts += 1;

		if state.transient_insert_failures > 0 {
			state.transient_insert_failures -= 1;

			return Err(Error::Unavailable("Injected vector store failure.".to_string()));
		}

		let created_at = OffsetDateTime::now_utc();
		let insert_ids = batch
			.vectors
			.iter()
			.map(|vector| {
				state.push(
					&batch.team_id,
					&batch.dataset_id,
					&batch.collection_id,
					vector.clone(),
					created_at,
				)
			})
			.collect();

		Ok(InsertResult { insert_ids })
	}

	fn recall_now(&self, query: &VectorQuery) -> Vec<EmbeddingRecallItem> {
		let mut state = self.lock();

		state.recall_calls += 1;

		if query.matches_nothing() {
			return Vec::new();
		}

		let mut hits: Vec<EmbeddingRecallItem> = state
			.points
			.iter()
			.filter(|(item, _)| {
				item.team_id == query.team_id
					&& query.dataset_ids.contains(&item.dataset_id)
					&& !query.forbid_collection_ids.contains(&item.collection_id)
					&& query
						.only_collection_ids
						.as_ref()
						.is_none_or(|only| only.contains(&item.collection_id))
			})
			.map(|(item, vector)| EmbeddingRecallItem {
				id: item.id.clone(),
				collection_id: item.collection_id.clone(),
				score: dot(vector, &query.vector),
			})
			.collect();

		hits.sort_by(|a, b| b.score.total_cmp(&a.score));
		hits.truncate(query.limit as usize);
		hits.retain(|hit| query.admits(hit.score));

		hits
	}
}
impl VectorState {
	fn push(
		&mut self,
		team_id: &str,
		dataset_id: &str,
		collection_id: &str,
		vector: Vec<f32>,
		created_at: OffsetDateTime,
	) -> String {
		self.next_id += 1;

		let id = format!("v{}", self.next_id);

		self.points.push((
			VectorDataItem {
				id: id.clone(),
				team_id: team_id.to_string(),
				dataset_id: dataset_id.to_string(),
				collection_id: collection_id.to_string(),
				created_at,
			},
			vector,
		));

		id
	}
}
impl VectorStoreDriver for MemoryVectorStore {
	fn backend(&self) -> &'static str {
		"memory"
	}

	fn init(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async { Ok(()) })
	}

	fn insert<'a>(&'a self, batch: &'a InsertBatch) -> BoxFuture<'a, Result<InsertResult>> {
		Box::pin(async move { self.insert_now(batch) })
	}

	fn emb_recall<'a>(
		&'a self,
		query: &'a VectorQuery,
	) -> BoxFuture<'a, Result<Vec<EmbeddingRecallItem>>> {
		Box::pin(async move { Ok(self.recall_now(query)) })
	}

	fn get_vector_count<'a>(&'a self, scope: &'a VectorCountScope) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let count = self
				.lock()
				.points
				.iter()
				.filter(|(item, _)| {
					item.team_id == scope.team_id
						&& scope.dataset_id.as_ref().is_none_or(|id| *id == item.dataset_id)
						&& scope.collection_id.as_ref().is_none_or(|id| *id == item.collection_id)
				})
				.count();

			Ok(count as u64)
		})
	}

	fn get_vector_data_by_time(
		&self,
		window: TimeWindow,
	) -> BoxFuture<'_, Result<Vec<VectorDataItem>>> {
		Box::pin(async move {
			Ok(self
				.lock()
				.points
				.iter()
				.filter(|(item, _)| window.contains(item.created_at))
				.map(|(item, _)| item.clone())
				.collect())
		})
	}

	fn delete<'a>(&'a self, filter: &'a DeleteFilter) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			filter.validate()?;

			let mut state = self.lock();

			if std::mem::take(&mut state.lose_next_delete) {
				state.points.retain(|(item, _)| !filter.matches(item));
			}

			let before = state.points.len();

			state.points.retain(|(item, _)| !filter.matches(item));

			Ok((before - state.points.len()) as u64)
		})
	}
}

#[derive(Default)]
pub struct MemoryMetadataStore {
	state: Mutex<MetadataState>,
}

#[derive(Default)]
struct MetadataState {
	collections: Vec<Collection>,
	rows: Vec<(MetadataRow, Vec<String>)>,
	training: Vec<TrainingJob>,
	failing_collections: HashSet<String>,
}

impl MemoryMetadataStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_collection(&self, collection: Collection) {
		self.lock().collections.push(collection);
	}

	pub fn add_row(&self, row: NewMetadataRow) {
		self.lock().rows.push(into_stored(row));
	}

	pub fn add_training_job(&self, job: TrainingJob) {
		self.lock().training.push(job);
	}

	/// Drops the collection record without touching its rows, as an interrupted cascade would.
	pub fn remove_collection_record(&self, collection_id: &str) {
		self.lock().collections.retain(|collection| collection.id != collection_id);
	}

	/// Existence checks for `collection_id` fail until cleared.
	pub fn fail_lookups_for(&self, collection_id: &str) {
		self.lock().failing_collections.insert(collection_id.to_string());
	}

	pub fn row_count(&self, collection_id: &str) -> usize {
		self.lock().rows.iter().filter(|(row, _)| row.collection_id == collection_id).count()
	}

	pub fn training_count(&self, collection_id: &str) -> usize {
		self.lock().training.iter().filter(|job| job.collection_id == collection_id).count()
	}

	pub fn rows(&self) -> Vec<MetadataRow> {
		self.lock().rows.iter().map(|(row, _)| row.clone()).collect()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, MetadataState> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn full_text_now(&self, query: &FullTextQuery) -> Vec<FullTextHit> {
		let state = self.lock();
		let terms: HashSet<&str> = query.terms.iter().map(String::as_str).collect();
		let mut hits: Vec<FullTextHit> = state
			.rows
			.iter()
			.filter(|(row, _)| {
				row.team_id == query.team_id
					&& query.dataset_ids.contains(&row.dataset_id)
					&& !query.forbid_collection_ids.contains(&row.collection_id)
					&& query
						.only_collection_ids
						.as_ref()
						.is_none_or(|only| only.contains(&row.collection_id))
			})
			.filter_map(|(row, tokens)| {
				let matched = tokens.iter().filter(|token| terms.contains(token.as_str())).count();

				(matched > 0).then(|| FullTextHit { row: row.clone(), score: matched as f32 })
			})
			.collect();

		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.row.id.cmp(&b.row.id)));
		hits.truncate(query.limit as usize);

		hits
	}

	fn touched_now(
		&self,
		window: TimeWindow,
		after: Option<&CollectionRef>,
		limit: u32,
	) -> Vec<CollectionRef> {
		let state = self.lock();
		let mut seen = BTreeSet::new();

		for (row, _) in &state.rows {
			if window.contains(row.updated_at) {
				seen.insert((
					row.team_id.clone(),
					row.collection_id.clone(),
					row.dataset_id.clone(),
				));
			}
		}

		seen.into_iter()
			.filter(|(team_id, collection_id, _)| match after {
				Some(after) =>
					(team_id.as_str(), collection_id.as_str())
						> (after.team_id.as_str(), after.collection_id.as_str()),
				None => true,
			})
			.take(limit as usize)
			.map(|(team_id, collection_id, dataset_id)| CollectionRef {
				team_id,
				dataset_id,
				collection_id,
			})
			.collect()
	}
}
impl MetadataStore for MemoryMetadataStore {
	fn collection_exists<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let state = self.lock();

			if state.failing_collections.contains(collection_id) {
				return Err(Error::Unavailable(format!(
					"Injected lookup failure for {collection_id}."
				)));
			}

			Ok(state
				.collections
				.iter()
				.any(|collection| collection.team_id == team_id && collection.id == collection_id))
		})
	}

	fn data_index_exists<'a>(
		&'a self,
		team_id: &'a str,
		dataset_id: &'a str,
		data_id: &'a str,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			Ok(self.lock().rows.iter().any(|(row, _)| {
				row.team_id == team_id
					&& row.dataset_id == dataset_id
					&& row.indexes.iter().any(|index| index.data_id == data_id)
			}))
		})
	}

	fn rows_by_index_ids<'a>(
		&'a self,
		team_id: &'a str,
		data_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<MetadataRow>>> {
		Box::pin(async move {
			Ok(self
				.lock()
				.rows
				.iter()
				.filter(|(row, _)| {
					row.team_id == team_id
						&& row.indexes.iter().any(|index| data_ids.contains(&index.data_id))
				})
				.map(|(row, _)| row.clone())
				.collect())
		})
	}

	fn collections_by_ids<'a>(
		&'a self,
		team_id: &'a str,
		collection_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Collection>>> {
		Box::pin(async move {
			Ok(self
				.lock()
				.collections
				.iter()
				.filter(|collection| {
					collection.team_id == team_id && collection_ids.contains(&collection.id)
				})
				.cloned()
				.collect())
		})
	}

	fn forbidden_collections<'a>(
		&'a self,
		team_id: &'a str,
		dataset_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(async move {
			Ok(self
				.lock()
				.collections
				.iter()
				.filter(|collection| {
					collection.team_id == team_id
						&& collection.forbid
						&& dataset_ids.contains(&collection.dataset_id)
				})
				.map(|collection| collection.id.clone())
				.collect())
		})
	}

	fn full_text_search<'a>(
		&'a self,
		query: &'a FullTextQuery,
	) -> BoxFuture<'a, Result<Vec<FullTextHit>>> {
		Box::pin(async move { Ok(self.full_text_now(query)) })
	}

	fn collections_touched<'a>(
		&'a self,
		window: TimeWindow,
		after: Option<&'a CollectionRef>,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<CollectionRef>>> {
		Box::pin(async move { Ok(self.touched_now(window, after, limit)) })
	}

	fn delete_collection_rows<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let mut state = self.lock();
			let before = state.rows.len();

			state
				.rows
				.retain(|(row, _)| !(row.team_id == team_id && row.collection_id == collection_id));

			Ok((before - state.rows.len()) as u64)
		})
	}

	fn delete_training_jobs<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let mut state = self.lock();
			let before = state.training.len();

			state
				.training
				.retain(|job| !(job.team_id == team_id && job.collection_id == collection_id));

			Ok((before - state.training.len()) as u64)
		})
	}

	fn file_referenced<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			Ok(self
				.lock()
				.collections
				.iter()
				.any(|collection| collection.file_id.as_deref() == Some(file_id)))
		})
	}

	fn insert_collection<'a>(&'a self, collection: &'a Collection) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut state = self.lock();

			if state.collections.iter().any(|existing| existing.id == collection.id) {
				return Err(Error::InvalidArgument(format!(
					"Collection {} already exists.",
					collection.id
				)));
			}

			state.collections.push(collection.clone());

			Ok(())
		})
	}

	fn insert_row<'a>(&'a self, row: &'a NewMetadataRow) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.lock().rows.push(into_stored(row.clone()));

			Ok(())
		})
	}

	fn delete_collection<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut state = self.lock();
			let before = state.collections.len();

			state
				.collections
				.retain(|collection| {
					!(collection.team_id == team_id && collection.id == collection_id)
				});

			Ok(state.collections.len() < before)
		})
	}
}

#[derive(Default)]
pub struct MemoryFileStore {
	blobs: Mutex<Vec<FileBlob>>,
}
impl MemoryFileStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn contains(&self, file_id: &str) -> bool {
		self.lock().iter().any(|blob| blob.id == file_id)
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FileBlob>> {
		self.blobs.lock().unwrap_or_else(|err| err.into_inner())
	}
}
impl FileStore for MemoryFileStore {
	fn list_in_window<'a>(
		&'a self,
		bucket: &'a str,
		window: TimeWindow,
		after: Option<&'a str>,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<FileBlob>>> {
		Box::pin(async move {
			let mut blobs: Vec<FileBlob> = self
				.lock()
				.iter()
				.filter(|blob| {
					blob.bucket == bucket
						&& window.contains(blob.uploaded_at)
						&& after.is_none_or(|after| blob.id.as_str() > after)
				})
				.cloned()
				.collect();

			blobs.sort_by(|a, b| a.id.cmp(&b.id));
			blobs.truncate(limit as usize);

			Ok(blobs)
		})
	}

	fn delete<'a>(&'a self, bucket: &'a str, file_id: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut blobs = self.lock();
			let before = blobs.len();

			blobs.retain(|blob| !(blob.bucket == bucket && blob.id == file_id));

			Ok(blobs.len() < before)
		})
	}

	fn put<'a>(&'a self, blob: &'a FileBlob) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.lock().push(blob.clone());

			Ok(())
		})
	}
}

fn into_stored(row: NewMetadataRow) -> (MetadataRow, Vec<String>) {
	let tokens = row.full_text.split_whitespace().map(str::to_string).collect();

	(
		MetadataRow {
			id: row.id,
			team_id: row.team_id,
			dataset_id: row.dataset_id,
			collection_id: row.collection_id,
			q: row.q,
			a: row.a,
			indexes: row.indexes,
			updated_at: row.updated_at,
		},
		tokens,
	)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
	a.iter().zip(b).map(|(x, y)| x * y).sum()
}
