use std::collections::HashMap;

use qdrant_client::{
	Payload, Qdrant,
	qdrant::{
		Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
		DatetimeRange, DeletePointsBuilder, Distance, FieldType, Filter, PointId, PointStruct,
		Query, QueryPointsBuilder, ScrollPointsBuilder, SearchParamsBuilder, Timestamp,
		UpsertPointsBuilder, Value, VectorParamsBuilder, point_id::PointIdOptions, value::Kind,
	},
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::{
	BoxFuture, Error, Result,
	models::{EmbeddingRecallItem, TimeWindow, VectorDataItem},
	vector::{
		DeleteFilter, InsertBatch, InsertResult, VectorCountScope, VectorQuery, VectorStoreDriver,
		now_utc,
	},
};

const KEYWORD_FIELDS: [&str; 3] = ["team_id", "dataset_id", "collection_id"];
const CREATED_AT_FIELD: &str = "created_at";

pub struct QdrantVectorStore {
	client: Qdrant,
	collection: String,
	vector_dim: u32,
	page_size: u32,
}
impl QdrantVectorStore {
	pub fn new(cfg: &kb_config::Qdrant, vector_dim: u32, page_size: u32) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url).build()?;

		Ok(Self {
			client,
			collection: cfg.collection.clone(),
			vector_dim,
			page_size: page_size.max(1),
		})
	}

	async fn ensure_collection(&self) -> Result<()> {
		if !self.client.collection_exists(self.collection.as_str()).await? {
			self.client
				.create_collection(
					CreateCollectionBuilder::new(self.collection.clone()).vectors_config(
						VectorParamsBuilder::new(u64::from(self.vector_dim), Distance::Dot),
					),
				)
				.await?;

			tracing::info!(collection = %self.collection, "Created Qdrant collection.");
		}

		// Re-creating an existing payload index is accepted by Qdrant.
		for field in KEYWORD_FIELDS {
			self.client
				.create_field_index(
					CreateFieldIndexCollectionBuilder::new(
						self.collection.clone(),
						field,
						FieldType::Keyword,
					)
					.wait(true),
				)
				.await?;
		}

		self.client
			.create_field_index(
				CreateFieldIndexCollectionBuilder::new(
					self.collection.clone(),
					CREATED_AT_FIELD,
					FieldType::Datetime,
				)
				.wait(true),
			)
			.await?;

		Ok(())
	}

	async fn upsert_batch(&self, batch: &InsertBatch) -> Result<InsertResult> {
		if batch.vectors.is_empty() {
			return Ok(InsertResult::default());
		}

		let created_at = now_utc()
			.format(&Rfc3339)
			.map_err(|err| Error::InvalidArgument(format!("Failed to format timestamp: {err}.")))?;
		let mut insert_ids = Vec::with_capacity(batch.vectors.len());
		let mut points = Vec::with_capacity(batch.vectors.len());

		for vector in &batch.vectors {
			if vector.len() != self.vector_dim as usize {
				return Err(Error::InvalidArgument(format!(
					"Vector dimension mismatch. Expected {}, got {}.",
					self.vector_dim,
					vector.len()
				)));
			}

			let id = Uuid::new_v4().to_string();
			let mut payload = Payload::new();

			payload.insert("team_id", batch.team_id.clone());
			payload.insert("dataset_id", batch.dataset_id.clone());
			payload.insert("collection_id", batch.collection_id.clone());
			payload.insert(CREATED_AT_FIELD, created_at.clone());

			points.push(PointStruct::new(id.clone(), vector.clone(), payload));
			insert_ids.push(id);
		}

		self.client
			.upsert_points(UpsertPointsBuilder::new(self.collection.clone(), points).wait(true))
			.await?;

		Ok(InsertResult { insert_ids })
	}

	async fn recall(&self, query: &VectorQuery) -> Result<Vec<EmbeddingRecallItem>> {
		if query.matches_nothing() {
			return Ok(Vec::new());
		}

		let mut search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(query.vector.clone()))
			.filter(recall_filter(query))
			.limit(u64::from(query.limit))
			.with_payload(true)
			.params(SearchParamsBuilder::default().hnsw_ef(u64::from(query.ef_search)));

		if let Some(floor) = query.similarity_floor {
			search = search.score_threshold(floor);
		}

		let response = self.client.query(search).await?;
		let mut out = Vec::with_capacity(response.result.len());

		for point in response.result {
			let Some(id) = point.id.as_ref().and_then(point_id_string) else {
				tracing::warn!("Qdrant hit has no usable point id.");

				continue;
			};
			let collection_id = payload_string(&point.payload, "collection_id").unwrap_or_default();

			out.push(EmbeddingRecallItem { id, collection_id, score: point.score });
		}

		Ok(out)
	}

	async fn count(&self, scope: &VectorCountScope) -> Result<u64> {
		let mut must = vec![Condition::matches("team_id", scope.team_id.clone())];

		if let Some(dataset_id) = scope.dataset_id.as_ref() {
			must.push(Condition::matches("dataset_id", dataset_id.clone()));
		}
		if let Some(collection_id) = scope.collection_id.as_ref() {
			must.push(Condition::matches("collection_id", collection_id.clone()));
		}

		let response = self
			.client
			.count(
				CountPointsBuilder::new(self.collection.clone())
					.filter(Filter::must(must))
					.exact(true),
			)
			.await?;

		Ok(response.result.map(|result| result.count).unwrap_or(0))
	}

	async fn scan_window(&self, window: TimeWindow) -> Result<Vec<VectorDataItem>> {
		let mut out = Vec::new();

		if window.is_empty() {
			return Ok(out);
		}

		let filter = Filter::must([Condition::datetime_range(
			CREATED_AT_FIELD,
			DatetimeRange {
				gte: Some(timestamp(window.start)),
				lt: Some(timestamp(window.end)),
				gt: None,
				lte: None,
			},
		)]);
		let mut offset: Option<PointId> = None;

		loop {
			let mut scroll = ScrollPointsBuilder::new(self.collection.clone())
				.filter(filter.clone())
				.limit(self.page_size)
				.with_payload(true)
				.with_vectors(false);

			if let Some(offset) = offset.take() {
				scroll = scroll.offset(offset);
			}

			let response = self.client.scroll(scroll).await?;

			for point in response.result {
				match scanned_item(point.id.as_ref(), &point.payload) {
					Some(item) if window.contains(item.created_at) => out.push(item),
					Some(_) => {},
					None => tracing::warn!(
						collection = %self.collection,
						"Skipping Qdrant point with incomplete payload."
					),
				}
			}

			match response.next_page_offset {
				Some(next) => offset = Some(next),
				None => break,
			}
		}

		Ok(out)
	}

	async fn delete_matching(&self, filter: &DeleteFilter) -> Result<u64> {
		filter.validate()?;

		let ids = filter.vector_ids();

		if ids.as_ref().is_some_and(Vec::is_empty) {
			return Ok(0);
		}

		let mut must = vec![Condition::matches("team_id", filter.team_id.clone())];

		if !filter.dataset_ids.is_empty() {
			must.push(Condition::matches("dataset_id", filter.dataset_ids.clone()));
		}
		if !filter.collection_ids.is_empty() {
			must.push(Condition::matches("collection_id", filter.collection_ids.clone()));
		}
		if let Some(ids) = ids {
			must.push(Condition::has_id(ids.into_iter().map(PointId::from)));
		}

		let filter = Filter::must(must);
		// Qdrant does not report how many points a filtered delete removed.
		let matched = self
			.client
			.count(
				CountPointsBuilder::new(self.collection.clone()).filter(filter.clone()).exact(true),
			)
			.await?
			.result
			.map(|result| result.count)
			.unwrap_or(0);

		if matched == 0 {
			return Ok(0);
		}

		self.client
			.delete_points(
				DeletePointsBuilder::new(self.collection.clone()).points(filter).wait(true),
			)
			.await?;

		Ok(matched)
	}
}
impl VectorStoreDriver for QdrantVectorStore {
	fn backend(&self) -> &'static str {
		"qdrant"
	}

	fn init(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(self.ensure_collection())
	}

	fn insert<'a>(&'a self, batch: &'a InsertBatch) -> BoxFuture<'a, Result<InsertResult>> {
		Box::pin(self.upsert_batch(batch))
	}

	fn emb_recall<'a>(
		&'a self,
		query: &'a VectorQuery,
	) -> BoxFuture<'a, Result<Vec<EmbeddingRecallItem>>> {
		Box::pin(self.recall(query))
	}

	fn get_vector_count<'a>(&'a self, scope: &'a VectorCountScope) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.count(scope))
	}

	fn get_vector_data_by_time(
		&self,
		window: TimeWindow,
	) -> BoxFuture<'_, Result<Vec<VectorDataItem>>> {
		Box::pin(self.scan_window(window))
	}

	fn delete<'a>(&'a self, filter: &'a DeleteFilter) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.delete_matching(filter))
	}
}

fn recall_filter(query: &VectorQuery) -> Filter {
	let mut must = vec![
		Condition::matches("team_id", query.team_id.clone()),
		Condition::matches("dataset_id", query.dataset_ids.clone()),
	];
	let mut must_not = Vec::new();

	if let Some(only) = query.only_collection_ids.as_ref() {
		must.push(Condition::matches("collection_id", only.clone()));
	}
	if !query.forbid_collection_ids.is_empty() {
		must_not.push(Condition::matches("collection_id", query.forbid_collection_ids.clone()));
	}

	Filter { must, must_not, ..Default::default() }
}

fn timestamp(ts: OffsetDateTime) -> Timestamp {
	Timestamp { seconds: ts.unix_timestamp(), nanos: ts.nanosecond() as i32 }
}

fn scanned_item(id: Option<&PointId>, payload: &HashMap<String, Value>) -> Option<VectorDataItem> {
	let created_at = payload_string(payload, CREATED_AT_FIELD)?;

	Some(VectorDataItem {
		id: point_id_string(id?)?,
		team_id: payload_string(payload, "team_id")?,
		dataset_id: payload_string(payload, "dataset_id")?,
		collection_id: payload_string(payload, "collection_id")?,
		created_at: OffsetDateTime::parse(&created_at, &Rfc3339).ok()?,
	})
}

fn point_id_string(point_id: &PointId) -> Option<String> {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => Some(id.clone()),
		Some(PointIdOptions::Num(id)) => Some(id.to_string()),
		None => None,
	}
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	match &payload.get(key)?.kind {
		Some(Kind::StringValue(text)) => Some(text.clone()),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use qdrant_client::qdrant::{PointId, Value};

	use super::{VectorQuery, recall_filter, scanned_item};

	#[test]
	fn recall_filter_excludes_forbidden_collections() {
		let query = VectorQuery::new("t1", vec!["d1".to_string()], vec![0.0; 4])
			.forbid(vec!["c9".to_string()]);
		let filter = recall_filter(&query);

		assert_eq!(filter.must.len(), 2);
		assert_eq!(filter.must_not.len(), 1);
	}

	#[test]
	fn allow_list_becomes_a_must_condition() {
		let query = VectorQuery::new("t1", vec!["d1".to_string()], vec![0.0; 4])
			.only(vec!["c1".to_string()]);

		assert_eq!(recall_filter(&query).must.len(), 3);
	}

	#[test]
	fn scanned_item_requires_full_payload() {
		let id = PointId::from("0b6e1c55-7d1e-4d4f-9d4c-9c8f1a2b3c4d".to_string());
		let mut payload = HashMap::new();

		payload.insert("team_id".to_string(), Value::from("t1"));
		payload.insert("dataset_id".to_string(), Value::from("d1"));
		payload.insert("collection_id".to_string(), Value::from("c1"));

		assert!(scanned_item(Some(&id), &payload).is_none());

		payload.insert("created_at".to_string(), Value::from("2026-01-01T00:00:00Z"));

		let item = scanned_item(Some(&id), &payload).expect("Item must parse.");

		assert_eq!(item.collection_id, "c1");
		assert_eq!(item.created_at.unix_timestamp(), 1_767_225_600);
	}
}
