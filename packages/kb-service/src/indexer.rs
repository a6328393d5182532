//! Write path: vectors first, then the data row that owns them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use kb_domain::segment;
use kb_storage::{
	metadata::MetadataStore,
	models::{Collection, DataIndex, NewMetadataRow},
	vector::{self, DeleteFilter, InsertBatch, RetryPolicy, VectorStoreDriver},
};

use crate::{Error, Providers, Result};

const KIND_QUESTION: &str = "question";
const KIND_ANSWER: &str = "answer";
const KIND_CUSTOM: &str = "custom";

#[derive(Clone, Debug, Deserialize)]
pub struct InsertDataRequest {
	pub team_id: String,
	pub dataset_id: String,
	pub collection_id: String,
	pub q: String,
	#[serde(default)]
	pub a: String,
	#[serde(default)]
	pub model: String,
	/// Extra texts embedded as `custom` indexes of the same row.
	#[serde(default)]
	pub extra_indexes: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InsertDataResponse {
	pub data_id: String,
	pub insert_ids: Vec<String>,
	pub tokens: u32,
}

pub struct DatasetIndexer {
	vectors: Arc<dyn VectorStoreDriver>,
	metadata: Arc<dyn MetadataStore>,
	providers: Providers,
	retry: RetryPolicy,
}
impl DatasetIndexer {
	pub fn new(
		vectors: Arc<dyn VectorStoreDriver>,
		metadata: Arc<dyn MetadataStore>,
		providers: Providers,
		retry: RetryPolicy,
	) -> Self {
		Self { vectors, metadata, providers, retry }
	}

	pub async fn create_collection(&self, collection: &Collection) -> Result<()> {
		if collection.id.trim().is_empty() || collection.team_id.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "Collection id and team_id are required.".to_string(),
			});
		}

		self.metadata.insert_collection(collection).await?;

		Ok(())
	}

	/// Embeds every index text, stores the vectors, then writes the row that references them.
	///
	/// A failure after the vector write leaves vectors without an owning row. The orphan vector
	/// sweep removes them once they fall out of its safety margin.
	pub async fn insert_data(&self, req: InsertDataRequest) -> Result<InsertDataResponse> {
		for (label, value) in [
			("team_id", &req.team_id),
			("dataset_id", &req.dataset_id),
			("collection_id", &req.collection_id),
			("q", &req.q),
		] {
			if value.trim().is_empty() {
				return Err(Error::InvalidRequest { message: format!("{label} is required.") });
			}
		}

		if !self.metadata.collection_exists(&req.team_id, &req.collection_id).await? {
			return Err(Error::NotFound {
				message: format!("Collection {} does not exist.", req.collection_id),
			});
		}

		let texts = index_texts(&req);
		let inputs: Vec<String> = texts.iter().map(|(_, text)| text.clone()).collect();
		let output = self.providers.embedding.embed(&req.model, &inputs).await?;

		if output.vectors.len() != inputs.len() {
			return Err(Error::Provider {
				message: "Embedding provider returned a mismatched vector count.".to_string(),
			});
		}

		let batch = InsertBatch {
			team_id: req.team_id.clone(),
			dataset_id: req.dataset_id.clone(),
			collection_id: req.collection_id.clone(),
			vectors: output.vectors,
		};
		let inserted = vector::insert_with_retry(self.vectors.as_ref(), &batch, self.retry).await?;

		if inserted.insert_ids.len() != texts.len() {
			return Err(Error::Storage {
				message: "Vector store returned a mismatched id count.".to_string(),
			});
		}

		let indexes = texts
			.into_iter()
			.zip(inserted.insert_ids.iter())
			.map(|((kind, text), id)| DataIndex {
				data_id: id.clone(),
				kind: kind.to_string(),
				text,
			})
			.collect();
		let row = NewMetadataRow {
			id: Uuid::new_v4().to_string(),
			team_id: req.team_id.clone(),
			dataset_id: req.dataset_id.clone(),
			collection_id: req.collection_id.clone(),
			q: req.q.clone(),
			a: req.a.clone(),
			indexes,
			full_text: segment::segment_for_index(&format!("{} {}", req.q, req.a)),
			updated_at: OffsetDateTime::now_utc(),
		};

		if let Err(err) = self.metadata.insert_row(&row).await {
			tracing::warn!(
				error = %err,
				collection_id = %req.collection_id,
				vector_ids = ?inserted.insert_ids,
				"Data row write failed after vector insert."
			);

			return Err(err.into());
		}

		tracing::info!(
			data_id = %row.id,
			collection_id = %req.collection_id,
			vectors = inserted.insert_ids.len(),
			"Data inserted."
		);

		Ok(InsertDataResponse {
			data_id: row.id,
			insert_ids: inserted.insert_ids,
			tokens: output.token_len,
		})
	}

	/// Removes the collection record, then its rows, queued training jobs and vectors.
	///
	/// Returns `false` when the collection record was already gone. The cascade still runs so a
	/// previously interrupted delete is finished.
	pub async fn delete_collection(
		&self,
		team_id: &str,
		dataset_id: &str,
		collection_id: &str,
	) -> Result<bool> {
		let existed = self.metadata.delete_collection(team_id, collection_id).await?;
		let rows = self.metadata.delete_collection_rows(team_id, collection_id).await?;
		let training = self.metadata.delete_training_jobs(team_id, collection_id).await?;
		let filter = DeleteFilter::team(team_id)
			.datasets(vec![dataset_id.to_string()])
			.collections(vec![collection_id.to_string()]);

		let vectors = self.vectors.delete(&filter).await?;

		tracing::info!(
			team_id,
			collection_id,
			existed,
			rows,
			training,
			vectors,
			"Collection deleted."
		);

		Ok(existed)
	}
}

fn index_texts(req: &InsertDataRequest) -> Vec<(&'static str, String)> {
	let mut texts = vec![(KIND_QUESTION, req.q.trim().to_string())];

	if !req.a.trim().is_empty() {
		texts.push((KIND_ANSWER, req.a.trim().to_string()));
	}

	texts.extend(
		req.extra_indexes
			.iter()
			.map(|text| text.trim())
			.filter(|text| !text.is_empty())
			.map(|text| (KIND_CUSTOM, text.to_string())),
	);

	texts
}
