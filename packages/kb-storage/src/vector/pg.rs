use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::{
	BoxFuture, Error, Result,
	models::{EmbeddingRecallItem, TimeWindow, VectorDataItem},
	vector::{
		DeleteFilter, InsertBatch, InsertResult, VectorCountScope, VectorQuery, VectorStoreDriver,
		format_vector_text,
	},
};

/// Vectors kept in the `dataset_vectors` table next to the metadata rows.
pub struct PgVectorStore {
	pool: PgPool,
	vector_dim: u32,
	page_size: u32,
}
impl PgVectorStore {
	pub fn new(pool: PgPool, vector_dim: u32, page_size: u32) -> Self {
		Self { pool, vector_dim, page_size: page_size.max(1) }
	}

	async fn insert_batch(&self, batch: &InsertBatch) -> Result<InsertResult> {
		if batch.vectors.is_empty() {
			return Ok(InsertResult::default());
		}

		check_dimensions(&batch.vectors, self.vector_dim)?;

		let mut tx = self.pool.begin().await?;
		let mut insert_ids = Vec::with_capacity(batch.vectors.len());

		for vector in &batch.vectors {
			let id: i64 = sqlx::query_scalar(
				"\
INSERT INTO dataset_vectors (team_id, dataset_id, collection_id, vector)
VALUES ($1, $2, $3, $4::text::vector)
RETURNING id",
			)
			.bind(batch.team_id.as_str())
			.bind(batch.dataset_id.as_str())
			.bind(batch.collection_id.as_str())
			.bind(format_vector_text(vector))
			.fetch_one(&mut *tx)
			.await?;

			insert_ids.push(id.to_string());
		}

		tx.commit().await?;

		Ok(InsertResult { insert_ids })
	}

	async fn recall(&self, query: &VectorQuery) -> Result<Vec<EmbeddingRecallItem>> {
		if query.matches_nothing() {
			return Ok(Vec::new());
		}

		check_dimensions(std::slice::from_ref(&query.vector), self.vector_dim)?;

		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT set_config('hnsw.ef_search', $1, true)")
			.bind(query.ef_search.max(query.limit).to_string())
			.execute(&mut *tx)
			.await?;

		let rows: Vec<RecallRow> = sqlx::query_as(
			"\
SELECT id, collection_id, score
FROM (
	SELECT
		id,
		collection_id,
		((vector <#> $1::text::vector) * -1)::real AS score
	FROM dataset_vectors
	WHERE team_id = $2
		AND dataset_id = ANY($3)
		AND NOT (collection_id = ANY($4))
		AND ($5::text[] IS NULL OR collection_id = ANY($5))
	ORDER BY vector <#> $1::text::vector
	LIMIT $6
) hits
WHERE $7::real IS NULL OR score >= $7
ORDER BY score DESC",
		)
		.bind(format_vector_text(&query.vector))
		.bind(query.team_id.as_str())
		.bind(&query.dataset_ids)
		.bind(&query.forbid_collection_ids)
		.bind(query.only_collection_ids.as_ref())
		.bind(i64::from(query.limit))
		.bind(query.similarity_floor)
		.fetch_all(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(rows
			.into_iter()
			.map(|row| EmbeddingRecallItem {
				id: row.id.to_string(),
				collection_id: row.collection_id,
				score: row.score,
			})
			.collect())
	}

	async fn count(&self, scope: &VectorCountScope) -> Result<u64> {
		let count: i64 = sqlx::query_scalar(
			"\
SELECT count(*)
FROM dataset_vectors
WHERE team_id = $1
	AND ($2::text IS NULL OR dataset_id = $2)
	AND ($3::text IS NULL OR collection_id = $3)",
		)
		.bind(scope.team_id.as_str())
		.bind(scope.dataset_id.as_deref())
		.bind(scope.collection_id.as_deref())
		.fetch_one(&self.pool)
		.await?;

		Ok(count.max(0) as u64)
	}

	async fn scan_window(&self, window: TimeWindow) -> Result<Vec<VectorDataItem>> {
		let mut out = Vec::new();
		let mut cursor = 0_i64;

		if window.is_empty() {
			return Ok(out);
		}

		loop {
			let rows: Vec<ScanRow> = sqlx::query_as(
				"\
SELECT id, team_id, dataset_id, collection_id, created_at
FROM dataset_vectors
WHERE created_at >= $1
	AND created_at < $2
	AND id > $3
ORDER BY id
LIMIT $4",
			)
			.bind(window.start)
			.bind(window.end)
			.bind(cursor)
			.bind(i64::from(self.page_size))
			.fetch_all(&self.pool)
			.await?;
			let page_len = rows.len();

			if let Some(last) = rows.last() {
				cursor = last.id;
			}

			out.extend(rows.into_iter().map(|row| VectorDataItem {
				id: row.id.to_string(),
				team_id: row.team_id,
				dataset_id: row.dataset_id,
				collection_id: row.collection_id,
				created_at: row.created_at,
			}));

			if page_len < self.page_size as usize {
				break;
			}
		}

		Ok(out)
	}

	async fn delete_matching(&self, filter: &DeleteFilter) -> Result<u64> {
		filter.validate()?;

		let ids = filter.vector_ids().map(|ids| parse_ids(&ids)).transpose()?;

		if ids.as_ref().is_some_and(Vec::is_empty) {
			return Ok(0);
		}

		let non_empty = |values: &Vec<String>| (!values.is_empty()).then(|| values.clone());
		let result = sqlx::query(
			"\
DELETE FROM dataset_vectors
WHERE team_id = $1
	AND ($2::text[] IS NULL OR dataset_id = ANY($2))
	AND ($3::text[] IS NULL OR collection_id = ANY($3))
	AND ($4::bigint[] IS NULL OR id = ANY($4))",
		)
		.bind(filter.team_id.as_str())
		.bind(non_empty(&filter.dataset_ids))
		.bind(non_empty(&filter.collection_ids))
		.bind(ids)
		.execute(&self.pool)
		.await?;

		let deleted = result.rows_affected();

		tracing::debug!(deleted, "Deleted pgvector rows.");

		Ok(deleted)
	}
}
impl VectorStoreDriver for PgVectorStore {
	fn backend(&self) -> &'static str {
		"pgvector"
	}

	fn init(&self) -> BoxFuture<'_, Result<()>> {
		// The table and its HNSW index are part of the bundled schema.
		Box::pin(async move {
			let exists: bool =
				sqlx::query_scalar("SELECT to_regclass('dataset_vectors') IS NOT NULL")
					.fetch_one(&self.pool)
					.await?;

			if exists {
				Ok(())
			} else {
				Err(Error::NotFound(
					"dataset_vectors is missing. Run schema bootstrap first.".to_string(),
				))
			}
		})
	}

	fn insert<'a>(&'a self, batch: &'a InsertBatch) -> BoxFuture<'a, Result<InsertResult>> {
		Box::pin(self.insert_batch(batch))
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

#[derive(FromRow)]
struct RecallRow {
	id: i64,
	collection_id: String,
	score: f32,
}

#[derive(FromRow)]
struct ScanRow {
	id: i64,
	team_id: String,
	dataset_id: String,
	collection_id: String,
	created_at: OffsetDateTime,
}

fn check_dimensions(vectors: &[Vec<f32>], vector_dim: u32) -> Result<()> {
	if let Some(vector) = vectors.iter().find(|vector| vector.len() != vector_dim as usize) {
		return Err(Error::InvalidArgument(format!(
			"Vector dimension mismatch. Expected {vector_dim}, got {}.",
			vector.len()
		)));
	}

	Ok(())
}

fn parse_ids(ids: &[String]) -> Result<Vec<i64>> {
	ids.iter()
		.map(|id| {
			id.parse::<i64>()
				.map_err(|_| Error::InvalidArgument(format!("Invalid pgvector id {id:?}.")))
		})
		.collect()
}
