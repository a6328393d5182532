//! Collections, data rows and the training queue.

use sqlx::{FromRow, PgPool, types::Json};
use time::OffsetDateTime;

use crate::{
	BoxFuture, Result,
	models::{
		Collection, CollectionRef, DataIndex, FullTextHit, MetadataRow, NewMetadataRow, TimeWindow,
	},
};

pub trait MetadataStore
where
	Self: Send + Sync,
{
	fn collection_exists<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<bool>>;

	/// Whether a row in `(team_id, dataset_id)` lists `data_id` among its indexes.
	fn data_index_exists<'a>(
		&'a self,
		team_id: &'a str,
		dataset_id: &'a str,
		data_id: &'a str,
	) -> BoxFuture<'a, Result<bool>>;

	fn rows_by_index_ids<'a>(
		&'a self,
		team_id: &'a str,
		data_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<MetadataRow>>>;

	fn collections_by_ids<'a>(
		&'a self,
		team_id: &'a str,
		collection_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Collection>>>;

	fn forbidden_collections<'a>(
		&'a self,
		team_id: &'a str,
		dataset_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<String>>>;

	/// Lexical recall over pre-segmented `terms`, best match first.
	fn full_text_search<'a>(
		&'a self,
		query: &'a FullTextQuery,
	) -> BoxFuture<'a, Result<Vec<FullTextHit>>>;

	/// Distinct collections whose rows were updated inside `window`, one page after `after`.
	fn collections_touched<'a>(
		&'a self,
		window: TimeWindow,
		after: Option<&'a CollectionRef>,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<CollectionRef>>>;

	fn delete_collection_rows<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<u64>>;

	fn delete_training_jobs<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<u64>>;

	fn file_referenced<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, Result<bool>>;

	fn insert_collection<'a>(&'a self, collection: &'a Collection) -> BoxFuture<'a, Result<()>>;

	fn insert_row<'a>(&'a self, row: &'a NewMetadataRow) -> BoxFuture<'a, Result<()>>;

	/// Removes the collection record only. Rows, vectors and queued jobs are cleaned up separately.
	fn delete_collection<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<bool>>;
}

#[derive(Clone, Debug)]
pub struct FullTextQuery {
	pub team_id: String,
	pub dataset_ids: Vec<String>,
	pub terms: Vec<String>,
	pub forbid_collection_ids: Vec<String>,
	/// `Some` limits matches to these collections.
	pub only_collection_ids: Option<Vec<String>>,
	pub limit: u32,
}
impl FullTextQuery {
	/// `websearch_to_tsquery` input that ORs every term.
	pub fn websearch_text(&self) -> String {
		self.terms
			.iter()
			.map(|term| term.trim())
			.filter(|term| !term.is_empty() && !term.eq_ignore_ascii_case("or"))
			.map(|term| term.replace(['"', '-'], " ").trim().to_string())
			.filter(|term| !term.is_empty())
			.collect::<Vec<_>>()
			.join(" or ")
	}
}

pub struct PgMetadataStore {
	pool: PgPool,
}
impl PgMetadataStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn has_collection(&self, team_id: &str, collection_id: &str) -> Result<bool> {
		let exists: bool = sqlx::query_scalar(
			"\
SELECT EXISTS (
	SELECT 1 FROM dataset_collections WHERE team_id = $1 AND collection_id = $2
)",
		)
		.bind(team_id)
		.bind(collection_id)
		.fetch_one(&self.pool)
		.await?;

		Ok(exists)
	}

	async fn has_data_index(
		&self,
		team_id: &str,
		dataset_id: &str,
		data_id: &str,
	) -> Result<bool> {
		let needle = serde_json::json!([{ "data_id": data_id }]);
		let exists: bool = sqlx::query_scalar(
			"\
SELECT EXISTS (
	SELECT 1
	FROM dataset_data
	WHERE team_id = $1 AND dataset_id = $2 AND indexes @> $3
)",
		)
		.bind(team_id)
		.bind(dataset_id)
		.bind(Json(needle))
		.fetch_one(&self.pool)
		.await?;

		Ok(exists)
	}

	async fn load_rows_by_index(
		&self,
		team_id: &str,
		data_ids: &[String],
	) -> Result<Vec<MetadataRow>> {
		if data_ids.is_empty() {
			return Ok(Vec::new());
		}

		let rows: Vec<DataRow> = sqlx::query_as(
			"\
SELECT DISTINCT
	d.data_id,
	d.team_id,
	d.dataset_id,
	d.collection_id,
	d.q,
	d.a,
	d.indexes,
	d.updated_at
FROM dataset_data d
CROSS JOIN LATERAL jsonb_array_elements(d.indexes) idx
WHERE d.team_id = $1
	AND idx ->> 'data_id' = ANY($2)",
		)
		.bind(team_id)
		.bind(data_ids)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(MetadataRow::from).collect())
	}

	async fn load_collections(
		&self,
		team_id: &str,
		collection_ids: &[String],
	) -> Result<Vec<Collection>> {
		if collection_ids.is_empty() {
			return Ok(Vec::new());
		}

		let rows: Vec<CollectionRow> = sqlx::query_as(
			"\
SELECT collection_id, team_id, dataset_id, name, file_id, raw_link, forbid, created_at, updated_at
FROM dataset_collections
WHERE team_id = $1 AND collection_id = ANY($2)",
		)
		.bind(team_id)
		.bind(collection_ids)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(Collection::from).collect())
	}

	async fn load_forbidden(&self, team_id: &str, dataset_ids: &[String]) -> Result<Vec<String>> {
		if dataset_ids.is_empty() {
			return Ok(Vec::new());
		}

		let ids: Vec<String> = sqlx::query_scalar(
			"\
SELECT collection_id
FROM dataset_collections
WHERE team_id = $1 AND dataset_id = ANY($2) AND forbid
ORDER BY collection_id",
		)
		.bind(team_id)
		.bind(dataset_ids)
		.fetch_all(&self.pool)
		.await?;

		Ok(ids)
	}

	async fn search_full_text(&self, query: &FullTextQuery) -> Result<Vec<FullTextHit>> {
		let text = query.websearch_text();

		if text.is_empty()
			|| query.dataset_ids.is_empty()
			|| query.limit == 0
			|| query.only_collection_ids.as_ref().is_some_and(Vec::is_empty)
		{
			return Ok(Vec::new());
		}

		let rows: Vec<FullTextRow> = sqlx::query_as(
			"\
SELECT
	d.data_id,
	d.team_id,
	d.dataset_id,
	d.collection_id,
	d.q,
	d.a,
	d.indexes,
	d.updated_at,
	ts_rank_cd(d.full_text, ts_query) AS score
FROM dataset_data d
CROSS JOIN websearch_to_tsquery('simple', $1) AS ts_query
WHERE d.team_id = $2
	AND d.dataset_id = ANY($3)
	AND NOT (d.collection_id = ANY($4))
	AND ($5::text[] IS NULL OR d.collection_id = ANY($5))
	AND d.full_text @@ ts_query
ORDER BY score DESC, d.data_id
LIMIT $6",
		)
		.bind(text)
		.bind(query.team_id.as_str())
		.bind(&query.dataset_ids)
		.bind(&query.forbid_collection_ids)
		.bind(query.only_collection_ids.as_ref())
		.bind(i64::from(query.limit))
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.map(|row| FullTextHit { score: row.score, row: MetadataRow::from(row.data) })
			.collect())
	}

	async fn touched(
		&self,
		window: TimeWindow,
		after: Option<&CollectionRef>,
		limit: u32,
	) -> Result<Vec<CollectionRef>> {
		let (after_team, after_collection) = match after {
			Some(after) => (Some(after.team_id.as_str()), Some(after.collection_id.as_str())),
			None => (None, None),
		};
		let rows: Vec<CollectionRefRow> = sqlx::query_as(
			"\
SELECT team_id, collection_id, min(dataset_id) AS dataset_id
FROM dataset_data
WHERE updated_at >= $1
	AND updated_at < $2
	AND ($3::text IS NULL OR (team_id, collection_id) > ($3, $4::text))
GROUP BY team_id, collection_id
ORDER BY team_id, collection_id
LIMIT $5",
		)
		.bind(window.start)
		.bind(window.end)
		.bind(after_team)
		.bind(after_collection)
		.bind(i64::from(limit))
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.map(|row| CollectionRef {
				team_id: row.team_id,
				dataset_id: row.dataset_id,
				collection_id: row.collection_id,
			})
			.collect())
	}

	async fn delete_rows(&self, team_id: &str, collection_id: &str) -> Result<u64> {
		let result =
			sqlx::query("DELETE FROM dataset_data WHERE team_id = $1 AND collection_id = $2")
				.bind(team_id)
				.bind(collection_id)
				.execute(&self.pool)
				.await?;

		Ok(result.rows_affected())
	}

	async fn delete_jobs(&self, team_id: &str, collection_id: &str) -> Result<u64> {
		let result = sqlx::query(
			"DELETE FROM dataset_training_queue WHERE team_id = $1 AND collection_id = $2",
		)
		.bind(team_id)
		.bind(collection_id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	async fn has_file_reference(&self, file_id: &str) -> Result<bool> {
		let exists: bool = sqlx::query_scalar(
			"SELECT EXISTS (SELECT 1 FROM dataset_collections WHERE file_id = $1)",
		)
		.bind(file_id)
		.fetch_one(&self.pool)
		.await?;

		Ok(exists)
	}

	async fn write_collection(&self, collection: &Collection) -> Result<()> {
		sqlx::query(
			"\
INSERT INTO dataset_collections (
	collection_id,
	team_id,
	dataset_id,
	name,
	file_id,
	raw_link,
	forbid,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
		)
		.bind(collection.id.as_str())
		.bind(collection.team_id.as_str())
		.bind(collection.dataset_id.as_str())
		.bind(collection.name.as_str())
		.bind(collection.file_id.as_deref())
		.bind(collection.raw_link.as_deref())
		.bind(collection.forbid)
		.bind(collection.created_at)
		.bind(collection.updated_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	async fn write_row(&self, row: &NewMetadataRow) -> Result<()> {
		sqlx::query(
			"\
INSERT INTO dataset_data (
	data_id,
	team_id,
	dataset_id,
	collection_id,
	q,
	a,
	indexes,
	full_text,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, to_tsvector('simple', $8), $9)",
		)
		.bind(row.id.as_str())
		.bind(row.team_id.as_str())
		.bind(row.dataset_id.as_str())
		.bind(row.collection_id.as_str())
		.bind(row.q.as_str())
		.bind(row.a.as_str())
		.bind(Json(&row.indexes))
		.bind(row.full_text.as_str())
		.bind(row.updated_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	async fn remove_collection(&self, team_id: &str, collection_id: &str) -> Result<bool> {
		let result =
			sqlx::query("DELETE FROM dataset_collections WHERE team_id = $1 AND collection_id = $2")
				.bind(team_id)
				.bind(collection_id)
				.execute(&self.pool)
				.await?;

		Ok(result.rows_affected() > 0)
	}
}
impl MetadataStore for PgMetadataStore {
	fn collection_exists<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.has_collection(team_id, collection_id))
	}

	fn data_index_exists<'a>(
		&'a self,
		team_id: &'a str,
		dataset_id: &'a str,
		data_id: &'a str,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.has_data_index(team_id, dataset_id, data_id))
	}

	fn rows_by_index_ids<'a>(
		&'a self,
		team_id: &'a str,
		data_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<MetadataRow>>> {
		Box::pin(self.load_rows_by_index(team_id, data_ids))
	}

	fn collections_by_ids<'a>(
		&'a self,
		team_id: &'a str,
		collection_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Collection>>> {
		Box::pin(self.load_collections(team_id, collection_ids))
	}

	fn forbidden_collections<'a>(
		&'a self,
		team_id: &'a str,
		dataset_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(self.load_forbidden(team_id, dataset_ids))
	}

	fn full_text_search<'a>(
		&'a self,
		query: &'a FullTextQuery,
	) -> BoxFuture<'a, Result<Vec<FullTextHit>>> {
		Box::pin(self.search_full_text(query))
	}

	fn collections_touched<'a>(
		&'a self,
		window: TimeWindow,
		after: Option<&'a CollectionRef>,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<CollectionRef>>> {
		Box::pin(self.touched(window, after, limit))
	}

	fn delete_collection_rows<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.delete_rows(team_id, collection_id))
	}

	fn delete_training_jobs<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.delete_jobs(team_id, collection_id))
	}

	fn file_referenced<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.has_file_reference(file_id))
	}

	fn insert_collection<'a>(&'a self, collection: &'a Collection) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.write_collection(collection))
	}

	fn insert_row<'a>(&'a self, row: &'a NewMetadataRow) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.write_row(row))
	}

	fn delete_collection<'a>(
		&'a self,
		team_id: &'a str,
		collection_id: &'a str,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.remove_collection(team_id, collection_id))
	}
}

#[derive(FromRow)]
struct DataRow {
	data_id: String,
	team_id: String,
	dataset_id: String,
	collection_id: String,
	q: String,
	a: String,
	indexes: Json<Vec<DataIndex>>,
	updated_at: OffsetDateTime,
}
impl From<DataRow> for MetadataRow {
	fn from(row: DataRow) -> Self {
		Self {
			id: row.data_id,
			team_id: row.team_id,
			dataset_id: row.dataset_id,
			collection_id: row.collection_id,
			q: row.q,
			a: row.a,
			indexes: row.indexes.0,
			updated_at: row.updated_at,
		}
	}
}

#[derive(FromRow)]
struct FullTextRow {
	#[sqlx(flatten)]
	data: DataRow,
	score: f32,
}

#[derive(FromRow)]
struct CollectionRow {
	collection_id: String,
	team_id: String,
	dataset_id: String,
	name: String,
	file_id: Option<String>,
	raw_link: Option<String>,
	forbid: bool,
	created_at: OffsetDateTime,
	updated_at: OffsetDateTime,
}
impl From<CollectionRow> for Collection {
	fn from(row: CollectionRow) -> Self {
		Self {
			id: row.collection_id,
			team_id: row.team_id,
			dataset_id: row.dataset_id,
			name: row.name,
			file_id: row.file_id,
			raw_link: row.raw_link,
			forbid: row.forbid,
			created_at: row.created_at,
			updated_at: row.updated_at,
		}
	}
}

#[derive(FromRow)]
struct CollectionRefRow {
	team_id: String,
	dataset_id: String,
	collection_id: String,
}
