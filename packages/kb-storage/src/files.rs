//! Uploaded dataset documents, tracked in `dataset_files`.

use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::{
	BoxFuture, Result,
	models::{FileBlob, TimeWindow},
};

pub trait FileStore
where
	Self: Send + Sync,
{
	/// Blobs in `bucket` uploaded inside `window`, ordered by id, one page after `after`.
	fn list_in_window<'a>(
		&'a self,
		bucket: &'a str,
		window: TimeWindow,
		after: Option<&'a str>,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<FileBlob>>>;

	/// Returns `false` when the blob was already gone.
	fn delete<'a>(&'a self, bucket: &'a str, file_id: &'a str) -> BoxFuture<'a, Result<bool>>;

	fn put<'a>(&'a self, blob: &'a FileBlob) -> BoxFuture<'a, Result<()>>;
}

pub struct PgFileStore {
	pool: PgPool,
}
impl PgFileStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn list(
		&self,
		bucket: &str,
		window: TimeWindow,
		after: Option<&str>,
		limit: u32,
	) -> Result<Vec<FileBlob>> {
		let rows: Vec<FileRow> = sqlx::query_as(
			"\
SELECT file_id, bucket, team_id, filename, uploaded_at
FROM dataset_files
WHERE bucket = $1
	AND uploaded_at >= $2
	AND uploaded_at < $3
	AND ($4::text IS NULL OR file_id > $4)
ORDER BY file_id
LIMIT $5",
		)
		.bind(bucket)
		.bind(window.start)
		.bind(window.end)
		.bind(after)
		.bind(i64::from(limit))
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.map(|row| FileBlob {
				id: row.file_id,
				bucket: row.bucket,
				team_id: row.team_id,
				filename: row.filename,
				uploaded_at: row.uploaded_at,
			})
			.collect())
	}

	async fn remove(&self, bucket: &str, file_id: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM dataset_files WHERE bucket = $1 AND file_id = $2")
			.bind(bucket)
			.bind(file_id)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	async fn insert(&self, blob: &FileBlob) -> Result<()> {
		sqlx::query(
			"\
INSERT INTO dataset_files (file_id, bucket, team_id, filename, uploaded_at)
VALUES ($1, $2, $3, $4, $5)",
		)
		.bind(blob.id.as_str())
		.bind(blob.bucket.as_str())
		.bind(blob.team_id.as_str())
		.bind(blob.filename.as_str())
		.bind(blob.uploaded_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}
}
impl FileStore for PgFileStore {
	fn list_in_window<'a>(
		&'a self,
		bucket: &'a str,
		window: TimeWindow,
		after: Option<&'a str>,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<FileBlob>>> {
		Box::pin(self.list(bucket, window, after, limit))
	}

	fn delete<'a>(&'a self, bucket: &'a str, file_id: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(self.remove(bucket, file_id))
	}

	fn put<'a>(&'a self, blob: &'a FileBlob) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.insert(blob))
	}
}

#[derive(FromRow)]
struct FileRow {
	file_id: String,
	bucket: String,
	team_id: String,
	filename: String,
	uploaded_at: OffsetDateTime,
}
