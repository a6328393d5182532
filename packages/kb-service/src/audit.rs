//! Time-windowed orphan sweeps across the vector, metadata and file stores.
//!
//! Every sweep only deletes what it has just proven unreferenced, and never touches anything
//! created at or after the window end. Running a sweep twice over the same window is a no-op the
//! second time, so overlapping runs and re-runs after an interruption are both safe.

mod collections;
mod files;
mod vectors;

use std::sync::Arc;

use serde::Serialize;

use kb_storage::{files::FileStore, metadata::MetadataStore, vector::VectorStoreDriver};

pub use kb_storage::models::TimeWindow as SweepWindow;

use crate::Result;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
	pub scanned: u64,
	pub deleted: u64,
	pub failed: u64,
	/// Collection sweep only.
	pub rows_deleted: u64,
	/// Collection sweep only.
	pub vectors_deleted: u64,
	/// Collection sweep only.
	pub training_deleted: u64,
}

#[derive(Debug)]
pub struct AuditReport {
	pub files: Result<SweepReport>,
	pub collections: Result<SweepReport>,
	pub vectors: Result<SweepReport>,
}

pub struct ConsistencyAuditor {
	vectors: Arc<dyn VectorStoreDriver>,
	metadata: Arc<dyn MetadataStore>,
	files: Arc<dyn FileStore>,
	bucket: String,
	batch_size: u32,
}
impl ConsistencyAuditor {
	pub fn new(
		vectors: Arc<dyn VectorStoreDriver>,
		metadata: Arc<dyn MetadataStore>,
		files: Arc<dyn FileStore>,
		bucket: impl Into<String>,
		batch_size: u32,
	) -> Self {
		Self { vectors, metadata, files, bucket: bucket.into(), batch_size: batch_size.max(1) }
	}

	/// Deletes blobs uploaded inside `window` that no collection references.
	pub async fn sweep_orphan_files(&self, window: SweepWindow) -> Result<SweepReport> {
		files::sweep(self, window).await
	}

	/// Repairs interrupted collection deletes: rows, vectors and queued jobs of collections whose
	/// record is gone.
	pub async fn sweep_orphan_collections(&self, window: SweepWindow) -> Result<SweepReport> {
		collections::sweep(self, window).await
	}

	/// Deletes vectors created inside `window` that no data row lists among its indexes.
	pub async fn sweep_orphan_vectors(&self, window: SweepWindow) -> Result<SweepReport> {
		vectors::sweep(self, window).await
	}

	pub async fn run_all(&self, window: SweepWindow) -> AuditReport {
		let (files, collections, vectors) = tokio::join!(
			self.sweep_orphan_files(window),
			self.sweep_orphan_collections(window),
			self.sweep_orphan_vectors(window),
		);

		AuditReport { files, collections, vectors }
	}
}

fn log_summary(sweep: &'static str, window: SweepWindow, report: &SweepReport) {
	tracing::info!(
		sweep,
		start = %window.start,
		end = %window.end,
		scanned = report.scanned,
		deleted = report.deleted,
		failed = report.failed,
		rows_deleted = report.rows_deleted,
		vectors_deleted = report.vectors_deleted,
		training_deleted = report.training_deleted,
		"Sweep finished."
	);
}
