use std::sync::Arc;

use time::{Duration, OffsetDateTime, macros::datetime};

use kb_service::{ConsistencyAuditor, SweepReport, audit::SweepWindow};
use kb_storage::{
	files::FileStore,
	models::{FileBlob, TrainingJob},
};
use kb_testkit::{MemoryFileStore, MemoryMetadataStore, MemoryVectorStore};

use super::{DATASET, TEAM, collection, row};

const BUCKET: &str = "dataset";

struct Fixture {
	vectors: Arc<MemoryVectorStore>,
	metadata: Arc<MemoryMetadataStore>,
	files: Arc<MemoryFileStore>,
	auditor: ConsistencyAuditor,
}
impl Fixture {
	fn new(batch_size: u32) -> Self {
		let vectors = Arc::new(MemoryVectorStore::new());
		let metadata = Arc::new(MemoryMetadataStore::new());
		let files = Arc::new(MemoryFileStore::new());
		let auditor = ConsistencyAuditor::new(
			vectors.clone(),
			metadata.clone(),
			files.clone(),
			BUCKET,
			batch_size,
		);

		Self { vectors, metadata, files, auditor }
	}

	/// One row per vector, both stamped `at`.
	fn add_rows(&self, collection_id: &str, count: usize, at: OffsetDateTime) {
		for idx in 0..count {
			let id = self.vectors.seed(TEAM, DATASET, collection_id, vec![1.0, 0.0], at);

			self.metadata.add_row(row(
				&format!("{collection_id}-r{idx}"),
				collection_id,
				&format!("row {idx}"),
				&[&id],
				at,
			));
		}
	}

	async fn put_blob(&self, id: &str, uploaded_at: OffsetDateTime) {
		let blob = FileBlob {
			id: id.to_string(),
			bucket: BUCKET.to_string(),
			team_id: TEAM.to_string(),
			filename: format!("{id}.pdf"),
			uploaded_at,
		};

		self.files.put(&blob).await.expect("Blob write must succeed.");
	}
}

fn window() -> SweepWindow {
	SweepWindow::new(datetime!(2026-03-01 00:00 UTC), datetime!(2026-03-01 06:00 UTC))
}

fn inside() -> OffsetDateTime {
	datetime!(2026-03-01 02:00 UTC)
}

#[tokio::test]
async fn orphan_collection_rows_and_vectors_are_removed_without_touching_live_ones() {
	let fixture = Fixture::new(100);

	fixture.metadata.add_collection(collection("c1", None, false));
	fixture.metadata.add_collection(collection("c2", None, false));
	fixture.add_rows("c1", 3, inside());
	fixture.add_rows("c2", 5, inside());
	fixture.metadata.add_training_job(TrainingJob {
		id: "job-1".to_string(),
		team_id: TEAM.to_string(),
		dataset_id: DATASET.to_string(),
		collection_id: "c2".to_string(),
		created_at: inside(),
	});
	fixture.metadata.remove_collection_record("c2");

	let report = fixture
		.auditor
		.sweep_orphan_collections(window())
		.await
		.expect("Sweep must succeed.");

	assert_eq!(report.scanned, 2);
	assert_eq!(report.deleted, 1);
	assert_eq!(report.rows_deleted, 5);
	assert_eq!(report.vectors_deleted, 5);
	assert_eq!(report.training_deleted, 1);
	assert_eq!(fixture.metadata.row_count("c1"), 3);
	assert_eq!(fixture.metadata.row_count("c2"), 0);
	assert_eq!(fixture.metadata.training_count("c2"), 0);
	assert_eq!(fixture.vectors.len(), 3);

	let again = fixture
		.auditor
		.sweep_orphan_collections(window())
		.await
		.expect("Sweep must succeed.");

	assert_eq!(again.deleted, 0);
	assert_eq!(again.rows_deleted, 0);
	assert_eq!(again.vectors_deleted, 0);
}

#[tokio::test]
async fn collection_sweep_pages_through_small_batches() {
	let fixture = Fixture::new(1);

	for id in ["c1", "c2", "c3"] {
		fixture.add_rows(id, 2, inside());
	}

	fixture.metadata.add_collection(collection("c2", None, false));

	let report = fixture
		.auditor
		.sweep_orphan_collections(window())
		.await
		.expect("Sweep must succeed.");

	assert_eq!(report.scanned, 3);
	assert_eq!(report.deleted, 2);
	assert_eq!(report.rows_deleted, 4);
	assert_eq!(fixture.vectors.len(), 2);
}

#[tokio::test]
async fn one_failing_collection_does_not_abort_the_sweep() {
	let fixture = Fixture::new(100);

	fixture.add_rows("c3", 1, inside());
	fixture.add_rows("c4", 2, inside());
	fixture.metadata.fail_lookups_for("c3");

	let report = fixture
		.auditor
		.sweep_orphan_collections(window())
		.await
		.expect("Sweep must succeed.");

	assert_eq!(report.failed, 1);
	assert_eq!(report.deleted, 1);
	assert_eq!(fixture.metadata.row_count("c3"), 1);
	assert_eq!(fixture.metadata.row_count("c4"), 0);
}

#[tokio::test]
async fn orphan_vectors_are_deleted_and_the_window_end_is_respected() {
	let fixture = Fixture::new(2);
	let end = window().end;

	fixture.metadata.add_collection(collection("c1", None, false));
	fixture.add_rows("c1", 2, inside());

	let orphan = fixture.vectors.seed(TEAM, DATASET, "c1", vec![1.0, 0.0], inside());
	let at_end = fixture.vectors.seed(TEAM, DATASET, "c1", vec![1.0, 0.0], end);
	let in_flight =
		fixture.vectors.seed(TEAM, DATASET, "c1", vec![1.0, 0.0], end + Duration::seconds(1));

	let report =
		fixture.auditor.sweep_orphan_vectors(window()).await.expect("Sweep must succeed.");

	assert_eq!(report, SweepReport { scanned: 3, deleted: 1, ..Default::default() });
	assert!(!fixture.vectors.contains(&orphan));
	assert!(fixture.vectors.contains(&at_end));
	assert!(fixture.vectors.contains(&in_flight));
	assert_eq!(fixture.vectors.len(), 4);

	let again =
		fixture.auditor.sweep_orphan_vectors(window()).await.expect("Sweep must succeed.");

	assert_eq!(again.deleted, 0);
	assert_eq!(fixture.vectors.len(), 4);
}

#[tokio::test]
async fn orphan_vector_removed_by_another_writer_is_not_counted() {
	let fixture = Fixture::new(10);
	let orphan = fixture.vectors.seed(TEAM, DATASET, "c1", vec![1.0, 0.0], inside());

	fixture.vectors.lose_next_delete();

	let report =
		fixture.auditor.sweep_orphan_vectors(window()).await.expect("Sweep must succeed.");

	assert_eq!(report, SweepReport { scanned: 1, deleted: 0, ..Default::default() });
	assert!(!fixture.vectors.contains(&orphan));
}

#[tokio::test]
async fn vectors_owned_by_another_dataset_row_still_count_as_orphans() {
	let fixture = Fixture::new(100);
	let id = fixture.vectors.seed(TEAM, "dataset-2", "c1", vec![1.0, 0.0], inside());

	// The row lists the id, but under a different dataset scope.
	fixture.metadata.add_row(row("r1", "c1", "row", &[&id], inside()));

	let report =
		fixture.auditor.sweep_orphan_vectors(window()).await.expect("Sweep must succeed.");

	assert_eq!(report.deleted, 1);
	assert!(fixture.vectors.is_empty());
}

#[tokio::test]
async fn unreferenced_files_inside_the_window_are_deleted() {
	let fixture = Fixture::new(1);

	fixture.metadata.add_collection(collection("c1", Some("f1"), false));
	fixture.put_blob("f1", inside()).await;
	fixture.put_blob("f2", inside()).await;
	fixture.put_blob("f3", inside()).await;
	fixture.put_blob("f4", window().end + Duration::seconds(1)).await;

	let report = fixture.auditor.sweep_orphan_files(window()).await.expect("Sweep must succeed.");

	assert_eq!(report.scanned, 3);
	assert_eq!(report.deleted, 2);
	assert!(fixture.files.contains("f1"));
	assert!(!fixture.files.contains("f2"));
	assert!(!fixture.files.contains("f3"));
	assert!(fixture.files.contains("f4"));

	let again = fixture.auditor.sweep_orphan_files(window()).await.expect("Sweep must succeed.");

	assert_eq!(again.deleted, 0);
	assert_eq!(fixture.files.len(), 2);
}

#[tokio::test]
async fn run_all_sweeps_every_store() {
	let fixture = Fixture::new(100);

	fixture.add_rows("gone", 2, inside());
	fixture.vectors.seed(TEAM, DATASET, "c1", vec![1.0, 0.0], inside());
	fixture.put_blob("f9", inside()).await;

	let report = fixture.auditor.run_all(window()).await;
	let files = report.files.expect("File sweep must succeed.");
	let collections = report.collections.expect("Collection sweep must succeed.");
	let vectors = report.vectors.expect("Vector sweep must succeed.");

	assert_eq!(files.deleted, 1);
	assert_eq!(collections.rows_deleted, 2);
	assert!(fixture.vectors.is_empty());
	assert!(fixture.files.is_empty());
	assert_eq!(vectors.failed, 0);
	assert_eq!(
		serde_json::to_value(&files).expect("Report must serialize.")["deleted"],
		serde_json::json!(1)
	);
}

#[tokio::test]
async fn empty_window_is_a_no_op() {
	let fixture = Fixture::new(100);
	let start = window().start;

	fixture.add_rows("gone", 1, start);

	let empty = SweepWindow::new(start, start);
	let report = fixture.auditor.run_all(empty).await;

	assert_eq!(report.collections.expect("Collection sweep must succeed."), SweepReport::default());
	assert_eq!(fixture.metadata.row_count("gone"), 1);
}
