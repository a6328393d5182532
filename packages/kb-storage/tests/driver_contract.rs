use time::macros::datetime;

use kb_storage::{
	Error,
	models::TimeWindow,
	vector::{DeleteFilter, VectorCountScope, VectorStoreDriver},
};
use kb_testkit::MemoryVectorStore;

fn seeded() -> MemoryVectorStore {
	let store = MemoryVectorStore::new();
	let at = datetime!(2026-02-01 12:00 UTC);

	store.seed("t1", "d1", "c1", vec![1.0, 0.0], at);
	store.seed("t1", "d1", "c2", vec![1.0, 0.0], at);
	store.seed("t1", "d2", "c3", vec![1.0, 0.0], at);
	store.seed("t2", "d9", "c9", vec![1.0, 0.0], at);

	store
}

#[tokio::test]
async fn counts_narrow_from_team_to_collection() {
	let store = seeded();
	let team =
		store.get_vector_count(&VectorCountScope::team("t1")).await.expect("Count failed.");
	let dataset = store
		.get_vector_count(&VectorCountScope::team("t1").dataset("d1"))
		.await
		.expect("Count failed.");
	let collection = store
		.get_vector_count(&VectorCountScope::collection("t1", "d1", "c2"))
		.await
		.expect("Count failed.");

	assert_eq!((team, dataset, collection), (3, 2, 1));
}

#[tokio::test]
async fn unscoped_delete_is_rejected_before_touching_data() {
	let store = seeded();
	let err = store.delete(&DeleteFilter::team("t1")).await.expect_err("Expected rejection.");

	assert!(matches!(err, Error::InvalidArgument(_)));
	assert_eq!(store.len(), 4);
}

#[tokio::test]
async fn delete_by_id_list_stays_inside_the_team() {
	let store = seeded();

	let deleted = store
		.delete(&DeleteFilter::team("t1").ids(vec!["v1".to_string(), "v4".to_string()]))
		.await
		.expect("Delete failed.");

	assert_eq!(deleted, 1);
	assert!(!store.contains("v1"));
	assert!(store.contains("v4"));

	// Repeating a delete is a no-op and reports nothing removed.
	let repeated = store
		.delete(&DeleteFilter::team("t1").ids(vec!["v1".to_string()]))
		.await
		.expect("Delete failed.");

	assert_eq!(repeated, 0);
	assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn time_scan_is_half_open() {
	let store = seeded();
	let start = datetime!(2026-02-01 00:00 UTC);
	let inside = TimeWindow::new(start, datetime!(2026-02-01 12:00:01 UTC));
	let before = TimeWindow::new(start, datetime!(2026-02-01 12:00 UTC));

	assert_eq!(store.get_vector_data_by_time(inside).await.expect("Scan failed.").len(), 4);
	assert!(store.get_vector_data_by_time(before).await.expect("Scan failed.").is_empty());
}
