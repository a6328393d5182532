use kb_storage::{models::VectorDataItem, vector::DeleteFilter};

use crate::{
	Result,
	audit::{self, ConsistencyAuditor, SweepReport, SweepWindow},
};

pub(super) async fn sweep(
	auditor: &ConsistencyAuditor,
	window: SweepWindow,
) -> Result<SweepReport> {
	let mut report = SweepReport::default();

	if window.is_empty() {
		return Ok(report);
	}

	let items = auditor.vectors.get_vector_data_by_time(window).await?;

	for batch in items.chunks(auditor.batch_size as usize) {
		for item in batch {
			report.scanned += 1;

			match remove_if_orphan(auditor, window, item).await {
				Ok(true) => report.deleted += 1,
				Ok(false) => {},
				Err(err) => {
					report.failed += 1;

					tracing::warn!(
						error = %err,
						vector_id = %item.id,
						team_id = %item.team_id,
						dataset_id = %item.dataset_id,
						"Orphan vector check failed. Skipping."
					);
				},
			}
		}

		tracing::info!(
			scanned = report.scanned,
			deleted = report.deleted,
			failed = report.failed,
			total = items.len(),
			backend = auditor.vectors.backend(),
			"Orphan vector sweep progress."
		);
	}

	audit::log_summary("vectors", window, &report);

	Ok(report)
}

async fn remove_if_orphan(
	auditor: &ConsistencyAuditor,
	window: SweepWindow,
	item: &VectorDataItem,
) -> Result<bool> {
	// Anything at or past the end may belong to an insert whose data row is still being written.
	if !window.contains(item.created_at) {
		return Ok(false);
	}
	if auditor.metadata.data_index_exists(&item.team_id, &item.dataset_id, &item.id).await? {
		return Ok(false);
	}

	let filter = DeleteFilter::team(item.team_id.clone())
		.datasets(vec![item.dataset_id.clone()])
		.id(item.id.clone());

	let removed = auditor.vectors.delete(&filter).await?;

	if removed == 0 {
		tracing::debug!(vector_id = %item.id, "Orphan vector already gone.");

		return Ok(false);
	}

	tracing::debug!(
		vector_id = %item.id,
		team_id = %item.team_id,
		collection_id = %item.collection_id,
		"Orphan vector deleted."
	);

	Ok(true)
}
