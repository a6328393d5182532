use kb_storage::{
	models::CollectionRef,
	vector::{DeleteFilter, VectorCountScope},
};

use crate::{
	Result,
	audit::{self, ConsistencyAuditor, SweepReport, SweepWindow},
};

#[derive(Debug)]
struct Repair {
	rows: u64,
	vectors: u64,
	training: u64,
}

pub(super) async fn sweep(
	auditor: &ConsistencyAuditor,
	window: SweepWindow,
) -> Result<SweepReport> {
	let mut report = SweepReport::default();

	if window.is_empty() {
		return Ok(report);
	}

	let mut after: Option<CollectionRef> = None;

	loop {
		let page =
			auditor.metadata.collections_touched(window, after.as_ref(), auditor.batch_size).await?;
		let Some(last) = page.last() else {
			break;
		};

		after = Some(last.clone());

		for target in &page {
			report.scanned += 1;

			match repair_if_orphan(auditor, target).await {
				Ok(Some(repair)) => {
					report.deleted += 1;
					report.rows_deleted += repair.rows;
					report.vectors_deleted += repair.vectors;
					report.training_deleted += repair.training;
				},
				Ok(None) => {},
				Err(err) => {
					report.failed += 1;

					tracing::warn!(
						error = %err,
						team_id = %target.team_id,
						dataset_id = %target.dataset_id,
						collection_id = %target.collection_id,
						"Orphan collection repair failed. Skipping."
					);
				},
			}
		}

		tracing::info!(
			scanned = report.scanned,
			deleted = report.deleted,
			rows_deleted = report.rows_deleted,
			vectors_deleted = report.vectors_deleted,
			failed = report.failed,
			"Orphan collection sweep progress."
		);

		if page.len() < auditor.batch_size as usize {
			break;
		}
	}

	audit::log_summary("collections", window, &report);

	Ok(report)
}

/// `None` when the collection still exists.
async fn repair_if_orphan(
	auditor: &ConsistencyAuditor,
	target: &CollectionRef,
) -> Result<Option<Repair>> {
	if auditor.metadata.collection_exists(&target.team_id, &target.collection_id).await? {
		return Ok(None);
	}

	let rows =
		auditor.metadata.delete_collection_rows(&target.team_id, &target.collection_id).await?;
	let scope = VectorCountScope::collection(
		target.team_id.clone(),
		target.dataset_id.clone(),
		target.collection_id.clone(),
	);
	let before = auditor.vectors.get_vector_count(&scope).await?;
	let mut vectors = 0;

	if before > 0 {
		let filter = DeleteFilter::team(target.team_id.clone())
			.datasets(vec![target.dataset_id.clone()])
			.collections(vec![target.collection_id.clone()]);

		vectors = auditor.vectors.delete(&filter).await?;

		let remaining = auditor.vectors.get_vector_count(&scope).await?;

		if remaining > 0 {
			tracing::warn!(
				team_id = %target.team_id,
				collection_id = %target.collection_id,
				remaining,
				"Vectors remain after orphan collection delete."
			);
		}
	}

	let training =
		auditor.metadata.delete_training_jobs(&target.team_id, &target.collection_id).await?;

	tracing::debug!(
		team_id = %target.team_id,
		collection_id = %target.collection_id,
		rows,
		vectors,
		training,
		"Orphan collection repaired."
	);

	Ok(Some(Repair { rows, vectors, training }))
}
