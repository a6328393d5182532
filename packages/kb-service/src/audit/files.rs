use kb_storage::models::FileBlob;

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

	let mut after: Option<String> = None;

	loop {
		let page = auditor
			.files
			.list_in_window(&auditor.bucket, window, after.as_deref(), auditor.batch_size)
			.await?;
		let Some(last) = page.last() else {
			break;
		};

		after = Some(last.id.clone());

		for blob in &page {
			report.scanned += 1;

			match remove_if_orphan(auditor, window, blob).await {
				Ok(true) => report.deleted += 1,
				Ok(false) => {},
				Err(err) => {
					report.failed += 1;

					tracing::warn!(
						error = %err,
						file_id = %blob.id,
						bucket = %blob.bucket,
						"Orphan file check failed. Skipping."
					);
				},
			}
		}

		tracing::info!(
			scanned = report.scanned,
			deleted = report.deleted,
			failed = report.failed,
			"Orphan file sweep progress."
		);

		if page.len() < auditor.batch_size as usize {
			break;
		}
	}

	audit::log_summary("files", window, &report);

	Ok(report)
}

async fn remove_if_orphan(
	auditor: &ConsistencyAuditor,
	window: SweepWindow,
	blob: &FileBlob,
) -> Result<bool> {
	if !window.contains(blob.uploaded_at) {
		return Ok(false);
	}
	if auditor.metadata.file_referenced(&blob.id).await? {
		return Ok(false);
	}

	let removed = auditor.files.delete(&blob.bucket, &blob.id).await?;

	if removed {
		tracing::debug!(file_id = %blob.id, team_id = %blob.team_id, "Orphan file deleted.");
	}

	Ok(removed)
}
