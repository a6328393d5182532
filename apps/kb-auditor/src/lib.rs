use std::{path::PathBuf, sync::Arc, time::Duration as StdDuration};

use clap::Parser;
use color_eyre::eyre;
use time::{Duration, OffsetDateTime};
use tracing_subscriber::EnvFilter;

use kb_service::{AuditReport, ConsistencyAuditor, SweepReport, audit::SweepWindow};
use kb_storage::{db::Db, files::PgFileStore, metadata::PgMetadataStore, vector};

#[derive(Debug, Parser)]
#[command(
	version = kb_cli::VERSION,
	rename_all = "kebab",
	styles = kb_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// Run every sweep once over the trailing window and exit.
	#[arg(long)]
	pub once: bool,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = kb_config::load(&args.config)?;

	init_tracing(&config);

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema(config.storage.vector.vector_dim).await?;

	let vectors = vector::connect(&config.storage.vector, &db).await?;
	let auditor = ConsistencyAuditor::new(
		vectors,
		Arc::new(PgMetadataStore::new(db.pool.clone())),
		Arc::new(PgFileStore::new(db.pool.clone())),
		config.storage.files.bucket.clone(),
		config.audit.batch_size,
	);
	let lookback = Duration::hours(config.audit.lookback_hours);
	let margin = Duration::hours(config.audit.safety_margin_hours);
	let interval = StdDuration::from_secs(config.audit.interval_seconds);

	loop {
		let window = SweepWindow::trailing(OffsetDateTime::now_utc(), lookback, margin);

		tracing::info!(start = %window.start, end = %window.end, "Consistency audit started.");

		let failures = log_report(&auditor.run_all(window).await);

		if args.once {
			if failures > 0 {
				return Err(eyre::eyre!("{failures} sweep(s) failed."));
			}

			return Ok(());
		}

		tokio::time::sleep(interval).await;
	}
}

fn init_tracing(config: &kb_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Returns the number of sweeps that aborted.
fn log_report(report: &AuditReport) -> usize {
	let sweeps: [(&str, &kb_service::Result<SweepReport>); 3] = [
		("files", &report.files),
		("collections", &report.collections),
		("vectors", &report.vectors),
	];
	let mut failures = 0;

	for (sweep, outcome) in sweeps {
		if let Err(err) = outcome {
			failures += 1;

			tracing::error!(
				sweep,
				error = %err,
				"Sweep aborted. Remaining orphans wait for the next run."
			);
		}
	}

	failures
}
