use std::{io, path::PathBuf, sync::Arc};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kb_service::{HybridRetriever, Providers, SearchRequest};
use kb_storage::{db::Db, metadata::PgMetadataStore, vector};

#[derive(Debug, Parser)]
#[command(
	version = kb_cli::VERSION,
	rename_all = "kebab",
	styles = kb_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long)]
	pub team: String,
	/// Repeat to search several datasets.
	#[arg(long = "dataset", value_name = "ID", required = true)]
	pub datasets: Vec<String>,
	#[arg(long, short = 'q')]
	pub query: String,
	/// Defaults to `search.default_limit`.
	#[arg(long)]
	pub limit: Option<u32>,
	#[arg(long, default_value_t = 0.0)]
	pub floor: f32,
	#[arg(long)]
	pub rerank: bool,
	#[arg(long)]
	pub model: Option<String>,
	#[arg(long = "forbid", value_name = "COLLECTION_ID")]
	pub forbid: Vec<String>,
	/// Repeat to search only these collections.
	#[arg(long = "collection", value_name = "COLLECTION_ID")]
	pub collections: Vec<String>,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = kb_config::load(&args.config)?;
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	// Stdout carries the JSON result only.
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

	let db = Db::connect(&config.storage.postgres).await?;
	let vectors = vector::connect(&config.storage.vector, &db).await?;
	let retriever = HybridRetriever::new(
		vectors,
		Arc::new(PgMetadataStore::new(db.pool.clone())),
		Providers::from_config(&config.providers),
		config.search.clone(),
	);
	let request = SearchRequest {
		team_id: args.team,
		query: args.query,
		model: args.model.unwrap_or_default(),
		dataset_ids: args.datasets,
		limit: args.limit.unwrap_or(config.search.default_limit),
		similarity_floor: args.floor,
		use_rerank: args.rerank,
		forbid_collection_ids: args.forbid,
		collection_ids: (!args.collections.is_empty()).then_some(args.collections),
	};
	let response = retriever.search(request).await?;

	println!("{}", serde_json::to_string_pretty(&response)?);

	Ok(())
}
