use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = kb_auditor::Args::parse();

	kb_auditor::run(args).await
}
