use std::{
	collections::BTreeSet, env, fmt::Display, future::Future, str::FromStr, sync::Mutex, thread,
	time::Duration,
};

use qdrant_client::Qdrant;
use sqlx::{
	ConnectOptions, Connection, Executor,
	postgres::{PgConnectOptions, PgConnection},
};
use tokio::{runtime::Builder, time};
use uuid::Uuid;

use crate::{Error, Result};

const MAINTENANCE_DATABASES: [&str; 2] = ["postgres", "template1"];
const QDRANT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// A throwaway database created next to the one `KB_PG_DSN` points at.
///
/// Qdrant collections handed out by [`TestDatabase::collection_name`] share its lifetime.
pub struct TestDatabase {
	dsn: String,
	teardown: Option<Teardown>,
	collections: Mutex<BTreeSet<String>>,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("KB_PG_DSN is not a valid DSN: {err}.")))?;
		let (maintenance, mut conn) = open_maintenance(&base).await?;
		let database = format!("kb_test_{}", Uuid::new_v4().simple());

		conn.execute(format!(r#"CREATE DATABASE "{database}""#).as_str())
			.await
			.map_err(|err| Error::Message(format!("CREATE DATABASE {database} failed: {err}.")))?;

		Ok(Self {
			dsn: base.database(&database).to_url_lossy().to_string(),
			teardown: Some(Teardown { database, maintenance, collections: Vec::new() }),
			collections: Mutex::new(BTreeSet::new()),
		})
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	/// Qdrant collection name unique to this database; dropped on cleanup.
	pub fn collection_name(&self, prefix: &str) -> String {
		let suffix = self.teardown.as_ref().map(|teardown| teardown.database.as_str());
		let collection = format!("{prefix}_{}", suffix.unwrap_or("detached"));

		self.collections.lock().unwrap_or_else(|err| err.into_inner()).insert(collection.clone());

		collection
	}

	pub async fn cleanup(mut self) -> Result<()> {
		match self.take_teardown() {
			Some(teardown) => teardown.run().await,
			None => Ok(()),
		}
	}

	fn take_teardown(&mut self) -> Option<Teardown> {
		let mut teardown = self.teardown.take()?;

		teardown.collections = self
			.collections
			.get_mut()
			.unwrap_or_else(|err| err.into_inner())
			.iter()
			.cloned()
			.collect();

		Some(teardown)
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		let Some(teardown) = self.take_teardown() else {
			return;
		};

		// The caller may already be inside a runtime, so block on a dedicated one.
		let worker = thread::spawn(move || {
			let runtime = match Builder::new_current_thread().enable_all().build() {
				Ok(runtime) => runtime,
				Err(err) => {
					eprintln!("Cannot start a runtime for test cleanup: {err}.");

					return;
				},
			};

			if let Err(err) = runtime.block_on(teardown.run()) {
				eprintln!("Test resource cleanup failed: {err}.");
			}
		});

		let _ = worker.join();
	}
}

struct Teardown {
	database: String,
	maintenance: PgConnectOptions,
	collections: Vec<String>,
}
impl Teardown {
	/// Drops Qdrant collections first, then the database. Both are attempted.
	async fn run(self) -> Result<()> {
		let qdrant = drop_collections(&self.collections).await;
		let postgres = drop_database(&self.maintenance, &self.database).await;

		qdrant.and(postgres)
	}
}

pub fn env_dsn() -> Option<String> {
	env::var("KB_PG_DSN").ok()
}

pub fn env_qdrant_url() -> Option<String> {
	env::var("KB_QDRANT_URL").ok()
}

async fn open_maintenance(base: &PgConnectOptions) -> Result<(PgConnectOptions, PgConnection)> {
	let mut failures = Vec::new();

	for database in MAINTENANCE_DATABASES {
		let options = base.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => failures.push(format!("{database}: {err}")),
		}
	}

	Err(Error::Message(format!(
		"No maintenance database reachable ({}).",
		failures.join("; ")
	)))
}

async fn drop_database(maintenance: &PgConnectOptions, database: &str) -> Result<()> {
	let mut conn = PgConnection::connect_with(maintenance)
		.await
		.map_err(|err| Error::Message(format!("Cannot reconnect to drop {database}: {err}.")))?;

	// FORCE terminates sessions a test left open on the pool.
	conn.execute(format!(r#"DROP DATABASE IF EXISTS "{database}" WITH (FORCE)"#).as_str())
		.await
		.map_err(|err| Error::Message(format!("DROP DATABASE {database} failed: {err}.")))?;

	Ok(())
}

async fn drop_collections(collections: &[String]) -> Result<()> {
	if collections.is_empty() {
		return Ok(());
	}

	let Some(url) = env_qdrant_url() else {
		eprintln!(
			"KB_QDRANT_URL is unset; leaving {} test collection(s) behind.",
			collections.len()
		);

		return Ok(());
	};
	let client = Qdrant::from_url(&url)
		.build()
		.map_err(|err| Error::Message(format!("Qdrant client for cleanup: {err}.")))?;

	for collection in collections {
		let exists = with_timeout(collection, client.collection_exists(collection.as_str())).await?;

		if exists {
			with_timeout(collection, client.delete_collection(collection.clone())).await?;
		}
	}

	Ok(())
}

async fn with_timeout<T, E>(
	collection: &str,
	call: impl Future<Output = Result<T, E>>,
) -> Result<T>
where
	E: Display,
{
	match time::timeout(QDRANT_CALL_TIMEOUT, call).await {
		Ok(Ok(value)) => Ok(value),
		Ok(Err(err)) => Err(Error::Message(format!("Qdrant cleanup of {collection}: {err}."))),
		Err(_) => Err(Error::Message(format!("Qdrant cleanup of {collection} timed out."))),
	}
}
