use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub search: Search,
	#[serde(default)]
	pub audit: Audit,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub vector: VectorStore,
	#[serde(default)]
	pub files: Files,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
	/// `dataset_vectors` table in the metadata Postgres, searched through pgvector HNSW.
	Pgvector,
	/// Dedicated Qdrant collection.
	Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct VectorStore {
	pub backend: VectorBackend,
	pub vector_dim: u32,
	pub qdrant: Option<Qdrant>,
	#[serde(default)]
	pub insert_retry: InsertRetry,
	#[serde(default = "default_scan_page_size")]
	pub scan_page_size: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InsertRetry {
	/// Retries after the first attempt.
	pub max_retries: u32,
	pub delay_ms: u64,
}
impl Default for InsertRetry {
	fn default() -> Self {
		Self { max_retries: 2, delay_ms: 500 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Files {
	pub bucket: String,
}
impl Default for Files {
	fn default() -> Self {
		Self { bucket: "dataset".to_string() }
	}
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	/// Absent means rerank is disabled and lexical recall never runs.
	pub rerank: Option<ProviderConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Search {
	/// HNSW `ef_search` handed to the vector backend on every recall.
	pub ef_search: u32,
	pub full_text_limit: u32,
	pub rerank_min_pool: u32,
	pub rerank_overfetch_factor: u32,
	pub overfetch_factor: u32,
	pub default_limit: u32,
}
impl Default for Search {
	fn default() -> Self {
		Self {
			ef_search: 100,
			full_text_limit: 40,
			rerank_min_pool: 50,
			rerank_overfetch_factor: 3,
			overfetch_factor: 2,
			default_limit: 10,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Audit {
	pub interval_seconds: u64,
	pub lookback_hours: i64,
	pub safety_margin_hours: i64,
	pub batch_size: u32,
}
impl Default for Audit {
	fn default() -> Self {
		Self { interval_seconds: 3_600, lookback_hours: 6, safety_margin_hours: 1, batch_size: 100 }
	}
}

fn default_scan_page_size() -> u32 {
	1_000
}
