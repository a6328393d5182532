mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Audit, Config, EmbeddingProviderConfig, Files, InsertRetry, Postgres, ProviderConfig, Providers,
	Qdrant, Search, Service, Storage, VectorBackend, VectorStore,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);
	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}

	let vector = &cfg.storage.vector;

	if vector.vector_dim == 0 {
		return Err(Error::Validation {
			message: "storage.vector.vector_dim must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != vector.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.vector.vector_dim."
				.to_string(),
		});
	}
	if vector.scan_page_size == 0 {
		return Err(Error::Validation {
			message: "storage.vector.scan_page_size must be greater than zero.".to_string(),
		});
	}

	match (vector.backend, vector.qdrant.as_ref()) {
		(VectorBackend::Qdrant, None) => {
			return Err(Error::Validation {
				message: "storage.vector.qdrant is required when backend is qdrant.".to_string(),
			});
		},
		(VectorBackend::Qdrant, Some(qdrant)) => {
			if qdrant.url.trim().is_empty() || qdrant.collection.trim().is_empty() {
				return Err(Error::Validation {
					message: "storage.vector.qdrant.url and collection must be non-empty."
						.to_string(),
				});
			}
		},
		(VectorBackend::Pgvector, Some(_)) => {
			return Err(Error::Validation {
				message: "storage.vector.qdrant must be omitted when backend is pgvector."
					.to_string(),
			});
		},
		(VectorBackend::Pgvector, None) => {},
	}

	if cfg.storage.files.bucket.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.files.bucket must be non-empty.".to_string(),
		});
	}

	for (label, value) in [
		("search.full_text_limit", cfg.search.full_text_limit),
		("search.rerank_overfetch_factor", cfg.search.rerank_overfetch_factor),
		("search.overfetch_factor", cfg.search.overfetch_factor),
		("search.default_limit", cfg.search.default_limit),
		("search.ef_search", cfg.search.ef_search),
		("audit.batch_size", cfg.audit.batch_size),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cfg.audit.interval_seconds == 0 {
		return Err(Error::Validation {
			message: "audit.interval_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.audit.safety_margin_hours < 1 {
		return Err(Error::Validation {
			message: "audit.safety_margin_hours must be at least 1.".to_string(),
		});
	}
	if cfg.audit.lookback_hours <= cfg.audit.safety_margin_hours {
		return Err(Error::Validation {
			message: "audit.lookback_hours must be greater than audit.safety_margin_hours."
				.to_string(),
		});
	}

	let mut keys = vec![("embedding", &cfg.providers.embedding.api_key)];

	if let Some(rerank) = cfg.providers.rerank.as_ref() {
		keys.push(("rerank", &rerank.api_key));
	}

	for (label, key) in keys {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	// A rerank table with a blank base URL is how deployments switch rerank off.
	if cfg.providers.rerank.as_ref().is_some_and(|rerank| rerank.api_base.trim().is_empty()) {
		cfg.providers.rerank = None;
	}

	cfg.service.log_level = cfg.service.log_level.trim().to_string();
	cfg.storage.files.bucket = cfg.storage.files.bucket.trim().to_string();
}
