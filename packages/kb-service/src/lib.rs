pub mod audit;
pub mod indexer;
pub mod search;

mod error;

pub use audit::{AuditReport, ConsistencyAuditor, SweepReport, SweepWindow};
pub use error::{Error, Result};
pub use indexer::{DatasetIndexer, InsertDataRequest, InsertDataResponse};
pub use kb_providers::{
	embedding::EmbeddingOutput,
	rerank::{RerankDocument, RerankScore},
};
pub use kb_storage::BoxFuture;
pub use search::{HybridRetriever, RetrievalCandidate, SearchRequest, SearchResponse};

use std::sync::Arc;

use kb_config::{EmbeddingProviderConfig, ProviderConfig};
use kb_providers::{embedding, rerank};

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		model: &'a str,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<EmbeddingOutput>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		query: &'a str,
		docs: &'a [RerankDocument],
	) -> BoxFuture<'a, Result<Vec<RerankScore>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	/// `None` disables rerank and, with it, lexical recall.
	pub rerank: Option<Arc<dyn RerankProvider>>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Option<Arc<dyn RerankProvider>>,
	) -> Self {
		Self { embedding, rerank }
	}

	pub fn from_config(cfg: &kb_config::Providers) -> Self {
		Self {
			embedding: Arc::new(HttpEmbedding { cfg: cfg.embedding.clone() }),
			rerank: cfg
				.rerank
				.clone()
				.map(|cfg| Arc::new(HttpRerank { cfg }) as Arc<dyn RerankProvider>),
		}
	}
}

struct HttpEmbedding {
	cfg: EmbeddingProviderConfig,
}
impl EmbeddingProvider for HttpEmbedding {
	fn embed<'a>(
		&'a self,
		model: &'a str,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<EmbeddingOutput>> {
		Box::pin(async move { Ok(embedding::embed(&self.cfg, model, texts).await?) })
	}
}

struct HttpRerank {
	cfg: ProviderConfig,
}
impl RerankProvider for HttpRerank {
	fn rerank<'a>(
		&'a self,
		query: &'a str,
		docs: &'a [RerankDocument],
	) -> BoxFuture<'a, Result<Vec<RerankScore>>> {
		Box::pin(async move { Ok(rerank::rerank(&self.cfg, query, docs).await?) })
	}
}
