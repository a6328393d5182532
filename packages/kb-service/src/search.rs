//! Hybrid retrieval: embedding recall, optional lexical recall, merge, dedup and rerank.

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use serde::{Deserialize, Serialize};

use kb_domain::segment;
use kb_providers::rerank::{RerankDocument, RerankScore};
use kb_storage::{
	metadata::{FullTextQuery, MetadataStore},
	models::{Collection, EmbeddingRecallItem, FullTextHit, MetadataRow},
	vector::{VectorQuery, VectorStoreDriver},
};

use crate::{Error, Providers, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchRequest {
	pub team_id: String,
	pub query: String,
	/// Embedding model; blank falls back to the configured one.
	#[serde(default)]
	pub model: String,
	pub dataset_ids: Vec<String>,
	pub limit: u32,
	#[serde(default)]
	pub similarity_floor: f32,
	#[serde(default)]
	pub use_rerank: bool,
	#[serde(default)]
	pub forbid_collection_ids: Vec<String>,
	/// Restricts recall to these collections. `None` searches every allowed collection.
	#[serde(default)]
	pub collection_ids: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RetrievalCandidate {
	pub id: String,
	pub q: String,
	pub a: String,
	pub dataset_id: String,
	pub collection_id: String,
	pub source_name: String,
	pub source_id: Option<String>,
	pub score: f32,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SearchResponse {
	pub items: Vec<RetrievalCandidate>,
	pub limit: u32,
	pub embedding_tokens: u32,
	pub used_rerank: bool,
	/// Rerank was requested but failed, so `items` carry native scores.
	pub rerank_degraded: bool,
}

pub struct HybridRetriever {
	vectors: Arc<dyn VectorStoreDriver>,
	metadata: Arc<dyn MetadataStore>,
	providers: Providers,
	settings: kb_config::Search,
}
impl HybridRetriever {
	pub fn new(
		vectors: Arc<dyn VectorStoreDriver>,
		metadata: Arc<dyn MetadataStore>,
		providers: Providers,
		settings: kb_config::Search,
	) -> Self {
		Self { vectors, metadata, providers, settings }
	}

	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		let query = req.query.trim();

		if req.team_id.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "team_id is required.".to_string() });
		}
		if query.is_empty()
			|| req.dataset_ids.is_empty()
			|| req.limit == 0
			|| req.collection_ids.as_ref().is_some_and(Vec::is_empty)
		{
			return Ok(SearchResponse { limit: req.limit, ..Default::default() });
		}

		let rerank = if req.use_rerank { self.providers.rerank.clone() } else { None };
		let use_rerank = rerank.is_some();
		let forbid = self.forbid_list(&req).await?;
		let overfetch = embedding_overfetch(&self.settings, req.limit, use_rerank);
		let floor = (!use_rerank).then_some(req.similarity_floor);
		let embedding = self.embedding_recall(&req, query, overfetch, floor, &forbid);
		let (embedding, full_text) = if use_rerank {
			tokio::join!(embedding, self.full_text_recall(&req, query, &forbid))
		} else {
			(embedding.await, Vec::new())
		};
		let (tokens, emb_hits, emb_rows) = embedding?;
		let collections = self.collections_for(&req.team_id, &emb_rows, &full_text).await?;
		let mut emb_candidates = hydrate_embedding(&emb_hits, &emb_rows, &collections);

		if let Some(floor) = floor {
			emb_candidates.retain(|candidate| candidate.score >= floor);
		}

		let ft_candidates = hydrate_full_text(full_text, &collections);
		let candidates = dedup_by_content(merge_recall(emb_candidates, ft_candidates));

		tracing::debug!(
			team_id = %req.team_id,
			candidates = candidates.len(),
			use_rerank,
			"Recall merged."
		);

		let Some(rerank) = rerank else {
			return Ok(SearchResponse {
				items: truncate(candidates, req.limit),
				limit: req.limit,
				embedding_tokens: tokens,
				used_rerank: false,
				rerank_degraded: false,
			});
		};
		let docs: Vec<RerankDocument> = candidates
			.iter()
			.map(|candidate| RerankDocument {
				id: candidate.id.clone(),
				text: format!("{}\n{}", candidate.q, candidate.a),
			})
			.collect();

		if docs.is_empty() {
			return Ok(SearchResponse {
				limit: req.limit,
				embedding_tokens: tokens,
				used_rerank: true,
				..Default::default()
			});
		}

		match rerank.rerank(query, &docs).await {
			Ok(scores) if !scores.is_empty() => Ok(SearchResponse {
				items: fuse_rerank(candidates, scores, req.similarity_floor, req.limit),
				limit: req.limit,
				embedding_tokens: tokens,
				used_rerank: true,
				rerank_degraded: false,
			}),
			outcome => {
				match outcome {
					Err(err) => {
						tracing::warn!(error = %err, "Rerank failed. Returning recall order.")
					},
					Ok(_) => tracing::warn!("Rerank returned no scores. Returning recall order."),
				}

				Ok(SearchResponse {
					items: truncate(candidates, req.limit),
					limit: req.limit,
					embedding_tokens: tokens,
					used_rerank: false,
					rerank_degraded: true,
				})
			},
		}
	}

	async fn forbid_list(&self, req: &SearchRequest) -> Result<Vec<String>> {
		let forbidden = self.metadata.forbidden_collections(&req.team_id, &req.dataset_ids).await?;
		let mut seen = HashSet::new();

		Ok(req
			.forbid_collection_ids
			.iter()
			.chain(forbidden.iter())
			.filter(|id| seen.insert(id.as_str()))
			.cloned()
			.collect())
	}

	async fn embedding_recall(
		&self,
		req: &SearchRequest,
		query: &str,
		overfetch: u32,
		floor: Option<f32>,
		forbid: &[String],
	) -> Result<(u32, Vec<EmbeddingRecallItem>, Vec<MetadataRow>)> {
		let output = self.providers.embedding.embed(&req.model, &[query.to_string()]).await?;
		let Some(vector) = output.vectors.into_iter().next() else {
			return Err(Error::Provider {
				message: "Embedding provider returned no vectors.".to_string(),
			});
		};
		let mut vector_query =
			VectorQuery::new(req.team_id.clone(), req.dataset_ids.clone(), vector)
				.limit(overfetch)
				.similarity_floor(floor)
				.forbid(forbid.to_vec())
				.ef_search(self.settings.ef_search);

		if let Some(only) = req.collection_ids.as_ref() {
			vector_query = vector_query.only(only.clone());
		}

		let hits = self.vectors.emb_recall(&vector_query).await?;
		let ids: Vec<String> = hits.iter().map(|hit| hit.id.clone()).collect();
		let rows = self.metadata.rows_by_index_ids(&req.team_id, &ids).await?;

		Ok((output.token_len, hits, rows))
	}

	/// Lexical recall is best effort; a failure leaves only the embedding side.
	async fn full_text_recall(
		&self,
		req: &SearchRequest,
		query: &str,
		forbid: &[String],
	) -> Vec<FullTextHit> {
		let terms = segment::segment_terms(query, segment::DEFAULT_MAX_TERMS);

		if terms.is_empty() {
			return Vec::new();
		}

		let full_text_query = FullTextQuery {
			team_id: req.team_id.clone(),
			dataset_ids: req.dataset_ids.clone(),
			terms,
			forbid_collection_ids: forbid.to_vec(),
			only_collection_ids: req.collection_ids.clone(),
			limit: self.settings.full_text_limit,
		};

		match self.metadata.full_text_search(&full_text_query).await {
			Ok(hits) => hits,
			Err(err) => {
				tracing::warn!(error = %err, team_id = %req.team_id, "Full-text recall failed.");

				Vec::new()
			},
		}
	}

	async fn collections_for(
		&self,
		team_id: &str,
		emb_rows: &[MetadataRow],
		full_text: &[FullTextHit],
	) -> Result<HashMap<String, Collection>> {
		let mut ids: Vec<String> = emb_rows
			.iter()
			.map(|row| row.collection_id.clone())
			.chain(full_text.iter().map(|hit| hit.row.collection_id.clone()))
			.collect();

		ids.sort();
		ids.dedup();

		let collections = self.metadata.collections_by_ids(team_id, &ids).await?;

		Ok(collections.into_iter().map(|collection| (collection.id.clone(), collection)).collect())
	}
}

pub fn embedding_overfetch(settings: &kb_config::Search, limit: u32, use_rerank: bool) -> u32 {
	if use_rerank {
		settings.rerank_min_pool.max(limit.saturating_mul(settings.rerank_overfetch_factor))
	} else {
		limit.saturating_mul(settings.overfetch_factor)
	}
}

/// Embedding candidates first, then lexical-only candidates in their own order.
pub fn merge_recall(
	embedding: Vec<RetrievalCandidate>,
	full_text: Vec<RetrievalCandidate>,
) -> Vec<RetrievalCandidate> {
	let mut seen: HashSet<String> = HashSet::new();
	let mut out = Vec::with_capacity(embedding.len() + full_text.len());

	for candidate in embedding.into_iter().chain(full_text) {
		if seen.insert(candidate.id.clone()) {
			out.push(candidate);
		}
	}

	out
}

/// Drops candidates whose trimmed `q + a` repeats an earlier one.
pub fn dedup_by_content(candidates: Vec<RetrievalCandidate>) -> Vec<RetrievalCandidate> {
	let mut seen: HashSet<String> = HashSet::new();

	candidates
		.into_iter()
		.filter(|candidate| {
			seen.insert(format!("{}{}", candidate.q, candidate.a).trim().to_string())
		})
		.collect()
}

/// Reranked candidates scoring above `floor`, then candidates the reranker never returned.
pub fn fuse_rerank(
	candidates: Vec<RetrievalCandidate>,
	mut scores: Vec<RerankScore>,
	floor: f32,
	limit: u32,
) -> Vec<RetrievalCandidate> {
	scores.sort_by(|a, b| b.score.total_cmp(&a.score));

	let by_id: HashMap<&str, &RetrievalCandidate> =
		candidates.iter().map(|candidate| (candidate.id.as_str(), candidate)).collect();
	let returned: HashSet<&str> = scores.iter().map(|score| score.id.as_str()).collect();
	let mut taken: HashSet<String> = HashSet::new();
	let mut out = Vec::with_capacity(candidates.len());

	for score in &scores {
		if score.score <= floor {
			continue;
		}

		let Some(candidate) = by_id.get(score.id.as_str()) else {
			continue;
		};

		if taken.insert(candidate.id.clone()) {
			out.push(RetrievalCandidate { score: score.score, ..(*candidate).clone() });
		}
	}

	for candidate in &candidates {
		if !returned.contains(candidate.id.as_str()) && taken.insert(candidate.id.clone()) {
			out.push(candidate.clone());
		}
	}

	truncate(out, limit)
}

fn hydrate_embedding(
	hits: &[EmbeddingRecallItem],
	rows: &[MetadataRow],
	collections: &HashMap<String, Collection>,
) -> Vec<RetrievalCandidate> {
	let by_index: HashMap<&str, &MetadataRow> = rows
		.iter()
		.flat_map(|row| row.indexes.iter().map(move |index| (index.data_id.as_str(), row)))
		.collect();
	let mut seen = HashSet::new();
	let mut out = Vec::with_capacity(hits.len());

	for hit in hits {
		let Some(row) = by_index.get(hit.id.as_str()) else {
			tracing::debug!(vector_id = %hit.id, "Vector hit has no data row.");

			continue;
		};

		// Several index vectors of one row collapse to its best-ranked hit.
		if !seen.insert(row.id.clone()) {
			continue;
		}

		if let Some(candidate) = candidate(row, hit.score, collections) {
			out.push(candidate);
		}
	}

	out
}

fn hydrate_full_text(
	hits: Vec<FullTextHit>,
	collections: &HashMap<String, Collection>,
) -> Vec<RetrievalCandidate> {
	let mut seen = HashSet::new();

	hits.into_iter()
		.filter(|hit| seen.insert(hit.row.id.clone()))
		.filter_map(|hit| candidate(&hit.row, hit.score, collections))
		.collect()
}

fn candidate(
	row: &MetadataRow,
	score: f32,
	collections: &HashMap<String, Collection>,
) -> Option<RetrievalCandidate> {
	let Some(collection) = collections.get(&row.collection_id) else {
		tracing::debug!(
			data_id = %row.id,
			collection_id = %row.collection_id,
			"Data row references a missing collection."
		);

		return None;
	};

	Some(RetrievalCandidate {
		id: row.id.clone(),
		q: row.q.clone(),
		a: row.a.clone(),
		dataset_id: row.dataset_id.clone(),
		collection_id: row.collection_id.clone(),
		source_name: collection.name.clone(),
		source_id: collection.source_id().map(str::to_string),
		score,
	})
}

fn truncate(mut candidates: Vec<RetrievalCandidate>, limit: u32) -> Vec<RetrievalCandidate> {
	candidates.truncate(limit as usize);

	candidates
}
