use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

#[derive(Clone, Debug, Serialize)]
pub struct RerankDocument {
	pub id: String,
	pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RerankScore {
	pub id: String,
	pub score: f32,
}

/// Scores `docs` against `query`. Only documents the provider returned are present in the output,
/// ordered by descending score.
pub async fn rerank(
	cfg: &kb_config::ProviderConfig,
	query: &str,
	docs: &[RerankDocument],
) -> Result<Vec<RerankScore>> {
	let client = crate::http_client(cfg.timeout_ms)?;
	let url = crate::endpoint(&cfg.api_base, &cfg.path);
	let texts: Vec<&str> = docs.iter().map(|doc| doc.text.as_str()).collect();
	let body = serde_json::json!({ "model": cfg.model, "query": query, "documents": texts });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rerank_response(json, docs)
}

fn parse_rerank_response(json: Value, docs: &[RerankDocument]) -> Result<Vec<RerankScore>> {
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Rerank response is missing results array.".to_string(),
		})?;
	let mut scores = Vec::with_capacity(results.len());

	for item in results {
		let index = item.get("index").and_then(|v| v.as_u64()).ok_or_else(|| {
			Error::InvalidResponse { message: "Rerank result missing index.".to_string() }
		})? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::InvalidResponse {
				message: "Rerank result missing score.".to_string(),
			})? as f32;
		let Some(doc) = docs.get(index) else {
			return Err(Error::InvalidResponse {
				message: format!("Rerank result index {index} is out of range."),
			});
		};

		scores.push(RerankScore { id: doc.id.clone(), score });
	}

	scores.sort_by(|a, b| b.score.total_cmp(&a.score));

	Ok(scores)
}
