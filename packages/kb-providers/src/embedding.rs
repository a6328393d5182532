use serde_json::Value;

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingOutput {
	pub vectors: Vec<Vec<f32>>,
	/// Tokens billed for the request, zero when the provider omits usage.
	pub token_len: u32,
}

pub async fn embed(
	cfg: &kb_config::EmbeddingProviderConfig,
	model: &str,
	texts: &[String],
) -> Result<EmbeddingOutput> {
	let client = crate::http_client(cfg.timeout_ms)?;
	let url = crate::endpoint(&cfg.api_base, &cfg.path);
	let model = if model.trim().is_empty() { cfg.model.as_str() } else { model };
	let body = serde_json::json!({
		"model": model,
		"input": texts,
		"dimensions": cfg.dimensions,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;
	let output = parse_embedding_response(json)?;

	if output.vectors.len() != texts.len() {
		return Err(Error::InvalidResponse {
			message: format!(
				"Embedding provider returned {} vectors for {} inputs.",
				output.vectors.len(),
				texts.len()
			),
		});
	}
	if let Some(vector) = output.vectors.iter().find(|v| v.len() != cfg.dimensions as usize) {
		return Err(Error::InvalidResponse {
			message: format!(
				"Embedding dimension mismatch. Expected {}, got {}.",
				cfg.dimensions,
				vector.len()
			),
		});
	}

	Ok(output)
}

fn parse_embedding_response(json: Value) -> Result<EmbeddingOutput> {
	let data = json.get("data").and_then(|v| v.as_array()).ok_or_else(|| {
		Error::InvalidResponse { message: "Embedding response is missing data array.".to_string() }
	})?;
	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);
		let embedding = item.get("embedding").and_then(|v| v.as_array()).ok_or_else(|| {
			Error::InvalidResponse {
				message: "Embedding item missing embedding array.".to_string(),
			}
		})?;
		let mut vec = Vec::with_capacity(embedding.len());

		for value in embedding {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding value must be numeric.".to_string(),
			})?;

			vec.push(number as f32);
		}

		indexed.push((index, vec));
	}

	indexed.sort_by_key(|(index, _)| *index);

	let token_len = json
		.get("usage")
		.and_then(|usage| usage.get("total_tokens").or_else(|| usage.get("prompt_tokens")))
		.and_then(|v| v.as_u64())
		.unwrap_or(0) as u32;

	Ok(EmbeddingOutput { vectors: indexed.into_iter().map(|(_, vec)| vec).collect(), token_len })
}
