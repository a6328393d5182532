//! Word segmentation for lexical recall.
//!
//! Han and kana runs go through a dictionary segmenter in search mode, which emits both the long
//! words and their shorter sub-words. Everything else is split on Unicode word boundaries and
//! lowercased. The output is deduplicated in first-seen order so it can be handed to a
//! `websearch_to_tsquery` style OR query as-is.

use std::{collections::HashSet, sync::LazyLock};

use jieba_rs::Jieba;
use unicode_segmentation::UnicodeSegmentation;

use crate::cjk;

static JIEBA: LazyLock<Jieba> = LazyLock::new(Jieba::new);

pub const DEFAULT_MAX_TERMS: usize = 64;

pub fn segment_terms(text: &str, max_terms: usize) -> Vec<String> {
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for (segmented, run) in script_runs(text) {
		let tokens: Vec<String> = if segmented {
			JIEBA.cut_for_search(run, true).into_iter().map(str::to_string).collect()
		} else {
			run.unicode_words().map(str::to_lowercase).collect()
		};

		for token in tokens {
			if out.len() >= max_terms {
				return out;
			}

			let token = token.trim();

			if !token.chars().any(char::is_alphanumeric) {
				continue;
			}
			if seen.insert(token.to_string()) {
				out.push(token.to_string());
			}
		}
	}

	out
}

/// Joins segmented terms into a single space separated string for the text index.
pub fn segment_for_index(text: &str) -> String {
	segment_terms(text, usize::MAX).join(" ")
}

fn script_runs(text: &str) -> Vec<(bool, &str)> {
	let mut runs = Vec::new();
	let mut start = 0_usize;
	let mut current: Option<bool> = None;

	for (idx, ch) in text.char_indices() {
		let segmented = cjk::is_segmented_script(ch);

		match current {
			Some(kind) if kind == segmented => {},
			Some(kind) => {
				runs.push((kind, &text[start..idx]));

				start = idx;
				current = Some(segmented);
			},
			None => {
				start = idx;
				current = Some(segmented);
			},
		}
	}

	if let Some(kind) = current {
		runs.push((kind, &text[start..]));
	}

	runs
}
