use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// One indexed text of a data row. `data_id` is the vector id the text was embedded into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIndex {
	pub data_id: String,
	#[serde(rename = "type", default = "default_index_kind")]
	pub kind: String,
	#[serde(default)]
	pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetadataRow {
	pub id: String,
	pub team_id: String,
	pub dataset_id: String,
	pub collection_id: String,
	pub q: String,
	pub a: String,
	pub indexes: Vec<DataIndex>,
	pub updated_at: OffsetDateTime,
}

/// Insert payload for a data row. `full_text` is the pre-segmented text fed to the lexical index.
#[derive(Clone, Debug)]
pub struct NewMetadataRow {
	pub id: String,
	pub team_id: String,
	pub dataset_id: String,
	pub collection_id: String,
	pub q: String,
	pub a: String,
	pub indexes: Vec<DataIndex>,
	pub full_text: String,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collection {
	pub id: String,
	pub team_id: String,
	pub dataset_id: String,
	pub name: String,
	pub file_id: Option<String>,
	pub raw_link: Option<String>,
	pub forbid: bool,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
impl Collection {
	/// File id for uploaded documents, the link for web sources, `None` for manual entries.
	pub fn source_id(&self) -> Option<&str> {
		self.file_id.as_deref().or(self.raw_link.as_deref())
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileBlob {
	pub id: String,
	pub bucket: String,
	pub team_id: String,
	pub filename: String,
	pub uploaded_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainingJob {
	pub id: String,
	pub team_id: String,
	pub dataset_id: String,
	pub collection_id: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectionRef {
	pub team_id: String,
	pub dataset_id: String,
	pub collection_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VectorDataItem {
	pub id: String,
	pub team_id: String,
	pub dataset_id: String,
	pub collection_id: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingRecallItem {
	pub id: String,
	pub collection_id: String,
	/// Backend native similarity, higher is closer.
	pub score: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FullTextHit {
	pub row: MetadataRow,
	pub score: f32,
}

/// Half-open `[start, end)` interval used by every time-windowed scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
	pub start: OffsetDateTime,
	pub end: OffsetDateTime,
}
impl TimeWindow {
	pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
		Self { start, end }
	}

	/// `[now - lookback, now - safety_margin)`.
	pub fn trailing(now: OffsetDateTime, lookback: Duration, safety_margin: Duration) -> Self {
		Self { start: now - lookback, end: now - safety_margin }
	}

	pub fn contains(&self, ts: OffsetDateTime) -> bool {
		self.start <= ts && ts < self.end
	}

	pub fn is_empty(&self) -> bool {
		self.start >= self.end
	}
}

fn default_index_kind() -> String {
	"custom".to_string()
}

#[cfg(test)]
mod tests {
	use time::{Duration, macros::datetime};

	use super::{DataIndex, TimeWindow};

	#[test]
	fn window_is_half_open() {
		let window = TimeWindow::new(datetime!(2026-01-01 00:00 UTC), datetime!(2026-01-01 06:00 UTC));

		assert!(window.contains(datetime!(2026-01-01 00:00 UTC)));
		assert!(window.contains(datetime!(2026-01-01 05:59:59 UTC)));
		assert!(!window.contains(datetime!(2026-01-01 06:00 UTC)));
		assert!(!window.contains(datetime!(2026-01-01 06:00:01 UTC)));
	}

	#[test]
	fn trailing_window_leaves_safety_margin() {
		let now = datetime!(2026-01-01 12:00 UTC);
		let window = TimeWindow::trailing(now, Duration::hours(6), Duration::hours(1));

		assert_eq!(window.start, datetime!(2026-01-01 06:00 UTC));
		assert_eq!(window.end, datetime!(2026-01-01 11:00 UTC));
		assert!(!window.contains(now - Duration::minutes(30)));
	}

	#[test]
	fn data_index_reads_type_field() {
		let index: DataIndex =
			serde_json::from_value(serde_json::json!({ "data_id": "42", "type": "default" }))
				.expect("Index must parse.");

		assert_eq!(index.kind, "default");
		assert!(index.text.is_empty());
	}
}
