//! Row shapes for the pipeline tables. Paths are stored as JSON arrays of labels.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaxonomyNodeRow {
    pub id: String,
    pub version: String,
    pub label: String,
    pub canonical_path: String,
    pub embedding: Option<Vec<u8>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MappingRow {
    pub doc_id: String,
    pub node_id: String,
    pub version: String,
    pub path: String,
    pub confidence: f64,
    pub hitl_required: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HitlTaskRow {
    pub id: i64,
    pub task_id: String,
    pub chunk_id: String,
    pub taxonomy_version: String,
    pub node_id: String,
    pub text_snippet: String,
    pub suggested_path: String,
    pub confidence: f64,
    pub alternatives: String,
    pub priority: String,
    pub status: String,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub reviewer_id: Option<String>,
    pub reviewer_notes: Option<String>,
    pub approved_path: Option<String>,
    pub final_confidence: Option<f64>,
}

/// Decode a JSON label array column.
pub fn decode_path(raw: &str) -> serde_json::Result<Vec<String>> {
    serde_json::from_str(raw)
}

/// Encode labels for a JSON label array column.
pub fn encode_path(path: &[String]) -> String {
    serde_json::Value::from(path.to_vec()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_columns_keep_label_order() {
        let path = vec!["Finance".to_string(), "Reports".to_string()];
        let raw = encode_path(&path);
        assert_eq!(raw, r#"["Finance","Reports"]"#);
        assert_eq!(decode_path(&raw).unwrap(), path);
        assert!(decode_path("not json").is_err());
    }
}
