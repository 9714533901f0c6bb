use crate::models::{millis_to_datetime, DocTaxonomyMapping};
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};
use storage::models::{decode_path, encode_path, MappingRow};

#[derive(Debug, Clone)]
pub struct MappingRecord {
    pub doc_id: String,
    pub node_id: String,
    pub version: String,
    pub path: Vec<String>,
    pub confidence: f64,
    pub hitl_required: bool,
}

/// Insert or update the mapping identified by `(doc_id, node_id, version)`.
///
/// Generic over the executor so review-queue transactions can include it.
pub async fn upsert_mapping<'e, E>(executor: E, record: &MappingRecord) -> sqlx::Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = Utc::now().timestamp_millis();
    sqlx::query(
        r#"
        INSERT INTO doc_taxonomy_mappings (doc_id, node_id, version, path, confidence, hitl_required, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        ON CONFLICT(doc_id, node_id, version) DO UPDATE SET
            path = excluded.path,
            confidence = excluded.confidence,
            hitl_required = excluded.hitl_required,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.doc_id)
    .bind(&record.node_id)
    .bind(&record.version)
    .bind(encode_path(&record.path))
    .bind(record.confidence)
    .bind(record.hitl_required)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Drop every mapping of `doc_id` in `version`. A chunk keeps one mapping per version,
/// so each new outcome clears the previous one first.
pub async fn delete_doc_mappings<'e, E>(executor: E, doc_id: &str, version: &str) -> sqlx::Result<u64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let done = sqlx::query("DELETE FROM doc_taxonomy_mappings WHERE doc_id = ?1 AND version = ?2")
        .bind(doc_id)
        .bind(version)
        .execute(executor)
        .await?;
    Ok(done.rows_affected())
}

pub(crate) fn mapping_from_row(row: MappingRow) -> sqlx::Result<DocTaxonomyMapping> {
    let path = decode_path(&row.path).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(DocTaxonomyMapping {
        doc_id: row.doc_id,
        node_id: row.node_id,
        version: row.version,
        path,
        confidence: row.confidence,
        hitl_required: row.hitl_required,
        created_at: millis_to_datetime(row.created_at),
        updated_at: millis_to_datetime(row.updated_at),
    })
}

#[derive(Clone)]
pub struct MappingStore {
    pool: SqlitePool,
}

impl MappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, record: &MappingRecord) -> sqlx::Result<()> {
        upsert_mapping(&self.pool, record).await
    }

    /// All mappings of a document in one taxonomy version.
    pub async fn for_doc(
        &self,
        doc_id: &str,
        version: &str,
    ) -> sqlx::Result<Vec<DocTaxonomyMapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(
            "SELECT * FROM doc_taxonomy_mappings WHERE doc_id = ?1 AND version = ?2 ORDER BY node_id",
        )
        .bind(doc_id)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(mapping_from_row).collect()
    }
}
