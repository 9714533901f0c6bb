//! Human-in-the-loop review queue.
//!
//! Tasks move `pending -> completed` exactly once. Every mutation is a single SQLite
//! transaction that touches both the task row and the linked mapping, so a mapping is
//! never left half-updated. Completion is guarded by `WHERE status = 'pending'`; when two
//! reviewers race, the database serializes them and the loser gets `AlreadyCompleted`.
//!
//! A chunk has at most one open task and one mapping per taxonomy version. Re-queueing a
//! chunk refreshes its open task in place; accepting a confident result drops it.

use crate::config::HitlConfig;
use crate::mapping::{delete_doc_mappings, upsert_mapping, MappingRecord};
use crate::models::{
    clamp_confidence, millis_to_datetime, HitlStats, HitlTask, TaskPriority, TaskStatus,
};
use crate::taxonomy::{path_key, resolve_node_id, TaxonomyCatalog};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use storage::models::{decode_path, encode_path, HitlTaskRow};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum HitlError {
    #[error("review queue storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("cannot encode alternatives: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("review task not found: {0}")]
    TaskNotFound(String),
    #[error("task {task_id} belongs to chunk {expected}, not {got}")]
    ChunkMismatch {
        task_id: String,
        expected: String,
        got: String,
    },
    #[error("approved path must not be empty")]
    EmptyPath,
    #[error("confidence {0} outside [0, 1]")]
    InvalidConfidence(f64),
    #[error("corrupt review task {task_id}: {reason}")]
    Corrupt { task_id: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct HitlSettings {
    pub recent_window: i64,
    pub readiness_min_interactions: i64,
    pub readiness_min_success_rate: f64,
    pub snippet_chars: usize,
}

impl Default for HitlSettings {
    fn default() -> Self {
        (&HitlConfig::default()).into()
    }
}

impl From<&HitlConfig> for HitlSettings {
    fn from(cfg: &HitlConfig) -> Self {
        Self {
            recent_window: cfg.recent_window.max(1),
            readiness_min_interactions: cfg.readiness_min_interactions,
            readiness_min_success_rate: cfg.readiness_min_success_rate,
            snippet_chars: cfg.snippet_chars,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub chunk_id: String,
    pub taxonomy_version: String,
    /// Node the provisional mapping is stored under.
    pub node_id: String,
    pub text: String,
    pub suggested_path: Vec<String>,
    pub confidence: f64,
    pub alternatives: Vec<Vec<String>>,
    pub priority: TaskPriority,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub task_id: String,
    pub chunk_id: String,
    pub approved_path: Vec<String>,
    pub confidence_override: Option<f64>,
    pub reviewer_notes: Option<String>,
    pub reviewer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "task", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed(HitlTask),
    /// The task was already terminal; nothing was written.
    AlreadyCompleted(HitlTask),
}

impl CompletionOutcome {
    pub fn task(&self) -> &HitlTask {
        match self {
            CompletionOutcome::Completed(t) | CompletionOutcome::AlreadyCompleted(t) => t,
        }
    }
}

fn task_from_row(row: HitlTaskRow) -> Result<HitlTask, HitlError> {
    let corrupt = |reason: String| HitlError::Corrupt {
        task_id: row.task_id.clone(),
        reason,
    };
    let suggested_path = decode_path(&row.suggested_path).map_err(|e| corrupt(e.to_string()))?;
    let alternatives: Vec<Vec<String>> =
        serde_json::from_str(&row.alternatives).map_err(|e| corrupt(e.to_string()))?;
    let approved_path = row
        .approved_path
        .as_deref()
        .map(decode_path)
        .transpose()
        .map_err(|e| corrupt(e.to_string()))?;
    let status = TaskStatus::parse(&row.status)
        .ok_or_else(|| corrupt(format!("unknown status {}", row.status)))?;
    let priority = TaskPriority::parse(&row.priority)
        .ok_or_else(|| corrupt(format!("unknown priority {}", row.priority)))?;

    Ok(HitlTask {
        task_id: row.task_id,
        chunk_id: row.chunk_id,
        taxonomy_version: row.taxonomy_version,
        node_id: row.node_id,
        text_snippet: row.text_snippet,
        suggested_path,
        confidence: row.confidence,
        alternatives,
        priority,
        status,
        created_at: millis_to_datetime(row.created_at),
        completed_at: row.completed_at.map(millis_to_datetime),
        reviewer_id: row.reviewer_id,
        reviewer_notes: row.reviewer_notes,
        approved_path,
        final_confidence: row.final_confidence,
    })
}

#[derive(Clone)]
pub struct HitlQueueManager {
    pool: SqlitePool,
    settings: HitlSettings,
    catalog: Option<Arc<dyn TaxonomyCatalog>>,
}

impl HitlQueueManager {
    pub fn new(pool: SqlitePool, settings: HitlSettings) -> Self {
        Self {
            pool,
            settings,
            catalog: None,
        }
    }

    /// Resolve approved paths to catalog node ids on completion.
    pub fn with_catalog(mut self, catalog: Arc<dyn TaxonomyCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Queue a result for review and store its provisional mapping with `hitl_required` set.
    ///
    /// If the chunk already has an open task in this version, that task is updated in place
    /// and keeps its id and position in the queue.
    pub async fn add_task(&self, task: NewTask) -> Result<HitlTask, HitlError> {
        if task.suggested_path.is_empty() {
            return Err(HitlError::EmptyPath);
        }
        let snippet: String = task.text.chars().take(self.settings.snippet_chars).collect();
        let confidence = clamp_confidence(task.confidence);
        let alternatives = serde_json::to_string(&task.alternatives)?;
        let now = Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;
        let open: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT task_id, created_at FROM hitl_tasks
            WHERE chunk_id = ?1 AND taxonomy_version = ?2 AND status = 'pending'
            ORDER BY id ASC LIMIT 1
            "#,
        )
        .bind(&task.chunk_id)
        .bind(&task.taxonomy_version)
        .fetch_optional(&mut *tx)
        .await?;

        let (task_id, created_at) = match open {
            Some((task_id, created_at)) => {
                sqlx::query(
                    r#"
                    UPDATE hitl_tasks SET
                        node_id = ?2,
                        text_snippet = ?3,
                        suggested_path = ?4,
                        confidence = ?5,
                        alternatives = ?6,
                        priority = ?7
                    WHERE task_id = ?1 AND status = 'pending'
                    "#,
                )
                .bind(&task_id)
                .bind(&task.node_id)
                .bind(&snippet)
                .bind(encode_path(&task.suggested_path))
                .bind(confidence)
                .bind(&alternatives)
                .bind(task.priority.as_str())
                .execute(&mut *tx)
                .await?;
                (task_id, created_at)
            }
            None => {
                let task_id = uuid::Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO hitl_tasks (task_id, chunk_id, taxonomy_version, node_id, text_snippet,
                        suggested_path, confidence, alternatives, priority, status, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10)
                    "#,
                )
                .bind(&task_id)
                .bind(&task.chunk_id)
                .bind(&task.taxonomy_version)
                .bind(&task.node_id)
                .bind(&snippet)
                .bind(encode_path(&task.suggested_path))
                .bind(confidence)
                .bind(&alternatives)
                .bind(task.priority.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await?;
                (task_id, now)
            }
        };

        delete_doc_mappings(&mut *tx, &task.chunk_id, &task.taxonomy_version).await?;
        upsert_mapping(
            &mut *tx,
            &MappingRecord {
                doc_id: task.chunk_id.clone(),
                node_id: task.node_id.clone(),
                version: task.taxonomy_version.clone(),
                path: task.suggested_path.clone(),
                confidence,
                hitl_required: true,
            },
        )
        .await?;
        tx.commit().await?;

        info!(task_id = %task_id, chunk_id = %task.chunk_id, confidence, "queued review task");
        Ok(HitlTask {
            task_id,
            chunk_id: task.chunk_id,
            taxonomy_version: task.taxonomy_version,
            node_id: task.node_id,
            text_snippet: snippet,
            suggested_path: task.suggested_path,
            confidence,
            alternatives: task.alternatives,
            priority: task.priority,
            status: TaskStatus::Pending,
            created_at: millis_to_datetime(created_at),
            completed_at: None,
            reviewer_id: None,
            reviewer_notes: None,
            approved_path: None,
            final_confidence: None,
        })
    }

    /// Store a result that needs no review as the chunk's only mapping in its version.
    /// An open task left by an earlier run of the same chunk is dropped.
    pub async fn accept_mapping(&self, record: &MappingRecord) -> Result<(), HitlError> {
        let mut tx = self.pool.begin().await?;
        let dropped = sqlx::query(
            "DELETE FROM hitl_tasks WHERE chunk_id = ?1 AND taxonomy_version = ?2 AND status = 'pending'",
        )
        .bind(&record.doc_id)
        .bind(&record.version)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        delete_doc_mappings(&mut *tx, &record.doc_id, &record.version).await?;
        upsert_mapping(&mut *tx, record).await?;
        tx.commit().await?;

        if dropped > 0 {
            info!(chunk_id = %record.doc_id, dropped, "open review no longer needed");
        }
        Ok(())
    }

    /// Pending tasks, least confident first, oldest first among equals.
    pub async fn get_pending_tasks(&self, limit: i64) -> Result<Vec<HitlTask>, HitlError> {
        let rows = sqlx::query_as::<_, HitlTaskRow>(
            r#"
            SELECT * FROM hitl_tasks
            WHERE status = 'pending'
            ORDER BY confidence ASC, created_at ASC, id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(task_from_row).collect()
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<HitlTask>, HitlError> {
        let row = sqlx::query_as::<_, HitlTaskRow>("SELECT * FROM hitl_tasks WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(task_from_row).transpose()
    }

    async fn approved_node_id(&self, version: &str, path: &[String]) -> String {
        let Some(catalog) = &self.catalog else {
            return path_key(path);
        };
        match catalog.leaf_nodes(version).await {
            Ok(nodes) => resolve_node_id(&nodes, path),
            Err(err) => {
                warn!(version, error = %err, "cannot resolve approved path against catalog");
                path_key(path)
            }
        }
    }

    /// Record a reviewer's decision and finalize the linked mapping.
    pub async fn complete_task(&self, completion: Completion) -> Result<CompletionOutcome, HitlError> {
        if completion.approved_path.is_empty()
            || completion.approved_path.iter().any(|l| l.trim().is_empty())
        {
            return Err(HitlError::EmptyPath);
        }
        if let Some(value) = completion.confidence_override {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(HitlError::InvalidConfidence(value));
            }
        }

        let task = self
            .get_task(&completion.task_id)
            .await?
            .ok_or_else(|| HitlError::TaskNotFound(completion.task_id.clone()))?;
        if task.chunk_id != completion.chunk_id {
            return Err(HitlError::ChunkMismatch {
                task_id: task.task_id,
                expected: task.chunk_id,
                got: completion.chunk_id,
            });
        }
        if task.status == TaskStatus::Completed {
            info!(task_id = %task.task_id, "task already completed; ignoring");
            return Ok(CompletionOutcome::AlreadyCompleted(task));
        }

        let final_confidence = completion.confidence_override.unwrap_or(1.0);
        let node_id = self
            .approved_node_id(&task.taxonomy_version, &completion.approved_path)
            .await;
        let now = Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE hitl_tasks SET
                status = 'completed',
                completed_at = ?2,
                reviewer_id = ?3,
                reviewer_notes = ?4,
                approved_path = ?5,
                final_confidence = ?6
            WHERE task_id = ?1 AND status = 'pending'
            "#,
        )
        .bind(&task.task_id)
        .bind(now)
        .bind(&completion.reviewer_id)
        .bind(&completion.reviewer_notes)
        .bind(encode_path(&completion.approved_path))
        .bind(final_confidence)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            let current = self
                .get_task(&task.task_id)
                .await?
                .ok_or_else(|| HitlError::TaskNotFound(task.task_id.clone()))?;
            info!(task_id = %task.task_id, "task completed concurrently; ignoring");
            return Ok(CompletionOutcome::AlreadyCompleted(current));
        }

        // The provisional row may sit under a different node than the approved one.
        delete_doc_mappings(&mut *tx, &task.chunk_id, &task.taxonomy_version).await?;
        upsert_mapping(
            &mut *tx,
            &MappingRecord {
                doc_id: task.chunk_id.clone(),
                node_id,
                version: task.taxonomy_version.clone(),
                path: completion.approved_path.clone(),
                confidence: final_confidence,
                hitl_required: false,
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            task_id = %task.task_id,
            reviewer = %completion.reviewer_id,
            final_confidence,
            "review task completed"
        );
        let done = self
            .get_task(&task.task_id)
            .await?
            .ok_or_else(|| HitlError::TaskNotFound(task.task_id.clone()))?;
        Ok(CompletionOutcome::Completed(done))
    }

    pub async fn get_stats(&self) -> Result<HitlStats, HitlError> {
        let pending: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM hitl_tasks WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        let (completed, approved_as_suggested): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN approved_path = suggested_path THEN 1 ELSE 0 END), 0)
            FROM hitl_tasks WHERE status = 'completed'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let recent_mean_confidence: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(final_confidence) FROM (
                SELECT final_confidence FROM hitl_tasks
                WHERE status = 'completed'
                ORDER BY completed_at DESC, id DESC
                LIMIT ?1
            )
            "#,
        )
        .bind(self.settings.recent_window)
        .fetch_one(&self.pool)
        .await?;

        let success_rate = if completed > 0 {
            approved_as_suggested as f64 / completed as f64
        } else {
            0.0
        };
        let model_ready = completed >= self.settings.readiness_min_interactions
            && success_rate >= self.settings.readiness_min_success_rate;

        Ok(HitlStats {
            pending,
            completed,
            recent_mean_confidence,
            success_rate,
            interactions: completed,
            model_ready,
        })
    }
}
