//! Evidence file persistence
//!
//! Transcription status changes go through [`transition`], a conditional
//! update guarded on the status the caller observed. Only one of several
//! concurrent writers can apply a given transition; the others see `false`
//! and must re-read the row.

use chrono::{DateTime, Utc};
use reclaim_common::db::{is_audio_mime, EvidenceFile, TranscriptionStatus};
use reclaim_common::{time, Error, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_json, parse_timestamp, parse_uuid, to_json};

const EVIDENCE_COLUMNS: &str = "id, user_id, journal_entry_id, file_name, file_type, \
     storage_path, file_size, transcription, transcription_status, metadata, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub id: Uuid,
    pub journal_entry_id: Option<Uuid>,
    pub file_name: String,
    pub file_type: String,
    pub storage_path: String,
    pub file_size: i64,
}

fn evidence_from_row(row: &SqliteRow) -> Result<EvidenceFile> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let journal_entry_id: Option<String> = row.get("journal_entry_id");
    let status: Option<String> = row.get("transcription_status");
    let metadata: String = row.get("metadata");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(EvidenceFile {
        id: parse_uuid(&id, "evidence_files.id")?,
        user_id: parse_uuid(&user_id, "evidence_files.user_id")?,
        journal_entry_id: journal_entry_id
            .map(|v| parse_uuid(&v, "evidence_files.journal_entry_id"))
            .transpose()?,
        file_name: row.get("file_name"),
        file_type: row.get("file_type"),
        storage_path: row.get("storage_path"),
        file_size: row.get("file_size"),
        transcription: row.get("transcription"),
        transcription_status: status.map(|s| s.parse()).transpose()?,
        metadata: parse_json(&metadata, "evidence_files.metadata")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Insert a row; audio files start `pending`, others have no status
pub async fn insert_evidence(
    pool: &SqlitePool,
    user_id: Uuid,
    new: &NewEvidence,
) -> Result<EvidenceFile> {
    let now = time::now();
    let evidence = EvidenceFile {
        id: new.id,
        user_id,
        journal_entry_id: new.journal_entry_id,
        file_name: new.file_name.clone(),
        file_type: new.file_type.clone(),
        storage_path: new.storage_path.clone(),
        file_size: new.file_size,
        transcription: None,
        transcription_status: is_audio_mime(&new.file_type).then_some(TranscriptionStatus::Pending),
        metadata: Value::Object(Default::default()),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(&format!(
        "INSERT INTO evidence_files ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        EVIDENCE_COLUMNS
    ))
    .bind(evidence.id.to_string())
    .bind(user_id.to_string())
    .bind(evidence.journal_entry_id.map(|id| id.to_string()))
    .bind(&evidence.file_name)
    .bind(&evidence.file_type)
    .bind(&evidence.storage_path)
    .bind(evidence.file_size)
    .bind(&evidence.transcription)
    .bind(evidence.transcription_status.map(|s| s.as_str()))
    .bind(to_json(&evidence.metadata, "evidence_files.metadata")?)
    .bind(time::to_db_timestamp(now))
    .bind(time::to_db_timestamp(now))
    .execute(pool)
    .await?;

    Ok(evidence)
}

pub async fn get_evidence(pool: &SqlitePool, user_id: Uuid, id: Uuid) -> Result<Option<EvidenceFile>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM evidence_files WHERE id = ? AND user_id = ?",
        EVIDENCE_COLUMNS
    ))
    .bind(id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(evidence_from_row).transpose()
}

/// Load a row regardless of owner (background tasks only)
pub async fn load_evidence(pool: &SqlitePool, id: Uuid) -> Result<Option<EvidenceFile>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM evidence_files WHERE id = ?",
        EVIDENCE_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(evidence_from_row).transpose()
}

/// MIME type recorded for a storage path, used when serving downloads
pub async fn file_type_for_path(pool: &SqlitePool, storage_path: &str) -> Result<Option<String>> {
    let file_type = sqlx::query_scalar("SELECT file_type FROM evidence_files WHERE storage_path = ?")
        .bind(storage_path)
        .fetch_optional(pool)
        .await?;

    Ok(file_type)
}

/// Evidence owned by `user_id`, newest first, optionally for one entry
pub async fn list_evidence(
    pool: &SqlitePool,
    user_id: Uuid,
    journal_entry_id: Option<Uuid>,
) -> Result<Vec<EvidenceFile>> {
    let rows = match journal_entry_id {
        Some(entry_id) => {
            sqlx::query(&format!(
                "SELECT {} FROM evidence_files WHERE user_id = ? AND journal_entry_id = ?
                 ORDER BY created_at DESC",
                EVIDENCE_COLUMNS
            ))
            .bind(user_id.to_string())
            .bind(entry_id.to_string())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM evidence_files WHERE user_id = ? ORDER BY created_at DESC",
                EVIDENCE_COLUMNS
            ))
            .bind(user_id.to_string())
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(evidence_from_row).collect()
}

/// Delete a row; returns the deleted row so the caller can remove the file
pub async fn delete_evidence(
    pool: &SqlitePool,
    user_id: Uuid,
    id: Uuid,
) -> Result<Option<EvidenceFile>> {
    let Some(evidence) = get_evidence(pool, user_id, id).await? else {
        return Ok(None);
    };

    sqlx::query("DELETE FROM evidence_files WHERE id = ? AND user_id = ?")
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    Ok(Some(evidence))
}

/// `processing` rows last written before `older_than`, oldest first
pub async fn stale_processing(
    pool: &SqlitePool,
    older_than: DateTime<Utc>,
    user_id: Option<Uuid>,
) -> Result<Vec<EvidenceFile>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM evidence_files
         WHERE transcription_status = 'processing' AND updated_at < ?
           AND (? IS NULL OR user_id = ?)
         ORDER BY updated_at ASC",
        EVIDENCE_COLUMNS
    ))
    .bind(time::to_db_timestamp(older_than))
    .bind(user_id.map(|id| id.to_string()))
    .bind(user_id.map(|id| id.to_string()))
    .fetch_all(pool)
    .await?;

    rows.iter().map(evidence_from_row).collect()
}

/// Conditionally move a row from `expected` to `next`
///
/// `transcription` and `metadata` are written together with the status.
/// With `expected_attempt` the row must also still be on that
/// `transcription_attempts` value, so a result for an earlier attempt never
/// lands on a retry. Returns `false` when the row did not match (someone
/// else already moved it, or it does not exist).
pub async fn transition(
    pool: &SqlitePool,
    id: Uuid,
    expected: TranscriptionStatus,
    expected_attempt: Option<i64>,
    next: TranscriptionStatus,
    transcription: Option<&str>,
    metadata: &Value,
) -> Result<bool> {
    if !expected.can_transition_to(next) {
        return Err(Error::InvalidInput(format!(
            "Illegal transcription transition {} -> {}",
            expected, next
        )));
    }

    let result = sqlx::query(
        "UPDATE evidence_files
         SET transcription_status = ?, transcription = ?, metadata = ?, updated_at = ?
         WHERE id = ? AND transcription_status = ?
           AND (? IS NULL OR json_extract(metadata, '$.transcription_attempts') = ?)",
    )
    .bind(next.as_str())
    .bind(transcription)
    .bind(to_json(metadata, "evidence_files.metadata")?)
    .bind(time::to_db_timestamp(time::now()))
    .bind(id.to_string())
    .bind(expected.as_str())
    .bind(expected_attempt)
    .bind(expected_attempt)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Replace metadata only while the row is still in `expected` (and on
/// `expected_attempt`, when given)
pub async fn update_metadata_if(
    pool: &SqlitePool,
    id: Uuid,
    expected: TranscriptionStatus,
    expected_attempt: Option<i64>,
    metadata: &Value,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE evidence_files SET metadata = ?, updated_at = ?
         WHERE id = ? AND transcription_status = ?
           AND (? IS NULL OR json_extract(metadata, '$.transcription_attempts') = ?)",
    )
    .bind(to_json(metadata, "evidence_files.metadata")?)
    .bind(time::to_db_timestamp(time::now()))
    .bind(id.to_string())
    .bind(expected.as_str())
    .bind(expected_attempt)
    .bind(expected_attempt)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
