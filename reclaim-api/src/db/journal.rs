//! Journal entry persistence

use chrono::NaiveDate;
use reclaim_common::db::JournalEntry;
use reclaim_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_json, parse_timestamp, parse_uuid, to_json};

const ENTRY_COLUMNS: &str = "id, user_id, title, description, incident_date, safety_rating, \
     abuse_types, mood_before, mood_after, created_at, updated_at";

/// Validated input for a new entry
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub title: String,
    pub description: String,
    pub incident_date: NaiveDate,
    pub safety_rating: i64,
    pub abuse_types: Vec<String>,
    pub mood_before: Option<i64>,
    pub mood_after: Option<i64>,
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct JournalEntryPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub incident_date: Option<NaiveDate>,
    pub safety_rating: Option<i64>,
    pub abuse_types: Option<Vec<String>>,
    pub mood_before: Option<i64>,
    pub mood_after: Option<i64>,
}

fn entry_from_row(row: &SqliteRow) -> Result<JournalEntry> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let incident_date: String = row.get("incident_date");
    let abuse_types: String = row.get("abuse_types");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(JournalEntry {
        id: parse_uuid(&id, "journal_entries.id")?,
        user_id: parse_uuid(&user_id, "journal_entries.user_id")?,
        title: row.get("title"),
        description: row.get("description"),
        incident_date: NaiveDate::parse_from_str(&incident_date, "%Y-%m-%d").map_err(|e| {
            Error::Internal(format!("Invalid incident_date '{}': {}", incident_date, e))
        })?,
        safety_rating: row.get("safety_rating"),
        abuse_types: parse_json(&abuse_types, "journal_entries.abuse_types")?,
        mood_before: row.get("mood_before"),
        mood_after: row.get("mood_after"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn insert_entry(
    pool: &SqlitePool,
    user_id: Uuid,
    new: &NewJournalEntry,
) -> Result<JournalEntry> {
    let now = time::now();
    let entry = JournalEntry {
        id: Uuid::new_v4(),
        user_id,
        title: new.title.clone(),
        description: new.description.clone(),
        incident_date: new.incident_date,
        safety_rating: new.safety_rating,
        abuse_types: new.abuse_types.clone(),
        mood_before: new.mood_before,
        mood_after: new.mood_after,
        created_at: now,
        updated_at: now,
    };

    write_entry(pool, &entry, true).await?;
    Ok(entry)
}

async fn write_entry(pool: &SqlitePool, entry: &JournalEntry, insert: bool) -> Result<()> {
    let abuse_types = to_json(&entry.abuse_types, "journal_entries.abuse_types")?;

    // Both statements bind the mutable columns first, then the key
    let sql = if insert {
        "INSERT INTO journal_entries (title, description, incident_date, safety_rating,
             abuse_types, mood_before, mood_after, updated_at, id, user_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    } else {
        "UPDATE journal_entries SET title = ?, description = ?, incident_date = ?,
             safety_rating = ?, abuse_types = ?, mood_before = ?, mood_after = ?,
             updated_at = ?
         WHERE id = ? AND user_id = ?"
    };

    let mut query = sqlx::query(sql)
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(entry.incident_date.format("%Y-%m-%d").to_string())
        .bind(entry.safety_rating)
        .bind(abuse_types)
        .bind(entry.mood_before)
        .bind(entry.mood_after)
        .bind(time::to_db_timestamp(entry.updated_at))
        .bind(entry.id.to_string())
        .bind(entry.user_id.to_string());

    if insert {
        query = query.bind(time::to_db_timestamp(entry.created_at));
    }

    query.execute(pool).await?;
    Ok(())
}

pub async fn get_entry(pool: &SqlitePool, user_id: Uuid, id: Uuid) -> Result<Option<JournalEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM journal_entries WHERE id = ? AND user_id = ?",
        ENTRY_COLUMNS
    ))
    .bind(id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// One page of entries, newest incident first
pub async fn list_entries(
    pool: &SqlitePool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<JournalEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM journal_entries WHERE user_id = ?
         ORDER BY incident_date DESC, created_at DESC
         LIMIT ? OFFSET ?",
        ENTRY_COLUMNS
    ))
    .bind(user_id.to_string())
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

pub async fn count_entries(pool: &SqlitePool, user_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM journal_entries WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Entries with `incident_date >= since`, oldest first
pub async fn entries_since(
    pool: &SqlitePool,
    user_id: Uuid,
    since: NaiveDate,
) -> Result<Vec<JournalEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM journal_entries WHERE user_id = ? AND incident_date >= ?
         ORDER BY incident_date ASC, created_at ASC",
        ENTRY_COLUMNS
    ))
    .bind(user_id.to_string())
    .bind(since.format("%Y-%m-%d").to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

/// Apply a partial update; `None` if the entry does not exist for this user
pub async fn update_entry(
    pool: &SqlitePool,
    user_id: Uuid,
    id: Uuid,
    patch: JournalEntryPatch,
) -> Result<Option<JournalEntry>> {
    let Some(mut entry) = get_entry(pool, user_id, id).await? else {
        return Ok(None);
    };

    if let Some(title) = patch.title {
        entry.title = title;
    }
    if let Some(description) = patch.description {
        entry.description = description;
    }
    if let Some(date) = patch.incident_date {
        entry.incident_date = date;
    }
    if let Some(rating) = patch.safety_rating {
        entry.safety_rating = rating;
    }
    if let Some(types) = patch.abuse_types {
        entry.abuse_types = types;
    }
    if patch.mood_before.is_some() {
        entry.mood_before = patch.mood_before;
    }
    if patch.mood_after.is_some() {
        entry.mood_after = patch.mood_after;
    }
    entry.updated_at = time::now();

    write_entry(pool, &entry, false).await?;
    Ok(Some(entry))
}

/// Delete an entry, detaching its evidence files
///
/// Returns `false` if the entry does not exist for this user.
pub async fn delete_entry(pool: &SqlitePool, user_id: Uuid, id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE evidence_files SET journal_entry_id = NULL, updated_at = ?
         WHERE journal_entry_id = ? AND user_id = ?",
    )
    .bind(time::to_db_timestamp(time::now()))
    .bind(id.to_string())
    .bind(user_id.to_string())
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM journal_entries WHERE id = ? AND user_id = ?")
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected() == 1)
}
