//! Personal boundary persistence

use reclaim_common::db::{Boundary, BoundaryCategory, BoundaryStatus};
use reclaim_common::{time, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};

const BOUNDARY_COLUMNS: &str =
    "id, user_id, title, description, category, status, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct BoundaryPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<BoundaryCategory>,
    pub status: Option<BoundaryStatus>,
}

fn boundary_from_row(row: &SqliteRow) -> Result<Boundary> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let category: String = row.get("category");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Boundary {
        id: parse_uuid(&id, "boundaries.id")?,
        user_id: parse_uuid(&user_id, "boundaries.user_id")?,
        title: row.get("title"),
        description: row.get("description"),
        category: category.parse()?,
        status: status.parse()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn insert_boundary(
    pool: &SqlitePool,
    user_id: Uuid,
    title: &str,
    description: Option<&str>,
    category: BoundaryCategory,
) -> Result<Boundary> {
    let now = time::now();
    let boundary = Boundary {
        id: Uuid::new_v4(),
        user_id,
        title: title.to_string(),
        description: description.map(str::to_string),
        category,
        status: BoundaryStatus::Active,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(&format!(
        "INSERT INTO boundaries ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        BOUNDARY_COLUMNS
    ))
    .bind(boundary.id.to_string())
    .bind(user_id.to_string())
    .bind(&boundary.title)
    .bind(&boundary.description)
    .bind(category.as_str())
    .bind(boundary.status.as_str())
    .bind(time::to_db_timestamp(now))
    .bind(time::to_db_timestamp(now))
    .execute(pool)
    .await?;

    Ok(boundary)
}

pub async fn get_boundary(pool: &SqlitePool, user_id: Uuid, id: Uuid) -> Result<Option<Boundary>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM boundaries WHERE id = ? AND user_id = ?",
        BOUNDARY_COLUMNS
    ))
    .bind(id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(boundary_from_row).transpose()
}

/// Boundaries newest first, optionally only those with `status`
pub async fn list_boundaries(
    pool: &SqlitePool,
    user_id: Uuid,
    status: Option<BoundaryStatus>,
) -> Result<Vec<Boundary>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM boundaries WHERE user_id = ? AND (? IS NULL OR status = ?)
         ORDER BY created_at DESC",
        BOUNDARY_COLUMNS
    ))
    .bind(user_id.to_string())
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    rows.iter().map(boundary_from_row).collect()
}

pub async fn update_boundary(
    pool: &SqlitePool,
    user_id: Uuid,
    id: Uuid,
    patch: BoundaryPatch,
) -> Result<Option<Boundary>> {
    let Some(mut boundary) = get_boundary(pool, user_id, id).await? else {
        return Ok(None);
    };

    if let Some(title) = patch.title {
        boundary.title = title;
    }
    if let Some(description) = patch.description {
        boundary.description = Some(description).filter(|d| !d.trim().is_empty());
    }
    if let Some(category) = patch.category {
        boundary.category = category;
    }
    if let Some(status) = patch.status {
        boundary.status = status;
    }
    boundary.updated_at = time::now();

    sqlx::query(
        "UPDATE boundaries SET title = ?, description = ?, category = ?, status = ?, updated_at = ?
         WHERE id = ? AND user_id = ?",
    )
    .bind(&boundary.title)
    .bind(&boundary.description)
    .bind(boundary.category.as_str())
    .bind(boundary.status.as_str())
    .bind(time::to_db_timestamp(boundary.updated_at))
    .bind(id.to_string())
    .bind(user_id.to_string())
    .execute(pool)
    .await?;

    Ok(Some(boundary))
}

pub async fn delete_boundary(pool: &SqlitePool, user_id: Uuid, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM boundaries WHERE id = ? AND user_id = ?")
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}
