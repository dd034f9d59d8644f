//! Profile persistence

use reclaim_common::db::{Profile, SubscriptionTier};
use reclaim_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};

const PROFILE_COLUMNS: &str =
    "id, email, display_name, subscription_tier, created_at, updated_at";

fn profile_from_row(row: &SqliteRow) -> Result<Profile> {
    let id: String = row.get("id");
    let tier: String = row.get("subscription_tier");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Profile {
        id: parse_uuid(&id, "profiles.id")?,
        email: row.get("email"),
        display_name: row.get("display_name"),
        subscription_tier: tier.parse()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Create a profile; emails are stored lowercased and must be unique
pub async fn create_profile(
    pool: &SqlitePool,
    email: &str,
    display_name: Option<&str>,
    tier: SubscriptionTier,
) -> Result<Profile> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::InvalidInput(format!("Invalid email: {}", email)));
    }

    if find_by_email(pool, &email).await?.is_some() {
        return Err(Error::InvalidInput(format!("Profile already exists: {}", email)));
    }

    let now = time::now();
    let profile = Profile {
        id: Uuid::new_v4(),
        email,
        display_name: display_name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        subscription_tier: tier,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO profiles (id, email, display_name, subscription_tier, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(profile.id.to_string())
    .bind(&profile.email)
    .bind(&profile.display_name)
    .bind(profile.subscription_tier.as_str())
    .bind(time::to_db_timestamp(now))
    .bind(time::to_db_timestamp(now))
    .execute(pool)
    .await?;

    tracing::info!(user_id = %profile.id, tier = %tier, "Created profile");
    Ok(profile)
}

pub async fn get_profile(pool: &SqlitePool, user_id: Uuid) -> Result<Option<Profile>> {
    let row = sqlx::query(&format!("SELECT {} FROM profiles WHERE id = ?", PROFILE_COLUMNS))
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(profile_from_row).transpose()
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Profile>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM profiles WHERE email = ?",
        PROFILE_COLUMNS
    ))
    .bind(email.trim().to_lowercase())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(profile_from_row).transpose()
}

/// Change a profile's tier; returns `false` if the profile does not exist
pub async fn set_tier(pool: &SqlitePool, user_id: Uuid, tier: SubscriptionTier) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE profiles SET subscription_tier = ?, updated_at = ? WHERE id = ?",
    )
    .bind(tier.as_str())
    .bind(time::to_db_timestamp(time::now()))
    .bind(user_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Update the display name; `None` clears it
pub async fn update_display_name(
    pool: &SqlitePool,
    user_id: Uuid,
    display_name: Option<&str>,
) -> Result<Option<Profile>> {
    sqlx::query("UPDATE profiles SET display_name = ?, updated_at = ? WHERE id = ?")
        .bind(display_name.map(str::trim).filter(|s| !s.is_empty()))
        .bind(time::to_db_timestamp(time::now()))
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    get_profile(pool, user_id).await
}
