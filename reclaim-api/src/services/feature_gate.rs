//! Per-tier monthly feature limits
//!
//! Limits are compiled constants; usage is counted from `usage_tracking`
//! for the current UTC billing period (`YYYY-MM`).
//!
//! Two ways to meter an action:
//! - [`consume`] checks and records in one atomic step. Used for actions
//!   that are pure database writes (journal entries, uploads, boundaries).
//! - [`ensure_allowed`] before the work and [`record_feature_usage`] after
//!   it succeeds. Used when the action calls an external provider that may
//!   fail, so failed calls are not charged.

use reclaim_common::db::SubscriptionTier;
use reclaim_common::{time, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use uuid::Uuid;

use crate::db::usage;
use crate::error::{ApiError, ApiResult};

/// Metered feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    JournalEntries,
    EvidenceUploads,
    AudioTranscription,
    AiTitleSuggestions,
    PatternAnalysis,
    Boundaries,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::JournalEntries,
        Feature::EvidenceUploads,
        Feature::AudioTranscription,
        Feature::AiTitleSuggestions,
        Feature::PatternAnalysis,
        Feature::Boundaries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::JournalEntries => "journal_entries",
            Feature::EvidenceUploads => "evidence_uploads",
            Feature::AudioTranscription => "audio_transcription",
            Feature::AiTitleSuggestions => "ai_title_suggestions",
            Feature::PatternAnalysis => "pattern_analysis",
            Feature::Boundaries => "boundaries",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monthly allowance of `feature` on `tier` (`None` = unlimited)
pub fn monthly_limit(tier: SubscriptionTier, feature: Feature) -> Option<i64> {
    use Feature::*;
    use SubscriptionTier::*;

    match (tier, feature) {
        (Empowerment, _) => None,

        (Foundation, JournalEntries) => Some(30),
        (Foundation, EvidenceUploads) => Some(10),
        (Foundation, AudioTranscription) => Some(3),
        (Foundation, AiTitleSuggestions) => Some(10),
        (Foundation, PatternAnalysis) => Some(1),
        (Foundation, Boundaries) => Some(5),

        (Recovery, JournalEntries) => Some(200),
        (Recovery, EvidenceUploads) => Some(100),
        (Recovery, AudioTranscription) => Some(30),
        (Recovery, AiTitleSuggestions) => Some(100),
        (Recovery, PatternAnalysis) => Some(10),
        (Recovery, Boundaries) => Some(50),
    }
}

/// Whether `candidate` grants strictly more of `feature` than `current`
fn grants_more(candidate: Option<i64>, current: Option<i64>) -> bool {
    match (candidate, current) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(c), Some(l)) => c > l,
    }
}

/// Outcome of comparing a user's usage against their tier's allowance
#[derive(Debug, Clone, Serialize)]
pub struct LimitCheck {
    pub feature: Feature,
    pub tier: SubscriptionTier,
    pub current_usage: i64,
    pub limit: Option<i64>,
    /// Another use is allowed this period
    pub allowed: bool,
    pub remaining: Option<i64>,
    /// Blocked, and some higher tier grants a larger or unlimited allowance
    pub upgrade_required: bool,
    /// Cheapest higher tier under which the next use would be allowed
    pub suggested_tier: Option<SubscriptionTier>,
}

impl LimitCheck {
    /// Pure evaluation, no database access
    pub fn evaluate(tier: SubscriptionTier, feature: Feature, current_usage: i64) -> Self {
        let limit = monthly_limit(tier, feature);
        let allowed = limit.map_or(true, |l| current_usage < l);
        let remaining = limit.map(|l| (l - current_usage).max(0));

        let upgrade_available = tier
            .higher_tiers()
            .any(|t| grants_more(monthly_limit(t, feature), limit));

        let suggested_tier = if allowed {
            None
        } else {
            tier.higher_tiers()
                .find(|t| monthly_limit(*t, feature).map_or(true, |l| current_usage < l))
        };

        Self {
            feature,
            tier,
            current_usage,
            limit,
            allowed,
            remaining,
            upgrade_required: !allowed && upgrade_available,
            suggested_tier,
        }
    }
}

/// Compare current-period usage with the tier allowance
pub async fn check_feature_limit(
    pool: &SqlitePool,
    user_id: Uuid,
    tier: SubscriptionTier,
    feature: Feature,
) -> Result<LimitCheck> {
    let period = time::billing_period(time::now());
    let current_usage = usage::count_usage(pool, user_id, feature.as_str(), &period).await?;

    Ok(LimitCheck::evaluate(tier, feature, current_usage))
}

/// Record one use in the current billing period
pub async fn record_feature_usage(pool: &SqlitePool, user_id: Uuid, feature: Feature) -> Result<()> {
    let period = time::billing_period(time::now());
    usage::record_usage(pool, user_id, feature.as_str(), &period).await?;

    tracing::debug!(user_id = %user_id, feature = %feature, period = %period, "Recorded feature usage");
    Ok(())
}

/// [`check_feature_limit`], failing with 429 when the allowance is used up
pub async fn ensure_allowed(
    pool: &SqlitePool,
    user_id: Uuid,
    tier: SubscriptionTier,
    feature: Feature,
) -> ApiResult<LimitCheck> {
    let check = check_feature_limit(pool, user_id, tier, feature).await?;

    if !check.allowed {
        tracing::info!(
            user_id = %user_id,
            feature = %feature,
            tier = %tier,
            current_usage = check.current_usage,
            "Feature limit reached"
        );
        return Err(ApiError::LimitExceeded(check));
    }

    Ok(check)
}

/// Check and record one use atomically
///
/// Returns the post-consumption state.
pub async fn consume(
    pool: &SqlitePool,
    user_id: Uuid,
    tier: SubscriptionTier,
    feature: Feature,
) -> ApiResult<LimitCheck> {
    let period = time::billing_period(time::now());

    let recorded = match monthly_limit(tier, feature) {
        Some(limit) => {
            usage::record_usage_within_limit(pool, user_id, feature.as_str(), &period, limit)
                .await?
        }
        None => {
            usage::record_usage(pool, user_id, feature.as_str(), &period).await?;
            true
        }
    };

    let current_usage = usage::count_usage(pool, user_id, feature.as_str(), &period).await?;

    if !recorded {
        let check = LimitCheck::evaluate(tier, feature, current_usage);
        tracing::info!(
            user_id = %user_id,
            feature = %feature,
            tier = %tier,
            current_usage,
            "Feature limit reached"
        );
        return Err(ApiError::LimitExceeded(check));
    }

    Ok(LimitCheck::evaluate(tier, feature, current_usage))
}

/// Usage against limits for every feature
pub async fn usage_summary(
    pool: &SqlitePool,
    user_id: Uuid,
    tier: SubscriptionTier,
) -> Result<Vec<LimitCheck>> {
    let mut checks = Vec::with_capacity(Feature::ALL.len());
    for feature in Feature::ALL {
        checks.push(check_feature_limit(pool, user_id, tier, feature).await?);
    }
    Ok(checks)
}

/// Public description of a tier
#[derive(Debug, Clone, Serialize)]
pub struct TierInfo {
    pub tier: SubscriptionTier,
    pub display_name: &'static str,
    pub description: &'static str,
    pub monthly_price_cents: u32,
    pub limits: Vec<FeatureLimit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureLimit {
    pub feature: Feature,
    /// `null` = unlimited
    pub monthly_limit: Option<i64>,
}

pub fn tier_catalogue() -> Vec<TierInfo> {
    SubscriptionTier::ALL
        .into_iter()
        .map(|tier| {
            let (display_name, description, monthly_price_cents) = match tier {
                SubscriptionTier::Foundation => (
                    "Foundation",
                    "Core journaling and evidence tools to start documenting safely",
                    0,
                ),
                SubscriptionTier::Recovery => (
                    "Recovery",
                    "Higher limits, regular transcription and AI insights for active recovery",
                    999,
                ),
                SubscriptionTier::Empowerment => (
                    "Empowerment",
                    "Unlimited access to every feature",
                    1999,
                ),
            };

            TierInfo {
                tier,
                display_name,
                description,
                monthly_price_cents,
                limits: Feature::ALL
                    .into_iter()
                    .map(|feature| FeatureLimit {
                        feature,
                        monthly_limit: monthly_limit(tier, feature),
                    })
                    .collect(),
            }
        })
        .collect()
}
