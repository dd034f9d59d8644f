//! Database models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Subscription level gating monthly feature limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Foundation,
    Recovery,
    Empowerment,
}

impl SubscriptionTier {
    /// All tiers, cheapest first
    pub const ALL: [SubscriptionTier; 3] = [
        SubscriptionTier::Foundation,
        SubscriptionTier::Recovery,
        SubscriptionTier::Empowerment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Foundation => "foundation",
            SubscriptionTier::Recovery => "recovery",
            SubscriptionTier::Empowerment => "empowerment",
        }
    }

    /// Tiers strictly above this one, cheapest first
    pub fn higher_tiers(&self) -> impl Iterator<Item = SubscriptionTier> + '_ {
        Self::ALL.into_iter().filter(move |t| t > self)
    }
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        SubscriptionTier::Foundation
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "foundation" => Ok(SubscriptionTier::Foundation),
            "recovery" => Ok(SubscriptionTier::Recovery),
            "empowerment" => Ok(SubscriptionTier::Empowerment),
            other => Err(Error::InvalidInput(format!(
                "Unknown subscription tier: {}",
                other
            ))),
        }
    }
}

/// Transcription lifecycle of an audio evidence row
///
/// ```text
/// pending ──► processing ──► completed
///                 │  ▲
///                 ▼  │ (retry)
///               failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    /// Uploaded, not yet submitted to the provider
    Pending,
    /// Submitted; external job unresolved
    Processing,
    Completed,
    Failed,
}

impl TranscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::Pending => "pending",
            TranscriptionStatus::Processing => "processing",
            TranscriptionStatus::Completed => "completed",
            TranscriptionStatus::Failed => "failed",
        }
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(&self, next: TranscriptionStatus) -> bool {
        use TranscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Failed, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    /// A transcription can be (re)started from this status
    pub fn can_start(&self) -> bool {
        self.can_transition_to(TranscriptionStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TranscriptionStatus::Completed)
    }
}

impl fmt::Display for TranscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranscriptionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TranscriptionStatus::Pending),
            "processing" => Ok(TranscriptionStatus::Processing),
            "completed" => Ok(TranscriptionStatus::Completed),
            "failed" => Ok(TranscriptionStatus::Failed),
            other => Err(Error::InvalidInput(format!(
                "Unknown transcription status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub subscription_tier: SubscriptionTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Incident record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub incident_date: NaiveDate,
    /// 1 (very unsafe) ..= 10 (safe)
    pub safety_rating: i64,
    pub abuse_types: Vec<String>,
    pub mood_before: Option<i64>,
    pub mood_after: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Uploaded audio/image attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceFile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub journal_entry_id: Option<Uuid>,
    pub file_name: String,
    pub file_type: String,
    /// Path relative to the storage root
    pub storage_path: String,
    pub file_size: i64,
    pub transcription: Option<String>,
    /// `None` for files that are not transcribable
    pub transcription_status: Option<TranscriptionStatus>,
    /// External job id and derived transcription fields
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvidenceFile {
    pub fn is_audio(&self) -> bool {
        is_audio_mime(&self.file_type)
    }

    /// External transcription job id recorded when the job was submitted
    pub fn transcription_job_id(&self) -> Option<&str> {
        self.metadata.get("transcription_job_id")?.as_str()
    }
}

pub fn is_audio_mime(file_type: &str) -> bool {
    file_type.trim().to_ascii_lowercase().starts_with("audio/")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryCategory {
    Communication,
    Emotional,
    Physical,
    Digital,
    Financial,
    Other,
}

impl BoundaryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryCategory::Communication => "communication",
            BoundaryCategory::Emotional => "emotional",
            BoundaryCategory::Physical => "physical",
            BoundaryCategory::Digital => "digital",
            BoundaryCategory::Financial => "financial",
            BoundaryCategory::Other => "other",
        }
    }
}

impl FromStr for BoundaryCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "communication" => Ok(BoundaryCategory::Communication),
            "emotional" => Ok(BoundaryCategory::Emotional),
            "physical" => Ok(BoundaryCategory::Physical),
            "digital" => Ok(BoundaryCategory::Digital),
            "financial" => Ok(BoundaryCategory::Financial),
            "other" => Ok(BoundaryCategory::Other),
            other => Err(Error::InvalidInput(format!(
                "Unknown boundary category: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryStatus {
    Active,
    Archived,
}

impl BoundaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryStatus::Active => "active",
            BoundaryStatus::Archived => "archived",
        }
    }
}

impl FromStr for BoundaryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(BoundaryStatus::Active),
            "archived" => Ok(BoundaryStatus::Archived),
            other => Err(Error::InvalidInput(format!(
                "Unknown boundary status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Boundary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: BoundaryCategory,
    pub status: BoundaryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored result of a pattern analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternAnalysisRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub period_days: i64,
    pub statistics: serde_json::Value,
    pub insights: Vec<String>,
    /// `ai` or `rules`
    pub insight_source: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_is_case_insensitive() {
        assert_eq!(
            "Recovery".parse::<SubscriptionTier>().unwrap(),
            SubscriptionTier::Recovery
        );
        assert!("platinum".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn test_higher_tiers() {
        let higher: Vec<_> = SubscriptionTier::Foundation.higher_tiers().collect();
        assert_eq!(
            higher,
            vec![SubscriptionTier::Recovery, SubscriptionTier::Empowerment]
        );
        assert_eq!(SubscriptionTier::Empowerment.higher_tiers().count(), 0);
    }

    #[test]
    fn test_transcription_transitions() {
        use TranscriptionStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));

        assert!(!Completed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn test_can_start() {
        assert!(TranscriptionStatus::Pending.can_start());
        assert!(TranscriptionStatus::Failed.can_start());
        assert!(!TranscriptionStatus::Processing.can_start());
        assert!(!TranscriptionStatus::Completed.can_start());
    }

    #[test]
    fn test_audio_mime_detection() {
        assert!(is_audio_mime("audio/mpeg"));
        assert!(is_audio_mime(" Audio/WAV"));
        assert!(!is_audio_mime("image/png"));
    }
}
