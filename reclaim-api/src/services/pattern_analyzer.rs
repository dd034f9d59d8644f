//! Journal pattern analysis
//!
//! Statistics are always computed locally. Insights come from the language
//! model when available and from fixed rules otherwise.

use chrono::{Datelike, Weekday};
use reclaim_common::db::JournalEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::services::gemini_client::{parse_string_list, TextGenerator};

pub const DEFAULT_PERIOD_DAYS: i64 = 90;
pub const MIN_PERIOD_DAYS: i64 = 7;
pub const MAX_PERIOD_DAYS: i64 = 365;
pub const MIN_ENTRIES: usize = 3;
pub const MAX_INSIGHTS: usize = 6;

/// Ratings at or below this count as low safety
pub const LOW_SAFETY_THRESHOLD: i64 = 3;
/// Half-to-half average change needed to call a trend
const TREND_THRESHOLD: f64 = 1.0;
/// Fewer ratings than this cannot be split into two meaningful halves
const MIN_TREND_ENTRIES: usize = 4;

const TEMPERATURE: f32 = 0.4;
const MAX_OUTPUT_TOKENS: u32 = 512;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTrend {
    Improving,
    Stable,
    Declining,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbuseTypeCount {
    pub abuse_type: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayCount {
    pub weekday: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStatistics {
    pub period_days: i64,
    pub total_entries: usize,
    /// Most frequent first
    pub abuse_type_counts: Vec<AbuseTypeCount>,
    pub average_safety_rating: f64,
    pub low_safety_entries: usize,
    /// Monday through Sunday
    pub weekday_distribution: Vec<WeekdayCount>,
    pub entries_per_week: f64,
    pub safety_trend: SafetyTrend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSource {
    Ai,
    Rules,
}

impl InsightSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightSource::Ai => "ai",
            InsightSource::Rules => "rules",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternAnalysis {
    pub statistics: PatternStatistics,
    pub insights: Vec<String>,
    pub insight_source: InsightSource,
}

/// Resolve the requested window, defaulting to 90 days
pub fn validate_period(period_days: Option<i64>) -> Result<i64, String> {
    let period = period_days.unwrap_or(DEFAULT_PERIOD_DAYS);
    if !(MIN_PERIOD_DAYS..=MAX_PERIOD_DAYS).contains(&period) {
        return Err(format!(
            "period_days must be between {} and {}",
            MIN_PERIOD_DAYS, MAX_PERIOD_DAYS
        ));
    }
    Ok(period)
}

/// Compare the average of the older half of `ratings` with the newer half
///
/// `ratings` must be in chronological order. Higher safety is better, so a
/// rise beyond the threshold is `Improving`.
pub fn safety_trend(ratings: &[i64]) -> SafetyTrend {
    if ratings.len() < MIN_TREND_ENTRIES {
        return SafetyTrend::InsufficientData;
    }

    let (older, newer) = ratings.split_at(ratings.len() / 2);
    let delta = average(newer) - average(older);

    if delta > TREND_THRESHOLD {
        SafetyTrend::Improving
    } else if delta < -TREND_THRESHOLD {
        SafetyTrend::Declining
    } else {
        SafetyTrend::Stable
    }
}

fn average(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<i64>() as f64 / values.len() as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Statistics over `entries`, which must be in chronological order
pub fn compute_statistics(entries: &[JournalEntry], period_days: i64) -> PatternStatistics {
    let mut type_counts: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        for abuse_type in &entry.abuse_types {
            let key = abuse_type.trim().to_lowercase();
            if !key.is_empty() {
                *type_counts.entry(key).or_default() += 1;
            }
        }
    }
    let mut abuse_type_counts: Vec<AbuseTypeCount> = type_counts
        .into_iter()
        .map(|(abuse_type, count)| AbuseTypeCount { abuse_type, count })
        .collect();
    abuse_type_counts.sort_by(|a, b| b.count.cmp(&a.count).then(a.abuse_type.cmp(&b.abuse_type)));

    let ratings: Vec<i64> = entries.iter().map(|e| e.safety_rating).collect();

    let weekday_distribution = WEEKDAYS
        .iter()
        .map(|day| WeekdayCount {
            weekday: weekday_name(*day).to_string(),
            count: entries
                .iter()
                .filter(|e| e.incident_date.weekday() == *day)
                .count(),
        })
        .collect();

    PatternStatistics {
        period_days,
        total_entries: entries.len(),
        abuse_type_counts,
        average_safety_rating: round2(average(&ratings)),
        low_safety_entries: ratings.iter().filter(|r| **r <= LOW_SAFETY_THRESHOLD).count(),
        weekday_distribution,
        entries_per_week: round2(entries.len() as f64 / (period_days as f64 / 7.0)),
        safety_trend: safety_trend(&ratings),
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Insights derived directly from the statistics
pub fn rule_based_insights(stats: &PatternStatistics) -> Vec<String> {
    let mut insights = Vec::new();

    insights.push(format!(
        "You recorded {} entries in the last {} days (about {:.1} per week).",
        stats.total_entries, stats.period_days, stats.entries_per_week
    ));

    if let Some(top) = stats.abuse_type_counts.first() {
        insights.push(format!(
            "The most frequently recorded category was {} ({} of {} entries).",
            top.abuse_type.replace('_', " "),
            top.count,
            stats.total_entries
        ));
    }

    if stats.low_safety_entries > 0 {
        insights.push(format!(
            "{} entries had a safety rating of {} or lower. If you feel unsafe, consider \
             reaching out to a local hotline or someone you trust.",
            stats.low_safety_entries, LOW_SAFETY_THRESHOLD
        ));
    }

    match stats.safety_trend {
        SafetyTrend::Improving => insights.push(
            "Your safety ratings have improved over this period.".to_string(),
        ),
        SafetyTrend::Declining => insights.push(
            "Your safety ratings have declined over this period. Please prioritise your safety plan."
                .to_string(),
        ),
        SafetyTrend::Stable => insights.push(
            "Your safety ratings have stayed about the same over this period.".to_string(),
        ),
        SafetyTrend::InsufficientData => {}
    }

    if let Some(busiest) = stats
        .weekday_distribution
        .iter()
        .filter(|d| d.count > 1)
        .max_by_key(|d| d.count)
    {
        insights.push(format!(
            "Incidents were most often recorded on {} ({} entries).",
            busiest.weekday, busiest.count
        ));
    }

    insights.truncate(MAX_INSIGHTS);
    insights
}

pub fn build_prompt(stats: &PatternStatistics) -> String {
    let stats_json = serde_json::to_string_pretty(stats).unwrap_or_default();
    format!(
        "You support survivors of abusive relationships. Based only on the journal \
         statistics below, write at most {} short, compassionate, non-judgemental \
         observations about patterns the person may want to notice. Do not diagnose. \
         Respond with a JSON array of strings only.\n\nStatistics:\n{}",
        MAX_INSIGHTS, stats_json
    )
}

/// Compute statistics and insights for chronologically ordered entries
pub async fn analyze(
    generator: Option<&dyn TextGenerator>,
    entries: &[JournalEntry],
    period_days: i64,
) -> PatternAnalysis {
    let statistics = compute_statistics(entries, period_days);

    if let Some(generator) = generator {
        match generator
            .generate(&build_prompt(&statistics), TEMPERATURE, MAX_OUTPUT_TOKENS)
            .await
        {
            Ok(text) => {
                let mut insights: Vec<String> = parse_string_list(&text)
                    .into_iter()
                    .filter(|s| !s.trim().is_empty())
                    .collect();
                insights.truncate(MAX_INSIGHTS);

                if !insights.is_empty() {
                    return PatternAnalysis {
                        statistics,
                        insights,
                        insight_source: InsightSource::Ai,
                    };
                }
                tracing::warn!("Model returned no usable insights, using rules");
            }
            Err(e) => tracing::warn!(error = %e, "Insight generation failed, using rules"),
        }
    }

    PatternAnalysis {
        insights: rule_based_insights(&statistics),
        statistics,
        insight_source: InsightSource::Rules,
    }
}
