//! Journal title suggestions

use chrono::NaiveDate;
use serde::Serialize;

use crate::services::gemini_client::{parse_string_list, TextGenerator};

pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const MAX_TITLES: usize = 5;
pub const MAX_TITLE_CHARS: usize = 80;

const TEMPERATURE: f32 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 256;

#[derive(Debug, Clone)]
pub struct TitleRequest {
    pub description: String,
    pub abuse_types: Vec<String>,
    pub incident_date: Option<NaiveDate>,
}

impl TitleRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(format!(
                "description must be at least {} characters",
                MIN_DESCRIPTION_CHARS
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    Ai,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleSuggestions {
    pub titles: Vec<String>,
    pub source: SuggestionSource,
}

pub fn build_prompt(request: &TitleRequest) -> String {
    let mut prompt = String::from(
        "You help survivors of abusive relationships keep a private incident journal. \
         Suggest up to 5 short, neutral, factual titles (under 80 characters each) for \
         the journal entry below. Do not add judgement or speculation. \
         Respond with a JSON array of strings only.\n\n",
    );

    prompt.push_str("Description:\n");
    prompt.push_str(request.description.trim());
    prompt.push('\n');

    if !request.abuse_types.is_empty() {
        prompt.push_str(&format!("Categories: {}\n", request.abuse_types.join(", ")));
    }
    if let Some(date) = request.incident_date {
        prompt.push_str(&format!("Date: {}\n", date.format("%Y-%m-%d")));
    }

    prompt
}

/// Trim, drop blanks, cap length, dedupe case-insensitively, keep at most five
pub fn normalize_titles(raw: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();

    raw.into_iter()
        .map(|t| truncate_chars(t.trim(), MAX_TITLE_CHARS))
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .take(MAX_TITLES)
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect::<String>().trim_end().to_string()
}

/// Deterministic titles used when the model is unavailable
pub fn fallback_titles(request: &TitleRequest) -> Vec<String> {
    let mut titles = Vec::new();

    let date = request
        .incident_date
        .map(|d| d.format("%B %-d, %Y").to_string());

    if let Some(first) = request.abuse_types.first() {
        let label = capitalize(&first.replace('_', " "));
        match &date {
            Some(date) => titles.push(format!("{} incident on {}", label, date)),
            None => titles.push(format!("{} incident", label)),
        }
    }

    if request.abuse_types.len() > 1 {
        titles.push(format!(
            "Incident involving {}",
            request
                .abuse_types
                .iter()
                .map(|t| t.replace('_', " "))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    let words: Vec<&str> = request.description.split_whitespace().take(8).collect();
    if !words.is_empty() {
        let mut summary = capitalize(&words.join(" "));
        if request.description.split_whitespace().count() > words.len() {
            summary.push_str("...");
        }
        titles.push(summary);
    }

    match &date {
        Some(date) => titles.push(format!("Journal entry for {}", date)),
        None => titles.push("Journal entry".to_string()),
    }

    normalize_titles(titles)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Ask the model for titles, falling back to deterministic ones
pub async fn suggest_titles(
    generator: Option<&dyn TextGenerator>,
    request: &TitleRequest,
) -> TitleSuggestions {
    let Some(generator) = generator else {
        tracing::debug!("Gemini not configured, using fallback titles");
        return TitleSuggestions {
            titles: fallback_titles(request),
            source: SuggestionSource::Fallback,
        };
    };

    match generator
        .generate(&build_prompt(request), TEMPERATURE, MAX_OUTPUT_TOKENS)
        .await
    {
        Ok(text) => {
            let titles = normalize_titles(parse_string_list(&text));
            if titles.is_empty() {
                tracing::warn!("Model returned no usable titles, using fallback");
                TitleSuggestions {
                    titles: fallback_titles(request),
                    source: SuggestionSource::Fallback,
                }
            } else {
                TitleSuggestions {
                    titles,
                    source: SuggestionSource::Ai,
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Title generation failed, using fallback");
            TitleSuggestions {
                titles: fallback_titles(request),
                source: SuggestionSource::Fallback,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gemini_client::GeminiError;
    use async_trait::async_trait;

    struct Scripted(Result<&'static str, ()>);

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, _: &str, temperature: f32, _: u32) -> Result<String, GeminiError> {
            assert!((temperature - 0.7).abs() < f32::EPSILON);
            self.0
                .map(str::to_string)
                .map_err(|_| GeminiError::ApiError(500, "boom".into()))
        }
    }

    fn request() -> TitleRequest {
        TitleRequest {
            description: "He took my phone and read my messages again tonight".into(),
            abuse_types: vec!["digital".into(), "emotional".into()],
            incident_date: NaiveDate::from_ymd_opt(2024, 3, 9),
        }
    }

    #[test]
    fn test_validation_requires_ten_characters() {
        let mut req = request();
        req.description = "  ten chars! ".into();
        assert!(req.validate().is_ok());
        req.description = "   short   ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_normalize_dedupes_and_caps() {
        let long = "x".repeat(120);
        let titles = normalize_titles(vec![
            "Phone taken".into(),
            "phone TAKEN".into(),
            " ".into(),
            long,
            "a".into(),
            "b".into(),
            "c".into(),
            "d".into(),
        ]);
        assert_eq!(titles.len(), 5);
        assert_eq!(titles[0], "Phone taken");
        assert_eq!(titles[1].chars().count(), 80);
    }

    #[test]
    fn test_prompt_includes_context() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("read my messages"));
        assert!(prompt.contains("digital, emotional"));
        assert!(prompt.contains("2024-03-09"));
    }

    #[test]
    fn test_fallback_titles() {
        let titles = fallback_titles(&request());
        assert_eq!(titles[0], "Digital incident on March 9, 2024");
        assert_eq!(titles[1], "Incident involving digital, emotional");
        assert!(titles[2].starts_with("He took my phone"));
        assert!(titles.len() <= MAX_TITLES);
    }

    #[tokio::test]
    async fn test_ai_titles_used_when_available() {
        let generator = Scripted(Ok("```json\n[\"Phone search\", \"Messages read\"]\n```"));
        let result = suggest_titles(Some(&generator), &request()).await;
        assert_eq!(result.source, SuggestionSource::Ai);
        assert_eq!(result.titles, vec!["Phone search", "Messages read"]);
    }

    #[tokio::test]
    async fn test_fallback_on_error_or_missing_generator() {
        let generator = Scripted(Err(()));
        let result = suggest_titles(Some(&generator), &request()).await;
        assert_eq!(result.source, SuggestionSource::Fallback);
        assert!(!result.titles.is_empty());

        let result = suggest_titles(None, &request()).await;
        assert_eq!(result.source, SuggestionSource::Fallback);
    }
}
