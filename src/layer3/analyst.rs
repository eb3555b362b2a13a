// Analyst Seam - External analysis collaborator
// HTTP-backed chat-completions client plus the trait the scheduler drives

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::core::config::AnalysisConfig;
use crate::core::types::{AnalysisResult, Sentiment, now_ms};

/// Everything the analyst is given for one cycle.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub price: f64,
    pub trend_digest: String,
    pub memory_context: Vec<String>,
}

/// The two collaborator failure classes stay distinct all the way up:
/// `Transport` means the analyst could not be reached, `Malformed` means
/// it answered but the reply could not be decoded. The scheduler maps
/// them to different stand-in results.
#[derive(Debug, Error)]
pub enum AnalystError {
    #[error("analyst unreachable: {0}")]
    Transport(String),
    #[error("analyst response malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalystError>;
}

// ============================================================================
// Response decoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    sentiment: String,
    #[serde(default)]
    entry: String,
    #[serde(default)]
    exit: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    lesson_learned: String,
}

/// Models tend to wrap JSON replies in markdown fences; tolerate that.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line ("```json" or bare "```") and the closing fence.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Decode the analyst's reply content into a structured result. The
/// free-text sentiment field is classified into the tagged variant here
/// and nowhere else.
pub fn parse_analysis(content: &str, timestamp_ms: i64) -> Result<AnalysisResult, AnalystError> {
    let stripped = strip_code_fence(content);
    let raw: RawAnalysis = serde_json::from_str(stripped)
        .map_err(|e| AnalystError::Malformed(e.to_string()))?;

    Ok(AnalysisResult {
        sentiment: Sentiment::classify(&raw.sentiment),
        entry: raw.entry,
        exit: raw.exit,
        reasoning: raw.reasoning,
        lesson_learned: raw.lesson_learned,
        timestamp_ms,
    })
}

// ============================================================================
// HTTP implementation
// ============================================================================

const SYSTEM_PROMPT: &str = "You are a disciplined market analyst for a single \
trading instrument. Reply with strict JSON containing the fields: sentiment \
(bullish/bearish/neutral), entry, exit, reasoning, lesson_learned. The lesson \
is one short, concrete takeaway from this cycle.";

/// Chat-completions client for the analysis collaborator.
pub struct HttpAnalyst {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpAnalyst {
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalystError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AnalystError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.analyst_endpoint.clone(),
            model: config.analyst_model.clone(),
            api_key: config.analyst_api_key.clone(),
        })
    }

    fn build_prompt(request: &AnalysisRequest) -> String {
        let memory = request.memory_context.join("\n- ");
        format!(
            "Current price: {:.4}\n\nRecent trend:\n{}\n\nLessons from earlier cycles:\n- {}",
            request.price, request.trend_digest, memory
        )
    }
}

#[async_trait]
impl Analyst for HttpAnalyst {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalystError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::build_prompt(request) },
            ],
            "temperature": 0.3,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalystError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| AnalystError::Transport(e.to_string()))?;

        // Reached the analyst; decode problems from here on are Malformed.
        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalystError::Malformed(e.to_string()))?;

        let content = payload
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| AnalystError::Malformed("empty choices".to_string()))?;

        parse_analysis(content, now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json_reply() {
        let content = r#"{"sentiment":"bullish","entry":"42000-42200","exit":"43500","reasoning":"higher lows","lesson_learned":"wait for the retest"}"#;
        let result = parse_analysis(content, 1_000).unwrap();
        assert_eq!(result.sentiment, Sentiment::Bullish);
        assert_eq!(result.entry, "42000-42200");
        assert_eq!(result.lesson_learned, "wait for the retest");
        assert_eq!(result.timestamp_ms, 1_000);
    }

    #[test]
    fn test_parse_fenced_reply() {
        let content = "```json\n{\"sentiment\":\"bearish\",\"entry\":\"\",\"exit\":\"\",\"reasoning\":\"lower highs\",\"lesson_learned\":\"\"}\n```";
        let result = parse_analysis(content, 2_000).unwrap();
        assert_eq!(result.sentiment, Sentiment::Bearish);
        assert_eq!(result.reasoning, "lower highs");
    }

    #[test]
    fn test_parse_missing_optional_fields() {
        let result = parse_analysis(r#"{"sentiment":"neutral"}"#, 0).unwrap();
        assert_eq!(result.sentiment, Sentiment::Neutral);
        assert!(result.entry.is_empty());
        assert!(result.lesson_learned.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        let err = parse_analysis("the market feels heavy today", 0).unwrap_err();
        assert!(matches!(err, AnalystError::Malformed(_)));

        let err = parse_analysis(r#"{"entry":"no sentiment field"}"#, 0).unwrap_err();
        assert!(matches!(err, AnalystError::Malformed(_)));
    }

    #[test]
    fn test_strip_code_fence_variants() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_build_prompt_includes_context() {
        let request = AnalysisRequest {
            price: 42000.5,
            trend_digest: "15 candles, net +1.2%".to_string(),
            memory_context: vec!["lesson one".to_string(), "lesson two".to_string()],
        };
        let prompt = HttpAnalyst::build_prompt(&request);
        assert!(prompt.contains("42000.5"));
        assert!(prompt.contains("net +1.2%"));
        assert!(prompt.contains("lesson one"));
        assert!(prompt.contains("lesson two"));
    }
}
