//! Semantic judgment: does an extracted column name denote a stored column?
//!
//! The verifier asks a [`SemanticJudge`] only after exact matching failed
//! and scoped search produced a candidate. Judges report `Err` when they
//! cannot answer; the caller then falls back to a similarity threshold.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::JudgeConfig;
use crate::error::{Error, Result};

/// Everything a judge sees about one candidate match.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuestion {
    pub extracted: String,
    pub candidate: String,
    pub similarity: f32,
    pub tables: Vec<String>,
}

#[async_trait]
pub trait SemanticJudge: Send + Sync {
    async fn same_column(&self, question: &MatchQuestion) -> Result<bool>;
}

pub struct DisabledJudge;

#[async_trait]
impl SemanticJudge for DisabledJudge {
    async fn same_column(&self, _question: &MatchQuestion) -> Result<bool> {
        Err(Error::ProviderUnavailable("judge is disabled".to_string()))
    }
}

/// Judge backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatJudge {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatJudge {
    pub fn new(config: &JudgeConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("judge.model required for openai judge"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            debug!(env = %config.api_key_env, "no judge API key in environment; sending unauthenticated requests");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl SemanticJudge for ChatJudge {
    async fn same_column(&self, question: &MatchQuestion) -> Result<bool> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{"role": "user", "content": judge_prompt(question)}],
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("judge request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::ProviderUnavailable(format!(
                "judge API error {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        let answer = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                Error::ProviderUnavailable("judge response has no message content".to_string())
            })?;
        Ok(is_affirmative(answer))
    }
}

pub fn create_judge(config: &JudgeConfig) -> anyhow::Result<Box<dyn SemanticJudge>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledJudge)),
        "openai" => Ok(Box::new(ChatJudge::new(config)?)),
        other => anyhow::bail!("Unknown judge provider: {}", other),
    }
}

pub fn judge_prompt(question: &MatchQuestion) -> String {
    format!(
        "You are a database expert. Determine if these two column names refer to the same column:\n\
         \n\
         Column from SQL query: {}\n\
         Column found in the schema graph: {}\n\
         Similarity score: {:.3}\n\
         Context: this column should belong to one of these tables: {}\n\
         \n\
         Common patterns to consider:\n\
         - Aliases: ROW_ID might be an alias for ROWID\n\
         - Underscores vs no underscores: LAST_UPDATE_DATE vs LASTUPDATEDATE\n\
         - Abbreviations: CUST_ID vs CUSTOMER_ID\n\
         - Case differences should be ignored\n\
         \n\
         Respond with ONLY \"true\" if they refer to the same column, or \"false\" if they don't.",
        question.extracted,
        question.candidate,
        question.similarity,
        question.tables.join(", ")
    )
}

/// Only a bare "true" counts; anything else is a rejection.
fn is_affirmative(answer: &str) -> bool {
    answer
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
        .eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_names_score_and_scope() {
        let prompt = judge_prompt(&MatchQuestion {
            extracted: "CUST_ID".into(),
            candidate: "CUSTOMER_ID".into(),
            similarity: 0.9,
            tables: vec!["cust_account".into(), "orders".into()],
        });
        assert!(prompt.contains("Column from SQL query: CUST_ID"));
        assert!(prompt.contains("Column found in the schema graph: CUSTOMER_ID"));
        assert!(prompt.contains("Similarity score: 0.900"));
        assert!(prompt.contains("cust_account, orders"));
    }

    #[test]
    fn affirmative_answers() {
        assert!(is_affirmative("true"));
        assert!(is_affirmative("  TRUE.\n"));
        assert!(is_affirmative("\"true\""));
        assert!(!is_affirmative("false"));
        assert!(!is_affirmative("true, probably"));
        assert!(!is_affirmative(""));
    }

    #[tokio::test]
    async fn disabled_judge_is_unavailable() {
        let question = MatchQuestion {
            extracted: "A".into(),
            candidate: "B".into(),
            similarity: 0.5,
            tables: vec![],
        };
        let err = DisabledJudge.same_column(&question).await.unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }
}
