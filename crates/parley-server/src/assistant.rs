//! Retrieval-augmented assistant client.
//!
//! The assistant service answers `POST {base}/query` with a JSON body
//! `{"query": "..."}` and replies `{"text": "...", "citations": [...]}`.

use std::time::Duration;

use async_trait::async_trait;
use parley_shared::{Answer, ChatError};
use serde::Serialize;
use tracing::{debug, warn};

#[async_trait]
pub trait Assistant: Send + Sync {
    async fn answer(&self, query: &str) -> Result<Answer, ChatError>;
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
}

pub struct HttpAssistant {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAssistant {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Internal(format!("assistant client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/query", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn answer(&self, query: &str) -> Result<Answer, ChatError> {
        debug!(endpoint = %self.endpoint, "Querying assistant");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&QueryRequest { query })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Assistant request failed");
                ChatError::Upstream("assistant unavailable".into())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Assistant returned an error status");
            return Err(ChatError::Upstream(format!("assistant returned {status}")));
        }

        response.json::<Answer>().await.map_err(|e| {
            warn!(error = %e, "Malformed assistant response");
            ChatError::Upstream("malformed assistant response".into())
        })
    }
}

/// Used when no assistant is configured; every query fails upstream.
pub struct DisabledAssistant;

#[async_trait]
impl Assistant for DisabledAssistant {
    async fn answer(&self, _query: &str) -> Result<Answer, ChatError> {
        Err(ChatError::Upstream("assistant not configured".into()))
    }
}

/// Render an answer as reply text, listing the cited messages.
pub fn format_answer(answer: &Answer) -> String {
    let mut text = format!("AI Response: {}", answer.text.trim());
    if !answer.citations.is_empty() {
        text.push_str("\n\nBased on context from:");
        for citation in &answer.citations {
            text.push_str(&format!("\n- {}: {}", citation.author, citation.text));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::Citation;

    #[test]
    fn answer_without_citations() {
        let answer = Answer {
            text: " 42 ".into(),
            citations: Vec::new(),
        };
        assert_eq!(format_answer(&answer), "AI Response: 42");
    }

    #[test]
    fn answer_lists_citations() {
        let answer = Answer {
            text: "Deploys run on Fridays.".into(),
            citations: vec![Citation {
                author: "sam".into(),
                text: "we deploy every friday".into(),
                score: Some(0.9),
            }],
        };
        assert_eq!(
            format_answer(&answer),
            "AI Response: Deploys run on Fridays.\n\nBased on context from:\n- sam: we deploy every friday"
        );
    }

    #[tokio::test]
    async fn disabled_assistant_fails_upstream() {
        assert!(matches!(
            DisabledAssistant.answer("anything").await,
            Err(ChatError::Upstream(_))
        ));
    }

    #[test]
    fn endpoint_is_normalised() {
        let assistant = HttpAssistant::new("http://rag:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(assistant.endpoint, "http://rag:8000/query");
    }
}
