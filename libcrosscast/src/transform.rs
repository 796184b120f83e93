//! Content transformation
//!
//! Looks up the destination's rewrite rule and asks the rewrite service to
//! restyle the text. Transformation is best-effort by contract: any
//! failure (rule lookup, network, malformed response) logs a warning and
//! the original text publishes unchanged. A destination without a rule
//! never calls the service at all.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TransformConfig;
use crate::db::Database;
use crate::types::Platform;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("rewrite request failed: {0}")]
    Network(String),

    #[error("rewrite service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("rewrite response had no text")]
    EmptyResponse,
}

/// The rewrite collaborator boundary. Production talks to a chat-completion
/// endpoint; tests script responses.
#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(
        &self,
        instruction: &str,
        text: &str,
    ) -> std::result::Result<String, TransformError>;
}

pub struct HttpRewriter {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpRewriter {
    /// Builds the rewriter when an endpoint is configured.
    pub fn from_config(config: &TransformConfig) -> Option<Self> {
        let endpoint = config.endpoint.clone()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .ok()?;
        Some(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Rewriter for HttpRewriter {
    async fn rewrite(
        &self,
        instruction: &str,
        text: &str,
    ) -> std::result::Result<String, TransformError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": instruction },
                { "role": "user", "content": text },
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransformError::Network(e.to_string()))?;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransformError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(TransformError::Service {
                status: status.as_u16(),
                message,
            });
        }

        extract_rewritten_text(&payload).ok_or(TransformError::EmptyResponse)
    }
}

/// Pulls the rewritten text out of a chat-completion response body.
fn extract_rewritten_text(payload: &serde_json::Value) -> Option<String> {
    let content = payload["choices"][0]["message"]["content"].as_str()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub struct ContentTransformer {
    db: Arc<Database>,
    rewriter: Option<Arc<dyn Rewriter>>,
}

impl ContentTransformer {
    pub fn new(db: Arc<Database>, rewriter: Option<Arc<dyn Rewriter>>) -> Self {
        Self { db, rewriter }
    }

    /// The text to publish for one destination: the rewrite when a rule
    /// exists and the service answers, otherwise the original. Never fails.
    pub async fn content_for(
        &self,
        user_id: i64,
        platform: Platform,
        account_id: &str,
        text: &str,
    ) -> String {
        let Some(rewriter) = &self.rewriter else {
            return text.to_string();
        };

        let rule = match self.db.get_rewrite_rule(user_id, platform, account_id).await {
            Ok(rule) => rule,
            Err(err) => {
                warn!(%platform, account_id, error = %err, "rewrite rule lookup failed, using original text");
                return text.to_string();
            }
        };

        let Some(rule) = rule else {
            return text.to_string();
        };

        match rewriter.rewrite(&rule.instruction, text).await {
            Ok(rewritten) => {
                debug!(%platform, account_id, "content rewritten for destination");
                rewritten
            }
            Err(err) => {
                warn!(%platform, account_id, error = %err, "rewrite failed, using original text");
                text.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RewriteRule;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedRewriter {
        response: std::result::Result<String, ()>,
        calls: AtomicUsize,
    }

    impl ScriptedRewriter {
        fn ok(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Rewriter for ScriptedRewriter {
        async fn rewrite(
            &self,
            _instruction: &str,
            _text: &str,
        ) -> std::result::Result<String, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(()) => Err(TransformError::Service {
                    status: 500,
                    message: "overloaded".to_string(),
                }),
            }
        }
    }

    async fn db_with_rule(platform: Platform, account_id: &str) -> Arc<Database> {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.upsert_rewrite_rule(&RewriteRule {
            id: None,
            user_id: 1,
            platform,
            account_id: account_id.to_string(),
            instruction: "make it punchy".to_string(),
        })
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_no_rule_skips_rewrite_call() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let rewriter = Arc::new(ScriptedRewriter::ok("REWRITTEN"));
        let transformer = ContentTransformer::new(db, Some(rewriter.clone()));

        let out = transformer
            .content_for(1, Platform::X, "acct", "original")
            .await;
        assert_eq!(out, "original");
        assert_eq!(rewriter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rule_triggers_rewrite() {
        let db = db_with_rule(Platform::X, "acct").await;
        let rewriter = Arc::new(ScriptedRewriter::ok("short and punchy"));
        let transformer = ContentTransformer::new(db, Some(rewriter.clone()));

        let out = transformer
            .content_for(1, Platform::X, "acct", "a long original text")
            .await;
        assert_eq!(out, "short and punchy");
        assert_eq!(rewriter.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_failure_degrades_to_original() {
        let db = db_with_rule(Platform::Facebook, "111").await;
        let rewriter = Arc::new(ScriptedRewriter::failing());
        let transformer = ContentTransformer::new(db, Some(rewriter.clone()));

        let out = transformer
            .content_for(1, Platform::Facebook, "111", "original")
            .await;
        assert_eq!(out, "original");
        assert_eq!(rewriter.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rule_scoped_to_account() {
        let db = db_with_rule(Platform::Telegram, "@styled").await;
        let rewriter = Arc::new(ScriptedRewriter::ok("styled"));
        let transformer = ContentTransformer::new(db, Some(rewriter.clone()));

        let untouched = transformer
            .content_for(1, Platform::Telegram, "@plain", "original")
            .await;
        assert_eq!(untouched, "original");
        assert_eq!(rewriter.call_count(), 0);

        let styled = transformer
            .content_for(1, Platform::Telegram, "@styled", "original")
            .await;
        assert_eq!(styled, "styled");
    }

    #[tokio::test]
    async fn test_disabled_rewriter_passes_through() {
        let db = db_with_rule(Platform::X, "acct").await;
        let transformer = ContentTransformer::new(db, None);

        let out = transformer
            .content_for(1, Platform::X, "acct", "original")
            .await;
        assert_eq!(out, "original");
    }

    #[test]
    fn test_extract_rewritten_text() {
        let payload = serde_json::json!({
            "choices": [{ "message": { "content": "  trimmed reply  " } }]
        });
        assert_eq!(
            extract_rewritten_text(&payload),
            Some("trimmed reply".to_string())
        );

        let empty = serde_json::json!({
            "choices": [{ "message": { "content": "   " } }]
        });
        assert_eq!(extract_rewritten_text(&empty), None);

        let missing = serde_json::json!({ "choices": [] });
        assert_eq!(extract_rewritten_text(&missing), None);
    }
}
