mod chat;
mod usage;

pub use chat::*;
pub use usage::*;

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::LmError;

/// Model output as seen by the pipeline: the completion text plus whatever
/// token accounting the transport reported.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<LmUsage>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: LmUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn usage_or_default(&self) -> LmUsage {
        self.usage.clone().unwrap_or_default()
    }
}

impl From<&str> for Completion {
    fn from(text: &str) -> Self {
        Completion::new(text)
    }
}

impl From<String> for Completion {
    fn from(text: String) -> Self {
        Completion::new(text)
    }
}

/// The model transport boundary.
///
/// Implementations own networking, retries, caching, rate limiting and
/// timeouts. The pipeline calls [`generate`](LanguageModel::generate) exactly
/// once per invocation (twice for two-step parsing) and never retries.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &Chat) -> Result<Completion, LmError>;

    /// Name used in logs.
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// In-memory LM used for deterministic tests and examples.
///
/// Replays scripted completions in order and records every request it
/// receives. Once the script is exhausted every call fails with
/// [`LmError::Provider`].
#[derive(Debug, Default)]
pub struct DummyLM {
    responses: Mutex<VecDeque<Completion>>,
    history: Mutex<Vec<Chat>>,
}

impl DummyLM {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Completion>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Queues one more completion behind the existing script.
    pub async fn push_response(&self, response: impl Into<Completion>) {
        self.responses.lock().await.push_back(response.into());
    }

    /// Returns the `n` most recent requests, oldest first.
    pub async fn inspect_history(&self, n: usize) -> Vec<Chat> {
        let history = self.history.lock().await;
        let start = history.len().saturating_sub(n);
        history[start..].to_vec()
    }

    pub async fn call_count(&self) -> usize {
        self.history.lock().await.len()
    }
}

#[async_trait]
impl LanguageModel for DummyLM {
    async fn generate(&self, request: &Chat) -> Result<Completion, LmError> {
        self.history.lock().await.push(request.clone());
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LmError::Provider {
                provider: "dummy".to_string(),
                message: "no scripted responses left".to_string(),
                source: None,
            })
    }

    fn model_name(&self) -> &str {
        "dummy"
    }
}
