//! Text generation abstraction.
//!
//! Everything that needs prose out of a language model goes through the
//! [`LanguageModel`] trait: the summarizer for community summaries, the QA
//! engine for answer synthesis. [`MockLanguageModel`] backs the test suites
//! with scripted responses and call accounting, which is how cache
//! correctness is asserted without a live model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{GraphRagError, Result};

/// A text-generation backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generates a completion for the prompt, bounded by `max_tokens`.
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String>;

    /// Backend name for logs.
    fn name(&self) -> &str {
        "language-model"
    }
}

/// Calls the model, retrying once on a retryable failure after a short
/// backoff. Configuration-class errors propagate immediately.
pub async fn generate_with_retry(
    llm: &dyn LanguageModel,
    prompt: &str,
    max_tokens: usize,
    backoff: Duration,
) -> Result<String> {
    match llm.generate(prompt, max_tokens).await {
        Ok(text) => Ok(text),
        Err(err) if err.is_retryable() => {
            tracing::warn!(backend = llm.name(), error = %err, "generation failed, retrying once");
            tokio::time::sleep(backoff).await;
            llm.generate(prompt, max_tokens).await
        }
        Err(err) => Err(err),
    }
}

/// Scripted model for tests.
///
/// Responses are consumed front-to-back; when the script runs out, the last
/// response repeats. `fail_next` injects a retryable failure for the next
/// N calls.
pub struct MockLanguageModel {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    failures_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl MockLanguageModel {
    /// A mock that always answers with the given text.
    pub fn always(response: impl Into<String>) -> Self {
        Self::scripted(vec![response.into()])
    }

    /// A mock that plays back the given responses in order.
    pub fn scripted(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            failures_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` calls fail with a retryable generation error.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of generate calls observed, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(GraphRagError::Generation {
                message: "injected failure".to_string(),
            });
        }

        let mut responses = self.responses.lock();
        match responses.pop_front() {
            Some(text) => {
                *self.last.lock() = Some(text.clone());
                Ok(text)
            }
            None => self.last.lock().clone().ok_or(GraphRagError::Generation {
                message: "mock has no scripted responses".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_recovers_from_one_failure() {
        let mock = MockLanguageModel::always("ok");
        mock.fail_next(1);
        let text = generate_with_retry(&mock, "hi", 64, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_after_second_failure() {
        let mock = MockLanguageModel::always("ok");
        mock.fail_next(2);
        let err = generate_with_retry(&mock, "hi", 64, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn script_repeats_last_response() {
        let mock = MockLanguageModel::scripted(vec!["one".into(), "two".into()]);
        assert_eq!(mock.generate("p", 8).await.unwrap(), "one");
        assert_eq!(mock.generate("p", 8).await.unwrap(), "two");
        assert_eq!(mock.generate("p", 8).await.unwrap(), "two");
    }
}
