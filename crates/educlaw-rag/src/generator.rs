//! Completion-side resilience.
//!
//! Wraps the completion provider with the recovery policy: exponential
//! backoff on transient failures, a single truncate-and-retry on context
//! overflow, minimum spacing between requests, and a JSON salvage pass for
//! structured output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use educlaw_core::error::{EduClawError, Result};
use educlaw_core::traits::CompletionProvider;
use educlaw_core::types::{CompletionParams, Message, Role};

pub struct Generator {
    provider: Arc<dyn CompletionProvider>,
    params: CompletionParams,
    max_retries: u32,
    base_delay: Duration,
    min_spacing: Duration,
    /// Reserved send slot of the most recent request.
    last_request: Mutex<Option<Instant>>,
}

impl Generator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        params: CompletionParams,
        max_retries: u32,
        base_delay_ms: u64,
        min_spacing_ms: u64,
    ) -> Self {
        Self {
            provider,
            params,
            max_retries: max_retries.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
            min_spacing: Duration::from_millis(min_spacing_ms),
            last_request: Mutex::new(None),
        }
    }

    /// Run a completion with the full recovery policy applied.
    ///
    /// Transient errors (rate limit, transport) retry with exponential
    /// backoff. Context overflow triggers exactly one truncation retry; a
    /// second overflow is returned as-is.
    pub async fn complete(&self, messages: &[Message]) -> Result<String> {
        let mut messages = messages.to_vec();
        let mut truncated = false;

        for attempt in 0..self.max_retries {
            self.enforce_spacing().await;

            match self.provider.complete(&messages, &self.params).await {
                Ok(text) => return Ok(text),
                Err(EduClawError::ContextTooLong(msg)) => {
                    if truncated {
                        return Err(EduClawError::ContextTooLong(msg));
                    }
                    tracing::warn!("Context too long, truncating and retrying once: {msg}");
                    messages = truncate_messages(&messages);
                    truncated = true;
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.max_retries => {
                    let delay = self.base_delay * 2u32.pow(attempt);
                    tracing::warn!(
                        "Completion attempt {}/{} failed ({e}), retrying in {:?}",
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(EduClawError::Provider("completion retries exhausted".into()))
    }

    /// Request structured JSON output. Sloppy completions get a salvage
    /// pass for the first balanced bracketed region; unsalvageable output
    /// collapses to an empty object rather than an error.
    pub async fn complete_json(&self, messages: &[Message]) -> Result<serde_json::Value> {
        let text = self.complete(messages).await?;
        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(_) => match salvage_json(&text) {
                Some(value) => {
                    tracing::debug!("Salvaged JSON from malformed completion output");
                    Ok(value)
                }
                None => {
                    tracing::warn!("Completion output was not parseable JSON, returning empty object");
                    Ok(serde_json::json!({}))
                }
            },
        }
    }

    /// Minimum spacing between provider requests, per process. Each caller
    /// claims the next free slot, so concurrent requests queue up instead
    /// of bursting.
    async fn enforce_spacing(&self) {
        if self.min_spacing.is_zero() {
            return;
        }
        let wait = {
            let mut last = self.last_request.lock().await;
            let now = Instant::now();
            let wait = match *last {
                Some(prev) => self.min_spacing.checked_sub(now.duration_since(prev)).unwrap_or_default(),
                None => Duration::ZERO,
            };
            *last = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Drop older turns, keeping the leading system message and the newest half
/// of the rest. A single oversized message loses its older half instead, so
/// the question at its tail survives.
fn truncate_messages(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> =
        messages.iter().filter(|m| m.role == Role::System).take(1).cloned().collect();
    let rest: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

    if rest.len() > 1 {
        let keep = rest.len().div_ceil(2);
        for m in &rest[rest.len() - keep..] {
            out.push((*m).clone());
        }
    } else if let Some(last) = rest.last() {
        let half = last.content.chars().count() / 2;
        let content: String = last.content.chars().skip(half).collect();
        out.push(Message { role: last.role, content });
    }
    out
}

/// Extract and parse the first balanced `{...}` or `[...]` region.
fn salvage_json(text: &str) -> Option<serde_json::Value> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|&c| c == '{' || c == '[')?;
    let open = chars[start];
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let candidate: String = chars[start..=i].iter().collect();
                    return serde_json::from_str(&candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedCompleter;
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn params() -> CompletionParams {
        CompletionParams { model: "test-model".into(), temperature: 0.3, max_tokens: 256 }
    }

    fn generator(completer: Arc<ScriptedCompleter>, max_retries: u32) -> Generator {
        Generator::new(completer, params(), max_retries, 1, 0)
    }

    fn question() -> Vec<Message> {
        vec![Message::system("trợ lý học tập"), Message::user("Tổng của 2 và 3 là bao nhiêu?")]
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let completer = Arc::new(
            ScriptedCompleter::new("Tổng là 5.")
                .with_failures(vec![EduClawError::RateLimited("429".into())]),
        );
        let generator = generator(Arc::clone(&completer), 3);

        let answer = generator.complete(&question()).await.unwrap();
        assert_eq!(answer, "Tổng là 5.");
        assert_eq!(completer.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let completer = Arc::new(ScriptedCompleter::new("ok").with_failures(vec![
            EduClawError::RateLimited("1".into()),
            EduClawError::RateLimited("2".into()),
            EduClawError::RateLimited("3".into()),
        ]));
        let generator = generator(Arc::clone(&completer), 3);

        assert!(generator.complete(&question()).await.is_err());
        assert_eq!(completer.calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let completer = Arc::new(
            ScriptedCompleter::new("ok")
                .with_failures(vec![EduClawError::Provider("bad request".into())]),
        );
        let generator = generator(Arc::clone(&completer), 3);

        assert!(generator.complete(&question()).await.is_err());
        assert_eq!(completer.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_context_overflow_truncates_once() {
        let completer = Arc::new(
            ScriptedCompleter::new("ok")
                .with_failures(vec![EduClawError::ContextTooLong("too big".into())]),
        );
        let generator = generator(Arc::clone(&completer), 3);

        let messages = vec![
            Message::system("hệ thống"),
            Message::user("lượt cũ nhất"),
            Message::user("lượt ở giữa"),
            Message::user("lượt mới nhất"),
        ];
        let answer = generator.complete(&messages).await.unwrap();
        assert_eq!(answer, "ok");

        let seen = completer.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // Retry keeps the system message and the newest turns only.
        let retry = &seen[1];
        assert_eq!(retry[0].role, Role::System);
        assert!(retry.len() < seen[0].len());
        assert_eq!(retry.last().unwrap().content, "lượt mới nhất");
        assert!(!retry.iter().any(|m| m.content == "lượt cũ nhất"));
    }

    #[tokio::test]
    async fn test_second_overflow_is_fatal() {
        let completer = Arc::new(ScriptedCompleter::new("ok").with_failures(vec![
            EduClawError::ContextTooLong("1".into()),
            EduClawError::ContextTooLong("2".into()),
        ]));
        let generator = generator(Arc::clone(&completer), 5);

        let err = generator.complete(&question()).await.err().unwrap();
        assert!(matches!(err, EduClawError::ContextTooLong(_)));
        assert_eq!(completer.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_message_halved_keeps_tail() {
        let long = format!("{} Câu hỏi thật sự ở cuối.", "đệm ".repeat(200));
        let truncated = truncate_messages(&[Message::user(long)]);
        assert_eq!(truncated.len(), 1);
        assert!(truncated[0].content.ends_with("Câu hỏi thật sự ở cuối."));
        assert!(truncated[0].content.chars().count() < 500);
    }

    #[tokio::test]
    async fn test_min_spacing_delays_consecutive_calls() {
        let completer = Arc::new(ScriptedCompleter::new("ok"));
        let generator = Generator::new(completer.clone(), params(), 3, 1, 50);

        let started = Instant::now();
        generator.complete(&question()).await.unwrap();
        generator.complete(&question()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_salvage_extracts_balanced_region() {
        let value = salvage_json("Sure! Here it is: {\"answer\": 5, \"unit\": \"số\"} Hope that helps.");
        assert_eq!(value.unwrap()["answer"], 5);

        let value = salvage_json("prefix [1, 2, {\"a\": \"}\"}] suffix");
        assert_eq!(value.unwrap()[2]["a"], "}");

        assert!(salvage_json("no json here at all").is_none());
        assert!(salvage_json("{\"unterminated\": ").is_none());
    }

    #[tokio::test]
    async fn test_complete_json_salvages_or_empties() {
        let completer = Arc::new(ScriptedCompleter::new("text before {\"score\": 80} text after"));
        let generator = generator(completer, 3);
        let value = generator.complete_json(&question()).await.unwrap();
        assert_eq!(value["score"], 80);

        let completer = Arc::new(ScriptedCompleter::new("hoàn toàn không phải JSON"));
        let generator = self::generator(completer, 3);
        let value = generator.complete_json(&question()).await.unwrap();
        assert_eq!(value, serde_json::json!({}));
    }
}
