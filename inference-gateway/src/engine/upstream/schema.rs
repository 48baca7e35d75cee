//! JSON-schema enforcement policy for upstream generation.

use std::future::Future;

use crate::config::{JsonSchemaConfig, SchemaMode};
use crate::engine::{parse_json_output, EngineError, JsonSchemaDirective, Result};

const JSON_ONLY_INSTRUCTION: &str =
    "Return ONLY valid JSON. Do not include markdown code fences or any commentary.";

/// How a single attempt asks the upstream for JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `response_format` + `guided_json` in the request body.
    Guided,
    /// An extra system message describing the expected output.
    Prompt,
    /// Nothing beyond the caller's own messages.
    BestEffort,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Guided => "guided",
            Strategy::Prompt => "prompt",
            Strategy::BestEffort => "best_effort",
        }
    }
}

pub fn strategy_for(mode: SchemaMode, attempt: u32) -> Strategy {
    match mode {
        SchemaMode::Guided => Strategy::Guided,
        SchemaMode::Prompt => Strategy::Prompt,
        SchemaMode::None => Strategy::BestEffort,
        SchemaMode::Auto if attempt == 0 => Strategy::Guided,
        SchemaMode::Auto => Strategy::Prompt,
    }
}

/// System message text for [`Strategy::Prompt`]. The schema is included
/// only when its serialized form fits in `max_prompt_bytes`.
pub fn injection_prompt(directive: &JsonSchemaDirective, max_prompt_bytes: usize) -> String {
    let mut prompt = JSON_ONLY_INSTRUCTION.to_string();

    match serde_json::to_string(&directive.schema) {
        Ok(schema) if schema.len() <= max_prompt_bytes => {
            if directive.name.is_empty() {
                prompt.push_str("\nThe output must conform to this JSON schema:\n");
            } else {
                prompt.push_str(&format!(
                    "\nThe output must conform to the JSON schema \"{}\":\n",
                    directive.name
                ));
            }
            prompt.push_str(&schema);
        }
        Ok(schema) => {
            tracing::debug!(
                schema_bytes = schema.len(),
                max_prompt_bytes,
                "schema exceeds prompt budget, omitting"
            );
        }
        Err(e) => tracing::debug!(error = %e, "schema could not be serialized"),
    }

    prompt
}

/// Run `attempt` until its output parses as JSON, up to `1 + max_retries`
/// times. Returns the fence-stripped JSON text.
///
/// Engine errors consume an attempt unless they are not retryable, in
/// which case they are returned as-is.
pub async fn enforce<F, Fut>(
    config: &JsonSchemaConfig,
    directive: &JsonSchemaDirective,
    mut attempt: F,
) -> Result<String>
where
    F: FnMut(u32, Strategy) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let attempts = config.max_retries.saturating_add(1);
    let mut last = EngineError::InvalidJson("no attempt was made".to_string());

    for n in 0..attempts {
        let strategy = strategy_for(config.mode, n);

        match attempt(n, strategy).await {
            Ok(text) => match parse_json_output(&text) {
                Ok(json) => return Ok(json.to_string()),
                Err(e) => {
                    tracing::warn!(
                        schema = %directive.name,
                        attempt = n + 1,
                        attempts,
                        strategy = strategy.as_str(),
                        error = %e,
                        "upstream output is not valid JSON"
                    );
                    last = EngineError::InvalidJson(e.to_string());
                }
            },
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    schema = %directive.name,
                    attempt = n + 1,
                    attempts,
                    strategy = strategy.as_str(),
                    error = %e,
                    "schema attempt failed"
                );
                last = e;
            }
        }
    }

    Err(EngineError::GenerationFailed {
        attempts: attempts as usize,
        last: Box::new(last),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn directive() -> JsonSchemaDirective {
        JsonSchemaDirective {
            name: "answer".into(),
            schema: json!({"type": "object", "properties": {"ok": {"type": "boolean"}}}),
            strict: true,
        }
    }

    fn policy(mode: SchemaMode, max_retries: u32) -> JsonSchemaConfig {
        JsonSchemaConfig {
            mode,
            max_retries,
            max_prompt_bytes: 65536,
        }
    }

    #[test]
    fn test_strategy_transitions() {
        assert_eq!(strategy_for(SchemaMode::Auto, 0), Strategy::Guided);
        assert_eq!(strategy_for(SchemaMode::Auto, 1), Strategy::Prompt);
        assert_eq!(strategy_for(SchemaMode::Auto, 2), Strategy::Prompt);
        assert_eq!(strategy_for(SchemaMode::Guided, 3), Strategy::Guided);
        assert_eq!(strategy_for(SchemaMode::Prompt, 0), Strategy::Prompt);
        assert_eq!(strategy_for(SchemaMode::None, 0), Strategy::BestEffort);
    }

    #[test]
    fn test_injection_prompt_includes_schema_within_budget() {
        let prompt = injection_prompt(&directive(), 65536);
        assert!(prompt.starts_with("Return ONLY valid JSON."));
        assert!(prompt.contains("\"answer\""));
        assert!(prompt.contains(r#""type":"object""#));
    }

    #[test]
    fn test_injection_prompt_omits_oversized_schema() {
        let prompt = injection_prompt(&directive(), 8);
        assert_eq!(prompt, JSON_ONLY_INSTRUCTION);
    }

    #[tokio::test]
    async fn test_auto_mode_falls_back_to_prompt() {
        let seen = RefCell::new(Vec::new());
        let outputs = ["not json", "```json\n{\"ok\":true}\n```"];

        let text = enforce(&policy(SchemaMode::Auto, 2), &directive(), |n, strategy| {
            seen.borrow_mut().push(strategy);
            let out = outputs[n as usize].to_string();
            async move { Ok(out) }
        })
        .await
        .unwrap();

        assert_eq!(text, r#"{"ok":true}"#);
        assert_eq!(*seen.borrow(), vec![Strategy::Guided, Strategy::Prompt]);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_report_generation_failed() {
        let calls = RefCell::new(0);
        let err = enforce(&policy(SchemaMode::Prompt, 2), &directive(), |_, _| {
            *calls.borrow_mut() += 1;
            async { Ok("still not json".to_string()) }
        })
        .await
        .unwrap_err();

        assert_eq!(*calls.borrow(), 3);
        match err {
            EngineError::GenerationFailed { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, EngineError::InvalidJson(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_engine_errors_consume_an_attempt() {
        let calls = RefCell::new(0);
        let text = enforce(&policy(SchemaMode::Guided, 1), &directive(), |n, _| {
            *calls.borrow_mut() += 1;
            async move {
                if n == 0 {
                    Err(EngineError::Http {
                        status: 500,
                        body: "boom".into(),
                    })
                } else {
                    Ok("[1,2]".to_string())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(text, "[1,2]");
        assert_eq!(*calls.borrow(), 2);
    }

    #[tokio::test]
    async fn test_timeouts_abort_immediately() {
        let calls = RefCell::new(0);
        let err = enforce(&policy(SchemaMode::Auto, 2), &directive(), |_, _| {
            *calls.borrow_mut() += 1;
            async { Err(EngineError::Timeout(Duration::from_secs(1))) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::Timeout(_)));
        assert_eq!(*calls.borrow(), 1);
    }
}
