//! Native `/v1` HTTP API.
//!
//! Also holds the request normalization shared with the compatibility
//! surface, so both adapters validate inputs the same way.

pub mod embeddings;
pub mod health;
pub mod models;
pub mod reserved;
pub mod text;

use std::sync::Arc;

use axum::Router;
use nb_gateway_common::MessageInput;

use crate::engine::{JsonSchemaDirective, Message, Role};
use crate::error::{Error, Result};
use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(models::router())
        .merge(embeddings::router())
        .merge(text::router())
        .merge(reserved::router())
}

/// Trimmed, non-empty model ID.
pub(crate) fn require_model(model: &str) -> Result<&str> {
    let model = model.trim();
    if model.is_empty() {
        Err(Error::invalid_param("model", "model is required"))
    } else {
        Ok(model)
    }
}

/// Replace empty strings with a single space; some upstreams reject
/// zero-length inputs.
pub(crate) fn normalize_inputs(inputs: Vec<String>) -> Vec<String> {
    inputs
        .into_iter()
        .map(|s| if s.is_empty() { " ".to_string() } else { s })
        .collect()
}

/// Zero when absent; negative values are rejected.
pub(crate) fn temperature(value: Option<f32>) -> Result<f32> {
    match value {
        None => Ok(0.0),
        Some(t) if t.is_finite() && t >= 0.0 => Ok(t),
        Some(t) => Err(Error::invalid_param(
            "temperature",
            format!("temperature must be a non-negative number, got {t}"),
        )),
    }
}

/// Parse a role, accepting `developer` as an alias for `system`.
pub(crate) fn parse_role(role: &str) -> std::result::Result<Role, String> {
    if role.trim().eq_ignore_ascii_case("developer") {
        return Ok(Role::System);
    }
    role.parse()
}

/// Validate roles and drop messages whose content is blank.
pub(crate) fn normalize_messages(inputs: &[MessageInput]) -> Result<Vec<Message>> {
    let mut messages = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let role = parse_role(&input.role)
            .map_err(|e| Error::invalid_param("messages", format!("messages[{i}]: {e}")))?;
        messages.extend(Message::new(role, &input.content));
    }
    require_messages(messages)
}

pub(crate) fn require_messages(messages: Vec<Message>) -> Result<Vec<Message>> {
    if messages.is_empty() {
        Err(Error::invalid_param(
            "messages",
            "at least one message with non-empty content is required",
        ))
    } else {
        Ok(messages)
    }
}

/// Build a schema directive, requiring the schema to be a JSON object.
pub(crate) fn schema_directive(
    param: &'static str,
    name: &str,
    schema: serde_json::Value,
    strict: bool,
) -> Result<JsonSchemaDirective> {
    if !schema.is_object() {
        return Err(Error::invalid_param(param, "schema must be a JSON object"));
    }
    Ok(JsonSchemaDirective {
        name: name.trim().to_string(),
        schema,
        strict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_messages_drops_blank_content() {
        let messages = normalize_messages(&[
            MessageInput::new("system", "  "),
            MessageInput::new("user", " hi "),
        ])
        .unwrap();
        assert_eq!(messages, vec![Message::user("hi").unwrap()]);
    }

    #[test]
    fn test_normalize_messages_rejects_unknown_role() {
        let err = normalize_messages(&[MessageInput::new("tool", "x")]).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
        assert!(err.to_string().contains("messages[0]"));
    }

    #[test]
    fn test_all_blank_messages_are_rejected() {
        assert!(normalize_messages(&[MessageInput::new("user", "")]).is_err());
        assert!(normalize_messages(&[]).is_err());
    }

    #[test]
    fn test_developer_role_maps_to_system() {
        assert_eq!(parse_role("developer").unwrap(), Role::System);
    }

    #[test]
    fn test_temperature_validation() {
        assert_eq!(temperature(None).unwrap(), 0.0);
        assert_eq!(temperature(Some(0.7)).unwrap(), 0.7);
        assert!(temperature(Some(-0.1)).is_err());
        assert!(temperature(Some(f32::NAN)).is_err());
    }

    #[test]
    fn test_normalize_inputs_pads_empty_strings() {
        let inputs = normalize_inputs(vec!["".into(), "a".into()]);
        assert_eq!(inputs, vec![" ".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_schema_must_be_object() {
        assert!(schema_directive("json_schema", "x", json!([1]), true).is_err());
        let directive = schema_directive("json_schema", " x ", json!({}), true).unwrap();
        assert_eq!(directive.name, "x");
    }
}
