//! Text-pair scoring built on strict JSON generation.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    strip_code_fence, Engine, EngineError, GenerateOptions, JsonSchemaDirective, Message, Result,
    Role,
};

/// Schema name used for scoring requests.
pub const SCORE_SCHEMA_NAME: &str = "text_pair_scores";

const SCORING_INSTRUCTIONS: &str = "You rate how well the second text of each pair matches \
the first. Give every pair a score between 0 and 1, in the order given. Respond with JSON of \
the form {\"scores\":[number,...]} holding exactly one score per pair.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPair {
    pub left: String,
    pub right: String,
}

impl TextPair {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }
}

/// User-message payload carrying the pairs.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScorePrompt {
    pub pairs: Vec<TextPair>,
}

#[derive(Debug, Deserialize)]
struct ScoreOutput {
    scores: Vec<f64>,
}

pub fn score_directive() -> JsonSchemaDirective {
    JsonSchemaDirective {
        name: SCORE_SCHEMA_NAME.to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "scores": {
                    "type": "array",
                    "items": {"type": "number", "minimum": 0, "maximum": 1}
                }
            },
            "required": ["scores"],
            "additionalProperties": false
        }),
        strict: true,
    }
}

pub fn build_messages(pairs: &[TextPair]) -> Result<Vec<Message>> {
    let payload = serde_json::to_string(&ScorePrompt {
        pairs: pairs.to_vec(),
    })
    .map_err(|e| EngineError::InvalidInput(format!("failed to encode pairs: {e}")))?;

    Ok(vec![
        Message {
            role: Role::System,
            content: SCORING_INSTRUCTIONS.to_string(),
        },
        Message {
            role: Role::User,
            content: payload,
        },
    ])
}

/// Parse `{"scores":[...]}`, requiring one score per pair. Scores are
/// clamped into `[0, 1]`.
pub fn parse_scores(text: &str, expected: usize) -> Result<Vec<f32>> {
    let output: ScoreOutput = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| EngineError::Decode(format!("invalid scores payload: {e}")))?;

    if output.scores.len() != expected {
        return Err(EngineError::ScoreCountMismatch {
            expected,
            actual: output.scores.len(),
        });
    }

    Ok(output
        .scores
        .into_iter()
        .map(|s| s.clamp(0.0, 1.0) as f32)
        .collect())
}

/// Score `pairs` by asking `engine` for strict JSON output.
pub async fn score_text_pairs<E>(engine: &E, model: &str, pairs: &[TextPair]) -> Result<Vec<f32>>
where
    E: Engine + ?Sized,
{
    if pairs.is_empty() {
        return Ok(Vec::new());
    }

    let messages = build_messages(pairs)?;
    let options = GenerateOptions {
        temperature: 0.0,
        json_schema: Some(score_directive()),
        stream: false,
    };

    let text = engine.generate_text(model, &messages, &options).await?;
    parse_scores(&text, pairs.len())
}
