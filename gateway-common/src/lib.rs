//! Inference Gateway Common Types
//!
//! Wire envelopes for the gateway's two public surfaces. Clients of the
//! gateway can depend on this crate instead of redefining the shapes.

pub mod native;
pub mod oai;

pub use native::{
    EmbeddingData, EmbeddingsRequest, EmbeddingsResponse, ErrorBody, ErrorEnvelope,
    JsonSchemaSpec, MessageInput, ModelEntry, ModelsResponse, StreamErrorEvent, TextDeltaEvent,
    TextGenerateRequest, TextGenerateResponse,
};
