//! Oracle port: the external language model consulted at each phase boundary.
//!
//! The query processor only sees the [`Oracle`] trait. Two implementations
//! ship with the crate:
//! - [`ollama::OllamaOracle`]: a blocking client for a local Ollama server
//! - [`scripted::ScriptedOracle`]: canned replies, for replay and tests

pub mod ollama;
pub mod scripted;

use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Whether retrying an oracle call can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network hiccups, timeouts, overloaded server.
    Transient,
    /// The request or the reply envelope is wrong; retrying gives the same result.
    Fatal,
}

#[derive(Debug, Error, Diagnostic)]
pub enum OracleError {
    #[error("oracle is not reachable at {url}")]
    #[diagnostic(
        code(egg::oracle::unavailable),
        help("Start Ollama with `ollama serve`, or point [oracle].base_url at a running server.")
    )]
    Unavailable { url: String },

    #[error("oracle request timed out after {timeout_secs}s")]
    #[diagnostic(
        code(egg::oracle::timeout),
        help("Increase [oracle].timeout_secs or use a smaller model.")
    )]
    Timeout { timeout_secs: u64 },

    #[error("oracle returned HTTP {status}: {message}")]
    #[diagnostic(
        code(egg::oracle::http),
        help("5xx and 429 responses are retried when [oracle].transient_retries > 0. Other codes usually mean a wrong model name or request.")
    )]
    Http { status: u16, message: String },

    #[error("oracle request failed: {message}")]
    #[diagnostic(
        code(egg::oracle::request_failed),
        help("Check that the oracle server is running and the model is pulled.")
    )]
    RequestFailed { message: String },

    #[error("could not encode the oracle request: {message}")]
    #[diagnostic(
        code(egg::oracle::encode),
        help("The request itself is invalid; retrying will not help.")
    )]
    Encode { message: String },

    #[error("malformed oracle response: {message}")]
    #[diagnostic(
        code(egg::oracle::malformed_response),
        help("The server answered, but not with a chat completion. Check the base URL.")
    )]
    MalformedResponse { message: String },

    #[error("scripted oracle has no reply left after {served} requests")]
    #[diagnostic(
        code(egg::oracle::exhausted),
        help("Queue one reply per oracle call the query will make.")
    )]
    Exhausted { served: usize },
}

impl OracleError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::RequestFailed { .. } => {
                FailureClass::Transient
            }
            Self::Http { status, .. } if *status >= 500 || *status == 429 => FailureClass::Transient,
            Self::Http { .. }
            | Self::Encode { .. }
            | Self::MalformedResponse { .. }
            | Self::Exhausted { .. } => FailureClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

pub type OracleResult<T> = std::result::Result<T, OracleError>;

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Structured-output shape requested from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Phase 1: a time window and a list of locations.
    TimeLocationRange,
    /// Phase 2: the object and event ids worth exploring.
    NodeSelection,
    /// Phase 3 and single-shot strategies: the answer.
    FinalAnswer,
}

impl ResponseFormat {
    /// JSON schema handed to the model as its output format.
    pub fn schema(self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::TimeLocationRange => {
                let int = json!({"type": "integer"});
                json!({
                    "type": "object",
                    "properties": {
                        "start_year": int, "start_month": int, "start_day": int,
                        "start_hour": int, "start_minute": int,
                        "end_year": {"anyOf": [{"type": "integer"}, {"type": "string", "enum": ["inf"]}]},
                        "end_month": int, "end_day": int, "end_hour": int, "end_minute": int,
                        "locations": {"type": "array", "items": {"type": "string"}},
                        "explanation": {"type": "string"}
                    },
                    "required": ["start_year", "end_year", "locations"]
                })
            }
            Self::NodeSelection => json!({
                "type": "object",
                "properties": {
                    "object_nodes": {"type": "array", "items": {"type": "integer"}},
                    "event_nodes": {"type": "array", "items": {"type": "integer"}},
                    "explanation": {"type": "string"}
                },
                "required": ["object_nodes", "event_nodes"]
            }),
            Self::FinalAnswer => json!({
                "type": "object",
                "properties": {
                    "answer": {},
                    "modality": {"type": "string"},
                    "confidence": {"type": "number"},
                    "explanation": {"type": "string"}
                },
                "required": ["answer", "modality", "confidence", "explanation"]
            }),
        }
    }
}

/// What the query processor sends to the oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    pub messages: Vec<ChatMessage>,
    pub response_format: Option<ResponseFormat>,
}

impl OracleRequest {
    pub fn new(messages: Vec<ChatMessage>, response_format: ResponseFormat) -> Self {
        Self {
            messages,
            response_format: Some(response_format),
        }
    }
}

/// Raw oracle output plus token accounting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OracleReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl OracleReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// A blocking chat-completion oracle.
pub trait Oracle: Send + Sync {
    fn complete(&self, request: &OracleRequest) -> OracleResult<OracleReply>;

    /// Model or implementation name, for logs and records.
    fn name(&self) -> String {
        "oracle".to_string()
    }
}

impl<T: Oracle + ?Sized> Oracle for &T {
    fn complete(&self, request: &OracleRequest) -> OracleResult<OracleReply> {
        (**self).complete(request)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

impl<T: Oracle + ?Sized> Oracle for Arc<T> {
    fn complete(&self, request: &OracleRequest) -> OracleResult<OracleReply> {
        (**self).complete(request)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

impl<T: Oracle + ?Sized> Oracle for Box<T> {
    fn complete(&self, request: &OracleRequest) -> OracleResult<OracleReply> {
        (**self).complete(request)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classification() {
        let transient = [
            OracleError::Unavailable { url: "x".into() },
            OracleError::Timeout { timeout_secs: 1 },
            OracleError::Http { status: 503, message: String::new() },
            OracleError::Http { status: 429, message: String::new() },
            OracleError::RequestFailed { message: String::new() },
        ];
        for err in &transient {
            assert_eq!(err.class(), FailureClass::Transient, "{err}");
        }
        let fatal = [
            OracleError::Http { status: 404, message: String::new() },
            OracleError::Encode { message: String::new() },
            OracleError::MalformedResponse { message: String::new() },
            OracleError::Exhausted { served: 3 },
        ];
        for err in &fatal {
            assert_eq!(err.class(), FailureClass::Fatal, "{err}");
        }
    }

    #[test]
    fn chat_roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "hi"}));
    }

    #[test]
    fn schemas_require_phase_fields() {
        let schema = ResponseFormat::NodeSelection.schema();
        assert_eq!(schema["required"], serde_json::json!(["object_nodes", "event_nodes"]));
        let schema = ResponseFormat::FinalAnswer.schema();
        assert!(schema["properties"].get("confidence").is_some());
        let schema = ResponseFormat::TimeLocationRange.schema();
        assert!(schema["properties"].get("end_minute").is_some());
    }
}
