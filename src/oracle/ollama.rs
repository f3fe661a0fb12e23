//! Ollama client.
//!
//! Blocking calls to `/api/chat` with the phase's JSON schema as the output
//! format. Every request uses the configured timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Oracle, OracleError, OracleReply, OracleRequest, OracleResult};

/// Configuration for the Ollama client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Model name to use.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    pub temperature: f64,
    /// Context window passed as `options.num_ctx`.
    pub num_ctx: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            timeout_secs: 120,
            temperature: 0.0,
            num_ctx: 128_000,
        }
    }
}

/// Oracle backed by a local Ollama server.
pub struct OllamaOracle {
    config: OllamaConfig,
    agent: ureq::Agent,
    /// Models available locally after `probe()`.
    available_models: Vec<String>,
}

impl OllamaOracle {
    /// Create a client. No request is made until [`Self::probe`] or the first completion.
    pub fn new(config: OllamaConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            config,
            agent,
            available_models: Vec::new(),
        }
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Check that the server answers on `/api/tags` and record its models.
    pub fn probe(&mut self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();

        match agent.get(&url).call() {
            Ok(resp) => {
                if resp.status() != 200 {
                    self.available_models.clear();
                    return false;
                }
                if let Ok(body) = resp.into_string() {
                    self.available_models = parse_model_list(&body);
                }
                true
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "ollama probe failed");
                self.available_models.clear();
                false
            }
        }
    }

    /// Whether the configured model was listed by the last probe.
    pub fn has_model(&self) -> bool {
        let target = &self.config.model;
        self.available_models
            .iter()
            .any(|m| m == target || m.split(':').next() == Some(target))
    }

    /// Request body for `/api/chat`.
    pub fn chat_body(&self, request: &OracleRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": self.config.temperature,
                "num_ctx": self.config.num_ctx,
            },
        });
        if let Some(format) = request.response_format {
            body["format"] = format.schema();
        }
        body
    }

    fn map_transport_error(&self, err: ureq::Error) -> OracleError {
        match err {
            ureq::Error::Status(status, resp) => OracleError::Http {
                status,
                message: resp.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => match transport.kind() {
                ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => {
                    OracleError::Unavailable {
                        url: self.config.base_url.clone(),
                    }
                }
                _ if transport.to_string().contains("timed out") => OracleError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                },
                _ => OracleError::RequestFailed {
                    message: transport.to_string(),
                },
            },
        }
    }
}

impl Oracle for OllamaOracle {
    fn complete(&self, request: &OracleRequest) -> OracleResult<OracleReply> {
        let url = format!("{}/api/chat", self.config.base_url);
        let body_str =
            serde_json::to_string(&self.chat_body(request)).map_err(|e| OracleError::Encode {
                message: e.to_string(),
            })?;

        tracing::debug!(model = %self.config.model, messages = request.messages.len(), "ollama chat");
        let resp = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body_str)
            .map_err(|e| self.map_transport_error(e))?;

        let resp_str = resp
            .into_string()
            .map_err(|e| OracleError::MalformedResponse {
                message: e.to_string(),
            })?;
        parse_chat_response(&resp_str)
    }

    fn name(&self) -> String {
        self.config.model.clone()
    }
}

impl std::fmt::Debug for OllamaOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaOracle")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("timeout_secs", &self.config.timeout_secs)
            .finish()
    }
}

/// Extract content and token counts from a non-streaming chat response.
pub fn parse_chat_response(body: &str) -> OracleResult<OracleReply> {
    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|e| OracleError::MalformedResponse {
            message: e.to_string(),
        })?;
    let content = json["message"]["content"]
        .as_str()
        .ok_or_else(|| OracleError::MalformedResponse {
            message: "missing 'message.content' field".into(),
        })?
        .to_string();
    Ok(OracleReply {
        content,
        input_tokens: json["prompt_eval_count"].as_u64().unwrap_or(0),
        output_tokens: json["eval_count"].as_u64().unwrap_or(0),
    })
}

fn parse_model_list(body: &str) -> Vec<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json["models"].as_array().map(|arr| {
                arr.iter()
                    .filter_map(|m| m["name"].as_str().map(|s| s.to_string()))
                    .collect()
            })
        })
        .unwrap_or_default()
}
