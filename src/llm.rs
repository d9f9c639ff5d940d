//! Structured-extraction client — transport to the LLM backend
//!
//! Defines the client trait and error types for structured extraction.
//! Two implementations:
//! - `SubprocessClient`: spawns a configured command and exchanges JSON
//!   over stdin/stdout (production)
//! - `MockClient`: returns scripted responses in order (testing)
//!
//! The client is responsible for unwrapping provider-specific envelopes;
//! callers always receive the model's structured content as parsed JSON.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Errors from structured-extraction client operations.
///
/// `Unavailable` and `CallFailed` are transport-level and never retried
/// by the extractor; `ParseError` means the model produced non-JSON
/// content and counts as a validation failure.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("extraction backend not available: {0}")]
    Unavailable(String),
    #[error("extraction call failed: {0}")]
    CallFailed(String),
    #[error("response is not valid JSON: {0}")]
    ParseError(String),
}

/// Client trait for structured extraction calls.
///
/// Abstracts over transport (subprocess, HTTP, mock) so the extractor
/// doesn't depend on how the model is reached.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Check if the backend is reachable.
    async fn is_available(&self) -> bool;

    /// Invoke the model with a prompt and a JSON Schema constraining the
    /// output shape. Returns the raw structured content as parsed JSON.
    async fn structured_extract(
        &self,
        model: &str,
        prompt: &str,
        json_schema: &Value,
    ) -> Result<Value, ClientError>;
}

/// Extract a JSON object from model response text.
///
/// Models sometimes wrap JSON in markdown code fences or add explanation
/// text. Tries, in order:
/// 1. Direct parse (response is pure JSON)
/// 2. Extract from ```json ... ``` or ``` ... ``` fenced block
/// 3. Find the first `{` to last `}` span and parse that
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```\n") {
        let after = &trimmed[start + 4..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };

    if let Some(block) = fenced {
        if let Ok(v) = serde_json::from_str::<Value>(block.trim()) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                if v.is_object() {
                    return Some(v);
                }
            }
        }
    }

    None
}

/// Production client — spawns a configured command per call.
///
/// The request envelope `{model, prompt, json_schema}` goes to the
/// child's stdin; the response is read from stdout. Spawn failures map
/// to `Unavailable`, nonzero exits to `CallFailed`, unparseable output
/// to `ParseError`.
pub struct SubprocessClient {
    command: String,
    args: Vec<String>,
}

impl SubprocessClient {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Build a client from an argv-style command line.
    /// Returns None for an empty command line.
    pub fn from_command_line(argv: &[String]) -> Option<Self> {
        let (command, args) = argv.split_first()?;
        Some(Self::new(command).with_args(args.to_vec()))
    }
}

#[async_trait]
impl ExtractionClient for SubprocessClient {
    async fn is_available(&self) -> bool {
        Command::new(&self.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok()
    }

    async fn structured_extract(
        &self,
        model: &str,
        prompt: &str,
        json_schema: &Value,
    ) -> Result<Value, ClientError> {
        let envelope = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "json_schema": json_schema,
        });
        let body = envelope.to_string();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ClientError::Unavailable(format!("{}: {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(body.as_bytes())
                .await
                .map_err(|e| ClientError::CallFailed(format!("write to extractor: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ClientError::CallFailed(format!("wait for extractor: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClientError::CallFailed(format!(
                "extractor exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        extract_json(&stdout).ok_or_else(|| {
            // Truncate on char boundaries; model prose is often non-ASCII.
            let preview: String = stdout.chars().take(200).collect();
            ClientError::ParseError(format!("no JSON object in extractor output: {}", preview))
        })
    }
}

/// Mock client for testing — returns scripted responses in call order.
pub struct MockClient {
    available: bool,
    responses: Mutex<VecDeque<Result<Value, ClientError>>>,
}

impl MockClient {
    /// Create a mock client that reports as available.
    pub fn available() -> Self {
        Self {
            available: true,
            responses: Mutex::new(VecDeque::new()),
        }
    }

    /// Create a mock client that reports as unavailable.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            responses: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a successful response.
    pub fn with_response(self, response: Value) -> Self {
        self.responses
            .lock()
            .expect("mock queue lock")
            .push_back(Ok(response));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, error: ClientError) -> Self {
        self.responses
            .lock()
            .expect("mock queue lock")
            .push_back(Err(error));
        self
    }
}

#[async_trait]
impl ExtractionClient for MockClient {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn structured_extract(
        &self,
        _model: &str,
        _prompt: &str,
        _json_schema: &Value,
    ) -> Result<Value, ClientError> {
        if !self.available {
            return Err(ClientError::Unavailable(
                "mock client configured as unavailable".to_string(),
            ));
        }
        self.responses
            .lock()
            .expect("mock queue lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ClientError::CallFailed(
                    "mock response queue exhausted".to_string(),
                ))
            })
    }
}
