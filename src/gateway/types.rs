//! Core types for the provider gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for cost tracking and debugging.
///
/// Every request through the gateway carries attribution so we know:
/// - Who made the request (user_id)
/// - What analysis session it's part of (session_id)
/// - Which code path triggered it (caller)
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// User who initiated the request (if known).
    pub user_id: Option<Uuid>,
    /// Analysis session this request is part of.
    pub session_id: Option<Uuid>,
    /// Which code path made this call, for debugging.
    /// Use a static string like "pipeline::general" or "selector::bridge".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

// =============================================================================
// FILE STORE TYPES
// =============================================================================

/// State of a file in the provider's file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Processing,
    Active,
    Failed,
}

impl From<&str> for FileState {
    fn from(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => FileState::Active,
            "FAILED" => FileState::Failed,
            _ => FileState::Processing,
        }
    }
}

impl FileState {
    /// Whether this is a terminal state (no more changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileState::Active | FileState::Failed)
    }
}

/// Reference to a file uploaded to the provider's file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Provider resource name, e.g. "files/abc123".
    pub name: String,
    /// URI used when attaching the file to generation requests.
    pub uri: String,
    /// MIME type the file was uploaded with.
    pub mime_type: String,
    /// Current processing state.
    pub state: FileState,
}

impl Serialize for FileState {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let v = match self {
            FileState::Processing => "PROCESSING",
            FileState::Active => "ACTIVE",
            FileState::Failed => "FAILED",
        };
        s.serialize_str(v)
    }
}

impl<'de> Deserialize<'de> for FileState {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(FileState::from(s.as_str()))
    }
}

/// Opaque handle to a provider-side context cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHandle(pub String);

impl CacheHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// GENERATION TYPES
// =============================================================================

/// One part of a generation request: inline text or an uploaded file reference.
#[derive(Debug, Clone)]
pub enum Part {
    Text(String),
    File(FileRef),
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text(content.into())
    }

    pub fn file(file: FileRef) -> Self {
        Part::File(file)
    }
}

/// Request for content generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Model to use, e.g. "gemini-2.5-pro".
    pub model: String,
    /// Ordered content parts (text and/or file references).
    pub parts: Vec<Part>,
    /// Optional system instruction.
    pub system_instruction: Option<String>,
    /// Context cache to attach. The cached contents are prepended server-side;
    /// mutually exclusive with `system_instruction` on most providers.
    pub cached_content: Option<CacheHandle>,
    /// When set, request JSON output conforming to this schema.
    pub response_schema: Option<serde_json::Value>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_output_tokens: Option<u32>,
    /// Per-request timeout override. Falls back to the adapter default.
    pub timeout: Option<Duration>,
    /// Attribution for cost tracking.
    pub attribution: Attribution,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, parts: Vec<Part>, attribution: Attribution) -> Self {
        Self {
            model: model.into(),
            parts,
            system_instruction: None,
            cached_content: None,
            response_schema: None,
            temperature: 0.7,
            max_output_tokens: None,
            timeout: None,
            attribution,
        }
    }

    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn cached_content(mut self, handle: CacheHandle) -> Self {
        self.cached_content = Some(handle);
        self
    }

    pub fn json_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("STOP") => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::MaxTokens,
            Some("SAFETY") => FinishReason::Safety,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Token usage reported by a single generation call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens generated.
    pub output_tokens: u64,
    /// Input tokens served from the provider context cache.
    pub cached_tokens: u64,
}

/// Response from a generation call.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Generated text.
    pub text: String,
    /// Token usage counters.
    pub usage: TokenUsage,
    /// Time taken for the request.
    pub latency: Duration,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}
