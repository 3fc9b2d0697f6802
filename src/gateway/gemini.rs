//! Gemini REST adapter: content generation, file store, context caches.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAITS
// =============================================================================

/// Trait for content generation providers.
#[async_trait]
pub trait GenerateProvider: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}

/// Trait for the provider's file store and context cache.
///
/// Uploaded files transition through a processing state machine
/// (processing -> active | failed) polled by name.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Upload a binary payload; the returned ref may still be Processing.
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> Result<FileRef, ProviderError>;

    /// Fetch the current state of an uploaded file by resource name.
    async fn get_file(&self, name: &str) -> Result<FileRef, ProviderError>;

    /// Delete an uploaded file by resource name.
    async fn delete_file(&self, name: &str) -> Result<(), ProviderError>;

    /// Create a server-side context cache over the given contents.
    async fn create_cache(
        &self,
        model: &str,
        system_instruction: &str,
        parts: Vec<Part>,
        ttl: Duration,
    ) -> Result<CacheHandle, ProviderError>;

    /// Delete a context cache.
    async fn delete_cache(&self, handle: &CacheHandle) -> Result<(), ProviderError>;
}

// =============================================================================
// GEMINI ADAPTER
// =============================================================================

/// Maximum allowed response content length (4MB).
const MAX_RESPONSE_LEN: usize = 4 * 1_024 * 1_024;

/// Maximum allowed inline input characters (~250k tokens).
const MAX_INPUT_CHARS: usize = 1_000_000;

/// Gemini API adapter.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiAdapter {
    /// Create from API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(
            api_key,
            "https://generativelanguage.googleapis.com/v1beta",
            Duration::from_secs(300),
        )
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ProviderError::config("GEMINI_API_KEY not set"))?;

        let base_url = std::env::var("PRISM_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into());

        let timeout = std::env::var("PRISM_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        Self::with_config(api_key, base_url, timeout)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let key_value = HeaderValue::from_str(&api_key)
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert("x-goog-api-key", key_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    fn upload_url(&self) -> String {
        // The upload endpoint lives outside the versioned path.
        let root = self
            .base_url
            .trim_end_matches("/v1beta")
            .trim_end_matches('/');
        format!("{root}/upload/v1beta/files")
    }

    fn resource_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    fn cache_url(&self) -> String {
        format!("{}/cachedContents", self.base_url)
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// Read a response body with the size cap enforced.
    async fn read_body(mut response: reqwest::Response) -> Result<String, ProviderError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    /// Map a non-success HTTP status + parsed error body into a ProviderError.
    fn map_http_error(status: u16, body: &str, request_id: Option<String>) -> ProviderError {
        let ctx = ErrorContext::new().with_status(status);
        let ctx = if let Some(id) = request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        let (message, code) = match serde_json::from_str::<ApiErrorEnvelope>(body) {
            Ok(envelope) => (
                envelope.error.message.unwrap_or_default(),
                envelope.error.status,
            ),
            Err(_) => (format!("HTTP {status}"), None),
        };
        let ctx = if let Some(ref c) = code {
            ctx.with_code(c)
        } else {
            ctx
        };

        match status {
            429 => ProviderError::rate_limited(Duration::from_secs(60), ctx),
            401 | 403 => ProviderError::permission_denied(message, ctx),
            400 => ProviderError::InvalidRequest {
                message,
                context: Some(ctx),
            },
            504 => ProviderError::Timeout(Duration::from_secs(0), Some(ctx)),
            s => ProviderError::provider_with_context(message, s >= 500, ctx),
        }
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cached_content: Option<String>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct ApiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<ApiPart>,
}

#[derive(Serialize)]
enum ApiPart {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "fileData", rename_all = "camelCase")]
    FileData { mime_type: String, file_uri: String },
}

impl From<&Part> for ApiPart {
    fn from(p: &Part) -> Self {
        match p {
            Part::Text(t) => ApiPart::Text(t.clone()),
            Part::File(f) => ApiPart::FileData {
                mime_type: f.mime_type.clone(),
                file_uri: f.uri.clone(),
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateApiResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    cached_content_token_count: Option<u64>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct FileEnvelope {
    file: ApiFile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiFile {
    name: String,
    uri: Option<String>,
    mime_type: Option<String>,
    state: Option<String>,
}

impl ApiFile {
    fn into_ref(self) -> FileRef {
        let state = self
            .state
            .as_deref()
            .map(FileState::from)
            .unwrap_or(FileState::Processing);
        FileRef {
            uri: self.uri.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            mime_type: self.mime_type.unwrap_or_else(|| "application/octet-stream".into()),
            state,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCacheRequest {
    model: String,
    system_instruction: ApiContent,
    contents: Vec<ApiContent>,
    ttl: String,
}

#[derive(Deserialize)]
struct CreateCacheResponse {
    name: String,
}

// =============================================================================
// GENERATE PROVIDER IMPL
// =============================================================================

#[async_trait]
impl GenerateProvider for GeminiAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let total_chars: usize = req
            .parts
            .iter()
            .map(|p| match p {
                Part::Text(t) => t.len(),
                Part::File(_) => 0,
            })
            .sum();

        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();

        let api_req = GenerateApiRequest {
            contents: vec![ApiContent {
                role: Some("user"),
                parts: req.parts.iter().map(ApiPart::from).collect(),
            }],
            system_instruction: req.system_instruction.as_ref().map(|s| ApiContent {
                role: None,
                parts: vec![ApiPart::Text(s.clone())],
            }),
            cached_content: req.cached_content.as_ref().map(|c| c.0.clone()),
            generation_config: GenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_output_tokens,
                response_mime_type: req.response_schema.as_ref().map(|_| "application/json"),
                response_schema: req.response_schema.clone(),
            },
        };

        let mut builder = self.client.post(self.generate_url(&req.model)).json(&api_req);
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = Self::read_body(response).await?;

        if !status.is_success() {
            return Err(Self::map_http_error(status.as_u16(), &body, request_id));
        }

        let parsed: GenerateApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider(format!("Invalid JSON: {e}"), false))?;

        // Prompt-level safety block: no candidates will ever appear.
        if let Some(feedback) = &parsed.prompt_feedback {
            if let Some(reason) = &feedback.block_reason {
                return Err(ProviderError::blocked(reason.clone()));
            }
        }

        let candidate = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or(ProviderError::EmptyCandidates)?;

        let finish_reason = FinishReason::from(candidate.finish_reason.clone());
        if finish_reason == FinishReason::Safety {
            return Err(ProviderError::blocked("SAFETY"));
        }

        let text: String = candidate
            .content
            .and_then(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyCandidates);
        }

        let usage = parsed
            .usage_metadata
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count.unwrap_or(0),
                output_tokens: u.candidates_token_count.unwrap_or(0),
                cached_tokens: u.cached_content_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(GenerateResponse {
            text,
            usage,
            latency: start.elapsed(),
            finish_reason,
        })
    }
}

// =============================================================================
// MEDIA STORE IMPL
// =============================================================================

#[async_trait]
impl MediaStore for GeminiAdapter {
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> Result<FileRef, ProviderError> {
        // Simple (non-resumable) media upload with metadata in query params.
        let response = self
            .client
            .post(self.upload_url())
            .query(&[("key", self.api_key.as_str())])
            .header("X-Goog-Upload-Protocol", "raw")
            .header("X-Goog-File-Name", display_name)
            .header(CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = Self::read_body(response).await?;

        if !status.is_success() {
            return Err(Self::map_http_error(status.as_u16(), &body, request_id));
        }

        let envelope: FileEnvelope = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider(format!("Invalid JSON: {e}"), false))?;
        Ok(envelope.file.into_ref())
    }

    async fn get_file(&self, name: &str) -> Result<FileRef, ProviderError> {
        let response = self.client.get(self.resource_url(name)).send().await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = Self::read_body(response).await?;

        if !status.is_success() {
            return Err(Self::map_http_error(status.as_u16(), &body, request_id));
        }

        let file: ApiFile = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider(format!("Invalid JSON: {e}"), false))?;
        Ok(file.into_ref())
    }

    async fn delete_file(&self, name: &str) -> Result<(), ProviderError> {
        let response = self.client.delete(self.resource_url(name)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let request_id = Self::extract_request_id(response.headers());
            let body = Self::read_body(response).await?;
            return Err(Self::map_http_error(status.as_u16(), &body, request_id));
        }
        Ok(())
    }

    async fn create_cache(
        &self,
        model: &str,
        system_instruction: &str,
        parts: Vec<Part>,
        ttl: Duration,
    ) -> Result<CacheHandle, ProviderError> {
        let api_req = CreateCacheRequest {
            model: format!("models/{model}"),
            system_instruction: ApiContent {
                role: None,
                parts: vec![ApiPart::Text(system_instruction.to_string())],
            },
            contents: vec![ApiContent {
                role: Some("user"),
                parts: parts.iter().map(ApiPart::from).collect(),
            }],
            ttl: format!("{}s", ttl.as_secs()),
        };

        let response = self
            .client
            .post(self.cache_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = Self::read_body(response).await?;

        if !status.is_success() {
            return Err(Self::map_http_error(status.as_u16(), &body, request_id));
        }

        let parsed: CreateCacheResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider(format!("Invalid JSON: {e}"), false))?;
        Ok(CacheHandle::new(parsed.name))
    }

    async fn delete_cache(&self, handle: &CacheHandle) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(self.resource_url(handle.as_str()))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let request_id = Self::extract_request_id(response.headers());
            let body = Self::read_body(response).await?;
            return Err(Self::map_http_error(status.as_u16(), &body, request_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_mapping() {
        let err = GeminiAdapter::map_http_error(429, "{}", None);
        assert!(matches!(err, ProviderError::RateLimited { .. }));

        let err = GeminiAdapter::map_http_error(403, "{}", None);
        assert!(matches!(err, ProviderError::PermissionDenied { .. }));

        let err = GeminiAdapter::map_http_error(400, "{}", None);
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));

        let err = GeminiAdapter::map_http_error(500, "{}", None);
        assert!(err.is_retryable());

        let err = GeminiAdapter::map_http_error(404, "{}", None);
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_body_status_is_captured() {
        let body = r#"{"error":{"message":"quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = GeminiAdapter::map_http_error(429, body, Some("req-1".into()));
        let ctx = err.context().expect("context");
        assert_eq!(ctx.provider_code.as_deref(), Some("RESOURCE_EXHAUSTED"));
        assert_eq!(err.request_id(), Some("req-1"));
    }

    #[test]
    fn api_file_defaults_to_processing() {
        let file = ApiFile {
            name: "files/x".into(),
            uri: None,
            mime_type: None,
            state: None,
        };
        let r = file.into_ref();
        assert_eq!(r.state, FileState::Processing);
        assert_eq!(r.uri, "files/x");
    }
}
