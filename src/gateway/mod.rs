//! Provider gateway for content generation and media storage.

pub mod error;
pub mod gemini;
pub mod types;
pub mod usage;

use std::sync::Arc;

use crate::retry::{retry, RetryPolicy};
use gemini::GenerateProvider;
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use gemini::{GeminiAdapter, MediaStore};
pub use types::*;
pub use usage::{CallStatus, NoopUsageSink, StderrUsageSink, UsageSink};

/// Trait the analysis pipeline generates through.
///
/// `ProviderGateway` is the production implementation; tests substitute doubles.
#[async_trait::async_trait]
pub trait GenerateGateway: Send + Sync {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}

/// Gateway wrapping a provider adapter with retry/backoff and usage recording.
pub struct ProviderGateway<P: GenerateProvider, U: UsageSinkTrait> {
    provider: P,
    usage_sink: Arc<U>,
    policy: RetryPolicy,
}

#[async_trait::async_trait]
impl<P: GenerateProvider, U: UsageSinkTrait> GenerateGateway for ProviderGateway<P, U> {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        ProviderGateway::generate(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<GeminiAdapter, U> {
    /// Build a gateway over the Gemini adapter from environment configuration.
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let provider = GeminiAdapter::from_env()?;
        Ok(Self {
            provider,
            usage_sink,
            policy: RetryPolicy::default(),
        })
    }
}

impl<P: GenerateProvider, U: UsageSinkTrait> ProviderGateway<P, U> {
    pub fn with_policy(provider: P, usage_sink: Arc<U>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            usage_sink,
            policy,
        }
    }

    pub async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let result = retry(&self.policy, req.attribution.caller, || {
            self.provider.generate(&req)
        })
        .await;

        match &result {
            Ok(resp) => {
                self.record(&req, Some(resp), None).await;
            }
            Err(err) => {
                self.record(&req, None, Some(err.code().to_string())).await;
            }
        }

        result
    }

    async fn record(
        &self,
        req: &GenerateRequest,
        resp: Option<&GenerateResponse>,
        error_code: Option<String>,
    ) {
        let mut record = ProviderCallRecord::new("generateContent", &req.model, req.attribution.caller)
            .user(req.attribution.user_id)
            .session(req.attribution.session_id);

        if let Some(resp) = resp {
            record = record
                .tokens(
                    resp.usage.input_tokens,
                    resp.usage.output_tokens,
                    resp.usage.cached_tokens,
                )
                .latency(resp.latency.as_millis() as u64);
        }
        if let Some(code) = error_code {
            record = record.error(code);
        }

        self.usage_sink.record(record).await;
    }
}
