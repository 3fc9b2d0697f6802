//! Stage 2 of the chain: executing a generated strategy against the work.

use std::time::Duration;

use crate::gateway::{Attribution, GenerateGateway, GenerateRequest, Part, ProviderError};
use crate::strategy::Strategy;
use crate::work::WorkInput;

/// Required first line of every analysis, naming the speaking persona.
///
/// Hard contract: synthesis-stage persona extraction reads this header, so
/// both the strategy generator and the refinement prompt mandate it.
pub const ANALYSIS_HEADER_PREFIX: &str = "### Analysis by";

/// Execution and synthesis calls produce long-form analysis; give them minutes.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

const EXECUTION_MAX_TOKENS: u32 = 8192;

/// Execute one strategy against the work: a single generation call returning
/// the raw analysis text.
///
/// Text works are embedded alongside the strategy; media works are passed as
/// the uploaded file reference, through the shared context cache when one is
/// attached to the work. Failures carry the blocked/empty/provider
/// distinction from [`ProviderError`].
pub async fn execute_analysis(
    gateway: &dyn GenerateGateway,
    model: &str,
    strategy: &Strategy,
    work: &WorkInput,
) -> Result<String, ProviderError> {
    let mut parts = vec![Part::text(format!(
        "Follow this analysis strategy exactly:\n\n{strategy}\n\n\
         Remember: the first line of your response must be the \
         `{ANALYSIS_HEADER_PREFIX}` header the strategy mandates.",
        strategy = strategy.text
    ))];

    match (&work.text_data, &work.remote_file) {
        (Some(text), _) => parts.push(Part::text(format!(
            "The work to analyze, \"{title}\", follows in full.\n\n{text}",
            title = work.title
        ))),
        (None, Some(file)) => parts.push(Part::file(file.clone())),
        (None, None) => {
            return Err(ProviderError::invalid_request(format!(
                "work \"{}\" has neither text nor an uploaded file",
                work.title
            )))
        }
    }

    let mut request = GenerateRequest::new(model, parts, Attribution::new("pipeline::execute"))
        .temperature(0.8)
        .max_output_tokens(EXECUTION_MAX_TOKENS)
        .timeout(EXECUTION_TIMEOUT);

    if let Some(binding) = &work.cache {
        request = request.cached_content(binding.handle.clone());
    }

    let response = gateway.generate(request).await?;
    work.usage.record(&response.usage);

    Ok(response.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{FinishReason, GenerateResponse, TokenUsage};
    use std::sync::Mutex;

    struct CapturingGateway {
        seen: Mutex<Vec<GenerateRequest>>,
        reply: String,
    }

    #[async_trait::async_trait]
    impl GenerateGateway for CapturingGateway {
        async fn generate(
            &self,
            req: GenerateRequest,
        ) -> Result<GenerateResponse, ProviderError> {
            self.seen.lock().unwrap().push(req);
            Ok(GenerateResponse {
                text: self.reply.clone(),
                usage: TokenUsage {
                    input_tokens: 11,
                    output_tokens: 7,
                    cached_tokens: 3,
                },
                latency: Duration::from_millis(5),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn strategy() -> Strategy {
        Strategy {
            lens_label: "Formalist".into(),
            text: "Analyze the form.".into(),
        }
    }

    #[tokio::test]
    async fn text_work_is_embedded_and_usage_recorded() {
        let gateway = CapturingGateway {
            seen: Mutex::new(Vec::new()),
            reply: "### Analysis by Viktor Shklovsky\n...".into(),
        };
        let work = WorkInput::text("The Raven", "Once upon a midnight dreary");

        let text = execute_analysis(&gateway, "m", &strategy(), &work)
            .await
            .unwrap();
        assert!(text.starts_with(ANALYSIS_HEADER_PREFIX));

        let snap = work.usage.snapshot();
        assert_eq!(snap.api_calls, 1);
        assert_eq!(snap.input_tokens, 11);
        assert_eq!(snap.cached_tokens, 3);

        let seen = gateway.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let has_work_text = seen[0].parts.iter().any(|p| match p {
            Part::Text(t) => t.contains("midnight dreary"),
            _ => false,
        });
        assert!(has_work_text);
    }

    #[tokio::test]
    async fn media_work_uses_cache_handle() {
        let gateway = CapturingGateway {
            seen: Mutex::new(Vec::new()),
            reply: "### Analysis by A Critic\n...".into(),
        };
        let mut work = WorkInput::media(
            "Still Life",
            crate::work::Modality::Image,
            crate::work::LocalFile {
                file_name: "still.png".into(),
                mime_type: Some("image/png".into()),
                bytes: vec![0],
            },
        );
        work.local_file = None;
        work.remote_file = Some(crate::gateway::FileRef {
            name: "files/abc".into(),
            uri: "https://files/abc".into(),
            mime_type: "image/png".into(),
            state: crate::gateway::FileState::Active,
        });
        work.cache = Some(crate::work::CacheBinding {
            handle: crate::gateway::CacheHandle::new("cachedContents/1"),
            mode_tag: "image".into(),
        });

        execute_analysis(&gateway, "m", &strategy(), &work)
            .await
            .unwrap();

        let seen = gateway.seen.lock().unwrap();
        assert_eq!(
            seen[0].cached_content.as_ref().map(|c| c.as_str()),
            Some("cachedContents/1")
        );
        assert!(seen[0].parts.iter().any(|p| matches!(p, Part::File(_))));
    }

    #[tokio::test]
    async fn unready_work_is_an_invalid_request() {
        let gateway = CapturingGateway {
            seen: Mutex::new(Vec::new()),
            reply: String::new(),
        };
        let mut work = WorkInput::text("Empty", "x");
        work.text_data = None;

        let err = execute_analysis(&gateway, "m", &strategy(), &work)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
        assert_eq!(work.usage.snapshot().api_calls, 0);
    }
}
