//! Upload and context-cache lifecycle for media works.
//!
//! Uploading is expensive and a context cache is billed for its TTL, so both
//! are created lazily, reused across all chains of a run, and released
//! best-effort on reset or session teardown.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::gateway::{CacheHandle, FileRef, FileState, MediaStore, Part, ProviderError};
use crate::retry::{retry, RetryPolicy};
use crate::work::{CacheBinding, Modality, VideoMode, WorkInput};

/// How often the file store is polled while an upload is processing.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Independent timeout for media processing, distinct from generation timeouts.
const POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Default context cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("work \"{0}\" has no media payload to upload")]
    NoPayload(String),
    #[error("provider reported the uploaded file as failed")]
    ProcessingFailed,
    #[error("media processing did not finish within {0:?}")]
    ProcessingTimeout(Duration),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl MediaError {
    /// A message suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            MediaError::NoPayload(title) => {
                format!("\"{title}\" has no file attached. Re-upload the media and try again.")
            }
            MediaError::ProcessingFailed => {
                "The provider could not process this file. Check the format and try again.".into()
            }
            MediaError::ProcessingTimeout(t) => format!(
                "The provider is still processing this file after {}s. Try again later.",
                t.as_secs()
            ),
            MediaError::Provider(e) => e.user_message(),
        }
    }
}

/// The analysis-mode tag a context cache is bound to.
///
/// Caches bundle mode-specific system instructions, so a cache created under
/// one tag must never serve a request running under another.
pub fn mode_tag(work: &WorkInput) -> String {
    match work.modality {
        Modality::Video => match work.video_mode {
            VideoMode::Full => "video:full".to_string(),
            VideoMode::Keyframes => format!("video:keyframes:{}", work.keyframe_interval_secs),
            VideoMode::Transcript => "video:transcript".to_string(),
        },
        other => other.as_str().to_string(),
    }
}

fn cache_system_instruction(work: &WorkInput) -> String {
    let base = "You are an expert critical analyst. The attached media is the \
                work under analysis for this session.";
    let modality = match work.modality {
        Modality::Image => "Ground every claim in concrete visual evidence.",
        Modality::Audio => "Ground every claim in sonic evidence with approximate timestamps.",
        Modality::Video => match work.video_mode {
            VideoMode::Full => "Reference specific moments by timestamp.",
            VideoMode::Keyframes => "Visual attention is bounded to the sampled keyframes.",
            VideoMode::Transcript => "All visual analysis is forbidden; use the transcript only.",
        },
        Modality::Text => "",
    };
    format!("{base} {modality}").trim().to_string()
}

/// Manages provider-side media resources for [`WorkInput`]s.
pub struct MediaManager<S: MediaStore> {
    store: S,
    policy: RetryPolicy,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl<S: MediaStore> MediaManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
            poll_interval: POLL_INTERVAL,
            poll_timeout: POLL_TIMEOUT,
        }
    }

    /// Override timing for tests.
    pub fn with_timing(mut self, poll_interval: Duration, poll_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store_ref(&self) -> &S {
        &self.store
    }

    /// Upload the work's media payload, polling until the provider reports a
    /// terminal state. Idempotent: an existing remote reference is returned
    /// without issuing a second upload.
    pub async fn upload(&self, work: &mut WorkInput) -> Result<FileRef, MediaError> {
        if let Some(existing) = &work.remote_file {
            return Ok(existing.clone());
        }

        let local = work
            .local_file
            .as_ref()
            .ok_or_else(|| MediaError::NoPayload(work.title.clone()))?;

        let mime = local
            .mime_type
            .clone()
            .unwrap_or_else(|| {
                mime_guess::from_path(&local.file_name)
                    .first_raw()
                    .unwrap_or("application/octet-stream")
                    .to_string()
            });

        let uploaded = retry(&self.policy, "media::upload", || {
            self.store
                .upload_file(local.bytes.clone(), &mime, &local.file_name)
        })
        .await?;

        let active = self.poll_until_terminal(uploaded).await?;

        info!(file = %active.name, mime = %active.mime_type, "media upload active");
        work.remote_file = Some(active.clone());
        // The provider now holds the bytes; free the local buffer.
        work.local_file = None;
        Ok(active)
    }

    async fn poll_until_terminal(&self, mut file: FileRef) -> Result<FileRef, MediaError> {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            match file.state {
                FileState::Active => return Ok(file),
                FileState::Failed => return Err(MediaError::ProcessingFailed),
                FileState::Processing => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(MediaError::ProcessingTimeout(self.poll_timeout));
                    }
                    sleep(self.poll_interval).await;
                    let name = file.name.clone();
                    file = retry(&self.policy, "media::poll", || self.store.get_file(&name))
                        .await?;
                }
            }
        }
    }

    /// Create a context cache for a media work so all chains of a run share
    /// one uploaded payload.
    ///
    /// Returns `None` when caching is unavailable or fails: a cache is an
    /// optimization, never a correctness requirement. Text works are cheap
    /// enough that caching has no benefit.
    pub async fn create_cache(
        &self,
        work: &mut WorkInput,
        model: &str,
        ttl: Duration,
    ) -> Option<CacheHandle> {
        if work.modality == Modality::Text {
            return None;
        }
        let file = work.remote_file.clone()?;
        let tag = mode_tag(work);
        let instruction = cache_system_instruction(work);

        let result = retry(&self.policy, "media::create_cache", || {
            self.store
                .create_cache(model, &instruction, vec![Part::file(file.clone())], ttl)
        })
        .await;

        match result {
            Ok(handle) => {
                info!(cache = %handle.as_str(), mode = %tag, "context cache created");
                work.cache = Some(CacheBinding {
                    handle: handle.clone(),
                    mode_tag: tag,
                });
                Some(handle)
            }
            Err(err) => {
                warn!(error = %err, "context cache creation failed; continuing uncached");
                None
            }
        }
    }

    /// Release a cache created under a different analysis mode than the
    /// current one, so stale system instructions are never silently reused.
    pub async fn invalidate_if_mode_changed(&self, work: &mut WorkInput) {
        let current = mode_tag(work);
        let stale = work
            .cache
            .as_ref()
            .is_some_and(|binding| binding.mode_tag != current);
        if !stale {
            return;
        }

        // Clear the local binding first; a failed remote delete only means
        // the cache will expire via its TTL.
        let binding = work.cache.take();
        if let Some(binding) = binding {
            info!(
                cache = %binding.handle.as_str(),
                old_mode = %binding.mode_tag,
                new_mode = %current,
                "analysis mode changed; invalidating context cache"
            );
            if let Err(err) = self.store.delete_cache(&binding.handle).await {
                warn!(error = %err, "context cache delete failed");
            }
        }
    }

    /// Best-effort release of all remote resources held by the work.
    ///
    /// Local references are cleared before any remote delete is attempted, so
    /// a failed delete can never leave the work pointing at an ambiguous
    /// resource. Deletion failures (including missing credentials) are
    /// logged, never raised.
    pub async fn release(&self, work: &mut WorkInput) {
        let cache = work.cache.take();
        let file = work.remote_file.take();

        if let Some(binding) = cache {
            if let Err(err) = self.store.delete_cache(&binding.handle).await {
                warn!(error = %err, cache = %binding.handle.as_str(), "cache delete failed; will expire via TTL");
            }
        }
        if let Some(file) = file {
            if let Err(err) = self.store.delete_file(&file.name).await {
                warn!(error = %err, file = %file.name, "file delete failed; will expire server-side");
            }
        }
    }
}
