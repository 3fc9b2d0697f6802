//! The unit of creative work under analysis and its remote-resource lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::gateway::{CacheHandle, FileRef, TokenUsage};

/// Kind of creative work being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Audio => "audio",
            Modality::Video => "video",
        }
    }
}

/// How video works should be treated during analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoMode {
    /// Comprehensive audiovisual treatment with timestamp references.
    Full,
    /// Visual attention bounded to sampled keyframes at a fixed interval.
    Keyframes,
    /// Audio/dialogue only; all visual analysis is forbidden.
    Transcript,
}

/// A locally held media payload not yet uploaded to the provider.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub file_name: String,
    /// Declared MIME type; guessed from the filename when absent.
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A provider-side context cache bound to one (work, analysis mode) pair.
///
/// The mode tag records which analysis mode the cache's system instructions
/// were built for; a cache must never be reused under a different mode.
#[derive(Debug, Clone)]
pub struct CacheBinding {
    pub handle: CacheHandle,
    pub mode_tag: String,
}

/// Monotonic usage accumulator shared by all concurrent chains of a session.
///
/// Chains record usage concurrently during fan-out, so all counters are
/// atomic; a snapshot may be taken at any time.
#[derive(Debug, Default)]
pub struct UsageMeter {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cached_tokens: AtomicU64,
    api_calls: AtomicU64,
}

/// Point-in-time copy of a [`UsageMeter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub api_calls: u64,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed remote call.
    pub fn record(&self, usage: &TokenUsage) {
        self.input_tokens.fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(usage.output_tokens, Ordering::Relaxed);
        self.cached_tokens.fetch_add(usage.cached_tokens, Ordering::Relaxed);
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            cached_tokens: self.cached_tokens.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
        }
    }
}

/// A creative work submitted for analysis, plus lifecycle state for its
/// remote upload and context cache.
///
/// Owned exclusively by the session that created it; `remote_file` and
/// `cache` are populated lazily on first use and must be released via
/// [`crate::media::MediaManager::release`] on reset or session teardown.
#[derive(Debug)]
pub struct WorkInput {
    pub title: String,
    pub modality: Modality,
    pub text_data: Option<String>,
    pub local_file: Option<LocalFile>,
    pub remote_file: Option<FileRef>,
    pub video_mode: VideoMode,
    pub keyframe_interval_secs: u32,
    pub cache: Option<CacheBinding>,
    pub usage: Arc<UsageMeter>,
}

impl WorkInput {
    /// A plain-text work.
    pub fn text(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            modality: Modality::Text,
            text_data: Some(text.into()),
            local_file: None,
            remote_file: None,
            video_mode: VideoMode::Full,
            keyframe_interval_secs: 10,
            cache: None,
            usage: Arc::new(UsageMeter::new()),
        }
    }

    /// A media work backed by a local payload awaiting upload.
    pub fn media(title: impl Into<String>, modality: Modality, file: LocalFile) -> Self {
        Self {
            title: title.into(),
            modality,
            text_data: None,
            local_file: Some(file),
            remote_file: None,
            video_mode: VideoMode::Full,
            keyframe_interval_secs: 10,
            cache: None,
            usage: Arc::new(UsageMeter::new()),
        }
    }

    pub fn with_video_mode(mut self, mode: VideoMode, keyframe_interval_secs: u32) -> Self {
        self.video_mode = mode;
        self.keyframe_interval_secs = keyframe_interval_secs;
        self
    }

    /// Whether the work has enough data to be analyzed.
    ///
    /// Text works need non-empty text; media works need a local payload or an
    /// already-uploaded remote reference.
    pub fn is_ready(&self) -> bool {
        match self.modality {
            Modality::Text => self
                .text_data
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty()),
            _ => self.local_file.is_some() || self.remote_file.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_work_ready_iff_nonempty() {
        assert!(WorkInput::text("The Raven", "Once upon a midnight dreary").is_ready());
        assert!(!WorkInput::text("Empty", "").is_ready());
        assert!(!WorkInput::text("Blank", "   \n ").is_ready());
    }

    #[test]
    fn media_work_ready_with_local_or_remote() {
        let local = LocalFile {
            file_name: "still.png".into(),
            mime_type: Some("image/png".into()),
            bytes: vec![0u8; 4],
        };
        let mut work = WorkInput::media("Still Life", Modality::Image, local);
        assert!(work.is_ready());

        work.local_file = None;
        assert!(!work.is_ready());

        work.remote_file = Some(FileRef {
            name: "files/abc".into(),
            uri: "https://files/abc".into(),
            mime_type: "image/png".into(),
            state: crate::gateway::FileState::Active,
        });
        assert!(work.is_ready());
    }

    #[test]
    fn usage_meter_accumulates() {
        let meter = UsageMeter::new();
        meter.record(&TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            cached_tokens: 10,
        });
        meter.record(&TokenUsage {
            input_tokens: 200,
            output_tokens: 70,
            cached_tokens: 0,
        });

        let snap = meter.snapshot();
        assert_eq!(snap.input_tokens, 300);
        assert_eq!(snap.output_tokens, 120);
        assert_eq!(snap.cached_tokens, 10);
        assert_eq!(snap.api_calls, 2);
    }
}
