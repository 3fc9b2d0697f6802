//! Upload, cache, and release lifecycle against a scripted media store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use prism_harness::gateway::{
    CacheHandle, FileRef, FileState, GenerateGateway, GenerateRequest, GenerateResponse,
    MediaStore, Part, ProviderError,
};
use prism_harness::lens::LensConfig;
use prism_harness::media::{MediaError, MediaManager};
use prism_harness::pipeline::{
    run_pipeline, LensSource, ModelConfig, PipelineDeps, PipelineRequest,
};
use prism_harness::retry::RetryPolicy;
use prism_harness::work::{CacheBinding, LocalFile, Modality, VideoMode, WorkInput};

#[derive(Default)]
struct MockStore {
    uploads: AtomicUsize,
    polls: AtomicUsize,
    cache_creates: AtomicUsize,
    deleted_files: Mutex<Vec<String>>,
    deleted_caches: Mutex<Vec<String>>,
    /// Number of polls that report Processing before Active.
    polls_until_active: usize,
    fail_uploaded_file: bool,
    fail_deletes: bool,
}

#[async_trait]
impl MediaStore for MockStore {
    async fn upload_file(
        &self,
        _bytes: Vec<u8>,
        mime_type: &str,
        _display_name: &str,
    ) -> Result<FileRef, ProviderError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(FileRef {
            name: "files/mock".into(),
            uri: "https://files/mock".into(),
            mime_type: mime_type.into(),
            state: if self.polls_until_active == 0 && !self.fail_uploaded_file {
                FileState::Active
            } else {
                FileState::Processing
            },
        })
    }

    async fn get_file(&self, name: &str) -> Result<FileRef, ProviderError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let state = if self.fail_uploaded_file {
            FileState::Failed
        } else if poll >= self.polls_until_active {
            FileState::Active
        } else {
            FileState::Processing
        };
        Ok(FileRef {
            name: name.into(),
            uri: format!("https://{name}"),
            mime_type: "video/mp4".into(),
            state,
        })
    }

    async fn delete_file(&self, name: &str) -> Result<(), ProviderError> {
        if self.fail_deletes {
            return Err(ProviderError::provider("store unavailable", true));
        }
        self.deleted_files.lock().unwrap().push(name.into());
        Ok(())
    }

    async fn create_cache(
        &self,
        _model: &str,
        _system_instruction: &str,
        _parts: Vec<Part>,
        _ttl: Duration,
    ) -> Result<CacheHandle, ProviderError> {
        self.cache_creates.fetch_add(1, Ordering::SeqCst);
        Ok(CacheHandle::new("cachedContents/mock"))
    }

    async fn delete_cache(&self, handle: &CacheHandle) -> Result<(), ProviderError> {
        if self.fail_deletes {
            return Err(ProviderError::provider("store unavailable", true));
        }
        self.deleted_caches
            .lock()
            .unwrap()
            .push(handle.as_str().into());
        Ok(())
    }
}

fn manager(store: MockStore) -> MediaManager<MockStore> {
    MediaManager::new(store)
        .with_timing(Duration::from_millis(1), Duration::from_millis(500))
        .with_retry_policy(RetryPolicy::none())
}

fn video_work() -> WorkInput {
    WorkInput::media(
        "Night Film",
        Modality::Video,
        LocalFile {
            file_name: "night.mp4".into(),
            mime_type: Some("video/mp4".into()),
            bytes: vec![0u8; 16],
        },
    )
}

#[tokio::test]
async fn upload_polls_until_active_and_is_idempotent() {
    let media = manager(MockStore {
        polls_until_active: 3,
        ..Default::default()
    });
    let mut work = video_work();

    let file = media.upload(&mut work).await.expect("upload");
    assert_eq!(file.state, FileState::Active);
    assert!(work.local_file.is_none(), "local bytes freed after upload");
    assert!(work.remote_file.is_some());

    // Second call returns the stored ref without touching the store.
    let again = media.upload(&mut work).await.expect("reuse");
    assert_eq!(again.name, file.name);
    assert_eq!(media.store_ref().uploads.load(Ordering::SeqCst), 1);
    assert_eq!(media.store_ref().polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_processing_is_a_hard_error() {
    let media = manager(MockStore {
        polls_until_active: 1,
        fail_uploaded_file: true,
        ..Default::default()
    });
    let mut work = video_work();

    let err = media.upload(&mut work).await.expect_err("must fail");
    assert!(matches!(err, MediaError::ProcessingFailed));
    assert!(work.remote_file.is_none());
}

#[tokio::test]
async fn cache_binds_to_the_current_analysis_mode() {
    let media = manager(MockStore::default());
    let mut work = video_work().with_video_mode(VideoMode::Keyframes, 7);

    media.upload(&mut work).await.expect("upload");
    let handle = media
        .create_cache(&mut work, "gemini-2.5-pro", Duration::from_secs(60))
        .await
        .expect("cache");
    assert_eq!(handle.as_str(), "cachedContents/mock");
    assert_eq!(
        work.cache.as_ref().map(|b| b.mode_tag.as_str()),
        Some("video:keyframes:7")
    );
}

#[tokio::test]
async fn mode_change_invalidates_the_cache() {
    let media = manager(MockStore::default());
    let mut work = video_work().with_video_mode(VideoMode::Keyframes, 7);

    media.upload(&mut work).await.expect("upload");
    media
        .create_cache(&mut work, "gemini-2.5-pro", Duration::from_secs(60))
        .await
        .expect("cache");

    // Same mode: the binding survives.
    media.invalidate_if_mode_changed(&mut work).await;
    assert!(work.cache.is_some());

    work.video_mode = VideoMode::Transcript;
    media.invalidate_if_mode_changed(&mut work).await;
    assert!(work.cache.is_none());
    assert_eq!(
        media.store_ref().deleted_caches.lock().unwrap().as_slice(),
        ["cachedContents/mock"]
    );
}

#[tokio::test]
async fn release_clears_local_state_even_when_remote_deletes_fail() {
    let media = manager(MockStore {
        fail_deletes: true,
        ..Default::default()
    });
    let mut work = video_work();
    work.local_file = None;
    work.remote_file = Some(FileRef {
        name: "files/mock".into(),
        uri: "https://files/mock".into(),
        mime_type: "video/mp4".into(),
        state: FileState::Active,
    });
    work.cache = Some(CacheBinding {
        handle: CacheHandle::new("cachedContents/mock"),
        mode_tag: "video:full".into(),
    });

    // Deletes fail, but the work must not keep pointing at remote resources.
    media.release(&mut work).await;
    assert!(work.remote_file.is_none());
    assert!(work.cache.is_none());
}

#[tokio::test]
async fn failed_run_still_releases_remote_media() {
    struct RefusingGateway;

    #[async_trait]
    impl GenerateGateway for RefusingGateway {
        async fn generate(
            &self,
            _req: GenerateRequest,
        ) -> Result<GenerateResponse, ProviderError> {
            Err(ProviderError::provider("model offline", false))
        }
    }

    let media = manager(MockStore::default());
    let gateway = RefusingGateway;
    let deps = PipelineDeps {
        gateway: &gateway,
        media: &media,
        models: ModelConfig::default(),
    };
    let mut work = video_work();

    let request = PipelineRequest {
        source: LensSource::Manual(vec![LensConfig::standard("Formalist")]),
    };
    let result = run_pipeline(&deps, &mut work, &request).await;
    assert!(result.is_err());

    // The upload and cache landed before the chain failed; teardown after a
    // failed run must still reclaim both.
    media.release(&mut work).await;
    assert_eq!(
        media.store_ref().deleted_files.lock().unwrap().as_slice(),
        ["files/mock"]
    );
    assert_eq!(
        media.store_ref().deleted_caches.lock().unwrap().as_slice(),
        ["cachedContents/mock"]
    );
    assert!(work.remote_file.is_none());
    assert!(work.cache.is_none());
}

#[tokio::test]
async fn release_deletes_cache_and_file() {
    let media = manager(MockStore::default());
    let mut work = video_work();

    media.upload(&mut work).await.expect("upload");
    media
        .create_cache(&mut work, "gemini-2.5-pro", Duration::from_secs(60))
        .await
        .expect("cache");

    media.release(&mut work).await;
    assert_eq!(
        media.store_ref().deleted_files.lock().unwrap().as_slice(),
        ["files/mock"]
    );
    assert_eq!(
        media.store_ref().deleted_caches.lock().unwrap().as_slice(),
        ["cachedContents/mock"]
    );
}
