use crate::error::UploaderError;
use crate::notifier::{PROCESSING, REVIEW_PENDING};
use crate::registry::SessionRegistry;
use crate::session::{RecordedFile, RecordingSession};
use crate::storage::FileStorage;
use crate::upload::{PublishForm, Uploader};
use chrono::Local;
use flv::FlvMerger;
use std::path::PathBuf;
use std::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

const REVIEW_NOTICE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The session recorded no files
    NoContent,
    /// Uploaded under the given publication id
    Published(String),
}

/// Drains finalized sessions: waits for their files, merges, uploads.
pub struct Publisher {
    registry: Arc<SessionRegistry>,
    storage: Arc<FileStorage>,
    uploader: Arc<dyn Uploader + Send + Sync>,
}

impl Publisher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        storage: Arc<FileStorage>,
        uploader: Arc<dyn Uploader + Send + Sync>,
    ) -> Self {
        Self {
            registry,
            storage,
            uploader,
        }
    }

    /// Take sessions off the queue one at a time, publishing each in its
    /// own task, until the queue closes or shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        mut queue: mpsc::UnboundedReceiver<Arc<RecordingSession>>,
        notifier: Arc<Notify>,
    ) {
        let mut signal = pin::pin!(notifier.notified());
        loop {
            tokio::select! {
                next = queue.recv() => {
                    let Some(session) = next else {
                        info!("publisher: queue closed");
                        break;
                    };

                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let id = session.id();
                        match this.publish(session).await {
                            Ok(PublishOutcome::Published(bvid)) => {
                                info!("Session {} published as {}", id, bvid);
                            }
                            Ok(PublishOutcome::NoContent) => {}
                            Err(e) => error!("Session {} publish failed: {}", id, e),
                        }
                    });
                },
                _ = &mut signal => {
                    info!("publisher: shutdown");
                    break;
                }
            }
        }
    }

    /// Publish one finalized session.
    ///
    /// Any failure aborts the attempt and leaves the session registered.
    pub async fn publish(
        &self,
        session: Arc<RecordingSession>,
    ) -> Result<PublishOutcome, UploaderError> {
        let room = session.room();
        if let Some(room) = &room {
            room.post(PROCESSING).await;
        }

        info!("Publishing session {}, waiting for files to close", session.id());
        session.wait_files_closed().await;

        let files = session.files();
        let path = match files.len() {
            0 => {
                warn!("Session {} has no recorded files, nothing to publish", session.id());
                self.registry.remove(&session);
                return Ok(PublishOutcome::NoContent);
            }
            1 => self.storage.resolve(&files[0].path),
            _ => self.merge(&files).await?,
        };

        let form = PublishForm::new(&session.info(), Local::now());
        info!("Uploading {} as 《{}》", path.display(), form.title);
        let id = self.uploader.upload(&path, &form).await?;

        self.storage.remove_file(&path).await?;
        self.registry.remove(&session);

        if let Some(room) = room {
            room.post(&format!("Replay of this broadcast: {}", id)).await;
            tokio::spawn(async move {
                tokio::time::sleep(REVIEW_NOTICE_DELAY).await;
                room.post(REVIEW_PENDING).await;
            });
        }

        Ok(PublishOutcome::Published(id))
    }

    /// Concatenate `files` in arrival order, deleting each source once merged.
    async fn merge(&self, files: &[RecordedFile]) -> Result<PathBuf, UploaderError> {
        let target = self.storage.merge_target(&files[0].path);
        info!("Merging {} files into {}", files.len(), target.display());

        let mut merger = FlvMerger::create(&target).await?;
        for file in files {
            let source = self.storage.resolve(&file.path);
            info!(" - merging {}", file.path);
            merger.append(&source).await?;
            info!(" - deleting {}", file.path);
            self.storage.remove_file(&source).await?;
        }

        Ok(merger.close().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FileEvent, LifecycleEvent, SessionEvent};
    use crate::notifier::testing::RecordingNotifier;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;

    /// Uploader that keeps a copy of every upload
    #[derive(Default)]
    struct CapturingUploader {
        uploads: Mutex<Vec<(Vec<u8>, PublishForm)>>,
    }

    #[async_trait]
    impl Uploader for CapturingUploader {
        async fn upload(&self, path: &Path, form: &PublishForm) -> Result<String, UploaderError> {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| UploaderError::UploadError(e.to_string()))?;
            let mut uploads = self.uploads.lock();
            uploads.push((data, form.clone()));
            Ok(format!("BV{}", uploads.len()))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        registry: Arc<SessionRegistry>,
        queue: mpsc::UnboundedReceiver<Arc<RecordingSession>>,
        uploader: Arc<CapturingUploader>,
        publisher: Publisher,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let (registry, queue) = SessionRegistry::new(Duration::from_secs(5), notifier.clone());
        let storage = Arc::new(FileStorage::new(dir.path().to_string_lossy().into_owned()));
        let uploader = Arc::new(CapturingUploader::default());
        let publisher = Publisher::new(registry.clone(), storage, uploader.clone());
        Fixture {
            dir,
            registry,
            queue,
            uploader,
            publisher,
            notifier,
        }
    }

    fn session_event(id: &str) -> SessionEvent {
        SessionEvent {
            session_id: id.to_string(),
            title: "Room Title".to_string(),
            sub_category: "Games".to_string(),
            room_id: 42,
            name: "Host".to_string(),
        }
    }

    fn file_event(id: &str, path: &str) -> FileEvent {
        FileEvent {
            session_id: id.to_string(),
            path: path.to_string(),
        }
    }

    /// Minimal container: header, one video and one audio tag at `ts`
    fn flv(ts: u32, video_flags: u8) -> Vec<u8> {
        let mut buf = vec![b'F', b'L', b'V', 1, 5, 0, 0, 0, 9, 0, 0, 0, 0];
        for (tag_type, flags) in [(9u8, video_flags), (8u8, 0xaf)] {
            let payload = [flags, 1, 2, 3];
            buf.push(tag_type);
            buf.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
            buf.extend_from_slice(&ts.to_be_bytes()[1..]);
            buf.push((ts >> 24) as u8);
            buf.extend_from_slice(&[0, 0, 0]);
            buf.extend_from_slice(&payload);
            buf.extend_from_slice(&(11 + payload.len() as u32).to_be_bytes());
        }
        buf
    }

    async fn finalize(f: &mut Fixture, id: &str, files: &[&str]) -> Arc<RecordingSession> {
        f.registry
            .handle(LifecycleEvent::SessionStarted(session_event(id)))
            .unwrap();
        for file in files {
            f.registry.file_opened(&file_event(id, file));
            f.registry.file_closed(&file_event(id, file)).unwrap();
        }
        f.registry
            .handle(LifecycleEvent::SessionEnded(session_event(id)))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        f.queue.try_recv().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn single_file_is_published_as_is() {
        let mut f = fixture();
        let data = flv(0, 0x17);
        tokio::fs::write(f.dir.path().join("f1.flv"), &data).await.unwrap();

        let session = finalize(&mut f, "A", &["f1.flv"]).await;
        let outcome = f.publisher.publish(session).await.unwrap();

        assert_eq!(outcome, PublishOutcome::Published("BV1".to_string()));
        let uploads = f.uploader.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, data);
        assert_eq!(uploads[0].1.title, "[Games]Room Title");
        assert!(uploads[0].1.session.end_time.is_some());
        assert!(!f.dir.path().join("f1.flv").exists());
        assert_eq!(f.registry.len(), 0);

        let messages = f.notifier.messages();
        assert!(messages.contains(&PROCESSING.to_string()));
        assert!(messages.contains(&"Replay of this broadcast: BV1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn multiple_files_are_merged_in_arrival_order() {
        let mut f = fixture();
        tokio::fs::create_dir(f.dir.path().join("42-host")).await.unwrap();
        tokio::fs::write(f.dir.path().join("42-host/b.flv"), flv(100, 0x17))
            .await
            .unwrap();
        tokio::fs::write(f.dir.path().join("42-host/a.flv"), flv(30, 0x17))
            .await
            .unwrap();

        let session = finalize(&mut f, "A", &["42-host/b.flv", "42-host/a.flv"]).await;
        f.publisher.publish(session).await.unwrap();

        let uploads = f.uploader.uploads.lock();
        let merged = &uploads[0].0;
        // header + 4 tags of 15 bytes + 4 back-pointers
        assert_eq!(merged.len(), 13 + 4 * (15 + 4));
        let third_tag = 13 + 2 * 19;
        let ts = u32::from_be_bytes([
            merged[third_tag + 7],
            merged[third_tag + 4],
            merged[third_tag + 5],
            merged[third_tag + 6],
        ]);
        assert_eq!(ts, 100 + 30);

        let mut left = std::fs::read_dir(f.dir.path().join("42-host")).unwrap();
        assert!(left.next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn session_without_files_is_not_published() {
        let mut f = fixture();
        let session = finalize(&mut f, "A", &[]).await;

        let outcome = f.publisher.publish(session).await.unwrap();
        assert_eq!(outcome, PublishOutcome::NoContent);
        assert!(f.uploader.uploads.lock().is_empty());
        assert_eq!(f.registry.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn incompatible_codecs_abort_publishing() {
        let mut f = fixture();
        tokio::fs::write(f.dir.path().join("a.flv"), flv(0, 0x17)).await.unwrap();
        tokio::fs::write(f.dir.path().join("b.flv"), flv(0, 0x1c)).await.unwrap();

        let session = finalize(&mut f, "A", &["a.flv", "b.flv"]).await;
        let result = f.publisher.publish(session).await;

        assert!(matches!(
            result,
            Err(UploaderError::Merge(flv::FlvError::IncompatibleCodec { .. }))
        ));
        assert!(f.uploader.uploads.lock().is_empty());
        assert!(f.dir.path().join("b.flv").exists());
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_waits_for_open_files() {
        let mut f = fixture();
        tokio::fs::write(f.dir.path().join("f1.flv"), flv(0, 0x17)).await.unwrap();
        f.registry
            .handle(LifecycleEvent::SessionStarted(session_event("A")))
            .unwrap();
        f.registry.file_opened(&file_event("A", "f1.flv"));
        f.registry
            .handle(LifecycleEvent::SessionEnded(session_event("A")))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        let session = f.queue.try_recv().unwrap();

        let registry = f.registry.clone();
        let publisher = Arc::new(f.publisher);
        let task = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.publish(session).await })
        };

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!task.is_finished());
        assert!(f.uploader.uploads.lock().is_empty());

        registry.file_closed(&file_event("A", "f1.flv")).unwrap();
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, PublishOutcome::Published("BV1".to_string()));
    }
}
