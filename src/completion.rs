//! Completion Tracker (`spec.md` §4.6).
//!
//! A single long-running task: every `completion_check_interval` it snapshots
//! `study_states` (no I/O inside that critical section — `spec.md` §5),
//! selects quiescent studies, then archives, uploads and cleans each one up
//! outside the lock. Grounded in
//! `examples/original_source/pixieveil/storage/storage_manager.py::check_study_completions`,
//! corrected per `SPEC_FULL.md` §4 for the three-valued upload outcome in
//! place of the Python client's collapsed boolean.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::archiver;
use crate::numbering::format_number;
use crate::storage::StorageManager;
use crate::uploader::{UploadOutcome, Uploader};

pub struct CompletionTracker {
    storage: Arc<StorageManager>,
    uploader: Uploader,
    completion_timeout: Duration,
    check_interval: Duration,
}

impl CompletionTracker {
    pub fn new(
        storage: Arc<StorageManager>,
        uploader: Uploader,
        completion_timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        CompletionTracker {
            storage,
            uploader,
            completion_timeout,
            check_interval,
        }
    }

    /// Runs until `shutdown` fires, ticking every `check_interval`
    /// (`spec.md` §5 "Cancellation").
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let now = std::time::Instant::now();
        let quiescent: Vec<(String, u32)> = self
            .storage
            .snapshot_studies()
            .into_iter()
            .filter(|(_, state)| {
                now.saturating_duration_since(state.last_received) > self.completion_timeout
            })
            .map(|(uid, state)| (uid, state.study_number))
            .collect();

        for (study_uid, study_number) in quiescent {
            self.close_out(&study_uid, study_number).await;
        }
    }

    async fn close_out(&self, study_uid: &str, study_number: u32) {
        let study_dir = self.storage.base_path().join(format_number(study_number));
        if !study_dir.exists() {
            warn!(study_number, "quiescent study directory is missing; skipping");
            self.storage.record_missing_study_directory();
            return;
        }

        let image_count = count_dcm_files(&study_dir);
        let zip_path = self
            .storage
            .base_path()
            .join(format!("{}.zip", format_number(study_number)));

        let archive_result = {
            let study_dir = study_dir.clone();
            let zip_path = zip_path.clone();
            tokio::task::spawn_blocking(move || archiver::create_archive(&study_dir, &zip_path)).await
        };

        match archive_result {
            Ok(Ok(())) => {
                self.storage.record_archived(image_count);
            }
            _ => {
                warn!(study_number, "archive creation failed; will retry next tick");
                self.storage.record_archive_error();
                return;
            }
        }

        let remote_key = format!("{}.zip", format_number(study_number));
        match self.uploader.upload(&zip_path, &remote_key).await {
            UploadOutcome::Disabled => {
                info!(study_number, "upload disabled; keeping archive and directory");
                self.storage.mark_completed(study_uid);
            }
            UploadOutcome::Ok => {
                let bytes = tokio::fs::metadata(&zip_path).await.map(|m| m.len()).unwrap_or(0);
                if let Err(error) = tokio::fs::remove_dir_all(&study_dir).await {
                    warn!(%error, study_number, "could not remove study directory after upload");
                }
                if let Err(error) = tokio::fs::remove_file(&zip_path).await {
                    warn!(%error, study_number, "could not remove archive after upload");
                }
                self.storage.record_uploaded(image_count, bytes);
                self.storage.mark_completed(study_uid);
                info!(study_number, "study completed and uploaded");
            }
            UploadOutcome::Fail => {
                warn!(study_number, "upload failed; will retry next tick");
                self.storage.record_completion_upload_failure();
            }
        }
    }
}

fn count_dcm_files(study_dir: &Path) -> u64 {
    walkdir::WalkDir::new(study_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("dcm"))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RemoteStorageConfig, SeriesFilterConfig, Settings, StorageConfig, StudyConfig};
    use dicom_core::{dicom_value, DataElement, VR};
    use dicom_dictionary_std::tags;
    use dicom_object::InMemDicomObject;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn settings_with(base: &Path, temp: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.storage = Some(StorageConfig {
            base_path: base.to_string_lossy().to_string(),
            temp_path: temp.to_string_lossy().to_string(),
            remote_storage: RemoteStorageConfig::default(),
        });
        settings.study = StudyConfig {
            completion_timeout: 0,
            completion_check_interval: 30,
        };
        settings.series_filter = SeriesFilterConfig::default();
        settings
    }

    fn store_one_image(manager: &StorageManager, temp: &Path) {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            dicom_value!(Strs, ["1.1".to_string()]),
        ));
        obj.put(DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            dicom_value!(Strs, ["1.1.1".to_string()]),
        ));
        obj.put(DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            dicom_value!(Strs, ["1.1.1.1".to_string()]),
        ));
        let meta = dicom_object::FileMetaTableBuilder::new()
            .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.7")
            .media_storage_sop_instance_uid("1.1.1.1")
            .transfer_syntax(
                dicom_transfer_syntax_registry::entries::EXPLICIT_VR_LITTLE_ENDIAN.uid(),
            )
            .build()
            .unwrap();
        let path = temp.join("a.dcm");
        obj.with_exact_meta(meta).write_to_file(&path).unwrap();
        manager.process_image(&path, Uuid::new_v4());
    }

    #[tokio::test]
    async fn disabled_uploader_keeps_directory_but_marks_completed() {
        let base = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let manager = Arc::new(StorageManager::new(&settings_with(base.path(), temp.path())));
        store_one_image(&manager, temp.path());

        let uploader = Uploader::new(&RemoteStorageConfig::default());
        let tracker = CompletionTracker::new(
            manager.clone(),
            uploader,
            Duration::from_secs(0),
            Duration::from_secs(30),
        );
        tracker.tick().await;

        assert!(base.path().join("0001").exists());
        assert!(manager.snapshot_studies().is_empty());
        assert_eq!(manager.get_counters().completed_studies, 1);
    }

    #[tokio::test]
    async fn successful_upload_purges_directory_and_archive() {
        let base = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let manager = Arc::new(StorageManager::new(&settings_with(base.path(), temp.path())));
        store_one_image(&manager, temp.path());

        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/upload").with_status(200).create_async().await;
        let uploader = Uploader::new(&RemoteStorageConfig {
            base_url: Some(server.url()),
            auth_token: Some("token".to_string()),
        });
        let tracker = CompletionTracker::new(
            manager.clone(),
            uploader,
            Duration::from_secs(0),
            Duration::from_secs(30),
        );
        tracker.tick().await;

        assert!(!base.path().join("0001").exists());
        assert!(!base.path().join("0001.zip").exists());
        assert_eq!(manager.get_counters().remote_storage.studies, 1);
    }

    #[tokio::test]
    async fn failed_upload_leaves_directory_intact_for_retry() {
        let base = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let manager = Arc::new(StorageManager::new(&settings_with(base.path(), temp.path())));
        store_one_image(&manager, temp.path());

        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/upload").with_status(500).create_async().await;
        let uploader = Uploader::new(&RemoteStorageConfig {
            base_url: Some(server.url()),
            auth_token: None,
        });
        let tracker = CompletionTracker::new(
            manager.clone(),
            uploader,
            Duration::from_secs(0),
            Duration::from_secs(30),
        );
        tracker.tick().await;

        assert!(base.path().join("0001").exists());
        assert_eq!(manager.get_counters().remote_storage.errors, 1);
        assert!(!manager.snapshot_studies().is_empty());
    }
}
