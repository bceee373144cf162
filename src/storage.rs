//! Storage Manager (`spec.md` §4.5).
//!
//! Orchestrates the per-image pipeline — validate, filter, anonymise,
//! number, move into layout — and owns the counters surface. `study_states`,
//! the numbering maps and the counter tree live behind one `storage_lock`
//! (`spec.md` §5), acquired twice per image and never held across disk I/O.
//! Grounded in the write-to-layout shape of the C-STORE handler previously
//! carried in `storescp/store_async.rs`, and in
//! `examples/original_source/pixieveil/storage/storage_manager.py::process_image`
//! for the step ordering and failure semantics.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use dicom_dictionary_std::tags;
use dicom_object::{open_file, FileDicomObject, InMemDicomObject};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::anonymizer;
use crate::config::Settings;
use crate::counters::Counters;
use crate::numbering::{format_number, NumberingState};
use crate::profile::Profile;
use crate::series_filter::{SeriesFilter, Verdict};
use crate::uid_registry::UidRegistry;

#[derive(Debug, Clone)]
pub struct StudyState {
    pub study_number: u32,
    pub last_received: Instant,
}

struct Inner {
    numbering: NumberingState,
    study_states: HashMap<String, StudyState>,
    counters: Counters,
}

pub struct StorageManager {
    base_path: PathBuf,
    temp_path: PathBuf,
    filter: SeriesFilter,
    profile: Profile,
    uid_registry: UidRegistry,
    inner: Mutex<Inner>,
}

impl StorageManager {
    pub fn new(settings: &Settings) -> Self {
        let storage = settings.storage();
        let base_path = PathBuf::from(&storage.base_path);
        let temp_path = PathBuf::from(&storage.temp_path);
        if let Err(error) = fs::create_dir_all(&base_path) {
            warn!(%error, path = %base_path.display(), "could not create storage base path");
        }
        if let Err(error) = fs::create_dir_all(&temp_path) {
            warn!(%error, path = %temp_path.display(), "could not create temp path");
        }

        let numbering = NumberingState::recover_from_disk(&base_path);
        StorageManager {
            base_path,
            temp_path,
            filter: SeriesFilter::new(&settings.series_filter),
            profile: settings.active_profile(),
            uid_registry: UidRegistry::new(),
            inner: Mutex::new(Inner {
                numbering,
                study_states: HashMap::new(),
                counters: Counters::new(),
            }),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// `spec.md` §4.5 "SaveTempImage".
    pub fn save_temp_image(&self, bytes: &[u8], id: Uuid) -> std::io::Result<PathBuf> {
        let path = self.temp_path.join(format!("{id}.dcm"));
        fs::write(&path, bytes)?;
        self.lock().counters.record_received(bytes.len() as u64);
        Ok(path)
    }

    /// `spec.md` §4.5 "SaveTempImage", taking an already-parsed object with
    /// file-meta attached rather than a raw byte slice. No example in the
    /// reference pack demonstrates serialising a `FileDicomObject` to an
    /// in-memory buffer — every grounding site writes straight to a path —
    /// so the C-STORE adapter hands over the object itself and this writes
    /// it the same way the rest of the pack does (see `DESIGN.md`).
    pub fn save_temp_dicom_object(
        &self,
        file_obj: &FileDicomObject<InMemDicomObject>,
        id: Uuid,
    ) -> std::io::Result<PathBuf> {
        let path = self.temp_path.join(format!("{id}.dcm"));
        file_obj.write_to_file(&path)?;
        let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        self.lock().counters.record_received(bytes);
        Ok(path)
    }

    /// `spec.md` §4.5 "ProcessImage". Never panics and never propagates an
    /// error to the caller; every failure resolves to a counter increment
    /// and a debug-level log, and the temp file is removed.
    pub fn process_image(&self, temp_path: &Path, id: Uuid) {
        let start = Instant::now();

        let mut dicom_file = match open_file(temp_path) {
            Ok(obj) => obj,
            Err(error) => {
                debug!(%id, %error, "could not parse DICOM stream");
                self.lock().counters.record_validation_error();
                remove_temp(temp_path);
                return;
            }
        };

        let (Some(study_uid), Some(series_uid), Some(_sop_uid)) = (
            required_str(&dicom_file, tags::STUDY_INSTANCE_UID),
            required_str(&dicom_file, tags::SERIES_INSTANCE_UID),
            required_str(&dicom_file, tags::SOP_INSTANCE_UID),
        ) else {
            debug!(%id, "dataset is missing a required UID");
            self.lock().counters.record_validation_error();
            remove_temp(temp_path);
            return;
        };

        if self.filter.should_filter(&dicom_file) == Verdict::Drop {
            debug!(%id, "series filtered by configured predicate");
            self.lock().counters.record_filtered();
            remove_temp(temp_path);
            return;
        }

        if let Err(error) = anonymizer::anonymize(&mut dicom_file, &self.profile, &self.uid_registry)
        {
            debug!(%id, %error, "anonymisation failed");
            self.lock().counters.record_anonymization_error();
            remove_temp(temp_path);
            return;
        }

        if let Err(error) = dicom_file.write_to_file(temp_path) {
            debug!(%id, %error, "could not write anonymised dataset to temp path");
            self.lock().counters.record_io_error();
            remove_temp(temp_path);
            return;
        }

        let (study_number, series_number, image_number, dest) = {
            let mut inner = self.lock();
            let study_number = inner.numbering.allocate_study(&study_uid);
            let series_number =
                inner
                    .numbering
                    .allocate_series(&self.base_path, study_number, &series_uid);
            let image_number =
                inner
                    .numbering
                    .allocate_image(&self.base_path, study_number, series_number);
            let dest = self
                .base_path
                .join(format_number(study_number))
                .join(format_number(series_number))
                .join(format!("{}.dcm", format_number(image_number)));
            (study_number, series_number, image_number, dest)
        };

        if let Some(parent) = dest.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                debug!(%id, %error, "could not create destination directory");
                self.lock().counters.record_io_error();
                remove_temp(temp_path);
                return;
            }
        }

        if let Err(error) = fs::rename(temp_path, &dest) {
            debug!(%id, %error, "could not move image into layout");
            self.lock().counters.record_io_error();
            remove_temp(temp_path);
            return;
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let mut inner = self.lock();
        inner
            .study_states
            .entry(study_uid)
            .and_modify(|state| state.last_received = Instant::now())
            .or_insert_with(|| StudyState {
                study_number,
                last_received: Instant::now(),
            });
        inner.counters.record_processed(elapsed_ms);
        debug!(%id, study_number, series_number, image_number, "stored image");
    }

    /// `spec.md` §4.5 "GetCounters" — a read-only deep copy.
    pub fn get_counters(&self) -> Counters {
        self.lock().counters.snapshot()
    }

    /// A consistent snapshot of quiescence-relevant state, taken entirely
    /// under the lock with no I/O in the critical section (`spec.md` §5).
    pub fn snapshot_studies(&self) -> Vec<(String, StudyState)> {
        self.lock()
            .study_states
            .iter()
            .map(|(uid, state)| (uid.clone(), state.clone()))
            .collect()
    }

    pub fn mark_completed(&self, study_uid: &str) {
        let mut inner = self.lock();
        inner.study_states.remove(study_uid);
        inner.counters.record_study_completed();
    }

    pub fn record_archived(&self, image_count: u64) {
        self.lock().counters.record_archived(image_count);
    }

    pub fn record_archive_error(&self) {
        self.lock().counters.record_archive_error();
    }

    pub fn record_uploaded(&self, image_count: u64, bytes: u64) {
        self.lock().counters.record_uploaded(image_count, bytes);
    }

    pub fn record_upload_error(&self) {
        self.lock().counters.record_upload_error();
    }

    pub fn record_completion_upload_failure(&self) {
        self.lock().counters.record_completion_upload_failure();
    }

    pub fn record_missing_study_directory(&self) {
        self.lock().counters.record_missing_study_directory();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("storage lock poisoned")
    }
}

fn required_str(obj: &FileDicomObject<InMemDicomObject>, tag: dicom_core::header::Tag) -> Option<String> {
    obj.element(tag)
        .ok()?
        .to_str()
        .ok()
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
        .filter(|s| !s.is_empty())
}

fn remove_temp(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!(%error, path = %path.display(), "failed to remove temp file");
        }
    }
}
