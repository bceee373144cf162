//! Counters (`spec.md` §4.5 "GetCounters", ambient dashboard support).
//!
//! A plain, `Serialize`-able snapshot of everything the dashboard's `/stats`
//! endpoint reports, grounded in
//! `examples/original_source/pixieveil/dashboard/sse.py`'s `ImageCounter` and
//! `dashboard/server.py::handle_stats`'s combined JSON shape. `StorageManager`
//! owns the live instance behind `storage_lock`; `GetCounters` returns a
//! cheap `Clone` so callers never hold the lock while serialising.

use serde::Serialize;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingErrors {
    pub validation: u64,
    pub anonymization: u64,
    pub io: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReceptionCounters {
    pub images: u64,
    pub bytes: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingCounters {
    pub errors: ProcessingErrors,
    pub average_processing_ms: f64,
    pub count: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ArchiveCounters {
    pub studies: u64,
    pub images: u64,
    pub errors: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RemoteStorageCounters {
    pub studies: u64,
    pub images: u64,
    pub bytes: u64,
    pub errors: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Counters {
    pub reception: ReceptionCounters,
    pub processing: ProcessingCounters,
    pub archive: ArchiveCounters,
    pub remote_storage: RemoteStorageCounters,
    pub filtered: u64,
    pub completed_studies: u64,
    pub errors_total: u64,
}

impl Counters {
    pub fn new() -> Self {
        Counters::default()
    }

    pub fn record_received(&mut self, bytes: u64) {
        self.reception.images += 1;
        self.reception.bytes += bytes;
    }

    pub fn record_filtered(&mut self) {
        self.filtered += 1;
    }

    pub fn record_processed(&mut self, elapsed_ms: f64) {
        let n = self.processing.count;
        self.processing.average_processing_ms =
            (self.processing.average_processing_ms * n as f64 + elapsed_ms) / (n + 1) as f64;
        self.processing.count += 1;
    }

    pub fn record_validation_error(&mut self) {
        self.processing.errors.validation += 1;
        self.errors_total += 1;
    }

    pub fn record_anonymization_error(&mut self) {
        self.processing.errors.anonymization += 1;
        self.errors_total += 1;
    }

    pub fn record_io_error(&mut self) {
        self.processing.errors.io += 1;
        self.errors_total += 1;
    }

    pub fn record_study_completed(&mut self) {
        self.completed_studies += 1;
    }

    pub fn record_archived(&mut self, image_count: u64) {
        self.archive.studies += 1;
        self.archive.images += image_count;
    }

    pub fn record_archive_error(&mut self) {
        self.archive.errors += 1;
        self.errors_total += 1;
    }

    pub fn record_uploaded(&mut self, image_count: u64, bytes: u64) {
        self.remote_storage.studies += 1;
        self.remote_storage.images += image_count;
        self.remote_storage.bytes += bytes;
    }

    pub fn record_upload_error(&mut self) {
        self.remote_storage.errors += 1;
        self.errors_total += 1;
    }

    /// An upload failure during completion, which counts against both the
    /// remote-storage and archive error tallies (`spec.md` §4.6 "Failure").
    pub fn record_completion_upload_failure(&mut self) {
        self.remote_storage.errors += 1;
        self.archive.errors += 1;
        self.errors_total += 1;
    }

    /// A quiescent study whose layout directory is unexpectedly missing
    /// (`spec.md` §4.6 step 2).
    pub fn record_missing_study_directory(&mut self) {
        self.errors_total += 1;
    }

    /// A read-only deep copy for reporting (`spec.md` §4.5 "GetCounters").
    pub fn snapshot(&self) -> Counters {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_processing_time_is_a_running_mean() {
        let mut counters = Counters::new();
        counters.record_processed(10.0);
        counters.record_processed(20.0);
        assert_eq!(counters.processing.count, 2);
        assert!((counters.processing.average_processing_ms - 15.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_is_independent_of_the_source() {
        let mut counters = Counters::new();
        counters.record_received(100);
        let snapshot = counters.snapshot();
        counters.record_received(50);
        assert_eq!(snapshot.reception.bytes, 100);
        assert_eq!(counters.reception.bytes, 150);
    }

    #[test]
    fn errors_total_aggregates_every_error_kind() {
        let mut counters = Counters::new();
        counters.record_validation_error();
        counters.record_anonymization_error();
        counters.record_archive_error();
        counters.record_upload_error();
        assert_eq!(counters.errors_total, 4);
    }
}
