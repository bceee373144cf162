//! Numbering Allocator (`spec.md` §4.4).
//!
//! Pure bookkeeping over in-memory maps; the caller (`storage::StorageManager`)
//! holds the single `storage_lock` for the duration of any call here, so this
//! module itself does no locking. Boot-time recovery and the "resume from
//! existing directory state" behaviour are grounded in
//! `examples/original_source/pixieveil/storage/storage_manager.py::__init__`
//! and `process_image`.

use std::collections::HashMap;
use std::path::Path;

/// Zero-padded width used for study/series/image numbers throughout the
/// layout (`spec.md` §3 "Layout on disk").
pub const NUMBER_WIDTH: usize = 4;

#[derive(Debug, Default)]
pub struct NumberingState {
    study_counter: u32,
    study_map: HashMap<String, u32>,
    series_map: HashMap<(u32, String), u32>,
    image_counters: HashMap<(u32, u32), u32>,
}

impl NumberingState {
    pub fn new() -> Self {
        NumberingState::default()
    }

    /// Scans `base_path` for directories matching `^\d{4}$` and seeds
    /// `study_counter` with the maximum observed number, or 0 if none exist
    /// (`spec.md` §4.4 "Boot behaviour").
    pub fn recover_from_disk(base_path: &Path) -> Self {
        let mut max_seen = 0u32;
        if let Ok(entries) = std::fs::read_dir(base_path) {
            for entry in entries.flatten() {
                if !entry.path().is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(n) = parse_four_digit(name) {
                        max_seen = max_seen.max(n);
                    }
                }
            }
        }
        NumberingState {
            study_counter: max_seen,
            study_map: HashMap::new(),
            series_map: HashMap::new(),
            image_counters: HashMap::new(),
        }
    }

    /// Assigns (or returns the existing) study number for `study_uid`
    /// (`spec.md` invariant I1: injective).
    pub fn allocate_study(&mut self, study_uid: &str) -> u32 {
        if let Some(n) = self.study_map.get(study_uid) {
            return *n;
        }
        self.study_counter += 1;
        let n = self.study_counter;
        self.study_map.insert(study_uid.to_string(), n);
        n
    }

    /// Assigns (or returns the existing) series number for
    /// `(study_number, series_uid)`, falling back to a directory scan under
    /// `<base>/NNNN` the first time this process sees a series that may
    /// already exist on disk from a prior run (`spec.md` §4.4).
    pub fn allocate_series(&mut self, base_path: &Path, study_number: u32, series_uid: &str) -> u32 {
        let key = (study_number, series_uid.to_string());
        if let Some(n) = self.series_map.get(&key) {
            return *n;
        }
        let study_dir = base_path.join(format_number(study_number));
        let next = max_existing_number(&study_dir) + 1;
        self.series_map.insert(key, next);
        next
    }

    /// Assigns the next image number for `(study_number, series_number)`,
    /// recovering the starting point from existing `*.dcm` files on disk the
    /// first time this process sees the series.
    pub fn allocate_image(
        &mut self,
        base_path: &Path,
        study_number: u32,
        series_number: u32,
    ) -> u32 {
        let key = (study_number, series_number);
        if let Some(n) = self.image_counters.get_mut(&key) {
            *n += 1;
            return *n;
        }
        let series_dir = base_path
            .join(format_number(study_number))
            .join(format_number(series_number));
        let next = max_existing_image_number(&series_dir) + 1;
        self.image_counters.insert(key, next);
        next
    }
}

pub fn format_number(n: u32) -> String {
    format!("{:0width$}", n, width = NUMBER_WIDTH)
}

fn parse_four_digit(name: &str) -> Option<u32> {
    if name.len() != NUMBER_WIDTH || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

fn max_existing_number(dir: &Path) -> u32 {
    let mut max_seen = 0u32;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(n) = parse_four_digit(name) {
                    max_seen = max_seen.max(n);
                }
            }
        }
    }
    max_seen
}

fn max_existing_image_number(dir: &Path) -> u32 {
    let mut max_seen = 0u32;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("dcm") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Some(n) = parse_four_digit(stem) {
                    max_seen = max_seen.max(n);
                }
            }
        }
    }
    max_seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn study_numbering_is_injective_and_stable() {
        let mut state = NumberingState::new();
        let s1 = state.allocate_study("1.1");
        let s2 = state.allocate_study("1.2");
        let s1_again = state.allocate_study("1.1");
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
        assert_eq!(s1, s1_again);
    }

    #[test]
    fn series_numbering_resumes_after_existing_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("0001").join("0007")).unwrap();
        let mut state = NumberingState::new();
        let n = state.allocate_series(dir.path(), 1, "new-series");
        assert_eq!(n, 8);
    }

    #[test]
    fn image_numbering_increments_from_one() {
        let dir = tempdir().unwrap();
        let mut state = NumberingState::new();
        let a = state.allocate_image(dir.path(), 1, 1);
        let b = state.allocate_image(dir.path(), 1, 1);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn boot_recovery_seeds_study_counter_from_disk() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("0007")).unwrap();
        let mut state = NumberingState::recover_from_disk(dir.path());
        let next = state.allocate_study("new-study");
        assert_eq!(next, 8);
    }
}
