//! Series Filter (`spec.md` §4.2).
//!
//! A stateless predicate over a parsed dataset, consulted before
//! anonymisation. Grounded in
//! `examples/original_source/pixieveil/processing/series_filter.py`: a
//! modality exclude-list check, plus a `keep_original_series` stub that
//! (per `spec.md` §9 "Reconstructed-series detection is a stub") always
//! accepts. Any error while evaluating the predicate resolves to *accept*.

use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;

use crate::config::SeriesFilterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
}

pub struct SeriesFilter {
    exclude_modalities: Vec<String>,
    keep_original_series: bool,
}

impl SeriesFilter {
    pub fn new(config: &SeriesFilterConfig) -> Self {
        SeriesFilter {
            exclude_modalities: config
                .exclude_modalities
                .iter()
                .map(|m| m.to_uppercase())
                .collect(),
            keep_original_series: config.keep_original_series,
        }
    }

    /// Never panics; any failure reading the dataset resolves to `Accept`
    /// (`spec.md` §4.2 "Errors during evaluation must resolve to accept").
    pub fn should_filter(&self, obj: &InMemDicomObject) -> Verdict {
        let modality = match obj.element(tags::MODALITY).and_then(|e| e.to_str()) {
            Ok(m) => m.trim_end_matches(['\0', ' ']).to_uppercase(),
            Err(_) => return Verdict::Accept,
        };

        if self.exclude_modalities.iter().any(|m| m == &modality) {
            return Verdict::Drop;
        }

        if self.keep_original_series && !is_original_series(obj) {
            return Verdict::Drop;
        }

        Verdict::Accept
    }
}

/// Reconstructed/derived-series detection is a stub in the source
/// (`_is_original_series` always returns true); the predicate shape is kept
/// as a documented follow-up rather than implemented (`spec.md` §9).
fn is_original_series(_obj: &InMemDicomObject) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{dicom_value, DataElement, VR};

    fn object_with_modality(modality: &str) -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(
            tags::MODALITY,
            VR::CS,
            dicom_value!(Strs, [modality.to_string()]),
        ));
        obj
    }

    #[test]
    fn excluded_modality_is_dropped() {
        let filter = SeriesFilter::new(&SeriesFilterConfig {
            exclude_modalities: vec!["MR".to_string()],
            keep_original_series: false,
        });
        assert_eq!(filter.should_filter(&object_with_modality("MR")), Verdict::Drop);
    }

    #[test]
    fn non_excluded_modality_is_accepted() {
        let filter = SeriesFilter::new(&SeriesFilterConfig {
            exclude_modalities: vec!["MR".to_string()],
            keep_original_series: false,
        });
        assert_eq!(filter.should_filter(&object_with_modality("CT")), Verdict::Accept);
    }

    #[test]
    fn empty_exclude_list_never_drops() {
        let filter = SeriesFilter::new(&SeriesFilterConfig::default());
        assert_eq!(filter.should_filter(&object_with_modality("MR")), Verdict::Accept);
    }

    #[test]
    fn missing_modality_resolves_to_accept() {
        let filter = SeriesFilter::new(&SeriesFilterConfig {
            exclude_modalities: vec!["MR".to_string()],
            keep_original_series: false,
        });
        let obj = InMemDicomObject::new_empty();
        assert_eq!(filter.should_filter(&obj), Verdict::Accept);
    }
}
