//! UID Registry (`spec.md` §3 "UID Registry", §4.3 "UID category inference").
//!
//! Maps `(scope, original_uid) -> generated pseudo-uid`, consistently, for the
//! lifetime of the process. The original Python anonymiser
//! (`processing/anonymizer.py`) calls `pydicom.uid.generate_uid()` fresh on
//! every tag, so the same `StudyInstanceUID` gets a different replacement on
//! every image — this registry is what `spec.md` invariants I2/I3 and
//! property P3 require instead: one lookup, one answer, forever (within this
//! process run).

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

/// Distinguishes UID roles so that two UIDs with identical text but different
/// roles (e.g. a StudyInstanceUID and a SeriesInstanceUID that happen to
/// share a value in synthetic test data) still map to distinct pseudo-UIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Study,
    Series,
    Image,
    FrameOfReference,
    Accession,
}

/// The registry's chosen pseudo-UID prefix, matching the original
/// implementation's `generate_uid(prefix="2.25.")`.
const PSEUDO_UID_PREFIX: &str = "2.25.";

#[derive(Default)]
pub struct UidRegistry {
    inner: Mutex<HashMap<(Scope, String), String>>,
}

impl UidRegistry {
    pub fn new() -> Self {
        UidRegistry {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pseudo-UID for `(scope, original)`, generating and caching
    /// one on first sight.
    pub fn get(&self, scope: Scope, original: &str) -> String {
        let mut map = self.inner.lock().expect("uid registry mutex poisoned");
        map.entry((scope, original.to_string()))
            .or_insert_with(generate_pseudo_uid)
            .clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

fn generate_pseudo_uid() -> String {
    // A UUID's integer value rendered as a dotted decimal run keeps the
    // result a syntactically valid DICOM UID (digits and dots only, <= 64
    // chars) without pulling in a DICOM-specific UID generator.
    let uuid = Uuid::new_v4();
    format!("{PSEUDO_UID_PREFIX}{}", uuid.as_u128())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_original_value_same_scope_is_consistent() {
        let registry = UidRegistry::new();
        let a = registry.get(Scope::Study, "1.2.3.4");
        let b = registry.get(Scope::Study, "1.2.3.4");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_originals_get_distinct_pseudo_uids() {
        let registry = UidRegistry::new();
        let a = registry.get(Scope::Study, "1.2.3.4");
        let b = registry.get(Scope::Study, "1.2.3.5");
        assert_ne!(a, b);
    }

    #[test]
    fn same_text_different_scope_is_kept_distinct() {
        let registry = UidRegistry::new();
        let study = registry.get(Scope::Study, "1.2.3.4");
        let series = registry.get(Scope::Series, "1.2.3.4");
        assert_ne!(study, series);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn pseudo_uid_has_expected_prefix() {
        let registry = UidRegistry::new();
        let uid = registry.get(Scope::Image, "1.2.3.4");
        assert!(uid.starts_with(PSEUDO_UID_PREFIX));
    }
}
