//! The Anonymiser (`spec.md` §4.3).
//!
//! Applies a profile's per-tag actions to a parsed dataset, consults the
//! [`UidRegistry`] for `pseudo` actions, and then applies the rules that hold
//! regardless of profile (private-tag removal, overlay-group removal,
//! `BurnedInAnnotation`, the closed sensitive-tag set).
//!
//! `retain_study_date` suppresses the `Anonymous` action's date-zeroing for
//! `StudyDate`/`StudyTime` specifically, leaving the other `ANONYMOUS`
//! actions (including other date/time fields) untouched.
//!
//! Sequencing and the overall "mask -> delete private -> fix UIDs" shape is
//! grounded in `examples/BirendraRokaha-dcmrig/src/anon.rs`
//! (`anon_each_dcm_file`); the per-element put/remove idiom is grounded in
//! `examples/BirendraRokaha-dcmrig/src/lib.rs` (`mask_tags_with_id`,
//! `delete_private_tags`). UID consistency and the default profile's
//! content are grounded in `examples/original_source/pixieveil/processing/anonymizer.py`,
//! corrected per `SPEC_FULL.md` §4 to route pseudonymisation through the
//! registry instead of generating a fresh UID per call.

use chrono::Local;
use dicom_core::header::Tag;
use dicom_core::{dicom_value, DataElement, DataDictionary, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, StandardDataDictionary};
use dicom_object::InMemDicomObject;
use rand::Rng;
use snafu::Snafu;
use tracing::warn;

use crate::profile::{tags as profile_tags, Action, Profile};
use crate::uid_registry::{Scope, UidRegistry};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("could not resolve attribute name '{name}' to a DICOM tag"))]
    UnknownAttribute { name: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Overlay data groups occupy 0x6000, 0x6002, ... 0x601E (`spec.md` §4.3).
const OVERLAY_GROUP_START: u16 = 0x6000;
const OVERLAY_GROUP_END: u16 = 0x601E;

fn scope_for(attribute_name: &str) -> Scope {
    match attribute_name {
        profile_tags::STUDY_INSTANCE_UID => Scope::Study,
        profile_tags::SERIES_INSTANCE_UID => Scope::Series,
        profile_tags::SOP_INSTANCE_UID => Scope::Image,
        profile_tags::FRAME_OF_REFERENCE_UID => Scope::FrameOfReference,
        profile_tags::ACCESSION_NUMBER => Scope::Accession,
        _ => Scope::Image,
    }
}

fn resolve_tag(attribute_name: &str) -> Option<Tag> {
    StandardDataDictionary.parse_tag(attribute_name)
}

/// Applies `profile` to `obj` in place. Consistent with `spec.md` §4.3's
/// failure semantics, a returned `Err` means the whole image must be dropped
/// by the caller; it never leaves `obj` partially anonymised and used.
pub fn anonymize(
    obj: &mut InMemDicomObject,
    profile: &Profile,
    registry: &UidRegistry,
) -> Result<()> {
    if profile.pixel_blackout {
        warn!("PixelBlackout is configured but pixel-level redaction is not implemented (spec §9); ignoring");
    }

    for (name, action) in &profile.actions {
        apply_action(obj, name, *action, registry, profile)?;
    }

    apply_always_rules(obj, profile);

    Ok(())
}

fn apply_action(
    obj: &mut InMemDicomObject,
    attribute_name: &str,
    action: Action,
    registry: &UidRegistry,
    profile: &Profile,
) -> Result<()> {
    let Some(tag) = resolve_tag(attribute_name) else {
        return UnknownAttributeSnafu {
            name: attribute_name.to_string(),
        }
        .fail();
    };

    let Ok(element) = obj.element(tag) else {
        // Tag absent from this dataset: nothing to act on.
        return Ok(());
    };
    let vr = element.header().vr();

    match action {
        Action::Keep => {}
        Action::Random => {
            let original = element.to_str().map(|s| s.to_string()).unwrap_or_default();
            let replacement = random_token(original.len().max(4));
            obj.put(DataElement::new(tag, vr, dicom_value!(Strs, [replacement])));
        }
        Action::Pseudo => {
            let original = element
                .to_str()
                .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
                .unwrap_or_default();
            let scope = scope_for(attribute_name);
            let mut pseudo = registry.get(scope, &original);
            if attribute_name == profile_tags::ACCESSION_NUMBER {
                pseudo.truncate(16);
            }
            obj.put(DataElement::new(tag, vr, dicom_value!(Strs, [pseudo])));
        }
        Action::Anonymous => {
            let retained = profile.retain_study_date
                && matches!(
                    attribute_name,
                    profile_tags::STUDY_DATE | profile_tags::STUDY_TIME
                );
            if !retained {
                let value = anonymous_replacement(attribute_name, vr);
                obj.put(DataElement::new(tag, vr, value));
            }
        }
        Action::Unknown => {
            obj.put(DataElement::new(
                tag,
                vr,
                dicom_value!(Strs, ["UNKNOWN".to_string()]),
            ));
        }
    }

    Ok(())
}

/// `ANONYMOUS` is a literal-string replacement in the general case, but
/// writing the literal text "ANONYMOUS" into a date/time VR would produce an
/// invalid dataset, and the two description fields get fixed, recognisable
/// placeholders per `spec.md` §4.3's "Default profile" prose rather than the
/// generic literal.
fn anonymous_replacement(attribute_name: &str, vr: VR) -> PrimitiveValue {
    let now = Local::now();
    match vr {
        VR::DA => dicom_value!(Strs, [now.format("%Y%m%d").to_string()]),
        VR::TM => dicom_value!(Strs, [now.format("%H%M%S").to_string()]),
        VR::DT => dicom_value!(Strs, [now.format("%Y%m%d%H%M%S").to_string()]),
        _ => match attribute_name {
            profile_tags::STUDY_DESCRIPTION => dicom_value!(Strs, ["Anonymized Study".to_string()]),
            profile_tags::SERIES_DESCRIPTION => {
                dicom_value!(Strs, ["Anonymized Series".to_string()])
            }
            _ => dicom_value!(Strs, ["ANONYMOUS".to_string()]),
        },
    }
}

fn random_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..len.max(1))
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn apply_always_rules(obj: &mut InMemDicomObject, profile: &Profile) {
    if !profile.keep_private_tags {
        remove_private_tags(obj);
    }
    remove_overlay_groups(obj);

    obj.put(DataElement::new(
        tags::BURNED_IN_ANNOTATION,
        VR::CS,
        dicom_value!(Strs, ["NO".to_string()]),
    ));

    for tag in sensitive_tag_set() {
        obj.remove_element(tag);
    }
}

fn sensitive_tag_set() -> [Tag; 6] {
    [
        tags::OTHER_PATIENT_IDS_SEQUENCE,
        tags::PATIENT_TELEPHONE_NUMBERS,
        tags::MILITARY_RANK,
        tags::REQUEST_ATTRIBUTES_SEQUENCE,
        tags::CLINICAL_TRIAL_SPONSOR_NAME,
        tags::CLINICAL_TRIAL_PROTOCOL_ID,
    ]
}

/// Removes every private (odd group number) element, including nested inside
/// sequences, matching `examples/BirendraRokaha-dcmrig/src/lib.rs::delete_private_tags`.
fn remove_private_tags(obj: &mut InMemDicomObject) {
    fn is_private(tag: Tag) -> bool {
        tag.group() % 2 == 1
    }

    fn collect(obj: &InMemDicomObject, out: &mut Vec<Tag>) {
        for element in obj {
            let tag = element.tag();
            if is_private(tag) {
                out.push(tag);
                continue;
            }
            if element.vr() == VR::SQ {
                if let Some(items) = element.items() {
                    for item in items {
                        collect(item, out);
                    }
                }
            }
        }
    }

    let mut private_tags = Vec::new();
    collect(obj, &mut private_tags);
    for tag in private_tags {
        obj.remove_element(tag);
    }
}

fn remove_overlay_groups(obj: &mut InMemDicomObject) {
    let mut overlay_tags = Vec::new();
    for element in &*obj {
        let group = element.tag().group();
        if group >= OVERLAY_GROUP_START && group <= OVERLAY_GROUP_END && group % 2 == 0 {
            overlay_tags.push(element.tag());
        }
    }
    for tag in overlay_tags {
        obj.remove_element(tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::header::Tag;

    fn sample_object() -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            dicom_value!(Strs, ["1.2.3.4".to_string()]),
        ));
        obj.put(DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            dicom_value!(Strs, ["Doe^Jane".to_string()]),
        ));
        obj
    }

    #[test]
    fn pseudo_action_is_consistent_across_two_objects() {
        let registry = UidRegistry::new();
        let profile = Profile::default_profile();

        let mut a = sample_object();
        let mut b = sample_object();
        anonymize(&mut a, &profile, &registry).unwrap();
        anonymize(&mut b, &profile, &registry).unwrap();

        let ua = a
            .element(tags::STUDY_INSTANCE_UID)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let ub = b
            .element(tags::STUDY_INSTANCE_UID)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(ua, ub);
        assert_ne!(ua, "1.2.3.4");
    }

    #[test]
    fn anonymous_action_blanks_patient_name() {
        let registry = UidRegistry::new();
        let profile = Profile::default_profile();
        let mut obj = sample_object();
        anonymize(&mut obj, &profile, &registry).unwrap();
        let name = obj.element(tags::PATIENT_NAME).unwrap().to_str().unwrap();
        assert_eq!(name, "ANONYMOUS");
    }

    #[test]
    fn burned_in_annotation_is_always_no() {
        let registry = UidRegistry::new();
        let profile = Profile::default_profile();
        let mut obj = sample_object();
        anonymize(&mut obj, &profile, &registry).unwrap();
        let value = obj
            .element(tags::BURNED_IN_ANNOTATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(value, "NO");
    }

    #[test]
    fn private_tags_are_removed_unless_kept() {
        let registry = UidRegistry::new();
        let mut profile = Profile::default_profile();
        let mut obj = sample_object();
        obj.put(DataElement::new(
            Tag(0x0009, 0x0010),
            VR::LO,
            dicom_value!(Strs, ["secret".to_string()]),
        ));
        anonymize(&mut obj, &profile, &registry).unwrap();
        assert!(obj.element(Tag(0x0009, 0x0010)).is_err());

        profile.keep_private_tags = true;
        let mut obj2 = sample_object();
        obj2.put(DataElement::new(
            Tag(0x0009, 0x0010),
            VR::LO,
            dicom_value!(Strs, ["secret".to_string()]),
        ));
        anonymize(&mut obj2, &profile, &registry).unwrap();
        assert!(obj2.element(Tag(0x0009, 0x0010)).is_ok());
    }

    #[test]
    fn retain_study_date_keeps_the_original_study_date_and_time() {
        let registry = UidRegistry::new();
        let mut profile = Profile::default_profile();
        profile.retain_study_date = true;

        let mut obj = sample_object();
        obj.put(DataElement::new(
            tags::STUDY_DATE,
            VR::DA,
            dicom_value!(Strs, ["20200101".to_string()]),
        ));
        obj.put(DataElement::new(
            tags::STUDY_TIME,
            VR::TM,
            dicom_value!(Strs, ["120000".to_string()]),
        ));
        anonymize(&mut obj, &profile, &registry).unwrap();

        let date = obj.element(tags::STUDY_DATE).unwrap().to_str().unwrap();
        let time = obj.element(tags::STUDY_TIME).unwrap().to_str().unwrap();
        assert_eq!(date, "20200101");
        assert_eq!(time, "120000");
    }

    #[test]
    fn without_retain_study_date_the_study_date_is_blanked_to_today() {
        let registry = UidRegistry::new();
        let profile = Profile::default_profile();

        let mut obj = sample_object();
        obj.put(DataElement::new(
            tags::STUDY_DATE,
            VR::DA,
            dicom_value!(Strs, ["20200101".to_string()]),
        ));
        anonymize(&mut obj, &profile, &registry).unwrap();

        let date = obj.element(tags::STUDY_DATE).unwrap().to_str().unwrap();
        assert_ne!(date, "20200101");
    }
}
