//! Anonymisation profile types (`spec.md` §3 "Profile", §4.3 "Action semantics").

use std::collections::HashMap;

use serde::Deserialize;

/// The closed set of per-tag anonymisation actions a profile may specify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Keep,
    Random,
    Pseudo,
    #[serde(rename = "ANONYMOUS")]
    Anonymous,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// A named set of per-tag actions plus the three global switches
/// (`spec.md` §3/§4.3).
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(flatten)]
    pub actions: HashMap<String, Action>,
    #[serde(default, rename = "PixelBlackout")]
    pub pixel_blackout: bool,
    #[serde(default, rename = "KeepPrivateTags")]
    pub keep_private_tags: bool,
    #[serde(default, rename = "RetainStudyDate")]
    pub retain_study_date: bool,
}

/// Standard DICOM attribute names this module reasons about by name; the
/// anonymiser maps these to tags via `dicom-dictionary-std`.
pub mod tags {
    pub const PATIENT_NAME: &str = "PatientName";
    pub const PATIENT_ID: &str = "PatientID";
    pub const PATIENT_BIRTH_DATE: &str = "PatientBirthDate";
    pub const PATIENT_SEX: &str = "PatientSex";
    pub const PATIENT_ADDRESS: &str = "PatientAddress";
    pub const OTHER_PATIENT_NAMES: &str = "OtherPatientNames";
    pub const INSTITUTION_NAME: &str = "InstitutionName";
    pub const REFERRING_PHYSICIAN_NAME: &str = "ReferringPhysicianName";
    pub const PERFORMING_PHYSICIAN_NAME: &str = "PerformingPhysicianName";
    pub const OPERATORS_NAME: &str = "OperatorsName";
    pub const STUDY_INSTANCE_UID: &str = "StudyInstanceUID";
    pub const SERIES_INSTANCE_UID: &str = "SeriesInstanceUID";
    pub const SOP_INSTANCE_UID: &str = "SOPInstanceUID";
    pub const FRAME_OF_REFERENCE_UID: &str = "FrameOfReferenceUID";
    pub const ACCESSION_NUMBER: &str = "AccessionNumber";
    pub const STUDY_DESCRIPTION: &str = "StudyDescription";
    pub const SERIES_DESCRIPTION: &str = "SeriesDescription";
    pub const STUDY_DATE: &str = "StudyDate";
    pub const STUDY_TIME: &str = "StudyTime";
    pub const SERIES_DATE: &str = "SeriesDate";
    pub const SERIES_TIME: &str = "SeriesTime";
    pub const ACQUISITION_DATE: &str = "AcquisitionDate";
    pub const ACQUISITION_TIME: &str = "AcquisitionTime";
    pub const CONTENT_DATE: &str = "ContentDate";
    pub const CONTENT_TIME: &str = "ContentTime";
    pub const INSTANCE_CREATION_DATE: &str = "InstanceCreationDate";
    pub const INSTANCE_CREATION_TIME: &str = "InstanceCreationTime";
}

impl Profile {
    /// The built-in default profile used when `anonymization_profiles` is
    /// absent from configuration (`spec.md` §4.3 "Default profile").
    pub fn default_profile() -> Profile {
        use tags::*;
        use Action::*;

        let mut actions = HashMap::new();
        for name in [
            PATIENT_NAME,
            PATIENT_ID,
            PATIENT_BIRTH_DATE,
            PATIENT_SEX,
            PATIENT_ADDRESS,
            OTHER_PATIENT_NAMES,
            INSTITUTION_NAME,
            REFERRING_PHYSICIAN_NAME,
            PERFORMING_PHYSICIAN_NAME,
            OPERATORS_NAME,
            STUDY_DESCRIPTION,
            SERIES_DESCRIPTION,
            STUDY_DATE,
            STUDY_TIME,
            SERIES_DATE,
            SERIES_TIME,
            ACQUISITION_DATE,
            ACQUISITION_TIME,
            CONTENT_DATE,
            CONTENT_TIME,
            INSTANCE_CREATION_DATE,
            INSTANCE_CREATION_TIME,
        ] {
            actions.insert(name.to_string(), Anonymous);
        }
        for name in [
            STUDY_INSTANCE_UID,
            SERIES_INSTANCE_UID,
            SOP_INSTANCE_UID,
            FRAME_OF_REFERENCE_UID,
            ACCESSION_NUMBER,
        ] {
            actions.insert(name.to_string(), Pseudo);
        }

        Profile {
            actions,
            pixel_blackout: false,
            keep_private_tags: false,
            retain_study_date: false,
        }
    }

    pub fn action_for(&self, attribute_name: &str) -> Action {
        self.actions
            .get(attribute_name)
            .copied()
            .unwrap_or(Action::Keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_pseudonymises_uids() {
        let profile = Profile::default_profile();
        assert_eq!(profile.action_for(tags::STUDY_INSTANCE_UID), Action::Pseudo);
        assert_eq!(profile.action_for(tags::ACCESSION_NUMBER), Action::Pseudo);
    }

    #[test]
    fn unlisted_tag_defaults_to_keep() {
        let profile = Profile::default_profile();
        assert_eq!(profile.action_for("Rows"), Action::Keep);
    }

    #[test]
    fn profile_deserializes_from_yaml() {
        let yaml = r#"
PatientName: ANONYMOUS
StudyInstanceUID: pseudo
PixelBlackout: true
KeepPrivateTags: false
"#;
        let profile: Profile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.action_for("PatientName"), Action::Anonymous);
        assert_eq!(profile.action_for("StudyInstanceUID"), Action::Pseudo);
        assert!(profile.pixel_blackout);
    }
}
