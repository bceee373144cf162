//! Configuration loading and validation.
//!
//! Settings are loaded from a YAML file into this typed tree. Missing
//! sections fall back to sensible defaults so the service can start even from
//! a near-empty configuration file, matching the original settings loader's
//! "defaults everywhere" posture.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::profile::Profile;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("could not read configuration file {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("could not parse configuration: {source}"))]
    Parse { source: serde_yaml::Error },
    #[snafu(display("invalid configuration: {message}"))]
    Validation { message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn default_ae_title() -> String {
    "PIXIEVEIL".to_string()
}

fn default_port() -> u16 {
    11112
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_completion_timeout() -> u64 {
    120
}

fn default_completion_check_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DicomServerConfig {
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ae_title")]
    pub ae_title: String,
    /// Friendly SOP class names to advertise in addition to Verification.
    /// Empty means the default minimum set (CT/MR/Secondary Capture).
    #[serde(default)]
    pub sop_classes: Vec<String>,
}

impl Default for DicomServerConfig {
    fn default() -> Self {
        DicomServerConfig {
            ip: default_ip(),
            port: default_port(),
            ae_title: default_ae_title(),
            sop_classes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteStorageConfig {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub base_path: String,
    pub temp_path: String,
    #[serde(default)]
    pub remote_storage: RemoteStorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudyConfig {
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout: u64,
    #[serde(default = "default_completion_check_interval")]
    pub completion_check_interval: u64,
}

impl Default for StudyConfig {
    fn default() -> Self {
        StudyConfig {
            completion_timeout: default_completion_timeout(),
            completion_check_interval: default_completion_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SeriesFilterConfig {
    #[serde(default)]
    pub exclude_modalities: Vec<String>,
    #[serde(default)]
    pub keep_original_series: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnonymizationConfig {
    #[serde(default = "default_profile_name")]
    pub default: String,
}

fn default_profile_name() -> String {
    "DEFAULT".to_string()
}

impl Default for AnonymizationConfig {
    fn default() -> Self {
        AnonymizationConfig {
            default: default_profile_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HttpServerConfig {
    #[serde(default = "default_ip")]
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub dicom_server: DicomServerConfig,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub study: StudyConfig,
    #[serde(default)]
    pub series_filter: SeriesFilterConfig,
    #[serde(default)]
    pub anonymization: AnonymizationConfig,
    #[serde(default)]
    pub anonymization_profiles: HashMap<String, Profile>,
    #[serde(default)]
    pub http_server: Option<HttpServerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads settings from `path`, falling back to `config/settings.yaml`
    /// then `config/settings.yaml.example` when `path` is `None`, mirroring
    /// the original loader's fallback order.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let primary = PathBuf::from("config/settings.yaml");
                if primary.exists() {
                    primary
                } else {
                    PathBuf::from("config/settings.yaml.example")
                }
            }
        };

        let raw = fs::read_to_string(&resolved).context(IoSnafu {
            path: resolved.clone(),
        })?;
        let settings: Settings = serde_yaml::from_str(&raw).context(ParseSnafu)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let storage = self
            .storage
            .as_ref()
            .context(ValidationSnafu {
                message: "missing required `storage` section".to_string(),
            })?;
        if storage.base_path.trim().is_empty() {
            return ValidationSnafu {
                message: "storage.base_path must not be empty".to_string(),
            }
            .fail();
        }
        if storage.temp_path.trim().is_empty() {
            return ValidationSnafu {
                message: "storage.temp_path must not be empty".to_string(),
            }
            .fail();
        }
        if !self.anonymization_profiles.is_empty()
            && !self
                .anonymization_profiles
                .contains_key(&self.anonymization.default)
        {
            return ValidationSnafu {
                message: format!(
                    "anonymization.default profile '{}' is not present in anonymization_profiles",
                    self.anonymization.default
                ),
            }
            .fail();
        }
        Ok(())
    }

    pub fn storage(&self) -> &StorageConfig {
        self.storage
            .as_ref()
            .expect("Settings::validate guarantees storage is present")
    }

    /// Resolves the active anonymisation profile: the named profile from
    /// configuration, or the built-in default profile (`spec.md` §4.3) when no
    /// `anonymization_profiles` section is configured at all.
    pub fn active_profile(&self) -> Profile {
        self.anonymization_profiles
            .get(&self.anonymization.default)
            .cloned()
            .unwrap_or_else(Profile::default_profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_storage_section_fails_validation() {
        let settings = Settings::default();
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn empty_base_path_fails_validation() {
        let mut settings = Settings::default();
        settings.storage = Some(StorageConfig {
            base_path: "".to_string(),
            temp_path: "/tmp/pixieveil".to_string(),
            remote_storage: RemoteStorageConfig::default(),
        });
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn default_profile_resolves_even_without_config() {
        let settings = Settings::default();
        let profile = settings.active_profile();
        assert!(!profile.actions.is_empty());
    }
}
