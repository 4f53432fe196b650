use crate::filter::{FilterError, PatternFilter};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PREFERENCES_FILE_NAME: &str = "preferences.toml";

#[derive(Debug, thiserror::Error)]
pub enum PreferencesError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Unsupported preferences version: {0}")]
    UnsupportedVersion(u32),
}

impl PreferencesError {
    fn at(path: &Path) -> impl FnOnce(std::io::Error) -> PreferencesError + '_ {
        move |e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                PreferencesError::PermissionDenied(path.to_path_buf())
            } else {
                PreferencesError::Io(e)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Metadata {
    version: u32,
}

/// Only the metadata section; everything else is ignored so the version can
/// be checked before the rest of the file is interpreted.
#[derive(Debug, Deserialize)]
struct MetadataOnly {
    metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterPreferences {
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,
}

impl Default for FilterPreferences {
    fn default() -> Self {
        FilterPreferences {
            includes: Vec::new(),
            excludes: default_excludes(),
        }
    }
}

fn default_excludes() -> Vec<String> {
    vec!["Thumbs.db".to_string()]
}

/// Per-directory settings, stored next to the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preferences {
    metadata: Metadata,
    #[serde(default)]
    pub filter: FilterPreferences,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            metadata: Metadata {
                version: Self::SUPPORTED_VERSION,
            },
            filter: FilterPreferences::default(),
        }
    }
}

impl Preferences {
    const SUPPORTED_VERSION: u32 = 1;

    pub fn path_in(meta_dir: &Path) -> PathBuf {
        meta_dir.join(PREFERENCES_FILE_NAME)
    }

    pub fn from_toml(content: &str) -> Result<Self, PreferencesError> {
        let metadata_only: MetadataOnly = toml::from_str(content)?;
        if metadata_only.metadata.version != Self::SUPPORTED_VERSION {
            return Err(PreferencesError::UnsupportedVersion(
                metadata_only.metadata.version,
            ));
        }
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, PreferencesError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, PreferencesError> {
        let content = std::fs::read_to_string(path).map_err(PreferencesError::at(path))?;
        Self::from_toml(&content)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, PreferencesError> {
        if !path.exists() {
            debug!("No preferences at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Writes to a temporary file, fsyncs it, then renames it into place.
    pub fn save(&self, path: &Path) -> Result<(), PreferencesError> {
        use std::io::Write;

        let content = self.to_toml()?;
        let parent = path.parent().unwrap_or(Path::new("."));

        let mut temp_file =
            tempfile::NamedTempFile::new_in(parent).map_err(PreferencesError::at(parent))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(PreferencesError::at(path))?;
        temp_file.as_file().sync_all().map_err(PreferencesError::Io)?;
        temp_file
            .persist(path)
            .map_err(|e| PreferencesError::at(path)(e.error))?;
        Ok(())
    }

    pub fn file_filter(&self) -> Result<PatternFilter, FilterError> {
        PatternFilter::new(&self.filter.includes, &self.filter.excludes)
    }
}
