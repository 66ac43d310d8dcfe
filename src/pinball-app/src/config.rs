// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "pinball.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

/// Returns the default search paths for `pinball.toml`
/// (current directory, then XDG config, then /etc).
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("pinball").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/pinball").join(CONFIG_FILE_NAME));
    paths
}

/// Extract and deserialize a named section from a TOML file.
///
/// `Ok(None)` when the section is absent.
fn load_section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    load_section_from_str(&content, key)
        .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
}

fn load_section_from_str<T: DeserializeOwned>(
    content: &str,
    key: &str,
) -> Result<Option<T>, String> {
    let table: toml::Table = toml::from_str(content).map_err(|e| e.to_string())?;

    let Some(section) = table.get(key) else {
        return Ok(None);
    };

    // Round-trip through text so serde defaults apply to the section.
    let section_toml = toml::to_string(section).map_err(|e| e.to_string())?;
    let cfg = toml::from_str::<T>(&section_toml).map_err(|e| e.to_string())?;
    Ok(Some(cfg))
}

/// Trait for loading configuration from a `pinball.toml` section.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section key in `pinball.toml` (e.g. `"pinball-server"`).
    fn section_key() -> &'static str;

    /// Load the section from a specific file path.
    ///
    /// Fails if the file cannot be read, is not valid TOML, or does not
    /// contain the `[<section_key>]` table.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_section_from_file::<Self>(path, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(
                path.to_path_buf(),
                format!("missing [{}] section", Self::section_key()),
            )
        })
    }

    /// Load the first file on the default search path that contains the
    /// section. `(Default::default(), None)` when there is none.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in config_search_paths() {
            if path.exists() {
                if let Some(cfg) = load_section_from_file::<Self>(&path, Self::section_key())? {
                    return Ok((cfg, Some(path)));
                }
            }
        }
        Ok((Self::default(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        port: u16,
    }

    impl ConfigFile for Sample {
        fn section_key() -> &'static str {
            "sample"
        }
    }

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_section() {
        let file = write_temp("[sample]\nname = \"cabinet\"\n\n[other]\nport = 9\n");
        let cfg = Sample::load_from_file(file.path()).unwrap();
        assert_eq!(
            cfg,
            Sample {
                name: "cabinet".to_string(),
                port: 0
            }
        );
    }

    #[test]
    fn test_missing_section_is_error() {
        let file = write_temp("[other]\nport = 9\n");
        let err = Sample::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_, msg) if msg.contains("[sample]")));
    }

    #[test]
    fn test_unreadable_file() {
        let err = Sample::load_from_file(Path::new("/nonexistent/pinball.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(..)));
    }

    #[test]
    fn test_invalid_toml() {
        let file = write_temp("[sample\nname = ");
        let err = Sample::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
    }

    #[test]
    fn test_search_paths_start_in_cwd() {
        let paths = config_search_paths();
        assert_eq!(paths[0], PathBuf::from("pinball.toml"));
        assert!(paths.last().unwrap().starts_with("/etc/pinball"));
    }
}
