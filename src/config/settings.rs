use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use crate::net::SessionOptions;

// -----------------------------------------------------------------------------
// ----- Settings --------------------------------------------------------------

/// Contents of the optional settings file. Every key has a default, so an
/// empty file and no file at all mean the same thing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub session: SessionOptions,
}

// -----------------------------------------------------------------------------
// ----- Settings: Static ------------------------------------------------------

impl Settings {
    pub async fn load(path: Option<&Path>) -> Result<Settings, SettingsError> {
        match path {
            Some(path) => Self::from_file_async(path).await,
            None => Ok(Settings::default()),
        }
    }

    pub fn parse(raw: &str) -> Result<Settings, SettingsError> {
        toml::from_str(raw).map_err(|e| SettingsError::Toml { source: e })
    }
}

// -----------------------------------------------------------------------------
// ----- Settings: Private -----------------------------------------------------

impl Settings {
    async fn from_file_async(path: &Path) -> Result<Settings, SettingsError> {
        let raw = fs::read_to_string(path).await.map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("read error for {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::FramingKind;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn session_section_overrides_defaults() {
        let toml = r#"
            [session]
            backlog = 16
            scratch_size = 4096
            framing = "length-prefixed"
            response_timeout = "2s"
            nodelay = false
        "#;

        let tmp = write_tmp(toml);
        let settings = Settings::load(Some(tmp.path())).await.unwrap();

        assert_eq!(settings.session.backlog, 16);
        assert_eq!(settings.session.scratch_size, 4096);
        assert_eq!(settings.session.framing, FramingKind::LengthPrefixed);
        assert_eq!(settings.session.response_timeout, Duration::from_secs(2));
        assert!(!settings.session.nodelay);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = Settings::load(Some(path.as_path())).await.unwrap_err();
        match err {
            SettingsError::Io { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_file_and_empty_file_both_give_defaults() {
        let none = Settings::load(None).await.unwrap();
        let tmp = write_tmp("");
        let empty = Settings::load(Some(tmp.path())).await.unwrap();

        assert_eq!(none, Settings::default());
        assert_eq!(empty, Settings::default());
    }

    #[test]
    fn unknown_section_is_rejected() {
        let err = Settings::parse("[sessions]\nbacklog = 1").unwrap_err();
        assert!(matches!(err, SettingsError::Toml { .. }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
