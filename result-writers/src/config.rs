// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration shared by result writers.

use crate::errors::ConfigParseError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

/// The name of the directory attachments are written to, relative to the system temp directory,
/// when no directory is configured.
pub const DEFAULT_ATTACHMENTS_DIR_NAME: &str = "xunit-attachments";

/// Resolved configuration for result writers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResultWriterConfig {
    attachments_dir: Utf8PathBuf,
    tool_version: String,
}

impl ResultWriterConfig {
    /// Creates a new configuration with the given attachments directory and the default tool
    /// version.
    pub fn new(attachments_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            attachments_dir: attachments_dir.into(),
            tool_version: default_tool_version(),
        }
    }

    /// Parses configuration from a TOML string, filling in defaults for missing keys.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigParseError> {
        let deserialized: DeserializedResultWriterConfig = toml::from_str(input)
            .map_err(|error| ConfigParseError::Deserialize { path: None, error })?;
        Ok(deserialized.resolve())
    }

    /// Reads configuration from a TOML file, filling in defaults for missing keys.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ConfigParseError> {
        let input = std::fs::read_to_string(path).map_err(|error| ConfigParseError::Read {
            path: path.to_owned(),
            error,
        })?;
        let deserialized: DeserializedResultWriterConfig =
            toml::from_str(&input).map_err(|error| ConfigParseError::Deserialize {
                path: Some(path.to_owned()),
                error,
            })?;
        Ok(deserialized.resolve())
    }

    /// Sets the version reported for the tool that produced the results.
    pub fn set_tool_version(&mut self, tool_version: impl Into<String>) -> &mut Self {
        self.tool_version = tool_version.into();
        self
    }

    /// The directory attachments are materialized into. Each test gets its own subdirectory.
    pub fn attachments_dir(&self) -> &Utf8Path {
        &self.attachments_dir
    }

    /// The version reported for the tool that produced the results.
    pub fn tool_version(&self) -> &str {
        &self.tool_version
    }
}

impl Default for ResultWriterConfig {
    fn default() -> Self {
        Self::new(default_attachments_dir())
    }
}

/// Deserialized form of [`ResultWriterConfig`].
///
/// All fields are optional; unspecified fields use defaults.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct DeserializedResultWriterConfig {
    #[serde(default)]
    attachments_dir: Option<Utf8PathBuf>,

    #[serde(default)]
    tool_version: Option<String>,
}

impl DeserializedResultWriterConfig {
    fn resolve(self) -> ResultWriterConfig {
        ResultWriterConfig {
            attachments_dir: self
                .attachments_dir
                .unwrap_or_else(default_attachments_dir),
            tool_version: self.tool_version.unwrap_or_else(default_tool_version),
        }
    }
}

fn default_attachments_dir() -> Utf8PathBuf {
    // The system temp directory is almost always valid UTF-8; fall back to a relative directory if
    // it isn't.
    let temp_dir = Utf8PathBuf::try_from(std::env::temp_dir()).unwrap_or_else(|_| ".".into());
    temp_dir.join(DEFAULT_ATTACHMENTS_DIR_NAME)
}

fn default_tool_version() -> String {
    env!("CARGO_PKG_VERSION").to_owned()
}
