// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Archive configuration and per-file recovery metadata.
//!
//! The configuration is a plain value handed to the assembler. It can be
//! loaded from a JSON document with camelCase keys; every key is optional.
//!
//! ```
//! use chat2pdf::config::ArchiveConfig;
//!
//! let config = ArchiveConfig::from_json(r#"{ "platform": "AI Studio", "customUserHeading": "Me" }"#).unwrap();
//! assert_eq!(config.user_heading(), "Me");
//! assert_eq!(config.model_heading(), "Model Response");
//! ```

use chrono::{DateTime, Local};
use serde::Deserialize;
use snafu::prelude::*;
use std::path::{Path, PathBuf};

/// Heading used for user turns when none is configured.
pub const DEFAULT_USER_HEADING: &str = "User Message";

/// Heading used for model turns when none is configured.
pub const DEFAULT_MODEL_HEADING: &str = "Model Response";

/// Error type for configuration loading.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[snafu(display("failed to read config {}: {source}", path.display()))]
    Read {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for this schema.
    #[snafu(display("failed to parse config: {source}"))]
    Json {
        /// The underlying JSON error.
        source: serde_json::Error,
    },
}

/// How selected chunks are split into render units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grouping {
    /// One unit, and so at least one page, per chunk.
    #[default]
    PerChunk,
    /// One unit per file.
    PerFile,
}

/// Options consumed by the document assembler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchiveConfig {
    /// Chat platform the conversation came from.
    pub platform: String,
    /// Account the conversation belongs to.
    pub account: String,
    /// Link back to the original conversation.
    pub chat_link: String,
    /// Replacement for the "User Message" heading.
    pub custom_user_heading: String,
    /// Replacement for the "Model Response" heading.
    pub custom_model_heading: String,
    /// Free-form notes for the metadata page.
    pub extra_notes: String,
    /// Whether section headings are printed at all.
    pub show_headings: bool,
    /// How chunks are split into render units.
    pub grouping: Grouping,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            platform: String::new(),
            account: String::new(),
            chat_link: String::new(),
            custom_user_heading: String::new(),
            custom_model_heading: String::new(),
            extra_notes: String::new(),
            show_headings: true,
            grouping: Grouping::PerChunk,
        }
    }
}

impl ArchiveConfig {
    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is unreadable or invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        Self::from_json(&json)
    }

    /// Parses a configuration document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed input.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).context(JsonSnafu)
    }

    /// The heading printed above user turns.
    #[must_use]
    pub fn user_heading(&self) -> &str {
        non_empty(&self.custom_user_heading).unwrap_or(DEFAULT_USER_HEADING)
    }

    /// The heading printed above model turns.
    #[must_use]
    pub fn model_heading(&self) -> &str {
        non_empty(&self.custom_model_heading).unwrap_or(DEFAULT_MODEL_HEADING)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Provenance attributes shown on a page before a file's content.
///
/// Built once per file and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryMetadata {
    entries: Vec<(String, String)>,
}

impl RecoveryMetadata {
    /// Collects the metadata for one source file. Empty values are omitted.
    #[must_use]
    pub fn new(config: &ArchiveConfig, source: &Path, archived_at: DateTime<Local>) -> Self {
        let source_name = source.file_name().map_or_else(
            || source.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        let archived = archived_at.format("%Y-%m-%d %H:%M").to_string();

        let entries = [
            ("Source file", source_name.as_str()),
            ("Platform", config.platform.as_str()),
            ("Account", config.account.as_str()),
            ("Chat link", config.chat_link.as_str()),
            ("Notes", config.extra_notes.as_str()),
            ("Archived", archived.as_str()),
        ]
        .into_iter()
        .filter_map(|(key, value)| Some((key.to_owned(), non_empty(value)?.to_owned())))
        .collect();

        Self { entries }
    }

    /// The key/value pairs in display order.
    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Looks up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn archived_at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap()
    }

    #[test]
    fn missing_keys_default() {
        let config = ArchiveConfig::from_json("{}").unwrap();

        assert_eq!(config, ArchiveConfig::default());
        assert!(config.show_headings);
        assert_eq!(config.grouping, Grouping::PerChunk);
        assert_eq!(config.user_heading(), DEFAULT_USER_HEADING);
        assert_eq!(config.model_heading(), DEFAULT_MODEL_HEADING);
    }

    #[test]
    fn reads_all_recognised_keys() {
        let config = ArchiveConfig::from_json(
            r#"{
                "platform": "ChatGPT",
                "account": "me@example.com",
                "chatLink": "https://chat.example/c/1",
                "customUserHeading": "Question",
                "customModelHeading": "Answer",
                "extraNotes": "recovered from backup",
                "showHeadings": false,
                "grouping": "per-file"
            }"#,
        )
        .unwrap();

        assert_eq!(config.platform, "ChatGPT");
        assert_eq!(config.chat_link, "https://chat.example/c/1");
        assert_eq!(config.user_heading(), "Question");
        assert_eq!(config.model_heading(), "Answer");
        assert!(!config.show_headings);
        assert_eq!(config.grouping, Grouping::PerFile);
    }

    #[test]
    fn blank_custom_heading_falls_back() {
        let config = ArchiveConfig {
            custom_model_heading: "   ".into(),
            ..Default::default()
        };
        assert_eq!(config.model_heading(), DEFAULT_MODEL_HEADING);
    }

    #[test]
    fn rejects_malformed_config() {
        assert!(matches!(
            ArchiveConfig::from_json(r#"{"platform": 3}"#),
            Err(ConfigError::Json { .. })
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        assert!(matches!(
            ArchiveConfig::load(Path::new("/no/such/config.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn metadata_omits_empty_values() {
        let config = ArchiveConfig {
            platform: "AI Studio".into(),
            extra_notes: "  ".into(),
            ..Default::default()
        };
        let metadata = RecoveryMetadata::new(&config, Path::new("/chats/today.txt"), archived_at());

        let keys: Vec<_> = metadata.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["Source file", "Platform", "Archived"]);
        assert_eq!(metadata.get("Source file"), Some("today.txt"));
        assert_eq!(metadata.get("Archived"), Some("2025-03-04 05:06"));
        assert_eq!(metadata.get("Notes"), None);
    }
}
