// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Supplementary image mappings.
//!
//! Some exports lose the images a model produced. A mapping file restores
//! them by pairing a snippet of the model's text with the screenshots that
//! belong to it:
//!
//! ```json
//! [
//!   { "text_snippet": "Here is the diagram", "image_paths": ["shots/diagram.png"] }
//! ]
//! ```
//!
//! Every model turn whose text contains a snippet gets that snippet's
//! images attached. Whitespace differences are ignored when matching.
//! Relative image paths resolve against the mapping file's directory; if
//! nothing exists there but the path exists relative to the working
//! directory, that path is used instead.

use crate::images::{ImageRef, ImageSource};
use crate::parser::{Chunk, Role};
use serde::Deserialize;
use snafu::prelude::*;
use std::path::{Path, PathBuf};

/// Error type for mapping file failures.
#[derive(Debug, Snafu)]
pub enum MappingError {
    /// The mapping file could not be read.
    #[snafu(display("failed to read mapping {}: {source}", path.display()))]
    Read {
        /// The mapping file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The mapping file is not a valid mapping document.
    #[snafu(display("failed to parse mapping: {source}"))]
    Json {
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// An entry has no snippet or no images.
    #[snafu(display("mapping entry {index} needs a text snippet and at least one image"))]
    EmptyEntry {
        /// Zero-based position of the entry.
        index: usize,
    },
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    text_snippet: String,
    image_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    snippet: String,
    images: Vec<PathBuf>,
}

/// A loaded set of snippet → image associations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageMapping {
    entries: Vec<Entry>,
}

impl ImageMapping {
    /// Loads a mapping file from disk.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] if the file is unreadable or invalid.
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let json = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_json(&json, base_dir)
    }

    /// Parses a mapping document, resolving image paths against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Json`] for malformed JSON and
    /// [`MappingError::EmptyEntry`] for entries without a snippet or images.
    pub fn from_json(json: &str, base_dir: &Path) -> Result<Self, MappingError> {
        let raw: Vec<RawEntry> = serde_json::from_str(json).context(JsonSnafu)?;

        let entries = raw
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let snippet = normalize(&entry.text_snippet);
                ensure!(
                    !snippet.is_empty() && !entry.image_paths.is_empty(),
                    EmptyEntrySnafu { index }
                );
                Ok(Entry {
                    snippet,
                    images: entry
                        .image_paths
                        .iter()
                        .map(|p| resolve_image_path(p, base_dir))
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, MappingError>>()?;

        Ok(Self { entries })
    }

    /// Merges another mapping's entries after this one's.
    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attaches mapped images to every matching model turn.
    ///
    /// Returns the number of images attached.
    pub fn apply(&self, chunks: &mut [Chunk]) -> usize {
        let mut attached = 0;
        for chunk in chunks {
            let Some(model) = chunk.part_mut(Role::Model) else {
                continue;
            };
            let text = normalize(&model.text);
            for entry in self.entries.iter().filter(|e| text.contains(&e.snippet)) {
                for path in &entry.images {
                    model.images.push(ImageRef::attached(
                        path.display().to_string(),
                        ImageSource::Local(path.clone()),
                    ));
                    attached += 1;
                }
            }
        }
        attached
    }
}

/// Collapses runs of whitespace to single spaces and trims the ends.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve_image_path(path: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let beside_mapping = base_dir.join(path);
    if !beside_mapping.exists() && path.exists() {
        path.to_path_buf()
    } else {
        beside_mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::Placement;
    use crate::parser::parse_text;

    fn chunks() -> Vec<Chunk> {
        parse_text(
            "[USER]\ndraw it\n[MODEL]\nHere   is the\ndiagram you asked for.\n[USER]\nthanks\n[MODEL]\nanytime",
            Path::new("/chats"),
        )
        .unwrap()
    }

    #[test]
    fn attaches_images_to_matching_model_turn() {
        let mapping = ImageMapping::from_json(
            r#"[{"text_snippet": "Here is the diagram", "image_paths": ["a.png", "b.png"]}]"#,
            Path::new("/maps"),
        )
        .unwrap();
        let mut chunks = chunks();

        assert_eq!(mapping.apply(&mut chunks), 2);

        let images = &chunks[0].part(Role::Model).unwrap().images;
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].source, ImageSource::Local("/maps/a.png".into()));
        assert_eq!(images[1].placement, Placement::Attached);
        assert!(chunks[1].part(Role::Model).unwrap().images.is_empty());
    }

    #[test]
    fn never_attaches_to_user_turns() {
        let mapping = ImageMapping::from_json(
            r#"[{"text_snippet": "draw it", "image_paths": ["a.png"]}]"#,
            Path::new("/maps"),
        )
        .unwrap();
        let mut chunks = chunks();

        assert_eq!(mapping.apply(&mut chunks), 0);
        assert!(chunks[0].part(Role::User).unwrap().images.is_empty());
    }

    #[test]
    fn keeps_absolute_paths() {
        let mapping = ImageMapping::from_json(
            r#"[{"text_snippet": "anytime", "image_paths": ["/shots/x.png"]}]"#,
            Path::new("/maps"),
        )
        .unwrap();
        let mut chunks = chunks();
        mapping.apply(&mut chunks);

        assert_eq!(
            chunks[1].part(Role::Model).unwrap().images[0].source,
            ImageSource::Local("/shots/x.png".into())
        );
    }

    #[test]
    fn rejects_empty_entries() {
        let err = ImageMapping::from_json(
            r#"[{"text_snippet": "ok", "image_paths": ["a.png"]},
                {"text_snippet": "   ", "image_paths": ["b.png"]}]"#,
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::EmptyEntry { index: 1 }));

        let err = ImageMapping::from_json(
            r#"[{"text_snippet": "ok", "image_paths": []}]"#,
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::EmptyEntry { index: 0 }));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            ImageMapping::from_json("{}", Path::new(".")),
            Err(MappingError::Json { .. })
        ));
    }

    #[test]
    fn loads_from_file_relative_to_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(
            &path,
            r#"[{"text_snippet": "anytime", "image_paths": ["pic.png"]}]"#,
        )
        .unwrap();

        let mapping = ImageMapping::load(&path).unwrap();
        let mut chunks = chunks();
        mapping.apply(&mut chunks);

        assert_eq!(mapping.len(), 1);
        assert_eq!(
            chunks[1].part(Role::Model).unwrap().images[0].source,
            ImageSource::Local(dir.path().join("pic.png"))
        );
    }
}
