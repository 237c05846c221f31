// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! AI Studio `chunkedPrompt` JSON exports.
//!
//! An export is a JSON object (possibly preceded by unrelated text) whose
//! `chunkedPrompt.chunks` array lists every turn:
//!
//! ```json
//! {
//!   "chunkedPrompt": {
//!     "chunks": [
//!       { "role": "user", "text": "Draw a cat" },
//!       { "role": "model", "text": "thinking...", "isThought": true },
//!       { "role": "model", "text": "Here you go" },
//!       { "role": "model", "inlineImage": { "mimeType": "image/png", "data": "iVBOR..." } }
//!     ]
//!   }
//! }
//! ```
//!
//! Thought entries are dropped. Turns are paired the same way as marker
//! text, so a model entry following another model entry becomes a
//! model-only chunk.

use crate::images::{ImageRef, ImageSource};
use crate::parser::{Chunk, ChunkBuilder, JsonSnafu, NoExchangesSnafu, ParseError, Role};
use serde::Deserialize;
use snafu::prelude::*;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudioExport {
    #[serde(default)]
    chunked_prompt: Option<ChunkedPrompt>,
}

#[derive(Debug, Deserialize)]
struct ChunkedPrompt {
    #[serde(default)]
    chunks: Vec<StudioChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudioChunk {
    #[serde(default)]
    role: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    parts: Vec<StudioPart>,
    #[serde(default)]
    is_thought: bool,
    #[serde(default)]
    inline_image: Option<InlineImage>,
}

#[derive(Debug, Deserialize)]
struct StudioPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineImage {
    mime_type: String,
    data: String,
}

impl StudioChunk {
    fn role(&self) -> Option<Role> {
        match self.role.as_str() {
            "user" => Some(Role::User),
            "model" => Some(Role::Model),
            _ => None,
        }
    }

    /// The entry's text, falling back to the concatenation of `parts`.
    fn text(&self) -> String {
        self.text.clone().unwrap_or_else(|| {
            self.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
    }
}

/// Parses an AI Studio export into chunks.
///
/// Everything before the first `{` in `text` is ignored.
///
/// # Errors
///
/// Returns [`ParseError::Json`] if the JSON is malformed and
/// [`ParseError::NoExchanges`] if it holds no usable user or model entry.
pub fn parse_studio(text: &str, base_dir: &Path) -> Result<Vec<Chunk>, ParseError> {
    let start = text.find('{').context(NoExchangesSnafu)?;
    let export: StudioExport = serde_json::from_str(&text[start..]).context(JsonSnafu)?;
    let entries = export
        .chunked_prompt
        .map(|prompt| prompt.chunks)
        .unwrap_or_default();

    let mut builder = ChunkBuilder::new(base_dir);
    let mut skipped_thoughts = 0usize;

    for entry in &entries {
        if entry.is_thought {
            skipped_thoughts += 1;
            continue;
        }
        let Some(role) = entry.role() else {
            log::debug!("skipping entry with role {:?}", entry.role);
            continue;
        };

        builder.open(role);
        let Some(message) = builder.fill(role, &entry.text()) else {
            continue;
        };
        if let Some(image) = &entry.inline_image {
            let label = format!("inline image {}", message.images.len() + 1);
            message.images.push(ImageRef::attached(
                label,
                ImageSource::Embedded {
                    mime_type: image.mime_type.clone(),
                    data: image.data.clone(),
                },
            ));
        }
    }

    if skipped_thoughts > 0 {
        log::debug!("skipped {skipped_thoughts} thought entries");
    }
    ensure!(!builder.is_empty(), NoExchangesSnafu);
    Ok(builder.finish())
}
