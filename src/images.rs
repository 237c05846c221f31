// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Image references found in, or attached to, conversation turns.
//!
//! # Resolution policy
//!
//! - `http:`, `https:` and `data:` sources are left untouched.
//! - `file://` URIs and absolute paths are used as-is, even when they
//!   point outside the conversation's directory.
//! - Anything else is a path relative to the conversation file's
//!   directory.
//!
//! Local files are inlined as base64 `data:` URIs when the document is
//! assembled, so the external renderer never needs file access. A local
//! file that cannot be read at that point yields `None` from
//! [`ImageSource::to_uri`] and the caller substitutes a placeholder.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// `![alt](src "title")`, capturing `src`.
static MARKDOWN_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+["'][^"']*["'])?\s*\)"#)
        .expect("markdown image pattern is valid")
});

/// `<img ... src="...">`, capturing the `src` value.
pub(crate) static HTML_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["'][^>]*>"#)
        .expect("html image pattern is valid")
});

/// Where an image's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A URL the renderer fetches itself (`http(s):` or `data:`).
    Remote(String),
    /// A file on the local filesystem.
    Local(PathBuf),
    /// Base64 data carried inside the export.
    Embedded {
        /// MIME type, e.g. `image/png`.
        mime_type: String,
        /// Base64-encoded image bytes.
        data: String,
    },
}

impl ImageSource {
    /// Returns a URI the renderer can load, or `None` if a local file is
    /// missing or unreadable.
    #[must_use]
    pub fn to_uri(&self) -> Option<String> {
        match self {
            Self::Remote(url) => Some(url.clone()),
            Self::Embedded { mime_type, data } => Some(format!("data:{mime_type};base64,{data}")),
            Self::Local(path) => match std::fs::read(path) {
                Ok(bytes) => Some(format!(
                    "data:{};base64,{}",
                    mime_type_for(path),
                    BASE64.encode(bytes)
                )),
                Err(err) => {
                    log::debug!("cannot read image {}: {err}", path.display());
                    None
                }
            },
        }
    }
}

/// How an image relates to the turn's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Referenced from inside the text; rendered where it appears.
    Inline,
    /// Attached to the turn; rendered after the text.
    Attached,
}

/// An image belonging to a conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// The reference as written in the source (or a label for attachments).
    pub reference: String,
    /// Where the image resolves to.
    pub source: ImageSource,
    /// Whether the text refers to it or it is attached.
    pub placement: Placement,
}

impl ImageRef {
    /// An image attached to a turn rather than referenced from its text.
    #[must_use]
    pub fn attached(reference: impl Into<String>, source: ImageSource) -> Self {
        Self {
            reference: reference.into(),
            source,
            placement: Placement::Attached,
        }
    }
}

/// Resolves a reference as written in a conversation file.
#[must_use]
pub fn resolve(reference: &str, base_dir: &Path) -> ImageSource {
    let lower = reference.to_ascii_lowercase();
    if ["http://", "https://", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return ImageSource::Remote(reference.to_owned());
    }

    let path = Path::new(reference.strip_prefix("file://").unwrap_or(reference));
    if path.is_absolute() {
        ImageSource::Local(path.to_path_buf())
    } else {
        ImageSource::Local(base_dir.join(path))
    }
}

/// Extracts Markdown and HTML image references from `text`, in the order
/// they appear.
#[must_use]
pub fn extract_references(text: &str, base_dir: &Path) -> Vec<ImageRef> {
    let mut found: Vec<(usize, &str)> = MARKDOWN_IMAGE
        .captures_iter(text)
        .chain(HTML_IMAGE.captures_iter(text))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), caps.get(1)?.as_str()))
        })
        .collect();
    found.sort_by_key(|&(offset, _)| offset);

    found
        .into_iter()
        .map(|(_, reference)| ImageRef {
            reference: reference.to_owned(),
            source: resolve(reference, base_dir),
            placement: Placement::Inline,
        })
        .collect()
}

/// Guesses a MIME type from a file extension.
fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_markdown_and_html_in_source_order() {
        let text = r#"first <img src="b.png" width="10"> then ![a](a.jpg "title")"#;
        let refs = extract_references(text, Path::new("/base"));

        let names: Vec<_> = refs.iter().map(|r| r.reference.as_str()).collect();
        assert_eq!(names, ["b.png", "a.jpg"]);
        assert!(refs.iter().all(|r| r.placement == Placement::Inline));
    }

    #[test]
    fn extracts_angle_bracketed_destination() {
        let refs = extract_references("![x](<shots/one.png>)", Path::new("/base"));
        assert_eq!(refs[0].reference, "shots/one.png");
    }

    #[test]
    fn html_image_match_is_case_insensitive() {
        let refs = extract_references("<IMG SRC='pic.gif'>", Path::new("/base"));
        assert_eq!(refs[0].source, ImageSource::Local(PathBuf::from("/base/pic.gif")));
    }

    #[test]
    fn ignores_plain_links() {
        assert!(extract_references("[not an image](a.png)", Path::new(".")).is_empty());
    }

    #[test]
    fn resolves_relative_against_base() {
        assert_eq!(
            resolve("img/a.png", Path::new("/chats")),
            ImageSource::Local(PathBuf::from("/chats/img/a.png"))
        );
    }

    #[test]
    fn keeps_absolute_and_file_uri_paths() {
        assert_eq!(
            resolve("/elsewhere/a.png", Path::new("/chats")),
            ImageSource::Local(PathBuf::from("/elsewhere/a.png"))
        );
        assert_eq!(
            resolve("file:///elsewhere/b.png", Path::new("/chats")),
            ImageSource::Local(PathBuf::from("/elsewhere/b.png"))
        );
    }

    #[test]
    fn passes_remote_sources_through() {
        for reference in ["https://x.test/a.png", "HTTP://x.test/a", "data:image/png;base64,AAAA"] {
            assert_eq!(
                resolve(reference, Path::new("/chats")),
                ImageSource::Remote(reference.to_owned())
            );
        }
    }

    #[test]
    fn inlines_local_file_as_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let uri = ImageSource::Local(path).to_uri().unwrap();
        assert_eq!(uri, "data:image/png;base64,AQID");
    }

    #[test]
    fn missing_local_file_has_no_uri() {
        let source = ImageSource::Local(PathBuf::from("/definitely/not/here.png"));
        assert!(source.to_uri().is_none());
    }

    #[test]
    fn embedded_image_becomes_data_uri() {
        let source = ImageSource::Embedded {
            mime_type: "image/jpeg".into(),
            data: "QUJD".into(),
        };
        assert_eq!(source.to_uri().unwrap(), "data:image/jpeg;base64,QUJD");
    }

    #[test]
    fn guesses_mime_types() {
        assert_eq!(mime_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("a.svg")), "image/svg+xml");
        assert_eq!(mime_type_for(Path::new("a")), "application/octet-stream");
    }
}
