// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! HTML assembly for selected chunks.
//!
//! This module turns a [`Batch`] and its materialized selection into
//! [`RenderUnit`]s: self-contained HTML documents, each handed to the
//! renderer on its own.
//!
//! # Output Format
//!
//! - One content unit per chunk, or per file with [`Grouping::PerFile`]
//! - A metadata unit before a file's first content unit when the file has
//!   [`RecoveryMetadata`] and at least one included part
//! - Each included part as a `<section>` with an optional `<h1>` heading
//!   followed by its Markdown converted to HTML
//! - Attached images after the part's text
//!
//! Unit order follows [`Selection::materialize`](crate::selection::Selection::materialize)
//! exactly.
//!
//! # Example
//!
//! ```
//! use chat2pdf::assembler::assemble;
//! use chat2pdf::batch::Batch;
//! use chat2pdf::config::ArchiveConfig;
//! use chat2pdf::parser::{ConversationFile, parse_conversation};
//!
//! let file = ConversationFile::new("chat.txt", "[USER]\nHello!\n[MODEL]\n**Hi** there");
//! let mut batch = Batch::new();
//! batch.add(parse_conversation(&file).unwrap(), None);
//!
//! let assembly = assemble(&batch, &ArchiveConfig::default());
//!
//! assert_eq!(assembly.units.len(), 1);
//! assert!(assembly.units[0].html.contains("<h1>User Message</h1>"));
//! assert!(assembly.units[0].html.contains("<strong>Hi</strong>"));
//! ```

use crate::batch::Batch;
use crate::config::{ArchiveConfig, Grouping, RecoveryMetadata};
use crate::images::{self, HTML_IMAGE, ImageRef, Placement};
use crate::parser::{Conversation, Role};
use crate::selection::Inclusion;
use pulldown_cmark::{Event, Options, Parser, Tag, html};
use std::fmt::{self, Write};
use std::path::Path;

const STYLESHEET: &str = include_str!("style.css");

const FONTS_URL: &str = "https://fonts.googleapis.com/css2?family=Noto+Color+Emoji&family=Roboto:ital,wght@0,400;0,700;1,400&display=swap";

/// What a render unit contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// The recovery metadata page of a file.
    Metadata,
    /// Content for chunks `first..=last` of a file.
    Chunks {
        /// Ordinal of the first chunk in the unit.
        first: usize,
        /// Ordinal of the last chunk in the unit.
        last: usize,
    },
}

/// Identifies a render unit in progress messages and errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLabel {
    /// Display name of the source file.
    pub file: String,
    /// What the unit holds.
    pub kind: UnitKind,
}

impl fmt::Display for UnitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            UnitKind::Metadata => write!(f, "{} (metadata)", self.file),
            UnitKind::Chunks { first, last } if first == last => {
                write!(f, "{} chunk {first}", self.file)
            }
            UnitKind::Chunks { first, last } => write!(f, "{} chunks {first}-{last}", self.file),
        }
    }
}

/// One HTML document for the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderUnit {
    /// Where the unit came from.
    pub label: UnitLabel,
    /// The complete HTML document.
    pub html: String,
}

/// A referenced image that could not be loaded.
///
/// Non-fatal: a placeholder is rendered in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingImageWarning {
    /// Display name of the source file.
    pub file: String,
    /// Chunk ordinal.
    pub ordinal: usize,
    /// Which part referenced the image.
    pub role: Role,
    /// The reference as written.
    pub reference: String,
}

impl fmt::Display for MissingImageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunk {} ({}): missing image {}",
            self.file, self.ordinal, self.role, self.reference
        )
    }
}

/// The result of assembling a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembly {
    /// Units in render order.
    pub units: Vec<RenderUnit>,
    /// Images replaced by placeholders.
    pub warnings: Vec<MissingImageWarning>,
}

/// Builds the render units for the batch's current selection.
#[must_use]
pub fn assemble(batch: &Batch, config: &ArchiveConfig) -> Assembly {
    let mut assembly = Assembly::default();
    let inclusions = batch.selection().materialize();

    for file_group in inclusions.chunk_by(|a, b| a.file == b.file) {
        let file = file_group[0].file;
        let Some(conversation) = batch.conversation(file) else {
            log::warn!("selection refers to unknown file {file}");
            continue;
        };
        let name = conversation.display_name();

        if let Some(metadata) = batch.metadata(file) {
            assembly.units.push(RenderUnit {
                label: UnitLabel {
                    file: name.clone(),
                    kind: UnitKind::Metadata,
                },
                html: document(&name, &metadata_section(metadata)),
            });
        }

        let groups: Vec<&[Inclusion]> = match config.grouping {
            Grouping::PerChunk => file_group
                .chunk_by(|a, b| a.ordinal == b.ordinal)
                .collect(),
            Grouping::PerFile => vec![file_group],
        };

        for group in groups {
            let mut body = String::new();
            for chunk_group in group.chunk_by(|a, b| a.ordinal == b.ordinal) {
                body.push_str(&chunk_section(
                    conversation,
                    chunk_group,
                    config,
                    &mut assembly.warnings,
                ));
            }
            let first = group[0].ordinal;
            let last = group[group.len() - 1].ordinal;
            assembly.units.push(RenderUnit {
                label: UnitLabel {
                    file: name.clone(),
                    kind: UnitKind::Chunks { first, last },
                },
                html: document(&name, &body),
            });
        }
    }

    log::debug!(
        "assembled {} unit(s) with {} missing image(s)",
        assembly.units.len(),
        assembly.warnings.len()
    );
    assembly
}

/// Wraps a body fragment in a complete document with styles and fonts.
fn document(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<link rel="preconnect" href="https://fonts.googleapis.com">
<link rel="preconnect" href="https://fonts.gstatic.com" crossorigin>
<link href="{FONTS_URL}" rel="stylesheet">
<style>
{STYLESHEET}</style>
</head>
<body>
{body}</body>
</html>
"#,
        title = escape_html(title),
    )
}

fn metadata_section(metadata: &RecoveryMetadata) -> String {
    let mut out = String::from("<section class=\"metadata\">\n<h1>Recovery Metadata</h1>\n<dl>\n");
    for (key, value) in metadata.entries() {
        let value_html = if is_web_link(value) {
            format!("<a href=\"{0}\">{0}</a>", escape_html(value))
        } else {
            escape_html(value)
        };
        writeln!(out, "<dt>{}</dt><dd>{value_html}</dd>", escape_html(key)).unwrap();
    }
    out.push_str("</dl>\n</section>\n");
    out
}

fn is_web_link(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Renders the included parts of one chunk, user part first.
fn chunk_section(
    conversation: &Conversation,
    inclusions: &[Inclusion],
    config: &ArchiveConfig,
    warnings: &mut Vec<MissingImageWarning>,
) -> String {
    let mut out = String::from("<section class=\"chunk\">\n");
    for inclusion in inclusions {
        let Some(part) = conversation
            .chunks
            .iter()
            .find(|c| c.ordinal == inclusion.ordinal)
            .and_then(|c| c.part(inclusion.role))
        else {
            continue;
        };

        let ctx = PartContext {
            file: conversation.display_name(),
            ordinal: inclusion.ordinal,
            role: inclusion.role,
            base_dir: conversation.base_dir(),
            images: &part.images,
        };

        writeln!(out, "<section class=\"part {}\">", inclusion.role).unwrap();
        if config.show_headings {
            let heading = match inclusion.role {
                Role::User => config.user_heading(),
                Role::Model => config.model_heading(),
            };
            writeln!(out, "<h1>{}</h1>", escape_html(heading)).unwrap();
        }
        out.push_str(&ctx.markdown_to_html(&part.text, warnings));
        for image in part
            .images
            .iter()
            .filter(|i| i.placement == Placement::Attached)
        {
            out.push_str(&ctx.attachment(image, warnings));
        }
        out.push_str("</section>\n");
    }
    out.push_str("</section>\n");
    out
}

/// Where a part came from, for resolving images and reporting them.
struct PartContext<'a> {
    file: String,
    ordinal: usize,
    role: Role,
    base_dir: &'a Path,
    images: &'a [ImageRef],
}

impl PartContext<'_> {
    fn markdown_to_html(&self, text: &str, warnings: &mut Vec<MissingImageWarning>) -> String {
        let options =
            Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
        let mut events = Vec::new();
        // Nesting depth inside an image that was replaced by a placeholder.
        let mut skipping = 0usize;

        for event in Parser::new_ext(text, options) {
            if skipping > 0 {
                match event {
                    Event::Start(Tag::Image(..)) => skipping += 1,
                    Event::End(Tag::Image(..)) => skipping -= 1,
                    _ => {}
                }
                continue;
            }
            match event {
                Event::Start(Tag::Image(link_type, dest, title)) => {
                    match self.image_uri(&dest, warnings) {
                        Some(uri) => events.push(Event::Start(Tag::Image(link_type, uri.into(), title))),
                        None => {
                            events.push(Event::Html(placeholder(&dest).into()));
                            skipping = 1;
                        }
                    }
                }
                Event::Html(raw) => events.push(Event::Html(self.rewrite_html(&raw, warnings).into())),
                other => events.push(other),
            }
        }

        let mut out = String::with_capacity(text.len() * 2);
        html::push_html(&mut out, events.into_iter());
        out
    }

    /// Escapes raw HTML so it shows literally, keeping `<img>` tags working.
    fn rewrite_html(&self, raw: &str, warnings: &mut Vec<MissingImageWarning>) -> String {
        let mut out = String::with_capacity(raw.len() * 2);
        let mut last = 0;
        for caps in HTML_IMAGE.captures_iter(raw) {
            let (Some(whole), Some(src)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&escape_html(&raw[last..whole.start()]));
            match self.image_uri(src.as_str(), warnings) {
                Some(uri) => {
                    write!(out, "<img src=\"{}\" alt=\"\">", escape_html(&uri)).unwrap();
                }
                None => out.push_str(&placeholder(src.as_str())),
            }
            last = whole.end();
        }
        out.push_str(&escape_html(&raw[last..]));
        out
    }

    fn attachment(&self, image: &ImageRef, warnings: &mut Vec<MissingImageWarning>) -> String {
        match image.source.to_uri() {
            Some(uri) => format!(
                "<figure class=\"attachment\"><img src=\"{}\" alt=\"{}\"></figure>\n",
                escape_html(&uri),
                escape_html(&image.reference)
            ),
            None => {
                self.warn_missing(&image.reference, warnings);
                format!("<p>{}</p>\n", placeholder(&image.reference))
            }
        }
    }

    /// Resolves an inline reference, recording a warning if it is missing.
    fn image_uri(&self, reference: &str, warnings: &mut Vec<MissingImageWarning>) -> Option<String> {
        let source = self
            .images
            .iter()
            .find(|i| i.placement == Placement::Inline && i.reference == reference)
            .map_or_else(
                || images::resolve(reference, self.base_dir),
                |i| i.source.clone(),
            );
        let uri = source.to_uri();
        if uri.is_none() {
            self.warn_missing(reference, warnings);
        }
        uri
    }

    fn warn_missing(&self, reference: &str, warnings: &mut Vec<MissingImageWarning>) {
        let warning = MissingImageWarning {
            file: self.file.clone(),
            ordinal: self.ordinal,
            role: self.role,
            reference: reference.to_owned(),
        };
        log::warn!("{warning}");
        warnings.push(warning);
    }
}

fn placeholder(reference: &str) -> String {
    format!(
        "<span class=\"missing-image\">\u{1F5BC} missing image: {}</span>",
        escape_html(reference)
    )
}

/// Escapes the characters that are significant in HTML text and attributes.
fn escape_html(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + s.len() / 8);
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#39;"),
            _ => result.push(c),
        }
    }
    result
}
