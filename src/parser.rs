// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Parsing of conversation files into ordered exchange chunks.
//!
//! Two source conventions are recognised:
//!
//! - **Marker text**: plain text (or Markdown) where each speaker turn is
//!   introduced by a line containing only `[USER]` or `[MODEL]`
//!   (`[ASSISTANT]` is accepted as an alias for `[MODEL]`). Markers are
//!   matched case-insensitively after trimming.
//! - **AI Studio JSON**: a `chunkedPrompt.chunks` export, handled by
//!   [`crate::studio`].
//!
//! A file that contains neither is rejected with [`ParseError`], so an
//! empty file and an unparseable file can be told apart.
//!
//! # Example
//!
//! ```
//! use chat2pdf::parser::{parse_text, Role};
//! use std::path::Path;
//!
//! let text = "[USER]\nHello\n[MODEL]\nHi there!\n[USER]\nBye\n[MODEL]\nSee you";
//! let chunks = parse_text(text, Path::new(".")).unwrap();
//!
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].ordinal, 1);
//! assert_eq!(chunks[0].part(Role::Model).unwrap().text, "Hi there!");
//! ```

use crate::images::{self, ImageRef};
use snafu::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};

/// Error type for conversation parsing failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParseError {
    /// The text is empty or contains only whitespace.
    #[snafu(display("conversation is empty"))]
    Empty,

    /// The text contains no `[USER]`/`[MODEL]` marker and no JSON export.
    #[snafu(display("no [USER] or [MODEL] marker found"))]
    NoMarkers,

    /// The text looked like a JSON export but could not be decoded.
    #[snafu(display("failed to parse JSON export: {source}"))]
    Json {
        /// The underlying JSON parsing error.
        source: serde_json::Error,
    },

    /// The JSON export decoded but held no user or model turn.
    #[snafu(display("JSON export contains no user or model turns"))]
    NoExchanges,
}

/// Which speaker a part of a chunk belongs to.
///
/// The derived ordering puts [`Role::User`] before [`Role::Model`], which
/// is the order parts are emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// The person asking.
    User,
    /// The model answering.
    Model,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Model => "model",
        })
    }
}

/// The source format of a conversation file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Plain text with `[USER]` / `[MODEL]` marker lines.
    Markers,
    /// An AI Studio `chunkedPrompt` JSON export.
    Studio,
}

/// A conversation file as read from disk, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationFile {
    path: PathBuf,
    text: String,
}

impl ConversationFile {
    /// Wraps already-loaded text with the path it came from.
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    /// Reads a UTF-8 conversation file from disk.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be read or is not UTF-8.
    pub fn read(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)?;
        Ok(Self { path, text })
    }

    /// The path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The raw text content.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The directory relative image references are resolved against.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        base_dir_of(&self.path)
    }
}

/// The text of one speaker turn, with the images it references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// The turn's Markdown text, kept verbatim apart from outer trimming.
    pub text: String,

    /// Images referenced inline in the text or attached to the turn.
    pub images: Vec<ImageRef>,
}

impl Message {
    /// Builds a message from raw text, extracting inline image references.
    #[must_use]
    pub fn from_text(text: &str, base_dir: &Path) -> Self {
        let text = text.trim();
        Self {
            text: text.to_owned(),
            images: images::extract_references(text, base_dir),
        }
    }
}

/// One exchange unit: an optional user turn and an optional model turn.
///
/// At least one of the two parts is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the source file, starting at 0.
    pub ordinal: usize,
    /// The user's turn, if the source had one.
    pub user: Option<Message>,
    /// The model's turn, if the source had one.
    pub model: Option<Message>,
}

impl Chunk {
    /// Returns the part for `role`, if present.
    #[must_use]
    pub const fn part(&self, role: Role) -> Option<&Message> {
        match role {
            Role::User => self.user.as_ref(),
            Role::Model => self.model.as_ref(),
        }
    }

    /// Returns the part for `role` mutably, if present.
    pub fn part_mut(&mut self, role: Role) -> Option<&mut Message> {
        match role {
            Role::User => self.user.as_mut(),
            Role::Model => self.model.as_mut(),
        }
    }
}

/// A parsed conversation: the chunks of one file plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// The source file path.
    pub path: PathBuf,
    /// Chunks in source order.
    pub chunks: Vec<Chunk>,
}

impl Conversation {
    /// A short name for messages and metadata pages.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.path.file_name().map_or_else(
            || self.path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        )
    }

    /// The directory relative image references are resolved against.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        base_dir_of(&self.path)
    }
}

fn base_dir_of(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Accumulates chunks while a source is scanned.
///
/// A user turn always opens a new chunk. A model turn answers the newest
/// chunk when that chunk has no model part yet, and otherwise opens a
/// model-only chunk.
pub(crate) struct ChunkBuilder<'a> {
    base_dir: &'a Path,
    chunks: Vec<Chunk>,
}

impl<'a> ChunkBuilder<'a> {
    pub(crate) const fn new(base_dir: &'a Path) -> Self {
        Self {
            base_dir,
            chunks: Vec::new(),
        }
    }

    pub(crate) fn open(&mut self, role: Role) {
        match role {
            Role::User => self.push(Some(Message::default()), None),
            Role::Model => {
                if let Some(chunk) = self.chunks.last_mut().filter(|c| c.model.is_none()) {
                    chunk.model = Some(Message::default());
                } else {
                    self.push(None, Some(Message::default()));
                }
            }
        }
    }

    /// Sets the text of the newest chunk's `role` part.
    pub(crate) fn fill(&mut self, role: Role, text: &str) -> Option<&mut Message> {
        let base_dir = self.base_dir;
        let message = self.chunks.last_mut()?.part_mut(role)?;
        *message = Message::from_text(text, base_dir);
        Some(message)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub(crate) fn finish(self) -> Vec<Chunk> {
        self.chunks
    }

    fn push(&mut self, user: Option<Message>, model: Option<Message>) {
        let ordinal = self.chunks.len();
        self.chunks.push(Chunk {
            ordinal,
            user,
            model,
        });
    }
}

/// Where the marker scanner currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingMarker,
    InUserPart,
    InModelPart,
}

impl State {
    const fn role(self) -> Option<Role> {
        match self {
            Self::AwaitingMarker => None,
            Self::InUserPart => Some(Role::User),
            Self::InModelPart => Some(Role::Model),
        }
    }
}

/// Returns the role introduced by `line` if it is a marker line.
fn marker(line: &str) -> Option<Role> {
    let inner = line.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.eq_ignore_ascii_case("user") {
        Some(Role::User)
    } else if inner.eq_ignore_ascii_case("model") || inner.eq_ignore_ascii_case("assistant") {
        Some(Role::Model)
    } else {
        None
    }
}

/// Works out which convention `text` follows, if any.
#[must_use]
pub fn detect_format(text: &str) -> Option<Format> {
    if text.lines().any(|line| marker(line).is_some()) {
        Some(Format::Markers)
    } else if starts_json_object(text) {
        Some(Format::Studio)
    } else {
        None
    }
}

/// Whether the first `{` in `text` opens a JSON object with a key.
fn starts_json_object(text: &str) -> bool {
    text.find('{')
        .is_some_and(|start| text[start + 1..].trim_start().starts_with('"'))
}

/// Parses a conversation file into a [`Conversation`].
///
/// # Errors
///
/// Returns a [`ParseError`] when the file holds no recognisable exchange.
pub fn parse_conversation(file: &ConversationFile) -> Result<Conversation, ParseError> {
    let chunks = parse_text(file.text(), file.base_dir())?;
    log::debug!(
        "parsed {} chunk(s) from {}",
        chunks.len(),
        file.path().display()
    );
    Ok(Conversation {
        path: file.path().to_path_buf(),
        chunks,
    })
}

/// Parses conversation text into chunks.
///
/// Relative image references are resolved against `base_dir`.
///
/// # Errors
///
/// - [`ParseError::Empty`] for empty or whitespace-only text
/// - [`ParseError::NoMarkers`] when no marker line or JSON object exists
/// - [`ParseError::Json`] / [`ParseError::NoExchanges`] for bad JSON exports
pub fn parse_text(text: &str, base_dir: &Path) -> Result<Vec<Chunk>, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    ensure!(!text.trim().is_empty(), EmptySnafu);

    match detect_format(text) {
        Some(Format::Markers) => Ok(parse_markers(text, base_dir)),
        Some(Format::Studio) => crate::studio::parse_studio(text, base_dir),
        None => NoMarkersSnafu.fail(),
    }
}

/// Runs the marker state machine over `text`.
///
/// Callers guarantee at least one marker line exists. Text before the first
/// marker is discarded; a trailing turn cut off mid-way keeps whatever
/// content it has.
fn parse_markers(text: &str, base_dir: &Path) -> Vec<Chunk> {
    let mut builder = ChunkBuilder::new(base_dir);
    let mut state = State::AwaitingMarker;
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        let Some(role) = marker(line) else {
            if state != State::AwaitingMarker {
                body.push(line);
            }
            continue;
        };

        flush(&mut builder, state, &body);
        body.clear();

        builder.open(role);
        state = match role {
            Role::User => State::InUserPart,
            Role::Model => State::InModelPart,
        };
    }
    flush(&mut builder, state, &body);

    builder.finish()
}

fn flush(builder: &mut ChunkBuilder<'_>, state: State, body: &[&str]) {
    if let Some(role) = state.role() {
        builder.fill(role, &body.join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::ImageSource;

    fn parse(text: &str) -> Vec<Chunk> {
        parse_text(text, Path::new("/chats")).unwrap()
    }

    #[test]
    fn parses_alternating_markers_into_pairs() {
        let chunks = parse("[USER]\nQ1\n[MODEL]\nA1\n[USER]\nQ2\n[MODEL]\nA2\n");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[1].ordinal, 1);
        for chunk in &chunks {
            assert!(chunk.user.is_some());
            assert!(chunk.model.is_some());
        }
        assert_eq!(chunks[1].part(Role::User).unwrap().text, "Q2");
        assert_eq!(chunks[1].part(Role::Model).unwrap().text, "A2");
    }

    #[test]
    fn yields_one_chunk_per_exchange_boundary() {
        for n in 1..8 {
            let text: String = (0..n)
                .map(|i| format!("[USER]\nquestion {i}\n[MODEL]\nanswer {i}\n"))
                .collect();
            let chunks = parse(&text);

            assert_eq!(chunks.len(), n);
            let ordinals: Vec<_> = chunks.iter().map(|c| c.ordinal).collect();
            assert_eq!(ordinals, (0..n).collect::<Vec<_>>());
            assert_eq!(chunks[n - 1].part(Role::User).unwrap().text, format!("question {}", n - 1));
        }
    }

    #[test]
    fn rejects_empty_text() {
        assert!(matches!(
            parse_text("", Path::new(".")),
            Err(ParseError::Empty)
        ));
        assert!(matches!(
            parse_text("  \n\t\n", Path::new(".")),
            Err(ParseError::Empty)
        ));
    }

    #[test]
    fn rejects_text_without_markers() {
        assert!(matches!(
            parse_text("just some notes\nwith no turns", Path::new(".")),
            Err(ParseError::NoMarkers)
        ));
    }

    #[test]
    fn parses_text_with_byte_order_mark() {
        let chunks = parse("\u{feff}[USER]\nQ\n[MODEL]\nA");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].part(Role::User).unwrap().text, "Q");
        assert_eq!(chunks[0].part(Role::Model).unwrap().text, "A");

        let only_user = parse("\u{feff}[USER]\nhello");
        assert_eq!(only_user[0].part(Role::User).unwrap().text, "hello");
    }

    #[test]
    fn braces_in_plain_notes_are_not_json() {
        let text = "use a closure { x + 1 }\nand `fn main() {}`";

        assert_eq!(detect_format(text), None);
        assert!(matches!(
            parse_text(text, Path::new(".")),
            Err(ParseError::NoMarkers)
        ));
        assert_eq!(detect_format("export: {\n  \"chunkedPrompt\": {}}"), Some(Format::Studio));
    }

    #[test]
    fn matches_markers_case_insensitively_with_padding() {
        let chunks = parse("  [user]  \nhi\n[Model]\nhello\n[ASSISTANT]\nmore");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].part(Role::Model).unwrap().text, "hello");
        assert!(chunks[1].user.is_none());
        assert_eq!(chunks[1].part(Role::Model).unwrap().text, "more");
    }

    #[test]
    fn ignores_bracketed_text_that_is_not_a_marker() {
        let chunks = parse("[USER]\n[note] keep this\n[MODEL]\nok");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].part(Role::User).unwrap().text, "[note] keep this");
    }

    #[test]
    fn discards_preamble_before_first_marker() {
        let chunks = parse("Exported 2025-01-01\n\n[USER]\nhi\n[MODEL]\nhello");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].part(Role::User).unwrap().text, "hi");
    }

    #[test]
    fn keeps_marker_without_content_as_empty_part() {
        let chunks = parse("[USER]\n\n[MODEL]\nanswer");

        let user = chunks[0].part(Role::User).unwrap();
        assert!(user.text.is_empty());
        assert!(user.images.is_empty());
    }

    #[test]
    fn keeps_truncated_trailing_chunk() {
        let chunks = parse("[USER]\nfirst\n[MODEL]\nreply\n[USER]\nsecond question cut o");

        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1].part(Role::User).unwrap().text,
            "second question cut o"
        );
        assert!(chunks[1].model.is_none());
    }

    #[test]
    fn keeps_trailing_marker_with_nothing_after_it() {
        let chunks = parse("[USER]\nhi\n[MODEL]");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].part(Role::Model).unwrap().text, "");
    }

    #[test]
    fn consecutive_user_markers_open_separate_chunks() {
        let chunks = parse("[USER]\none\n[USER]\ntwo\n[MODEL]\nanswer");

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].model.is_none());
        assert_eq!(chunks[1].part(Role::Model).unwrap().text, "answer");
    }

    #[test]
    fn model_without_user_becomes_model_only_chunk() {
        let chunks = parse("[MODEL]\nwelcome\n[USER]\nhi\n[MODEL]\nhello");

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].user.is_none());
        assert_eq!(chunks[0].part(Role::Model).unwrap().text, "welcome");
    }

    #[test]
    fn preserves_markdown_verbatim() {
        let chunks = parse("[USER]\n# Title\n\n```rust\nfn main() {}\n```\n[MODEL]\n**bold**");

        assert_eq!(
            chunks[0].part(Role::User).unwrap().text,
            "# Title\n\n```rust\nfn main() {}\n```"
        );
        assert_eq!(chunks[0].part(Role::Model).unwrap().text, "**bold**");
    }

    #[test]
    fn missing_image_reference_is_not_a_parse_error() {
        let chunks = parse("[USER]\nlook ![shot](does-not-exist.png)\n[MODEL]\nnice");

        let images = &chunks[0].part(Role::User).unwrap().images;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].reference, "does-not-exist.png");
        assert_eq!(
            images[0].source,
            ImageSource::Local(PathBuf::from("/chats/does-not-exist.png"))
        );
    }

    #[test]
    fn detects_formats() {
        assert_eq!(detect_format("[USER]\nhi"), Some(Format::Markers));
        assert_eq!(detect_format("{\"chunkedPrompt\": {}}"), Some(Format::Studio));
        assert_eq!(detect_format("plain"), None);
    }

    #[test]
    fn parse_conversation_resolves_against_file_directory() {
        let file = ConversationFile::new("/exports/today/chat.txt", "[USER]\n![a](img/a.png)");
        let conversation = parse_conversation(&file).unwrap();

        assert_eq!(conversation.display_name(), "chat.txt");
        assert_eq!(
            conversation.chunks[0].part(Role::User).unwrap().images[0].source,
            ImageSource::Local(PathBuf::from("/exports/today/img/a.png"))
        );
    }

    #[test]
    fn bare_file_name_uses_current_directory() {
        let file = ConversationFile::new("chat.txt", "[USER]\nhi");
        assert_eq!(file.base_dir(), Path::new("."));
    }
}
