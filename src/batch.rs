// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! A batch of parsed conversations and the selection made over them.

use crate::config::RecoveryMetadata;
use crate::parser::Conversation;
use crate::selection::{FileId, Selection};

#[derive(Debug, Clone)]
struct Entry {
    id: FileId,
    conversation: Conversation,
    metadata: Option<RecoveryMetadata>,
}

/// Parsed conversations keyed by [`FileId`], plus their [`Selection`].
///
/// Only files that parsed successfully are ever added, so a file with a
/// parse error never reaches the assembler.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    entries: Vec<Entry>,
    selection: Selection,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a conversation at the end of the batch order.
    pub fn add(
        &mut self,
        conversation: Conversation,
        metadata: Option<RecoveryMetadata>,
    ) -> FileId {
        let id = self.selection.add_file(&conversation.chunks);
        self.entries.push(Entry {
            id,
            conversation,
            metadata,
        });
        id
    }

    /// Number of conversations in the batch.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch holds no conversations.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The current selection.
    #[must_use]
    pub const fn selection(&self) -> &Selection {
        &self.selection
    }

    /// The selection, for applying user commands.
    pub const fn selection_mut(&mut self) -> &mut Selection {
        &mut self.selection
    }

    /// The conversation added under `id`.
    #[must_use]
    pub fn conversation(&self, id: FileId) -> Option<&Conversation> {
        self.entry(id).map(|e| &e.conversation)
    }

    /// The recovery metadata attached to `id`, if any.
    #[must_use]
    pub fn metadata(&self, id: FileId) -> Option<&RecoveryMetadata> {
        self.entry(id).and_then(|e| e.metadata.as_ref())
    }

    fn entry(&self, id: FileId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_text;
    use std::path::{Path, PathBuf};

    fn conversation(name: &str, text: &str) -> Conversation {
        Conversation {
            path: PathBuf::from(name),
            chunks: parse_text(text, Path::new(".")).unwrap(),
        }
    }

    #[test]
    fn add_registers_file_with_selection() {
        let mut batch = Batch::new();
        let a = batch.add(conversation("a.txt", "[USER]\nhi\n[MODEL]\nyo"), None);
        let b = batch.add(conversation("b.txt", "[USER]\nq"), None);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.selection().order(), [a, b]);
        assert_eq!(batch.conversation(b).unwrap().display_name(), "b.txt");
        assert_eq!(batch.selection().materialize().len(), 3);
    }

    #[test]
    fn metadata_is_looked_up_by_id() {
        let metadata = RecoveryMetadata::new(
            &crate::config::ArchiveConfig::default(),
            Path::new("a.txt"),
            chrono::Local::now(),
        );
        let mut batch = Batch::new();
        let a = batch.add(conversation("a.txt", "[USER]\nhi"), Some(metadata.clone()));
        let b = batch.add(conversation("b.txt", "[USER]\nhi"), None);

        assert_eq!(batch.metadata(a), Some(&metadata));
        assert_eq!(batch.metadata(b), None);
    }
}
