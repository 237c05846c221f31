// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Which chunks, and which parts of them, go into the archive.
//!
//! A [`Selection`] holds every chunk of every added file; nothing is ever
//! removed. Exclusion is a flag, so the chunk list of a file is always the
//! full source list in source order. Files carry an enabled flag and a
//! position in the batch order.
//!
//! The presentation layer drives the model through explicit commands
//! ([`Selection::toggle`], [`Selection::toggle_file`],
//! [`Selection::reorder`], [`Selection::select_from`]) and reads the
//! result with [`Selection::materialize`].
//!
//! # Example
//!
//! ```
//! use chat2pdf::parser::{parse_text, Role};
//! use chat2pdf::selection::{ChunkRef, Selection};
//! use std::path::Path;
//!
//! let chunks = parse_text("[USER]\na\n[MODEL]\nb\n[USER]\nc\n[MODEL]\nd", Path::new(".")).unwrap();
//! let mut selection = Selection::new();
//! let file = selection.add_file(&chunks);
//!
//! selection.toggle(ChunkRef::new(file, 0), Role::User).unwrap();
//!
//! let included = selection.materialize();
//! assert_eq!(included.len(), 3);
//! assert_eq!(included[0].role, Role::Model);
//! ```

use crate::parser::{Chunk, Role};
use snafu::prelude::*;
use std::fmt;

/// Error type for selection commands.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum SelectionError {
    /// A reorder target outside `0..file_count`.
    #[snafu(display("position {position} is out of bounds for {file_count} file(s)"))]
    InvalidPosition {
        /// The requested position.
        position: usize,
        /// Number of files in the selection.
        file_count: usize,
    },

    /// The file id does not belong to this selection.
    #[snafu(display("unknown file {file}"))]
    UnknownFile {
        /// The unknown id.
        file: FileId,
    },

    /// The chunk ordinal does not exist in the file.
    #[snafu(display("file {file} has no chunk {ordinal}"))]
    UnknownChunk {
        /// The file that was addressed.
        file: FileId,
        /// The missing ordinal.
        ordinal: usize,
    },

    /// The chunk exists but has no part for the role.
    #[snafu(display("chunk {ordinal} of file {file} has no {role} part"))]
    MissingPart {
        /// The file that was addressed.
        file: FileId,
        /// The chunk ordinal.
        ordinal: usize,
        /// The absent role.
        role: Role,
    },
}

/// Opaque handle for a file added to a [`Selection`].
///
/// Ids are handed out in insertion order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);

impl FileId {
    /// The insertion index this id was created with.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Addresses one chunk of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRef {
    /// The file.
    pub file: FileId,
    /// The chunk's ordinal within the file.
    pub ordinal: usize,
}

impl ChunkRef {
    /// Creates a chunk reference.
    #[must_use]
    pub const fn new(file: FileId, ordinal: usize) -> Self {
        Self { file, ordinal }
    }
}

/// One entry of a materialized selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inclusion {
    /// The file the part comes from.
    pub file: FileId,
    /// The chunk ordinal.
    pub ordinal: usize,
    /// Which part of the chunk.
    pub role: Role,
}

/// Inclusion flags of one chunk; `None` marks a part absent from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChunkFlags {
    ordinal: usize,
    user: Option<bool>,
    model: Option<bool>,
}

impl ChunkFlags {
    fn flag_mut(&mut self, role: Role) -> &mut Option<bool> {
        match role {
            Role::User => &mut self.user,
            Role::Model => &mut self.model,
        }
    }

    fn include_all(&mut self, included: bool) {
        for flag in [&mut self.user, &mut self.model].into_iter().flatten() {
            *flag = included;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSelection {
    id: FileId,
    enabled: bool,
    chunks: Vec<ChunkFlags>,
}

/// The user's choices for a batch of conversation files.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    /// Files in batch order.
    files: Vec<FileSelection>,
    next_id: usize,
}

impl Selection {
    /// Creates an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file at the end of the batch order.
    ///
    /// The file starts enabled with every present part included.
    pub fn add_file(&mut self, chunks: &[Chunk]) -> FileId {
        let id = FileId(self.next_id);
        self.next_id += 1;
        self.files.push(FileSelection {
            id,
            enabled: true,
            chunks: chunks
                .iter()
                .map(|chunk| ChunkFlags {
                    ordinal: chunk.ordinal,
                    user: chunk.user.as_ref().map(|_| true),
                    model: chunk.model.as_ref().map(|_| true),
                })
                .collect(),
        });
        id
    }

    /// Number of files in the batch.
    #[must_use]
    pub const fn file_count(&self) -> usize {
        self.files.len()
    }

    /// File ids in batch order.
    #[must_use]
    pub fn order(&self) -> Vec<FileId> {
        self.files.iter().map(|f| f.id).collect()
    }

    /// Position of `file` in the batch order.
    #[must_use]
    pub fn position(&self, file: FileId) -> Option<usize> {
        self.files.iter().position(|f| f.id == file)
    }

    /// Whether `file` is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::UnknownFile`] for a foreign id.
    pub fn is_enabled(&self, file: FileId) -> Result<bool, SelectionError> {
        Ok(self.file(file)?.enabled)
    }

    /// Whether a part is currently included. Absent parts report `false`.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::UnknownFile`] or
    /// [`SelectionError::UnknownChunk`] for a bad reference.
    pub fn is_included(&self, chunk: ChunkRef, role: Role) -> Result<bool, SelectionError> {
        let file = self.file(chunk.file)?;
        let flags = file
            .chunks
            .iter()
            .find(|c| c.ordinal == chunk.ordinal)
            .context(UnknownChunkSnafu {
                file: chunk.file,
                ordinal: chunk.ordinal,
            })?;
        Ok(match role {
            Role::User => flags.user == Some(true),
            Role::Model => flags.model == Some(true),
        })
    }

    /// Flips the inclusion of one part of a chunk.
    ///
    /// # Errors
    ///
    /// Fails for unknown files or chunks, and with
    /// [`SelectionError::MissingPart`] if the chunk has no such part.
    pub fn toggle(&mut self, chunk: ChunkRef, role: Role) -> Result<(), SelectionError> {
        let flag = self.flag_mut(chunk, role)?;
        *flag = !*flag;
        Ok(())
    }

    /// Sets the inclusion of one part of a chunk.
    ///
    /// # Errors
    ///
    /// Same as [`Selection::toggle`].
    pub fn set_included(
        &mut self,
        chunk: ChunkRef,
        role: Role,
        included: bool,
    ) -> Result<(), SelectionError> {
        *self.flag_mut(chunk, role)? = included;
        Ok(())
    }

    /// Flips whether a whole file takes part in the batch.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::UnknownFile`] for a foreign id.
    pub fn toggle_file(&mut self, file: FileId) -> Result<(), SelectionError> {
        let file = self.file_mut(file)?;
        file.enabled = !file.enabled;
        Ok(())
    }

    /// Moves `file` to `position` in the batch order.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::InvalidPosition`] if `position` is not in
    /// `0..file_count`; the order is left untouched.
    pub fn reorder(&mut self, file: FileId, position: usize) -> Result<(), SelectionError> {
        let file_count = self.files.len();
        ensure!(
            position < file_count,
            InvalidPositionSnafu {
                position,
                file_count
            }
        );
        let current = self.position(file).context(UnknownFileSnafu { file })?;
        let moved = self.files.remove(current);
        self.files.insert(position, moved);
        Ok(())
    }

    /// Includes `chunk` and every later chunk of the same file in full.
    ///
    /// Earlier chunks keep their current state.
    ///
    /// # Errors
    ///
    /// Fails for unknown files or chunk ordinals.
    pub fn select_from(&mut self, chunk: ChunkRef) -> Result<(), SelectionError> {
        let file = self.file_mut(chunk.file)?;
        let start = file
            .chunks
            .iter()
            .position(|c| c.ordinal == chunk.ordinal)
            .context(UnknownChunkSnafu {
                file: chunk.file,
                ordinal: chunk.ordinal,
            })?;
        for flags in &mut file.chunks[start..] {
            flags.include_all(true);
        }
        Ok(())
    }

    /// Excludes every part of every chunk of `file`.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::UnknownFile`] for a foreign id.
    pub fn deselect_all(&mut self, file: FileId) -> Result<(), SelectionError> {
        for flags in &mut self.file_mut(file)?.chunks {
            flags.include_all(false);
        }
        Ok(())
    }

    /// Resolves the current state into an ordered inclusion list.
    ///
    /// Files follow the batch order, chunks their ordinal, and a user part
    /// comes before the model part of the same chunk. Disabled files,
    /// excluded parts and absent parts are left out.
    #[must_use]
    pub fn materialize(&self) -> Vec<Inclusion> {
        let mut out = Vec::new();
        for file in self.files.iter().filter(|f| f.enabled) {
            for flags in &file.chunks {
                for (role, flag) in [(Role::User, flags.user), (Role::Model, flags.model)] {
                    if flag == Some(true) {
                        out.push(Inclusion {
                            file: file.id,
                            ordinal: flags.ordinal,
                            role,
                        });
                    }
                }
            }
        }
        out
    }

    fn file(&self, file: FileId) -> Result<&FileSelection, SelectionError> {
        self.files
            .iter()
            .find(|f| f.id == file)
            .context(UnknownFileSnafu { file })
    }

    fn file_mut(&mut self, file: FileId) -> Result<&mut FileSelection, SelectionError> {
        self.files
            .iter_mut()
            .find(|f| f.id == file)
            .context(UnknownFileSnafu { file })
    }

    fn flag_mut(&mut self, chunk: ChunkRef, role: Role) -> Result<&mut bool, SelectionError> {
        let file = self.file_mut(chunk.file)?;
        let flags = file
            .chunks
            .iter_mut()
            .find(|c| c.ordinal == chunk.ordinal)
            .context(UnknownChunkSnafu {
                file: chunk.file,
                ordinal: chunk.ordinal,
            })?;
        flags.flag_mut(role).as_mut().context(MissingPartSnafu {
            file: chunk.file,
            ordinal: chunk.ordinal,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_text;
    use std::path::Path;

    fn chunks(exchanges: usize) -> Vec<Chunk> {
        let text: String = (0..exchanges)
            .map(|i| format!("[USER]\nq{i}\n[MODEL]\na{i}\n"))
            .collect();
        parse_text(&text, Path::new(".")).unwrap()
    }

    fn selection_with(files: &[usize]) -> (Selection, Vec<FileId>) {
        let mut selection = Selection::new();
        let ids = files
            .iter()
            .map(|&n| selection.add_file(&chunks(n)))
            .collect();
        (selection, ids)
    }

    fn triples(selection: &Selection) -> Vec<(usize, usize, Role)> {
        selection
            .materialize()
            .into_iter()
            .map(|i| (i.file.index(), i.ordinal, i.role))
            .collect()
    }

    #[test]
    fn new_files_are_fully_included_in_order() {
        let (selection, _) = selection_with(&[2, 1]);

        assert_eq!(
            triples(&selection),
            [
                (0, 0, Role::User),
                (0, 0, Role::Model),
                (0, 1, Role::User),
                (0, 1, Role::Model),
                (1, 0, Role::User),
                (1, 0, Role::Model),
            ]
        );
    }

    #[test]
    fn materialize_is_idempotent() {
        let (mut selection, ids) = selection_with(&[3, 2]);
        selection.toggle(ChunkRef::new(ids[0], 1), Role::Model).unwrap();
        selection.reorder(ids[1], 0).unwrap();

        assert_eq!(selection.materialize(), selection.materialize());
    }

    #[test]
    fn materialize_has_no_duplicates() {
        let (mut selection, ids) = selection_with(&[4, 4]);
        selection.select_from(ChunkRef::new(ids[0], 2)).unwrap();
        selection.select_from(ChunkRef::new(ids[0], 0)).unwrap();

        let all = selection.materialize();
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), unique.len());
        assert_eq!(all.len(), 16);
    }

    #[test]
    fn toggle_flips_one_part() {
        let (mut selection, ids) = selection_with(&[1]);
        let chunk = ChunkRef::new(ids[0], 0);

        selection.toggle(chunk, Role::User).unwrap();
        assert_eq!(triples(&selection), [(0, 0, Role::Model)]);
        assert!(!selection.is_included(chunk, Role::User).unwrap());

        selection.toggle(chunk, Role::User).unwrap();
        assert_eq!(triples(&selection).len(), 2);
    }

    #[test]
    fn toggle_rejects_absent_part() {
        let parsed = parse_text("[MODEL]\nhello", Path::new(".")).unwrap();
        let mut selection = Selection::new();
        let file = selection.add_file(&parsed);

        let err = selection
            .toggle(ChunkRef::new(file, 0), Role::User)
            .unwrap_err();
        assert!(matches!(err, SelectionError::MissingPart { .. }));
        assert_eq!(triples(&selection), [(0, 0, Role::Model)]);
    }

    #[test]
    fn toggle_rejects_unknown_chunk_and_file() {
        let (mut selection, ids) = selection_with(&[1]);
        let mut other = Selection::new();
        other.add_file(&chunks(1));
        let foreign = other.add_file(&chunks(1));

        assert!(matches!(
            selection.toggle(ChunkRef::new(ids[0], 5), Role::User),
            Err(SelectionError::UnknownChunk { ordinal: 5, .. })
        ));
        assert!(matches!(
            selection.toggle(ChunkRef::new(foreign, 0), Role::User),
            Err(SelectionError::UnknownFile { .. })
        ));
    }

    #[test]
    fn toggle_file_disables_and_reenables() {
        let (mut selection, ids) = selection_with(&[1, 1]);

        selection.toggle_file(ids[0]).unwrap();
        assert!(!selection.is_enabled(ids[0]).unwrap());
        assert!(triples(&selection).iter().all(|&(file, _, _)| file == 1));

        selection.toggle_file(ids[0]).unwrap();
        assert_eq!(triples(&selection).len(), 4);
    }

    #[test]
    fn reorder_moves_file() {
        let (mut selection, ids) = selection_with(&[1, 1, 1]);

        selection.reorder(ids[2], 0).unwrap();
        assert_eq!(selection.order(), [ids[2], ids[0], ids[1]]);

        selection.reorder(ids[2], 2).unwrap();
        assert_eq!(selection.order(), [ids[0], ids[1], ids[2]]);
        assert_eq!(selection.position(ids[1]), Some(1));

        let first = selection.materialize()[0];
        assert_eq!(first.file, ids[0]);
    }

    #[test]
    fn reorder_out_of_bounds_fails_and_keeps_order() {
        let (mut selection, ids) = selection_with(&[1, 1, 1]);
        let before = selection.order();

        for position in [3, 4, usize::MAX] {
            let err = selection.reorder(ids[0], position).unwrap_err();
            assert_eq!(
                err,
                SelectionError::InvalidPosition {
                    position,
                    file_count: 3
                }
            );
            assert_eq!(selection.order(), before);
        }
    }

    #[test]
    fn reorder_on_empty_selection_fails() {
        let mut selection = Selection::new();
        let mut other = Selection::new();
        let id = other.add_file(&chunks(1));

        assert!(matches!(
            selection.reorder(id, 0),
            Err(SelectionError::InvalidPosition { file_count: 0, .. })
        ));
    }

    #[test]
    fn select_from_includes_tail_and_keeps_head() {
        const M: usize = 5;
        for k in 0..M {
            let (mut selection, ids) = selection_with(&[M]);
            let file = ids[0];
            selection.deselect_all(file).unwrap();
            // Give the head a mixed state to check it survives.
            if k > 0 {
                selection
                    .set_included(ChunkRef::new(file, 0), Role::Model, true)
                    .unwrap();
            }
            let head_before: Vec<_> = (0..k)
                .map(|i| {
                    let chunk = ChunkRef::new(file, i);
                    (
                        selection.is_included(chunk, Role::User).unwrap(),
                        selection.is_included(chunk, Role::Model).unwrap(),
                    )
                })
                .collect();

            selection.select_from(ChunkRef::new(file, k)).unwrap();

            for (i, expected) in head_before.iter().enumerate() {
                let chunk = ChunkRef::new(file, i);
                let actual = (
                    selection.is_included(chunk, Role::User).unwrap(),
                    selection.is_included(chunk, Role::Model).unwrap(),
                );
                assert_eq!(&actual, expected, "head chunk {i} changed for k={k}");
            }
            for i in k..M {
                let chunk = ChunkRef::new(file, i);
                assert!(selection.is_included(chunk, Role::User).unwrap());
                assert!(selection.is_included(chunk, Role::Model).unwrap());
            }
        }
    }

    #[test]
    fn select_from_rejects_unknown_ordinal() {
        let (mut selection, ids) = selection_with(&[2]);
        assert!(matches!(
            selection.select_from(ChunkRef::new(ids[0], 2)),
            Err(SelectionError::UnknownChunk { ordinal: 2, .. })
        ));
    }

    #[test]
    fn deselect_all_empties_file() {
        let (mut selection, ids) = selection_with(&[3, 1]);
        selection.deselect_all(ids[0]).unwrap();

        assert_eq!(triples(&selection), [(1, 0, Role::User), (1, 0, Role::Model)]);
    }
}
