// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Appending rendered pages to the destination PDF.
//!
//! The destination is append-only: pages already in it are never touched
//! or reordered. Each append rewrites the whole file through a temporary
//! file in the same directory, so the destination is a complete PDF both
//! before and after every call.

use lopdf::{Document, Object, ObjectId};
use snafu::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guards against cyclic `Parent` links.
const MAX_TREE_DEPTH: usize = 32;

/// Error type for merge failures.
#[derive(Debug, Snafu)]
pub enum MergeError {
    /// The renderer output is not a readable PDF.
    #[snafu(display("failed to parse rendered PDF: {source}"))]
    ParseOutput {
        /// The underlying PDF error.
        source: lopdf::Error,
    },

    /// The renderer output has no pages.
    #[snafu(display("rendered PDF contains no pages"))]
    EmptyOutput,

    /// The existing destination could not be loaded.
    #[snafu(display("failed to load {}: {source}", path.display()))]
    LoadDestination {
        /// The destination path.
        path: PathBuf,
        /// The underlying PDF error.
        source: lopdf::Error,
    },

    /// The destination's page tree cannot take new pages.
    #[snafu(display("cannot append to {}: {source}", path.display()))]
    Incompatible {
        /// The destination path.
        path: PathBuf,
        /// The underlying PDF error.
        source: lopdf::Error,
    },

    /// The merged document could not be written.
    #[snafu(display("failed to write {}: {source}", path.display()))]
    Write {
        /// The destination path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Appends every page of `pdf` to the document at `destination`.
///
/// A missing destination is created from `pdf` as-is. Returns the number
/// of pages appended.
///
/// # Errors
///
/// Returns a [`MergeError`] if `pdf` is unreadable or empty, if the
/// destination cannot be loaded or extended, or if writing fails. The
/// destination is unchanged in every error case.
pub fn append_pages(destination: &Path, pdf: &[u8]) -> Result<usize, MergeError> {
    let incoming = Document::load_mem(pdf).context(ParseOutputSnafu)?;
    let added = incoming.get_pages().len();
    ensure!(added > 0, EmptyOutputSnafu);

    if !destination.exists() {
        write_atomically(destination, pdf)?;
        log::info!("created {} with {added} page(s)", destination.display());
        return Ok(added);
    }

    let mut document = Document::load(destination).context(LoadDestinationSnafu {
        path: destination,
    })?;
    append_document(&mut document, incoming).context(IncompatibleSnafu { path: destination })?;

    let mut bytes = Vec::new();
    document
        .save_to(&mut bytes)
        .map_err(|err| std::io::Error::other(err.to_string()))
        .context(WriteSnafu { path: destination })?;
    write_atomically(destination, &bytes)?;

    log::info!("appended {added} page(s) to {}", destination.display());
    Ok(added)
}

/// Counts the pages of the PDF at `path`.
///
/// # Errors
///
/// Returns [`MergeError::LoadDestination`] if the file cannot be loaded.
pub fn page_count(path: &Path) -> Result<usize, MergeError> {
    let document = Document::load(path).context(LoadDestinationSnafu { path })?;
    Ok(document.get_pages().len())
}

/// Moves the pages of `extra` to the end of `base`'s page tree.
fn append_document(base: &mut Document, mut extra: Document) -> Result<usize, lopdf::Error> {
    let root_pages = root_pages_id(base)?;
    extra.renumber_objects_with(base.max_id + 1);

    let mut page_ids = Vec::new();
    for page_id in extra.get_pages().into_values() {
        let inherited = inherited_attributes(&extra, page_id);
        let page = extra.get_object_mut(page_id)?.as_dict_mut()?;
        for (key, value) in inherited {
            page.set(key, value);
        }
        page.set("Parent", root_pages);
        page_ids.push(page_id);
    }

    let max_id = extra.max_id;
    for (id, object) in extra.objects {
        if !is_tree_node(&object) {
            base.objects.insert(id, object);
        }
    }
    base.max_id = base.max_id.max(max_id);

    let pages = base.get_object_mut(root_pages)?.as_dict_mut()?;
    pages
        .get_mut(b"Kids")?
        .as_array_mut()?
        .extend(page_ids.iter().map(|&id| Object::Reference(id)));
    let count = pages.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
    let added = i64::try_from(page_ids.len()).unwrap_or(i64::MAX);
    pages.set("Count", count.saturating_add(added));

    Ok(page_ids.len())
}

fn root_pages_id(document: &Document) -> Result<ObjectId, lopdf::Error> {
    let catalog_id = document.trailer.get(b"Root")?.as_reference()?;
    document
        .get_dictionary(catalog_id)?
        .get(b"Pages")?
        .as_reference()
}

/// The catalog and page tree nodes of an appended document are replaced by
/// the destination's own.
fn is_tree_node(object: &Object) -> bool {
    let Object::Dictionary(dict) = object else {
        return false;
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Catalog" | b"Pages")
    )
}

/// Attributes `page_id` inherits and does not set itself, nearest ancestor
/// first.
fn inherited_attributes(document: &Document, page_id: ObjectId) -> Vec<(&'static [u8], Object)> {
    let mut found = Vec::new();
    let Ok(page) = document.get_dictionary(page_id) else {
        return found;
    };
    let mut missing: Vec<&'static [u8]> = INHERITABLE
        .iter()
        .copied()
        .filter(|key| !page.has(key))
        .collect();

    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(node_id) = parent {
        if missing.is_empty() || depth >= MAX_TREE_DEPTH {
            break;
        }
        let Ok(node) = document.get_dictionary(node_id) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                found.push((*key, value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }
    found
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), MergeError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir).context(WriteSnafu { path })?;
    file.write_all(bytes).context(WriteSnafu { path })?;
    file.flush().context(WriteSnafu { path })?;
    file.persist(path)
        .map_err(|err| err.error)
        .context(WriteSnafu { path })?;
    Ok(())
}
