// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Archive chat conversation logs into styled PDF documents.
//!
//! This crate parses loosely structured conversation files into discrete
//! exchanges, lets a caller choose which exchanges (and which side of
//! each) to keep, and renders the selection page by page into a PDF that
//! only ever grows.
//!
//! # Overview
//!
//! 1. [`parser`] turns `[USER]`/`[MODEL]` marker text or an AI Studio JSON
//!    export into ordered [`parser::Chunk`]s
//! 2. [`selection`] records inclusion flags and file order
//! 3. [`assembler`] converts the materialized selection into HTML
//!    [`assembler::RenderUnit`]s
//! 4. [`pipeline`] renders each unit with a [`render::Renderer`] and
//!    appends the pages to the destination through [`merge`]
//!
//! [`worker`] runs step 4 on a background thread.
//!
//! # Example
//!
//! ```no_run
//! use chat2pdf::assembler::assemble;
//! use chat2pdf::batch::Batch;
//! use chat2pdf::config::ArchiveConfig;
//! use chat2pdf::parser::{ConversationFile, parse_conversation};
//! use chat2pdf::pipeline::{CancelFlag, Pipeline};
//! use chat2pdf::render::ExternalRenderer;
//!
//! let file = ConversationFile::read("chat.txt").unwrap();
//! let mut batch = Batch::new();
//! batch.add(parse_conversation(&file).unwrap(), None);
//!
//! let assembly = assemble(&batch, &ArchiveConfig::default());
//! let pipeline = Pipeline::new(
//!     ExternalRenderer::node_script("scripts/generate_pdf.js"),
//!     "archive.pdf",
//! );
//! let report = pipeline.run(&assembly.units, &CancelFlag::new());
//! println!("{} page(s) appended", report.pages());
//! ```
//!
//! # Modules
//!
//! - [`parser`]: data model and marker-format parsing
//! - [`studio`]: AI Studio JSON exports
//! - [`images`]: image references and their resolution
//! - [`mapping`]: supplementary snippet → image mappings
//! - [`selection`]: inclusion flags, file order, materialization
//! - [`batch`]: parsed conversations plus their selection
//! - [`config`]: archive options and recovery metadata
//! - [`assembler`]: HTML generation
//! - [`render`]: the renderer interface and the external process renderer
//! - [`merge`]: appending pages to the destination PDF
//! - [`pipeline`]: ordered render + merge with per-unit errors
//! - [`worker`]: background render queue

#![deny(missing_docs)]

pub mod assembler;
pub mod batch;
pub mod config;
pub mod images;
pub mod mapping;
pub mod merge;
pub mod parser;
pub mod pipeline;
pub mod render;
pub mod selection;
pub mod studio;
pub mod worker;
