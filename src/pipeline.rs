// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Rendering units and merging them into the destination, in order.
//!
//! Every unit is rendered and appended on its own. A failed unit adds
//! nothing to the destination; units merged before it stay merged.

use crate::assembler::{RenderUnit, UnitLabel};
use crate::merge::{self, MergeError};
use crate::render::{RenderError, Renderer};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error type for a unit that could not be added to the destination.
#[derive(Debug, Snafu)]
pub enum PipelineError {
    /// The renderer failed for the unit.
    #[snafu(display("{label}: {source}"))]
    Render {
        /// The unit that failed.
        label: UnitLabel,
        /// The renderer error.
        source: RenderError,
    },

    /// The rendered PDF could not be merged.
    #[snafu(display("{label}: {source}"))]
    Merge {
        /// The unit that failed.
        label: UnitLabel,
        /// The merge error.
        source: MergeError,
    },
}

impl PipelineError {
    /// The unit the error belongs to.
    #[must_use]
    pub const fn label(&self) -> &UnitLabel {
        match self {
            Self::Render { label, .. } | Self::Merge { label, .. } => label,
        }
    }
}

/// A shareable cancellation request, checked between units.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Default)]
pub struct RunReport {
    /// Merged units with the number of pages each added.
    pub completed: Vec<(UnitLabel, usize)>,
    /// Units that failed.
    pub failures: Vec<PipelineError>,
    /// Units never started because of cancellation.
    pub cancelled: Vec<UnitLabel>,
}

impl RunReport {
    /// Total pages appended.
    #[must_use]
    pub fn pages(&self) -> usize {
        self.completed.iter().map(|(_, pages)| pages).sum()
    }

    /// Whether every unit was merged.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }
}

/// Renders units with `R` and appends them to one destination PDF.
#[derive(Debug)]
pub struct Pipeline<R> {
    renderer: R,
    destination: PathBuf,
}

impl<R: Renderer> Pipeline<R> {
    /// Creates a pipeline writing to `destination`.
    pub fn new(renderer: R, destination: impl Into<PathBuf>) -> Self {
        Self {
            renderer,
            destination: destination.into(),
        }
    }

    /// The destination PDF.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Renders and merges one unit, returning the pages it added.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] naming the unit if rendering or merging
    /// fails. The destination is then unchanged.
    pub fn process(&self, unit: &RenderUnit) -> Result<usize, PipelineError> {
        let label = &unit.label;
        let pdf = self
            .renderer
            .render(&unit.html)
            .context(RenderSnafu { label: label.clone() })?;
        let pages = merge::append_pages(&self.destination, &pdf)
            .context(MergeSnafu { label: label.clone() })?;
        log::info!("{label}: merged {pages} page(s)");
        Ok(pages)
    }

    /// Processes `units` in order.
    ///
    /// A failed unit is recorded and the run continues with the next one.
    /// `cancel` is checked before each unit; once set, the remaining units
    /// are reported as cancelled.
    pub fn run<'a, I>(&self, units: I, cancel: &CancelFlag) -> RunReport
    where
        I: IntoIterator<Item = &'a RenderUnit>,
    {
        let mut report = RunReport::default();
        for unit in units {
            if cancel.is_cancelled() {
                report.cancelled.push(unit.label.clone());
                continue;
            }
            match self.process(unit) {
                Ok(pages) => report.completed.push((unit.label.clone(), pages)),
                Err(err) => {
                    log::warn!("{err}");
                    report.failures.push(err);
                }
            }
        }
        report
    }
}
