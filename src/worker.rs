// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! A single background thread that works through the render queue.
//!
//! Units are processed strictly in submission order and one event is
//! emitted per unit, in the same order. Cancellation takes effect before
//! the next unit starts; a unit already handed to the renderer runs to
//! completion.

use crate::assembler::{RenderUnit, UnitLabel};
use crate::pipeline::{CancelFlag, Pipeline, PipelineError};
use crate::render::Renderer;
use snafu::prelude::*;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Error type for queue operations.
#[derive(Debug, Snafu)]
pub enum WorkerError {
    /// The queue was closed or the thread has exited.
    #[snafu(display("render worker is no longer accepting units"))]
    Stopped,

    /// The worker thread panicked.
    #[snafu(display("render worker panicked"))]
    Panicked,
}

/// Outcome of one submitted unit.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The unit was merged.
    Completed {
        /// The unit.
        label: UnitLabel,
        /// Pages appended.
        pages: usize,
    },
    /// The unit failed and contributed nothing.
    Failed {
        /// The unit.
        label: UnitLabel,
        /// Why it failed.
        error: PipelineError,
    },
    /// The unit was skipped after cancellation.
    Cancelled {
        /// The unit.
        label: UnitLabel,
    },
}

impl WorkerEvent {
    /// The unit the event is about.
    #[must_use]
    pub const fn label(&self) -> &UnitLabel {
        match self {
            Self::Completed { label, .. }
            | Self::Failed { label, .. }
            | Self::Cancelled { label } => label,
        }
    }
}

/// Owns a [`Pipeline`] on a background thread and feeds it units.
#[derive(Debug)]
pub struct RenderWorker {
    queue: Option<Sender<RenderUnit>>,
    events: Receiver<WorkerEvent>,
    cancel: CancelFlag,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread cannot be spawned.
    pub fn spawn<R>(pipeline: Pipeline<R>) -> std::io::Result<Self>
    where
        R: Renderer + Send + 'static,
    {
        let (queue, inbox) = mpsc::channel::<RenderUnit>();
        let (outbox, events) = mpsc::channel();
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("chat2pdf-render".into())
            .spawn(move || {
                for unit in inbox {
                    let label = unit.label.clone();
                    let event = if worker_cancel.is_cancelled() {
                        log::debug!("{label}: cancelled");
                        WorkerEvent::Cancelled { label }
                    } else {
                        match pipeline.process(&unit) {
                            Ok(pages) => WorkerEvent::Completed { label, pages },
                            Err(error) => {
                                log::warn!("{error}");
                                WorkerEvent::Failed { label, error }
                            }
                        }
                    };
                    // Keep merging even if nobody is listening any more.
                    let _ = outbox.send(event);
                }
            })?;

        Ok(Self {
            queue: Some(queue),
            events,
            cancel,
            handle: Some(handle),
        })
    }

    /// Queues a unit behind those already submitted.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Stopped`] after [`RenderWorker::close`] or if
    /// the thread has exited.
    pub fn submit(&self, unit: RenderUnit) -> Result<(), WorkerError> {
        let queue = self.queue.as_ref().context(StoppedSnafu)?;
        queue.send(unit).ok().context(StoppedSnafu)
    }

    /// Skips every unit not yet started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that cancels this worker, e.g. from a signal handler.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Events in submission order.
    #[must_use]
    pub const fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    /// Stops accepting units. Queued units are still processed.
    pub fn close(&mut self) {
        self.queue = None;
    }

    /// Closes the queue, waits for the thread, and returns the events not
    /// yet received.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Panicked`] if the thread panicked.
    pub fn finish(mut self) -> Result<Vec<WorkerEvent>, WorkerError> {
        self.close();
        if let Some(handle) = self.handle.take() {
            handle.join().ok().context(PanickedSnafu)?;
        }
        Ok(self.events.try_iter().collect())
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.close();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("render worker panicked");
        }
    }
}
