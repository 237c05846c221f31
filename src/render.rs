// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! HTML → PDF rendering through an external process.
//!
//! [`ExternalRenderer`] hands a document to a separate program using a
//! fixed file handoff:
//!
//! 1. a fresh temporary directory is created for the call
//! 2. the HTML is written there as [`INPUT_FILE_NAME`]
//! 3. the program runs with that directory as its working directory
//! 4. once it exits successfully, [`OUTPUT_FILE_NAME`] is read back
//!
//! The directory and everything in it is removed when the call returns,
//! whether it succeeded or not. A program still running after the timeout
//! is killed.
//!
//! The bundled `scripts/generate_pdf.js` is such a program: it loads the
//! HTML in headless Chromium, waits for the network to go idle so web
//! fonts are in place, and prints an A4 PDF.

use snafu::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Name of the HTML file the renderer reads.
pub const INPUT_FILE_NAME: &str = "_temp.html";

/// Name of the PDF file the renderer must produce.
pub const OUTPUT_FILE_NAME: &str = "_temp_page.pdf";

const STDERR_FILE_NAME: &str = "_renderer.log";

/// How long a render may take by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Error type for renderer failures.
#[derive(Debug, Snafu)]
pub enum RenderError {
    /// The temporary working directory could not be prepared.
    #[snafu(display("failed to prepare renderer working directory: {source}"))]
    WorkDir {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The HTML input could not be written.
    #[snafu(display("failed to write renderer input {}: {source}", path.display()))]
    WriteInput {
        /// The input file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The renderer process could not be started.
    #[snafu(display("failed to start renderer {}: {source}", program.display()))]
    Spawn {
        /// The program that was run.
        program: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Waiting on the renderer process failed.
    #[snafu(display("failed to wait for renderer: {source}"))]
    Wait {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The renderer exited unsuccessfully.
    #[snafu(display("renderer {} exited with {status}{}", program.display(), stderr_suffix(stderr)))]
    Exited {
        /// The program that was run.
        program: PathBuf,
        /// Its exit status.
        status: ExitStatus,
        /// The last lines it wrote to stderr.
        stderr: String,
    },

    /// The renderer did not finish in time and was killed.
    #[snafu(display("renderer {} timed out after {}s", program.display(), timeout.as_secs_f32()))]
    Timeout {
        /// The program that was run.
        program: PathBuf,
        /// The limit that was exceeded.
        timeout: Duration,
    },

    /// The renderer exited successfully without producing a PDF.
    #[snafu(display("renderer {} produced no {OUTPUT_FILE_NAME}", program.display()))]
    MissingOutput {
        /// The program that was run.
        program: PathBuf,
    },

    /// The produced PDF could not be read.
    #[snafu(display("failed to read renderer output: {source}"))]
    ReadOutput {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Converts one HTML document into PDF bytes.
pub trait Renderer {
    /// Renders `html` and returns the resulting PDF.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`] if no PDF could be produced.
    fn render(&self, html: &str) -> Result<Vec<u8>, RenderError>;
}

impl<R: Renderer + ?Sized> Renderer for &R {
    fn render(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        (**self).render(html)
    }
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        (**self).render(html)
    }
}

/// Runs an external program for every render.
///
/// Arguments may contain `{input}` and `{output}`, which are replaced with
/// the absolute paths of the handoff files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRenderer {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    work_root: Option<PathBuf>,
}

impl ExternalRenderer {
    /// A renderer that runs `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            work_root: None,
        }
    }

    /// `node <script>`, the Puppeteer setup.
    pub fn node_script(script: impl AsRef<Path>) -> Self {
        Self::new("node").arg(script.as_ref().display().to_string())
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets how long a single render may run.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates the per-call directories under `root` instead of the
    /// system temporary directory.
    #[must_use]
    pub fn work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// The program being run.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn work_dir(&self) -> Result<TempDir, RenderError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("chat2pdf-");
        let dir = match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.context(WorkDirSnafu)
    }

    fn wait_bounded(&self, child: &mut Child) -> Result<ExitStatus, RenderError> {
        // A timeout too large to represent means no deadline.
        let deadline = Instant::now().checked_add(self.timeout);
        loop {
            if let Some(status) = child.try_wait().context(WaitSnafu)? {
                return Ok(status);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                if let Err(err) = child.kill() {
                    log::debug!("failed to kill renderer: {err}");
                }
                if let Err(err) = child.wait() {
                    log::debug!("failed to reap renderer: {err}");
                }
                return TimeoutSnafu {
                    program: &self.program,
                    timeout: self.timeout,
                }
                .fail();
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Renderer for ExternalRenderer {
    fn render(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let work_dir = self.work_dir()?;
        let input = work_dir.path().join(INPUT_FILE_NAME);
        let output = work_dir.path().join(OUTPUT_FILE_NAME);
        let stderr_path = work_dir.path().join(STDERR_FILE_NAME);

        fs::write(&input, html).context(WriteInputSnafu { path: &input })?;
        let stderr = File::create(&stderr_path).context(WorkDirSnafu)?;

        let args = self.args.iter().map(|arg| {
            arg.replace("{input}", &input.display().to_string())
                .replace("{output}", &output.display().to_string())
        });

        log::debug!(
            "running {} in {}",
            self.program.display(),
            work_dir.path().display()
        );
        let mut child = Command::new(&self.program)
            .args(args)
            .current_dir(work_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .context(SpawnSnafu {
                program: &self.program,
            })?;

        let status = self.wait_bounded(&mut child)?;
        ensure!(
            status.success(),
            ExitedSnafu {
                program: &self.program,
                status,
                stderr: stderr_tail(&stderr_path),
            }
        );
        ensure!(
            output.is_file(),
            MissingOutputSnafu {
                program: &self.program
            }
        );

        let pdf = fs::read(&output).context(ReadOutputSnafu)?;
        log::debug!("renderer produced {} bytes", pdf.len());
        Ok(pdf)
    }
}

/// The last few non-empty lines of the renderer's stderr, joined.
fn stderr_tail(path: &Path) -> String {
    let Ok(text) = fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines[lines.len().saturating_sub(3)..].join(" | ")
}
