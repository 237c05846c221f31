// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Command-line interface for chat2pdf.
//!
//! This binary provides the `chat2pdf` command for appending conversation
//! logs, page by page, to a PDF archive.

use chat2pdf::assembler::{self, RenderUnit};
use chat2pdf::batch::Batch;
use chat2pdf::config::{ArchiveConfig, ConfigError, Grouping, RecoveryMetadata};
use chat2pdf::mapping::{ImageMapping, MappingError};
use chat2pdf::parser::{self, Conversation, ConversationFile, Role};
use chat2pdf::pipeline::Pipeline;
use chat2pdf::render::ExternalRenderer;
use chat2pdf::selection::{ChunkRef, FileId, SelectionError};
use chat2pdf::worker::{RenderWorker, WorkerError, WorkerEvent};
use chrono::Local;
use lexopt::prelude::*;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Script run by `node` when no renderer arguments are given.
const DEFAULT_SCRIPT: &str = "scripts/generate_pdf.js";

/// Extensions picked up when walking input directories. Files without an
/// extension are picked up too.
const EXTENSIONS: [&str; 3] = ["txt", "md", "json"];

/// Excludes a whole chunk, or one part of it.
#[derive(Clone, Copy)]
struct Exclusion {
    ordinal: usize,
    role: Option<Role>,
}

/// Values that replace those from `--config`.
#[derive(Default)]
struct ConfigOverrides {
    platform: Option<String>,
    account: Option<String>,
    chat_link: Option<String>,
    notes: Option<String>,
    user_heading: Option<String>,
    model_heading: Option<String>,
    show_headings: Option<bool>,
    per_file: bool,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut ArchiveConfig) {
        let fields = [
            (&self.platform, &mut config.platform),
            (&self.account, &mut config.account),
            (&self.chat_link, &mut config.chat_link),
            (&self.notes, &mut config.extra_notes),
            (&self.user_heading, &mut config.custom_user_heading),
            (&self.model_heading, &mut config.custom_model_heading),
        ];
        for (value, field) in fields {
            if let Some(value) = value {
                field.clone_from(value);
            }
        }
        if let Some(show) = self.show_headings {
            config.show_headings = show;
        }
        if self.per_file {
            config.grouping = Grouping::PerFile;
        }
    }
}

struct Cli {
    input: Vec<PathBuf>,
    output: PathBuf,
    config: Option<PathBuf>,
    overrides: ConfigOverrides,
    metadata: Option<bool>,
    images: Vec<PathBuf>,
    from: Option<usize>,
    exclude: Vec<Exclusion>,
    renderer: Option<PathBuf>,
    renderer_args: Vec<String>,
    timeout: Option<Duration>,
    quiet: bool,
    dry_run: bool,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to parse arguments: {source}"))]
    ParseArgs { source: lexopt::Error },

    #[snafu(display("at least one input file or directory is required"))]
    NoInputFiles,

    #[snafu(display("{source}"))]
    LoadConfig { source: ConfigError },

    #[snafu(display("failed to load image mapping {}: {source}", path.display()))]
    LoadMapping {
        path: PathBuf,
        source: MappingError,
    },

    #[snafu(display("failed to read {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse {}: {source}", path.display()))]
    ParseFile {
        path: PathBuf,
        source: parser::ParseError,
    },

    #[snafu(display("no conversation could be parsed"))]
    NoConversations,

    #[snafu(display("failed to start render worker: {source}"))]
    StartWorker { source: std::io::Error },

    #[snafu(display("{source}"))]
    Worker { source: WorkerError },

    #[snafu(display("{count} file(s) or unit(s) failed"))]
    Incomplete { count: usize },
}

fn print_help() {
    println!(
        "\
{name} {version}
Archive chat conversation logs into a PDF

Usage: {name} [OPTIONS] -o <PDF> <INPUT>...

Arguments:
  <INPUT>...  Conversation files or directories containing them

Options:
  -o, --output <PDF>        Destination PDF (created if missing, otherwise appended to)
      --config <FILE>       JSON configuration (platform, account, chatLink, ...)
      --per-file            Render each file as one unit instead of one per chunk

Metadata (use --metadata or --no-metadata):
      --metadata            Add a recovery metadata page before each file
                            (default: on when more than one input file)
      --no-metadata         Never add metadata pages
      --platform <TEXT>     Chat platform
      --account <TEXT>      Account the chat belongs to
      --chat-link <URL>     Link to the original chat
      --notes <TEXT>        Extra notes

Headings (use --show-headings or --hide-headings):
      --show-headings       Print a heading above each part (default: on)
      --hide-headings       Omit part headings
      --user-heading <TEXT>   Heading for user parts (default: User Message)
      --model-heading <TEXT>  Heading for model parts (default: Model Response)

Selection:
      --from <N>            Include chunks N and later only
      --exclude <N[:PART]>  Exclude chunk N, or only its user or model part
      --images <FILE>       Supplementary image mapping (repeatable)

Rendering:
      --renderer <PROG>     Renderer program (default: node)
      --renderer-arg <ARG>  Renderer argument, repeatable (default: {script})
                            {{input}} and {{output}} expand to the handoff files
      --timeout <SECS>      Renderer timeout (default: 60)

Other options:
  -q, --quiet               Suppress progress messages
  -n, --dry-run             Show what would be rendered without rendering
  -h, --help                Print help
  -V, --version             Print version",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        script = DEFAULT_SCRIPT,
    );
}

fn parse_exclusion(value: &str) -> Result<Exclusion, lexopt::Error> {
    let (ordinal, role) = match value.split_once(':') {
        Some((ordinal, part)) => (ordinal, Some(part)),
        None => (value, None),
    };
    let ordinal = ordinal
        .trim()
        .parse()
        .map_err(|_| format!("invalid chunk number in --exclude {value}"))?;
    let role = match role.map(str::trim) {
        None => None,
        Some("user") => Some(Role::User),
        Some("model") => Some(Role::Model),
        Some(other) => return Err(format!("unknown part {other:?} in --exclude").into()),
    };
    Ok(Exclusion { ordinal, role })
}

fn parse_args() -> Result<Cli, lexopt::Error> {
    // Show help if no arguments provided
    if std::env::args().len() == 1 {
        print_help();
        std::process::exit(0);
    }

    let mut input = Vec::new();
    let mut output: Option<PathBuf> = None;
    let mut config = None;
    let mut overrides = ConfigOverrides::default();
    let mut metadata = None;
    let mut images = Vec::new();
    let mut from = None;
    let mut exclude = Vec::new();
    let mut renderer = None;
    let mut renderer_args = Vec::new();
    let mut timeout = None;
    let mut quiet = false;
    let mut dry_run = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Short('o') | Long("output") => output = Some(parser.value()?.parse()?),
            Long("config") => config = Some(parser.value()?.parse()?),
            Long("per-file") => overrides.per_file = true,
            // Show/hide flags - last one wins
            Long("metadata") => metadata = Some(true),
            Long("no-metadata") => metadata = Some(false),
            Long("show-headings") => overrides.show_headings = Some(true),
            Long("hide-headings") => overrides.show_headings = Some(false),
            Long("platform") => overrides.platform = Some(parser.value()?.string()?),
            Long("account") => overrides.account = Some(parser.value()?.string()?),
            Long("chat-link") => overrides.chat_link = Some(parser.value()?.string()?),
            Long("notes") => overrides.notes = Some(parser.value()?.string()?),
            Long("user-heading") => overrides.user_heading = Some(parser.value()?.string()?),
            Long("model-heading") => overrides.model_heading = Some(parser.value()?.string()?),
            Long("images") => images.push(parser.value()?.parse()?),
            Long("from") => {
                let val: usize = parser
                    .value()?
                    .parse()
                    .map_err(|_| "from must be a chunk number")?;
                from = Some(val);
            }
            Long("exclude") => exclude.push(parse_exclusion(&parser.value()?.string()?)?),
            Long("renderer") => renderer = Some(parser.value()?.parse()?),
            Long("renderer-arg") => renderer_args.push(parser.value()?.string()?),
            Long("timeout") => {
                let secs: u64 = parser
                    .value()?
                    .parse()
                    .map_err(|_| "timeout must be a number of seconds")?;
                if secs == 0 {
                    return Err("timeout must be at least 1 second".into());
                }
                timeout = Some(Duration::from_secs(secs));
            }
            Short('q') | Long("quiet") => quiet = true,
            Short('n') | Long("dry-run") => dry_run = true,
            Short('h') | Long("help") => {
                print_help();
                std::process::exit(0);
            }
            Short('V') | Long("version") => {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            Value(val) => input.push(val.parse()?),
            _ => return Err(arg.unexpected()),
        }
    }

    Ok(Cli {
        input,
        output: output.ok_or("missing required option: --output")?,
        config,
        overrides,
        metadata,
        images,
        from,
        exclude,
        renderer,
        renderer_args,
        timeout,
        quiet,
        dry_run,
    })
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let cli = parse_args().context(ParseArgsSnafu)?;

    ensure!(!cli.input.is_empty(), NoInputFilesSnafu);

    let config = load_config(&cli)?;
    let mapping = load_mappings(&cli.images)?;

    // Collect all input files first
    let files = collect_input_files(&cli.input, &cli.images);
    let with_metadata = cli.metadata.unwrap_or(files.len() > 1);
    let archived_at = Local::now();

    let mut batch = Batch::new();
    let mut failures = 0;
    for path in &files {
        match load_conversation(path, &mapping) {
            Ok(conversation) => {
                if !cli.quiet {
                    eprintln!(
                        "Parsed {} ({} chunk(s))",
                        path.display(),
                        conversation.chunks.len()
                    );
                }
                let metadata =
                    with_metadata.then(|| RecoveryMetadata::new(&config, path, archived_at));
                let id = batch.add(conversation, metadata);
                apply_chunk_filters(&mut batch, id, &cli);
            }
            Err(err) => {
                eprintln!("Skipping {err}");
                failures += 1;
            }
        }
    }
    ensure!(!batch.is_empty(), NoConversationsSnafu);

    let assembly = assembler::assemble(&batch, &config);
    if !cli.quiet {
        for warning in &assembly.warnings {
            eprintln!("Warning: {warning}");
        }
    }

    if cli.dry_run {
        for unit in &assembly.units {
            eprintln!("Would render {}", unit.label);
        }
        eprintln!(
            "Would append {} unit(s) to {}",
            assembly.units.len(),
            cli.output.display()
        );
        return Ok(());
    }

    if assembly.units.is_empty() {
        if !cli.quiet {
            eprintln!("Nothing selected; {} left unchanged", cli.output.display());
        }
    } else {
        failures += render_units(&cli, assembly.units)?;
    }

    ensure!(failures == 0, IncompleteSnafu { count: failures });
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ArchiveConfig, Error> {
    let mut config = match &cli.config {
        Some(path) => ArchiveConfig::load(path).context(LoadConfigSnafu)?,
        None => ArchiveConfig::default(),
    };
    cli.overrides.apply(&mut config);
    Ok(config)
}

fn load_mappings(paths: &[PathBuf]) -> Result<ImageMapping, Error> {
    let mut mapping = ImageMapping::default();
    for path in paths {
        mapping.extend(ImageMapping::load(path).context(LoadMappingSnafu { path })?);
    }
    Ok(mapping)
}

/// Collects conversation files from the given inputs (files and directories).
///
/// Directory entries are visited in file-name order. Mapping files passed
/// with `--images` are never treated as conversations.
fn collect_input_files(inputs: &[PathBuf], mappings: &[PathBuf]) -> Vec<PathBuf> {
    let mappings: Vec<PathBuf> = mappings.iter().filter_map(|p| p.canonicalize().ok()).collect();
    let is_mapping = |path: &Path| {
        path.canonicalize()
            .is_ok_and(|canonical| mappings.contains(&canonical))
    };

    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file() && is_conversation_file(e.path()))
                .filter(|e| !is_mapping(e.path()))
            {
                files.push(entry.path().to_path_buf());
            }
        } else {
            files.push(input.clone());
        }
    }
    files
}

fn is_conversation_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'));
    !hidden
        && path
            .extension()
            .is_none_or(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Reads and parses one file, then attaches mapped images.
fn load_conversation(path: &Path, mapping: &ImageMapping) -> Result<Conversation, Error> {
    let file = ConversationFile::read(path).context(ReadFileSnafu { path })?;
    let mut conversation = parser::parse_conversation(&file).context(ParseFileSnafu { path })?;
    if !mapping.is_empty() {
        let attached = mapping.apply(&mut conversation.chunks);
        log::debug!("attached {attached} mapped image(s) to {}", path.display());
    }
    Ok(conversation)
}

/// Applies `--from` and `--exclude` to a newly added file.
fn apply_chunk_filters(batch: &mut Batch, file: FileId, cli: &Cli) {
    let name = batch
        .conversation(file)
        .map(Conversation::display_name)
        .unwrap_or_default();
    let selection = batch.selection_mut();

    if let Some(from) = cli.from {
        let result = selection
            .deselect_all(file)
            .and_then(|()| selection.select_from(ChunkRef::new(file, from)));
        if let Err(err) = result {
            eprintln!("Warning: {name}: {err}; nothing selected");
        }
    }

    for exclusion in &cli.exclude {
        let chunk = ChunkRef::new(file, exclusion.ordinal);
        let roles = match exclusion.role {
            Some(role) => vec![role],
            None => vec![Role::User, Role::Model],
        };
        for role in roles {
            match selection.set_included(chunk, role, false) {
                Ok(()) => {}
                // Excluding a whole chunk skips whichever part it lacks.
                Err(SelectionError::MissingPart { .. }) if exclusion.role.is_none() => {}
                Err(err) => log::warn!("{name}: {err}"),
            }
        }
    }
}

/// Makes a relative path absolute so it survives the renderer's change of
/// working directory.
fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn build_renderer(cli: &Cli) -> ExternalRenderer {
    let program = match &cli.renderer {
        Some(program)
            if program.is_relative()
                && program.parent().is_some_and(|p| !p.as_os_str().is_empty()) =>
        {
            absolutize(program)
        }
        Some(program) => program.clone(),
        None => PathBuf::from("node"),
    };
    let args = if cli.renderer_args.is_empty() && cli.renderer.is_none() {
        vec![DEFAULT_SCRIPT.to_owned()]
    } else {
        cli.renderer_args.clone()
    };
    let args = args.into_iter().map(|arg| {
        let path = Path::new(&arg);
        if path.is_relative() && path.exists() {
            absolutize(path).display().to_string()
        } else {
            arg
        }
    });

    let renderer = ExternalRenderer::new(program).args(args);
    match cli.timeout {
        Some(timeout) => renderer.timeout(timeout),
        None => renderer,
    }
}

/// Renders units on the worker thread, reporting progress as events
/// arrive. Returns the number of units that did not make it.
fn render_units(cli: &Cli, units: Vec<RenderUnit>) -> Result<usize, Error> {
    let renderer = build_renderer(cli);
    if !cli.quiet {
        eprintln!(
            "Rendering {} unit(s) with {} into {}",
            units.len(),
            renderer.program().display(),
            cli.output.display()
        );
    }

    let worker =
        RenderWorker::spawn(Pipeline::new(renderer, &cli.output)).context(StartWorkerSnafu)?;
    let total = units.len();
    for unit in units {
        worker.submit(unit).context(WorkerSnafu)?;
    }

    let mut failures = 0;
    for _ in 0..total {
        let Ok(event) = worker.events().recv() else {
            break;
        };
        failures += report_event(&event, cli.quiet);
    }
    for event in worker.finish().context(WorkerSnafu)? {
        failures += report_event(&event, cli.quiet);
    }
    Ok(failures)
}

/// Prints one worker event; returns 1 if the unit was not merged.
fn report_event(event: &WorkerEvent, quiet: bool) -> usize {
    match event {
        WorkerEvent::Completed { label, pages } => {
            if !quiet {
                eprintln!("Merged {label} ({pages} page(s))");
            }
            0
        }
        WorkerEvent::Failed { error, .. } => {
            eprintln!("Failed {error}");
            1
        }
        WorkerEvent::Cancelled { label } => {
            eprintln!("Cancelled {label}");
            1
        }
    }
}
