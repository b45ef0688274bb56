//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use hashdb::core::config::Config;
use hashdb::core::errors::HdbError;
use hashdb::core::paths::{portable_string, relative_to};
use hashdb::database::store::{HashDatabase, UpdateReport, VerifyOptions, VerifyReport};
use hashdb::hashing::engine::{HashEngine, HashOutcome, VerifyOutcome};
use hashdb::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};
use hashdb::manifest::{self, ImportReport};

/// hashdb: record SHA-512 digests of a directory tree and detect changes.
#[derive(Debug, Parser)]
#[command(
    name = "hashdb",
    author,
    version,
    about = "File integrity database - track and verify SHA-512 digests of a directory tree",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Compute and report, but do not write anything.
    #[arg(short = 'n', long, global = true)]
    pretend: bool,
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Start directory (default: current directory).
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    directory: Option<PathBuf>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Create a database (or reuse the nearest one) and record every file.
    Init,
    /// Re-scan the tree and record additions, removals, and modifications.
    Update,
    /// Show what `update` would record without saving.
    Status,
    /// Import digests from sha512sum-style manifest files.
    Import(ImportArgs),
    /// Re-hash every tracked file and compare with the recorded digest.
    Verify(VerifyArgs),
    /// Extract the entries under a subdirectory into a database of its own.
    Split(SplitArgs),
    /// Write all recorded digests as a sha512sum-style manifest.
    Export,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ImportArgs {
    /// Manifest files to import (default: discover manifests under the start directory).
    manifests: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct VerifyArgs {
    /// Report each failure as soon as it is found.
    #[arg(long)]
    verbose_failures: bool,
    /// Refresh recorded size and mtime for files that verify.
    #[arg(long)]
    update_mtimes: bool,
}

#[derive(Debug, Clone, Args)]
struct SplitArgs {
    /// Subdirectory that becomes the root of the new database.
    subdir: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// Library failure, classified by its error code.
    #[error(transparent)]
    Core(#[from] HdbError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Core(err) if err.is_user_error() => 1,
            Self::Core(
                HdbError::Serialization { .. }
                | HdbError::MigrationGap { .. }
                | HdbError::UnsupportedVersion { .. },
            )
            | Self::Json(_) => 3,
            Self::Core(_) | Self::Io(_) => 2,
            Self::Partial(_) => 4,
        }
    }
}

/// Per-invocation state shared by every command.
struct Session {
    config: Config,
    config_hash: String,
    start: PathBuf,
    mode: OutputMode,
    pretend: bool,
    verbose: bool,
    quiet: bool,
    engine: HashEngine,
    log: JsonlWriter,
    started: Instant,
}

impl Session {
    fn new(cli: &Cli) -> Result<Self, CliError> {
        let config = Config::load(cli.config.as_deref())?;
        let config_hash = config.stable_hash()?;
        let start = match &cli.directory {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let mode = output_mode(cli);

        let mut engine = HashEngine::new(config.hashing.parallelism);
        if mode == OutputMode::Human && !cli.quiet && io::stderr().is_terminal() {
            engine = engine.with_progress(Arc::new(|done: usize, total: usize| {
                eprint!("\rProcessed {done}/{total} files");
                if done == total {
                    eprintln!();
                }
            }));
        }

        Ok(Self {
            log: JsonlWriter::from_config(&config.logging),
            config,
            config_hash,
            start,
            mode,
            pretend: cli.pretend,
            verbose: cli.verbose,
            quiet: cli.quiet,
            engine,
            started: Instant::now(),
        })
    }

    fn open(&mut self, create: bool) -> Result<HashDatabase, CliError> {
        let file_name = &self.config.database.file_name;
        let db = if create {
            HashDatabase::open(&self.start, file_name)?
        } else {
            HashDatabase::open_existing(&self.start, file_name)?
        };

        for migration in db.applied_migrations() {
            if self.verbose {
                eprintln!(
                    "[HDB] migrated {} from schema v{} to v{} ({})",
                    db.db_path().display(),
                    migration.from,
                    migration.to,
                    migration.name
                );
            }
            self.record(
                LogEntry::new(EventType::MigrationApplied, Severity::Info)
                    .with_root(db.root())
                    .with_details(format!(
                        "v{}->v{} {}",
                        migration.from, migration.to, migration.name
                    )),
            );
        }
        Ok(db)
    }

    fn save(&self, db: &HashDatabase) -> Result<bool, CliError> {
        if self.pretend {
            return Ok(false);
        }
        db.save()?;
        Ok(true)
    }

    fn record(&mut self, mut entry: LogEntry) {
        entry.duration_ms = Some(u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX));
        if entry.details.is_none() {
            entry.details = Some(format!("config_hash={}", self.config_hash));
        }
        self.log.write_entry(&entry);
    }

    fn scan_parallelism(&self) -> usize {
        self.config.scanner.parallelism
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    if let Command::Completions(args) = &cli.command {
        let mut command = Cli::command();
        let binary_name = command.get_name().to_string();
        generate(args.shell, &mut command, binary_name, &mut io::stdout());
        return Ok(());
    }

    let mut session = Session::new(cli)?;
    let result = match &cli.command {
        Command::Init => run_update(&mut session, "init"),
        Command::Update => run_update(&mut session, "update"),
        Command::Status => run_status(&mut session),
        Command::Import(args) => run_import(&mut session, args),
        Command::Verify(args) => run_verify(&mut session, args),
        Command::Split(args) => run_split(&mut session, args),
        Command::Export => run_export(&mut session),
        Command::Completions(_) => Ok(()),
    };

    if let Err(CliError::Core(err)) = &result {
        let entry = LogEntry::from_error(err).with_path(&session.start);
        session.record(entry);
    }
    result
}

fn run_update(session: &mut Session, command: &str) -> Result<(), CliError> {
    let mut db = session.open(command == "init")?;
    let root = db.root().to_path_buf();
    let report = db.update_observed(session.scan_parallelism(), &session.engine, |path, outcome| {
        report_hash_failure(&root, path, outcome);
    })?;
    let persisted = session.save(&db)?;

    let event = if command == "init" {
        EventType::DatabaseInit
    } else {
        EventType::DatabaseUpdate
    };
    log_update(session, event, &db, &report);
    print_update(session, command, &db, &report, persisted)?;
    partial_on_failures(&report)
}

fn run_status(session: &mut Session) -> Result<(), CliError> {
    let db = session.open(false)?;
    let report = db.status_observed(session.scan_parallelism(), &session.engine, |path, outcome| {
        report_hash_failure(db.root(), path, outcome);
    })?;
    print_update(session, "status", &db, &report, false)?;
    partial_on_failures(&report)
}

fn run_import(session: &mut Session, args: &ImportArgs) -> Result<(), CliError> {
    let mut db = session.open(true)?;
    let reports: Vec<ImportReport> = if args.manifests.is_empty() {
        manifest::import_tree(
            &mut db,
            &session.start,
            &session.config.manifest,
            session.scan_parallelism(),
        )?
    } else {
        let mut reports = Vec::with_capacity(args.manifests.len());
        for path in &args.manifests {
            let path = session.start.join(path);
            if !path.is_file() {
                return Err(CliError::User(format!(
                    "{} is not a manifest file",
                    path.display()
                )));
            }
            reports.push(manifest::import_manifest(&mut db, &path)?);
        }
        reports
    };
    let persisted = session.save(&db)?;

    for report in &reports {
        let mut entry = LogEntry::new(EventType::ManifestImport, Severity::Info)
            .with_path(&report.manifest)
            .with_root(db.root());
        entry.imported = Some(report.imported);
        entry.skipped = Some(report.skipped + report.outside_root);
        entry.ok = Some(true);
        session.record(entry);
    }

    match session.mode {
        OutputMode::Human => {
            if !session.quiet {
                if reports.is_empty() {
                    println!("No manifests found under {}", session.start.display());
                }
                for report in &reports {
                    println!(
                        "{}: {} imported, {} skipped{}",
                        display_relative(db.root(), &report.manifest),
                        report.imported.to_string().green(),
                        report.skipped,
                        if report.outside_root > 0 {
                            format!(", {} outside database root", report.outside_root)
                        } else {
                            String::new()
                        }
                    );
                    if session.verbose && report.missing_targets > 0 {
                        println!("  {} entries refer to missing files", report.missing_targets);
                    }
                }
                print_pretend_note(session, persisted);
            }
        }
        OutputMode::Json => {
            let manifests: Vec<Value> = reports
                .iter()
                .map(|r| {
                    json!({
                        "manifest": r.manifest.to_string_lossy(),
                        "imported": r.imported,
                        "skipped": r.skipped,
                        "outside_root": r.outside_root,
                        "missing_targets": r.missing_targets,
                    })
                })
                .collect();
            write_json_line(&json!({
                "command": "import",
                "root": db.root().to_string_lossy(),
                "entries": db.len(),
                "manifests": manifests,
                "persisted": persisted,
            }))?;
        }
    }
    Ok(())
}

fn run_verify(session: &mut Session, args: &VerifyArgs) -> Result<(), CliError> {
    let mut db = session.open(false)?;
    let root = db.root().to_path_buf();
    let verbose_failures = args.verbose_failures;
    let report = db.verify(
        &session.engine,
        VerifyOptions {
            update_mtimes: args.update_mtimes,
        },
        |path: &Path, outcome: &VerifyOutcome| {
            if !verbose_failures {
                return;
            }
            let rel = display_relative(&root, path);
            match outcome {
                VerifyOutcome::ContentMismatch { .. } => {
                    eprintln!("\r{rel} failed hash verification");
                }
                VerifyOutcome::Missing => eprintln!("\r{rel} is missing"),
                VerifyOutcome::Failed(err) => eprintln!("\r{rel}: {err}"),
                VerifyOutcome::Verified { .. } => {}
            }
        },
    );
    let persisted = if args.update_mtimes {
        session.save(&db)?
    } else {
        false
    };

    let mut entry = LogEntry::new(
        EventType::VerifyComplete,
        if report.is_clean() {
            Severity::Info
        } else {
            Severity::Warning
        },
    )
    .with_root(db.root());
    entry.verified = Some(report.verified);
    entry.modified = Some(report.modified.len());
    entry.removed = Some(report.removed.len());
    entry.failures = Some(report.failures.len());
    entry.ok = Some(report.is_clean());
    session.record(entry);
    log_failures(session, &report.failures);

    print_verify(session, &db, &report, persisted)?;
    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "verification failed: {} modified, {} missing, {} unreadable",
            report.modified.len(),
            report.removed.len(),
            report.failures.len()
        )))
    }
}

fn run_split(session: &mut Session, args: &SplitArgs) -> Result<(), CliError> {
    let db = session.open(false)?;
    let target = session.start.join(&args.subdir);
    let split = db.split(&target)?;
    let persisted = session.save(&split)?;

    let mut entry = LogEntry::new(EventType::DatabaseSplit, Severity::Info)
        .with_path(split.root())
        .with_root(db.root());
    entry.entries = Some(split.len());
    entry.ok = Some(true);
    session.record(entry);

    match session.mode {
        OutputMode::Human => {
            if !session.quiet {
                println!(
                    "Split {} entries into {}",
                    split.len().to_string().bold(),
                    split.db_path().display()
                );
                print_pretend_note(session, persisted);
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "split",
            "root": db.root().to_string_lossy(),
            "split_root": split.root().to_string_lossy(),
            "entries": split.len(),
            "persisted": persisted,
        }))?,
    }
    Ok(())
}

fn run_export(session: &mut Session) -> Result<(), CliError> {
    let db = session.open(false)?;
    let export_name = session.config.manifest.export_name.clone();
    let (path, written) = if session.pretend {
        let (_, count) = manifest::render_manifest(&db);
        (db.root().join(&export_name), count)
    } else {
        let report = manifest::export_manifest(&db, &export_name)?;
        (report.path, report.written)
    };
    let persisted = !session.pretend;

    let mut entry = LogEntry::new(EventType::ManifestExport, Severity::Info)
        .with_path(&path)
        .with_root(db.root());
    entry.entries = Some(written);
    entry.ok = Some(true);
    session.record(entry);

    match session.mode {
        OutputMode::Human => {
            if !session.quiet {
                println!("Wrote {written} digests to {}", path.display());
                print_pretend_note(session, persisted);
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "export",
            "path": path.to_string_lossy(),
            "entries": written,
            "persisted": persisted,
        }))?,
    }
    Ok(())
}

// ──────────────────── reporting ────────────────────

fn log_update(session: &mut Session, event: EventType, db: &HashDatabase, report: &UpdateReport) {
    let mut entry = LogEntry::new(
        event,
        if report.failures.is_empty() {
            Severity::Info
        } else {
            Severity::Warning
        },
    )
    .with_root(db.root());
    entry.added = Some(report.added.len());
    entry.removed = Some(report.removed.len());
    entry.modified = Some(report.modified.len());
    entry.touched = Some(report.touched.len());
    entry.failures = Some(report.failures.len());
    entry.entries = Some(db.len());
    entry.ok = Some(report.failures.is_empty());
    session.record(entry);
    log_failures(session, &report.failures);
}

fn log_failures(session: &mut Session, failures: &[(PathBuf, HdbError)]) {
    for (path, err) in failures {
        let mut entry = LogEntry::new(EventType::HashFailure, Severity::Warning).with_path(path);
        entry.ok = Some(false);
        entry.error_code = Some(err.code().to_string());
        entry.error_message = Some(err.to_string());
        session.record(entry);
    }
}

fn print_update(
    session: &Session,
    command: &str,
    db: &HashDatabase,
    report: &UpdateReport,
    persisted: bool,
) -> Result<(), CliError> {
    let root = db.root();
    for dir in &report.unreadable {
        eprintln!("[HDB] could not read directory {}", dir.display());
    }

    match session.mode {
        OutputMode::Human => {
            if session.quiet {
                return Ok(());
            }
            for path in &report.added {
                println!("{} {}", "added:   ".green(), display_relative(root, path));
            }
            for path in &report.removed {
                println!("{} {}", "removed: ".red(), display_relative(root, path));
            }
            for path in &report.modified {
                println!("{} {}", "modified:".yellow(), display_relative(root, path));
            }
            if session.verbose {
                for path in &report.touched {
                    println!("{} {}", "touched: ".dimmed(), display_relative(root, path));
                }
            }
            if report.has_changes() || session.verbose {
                println!(
                    "{} added, {} removed, {} modified ({} tracked)",
                    report.added.len(),
                    report.removed.len(),
                    report.modified.len(),
                    db.len()
                );
            } else {
                println!("No changes.");
            }
            if command != "status" {
                print_pretend_note(session, persisted);
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": command,
            "root": root.to_string_lossy(),
            "added": relative_list(root, report.added.iter()),
            "removed": relative_list(root, report.removed.iter()),
            "modified": relative_list(root, report.modified.iter()),
            "touched": relative_list(root, report.touched.iter()),
            "failures": failure_list(root, &report.failures),
            "unreadable": report.unreadable.iter().map(|p| p.to_string_lossy()).collect::<Vec<_>>(),
            "entries": db.len(),
            "persisted": persisted,
        }))?,
    }
    Ok(())
}

fn print_verify(
    session: &Session,
    db: &HashDatabase,
    report: &VerifyReport,
    persisted: bool,
) -> Result<(), CliError> {
    let root = db.root();
    match session.mode {
        OutputMode::Human => {
            if session.quiet {
                return Ok(());
            }
            for path in &report.modified {
                println!("{} {}", "modified:".red(), display_relative(root, path));
            }
            for path in &report.removed {
                println!("{} {}", "missing: ".red(), display_relative(root, path));
            }
            for (path, err) in &report.failures {
                println!("{} {}: {err}", "error:   ".red(), display_relative(root, path));
            }
            let summary = format!(
                "{} verified, {} modified, {} missing, {} errors",
                report.verified,
                report.modified.len(),
                report.removed.len(),
                report.failures.len()
            );
            if report.is_clean() {
                println!("{}", summary.green());
            } else {
                println!("{}", summary.red());
            }
            if persisted {
                println!("Refreshed recorded metadata.");
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "verify",
            "root": root.to_string_lossy(),
            "verified": report.verified,
            "modified": relative_list(root, report.modified.iter()),
            "removed": relative_list(root, report.removed.iter()),
            "failures": failure_list(root, &report.failures),
            "ok": report.is_clean(),
            "persisted": persisted,
        }))?,
    }
    Ok(())
}

/// Print a hash failure from the worker thread as soon as it happens.
fn report_hash_failure(root: &Path, path: &Path, outcome: &HashOutcome) {
    if let HashOutcome::Failed(err) = outcome {
        eprintln!("\r[HDB] {}: {err}", display_relative(root, path));
    }
}

fn print_pretend_note(session: &Session, persisted: bool) {
    if session.pretend && !persisted {
        println!("{}", "(pretend: nothing written)".dimmed());
    }
}

fn partial_on_failures(report: &UpdateReport) -> Result<(), CliError> {
    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "{} entries could not be hashed",
            report.failures.len()
        )))
    }
}

fn display_relative(root: &Path, path: &Path) -> String {
    relative_to(path, root).map_or_else(|| path.display().to_string(), portable_string)
}

fn relative_list<'a>(root: &Path, paths: impl Iterator<Item = &'a PathBuf>) -> Vec<String> {
    paths.map(|p| display_relative(root, p)).collect()
}

fn failure_list(root: &Path, failures: &[(PathBuf, HdbError)]) -> Vec<Value> {
    failures
        .iter()
        .map(|(path, err)| {
            json!({
                "path": display_relative(root, path),
                "error_code": err.code(),
                "error": err.to_string(),
            })
        })
        .collect()
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("HASHDB_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
