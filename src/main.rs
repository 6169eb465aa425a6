//! rulescan: compile pattern rules and scan files with them.
//!
//! This is the main entry point for the CLI application.

use anyhow::Context;
use rulescan::compiler::{Compiler, CompilerOptions};
use rulescan::core::config::Config;
use rulescan::core::error::{Diagnostic, Error, Result};
use rulescan::core::types::Rule;
use rulescan::rules::RuleSet;
use rulescan::runtime::Runtime;
use rulescan::scanner::{CallbackStatus, ScanOptions, ScanSummary};
use rulescan::ui::cli::{Cli, Commands, ConfigAction, OutputFormat, RuleSource};
use rulescan::utils::logging::{init_logging, LogConfig};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use walkdir::WalkDir;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            for diagnostic in e.diagnostics() {
                eprintln!("  {}", diagnostic);
            }
            if let Some(hint) = e.suggestion() {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::from_config(&config)
    };
    init_logging(log_config)?;
    config.validate()?;
    log::debug!("rulescan v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Commands::Compile {
            rules,
            namespace,
            output,
        }) => {
            let namespace =
                namespace.unwrap_or_else(|| config.compiler.default_namespace.clone());
            run_compile(&config, &rules, &namespace, &output, cli.format)
        }
        Some(Commands::Scan {
            rules,
            compiled,
            targets,
            recursive,
            fast,
            timeout,
            first_match,
            tag,
        }) => {
            let mut options = ScanOptions::from_config(&config.scan);
            if fast {
                options = options.with_fast_mode(true);
            }
            if let Some(secs) = timeout {
                options = options.with_timeout(Duration::from_secs(secs));
            }
            let request = ScanRequest {
                rules,
                compiled,
                targets,
                recursive,
                first_match,
                tag,
                options,
            };
            run_scan(&config, request, cli.format)
        }
        Some(Commands::Check { rules }) => run_check(&config, &rules, cli.format),
        Some(Commands::Config { action }) => run_config(action, &config, cli.config.as_deref()),
        Some(Commands::Info) => run_info(&config, cli.config.as_deref()),
        None => {
            println!("rulescan - compile pattern rules and scan files with them");
            println!();
            println!("Use --help for usage information");
            println!();
            println!("Quick start:");
            println!("  rulescan check rules.yar                 Validate rule files");
            println!("  rulescan compile rules.yar -o rules.bin  Save compiled rules");
            println!("  rulescan scan -c rules.bin -R ./samples  Scan a directory");
            Ok(())
        }
    }
}

/// Write `value` as pretty JSON followed by a newline.
fn write_json<W: Write, T: Serialize + ?Sized>(mut out: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, value).context("failed to write JSON output")?;
    writeln!(out).context("failed to write JSON output")?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    write_json(io::stdout().lock(), value)
}

/// Compile every rule file argument into one session.
fn compile_sources(
    runtime: &Runtime,
    config: &Config,
    args: &[String],
    namespace: &str,
) -> Result<Compiler> {
    let mut compiler =
        Compiler::new(runtime)?.with_options(CompilerOptions::from(&config.compiler));
    for arg in args {
        let source = RuleSource::parse(arg, namespace)?;
        log::info!("Compiling {} [{}]", source.path.display(), source.namespace);
        compiler.add_file(&source.namespace, &source.path)?;
    }
    Ok(compiler)
}

#[derive(Serialize)]
struct CompileReport<'a> {
    output: Option<&'a Path>,
    sources: usize,
    namespaces: &'a [String],
    warnings: &'a [Diagnostic],
}

fn print_compile_report(report: &CompileReport<'_>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Text => {
            for warning in report.warnings {
                println!("{}", warning);
            }
            match report.output {
                Some(output) => println!(
                    "Compiled {} file(s) into {}",
                    report.sources,
                    output.display()
                ),
                None => println!("{} file(s) OK", report.sources),
            }
            println!("Namespaces:      {}", report.namespaces.join(", "));
            println!("Warnings:        {}", report.warnings.len());
        }
    }
    Ok(())
}

/// Compile rule files and save the result.
fn run_compile(
    config: &Config,
    args: &[String],
    namespace: &str,
    output: &Path,
    format: OutputFormat,
) -> Result<()> {
    let runtime = Runtime::initialize()?;
    let compiler = compile_sources(&runtime, config, args, namespace)?;
    let sources = compiler.sources();
    let namespaces = compiler.namespaces().to_vec();
    let warnings = compiler.warnings().to_vec();

    let rules = compiler.rules()?;
    rules.save(output)?;
    rules.destroy()?;

    print_compile_report(
        &CompileReport {
            output: Some(output),
            sources,
            namespaces: &namespaces,
            warnings: &warnings,
        },
        format,
    )?;
    runtime.finalize()
}

/// Compile rule files and report diagnostics only.
fn run_check(config: &Config, args: &[String], format: OutputFormat) -> Result<()> {
    let runtime = Runtime::initialize()?;
    let namespace = config.compiler.default_namespace.as_str();
    let compiler = compile_sources(&runtime, config, args, namespace)?;

    print_compile_report(
        &CompileReport {
            output: None,
            sources: compiler.sources(),
            namespaces: compiler.namespaces(),
            warnings: compiler.warnings(),
        },
        format,
    )?;
    compiler.rules()?.destroy()?;
    runtime.finalize()
}

struct ScanRequest {
    rules: Vec<String>,
    compiled: Option<PathBuf>,
    targets: Vec<PathBuf>,
    recursive: bool,
    first_match: bool,
    tag: Option<String>,
    options: ScanOptions,
}

#[derive(Debug, Serialize)]
struct FileReport {
    path: PathBuf,
    matches: Vec<Rule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct ScanReport {
    files_scanned: usize,
    files_matched: usize,
    files_skipped: usize,
    errors: usize,
    files: Vec<FileReport>,
}

impl ScanReport {
    /// Account for the outcome of scanning one file.
    ///
    /// Per-file failures are recorded and counted; any other error stops
    /// the run.
    fn record(
        &mut self,
        path: PathBuf,
        matches: Vec<Rule>,
        result: Result<ScanSummary>,
    ) -> Result<()> {
        let error = match result {
            Ok(_) => {
                self.files_scanned += 1;
                None
            }
            Err(e @ (Error::ScanTimeout | Error::FileRead { .. } | Error::Engine { .. })) => {
                log::warn!("Failed to scan {}: {}", path.display(), e);
                self.errors += 1;
                Some(e.to_string())
            }
            Err(e) => return Err(e),
        };
        if !matches.is_empty() {
            self.files_matched += 1;
        }
        if !matches.is_empty() || error.is_some() {
            self.files.push(FileReport {
                path,
                matches,
                error,
            });
        }
        Ok(())
    }
}

/// Expand targets into the files to scan.
fn collect_files(config: &Config, request: &ScanRequest, report: &mut ScanReport) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let max_size = config.scan.max_file_size();

    for target in &request.targets {
        let mut walker = WalkDir::new(target).follow_links(config.scan.follow_symlinks);
        if !request.recursive {
            walker = walker.max_depth(1);
        }

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Cannot access {}: {}", target.display(), e);
                    report.errors += 1;
                    report.files.push(FileReport {
                        path: e.path().unwrap_or(target.as_path()).to_path_buf(),
                        matches: Vec::new(),
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) if metadata.len() > max_size => {
                    log::debug!("Skipping large file: {}", entry.path().display());
                    report.files_skipped += 1;
                }
                _ => files.push(entry.into_path()),
            }
        }
    }
    files
}

/// Scan files with compiled or freshly compiled rules.
fn run_scan(config: &Config, request: ScanRequest, format: OutputFormat) -> Result<()> {
    let runtime = Runtime::initialize()?;
    let rules = match &request.compiled {
        Some(path) => RuleSet::load(&runtime, path)?,
        None => {
            let namespace = config.compiler.default_namespace.as_str();
            compile_sources(&runtime, config, &request.rules, namespace)?.rules()?
        }
    };

    let mut report = ScanReport::default();
    let files = collect_files(config, &request, &mut report);
    log::info!("Scanning {} file(s)", files.len());

    for path in files {
        let mut matches = Vec::new();
        let result = rules.scan_file_with(&path, &request.options, |rule| {
            if let Some(tag) = &request.tag {
                if !rule.has_tag(tag) {
                    return CallbackStatus::Continue;
                }
            }
            matches.push(rule.clone());
            if request.first_match {
                CallbackStatus::Abort
            } else {
                CallbackStatus::Continue
            }
        });

        report.record(path, matches, result)?;
    }

    print_scan_report(&report, format)?;
    rules.destroy()?;
    runtime.finalize()
}

fn print_scan_report(report: &ScanReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Text => {
            for file in &report.files {
                for rule in &file.matches {
                    println!("{} {}", rule, file.path.display());
                }
                if let Some(error) = &file.error {
                    println!("error: {}: {}", file.path.display(), error);
                }
            }
            println!();
            println!("=== Scan Complete ===");
            println!("Files Scanned:   {}", report.files_scanned);
            println!("Files Matched:   {}", report.files_matched);
            println!("Files Skipped:   {}", report.files_skipped);
            println!("Errors:          {}", report.errors);
        }
    }
    Ok(())
}

/// Handle configuration commands.
fn run_config(action: ConfigAction, config: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.map_or_else(Config::default_config_path, Path::to_path_buf);
    match action {
        ConfigAction::Show => {
            print_json(config)?;
        }
        ConfigAction::Reset { yes } => {
            if !yes && path.exists() {
                println!("This overwrites {}; pass --yes to confirm.", path.display());
                return Ok(());
            }
            log::info!("Resetting configuration to defaults...");
            Config::default().save(&path)?;
            println!("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// Show application information.
fn run_info(config: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.map_or_else(Config::default_config_path, Path::to_path_buf);
    println!("rulescan - compile pattern rules and scan files with them");
    println!();
    println!("Version:          {}", env!("CARGO_PKG_VERSION"));
    println!("Engine:           libyara");
    println!("Config Path:      {}", path.display());
    println!();
    println!("Compiler Settings:");
    println!("  Namespace:      {}", config.compiler.default_namespace);
    println!("  Strict:         {}", config.compiler.fail_on_warnings);
    println!();
    println!("Scan Settings:");
    println!("  Fast Mode:      {}", config.scan.fast_mode);
    println!("  Timeout:        {} s", config.scan.timeout_secs);
    println!("  Max File Size:  {} MB", config.scan.max_file_size_mb);
    println!("  Follow Links:   {}", config.scan.follow_symlinks);
    Ok(())
}
