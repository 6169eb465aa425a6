//! Command-line interface definition.

use crate::core::error::{Error, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rulescan: compile pattern rules and scan files with them
#[derive(Parser, Debug)]
#[command(name = "rulescan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Use this configuration file instead of the default one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine processing
    Json,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile rule files into a saved rule set
    Compile {
        /// Rule files, optionally prefixed with a namespace (NS:PATH)
        #[arg(required = true)]
        rules: Vec<String>,

        /// Namespace for files given without one
        #[arg(short, long)]
        namespace: Option<String>,

        /// Where to write the compiled rules
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Scan files or directories
    Scan {
        /// Rule source files to compile before scanning (NS:PATH allowed)
        #[arg(short, long, required_unless_present = "compiled", conflicts_with = "compiled")]
        rules: Vec<String>,

        /// Previously compiled rule set
        #[arg(short, long)]
        compiled: Option<PathBuf>,

        /// Files or directories to scan
        #[arg(required = true)]
        targets: Vec<PathBuf>,

        /// Descend into directories
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Stop matching a string after its first occurrence
        #[arg(long)]
        fast: bool,

        /// Abort a scan after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Report only the first match per target
        #[arg(long)]
        first_match: bool,

        /// Only report rules carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Compile rule files and report diagnostics without saving
    Check {
        /// Rule files, optionally prefixed with a namespace (NS:PATH)
        #[arg(required = true)]
        rules: Vec<String>,
    },

    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show application information
    Info,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Print configuration file location
    Path,
}

/// One rule file argument, split into its namespace and path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSource {
    pub namespace: String,
    pub path: PathBuf,
}

impl RuleSource {
    /// Parse `NS:PATH` or `PATH`; the latter uses `default_namespace`.
    ///
    /// A prefix is only taken as a namespace when it is not a Windows drive
    /// letter and the remainder is non-empty.
    pub fn parse(arg: &str, default_namespace: &str) -> Result<Self> {
        if arg.is_empty() {
            return Err(Error::invalid_argument("empty rule file argument"));
        }
        if let Some((namespace, path)) = arg.split_once(':') {
            let drive_letter =
                namespace.len() == 1 && (path.starts_with('\\') || path.starts_with('/'));
            if !drive_letter && !namespace.is_empty() && !path.is_empty() {
                return Ok(Self {
                    namespace: namespace.to_string(),
                    path: PathBuf::from(path),
                });
            }
        }
        Ok(Self {
            namespace: default_namespace.to_string(),
            path: PathBuf::from(arg),
        })
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_scan() {
        let cli = Cli::try_parse_from([
            "rulescan", "scan", "-r", "a.yar", "-r", "ns:b.yar", "--fast", "-R", "/tmp",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Scan {
                rules,
                targets,
                recursive,
                fast,
                ..
            }) => {
                assert_eq!(rules, vec!["a.yar", "ns:b.yar"]);
                assert_eq!(targets, vec![PathBuf::from("/tmp")]);
                assert!(recursive);
                assert!(fast);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_scan_needs_rules() {
        assert!(Cli::try_parse_from(["rulescan", "scan", "/tmp"]).is_err());
        assert!(Cli::try_parse_from(["rulescan", "scan", "-c", "rules.bin", "/tmp"]).is_ok());
        assert!(Cli::try_parse_from([
            "rulescan", "scan", "-c", "rules.bin", "-r", "a.yar", "/tmp"
        ])
        .is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli =
            Cli::try_parse_from(["rulescan", "info", "--format", "json", "--verbose"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
    }

    #[test]
    fn test_rule_source_parse() {
        let source = RuleSource::parse("malware:rules/a.yar", "default").unwrap();
        assert_eq!(source.namespace, "malware");
        assert_eq!(source.path, PathBuf::from("rules/a.yar"));

        let source = RuleSource::parse("rules/a.yar", "default").unwrap();
        assert_eq!(source.namespace, "default");

        let source = RuleSource::parse("C:\\rules\\a.yar", "default").unwrap();
        assert_eq!(source.namespace, "default");
        assert_eq!(source.path, PathBuf::from("C:\\rules\\a.yar"));

        assert!(RuleSource::parse("", "default").is_err());
    }
}
