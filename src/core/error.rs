//! Error types and native status-code translation for rulescan.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Status code returned by every engine call.
pub type Code = i32;

/// Named libyara status codes the façade needs to tell apart.
///
/// Any code not listed here is still a valid engine status; it is simply
/// reported as [`Error::Engine`] without further interpretation.
pub mod codes {
    use super::Code;

    pub const SUCCESS: Code = 0;
    pub const INSUFFICIENT_MEMORY: Code = 1;
    pub const COULD_NOT_OPEN_FILE: Code = 3;
    pub const COULD_NOT_MAP_FILE: Code = 4;
    pub const INVALID_FILE: Code = 6;
    pub const CORRUPT_FILE: Code = 7;
    pub const UNSUPPORTED_FILE_VERSION: Code = 8;
    pub const SCAN_TIMEOUT: Code = 26;
    pub const TOO_MANY_SCAN_THREADS: Code = 27;
    pub const CALLBACK_ERROR: Code = 28;
    pub const INVALID_ARGUMENT: Code = 29;
    pub const INTERNAL_FATAL_ERROR: Code = 31;
}

/// Severity of a compiler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// One message reported by the engine while compiling rule source.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    /// Source file, when the rules came from `add_file` or an include.
    pub file: Option<String>,
    pub line: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
        };
        match &self.file {
            Some(file) => write!(f, "{}({}): {}: {}", file, self.line, level, self.message),
            None => write!(f, "line {}: {}: {}", self.line, level, self.message),
        }
    }
}

/// Main error type for rulescan operations.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Lifecycle Errors =====
    #[error("Failed to initialize the matching engine (code {code})")]
    Startup { code: Code },

    #[error("Cannot finalize the engine: {live} compiler(s)/rule set(s) still alive")]
    ResourcesOutstanding { live: usize },

    // ===== Compilation Errors =====
    #[error("Failed to compile rules in namespace '{namespace}': {errors} error(s)")]
    Compile {
        namespace: String,
        errors: usize,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("Compiler session already failed with {errors} error(s) and cannot be reused")]
    SessionFailed { errors: usize },

    // ===== I/O Errors =====
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Compiled rules are corrupt or from an unsupported version: {path} (code {code})")]
    CorruptArtifact { path: PathBuf, code: Code },

    // ===== Engine Errors =====
    #[error("libyara: {code}")]
    Engine { code: Code },

    // ===== Scanning Errors =====
    #[error("Scan callback reported a failure")]
    CallbackFailed,

    #[error("Scan timeout exceeded")]
    ScanTimeout,

    #[error("Cannot scan an empty buffer")]
    EmptyBuffer,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ===== Configuration Errors =====
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Failed to save configuration: {0}")]
    ConfigSave(String),

    #[error("Invalid configuration value: {field} - {message}")]
    ConfigInvalid { field: String, message: String },

    // ===== Serialization Errors =====
    #[error("JSON serialization error")]
    JsonSerialize(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Translate an engine status code: the success sentinel maps to `Ok`,
/// anything else to [`Error::Engine`].
pub fn check(code: Code) -> Result<()> {
    if code == codes::SUCCESS {
        Ok(())
    } else {
        Err(Error::Engine { code })
    }
}

/// Error for a failed attempt to load a compiled artifact from `path`.
pub fn load_failure(code: Code, path: impl Into<PathBuf>) -> Error {
    match code {
        codes::COULD_NOT_OPEN_FILE | codes::COULD_NOT_MAP_FILE => {
            Error::file_read(path, engine_io_error(code))
        }
        codes::INVALID_FILE | codes::CORRUPT_FILE | codes::UNSUPPORTED_FILE_VERSION => {
            Error::CorruptArtifact {
                path: path.into(),
                code,
            }
        }
        _ => Error::Engine { code },
    }
}

/// Translate the status of loading a compiled artifact from `path`.
pub fn classify_load(code: Code, path: impl Into<PathBuf>) -> Result<()> {
    if code == codes::SUCCESS {
        Ok(())
    } else {
        Err(load_failure(code, path))
    }
}

/// Translate the status of saving a compiled artifact to `path`.
pub fn classify_save(code: Code, path: impl Into<PathBuf>) -> Result<()> {
    match code {
        codes::SUCCESS => Ok(()),
        codes::COULD_NOT_OPEN_FILE => Err(Error::file_write(path, engine_io_error(code))),
        _ => Err(Error::Engine { code }),
    }
}

/// Translate the status of a scan. `path` is set for file scans.
pub fn classify_scan(code: Code, path: Option<&std::path::Path>) -> Result<()> {
    match (code, path) {
        (codes::SUCCESS, _) => Ok(()),
        (codes::SCAN_TIMEOUT, _) => Err(Error::ScanTimeout),
        (codes::CALLBACK_ERROR, _) => Err(Error::CallbackFailed),
        (codes::COULD_NOT_OPEN_FILE | codes::COULD_NOT_MAP_FILE, Some(path)) => {
            Err(Error::file_read(path, engine_io_error(code)))
        }
        _ => Err(Error::Engine { code }),
    }
}

fn engine_io_error(code: Code) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("engine could not access file (code {})", code),
    )
}

impl Error {
    /// Create a file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Create a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// The numeric engine status carried by this error, if any.
    pub fn code(&self) -> Option<Code> {
        match self {
            Error::Startup { code }
            | Error::Engine { code }
            | Error::CorruptArtifact { code, .. } => Some(*code),
            Error::ScanTimeout => Some(codes::SCAN_TIMEOUT),
            _ => None,
        }
    }

    /// Compiler diagnostics attached to this error.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Error::Compile { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }

    /// Check if the scan callback asked for the failure.
    pub fn is_callback_failure(&self) -> bool {
        matches!(self, Error::CallbackFailed)
    }

    /// Get a user-friendly suggestion for how to resolve this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Startup { .. } => Some("Check that libyara is installed and usable"),
            Error::Compile { .. } => Some("Fix the reported rule diagnostics and compile again"),
            Error::SessionFailed { .. } => {
                Some("Create a new compiler; a failed session cannot be reused")
            }
            Error::CorruptArtifact { .. } => {
                Some("Recompile the rules with the same engine version that loads them")
            }
            Error::ScanTimeout => Some("Increase scan.timeout_secs or scan smaller inputs"),
            Error::ResourcesOutstanding { .. } => {
                Some("Drop every compiler and rule set before finalizing")
            }
            Error::ConfigLoad(_) | Error::ConfigInvalid { .. } => {
                Some("Check your configuration file for syntax errors or missing fields")
            }
            _ => None,
        }
    }

    /// Get the error category for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Startup { .. } => ErrorCategory::Startup,

            Error::Compile { .. } | Error::SessionFailed { .. } => ErrorCategory::Compile,

            Error::FileRead { .. } | Error::FileWrite { .. } => ErrorCategory::Io,

            Error::Engine { .. } | Error::CorruptArtifact { .. } => ErrorCategory::Engine,

            Error::CallbackFailed | Error::ScanTimeout => ErrorCategory::Scan,

            Error::EmptyBuffer | Error::InvalidArgument(_) | Error::ResourcesOutstanding { .. } => {
                ErrorCategory::Usage
            }

            Error::ConfigLoad(_) | Error::ConfigSave(_) | Error::ConfigInvalid { .. } => {
                ErrorCategory::Configuration
            }

            Error::JsonSerialize(_) => ErrorCategory::Serialization,

            Error::Other(_) => ErrorCategory::Other,
        }
    }
}

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Startup,
    Compile,
    Io,
    Engine,
    Scan,
    Usage,
    Configuration,
    Serialization,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "Startup"),
            Self::Compile => write!(f, "Compile"),
            Self::Io => write!(f, "I/O"),
            Self::Engine => write!(f, "Engine"),
            Self::Scan => write!(f, "Scan"),
            Self::Usage => write!(f, "Usage"),
            Self::Configuration => write!(f, "Configuration"),
            Self::Serialization => write!(f, "Serialization"),
            Self::Other => write!(f, "Other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_check_success_and_failure() {
        assert!(check(codes::SUCCESS).is_ok());

        let err = check(codes::INSUFFICIENT_MEMORY).unwrap_err();
        assert_eq!(err.code(), Some(codes::INSUFFICIENT_MEMORY));
        assert_eq!(err.to_string(), "libyara: 1");
        assert_eq!(err.category(), ErrorCategory::Engine);
    }

    #[test]
    fn test_classify_load() {
        let err = classify_load(codes::CORRUPT_FILE, "/tmp/rules.bin").unwrap_err();
        assert!(matches!(err, Error::CorruptArtifact { code: 7, .. }));

        let err = classify_load(codes::UNSUPPORTED_FILE_VERSION, "/tmp/rules.bin").unwrap_err();
        assert!(matches!(err, Error::CorruptArtifact { .. }));

        let err = classify_load(codes::COULD_NOT_OPEN_FILE, "/tmp/rules.bin").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Io);

        let err = classify_load(codes::INTERNAL_FATAL_ERROR, "/tmp/rules.bin").unwrap_err();
        assert!(matches!(err, Error::Engine { code: 31 }));
    }

    #[test]
    fn test_classify_scan() {
        assert!(classify_scan(codes::SUCCESS, None).is_ok());
        assert!(matches!(
            classify_scan(codes::SCAN_TIMEOUT, None),
            Err(Error::ScanTimeout)
        ));
        assert!(classify_scan(codes::CALLBACK_ERROR, None)
            .unwrap_err()
            .is_callback_failure());

        // Without a path an open failure cannot be attributed to a file.
        assert!(matches!(
            classify_scan(codes::COULD_NOT_OPEN_FILE, None),
            Err(Error::Engine { code: 3 })
        ));
        assert!(matches!(
            classify_scan(codes::COULD_NOT_OPEN_FILE, Some(Path::new("/nope"))),
            Err(Error::FileRead { .. })
        ));
    }

    #[test]
    fn test_compile_error_display() {
        let err = Error::Compile {
            namespace: "default".to_string(),
            errors: 2,
            diagnostics: vec![Diagnostic {
                level: DiagnosticLevel::Error,
                file: Some("a.yar".to_string()),
                line: 3,
                message: "syntax error".to_string(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "Failed to compile rules in namespace 'default': 2 error(s)"
        );
        assert_eq!(err.diagnostics().len(), 1);
        assert_eq!(err.diagnostics()[0].to_string(), "a.yar(3): error: syntax error");
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_usage_errors() {
        assert_eq!(Error::EmptyBuffer.category(), ErrorCategory::Usage);
        assert_eq!(
            Error::ResourcesOutstanding { live: 2 }.category(),
            ErrorCategory::Usage
        );
        assert!(Error::EmptyBuffer.code().is_none());
    }
}
