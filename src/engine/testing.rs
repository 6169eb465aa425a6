//! In-process engine used by unit tests.
//!
//! Rules are one per line: `identifier literal [#tag ...] [key=value ...]`.
//! A rule matches when its literal occurs in the scanned bytes. Lines that
//! are empty or start with `//` are skipped.

use super::{Engine, MatchEvent, RawHandle};
use crate::core::error::{codes, Code, Diagnostic, DiagnosticLevel};
use crate::core::types::MetaValue;
use crate::scanner::{CallbackStatus, MatchSink};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::ffi::CStr;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const FORMAT: &str = "literal-rules";
const VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LiteralRule {
    namespace: String,
    identifier: String,
    literal: String,
    tags: Vec<String>,
    metadata: Vec<(String, MetaValue)>,
}

#[derive(Serialize, Deserialize)]
struct Artifact {
    format: String,
    version: u32,
    rules: Vec<LiteralRule>,
}

#[derive(Default)]
struct CompilerState {
    rules: Vec<LiteralRule>,
    errors: u32,
}

#[derive(Default)]
struct State {
    next_id: usize,
    compilers: HashMap<usize, CompilerState>,
    rules: HashMap<usize, Arc<Vec<LiteralRule>>>,
}

impl State {
    fn next_handle(&mut self) -> RawHandle {
        self.next_id += 1;
        RawHandle::from_id(self.next_id)
    }
}

/// Call counters shared between a test and the engine it boxed.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    initialized: AtomicUsize,
    finalized: AtomicUsize,
    compilers_destroyed: AtomicUsize,
    rules_destroyed: AtomicUsize,
    scans: AtomicUsize,
}

impl Stats {
    pub(crate) fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn finalized(&self) -> usize {
        self.finalized.load(Ordering::SeqCst)
    }

    pub(crate) fn compilers_destroyed(&self) -> usize {
        self.compilers_destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn rules_destroyed(&self) -> usize {
        self.rules_destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

pub(crate) struct LiteralEngine {
    state: Mutex<State>,
    stats: Arc<Stats>,
    initialize_code: Code,
    finalize_code: Code,
    scan_code: Code,
}

impl LiteralEngine {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            stats: Arc::new(Stats::default()),
            initialize_code: codes::SUCCESS,
            finalize_code: codes::SUCCESS,
            scan_code: codes::SUCCESS,
        }
    }

    pub(crate) fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub(crate) fn fail_initialize(mut self, code: Code) -> Self {
        self.initialize_code = code;
        self
    }

    pub(crate) fn fail_finalize(mut self, code: Code) -> Self {
        self.finalize_code = code;
        self
    }

    /// Make every scan end with `code` once all matches were reported.
    pub(crate) fn fail_scans(mut self, code: Code) -> Self {
        self.scan_code = code;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn add_source(
        &self,
        compiler: RawHandle,
        text: &str,
        namespace: &str,
        file: Option<&str>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> u32 {
        let mut state = self.state();
        let Some(session) = state.compilers.get_mut(&compiler.id()) else {
            return 1;
        };

        let mut errors = 0;
        let mut added = Vec::new();
        let mut report = |level, line: usize, message: String| {
            diagnostics.push(Diagnostic {
                level,
                file: file.map(str::to_string),
                line: line as u32,
                message,
            });
        };

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }

            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                report(DiagnosticLevel::Error, line_no, "syntax error".to_string());
                errors += 1;
                continue;
            }

            let identifier = tokens[0];
            let duplicate = session
                .rules
                .iter()
                .chain(added.iter())
                .any(|r: &LiteralRule| r.namespace == namespace && r.identifier == identifier);
            if duplicate {
                report(
                    DiagnosticLevel::Error,
                    line_no,
                    format!("duplicated identifier \"{}\"", identifier),
                );
                errors += 1;
                continue;
            }
            if identifier.starts_with('_') {
                report(
                    DiagnosticLevel::Warning,
                    line_no,
                    format!("rule \"{}\" is private", identifier),
                );
            }

            let mut rule = LiteralRule {
                namespace: namespace.to_string(),
                identifier: identifier.to_string(),
                literal: tokens[1].to_string(),
                tags: Vec::new(),
                metadata: Vec::new(),
            };
            let mut bad_token = false;
            for token in &tokens[2..] {
                if let Some(tag) = token.strip_prefix('#') {
                    rule.tags.push(tag.to_string());
                } else if let Some((key, value)) = token.split_once('=') {
                    rule.metadata.push((key.to_string(), parse_meta(value)));
                } else {
                    report(
                        DiagnosticLevel::Error,
                        line_no,
                        format!("unexpected token \"{}\"", token),
                    );
                    bad_token = true;
                }
            }
            if bad_token {
                errors += 1;
                continue;
            }
            added.push(rule);
        }

        session.errors += errors;
        if errors == 0 {
            session.rules.extend(added);
        }
        errors
    }

    fn scan(&self, rules: RawHandle, data: &[u8], sink: MatchSink) -> Code {
        let Some(rules) = self.state().rules.get(&rules.id()).cloned() else {
            return codes::INVALID_ARGUMENT;
        };
        self.stats.scans.fetch_add(1, Ordering::SeqCst);

        for rule in rules.iter() {
            if !contains(data, rule.literal.as_bytes()) {
                continue;
            }
            let event = MatchEvent {
                identifier: Cow::Borrowed(rule.identifier.as_str()),
                namespace: Cow::Borrowed(rule.namespace.as_str()),
                tags: rule.tags.iter().map(|t| Cow::Borrowed(t.as_str())).collect(),
                metadata: rule
                    .metadata
                    .iter()
                    .map(|(k, v)| (Cow::Borrowed(k.as_str()), v.clone()))
                    .collect(),
            };
            match sink.report(&event) {
                CallbackStatus::Continue => {}
                CallbackStatus::Abort => return codes::SUCCESS,
                CallbackStatus::Fail => return codes::CALLBACK_ERROR,
            }
        }
        self.scan_code
    }
}

fn parse_meta(value: &str) -> MetaValue {
    if let Ok(i) = value.parse::<i64>() {
        return MetaValue::Integer(i);
    }
    match value {
        "true" => MetaValue::Boolean(true),
        "false" => MetaValue::Boolean(false),
        _ => MetaValue::String(value.to_string()),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

fn to_path(path: &CStr) -> PathBuf {
    PathBuf::from(path.to_string_lossy().into_owned())
}

impl Engine for LiteralEngine {
    fn name(&self) -> &'static str {
        "literal"
    }

    fn initialize(&self) -> Code {
        if self.initialize_code == codes::SUCCESS {
            self.stats.initialized.fetch_add(1, Ordering::SeqCst);
        }
        self.initialize_code
    }

    fn finalize(&self) -> Code {
        self.stats.finalized.fetch_add(1, Ordering::SeqCst);
        self.finalize_code
    }

    fn compiler_create(&self) -> Result<RawHandle, Code> {
        let mut state = self.state();
        let handle = state.next_handle();
        state.compilers.insert(handle.id(), CompilerState::default());
        Ok(handle)
    }

    fn compiler_destroy(&self, compiler: RawHandle) {
        if self.state().compilers.remove(&compiler.id()).is_some() {
            self.stats.compilers_destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn compiler_add_file(
        &self,
        compiler: RawHandle,
        file: &File,
        namespace: &CStr,
        source_path: &CStr,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> u32 {
        let file_name = source_path.to_string_lossy();
        let mut text = String::new();
        let mut reader = file;
        if let Err(e) = reader.read_to_string(&mut text) {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                file: Some(file_name.into_owned()),
                line: 0,
                message: e.to_string(),
            });
            return 1;
        }
        self.add_source(
            compiler,
            &text,
            &namespace.to_string_lossy(),
            Some(file_name.as_ref()),
            diagnostics,
        )
    }

    fn compiler_add_string(
        &self,
        compiler: RawHandle,
        source: &CStr,
        namespace: &CStr,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> u32 {
        self.add_source(
            compiler,
            &source.to_string_lossy(),
            &namespace.to_string_lossy(),
            None,
            diagnostics,
        )
    }

    fn compiler_get_rules(&self, compiler: RawHandle) -> Result<RawHandle, Code> {
        let mut state = self.state();
        let rules = match state.compilers.get(&compiler.id()) {
            Some(session) if session.errors == 0 => session.rules.clone(),
            _ => return Err(codes::INVALID_ARGUMENT),
        };
        let handle = state.next_handle();
        state.rules.insert(handle.id(), Arc::new(rules));
        Ok(handle)
    }

    fn rules_load(&self, path: &CStr) -> Result<RawHandle, Code> {
        let bytes = std::fs::read(to_path(path)).map_err(|_| codes::COULD_NOT_OPEN_FILE)?;
        let artifact: Artifact =
            serde_json::from_slice(&bytes).map_err(|_| codes::CORRUPT_FILE)?;
        if artifact.format != FORMAT {
            return Err(codes::INVALID_FILE);
        }
        if artifact.version != VERSION {
            return Err(codes::UNSUPPORTED_FILE_VERSION);
        }

        let mut state = self.state();
        let handle = state.next_handle();
        state.rules.insert(handle.id(), Arc::new(artifact.rules));
        Ok(handle)
    }

    fn rules_save(&self, rules: RawHandle, path: &CStr) -> Code {
        let Some(rules) = self.state().rules.get(&rules.id()).cloned() else {
            return codes::INVALID_ARGUMENT;
        };
        let artifact = Artifact {
            format: FORMAT.to_string(),
            version: VERSION,
            rules: rules.as_ref().clone(),
        };
        let Ok(bytes) = serde_json::to_vec(&artifact) else {
            return codes::INTERNAL_FATAL_ERROR;
        };
        match std::fs::write(to_path(path), bytes) {
            Ok(()) => codes::SUCCESS,
            Err(_) => codes::COULD_NOT_OPEN_FILE,
        }
    }

    fn rules_destroy(&self, rules: RawHandle) -> Code {
        match self.state().rules.remove(&rules.id()) {
            Some(_) => {
                self.stats.rules_destroyed.fetch_add(1, Ordering::SeqCst);
                codes::SUCCESS
            }
            None => codes::INVALID_ARGUMENT,
        }
    }

    fn rules_scan_mem(
        &self,
        rules: RawHandle,
        data: &[u8],
        _flags: i32,
        _timeout: i32,
        sink: MatchSink,
    ) -> Code {
        self.scan(rules, data, sink)
    }

    fn rules_scan_file(
        &self,
        rules: RawHandle,
        path: &CStr,
        _flags: i32,
        _timeout: i32,
        sink: MatchSink,
    ) -> Code {
        match std::fs::read(to_path(path)) {
            Ok(data) => self.scan(rules, &data, sink),
            Err(_) => codes::COULD_NOT_OPEN_FILE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn test_parse_source() {
        let engine = LiteralEngine::new();
        let compiler = engine.compiler_create().unwrap();
        let mut diagnostics = Vec::new();

        let source = cstr("// comment\nA abc #t1 score=5 live=true author=me\n_B xyz\n");
        let errors =
            engine.compiler_add_string(compiler, &source, &cstr("default"), &mut diagnostics);
        assert_eq!(errors, 0);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].level, DiagnosticLevel::Warning);
        assert_eq!(diagnostics[0].line, 3);

        let state = engine.state();
        let rule = &state.compilers[&compiler.id()].rules[0];
        assert_eq!(rule.tags, vec!["t1"]);
        assert_eq!(rule.metadata[0].1, MetaValue::Integer(5));
        assert_eq!(rule.metadata[1].1, MetaValue::Boolean(true));
        assert_eq!(rule.metadata[2].1, MetaValue::String("me".to_string()));
    }

    #[test]
    fn test_syntax_and_duplicate_errors() {
        let engine = LiteralEngine::new();
        let compiler = engine.compiler_create().unwrap();
        let mut diagnostics = Vec::new();

        let errors = engine.compiler_add_string(
            compiler,
            &cstr("A abc\nbroken\nA def\n"),
            &cstr("default"),
            &mut diagnostics,
        );
        assert_eq!(errors, 2);
        assert_eq!(diagnostics[0].message, "syntax error");
        assert!(diagnostics[1].message.contains("duplicated"));
        assert_eq!(engine.compiler_get_rules(compiler), Err(codes::INVALID_ARGUMENT));
    }

    #[test]
    fn test_same_identifier_in_other_namespace() {
        let engine = LiteralEngine::new();
        let compiler = engine.compiler_create().unwrap();
        let mut diagnostics = Vec::new();

        engine.compiler_add_string(compiler, &cstr("A abc"), &cstr("one"), &mut diagnostics);
        let errors =
            engine.compiler_add_string(compiler, &cstr("A abc"), &cstr("two"), &mut diagnostics);
        assert_eq!(errors, 0);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_contains() {
        assert!(contains(b"xxabcxx", b"abc"));
        assert!(!contains(b"ab", b"abc"));
        assert!(contains(b"", b""));
    }
}
