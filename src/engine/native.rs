//! libyara backend.

use super::{Engine, MatchEvent, RawHandle};
use crate::core::error::{codes, Code, Diagnostic, DiagnosticLevel};
use crate::core::types::MetaValue;
use crate::scanner::{CallbackStatus, MatchSink};
use std::borrow::Cow;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::fs::File;
use std::ptr;
use yara_sys::{YR_COMPILER, YR_META, YR_RULE, YR_RULES, YR_SCAN_CONTEXT};

const CALLBACK_MSG_RULE_MATCHING: c_int = 1;
const CALLBACK_MSG_TOO_MANY_MATCHES: c_int = 6;
const CALLBACK_MSG_CONSOLE_LOG: c_int = 7;

const META_TYPE_INTEGER: i32 = 1;
const META_TYPE_STRING: i32 = 2;
const META_TYPE_BOOLEAN: i32 = 3;
const META_FLAGS_LAST_IN_RULE: i32 = 1;

const COMPILER_ERROR_LEVEL_ERROR: c_int = 0;

/// The process-wide libyara library.
///
/// libyara reference-counts `yr_initialize`, so several runtimes may hold
/// it at once.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

/// Borrow a C string owned by libyara. NULL reads as empty.
///
/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string that outlives `'a`.
unsafe fn engine_str<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

unsafe extern "C" fn compiler_callback(
    error_level: c_int,
    file_name: *const c_char,
    line_number: c_int,
    _rule: *const YR_RULE,
    message: *const c_char,
    user_data: *mut c_void,
) {
    let diagnostics = &mut *(user_data as *mut Vec<Diagnostic>);
    let level = if error_level == COMPILER_ERROR_LEVEL_ERROR {
        DiagnosticLevel::Error
    } else {
        DiagnosticLevel::Warning
    };
    let file = (!file_name.is_null()).then(|| engine_str(file_name).into_owned());
    diagnostics.push(Diagnostic {
        level,
        file,
        line: u32::try_from(line_number).unwrap_or(0),
        message: engine_str(message).into_owned(),
    });
}

/// Collect the compiler messages of one `add` call into `diagnostics`.
fn with_diagnostics(
    compiler: *mut YR_COMPILER,
    diagnostics: &mut Vec<Diagnostic>,
    add: impl FnOnce() -> c_int,
) -> u32 {
    // SAFETY: the callback only runs inside `add`, while `diagnostics` is
    // borrowed here, and is cleared again before returning.
    let errors = unsafe {
        yara_sys::yr_compiler_set_callback(
            compiler,
            Some(compiler_callback),
            diagnostics as *mut Vec<Diagnostic> as *mut c_void,
        );
        let errors = add();
        yara_sys::yr_compiler_set_callback(compiler, None, ptr::null_mut());
        errors
    };
    u32::try_from(errors).unwrap_or(0)
}

/// Walk the double-NUL terminated tag list of a rule.
unsafe fn rule_tags<'a>(rule: &'a YR_RULE) -> Vec<Cow<'a, str>> {
    let mut tags = Vec::new();
    let mut cursor = rule.get_tags();
    if cursor.is_null() {
        return tags;
    }
    while *cursor != 0 {
        let tag = CStr::from_ptr(cursor);
        tags.push(tag.to_string_lossy());
        cursor = cursor.add(tag.to_bytes().len() + 1);
    }
    tags
}

unsafe fn meta_value(meta: &YR_META) -> Option<MetaValue> {
    match meta.type_ {
        META_TYPE_INTEGER => Some(MetaValue::Integer(meta.integer)),
        META_TYPE_BOOLEAN => Some(MetaValue::Boolean(meta.integer != 0)),
        META_TYPE_STRING => Some(MetaValue::String(
            engine_str(meta.get_string()).into_owned(),
        )),
        other => {
            log::debug!("Skipping metadata of unknown type {}", other);
            None
        }
    }
}

/// Walk the metadata array of a rule up to the entry flagged as last.
unsafe fn rule_metadata<'a>(rule: &'a YR_RULE) -> Vec<(Cow<'a, str>, MetaValue)> {
    let mut metadata = Vec::new();
    let mut cursor = rule.get_metas();
    if cursor.is_null() {
        return metadata;
    }
    loop {
        let meta = &*cursor;
        if let Some(value) = meta_value(meta) {
            metadata.push((engine_str(meta.get_identifier()), value));
        }
        if meta.flags & META_FLAGS_LAST_IN_RULE != 0 {
            break;
        }
        cursor = cursor.add(1);
    }
    metadata
}

unsafe fn match_event(rule: &YR_RULE) -> MatchEvent<'_> {
    let ns = rule.get_ns();
    let namespace = if ns.is_null() {
        Cow::Borrowed("")
    } else {
        engine_str((*ns).get_name())
    };

    MatchEvent {
        identifier: engine_str(rule.get_identifier()),
        namespace,
        tags: rule_tags(rule),
        metadata: rule_metadata(rule),
    }
}

unsafe extern "C" fn scan_callback(
    _context: *mut YR_SCAN_CONTEXT,
    message: c_int,
    message_data: *mut c_void,
    user_data: *mut c_void,
) -> c_int {
    let sink = MatchSink::from_raw(user_data as usize as u64);
    match message {
        CALLBACK_MSG_RULE_MATCHING if !message_data.is_null() => {
            let rule = &*(message_data as *const YR_RULE);
            sink.report(&match_event(rule)).as_raw()
        }
        CALLBACK_MSG_CONSOLE_LOG if !message_data.is_null() => {
            log::info!(
                "[scan {}] {}",
                sink.id().as_u64(),
                engine_str(message_data as *const c_char)
            );
            CallbackStatus::Continue.as_raw()
        }
        CALLBACK_MSG_TOO_MANY_MATCHES => {
            log::warn!("[scan {}] too many matches for a string", sink.id().as_u64());
            CallbackStatus::Continue.as_raw()
        }
        _ => CallbackStatus::Continue.as_raw(),
    }
}

fn sink_data(sink: MatchSink) -> *mut c_void {
    sink.id().as_u64() as usize as *mut c_void
}

impl Engine for NativeEngine {
    fn name(&self) -> &'static str {
        "libyara"
    }

    fn initialize(&self) -> Code {
        unsafe { yara_sys::yr_initialize() }
    }

    fn finalize(&self) -> Code {
        unsafe { yara_sys::yr_finalize() }
    }

    fn compiler_create(&self) -> Result<RawHandle, Code> {
        let mut compiler: *mut YR_COMPILER = ptr::null_mut();
        let code = unsafe { yara_sys::yr_compiler_create(&mut compiler) };
        if code != codes::SUCCESS {
            return Err(code);
        }
        Ok(RawHandle::from_ptr(compiler))
    }

    fn compiler_destroy(&self, compiler: RawHandle) {
        unsafe { yara_sys::yr_compiler_destroy(compiler.as_ptr()) }
    }

    fn compiler_add_file(
        &self,
        compiler: RawHandle,
        file: &File,
        namespace: &CStr,
        source_path: &CStr,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> u32 {
        #[cfg(unix)]
        let fd = {
            use std::os::unix::io::AsRawFd;
            file.as_raw_fd()
        };
        #[cfg(windows)]
        let fd = {
            use std::os::windows::io::AsRawHandle;
            file.as_raw_handle()
        };

        let compiler = compiler.as_ptr::<YR_COMPILER>();
        with_diagnostics(compiler, diagnostics, || unsafe {
            yara_sys::yr_compiler_add_fd(
                compiler,
                fd as _,
                namespace.as_ptr(),
                source_path.as_ptr(),
            )
        })
    }

    fn compiler_add_string(
        &self,
        compiler: RawHandle,
        source: &CStr,
        namespace: &CStr,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> u32 {
        let compiler = compiler.as_ptr::<YR_COMPILER>();
        with_diagnostics(compiler, diagnostics, || unsafe {
            yara_sys::yr_compiler_add_string(compiler, source.as_ptr(), namespace.as_ptr())
        })
    }

    fn compiler_get_rules(&self, compiler: RawHandle) -> Result<RawHandle, Code> {
        let mut rules: *mut YR_RULES = ptr::null_mut();
        let code = unsafe { yara_sys::yr_compiler_get_rules(compiler.as_ptr(), &mut rules) };
        if code != codes::SUCCESS {
            return Err(code);
        }
        Ok(RawHandle::from_ptr(rules))
    }

    fn rules_load(&self, path: &CStr) -> Result<RawHandle, Code> {
        let mut rules: *mut YR_RULES = ptr::null_mut();
        let code = unsafe { yara_sys::yr_rules_load(path.as_ptr(), &mut rules) };
        if code != codes::SUCCESS {
            return Err(code);
        }
        Ok(RawHandle::from_ptr(rules))
    }

    fn rules_save(&self, rules: RawHandle, path: &CStr) -> Code {
        unsafe { yara_sys::yr_rules_save(rules.as_ptr(), path.as_ptr()) }
    }

    fn rules_destroy(&self, rules: RawHandle) -> Code {
        unsafe { yara_sys::yr_rules_destroy(rules.as_ptr()) }
    }

    fn rules_scan_mem(
        &self,
        rules: RawHandle,
        data: &[u8],
        flags: i32,
        timeout: i32,
        sink: MatchSink,
    ) -> Code {
        unsafe {
            yara_sys::yr_rules_scan_mem(
                rules.as_ptr(),
                data.as_ptr(),
                data.len() as _,
                flags,
                Some(scan_callback),
                sink_data(sink),
                timeout,
            )
        }
    }

    fn rules_scan_file(
        &self,
        rules: RawHandle,
        path: &CStr,
        flags: i32,
        timeout: i32,
        sink: MatchSink,
    ) -> Code {
        unsafe {
            yara_sys::yr_rules_scan_file(
                rules.as_ptr(),
                path.as_ptr(),
                flags,
                Some(scan_callback),
                sink_data(sink),
                timeout,
            )
        }
    }
}
