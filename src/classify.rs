//! Crash classification
//!
//! Two independent sources feed a diagnosis: the raw exit status of a test
//! binary, and crash signatures found in the debugger's session log. The
//! signature rules are data (see `[[signatures]]` in the config file) and are
//! evaluated in order, first match wins.

use regex::Regex;
use serde::Deserialize;

use crate::common::{Error, Result};
use crate::supervisor::RunResult;

/// Exit code the Rust test harness uses when at least one test failed
pub const TESTS_FAILED_EXIT_CODE: i32 = 101;

pub const STATUS_ACCESS_VIOLATION: u32 = 0xC000_0005;
pub const STATUS_INVALID_HANDLE: u32 = 0xC000_0008;
pub const STATUS_ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;
pub const STATUS_INTEGER_DIVIDE_BY_ZERO: u32 = 0xC000_0094;
pub const STATUS_STACK_OVERFLOW: u32 = 0xC000_00FD;
pub const STATUS_HEAP_CORRUPTION: u32 = 0xC000_0374;
pub const STATUS_STACK_BUFFER_OVERRUN: u32 = 0xC000_0409;
pub const STATUS_BREAKPOINT: u32 = 0x8000_0003;

/// Well-known fatal status codes and their labels
const FATAL_STATUSES: &[(u32, &str)] = &[
    (STATUS_ACCESS_VIOLATION, "Access Violation"),
    (STATUS_STACK_OVERFLOW, "Stack Overflow"),
    (STATUS_STACK_BUFFER_OVERRUN, "Stack Buffer Overrun"),
    (STATUS_INTEGER_DIVIDE_BY_ZERO, "Integer Divide By Zero"),
    (STATUS_HEAP_CORRUPTION, "Heap Corruption"),
    (STATUS_INVALID_HANDLE, "Invalid Handle"),
    (STATUS_ILLEGAL_INSTRUCTION, "Illegal Instruction"),
    (STATUS_BREAKPOINT, "Breakpoint"),
];

/// Fatal Unix signals and their labels
const FATAL_SIGNALS: &[(i32, &str)] = &[
    (4, "Illegal Instruction (SIGILL)"),
    (6, "Aborted (SIGABRT)"),
    (7, "Bus Error (SIGBUS)"),
    (8, "Floating Point Exception (SIGFPE)"),
    (9, "Killed (SIGKILL)"),
    (11, "Segmentation Fault (SIGSEGV)"),
];

/// What an exit status says about a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Exit code 0
    Success,
    /// The test framework's "some tests failed" convention
    TestsFailed,
    /// A recognized fatal status code or signal
    Crash(&'static str),
    /// Any other non-zero status
    Unrecognized,
}

/// Classify a raw exit status
///
/// `signal` is the terminating signal on Unix; it takes precedence over the
/// synthesized `128 + signal` exit code.
pub fn classify_exit(exit_code: i32, signal: Option<i32>) -> ExitClass {
    if let Some(sig) = signal {
        return FATAL_SIGNALS
            .iter()
            .find(|(s, _)| *s == sig)
            .map(|(_, label)| ExitClass::Crash(label))
            .unwrap_or(ExitClass::Unrecognized);
    }

    match exit_code {
        0 => ExitClass::Success,
        TESTS_FAILED_EXIT_CODE => ExitClass::TestsFailed,
        code => FATAL_STATUSES
            .iter()
            .find(|(status, _)| *status == code as u32)
            .map(|(_, label)| ExitClass::Crash(label))
            .unwrap_or(ExitClass::Unrecognized),
    }
}

/// Human-readable label for a well-known exit status, if any
pub fn exit_label(exit_code: i32, signal: Option<i32>) -> Option<&'static str> {
    match classify_exit(exit_code, signal) {
        ExitClass::Crash(label) => Some(label),
        ExitClass::TestsFailed => Some("some tests failed"),
        ExitClass::Success | ExitClass::Unrecognized => None,
    }
}

/// Render an exit code the way the report shows it
pub fn format_exit_code(exit_code: i32) -> String {
    if exit_code < 0 {
        format!("{} / 0x{:08X}", exit_code, exit_code as u32)
    } else {
        exit_code.to_string()
    }
}

/// Reason string recorded for a failed run
///
/// Precedence: a debugger-detected diagnosis, then an interrupt or timeout,
/// then the exit status label, then the bare exit code.
pub fn failure_reason(result: &RunResult) -> String {
    if result.had_detected_exception {
        return result
            .diagnosis
            .clone()
            .unwrap_or_else(|| "crash detected".to_string());
    }

    if result.interrupted {
        return "interrupted".to_string();
    }

    if let Some(limit) = result.timed_out_after {
        return format!("timed out after {}s", limit.as_secs());
    }

    match exit_label(result.exit_code, result.signal) {
        Some(label) => format!("{} (exit code {})", label, format_exit_code(result.exit_code)),
        None => format!("failed (exit code {})", format_exit_code(result.exit_code)),
    }
}

/// Crash categories recognizable in a debugger log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashKind {
    AccessViolation,
    StackOverflow,
    InvalidHandle,
    HeapCorruption,
    FatalStatus,
}

impl CrashKind {
    /// Default label used as the diagnosis
    pub fn label(&self) -> &'static str {
        match self {
            CrashKind::AccessViolation => "Access Violation",
            CrashKind::StackOverflow => "Stack Overflow",
            CrashKind::InvalidHandle => "Invalid Handle",
            CrashKind::HeapCorruption => "Heap Corruption",
            CrashKind::FatalStatus => "Fatal Exception",
        }
    }
}

/// Config-file form of a signature rule
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureRuleConfig {
    pub kind: CrashKind,
    pub pattern: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// One compiled signature rule
#[derive(Debug, Clone)]
pub struct SignatureRule {
    pub kind: CrashKind,
    pub pattern: Regex,
    pub label: String,
}

impl SignatureRule {
    pub fn new(kind: CrashKind, pattern: &str, label: Option<&str>) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| Error::InvalidSignature {
            pattern: pattern.to_string(),
            error: e.to_string(),
        })?;
        Ok(Self {
            kind,
            pattern: regex,
            label: label.unwrap_or(kind.label()).to_string(),
        })
    }
}

/// A signature found in a debugger log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMatch {
    pub kind: CrashKind,
    pub label: String,
    /// The full log line the pattern matched in
    pub line: String,
}

/// Ordered set of crash signature rules
#[derive(Debug, Clone)]
pub struct SignatureSet {
    rules: Vec<SignatureRule>,
}

/// Built-in rules, most specific first
const BUILTIN_RULES: &[(CrashKind, &str)] = &[
    (CrashKind::AccessViolation, r"(?i)access violation|\bc0000005\b"),
    (CrashKind::StackOverflow, r"(?i)stack overflow|\bc00000fd\b"),
    (CrashKind::InvalidHandle, r"(?i)invalid handle|\bc0000008\b"),
    (
        CrashKind::HeapCorruption,
        r"(?i)heap corruption|corrupted heap|\bc0000374\b|HEAP\[[^\]]*\]:",
    ),
    (
        CrashKind::FatalStatus,
        r"(?i)\bcode c0[0-9a-f]{6}\b|critical error detected",
    ),
];

impl SignatureSet {
    /// The built-in rule set
    pub fn builtin() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .map(|(kind, pattern)| SignatureRule {
                kind: *kind,
                pattern: Regex::new(pattern).expect("built-in signature pattern is valid"),
                label: kind.label().to_string(),
            })
            .collect();
        Self { rules }
    }

    /// Compile a rule set from configuration, keeping its order
    pub fn from_config(rules: &[SignatureRuleConfig]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|r| SignatureRule::new(r.kind, &r.pattern, r.label.as_deref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[SignatureRule] {
        &self.rules
    }

    /// Scan a whole debugger log, returning the highest-priority match
    pub fn scan(&self, log: &str) -> Option<SignatureMatch> {
        self.rules.iter().find_map(|rule| {
            rule.pattern.find(log).map(|m| SignatureMatch {
                kind: rule.kind,
                label: rule.label.clone(),
                line: line_around(log, m.start()).to_string(),
            })
        })
    }
}

impl Default for SignatureSet {
    fn default() -> Self {
        Self::builtin()
    }
}

/// The trimmed line of `text` containing byte offset `pos`
fn line_around(text: &str, pos: usize) -> &str {
    let start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[pos..].find('\n').map(|i| pos + i).unwrap_or(text.len());
    text[start..end].trim()
}
