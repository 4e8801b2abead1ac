//! Debugger command file generation
//!
//! The console debugger reads the file passed with `-cf` at the initial
//! break. Order matters: open the session log, arm the event filters,
//! resume, and quit once the target is gone.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Event text `.lastevent` prints for a process exit
pub const EXIT_EVENT: &str = "Exit process";

/// Precedes the hex exit status in an exit event line
const EXIT_CODE_FIELD: &str = ", code ";

/// An event filter armed with `sxe`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    /// Debugger event code
    pub event: &'static str,
    /// Command run at the first-chance break
    pub first_chance: &'static str,
    /// Command run at the second-chance break
    pub second_chance: Option<&'static str>,
}

/// Filters armed for every run
///
/// Exceptions dump a stack and continue unhandled so the target's own
/// handlers still run; only the log records that they happened.
pub const EVENT_FILTERS: &[EventFilter] = &[
    // access violation
    EventFilter {
        event: "av",
        first_chance: "kb; gn",
        second_chance: Some("kb; gn"),
    },
    // stack overflow
    EventFilter {
        event: "sov",
        first_chance: "kb; gn",
        second_chance: Some("kb; gn"),
    },
    // invalid handle
    EventFilter {
        event: "ch",
        first_chance: "kb; gn",
        second_chance: Some("kb; gn"),
    },
    // C++ exceptions, also raised by panics unwinding through foreign frames
    EventFilter {
        event: "eh",
        first_chance: "gn",
        second_chance: Some("kb; gn"),
    },
    EventFilter {
        event: "cpr",
        first_chance: ".echo crashwatch: process created; g",
        second_chance: None,
    },
    EventFilter {
        event: "epr",
        first_chance: ".lastevent; g",
        second_chance: None,
    },
];

/// Commands for one supervised run
#[derive(Debug, Clone)]
pub struct DebuggerScript {
    log_path: PathBuf,
}

impl DebuggerScript {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Commands in execution order
    pub fn commands(&self) -> Vec<String> {
        let mut commands = vec![format!(".logopen \"{}\"", self.log_path.display())];

        for filter in EVENT_FILTERS {
            let mut line = format!("sxe -c \"{}\"", filter.first_chance);
            if let Some(second) = filter.second_chance {
                line.push_str(&format!(" -c2 \"{}\"", second));
            }
            line.push(' ');
            line.push_str(filter.event);
            commands.push(line);
        }

        commands.push("g".to_string());
        commands.push("q".to_string());
        commands
    }

    /// The command file contents
    pub fn render(&self) -> String {
        let mut text = self.commands().join("\n");
        text.push('\n');
        text
    }
}

/// Debugger command line for one run
///
/// `-o` makes the debugger follow processes the target spawns.
pub fn debugger_args(script: &Path, target: &Path, target_args: &[String]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-o".into(),
        "-cf".into(),
        script.as_os_str().to_os_string(),
        target.as_os_str().to_os_string(),
    ];
    args.extend(target_args.iter().map(OsString::from));
    args
}

/// Exit code of the last debugged process to exit, from the session log
///
/// Reads the `.lastevent` line the exit filter prints, e.g.
/// `Last event: 1a2c.3f00: Exit process 0:1a2c, code c0000005`. The status is
/// hex; fault codes come back as the negative `i32` the platform reports.
pub fn parse_exit_code(log: &str) -> Option<i32> {
    log.lines().rev().find_map(|line| {
        let event = &line[line.find(EXIT_EVENT)?..];
        let code = &event[event.find(EXIT_CODE_FIELD)? + EXIT_CODE_FIELD.len()..];
        let code = code.trim_start();
        let code = code.strip_prefix("0x").unwrap_or(code);
        let hex: String = code.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
        u32::from_str_radix(&hex, 16).ok().map(|status| status as i32)
    })
}
