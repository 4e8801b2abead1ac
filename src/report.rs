//! Result aggregation and reporting
//!
//! `Summary` is folded one `RunResult` at a time; `total == passed + failed`
//! holds after every step.

use colored::Colorize;
use serde::Serialize;

use crate::classify::failure_reason;
use crate::common::config::ShowOutput;
use crate::common::exit_codes;
use crate::supervisor::RunResult;

/// One failed test binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub artifact_name: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Aggregate outcome of a harness run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    total: usize,
    passed: usize,
    failed: usize,
    failures: Vec<Failure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<String>,
    interrupted: bool,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Fold one result into the counters
    pub fn record(&mut self, result: &RunResult) {
        self.total += 1;
        if result.passed() {
            self.passed += 1;
        } else {
            self.failed += 1;
            self.failures.push(Failure {
                artifact_name: result.artifact_name.clone(),
                reason: failure_reason(result),
                evidence: result.evidence.clone(),
            });
        }
    }

    /// Note an artifact left unrun after an interrupt
    pub fn skip(&mut self, artifact_name: &str) {
        self.interrupted = true;
        self.skipped.push(artifact_name.to_string());
    }

    /// Mark the run as interrupted even if nothing was left to skip
    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    /// Process exit status for this summary
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            exit_codes::INTERRUPTED
        } else if self.failed == 0 {
            exit_codes::OK
        } else {
            exit_codes::TESTS_FAILED
        }
    }

    /// The final human-readable report
    pub fn render(&self) -> String {
        let mut out = String::new();

        if self.total == 0 && self.skipped.is_empty() {
            out.push_str(&format!("{}\n", "No tests found".yellow().bold()));
            return out;
        }

        out.push_str(&format!("\n{}\n", "Test Summary".blue().bold()));
        out.push_str(&format!("  Total:  {}\n", self.total));
        out.push_str(&format!("  Passed: {}\n", self.passed.to_string().green()));
        out.push_str(&format!("  Failed: {}\n", self.failed.to_string().red()));

        if !self.failures.is_empty() {
            out.push_str(&format!("\n{}\n", "Failures:".red().bold()));
            for failure in &self.failures {
                out.push_str(&format!(
                    "  {} {}: {}\n",
                    "✗".red(),
                    failure.artifact_name.white().bold(),
                    failure.reason
                ));
                if let Some(evidence) = &failure.evidence {
                    out.push_str(&format!("      {}\n", evidence.dimmed()));
                }
            }
        }

        if !self.skipped.is_empty() {
            out.push_str(&format!(
                "\n{} {}\n",
                "Skipped after interrupt:".yellow(),
                self.skipped.join(", ")
            ));
        }

        out.push('\n');
        if self.interrupted {
            out.push_str(&format!(
                "{} {}\n",
                "!".yellow().bold(),
                format!("Interrupted after {} of {} test binaries", self.total, self.total + self.skipped.len())
                    .yellow()
                    .bold()
            ));
        } else if self.failed == 0 {
            out.push_str(&format!(
                "{} {}\n",
                "✓".green().bold(),
                format!("All {} test binaries passed", self.total).green().bold()
            ));
        } else {
            out.push_str(&format!(
                "{} {}\n",
                "✗".red().bold(),
                format!("{} of {} test binaries failed", self.failed, self.total)
                    .red()
                    .bold()
            ));
        }

        out
    }
}

/// Print the per-binary status line and, if selected, its captured output
pub fn print_run(result: &RunResult, show_output: ShowOutput) {
    let secs = result.duration.as_secs_f64();
    if result.passed() {
        println!(
            "  {} {} {}",
            "✓".green(),
            result.artifact_name,
            format!("({secs:.2}s)").dimmed()
        );
    } else {
        println!(
            "  {} {}: {} {}",
            "✗".red(),
            result.artifact_name.white().bold(),
            failure_reason(result),
            format!("({secs:.2}s)").dimmed()
        );
    }

    let show = match show_output {
        ShowOutput::Always => true,
        ShowOutput::Failures => !result.passed(),
        ShowOutput::Never => false,
    };
    if !show {
        return;
    }

    for (label, text) in [
        ("stdout", &result.captured_stdout),
        ("stderr", &result.captured_stderr),
    ] {
        if text.trim().is_empty() {
            continue;
        }
        println!("    {}", format!("--- {label} ---").dimmed());
        for line in text.lines() {
            println!("    {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::STATUS_ACCESS_VIOLATION;

    fn run(name: &str, exit_code: i32) -> RunResult {
        RunResult {
            artifact_name: name.to_string(),
            exit_code,
            ..RunResult::default()
        }
    }

    fn plain<F: FnOnce() -> String>(render: F) -> String {
        colored::control::set_override(false);
        render()
    }

    #[test]
    fn test_counts_hold_after_every_record() {
        let mut summary = Summary::new();
        let results = [
            run("a", 0),
            run("b", 101),
            run("c", 0),
            run("d", STATUS_ACCESS_VIOLATION as i32),
        ];
        for result in &results {
            summary.record(result);
            assert_eq!(summary.total(), summary.passed() + summary.failed());
        }
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.passed(), 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.exit_code(), exit_codes::TESTS_FAILED);
    }

    #[test]
    fn test_detected_exception_fails_zero_exit() {
        let mut result = run("handled", 0);
        result.had_detected_exception = true;
        result.diagnosis = Some("Access Violation".to_string());
        result.evidence = Some("Access violation - code c0000005".to_string());

        let mut summary = Summary::new();
        summary.record(&result);
        assert_eq!(summary.failed(), 1);
        assert_eq!(
            summary.failures(),
            &[Failure {
                artifact_name: "handled".to_string(),
                reason: "Access Violation".to_string(),
                evidence: Some("Access violation - code c0000005".to_string()),
            }]
        );
    }

    #[test]
    fn test_failure_order_is_arrival_order() {
        let mut summary = Summary::new();
        for name in ["z", "a", "m"] {
            summary.record(&run(name, 1));
        }
        let names: Vec<&str> = summary
            .failures()
            .iter()
            .map(|f| f.artifact_name.as_str())
            .collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Summary::new().exit_code(), exit_codes::OK);

        let mut passing = Summary::new();
        passing.record(&run("a", 0));
        assert_eq!(passing.exit_code(), exit_codes::OK);

        let mut interrupted = Summary::new();
        interrupted.record(&run("a", 0));
        interrupted.skip("b");
        assert_eq!(interrupted.exit_code(), exit_codes::INTERRUPTED);
        assert_eq!(interrupted.total(), 1);
    }

    #[test]
    fn test_render_empty() {
        let text = plain(|| Summary::new().render());
        assert!(text.contains("No tests found"));
    }

    #[test]
    fn test_render_failures() {
        let mut summary = Summary::new();
        summary.record(&run("smoke", 0));
        summary.record(&run("crashy", STATUS_ACCESS_VIOLATION as i32));
        let text = plain(|| summary.render());

        assert!(text.contains("Total:  2"));
        assert!(text.contains("Passed: 1"));
        assert!(text.contains("Failed: 1"));
        assert!(text.contains("crashy: Access Violation"));
        assert!(text.contains("1 of 2 test binaries failed"));
    }

    #[test]
    fn test_render_all_passed() {
        let mut summary = Summary::new();
        summary.record(&run("smoke", 0));
        let text = plain(|| summary.render());
        assert!(text.contains("All 1 test binaries passed"));
    }

    #[test]
    fn test_json_shape() {
        let mut summary = Summary::new();
        summary.record(&run("b", 101));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["failures"][0]["artifact_name"], "b");
        assert_eq!(json["failures"][0]["reason"], "some tests failed (exit code 101)");
        assert!(json.get("skipped").is_none());
        assert_eq!(json["interrupted"], false);
    }
}
