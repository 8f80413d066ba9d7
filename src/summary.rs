//! Terminal summary renderer.
//!
//! [`render_summary`] is a pure function: report in, `String` out. Colors
//! come from `colored`, which honours the global override the binary sets
//! for `--no-color` or a piped stdout.
//!
//! ```text
//!   stack-loadtest summary
//!   region: us-east-1   duration: 1800.0s   state: completed
//!
//!   sql.........................: attempts=18000  errors=0
//!   cache.......................: attempts=13500  errors=2
//!     cache errors:
//!       connection..............: 2
//!   function....................: attempts=0  errors=0  inert (manifest lists no function ARNs)
//!   http........................: attempts=4500  errors=0  [200=4500]
//!
//!   total.......................: attempts=36000  errors=2
//! ```

use colored::Colorize;

use crate::backend::BackendResult;
use crate::engine::RunState;
use crate::report::RunReport;

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 28;

pub fn render_summary(report: &RunReport) -> String {
    let mut lines = Vec::new();

    lines.push(String::new());
    lines.push(format!("  {}", "stack-loadtest summary".bold()));
    let state = match report.state {
        RunState::Completed => "completed".green().to_string(),
        RunState::Degraded => "degraded".yellow().to_string(),
        other => format!("{other:?}").to_lowercase(),
    };
    lines.push(format!(
        "  region: {}   duration: {:.1}s   state: {}",
        report.region.as_deref().unwrap_or("default"),
        report.elapsed_secs,
        state
    ));
    lines.push(String::new());

    for backend in &report.backends {
        lines.push(format_metric_row(
            backend.kind.as_str(),
            &backend_value(backend),
            PAD_WIDTH,
        ));
        if !backend.error_categories.is_empty() {
            lines.push(format!("    {} errors:", backend.kind));
            for (category, count) in &backend.error_categories {
                lines.push(format_metric_row(
                    &format!("    {category}"),
                    &count.to_string(),
                    PAD_WIDTH,
                ));
            }
        }
    }

    lines.push(String::new());
    lines.push(format_metric_row(
        "total",
        &format!(
            "attempts={}  errors={}",
            report.total_attempts(),
            color_errors(report.total_errors())
        ),
        PAD_WIDTH,
    ));
    lines.push(String::new());
    lines.join("\n")
}

fn backend_value(backend: &BackendResult) -> String {
    let mut value = format!(
        "attempts={}  errors={}",
        backend.attempts,
        color_errors(backend.errors)
    );
    if backend.inert {
        let reason = backend.inert_reason.as_deref().unwrap_or("unavailable");
        value.push_str(&format!("  {} ({reason})", "inert".dimmed()));
        return value;
    }
    if backend.shutdown.is_failure() {
        value.push_str(&format!("  shutdown={:?}", backend.shutdown).red().to_string());
    }
    if !backend.status_codes.is_empty() {
        let codes: Vec<String> = backend
            .status_codes
            .iter()
            .map(|(code, count)| format!("{code}={count}"))
            .collect();
        value.push_str(&format!("  [{}]", codes.join(" ")));
    }
    value
}

fn color_errors(errors: u64) -> String {
    if errors > 0 {
        errors.to_string().red().to_string()
    } else {
        errors.to_string().green().to_string()
    }
}

/// Format a single metric row with dot-padding.
///
/// Produces: `"  metric_name..................: value_string"`
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, InertReason, ShutdownOutcome};
    use std::time::Duration;

    /// Disable colors in tests for deterministic assertions.
    fn setup_no_color() {
        colored::control::set_override(false);
    }

    fn report(backends: Vec<BackendResult>, state: RunState) -> RunReport {
        RunReport::new(
            chrono::Utc::now(),
            None,
            Duration::from_secs(60),
            Duration::from_secs(60),
            state,
            backends,
        )
    }

    #[test]
    fn test_summary_lists_every_backend() {
        setup_no_color();
        let backends = BackendKind::ALL
            .into_iter()
            .map(BackendResult::new)
            .collect();
        let out = render_summary(&report(backends, RunState::Completed));

        for name in ["sql", "cache", "function", "http"] {
            assert!(out.contains(&format!("  {name}.")), "missing {name} in:\n{out}");
        }
        assert!(out.contains("state: completed"));
        assert!(out.contains("total"));
    }

    #[test]
    fn test_summary_shows_inert_reason_and_errors() {
        setup_no_color();
        let mut sql = BackendResult::new(BackendKind::Sql);
        sql.record_success();
        sql.record_shutdown_failure(ShutdownOutcome::TimedOut);
        let function = BackendResult::inert(BackendKind::Function, &InertReason::NoFunctions);
        let out = render_summary(&report(vec![sql, function], RunState::Degraded));

        assert!(out.contains("attempts=1  errors=1"));
        assert!(out.contains("shutdown=TimedOut"));
        assert!(out.contains("shutdown"));
        assert!(out.contains("inert (manifest lists no function ARNs)"));
        assert!(out.contains("state: degraded"));
    }

    #[test]
    fn test_inert_row_keeps_zero_counters() {
        setup_no_color();
        let sql = BackendResult::inert(BackendKind::Sql, &InertReason::MissingSecretRef);
        let out = render_summary(&report(vec![sql], RunState::Degraded));

        let row = out
            .lines()
            .find(|line| line.trim_start().starts_with("sql."))
            .unwrap();
        assert!(
            row.ends_with(": attempts=0  errors=0  inert (manifest has no database secret reference)"),
            "unexpected row: {row}"
        );
    }

    #[test]
    fn test_metric_row_padding() {
        assert_eq!(format_metric_row("sql", "1", 8), "  sql.....: 1");
    }
}
