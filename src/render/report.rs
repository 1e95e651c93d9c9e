// Report Rendering
// Text views of diffs, plans and sync reports

use std::fmt::Write;

use board_sync::operations::{DiffResult, SyncOperation, SyncPlan, SyncReport};

/// Three diff sets, or the ancestor-expanded view with `decorations`
pub fn render_diff(diff: &DiffResult, decorations: bool) -> String {
    if diff.is_empty() {
        return "Workspace and device are in sync.\n".to_string();
    }

    let mut out = String::new();
    if decorations {
        for path in diff.decorations() {
            let marker = if diff.changed.contains(&path) {
                "M"
            } else if diff.local_only.contains(&path) {
                "+"
            } else if diff.device_only.contains(&path) {
                "-"
            } else {
                "·"
            };
            let _ = writeln!(out, "{} {}", marker, path);
        }
        return out;
    }

    let sections = [
        ("Changed", &diff.changed),
        ("Only in workspace", &diff.local_only),
        ("Only on device", &diff.device_only),
    ];
    for (title, paths) in sections {
        if paths.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{} ({}):", title, paths.len());
        for path in paths {
            let _ = writeln!(out, "  {}", path);
        }
    }
    out
}

/// One line per planned operation
pub fn render_plan(plan: &SyncPlan) -> String {
    if plan.is_empty() {
        return "Nothing to do.\n".to_string();
    }

    let mut out = String::new();
    for op in &plan.operations {
        let _ = match op {
            SyncOperation::MkDir { path } => writeln!(out, "mkdir     {}", path),
            SyncOperation::Upload { local, device } => {
                writeln!(out, "upload    {} -> {}", local.display(), device)
            }
            SyncOperation::Download { device, local } => {
                writeln!(out, "download  {} -> {}", device, local.display())
            }
            SyncOperation::Delete { device, is_dir } => {
                writeln!(out, "delete    {}{}", device, if *is_dir { "/" } else { "" })
            }
        };
    }
    let _ = writeln!(out, "{} operation(s), {} transfer(s)", plan.len(), plan.transfer_count());
    out
}

/// Summary line plus failures and warnings
pub fn render_report(report: &SyncReport) -> String {
    let mut out = String::new();

    let status = if report.cancelled {
        "Cancelled"
    } else if report.failures.is_empty() {
        "Done"
    } else {
        "Finished with errors"
    };
    let _ = writeln!(
        out,
        "{}: {} succeeded, {} failed, {} director{} created{}",
        status,
        report.succeeded,
        report.failures.len(),
        report.directories_created,
        if report.directories_created == 1 { "y" } else { "ies" },
        if report.skipped > 0 {
            format!(", {} skipped", report.skipped)
        } else {
            String::new()
        }
    );

    for failure in &report.failures {
        let _ = writeln!(out, "  failed: {}", failure);
    }
    for warning in &report.warnings {
        let _ = writeln!(out, "  warning: {}", warning);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use board_sync::operations::OperationFailure;

    #[test]
    fn test_render_diff_sections() {
        let mut diff = DiffResult::default();
        diff.changed.insert("/main.py".to_string());
        diff.device_only.insert("/lib/old.py".to_string());

        let text = render_diff(&diff, false);
        assert!(text.contains("Changed (1):\n  /main.py"));
        assert!(text.contains("Only on device (1):\n  /lib/old.py"));
        assert!(!text.contains("Only in workspace"));

        let deco = render_diff(&diff, true);
        assert!(deco.contains("· /lib\n"));
        assert!(deco.contains("- /lib/old.py\n"));
    }

    #[test]
    fn test_render_report() {
        let report = SyncReport {
            succeeded: 3,
            directories_created: 1,
            failures: vec![OperationFailure {
                path: "/a.py".to_string(),
                action: "upload",
                error: "busy".to_string(),
            }],
            ..SyncReport::default()
        };
        let text = render_report(&report);
        assert!(text.starts_with("Finished with errors: 3 succeeded, 1 failed, 1 directory created"));
        assert!(text.contains("failed: upload /a.py: busy"));
    }
}
