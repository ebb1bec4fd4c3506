use std::fmt::Write;

use causegraph_graph::{GraphCounts, RowReport, RunSummary};

use crate::loader::UnreadableRow;

/// Problem rows listed per section before the rest are elided.
const MAX_LISTED: usize = 20;

/// Operator-facing end-of-run report.
pub fn render_summary(
    summary: &RunSummary,
    unreadable: &[UnreadableRow],
    counts: Option<&GraphCounts>,
) -> String {
    let mut out = String::new();

    let status = if summary.interrupted { "interrupted" } else { "finished" };
    let _ = writeln!(out, "Ingestion {status}: {} rows processed", summary.rows_seen());
    let _ = writeln!(out, "  fully upserted:     {}", summary.complete);
    let _ = writeln!(out, "  partially upserted: {}", summary.partial.len());
    let _ = writeln!(out, "  skipped:            {}", summary.skipped.len());
    if !unreadable.is_empty() {
        let _ = writeln!(out, "  unreadable:         {}", unreadable.len());
    }
    if let Some(counts) = counts {
        let _ = writeln!(out, "Graph: {counts}");
    }

    list_rows(&mut out, "Partially upserted rows", &summary.partial);
    list_rows(&mut out, "Skipped rows", &summary.skipped);

    if !unreadable.is_empty() {
        let _ = writeln!(out, "Unreadable rows:");
        for row in unreadable.iter().take(MAX_LISTED) {
            let line = row
                .line
                .map(|l| l.to_string())
                .unwrap_or_else(|| "?".to_string());
            let _ = writeln!(out, "  row {} (line {line}): {}", row.row, row.reason);
        }
        elided(&mut out, unreadable.len());
    }

    out
}

fn list_rows(out: &mut String, title: &str, rows: &[RowReport]) {
    if rows.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title}:");
    for r in rows.iter().take(MAX_LISTED) {
        let oid = r.oid.as_deref().unwrap_or("(no Oid)");
        let _ = writeln!(out, "  row {} [{oid}]: {}", r.row, r.reasons.join("; "));
    }
    elided(out, rows.len());
}

fn elided(out: &mut String, total: usize) {
    if total > MAX_LISTED {
        let _ = writeln!(out, "  ... and {} more", total - MAX_LISTED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(row: usize, oid: Option<&str>, reason: &str) -> RowReport {
        RowReport {
            row,
            oid: oid.map(str::to_string),
            reasons: vec![reason.to_string()],
        }
    }

    #[test]
    fn distinguishes_complete_partial_and_skipped() {
        let summary = RunSummary {
            complete: 5,
            partial: vec![report(
                2,
                Some("20230115X00002"),
                "Malformed Vehicles data",
            )],
            skipped: vec![report(4, None, "Row 4 is missing required field Oid")],
            interrupted: false,
        };
        let text = render_summary(&summary, &[], Some(&GraphCounts::default()));

        assert!(text.starts_with("Ingestion finished: 7 rows processed"));
        assert!(text.contains("fully upserted:     5"));
        assert!(text.contains("partially upserted: 1"));
        assert!(text.contains("row 2 [20230115X00002]: Malformed Vehicles data"));
        assert!(text.contains("row 4 [(no Oid)]"));
        assert!(text.contains("Graph: 0 Accident"));
        assert!(!text.contains("unreadable"));
    }

    #[test]
    fn long_lists_are_elided() {
        let summary = RunSummary {
            skipped: (1..=25).map(|i| report(i, Some("x"), "down")).collect(),
            interrupted: true,
            ..Default::default()
        };
        let unreadable = vec![UnreadableRow {
            row: 8,
            line: Some(9),
            reason: "found record with 3 fields".into(),
        }];
        let text = render_summary(&summary, &unreadable, None);

        assert!(text.starts_with("Ingestion interrupted"));
        assert!(text.contains("... and 5 more"));
        assert!(text.contains("row 8 (line 9): found record with 3 fields"));
    }
}
