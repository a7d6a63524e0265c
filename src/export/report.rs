use std::fmt::Write;

use chrono::{DateTime, Local, Utc};

use crate::models::{ArchiveStats, RunRecord};

const RULE_WIDTH: usize = 50;

/// Plain-text archive report, shared by `--stats` and the statistics export.
pub fn render_statistics(stats: &ArchiveStats, last_run: Option<&RunRecord>) -> String {
    let mut out = String::new();
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);

    // Writing into a String cannot fail.
    let _ = writeln!(out, "MARQUEE COLLECTOR STATISTICS");
    let _ = writeln!(out, "{heavy}");
    let _ = writeln!(out, "Generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out);

    let _ = writeln!(out, "OVERALL STATISTICS");
    let _ = writeln!(out, "{light}");
    let _ = writeln!(out, "Total Articles: {}", thousands(stats.total));
    let _ = writeln!(out, "Canonical Articles: {}", thousands(stats.canonical));
    let _ = writeln!(out, "Total Characters: {}", thousands(stats.total_chars));
    let _ = writeln!(out, "Average Length: {} chars", thousands(stats.avg_length.round() as i64));
    let _ = writeln!(out, "Earliest Article: {}", date_or_na(stats.earliest));
    let _ = writeln!(out, "Latest Article: {}", date_or_na(stats.latest));
    let _ = writeln!(out, "Duplicates Filtered: {}", thousands(stats.duplicates));

    if !stats.by_source.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "BY SOURCE");
        let _ = writeln!(out, "{light}");
        for source in &stats.by_source {
            let _ = writeln!(out, "{}:", source.source);
            let _ = writeln!(out, "  Articles: {}", thousands(source.count));
            let _ = writeln!(
                out,
                "  Avg Length: {} chars",
                thousands(source.avg_length.round() as i64)
            );
        }
    }

    if let Some(run) = last_run {
        let s = &run.stats;
        let _ = writeln!(out);
        let _ = writeln!(out, "LAST RUN");
        let _ = writeln!(out, "{light}");
        let _ = writeln!(out, "Started: {}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "Status: {}", run.status.as_str());
        let _ = writeln!(out, "Fetched: {}", s.fetched);
        let _ = writeln!(out, "New: {}", s.new);
        let _ = writeln!(out, "Duplicates: {} exact, {} near", s.duplicates, s.near_duplicates);
        let _ = writeln!(out, "Skipped: {} existing, {} old", s.skipped_existing, s.skipped_old);
        let _ = writeln!(out, "Failed: {}", s.failed);
        let _ = writeln!(out, "Extraction Failed: {}", s.extraction_failed);
    }

    out
}

fn date_or_na(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if n < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}
