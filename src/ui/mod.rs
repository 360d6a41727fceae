use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{AnalysisReport, Category, Finding, FindingSource, ReportStatus, Severity};
use crate::rules::Rule;

const MAX_ISSUE_CHARS: usize = 96;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "next:");
    let _ = writeln!(stderr, "  - re-run with `--verbose` for details");
    let _ = writeln!(
        stderr,
        "  - see `infralens --help` for available commands and options"
    );
}

pub fn print_report(report: &AnalysisReport, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_report(&mut out, report, cfg);
}

pub fn write_report(out: &mut dyn Write, report: &AnalysisReport, cfg: &UiConfig) {
    let findings: Vec<&Finding> = report.findings().collect();
    let ai_count = findings
        .iter()
        .filter(|f| f.source == FindingSource::Ai)
        .count();

    let _ = writeln!(
        out,
        "Status: {}  findings={} (rule={} ai={})  issues={} optimizations={}",
        format_status(report.status, cfg.color),
        findings.len(),
        findings.len() - ai_count,
        ai_count,
        report.issues.len(),
        report.optimizations.len()
    );
    if let Some(usage) = &report.token_usage {
        let _ = writeln!(
            out,
            "Tokens: input={} output={} estimated cost=${:.4}",
            usage.input_tokens, usage.output_tokens, usage.estimated_cost
        );
    }
    for note in &report.notes {
        let _ = writeln!(out, "- {note}");
    }

    let _ = writeln!(out);
    if findings.is_empty() {
        let _ = writeln!(out, "No findings.");
        return;
    }

    let mut ordered = findings.clone();
    // stable: declaration order is kept within a severity
    ordered.sort_by_key(|f| std::cmp::Reverse(f.severity));
    let rows = cfg.max_table_rows.min(ordered.len());
    if ordered.len() > rows {
        let _ = writeln!(out, "Findings (showing {rows} of {}):", ordered.len());
    } else {
        let _ = writeln!(out, "Findings ({rows}):");
    }
    print_findings_table(out, &ordered, rows, cfg.color);

    if !report.recommendations.is_empty() {
        let _ = writeln!(out);
        let shown = report.recommendations.len().min(cfg.max_table_rows.max(1));
        let _ = writeln!(out, "Recommendations:");
        for rec in report.recommendations.iter().take(shown) {
            let _ = writeln!(out, "- {rec}");
        }
        if report.recommendations.len() > shown {
            let _ = writeln!(
                out,
                "- ... ({} more)",
                report.recommendations.len() - shown
            );
        }
    }
}

pub fn print_rules(rules: &[&'static Rule], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();

    let id_w = rules
        .iter()
        .map(|r| visible_width_ansi(r.id))
        .max()
        .unwrap_or(0)
        .max(2);
    let group_w = rules
        .iter()
        .map(|r| visible_width_ansi(r.group.as_str()))
        .max()
        .unwrap_or(0)
        .max(5);
    let family_w = "observability".len();

    let _ = writeln!(
        out,
        "{}  {}  {}  TYPES",
        pad_end_display("ID", id_w),
        pad_end_display("GROUP", group_w),
        pad_end_display("FAMILY", family_w)
    );
    for rule in rules {
        let _ = writeln!(
            out,
            "{}  {}  {}  {}",
            pad_end_display(rule.id, id_w),
            pad_end_display(rule.group.as_str(), group_w),
            pad_end_display(&rule.group.family().to_string(), family_w),
            rule.resource_types.join(", ")
        );
    }
}

pub fn print_search_results(query: &str, findings: &[Finding], total: usize, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if findings.is_empty() {
        let _ = writeln!(out, "No indexed findings match `{query}`.");
        return;
    }
    if total > findings.len() {
        let _ = writeln!(
            out,
            "Matches for `{query}` (showing {} of {total}):",
            findings.len()
        );
    } else {
        let _ = writeln!(out, "Matches for `{query}` ({total}):");
    }
    let refs: Vec<&Finding> = findings.iter().collect();
    print_findings_table(&mut out, &refs, refs.len(), cfg.color);
}

fn print_findings_table(out: &mut dyn Write, findings: &[&Finding], rows: usize, color: bool) {
    let label_sev = "SEVERITY";
    let label_cat = "CATEGORY";
    let label_src = "SOURCE";
    let label_res = "RESOURCE";
    let label_issue = "ISSUE";

    let sev_w = visible_width_ansi(label_sev);
    let cat_w = Category::ALL
        .iter()
        .map(|c| visible_width_ansi(c.as_str()))
        .max()
        .unwrap_or(0);
    let src_w = visible_width_ansi(label_src);
    let res_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(&f.resource))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_res));

    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}",
        pad_end_display(label_sev, sev_w),
        pad_end_display(label_cat, cat_w),
        pad_end_display(label_src, src_w),
        pad_end_display(label_res, res_w),
        label_issue
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}  {}",
        "-".repeat(sev_w),
        "-".repeat(cat_w),
        "-".repeat(src_w),
        "-".repeat(res_w),
        "-".repeat(visible_width_ansi(label_issue))
    );

    for finding in findings.iter().take(rows) {
        let sev = pad_end_ansi(&format_severity(finding.severity, color), sev_w);
        let cat = pad_end_display(finding.category.as_str(), cat_w);
        let src = pad_end_display(source_label(finding.source), src_w);
        let res = pad_end_display(&finding.resource, res_w);
        let issue = truncate_middle(&finding.issue, MAX_ISSUE_CHARS);
        let _ = writeln!(out, "{sev}  {cat}  {src}  {res}  {issue}");
    }
}

fn source_label(source: FindingSource) -> &'static str {
    match source {
        FindingSource::Rule => "rule",
        FindingSource::Ai => "ai",
    }
}

fn format_severity(severity: Severity, color: bool) -> String {
    let s = severity.as_str();
    if !color {
        return s.to_string();
    }

    let code = match severity {
        Severity::Low => "90",
        Severity::Medium => "33",
        Severity::High => "31",
        Severity::Critical => "1;31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn format_status(status: ReportStatus, color: bool) -> String {
    let (s, code) = match status {
        ReportStatus::Passed => ("passed", "32"),
        ReportStatus::Failed => ("failed", "31"),
    };
    if !color {
        return s.to_string();
    }
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s.chars().skip(len - right).collect();

    format!("{prefix}...{suffix}")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    pad_end_ansi(s, width)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
