// Report generation from the results store

use crate::data::{CrawlStatus, Database, LinkFilter, LinkRecord, UrlSummary};
use crate::error::Result;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }
}

/// Latest crawl of one URL plus the page metadata and stored links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub status: CrawlStatus,
    pub title: Option<String>,
    pub html_version: Option<String>,
    pub has_login_form: bool,
    pub links: Vec<LinkRecord>,
}

pub fn gather_report_data(db: &Database, url_id: i64, filter: LinkFilter) -> Result<ReportData> {
    let record = db.get_url(url_id)?;
    let status = db.crawl_status(url_id)?;
    let links = match status.crawl_id {
        Some(crawl_id) => db.links_for_crawl(crawl_id, filter)?,
        None => Vec::new(),
    };

    Ok(ReportData {
        status,
        title: record.title,
        html_version: record.html_version,
        has_login_form: record.has_login_form,
        links,
    })
}

pub fn render(format: ReportFormat, pages: &[ReportData]) -> Result<String> {
    Ok(match format {
        ReportFormat::Text => generate_text_report(pages),
        ReportFormat::Json => generate_json_report(pages)?,
        ReportFormat::Csv => generate_csv_report(pages),
    })
}

/// Color `text` by crawl/URL status
fn paint_status(status: &str, text: &str) -> String {
    match status {
        "completed" => text.green().to_string(),
        "error" => text.red().to_string(),
        "running" => text.cyan().to_string(),
        _ => text.yellow().to_string(),
    }
}

fn colored_code(code: Option<u16>) -> String {
    match code {
        Some(code @ 200..=299) => code.to_string().green().to_string(),
        Some(code @ 300..=399) => code.to_string().cyan().to_string(),
        Some(code @ 400..=499) => code.to_string().yellow().to_string(),
        Some(code) => code.to_string().red().to_string(),
        None => "---".red().to_string(),
    }
}

pub fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn generate_text_report(pages: &[ReportData]) -> String {
    let mut report = String::new();

    report.push_str(RULE);
    report.push('\n');
    report.push_str("                              LINKPROBE REPORT\n");
    report.push_str(RULE);
    report.push_str("\n\n");

    let broken: i64 = pages.iter().map(|p| p.status.broken_links).sum();
    report.push_str(&format!("Pages:         {}\n", pages.len()));
    report.push_str(&format!("Broken links:  {}\n\n", broken));

    for page in pages {
        let status = &page.status;
        let state = status.status.as_str();
        report.push_str(&format!("## {}  [{}]\n", status.url, paint_status(state, state)));

        if let Some(ref message) = status.error_message {
            report.push_str(&format!("  Error:         {}\n", message));
        }
        if let Some(ref title) = page.title {
            report.push_str(&format!("  Title:         {}\n", title));
        }
        if let Some(ref version) = page.html_version {
            report.push_str(&format!("  HTML version:  {}\n", version));
        }
        report.push_str(&format!(
            "  Login form:    {}\n",
            if page.has_login_form { "yes" } else { "no" }
        ));

        if let Some(headings) = status.heading_counts {
            report.push_str(&format!(
                "  Headings:      h1 {}  h2 {}  h3 {}  h4 {}  h5 {}  h6 {}\n",
                headings.h1, headings.h2, headings.h3, headings.h4, headings.h5, headings.h6
            ));
        }
        report.push_str(&format!(
            "  Links:         {} internal, {} external, {} broken\n",
            status.internal_links, status.external_links, status.broken_links
        ));

        if let Some(started) = status.started_at {
            report.push_str(&format!("  Started:       {}\n", format_timestamp(started)));
        }
        if let Some(completed) = status.completed_at {
            report.push_str(&format!("  Completed:     {}\n", format_timestamp(completed)));
        }

        let broken_links: Vec<&LinkRecord> =
            page.links.iter().filter(|l| !l.is_accessible).collect();
        if !broken_links.is_empty() {
            report.push_str("\n  Broken links:\n");
            for link in broken_links {
                report.push_str(&format!(
                    "    {} {}\n",
                    colored_code(link.status_code),
                    link.link_url
                ));
            }
        }
        report.push('\n');
    }

    report.push_str(RULE);
    report.push('\n');
    report
}

pub fn generate_json_report(
    pages: &[ReportData],
) -> std::result::Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "linkprobe",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json",
            },
            "summary": {
                "pages": pages.len(),
                "internal_links": pages.iter().map(|p| p.status.internal_links).sum::<i64>(),
                "external_links": pages.iter().map(|p| p.status.external_links).sum::<i64>(),
                "broken_links": pages.iter().map(|p| p.status.broken_links).sum::<i64>(),
            },
            "pages": pages,
        }
    });

    serde_json::to_string_pretty(&json_report)
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One row per stored link
pub fn generate_csv_report(pages: &[ReportData]) -> String {
    let mut csv = String::from("page_url,link_url,link_type,status_code,is_accessible,link_text\n");

    for page in pages {
        for link in &page.links {
            csv.push_str(&format!(
                "{},{},{},{},{},{}\n",
                csv_field(&page.status.url),
                csv_field(&link.link_url),
                link.link_type.as_str(),
                link.status_code.map(|c| c.to_string()).unwrap_or_default(),
                link.is_accessible,
                csv_field(&link.link_text),
            ));
        }
    }

    csv
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Table of stored URLs for `list`
pub fn generate_url_table(urls: &[UrlSummary]) -> String {
    let mut table = format!(
        "{:>5}  {:<10} {:>6} {:>6} {:>6}  {:<30} {}\n",
        "ID", "STATUS", "INT", "EXT", "BROKEN", "TITLE", "URL"
    );

    let count = |value: Option<i64>| {
        value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    for summary in urls {
        let record = &summary.record;
        // Pad before coloring so escape codes don't break alignment
        let status = format!("{:<10}", record.status.as_str());
        table.push_str(&format!(
            "{:>5}  {} {:>6} {:>6} {:>6}  {:<30} {}\n",
            record.id,
            paint_status(record.status.as_str(), &status),
            count(summary.internal_links),
            count(summary.external_links),
            count(summary.broken_links),
            truncate(record.title.as_deref().unwrap_or(""), 30),
            record.url,
        ));
    }

    table
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
