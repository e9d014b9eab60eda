use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use clap::parser::ValueSource;
use colored::Colorize;
use linkprobe_core::config::{Settings, default_database_path, resolve_database_path};
use linkprobe_core::crawl::{CrawlOptions, CrawlOutcome, CrawlTarget, execute_crawl, rerun};
use linkprobe_core::data::{
    Database, LinkFilter, SortField, SortOrder, UrlFilter, UrlStatus,
};
use linkprobe_core::report::{self, ReportData, ReportFormat};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

// Helper functions for crawl handler

/// Load URLs from either a file or the `--url` arguments
pub fn load_urls_from_source(urls: &[Url], hosts_file: Option<&PathBuf>) -> Result<Vec<String>> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if !urls.is_empty() {
        Ok(urls.iter().map(|url| url.as_str().to_string()).collect())
    } else {
        bail!("Either --url or --hosts-file must be provided")
    }
}

/// Load and parse URLs from a file. Blank lines and `#` comments are ignored.
pub fn load_urls_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read hosts file {}", path.display()))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        bail!("No valid URLs found in {}", path.display());
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && matches!(url.scheme(), "http" | "https")
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if Url::parse(&with_scheme).is_ok() {
        return Some(with_scheme);
    }

    warn!("Skipping invalid URL '{}'", line);
    None
}

/// Install the stderr subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// `--db` when given, the default location otherwise
pub fn database_path(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<String>("db")
        .map(|path| resolve_database_path(path))
        .unwrap_or_else(default_database_path)
}

fn arg_value<T: Clone + Send + Sync + 'static>(args: &ArgMatches, id: &str) -> Option<T> {
    args.try_get_one::<T>(id).ok().flatten().cloned()
}

fn arg_flag(args: &ArgMatches, id: &str) -> bool {
    arg_value::<bool>(args, id).unwrap_or(false)
}

fn arg_ids(args: &ArgMatches) -> Vec<i64> {
    args.try_get_many::<i64>("IDS")
        .ok()
        .flatten()
        .map(|ids| ids.copied().collect())
        .unwrap_or_default()
}

/// Build crawl settings from whichever of the crawl flags `args` defines
pub fn settings_from_args(args: &ArgMatches, db_path: &Path) -> Settings {
    let mut settings = Settings::default().with_database_path(db_path);

    if let Some(timeout) = arg_value::<u64>(args, "timeout") {
        settings.timeout_secs = timeout;
    }
    if let Some(threads) = arg_value::<usize>(args, "threads") {
        settings.concurrency = threads.max(1);
    }
    if let Some(probes) = arg_value::<usize>(args, "probe-concurrency") {
        settings.probe_concurrency = probes.max(1);
    }
    if let Some(stale_after) = arg_value::<i64>(args, "stale-after") {
        settings.stale_after_secs = stale_after;
    }
    settings.probe_internal = arg_flag(args, "probe-internal");
    settings.include_subdomains = arg_flag(args, "include-subdomains");

    settings
}

fn report_format(args: &ArgMatches) -> Result<ReportFormat> {
    let format = arg_value::<String>(args, "format").unwrap_or_else(|| "text".to_string());
    ReportFormat::from_str(&format).ok_or_else(|| anyhow!("Unknown report format '{}'", format))
}

/// Print `content`, or write it to `output` when one is given
pub fn emit_report(content: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            report::save_report(content, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "{} Report saved: {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", content),
    }
    Ok(())
}

pub fn open_database(path: &Path) -> Result<Database> {
    if !Database::exists(path) {
        debug!("Creating database at {}", path.display());
    }
    Database::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

pub fn print_banner() {
    println!(
        "{} {}",
        "linkprobe".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

pub fn handle_init(args: &ArgMatches, db_override: Option<&String>) -> Result<()> {
    print_divider();
    println!("{}", "  LINKPROBE INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let path_arg = args
        .get_one::<String>("PATH")
        .ok_or_else(|| anyhow!("No database path given"))?;
    let db_path = match (args.value_source("PATH"), db_override) {
        (Some(ValueSource::DefaultValue), Some(db)) => resolve_database_path(db),
        _ => resolve_database_path(path_arg),
    };
    let force = args.get_flag("force");

    println!(
        "{} Target: {}",
        "→".blue(),
        db_path.display().to_string().bright_white()
    );
    println!();

    if Database::exists(&db_path) {
        let overwrite = if force {
            true
        } else {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists at:");
            println!(
                "  {} {}",
                "•".yellow(),
                db_path.display().to_string().bright_white()
            );
            println!();
            let response = print_prompt("Would you like to overwrite it? [y/N]:")?;
            println!();
            response == "y" || response == "yes"
        };

        if overwrite {
            Database::drop(&db_path)?;
            println!("{} Existing database removed", "✓".green().bold());
        } else {
            println!("{} Keeping existing database", "→".blue());
        }
        println!();
    }

    if !Database::exists(&db_path) {
        println!("{} Creating database...", "→".blue());
        Database::new(&db_path)
            .with_context(|| format!("Failed to create database {}", db_path.display()))?;
    }

    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

fn requested_urls(args: &ArgMatches) -> Result<Vec<String>> {
    let urls: Vec<Url> = args
        .try_get_many::<Url>("url")
        .ok()
        .flatten()
        .map(|urls| urls.cloned().collect())
        .unwrap_or_default();
    let hosts_file = args.try_get_one::<PathBuf>("hosts-file").ok().flatten();
    load_urls_from_source(&urls, hosts_file)
}

/// Register URLs; returns the ids in input order
pub fn handle_add(args: &ArgMatches, db_path: &Path) -> Result<Vec<i64>> {
    let urls = requested_urls(args)?;
    let db = open_database(db_path)?;

    let mut ids = Vec::with_capacity(urls.len());
    for url in &urls {
        match db.add_url(url) {
            Ok(id) => {
                println!("{} {} {}", "✓".green().bold(), format!("#{}", id).cyan(), url);
                ids.push(id);
            }
            Err(e) => println!("{} {}: {}", "✗".red().bold(), url, e),
        }
    }
    Ok(ids)
}

fn print_crawl_summary(outcomes: &[CrawlOutcome]) {
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    println!();
    if failed == 0 {
        println!(
            "{} Crawl complete! {} page(s) inspected",
            "✓".green().bold(),
            outcomes.len()
        );
    } else {
        println!(
            "{} Crawl complete with errors: {} of {} page(s) failed",
            "⚠".yellow().bold(),
            failed,
            outcomes.len()
        );
    }
    println!();
}

fn report_outcomes(db: &Database, outcomes: &[CrawlOutcome], args: &ArgMatches) -> Result<()> {
    if outcomes.is_empty() {
        println!("{} Nothing was crawled", "→".blue());
        return Ok(());
    }

    let format = report_format(args)?;
    let pages = outcomes
        .iter()
        .map(|outcome| report::gather_report_data(db, outcome.url_id, LinkFilter::All))
        .collect::<std::result::Result<Vec<ReportData>, _>>()?;
    let content = report::render(format, &pages)?;
    emit_report(&content, arg_value::<PathBuf>(args, "output").as_ref())
}

/// Turn failed pages into a non-zero exit once the report is out
fn ensure_all_succeeded(outcomes: &[CrawlOutcome]) -> Result<()> {
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    if failed > 0 {
        bail!("{} of {} page(s) failed", failed, outcomes.len());
    }
    Ok(())
}

fn progress_printer(quiet: bool) -> Option<linkprobe_core::crawl::CrawlProgressCallback> {
    if quiet {
        None
    } else {
        Some(Arc::new(|msg: String| {
            println!("{}", msg);
        }))
    }
}

pub async fn handle_crawl(args: &ArgMatches, db_path: &Path, quiet: bool) -> Result<()> {
    let urls = requested_urls(args)?;
    let settings = settings_from_args(args, db_path);
    let db = open_database(db_path)?;

    if !quiet {
        println!("\n{} Crawling {} page(s)", "→".blue().bold(), urls.len());
        println!("Workers: {}", settings.concurrency);
        println!("Probes per page: {}", settings.probe_concurrency);
        println!("Timeout: {}s", settings.timeout_secs);
        println!(
            "Probe internal links: {}\n",
            if settings.probe_internal { "yes" } else { "no" }
        );
    }

    let options = CrawlOptions {
        targets: urls.into_iter().map(CrawlTarget::Address).collect(),
        settings,
        show_progress_bars: !quiet,
    };

    let outcomes = execute_crawl(&db, options, progress_printer(quiet))
        .await
        .context("Crawl failed")?;

    if !quiet {
        print_crawl_summary(&outcomes);
    }
    report_outcomes(&db, &outcomes, args)?;
    ensure_all_succeeded(&outcomes)
}

/// Build the `list` query from its flags
pub fn url_filter_from_args(args: &ArgMatches) -> Result<UrlFilter> {
    let mut filter = UrlFilter {
        search: arg_value::<String>(args, "search").filter(|s| !s.trim().is_empty()),
        limit: arg_value::<usize>(args, "limit"),
        offset: arg_value::<usize>(args, "offset").unwrap_or(0),
        ..UrlFilter::default()
    };
    if let Some(status) = arg_value::<String>(args, "status") {
        filter.status = Some(
            UrlStatus::from_str(&status).ok_or_else(|| anyhow!("Unknown status '{}'", status))?,
        );
    }
    if let Some(sort) = arg_value::<String>(args, "sort") {
        filter.sort =
            SortField::from_str(&sort).ok_or_else(|| anyhow!("Unknown sort field '{}'", sort))?;
    }
    if let Some(order) = arg_value::<String>(args, "order") {
        filter.order =
            SortOrder::from_str(&order).ok_or_else(|| anyhow!("Unknown sort order '{}'", order))?;
    }
    Ok(filter)
}

pub fn handle_list(args: &ArgMatches, db_path: &Path) -> Result<()> {
    let filter = url_filter_from_args(args)?;
    let db = open_database(db_path)?;
    let urls = db.list_urls(&filter)?;

    if urls.is_empty() {
        if filter.search.is_none() && filter.status.is_none() && filter.offset == 0 {
            println!("No URLs stored yet. Add one with `linkprobe add -u <URL>`.");
        } else {
            println!("No stored URLs match.");
        }
        return Ok(());
    }

    print!("{}", report::generate_url_table(&urls));
    let total = db.count_urls(&filter)?;
    if (urls.len() as i64) < total {
        println!("{} Showing {} of {} URL(s)", "→".blue(), urls.len(), total);
    }
    Ok(())
}

/// `--broken` is shorthand for `--type broken`
pub fn link_filter_from_args(args: &ArgMatches) -> Result<LinkFilter> {
    if arg_flag(args, "broken") {
        return Ok(LinkFilter::Broken);
    }
    let kind = arg_value::<String>(args, "type").unwrap_or_default();
    LinkFilter::from_str(&kind).ok_or_else(|| anyhow!("Unknown link type '{}'", kind))
}

pub fn handle_show(args: &ArgMatches, db_path: &Path) -> Result<()> {
    let id = *args
        .get_one::<i64>("ID")
        .ok_or_else(|| anyhow!("No URL id given"))?;
    let db = open_database(db_path)?;

    let data = report::gather_report_data(&db, id, link_filter_from_args(args)?)?;
    let content = report::render(report_format(args)?, &[data])?;
    emit_report(&content, arg_value::<PathBuf>(args, "output").as_ref())
}

pub async fn handle_rerun(args: &ArgMatches, db_path: &Path, quiet: bool) -> Result<()> {
    let db = open_database(db_path)?;
    let ids = if args.get_flag("all") {
        db.live_url_ids()?
    } else {
        arg_ids(args)
    };

    if ids.is_empty() {
        println!("{} No stored URLs to crawl", "→".blue());
        return Ok(());
    }

    let settings = settings_from_args(args, db_path);
    let outcomes = rerun(&db, &ids, settings, !quiet, progress_printer(quiet))
        .await
        .context("Rerun failed")?;

    if !quiet {
        print_crawl_summary(&outcomes);
    }
    report_outcomes(&db, &outcomes, args)?;
    ensure_all_succeeded(&outcomes)
}

/// Soft-delete each id; returns how many were removed
pub fn handle_remove(args: &ArgMatches, db_path: &Path) -> Result<usize> {
    let db = open_database(db_path)?;
    let mut removed = 0;

    for id in arg_ids(args) {
        match db.delete_url(id) {
            Ok(()) => {
                println!("{} Removed #{}", "✓".green().bold(), id);
                removed += 1;
            }
            Err(e) => println!("{} {}", "✗".red().bold(), e),
        }
    }
    Ok(removed)
}
