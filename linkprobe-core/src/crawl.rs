use crate::config::Settings;
use crate::data::Database;
use crate::error::{CoreError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use linkprobe_scanner::{Crawler, PageReport};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

/// What to crawl: a new address, or a URL already in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlTarget {
    Address(String),
    Existing(i64),
}

impl fmt::Display for CrawlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlTarget::Address(address) => write!(f, "{}", address),
            CrawlTarget::Existing(id) => write!(f, "#{}", id),
        }
    }
}

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub targets: Vec<CrawlTarget>,
    pub settings: Settings,
    pub show_progress_bars: bool,
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug)]
pub struct CrawlOutcome {
    pub url_id: i64,
    pub crawl_id: i64,
    pub url: String,
    /// The page report, or the message stored on the failed crawl
    pub result: std::result::Result<PageReport, String>,
}

impl CrawlOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

struct Job {
    url_id: i64,
    crawl_id: i64,
    url: String,
}

/// Crawl every target, stopping early on Ctrl-C
pub async fn execute_crawl(
    db: &Database,
    options: CrawlOptions,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<Vec<CrawlOutcome>> {
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    execute_crawl_until(db, options, progress_callback, interrupted).await
}

/// Re-run existing URLs by id
pub async fn rerun(
    db: &Database,
    url_ids: &[i64],
    settings: Settings,
    show_progress_bars: bool,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<Vec<CrawlOutcome>> {
    let options = CrawlOptions {
        targets: url_ids.iter().copied().map(CrawlTarget::Existing).collect(),
        settings,
        show_progress_bars,
    };
    execute_crawl(db, options, progress_callback).await
}

/// Crawl every target until `shutdown` resolves.
///
/// Pages are inspected on spawned tasks, at most `settings.concurrency` at a
/// time. Only this task touches the database: results come back over a
/// channel and are written as they arrive. Crawls still outstanding when
/// `shutdown` fires are failed with `cancelled`.
pub async fn execute_crawl_until<F>(
    db: &Database,
    options: CrawlOptions,
    progress_callback: Option<CrawlProgressCallback>,
    shutdown: F,
) -> Result<Vec<CrawlOutcome>>
where
    F: Future<Output = ()>,
{
    let CrawlOptions {
        targets,
        settings,
        show_progress_bars,
    } = options;

    let report = |msg: String| {
        if let Some(ref callback) = progress_callback {
            callback(msg);
        }
    };

    db.recover_interrupted(settings.stale_after_secs)?;
    let crawler = settings.crawler_builder().build()?;

    let jobs = prepare_jobs(db, &targets, &report)?;
    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new(jobs.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.set_message("Inspecting...");
        Some(pb)
    } else {
        None
    };

    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handles = Vec::with_capacity(jobs.len());

    for (index, job) in jobs.iter().enumerate() {
        let crawler: Crawler = crawler.clone();
        let semaphore = semaphore.clone();
        let tx = tx.clone();
        let url = job.url.clone();

        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let result = crawler.inspect(&url).await.map_err(|e| e.to_string());
            let _ = tx.send((index, result));
        }));
    }
    drop(tx);

    let mut outcomes: Vec<Option<CrawlOutcome>> = jobs.iter().map(|_| None).collect();
    let mut cancelled = false;
    let mut failure = None;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some((index, result)) = message else {
                    break;
                };
                let job = &jobs[index];

                if let Err(e) = record_result(db, job, &result) {
                    error!("Failed to record crawl of {}: {}", job.url, e);
                    handles.iter().for_each(|h| h.abort());
                    failure = Some(e);
                    break;
                }

                match &result {
                    Ok(page) => report(format!(
                        "[+] {} ({} internal, {} external, {} broken)",
                        job.url, page.counts.internal, page.counts.external, page.counts.broken
                    )),
                    Err(e) => report(format!("[!] {}: {}", job.url, e)),
                }
                if let Some(ref pb) = progress_bar {
                    pb.inc(1);
                }

                outcomes[index] = Some(CrawlOutcome {
                    url_id: job.url_id,
                    crawl_id: job.crawl_id,
                    url: job.url.clone(),
                    result,
                });
            }
            _ = &mut shutdown, if !cancelled => {
                warn!("Crawl interrupted, cancelling outstanding pages");
                cancelled = true;
                handles.iter().for_each(|h| h.abort());
            }
        }
    }

    if let Some(e) = failure {
        let message = format!("aborted: {}", e);
        let unfinished = jobs
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| outcome.is_none())
            .map(|(job, _)| job);
        abandon(db, unfinished, &message);
        if let Some(ref pb) = progress_bar {
            pb.abandon_with_message("Aborted");
        }
        return Err(e);
    }

    let mut finished = Vec::with_capacity(jobs.len());
    for (job, outcome) in jobs.iter().zip(outcomes) {
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                let message = "cancelled".to_string();
                abandon(db, [job], &message);
                report(format!("[!] {}: {}", job.url, message));
                CrawlOutcome {
                    url_id: job.url_id,
                    crawl_id: job.crawl_id,
                    url: job.url.clone(),
                    result: Err(message),
                }
            }
        };
        finished.push(outcome);
    }

    if let Some(ref pb) = progress_bar {
        let ok = finished.iter().filter(|o| o.is_success()).count();
        pb.finish_with_message(format!("Done! {}/{} pages inspected", ok, finished.len()));
    }

    info!(
        "Crawl run finished: {} page(s), {} failed",
        finished.len(),
        finished.iter().filter(|o| !o.is_success()).count()
    );
    Ok(finished)
}

/// Register targets and open one crawl per distinct URL. Targets that cannot
/// be registered or are already being crawled are reported and skipped.
fn prepare_jobs(
    db: &Database,
    targets: &[CrawlTarget],
    report: &impl Fn(String),
) -> Result<Vec<Job>> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::new();

    for target in targets {
        let resolved = match target {
            CrawlTarget::Address(address) => db
                .add_url(address)
                .and_then(|id| db.get_url(id).map(|record| (id, record.url))),
            CrawlTarget::Existing(id) => db.get_url(*id).map(|record| (*id, record.url)),
        };

        let (url_id, url) = match resolved {
            Ok(found) => found,
            Err(e @ (CoreError::InvalidUrl(_) | CoreError::NotFound(_))) => {
                report(format!("[!] Skipping {}: {}", target, e));
                continue;
            }
            Err(e) => {
                abandon(db, &jobs, &format!("aborted: {}", e));
                return Err(e);
            }
        };

        if !seen.insert(url_id) {
            debug!("Skipping duplicate target {}", url);
            continue;
        }

        let crawl_id = match db.begin_crawl(url_id) {
            Ok(id) => id,
            Err(e @ CoreError::Busy(_)) => {
                report(format!("[!] Skipping {}: {}", url, e));
                continue;
            }
            Err(e) => {
                abandon(db, &jobs, &format!("aborted: {}", e));
                return Err(e);
            }
        };

        jobs.push(Job {
            url_id,
            crawl_id,
            url,
        });
    }

    Ok(jobs)
}

fn record_result(
    db: &Database,
    job: &Job,
    result: &std::result::Result<PageReport, String>,
) -> Result<()> {
    match result {
        Ok(page) => db.complete_crawl(job.crawl_id, page),
        Err(message) => {
            warn!("Crawl of {} failed: {}", job.url, message);
            db.fail_crawl(job.crawl_id, message)
        }
    }
}

/// Fail crawls a run opened but will not finish, so the next run is not
/// refused with `Busy`. Errors here are logged and the original one is kept.
fn abandon<'a>(db: &Database, jobs: impl IntoIterator<Item = &'a Job>, message: &str) {
    for job in jobs {
        if let Err(e) = db.fail_crawl(job.crawl_id, message) {
            warn!("Could not mark crawl of {} as failed: {}", job.url, e);
        }
    }
}
