// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

pub use handlers::{load_urls_from_file, load_urls_from_source, parse_url_line, settings_from_args};

// Re-export crawl functionality from linkprobe-core
pub use linkprobe_core::crawl::{
    CrawlOptions, CrawlOutcome, CrawlProgressCallback, CrawlTarget, execute_crawl, rerun,
};
