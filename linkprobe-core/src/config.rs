// Runtime settings shared by the CLI and the crawl orchestration

use linkprobe_scanner::crawler::{Crawler, CrawlerBuilder, DEFAULT_USER_AGENT};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/linkprobe/";
pub const DATABASE_FILE: &str = "linkprobe.db";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Per-request timeout for the page GET and each probe
    pub timeout_secs: u64,
    /// Pages inspected at the same time
    pub concurrency: usize,
    /// HEAD requests in flight per page
    pub probe_concurrency: usize,
    pub probe_internal: bool,
    pub include_subdomains: bool,
    pub user_agent: String,
    /// Age after which a crawl still marked running is treated as interrupted
    pub stale_after_secs: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            timeout_secs: 10,
            concurrency: 4,
            probe_concurrency: 8,
            probe_internal: false,
            include_subdomains: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            stale_after_secs: 3600,
        }
    }
}

impl Settings {
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn crawler_builder(&self) -> CrawlerBuilder {
        Crawler::builder()
            .with_timeout(self.timeout_secs)
            .with_probe_concurrency(self.probe_concurrency)
            .with_probe_internal(self.probe_internal)
            .with_include_subdomains(self.include_subdomains)
            .with_user_agent(self.user_agent.clone())
    }
}

/// Expand `~` and, when `path` names a directory (or ends with a separator),
/// append the database file name.
pub fn resolve_database_path(path: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
    if path.ends_with('/') || expanded.is_dir() {
        expanded.join(DATABASE_FILE)
    } else {
        expanded
    }
}

pub fn default_database_path() -> PathBuf {
    resolve_database_path(DEFAULT_CONFIG_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.timeout_secs, 10);
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.probe_concurrency, 8);
        assert!(!settings.probe_internal);
        assert!(settings.database_path.ends_with("linkprobe/linkprobe.db"));
    }

    #[test]
    fn test_resolve_database_path_directory() {
        let path = resolve_database_path("/tmp/some-linkprobe-dir/");
        assert_eq!(path, PathBuf::from("/tmp/some-linkprobe-dir/linkprobe.db"));
    }

    #[test]
    fn test_resolve_database_path_file() {
        let path = resolve_database_path("/tmp/custom.db");
        assert_eq!(path, PathBuf::from("/tmp/custom.db"));
    }

    #[test]
    fn test_resolve_database_path_tilde() {
        let path = resolve_database_path("~/x.db");
        assert!(!path.to_string_lossy().starts_with('~'));
    }
}
