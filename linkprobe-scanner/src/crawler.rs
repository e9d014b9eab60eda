use crate::classify::{self, ClassifyPolicy};
use crate::error::{Result, ScanError};
use crate::page;
use crate::probe::Prober;
use crate::result::PageReport;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = concat!(
    "linkprobe/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/trapdoorsec/linkprobe)"
);

/// Inspects single pages: fetch, parse, classify, probe, aggregate.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Crawler {
    client: Client,
    prober: Prober,
    policy: ClassifyPolicy,
}

pub struct CrawlerBuilder {
    timeout_secs: u64,
    probe_concurrency: usize,
    probe_internal: bool,
    include_subdomains: bool,
    user_agent: String,
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            probe_concurrency: 8,
            probe_internal: false,
            include_subdomains: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerBuilder {
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs.max(1);
        self
    }

    pub fn with_probe_concurrency(mut self, concurrency: usize) -> Self {
        self.probe_concurrency = concurrency;
        self
    }

    pub fn with_probe_internal(mut self, probe_internal: bool) -> Self {
        self.probe_internal = probe_internal;
        self
    }

    pub fn with_include_subdomains(mut self, include_subdomains: bool) -> Self {
        self.include_subdomains = include_subdomains;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<Crawler> {
        let timeout = Duration::from_secs(self.timeout_secs);
        let client = Client::builder()
            .user_agent(self.user_agent)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs((self.timeout_secs / 2).max(1)))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        let prober = Prober::new(client.clone(), self.probe_concurrency)
            .with_probe_internal(self.probe_internal);

        Ok(Crawler {
            client,
            prober,
            policy: ClassifyPolicy {
                include_subdomains: self.include_subdomains,
            },
        })
    }
}

impl Crawler {
    pub fn builder() -> CrawlerBuilder {
        CrawlerBuilder::default()
    }

    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub async fn inspect(&self, url: &str) -> Result<PageReport> {
        let target = parse_target(url)?;
        info!("Inspecting {}", target);

        let fetched = page::fetch(&self.client, &target).await?;
        if fetched.final_url != target {
            debug!("{} redirected to {}", target, fetched.final_url);
        }

        let data = page::extract(&fetched.body);
        let classified = classify::classify_all(&fetched.final_url, &data.links, self.policy);
        let checks = self.prober.probe_links(&classified).await?;

        let mut report = PageReport::new(
            url.to_string(),
            fetched.final_url.to_string(),
            fetched.status_code,
            data,
            checks,
        );
        report.content_type = fetched.content_type;
        report.content_length = fetched.content_length;
        report.response_time = fetched.response_time;

        info!(
            "Inspected {}: {} internal, {} external, {} broken",
            url, report.counts.internal, report.counts.external, report.counts.broken
        );
        Ok(report)
    }
}

fn parse_target(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ScanError::InvalidUrl(format!(
            "{}: unsupported scheme '{}'",
            url, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::LinkType;
    use crate::page::HtmlVersion;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    async fn serve_html(server: &MockServer, route: &str, html: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_bytes(html.into_bytes()),
            )
            .mount(server)
            .await;
    }

    fn crawler() -> Crawler {
        Crawler::builder().with_timeout(3).build().unwrap()
    }

    /// Both mock servers share a host, so the differing port makes the second external
    #[tokio::test]
    async fn test_inspect_page() {
        let site = MockServer::start().await;
        let elsewhere = MockServer::start().await;

        let html = format!(
            r#"<!DOCTYPE html>
            <html>
            <head><title>Test Page</title></head>
            <body>
                <h1>Main Title</h1>
                <h2>Subtitle</h2>
                <h3>Section</h3>
                <a href="/internal">Internal Link</a>
                <a href="{0}/alive">External Link</a>
                <a href="{0}/dead">Dead Link</a>
                <a href="mailto:someone@example.com">Mail</a>
                <form><input name="username"><input type="password"></form>
            </body>
            </html>"#,
            elsewhere.uri()
        );
        serve_html(&site, "/", html).await;

        Mock::given(method("HEAD"))
            .and(path("/alive"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&elsewhere)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/dead"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&elsewhere)
            .await;

        let report = crawler().inspect(&site.uri()).await.unwrap();

        assert_eq!(report.status_code, 200);
        assert_eq!(report.title.as_deref(), Some("Test Page"));
        assert_eq!(report.html_version, HtmlVersion::Html5);
        assert_eq!(report.heading_counts.h1, 1);
        assert_eq!(report.heading_counts.h2, 1);
        assert_eq!(report.heading_counts.h3, 1);
        assert!(report.has_login_form);
        assert_eq!(report.links.len(), 3);
        assert_eq!(report.counts.internal, 1);
        assert_eq!(report.counts.external, 2);
        assert_eq!(report.counts.broken, 1);
        assert_eq!(report.links[0].link.link_type, LinkType::Internal);

        let broken: Vec<_> = report.broken_links().collect();
        assert_eq!(broken.len(), 1);
        assert!(broken[0].link.url.ends_with("/dead"));
    }

    #[tokio::test]
    async fn test_inspect_http_error() {
        let site = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&site)
            .await;

        let err = crawler().inspect(&site.uri()).await.unwrap_err();
        assert!(matches!(err, ScanError::Status { code: 404, .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_inspect_connection_refused() {
        let err = crawler().inspect("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, ScanError::HttpError(_)));
        assert!(err.to_string().starts_with("HTTP request failed"));
    }

    #[tokio::test]
    async fn test_inspect_rejects_bad_urls() {
        let err = crawler().inspect("not a url").await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidUrl(_)));

        let err = crawler().inspect("ftp://example.com/file").await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_links_resolve_against_redirect_target() {
        let site = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "/new/index.html"),
            )
            .mount(&site)
            .await;
        serve_html(
            &site,
            "/new/index.html",
            r#"<html><body><a href="sibling.html">Sibling</a></body></html>"#.to_string(),
        )
        .await;

        let report = crawler()
            .inspect(&format!("{}/old", site.uri()))
            .await
            .unwrap();

        assert!(report.final_url.ends_with("/new/index.html"));
        assert_eq!(report.links.len(), 1);
        assert!(report.links[0].link.url.ends_with("/new/sibling.html"));
        assert_eq!(report.counts.internal, 1);
    }
}
