// Reachability checks for discovered links

use crate::classify::{ClassifiedLink, LinkType};
use crate::error::{Result, ScanError};
use futures::future::try_join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Outcome of a single HEAD request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status_code: Option<u16>,
    pub accessible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Outcome recorded for links that were not probed
    pub fn skipped() -> Self {
        Self {
            status_code: None,
            accessible: true,
            error: None,
        }
    }

    pub fn from_status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            accessible: status_code < 400,
            error: None,
        }
    }

    pub fn unreachable(error: String) -> Self {
        Self {
            status_code: None,
            accessible: false,
            error: Some(error),
        }
    }
}

/// A classified link together with its probe outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCheck {
    #[serde(flatten)]
    pub link: ClassifiedLink,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
}

impl LinkCheck {
    pub fn is_broken(&self) -> bool {
        !self.outcome.accessible
    }
}

#[derive(Clone)]
pub struct Prober {
    client: Client,
    concurrency: usize,
    probe_internal: bool,
}

impl Prober {
    pub fn new(client: Client, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            probe_internal: false,
        }
    }

    pub fn with_probe_internal(mut self, probe_internal: bool) -> Self {
        self.probe_internal = probe_internal;
        self
    }

    fn should_probe(&self, link: &ClassifiedLink) -> bool {
        link.link_type == LinkType::External || self.probe_internal
    }

    /// One HEAD request. Transport failures and statuses of 400 or more are
    /// reported as broken; nothing is retried.
    pub async fn probe(&self, url: &str) -> ProbeOutcome {
        match self.client.head(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status >= 400 {
                    debug!("{} answered {}", url, status);
                }
                ProbeOutcome::from_status(status)
            }
            Err(e) => {
                warn!("Link {} unreachable: {}", url, e);
                ProbeOutcome::unreachable(e.to_string())
            }
        }
    }

    /// Probe every distinct URL once, with at most `concurrency` requests in
    /// flight, and return one check per input link in input order.
    pub async fn probe_links(&self, links: &[ClassifiedLink]) -> Result<Vec<LinkCheck>> {
        let mut seen = HashSet::new();
        let targets: Vec<String> = links
            .iter()
            .filter(|link| self.should_probe(link))
            .filter(|link| seen.insert(link.url.clone()))
            .map(|link| link.url.clone())
            .collect();

        debug!(
            "Probing {} distinct URLs ({} links) with concurrency {}",
            targets.len(),
            links.len(),
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(targets.len());

        for url in targets {
            let prober = self.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ScanError::Other(format!("Probe semaphore closed: {}", e)))?;
                let outcome = prober.probe(&url).await;
                Ok::<_, ScanError>((url, outcome))
            }));
        }

        let mut outcomes = HashMap::new();
        for joined in try_join_all(handles).await? {
            let (url, outcome) = joined?;
            outcomes.insert(url, outcome);
        }

        Ok(links
            .iter()
            .map(|link| LinkCheck {
                outcome: outcomes
                    .get(&link.url)
                    .cloned()
                    .unwrap_or_else(ProbeOutcome::skipped),
                link: link.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn external(url: String) -> ClassifiedLink {
        ClassifiedLink {
            url,
            text: String::new(),
            link_type: LinkType::External,
        }
    }

    fn internal(url: String) -> ClassifiedLink {
        ClassifiedLink {
            url,
            text: String::new(),
            link_type: LinkType::Internal,
        }
    }

    fn client() -> Client {
        Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_probe_marks_error_statuses_broken() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/moved"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&mock_server)
            .await;

        let prober = Prober::new(client(), 4);
        let links = vec![
            external(format!("{}/ok", mock_server.uri())),
            external(format!("{}/gone", mock_server.uri())),
            external(format!("{}/moved", mock_server.uri())),
        ];

        let checks = prober.probe_links(&links).await.unwrap();
        assert_eq!(checks.len(), 3);
        assert_eq!(checks[0].outcome, ProbeOutcome::from_status(200));
        assert!(checks[1].is_broken());
        assert_eq!(checks[1].outcome.status_code, Some(404));
        assert!(!checks[2].is_broken());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_broken() {
        // Port 9 on localhost (discard) is closed on test machines
        let prober = Prober::new(client(), 2);
        let links = vec![external("http://127.0.0.1:9/".to_string())];

        let checks = prober.probe_links(&links).await.unwrap();
        assert!(checks[0].is_broken());
        assert_eq!(checks[0].outcome.status_code, None);
        assert!(checks[0].outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_internal_links_skipped_by_default() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        let prober = Prober::new(client(), 2);
        let links = vec![internal(format!("{}/page", mock_server.uri()))];

        let checks = prober.probe_links(&links).await.unwrap();
        assert_eq!(checks[0].outcome, ProbeOutcome::skipped());
    }

    #[tokio::test]
    async fn test_internal_links_probed_when_enabled() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let prober = Prober::new(client(), 2).with_probe_internal(true);
        let links = vec![internal(format!("{}/page", mock_server.uri()))];

        let checks = prober.probe_links(&links).await.unwrap();
        assert!(checks[0].is_broken());
    }

    #[tokio::test]
    async fn test_duplicate_urls_probed_once() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/dup"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let prober = Prober::new(client(), 4);
        let url = format!("{}/dup", mock_server.uri());
        let links = vec![external(url.clone()), external(url.clone()), external(url)];

        let checks = prober.probe_links(&links).await.unwrap();
        assert_eq!(checks.len(), 3);
        assert!(checks.iter().all(|c| c.outcome.status_code == Some(200)));
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let prober = Prober::new(client(), 0);
        let links = vec![external(format!("{}/a", mock_server.uri()))];

        let checks = prober.probe_links(&links).await.unwrap();
        assert_eq!(checks[0].outcome.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_probe_single_url() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/teapot"))
            .respond_with(ResponseTemplate::new(418))
            .expect(1)
            .mount(&mock_server)
            .await;

        let prober = Prober::new(client(), 1);
        let outcome = prober.probe(&format!("{}/teapot", mock_server.uri())).await;
        assert_eq!(outcome, ProbeOutcome::from_status(418));
        assert!(!outcome.accessible);
    }

    #[tokio::test]
    async fn test_concurrency_limit_serializes_requests() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .expect(3)
            .mount(&mock_server)
            .await;

        let prober = Prober::new(client(), 1);
        let links = vec![
            external(format!("{}/a", mock_server.uri())),
            external(format!("{}/b", mock_server.uri())),
            external(format!("{}/c", mock_server.uri())),
        ];

        let started = Instant::now();
        let checks = prober.probe_links(&links).await.unwrap();
        let elapsed = started.elapsed();

        assert!(checks.iter().all(|c| c.outcome.status_code == Some(200)));
        // With one permit the three delays cannot overlap
        assert!(elapsed >= Duration::from_millis(900), "took {:?}", elapsed);
    }
}
