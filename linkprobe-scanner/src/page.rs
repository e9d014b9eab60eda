// Fetch and parse stage: one GET per page, then a single pass over the DOM

use crate::error::{Result, ScanError};
use reqwest::Client;
use scraper::{Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static HEADINGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").unwrap());
static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static FORMS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form").unwrap());

const LOGIN_INDICATORS: [&str; 5] = ["login", "signin", "email", "username", "password"];

/// Count of each heading level on a page, stored as `{"h1":1,"h2":3,...}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingCounts {
    pub h1: u32,
    pub h2: u32,
    pub h3: u32,
    pub h4: u32,
    pub h5: u32,
    pub h6: u32,
}

impl HeadingCounts {
    pub fn total(&self) -> u32 {
        self.h1 + self.h2 + self.h3 + self.h4 + self.h5 + self.h6
    }

    fn record(&mut self, tag: &str) {
        match tag {
            "h1" => self.h1 += 1,
            "h2" => self.h2 += 1,
            "h3" => self.h3 += 1,
            "h4" => self.h4 += 1,
            "h5" => self.h5 += 1,
            "h6" => self.h6 += 1,
            _ => {}
        }
    }
}

/// Document type as declared by the doctype.
///
/// Only the doctype is consulted. A document without one, or with a doctype
/// naming something other than a known HTML version, is `Unknown` rather
/// than HTML5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtmlVersion {
    Html5,
    Html401,
    Xhtml10,
    Xhtml11,
    Html32,
    Html20,
    Unknown,
}

impl HtmlVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HtmlVersion::Html5 => "HTML5",
            HtmlVersion::Html401 => "HTML 4.01",
            HtmlVersion::Xhtml10 => "XHTML 1.0",
            HtmlVersion::Xhtml11 => "XHTML 1.1",
            HtmlVersion::Html32 => "HTML 3.2",
            HtmlVersion::Html20 => "HTML 2.0",
            HtmlVersion::Unknown => "Unknown",
        }
    }

    pub fn from_doctype(name: &str, public_id: &str) -> Self {
        if !name.eq_ignore_ascii_case("html") {
            return HtmlVersion::Unknown;
        }
        let public_id = public_id.to_ascii_uppercase();
        if public_id.is_empty() {
            HtmlVersion::Html5
        } else if public_id.contains("XHTML 1.1") {
            HtmlVersion::Xhtml11
        } else if public_id.contains("XHTML 1.0") {
            HtmlVersion::Xhtml10
        } else if public_id.contains("HTML 4.0") {
            HtmlVersion::Html401
        } else if public_id.contains("HTML 3.2") {
            HtmlVersion::Html32
        } else if public_id.contains("HTML 2.0") {
            HtmlVersion::Html20
        } else {
            HtmlVersion::Unknown
        }
    }
}

/// An anchor as it appears in the document, before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub href: String,
    pub text: String,
}

/// Metadata pulled out of one HTML document
#[derive(Debug, Clone, PartialEq)]
pub struct PageData {
    pub title: Option<String>,
    pub html_version: HtmlVersion,
    pub heading_counts: HeadingCounts,
    pub has_login_form: bool,
    pub links: Vec<ExtractedLink>,
}

/// Raw response of the page GET
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: Url,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub response_time: Duration,
    pub body: String,
}

pub async fn fetch(client: &Client, url: &Url) -> Result<FetchedPage> {
    debug!("Fetching {}", url);

    let start = Instant::now();
    let response = client.get(url.clone()).send().await?;
    let response_time = start.elapsed();

    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(ScanError::from_status(status));
    }

    let final_url = response.url().clone();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let content_length = response.content_length();
    let body = response.text().await?;

    Ok(FetchedPage {
        final_url,
        status_code: status.as_u16(),
        content_type,
        content_length,
        response_time,
        body,
    })
}

pub fn extract(html: &str) -> PageData {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let mut heading_counts = HeadingCounts::default();
    for heading in document.select(&HEADINGS) {
        heading_counts.record(heading.value().name());
    }

    let links = document
        .select(&ANCHORS)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            let text = anchor.text().collect::<String>();
            Some(ExtractedLink {
                href: href.to_string(),
                text: collapse_whitespace(&text),
            })
        })
        .collect();

    let has_login_form = document.select(&FORMS).any(|form| {
        let markup = form.html().to_lowercase();
        LOGIN_INDICATORS.iter().any(|i| markup.contains(i))
    });

    PageData {
        title,
        html_version: detect_html_version(&document),
        heading_counts,
        has_login_form,
        links,
    }
}

fn detect_html_version(document: &Html) -> HtmlVersion {
    document
        .tree
        .root()
        .children()
        .find_map(|node| match node.value() {
            Node::Doctype(doctype) => Some(HtmlVersion::from_doctype(
                doctype.name(),
                doctype.public_id(),
            )),
            _ => None,
        })
        .unwrap_or(HtmlVersion::Unknown)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
