use crate::classify::LinkType;
use crate::page::{HeadingCounts, HtmlVersion, PageData};
use crate::probe::LinkCheck;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounts {
    pub internal: usize,
    pub external: usize,
    pub broken: usize,
}

impl LinkCounts {
    pub fn tally(links: &[LinkCheck]) -> Self {
        links.iter().fold(Self::default(), |mut counts, check| {
            match check.link.link_type {
                LinkType::Internal => counts.internal += 1,
                LinkType::External => counts.external += 1,
            }
            if check.is_broken() {
                counts.broken += 1;
            }
            counts
        })
    }
}

/// Everything learned from inspecting one page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub response_time: Duration,
    pub title: Option<String>,
    pub html_version: HtmlVersion,
    pub heading_counts: HeadingCounts,
    pub has_login_form: bool,
    pub links: Vec<LinkCheck>,
    pub counts: LinkCounts,
}

impl PageReport {
    pub fn new(
        url: String,
        final_url: String,
        status_code: u16,
        page: PageData,
        links: Vec<LinkCheck>,
    ) -> Self {
        let counts = LinkCounts::tally(&links);
        Self {
            url,
            final_url,
            status_code,
            content_type: None,
            content_length: None,
            response_time: Duration::from_secs(0),
            title: page.title,
            html_version: page.html_version,
            heading_counts: page.heading_counts,
            has_login_form: page.has_login_form,
            links,
            counts,
        }
    }

    pub fn broken_links(&self) -> impl Iterator<Item = &LinkCheck> {
        self.links.iter().filter(|l| l.is_broken())
    }
}
