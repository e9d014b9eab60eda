// Internal/external link classification

use crate::page::ExtractedLink;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Internal,
    External,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Internal => "internal",
            LinkType::External => "external",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(LinkType::Internal),
            "external" => Some(LinkType::External),
            _ => None,
        }
    }
}

/// How strictly a link's host must match the page host to count as internal
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyPolicy {
    pub include_subdomains: bool,
}

/// An anchor resolved against its page and tagged internal or external
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedLink {
    pub url: String,
    pub text: String,
    pub link_type: LinkType,
}

/// Resolve `href` against `base`. Only http(s) targets survive.
pub fn resolve(base: &Url, href: &str) -> Option<Url> {
    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

pub fn classify(base: &Url, link: &Url, policy: ClassifyPolicy) -> LinkType {
    let (Some(base_host), Some(link_host)) = (base.host_str(), link.host_str()) else {
        return LinkType::External;
    };

    // Explicit ports are part of the authority; default ports are elided by `url`
    if link_host.eq_ignore_ascii_case(base_host) && link.port() == base.port() {
        return LinkType::Internal;
    }

    if policy.include_subdomains
        && link_host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", base_host.to_ascii_lowercase()))
    {
        return LinkType::Internal;
    }

    LinkType::External
}

pub fn classify_all(
    base: &Url,
    links: &[ExtractedLink],
    policy: ClassifyPolicy,
) -> Vec<ClassifiedLink> {
    links
        .iter()
        .filter_map(|link| {
            let resolved = resolve(base, &link.href)?;
            Some(ClassifiedLink {
                link_type: classify(base, &resolved, policy),
                url: resolved.to_string(),
                text: link.text.clone(),
            })
        })
        .collect()
}
