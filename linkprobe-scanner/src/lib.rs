pub mod classify;
pub mod crawler;
pub mod error;
pub mod page;
pub mod probe;
pub mod result;

pub use classify::{ClassifiedLink, ClassifyPolicy, LinkType};
pub use crawler::Crawler;
pub use error::ScanError;
pub use page::{HeadingCounts, HtmlVersion, PageData};
pub use probe::{LinkCheck, ProbeOutcome, Prober};
pub use result::PageReport;
