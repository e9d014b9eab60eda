pub mod config;
pub mod crawl;
pub mod data;
pub mod error;
pub mod report;

pub use config::Settings;
pub use data::Database;
pub use error::{CoreError, Result};
