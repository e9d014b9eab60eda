use linkprobe::handlers::*;
use linkprobe::CrawlTarget;
use linkprobe_core::data::UrlFilter;
use std::io::Write;
use std::path::PathBuf;
use tempfile::{NamedTempFile, TempDir};
use url::Url;

#[test]
fn test_parse_url_line_with_scheme() {
    let result = parse_url_line("https://example.com");
    assert_eq!(result, Some("https://example.com".to_string()));
}

#[test]
fn test_parse_url_line_without_scheme() {
    let result = parse_url_line("example.com");
    assert_eq!(result, Some("http://example.com".to_string()));
}

#[test]
fn test_parse_url_line_host_with_port() {
    // "localhost:8080" parses as a URL with scheme "localhost"
    let result = parse_url_line("localhost:8080");
    assert_eq!(result, Some("http://localhost:8080".to_string()));
}

#[test]
fn test_parse_url_line_invalid() {
    let result = parse_url_line("not a valid url!!!");
    assert_eq!(result, None);
}

#[test]
fn test_load_urls_from_file() -> anyhow::Result<()> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, "https://example.com")?;
    writeln!(temp_file, "httpbin.org")?;
    writeln!(temp_file)?; // Empty line
    writeln!(temp_file, "# staging hosts")?;
    writeln!(temp_file, "  https://api.example.com  ")?;

    let urls = load_urls_from_file(temp_file.path())?;

    assert_eq!(urls.len(), 3);
    assert_eq!(urls[0], "https://example.com");
    assert_eq!(urls[1], "http://httpbin.org");
    assert_eq!(urls[2], "https://api.example.com");

    Ok(())
}

#[test]
fn test_load_urls_from_file_empty() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file).unwrap();
    writeln!(temp_file, "   ").unwrap();

    let result = load_urls_from_file(temp_file.path());
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("No valid URLs"));
}

#[test]
fn test_load_urls_from_missing_file() {
    let result = load_urls_from_file(&PathBuf::from("/nonexistent/hosts.txt"));
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Failed to read hosts file"));
}

#[test]
fn test_load_urls_from_source_with_urls() {
    let urls = vec![
        Url::parse("https://example.com").unwrap(),
        Url::parse("https://example.org/page").unwrap(),
    ];
    let result = load_urls_from_source(&urls, None).unwrap();
    assert_eq!(result, vec!["https://example.com/", "https://example.org/page"]);
}

#[test]
fn test_load_urls_from_source_prefers_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "https://from-file.example").unwrap();
    let path = PathBuf::from(temp_file.path());

    let result = load_urls_from_source(&[], Some(&path)).unwrap();
    assert_eq!(result, vec!["https://from-file.example"]);
}

#[test]
fn test_load_urls_from_source_neither() {
    let result = load_urls_from_source(&[], None);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("--url or --hosts-file"));
}

#[test]
fn test_emit_report_to_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.csv");

    emit_report("page_url,link_url\n", Some(&path)).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "page_url,link_url\n");
}

#[test]
fn test_open_database_creates_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("linkprobe.db");

    let db = open_database(&path).unwrap();
    assert!(path.exists());
    assert!(db.list_urls(&UrlFilter::default()).unwrap().is_empty());
}

#[test]
fn test_crawl_target_from_address() {
    let target = CrawlTarget::Address("https://example.com/".to_string());
    assert_eq!(target.to_string(), "https://example.com/");
}
