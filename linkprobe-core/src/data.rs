use crate::error::{CoreError, Result};
use linkprobe_scanner::{HeadingCounts, LinkType, PageReport};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use url::Url;

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl UrlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStatus::Pending => "pending",
            UrlStatus::Running => "running",
            UrlStatus::Completed => "completed",
            UrlStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UrlStatus::Pending),
            "running" => Some(UrlStatus::Running),
            "completed" => Some(UrlStatus::Completed),
            "error" => Some(UrlStatus::Error),
            _ => None,
        }
    }
}

/// State of one crawl row. `Pending` is never stored: it is reported for a
/// URL that has no crawl yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlState {
    Pending,
    Queued,
    Running,
    Completed,
    Error,
}

impl CrawlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlState::Pending => "pending",
            CrawlState::Queued => "queued",
            CrawlState::Running => "running",
            CrawlState::Completed => "completed",
            CrawlState::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CrawlState::Pending),
            "queued" => Some(CrawlState::Queued),
            "running" => Some(CrawlState::Running),
            "completed" => Some(CrawlState::Completed),
            "error" => Some(CrawlState::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Id,
    Url,
    Title,
    Status,
    HtmlVersion,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "id" => Some(SortField::Id),
            "url" => Some(SortField::Url),
            "title" => Some(SortField::Title),
            "status" => Some(SortField::Status),
            "html_version" => Some(SortField::HtmlVersion),
            "created_at" => Some(SortField::CreatedAt),
            "updated_at" => Some(SortField::UpdatedAt),
            _ => None,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            SortField::Id => "u.id",
            SortField::Url => "u.url",
            SortField::Title => "u.title",
            SortField::Status => "u.status",
            SortField::HtmlVersion => "u.html_version",
            SortField::CreatedAt => "u.created_at",
            SortField::UpdatedAt => "u.updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Which stored URLs `list_urls` returns. The default is every live URL,
/// newest first.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    /// Case-insensitive substring of the address or title
    pub search: Option<String>,
    pub status: Option<UrlStatus>,
    pub sort: SortField,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl UrlFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clause = String::from("u.deleted_at IS NULL");
        let mut values = Vec::new();

        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
            clause.push_str(" AND (LOWER(u.url) LIKE ? ESCAPE '\\'");
            clause.push_str(" OR LOWER(COALESCE(u.title, '')) LIKE ? ESCAPE '\\')");
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
        if let Some(status) = self.status {
            clause.push_str(" AND u.status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }

        (clause, values)
    }
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Which stored links of a crawl to return
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkFilter {
    #[default]
    All,
    Internal,
    External,
    Broken,
    Accessible,
}

impl LinkFilter {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all" | "" => Some(LinkFilter::All),
            "internal" => Some(LinkFilter::Internal),
            "external" => Some(LinkFilter::External),
            "broken" => Some(LinkFilter::Broken),
            "accessible" => Some(LinkFilter::Accessible),
            _ => None,
        }
    }

    fn condition(&self) -> &'static str {
        match self {
            LinkFilter::All => "",
            LinkFilter::Internal => " AND link_type = 'internal'",
            LinkFilter::External => " AND link_type = 'external'",
            LinkFilter::Broken => " AND is_accessible = 0",
            LinkFilter::Accessible => " AND is_accessible = 1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub html_version: Option<String>,
    pub status: UrlStatus,
    pub has_login_form: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A URL row joined with the counts of its latest crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlSummary {
    #[serde(flatten)]
    pub record: UrlRecord,
    pub internal_links: Option<i64>,
    pub external_links: Option<i64>,
    pub broken_links: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlStatus {
    /// Crawl id, or `None` when the URL has never been crawled
    pub crawl_id: Option<i64>,
    pub url_id: i64,
    pub url: String,
    pub status: CrawlState,
    pub internal_links: i64,
    pub external_links: i64,
    pub broken_links: i64,
    pub heading_counts: Option<HeadingCounts>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: i64,
    pub link_url: String,
    pub link_text: String,
    pub link_type: LinkType,
    pub status_code: Option<u16>,
    pub is_accessible: bool,
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Parse and normalise a submitted address. Only http(s) is accepted.
pub fn normalize_url(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url.trim()).map_err(|e| CoreError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(CoreError::InvalidUrl(format!(
            "{}: unsupported scheme '{}'",
            url, other
        ))),
    }
}

const URL_COLUMNS: &str =
    "u.id, u.url, u.title, u.html_version, u.status, u.has_login_form, u.created_at, u.updated_at";

fn url_from_row(row: &Row) -> rusqlite::Result<UrlRecord> {
    let status: String = row.get(4)?;
    Ok(UrlRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        html_version: row.get(3)?,
        status: UrlStatus::from_str(&status).unwrap_or(UrlStatus::Pending),
        has_login_form: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl Database {
    pub fn drop(path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    html_version TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK(status IN ('pending', 'running', 'completed', 'error')),
    has_login_form BOOLEAN NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_urls_deleted_at ON urls(deleted_at);

CREATE TABLE IF NOT EXISTS crawls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued'
        CHECK(status IN ('queued', 'running', 'completed', 'error')),
    started_at INTEGER,
    completed_at INTEGER,
    error_message TEXT,
    internal_links INTEGER NOT NULL DEFAULT 0,
    external_links INTEGER NOT NULL DEFAULT 0,
    broken_links INTEGER NOT NULL DEFAULT 0,
    heading_counts TEXT,      -- JSON object: {\"h1\":1,\"h2\":3,...}
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,

    FOREIGN KEY(url_id) REFERENCES urls(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_crawls_url ON crawls(url_id);
CREATE INDEX IF NOT EXISTS idx_crawls_status ON crawls(status);

CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL,
    crawl_id INTEGER NOT NULL,
    link_url TEXT NOT NULL,
    link_text TEXT NOT NULL DEFAULT '',
    link_type TEXT NOT NULL CHECK(link_type IN ('internal', 'external')),
    status_code INTEGER,      -- NULL when not probed or unreachable
    is_accessible BOOLEAN NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,

    FOREIGN KEY(url_id) REFERENCES urls(id) ON DELETE CASCADE,
    FOREIGN KEY(crawl_id) REFERENCES crawls(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_links_crawl ON links(crawl_id);
CREATE INDEX IF NOT EXISTS idx_links_url ON links(url_id);
            ",
        )?;
        Ok(())
    }

    // URL management
    pub fn add_url(&self, url: &str) -> Result<i64> {
        let url = normalize_url(url)?;
        let timestamp = current_timestamp();

        let existing: Option<(i64, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT id, deleted_at FROM urls WHERE url = ?1",
                params![&url],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, None)) => Ok(id),
            Some((id, Some(_))) => {
                debug!("Restoring soft-deleted URL {} ({})", url, id);
                self.conn.execute(
                    "UPDATE urls SET deleted_at = NULL, status = 'pending', updated_at = ?1
                     WHERE id = ?2",
                    params![timestamp, id],
                )?;
                Ok(id)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO urls (url, status, created_at, updated_at)
                     VALUES (?1, 'pending', ?2, ?2)",
                    params![&url, timestamp],
                )?;
                Ok(self.conn.last_insert_rowid())
            }
        }
    }

    pub fn get_url(&self, id: i64) -> Result<UrlRecord> {
        let sql = format!(
            "SELECT {} FROM urls u WHERE u.id = ?1 AND u.deleted_at IS NULL",
            URL_COLUMNS
        );
        self.conn
            .query_row(&sql, params![id], url_from_row)
            .optional()?
            .ok_or(CoreError::NotFound(id))
    }

    pub fn get_url_by_address(&self, url: &str) -> Result<Option<UrlRecord>> {
        let url = normalize_url(url)?;
        let sql = format!(
            "SELECT {} FROM urls u WHERE u.url = ?1 AND u.deleted_at IS NULL",
            URL_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![url], url_from_row)
            .optional()?)
    }

    pub fn list_urls(&self, filter: &UrlFilter) -> Result<Vec<UrlSummary>> {
        let (clause, mut values) = filter.where_clause();
        let sql = format!(
            "SELECT {}, c.internal_links, c.external_links, c.broken_links
             FROM urls u
             LEFT JOIN crawls c ON c.id = (
                 SELECT id FROM crawls WHERE url_id = u.id ORDER BY id DESC LIMIT 1
             )
             WHERE {}
             ORDER BY {} {}, u.id {}
             LIMIT ? OFFSET ?",
            URL_COLUMNS,
            clause,
            filter.sort.column(),
            filter.order.keyword(),
            filter.order.keyword(),
        );
        // SQLite reads a negative LIMIT as "no limit"
        values.push(Value::Integer(filter.limit.map_or(-1, |l| l as i64)));
        values.push(Value::Integer(filter.offset as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let urls = stmt
            .query_map(params_from_iter(values), |row| {
                Ok(UrlSummary {
                    record: url_from_row(row)?,
                    internal_links: row.get(8)?,
                    external_links: row.get(9)?,
                    broken_links: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(urls)
    }

    /// Number of URLs matching `filter`, ignoring its limit and offset
    pub fn count_urls(&self, filter: &UrlFilter) -> Result<i64> {
        let (clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM urls u WHERE {}", clause);
        Ok(self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?)
    }

    pub fn live_url_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM urls WHERE deleted_at IS NULL ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Soft delete; crawl history is kept
    pub fn delete_url(&self, id: i64) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE urls SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![current_timestamp(), id],
        )?;
        if updated == 0 {
            return Err(CoreError::NotFound(id));
        }
        Ok(())
    }

    // Crawl lifecycle
    /// Start a crawl for `url_id`. Refuses while another crawl of the same
    /// URL is still running so results never interleave.
    pub fn begin_crawl(&self, url_id: i64) -> Result<i64> {
        self.get_url(url_id)?;
        let timestamp = current_timestamp();

        let running: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crawls WHERE url_id = ?1 AND status = 'running'",
            params![url_id],
            |row| row.get(0),
        )?;
        if running > 0 {
            return Err(CoreError::Busy(url_id));
        }

        self.conn.execute(
            "INSERT INTO crawls (url_id, status, started_at, created_at, updated_at)
             VALUES (?1, 'running', ?2, ?2, ?2)",
            params![url_id, timestamp],
        )?;
        let crawl_id = self.conn.last_insert_rowid();

        self.conn.execute(
            "UPDATE urls SET status = 'running', updated_at = ?1 WHERE id = ?2",
            params![timestamp, url_id],
        )?;

        Ok(crawl_id)
    }

    fn crawl_url_id(&self, crawl_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT url_id FROM crawls WHERE id = ?1",
                params![crawl_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(CoreError::NotFound(crawl_id))
    }

    pub fn complete_crawl(&self, crawl_id: i64, report: &PageReport) -> Result<()> {
        let url_id = self.crawl_url_id(crawl_id)?;
        let timestamp = current_timestamp();
        let heading_counts = serde_json::to_string(&report.heading_counts)?;

        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE urls SET title = ?1, html_version = ?2, has_login_form = ?3,
                status = 'completed', updated_at = ?4
             WHERE id = ?5",
            params![
                &report.title,
                report.html_version.as_str(),
                report.has_login_form,
                timestamp,
                url_id,
            ],
        )?;

        tx.execute(
            "UPDATE crawls SET status = 'completed', completed_at = ?1, updated_at = ?1,
                internal_links = ?2, external_links = ?3, broken_links = ?4,
                heading_counts = ?5, error_message = NULL
             WHERE id = ?6",
            params![
                timestamp,
                report.counts.internal as i64,
                report.counts.external as i64,
                report.counts.broken as i64,
                heading_counts,
                crawl_id,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO links (
                    url_id, crawl_id, link_url, link_text, link_type,
                    status_code, is_accessible, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for check in &report.links {
                stmt.execute(params![
                    url_id,
                    crawl_id,
                    &check.link.url,
                    &check.link.text,
                    check.link.link_type.as_str(),
                    check.outcome.status_code,
                    check.outcome.accessible,
                    timestamp,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn fail_crawl(&self, crawl_id: i64, message: &str) -> Result<()> {
        let url_id = self.crawl_url_id(crawl_id)?;
        let timestamp = current_timestamp();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE crawls SET status = 'error', error_message = ?1,
                completed_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![message, timestamp, crawl_id],
        )?;
        tx.execute(
            "UPDATE urls SET status = 'error', updated_at = ?1 WHERE id = ?2",
            params![timestamp, url_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Fail crawls left in `running` for at least `stale_after_secs`, e.g. by
    /// a process that was killed mid-crawl. Returns how many were recovered.
    pub fn recover_interrupted(&self, stale_after_secs: i64) -> Result<usize> {
        let timestamp = current_timestamp();
        let cutoff = timestamp - stale_after_secs;
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE urls SET status = 'error', updated_at = ?1
             WHERE id IN (
                 SELECT url_id FROM crawls WHERE status = 'running' AND started_at <= ?2
             )",
            params![timestamp, cutoff],
        )?;
        let recovered = tx.execute(
            "UPDATE crawls SET status = 'error', error_message = 'interrupted',
                completed_at = ?1, updated_at = ?1
             WHERE status = 'running' AND started_at <= ?2",
            params![timestamp, cutoff],
        )?;
        tx.commit()?;

        if recovered > 0 {
            warn!("Marked {} interrupted crawl(s) as failed", recovered);
        }
        Ok(recovered)
    }

    pub fn crawl_status(&self, url_id: i64) -> Result<CrawlStatus> {
        let url = self.get_url(url_id)?;

        let latest = self
            .conn
            .query_row(
                "SELECT id, status, internal_links, external_links, broken_links,
                        heading_counts, started_at, completed_at, error_message
                 FROM crawls WHERE url_id = ?1 ORDER BY id DESC LIMIT 1",
                params![url_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                        row.get::<_, Option<i64>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            crawl_id,
            status,
            internal_links,
            external_links,
            broken_links,
            heading_counts,
            started_at,
            completed_at,
            error_message,
        )) = latest
        else {
            return Ok(CrawlStatus {
                crawl_id: None,
                url_id,
                url: url.url,
                status: CrawlState::Pending,
                internal_links: 0,
                external_links: 0,
                broken_links: 0,
                heading_counts: None,
                started_at: None,
                completed_at: None,
                error_message: None,
            });
        };

        let heading_counts = heading_counts
            .filter(|json| !json.is_empty())
            .map(|json| serde_json::from_str(&json))
            .transpose()?;

        Ok(CrawlStatus {
            crawl_id: Some(crawl_id),
            url_id,
            url: url.url,
            status: CrawlState::from_str(&status).unwrap_or(CrawlState::Error),
            internal_links,
            external_links,
            broken_links,
            heading_counts,
            started_at,
            completed_at,
            error_message: error_message.filter(|m| !m.is_empty()),
        })
    }

    pub fn links_for_crawl(&self, crawl_id: i64, filter: LinkFilter) -> Result<Vec<LinkRecord>> {
        let sql = format!(
            "SELECT id, link_url, link_text, link_type, status_code, is_accessible
             FROM links
             WHERE crawl_id = ?1{}
             ORDER BY id",
            filter.condition()
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let links = stmt
            .query_map(params![crawl_id], |row| {
                let link_type: String = row.get(3)?;
                Ok(LinkRecord {
                    id: row.get(0)?,
                    link_url: row.get(1)?,
                    link_text: row.get(2)?,
                    link_type: LinkType::from_str(&link_type).unwrap_or(LinkType::External),
                    status_code: row.get(4)?,
                    is_accessible: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(links)
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}
