use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, Statement};

use crate::crawler::CrawlTarget;
use crate::parser::{ExtractStatus, ExtractionResult};

pub const DEFAULT_DB_PATH: &str = "data/docschema.sqlite";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS endpoints (
            id          INTEGER PRIMARY KEY,
            url         TEXT UNIQUE NOT NULL,
            endpoint_id TEXT NOT NULL,
            visited     BOOLEAN NOT NULL DEFAULT 0,
            visited_at  TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_endpoints_visited ON endpoints(visited);

        CREATE TABLE IF NOT EXISTS page_data (
            id          INTEGER PRIMARY KEY,
            endpoint    INTEGER REFERENCES endpoints(id),
            url         TEXT NOT NULL,
            endpoint_id TEXT NOT NULL,
            markup      TEXT,
            status      INTEGER,
            error       TEXT,
            attempts    INTEGER NOT NULL DEFAULT 0,
            latency_ms  INTEGER,
            fetched_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_page_data_endpoint ON page_data(endpoint_id);

        CREATE TABLE IF NOT EXISTS extractions (
            endpoint_id    TEXT PRIMARY KEY,
            page_data_id   INTEGER NOT NULL REFERENCES page_data(id),
            status         TEXT NOT NULL CHECK(status IN ('complete','partial','failed')),
            primary_count  INTEGER NOT NULL,
            fallback_count INTEGER NOT NULL,
            total_count    INTEGER NOT NULL,
            diagnostics    TEXT NOT NULL,
            result         TEXT NOT NULL,
            extracted_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_extractions_status ON extractions(status);
        ",
    )?;
    Ok(())
}

// ── Crawling ──

pub fn insert_endpoints(conn: &Connection, endpoints: &[(String, String)]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt =
            tx.prepare("INSERT OR IGNORE INTO endpoints (url, endpoint_id) VALUES (?1, ?2)")?;
        for (url, endpoint_id) in endpoints {
            count += stmt.execute(rusqlite::params![url, endpoint_id])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_unvisited(conn: &Connection, limit: Option<usize>) -> Result<Vec<CrawlTarget>> {
    let sql = format!(
        "SELECT id, endpoint_id, url FROM endpoints WHERE visited = 0 ORDER BY id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CrawlTarget {
                row_id: Some(row.get(0)?),
                endpoint_id: row.get(1)?,
                url: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct PageRow {
    pub endpoint: Option<i64>,
    pub url: String,
    pub endpoint_id: String,
    pub markup: Option<String>,
    pub status: Option<i32>,
    pub error: Option<String>,
    pub attempts: u32,
    pub latency_ms: i64,
}

/// Prepared statements for saving fetch outcomes one at a time.
pub struct PageWriter<'c> {
    insert: Statement<'c>,
    visit: Statement<'c>,
}

impl<'c> PageWriter<'c> {
    pub fn new(conn: &'c Connection) -> Result<Self> {
        let insert = conn.prepare(
            "INSERT INTO page_data
             (endpoint, url, endpoint_id, markup, status, error, attempts, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        let visit = conn.prepare(
            "UPDATE endpoints SET visited = 1, visited_at = datetime('now') WHERE id = ?1",
        )?;
        Ok(Self { insert, visit })
    }

    pub fn save(&mut self, row: &PageRow) -> Result<()> {
        self.insert.execute(rusqlite::params![
            row.endpoint, row.url, row.endpoint_id, row.markup, row.status, row.error,
            row.attempts, row.latency_ms,
        ])?;
        if let Some(id) = row.endpoint {
            self.visit.execute(rusqlite::params![id])?;
        }
        Ok(())
    }
}

// ── Extraction ──

pub struct StoredPage {
    pub page_data_id: i64,
    pub endpoint_id: String,
    pub markup: Option<String>,
    pub error: Option<String>,
}

/// Latest fetched page of every endpoint that has no extraction yet.
pub fn fetch_unextracted(conn: &Connection, limit: Option<usize>) -> Result<Vec<StoredPage>> {
    let sql = format!(
        "SELECT pd.id, pd.endpoint_id, pd.markup, pd.error
         FROM page_data pd
         LEFT JOIN extractions e ON e.endpoint_id = pd.endpoint_id
         WHERE e.endpoint_id IS NULL
           AND pd.id = (SELECT MAX(id) FROM page_data WHERE endpoint_id = pd.endpoint_id)
         ORDER BY pd.id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredPage {
                page_data_id: row.get(0)?,
                endpoint_id: row.get(1)?,
                markup: row.get(2)?,
                error: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn save_extractions(conn: &Connection, rows: &[(i64, ExtractionResult)]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO extractions
             (endpoint_id, page_data_id, status, primary_count, fallback_count, total_count,
              diagnostics, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for (page_data_id, r) in rows {
            stmt.execute(rusqlite::params![
                r.endpoint_id,
                page_data_id,
                r.status.as_str(),
                r.counts.primary,
                r.counts.fallback,
                r.counts.total,
                serde_json::to_string(&r.diagnostics)?,
                serde_json::to_string(r)?,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn load_results(conn: &Connection) -> Result<Vec<ExtractionResult>> {
    let mut stmt = conn.prepare("SELECT endpoint_id, result FROM extractions ORDER BY endpoint_id")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, json)| {
            serde_json::from_str(&json).with_context(|| format!("Corrupt extraction for {}", id))
        })
        .collect()
}

// ── Report ──

pub struct ReportRow {
    pub endpoint_id: String,
    pub status: String,
    pub primary: usize,
    pub fallback: usize,
    pub total: usize,
    pub diagnostics: usize,
    pub first_diagnostic: Option<String>,
}

pub fn fetch_report(
    conn: &Connection,
    status: Option<ExtractStatus>,
    limit: usize,
) -> Result<Vec<ReportRow>> {
    let where_clause = match status {
        Some(_) => " WHERE status = ?1",
        None => "",
    };
    let sql = format!(
        "SELECT endpoint_id, status, primary_count, fallback_count, total_count,
                json_array_length(diagnostics),
                json_extract(diagnostics, '$[0].kind') || ': ' || json_extract(diagnostics, '$[0].message')
         FROM extractions{}
         ORDER BY CASE status WHEN 'failed' THEN 0 WHEN 'partial' THEN 1 ELSE 2 END, endpoint_id
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = match status {
        Some(s) => stmt
            .query_map([s.as_str()], report_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], report_row)?.collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

fn report_row(row: &rusqlite::Row) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        endpoint_id: row.get(0)?,
        status: row.get(1)?,
        primary: row.get(2)?,
        fallback: row.get(3)?,
        total: row.get(4)?,
        diagnostics: row.get(5)?,
        first_diagnostic: row.get(6)?,
    })
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub visited: usize,
    pub unvisited: usize,
    pub fetched: usize,
    pub errors: usize,
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM endpoints", [], |r| r.get(0))?;
    let visited: usize =
        conn.query_row("SELECT COUNT(*) FROM endpoints WHERE visited = 1", [], |r| r.get(0))?;
    let fetched: usize = conn.query_row("SELECT COUNT(*) FROM page_data", [], |r| r.get(0))?;
    let errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM page_data WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let by_status = |s: ExtractStatus| -> Result<usize> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM extractions WHERE status = ?1",
            [s.as_str()],
            |r| r.get(0),
        )?)
    };
    Ok(Stats {
        total,
        visited,
        unvisited: total - visited,
        fetched,
        errors,
        complete: by_status(ExtractStatus::Complete)?,
        partial: by_status(ExtractStatus::Partial)?,
        failed: by_status(ExtractStatus::Failed)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Diagnostic, DiagnosticKind};

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn page(endpoint: Option<i64>, id: &str, markup: Option<&str>) -> PageRow {
        PageRow {
            endpoint,
            url: format!("https://docs.example.com/reference/{}", id),
            endpoint_id: id.to_string(),
            markup: markup.map(str::to_string),
            status: markup.map(|_| 200),
            error: if markup.is_none() { Some("gave up".into()) } else { None },
            attempts: 1,
            latency_ms: 12,
        }
    }

    #[test]
    fn endpoints_are_inserted_once() {
        let conn = memory();
        let eps = vec![
            ("https://docs.example.com/reference/a".to_string(), "a".to_string()),
            ("https://docs.example.com/reference/b".to_string(), "b".to_string()),
        ];
        assert_eq!(insert_endpoints(&conn, &eps).unwrap(), 2);
        assert_eq!(insert_endpoints(&conn, &eps).unwrap(), 0);
        let targets = fetch_unvisited(&conn, Some(1)).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].endpoint_id, "a");
    }

    #[test]
    fn saving_a_page_marks_it_visited() {
        let conn = memory();
        insert_endpoints(&conn, &[("https://docs.example.com/reference/a".into(), "a".into())])
            .unwrap();
        let target = fetch_unvisited(&conn, None).unwrap().remove(0);
        {
            let mut writer = PageWriter::new(&conn).unwrap();
            writer.save(&page(target.row_id, "a", Some("<html/>"))).unwrap();
        }
        assert!(fetch_unvisited(&conn, None).unwrap().is_empty());
        let s = get_stats(&conn).unwrap();
        assert_eq!((s.total, s.visited, s.fetched, s.errors), (1, 1, 1, 0));
    }

    #[test]
    fn extraction_roundtrip_and_report() {
        let conn = memory();
        {
            let mut writer = PageWriter::new(&conn).unwrap();
            writer.save(&page(None, "a", Some("<html/>"))).unwrap();
            writer.save(&page(None, "b", None)).unwrap();
        }
        let pending = fetch_unextracted(&conn, None).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending[1].markup.is_none());

        let failed = ExtractionResult::failed(
            "b",
            Diagnostic::new(DiagnosticKind::FetchFailure, "gave up after 4 attempt(s)"),
        );
        save_extractions(&conn, &[(pending[1].page_data_id, failed.clone())]).unwrap();

        assert_eq!(fetch_unextracted(&conn, None).unwrap().len(), 1);
        assert_eq!(load_results(&conn).unwrap(), vec![failed]);

        let report = fetch_report(&conn, Some(ExtractStatus::Failed), 10).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].diagnostics, 1);
        assert_eq!(
            report[0].first_diagnostic.as_deref(),
            Some("fetch_failure: gave up after 4 attempt(s)")
        );
        assert!(fetch_report(&conn, Some(ExtractStatus::Complete), 10).unwrap().is_empty());
        assert_eq!(get_stats(&conn).unwrap().failed, 1);
    }

    #[test]
    fn extracted_schemas_survive_storage() {
        use crate::parser::{extract_page, ExtractConfig, PageInput};
        use crate::schema::fingerprint;

        let conn = memory();
        let markup = std::fs::read_to_string("tests/fixtures/asset_losses.html").unwrap();
        {
            let mut writer = PageWriter::new(&conn).unwrap();
            writer.save(&page(None, "assetLosses", Some(&markup))).unwrap();
        }
        let stored = fetch_unextracted(&conn, None).unwrap().remove(0);
        let result = extract_page(
            &PageInput {
                endpoint_id: stored.endpoint_id.clone(),
                markup: stored.markup.clone().unwrap(),
                ..PageInput::default()
            },
            &ExtractConfig::default(),
        );
        assert_eq!(result.status, ExtractStatus::Complete);
        save_extractions(&conn, &[(stored.page_data_id, result.clone())]).unwrap();

        let loaded = load_results(&conn).unwrap();
        assert_eq!(loaded, vec![result.clone()]);
        let codes: Vec<u16> = loaded[0].responses.keys().copied().collect();
        assert_eq!(codes, vec![200, 400, 401]);
        assert_eq!(
            fingerprint(&loaded[0].responses[&200]),
            fingerprint(&result.responses[&200])
        );
        assert_eq!(loaded[0].request.parameters, result.request.parameters);

        let report = fetch_report(&conn, Some(ExtractStatus::Complete), 10).unwrap();
        assert_eq!(report[0].endpoint_id, "assetLosses");
        assert_eq!(report[0].primary, result.counts.primary);
    }
}
