//! IOC catalog repository
//!
//! Thread-safe SQLite-backed store for catalog records. The rest of the
//! system only sees the five query operations defined here; records are
//! inserted by the ingestion coordinator and never updated or deleted.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use thiserror::Error;

use crate::ioc::{Ioc, IocType};

/// Default row cap for time-window queries when the caller passes 0.
const DEFAULT_SINCE_LIMIT: i64 = 10_000;

/// Substring lookups shorter than this match too much noise (a bare "1"
/// matches every address containing the digit) and are rejected outright.
const MIN_CONTAINS_LEN: usize = 4;

/// Errors surfaced by the catalog. Absent rows are not errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        RepositoryError::Unavailable(err.to_string())
    }
}

/// Thread-safe catalog wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the catalog at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;
        }

        let conn = Connection::open(&path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory catalog (for testing)
    pub fn open_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS iocs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value TEXT NOT NULL,
                type TEXT NOT NULL,
                source TEXT NOT NULL,
                threat_type TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                version TEXT NOT NULL DEFAULT '',
                first_seen TEXT NOT NULL,
                date_ingested TEXT NOT NULL,
                UNIQUE(value, source, version)
            );
            CREATE INDEX IF NOT EXISTS idx_iocs_value ON iocs(value);
            CREATE INDEX IF NOT EXISTS idx_iocs_value_version ON iocs(value, version);
            CREATE INDEX IF NOT EXISTS idx_iocs_date_ingested ON iocs(date_ingested);
            "#,
        )?;

        Ok(())
    }

    /// Persist a batch of IOCs. Records colliding on (value, source, version)
    /// are silently dropped. The batch is atomic: any statement failure rolls
    /// the whole batch back. Returns the number of newly inserted rows.
    pub fn save_batch(&self, iocs: &[Ioc]) -> Result<usize, RepositoryError> {
        if iocs.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO iocs (value, type, source, threat_type, tags, version, first_seen, date_ingested)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(value, source, version) DO NOTHING",
            )?;

            for ioc in iocs {
                let tags_json =
                    serde_json::to_string(&ioc.tags).unwrap_or_else(|_| "[]".to_string());
                inserted += stmt.execute(params![
                    ioc.value,
                    ioc.ioc_type.as_str(),
                    ioc.source,
                    ioc.threat_type,
                    tags_json,
                    ioc.version,
                    ioc.first_seen.to_rfc3339(),
                    ioc.date_ingested.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Point lookup; any row with the given value is acceptable.
    pub fn find_by_value(&self, value: &str) -> Result<Option<Ioc>, RepositoryError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare_cached(&format!("{} WHERE value = ? LIMIT 1", SELECT_IOCS))?;
        let mut rows = stmt.query_map([value], map_ioc_row)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All rows with the given value, newest first.
    pub fn find_all_by_value(&self, value: &str) -> Result<Vec<Ioc>, RepositoryError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE value = ? ORDER BY date_ingested DESC",
            SELECT_IOCS
        ))?;
        let iocs = stmt
            .query_map([value], map_ioc_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(iocs)
    }

    /// Rows matching the value and either the exact version or the empty
    /// wildcard version ("whole package is bad"), newest first.
    pub fn find_by_value_and_version(
        &self,
        value: &str,
        version: &str,
    ) -> Result<Vec<Ioc>, RepositoryError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE value = ? AND (version = ? OR version = '') ORDER BY date_ingested DESC",
            SELECT_IOCS
        ))?;
        let iocs = stmt
            .query_map([value, version], map_ioc_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(iocs)
    }

    /// Substring fallback, newest first, capped at 100 rows. Only meant to be
    /// called after an exact lookup came back empty.
    pub fn find_containing(&self, value: &str) -> Result<Vec<Ioc>, RepositoryError> {
        if value.len() < MIN_CONTAINS_LEN {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE value LIKE '%' || ? || '%' ORDER BY date_ingested DESC LIMIT 100",
            SELECT_IOCS
        ))?;
        let iocs = stmt
            .query_map([value], map_ioc_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(iocs)
    }

    /// Rows ingested at or after the given instant, newest first. A limit of
    /// 0 applies the default cap.
    pub fn find_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Ioc>, RepositoryError> {
        let limit = if limit <= 0 { DEFAULT_SINCE_LIMIT } else { limit };
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE date_ingested >= ? ORDER BY date_ingested DESC LIMIT ?",
            SELECT_IOCS
        ))?;
        let iocs = stmt
            .query_map(params![since.to_rfc3339(), limit], map_ioc_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(iocs)
    }

    /// Total number of catalog rows (for the ingest report and tests).
    pub fn count(&self) -> Result<i64, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM iocs", [], |row| row.get(0))?;
        Ok(count)
    }
}

const SELECT_IOCS: &str =
    "SELECT value, type, source, threat_type, tags, version, first_seen, date_ingested FROM iocs";

fn map_ioc_row(row: &Row<'_>) -> rusqlite::Result<Ioc> {
    let ioc_type = row
        .get::<_, String>(1)?
        .parse::<IocType>()
        .unwrap_or(IocType::Ip);
    let tags: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default();

    Ok(Ioc {
        value: row.get(0)?,
        ioc_type,
        source: row.get(2)?,
        threat_type: row.get(3)?,
        tags,
        version: row.get(5)?,
        first_seen: parse_ts(&row.get::<_, String>(6)?),
        date_ingested: parse_ts(&row.get::<_, String>(7)?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioc::IocType;

    fn sample(value: &str, source: &str, version: &str) -> Ioc {
        Ioc::new(value, IocType::Package, source)
            .with_threat_type("supply_chain_malware")
            .with_tags(vec!["osv".to_string()])
            .with_version(version)
    }

    #[test]
    fn test_save_batch_dedup() {
        let db = Database::open_memory().unwrap();
        let ioc = sample("lodash", "osv-npm", "4.17.0");

        assert_eq!(db.save_batch(&[ioc.clone()]).unwrap(), 1);
        // Same (value, source, version) is dropped, not updated
        assert_eq!(db.save_batch(&[ioc]).unwrap(), 0);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_find_by_value() {
        let db = Database::open_memory().unwrap();
        db.save_batch(&[sample("lodash", "osv-npm", "")]).unwrap();

        let found = db.find_by_value("lodash").unwrap().unwrap();
        assert_eq!(found.value, "lodash");
        assert_eq!(found.ioc_type, IocType::Package);
        assert_eq!(found.tags, vec!["osv".to_string()]);

        assert!(db.find_by_value("left-pad").unwrap().is_none());
    }

    #[test]
    fn test_version_wildcard() {
        let db = Database::open_memory().unwrap();
        db.save_batch(&[
            sample("lodash", "osv-npm", ""),
            sample("lodash", "osv-npm", "4.17.0"),
            sample("lodash", "osv-npm", "4.17.1"),
        ])
        .unwrap();

        // Exact version plus the empty wildcard row
        let rows = db.find_by_value_and_version("lodash", "4.17.0").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.version.is_empty()));
        assert!(rows.iter().any(|r| r.version == "4.17.0"));
    }

    #[test]
    fn test_find_containing() {
        let db = Database::open_memory().unwrap();
        let url = Ioc::new("http://198.51.100.7/a.sh", IocType::Url, "feed");
        db.save_batch(&[url]).unwrap();

        let rows = db.find_containing("198.51.100.7").unwrap();
        assert_eq!(rows.len(), 1);

        // Too-short needles are rejected
        assert!(db.find_containing("1").unwrap().is_empty());
    }

    #[test]
    fn test_find_since() {
        let db = Database::open_memory().unwrap();
        db.save_batch(&[sample("a.example", "feed", ""), sample("b.example", "feed", "")])
            .unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(db.find_since(since, 0).unwrap().len(), 2);
        assert_eq!(db.find_since(since, 1).unwrap().len(), 1);
        assert!(db.find_since(Utc::now() + chrono::Duration::hours(1), 0).unwrap().is_empty());
    }

    #[test]
    fn test_batch_distinct_sources() {
        let db = Database::open_memory().unwrap();
        db.save_batch(&[sample("lodash", "osv-npm", ""), sample("lodash", "osv-pypi", "")])
            .unwrap();

        assert_eq!(db.find_all_by_value("lodash").unwrap().len(), 2);
    }
}
