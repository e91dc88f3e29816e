//! Export engine
//!
//! Serializes recent catalog windows into SIEM-consumable feeds: a
//! line-oriented CEF feed and a STIX 2.1 bundle.

pub mod cef;
pub mod stix;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::repository::{Database, RepositoryError};

/// Supported feed formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Cef,
    Stix,
    Json,
}

impl FromStr for FeedFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cef" => Ok(FeedFormat::Cef),
            "stix" => Ok(FeedFormat::Stix),
            "json" => Ok(FeedFormat::Json),
            other => Err(format!("unsupported format: {}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    /// The format is recognized but has no implementation
    #[error("format not implemented: {0}")]
    Unimplemented(&'static str),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
    #[error("failed to serialize bundle: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Feed exporter over the catalog
pub struct Exporter {
    db: Database,
}

impl Exporter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Render the window of records ingested since the given instant.
    pub fn export(&self, format: FeedFormat, since: DateTime<Utc>) -> Result<String, ExportError> {
        let iocs = self.db.find_since(since, 10_000)?;

        match format {
            FeedFormat::Cef => Ok(cef::render_feed(&iocs)),
            FeedFormat::Stix => Ok(stix::render_bundle(&iocs)?),
            FeedFormat::Json => Err(ExportError::Unimplemented("json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioc::{Ioc, IocType};

    #[test]
    fn test_format_parsing() {
        assert_eq!("cef".parse::<FeedFormat>().unwrap(), FeedFormat::Cef);
        assert_eq!("STIX".parse::<FeedFormat>().unwrap(), FeedFormat::Stix);
        assert_eq!("json".parse::<FeedFormat>().unwrap(), FeedFormat::Json);
        assert!("xml".parse::<FeedFormat>().is_err());
    }

    #[test]
    fn test_json_is_unimplemented() {
        let db = Database::open_memory().unwrap();
        let exporter = Exporter::new(db);
        let err = exporter
            .export(FeedFormat::Json, Utc::now() - chrono::Duration::hours(24))
            .unwrap_err();
        assert!(matches!(err, ExportError::Unimplemented(_)));
    }

    #[test]
    fn test_export_windows_catalog() {
        let db = Database::open_memory().unwrap();
        db.save_batch(&[Ioc::new("203.0.113.9", IocType::Ip, "cins-army")])
            .unwrap();
        let exporter = Exporter::new(db);

        let feed = exporter
            .export(FeedFormat::Cef, Utc::now() - chrono::Duration::hours(24))
            .unwrap();
        assert!(feed.contains("203.0.113.9"));

        // Nothing ingested in a future window
        let feed = exporter
            .export(FeedFormat::Cef, Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        assert!(feed.is_empty());
    }
}
