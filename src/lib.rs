//! iocwatch: threat intelligence aggregation and alert enrichment
//!
//! Continuously ingests indicators of compromise from heterogeneous feeds
//! into a queryable catalog, enriches inbound endpoint-detection alerts
//! against it, and serves triaged results and SIEM export feeds over HTTP.

pub mod config;
pub mod enrich;
pub mod export;
pub mod ingest;
pub mod ioc;
pub mod llm;
pub mod metrics;
pub mod notify;
pub mod providers;
pub mod repository;
pub mod server;

pub use config::Config;
pub use ioc::{Ioc, IocType};
pub use repository::Database;
