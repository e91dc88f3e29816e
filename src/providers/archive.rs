//! Advisory archive provider
//!
//! Fetches a gzip-compressed NDJSON bundle of supply-chain advisories and
//! fans each advisory out into one package IOC per affected (package,
//! version) pair. An advisory with no explicit version list produces a
//! single record with the empty wildcard version, meaning the whole package
//! is considered bad.

use std::io::{BufRead, BufReader, Read};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::debug;

use super::ThreatProvider;
use crate::ioc::{Ioc, IocType};

const ADVISORY_BASE_URL: &str = "https://advisories.iocwatch.dev";

/// Advisory bundle provider for one package ecosystem
pub struct AdvisoryArchiveProvider {
    name: String,
    ecosystem: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AdvisoryEntry {
    id: String,
    #[serde(default)]
    affected: Vec<AdvisoryAffected>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AdvisoryAffected {
    package: AdvisoryPackage,
    #[serde(default)]
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AdvisoryPackage {
    name: String,
}

impl AdvisoryArchiveProvider {
    pub fn new(ecosystem: impl Into<String>) -> Self {
        let ecosystem = ecosystem.into();
        Self {
            name: format!("osv-{}", ecosystem.to_lowercase()),
            ecosystem,
            base_url: ADVISORY_BASE_URL.to_string(),
        }
    }

    /// Override the bundle host (for tests and mirrors)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn bundle_url(&self) -> String {
        format!("{}/{}/all.ndjson.gz", self.base_url, self.ecosystem)
    }

    fn parse_bundle<R: Read>(&self, reader: R) -> Vec<Ioc> {
        let mut iocs = Vec::new();
        let reader = BufReader::new(GzDecoder::new(reader));

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("truncated advisory bundle for {}: {}", self.ecosystem, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let entry: AdvisoryEntry = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("skipping malformed advisory line: {}", e);
                    continue;
                }
            };

            iocs.extend(self.entry_iocs(&entry));
        }

        iocs
    }

    fn entry_iocs(&self, entry: &AdvisoryEntry) -> Vec<Ioc> {
        let mut iocs = Vec::new();

        for affected in &entry.affected {
            let pkg_name = affected.package.name.trim();
            if pkg_name.is_empty() {
                continue;
            }

            if affected.versions.is_empty() {
                // No explicit versions: the whole package is flagged
                iocs.push(self.package_ioc(pkg_name, "", entry));
            } else {
                for version in &affected.versions {
                    if version.is_empty() {
                        continue;
                    }
                    iocs.push(self.package_ioc(pkg_name, version, entry));
                }
            }
        }

        iocs
    }

    fn package_ioc(&self, pkg_name: &str, version: &str, entry: &AdvisoryEntry) -> Ioc {
        Ioc::new(pkg_name, IocType::Package, self.name.clone())
            .with_threat_type("supply_chain_malware")
            .with_tags(vec![entry.id.clone(), "advisory".to_string()])
            .with_version(version)
            .with_first_seen(entry.modified)
    }
}

#[async_trait]
impl ThreatProvider for AdvisoryArchiveProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, client: &reqwest::Client) -> anyhow::Result<Vec<Ioc>> {
        let bytes = client
            .get(self.bundle_url())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(self.parse_bundle(bytes.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(lines: &[&str]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for line in lines {
            encoder.write_all(line.as_bytes()).unwrap();
            encoder.write_all(b"\n").unwrap();
        }
        encoder.finish().unwrap()
    }

    #[test]
    fn test_versioned_advisory_fans_out() {
        let provider = AdvisoryArchiveProvider::new("npm");
        let bundle = gzip(&[
            r#"{"id":"MAL-2024-0001","affected":[{"package":{"name":"lodash"},"versions":["4.17.0","4.17.1"]}],"modified":"2024-01-02T00:00:00Z"}"#,
        ]);

        let iocs = provider.parse_bundle(bundle.as_slice());
        assert_eq!(iocs.len(), 2);
        assert_eq!(iocs[0].value, "lodash");
        assert_eq!(iocs[0].ioc_type, IocType::Package);
        assert_eq!(iocs[0].version, "4.17.0");
        assert_eq!(iocs[1].version, "4.17.1");
        assert_eq!(iocs[0].source, "osv-npm");
        assert!(iocs[0].tags.contains(&"MAL-2024-0001".to_string()));
    }

    #[test]
    fn test_unversioned_advisory_is_wildcard() {
        let provider = AdvisoryArchiveProvider::new("PyPI");
        let bundle = gzip(&[
            r#"{"id":"MAL-2024-0002","affected":[{"package":{"name":"requests-helper"},"versions":[]}],"modified":"2024-01-02T00:00:00Z"}"#,
        ]);

        let iocs = provider.parse_bundle(bundle.as_slice());
        assert_eq!(iocs.len(), 1);
        assert_eq!(iocs[0].version, "");
        assert_eq!(iocs[0].source, "osv-pypi");
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let provider = AdvisoryArchiveProvider::new("Go");
        let bundle = gzip(&[
            "not json",
            r#"{"id":"MAL-2024-0003","affected":[{"package":{"name":"example.com/mod"},"versions":["1.0.0"]}],"modified":"2024-01-02T00:00:00Z"}"#,
            "",
        ]);

        let iocs = provider.parse_bundle(bundle.as_slice());
        assert_eq!(iocs.len(), 1);
        assert_eq!(iocs[0].value, "example.com/mod");
    }
}
