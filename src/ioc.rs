//! Indicator of Compromise (IOC) types
//!
//! Core domain types for the catalog, plus the pure helpers that operate on
//! them: component extraction, value normalization, and confidence scoring.
//! Nothing in this module performs I/O.

use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of Indicator of Compromise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IocType {
    /// IPv4 or IPv6 address
    Ip,
    /// Domain name
    Domain,
    /// Full URL
    Url,
    /// File hash (MD5, SHA-1, SHA-256)
    FileHash,
    /// Software package name
    Package,
}

impl IocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IocType::Ip => "ip",
            IocType::Domain => "domain",
            IocType::Url => "url",
            IocType::FileHash => "file_hash",
            IocType::Package => "package",
        }
    }
}

impl FromStr for IocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(IocType::Ip),
            "domain" => Ok(IocType::Domain),
            "url" => Ok(IocType::Url),
            "file_hash" => Ok(IocType::FileHash),
            "package" => Ok(IocType::Package),
            other => Err(format!("unknown IOC type: {}", other)),
        }
    }
}

impl std::fmt::Display for IocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single catalog record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ioc {
    /// The observable value (address, URL, hash, package name)
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: IocType,
    /// Short identifier of the feed that produced this record
    pub source: String,
    /// Feed-supplied category (may be empty)
    pub threat_type: String,
    pub tags: Vec<String>,
    /// Affected release for package IOCs; empty means all versions
    pub version: String,
    /// When the source first observed the indicator
    pub first_seen: DateTime<Utc>,
    /// When this system persisted the record
    pub date_ingested: DateTime<Utc>,
}

impl Ioc {
    pub fn new(value: impl Into<String>, ioc_type: IocType, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            value: value.into(),
            ioc_type,
            source: source.into(),
            threat_type: String::new(),
            tags: Vec::new(),
            version: String::new(),
            first_seen: now,
            date_ingested: now,
        }
    }

    pub fn with_threat_type(mut self, threat_type: impl Into<String>) -> Self {
        self.threat_type = threat_type.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_first_seen(mut self, first_seen: DateTime<Utc>) -> Self {
        self.first_seen = first_seen;
        self
    }
}

/// Extract sub-indicators from a complex value.
///
/// The input IOC is always the first element of the result. A URL value
/// additionally yields its host as an Ip or Domain IOC so that alerts
/// carrying a bare host still join against catalog entries that only hold
/// the full URL. Non-URL values with an embedded IP literal yield at most
/// one extracted Ip IOC.
pub fn extract_components(base: &Ioc) -> Vec<Ioc> {
    let mut components = vec![base.clone()];
    let value = base.value.as_str();

    if value.starts_with("http://") || value.starts_with("https://") {
        if let Some(host) = url_host(value) {
            if !host.is_empty() && host != value {
                let ioc_type = if host.parse::<IpAddr>().is_ok() {
                    IocType::Ip
                } else {
                    IocType::Domain
                };
                components.push(derived_ioc(base, host, ioc_type, "extracted-from-url"));
            }
        }
    } else if !value.starts_with("http") {
        // Values like "198.51.100.7:8080" or "198.51.100.7/path"
        for part in value.split(|c| c == ':' || c == '/' || c == '?') {
            if part != value && part.parse::<IpAddr>().is_ok() {
                components.push(derived_ioc(base, part, IocType::Ip, "extracted-from-value"));
                break;
            }
        }
    }

    components
}

fn derived_ioc(base: &Ioc, value: &str, ioc_type: IocType, marker: &str) -> Ioc {
    let mut tags = Vec::with_capacity(base.tags.len() + 1);
    tags.push(marker.to_string());
    tags.extend(base.tags.iter().cloned());

    Ioc {
        value: value.to_string(),
        ioc_type,
        source: base.source.clone(),
        threat_type: base.threat_type.clone(),
        tags,
        version: String::new(),
        first_seen: base.first_seen,
        date_ingested: base.date_ingested,
    }
}

/// Pull the host out of an absolute http(s) URL.
fn url_host(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    // Drop userinfo if present
    let host_port = authority.rsplit('@').next()?;

    if let Some(bracketed) = host_port.strip_prefix('[') {
        return bracketed.split(']').next().filter(|h| !h.is_empty());
    }

    host_port.split(':').next().filter(|h| !h.is_empty())
}

/// Normalize an IOC value for matching.
pub fn normalize(value: &str, ioc_type: IocType) -> String {
    match ioc_type {
        IocType::Url => {
            let lowered = value.to_lowercase();
            lowered.strip_suffix('/').unwrap_or(&lowered).to_string()
        }
        IocType::Domain => value.to_lowercase(),
        IocType::Ip => value.trim().to_string(),
        _ => value.to_string(),
    }
}

/// Overall confidence for a set of sightings of the same value.
///
/// Multiple independent sightings raise confidence.
pub fn overall_score(iocs: &[Ioc]) -> i64 {
    if iocs.is_empty() {
        0
    } else if iocs.len() >= 3 {
        90
    } else if iocs.len() >= 2 {
        85
    } else {
        80
    }
}

/// High-trust feeds whose records score above the baseline.
const HIGH_TRUST_SOURCES: &[&str] = &["alienvault-otx", "abusech-urlhaus"];

/// Per-record confidence used by the export feeds.
pub fn feed_confidence(ioc: &Ioc) -> i64 {
    let mut confidence = 70;

    if HIGH_TRUST_SOURCES.contains(&ioc.source.as_str()) {
        confidence += 10;
    }
    if ioc.threat_type == "malware_download" || ioc.threat_type == "c2_server" {
        confidence += 5;
    }
    if ioc.tags.len() > 3 {
        confidence += 5;
    }

    confidence.min(100)
}
