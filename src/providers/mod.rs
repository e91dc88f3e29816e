//! Threat feed providers
//!
//! Uniform "fetch a batch of IOCs" abstraction over heterogeneous upstream
//! feeds. A failing provider surfaces an error to the ingestion coordinator,
//! which logs it and carries on with the others.

pub mod archive;
pub mod list;

use async_trait::async_trait;

use crate::ioc::{Ioc, IocType};

pub use archive::AdvisoryArchiveProvider;
pub use list::{IpListProvider, UrlListProvider};

/// A single threat intelligence feed.
///
/// Deadlines and cancellation reach a provider through the shared client's
/// timeout and the coordinator's enclosing deadline; a provider must not
/// block past either.
#[async_trait]
pub trait ThreatProvider: Send + Sync {
    /// Short identifier recorded as the `source` of every produced IOC
    fn name(&self) -> &str;

    /// Fetch and parse the feed
    async fn fetch(&self, client: &reqwest::Client) -> anyhow::Result<Vec<Ioc>>;
}

/// Best-effort IOC type detection for plain feed values.
pub(crate) fn detect_ioc_type(value: &str) -> IocType {
    if value.starts_with("http://") || value.starts_with("https://") {
        return IocType::Url;
    }

    if value.parse::<std::net::IpAddr>().is_ok() {
        return IocType::Ip;
    }

    // Hash lengths: MD5 32, SHA-1 40, SHA-256 64
    if matches!(value.len(), 32 | 40 | 64) && value.chars().all(|c| c.is_ascii_hexdigit()) {
        return IocType::FileHash;
    }

    IocType::Domain
}

/// The built-in provider roster used by the `ingest` command.
pub fn default_providers() -> Vec<Box<dyn ThreatProvider>> {
    vec![
        Box::new(UrlListProvider::new(
            "abusech-urlhaus",
            "https://urlhaus.abuse.ch/downloads/text_online/",
            "malware_download",
        )),
        Box::new(IpListProvider::new(
            "abusech-feodo",
            "https://feodotracker.abuse.ch/downloads/ipblocklist.txt",
            "botnet_c2",
        )),
        Box::new(IpListProvider::new(
            "cins-army",
            "https://cinsscore.com/list/ci-badguys.txt",
            "bad_reputation",
        )),
        Box::new(IpListProvider::new(
            "digitalside",
            "https://raw.githubusercontent.com/davidonzo/Threat-Intel/master/lists/latestips.txt",
            "generic_malware",
        )),
        Box::new(IpListProvider::new(
            "tor-exit-nodes",
            "https://check.torproject.org/torbulkexitlist",
            "anonymization_network",
        )),
        Box::new(AdvisoryArchiveProvider::new("npm")),
        Box::new(AdvisoryArchiveProvider::new("PyPI")),
        Box::new(AdvisoryArchiveProvider::new("Go")),
        Box::new(AdvisoryArchiveProvider::new("Maven")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_ioc_type() {
        assert_eq!(detect_ioc_type("http://evil.example/a"), IocType::Url);
        assert_eq!(detect_ioc_type("203.0.113.9"), IocType::Ip);
        assert_eq!(detect_ioc_type("2001:db8::1"), IocType::Ip);
        assert_eq!(
            detect_ioc_type("d41d8cd98f00b204e9800998ecf8427e"),
            IocType::FileHash
        );
        assert_eq!(detect_ioc_type("evil.example.com"), IocType::Domain);
    }

    #[test]
    fn test_default_roster() {
        let providers = default_providers();
        assert!(providers.len() >= 5);
        assert!(providers.iter().any(|p| p.name() == "abusech-urlhaus"));
        assert!(providers.iter().any(|p| p.name() == "osv-npm"));
    }
}
