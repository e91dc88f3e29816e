//! Newline-oriented feed providers
//!
//! Two shapes of line feed: plain host/IP blocklists, and URL lists that go
//! through component extraction so that a bare host in an alert still joins
//! against the full URL in the catalog.

use async_trait::async_trait;
use chrono::Utc;

use super::{detect_ioc_type, ThreatProvider};
use crate::ioc::{extract_components, Ioc, IocType};

/// Plain newline-separated IP blocklist feed
pub struct IpListProvider {
    name: String,
    url: String,
    threat_type: String,
}

impl IpListProvider {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        threat_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            threat_type: threat_type.into(),
        }
    }

    fn parse_line(&self, line: &str) -> Option<Ioc> {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            return None;
        }

        // Strip trailing port and inline comments
        if let Some(idx) = line.find(':') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find('#') {
            line = line[..idx].trim();
        }

        if !line.contains('.') {
            return None;
        }

        Some(
            Ioc::new(line, IocType::Ip, self.name.clone())
                .with_threat_type(self.threat_type.clone())
                .with_tags(vec!["blocklist".to_string(), "network_attack".to_string()]),
        )
    }
}

#[async_trait]
impl ThreatProvider for IpListProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, client: &reqwest::Client) -> anyhow::Result<Vec<Ioc>> {
        let text = client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(text.lines().filter_map(|line| self.parse_line(line)).collect())
    }
}

/// URL list feed with component extraction
pub struct UrlListProvider {
    name: String,
    url: String,
    threat_type: String,
}

impl UrlListProvider {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        threat_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            threat_type: threat_type.into(),
        }
    }

    fn parse_line(&self, line: &str) -> Vec<Ioc> {
        let mut line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            return Vec::new();
        }
        if let Some(idx) = line.find('#') {
            line = line[..idx].trim();
            if line.is_empty() {
                return Vec::new();
            }
        }

        let now = Utc::now();

        if line.starts_with("http://") || line.starts_with("https://") {
            let base = Ioc::new(line, IocType::Url, self.name.clone())
                .with_threat_type(self.threat_type.clone())
                .with_tags(vec!["malware-url".to_string(), "threat-feed".to_string()])
                .with_first_seen(now);
            return extract_components(&base);
        }

        // Hosts without a scheme: treat as a URL so the host component is
        // extracted alongside it
        if line.contains('.') && !line.contains(char::is_whitespace) {
            let full = format!("http://{}", line);
            let base = Ioc::new(full, IocType::Url, self.name.clone())
                .with_threat_type(self.threat_type.clone())
                .with_tags(vec!["malware-url".to_string(), "threat-feed".to_string()])
                .with_first_seen(now);
            return extract_components(&base);
        }

        vec![Ioc::new(line, detect_ioc_type(line), self.name.clone())
            .with_threat_type(self.threat_type.clone())
            .with_tags(vec!["threat-feed".to_string()])
            .with_first_seen(now)]
    }
}

#[async_trait]
impl ThreatProvider for UrlListProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, client: &reqwest::Client) -> anyhow::Result<Vec<Ioc>> {
        let text = client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(text.lines().flat_map(|line| self.parse_line(line)).collect())
    }
}
