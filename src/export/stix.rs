//! STIX 2.1 bundle feed
//!
//! Renders catalog windows as a STIX 2.1 bundle of indicator objects with
//! type-specific patterns.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::ioc::{feed_confidence, Ioc, IocType};

#[derive(Debug, Serialize)]
pub struct StixBundle {
    #[serde(rename = "type")]
    pub object_type: &'static str,
    pub id: String,
    pub spec_version: &'static str,
    pub objects: Vec<StixIndicator>,
}

#[derive(Debug, Serialize)]
pub struct StixIndicator {
    #[serde(rename = "type")]
    pub object_type: &'static str,
    pub spec_version: &'static str,
    pub id: String,
    pub created: String,
    pub modified: String,
    pub name: String,
    pub pattern: String,
    pub pattern_type: &'static str,
    pub valid_from: String,
    pub indicator_types: Vec<&'static str>,
    pub confidence: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_references: Vec<ExternalReference>,
}

#[derive(Debug, Serialize)]
pub struct ExternalReference {
    pub source_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// Render a window of records as a pretty-printed STIX 2.1 bundle.
pub fn render_bundle(iocs: &[Ioc]) -> Result<String, serde_json::Error> {
    let bundle = StixBundle {
        object_type: "bundle",
        id: format!("bundle--{}", Uuid::new_v4()),
        spec_version: "2.1",
        objects: iocs.iter().map(to_indicator).collect(),
    };

    serde_json::to_string_pretty(&bundle)
}

fn to_indicator(ioc: &Ioc) -> StixIndicator {
    let now = Utc::now().to_rfc3339();

    StixIndicator {
        object_type: "indicator",
        spec_version: "2.1",
        id: format!("indicator--{}", Uuid::new_v4()),
        created: now.clone(),
        modified: now,
        name: format!("{} Indicator", ioc.ioc_type.as_str().to_uppercase()),
        pattern: build_pattern(ioc),
        pattern_type: "stix",
        valid_from: ioc.first_seen.to_rfc3339(),
        indicator_types: map_indicator_types(&ioc.threat_type),
        confidence: feed_confidence(ioc),
        labels: ioc.tags.clone(),
        external_references: vec![ExternalReference {
            source_name: ioc.source.clone(),
            url: source_url(&ioc.source).to_string(),
        }],
    }
}

fn build_pattern(ioc: &Ioc) -> String {
    match ioc.ioc_type {
        IocType::Ip => format!("[ipv4-addr:value = '{}']", ioc.value),
        IocType::Domain => format!("[domain-name:value = '{}']", ioc.value),
        IocType::Url => format!("[url:value = '{}']", ioc.value),
        IocType::FileHash => format!(
            "[file:hashes.'{}' = '{}']",
            detect_hash_algo(&ioc.value),
            ioc.value
        ),
        IocType::Package => format!("[software:name = '{}']", ioc.value),
    }
}

/// Hash algorithm by digest length; anything unrecognized is assumed SHA-256.
fn detect_hash_algo(hash: &str) -> &'static str {
    match hash.len() {
        32 => "MD5",
        40 => "SHA-1",
        _ => "SHA-256",
    }
}

fn map_indicator_types(threat_type: &str) -> Vec<&'static str> {
    match threat_type {
        "c2_server" => vec!["malicious-activity", "command-and-control"],
        "malware_distribution" | "malware_download" => {
            vec!["malicious-activity", "malware-download"]
        }
        "phishing" => vec!["malicious-activity", "phishing"],
        "supply_chain_malware" => vec!["malicious-activity", "supply-chain-compromise"],
        "botnet" | "botnet_c2" => vec!["malicious-activity", "botnet"],
        "generic_malware" => vec!["malicious-activity"],
        "anonymization_network" => vec!["anomalous-activity"],
        _ => vec!["malicious-activity"],
    }
}

/// Upstream reference URL per source; unknown sources get an empty URL.
fn source_url(source: &str) -> &'static str {
    match source {
        "alienvault-otx" => "https://otx.alienvault.com",
        "abusech-urlhaus" | "urlhaus" => "https://urlhaus.abuse.ch",
        "abusech-feodo" => "https://feodotracker.abuse.ch",
        "digitalside" => "https://osint.digitalside.it",
        "tor-exit-nodes" => "https://check.torproject.org",
        "osv-npm" | "osv-pypi" | "osv-maven" | "osv-go" => "https://osv.dev",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_per_type() {
        let cases = [
            (IocType::Ip, "203.0.113.9", "[ipv4-addr:value = '203.0.113.9']"),
            (IocType::Domain, "evil.example", "[domain-name:value = 'evil.example']"),
            (IocType::Url, "http://evil.example/a", "[url:value = 'http://evil.example/a']"),
            (IocType::Package, "lodash", "[software:name = 'lodash']"),
        ];
        for (ioc_type, value, expected) in cases {
            let ioc = Ioc::new(value, ioc_type, "feed");
            assert_eq!(build_pattern(&ioc), expected);
        }
    }

    #[test]
    fn test_hash_pattern_algo_detection() {
        let md5 = Ioc::new("d41d8cd98f00b204e9800998ecf8427e", IocType::FileHash, "feed");
        assert!(build_pattern(&md5).contains("file:hashes.'MD5'"));

        let sha1 = Ioc::new(
            "da39a3ee5e6b4b0d3255bfef95601890afd80709",
            IocType::FileHash,
            "feed",
        );
        assert!(build_pattern(&sha1).contains("file:hashes.'SHA-1'"));

        let sha256 = Ioc::new(
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            IocType::FileHash,
            "feed",
        );
        assert!(build_pattern(&sha256).contains("file:hashes.'SHA-256'"));
    }

    #[test]
    fn test_indicator_type_mapping() {
        assert_eq!(
            map_indicator_types("c2_server"),
            vec!["malicious-activity", "command-and-control"]
        );
        assert_eq!(map_indicator_types("unheard_of"), vec!["malicious-activity"]);
    }

    #[test]
    fn test_bundle_shape() {
        let iocs = vec![Ioc::new("203.0.113.9", IocType::Ip, "abusech-feodo")
            .with_threat_type("botnet_c2")
            .with_tags(vec!["blocklist".to_string()])];
        let rendered = render_bundle(&iocs).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(parsed["type"], "bundle");
        assert_eq!(parsed["spec_version"], "2.1");
        assert!(parsed["id"].as_str().unwrap().starts_with("bundle--"));

        let indicator = &parsed["objects"][0];
        assert_eq!(indicator["type"], "indicator");
        assert_eq!(indicator["pattern_type"], "stix");
        assert!(indicator["id"].as_str().unwrap().starts_with("indicator--"));
        assert_eq!(indicator["pattern"], "[ipv4-addr:value = '203.0.113.9']");
        assert_eq!(
            indicator["external_references"][0]["url"],
            "https://feodotracker.abuse.ch"
        );
        assert_eq!(indicator["labels"][0], "blocklist");
    }

    #[test]
    fn test_unknown_source_has_no_url() {
        let iocs = vec![Ioc::new("203.0.113.9", IocType::Ip, "mystery-feed")];
        let rendered = render_bundle(&iocs).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        // Empty URL is omitted from the reference object
        assert!(parsed["objects"][0]["external_references"][0]
            .get("url")
            .is_none());
    }
}
