//! Alert enrichment
//!
//! Joins inbound EDR alerts against the catalog, aggregates search results,
//! and drives the webhook flow: enrich, triage, notify, respond. Kept free
//! of HTTP framing so the whole flow is testable against an in-memory
//! catalog.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ioc::{overall_score, Ioc};
use crate::llm::{IocContext, ThreatContext, TriageResult, Triager};
use crate::notify::Notifier;
use crate::repository::{Database, RepositoryError};

/// Budget for the triage step of one alert; expiry degrades to an
/// un-triaged alert rather than failing the webhook.
const ALERT_TRIAGE_DEADLINE: Duration = Duration::from_secs(10);

/// Inbound alert from the EDR webhook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdrAlert {
    #[serde(rename = "alertId", default)]
    pub alert_id: String,
    #[serde(rename = "threatName", default)]
    pub threat_name: String,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub endpoint: EdrEndpoint,
    #[serde(default)]
    pub indicators: Vec<EdrIndicator>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdrEndpoint {
    #[serde(rename = "computerName", default)]
    pub computer_name: String,
    #[serde(rename = "osType", default)]
    pub os_type: String,
    #[serde(rename = "agentVersion", default)]
    pub agent_version: String,
}

/// One indicator as delivered by the EDR; the type tag is preserved verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdrIndicator {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: String,
}

/// The catalog join result for one alert indicator
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedIndicator {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: String,
    pub in_database: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub threat_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
}

/// Aggregated view over all sightings of one search value
#[derive(Debug, Clone, Serialize)]
pub struct SearchDetail {
    pub value: String,
    pub count: usize,
    pub overall_score: i64,
    pub all_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub sightings: Vec<Ioc>,
}

/// Webhook response envelope
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub status: String,
    pub alert_id: String,
    pub indicators_enriched: usize,
    pub indicators_in_db: usize,
    pub notified: bool,
    pub llm_triaged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_positive: Option<bool>,
}

/// Join the alert's indicators against the catalog, in input order.
///
/// Exact match first; when that comes back empty, the bounded substring scan
/// catches cases like a bare host against a full-URL record. A storage error
/// degrades the indicator to "not in database" instead of failing the alert.
pub fn enrich_indicators(db: &Database, indicators: &[EdrIndicator]) -> Vec<EnrichedIndicator> {
    let mut enriched = Vec::with_capacity(indicators.len());

    for indicator in indicators {
        let mut rows = match db.find_all_by_value(&indicator.value) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("catalog lookup failed for {}: {}", indicator.value, e);
                Vec::new()
            }
        };

        if rows.is_empty() {
            rows = match db.find_containing(&indicator.value) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("substring lookup failed for {}: {}", indicator.value, e);
                    Vec::new()
                }
            };
        }

        if rows.is_empty() {
            enriched.push(EnrichedIndicator {
                type_tag: indicator.type_tag.clone(),
                value: indicator.value.clone(),
                in_database: false,
                sources: Vec::new(),
                tags: Vec::new(),
                threat_types: Vec::new(),
                first_seen: None,
            });
            continue;
        }

        let sources = unique(rows.iter().map(|r| r.source.clone()));
        let tags = unique(rows.iter().flat_map(|r| r.tags.iter().cloned()));
        let threat_types = unique(
            rows.iter()
                .map(|r| r.threat_type.clone())
                .filter(|t| !t.is_empty()),
        );
        let first_seen = rows.iter().map(|r| r.first_seen).min();

        enriched.push(EnrichedIndicator {
            type_tag: indicator.type_tag.clone(),
            value: indicator.value.clone(),
            in_database: true,
            sources,
            tags,
            threat_types,
            first_seen,
        });
    }

    enriched
}

/// Split a package spec at the last `@`. A leading `@` that is the only one
/// marks a scoped package with no version.
pub fn split_package_spec(value: &str) -> (&str, Option<&str>) {
    match value.rfind('@') {
        None | Some(0) => (value, None),
        Some(idx) => {
            let version = &value[idx + 1..];
            if version.is_empty() {
                (&value[..idx], None)
            } else {
                (&value[..idx], Some(version))
            }
        }
    }
}

/// Search the catalog for a value (optionally `name@version`) and aggregate
/// the sightings into one detail record.
pub fn search_iocs(db: &Database, value: &str) -> Result<SearchDetail, RepositoryError> {
    let (name, version) = split_package_spec(value);

    let sightings = match version {
        Some(version) => db.find_by_value_and_version(name, version)?,
        None => db.find_all_by_value(name)?,
    };

    let all_tags = unique(sightings.iter().flat_map(|r| r.tags.iter().cloned()));
    let first_seen = sightings.iter().map(|r| r.first_seen).min();
    let last_seen = sightings.iter().map(|r| r.date_ingested).max();

    Ok(SearchDetail {
        value: value.to_string(),
        count: sightings.len(),
        overall_score: overall_score(&sightings),
        all_tags,
        first_seen,
        last_seen,
        sightings,
    })
}

/// Build the triager's view of an enriched alert.
pub fn to_threat_context(alert: &EdrAlert, enriched: &[EnrichedIndicator]) -> ThreatContext {
    ThreatContext {
        alert_id: alert.alert_id.clone(),
        threat_name: alert.threat_name.clone(),
        classification: alert.classification.clone(),
        endpoint: alert.endpoint.computer_name.clone(),
        os_type: alert.endpoint.os_type.clone(),
        iocs: enriched
            .iter()
            .map(|ind| IocContext {
                type_tag: ind.type_tag.clone(),
                value: ind.value.clone(),
                in_database: ind.in_database,
                sources: ind.sources.clone(),
                tags: ind.tags.clone(),
                threat_types: ind.threat_types.clone(),
                first_seen: ind.first_seen,
            })
            .collect(),
    }
}

/// The full webhook flow: enrich, triage when enabled, notify best-effort,
/// and shape the response envelope. Secondary failures never abort the flow.
pub async fn process_alert(
    db: &Database,
    triager: Option<&Triager>,
    notifier: Option<&Notifier>,
    alert: EdrAlert,
) -> WebhookResponse {
    info!(
        "received alert {} from endpoint {}",
        alert.alert_id, alert.endpoint.computer_name
    );

    let enriched = enrich_indicators(db, &alert.indicators);
    let in_db = enriched.iter().filter(|e| e.in_database).count();

    let mut triage_result: Option<TriageResult> = None;
    if let Some(triager) = triager.filter(|t| t.is_enabled()) {
        let threat = to_threat_context(&alert, &enriched);
        match tokio::time::timeout(ALERT_TRIAGE_DEADLINE, triager.triage(&threat)).await {
            Ok(Ok(result)) => {
                // Confident false positives are dropped without notifying
                if result.false_positive && result.confidence >= 80 {
                    info!(
                        "alert {} classified as false positive (confidence {}), skipping notification",
                        alert.alert_id, result.confidence
                    );
                    return WebhookResponse {
                        status: "received".to_string(),
                        alert_id: alert.alert_id,
                        indicators_enriched: enriched.len(),
                        indicators_in_db: in_db,
                        notified: false,
                        llm_triaged: true,
                        false_positive: Some(true),
                    };
                }
                triage_result = Some(result);
            }
            Ok(Err(e)) => {
                // Triage is treated as absent; the notifier still runs
                warn!("triage failed for alert {}: {}", alert.alert_id, e);
            }
            Err(_) => {
                warn!("triage deadline expired for alert {}", alert.alert_id);
            }
        }
    }

    let mut notified = false;
    if let Some(notifier) = notifier {
        notified = true;
        if let Err(e) = notifier
            .notify(&alert, &enriched, triage_result.as_ref())
            .await
        {
            warn!("notifier failed for alert {}: {}", alert.alert_id, e);
        }
    }

    WebhookResponse {
        status: "received".to_string(),
        alert_id: alert.alert_id,
        indicators_enriched: enriched.len(),
        indicators_in_db: in_db,
        notified,
        llm_triaged: triage_result.is_some(),
        false_positive: triage_result.map(|r| r.false_positive).filter(|fp| *fp),
    }
}

fn unique<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioc::IocType;

    fn indicator(type_tag: &str, value: &str) -> EdrIndicator {
        EdrIndicator {
            type_tag: type_tag.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_split_package_spec() {
        assert_eq!(split_package_spec("lodash"), ("lodash", None));
        assert_eq!(split_package_spec("lodash@4.17.0"), ("lodash", Some("4.17.0")));
        assert_eq!(split_package_spec("@org/pkg"), ("@org/pkg", None));
        assert_eq!(split_package_spec("@org/pkg@1.0.0"), ("@org/pkg", Some("1.0.0")));
        assert_eq!(split_package_spec("pkg@"), ("pkg", None));
    }

    #[test]
    fn test_enrich_exact_match_dedupes() {
        let db = Database::open_memory().unwrap();
        db.save_batch(&[
            Ioc::new("203.0.113.9", IocType::Ip, "feed-a")
                .with_threat_type("botnet_c2")
                .with_tags(vec!["blocklist".into()]),
            Ioc::new("203.0.113.9", IocType::Ip, "feed-b")
                .with_threat_type("botnet_c2")
                .with_tags(vec!["blocklist".into(), "scanner".into()]),
        ])
        .unwrap();

        let enriched = enrich_indicators(&db, &[indicator("IPV4", "203.0.113.9")]);
        assert_eq!(enriched.len(), 1);
        assert!(enriched[0].in_database);
        assert_eq!(enriched[0].sources.len(), 2);
        assert_eq!(enriched[0].threat_types, vec!["botnet_c2".to_string()]);
        assert_eq!(enriched[0].tags, vec!["blocklist".to_string(), "scanner".to_string()]);
    }

    #[test]
    fn test_enrich_substring_fallback() {
        let db = Database::open_memory().unwrap();
        db.save_batch(&[Ioc::new(
            "http://198.51.100.7/payload.sh",
            IocType::Url,
            "abusech-urlhaus",
        )])
        .unwrap();

        let enriched = enrich_indicators(&db, &[indicator("IPV4", "198.51.100.7")]);
        assert!(enriched[0].in_database);
        assert_eq!(enriched[0].sources, vec!["abusech-urlhaus".to_string()]);
    }

    #[test]
    fn test_enrich_no_match() {
        let db = Database::open_memory().unwrap();
        let enriched = enrich_indicators(&db, &[indicator("IPV4", "203.0.113.9")]);
        assert!(!enriched[0].in_database);
        assert!(enriched[0].sources.is_empty());
    }

    #[test]
    fn test_enrich_preserves_input_order() {
        let db = Database::open_memory().unwrap();
        let enriched = enrich_indicators(
            &db,
            &[indicator("DOMAIN", "b.example"), indicator("DOMAIN", "a.example")],
        );
        assert_eq!(enriched[0].value, "b.example");
        assert_eq!(enriched[1].value, "a.example");
    }

    #[test]
    fn test_search_aggregation() {
        let db = Database::open_memory().unwrap();
        db.save_batch(&[
            Ioc::new("lodash", IocType::Package, "osv-npm")
                .with_tags(vec!["MAL-1".into()])
                .with_version(""),
            Ioc::new("lodash", IocType::Package, "osv-npm")
                .with_tags(vec!["MAL-2".into()])
                .with_version("4.17.0"),
        ])
        .unwrap();

        let detail = search_iocs(&db, "lodash@4.17.0").unwrap();
        assert_eq!(detail.count, 2);
        assert_eq!(detail.overall_score, 85);
        assert_eq!(detail.all_tags.len(), 2);
        assert!(detail.first_seen.is_some());
        assert!(detail.last_seen.is_some());

        // Unversioned search also sees both rows
        let detail = search_iocs(&db, "lodash").unwrap();
        assert_eq!(detail.count, 2);
    }

    #[tokio::test]
    async fn test_process_alert_without_triager() {
        let db = Database::open_memory().unwrap();
        let alert = EdrAlert {
            alert_id: "a-42".to_string(),
            indicators: vec![indicator("IPV4", "203.0.113.9")],
            ..Default::default()
        };

        let response = process_alert(&db, None, None, alert).await;
        assert_eq!(response.status, "received");
        assert_eq!(response.alert_id, "a-42");
        assert_eq!(response.indicators_enriched, 1);
        assert_eq!(response.indicators_in_db, 0);
        assert!(!response.llm_triaged);
        assert!(!response.notified);
        assert!(response.false_positive.is_none());
    }
}
