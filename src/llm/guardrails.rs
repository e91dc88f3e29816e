//! Rule-based guardrails around the LLM triager
//!
//! Deterministic pre-filters that can answer an alert without calling the
//! LLM at all, and post-filters that validate and adjust whatever the LLM
//! returns. Both are pure over their inputs apart from metric counters.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::triager::{ThreatContext, TriageResult};
use crate::metrics::Metrics;

/// Indicators that should never be marked as malicious
pub const KNOWN_GOOD_INDICATORS: &[&str] = &[
    // Microsoft
    "microsoft.com",
    "windowsupdate.com",
    "update.microsoft.com",
    "msftconnecttest.com",
    "office.com",
    "live.com",
    // Cloud providers
    "amazonaws.com",
    "cloudfront.net",
    "googleapis.com",
    "gstatic.com",
    "azure.com",
    // CDNs
    "cloudflare.com",
    "akamai.net",
    "fastly.net",
    // Common services
    "apple.com",
    "google.com",
    "mozilla.org",
    "ubuntu.com",
    "debian.org",
];

/// Threat types that indicate confirmed malicious activity
pub const HIGH_RISK_THREAT_TYPES: &[&str] = &[
    "c2_server",
    "c2",
    "command_and_control",
    "malware_download",
    "ransomware",
    "botnet",
    "phishing",
    "cryptominer",
    "backdoor",
    "trojan",
    "rat",
    "webshell",
];

/// Alert severity, ordered from most to least urgent by canonical priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Parse a severity string; anything unrecognized becomes Medium.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            "info" => Severity::Info,
            _ => Severity::Medium,
        }
    }

    /// The canonical priority for this severity (1 = highest)
    pub fn canonical_priority(&self) -> i64 {
        match self {
            Severity::Critical => 1,
            Severity::High => 2,
            Severity::Medium => 3,
            Severity::Low => 4,
            Severity::Info => 5,
        }
    }
}

/// Guardrail tuning
#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    /// Minimum confidence for a false-positive verdict to stand
    pub min_fp_confidence: i64,
    /// Require a catalog hit before allowing critical severity
    pub require_intel_for_critical: bool,
    /// Severity cap applied to confident-but-unconfirmed verdicts
    pub max_severity_without_intel: Severity,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            min_fp_confidence: 85,
            require_intel_for_critical: true,
            max_severity_without_intel: Severity::Medium,
        }
    }
}

/// Decide an alert before the LLM sees it, when the rules allow.
///
/// Returns Some(result) when the caller should skip the LLM entirely.
pub fn apply_pre_guardrails(
    threat: &ThreatContext,
    _config: &GuardrailConfig,
    metrics: &Metrics,
) -> Option<TriageResult> {
    // Rule 1: every indicator matches the allowlist
    let has_iocs = !threat.iocs.is_empty();
    let all_known_good = threat.iocs.iter().all(|ioc| is_known_good(&ioc.value));

    if has_iocs && all_known_good {
        info!("pre-filter: all indicators are known good, marking as false positive");
        metrics.record_guardrail("pre", "skip");
        return Some(TriageResult {
            severity: Severity::Info.as_str().to_string(),
            priority: 5,
            summary: "All indicators are legitimate infrastructure".to_string(),
            analysis: "Analysis shows all indicators belong to known legitimate services \
                       (cloud providers, OS update endpoints, major CDNs). This is a false positive."
                .to_string(),
            recommended: vec![
                "Mark as false positive".to_string(),
                "Adjust detection rules to exclude legitimate services".to_string(),
            ],
            false_positive: true,
            confidence: 95,
        });
    }

    // Rule 2: a catalog hit carries a high-risk threat type
    let high_risk_types: Vec<&str> = threat
        .iocs
        .iter()
        .filter(|ioc| ioc.in_database)
        .flat_map(|ioc| ioc.threat_types.iter())
        .filter(|t| is_high_risk(t))
        .map(|t| t.as_str())
        .collect();

    if !high_risk_types.is_empty() {
        info!("pre-filter: high-risk threat types detected: {:?}", high_risk_types);
        metrics.record_guardrail("pre", "skip");
        return Some(TriageResult {
            severity: Severity::High.as_str().to_string(),
            priority: 2,
            summary: "Confirmed malicious activity detected in threat intelligence".to_string(),
            analysis: format!(
                "Threat intelligence sources confirm this as malicious activity: {}",
                high_risk_types.join(", ")
            ),
            recommended: vec![
                "Isolate affected endpoint immediately".to_string(),
                "Conduct forensic analysis".to_string(),
                "Check for lateral movement".to_string(),
                "Scan other endpoints for similar IOCs".to_string(),
            ],
            false_positive: false,
            confidence: 90,
        });
    }

    None
}

/// Validate and adjust an LLM verdict against the enrichment facts.
pub fn apply_post_guardrails(
    mut result: TriageResult,
    threat: &ThreatContext,
    config: &GuardrailConfig,
    metrics: &Metrics,
) -> TriageResult {
    // 1. Normalize fields
    let mut severity = Severity::parse(&result.severity);
    result.confidence = result.confidence.clamp(0, 100);
    result.priority = result.priority.clamp(1, 5);

    let iocs_in_db = threat.iocs.iter().filter(|ioc| ioc.in_database).count();
    let has_high_risk = threat
        .iocs
        .iter()
        .filter(|ioc| ioc.in_database)
        .flat_map(|ioc| ioc.threat_types.iter())
        .any(|t| is_high_risk(t));

    // 2. A false-positive verdict cannot stand against catalog hits
    if result.false_positive && iocs_in_db > 0 {
        warn!(
            "guardrail: LLM marked false positive but {} IOCs are in the catalog, overriding",
            iocs_in_db
        );
        metrics.record_guardrail("post", "override");
        result.false_positive = false;
        result.confidence = (result.confidence - 20).max(50);
        if matches!(severity, Severity::Info | Severity::Low) {
            severity = Severity::Medium;
            result.priority = 3;
        }
    }

    // 3. High-risk threat types cannot be low severity
    if has_high_risk && matches!(severity, Severity::Info | Severity::Low) {
        warn!(
            "guardrail: high-risk threat types but severity is {}, upgrading",
            severity.as_str()
        );
        metrics.record_guardrail("post", "override");
        severity = Severity::High;
        result.priority = 2;
        result.false_positive = false;
        result.confidence = (result.confidence + 10).min(85);
    }

    // 4. No catalog hit caps how alarming the verdict may be
    if config.require_intel_for_critical && iocs_in_db == 0 {
        if severity == Severity::Critical {
            warn!("guardrail: critical severity without threat intel, downgrading to high");
            metrics.record_guardrail("post", "downgrade");
            severity = Severity::High;
            result.priority = 2;
            result.confidence = result.confidence.min(75);
        } else if severity == Severity::High && result.confidence < 80 {
            let cap = config.max_severity_without_intel;
            warn!(
                "guardrail: high severity without threat intel and low confidence, downgrading to {}",
                cap.as_str()
            );
            metrics.record_guardrail("post", "downgrade");
            severity = cap;
            result.priority = cap.canonical_priority();
            result.confidence = result.confidence.min(70);
        }
    }

    // 5. Agreement across several feeds raises confidence
    if iocs_in_db > 0 {
        let sources: HashSet<&str> = threat
            .iocs
            .iter()
            .flat_map(|ioc| ioc.sources.iter())
            .map(|s| s.as_str())
            .collect();
        if sources.len() >= 3 {
            info!("guardrail: {} distinct intel sources, boosting confidence", sources.len());
            metrics.record_guardrail("post", "boost");
            result.confidence = (result.confidence + 15).min(98);
        }
    }

    // 6. A false-positive verdict needs high confidence to stand
    if result.false_positive && result.confidence < config.min_fp_confidence {
        warn!(
            "guardrail: false positive with confidence {} below {}, marking for review",
            result.confidence, config.min_fp_confidence
        );
        metrics.record_guardrail("post", "override");
        result.false_positive = false;
        severity = Severity::Low;
        result.priority = 4;
        result
            .analysis
            .push_str(" (Note: Marked for analyst review due to uncertainty)");
    }

    // 7. Keep priority aligned with severity
    let expected = severity.canonical_priority();
    if (result.priority - expected).abs() > 1 {
        warn!(
            "guardrail: adjusting priority {} to {} to match severity {}",
            result.priority,
            expected,
            severity.as_str()
        );
        result.priority = expected;
    }

    // 8. Non-false-positives always carry recommendations
    if !result.false_positive && result.recommended.is_empty() {
        result.recommended = default_recommendations(severity);
    }

    result.severity = severity.as_str().to_string();
    result
}

fn is_known_good(value: &str) -> bool {
    let lowered = value.to_lowercase();
    KNOWN_GOOD_INDICATORS.iter().any(|good| lowered.contains(good))
}

fn is_high_risk(threat_type: &str) -> bool {
    let lowered = threat_type.to_lowercase();
    HIGH_RISK_THREAT_TYPES.iter().any(|risk| lowered.contains(risk))
}

fn default_recommendations(severity: Severity) -> Vec<String> {
    let actions: &[&str] = match severity {
        Severity::Critical => &[
            "Immediately isolate the affected endpoint",
            "Initiate incident response procedures",
            "Conduct forensic analysis",
            "Check for indicators of lateral movement",
        ],
        Severity::High => &[
            "Isolate the endpoint from the network",
            "Review endpoint activity logs",
            "Scan for additional compromised systems",
        ],
        Severity::Medium => &[
            "Investigate endpoint activity",
            "Monitor for suspicious behavior",
        ],
        Severity::Low => &["Monitor the endpoint"],
        Severity::Info => &["Review and document for analysis"],
    };

    actions.iter().map(|a| a.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::triager::IocContext;

    fn metrics() -> Metrics {
        Metrics::new()
    }

    fn context(iocs: Vec<IocContext>) -> ThreatContext {
        ThreatContext {
            alert_id: "a-1".to_string(),
            threat_name: "Suspicious Connection".to_string(),
            classification: "Malware".to_string(),
            endpoint: "host-1".to_string(),
            os_type: "linux".to_string(),
            iocs,
        }
    }

    fn ioc(value: &str, in_db: bool, threat_types: &[&str], sources: &[&str]) -> IocContext {
        IocContext {
            type_tag: "IPV4".to_string(),
            value: value.to_string(),
            in_database: in_db,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            tags: Vec::new(),
            threat_types: threat_types.iter().map(|s| s.to_string()).collect(),
            first_seen: None,
        }
    }

    fn verdict(severity: &str, priority: i64, fp: bool, confidence: i64) -> TriageResult {
        TriageResult {
            severity: severity.to_string(),
            priority,
            summary: "s".to_string(),
            analysis: "a".to_string(),
            recommended: vec!["act".to_string()],
            false_positive: fp,
            confidence,
        }
    }

    #[test]
    fn test_pre_filter_all_known_good() {
        let m = metrics();
        let threat = context(vec![ioc("update.microsoft.com", false, &[], &[])]);

        let result = apply_pre_guardrails(&threat, &GuardrailConfig::default(), &m).unwrap();
        assert!(result.false_positive);
        assert_eq!(result.severity, "info");
        assert_eq!(result.priority, 5);
        assert_eq!(result.confidence, 95);
    }

    #[test]
    fn test_pre_filter_mixed_indicators_no_skip() {
        let m = metrics();
        let threat = context(vec![
            ioc("update.microsoft.com", false, &[], &[]),
            ioc("203.0.113.9", false, &[], &[]),
        ]);

        assert!(apply_pre_guardrails(&threat, &GuardrailConfig::default(), &m).is_none());
    }

    #[test]
    fn test_pre_filter_known_bad() {
        let m = metrics();
        let threat = context(vec![ioc(
            "192.0.2.5",
            true,
            &["c2_server"],
            &["abusech-feodo"],
        )]);

        let result = apply_pre_guardrails(&threat, &GuardrailConfig::default(), &m).unwrap();
        assert_eq!(result.severity, "high");
        assert_eq!(result.priority, 2);
        assert_eq!(result.confidence, 90);
        assert!(!result.false_positive);
    }

    #[test]
    fn test_pre_filter_empty_alert_no_skip() {
        let m = metrics();
        let threat = context(vec![]);
        assert!(apply_pre_guardrails(&threat, &GuardrailConfig::default(), &m).is_none());
    }

    #[test]
    fn test_post_fp_override_with_catalog_hit() {
        let m = metrics();
        let threat = context(vec![ioc("203.0.113.9", true, &["bad_reputation"], &["cins-army"])]);
        let result = apply_post_guardrails(
            verdict("low", 4, true, 70),
            &threat,
            &GuardrailConfig::default(),
            &m,
        );

        assert!(!result.false_positive);
        assert_eq!(result.severity, "medium");
        assert_eq!(result.priority, 3);
        assert_eq!(result.confidence, 50);
    }

    #[test]
    fn test_post_fp_override_floors_at_50() {
        let m = metrics();
        let threat = context(vec![ioc("203.0.113.9", true, &[], &["cins-army"])]);
        let result = apply_post_guardrails(
            verdict("medium", 3, true, 40),
            &threat,
            &GuardrailConfig::default(),
            &m,
        );

        assert_eq!(result.confidence, 50);
    }

    #[test]
    fn test_post_high_risk_upgrade() {
        let m = metrics();
        let threat = context(vec![ioc("203.0.113.9", true, &["botnet"], &["feed"])]);
        let result = apply_post_guardrails(
            verdict("info", 5, false, 60),
            &threat,
            &GuardrailConfig::default(),
            &m,
        );

        assert_eq!(result.severity, "high");
        assert_eq!(result.priority, 2);
        assert_eq!(result.confidence, 70);
    }

    #[test]
    fn test_post_critical_requires_intel() {
        let m = metrics();
        let threat = context(vec![ioc("203.0.113.9", false, &[], &[])]);
        let result = apply_post_guardrails(
            verdict("critical", 1, false, 95),
            &threat,
            &GuardrailConfig::default(),
            &m,
        );

        assert_eq!(result.severity, "high");
        assert_eq!(result.priority, 2);
        assert_eq!(result.confidence, 75);
    }

    #[test]
    fn test_post_high_low_confidence_downgrade() {
        let m = metrics();
        let threat = context(vec![ioc("203.0.113.9", false, &[], &[])]);
        let result = apply_post_guardrails(
            verdict("high", 2, false, 65),
            &threat,
            &GuardrailConfig::default(),
            &m,
        );

        assert_eq!(result.severity, "medium");
        assert_eq!(result.priority, 3);
        assert_eq!(result.confidence, 65);
    }

    #[test]
    fn test_post_multi_source_boost() {
        let m = metrics();
        let threat = context(vec![
            ioc("203.0.113.9", true, &[], &["feed-a", "feed-b"]),
            ioc("198.51.100.7", true, &[], &["feed-c"]),
        ]);
        let result = apply_post_guardrails(
            verdict("medium", 3, false, 60),
            &threat,
            &GuardrailConfig::default(),
            &m,
        );

        assert_eq!(result.confidence, 75);
    }

    #[test]
    fn test_post_fp_confidence_floor() {
        let m = metrics();
        let threat = context(vec![ioc("203.0.113.9", false, &[], &[])]);
        let result = apply_post_guardrails(
            verdict("info", 5, true, 60),
            &threat,
            &GuardrailConfig::default(),
            &m,
        );

        assert!(!result.false_positive);
        assert_eq!(result.severity, "low");
        assert_eq!(result.priority, 4);
        assert!(result.analysis.contains("analyst review"));
    }

    #[test]
    fn test_post_priority_realignment() {
        let m = metrics();
        let threat = context(vec![ioc("203.0.113.9", true, &[], &["feed"])]);
        let result = apply_post_guardrails(
            verdict("critical", 5, false, 90),
            &threat,
            &GuardrailConfig::default(),
            &m,
        );

        assert_eq!(result.priority, 1);
    }

    #[test]
    fn test_post_default_recommendations() {
        let m = metrics();
        let threat = context(vec![ioc("203.0.113.9", true, &[], &["feed"])]);
        let mut input = verdict("high", 2, false, 85);
        input.recommended.clear();

        let result = apply_post_guardrails(input, &threat, &GuardrailConfig::default(), &m);
        assert_eq!(result.recommended.len(), 3);
    }

    #[test]
    fn test_post_normalizes_garbage_severity() {
        let m = metrics();
        let threat = context(vec![ioc("203.0.113.9", true, &[], &["feed"])]);
        let result = apply_post_guardrails(
            verdict("CATASTROPHIC", 9, false, 150),
            &threat,
            &GuardrailConfig::default(),
            &m,
        );

        assert_eq!(result.severity, "medium");
        assert!(result.priority >= 1 && result.priority <= 5);
        assert!(result.confidence <= 100);
    }

    #[test]
    fn test_severity_canonical_priorities() {
        assert_eq!(Severity::Critical.canonical_priority(), 1);
        assert_eq!(Severity::High.canonical_priority(), 2);
        assert_eq!(Severity::Medium.canonical_priority(), 3);
        assert_eq!(Severity::Low.canonical_priority(), 4);
        assert_eq!(Severity::Info.canonical_priority(), 5);
        assert_eq!(Severity::parse("bogus"), Severity::Medium);
    }
}
