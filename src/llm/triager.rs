//! LLM-assisted alert triage
//!
//! Builds a deterministic prompt from the enriched alert, calls the
//! chat-completions endpoint through the resilient client, parses the
//! (possibly fenced) JSON verdict, and runs it through the post guardrails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::circuit::CircuitBreaker;
use super::client::{LlmError, ResilientClient, RetryConfig};
use super::guardrails::{apply_post_guardrails, apply_pre_guardrails, GuardrailConfig};
use crate::config::LlmConfig;
use crate::metrics::Metrics;

/// The enriched alert as the triager sees it
#[derive(Debug, Clone)]
pub struct ThreatContext {
    pub alert_id: String,
    pub threat_name: String,
    pub classification: String,
    pub endpoint: String,
    pub os_type: String,
    pub iocs: Vec<IocContext>,
}

/// One enriched indicator inside a threat context
#[derive(Debug, Clone)]
pub struct IocContext {
    pub type_tag: String,
    pub value: String,
    pub in_database: bool,
    pub sources: Vec<String>,
    pub tags: Vec<String>,
    pub threat_types: Vec<String>,
    pub first_seen: Option<DateTime<Utc>>,
}

/// The triage verdict consumed by the notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub recommended: Vec<String>,
    #[serde(default)]
    pub false_positive: bool,
    #[serde(default)]
    pub confidence: i64,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

const SYSTEM_PROMPT: &str = "You are an expert cybersecurity analyst. Analyze threats and \
                             provide structured assessments in JSON format.";

/// Alert triager backed by an LLM with guardrails on both sides
pub struct Triager {
    api_url: String,
    api_key: String,
    model: String,
    enabled: bool,
    client: ResilientClient,
    guardrails: GuardrailConfig,
    metrics: Arc<Metrics>,
}

impl Triager {
    pub fn from_config(config: &LlmConfig, metrics: Arc<Metrics>) -> Self {
        let breaker = if config.circuit_breaker_enabled {
            Some(CircuitBreaker::new(
                config.circuit_max_failures,
                Duration::from_secs(config.circuit_timeout_secs),
                metrics.clone(),
            ))
        } else {
            None
        };

        let retry = RetryConfig {
            max_retries: config.retry_max_attempts,
            initial_interval: Duration::from_millis(config.retry_initial_interval_ms),
            max_interval: Duration::from_millis(config.retry_max_interval_ms),
        };

        let client = ResilientClient::new(
            Duration::from_secs(30),
            retry,
            breaker,
            metrics.clone(),
        );

        Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            enabled: config.enabled && !config.api_key.is_empty(),
            client,
            guardrails: config.guardrails.clone(),
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Triage an enriched alert. Pre-filters may answer without any network
    /// call; otherwise the LLM verdict is validated by the post-filters.
    pub async fn triage(&self, threat: &ThreatContext) -> Result<TriageResult, LlmError> {
        let start = Instant::now();
        let result = self.triage_inner(threat).await;
        self.metrics.observe_triage_duration(start.elapsed());
        result
    }

    async fn triage_inner(&self, threat: &ThreatContext) -> Result<TriageResult, LlmError> {
        if !self.enabled {
            return Err(LlmError::Disabled);
        }

        if let Some(result) = apply_pre_guardrails(threat, &self.guardrails, &self.metrics) {
            self.metrics.record_triage_request("skipped", "pre_filter");
            self.record_result(&result);
            return Ok(result);
        }

        let prompt = build_prompt(threat);
        let content = match self.call_llm(&prompt).await {
            Ok(content) => content,
            Err(e) => {
                self.metrics.record_triage_request("error", "llm");
                return Err(e);
            }
        };

        let result = match parse_response(&content) {
            Ok(result) => result,
            Err(e) => {
                self.metrics.record_triage_request("error", "parse");
                self.metrics.record_error("parse");
                return Err(e);
            }
        };

        let result = apply_post_guardrails(result, threat, &self.guardrails, &self.metrics);

        info!(
            "triage complete for {}: severity={}, priority={}, confidence={}",
            threat.alert_id, result.severity, result.priority, result.confidence
        );
        self.metrics.record_triage_request("success", "llm");
        self.record_result(&result);

        Ok(result)
    }

    async fn call_llm(&self, prompt: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            // Low temperature for consistent analysis
            temperature: 0.3,
            max_tokens: 1000,
        };

        debug!("sending triage request: model={}", self.model);

        let request = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        let response = self.client.execute(request).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Parse("no choices in LLM response".to_string()))
    }

    fn record_result(&self, result: &TriageResult) {
        self.metrics.record_severity(&result.severity);
        self.metrics.observe_confidence(result.confidence);
        if result.false_positive {
            self.metrics.record_false_positive();
        }
    }
}

/// Build the analyst prompt. Deterministic over the threat context: the same
/// alert always yields the same prompt.
fn build_prompt(threat: &ThreatContext) -> String {
    let mut p = String::new();

    p.push_str(
        "You are a cybersecurity analyst reviewing a security alert. Analyze the \
         following threat and provide a structured assessment.\n\n",
    );

    p.push_str(&format!("**Alert ID:** {}\n", threat.alert_id));
    p.push_str(&format!("**Threat Name:** {}\n", threat.threat_name));
    p.push_str(&format!("**Classification:** {}\n", threat.classification));
    p.push_str(&format!("**Endpoint:** {} ({})\n\n", threat.endpoint, threat.os_type));

    p.push_str("**Indicators of Compromise (IOCs):**\n");
    for (i, ioc) in threat.iocs.iter().enumerate() {
        p.push_str(&format!(
            "{}. Type: {}, Value: {}\n",
            i + 1,
            ioc.type_tag,
            ioc.value
        ));

        if ioc.in_database {
            p.push_str("   - Found in threat intelligence database\n");
            if !ioc.sources.is_empty() {
                p.push_str(&format!("   - Sources: {}\n", ioc.sources.join(", ")));
            }
            if !ioc.threat_types.is_empty() {
                p.push_str(&format!("   - Threat Types: {}\n", ioc.threat_types.join(", ")));
            }
            if !ioc.tags.is_empty() {
                let shown = &ioc.tags[..ioc.tags.len().min(5)];
                p.push_str(&format!("   - Tags: {}\n", shown.join(", ")));
            }
            if let Some(first_seen) = ioc.first_seen {
                p.push_str(&format!("   - First Seen: {}\n", first_seen.format("%Y-%m-%d")));
            }
        } else {
            p.push_str("   - Not found in threat intelligence database\n");
        }
        p.push('\n');
    }

    p.push_str("\n**Task:**\n");
    p.push_str("Analyze this threat and provide your assessment in the following JSON format:\n");
    p.push_str("```json\n");
    p.push_str("{\n");
    p.push_str("  \"severity\": \"critical|high|medium|low|info\",\n");
    p.push_str("  \"priority\": 1-5,\n");
    p.push_str("  \"summary\": \"Brief one-sentence summary\",\n");
    p.push_str("  \"analysis\": \"Detailed analysis of the threat\",\n");
    p.push_str("  \"recommended\": [\"action1\", \"action2\"],\n");
    p.push_str("  \"false_positive\": true/false,\n");
    p.push_str("  \"confidence\": 0-100\n");
    p.push_str("}\n");
    p.push_str("```\n\n");

    p.push_str("**Important Guidelines:**\n");
    p.push_str("1. IOCs found in threat intelligence databases are STRONG evidence of malicious activity\n");
    p.push_str("2. Multiple threat intel sources confirming the same IOC = HIGH confidence\n");
    p.push_str("3. Known threat types (c2_server, botnet, ransomware, malware_download) = Real threat\n");
    p.push_str("4. Be conservative with false_positive=true - only use when VERY confident\n");
    p.push_str("5. IOCs NOT in database but suspicious behavior = medium severity, lower confidence\n\n");

    p.push_str("**Example 1 - Real Threat:**\n");
    p.push_str("IOC: 192.0.2.1 found in database, Sources: alienvault-otx, urlhaus, Threat Types: c2_server, botnet\n");
    p.push_str("-> severity: \"high\", false_positive: false, confidence: 95\n\n");

    p.push_str("**Example 2 - Likely False Positive:**\n");
    p.push_str("IOC: update.microsoft.com, NOT in database, Threat: \"Suspicious DNS\"\n");
    p.push_str("-> severity: \"info\", false_positive: true, confidence: 90\n\n");

    p.push_str("**Example 3 - Uncertain:**\n");
    p.push_str("IOC: unknown-domain.com, NOT in database, Threat: \"Suspicious Connection\"\n");
    p.push_str("-> severity: \"medium\", false_positive: false, confidence: 60\n\n");

    p.push_str("Now analyze the alert above and provide your assessment.\n");

    p
}

/// Parse the LLM reply. Accepts a bare JSON object or one wrapped in a
/// fenced code block, labeled ```json or unlabeled.
fn parse_response(response: &str) -> Result<TriageResult, LlmError> {
    let json_str = if let Some(idx) = response.find("```json") {
        let rest = &response[idx + 7..];
        match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else if let Some(idx) = response.find("```") {
        let rest = &response[idx + 3..];
        match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else {
        response
    };

    serde_json::from_str(json_str.trim())
        .map_err(|e| LlmError::Parse(format!("{} (response: {})", e, json_str.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    fn threat_with(iocs: Vec<IocContext>) -> ThreatContext {
        ThreatContext {
            alert_id: "alert-7".to_string(),
            threat_name: "Suspicious Connection".to_string(),
            classification: "Malware".to_string(),
            endpoint: "WKS-042".to_string(),
            os_type: "windows".to_string(),
            iocs,
        }
    }

    fn enriched_ioc(value: &str, in_db: bool, threat_types: &[&str]) -> IocContext {
        IocContext {
            type_tag: "IPV4".to_string(),
            value: value.to_string(),
            in_database: in_db,
            sources: vec!["abusech-feodo".to_string()],
            tags: vec!["blocklist".to_string()],
            threat_types: threat_types.iter().map(|s| s.to_string()).collect(),
            first_seen: Some(Utc::now()),
        }
    }

    fn triager(enabled: bool) -> Triager {
        let config = LlmConfig {
            enabled,
            api_key: "test-key".to_string(),
            // RFC 5737 address: never contacted in these tests
            api_url: "http://192.0.2.1:9/v1/chat/completions".to_string(),
            ..Default::default()
        };
        Triager::from_config(&config, Arc::new(Metrics::new()))
    }

    #[test]
    fn test_parse_bare_json() {
        let result = parse_response(r#"{"severity":"high","priority":2,"confidence":90}"#).unwrap();
        assert_eq!(result.severity, "high");
        assert_eq!(result.priority, 2);
        assert_eq!(result.confidence, 90);
    }

    #[test]
    fn test_parse_labeled_fence() {
        let response = "Here is my assessment:\n```json\n{\"severity\": \"low\", \"priority\": 4, \"confidence\": 70}\n```\nLet me know.";
        let result = parse_response(response).unwrap();
        assert_eq!(result.severity, "low");
    }

    #[test]
    fn test_parse_unlabeled_fence() {
        let response = "```\n{\"severity\": \"medium\", \"priority\": 3, \"confidence\": 60}\n```";
        let result = parse_response(response).unwrap();
        assert_eq!(result.severity, "medium");
    }

    #[test]
    fn test_parse_failure() {
        assert!(matches!(
            parse_response("the threat looks bad"),
            Err(LlmError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_missing_fields_default() {
        let result = parse_response(r#"{"severity":"high"}"#).unwrap();
        assert_eq!(result.priority, 0);
        assert!(!result.false_positive);
        assert!(result.recommended.is_empty());
    }

    #[test]
    fn test_build_prompt_contains_facts_and_examples() {
        let prompt = build_prompt(&threat_with(vec![enriched_ioc(
            "192.0.2.5",
            true,
            &["c2_server"],
        )]));

        assert!(prompt.contains("alert-7"));
        assert!(prompt.contains("192.0.2.5"));
        assert!(prompt.contains("Found in threat intelligence database"));
        assert!(prompt.contains("Example 1"));
        assert!(prompt.contains("Example 2"));
        assert!(prompt.contains("Example 3"));
        assert!(prompt.contains("false_positive"));
    }

    #[test]
    fn test_build_prompt_not_in_db() {
        let prompt = build_prompt(&threat_with(vec![enriched_ioc("203.0.113.9", false, &[])]));
        assert!(prompt.contains("Not found in threat intelligence database"));
    }

    #[tokio::test]
    async fn test_disabled_triager() {
        let t = triager(false);
        assert!(!t.is_enabled());
        let err = t.triage(&threat_with(vec![])).await.unwrap_err();
        assert!(matches!(err, LlmError::Disabled));
    }

    #[tokio::test]
    async fn test_pre_filter_short_circuits_without_network() {
        // The API URL is unroutable; a network attempt would error, so a
        // successful verdict proves the pre-filter answered.
        let t = triager(true);

        let benign = threat_with(vec![IocContext {
            type_tag: "DOMAIN".to_string(),
            value: "update.microsoft.com".to_string(),
            in_database: false,
            sources: vec![],
            tags: vec![],
            threat_types: vec![],
            first_seen: None,
        }]);
        let result = t.triage(&benign).await.unwrap();
        assert!(result.false_positive);
        assert_eq!(result.severity, "info");

        let known_bad = threat_with(vec![enriched_ioc("192.0.2.5", true, &["c2_server"])]);
        let result = t.triage(&known_bad).await.unwrap();
        assert_eq!(result.severity, "high");
        assert_eq!(result.confidence, 90);
        assert!(!result.false_positive);
    }
}
