//! Outbound alert notifier
//!
//! Hands the finished enrichment record to an external webhook. Delivery is
//! best-effort: callers log failures and move on, the alert response never
//! depends on it.

use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::enrich::{EdrAlert, EnrichedIndicator};
use crate::llm::TriageResult;

/// Best-effort webhook notifier
pub struct Notifier {
    url: String,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("iocwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            url: url.into(),
            client,
        }
    }

    /// Post the structured alert record. The payload carries the raw alert,
    /// the per-indicator enrichment, and the triage verdict when one exists.
    pub async fn notify(
        &self,
        alert: &EdrAlert,
        enriched: &[EnrichedIndicator],
        triage: Option<&TriageResult>,
    ) -> Result<()> {
        let payload = serde_json::json!({
            "alert": alert,
            "enriched": enriched,
            "triage": triage,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!("notifier webhook returned {}", resp.status());
            anyhow::bail!("notifier webhook returned {}", resp.status());
        }

        Ok(())
    }
}
