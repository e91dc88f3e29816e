//! Common Event Format feed
//!
//! One line per indicator:
//! `CEF:0|vendor|product|version|signature|name|severity|extensions`.
//! Inside any field the characters `\`, `|`, `=` and line breaks are
//! backslash-escaped, and the escape round-trips.

use crate::ioc::{feed_confidence, Ioc};

const VENDOR: &str = "iocwatch";
const PRODUCT: &str = "ThreatIntel";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Render the whole feed, one CEF line per record.
pub fn render_feed(iocs: &[Ioc]) -> String {
    let mut out = String::new();
    for ioc in iocs {
        out.push_str(&format_line(ioc));
        out.push('\n');
    }
    out
}

fn format_line(ioc: &Ioc) -> String {
    let confidence = feed_confidence(ioc);
    let signature_id = ioc.ioc_type.as_str();
    let name = format!("{} IOC Detected", ioc.ioc_type.as_str().to_uppercase());

    let extensions = [
        format!("src={}", escape(&ioc.value)),
        "cn1Label=ConfidenceScore".to_string(),
        format!("cn1={}", confidence),
        "cs1Label=ThreatType".to_string(),
        format!("cs1={}", escape(&ioc.threat_type)),
        "cs2Label=Sources".to_string(),
        format!("cs2={}", escape(&ioc.source)),
        "cs3Label=Tags".to_string(),
        format!("cs3={}", escape(&ioc.tags.join(","))),
        format!("rt={}", ioc.first_seen.timestamp_millis()),
    ]
    .join(" ");

    format!(
        "CEF:0|{}|{}|{}|{}|{}|{}|{}",
        VENDOR,
        PRODUCT,
        VERSION,
        signature_id,
        name,
        severity_for(confidence),
        extensions
    )
}

/// Map a confidence score (0-100) to CEF severity (0-10).
fn severity_for(confidence: i64) -> u8 {
    if confidence >= 90 {
        10
    } else if confidence >= 80 {
        8
    } else if confidence >= 70 {
        6
    } else if confidence >= 60 {
        4
    } else {
        2
    }
}

/// Escape CEF-special characters in a field value.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '=' => out.push_str("\\="),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Invert `escape`.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('|') => out.push('|'),
            Some('=') => out.push('='),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
