//! LLM triage subsystem
//!
//! Everything between an enriched alert and a validated triage verdict:
//! the resilient outbound client (retry + circuit breaker), the
//! deterministic guardrails on both sides of the model call, and the
//! triager that ties them together.

pub mod circuit;
pub mod client;
pub mod guardrails;
pub mod triager;

pub use circuit::CircuitBreaker;
pub use client::{LlmError, ResilientClient, RetryConfig};
pub use guardrails::{GuardrailConfig, Severity};
pub use triager::{IocContext, ThreatContext, TriageResult, Triager};
