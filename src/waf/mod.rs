pub mod body_inspector;
pub mod command_injection;
pub mod data_leakage;
pub mod engine;
pub mod ip_filter;
pub mod path_traversal;
pub mod rules;
pub mod sql_injection;
pub mod transaction;
pub mod xss_detector;

pub use body_inspector::*;
pub use command_injection::*;
pub use data_leakage::*;
pub use engine::*;
pub use ip_filter::*;
pub use path_traversal::*;
pub use rules::*;
pub use sql_injection::*;
pub use transaction::*;
pub use xss_detector::*;

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Transaction data a rule can be evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    RemoteAddr,
    RequestUri,
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
}

impl Variable {
    pub fn name(&self) -> &'static str {
        match self {
            Variable::RemoteAddr => "REMOTE_ADDR",
            Variable::RequestUri => "REQUEST_URI",
            Variable::RequestHeaders => "REQUEST_HEADERS",
            Variable::RequestBody => "REQUEST_BODY",
            Variable::ResponseHeaders => "RESPONSE_HEADERS",
            Variable::ResponseBody => "RESPONSE_BODY",
        }
    }
}

/// One value handed to a rule. `key` is the header name for header
/// variables and empty otherwise.
#[derive(Debug, Clone, Copy)]
pub struct InspectionTarget<'a> {
    pub variable: Variable,
    pub key: &'a str,
    pub value: &'a str,
}

impl<'a> InspectionTarget<'a> {
    pub fn new(variable: Variable, value: &'a str) -> Self {
        Self {
            variable,
            key: "",
            value,
        }
    }

    pub fn header(variable: Variable, key: &'a str, value: &'a str) -> Self {
        Self {
            variable,
            key,
            value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityViolation {
    pub rule_id: u32,
    pub threat_type: String,
    pub threat_level: ThreatLevel,
    pub description: String,
    pub variable: Variable,
    pub key: String,
    /// The offending value, cut to [`MAX_DATA_LEN`] bytes.
    pub data: String,
    pub blocked: bool,
}

pub const MAX_DATA_LEN: usize = 256;

/// Leading part of `value` that fits in [`MAX_DATA_LEN`] bytes.
pub fn excerpt(value: &str) -> String {
    if value.len() <= MAX_DATA_LEN {
        return value.to_string();
    }
    let mut end = MAX_DATA_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

pub trait SecurityRule: Send + Sync {
    fn id(&self) -> u32;
    fn name(&self) -> &str;
    /// Whether this rule wants to see values of `variable`.
    fn inspects(&self, variable: Variable) -> bool;
    fn check(&self, target: &InspectionTarget<'_>) -> Result<(), SecurityViolation>;
}

/// Engine verdict asking for the exchange to be terminated.
///
/// `status` is the HTTP status to send to the client; `rule_id` and
/// `action` are diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    pub rule_id: u32,
    pub action: String,
    pub status: u16,
}

impl Interruption {
    pub fn deny(rule_id: u32, status: u16) -> Self {
        Self {
            rule_id,
            action: "deny".to_string(),
            status,
        }
    }
}

/// Outcome of feeding one body chunk into a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyWrite {
    /// Set when the write reached the body limit and the body phase ran
    /// (or the limit itself rejected the body).
    pub interruption: Option<Interruption>,
    /// Bytes of the chunk the engine kept.
    pub buffered: usize,
}

/// Non-verdict failures surfaced by a transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0} phase was already processed")]
    PhaseAlreadyProcessed(&'static str),
    #[error("transaction {0} is closed")]
    Closed(String),
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Per-exchange handle into the rule engine.
///
/// Calls must follow the engine's phase order: connection, URI and request
/// headers, request body, response headers, response body, logging, close.
pub trait Transaction: Send + Sync {
    fn id(&self) -> &str;

    fn add_request_header(&mut self, key: &str, value: &str);
    fn add_response_header(&mut self, key: &str, value: &str);
    fn set_server_name(&mut self, name: &str);

    fn is_rule_engine_off(&self) -> bool;
    fn is_request_body_accessible(&self) -> bool;
    fn is_response_body_accessible(&self) -> bool;

    fn process_connection(&mut self, client_ip: &str, client_port: u16, server_ip: &str, server_port: u16);
    fn process_uri(&mut self, uri: &str, method: &str, protocol: &str);
    fn process_request_headers(&mut self) -> Option<Interruption>;

    fn write_request_body(&mut self, data: &[u8]) -> Result<BodyWrite, EngineError>;
    fn process_request_body(&mut self) -> Result<Option<Interruption>, EngineError>;

    fn process_response_headers(&mut self, status: u16, protocol: &str) -> Option<Interruption>;
    fn write_response_body(&mut self, data: &[u8]) -> Result<BodyWrite, EngineError>;
    fn process_response_body(&mut self) -> Result<Option<Interruption>, EngineError>;

    fn process_logging(&mut self);
    fn close(&mut self) -> Result<(), EngineError>;
}

/// A compiled directive set able to open transactions.
pub trait TransactionFactory: Send + Sync {
    /// Opens a transaction. An empty `id` lets the engine pick one.
    fn new_transaction_with_id(&self, id: &str) -> Box<dyn Transaction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_cuts_long_values_on_char_boundary() {
        assert_eq!(excerpt("1 OR 1=1"), "1 OR 1=1");

        let long = "é".repeat(MAX_DATA_LEN);
        let cut = excerpt(&long);
        assert!(cut.len() <= MAX_DATA_LEN);
        assert!(long.starts_with(&cut));
        assert_eq!(cut.chars().count(), MAX_DATA_LEN / 2);
    }
}
