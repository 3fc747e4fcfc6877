use super::{excerpt, InspectionTarget, SecurityRule, SecurityViolation, ThreatLevel, Variable};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

pub const SQL_INJECTION_RULE_ID: u32 = 942100;

static SQL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Union-based injection
        Regex::new(r"(?i)\bunion\b.*\bselect\b").unwrap(),
        Regex::new(r"(?i)\bselect\b.*\bfrom\b").unwrap(),
        // Boolean tautologies
        Regex::new(r"(?i)\b(or|and)\b\s+\d+\s*=\s*\d+").unwrap(),
        Regex::new(r#"(?i)'\s*(or|and)\s*'"#).unwrap(),
        Regex::new(r#"(?i)\bor\b\s+["']?\w+["']?\s*=\s*["']?\w+["']?"#).unwrap(),
        // Data manipulation
        Regex::new(r"(?i)\binsert\b.*\binto\b").unwrap(),
        Regex::new(r"(?i)\bdelete\b.*\bfrom\b").unwrap(),
        Regex::new(r"(?i)\bdrop\b.*\b(table|database)\b").unwrap(),
        // Stacked queries and comment termination
        Regex::new(r"(?i);\s*\b(drop|delete|update|insert)\b").unwrap(),
        Regex::new(r"'--").unwrap(),
        // Stored procedures
        Regex::new(r"(?i)\b(exec|execute)\s*\(").unwrap(),
        Regex::new(r"(?i)\b(xp_|sp_)\w+").unwrap(),
        // Time-based blind injection
        Regex::new(r"(?i)\b(benchmark|sleep|waitfor\s+delay)\s*\(").unwrap(),
    ]
});

static SAFE_HEADERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "accept",
        "accept-encoding",
        "accept-language",
        "content-type",
        "user-agent",
        "cache-control",
        "connection",
        "upgrade",
        "upgrade-insecure-requests",
        "sec-fetch-mode",
        "sec-fetch-site",
        "sec-fetch-dest",
        "sec-ch-ua",
        "sec-ch-ua-mobile",
        "sec-ch-ua-platform",
        "host",
        "x-request-id",
    ]
    .into_iter()
    .collect()
});

pub struct SqlInjectionDetector {
    pub enabled: bool,
    pub block_mode: bool,
}

impl SqlInjectionDetector {
    pub fn new(enabled: bool, block_mode: bool) -> Self {
        Self {
            enabled,
            block_mode,
        }
    }

    fn check_string(&self, input: &str) -> bool {
        if input.len() < 3 {
            return false;
        }

        let decoded = urlencoding::decode(input).unwrap_or(std::borrow::Cow::Borrowed(input));

        SQL_PATTERNS.iter().any(|pattern| pattern.is_match(&decoded))
    }

    fn is_safe_header(&self, header_name: &str) -> bool {
        SAFE_HEADERS.contains(header_name.to_lowercase().as_str())
    }
}

impl SecurityRule for SqlInjectionDetector {
    fn id(&self) -> u32 {
        SQL_INJECTION_RULE_ID
    }

    fn name(&self) -> &str {
        "sql_injection"
    }

    fn inspects(&self, variable: Variable) -> bool {
        self.enabled
            && matches!(
                variable,
                Variable::RequestUri | Variable::RequestHeaders | Variable::RequestBody
            )
    }

    fn check(&self, target: &InspectionTarget<'_>) -> Result<(), SecurityViolation> {
        if !self.enabled {
            return Ok(());
        }
        if target.variable == Variable::RequestHeaders && self.is_safe_header(target.key) {
            return Ok(());
        }

        if self.check_string(target.value) {
            return Err(SecurityViolation {
                rule_id: SQL_INJECTION_RULE_ID,
                threat_type: "SQL_INJECTION".to_string(),
                threat_level: ThreatLevel::Critical,
                description: format!("SQL injection detected in {}", target.variable.name()),
                variable: target.variable,
                key: target.key.to_string(),
                data: excerpt(target.value),
                blocked: self.block_mode,
            });
        }

        Ok(())
    }
}
