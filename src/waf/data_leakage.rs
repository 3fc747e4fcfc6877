use super::{excerpt, InspectionTarget, SecurityRule, SecurityViolation, ThreatLevel, Variable};
use once_cell::sync::Lazy;
use regex::Regex;

pub const DATA_LEAKAGE_RULE_ID: u32 = 951100;

/// Backend error output that should never reach a client
static LEAKAGE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "SQL error message",
            Regex::new(r"(?i)(you have an error in your sql syntax|ORA-\d{5}|pg_query\(\)|SQLSTATE\[|unclosed quotation mark after the character string)").unwrap(),
        ),
        (
            "PHP error message",
            Regex::new(r"(?i)<b>(fatal error|warning|parse error)</b>:.+ on line <b>\d+</b>").unwrap(),
        ),
        (
            "Java stack trace",
            Regex::new(r"(?m)^\s*at [\w$.]+\([\w]+\.java:\d+\)").unwrap(),
        ),
        (
            "Python traceback",
            Regex::new(r"Traceback \(most recent call last\):").unwrap(),
        ),
        (
            "Directory listing",
            Regex::new(r"(?i)<title>Index of /").unwrap(),
        ),
    ]
});

pub struct DataLeakageDetector {
    pub enabled: bool,
    pub block_mode: bool,
}

impl DataLeakageDetector {
    pub fn new(enabled: bool, block_mode: bool) -> Self {
        Self {
            enabled,
            block_mode,
        }
    }

    fn check_string(&self, input: &str) -> Option<&'static str> {
        LEAKAGE_PATTERNS
            .iter()
            .find(|(_, pattern)| pattern.is_match(input))
            .map(|(label, _)| *label)
    }
}

impl SecurityRule for DataLeakageDetector {
    fn id(&self) -> u32 {
        DATA_LEAKAGE_RULE_ID
    }

    fn name(&self) -> &str {
        "data_leakage"
    }

    fn inspects(&self, variable: Variable) -> bool {
        self.enabled && variable == Variable::ResponseBody
    }

    fn check(&self, target: &InspectionTarget<'_>) -> Result<(), SecurityViolation> {
        if !self.enabled {
            return Ok(());
        }

        if let Some(label) = self.check_string(target.value) {
            return Err(SecurityViolation {
                rule_id: DATA_LEAKAGE_RULE_ID,
                threat_type: "DATA_LEAKAGE".to_string(),
                threat_level: ThreatLevel::Medium,
                description: format!("{} in {}", label, target.variable.name()),
                variable: target.variable,
                key: target.key.to_string(),
                data: excerpt(target.value),
                blocked: self.block_mode,
            });
        }

        Ok(())
    }
}
