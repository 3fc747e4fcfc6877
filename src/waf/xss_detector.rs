use super::{excerpt, InspectionTarget, SecurityRule, SecurityViolation, ThreatLevel, Variable};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

pub const XSS_RULE_ID: u32 = 941100;

static XSS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Script tags
        Regex::new(r"(?i)<script[^>]*>").unwrap(),
        Regex::new(r"(?i)</script>").unwrap(),
        // Event handlers
        Regex::new(r"(?i)\bon\w+\s*=").unwrap(),
        // JavaScript protocol
        Regex::new(r"(?i)javascript:\s*\w").unwrap(),
        // Dangerous tags
        Regex::new(r"(?i)<iframe[^>]*>").unwrap(),
        Regex::new(r"(?i)<object[^>]*>").unwrap(),
        Regex::new(r"(?i)<embed[^>]*>").unwrap(),
        Regex::new(r"(?i)<img[^>]*\bon\w+").unwrap(),
        Regex::new(r"(?i)<body[^>]*\bon\w+").unwrap(),
        // JavaScript functions
        Regex::new(r"(?i)\beval\s*\(").unwrap(),
        Regex::new(r"(?i)\balert\s*\(").unwrap(),
        Regex::new(r"(?i)expression\s*\(").unwrap(),
        Regex::new(r"(?i)data:text/html").unwrap(),
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
        "referer",
        "origin",
        "host",
        "x-request-id",
    ]
    .into_iter()
    .collect()
});

pub struct XssDetector {
    pub enabled: bool,
    pub block_mode: bool,
}

impl XssDetector {
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
        XSS_PATTERNS.iter().any(|pattern| pattern.is_match(&decoded))
    }

    fn is_safe_header(&self, header_name: &str) -> bool {
        SAFE_HEADERS.contains(header_name.to_lowercase().as_str())
    }
}

impl SecurityRule for XssDetector {
    fn id(&self) -> u32 {
        XSS_RULE_ID
    }

    fn name(&self) -> &str {
        "xss"
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
                rule_id: XSS_RULE_ID,
                threat_type: "XSS".to_string(),
                threat_level: ThreatLevel::High,
                description: format!("XSS attack detected in {}", target.variable.name()),
                variable: target.variable,
                key: target.key.to_string(),
                data: excerpt(target.value),
                blocked: self.block_mode,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_tag_in_body() {
        let detector = XssDetector::new(true, true);
        let target = InspectionTarget::new(Variable::RequestBody, "<script>alert('XSS')</script>");
        let violation = detector.check(&target).unwrap_err();
        assert_eq!(violation.threat_type, "XSS");
        assert_eq!(violation.variable, Variable::RequestBody);
    }

    #[test]
    fn test_encoded_event_handler_in_uri() {
        let detector = XssDetector::new(true, true);
        let target = InspectionTarget::new(
            Variable::RequestUri,
            "/search?q=%3Cimg%20src%3Dx%20onerror%3Dalert(1)%3E",
        );
        assert!(detector.check(&target).is_err());
    }

    #[test]
    fn test_referer_is_safe() {
        let detector = XssDetector::new(true, true);
        let target = InspectionTarget::header(
            Variable::RequestHeaders,
            "referer",
            "https://example.com/?q=<script>",
        );
        assert!(detector.check(&target).is_ok());
    }

    #[test]
    fn test_plain_text_allowed() {
        let detector = XssDetector::new(true, true);
        let target = InspectionTarget::new(Variable::RequestBody, "hello world, how are you?");
        assert!(detector.check(&target).is_ok());
    }
}
