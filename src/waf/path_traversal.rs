use super::{excerpt, InspectionTarget, SecurityRule, SecurityViolation, ThreatLevel, Variable};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

pub const PATH_TRAVERSAL_RULE_ID: u32 = 930100;

/// Attempts to walk out of the served directory
static PATH_TRAVERSAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\.\./").unwrap(),
        Regex::new(r"\.\.\\").unwrap(),
        Regex::new(r"(?i)\.\.%2f").unwrap(),
        Regex::new(r"(?i)\.\.%5c").unwrap(),
        Regex::new(r"(?i)%2e%2e(%2f|/|%5c|\\)").unwrap(),
        // Double encoding
        Regex::new(r"(?i)%252e%252e(%252f|/)").unwrap(),
        // Overlong UTF-8
        Regex::new(r"(?i)%c0%ae%c0%ae(/|%c0%af)").unwrap(),
        // Null byte injection
        Regex::new(r"%00").unwrap(),
        Regex::new(r"\\x00").unwrap(),
    ]
});

static SENSITIVE_PATHS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)/etc/(passwd|shadow|hosts|group)").unwrap(),
        Regex::new(r"(?i)/proc/self/").unwrap(),
        Regex::new(r"(?i)\.ssh/").unwrap(),
        Regex::new(r"(?i)\.bash_history").unwrap(),
        Regex::new(r"(?i)/\.env\b").unwrap(),
        Regex::new(r"(?i)\bid_(rsa|dsa|ed25519)\b").unwrap(),
        Regex::new(r"(?i)c:\\windows").unwrap(),
        Regex::new(r"(?i)\\windows\\system32").unwrap(),
        Regex::new(r"(?i)\b(win|system|boot)\.ini\b").unwrap(),
        Regex::new(r"(?i)\.ht(access|passwd)").unwrap(),
        Regex::new(r"(?i)\bweb\.config\b").unwrap(),
        Regex::new(r"(?i)\bwp-config\.php\b").unwrap(),
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
        "host",
        "origin",
        "referer",
        "x-request-id",
    ]
    .into_iter()
    .collect()
});

pub struct PathTraversalDetector {
    pub enabled: bool,
    pub block_mode: bool,
}

impl PathTraversalDetector {
    pub fn new(enabled: bool, block_mode: bool) -> Self {
        Self {
            enabled,
            block_mode,
        }
    }

    fn check_string(&self, input: &str) -> Option<String> {
        if input.len() < 2 {
            return None;
        }

        let decoded = urlencoding::decode(input).unwrap_or(std::borrow::Cow::Borrowed(input));

        for pattern in PATH_TRAVERSAL_PATTERNS.iter() {
            if pattern.is_match(&decoded) || pattern.is_match(input) {
                return Some(format!("Path traversal pattern: {}", pattern.as_str()));
            }
        }

        for pattern in SENSITIVE_PATHS.iter() {
            if pattern.is_match(&decoded) || pattern.is_match(input) {
                return Some(format!("Sensitive path access: {}", pattern.as_str()));
            }
        }

        None
    }

    fn is_safe_header(&self, header_name: &str) -> bool {
        SAFE_HEADERS.contains(header_name.to_lowercase().as_str())
    }
}

impl SecurityRule for PathTraversalDetector {
    fn id(&self) -> u32 {
        PATH_TRAVERSAL_RULE_ID
    }

    fn name(&self) -> &str {
        "path_traversal"
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

        if let Some(reason) = self.check_string(target.value) {
            return Err(SecurityViolation {
                rule_id: PATH_TRAVERSAL_RULE_ID,
                threat_type: "PATH_TRAVERSAL".to_string(),
                threat_level: ThreatLevel::High,
                description: format!(
                    "Path traversal detected in {} - {}",
                    target.variable.name(),
                    reason
                ),
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

    fn uri(value: &str) -> InspectionTarget<'_> {
        InspectionTarget::new(Variable::RequestUri, value)
    }

    #[test]
    fn test_basic_path_traversal() {
        let detector = PathTraversalDetector::new(true, true);
        let violation = detector.check(&uri("/api/../../../etc/passwd")).unwrap_err();
        assert_eq!(violation.threat_type, "PATH_TRAVERSAL");
    }

    #[test]
    fn test_url_encoded_traversal() {
        let detector = PathTraversalDetector::new(true, true);
        assert!(detector.check(&uri("/api/%2e%2e%2f%2e%2e%2fetc/passwd")).is_err());
    }

    #[test]
    fn test_double_encoded_traversal() {
        let detector = PathTraversalDetector::new(true, true);
        assert!(detector.check(&uri("/api/%252e%252e%252f")).is_err());
    }

    #[test]
    fn test_null_byte_injection() {
        let detector = PathTraversalDetector::new(true, true);
        assert!(detector.check(&uri("/api/file.txt%00.jpg")).is_err());
    }

    #[test]
    fn test_sensitive_file_in_body() {
        let detector = PathTraversalDetector::new(true, true);
        let target = InspectionTarget::new(Variable::RequestBody, "filename=../../../etc/passwd");
        assert!(detector.check(&target).is_err());
    }

    #[test]
    fn test_normal_request_allowed() {
        let detector = PathTraversalDetector::new(true, true);
        assert!(detector.check(&uri("/api/users/123/profile")).is_ok());
    }

    #[test]
    fn test_log_only_mode() {
        let detector = PathTraversalDetector::new(true, false);
        let violation = detector.check(&uri("/api/../../../etc/passwd")).unwrap_err();
        assert!(!violation.blocked);
    }
}
