use super::{excerpt, InspectionTarget, SecurityRule, SecurityViolation, ThreatLevel, Variable};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

pub const COMMAND_INJECTION_RULE_ID: u32 = 932100;

/// Shell metacharacters followed by a command, plus well-known binaries
static COMMAND_INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Command chaining
        Regex::new(r";\s*(ls|cat|id|whoami|uname|wget|curl|nc|bash|sh|rm)\b").unwrap(),
        Regex::new(r"\|\|?\s*(ls|cat|id|whoami|uname|wget|curl|nc|bash|sh|rm)\b").unwrap(),
        Regex::new(r"&&\s*(ls|cat|id|whoami|uname|wget|curl|nc|bash|sh|rm)\b").unwrap(),
        // Command substitution
        Regex::new(r"\$\(\s*\w").unwrap(),
        Regex::new(r"`[^`]+`").unwrap(),
        // Redirections into absolute paths
        Regex::new(r">>?\s*/(etc|tmp|var|dev)/").unwrap(),
        Regex::new(r"2>&1").unwrap(),
        // Interpreters invoked with flags
        Regex::new(r"(?i)\b(bash|sh|zsh|ksh)\s+-c\b").unwrap(),
        Regex::new(r"(?i)\b(python|perl|ruby|php)\s+-(c|e|r)\b").unwrap(),
        // Shell paths
        Regex::new(r"(?i)/bin/(sh|bash|zsh|ksh|csh|dash)\b").unwrap(),
        Regex::new(r"(?i)\bcmd\.exe\b").unwrap(),
        Regex::new(r"(?i)\bpowershell(\.exe)?\s+-").unwrap(),
        // Environment probing
        Regex::new(r"\$\{?(PATH|HOME|USER|SHELL|IFS)\}?\b").unwrap(),
        Regex::new(r"(?i)%(systemroot|comspec)%").unwrap(),
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
        "cookie",
        "x-request-id",
    ]
    .into_iter()
    .collect()
});

pub struct CommandInjectionDetector {
    pub enabled: bool,
    pub block_mode: bool,
}

impl CommandInjectionDetector {
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

        COMMAND_INJECTION_PATTERNS
            .iter()
            .find(|pattern| pattern.is_match(&decoded) || pattern.is_match(input))
            .map(|pattern| format!("Command injection pattern: {}", pattern.as_str()))
    }

    fn is_safe_header(&self, header_name: &str) -> bool {
        SAFE_HEADERS.contains(header_name.to_lowercase().as_str())
    }
}

impl SecurityRule for CommandInjectionDetector {
    fn id(&self) -> u32 {
        COMMAND_INJECTION_RULE_ID
    }

    fn name(&self) -> &str {
        "command_injection"
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
                rule_id: COMMAND_INJECTION_RULE_ID,
                threat_type: "COMMAND_INJECTION".to_string(),
                threat_level: ThreatLevel::Critical,
                description: format!(
                    "Command injection detected in {} - {}",
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
    fn test_semicolon_injection() {
        let detector = CommandInjectionDetector::new(true, true);
        let violation = detector.check(&uri("/api/exec?cmd=test;ls")).unwrap_err();
        assert_eq!(violation.threat_type, "COMMAND_INJECTION");
    }

    #[test]
    fn test_encoded_pipe_injection() {
        let detector = CommandInjectionDetector::new(true, true);
        assert!(detector.check(&uri("/api/exec?cmd=test%7ccat%20/etc/passwd")).is_err());
    }

    #[test]
    fn test_command_substitution_in_body() {
        let detector = CommandInjectionDetector::new(true, true);
        let target = InspectionTarget::new(Variable::RequestBody, "host=$(whoami).example.com");
        assert!(detector.check(&target).is_err());
    }

    #[test]
    fn test_cookie_header_skipped() {
        let detector = CommandInjectionDetector::new(true, true);
        let target = InspectionTarget::header(Variable::RequestHeaders, "cookie", "a=1;ls");
        assert!(detector.check(&target).is_ok());
    }

    #[test]
    fn test_query_string_allowed() {
        let detector = CommandInjectionDetector::new(true, true);
        assert!(detector.check(&uri("/api/search?q=rust&page=2")).is_ok());
    }
}
