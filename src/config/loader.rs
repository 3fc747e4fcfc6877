use crate::logger::LogFormat;
use crate::waf::{BodyLimitAction, RuleEngineMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("directives is empty")]
    EmptyDirectives,
    #[error("the referenced default_directive '{0}' does not exist in directives")]
    UnknownDefaultDirective(String),
    #[error("the referenced directive '{directive}' for host {host} does not exist")]
    UnknownHostDirective { host: String, directive: String },
    #[error("invalid ip_filter entry in directive set '{directive}': {reason}")]
    InvalidIpFilter { directive: String, reason: String },
}

/// Top-level filter configuration file.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FilterConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    pub default_directive: String,
    #[serde(default)]
    pub host_directive_map: HashMap<String, String>,
    pub directives: HashMap<String, DirectiveConfig>,
}

/// One named directive set, compiled into its own WAF.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DirectiveConfig {
    #[serde(default)]
    pub rule_engine: RuleEngineMode,
    #[serde(default = "default_true")]
    pub request_body_access: bool,
    #[serde(default = "default_request_body_limit")]
    pub request_body_limit: usize,
    #[serde(default)]
    pub request_body_limit_action: BodyLimitAction,
    #[serde(default)]
    pub response_body_access: bool,
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit: usize,
    #[serde(default)]
    pub response_body_limit_action: BodyLimitAction,
    #[serde(default = "default_block_status")]
    pub block_status: u16,
    #[serde(default)]
    pub sql_injection: RuleConfig,
    #[serde(default)]
    pub xss: RuleConfig,
    #[serde(default)]
    pub path_traversal: RuleConfig,
    #[serde(default)]
    pub command_injection: RuleConfig,
    #[serde(default)]
    pub data_leakage: RuleConfig,
    #[serde(default)]
    pub ip_filter: IpFilterConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RuleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub block_mode: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IpFilterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub block_mode: bool,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_request_body_limit() -> usize {
    1048576 // 1MB
}

fn default_response_body_limit() -> usize {
    524288
}

fn default_block_status() -> u16 {
    403
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_mode: true,
        }
    }
}

impl Default for IpFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            block_mode: true,
            whitelist: vec![],
            blacklist: vec![],
        }
    }
}

impl Default for DirectiveConfig {
    fn default() -> Self {
        Self {
            rule_engine: RuleEngineMode::On,
            request_body_access: true,
            request_body_limit: default_request_body_limit(),
            request_body_limit_action: BodyLimitAction::Reject,
            response_body_access: false,
            response_body_limit: default_response_body_limit(),
            response_body_limit_action: BodyLimitAction::Reject,
            block_status: default_block_status(),
            sql_injection: RuleConfig::default(),
            xss: RuleConfig::default(),
            path_traversal: RuleConfig::default(),
            command_injection: RuleConfig::default(),
            data_leakage: RuleConfig::default(),
            ip_filter: IpFilterConfig::default(),
        }
    }
}

impl FilterConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FilterConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross references between the directive map, the default
    /// directive and the host map.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directives.is_empty() {
            return Err(ConfigError::EmptyDirectives);
        }
        if !self.directives.contains_key(&self.default_directive) {
            return Err(ConfigError::UnknownDefaultDirective(
                self.default_directive.clone(),
            ));
        }
        for (host, directive) in &self.host_directive_map {
            if !self.directives.contains_key(directive) {
                return Err(ConfigError::UnknownHostDirective {
                    host: host.clone(),
                    directive: directive.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        let mut directives = HashMap::new();
        directives.insert("default".to_string(), DirectiveConfig::default());
        Self {
            log_format: LogFormat::Plain,
            default_directive: "default".to_string(),
            host_directive_map: HashMap::new(),
            directives,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
log_format: JSON
default_directive: default
host_directive_map:
  api.example.com: strict
directives:
  default:
    rule_engine: DetectionOnly
  strict:
    request_body_limit: 4096
    request_body_limit_action: process_partial
    response_body_access: true
    block_status: 406
    xss:
      enabled: false
    ip_filter:
      enabled: true
      blacklist: ["192.0.2.0/24"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = FilterConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.host_directive_map["api.example.com"], "strict");

        let default = &config.directives["default"];
        assert_eq!(default.rule_engine, RuleEngineMode::DetectionOnly);
        assert!(default.request_body_access);
        assert!(!default.response_body_access);
        assert_eq!(default.request_body_limit, 1048576);

        let strict = &config.directives["strict"];
        assert_eq!(strict.request_body_limit, 4096);
        assert_eq!(strict.request_body_limit_action, BodyLimitAction::ProcessPartial);
        assert_eq!(strict.block_status, 406);
        assert!(!strict.xss.enabled);
        assert!(strict.xss.block_mode);
        assert!(strict.sql_injection.enabled);
        assert_eq!(strict.ip_filter.blacklist, vec!["192.0.2.0/24".to_string()]);
    }

    #[test]
    fn test_log_format_defaults_to_plain() {
        let config = FilterConfig::from_yaml_str(
            "default_directive: d\ndirectives:\n  d: {}\n",
        )
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Plain);
        assert!(config.host_directive_map.is_empty());
    }

    #[test]
    fn test_empty_directives() {
        let err = FilterConfig::from_yaml_str("default_directive: d\ndirectives: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyDirectives));
    }

    #[test]
    fn test_unknown_default_directive() {
        let err = FilterConfig::from_yaml_str("default_directive: x\ndirectives:\n  d: {}\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDefaultDirective(ref name) if name == "x"));
    }

    #[test]
    fn test_unknown_host_directive() {
        let yaml = "default_directive: d\nhost_directive_map:\n  a.com: nope\ndirectives:\n  d: {}\n";
        let err = FilterConfig::from_yaml_str(yaml).unwrap_err();
        assert_eq!(
            err.to_string(),
            "the referenced directive 'nope' for host a.com does not exist"
        );
    }

    #[test]
    fn test_invalid_log_format() {
        let yaml = "log_format: xml\ndefault_directive: d\ndirectives:\n  d: {}\n";
        assert!(matches!(
            FilterConfig::from_yaml_str(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = FilterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.directives.len(), 2);

        assert!(matches!(
            FilterConfig::from_file("nonexistent.yaml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = FilterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_directive, "default");
    }
}
