use super::{
    CommandInjectionDetector, DataLeakageDetector, IpFilter, PathTraversalDetector, RuleEngine,
    SqlInjectionDetector, ThreatLevel, Transaction, TransactionFactory, WafTransaction,
    XssDetector,
};
use crate::config::{ConfigError, DirectiveConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const RULESET_VERSION: &str = concat!("pingora-waf-filter/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RuleEngineMode {
    #[default]
    #[serde(alias = "on")]
    On,
    #[serde(alias = "off")]
    Off,
    #[serde(alias = "detection_only")]
    DetectionOnly,
}

/// What to do with a body that grows past its configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyLimitAction {
    /// Interrupt with 413.
    #[default]
    Reject,
    /// Keep the first `limit` bytes and evaluate them.
    ProcessPartial,
}

/// Details of one rule match, handed to the WAF's match callback.
#[derive(Debug, Clone)]
pub struct MatchedRule {
    pub transaction_id: String,
    /// The caller-supplied request ID, absent when the engine generated the
    /// transaction ID itself.
    pub request_id: Option<String>,
    pub client_ip: String,
    pub uri: String,
    pub rule_id: u32,
    pub category: String,
    pub severity: ThreatLevel,
    pub message: String,
    /// The value that triggered the rule.
    pub data: String,
    pub matched_data: String,
    pub matched_data_name: String,
    pub tags: Vec<String>,
    pub version: &'static str,
}

pub type MatchCallback = Arc<dyn Fn(&MatchedRule) + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct WafSettings {
    pub name: String,
    pub mode: RuleEngineMode,
    pub request_body_access: bool,
    pub request_body_limit: usize,
    pub request_body_limit_action: BodyLimitAction,
    pub response_body_access: bool,
    pub response_body_limit: usize,
    pub response_body_limit_action: BodyLimitAction,
    pub block_status: u16,
}

pub(crate) struct WafInner {
    pub settings: WafSettings,
    pub rules: RuleEngine,
    pub on_match: Option<MatchCallback>,
}

/// A compiled directive set. Cheap to clone; transactions share the rules.
#[derive(Clone)]
pub struct Waf {
    inner: Arc<WafInner>,
}

impl Waf {
    pub fn from_directives(
        name: &str,
        directives: &DirectiveConfig,
        on_match: Option<MatchCallback>,
    ) -> Result<Self, ConfigError> {
        let mut rules = RuleEngine::new();

        let mut ip_filter = IpFilter::new(directives.ip_filter.enabled, directives.ip_filter.block_mode);
        for entry in &directives.ip_filter.whitelist {
            ip_filter
                .add_to_whitelist(entry)
                .map_err(|reason| ConfigError::InvalidIpFilter {
                    directive: name.to_string(),
                    reason,
                })?;
        }
        for entry in &directives.ip_filter.blacklist {
            ip_filter
                .add_to_blacklist(entry)
                .map_err(|reason| ConfigError::InvalidIpFilter {
                    directive: name.to_string(),
                    reason,
                })?;
        }
        rules.add_rule(Arc::new(ip_filter));

        let sql = &directives.sql_injection;
        rules.add_rule(Arc::new(SqlInjectionDetector::new(sql.enabled, sql.block_mode)));
        let xss = &directives.xss;
        rules.add_rule(Arc::new(XssDetector::new(xss.enabled, xss.block_mode)));
        let traversal = &directives.path_traversal;
        rules.add_rule(Arc::new(PathTraversalDetector::new(
            traversal.enabled,
            traversal.block_mode,
        )));
        let command = &directives.command_injection;
        rules.add_rule(Arc::new(CommandInjectionDetector::new(
            command.enabled,
            command.block_mode,
        )));
        let leakage = &directives.data_leakage;
        rules.add_rule(Arc::new(DataLeakageDetector::new(
            leakage.enabled,
            leakage.block_mode,
        )));

        let settings = WafSettings {
            name: name.to_string(),
            mode: directives.rule_engine,
            request_body_access: directives.request_body_access,
            request_body_limit: directives.request_body_limit,
            request_body_limit_action: directives.request_body_limit_action,
            response_body_access: directives.response_body_access,
            response_body_limit: directives.response_body_limit,
            response_body_limit_action: directives.response_body_limit_action,
            block_status: directives.block_status,
        };

        Ok(Self {
            inner: Arc::new(WafInner {
                settings,
                rules,
                on_match,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.settings.name
    }

    pub fn mode(&self) -> RuleEngineMode {
        self.inner.settings.mode
    }
}

impl fmt::Debug for Waf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waf")
            .field("settings", &self.inner.settings)
            .field("rules", &self.inner.rules.len())
            .finish()
    }
}

impl TransactionFactory for Waf {
    fn new_transaction_with_id(&self, id: &str) -> Box<dyn Transaction> {
        Box::new(WafTransaction::new(Arc::clone(&self.inner), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiles_default_directives() {
        let waf = Waf::from_directives("default", &DirectiveConfig::default(), None).unwrap();
        assert_eq!(waf.name(), "default");
        assert_eq!(waf.mode(), RuleEngineMode::On);
        assert_eq!(waf.inner.rules.len(), 6);
    }

    #[test]
    fn test_invalid_ip_filter_entry() {
        let mut directives = DirectiveConfig::default();
        directives.ip_filter.blacklist.push("300.1.1.1".to_string());
        let err = Waf::from_directives("strict", &directives, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIpFilter { ref directive, .. } if directive == "strict"));
    }

    #[test]
    fn test_mode_deserialize() {
        let mode: RuleEngineMode = serde_yaml::from_str("DetectionOnly").unwrap();
        assert_eq!(mode, RuleEngineMode::DetectionOnly);
        let mode: RuleEngineMode = serde_yaml::from_str("off").unwrap();
        assert_eq!(mode, RuleEngineMode::Off);
        let action: BodyLimitAction = serde_yaml::from_str("process_partial").unwrap();
        assert_eq!(action, BodyLimitAction::ProcessPartial);
    }
}
