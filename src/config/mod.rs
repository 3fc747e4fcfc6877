pub mod loader;
pub mod watcher;
pub use loader::*;
pub use watcher::ConfigChangeCallback;
pub use watcher::ConfigWatcher;
pub use watcher::reload_config;

use crate::logger::{LogFormat, LogMessage};
use crate::waf::{MatchCallback, MatchedRule, ThreatLevel, TransactionFactory, Waf};
use log::{error, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Resolved, immutable filter configuration shared by every filter instance.
pub struct Configuration {
    default_directive: String,
    host_directive_map: HashMap<String, String>,
    waf_maps: HashMap<String, Arc<dyn TransactionFactory>>,
    log_format: LogFormat,
    default_waf: Arc<dyn TransactionFactory>,
}

impl Configuration {
    /// A configuration with a single WAF. Further WAFs and host mappings are
    /// added with [`with_waf`](Self::with_waf) and [`with_host`](Self::with_host).
    pub fn new(default_directive: &str, waf: Arc<dyn TransactionFactory>) -> Self {
        let mut waf_maps = HashMap::new();
        waf_maps.insert(default_directive.to_string(), Arc::clone(&waf));
        Self {
            default_directive: default_directive.to_string(),
            host_directive_map: HashMap::new(),
            waf_maps,
            log_format: LogFormat::Plain,
            default_waf: waf,
        }
    }

    pub fn with_waf(mut self, name: &str, waf: Arc<dyn TransactionFactory>) -> Self {
        if name == self.default_directive {
            self.default_waf = Arc::clone(&waf);
        }
        self.waf_maps.insert(name.to_string(), waf);
        self
    }

    /// Maps `host` to a directive set. Unknown directive names are ignored by
    /// [`waf_for_host`](Self::waf_for_host), which falls back to the default.
    pub fn with_host(mut self, host: &str, directive: &str) -> Self {
        self.host_directive_map
            .insert(host.to_string(), directive.to_string());
        self
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    /// Compiles every directive set of a validated file configuration.
    pub fn build(config: &FilterConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let on_match = match_logger(config.log_format);
        let mut waf_maps: HashMap<String, Arc<dyn TransactionFactory>> = HashMap::new();
        for (name, directives) in &config.directives {
            let waf = Waf::from_directives(name, directives, Some(Arc::clone(&on_match)))?;
            info!("Compiled directive set '{}' ({:?})", name, waf.mode());
            waf_maps.insert(name.clone(), Arc::new(waf));
        }

        let default_waf = waf_maps
            .get(&config.default_directive)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDefaultDirective(config.default_directive.clone()))?;

        Ok(Self {
            default_directive: config.default_directive.clone(),
            host_directive_map: config.host_directive_map.clone(),
            waf_maps,
            log_format: config.log_format,
            default_waf,
        })
    }

    /// WAF mapped to `host` (the Host header value as received), or the default.
    pub fn waf_for_host(&self, host: &str) -> &Arc<dyn TransactionFactory> {
        self.host_directive_map
            .get(host)
            .and_then(|directive| self.waf_maps.get(directive))
            .unwrap_or(&self.default_waf)
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    pub fn default_directive(&self) -> &str {
        &self.default_directive
    }

    pub fn directive_names(&self) -> impl Iterator<Item = &str> {
        self.waf_maps.keys().map(String::as_str)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("default_directive", &self.default_directive)
            .field("host_directive_map", &self.host_directive_map)
            .field("directives", &self.waf_maps.keys().collect::<Vec<_>>())
            .field("log_format", &self.log_format)
            .finish()
    }
}

/// Handle to the current configuration, swapped on hot reload.
#[derive(Clone)]
pub struct SharedConfiguration(Arc<RwLock<Arc<Configuration>>>);

impl SharedConfiguration {
    pub fn new(config: Configuration) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(config))))
    }

    pub fn current(&self) -> Arc<Configuration> {
        Arc::clone(&*self.0.read())
    }

    pub fn replace(&self, config: Arc<Configuration>) {
        *self.0.write() = config;
    }
}

#[derive(Serialize)]
struct ViolatedRuleEntry<'a> {
    id: u32,
    category: &'a str,
    severity: String,
    data: &'a str,
    message: &'a str,
    matched_data: &'a str,
    matched_data_name: &'a str,
    tags: &'a [String],
}

#[derive(Serialize)]
struct MatchLogLine<'a> {
    #[serde(rename = "request.path")]
    url: &'a str,
    #[serde(rename = "crs.violated_rule")]
    rule: ViolatedRuleEntry<'a>,
    #[serde(rename = "client.address")]
    client_ip: &'a str,
    #[serde(rename = "transaction.id")]
    transaction_id: &'a str,
    #[serde(rename = "crs.version")]
    ruleset_version: &'a str,
    #[serde(rename = "request.id")]
    request_id: &'a str,
}

pub(crate) fn render_match(rule: &MatchedRule, format: LogFormat) -> String {
    let request_id = rule.request_id.as_deref().unwrap_or("");
    match format {
        LogFormat::Json => {
            let line = MatchLogLine {
                url: &rule.uri,
                rule: ViolatedRuleEntry {
                    id: rule.rule_id,
                    category: &rule.category,
                    severity: rule.severity.to_string(),
                    data: &rule.data,
                    message: &rule.message,
                    matched_data: &rule.matched_data,
                    matched_data_name: &rule.matched_data_name,
                    tags: &rule.tags,
                },
                client_ip: &rule.client_ip,
                transaction_id: &rule.transaction_id,
                ruleset_version: rule.version,
                request_id,
            };
            serde_json::to_string(&line).unwrap_or_else(|_| "error marshaling to JSON".to_string())
        }
        LogFormat::Plain => LogMessage::new(LogFormat::Plain)
            .msg(rule.message.as_str())
            .field("id", rule.rule_id)
            .field("category", &rule.category)
            .field("severity", rule.severity)
            .field("client", &rule.client_ip)
            .field("uri", &rule.uri)
            .field("matched_data", format!("{}:{}", rule.matched_data, rule.matched_data_name))
            .field("data", &rule.data)
            .field("unique_id", &rule.transaction_id)
            .field("request_id", request_id)
            .render(),
    }
}

/// Match callback bound to one log format.
fn match_logger(format: LogFormat) -> MatchCallback {
    Arc::new(move |rule: &MatchedRule| {
        let line = render_match(rule, format);
        match rule.severity {
            ThreatLevel::Critical | ThreatLevel::High => error!("{}", line),
            ThreatLevel::Medium => warn!("{}", line),
            ThreatLevel::Low => info!("{}", line),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waf::RULESET_VERSION;

    fn file_config() -> FilterConfig {
        let mut config = FilterConfig::default();
        config
            .directives
            .insert("strict".to_string(), DirectiveConfig::default());
        config
            .host_directive_map
            .insert("api.example.com".to_string(), "strict".to_string());
        config
    }

    #[test]
    fn test_build_and_lookup() {
        let config = Configuration::build(&file_config()).unwrap();
        assert_eq!(config.default_directive(), "default");
        assert_eq!(config.directive_names().count(), 2);

        let strict = config.waf_for_host("api.example.com");
        let fallback = config.waf_for_host("other.example.com");
        assert!(!Arc::ptr_eq(strict, fallback));
        assert!(Arc::ptr_eq(fallback, config.waf_for_host("")));
    }

    #[test]
    fn test_build_rejects_unknown_host_directive() {
        let mut config = file_config();
        config
            .host_directive_map
            .insert("b.example.com".to_string(), "missing".to_string());
        assert!(matches!(
            Configuration::build(&config),
            Err(ConfigError::UnknownHostDirective { .. })
        ));
    }

    #[test]
    fn test_shared_configuration_replace() {
        let shared = SharedConfiguration::new(Configuration::build(&FilterConfig::default()).unwrap());
        let captured = shared.current();

        let mut json = FilterConfig::default();
        json.log_format = LogFormat::Json;
        shared.replace(Arc::new(Configuration::build(&json).unwrap()));

        // an existing holder keeps its snapshot
        assert_eq!(captured.log_format(), LogFormat::Plain);
        assert_eq!(shared.current().log_format(), LogFormat::Json);
    }

    fn matched(request_id: Option<&str>) -> MatchedRule {
        MatchedRule {
            transaction_id: "tx-1".to_string(),
            request_id: request_id.map(str::to_string),
            client_ip: "10.0.0.1".to_string(),
            uri: "/search?q=x".to_string(),
            rule_id: 941100,
            category: "xss".to_string(),
            severity: ThreatLevel::High,
            message: "XSS pattern detected".to_string(),
            data: "<script>".to_string(),
            matched_data: "ARGS".to_string(),
            matched_data_name: "q".to_string(),
            tags: vec!["XSS".to_string()],
            version: RULESET_VERSION,
        }
    }

    #[test]
    fn test_render_match_json() {
        let line = render_match(&matched(Some("req-9")), LogFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["request.path"], "/search?q=x");
        assert_eq!(parsed["crs.violated_rule"]["id"], 941100);
        assert_eq!(parsed["crs.violated_rule"]["severity"], "HIGH");
        assert_eq!(parsed["crs.violated_rule"]["data"], "<script>");
        assert_eq!(parsed["crs.violated_rule"]["matched_data_name"], "q");
        assert_eq!(parsed["client.address"], "10.0.0.1");
        assert_eq!(parsed["request.id"], "req-9");
    }

    #[test]
    fn test_render_match_plain_without_request_id() {
        let line = render_match(&matched(None), LogFormat::Plain);
        assert!(line.starts_with(r#" msg="XSS pattern detected" id="941100""#));
        assert!(line.ends_with(r#"request_id="""#));
    }
}
