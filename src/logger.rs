use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output format for structured log lines. Parsed case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}', expected plain or json", other)),
        }
    }
}

impl<'de> Deserialize<'de> for LogFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Plain => write!(f, "plain"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Host log levels, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error | LogLevel::Critical => log::Level::Error,
        }
    }
}

/// A single log line assembled from a message and key/value fields.
///
/// Plain output renders ` msg="..." key="value"` with Rust string quoting;
/// JSON output renders one flat object.
#[derive(Debug, Clone)]
pub struct LogMessage {
    format: LogFormat,
    fields: Vec<(String, String)>,
}

impl LogMessage {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            fields: Vec::new(),
        }
    }

    pub fn msg(self, message: impl Into<String>) -> Self {
        self.field("msg", message.into())
    }

    pub fn field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn error(self, err: &dyn std::error::Error) -> Self {
        self.field("error", err)
    }

    pub fn render(&self) -> String {
        match self.format {
            LogFormat::Plain => {
                let mut line = String::new();
                for (key, value) in &self.fields {
                    line.push(' ');
                    line.push_str(key);
                    line.push('=');
                    line.push_str(&format!("{:?}", value));
                }
                line
            }
            LogFormat::Json => {
                let mut object = serde_json::Map::new();
                for (key, value) in &self.fields {
                    object.insert(key.clone(), serde_json::Value::String(value.clone()));
                }
                serde_json::to_string(&object)
                    .unwrap_or_else(|_| "error marshaling to JSON".to_string())
            }
        }
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_any_case() {
        for name in ["json", "JSON", "jSon"] {
            let format: LogFormat = serde_yaml::from_str(name).unwrap();
            assert_eq!(format, LogFormat::Json);
        }
        assert_eq!("Plain".parse::<LogFormat>(), Ok(LogFormat::Plain));
        assert!(serde_yaml::from_str::<LogFormat>("xml").is_err());
    }

    #[test]
    fn test_plain_format_quotes_values() {
        let line = LogMessage::new(LogFormat::Plain)
            .msg("Transaction interrupted")
            .field("phase", "request_header")
            .field("status", 403)
            .render();
        assert_eq!(
            line,
            r#" msg="Transaction interrupted" phase="request_header" status="403""#
        );
    }

    #[test]
    fn test_plain_format_escapes_quotes() {
        let line = LogMessage::new(LogFormat::Plain)
            .field("data", "say \"hi\"")
            .render();
        assert_eq!(line, r#" data="say \"hi\"""#);
    }

    #[test]
    fn test_json_format() {
        let line = LogMessage::new(LogFormat::Json)
            .msg("Transaction finished")
            .field("id", "abc")
            .render();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["msg"], "Transaction finished");
        assert_eq!(parsed["id"], "abc");
    }

    #[test]
    fn test_error_field() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let line = LogMessage::new(LogFormat::Plain).error(&err).render();
        assert_eq!(line, r#" error="boom""#);
    }

    #[test]
    fn test_log_format_deserialize_case_insensitive() {
        let format: LogFormat = serde_yaml::from_str("JSON").unwrap();
        assert_eq!(format, LogFormat::Json);
        let format: LogFormat = serde_yaml::from_str("plain").unwrap();
        assert_eq!(format, LogFormat::Plain);
        assert!(serde_yaml::from_str::<LogFormat>("xml").is_err());
    }
}
