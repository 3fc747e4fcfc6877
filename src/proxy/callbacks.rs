use crate::filter::{Direction, FilterCallbacks, LocalReply, StreamInfo};
use crate::logger::LogLevel;
use crate::metrics::MetricsCollector;
use http::Version;
use std::sync::Arc;

/// Filter callbacks backed by a Pingora session.
///
/// Pingora hands the session to each hook separately, so replies are queued
/// here and carried out by the hook that triggered them.
pub struct SessionCallbacks {
    info: StreamInfo,
    pending_reply: Option<(Direction, LocalReply)>,
    metrics: Arc<MetricsCollector>,
}

impl SessionCallbacks {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            info: StreamInfo::default(),
            pending_reply: None,
            metrics,
        }
    }

    pub fn set_addresses(&mut self, remote: String, local: String) {
        self.info.downstream_remote_address = remote;
        self.info.downstream_local_address = local;
    }

    pub fn set_protocol(&mut self, version: Version) {
        self.info.protocol = protocol_name(version).map(str::to_string);
    }

    pub fn set_response_code(&mut self, status: u16) {
        self.info.response_code = Some(status);
    }

    pub fn take_reply(&mut self) -> Option<(Direction, LocalReply)> {
        self.pending_reply.take()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}

impl FilterCallbacks for SessionCallbacks {
    fn send_local_reply(&mut self, direction: Direction, reply: LocalReply) {
        self.pending_reply = Some((direction, reply));
    }

    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn log(&mut self, level: LogLevel, message: &str) {
        log::log!(level.into(), "{}", message);
    }

    fn engine_error(&mut self, operation: &'static str) {
        self.metrics.increment_engine_errors(operation);
    }
}

fn protocol_name(version: Version) -> Option<&'static str> {
    match version {
        Version::HTTP_09 => Some("HTTP/0.9"),
        Version::HTTP_10 => Some("HTTP/1.0"),
        Version::HTTP_11 => Some("HTTP/1.1"),
        Version::HTTP_2 => Some("HTTP/2.0"),
        Version::HTTP_3 => Some("HTTP/3.0"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names() {
        assert_eq!(protocol_name(Version::HTTP_11), Some("HTTP/1.1"));
        assert_eq!(protocol_name(Version::HTTP_2), Some("HTTP/2.0"));
    }

    #[test]
    fn test_latest_reply_wins() {
        let mut callbacks = SessionCallbacks::new(Arc::new(MetricsCollector::new()));
        callbacks.send_local_reply(Direction::Decoder, LocalReply::new(403));
        callbacks.send_local_reply(Direction::Encoder, LocalReply::new(500));
        assert_eq!(callbacks.take_reply(), Some((Direction::Encoder, LocalReply::new(500))));
        assert_eq!(callbacks.take_reply(), None);
    }

    #[test]
    fn test_stream_info() {
        let mut callbacks = SessionCallbacks::new(Arc::new(MetricsCollector::new()));
        callbacks.set_addresses("10.0.0.1:1234".to_string(), "10.0.0.2:80".to_string());
        callbacks.set_protocol(Version::HTTP_11);
        callbacks.set_response_code(204);

        let info = callbacks.stream_info();
        assert_eq!(info.downstream_remote_address, "10.0.0.1:1234");
        assert_eq!(info.protocol.as_deref(), Some("HTTP/1.1"));
        assert_eq!(info.response_code, Some(204));
    }
}
