use crate::logger::LogLevel;
use http::HeaderMap;

/// Which side of the filter chain a local reply is sent from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Request path: the upstream is never contacted.
    Decoder,
    /// Response path: replaces what the upstream sent.
    Encoder,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalReply {
    pub status: u16,
    pub body: String,
    /// Host-side details string, empty for plain interruptions.
    pub details: String,
}

impl LocalReply {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Stream facts the host exposes to the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// Client address as `ip:port`.
    pub downstream_remote_address: String,
    /// Address the client connected to, as `ip:port`.
    pub downstream_local_address: String,
    /// Negotiated protocol, e.g. `HTTP/1.1`.
    pub protocol: Option<String>,
    pub response_code: Option<u16>,
}

/// What the host should do after a filter event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Continue,
    StopAndBuffer,
    /// Buffer with backpressure; returned for request headers.
    StopAndBufferWatermark,
    /// A local reply was sent; stop the chain.
    LocalReply,
}

/// Request head as seen by the filter.
#[derive(Debug, Clone, Copy)]
pub struct RequestHead<'a> {
    pub host: &'a str,
    pub method: &'a str,
    /// Path including the query string.
    pub path: &'a str,
    pub headers: &'a HeaderMap,
}

/// Host proxy surface the filter drives.
pub trait FilterCallbacks {
    fn send_local_reply(&mut self, direction: Direction, reply: LocalReply);
    fn stream_info(&self) -> &StreamInfo;
    fn log(&mut self, level: LogLevel, message: &str);

    /// Notified of a non-verdict engine failure the filter let through.
    fn engine_error(&mut self, _operation: &'static str) {}
}
