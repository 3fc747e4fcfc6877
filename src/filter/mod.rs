//! Per-exchange WAF filter.
//!
//! A [`WafFilter`] is created for every request/response pair and driven by
//! the host with the exchange's events in order: request headers, request
//! body chunks, response headers, response body chunks, teardown. Each event
//! feeds the rule engine's [`Transaction`] and tells the host whether to
//! forward, buffer or answer with a local reply.

pub mod callbacks;
pub mod connection;
pub mod error;
pub mod phase;

pub use callbacks::*;
pub use connection::*;
pub use error::FilterError;
pub use phase::*;

use crate::config::Configuration;
use crate::logger::{LogLevel, LogMessage};
use crate::waf::{EngineError, Interruption, Transaction};
use error::{parse_address, server_name};
use std::sync::Arc;

/// Status used when an already interrupted exchange keeps sending data.
const FORBIDDEN: u16 = 403;
/// Status for a response body that could not be finalized.
const INTERNAL_SERVER_ERROR: u16 = 500;
/// Protocol assumed when the host does not report one.
const DEFAULT_PROTOCOL: &str = "HTTP/2.0";

pub struct WafFilter<C: FilterCallbacks> {
    config: Arc<Configuration>,
    callbacks: C,
    tx: Option<Box<dyn Transaction>>,
    was_interrupted: bool,
    interruption: Option<(Phase, Interruption)>,
    request_body_processed: bool,
    response_body_processed: bool,
    response_body_processed_with_no_body: bool,
    http_protocol: String,
    connection: ConnectionKind,
}

impl<C: FilterCallbacks> WafFilter<C> {
    pub fn new(config: Arc<Configuration>, callbacks: C) -> Self {
        Self {
            config,
            callbacks,
            tx: None,
            was_interrupted: false,
            interruption: None,
            request_body_processed: false,
            response_body_processed: false,
            response_body_processed_with_no_body: false,
            http_protocol: String::new(),
            connection: ConnectionKind::Http,
        }
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn was_interrupted(&self) -> bool {
        self.was_interrupted
    }

    /// The interruption that ended the exchange and the phase it came from.
    pub fn interruption(&self) -> Option<(Phase, &Interruption)> {
        self.interruption.as_ref().map(|(phase, i)| (*phase, i))
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        self.connection
    }

    /// ID of the engine transaction, once one was opened.
    pub fn transaction_id(&self) -> Option<&str> {
        self.tx.as_deref().map(|tx| tx.id())
    }

    pub fn decode_headers(&mut self, head: &RequestHead<'_>, end_stream: bool) -> FilterStatus {
        self.connection = ConnectionKind::Http;

        let server = match validate_host(head.host) {
            Ok(server) => server,
            Err(err) => return self.reject(err),
        };

        let request_id = head
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if request_id.is_empty() {
            self.log(LogLevel::Debug, self.message().msg("No x-request-id header, engine assigns the transaction ID"));
        }

        let waf = Arc::clone(self.config.waf_for_host(head.host));
        let mut tx = waf.new_transaction_with_id(request_id);
        tx.add_request_header("Host", head.host);
        tx.set_server_name(server);
        let engine_off = tx.is_rule_engine_off();
        self.tx = Some(tx);
        if engine_off {
            return FilterStatus::Continue;
        }

        let (client, local) = match self.peer_addresses() {
            Ok(addresses) => addresses,
            Err(err) => return self.reject(err),
        };
        let Some(tx) = self.tx.as_mut() else {
            return FilterStatus::Continue;
        };
        tx.process_connection(&client.0, client.1, &local.0, local.1);

        let protocol = match self.callbacks.stream_info().protocol.clone() {
            Some(protocol) => protocol,
            None => {
                let message = LogMessage::new(self.config.log_format()).msg("Protocol not set");
                self.callbacks.log(LogLevel::Warn, &message.render());
                DEFAULT_PROTOCOL.to_string()
            }
        };
        tx.process_uri(head.path, head.method, &protocol);
        self.http_protocol = protocol;

        let mut scan = UpgradeScan::default();
        for (name, value) in head.headers {
            if *name == http::header::HOST {
                continue;
            }
            let value = String::from_utf8_lossy(value.as_bytes());
            scan.observe(name.as_str(), &value);
            tx.add_request_header(name.as_str(), &value);
        }
        self.connection = self.connection.after_request(&scan);

        let interruption = tx.process_request_headers();
        if self.connection.is_upgrade_requested() {
            self.log(LogLevel::Debug, self.message().msg("Websocket upgrade request detected"));
        }
        if let Some(interruption) = interruption {
            self.handle_interruption(Phase::RequestHeader, interruption);
            return FilterStatus::LocalReply;
        }

        if end_stream {
            if self.finalize_request_body(Phase::RequestBody) {
                return FilterStatus::LocalReply;
            }
            return FilterStatus::Continue;
        }
        FilterStatus::StopAndBufferWatermark
    }

    pub fn decode_data(&mut self, data: &[u8], end_stream: bool) -> FilterStatus {
        if self.was_interrupted {
            self.callbacks.send_local_reply(
                Direction::Decoder,
                LocalReply::new(FORBIDDEN).with_details("interruption-already-handled"),
            );
            return FilterStatus::LocalReply;
        }
        let Some(tx) = self.tx.as_mut() else {
            return FilterStatus::Continue;
        };
        if tx.is_rule_engine_off() || self.request_body_processed {
            return FilterStatus::Continue;
        }

        if !tx.is_request_body_accessible() {
            self.log(LogLevel::Debug, self.message().msg("Skipping request body processing, request body access is off"));
            if self.finalize_request_body(Phase::RequestBody) {
                return FilterStatus::LocalReply;
            }
            return FilterStatus::Continue;
        }

        if !data.is_empty() {
            match tx.write_request_body(data) {
                Ok(write) => {
                    self.log(
                        LogLevel::Trace,
                        self.message().msg("Buffered request data").field("size", write.buffered),
                    );
                    // a write that reached the body limit already ran the body phase
                    if let Some(interruption) = write.interruption {
                        self.handle_interruption(Phase::RequestBody, interruption);
                        return FilterStatus::LocalReply;
                    }
                }
                Err(err) => self.engine_error("write_request_body", "Failed to write request body", &err),
            }
        }

        if end_stream {
            if self.finalize_request_body(Phase::RequestBody) {
                return FilterStatus::LocalReply;
            }
            return FilterStatus::Continue;
        }

        if self.connection.is_http() {
            self.log(LogLevel::Debug, self.message().msg("Buffering request body data"));
            return FilterStatus::StopAndBuffer;
        }
        FilterStatus::Continue
    }

    pub fn encode_headers(&mut self, headers: &http::HeaderMap, end_stream: bool) -> FilterStatus {
        if self.was_interrupted {
            self.log(LogLevel::Debug, self.message().msg("Interruption already handled, sending downstream the local response"));
            return FilterStatus::Continue;
        }
        // the host may jump straight to the response for a malformed request
        match self.tx.as_deref() {
            Some(tx) if !tx.is_rule_engine_off() => {}
            _ => return FilterStatus::Continue,
        }

        if !self.request_body_processed {
            self.log(LogLevel::Debug, self.message().msg("Processing request body at response headers"));
            if self.finalize_request_body(Phase::ResponseHeader) {
                return FilterStatus::LocalReply;
            }
        }

        let status = self.callbacks.stream_info().response_code.unwrap_or(0);
        let Some(tx) = self.tx.as_mut() else {
            return FilterStatus::Continue;
        };

        let watch_upgrade = self.connection.is_upgrade_requested();
        let mut scan = UpgradeScan::default();
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            if watch_upgrade {
                scan.observe(name.as_str(), &value);
            }
            tx.add_response_header(name.as_str(), &value);
        }
        self.connection = self.connection.after_response(&scan);

        let interruption = tx.process_response_headers(status, &self.http_protocol);
        let body_accessible = tx.is_response_body_accessible();
        if self.connection.is_websocket() {
            self.log(LogLevel::Debug, self.message().msg("Websocket connection established"));
        }
        if let Some(interruption) = interruption {
            self.handle_interruption(Phase::ResponseHeader, interruption);
            return FilterStatus::LocalReply;
        }

        // hold the status line back while the body can still change it
        if !end_stream && body_accessible && self.connection.is_http() {
            self.log(LogLevel::Debug, self.message().msg("Buffering response headers"));
            return FilterStatus::StopAndBuffer;
        }

        if end_stream && self.finalize_response_body() {
            return FilterStatus::LocalReply;
        }
        FilterStatus::Continue
    }

    pub fn encode_data(&mut self, data: &mut [u8], end_stream: bool) -> FilterStatus {
        let engine_off = match self.tx.as_deref() {
            Some(tx) => tx.is_rule_engine_off(),
            None => return FilterStatus::Continue,
        };
        if self.connection.is_websocket() {
            self.log(LogLevel::Debug, self.message().msg("Skip response body processing (websocket connection)"));
            return FilterStatus::Continue;
        }
        if engine_off || self.response_body_processed_with_no_body {
            return FilterStatus::Continue;
        }
        if self.was_interrupted {
            self.callbacks
                .send_local_reply(Direction::Encoder, LocalReply::new(FORBIDDEN));
            return FilterStatus::LocalReply;
        }
        if self.response_body_processed {
            return FilterStatus::Continue;
        }

        let Some(tx) = self.tx.as_mut() else {
            return FilterStatus::Continue;
        };
        if !tx.is_response_body_accessible() {
            self.log(LogLevel::Debug, self.message().msg("Skipping response body processing, response body access is off"));
            self.response_body_processed_with_no_body = true;
            if self.finalize_response_body() {
                return FilterStatus::LocalReply;
            }
            return FilterStatus::Continue;
        }

        if !data.is_empty() {
            match tx.write_response_body(data) {
                Ok(write) => {
                    self.log(
                        LogLevel::Trace,
                        self.message().msg("Buffered response body data").field("size", write.buffered),
                    );
                    if let Some(interruption) = write.interruption {
                        self.handle_interruption(Phase::ResponseBody, interruption);
                        return FilterStatus::LocalReply;
                    }
                }
                Err(err) => self.engine_error("write_response_body", "Failed to write response body", &err),
            }
        }

        if !end_stream {
            return FilterStatus::StopAndBuffer;
        }

        self.response_body_processed = true;
        let result = match self.tx.as_mut() {
            Some(tx) => tx.process_response_body(),
            None => return FilterStatus::Continue,
        };
        match result {
            Ok(None) => FilterStatus::Continue,
            Ok(Some(interruption)) => {
                data.fill(0);
                self.handle_interruption(Phase::ResponseBody, interruption);
                FilterStatus::LocalReply
            }
            Err(err) => {
                data.fill(0);
                self.engine_error("process_response_body", "Failed to process response body", &err);
                self.callbacks
                    .send_local_reply(Direction::Encoder, LocalReply::new(INTERNAL_SERVER_ERROR));
                FilterStatus::LocalReply
            }
        }
    }

    /// Finishes the transaction. Safe to call more than once.
    pub fn on_destroy(&mut self) {
        let Some(mut tx) = self.tx.take() else {
            return;
        };

        if !tx.is_rule_engine_off() && !self.response_body_processed {
            self.response_body_processed = true;
            self.log(LogLevel::Debug, self.message().msg(
                "Running response body processing at teardown, triggered actions will not be enforced",
            ));
            match tx.process_response_body() {
                Ok(Some(interruption)) => {
                    let message = self
                        .message()
                        .msg("Interruption at teardown not enforced")
                        .field("rule_id", interruption.rule_id)
                        .field("status", interruption.status);
                    self.log(LogLevel::Info, message);
                }
                Ok(None) => {}
                Err(err) => self.engine_error("process_response_body", "Failed to process response body at teardown", &err),
            }
        }

        tx.process_logging();
        let id = tx.id().to_string();
        if let Err(err) = tx.close() {
            self.engine_error("close", "Failed to close transaction", &err);
        }
        let message = self.message().msg("Transaction finished").field("id", id);
        self.log(LogLevel::Info, message);
    }

    /// Client and local `(ip, port)` pairs from the stream info.
    fn peer_addresses(&self) -> Result<((String, u16), (String, u16)), FilterError> {
        let info = self.callbacks.stream_info();
        let client = parse_address(&info.downstream_remote_address)?;
        let local = parse_address(&info.downstream_local_address)?;
        Ok((client, local))
    }

    fn reject(&mut self, err: FilterError) -> FilterStatus {
        let message = self.message().msg("Rejecting request").error(&err);
        self.log(LogLevel::Error, message);
        self.callbacks.send_local_reply(
            Direction::Decoder,
            LocalReply::new(err.status()).with_details(err.reason()),
        );
        FilterStatus::LocalReply
    }

    /// Runs the request body phase once. `phase` is the phase an interruption
    /// is reported under. Returns true when the exchange was interrupted.
    fn finalize_request_body(&mut self, phase: Phase) -> bool {
        if self.request_body_processed {
            return false;
        }
        self.request_body_processed = true;
        let Some(tx) = self.tx.as_mut() else {
            return false;
        };
        match tx.process_request_body() {
            Ok(Some(interruption)) => {
                self.handle_interruption(phase, interruption);
                true
            }
            Ok(None) => false,
            Err(err) => {
                self.engine_error("process_request_body", "Failed to process request body", &err);
                false
            }
        }
    }

    /// Runs the response body phase once outside the final body chunk.
    fn finalize_response_body(&mut self) -> bool {
        if self.response_body_processed {
            return false;
        }
        self.response_body_processed = true;
        let Some(tx) = self.tx.as_mut() else {
            return false;
        };
        match tx.process_response_body() {
            Ok(Some(interruption)) => {
                self.handle_interruption(Phase::ResponseBody, interruption);
                true
            }
            Ok(None) => false,
            Err(err) => {
                self.engine_error("process_response_body", "Failed to process response body", &err);
                false
            }
        }
    }

    fn handle_interruption(&mut self, phase: Phase, interruption: Interruption) {
        self.was_interrupted = true;
        let message = self
            .message()
            .msg("Transaction interrupted")
            .field("phase", phase)
            .field("rule_id", interruption.rule_id)
            .field("action", &interruption.action)
            .field("status", interruption.status);
        self.log(LogLevel::Info, message);

        self.callbacks
            .send_local_reply(phase.direction(), LocalReply::new(interruption.status));
        self.interruption = Some((phase, interruption));
    }

    fn engine_error(&mut self, operation: &'static str, msg: &str, err: &EngineError) {
        let message = self.message().msg(msg).error(err);
        self.log(LogLevel::Error, message);
        self.callbacks.engine_error(operation);
    }

    fn message(&self) -> LogMessage {
        LogMessage::new(self.config.log_format())
    }

    fn log(&mut self, level: LogLevel, message: LogMessage) {
        self.callbacks.log(level, &message.render());
    }
}

/// Host checks that run before a transaction exists. Returns the server name.
fn validate_host(host: &str) -> Result<&str, FilterError> {
    if host.is_empty() {
        return Err(FilterError::MissingHost);
    }
    server_name(host)
}
