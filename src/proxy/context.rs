use super::callbacks::SessionCallbacks;
use crate::config::Configuration;
use crate::filter::{Direction, FilterStatus, LocalReply, WafFilter};
use crate::metrics::MetricsCollector;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;

/// Per-request state kept between Pingora hooks.
pub struct ProxyContext {
    pub filter: WafFilter<SessionCallbacks>,
    /// Request body held back while the filter buffers.
    pub request_buffer: BytesMut,
    /// Response body held back while the filter buffers.
    pub response_buffer: BytesMut,
    /// Set once the response was replaced by a local reply.
    pub discard_response_body: bool,
    interruption_recorded: bool,
}

impl ProxyContext {
    pub fn new(config: Arc<Configuration>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            filter: WafFilter::new(config, SessionCallbacks::new(metrics)),
            request_buffer: BytesMut::new(),
            response_buffer: BytesMut::new(),
            discard_response_body: false,
            interruption_recorded: false,
        }
    }

    /// Takes the reply queued by the last filter event and records it.
    pub fn take_reply(&mut self) -> Option<(Direction, LocalReply)> {
        let reply = self.filter.callbacks_mut().take_reply()?;
        let metrics = self.filter.callbacks().metrics();
        match self.filter.interruption() {
            Some((phase, _)) if !self.interruption_recorded => {
                self.interruption_recorded = true;
                metrics.increment_interruptions(phase);
            }
            Some(_) => {}
            None if !reply.1.details.is_empty() => {
                metrics.increment_rejected_requests(&reply.1.details)
            }
            None => {}
        }
        Some(reply)
    }

    /// Applies a body-event status to the chunk in flight: buffered chunks
    /// are held in `held`, and released together with the chunk on continue.
    pub fn hold_or_release(status: FilterStatus, held: &mut BytesMut, chunk: Bytes) -> Option<Bytes> {
        match status {
            FilterStatus::StopAndBuffer | FilterStatus::StopAndBufferWatermark => {
                held.extend_from_slice(&chunk);
                None
            }
            FilterStatus::Continue if held.is_empty() => (!chunk.is_empty()).then_some(chunk),
            FilterStatus::Continue => {
                held.extend_from_slice(&chunk);
                Some(held.split().freeze())
            }
            FilterStatus::LocalReply => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_then_release() {
        let mut held = BytesMut::new();
        let out = ProxyContext::hold_or_release(FilterStatus::StopAndBuffer, &mut held, Bytes::from_static(b"ab"));
        assert!(out.is_none());
        let out = ProxyContext::hold_or_release(FilterStatus::Continue, &mut held, Bytes::from_static(b"cd"));
        assert_eq!(out.unwrap(), Bytes::from_static(b"abcd"));
        assert!(held.is_empty());
    }

    #[test]
    fn test_passthrough_without_held_bytes() {
        let mut held = BytesMut::new();
        let out = ProxyContext::hold_or_release(FilterStatus::Continue, &mut held, Bytes::from_static(b"x"));
        assert_eq!(out.unwrap(), Bytes::from_static(b"x"));
        let out = ProxyContext::hold_or_release(FilterStatus::Continue, &mut held, Bytes::new());
        assert!(out.is_none());
    }

    #[test]
    fn test_local_reply_drops_chunk() {
        let mut held = BytesMut::from(&b"held"[..]);
        let out = ProxyContext::hold_or_release(FilterStatus::LocalReply, &mut held, Bytes::from_static(b"x"));
        assert!(out.is_none());
    }
}
