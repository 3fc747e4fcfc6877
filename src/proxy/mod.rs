pub mod callbacks;
pub mod context;

pub use callbacks::SessionCallbacks;
pub use context::ProxyContext;

use crate::config::SharedConfiguration;
use crate::filter::{Direction, FilterStatus, LocalReply, RequestHead};
use crate::metrics::MetricsCollector;
use async_trait::async_trait;
use bytes::Bytes;
use log::{error, info, warn};
use pingora::http::ResponseHeader;
use pingora::prelude::*;
use pingora::upstreams::peer::HttpPeer;
use pingora_proxy::{ProxyHttp, Session};
use std::sync::Arc;
use std::time::Duration;

pub struct WafProxy {
    pub config: SharedConfiguration,
    pub metrics: Arc<MetricsCollector>,
    pub upstream_addr: (String, u16),
}

impl WafProxy {
    pub fn new(
        upstream_addr: (String, u16),
        config: SharedConfiguration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            metrics,
            upstream_addr,
        }
    }

    fn host(session: &Session) -> String {
        let req = session.req_header();
        req.headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default()
    }

    fn blocked(reason: &str) -> Box<Error> {
        Error::explain(ErrorType::Custom("WafBlocked"), reason.to_string())
    }
}

#[async_trait]
impl ProxyHttp for WafProxy {
    type CTX = ProxyContext;

    fn new_ctx(&self) -> Self::CTX {
        ProxyContext::new(self.config.current(), Arc::clone(&self.metrics))
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool>
    where
        Self::CTX: Send + Sync,
    {
        let remote = session
            .client_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        let local = session
            .server_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        let version = session.req_header().version;
        let callbacks = ctx.filter.callbacks_mut();
        callbacks.set_addresses(remote, local);
        callbacks.set_protocol(version);

        let host = Self::host(session);
        let req = session.req_header();
        let method = req.method.as_str().to_string();
        let path = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        let end_stream = session.is_body_empty();

        let status = {
            let head = RequestHead {
                host: &host,
                method: &method,
                path: &path,
                headers: &session.req_header().headers,
            };
            ctx.filter.decode_headers(&head, end_stream)
        };
        if ctx.filter.transaction_id().is_some() {
            self.metrics.increment_transactions();
        }

        if status == FilterStatus::LocalReply {
            if let Some((_, reply)) = ctx.take_reply() {
                let _ = session.respond_error(reply.status).await;
            }
            return Ok(true);
        }

        Ok(false)
    }

    async fn request_body_filter(
        &self,
        session: &mut Session,
        body: &mut Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        let chunk = body.take().unwrap_or_default();
        let status = ctx.filter.decode_data(&chunk, end_of_stream);

        if status == FilterStatus::LocalReply {
            ctx.request_buffer.clear();
            if let Some((_, reply)) = ctx.take_reply() {
                let _ = session.respond_error(reply.status).await;
            }
            // stop the request from reaching upstream
            return Err(Self::blocked("Request blocked by WAF while inspecting the body"));
        }

        *body = ProxyContext::hold_or_release(status, &mut ctx.request_buffer, chunk);
        Ok(())
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let peer = Box::new(HttpPeer::new(
            (self.upstream_addr.0.as_str(), self.upstream_addr.1),
            false,
            "".to_string(),
        ));
        Ok(peer)
    }

    async fn response_filter(
        &self,
        session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        let code = upstream_response.status.as_u16();
        ctx.filter.callbacks_mut().set_response_code(code);
        let end_stream = !response_has_body(
            &session.req_header().method,
            code,
            &upstream_response.headers,
        );
        let status = ctx.filter.encode_headers(&upstream_response.headers, end_stream);

        if status == FilterStatus::LocalReply {
            if let Some((Direction::Encoder, LocalReply { status, .. })) = ctx.take_reply() {
                // the head cannot be held back, so it is rewritten in place
                upstream_response.set_status(status)?;
                upstream_response.remove_header(&http::header::TRANSFER_ENCODING);
                upstream_response.insert_header(http::header::CONTENT_LENGTH, "0")?;
                ctx.discard_response_body = true;
            }
        }

        Ok(())
    }

    fn response_body_filter(
        &self,
        _session: &mut Session,
        body: &mut Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> Result<Option<Duration>>
    where
        Self::CTX: Send + Sync,
    {
        if ctx.discard_response_body {
            *body = None;
            return Ok(None);
        }

        let mut chunk = body.take().map(|b| b.to_vec()).unwrap_or_default();
        let status = ctx.filter.encode_data(&mut chunk, end_of_stream);

        if status == FilterStatus::LocalReply {
            ctx.response_buffer.fill(0);
            ctx.response_buffer.clear();
            ctx.discard_response_body = true;
            if let Some((_, reply)) = ctx.take_reply() {
                warn!(
                    "Response blocked after the head was sent, aborting with status {}",
                    reply.status
                );
            }
            return Err(Self::blocked("Response blocked by WAF while inspecting the body"));
        }

        *body = ProxyContext::hold_or_release(status, &mut ctx.response_buffer, Bytes::from(chunk));
        Ok(None)
    }

    async fn logging(
        &self,
        session: &mut Session,
        e: Option<&pingora::Error>,
        ctx: &mut Self::CTX,
    ) {
        ctx.filter.on_destroy();

        let response_code = session
            .response_written()
            .map_or(0, |resp| resp.status.as_u16());
        let client = session
            .client_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let method = session.req_header().method.as_str();
        let uri = session.req_header().uri.to_string();

        if let Some(error) = e {
            error!(
                "Request failed - Client: {}, Method: {}, URI: {}, Error: {:?}",
                client, method, uri, error
            );
        } else {
            info!(
                "Request completed - Client: {}, Method: {}, URI: {}, Status: {}",
                client, method, uri, response_code
            );
        }

        ctx.request_buffer.clear();
        ctx.response_buffer.clear();
    }
}

/// Whether a response to `method` with this head carries a body. Upgrades
/// count as having one so the stream is not finalized at the head.
fn response_has_body(method: &http::Method, status: u16, headers: &http::HeaderMap) -> bool {
    if *method == http::Method::HEAD {
        return false;
    }
    if matches!(status, 100..=199 if status != 101) || status == 204 || status == 304 {
        return false;
    }
    let empty_length = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    !empty_length
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, Method};

    #[test]
    fn test_bodyless_responses() {
        let empty = HeaderMap::new();
        assert!(!response_has_body(&Method::HEAD, 200, &empty));
        assert!(!response_has_body(&Method::GET, 204, &empty));
        assert!(!response_has_body(&Method::GET, 304, &empty));
        assert!(!response_has_body(&Method::GET, 103, &empty));

        let mut zero = HeaderMap::new();
        zero.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(!response_has_body(&Method::POST, 200, &zero));
    }

    #[test]
    fn test_responses_with_body() {
        let empty = HeaderMap::new();
        assert!(response_has_body(&Method::GET, 200, &empty));
        assert!(response_has_body(&Method::GET, 101, &empty));

        let mut sized = HeaderMap::new();
        sized.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert!(response_has_body(&Method::GET, 404, &sized));
    }
}
