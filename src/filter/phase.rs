use super::Direction;
use std::fmt;

/// Inspection points of one exchange, in the order the engine runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    RequestHeader,
    RequestBody,
    ResponseHeader,
    ResponseBody,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::RequestHeader => "request_header",
            Phase::RequestBody => "request_body",
            Phase::ResponseHeader => "response_header",
            Phase::ResponseBody => "response_body",
        }
    }

    /// Direction an interruption raised in this phase must be answered on.
    pub fn direction(&self) -> Direction {
        match self {
            Phase::RequestHeader | Phase::RequestBody => Direction::Decoder,
            Phase::ResponseHeader | Phase::ResponseBody => Direction::Encoder,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
