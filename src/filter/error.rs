use thiserror::Error;

/// Input problems caught before the engine sees the request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("request has no Host header")]
    MissingHost,
    #[error("failed to parse server name from Host {host:?}: {reason}")]
    HostnameSplit { host: String, reason: String },
    #[error("address formatting err for {address:?}: {reason}")]
    AddressParse { address: String, reason: String },
    #[error("port formatting err for {address:?}: invalid port {port:?}")]
    PortParse { address: String, port: String },
}

impl FilterError {
    /// Status of the local reply answering this error.
    pub fn status(&self) -> u16 {
        match self {
            FilterError::MissingHost | FilterError::HostnameSplit { .. } => 403,
            FilterError::AddressParse { .. } | FilterError::PortParse { .. } => 400,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            FilterError::MissingHost => "missing_host",
            FilterError::HostnameSplit { .. } => "hostname_split",
            FilterError::AddressParse { .. } => "address_parse",
            FilterError::PortParse { .. } => "port_parse",
        }
    }
}

/// Splits `host:port`, `[v6]:port` style strings. The port may be empty.
pub(crate) fn split_host_port(input: &str) -> Result<(&str, &str), String> {
    if let Some(rest) = input.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| format!("missing ']' in address {}", input))?;
        let host = &rest[..end];
        let port = match &rest[end + 1..] {
            "" => return Err(format!("missing port in address {}", input)),
            after => after
                .strip_prefix(':')
                .ok_or_else(|| format!("unexpected text after ']' in address {}", input))?,
        };
        if host.contains('[') || port.contains('[') || port.contains(']') {
            return Err(format!("unexpected bracket in address {}", input));
        }
        return Ok((host, port));
    }

    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| format!("missing port in address {}", input))?;
    if host.contains(':') {
        return Err(format!("too many colons in address {}", input));
    }
    if host.contains('[') || host.contains(']') || port.contains('[') || port.contains(']') {
        return Err(format!("unexpected bracket in address {}", input));
    }
    Ok((host, port))
}

/// Parses a stream-info address into `(ip, port)`.
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), FilterError> {
    let (ip, port) = split_host_port(address).map_err(|reason| FilterError::AddressParse {
        address: address.to_string(),
        reason,
    })?;
    let port = port.parse::<u16>().map_err(|_| FilterError::PortParse {
        address: address.to_string(),
        port: port.to_string(),
    })?;
    Ok((ip.to_string(), port))
}

/// Server name for a Host header value: the host part when a port is present.
pub(crate) fn server_name(host: &str) -> Result<&str, FilterError> {
    if !host.contains(':') {
        return Ok(host);
    }
    split_host_port(host)
        .map(|(name, _)| name)
        .map_err(|reason| FilterError::HostnameSplit {
            host: host.to_string(),
            reason,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("10.0.0.1:8080"), Ok(("10.0.0.1", "8080")));
        assert_eq!(split_host_port("[::1]:443"), Ok(("::1", "443")));
        assert_eq!(split_host_port("example.com:"), Ok(("example.com", "")));
        assert!(split_host_port("10.0.0.1").is_err());
        assert!(split_host_port("::1:80").is_err());
        assert!(split_host_port("[::1]").is_err());
        assert!(split_host_port("[::1").is_err());
        assert!(split_host_port("[::1]x80").is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("192.168.1.10:51234"),
            Ok(("192.168.1.10".to_string(), 51234))
        );
        assert_eq!(parse_address("[2001:db8::1]:80").unwrap().0, "2001:db8::1");

        let err = parse_address("192.168.1.10").unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(err.reason(), "address_parse");

        let err = parse_address("192.168.1.10:http").unwrap_err();
        assert!(matches!(err, FilterError::PortParse { ref port, .. } if port == "http"));
        assert_eq!(err.status(), 400);
        assert!(parse_address("192.168.1.10:70000").is_err());
    }

    #[test]
    fn test_server_name() {
        assert_eq!(server_name("example.com"), Ok("example.com"));
        assert_eq!(server_name("example.com:8443"), Ok("example.com"));
        assert_eq!(server_name("[::1]:8443"), Ok("::1"));

        let err = server_name("[::1]").unwrap_err();
        assert_eq!(err.status(), 403);
        assert_eq!(err.reason(), "hostname_split");
    }

    #[test]
    fn test_missing_host_status() {
        assert_eq!(FilterError::MissingHost.status(), 403);
        assert_eq!(FilterError::MissingHost.to_string(), "request has no Host header");
    }
}
