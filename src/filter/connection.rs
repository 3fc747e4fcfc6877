use std::fmt;

/// What the exchange turned out to be. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionKind {
    #[default]
    Http,
    WebSocketUpgradeRequested,
    WebSocketEstablished,
}

impl ConnectionKind {
    pub fn is_http(&self) -> bool {
        *self == ConnectionKind::Http
    }

    pub fn is_websocket(&self) -> bool {
        *self == ConnectionKind::WebSocketEstablished
    }

    pub fn is_upgrade_requested(&self) -> bool {
        *self == ConnectionKind::WebSocketUpgradeRequested
    }

    /// Next kind after seeing request headers.
    pub fn after_request(self, scan: &UpgradeScan) -> Self {
        match self {
            ConnectionKind::Http if scan.is_upgrade() => ConnectionKind::WebSocketUpgradeRequested,
            kind => kind,
        }
    }

    /// Next kind after seeing response headers.
    pub fn after_response(self, scan: &UpgradeScan) -> Self {
        match self {
            ConnectionKind::WebSocketUpgradeRequested if scan.is_upgrade() => {
                ConnectionKind::WebSocketEstablished
            }
            kind => kind,
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionKind::Http => "http",
            ConnectionKind::WebSocketUpgradeRequested => "websocket upgrade requested",
            ConnectionKind::WebSocketEstablished => "websocket connection",
        };
        f.write_str(name)
    }
}

/// Looks for `Upgrade: websocket` together with `Connection: upgrade` while
/// headers stream past.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeScan {
    upgrade_websocket: bool,
    connection_upgrade: bool,
}

impl UpgradeScan {
    pub fn observe(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("upgrade") && contains_ignore_case(value, "websocket") {
            self.upgrade_websocket = true;
        }
        if key.eq_ignore_ascii_case("connection") && contains_ignore_case(value, "upgrade") {
            self.connection_upgrade = true;
        }
    }

    pub fn is_upgrade(&self) -> bool {
        self.upgrade_websocket && self.connection_upgrade
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(needle)
}
