use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::str::FromStr;

use super::{InspectionTarget, SecurityRule, SecurityViolation, ThreatLevel, Variable};

pub const IP_FILTER_RULE_ID: u32 = 910100;

/// Client address filter with CIDR support.
///
/// Accepts single addresses ("192.168.1.1", treated as /32 or /128) and
/// ranges ("10.0.0.0/8", "2001:db8::/32"). A non-empty whitelist rejects
/// every address outside it; the blacklist always wins.
pub struct IpFilter {
    pub whitelist: Vec<IpNetwork>,
    pub blacklist: Vec<IpNetwork>,
    pub enabled: bool,
    pub block_mode: bool,
}

impl IpFilter {
    pub fn new(enabled: bool, block_mode: bool) -> Self {
        Self {
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            enabled,
            block_mode,
        }
    }

    pub fn add_to_whitelist(&mut self, ip_or_cidr: &str) -> Result<(), String> {
        let network = parse_ip_or_cidr(ip_or_cidr)?;
        self.whitelist.push(network);
        Ok(())
    }

    pub fn add_to_blacklist(&mut self, ip_or_cidr: &str) -> Result<(), String> {
        let network = parse_ip_or_cidr(ip_or_cidr)?;
        self.blacklist.push(network);
        Ok(())
    }

    fn ip_in_networks(&self, ip: &IpAddr, networks: &[IpNetwork]) -> bool {
        networks.iter().any(|network| network.contains(*ip))
    }

    fn violation(&self, ip: &IpAddr, threat_type: &str, level: ThreatLevel, description: String) -> SecurityViolation {
        SecurityViolation {
            rule_id: IP_FILTER_RULE_ID,
            threat_type: threat_type.to_string(),
            threat_level: level,
            description,
            variable: Variable::RemoteAddr,
            key: String::new(),
            data: ip.to_string(),
            blocked: self.block_mode,
        }
    }
}

fn parse_ip_or_cidr(input: &str) -> Result<IpNetwork, String> {
    if let Ok(network) = IpNetwork::from_str(input) {
        return Ok(network);
    }

    match IpAddr::from_str(input) {
        Ok(IpAddr::V4(v4)) => IpNetwork::new(IpAddr::V4(v4), 32).map_err(|e| e.to_string()),
        Ok(IpAddr::V6(v6)) => IpNetwork::new(IpAddr::V6(v6), 128).map_err(|e| e.to_string()),
        Err(_) => Err(format!("Invalid IP address or CIDR notation: {}", input)),
    }
}

impl SecurityRule for IpFilter {
    fn id(&self) -> u32 {
        IP_FILTER_RULE_ID
    }

    fn name(&self) -> &str {
        "ip_filter"
    }

    fn inspects(&self, variable: Variable) -> bool {
        self.enabled && variable == Variable::RemoteAddr
    }

    fn check(&self, target: &InspectionTarget<'_>) -> Result<(), SecurityViolation> {
        if !self.enabled {
            return Ok(());
        }

        // Unparseable addresses are not this rule's concern
        let ip = match IpAddr::from_str(target.value) {
            Ok(addr) => addr,
            Err(_) => return Ok(()),
        };

        if !self.whitelist.is_empty() && !self.ip_in_networks(&ip, &self.whitelist) {
            return Err(self.violation(
                &ip,
                "IP_NOT_WHITELISTED",
                ThreatLevel::High,
                format!("IP {} not in whitelist", ip),
            ));
        }

        if self.ip_in_networks(&ip, &self.blacklist) {
            return Err(self.violation(
                &ip,
                "IP_BLACKLISTED",
                ThreatLevel::Critical,
                format!("IP {} is blacklisted", ip),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(value: &str) -> InspectionTarget<'_> {
        InspectionTarget::new(Variable::RemoteAddr, value)
    }

    #[test]
    fn test_cidr_whitelist() {
        let mut filter = IpFilter::new(true, true);
        filter.add_to_whitelist("192.168.1.0/24").unwrap();

        assert!(filter.check(&addr("192.168.1.1")).is_ok());
        assert!(filter.check(&addr("192.168.1.255")).is_ok());
        assert!(filter.check(&addr("192.168.2.1")).is_err());
        assert!(filter.check(&addr("10.0.0.1")).is_err());
    }

    #[test]
    fn test_single_ip_blacklist() {
        let mut filter = IpFilter::new(true, true);
        filter.add_to_blacklist("192.168.1.100").unwrap();

        let violation = filter.check(&addr("192.168.1.100")).unwrap_err();
        assert_eq!(violation.threat_type, "IP_BLACKLISTED");
        assert!(filter.check(&addr("192.168.1.101")).is_ok());
    }

    #[test]
    fn test_blacklist_wins_over_whitelist() {
        let mut filter = IpFilter::new(true, true);
        filter.add_to_whitelist("192.168.0.0/16").unwrap();
        filter.add_to_blacklist("192.168.1.100").unwrap();

        assert!(filter.check(&addr("192.168.1.100")).is_err());
        assert!(filter.check(&addr("192.168.1.1")).is_ok());
    }

    #[test]
    fn test_ipv6_cidr() {
        let mut filter = IpFilter::new(true, true);
        filter.add_to_whitelist("2001:db8::/32").unwrap();

        assert!(filter.check(&addr("2001:db8::1")).is_ok());
        assert!(filter.check(&addr("2001:db9::1")).is_err());
    }

    #[test]
    fn test_disabled_filter() {
        let mut filter = IpFilter::new(false, true);
        filter.add_to_blacklist("0.0.0.0/0").unwrap();

        assert!(!filter.inspects(Variable::RemoteAddr));
        assert!(filter.check(&addr("192.168.1.1")).is_ok());
    }

    #[test]
    fn test_invalid_cidr() {
        let mut filter = IpFilter::new(true, true);

        assert!(filter.add_to_whitelist("invalid").is_err());
        assert!(filter.add_to_whitelist("192.168.1.0/33").is_err());
    }
}
