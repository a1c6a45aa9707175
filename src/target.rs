use crate::error::ProbeError;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

#[derive(Debug, Clone)]
pub struct Target {
    pub original: String,
    pub target_type: TargetType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetType {
    Domain(String),
    IpAddress(Ipv4Addr),
}

impl Target {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();

        if let Ok(ip) = trimmed.parse::<Ipv4Addr>() {
            return Self {
                original: input.to_string(),
                target_type: TargetType::IpAddress(ip),
            };
        }

        Self {
            original: input.to_string(),
            target_type: TargetType::Domain(trimmed.to_string()),
        }
    }

    /// Get the hostname/domain for display purposes
    pub fn display_name(&self) -> &str {
        match &self.target_type {
            TargetType::Domain(domain) => domain,
            TargetType::IpAddress(_) => &self.original,
        }
    }

    /// Resolve to the first IPv4 address. Literal addresses skip the lookup.
    pub fn resolve(&self) -> Result<Ipv4Addr, ProbeError> {
        let domain = match &self.target_type {
            TargetType::IpAddress(ip) => return Ok(*ip),
            TargetType::Domain(domain) => domain,
        };

        if domain.is_empty() {
            return Err(self.resolution_error("empty destination"));
        }

        log::debug!("[target] resolve: domain={}", domain);
        let addresses = (domain.as_str(), 0)
            .to_socket_addrs()
            .map_err(|e| self.resolution_error(&e.to_string()))?;

        let mut saw_ipv6 = false;
        for addr in addresses {
            match addr.ip() {
                IpAddr::V4(ip) => {
                    log::debug!("[target] resolved: domain={} ip={}", domain, ip);
                    return Ok(ip);
                }
                IpAddr::V6(_) => saw_ipv6 = true,
            }
        }

        let reason = if saw_ipv6 {
            "only IPv6 addresses found"
        } else {
            "no addresses found"
        };
        Err(self.resolution_error(reason))
    }

    fn resolution_error(&self, reason: &str) -> ProbeError {
        log::warn!("[target] resolution_failed: target={} reason={}", self.original, reason);
        ProbeError::Resolution {
            destination: self.original.clone(),
            reason: reason.to_string(),
        }
    }
}
