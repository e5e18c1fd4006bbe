//! Network filter (C3): SSRF protection.
//!
//! `is_private_or_reserved` classifies an IP against a fixed CIDR set.
//! `resolve_and_validate` is the single chokepoint every networked host
//! function must call: it resolves a hostname (or validates a literal IP)
//! exactly once and returns the literal IP the caller must connect to,
//! preventing a second resolution from racing a DNS-rebinding attack.

use std::net::IpAddr;

use ipnet::IpNet;
use once_cell::sync::Lazy;

use crate::capability::{self, CapabilityKind, GrantSet};
use crate::error::RegletError;

static RESERVED_NETS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        "127.0.0.0/8",
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "169.254.0.0/16",
        "224.0.0.0/4",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
    ]
    .iter()
    .map(|s| s.parse().expect("reserved CIDR literal is valid"))
    .collect()
});

/// Classify `ip` as private or reserved per §4.3's fixed CIDR set.
pub fn is_private_or_reserved(ip: IpAddr) -> bool {
    RESERVED_NETS.iter().any(|net| net.contains(&ip))
}

/// Resolve `host` to a single literal IP, enforcing SSRF protection, and
/// return that IP as a string. Callers must connect to the returned IP
/// (never re-resolve `host`) and use `host` only for TLS SNI / the HTTP
/// `Host` header.
pub async fn resolve_and_validate(
    resolver: &hickory_resolver::TokioResolver,
    host: &str,
    plugin_name: &str,
    grants: &GrantSet,
) -> Result<String, RegletError> {
    let ip: IpAddr = match host.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => {
            let response = resolver.lookup_ip(host).await?;
            response
                .iter()
                .next()
                .ok_or_else(|| RegletError::network(format!("no DNS records for host '{host}'")))?
        }
    };

    if is_private_or_reserved(ip) {
        capability::check(grants, CapabilityKind::Network, "outbound:private").map_err(|_| {
            RegletError::ssrf_protection(format!(
                "destination '{host}' resolves to private/reserved IP {ip}; plugin '{plugin_name}' lacks network:outbound:private"
            ))
        })?;
    }

    Ok(ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_loopback_and_private_ranges() {
        let private: &[&str] =
            &["127.0.0.1", "10.0.0.1", "172.16.5.5", "192.168.1.1", "169.254.169.254", "224.0.0.1", "::1", "fe80::1", "fc00::1"];
        for ip in private {
            assert!(is_private_or_reserved(ip.parse().unwrap()), "{ip} should be reserved");
        }
    }

    #[test]
    fn classifies_public_addresses_as_not_reserved() {
        let public: &[&str] = &["8.8.8.8", "1.1.1.1", "93.184.216.34", "2606:4700:4700::1111"];
        for ip in public {
            assert!(!is_private_or_reserved(ip.parse().unwrap()), "{ip} should not be reserved");
        }
    }

    #[test]
    fn literal_public_ip_validates_without_resolver_call() {
        // A literal IP never touches the resolver path, so a test-only
        // double is unnecessary here; exercised indirectly via the async
        // resolver tests in the host module using a loopback-bound stub.
        assert!(!is_private_or_reserved("93.184.216.34".parse().unwrap()));
    }
}
