//! Capability matcher (C1).
//!
//! A [`Capability`] is a `(kind, pattern)` permission record; a [`GrantSet`]
//! is the set of capabilities a single plugin holds. [`check`] decides
//! whether a requested `(kind, pattern)` pair is covered by a grant set,
//! applying kind-specific matching rules. Matching is deny-by-default:
//! an empty grant set, an unknown kind, or a malformed grant all deny.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegletError;

/// The four capability kinds a plugin can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Network,
    Fs,
    Env,
    Exec,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapabilityKind::Network => "network",
            CapabilityKind::Fs => "fs",
            CapabilityKind::Env => "env",
            CapabilityKind::Exec => "exec",
        };
        f.write_str(s)
    }
}

/// A single `(kind, pattern)` permission record.
///
/// Two capabilities are identical iff both fields match exactly — this is
/// the equality `derive(Eq, Hash)` gives us, used for deduplicating the
/// required-capability set in §4.7 step 3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,
    pub pattern: String,
}

impl Capability {
    pub fn new(kind: CapabilityKind, pattern: impl Into<String>) -> Self {
        Capability { kind, pattern: pattern.into() }
    }

    pub fn network(pattern: impl Into<String>) -> Self {
        Capability::new(CapabilityKind::Network, pattern)
    }

    pub fn fs(pattern: impl Into<String>) -> Self {
        Capability::new(CapabilityKind::Fs, pattern)
    }

    pub fn env(pattern: impl Into<String>) -> Self {
        Capability::new(CapabilityKind::Env, pattern)
    }

    pub fn exec(pattern: impl Into<String>) -> Self {
        Capability::new(CapabilityKind::Exec, pattern)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.pattern)
    }
}

/// The set of capabilities one plugin holds.
pub type GrantSet = HashSet<Capability>;

/// Per-plugin grant sets, as produced by the capability manager (C7) and
/// consumed by the host functions (C4).
pub type GrantMap = HashMap<String, GrantSet>;

/// Check whether `(kind, pattern)` is permitted by `grants`.
///
/// Returns `Ok(())` on the first matching grant of the same kind, or a
/// `RegletError::Capability` naming the requested kind/pattern if none
/// match.
pub fn check(grants: &GrantSet, kind: CapabilityKind, pattern: &str) -> Result<(), RegletError> {
    for grant in grants.iter().filter(|g| g.kind == kind) {
        let matched = match kind {
            CapabilityKind::Network => match_network(&grant.pattern, pattern),
            CapabilityKind::Fs => match_fs(&grant.pattern, pattern),
            CapabilityKind::Env => match_env(&grant.pattern, pattern),
            CapabilityKind::Exec => match_exec(&grant.pattern, pattern),
        };
        if matched {
            return Ok(());
        }
    }
    Err(RegletError::capability(format!("missing capability: {kind}:{pattern}")))
}

/// Parsed `portspec` as used by network grants: `*`, a comma list, or a
/// `lo-hi` range. Malformed specs never match (deny).
enum PortSpec {
    Any,
    List(Vec<u16>),
    Range(u16, u16),
}

fn parse_portspec(spec: &str) -> Option<PortSpec> {
    if spec == "*" {
        return Some(PortSpec::Any);
    }
    if let Some((lo, hi)) = spec.split_once('-') {
        let lo: u16 = lo.parse().ok()?;
        let hi: u16 = hi.parse().ok()?;
        if lo == 0 || hi == 0 || lo > hi {
            return None;
        }
        return Some(PortSpec::Range(lo, hi));
    }
    let mut ports = Vec::new();
    for part in spec.split(',') {
        let port: u16 = part.trim().parse().ok()?;
        if port == 0 {
            return None;
        }
        ports.push(port);
    }
    if ports.is_empty() {
        None
    } else {
        Some(PortSpec::List(ports))
    }
}

impl PortSpec {
    fn contains(&self, port: u16) -> bool {
        match self {
            PortSpec::Any => true,
            PortSpec::List(ports) => ports.contains(&port),
            PortSpec::Range(lo, hi) => (*lo..=*hi).contains(&port),
        }
    }
}

/// `direction:portspec` matching. `direction` must match exactly; the
/// `outbound:private` sentinel is a literal match used only by the
/// network filter (C3), never by a numeric port comparison.
fn match_network(granted: &str, requested: &str) -> bool {
    let Some((g_dir, g_rest)) = granted.split_once(':') else { return false };
    let Some((r_dir, r_rest)) = requested.split_once(':') else { return false };
    if g_dir != r_dir {
        return false;
    }
    if g_rest == "private" || r_rest == "private" {
        return g_rest == r_rest;
    }
    let Some(spec) = parse_portspec(g_rest) else { return false };
    let Ok(port) = r_rest.parse::<u16>() else { return false };
    spec.contains(port)
}

/// `op:path` matching for filesystem capabilities. A grant path ending
/// in `**` is a recursive-prefix match; otherwise shell-glob semantics
/// apply (an invalid glob denies).
fn match_fs(granted: &str, requested: &str) -> bool {
    let Some((g_op, g_path)) = granted.split_once(':') else { return false };
    let Some((r_op, r_path)) = requested.split_once(':') else { return false };
    if g_op != r_op {
        return false;
    }
    if let Some(prefix) = g_path.strip_suffix("**") {
        return r_path.starts_with(prefix);
    }
    match glob::Pattern::new(g_path) {
        Ok(pattern) => pattern.matches(r_path),
        Err(_) => false,
    }
}

/// Exact match or trailing-`*` prefix match on an environment variable name.
fn match_env(granted: &str, requested: &str) -> bool {
    if let Some(prefix) = granted.strip_suffix('*') {
        requested.starts_with(prefix)
    } else {
        granted == requested
    }
}

/// Exact match on a binary path, or `/dir/*` allowing any immediate
/// child of `/dir` (not recursive).
fn match_exec(granted: &str, requested: &str) -> bool {
    if let Some(dir) = granted.strip_suffix("/*") {
        let prefix = format!("{dir}/");
        match requested.strip_prefix(&prefix) {
            Some(rest) => !rest.is_empty() && !rest.contains('/'),
            None => false,
        }
    } else {
        granted == requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants(caps: &[Capability]) -> GrantSet {
        caps.iter().cloned().collect()
    }

    #[test]
    fn deny_by_default_on_empty_grants() {
        let g = GrantSet::new();
        assert!(check(&g, CapabilityKind::Network, "outbound:443").is_err());
    }

    #[test]
    fn network_wildcard_port_matches_any() {
        let g = grants(&[Capability::network("outbound:*")]);
        assert!(check(&g, CapabilityKind::Network, "outbound:80").is_ok());
        assert!(check(&g, CapabilityKind::Network, "outbound:65535").is_ok());
    }

    #[test]
    fn network_list_and_range_match() {
        let g = grants(&[Capability::network("outbound:80,443"), Capability::network("outbound:9000-9100")]);
        assert!(check(&g, CapabilityKind::Network, "outbound:443").is_ok());
        assert!(check(&g, CapabilityKind::Network, "outbound:9050").is_ok());
        assert!(check(&g, CapabilityKind::Network, "outbound:22").is_err());
    }

    #[test]
    fn network_direction_must_match_exactly() {
        let g = grants(&[Capability::network("inbound:80")]);
        assert!(check(&g, CapabilityKind::Network, "outbound:80").is_err());
    }

    #[test]
    fn network_malformed_grant_denies() {
        let g = grants(&[Capability::network("outbound:abc")]);
        assert!(check(&g, CapabilityKind::Network, "outbound:80").is_err());
    }

    #[test]
    fn network_private_sentinel_is_literal() {
        let g = grants(&[Capability::network("outbound:private")]);
        assert!(check(&g, CapabilityKind::Network, "outbound:private").is_ok());
        // Does not leak into numeric port matching.
        assert!(check(&g, CapabilityKind::Network, "outbound:80").is_err());
    }

    #[test]
    fn fs_recursive_prefix_match() {
        let g = grants(&[Capability::fs("read:/etc/**")]);
        assert!(check(&g, CapabilityKind::Fs, "read:/etc/passwd").is_ok());
        assert!(check(&g, CapabilityKind::Fs, "read:/etc/ssl/certs/ca.pem").is_ok());
        assert!(check(&g, CapabilityKind::Fs, "write:/etc/passwd").is_err());
        assert!(check(&g, CapabilityKind::Fs, "read:/var/log/syslog").is_err());
    }

    #[test]
    fn fs_glob_match() {
        let g = grants(&[Capability::fs("read:/data/*.csv")]);
        assert!(check(&g, CapabilityKind::Fs, "read:/data/report.csv").is_ok());
        assert!(check(&g, CapabilityKind::Fs, "read:/data/sub/report.csv").is_err());
    }

    #[test]
    fn env_exact_and_prefix_match() {
        let g = grants(&[Capability::env("HOME"), Capability::env("AWS_*")]);
        assert!(check(&g, CapabilityKind::Env, "HOME").is_ok());
        assert!(check(&g, CapabilityKind::Env, "AWS_SECRET_ACCESS_KEY").is_ok());
        assert!(check(&g, CapabilityKind::Env, "PATH").is_err());
    }

    #[test]
    fn exec_exact_and_dir_wildcard() {
        let g = grants(&[Capability::exec("/usr/bin/curl"), Capability::exec("/usr/local/bin/*")]);
        assert!(check(&g, CapabilityKind::Exec, "/usr/bin/curl").is_ok());
        assert!(check(&g, CapabilityKind::Exec, "/usr/local/bin/terraform").is_ok());
        assert!(check(&g, CapabilityKind::Exec, "/usr/local/bin/sub/terraform").is_err());
        assert!(check(&g, CapabilityKind::Exec, "/usr/bin/wget").is_err());
    }
}
