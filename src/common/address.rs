//! Address convention shared by every node.
//!
//! Each node is assigned a base port `P`; its consensus endpoint listens on
//! `P*10 + 1` and its coordination endpoint on `P*10 + 2`. Knowing either
//! endpoint mechanically yields the other, which is how the leader's
//! client-facing address is derived from the Raft configuration.

use crate::common::{Error, Result};

/// Consensus (Raft transport) endpoint for a base port.
pub fn consensus_addr(host: &str, base_port: u16) -> String {
    format!("{}:{}", host, consensus_port(base_port))
}

/// Coordination (client-facing) endpoint for a base port.
pub fn coordination_addr(host: &str, base_port: u16) -> String {
    format!("{}:{}", host, coordination_port(base_port))
}

pub fn consensus_port(base_port: u16) -> u32 {
    base_port as u32 * 10 + 1
}

pub fn coordination_port(base_port: u16) -> u32 {
    base_port as u32 * 10 + 2
}

/// Derive the coordination endpoint from a consensus endpoint.
///
/// Example: `127.0.0.1:5001` → `127.0.0.1:5002`. The consensus port must end
/// in `1` per the convention; anything else is rejected.
pub fn coordination_from_consensus(consensus: &str) -> Result<String> {
    let (host, port) = split_host_port(consensus)?;
    match port.strip_suffix('1') {
        Some(stem) if !stem.is_empty() => Ok(format!("{}:{}2", host, stem)),
        _ => Err(Error::InvalidAddress(format!(
            "consensus address must end with '1': {}",
            consensus
        ))),
    }
}

/// Split `host:port`, keeping IPv6 hosts intact by cutting at the last colon.
pub fn split_host_port(addr: &str) -> Result<(&str, &str)> {
    match addr.rfind(':') {
        Some(idx) if idx + 1 < addr.len() => Ok((&addr[..idx], &addr[idx + 1..])),
        _ => Err(Error::InvalidAddress(format!(
            "expected host:port, got: {}",
            addr
        ))),
    }
}
