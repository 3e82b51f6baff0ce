//! Network utility functions
//!
//! This module provides address helpers shared by the listener, the dialer
//! and the configuration validator.

use std::net::SocketAddr;
use std::str::FromStr;
use tokio::net::lookup_host;

use super::error::{SniffError, Result};

/// Networks understood by `listen_any` and `dial`
pub const SUPPORTED_NETWORKS: &[&str] = &["tcp", "tcp4", "tcp6", "unix"];

/// Resolve a TCP address for the given network
///
/// Literal addresses are used directly, anything else goes through name
/// resolution. `tcp4` and `tcp6` only accept addresses of their family;
/// plain `tcp` takes the first result.
///
/// # Arguments
///
/// * `network` - `tcp`, `tcp4` or `tcp6`
/// * `addr` - The address string to resolve, `host:port`
///
/// # Returns
///
/// The resolved `SocketAddr`
pub async fn resolve_addr(network: &str, addr: &str) -> Result<SocketAddr> {
    let wanted = |a: &SocketAddr| match network {
        "tcp4" => a.is_ipv4(),
        "tcp6" => a.is_ipv6(),
        _ => true,
    };

    if let Ok(socket_addr) = SocketAddr::from_str(addr) {
        if wanted(&socket_addr) {
            return Ok(socket_addr);
        }
        return Err(SniffError::Config(format!(
            "Address {} does not belong to network {}", addr, network
        )));
    }

    let mut addrs = lookup_host(addr).await
        .map_err(|e| SniffError::Config(format!("Failed to resolve address {}: {}", addr, e)))?;
    addrs
        .find(wanted)
        .ok_or_else(|| SniffError::Config(format!(
            "No {} address found for {}", network, addr
        )))
}

/// Format a listener as `network://address`
pub fn format_listen_url(network: &str, addr: &str) -> String {
    format!("{}://{}", network, addr)
}

/// Split a `network://address` string into its network and address parts
///
/// The network is lower-cased and must be one of [`SUPPORTED_NETWORKS`].
pub fn parse_listen_url(url: &str) -> Result<(String, String)> {
    let (network, addr) = url
        .split_once("://")
        .ok_or_else(|| SniffError::Config(format!(
            "Invalid listen URL {}: expected network://address", url
        )))?;

    let network = network.to_ascii_lowercase();
    if !SUPPORTED_NETWORKS.contains(&network.as_str()) {
        return Err(SniffError::UnsupportedNetwork(network));
    }
    if addr.is_empty() {
        return Err(SniffError::Config(format!("Invalid listen URL {}: empty address", url)));
    }

    Ok((network, addr.to_string()))
}
