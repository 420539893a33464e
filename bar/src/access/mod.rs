//! Subnet based access control.
//!
//! Every request is checked against the enabled IP restrictions before it
//! reaches a route. Addresses and subnets are compared as 32-bit integers
//! (big-endian octet order) under the subnet's prefix mask. Anything that does
//! not parse as IPv4 never matches, so a bad row or an IPv6 client can not
//! lock anybody out.

use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

use common::api::Restriction;
use log::warn;
use thiserror::Error;

/// Page served instead of the application when a restriction matches.
pub const ACCESS_CLOSED_PAGE: &str = include_str!("closed.html");

const MAPPED_V4_PREFIX: &str = "::ffff:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("not a dotted-quad IPv4 address: {0:?}")]
    Malformed(String),

    #[error("not a CIDR subnet: {0:?}")]
    MalformedSubnet(String),

    #[error("prefix length {0} is outside 0-32")]
    PrefixOutOfRange(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    address: u32,
    prefix_len: u32,
}

impl Subnet {
    pub fn mask(&self) -> u32 {
        // a zero-width prefix shifts every bit out and matches everything
        u32::MAX.checked_shl(32 - self.prefix_len).unwrap_or(0)
    }

    pub fn contains(&self, address: u32) -> bool {
        let mask = self.mask();
        address & mask == self.address & mask
    }
}

impl FromStr for Subnet {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| AddressError::MalformedSubnet(s.to_string()))?;
        let prefix_len = prefix
            .parse::<u32>()
            .map_err(|_| AddressError::MalformedSubnet(s.to_string()))?;
        if prefix_len > 32 {
            return Err(AddressError::PrefixOutOfRange(prefix_len));
        }
        Ok(Subnet {
            address: parse_ipv4(address)?,
            prefix_len,
        })
    }
}

pub fn parse_ipv4(address: &str) -> Result<u32, AddressError> {
    Ipv4Addr::from_str(address.trim())
        .map(u32::from)
        .map_err(|_| AddressError::Malformed(address.to_string()))
}

/// Picks the address a request is checked under: the first entry of
/// `X-Forwarded-For`, then `X-Real-IP`, then the peer of the connection.
pub fn resolve_client_address(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<SocketAddr>,
) -> Option<String> {
    let resolved = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| real_ip.map(str::trim).filter(|value| !value.is_empty()))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))?;
    Some(strip_mapped_prefix(&resolved).to_string())
}

fn strip_mapped_prefix(address: &str) -> &str {
    match address.get(..MAPPED_V4_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(MAPPED_V4_PREFIX) => {
            &address[MAPPED_V4_PREFIX.len()..]
        }
        _ => address,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision<'a> {
    Allow,
    Deny(&'a Restriction),
}

/// Denies on the first enabled restriction whose subnet holds `candidate`.
pub fn evaluate<'a>(candidate: &str, restrictions: &'a [Restriction]) -> Decision<'a> {
    let mut enabled = restrictions.iter().filter(|r| r.enabled).peekable();
    if enabled.peek().is_none() {
        return Decision::Allow;
    }

    let address = match parse_ipv4(strip_mapped_prefix(candidate)) {
        Ok(address) => address,
        Err(e) => {
            warn!("skipping access check: {}", e);
            return Decision::Allow;
        }
    };

    for restriction in enabled {
        match restriction.subnet.parse::<Subnet>() {
            Ok(subnet) if subnet.contains(address) => return Decision::Deny(restriction),
            Ok(_) => {}
            Err(e) => warn!(
                "ignoring ip restriction {} ({}): {}",
                restriction.id, restriction.subnet, e
            ),
        }
    }
    Decision::Allow
}
