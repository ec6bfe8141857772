//! Network and address types shared by the search tree and the enumerator

use crate::error::MmdbError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Which child of a search tree node to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// The "0" bit
    Left = 0,
    /// The "1" bit
    Right = 1,
}

impl Branch {
    /// Branch for an address bit (any non-zero value is the right branch)
    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            Branch::Left
        } else {
            Branch::Right
        }
    }
}

/// Normalize a 16-byte IPv4-mapped (`::ffff:a.b.c.d`) or IPv4-compatible
/// (`::a.b.c.d`) address to its 4-byte form.
///
/// Any other input is returned unchanged. Note that `::` itself matches the
/// compatible form and becomes `0.0.0.0`.
pub fn canonicalize(addr: &[u8]) -> &[u8] {
    if addr.len() != 16 {
        return addr;
    }

    let mapped = addr[..10].iter().all(|&b| b == 0) && addr[10] == 0xFF && addr[11] == 0xFF;
    let compatible = addr[..12].iter().all(|&b| b == 0);

    if mapped || compatible {
        &addr[12..16]
    } else {
        addr
    }
}

/// An IP network in CIDR form with host bits cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    /// Create a network, clearing any host bits in `addr`
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, MmdbError> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(MmdbError::InvalidIpAddress(format!(
                "prefix length {} exceeds {} for {}",
                prefix_len, max, addr
            )));
        }

        let addr = match addr {
            IpAddr::V4(v4) => {
                let mask = u32::MAX.checked_shl(32 - prefix_len as u32).unwrap_or(0);
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
            }
            IpAddr::V6(v6) => {
                let mask = u128::MAX.checked_shl(128 - prefix_len as u32).unwrap_or(0);
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
            }
        };

        Ok(Self { addr, prefix_len })
    }

    /// Build a network from raw search tree prefix bytes and bit depth
    ///
    /// A 16-byte prefix that canonicalizes to IPv4 and is at least 96 bits
    /// deep becomes an IPv4 network with the depth rebased by 96. Shallower
    /// prefixes stay IPv6, since they cover more than the IPv4 space.
    pub fn from_prefix_bytes(raw: &[u8], bit_depth: u32) -> Result<Self, MmdbError> {
        match raw.len() {
            4 | 16 if bit_depth <= raw.len() as u32 * 8 => Ok(Self::rebase(raw, bit_depth as u8)),
            4 | 16 => Err(MmdbError::InvalidIpAddress(format!(
                "bit depth {} exceeds a {}-byte prefix",
                bit_depth,
                raw.len()
            ))),
            len => Err(MmdbError::InvalidIpAddress(format!(
                "prefix of {} bytes is neither IPv4 nor IPv6",
                len
            ))),
        }
    }

    // Caller guarantees a 4- or 16-byte prefix and an in-range depth
    pub(crate) fn rebase(raw: &[u8], bit_depth: u8) -> Self {
        let canonical = canonicalize(raw);
        if let Ok(octets) = <[u8; 4]>::try_from(canonical) {
            if raw.len() == 4 {
                return Self::masked(IpAddr::from(octets), bit_depth);
            }
            if bit_depth >= 96 {
                return Self::masked(IpAddr::from(octets), bit_depth - 96);
            }
        }

        let mut octets = [0u8; 16];
        octets.copy_from_slice(raw);
        Self::masked(IpAddr::from(octets), bit_depth)
    }

    fn masked(addr: IpAddr, prefix_len: u8) -> Self {
        match Self::new(addr, prefix_len) {
            Ok(network) => network,
            // Lengths are bounded by the address width above
            Err(_) => Self { addr, prefix_len },
        }
    }

    /// Network address
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length in bits
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether this is an IPv4 network
    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// Whether `ip` falls inside this network (families must match)
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                Self::masked(ip, self.prefix_len).addr == self.addr
            }
            _ => false,
        }
    }

    /// Last address in the network
    pub fn broadcast(&self) -> IpAddr {
        match self.addr {
            IpAddr::V4(v4) => {
                let host = u32::MAX.checked_shr(self.prefix_len as u32).unwrap_or(0);
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) | host))
            }
            IpAddr::V6(v6) => {
                let host = u128::MAX.checked_shr(self.prefix_len as u32).unwrap_or(0);
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) | host))
            }
        }
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for IpNetwork {
    type Err = MmdbError;

    /// Parse `addr/len`, or a bare address as a host network
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MmdbError::InvalidIpAddress(s.to_string());

        match s.split_once('/') {
            Some((addr, len)) => {
                let addr: IpAddr = addr.trim().parse().map_err(|_| invalid())?;
                let len: u8 = len.trim().parse().map_err(|_| invalid())?;
                Self::new(addr, len)
            }
            None => {
                let addr: IpAddr = s.trim().parse().map_err(|_| invalid())?;
                let len = if addr.is_ipv4() { 32 } else { 128 };
                Self::new(addr, len)
            }
        }
    }
}

/// A network found while enumerating the search tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub(crate) prefix: [u8; 16],
    pub(crate) width: u8,
    pub(crate) prefix_len: u8,
    pub(crate) record: u32,
}

impl Network {
    /// Canonical prefix bytes (4 bytes for IPv4-shaped addresses)
    pub fn prefix_bytes(&self) -> &[u8] {
        canonicalize(self.raw_prefix())
    }

    /// Prefix bytes in the tree's native address width
    pub fn raw_prefix(&self) -> &[u8] {
        &self.prefix[..self.width as usize]
    }

    /// Number of bits fixed along the tree path
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Opaque record handle, resolved through a `RecordSource`
    pub fn record(&self) -> u32 {
        self.record
    }

    /// The network as a CIDR
    pub fn ip_network(&self) -> IpNetwork {
        IpNetwork::rebase(self.raw_prefix(), self.prefix_len)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ip_network().fmt(f)
    }
}
