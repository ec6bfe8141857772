//! MMDB Search Tree
//!
//! Decodes the compact node layout of the search tree. Each node contains
//! two records (left and right) that point to either:
//! - Another node (continue traversal)
//! - A data section offset (found)
//! - A "not found" marker (equal to the node count)

use super::metadata::Metadata;
use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use crate::error::MmdbError;
use crate::network::{Branch, IpNetwork};
use crate::networks::NodeSource;
use std::net::IpAddr;
use std::sync::OnceLock;

/// Result of an IP lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// Record handle (pointer into the data section)
    pub record: u32,
    /// Network prefix length, relative to the queried address family
    pub prefix_len: u8,
}

/// Where a walk along an address stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreePosition {
    /// Pointer value reached (node, empty marker, or record)
    pub handle: u32,
    /// Number of tree bits consumed from the root
    pub depth: u32,
}

/// Search tree shape, computed once per database
#[derive(Debug, Clone)]
pub struct TreeHeader {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes
    pub tree_size: usize,
    // Position reached after 96 zero bits, resolved on the first IPv4 query
    ipv4_start: OnceLock<TreePosition>,
}

impl TreeHeader {
    /// Derive the tree header from metadata
    pub fn new(metadata: &Metadata) -> Self {
        TreeHeader {
            node_count: metadata.node_count,
            record_size: metadata.record_size,
            ip_version: metadata.ip_version,
            tree_size: metadata.tree_size(),
            ipv4_start: OnceLock::new(),
        }
    }
}

/// Search tree view over the raw file bytes
pub struct SearchTree<'a> {
    /// The raw file data containing the tree
    data: &'a [u8],
    /// Parsed header information
    header: &'a TreeHeader,
}

impl<'a> SearchTree<'a> {
    /// Create a new search tree
    pub fn new(data: &'a [u8], header: &'a TreeHeader) -> Self {
        Self { data, header }
    }

    /// Look up an IP address
    ///
    /// IPv4 addresses in an IPv6 tree are looked up below `::/96` and report
    /// an IPv4 prefix length. IPv6 addresses cannot be looked up in an IPv4
    /// tree.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<LookupResult>, MmdbError> {
        let (position, rebase) = match (ip, self.header.ip_version) {
            (IpAddr::V4(addr), IpVersion::V4) => {
                (self.walk(&addr.octets(), 32, TreePosition { handle: 0, depth: 0 })?, 0)
            }
            (IpAddr::V4(addr), IpVersion::V6) => {
                let start = self.ipv4_start()?;
                (self.walk(&addr.octets(), 32, start)?, start.depth)
            }
            (IpAddr::V6(addr), IpVersion::V6) => {
                (self.walk(&addr.octets(), 128, TreePosition { handle: 0, depth: 0 })?, 0)
            }
            (IpAddr::V6(addr), IpVersion::V4) => {
                return Err(MmdbError::InvalidIpAddress(format!(
                    "cannot look up {} in an IPv4-only database",
                    addr
                )))
            }
        };

        let node_count = self.header.node_count;
        if position.handle == node_count {
            return Ok(None);
        }
        if position.handle < node_count {
            return Err(MmdbError::InvalidDatabase(format!(
                "search tree ends in node {} at depth {}",
                position.handle, position.depth
            )));
        }

        Ok(Some(LookupResult {
            record: position.handle,
            prefix_len: position.depth.saturating_sub(rebase) as u8,
        }))
    }

    /// Walk down the tree along a network's prefix bits
    ///
    /// Stops early when a record or the empty marker is reached. An IPv4
    /// network in an IPv6 tree is placed below `::/96`. Returns the position
    /// and the prefix bytes (in the tree's width) of the bits consumed.
    pub fn locate(&self, network: &IpNetwork) -> Result<(TreePosition, [u8; 16]), MmdbError> {
        let mut bytes = [0u8; 16];
        let bits = match (network.addr(), self.header.ip_version) {
            (IpAddr::V4(addr), IpVersion::V4) => {
                bytes[..4].copy_from_slice(&addr.octets());
                network.prefix_len() as u32
            }
            (IpAddr::V4(addr), IpVersion::V6) => {
                bytes[12..].copy_from_slice(&addr.octets());
                network.prefix_len() as u32 + 96
            }
            (IpAddr::V6(addr), IpVersion::V6) => {
                bytes = addr.octets();
                network.prefix_len() as u32
            }
            (IpAddr::V6(_), IpVersion::V4) => {
                return Err(MmdbError::InvalidIpAddress(format!(
                    "cannot enumerate {} in an IPv4-only database",
                    network
                )))
            }
        };

        let position = self.walk(&bytes, bits, TreePosition { handle: 0, depth: 0 })?;
        clear_bits_from(&mut bytes, position.depth);
        Ok((position, bytes))
    }

    /// Node reached by the `::/96` prefix that holds IPv4 space in an IPv6 tree
    ///
    /// Resolved lazily so a damaged IPv4 subtree only affects IPv4 queries.
    fn ipv4_start(&self) -> Result<TreePosition, MmdbError> {
        if let Some(start) = self.header.ipv4_start.get() {
            return Ok(*start);
        }
        let start = self.walk(&[0u8; 12], 96, TreePosition { handle: 0, depth: 0 })?;
        Ok(*self.header.ipv4_start.get_or_init(|| start))
    }

    /// Follow `bits` address bits from `start`, stopping at a non-node
    fn walk(&self, address: &[u8], bits: u32, start: TreePosition) -> Result<TreePosition, MmdbError> {
        let mut position = start;
        let mut consumed = 0u32;

        while consumed < bits && position.handle < self.header.node_count {
            let bit = (address[(consumed >> 3) as usize] >> (7 - consumed % 8)) & 1;
            position.handle = self.read_record(position.handle, Branch::from_bit(bit))?;
            position.depth += 1;
            consumed += 1;
        }

        Ok(position)
    }

    /// Offset of a record's data relative to the data section start
    ///
    /// Per the MMDB spec: data_offset = (record - node_count) - 16.
    pub fn record_offset(&self, record: u32) -> Result<usize, MmdbError> {
        (record as usize)
            .checked_sub(self.header.node_count as usize + DATA_SECTION_SEPARATOR_SIZE)
            .ok_or_else(|| {
                MmdbError::InvalidDatabase(format!(
                    "Record {} is not a data pointer (node_count = {})",
                    record, self.header.node_count
                ))
            })
    }

    /// Read a record from a node
    fn read_record(&self, node: u32, branch: Branch) -> Result<u32, MmdbError> {
        if node >= self.header.node_count {
            return Err(MmdbError::InvalidDatabase(format!(
                "Node index {} exceeds node count {}",
                node, self.header.node_count
            )));
        }

        let node_bytes = self.header.record_size.node_bytes();
        let offset = node as usize * node_bytes;
        let bytes = self
            .data
            .get(offset..offset + node_bytes)
            .filter(|_| offset + node_bytes <= self.header.tree_size)
            .ok_or_else(|| {
                MmdbError::InvalidDatabase(format!(
                    "Node {} at offset {} exceeds tree size {}",
                    node, offset, self.header.tree_size
                ))
            })?;

        let be = |b: &[u8]| b.iter().fold(0u32, |acc, &x| (acc << 8) | x as u32);

        Ok(match (self.header.record_size, branch) {
            (RecordSize::Bits24, Branch::Left) => be(&bytes[0..3]),
            (RecordSize::Bits24, Branch::Right) => be(&bytes[3..6]),
            // Middle byte holds the high nibble of each record
            (RecordSize::Bits28, Branch::Left) => ((bytes[3] as u32 & 0xF0) << 20) | be(&bytes[0..3]),
            (RecordSize::Bits28, Branch::Right) => ((bytes[3] as u32 & 0x0F) << 24) | be(&bytes[4..7]),
            (RecordSize::Bits32, Branch::Left) => be(&bytes[0..4]),
            (RecordSize::Bits32, Branch::Right) => be(&bytes[4..8]),
        })
    }
}

impl NodeSource for SearchTree<'_> {
    fn node_count(&self) -> u32 {
        self.header.node_count
    }

    fn ip_version(&self) -> IpVersion {
        self.header.ip_version
    }

    fn resolve_child(&self, node: u32, branch: Branch) -> Result<u32, MmdbError> {
        self.read_record(node, branch)
    }
}

fn clear_bits_from(bytes: &mut [u8; 16], depth: u32) {
    for (i, byte) in bytes.iter_mut().enumerate() {
        let start = i as u32 * 8;
        if depth <= start {
            *byte = 0;
        } else if depth < start + 8 {
            *byte &= 0xFFu8 << (8 - (depth - start));
        }
    }
}
