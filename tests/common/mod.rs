//! Builds small but complete MMDB files for integration tests
//!
//! Networks are inserted into an in-memory binary trie which is then
//! serialized with the requested record size, followed by the zeroed
//! separator, the data section, the metadata marker and the metadata map.
//! Insert broader networks before the networks they contain.

#![allow(dead_code)]

use netwalk::{DataValue, IpNetwork};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

const MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

#[derive(Debug, Clone, Copy)]
enum Slot {
    Empty,
    Node(usize),
    Data(usize),
    Raw(u32),
}

pub struct MmdbWriter {
    ip_version: u16,
    record_size: u16,
    database_type: String,
    nodes: Vec<[Slot; 2]>,
    data: Vec<u8>,
}

impl MmdbWriter {
    pub fn new(ip_version: u16) -> Self {
        assert!(ip_version == 4 || ip_version == 6);
        Self {
            ip_version,
            record_size: 24,
            database_type: "netwalk-test".to_string(),
            nodes: vec![[Slot::Empty, Slot::Empty]],
            data: Vec::new(),
        }
    }

    pub fn record_size(mut self, bits: u16) -> Self {
        assert!(matches!(bits, 24 | 28 | 32));
        self.record_size = bits;
        self
    }

    pub fn database_type(mut self, name: &str) -> Self {
        self.database_type = name.to_string();
        self
    }

    /// Append a value to the data section, returning its offset
    pub fn add_data(&mut self, value: &DataValue) -> usize {
        let offset = self.data.len();
        encode(value, &mut self.data);
        offset
    }

    /// Insert a network pointing at a new data value
    pub fn insert(&mut self, cidr: &str, value: DataValue) -> usize {
        let offset = self.add_data(&value);
        self.insert_offset(cidr, offset);
        offset
    }

    /// Insert a network pointing at an existing data offset
    pub fn insert_offset(&mut self, cidr: &str, offset: usize) {
        let (bytes, bits) = self.tree_bits(cidr);
        assert!(bits > 0, "the root cannot hold a record");

        let mut node = 0;
        for depth in 0..bits {
            let bit = ((bytes[depth / 8] >> (7 - depth % 8)) & 1) as usize;
            if depth == bits - 1 {
                self.nodes[node][bit] = Slot::Data(offset);
                return;
            }
            node = match self.nodes[node][bit] {
                Slot::Node(next) => next,
                other => {
                    // A broader record is pushed down into both halves
                    let next = self.nodes.len();
                    self.nodes.push([other, other]);
                    self.nodes[node][bit] = Slot::Node(next);
                    next
                }
            };
        }
    }

    /// Overwrite a child pointer with an arbitrary handle
    pub fn set_raw(&mut self, node: usize, bit: usize, handle: u32) {
        self.nodes[node][bit] = Slot::Raw(handle);
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    fn tree_bits(&self, cidr: &str) -> ([u8; 16], usize) {
        let network: IpNetwork = cidr.parse().expect("valid CIDR");
        let mut bytes = [0u8; 16];
        match (network.addr(), self.ip_version) {
            (IpAddr::V4(addr), 4) => {
                bytes[..4].copy_from_slice(&addr.octets());
                (bytes, network.prefix_len() as usize)
            }
            (IpAddr::V4(addr), _) => {
                bytes[12..].copy_from_slice(&addr.octets());
                (bytes, network.prefix_len() as usize + 96)
            }
            (IpAddr::V6(addr), 6) => (addr.octets(), network.prefix_len() as usize),
            (IpAddr::V6(_), _) => panic!("IPv6 network {} in an IPv4 tree", cidr),
        }
    }

    fn handle(&self, slot: Slot) -> u32 {
        let node_count = self.node_count();
        match slot {
            Slot::Empty => node_count,
            Slot::Node(n) => n as u32,
            Slot::Data(offset) => node_count + 16 + offset as u32,
            Slot::Raw(handle) => handle,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for [left, right] in &self.nodes {
            let (l, r) = (self.handle(*left), self.handle(*right));
            match self.record_size {
                24 => {
                    out.extend_from_slice(&l.to_be_bytes()[1..]);
                    out.extend_from_slice(&r.to_be_bytes()[1..]);
                }
                28 => {
                    out.extend_from_slice(&l.to_be_bytes()[1..]);
                    out.push((((l >> 24) & 0x0F) << 4) as u8 | ((r >> 24) & 0x0F) as u8);
                    out.extend_from_slice(&r.to_be_bytes()[1..]);
                }
                _ => {
                    out.extend_from_slice(&l.to_be_bytes());
                    out.extend_from_slice(&r.to_be_bytes());
                }
            }
        }

        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(MARKER);
        encode(&self.metadata(), &mut out);
        out
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.to_bytes()).expect("write fixture");
    }

    fn metadata(&self) -> DataValue {
        let mut description = HashMap::new();
        description.insert(
            "en".to_string(),
            DataValue::String("netwalk test database".to_string()),
        );

        map(vec![
            ("node_count", DataValue::Uint32(self.node_count())),
            ("record_size", DataValue::Uint16(self.record_size)),
            ("ip_version", DataValue::Uint16(self.ip_version)),
            ("database_type", DataValue::String(self.database_type.clone())),
            (
                "languages",
                DataValue::Array(vec![DataValue::String("en".to_string())]),
            ),
            ("description", DataValue::Map(description)),
            ("binary_format_major_version", DataValue::Uint16(2)),
            ("binary_format_minor_version", DataValue::Uint16(0)),
            ("build_epoch", DataValue::Uint64(1_700_000_000)),
        ])
    }
}

/// Build a map value from key/value pairs
pub fn map(entries: Vec<(&str, DataValue)>) -> DataValue {
    DataValue::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// A record with a single `name` string field
pub fn named(name: &str) -> DataValue {
    map(vec![("name", DataValue::String(name.to_string()))])
}

/// Encode a value in MMDB data section format
pub fn encode(value: &DataValue, out: &mut Vec<u8>) {
    match value {
        DataValue::String(s) => {
            control(out, 2, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        DataValue::Double(d) => {
            control(out, 3, 8);
            out.extend_from_slice(&d.to_be_bytes());
        }
        DataValue::Bytes(b) => {
            control(out, 4, b.len());
            out.extend_from_slice(b);
        }
        DataValue::Uint16(v) => uint(out, 5, *v as u128),
        DataValue::Uint32(v) => uint(out, 6, *v as u128),
        DataValue::Map(entries) => {
            control(out, 7, entries.len());
            let mut keys: Vec<_> = entries.keys().collect();
            keys.sort();
            for key in keys {
                encode(&DataValue::String(key.clone()), out);
                encode(&entries[key], out);
            }
        }
        DataValue::Int32(v) => {
            control(out, 8, 4);
            out.extend_from_slice(&v.to_be_bytes());
        }
        DataValue::Uint64(v) => uint(out, 9, *v as u128),
        DataValue::Uint128(v) => uint(out, 10, *v),
        DataValue::Array(items) => {
            control(out, 11, items.len());
            for item in items {
                encode(item, out);
            }
        }
        DataValue::Bool(b) => control(out, 14, *b as usize),
        DataValue::Float(f) => {
            control(out, 15, 4);
            out.extend_from_slice(&f.to_be_bytes());
        }
    }
}

fn uint(out: &mut Vec<u8>, type_id: u8, value: u128) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    control(out, type_id, bytes.len() - skip);
    out.extend_from_slice(&bytes[skip..]);
}

fn control(out: &mut Vec<u8>, type_id: u8, size: usize) {
    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 29 + 256 {
        (29, vec![(size - 29) as u8])
    } else if size < 29 + 256 + 65536 {
        let v = size - 285;
        (30, vec![(v >> 8) as u8, v as u8])
    } else {
        let v = size - 65821;
        (31, vec![(v >> 16) as u8, (v >> 8) as u8, v as u8])
    };

    if type_id <= 7 {
        out.push((type_id << 5) | size_bits);
    } else {
        out.push(size_bits);
        out.push(type_id - 7);
    }
    out.extend_from_slice(&extra);
}
