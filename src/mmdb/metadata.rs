//! MMDB Metadata Parsing
//!
//! The metadata section is a single MMDB data map stored after the last
//! occurrence of [`METADATA_MARKER`] near the end of the file. Only
//! `node_count`, `record_size` and `ip_version` are needed to walk the tree;
//! the remaining descriptive fields are decoded when present.

use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
use crate::data_section::{DataDecoder, DataValue};
use crate::error::MmdbError;
use std::collections::HashMap;
use tracing::debug;

/// The marker is searched for only in this many trailing bytes
const METADATA_SEARCH_SIZE: usize = 128 * 1024;

/// Parsed MMDB metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version of the search tree
    pub ip_version: IpVersion,
    /// Database type string, e.g. "GeoLite2-Country"
    pub database_type: String,
    /// Locale codes for which the database may contain localized data
    pub languages: Vec<String>,
    /// Descriptions keyed by language code
    pub description: HashMap<String, String>,
    /// Binary format major version
    pub binary_format_major_version: u16,
    /// Binary format minor version
    pub binary_format_minor_version: u16,
    /// Build time as seconds since the Unix epoch
    pub build_epoch: u64,
    /// Offset of the metadata marker within the file
    pub marker_offset: usize,
    /// The undecorated metadata map
    pub raw: DataValue,
}

impl Metadata {
    /// Locate and decode the metadata section of an MMDB file
    pub fn from_file(data: &[u8]) -> Result<Self, MmdbError> {
        let marker_offset = find_metadata_marker(data)?;
        let decoder = DataDecoder::new(&data[marker_offset + METADATA_MARKER.len()..]);
        let raw = decoder
            .decode(0)
            .map_err(|e| MmdbError::InvalidMetadata(format!("Failed to decode metadata: {}", e)))?;

        let metadata = Self::from_value(raw, marker_offset)?;
        metadata.check_layout(data)?;

        debug!(
            node_count = metadata.node_count,
            record_size = metadata.record_size as u32,
            ip_version = ?metadata.ip_version,
            database_type = %metadata.database_type,
            "parsed MMDB metadata"
        );

        Ok(metadata)
    }

    fn from_value(raw: DataValue, marker_offset: usize) -> Result<Self, MmdbError> {
        let map = match &raw {
            DataValue::Map(map) => map,
            _ => {
                return Err(MmdbError::InvalidMetadata(
                    "Metadata is not a map".to_string(),
                ))
            }
        };

        let node_count = extract_uint(map, "node_count")?;
        let node_count = u32::try_from(node_count).map_err(|_| {
            MmdbError::InvalidMetadata(format!("node_count {} does not fit in 32 bits", node_count))
        })?;
        let record_size = RecordSize::from_bits(extract_uint(map, "record_size")?)?;
        let ip_version = IpVersion::from_number(extract_uint(map, "ip_version")?)?;

        let database_type = map
            .get("database_type")
            .and_then(DataValue::as_str)
            .unwrap_or_default()
            .to_string();

        let languages = match map.get("languages") {
            Some(DataValue::Array(items)) => items
                .iter()
                .filter_map(DataValue::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        let description = match map.get("description") {
            Some(DataValue::Map(entries)) => entries
                .iter()
                .filter_map(|(lang, text)| Some((lang.clone(), text.as_str()?.to_string())))
                .collect(),
            _ => HashMap::new(),
        };

        Ok(Metadata {
            node_count,
            record_size,
            ip_version,
            database_type,
            languages,
            description,
            binary_format_major_version: optional_u16(map, "binary_format_major_version")?,
            binary_format_minor_version: optional_u16(map, "binary_format_minor_version")?,
            build_epoch: map.get("build_epoch").and_then(DataValue::as_u64).unwrap_or(0),
            marker_offset,
            raw,
        })
    }

    /// Size of the search tree in bytes
    pub fn tree_size(&self) -> usize {
        self.node_count as usize * self.record_size.node_bytes()
    }

    /// Offset of the data section within the file
    pub fn data_section_start(&self) -> usize {
        self.tree_size() + DATA_SECTION_SEPARATOR_SIZE
    }

    // The tree and separator must fit before the metadata marker
    fn check_layout(&self, data: &[u8]) -> Result<(), MmdbError> {
        let tree_size = self.tree_size();
        let data_start = self.data_section_start();
        if data_start > self.marker_offset {
            return Err(MmdbError::InvalidDatabase(format!(
                "Search tree of {} bytes does not fit before metadata at offset {}",
                tree_size, self.marker_offset
            )));
        }

        if data[tree_size..data_start].iter().any(|&b| b != 0) {
            return Err(MmdbError::InvalidDatabase(format!(
                "Data section separator at offset {} is not zeroed",
                tree_size
            )));
        }

        Ok(())
    }
}

/// Find the metadata marker in an MMDB file
///
/// The marker appears somewhere in the last 128KB of the file. If there
/// are multiple markers, the LAST one wins (as in libmaxminddb).
pub fn find_metadata_marker(data: &[u8]) -> Result<usize, MmdbError> {
    let search_start = data.len().saturating_sub(METADATA_SEARCH_SIZE);

    memchr::memmem::rfind(&data[search_start..], METADATA_MARKER)
        .map(|pos| search_start + pos)
        .ok_or(MmdbError::MetadataNotFound)
}

fn extract_uint(map: &HashMap<String, DataValue>, key: &str) -> Result<u64, MmdbError> {
    match map.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            MmdbError::InvalidMetadata(format!("Field '{}' is not an unsigned integer", key))
        }),
        None => Err(MmdbError::InvalidMetadata(format!(
            "Required field '{}' not found",
            key
        ))),
    }
}

// Absent fields read as 0; present ones must be unsigned and fit in 16 bits
fn optional_u16(map: &HashMap<String, DataValue>, key: &str) -> Result<u16, MmdbError> {
    if !map.contains_key(key) {
        return Ok(0);
    }
    let value = extract_uint(map, key)?;
    u16::try_from(value).map_err(|_| {
        MmdbError::InvalidMetadata(format!("Field '{}' value {} does not fit in 16 bits", key, value))
    })
}
