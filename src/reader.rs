//! MMDB file reader
//!
//! Opens an MMDB file (memory-mapped or fully loaded), parses its metadata
//! and exposes lookups and network enumeration over the search tree.

use crate::data_section::{DataDecoder, DataValue};
use crate::error::{MmdbError, Result};
use crate::mmdb::{IpVersion, Metadata, SearchTree, TreeHeader};
use crate::network::{Branch, IpNetwork};
use crate::networks::{NodeSource, Networks, RecordSource};
use memmap2::Mmap;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage for database data - either owned or memory-mapped
enum DatabaseStorage {
    Owned(Vec<u8>),
    Mmap(Mmap),
}

impl DatabaseStorage {
    fn as_slice(&self) -> &[u8] {
        match self {
            DatabaseStorage::Owned(v) => v.as_slice(),
            DatabaseStorage::Mmap(m) => &m[..],
        }
    }
}

/// Options for opening a database file
///
/// ```no_run
/// use netwalk::Reader;
///
/// let reader = Reader::builder("GeoLite2-City.mmdb").mmap(false).open()?;
/// # Ok::<(), netwalk::MmdbError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ReaderBuilder {
    path: PathBuf,
    mmap: bool,
}

impl ReaderBuilder {
    /// Memory-map the file (default) or read it fully into memory
    pub fn mmap(mut self, enabled: bool) -> Self {
        self.mmap = enabled;
        self
    }

    /// Open the database with the configured options
    pub fn open(self) -> Result<Reader> {
        let path = self.path.display().to_string();
        let storage = if self.mmap {
            let file = File::open(&self.path)
                .map_err(|e| MmdbError::Io(format!("Failed to open {}: {}", path, e)))?;
            // SAFETY: the mapping is read-only; the file must not be truncated while open
            let mmap = unsafe { Mmap::map(&file) }
                .map_err(|e| MmdbError::Io(format!("Failed to mmap {}: {}", path, e)))?;
            DatabaseStorage::Mmap(mmap)
        } else {
            let bytes = std::fs::read(&self.path)
                .map_err(|e| MmdbError::Io(format!("Failed to read {}: {}", path, e)))?;
            DatabaseStorage::Owned(bytes)
        };

        debug!(path = %path, size = storage.as_slice().len(), mmap = self.mmap, "opened database");
        Reader::from_storage(storage)
    }
}

/// Read-only MMDB database
///
/// A `Reader` is immutable once opened, so any number of [`Networks`]
/// iterators and lookups may run against it at the same time, including
/// from several threads.
pub struct Reader {
    data: DatabaseStorage,
    metadata: Metadata,
    header: TreeHeader,
}

impl Reader {
    /// Open a database file using memory mapping
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::builder(path).open()
    }

    /// Configure how a database file is opened
    pub fn builder<P: AsRef<Path>>(path: P) -> ReaderBuilder {
        ReaderBuilder {
            path: path.as_ref().to_path_buf(),
            mmap: true,
        }
    }

    /// Create a reader from an in-memory database image
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_storage(DatabaseStorage::Owned(data))
    }

    fn from_storage(storage: DatabaseStorage) -> Result<Self> {
        let data = storage.as_slice();
        let metadata = Metadata::from_file(data)?;
        let header = TreeHeader::new(&metadata);

        Ok(Self {
            data: storage,
            metadata,
            header,
        })
    }

    /// Parsed database metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn tree(&self) -> SearchTree<'_> {
        SearchTree::new(self.data.as_slice(), &self.header)
    }

    fn data_section(&self) -> &[u8] {
        &self.data.as_slice()[self.metadata.data_section_start()..self.metadata.marker_offset]
    }

    /// Look up the record for an IP address
    ///
    /// Returns `Ok(None)` when the address is not in the database.
    pub fn lookup<T: DeserializeOwned>(&self, ip: IpAddr) -> Result<Option<T>> {
        Ok(self.lookup_network(ip)?.map(|(_, record)| record))
    }

    /// Look up the record for an IP address together with its network
    pub fn lookup_network<T: DeserializeOwned>(&self, ip: IpAddr) -> Result<Option<(IpNetwork, T)>> {
        let found = match self.tree().lookup(ip)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let network = IpNetwork::new(ip, found.prefix_len)?;
        Ok(Some((network, self.decode(found.record)?)))
    }

    /// Look up an IP address and return its record as a generic value
    pub fn lookup_value(&self, ip: IpAddr) -> Result<Option<(IpNetwork, DataValue)>> {
        let found = match self.tree().lookup(ip)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let network = IpNetwork::new(ip, found.prefix_len)?;
        Ok(Some((network, self.record_value(found.record)?)))
    }

    /// Decode the data a record handle points at
    pub fn decode<T: DeserializeOwned>(&self, record: u32) -> Result<T> {
        self.decode_record(record)
    }

    /// Iterate over every network in the database
    pub fn networks(&self) -> Networks<'_, Self> {
        Networks::new(self)
    }

    /// Iterate over the networks inside `network`
    ///
    /// If a record covers a larger network containing `network`, that record
    /// network is the only one yielded. IPv4 networks in an IPv6 database
    /// are enumerated below `::/96`.
    pub fn networks_within(&self, network: IpNetwork) -> Result<Networks<'_, Self>> {
        let (position, prefix) = self.tree().locate(&network)?;
        debug!(%network, handle = position.handle, depth = position.depth, "located subtree");
        Ok(Networks::starting_at(self, prefix, position.depth, position.handle))
    }
}

impl NodeSource for Reader {
    fn node_count(&self) -> u32 {
        self.header.node_count
    }

    fn ip_version(&self) -> IpVersion {
        self.header.ip_version
    }

    fn resolve_child(&self, node: u32, branch: Branch) -> Result<u32> {
        self.tree().resolve_child(node, branch)
    }
}

impl RecordSource for Reader {
    fn record_value(&self, record: u32) -> Result<DataValue> {
        let offset = self.tree().record_offset(record)?;
        DataDecoder::new(self.data_section()).decode(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file() {
        let err = Reader::open("/nonexistent/netwalk-test.mmdb").err().unwrap();
        assert!(matches!(err, MmdbError::Io(ref msg) if msg.contains("Failed to open")));

        let err = Reader::builder("/nonexistent/netwalk-test.mmdb")
            .mmap(false)
            .open()
            .err()
            .unwrap();
        assert!(matches!(err, MmdbError::Io(ref msg) if msg.contains("Failed to read")));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let err = Reader::from_bytes(b"definitely not an mmdb".to_vec()).err().unwrap();
        assert_eq!(err, MmdbError::MetadataNotFound);
    }

    #[test]
    fn test_reader_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Reader>();
    }
}
