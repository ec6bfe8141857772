//! netwalk - Enumerate the networks of a MaxMind DB
//!
//! netwalk reads MaxMind DB (MMDB) files, the format used by GeoIP and
//! similar IP intelligence databases, and walks their binary search tree to
//! list every network that has data attached. It also supports point lookups
//! and decoding records into any serde type.
//!
//! # Quick Start
//!
//! ```no_run
//! use netwalk::Reader;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Country {
//!     iso_code: Option<String>,
//! }
//!
//! #[derive(Deserialize)]
//! struct Record {
//!     country: Option<Country>,
//! }
//!
//! let reader = Reader::open("GeoLite2-Country.mmdb")?;
//!
//! // Every network, in ascending address order
//! for network in reader.networks() {
//!     let network = network?;
//!     let record: Record = reader.decode(network.record())?;
//!     let iso = record.country.and_then(|c| c.iso_code);
//!     println!("{} {:?}", network, iso);
//! }
//!
//! // Only part of the address space
//! for network in reader.networks_within("81.2.69.0/24".parse()?)? {
//!     println!("{}", network?);
//! }
//!
//! // Point lookup
//! if let Some((network, record)) = reader.lookup_network::<Record>("81.2.69.142".parse()?)? {
//!     println!("{} {:?}", network, record.country.and_then(|c| c.iso_code));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  MMDB File                           │
//! ├──────────────────────────────────────┤
//! │  1. Search Tree (binary trie)        │  <- mmdb::tree, networks
//! │  2. 16-byte zero separator           │
//! │  3. Data Section                     │  <- data_section
//! │  4. Metadata marker + metadata map   │  <- mmdb::metadata
//! └──────────────────────────────────────┘
//! ```
//!
//! The enumerator in [`networks`] only depends on the [`NodeSource`] and
//! [`RecordSource`] traits, so it can walk any tree that can resolve child
//! pointers, not just MMDB files.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Data section decoding
pub mod data_section;
mod de;
/// Error types
pub mod error;
/// MMDB format implementation
pub mod mmdb;
/// Network and address types
pub mod network;
pub mod networks;
/// Database reader
pub mod reader;

pub use crate::data_section::DataValue;
pub use crate::error::{MmdbError, Result};
pub use crate::mmdb::{IpVersion, Metadata};
pub use crate::network::{canonicalize, Branch, IpNetwork, Network};
pub use crate::networks::{NodeKind, NodeSource, Networks, RecordSource};
pub use crate::reader::{Reader, ReaderBuilder};

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
