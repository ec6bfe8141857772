//! MaxMind DB (MMDB) format support
//!
//! - **types**: MMDB-specific types and constants
//! - **metadata**: Metadata marker search and decoding
//! - **tree**: Search tree node decoding and lookups
//!
//! Data decoding lives in `crate::data_section`, shared by the metadata
//! parser and record decoding.

pub mod metadata;
pub mod tree;
pub mod types;

pub use metadata::{find_metadata_marker, Metadata};
pub use tree::{LookupResult, SearchTree, TreeHeader, TreePosition};
pub use types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
