/// Error types for the netwalk library
use std::fmt;

/// Result type alias for netwalk operations
pub type Result<T> = std::result::Result<T, MmdbError>;

/// Main error type for reading and enumerating MMDB files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmdbError {
    /// I/O errors
    Io(String),

    /// Metadata marker not found
    MetadataNotFound,

    /// Invalid metadata structure
    InvalidMetadata(String),

    /// Structurally invalid database (bad node index, truncated tree, ...)
    InvalidDatabase(String),

    /// Search tree descends deeper than the address width allows
    InvalidSearchTree {
        /// Prefix bytes accumulated when the overflow was detected
        prefix: Vec<u8>,
        /// Bit depth at which the overflow was detected
        bit_depth: u32,
    },

    /// Data decoding error (malformed data or shape mismatch)
    Decode(String),

    /// Invalid IP address or network for this database
    InvalidIpAddress(String),
}

impl fmt::Display for MmdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmdbError::Io(msg) => write!(f, "I/O error: {}", msg),
            MmdbError::MetadataNotFound => write!(f, "MMDB metadata marker not found"),
            MmdbError::InvalidMetadata(msg) => write!(f, "Invalid metadata: {}", msg),
            MmdbError::InvalidDatabase(msg) => write!(f, "Invalid database: {}", msg),
            MmdbError::InvalidSearchTree { prefix, bit_depth } => {
                write!(f, "Invalid search tree at {}/{}", format_prefix(prefix), bit_depth)
            }
            MmdbError::Decode(msg) => write!(f, "Data decode error: {}", msg),
            MmdbError::InvalidIpAddress(msg) => write!(f, "Invalid IP address: {}", msg),
        }
    }
}

impl std::error::Error for MmdbError {}

impl From<std::io::Error> for MmdbError {
    fn from(err: std::io::Error) -> Self {
        MmdbError::Io(err.to_string())
    }
}

// Render the raw prefix the way an address of that width would print
fn format_prefix(prefix: &[u8]) -> String {
    use std::net::{Ipv4Addr, Ipv6Addr};

    if let Ok(octets) = <[u8; 4]>::try_from(prefix) {
        Ipv4Addr::from(octets).to_string()
    } else if let Ok(octets) = <[u8; 16]>::try_from(prefix) {
        Ipv6Addr::from(octets).to_string()
    } else {
        format!("{:02x?}", prefix)
    }
}
