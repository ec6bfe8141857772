//! Search tree enumeration
//!
//! Walks every record reachable from the root of an MMDB search tree and
//! reports the network each one covers. The walk is an iterative preorder
//! traversal: the left spine is followed in place while right subtrees are
//! pushed onto an explicit stack, so networks come out in ascending address
//! order and memory use is bounded by the tree depth (at most 128 frames)
//! rather than the call stack.
//!
//! Node resolution and record decoding are delegated to the [`NodeSource`]
//! and [`RecordSource`] traits, which [`Reader`](crate::Reader) implements
//! for real MMDB files.
//!
//! # Example
//!
//! ```no_run
//! use netwalk::Reader;
//!
//! let reader = Reader::open("GeoLite2-Country.mmdb")?;
//! for network in reader.networks() {
//!     let network = network?;
//!     let data: serde_json::Value = reader.decode(network.record())?;
//!     println!("{} {}", network, data);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::data_section::DataValue;
use crate::error::{MmdbError, Result};
use crate::mmdb::IpVersion;
use crate::network::{canonicalize, Branch, IpNetwork, Network};
use serde::de::DeserializeOwned;
use std::iter::FusedIterator;
use tracing::{trace, warn};

/// Resolves child pointers of search tree nodes
pub trait NodeSource {
    /// Number of internal nodes; handles at or above it are not nodes
    fn node_count(&self) -> u32;

    /// Address family of the tree
    fn ip_version(&self) -> IpVersion;

    /// Read the child pointer of `node` on the given branch
    fn resolve_child(&self, node: u32, branch: Branch) -> Result<u32>;
}

/// Decodes the data a record handle points at
pub trait RecordSource {
    /// Decode the record as a generic value
    fn record_value(&self, record: u32) -> Result<DataValue>;

    /// Decode the record into a caller-chosen shape
    fn decode_record<T: DeserializeOwned>(&self, record: u32) -> Result<T> {
        <T as serde::Deserialize>::deserialize(self.record_value(record)?)
    }
}

/// What a pointer value refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// An internal node with two children
    Internal(u32),
    /// The "no data" terminator
    Empty,
    /// A pointer into the data section
    Record(u32),
}

impl NodeKind {
    /// Classify a pointer value against the tree's node count
    pub fn classify(handle: u32, node_count: u32) -> Self {
        use std::cmp::Ordering;

        match handle.cmp(&node_count) {
            Ordering::Less => NodeKind::Internal(handle),
            Ordering::Equal => NodeKind::Empty,
            Ordering::Greater => NodeKind::Record(handle),
        }
    }
}

/// A pending subtree: the path taken so far and the node to resume from
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Bits at or past `bit_depth` are always zero
    prefix: [u8; 16],
    bit_depth: u32,
    handle: u32,
}

/// Iterator over every network in a search tree
///
/// Two ways of driving it are supported. The [`Iterator`] impl yields
/// `Result<Network>` and stops after the first error. Alternatively call
/// [`advance`](Networks::advance) until it returns `false`, read each
/// network with [`current_network`](Networks::current_network), and check
/// [`last_error`](Networks::last_error) at the end to tell exhaustion from
/// failure.
///
/// Note that an IPv6 database may map the IPv4 space into several
/// locations (`::/96`, `::ffff:0:0/96`, ...). Each location is enumerated
/// separately.
pub struct Networks<'a, S: ?Sized> {
    source: &'a S,
    node_count: u32,
    width: usize,
    stack: Vec<Frame>,
    current: Option<Frame>,
    error: Option<MmdbError>,
}

impl<'a, S: NodeSource + ?Sized> Networks<'a, S> {
    /// Enumerate the whole tree, starting at the root node
    pub fn new(source: &'a S) -> Self {
        Self::starting_at(source, [0u8; 16], 0, 0)
    }

    /// Enumerate the subtree reached by `prefix`/`bit_depth` at `handle`
    pub(crate) fn starting_at(source: &'a S, prefix: [u8; 16], bit_depth: u32, handle: u32) -> Self {
        let width = source.ip_version().address_width();
        let mut stack = Vec::with_capacity(width * 8);
        stack.push(Frame {
            prefix,
            bit_depth,
            handle,
        });

        Self {
            source,
            node_count: source.node_count(),
            width,
            stack,
            current: None,
            error: None,
        }
    }

    /// Move to the next network
    ///
    /// Returns `false` once the tree is exhausted or an error occurred; use
    /// [`last_error`](Networks::last_error) to distinguish the two. Both
    /// states are terminal.
    pub fn advance(&mut self) -> bool {
        self.current = None;
        if self.error.is_some() {
            return false;
        }

        match self.walk() {
            Ok(Some(frame)) => {
                self.current = Some(frame);
                true
            }
            Ok(None) => false,
            Err(err) => {
                self.error = Some(err);
                false
            }
        }
    }

    /// Canonical prefix bytes and prefix length of the current network
    ///
    /// The prefix length is the tree depth, i.e. relative to the tree's
    /// native width even when the bytes were shortened to IPv4 form.
    pub fn current_network(&self) -> Option<(&[u8], u8)> {
        self.current.as_ref().map(|frame| {
            (
                canonicalize(&frame.prefix[..self.width]),
                frame.bit_depth as u8,
            )
        })
    }

    /// The current network with its record handle
    pub fn network(&self) -> Option<Network> {
        self.current.map(|frame| self.to_network(frame))
    }

    /// The current network as a CIDR
    pub fn ip_network(&self) -> Option<IpNetwork> {
        self.network().map(|network| network.ip_network())
    }

    /// The error that ended enumeration, if any
    pub fn last_error(&self) -> Option<&MmdbError> {
        self.error.as_ref()
    }

    fn to_network(&self, frame: Frame) -> Network {
        Network {
            prefix: frame.prefix,
            width: self.width as u8,
            prefix_len: frame.bit_depth as u8,
            record: frame.handle,
        }
    }

    fn walk(&mut self) -> Result<Option<Frame>> {
        while let Some(mut frame) = self.stack.pop() {
            loop {
                match NodeKind::classify(frame.handle, self.node_count) {
                    NodeKind::Internal(node) => {
                        let byte = (frame.bit_depth >> 3) as usize;
                        if byte >= self.width {
                            warn!(bit_depth = frame.bit_depth, node, "search tree deeper than address width");
                            return Err(MmdbError::InvalidSearchTree {
                                prefix: frame.prefix[..self.width].to_vec(),
                                bit_depth: frame.bit_depth,
                            });
                        }

                        let mut right = frame;
                        right.prefix[byte] |= 1 << (7 - (frame.bit_depth % 8));
                        right.bit_depth += 1;
                        right.handle = self.source.resolve_child(node, Branch::Right)?;
                        self.stack.push(right);

                        frame.bit_depth += 1;
                        frame.handle = self.source.resolve_child(node, Branch::Left)?;
                    }
                    NodeKind::Empty => break,
                    NodeKind::Record(record) => {
                        trace!(bit_depth = frame.bit_depth, record, pending = self.stack.len(), "found record");
                        return Ok(Some(frame));
                    }
                }
            }
        }

        Ok(None)
    }
}

impl<S: NodeSource + RecordSource + ?Sized> Networks<'_, S> {
    /// Decode the current network's record into `T`
    pub fn current_record<T: DeserializeOwned>(&self) -> Result<T> {
        self.source.decode_record(self.current_record_handle()?)
    }

    /// Decode the current network's record as a generic value
    pub fn current_value(&self) -> Result<DataValue> {
        self.source.record_value(self.current_record_handle()?)
    }

    fn current_record_handle(&self) -> Result<u32> {
        self.current.map(|frame| frame.handle).ok_or_else(|| {
            MmdbError::Decode("no current network; advance() has not returned true".to_string())
        })
    }
}

impl<S: NodeSource + ?Sized> Iterator for Networks<'_, S> {
    type Item = Result<Network>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error.is_some() {
            return None;
        }

        if self.advance() {
            self.network().map(Ok)
        } else {
            self.error.clone().map(Err)
        }
    }
}

impl<S: NodeSource + ?Sized> FusedIterator for Networks<'_, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// In-memory tree: `nodes[i]` holds the (left, right) pointers of node i
    struct VecTree {
        nodes: Vec<[u32; 2]>,
        ip_version: IpVersion,
        resolves: Cell<usize>,
    }

    impl VecTree {
        fn v4(nodes: Vec<[u32; 2]>) -> Self {
            Self {
                nodes,
                ip_version: IpVersion::V4,
                resolves: Cell::new(0),
            }
        }
    }

    impl NodeSource for VecTree {
        fn node_count(&self) -> u32 {
            self.nodes.len() as u32
        }

        fn ip_version(&self) -> IpVersion {
            self.ip_version
        }

        fn resolve_child(&self, node: u32, branch: Branch) -> Result<u32> {
            self.resolves.set(self.resolves.get() + 1);
            self.nodes
                .get(node as usize)
                .map(|children| children[branch as usize])
                .ok_or_else(|| MmdbError::InvalidDatabase(format!("no node {}", node)))
        }
    }

    impl RecordSource for VecTree {
        fn record_value(&self, record: u32) -> Result<DataValue> {
            Ok(DataValue::Uint32(record))
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(NodeKind::classify(3, 10), NodeKind::Internal(3));
        assert_eq!(NodeKind::classify(10, 10), NodeKind::Empty);
        assert_eq!(NodeKind::classify(11, 10), NodeKind::Record(11));
    }

    #[test]
    fn test_two_records_at_depth_two() {
        // node 0: left -> node 1, right -> empty
        // node 1: left -> record 10, right -> record 11
        let tree = VecTree::v4(vec![[1, 2], [10, 11]]);
        let mut networks = Networks::new(&tree);

        assert!(networks.advance());
        assert_eq!(networks.current_network(), Some((&[0u8, 0, 0, 0][..], 2)));
        assert_eq!(networks.network().unwrap().record(), 10);

        assert!(networks.advance());
        assert_eq!(networks.current_network(), Some((&[64u8, 0, 0, 0][..], 2)));
        assert_eq!(networks.ip_network().unwrap().to_string(), "64.0.0.0/2");
        assert_eq!(networks.current_record::<u32>().unwrap(), 11);

        assert!(!networks.advance());
        assert!(networks.last_error().is_none());
        assert!(networks.current_network().is_none());
    }

    #[test]
    fn test_exhaustion_is_stable() {
        let tree = VecTree::v4(vec![[2, 3], [2, 2]]);
        let mut networks = Networks::new(&tree);
        assert!(networks.advance());
        assert!(!networks.advance());
        for _ in 0..5 {
            assert!(!networks.advance());
            assert!(networks.last_error().is_none());
        }
    }

    #[test]
    fn test_empty_tree() {
        let tree = VecTree::v4(Vec::new());
        let mut networks = Networks::new(&tree);
        assert!(!networks.advance());
        assert!(networks.last_error().is_none());
        assert_eq!(tree.resolves.get(), 0);
    }

    #[test]
    fn test_root_record_covers_everything() {
        // Root's children are both records: two /1 networks
        let tree = VecTree::v4(vec![[5, 6]]);
        let found: Vec<String> = Networks::new(&tree)
            .map(|n| n.unwrap().to_string())
            .collect();
        assert_eq!(found, vec!["0.0.0.0/1", "128.0.0.0/1"]);
    }

    /// A left-leaning chain of `depth` internal nodes; every right child is a
    /// record and the final left child points at `tail`.
    fn chain(depth: u32, tail: u32) -> Vec<[u32; 2]> {
        let record = depth + 1;
        (0..depth)
            .map(|i| [if i + 1 < depth { i + 1 } else { tail }, record])
            .collect()
    }

    #[test]
    fn test_overflow_detected_on_the_failing_call() {
        // 33 internal nodes on a 4-byte tree; node 32 sits at depth 32
        let mut nodes = chain(33, 34);
        nodes[32] = [34, 34];
        let tree = VecTree::v4(nodes);
        let mut networks = Networks::new(&tree);

        // The left spine reaches the bad node before any right-hand record
        assert!(!networks.advance());
        let err = networks.last_error().cloned().unwrap();
        assert_eq!(
            err,
            MmdbError::InvalidSearchTree {
                prefix: vec![0, 0, 0, 0],
                bit_depth: 32
            }
        );

        // Sticky: no further progress even though frames remain
        let resolves = tree.resolves.get();
        assert!(!networks.advance());
        assert_eq!(tree.resolves.get(), resolves);
        assert!(networks.last_error().is_some());
    }

    #[test]
    fn test_overflow_after_valid_networks() {
        // node 0: left -> record, right -> node 1; nodes 1..: all-right chain
        // that runs past 32 bits
        let node_count = 40u32;
        let empty = node_count;
        let mut nodes = vec![[node_count + 5, 1]];
        for i in 1..node_count {
            let next = if i + 1 < node_count { i + 1 } else { empty };
            nodes.push([empty, next]);
        }
        let tree = VecTree::v4(nodes);
        let mut networks = Networks::new(&tree);

        assert!(networks.advance());
        assert_eq!(networks.current_network(), Some((&[0u8, 0, 0, 0][..], 1)));

        assert!(!networks.advance());
        match networks.last_error() {
            Some(MmdbError::InvalidSearchTree { prefix, bit_depth }) => {
                assert_eq!(prefix, &vec![255, 255, 255, 255]);
                assert_eq!(*bit_depth, 32);
            }
            other => panic!("expected search tree error, got {:?}", other),
        }
    }

    #[test]
    fn test_iterator_fuses_after_error() {
        let tree = VecTree::v4(vec![[7, 1], [1, 1], [0, 0]]);
        // node 1 points back at itself: infinite depth
        let results: Vec<_> = Networks::new(&tree).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(MmdbError::InvalidSearchTree { bit_depth: 32, .. })
        ));
    }

    #[test]
    fn test_resolution_error_propagates() {
        struct Broken;

        impl NodeSource for Broken {
            fn node_count(&self) -> u32 {
                4
            }
            fn ip_version(&self) -> IpVersion {
                IpVersion::V6
            }
            fn resolve_child(&self, _node: u32, _branch: Branch) -> Result<u32> {
                Err(MmdbError::InvalidDatabase("truncated tree".to_string()))
            }
        }

        let mut networks = Networks::new(&Broken);
        assert!(!networks.advance());
        assert_eq!(
            networks.last_error(),
            Some(&MmdbError::InvalidDatabase("truncated tree".to_string()))
        );
    }

    #[test]
    fn test_current_record_without_network() {
        let tree = VecTree::v4(vec![[1, 1]]);
        let networks = Networks::new(&tree);
        assert!(matches!(
            networks.current_record::<u32>(),
            Err(MmdbError::Decode(_))
        ));
    }

    #[test]
    fn test_ipv6_tree_canonicalizes_ipv4_records() {
        // 96 left turns down to ::/96 and then a /97 record pair
        let depth = 97u32;
        let node_count = depth;
        let mut nodes: Vec<[u32; 2]> = (0..depth - 1).map(|i| [i + 1, node_count]).collect();
        nodes.push([node_count + 1, node_count + 2]);
        let tree = VecTree {
            nodes,
            ip_version: IpVersion::V6,
            resolves: Cell::new(0),
        };

        let mut networks = Networks::new(&tree);
        assert!(networks.advance());
        assert_eq!(networks.current_network(), Some((&[0u8, 0, 0, 0][..], 97)));
        assert_eq!(networks.ip_network().unwrap().to_string(), "0.0.0.0/1");

        assert!(networks.advance());
        assert_eq!(networks.current_network(), Some((&[128u8, 0, 0, 0][..], 97)));
        assert_eq!(
            networks.network().unwrap().raw_prefix().len(),
            16,
            "raw prefix keeps the tree width"
        );
        assert!(!networks.advance());
    }
}
