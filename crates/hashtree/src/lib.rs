//! Content-addressed hierarchical snapshots.
//!
//! A [`StructuredHashTree`] holds one tenant's configuration as an ordered
//! tree keyed by [`TreeKey`] paths. Every node hashes its own attributes
//! (`partial_hash`) and its whole subtree (`full_hash`), so:
//!
//! - two snapshots are equal when their root hashes are equal
//! - [`StructuredHashTree::diff`] walks only the subtrees that differ
//! - a snapshot round-trips through a nested JSON record
//!
//! # Example
//!
//! ```
//! use fabsync_hashtree::{attributes, StructuredHashTree, TreeKey};
//!
//! # fn main() -> Result<(), fabsync_hashtree::TreeError> {
//! let bd = TreeKey::from(["tenant|t1", "bridge-domain|bd1"]);
//! let mut desired = StructuredHashTree::new();
//! desired.add(bd.clone(), attributes([("mtu", 9000)]))?;
//! desired.add(bd.child("subnet|s1"), attributes([("ip", "10.0.0.1/24")]))?;
//!
//! let observed = StructuredHashTree::new();
//! let diff = desired.diff(&observed);
//! assert_eq!(diff.add, vec![bd.clone(), bd.child("subnet|s1")]);
//! assert!(diff.remove.is_empty());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod diff;
pub mod error;
pub mod key;
pub mod node;
pub mod record;
pub mod tree;

pub use diff::TreeDiff;
pub use error::{Result, TreeError};
pub use key::TreeKey;
pub use node::{Attributes, Metadata, Scalar, TreeNode, attributes};
pub use record::NodeRecord;
pub use tree::StructuredHashTree;
