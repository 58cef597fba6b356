//! Property-based tests for the structured hash tree using proptest.
//!
//! Properties verified:
//! - A tree diffed against itself is empty
//! - Diffs are mirror images when no node is flagged as error
//! - JSON round trip preserves equality and every node
//! - Attribute insertion order never changes hashes
//! - Applying a diff converges the other tree

use std::collections::BTreeSet;

use fabsync_hashtree::{Attributes, Scalar, StructuredHashTree, TreeKey};
use proptest::prelude::*;

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

fn key_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 1..4).prop_map(
        |segments| {
            std::iter::once("tenant|t1".to_string())
                .chain(segments.into_iter().map(|s| format!("node|{s}")))
                .collect()
        },
    )
}

fn entries_strategy() -> impl Strategy<Value = Vec<(Vec<String>, i64)>> {
    prop::collection::vec((key_strategy(), 0i64..4), 0..12)
}

fn build(entries: &[(Vec<String>, i64)]) -> StructuredHashTree {
    let mut tree = StructuredHashTree::new();
    for (segments, value) in entries {
        let mut attrs = Attributes::new();
        attrs.insert("value".into(), Scalar::Int(*value));
        unwrap_result(
            tree.add(TreeKey::from(segments.clone()), attrs),
            "add should succeed for a shared root",
        );
    }
    tree
}

fn key_set(keys: &[TreeKey]) -> BTreeSet<TreeKey> {
    keys.iter().cloned().collect()
}

// ==========================================================================
// PROPERTY: Self diff
// ==========================================================================

proptest! {
    /// Property: comparing a tree with itself yields no operations.
    #[test]
    fn prop_self_diff_is_empty(entries in entries_strategy()) {
        let tree = build(&entries);
        let diff = tree.diff(&tree);
        prop_assert!(diff.add.is_empty());
        prop_assert!(diff.remove.is_empty());
    }

    /// Property: A.diff(B) and B.diff(A) swap their add and remove sets.
    ///
    /// Attributes are fixed so shared keys agree; a node changed on both
    /// sides is an add in either direction.
    #[test]
    fn prop_diff_is_mirrored(
        a in prop::collection::vec(key_strategy(), 0..12),
        b in prop::collection::vec(key_strategy(), 0..12),
    ) {
        let left = build(&a.into_iter().map(|k| (k, 0)).collect::<Vec<_>>());
        let right = build(&b.into_iter().map(|k| (k, 0)).collect::<Vec<_>>());

        let forward = left.diff(&right);
        let backward = right.diff(&left);

        prop_assert_eq!(key_set(&forward.add), key_set(&backward.remove));
        prop_assert_eq!(key_set(&forward.remove), key_set(&backward.add));
    }

    /// Property: serialize then deserialize gives an equal tree.
    #[test]
    fn prop_json_round_trip(entries in entries_strategy()) {
        let tree = build(&entries);
        let json = unwrap_result(tree.to_json(), "serialization should succeed");
        let back = unwrap_result(
            StructuredHashTree::from_json(&json),
            "deserialization should succeed",
        );

        prop_assert_eq!(&back, &tree);
        prop_assert_eq!(back.keys(), tree.keys());
        prop_assert_eq!(back.to_record(), tree.to_record());
    }

    /// Property: building the same content in any order gives the same hashes.
    #[test]
    fn prop_insertion_order_independent(entries in entries_strategy()) {
        // Later duplicates win, so dedup by key before shuffling the order.
        let mut unique = std::collections::BTreeMap::new();
        for (segments, value) in &entries {
            unique.insert(segments.clone(), *value);
        }
        let forward: Vec<_> = unique.clone().into_iter().collect();
        let reversed: Vec<_> = unique.into_iter().rev().collect();

        prop_assert_eq!(build(&forward), build(&reversed));
    }

    /// Property: applying a diff's operations to the other tree converges it.
    #[test]
    fn prop_applying_diff_converges(a in entries_strategy(), b in entries_strategy()) {
        let desired = build(&a);
        let mut observed = build(&b);

        let diff = desired.diff(&observed);
        for key in &diff.remove {
            // Deleting a node that still has children leaves a tombstone.
            let has_children = observed.find(key).is_some_and(|node| !node.is_leaf());
            if has_children {
                observed.clear(key);
            } else {
                observed.pop(key);
            }
        }
        for key in &diff.add {
            if let Some(node) = desired.find(key) {
                unwrap_result(
                    observed.add(key.clone(), node.attributes().clone()),
                    "add should succeed for a shared root",
                );
            }
        }

        prop_assert!(desired.diff(&observed).is_empty());
        prop_assert_eq!(desired, observed);
    }
}
