//! A content-addressed store of Merkle tree nodes.
//!
//! Every inner node is keyed by its own digest and maps to its two children.
//! Because nodes are never removed, updating a leaf leaves the old tree fully
//! queryable under its old root, and trees that share subtrees share storage.

use std::collections::HashMap;

use lazy_static::lazy_static;
use rayon::prelude::*;

use crate::Word;
use crate::error::AdviceError;
use crate::field::ZERO_WORD;
use crate::hash::hash2;

type Result<T> = std::result::Result<T, AdviceError>;

/// The depth of every sparse Merkle tree.
pub const SPARSE_MERKLE_TREE_DEPTH: u64 = 64;

/// The maximal depth of any tree in the store.
pub const MAX_MERKLE_TREE_DEPTH: u64 = SPARSE_MERKLE_TREE_DEPTH;

lazy_static! {
    /// The roots of empty subtrees, indexed by their height above the leaves.
    /// Entry 0 is the empty leaf.
    static ref EMPTY_SUBTREE_ROOTS: Vec<Word> = {
        let mut roots = vec![ZERO_WORD];
        for height in 0..SPARSE_MERKLE_TREE_DEPTH as usize {
            let child = roots[height];
            roots.push(hash2(child, child));
        }
        roots
    };
}

/// The root of a sparse Merkle tree all of whose leaves are zero.
pub fn empty_sparse_merkle_root() -> Word {
    EMPTY_SUBTREE_ROOTS[SPARSE_MERKLE_TREE_DEPTH as usize]
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct MerkleStore {
    nodes: HashMap<Word, (Word, Word)>,
}

impl MerkleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the given word is the root of some tree known to the store.
    pub fn contains_root(&self, root: Word) -> bool {
        self.nodes.contains_key(&root)
    }

    /// Registers a complete binary tree with the given leaves and returns its
    /// root. The number of leaves must be a power of two, and at least 2.
    pub fn add_merkle_tree(&mut self, leaves: &[Word]) -> Result<Word> {
        let num_leaves = leaves.len();
        if num_leaves < 2 || !num_leaves.is_power_of_two() {
            return Err(AdviceError::InvalidLeafCount(num_leaves));
        }

        let mut layer = leaves.to_vec();
        while layer.len() > 1 {
            let parents = layer
                .par_chunks_exact(2)
                .map(|pair| (hash2(pair[0], pair[1]), (pair[0], pair[1])))
                .collect::<Vec<_>>();
            layer = parents.iter().map(|&(parent, _)| parent).collect();
            self.nodes.extend(parents);
        }
        Ok(layer[0])
    }

    /// Registers a sparse Merkle tree of depth [`SPARSE_MERKLE_TREE_DEPTH`]
    /// holding the given leaves, all other leaves being zero. Returns its root.
    pub fn add_sparse_merkle_tree(&mut self, entries: &[(u64, Word)]) -> Result<Word> {
        for height in 1..=SPARSE_MERKLE_TREE_DEPTH as usize {
            let child = EMPTY_SUBTREE_ROOTS[height - 1];
            self.nodes.insert(EMPTY_SUBTREE_ROOTS[height], (child, child));
        }

        let mut root = empty_sparse_merkle_root();
        for &(index, leaf) in entries {
            (_, root) = self.set_node(root, SPARSE_MERKLE_TREE_DEPTH, index, leaf)?;
        }
        Ok(root)
    }

    /// The node at the given depth and index in the tree with the given root.
    pub fn get_node(&self, root: Word, depth: u64, index: u64) -> Result<Word> {
        self.check_coordinates(root, depth, index)?;
        let mut node = root;
        for level in (0..depth).rev() {
            let (left, right) = self.children(node)?;
            node = if (index >> level) & 1 == 0 { left } else { right };
        }
        Ok(node)
    }

    /// The authentication path of the node at the given depth and index,
    /// starting with the sibling of that node and ending with a child of the
    /// root.
    pub fn get_merkle_path(&self, root: Word, depth: u64, index: u64) -> Result<Vec<Word>> {
        self.check_coordinates(root, depth, index)?;
        let mut path = Vec::with_capacity(depth as usize);
        let mut node = root;
        for level in (0..depth).rev() {
            let (left, right) = self.children(node)?;
            let (next, sibling) = if (index >> level) & 1 == 0 {
                (left, right)
            } else {
                (right, left)
            };
            path.push(sibling);
            node = next;
        }
        path.reverse();
        Ok(path)
    }

    /// Replaces the node at the given depth and index, returning the old node
    /// and the root of the updated tree. The tree under the old root stays
    /// queryable.
    pub fn set_node(
        &mut self,
        root: Word,
        depth: u64,
        index: u64,
        value: Word,
    ) -> Result<(Word, Word)> {
        let old_value = self.get_node(root, depth, index)?;
        let path = self.get_merkle_path(root, depth, index)?;

        let mut node = value;
        for (level, sibling) in path.into_iter().enumerate() {
            let children = if (index >> level) & 1 == 0 {
                (node, sibling)
            } else {
                (sibling, node)
            };
            node = hash2(children.0, children.1);
            self.nodes.insert(node, children);
        }
        Ok((old_value, node))
    }

    /// Like [`set_node`](Self::set_node). Both the old and the new tree remain
    /// queryable under their respective roots.
    pub fn copy_and_set_node(
        &mut self,
        root: Word,
        depth: u64,
        index: u64,
        value: Word,
    ) -> Result<(Word, Word)> {
        self.set_node(root, depth, index, value)
    }

    /// Registers a new tree whose left and right subtrees have the given
    /// roots, returning the new root.
    pub fn merge_roots(&mut self, left_root: Word, right_root: Word) -> Word {
        let root = hash2(left_root, right_root);
        self.nodes.insert(root, (left_root, right_root));
        root
    }

    /// The number of inner nodes in the store.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn check_coordinates(&self, root: Word, depth: u64, index: u64) -> Result<()> {
        if !(1..=MAX_MERKLE_TREE_DEPTH).contains(&depth) {
            return Err(AdviceError::InvalidMerkleDepth(depth));
        }
        if depth < 64 && index >> depth != 0 {
            return Err(AdviceError::InvalidMerkleIndex { depth, index });
        }
        if !self.contains_root(root) {
            return Err(AdviceError::UnknownMerkleRoot(root));
        }
        Ok(())
    }

    fn children(&self, node: Word) -> Result<(Word, Word)> {
        self.nodes
            .get(&node)
            .copied()
            .ok_or(AdviceError::NodeNotInStore(node))
    }
}

/// Recomputes the root from a leaf and its authentication path.
pub fn root_from_path(leaf: Word, index: u64, path: &[Word]) -> Word {
    path.iter()
        .enumerate()
        .fold(leaf, |node, (level, &sibling)| {
            if (index >> level) & 1 == 0 {
                hash2(node, sibling)
            } else {
                hash2(sibling, node)
            }
        })
}
