// Bitcoin payment script templates, taproot & PSBT signing library.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2020-2023 by
//     Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2020-2023 LNP/BP Standards Association. All rights reserved.
// Copyright (C) 2020-2023 Dr Maxim Orlovsky. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::ops::Deref;
use std::{slice, vec};

use amplify::ByteArray;
use primitives::{
    ControlBlock, InternalPk, LeafScript, OutputPk, Parity, TapBranchHash, TapLeafHash,
    TapMerklePath, TapNodeHash, TapScript,
};

use crate::TAPROOT_CONTROL_MAX_NODE_COUNT;

/// Maximal depth of a leaf in a taproot script tree.
pub const TAPROOT_MAX_DEPTH: u8 = TAPROOT_CONTROL_MAX_NODE_COUNT as u8;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum InvalidTree {
    /// No room left to insert tapleaf in tree
    NoRoom,

    /// Max taptree depth exceeded
    MaxDepthExceeded,

    /// Unfinalized taptree
    Unfinalized,
}

/// Leaf of a script tree with its hash computed at construction.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TapLeaf {
    script: LeafScript,
    hash: TapLeafHash,
}

impl TapLeaf {
    pub fn new(script: LeafScript) -> Self {
        let hash = script.tap_leaf_hash();
        TapLeaf { script, hash }
    }

    pub fn script(&self) -> &LeafScript { &self.script }

    pub fn leaf_hash(&self) -> TapLeafHash { self.hash }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TapBranch {
    hash: TapBranchHash,
    left: Box<TapNode>,
    right: Box<TapNode>,
}

impl TapBranch {
    pub fn new(left: TapNode, right: TapNode) -> Self {
        TapBranch {
            hash: TapBranchHash::with_nodes(left.node_hash(), right.node_hash()),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn branch_hash(&self) -> TapBranchHash { self.hash }

    pub fn left(&self) -> &TapNode { &self.left }

    pub fn right(&self) -> &TapNode { &self.right }
}

/// Node of a script tree. Trees are built bottom-up and never change afterwards.
#[derive(Clone, Eq, PartialEq, Hash, Debug, From)]
pub enum TapNode {
    #[from]
    Leaf(TapLeaf),
    #[from]
    Branch(TapBranch),
}

impl TapNode {
    pub fn leaf(script: impl Into<LeafScript>) -> Self {
        TapNode::Leaf(TapLeaf::new(script.into()))
    }

    pub fn branch(left: TapNode, right: TapNode) -> Self {
        TapNode::Branch(TapBranch::new(left, right))
    }

    pub fn node_hash(&self) -> TapNodeHash {
        match self {
            TapNode::Leaf(leaf) => leaf.hash.into(),
            TapNode::Branch(branch) => branch.hash.into(),
        }
    }

    /// Hash of this node as a merkle path element.
    pub fn path_hash(&self) -> TapBranchHash {
        TapBranchHash::from_byte_array(self.node_hash().to_byte_array())
    }

    /// Root hash of the subtree, equal to the leaf hash for a single-leaf tree.
    #[inline]
    pub fn merkle_root(&self) -> TapNodeHash { self.node_hash() }

    /// Depth of the deepest leaf under this node.
    pub fn max_depth(&self) -> usize {
        match self {
            TapNode::Leaf(_) => 0,
            TapNode::Branch(branch) => 1 + branch.left.max_depth().max(branch.right.max_depth()),
        }
    }

    /// Finds merkle path to the leaf with the given hash, listing sibling hashes from the
    /// deepest one up to the child of the root. Returns empty path if this node is the leaf
    /// itself and `None` if the leaf is not present.
    pub fn find_script_path(&self, leaf_hash: TapLeafHash) -> Option<Vec<TapBranchHash>> {
        match self {
            TapNode::Leaf(leaf) if leaf.hash == leaf_hash => Some(vec![]),
            TapNode::Leaf(_) => None,
            TapNode::Branch(branch) => {
                if let Some(mut path) = branch.left.find_script_path(leaf_hash) {
                    path.push(branch.right.path_hash());
                    return Some(path);
                }
                let mut path = branch.right.find_script_path(leaf_hash)?;
                path.push(branch.left.path_hash());
                Some(path)
            }
        }
    }

    /// Lists leaves in depth-first order together with their merkle paths.
    pub fn leaf_paths(&self) -> Vec<(&TapLeaf, Vec<TapBranchHash>)> {
        match self {
            TapNode::Leaf(leaf) => vec![(leaf, vec![])],
            TapNode::Branch(branch) => {
                let right_hash = branch.right.path_hash();
                let left_hash = branch.left.path_hash();
                let mut paths = branch.left.leaf_paths();
                for (_, path) in &mut paths {
                    path.push(right_hash);
                }
                let mut right = branch.right.leaf_paths();
                for (_, path) in &mut right {
                    path.push(left_hash);
                }
                paths.extend(right);
                paths
            }
        }
    }

    fn collect_leaves(
        &self,
        depth: usize,
        leaves: &mut Vec<LeafInfo>,
    ) -> Result<(), InvalidTree> {
        if depth > TAPROOT_MAX_DEPTH as usize {
            return Err(InvalidTree::MaxDepthExceeded);
        }
        match self {
            TapNode::Leaf(leaf) => leaves.push(LeafInfo {
                depth: depth as u8,
                script: leaf.script.clone(),
            }),
            TapNode::Branch(branch) => {
                branch.left.collect_leaves(depth + 1, leaves)?;
                branch.right.collect_leaves(depth + 1, leaves)?;
            }
        }
        Ok(())
    }
}

/// Leaf script with its depth in the tree, as used in the flat tree representation.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct LeafInfo {
    pub depth: u8,
    pub script: LeafScript,
}

impl LeafInfo {
    pub fn tap_script(depth: u8, script: TapScript) -> Self {
        LeafInfo {
            depth,
            script: LeafScript::from_tap_script(script),
        }
    }
}

/// Assembles tree from leaves listed in depth-first order.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct TapTreeBuilder {
    leaves: Vec<LeafInfo>,
    // incomplete left subtrees waiting for their right sibling, by depth
    stack: Vec<(u8, TapNode)>,
    root: Option<TapNode>,
}

impl TapTreeBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            leaves: Vec::with_capacity(capacity),
            stack: empty!(),
            root: None,
        }
    }

    pub fn is_finalized(&self) -> bool { self.root.is_some() }

    /// Adds next leaf. Returns whether the tree got complete.
    pub fn push_leaf(&mut self, leaf: LeafInfo) -> Result<bool, InvalidTree> {
        if self.root.is_some() {
            return Err(InvalidTree::NoRoom);
        }
        if leaf.depth > TAPROOT_MAX_DEPTH {
            return Err(InvalidTree::MaxDepthExceeded);
        }
        let mut depth = leaf.depth;
        let mut node = TapNode::leaf(leaf.script.clone());
        while matches!(self.stack.last(), Some((sibling_depth, _)) if *sibling_depth == depth) {
            let Some((_, sibling)) = self.stack.pop() else { break };
            node = TapNode::branch(sibling, node);
            depth -= 1;
        }
        if matches!(self.stack.last(), Some((sibling_depth, _)) if *sibling_depth > depth) {
            return Err(InvalidTree::NoRoom);
        }
        self.leaves.push(leaf);
        if depth == 0 {
            self.root = Some(node);
        } else {
            self.stack.push((depth, node));
        }
        Ok(self.is_finalized())
    }

    pub fn finish(self) -> Result<TapTree, InvalidTree> {
        match self.root {
            Some(root) => Ok(TapTree {
                leaves: self.leaves,
                root,
            }),
            None => Err(InvalidTree::Unfinalized),
        }
    }
}

/// Non-empty complete taproot script tree, keeping both the flat list of leaves and the node
/// structure.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TapTree {
    leaves: Vec<LeafInfo>,
    root: TapNode,
}

impl Deref for TapTree {
    type Target = Vec<LeafInfo>;
    fn deref(&self) -> &Self::Target { &self.leaves }
}

impl IntoIterator for TapTree {
    type Item = LeafInfo;
    type IntoIter = vec::IntoIter<LeafInfo>;

    fn into_iter(self) -> Self::IntoIter { self.leaves.into_iter() }
}

impl<'a> IntoIterator for &'a TapTree {
    type Item = &'a LeafInfo;
    type IntoIter = slice::Iter<'a, LeafInfo>;

    fn into_iter(self) -> Self::IntoIter { self.leaves.iter() }
}

impl TapTree {
    pub fn with_single_leaf(leaf: impl Into<LeafScript>) -> TapTree {
        let script = leaf.into();
        TapTree {
            root: TapNode::leaf(script.clone()),
            leaves: vec![LeafInfo { depth: 0, script }],
        }
    }

    /// Restores tree from a flat depth-first list of leaves.
    pub fn from_leaves(leaves: impl IntoIterator<Item = LeafInfo>) -> Result<Self, InvalidTree> {
        let mut builder = TapTreeBuilder::new();
        for leaf in leaves {
            builder.push_leaf(leaf)?;
        }
        builder.finish()
    }

    /// Flattens node structure, failing if any leaf is deeper than 128.
    pub fn from_node(root: TapNode) -> Result<Self, InvalidTree> {
        let mut leaves = vec![];
        root.collect_leaves(0, &mut leaves)?;
        Ok(TapTree { leaves, root })
    }

    pub fn as_node(&self) -> &TapNode { &self.root }

    pub fn merkle_root(&self) -> TapNodeHash { self.root.node_hash() }

    pub fn into_vec(self) -> Vec<LeafInfo> { self.leaves }

    pub fn contains(&self, leaf_hash: TapLeafHash) -> bool {
        self.root.find_script_path(leaf_hash).is_some()
    }
}

/// Produces control blocks for every leaf of a tree, in depth-first leaf order.
#[derive(Getters, Clone, Debug)]
#[getter(as_copy)]
pub struct ControlBlockFactory {
    internal_pk: InternalPk,
    output_pk: OutputPk,
    parity: Parity,
    merkle_root: TapNodeHash,

    #[getter(skip)]
    remaining_leaves: vec::IntoIter<(LeafScript, Vec<TapBranchHash>)>,
}

impl ControlBlockFactory {
    pub fn with(internal_pk: InternalPk, tap_tree: &TapTree) -> Self {
        let merkle_root = tap_tree.merkle_root();
        let (output_pk, parity) = internal_pk.to_output_pk(Some(merkle_root));
        let remaining_leaves = tap_tree
            .as_node()
            .leaf_paths()
            .into_iter()
            .map(|(leaf, path)| (leaf.script().clone(), path))
            .collect::<Vec<_>>()
            .into_iter();
        ControlBlockFactory {
            internal_pk,
            output_pk,
            parity,
            merkle_root,
            remaining_leaves,
        }
    }
}

impl Iterator for ControlBlockFactory {
    type Item = (ControlBlock, LeafScript);

    fn next(&mut self) -> Option<Self::Item> {
        let (leaf_script, path) = self.remaining_leaves.next()?;
        // tree depth never exceeds 128, so the path always fits
        let merkle_branch = TapMerklePath::try_from(path).ok()?;
        let control_block =
            ControlBlock::with(leaf_script.version, self.internal_pk, self.parity, merkle_branch);
        Some((control_block, leaf_script))
    }
}

#[cfg(test)]
mod test {
    use primitives::LeafVer;

    use super::*;
    use crate::ControlBlockExt;

    fn leaf(byte: u8) -> LeafScript {
        LeafScript::with_bytes(LeafVer::TapScript, vec![byte]).unwrap()
    }

    fn info(depth: u8, byte: u8) -> LeafInfo {
        LeafInfo {
            depth,
            script: leaf(byte),
        }
    }

    #[test]
    fn single_leaf_path() {
        let node = TapNode::leaf(leaf(0x51));
        let hash = leaf(0x51).tap_leaf_hash();
        assert_eq!(node.find_script_path(hash), Some(vec![]));
        assert_eq!(node.merkle_root(), TapNodeHash::from(hash));
        assert_eq!(node.find_script_path(leaf(0x52).tap_leaf_hash()), None);
    }

    #[test]
    fn path_order() {
        // ((A, B), C)
        let ab = TapNode::branch(TapNode::leaf(leaf(0xa)), TapNode::leaf(leaf(0xb)));
        let ab_hash = ab.node_hash();
        let tree = TapNode::branch(ab, TapNode::leaf(leaf(0xc)));
        let path = tree.find_script_path(leaf(0xa).tap_leaf_hash()).unwrap();
        assert_eq!(path, vec![
            TapBranchHash::from_byte_array(leaf(0xb).tap_leaf_hash().to_byte_array()),
            TapBranchHash::from_byte_array(leaf(0xc).tap_leaf_hash().to_byte_array()),
        ]);
        let path = tree.find_script_path(leaf(0xc).tap_leaf_hash()).unwrap();
        assert_eq!(path, vec![TapBranchHash::from_byte_array(ab_hash.to_byte_array())]);
    }

    #[test]
    fn list_roundtrip() {
        let list = vec![info(1, 1), info(2, 2), info(3, 3), info(3, 4)];
        let tree = TapTree::from_leaves(list.clone()).unwrap();
        assert_eq!(tree.as_node().max_depth(), 3);
        let flat = TapTree::from_node(tree.as_node().clone()).unwrap();
        assert_eq!(flat.into_vec(), list);
    }

    #[test]
    fn list_errors() {
        assert_eq!(
            TapTree::from_leaves(vec![info(0, 1), info(0, 2)]),
            Err(InvalidTree::NoRoom)
        );
        assert_eq!(InvalidTree::NoRoom.to_string(), "No room left to insert tapleaf in tree");
        assert_eq!(TapTree::from_leaves(vec![info(129, 1)]), Err(InvalidTree::MaxDepthExceeded));
        assert_eq!(TapTree::from_leaves(vec![info(1, 1)]), Err(InvalidTree::Unfinalized));
        assert_eq!(TapTree::from_leaves(vec![]), Err(InvalidTree::Unfinalized));
        assert_eq!(
            TapTree::from_leaves(vec![info(2, 1), info(1, 2)]),
            Err(InvalidTree::NoRoom)
        );
    }

    #[test]
    fn too_deep_node() {
        let mut node = TapNode::leaf(leaf(0));
        for n in 0..129u8 {
            node = TapNode::branch(node, TapNode::leaf(leaf(n)));
        }
        assert_eq!(TapTree::from_node(node), Err(InvalidTree::MaxDepthExceeded));
    }

    #[test]
    fn control_blocks_commit_to_root() {
        let internal_pk: InternalPk =
            "cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115".parse().unwrap();
        let tree =
            TapTree::from_leaves(vec![info(1, 1), info(3, 2), info(3, 3), info(2, 4)]).unwrap();
        let factory = ControlBlockFactory::with(internal_pk, &tree);
        let root = *factory.merkle_root();
        let parity = *factory.parity();
        let mut count = 0;
        for (cb, script) in factory {
            assert_eq!(cb.output_key_parity, parity);
            assert_eq!(cb.merkle_root(script.tap_leaf_hash()), root);
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
