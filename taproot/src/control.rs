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

use amplify::ByteArray;
use primitives::{
    ControlBlock, InternalPk, InvalidLeafVer, LeafVer, Parity, TapBranchHash, TapLeafHash,
    TapMerklePath, TapNodeHash, TAPROOT_LEAF_MASK,
};

/// Maximal depth of a taproot script tree.
pub const TAPROOT_CONTROL_MAX_NODE_COUNT: usize = 128;
/// Size of the control block without merkle path.
pub const TAPROOT_CONTROL_BASE_SIZE: usize = 33;
/// Size of a single merkle path node.
pub const TAPROOT_CONTROL_NODE_SIZE: usize = 32;

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ControlBlockError {
    /// control-block length is too small
    TooSmall,

    /// control-block length is invalid
    InvalidLength,

    /// control-block merkle path exceeds 128 nodes.
    PathTooLong,

    #[from]
    #[display(inner)]
    LeafVer(InvalidLeafVer),

    /// control-block contains invalid internal key.
    InternalKey,
}

/// Witness serialization of a control block and the commitment it proves.
///
/// The first byte is `leaf_version | parity`; the consensus encoder of the
/// underlying library combines them with AND and must not be used for
/// witnesses.
pub trait ControlBlockExt: Sized {
    /// Parses control block from its witness serialization.
    fn from_slice(data: &[u8]) -> Result<Self, ControlBlockError>;

    /// Serializes control block as `version|parity || internal_key || path`.
    fn to_vec(&self) -> Vec<u8>;

    fn serialized_len(&self) -> usize;

    /// Computes the merkle root committed by this control block for the given
    /// leaf.
    fn merkle_root(&self, leaf_hash: TapLeafHash) -> TapNodeHash;
}

impl ControlBlockExt for ControlBlock {
    fn from_slice(data: &[u8]) -> Result<Self, ControlBlockError> {
        check_len(data)?;
        let first_byte = data[0];
        let leaf_version = LeafVer::from_consensus_u8(first_byte & TAPROOT_LEAF_MASK)?;
        let output_key_parity = if first_byte & 0x01 == 0 { Parity::Even } else { Parity::Odd };
        let mut key = [0u8; 32];
        key.copy_from_slice(&data[1..TAPROOT_CONTROL_BASE_SIZE]);
        let internal_pk =
            InternalPk::from_byte_array(key).map_err(|_| ControlBlockError::InternalKey)?;
        let merkle_branch = TapMerklePath::try_from_iter(path_nodes(data))
            .map_err(|_| ControlBlockError::PathTooLong)?;
        Ok(ControlBlock::with(leaf_version, internal_pk, output_key_parity, merkle_branch))
    }

    fn to_vec(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.serialized_len());
        data.push(self.leaf_version.to_consensus_u8() | self.output_key_parity.to_consensus_u8());
        data.extend_from_slice(&self.internal_pk.to_byte_array());
        for node in &self.merkle_branch {
            data.extend_from_slice(&node.to_byte_array());
        }
        data
    }

    fn serialized_len(&self) -> usize {
        TAPROOT_CONTROL_BASE_SIZE + TAPROOT_CONTROL_NODE_SIZE * self.merkle_branch.len()
    }

    fn merkle_root(&self, leaf_hash: TapLeafHash) -> TapNodeHash {
        fold_path(leaf_hash, self.merkle_branch.iter().copied())
    }
}

fn check_len(data: &[u8]) -> Result<usize, ControlBlockError> {
    if data.len() < TAPROOT_CONTROL_BASE_SIZE {
        return Err(ControlBlockError::TooSmall);
    }
    let path_size = data.len() - TAPROOT_CONTROL_BASE_SIZE;
    if path_size % TAPROOT_CONTROL_NODE_SIZE != 0 {
        return Err(ControlBlockError::InvalidLength);
    }
    let count = path_size / TAPROOT_CONTROL_NODE_SIZE;
    if count > TAPROOT_CONTROL_MAX_NODE_COUNT {
        return Err(ControlBlockError::PathTooLong);
    }
    Ok(count)
}

fn path_nodes(control_block: &[u8]) -> impl Iterator<Item = TapBranchHash> + '_ {
    control_block[TAPROOT_CONTROL_BASE_SIZE..].chunks_exact(TAPROOT_CONTROL_NODE_SIZE).map(
        |chunk| {
            let mut node = [0u8; 32];
            node.copy_from_slice(chunk);
            TapBranchHash::from_byte_array(node)
        },
    )
}

/// Folds the path bottom-up starting from the leaf hash.
pub(crate) fn fold_path(
    leaf_hash: TapLeafHash,
    path: impl IntoIterator<Item = TapBranchHash>,
) -> TapNodeHash {
    path.into_iter().fold(TapNodeHash::from(leaf_hash), |node, sibling| {
        TapBranchHash::with_nodes(node, TapNodeHash::from(sibling)).into()
    })
}

/// Computes the merkle root from a raw control block and a leaf hash, without
/// parsing the internal key or the leaf version.
pub fn root_hash_from_path(
    control_block: &[u8],
    leaf_hash: TapLeafHash,
) -> Result<TapNodeHash, ControlBlockError> {
    check_len(control_block)?;
    Ok(fold_path(leaf_hash, path_nodes(control_block)))
}

#[cfg(test)]
mod test {
    use super::*;

    const INTERNAL_PK: &str = "cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115";

    #[test]
    fn length_checks() {
        let leaf = TapLeafHash::from_byte_array([0u8; 32]);
        assert_eq!(root_hash_from_path(&[0x01], leaf), Err(ControlBlockError::TooSmall));
        assert_eq!(
            ControlBlockError::TooSmall.to_string(),
            "control-block length is too small"
        );
        assert_eq!(root_hash_from_path(&[0xc0; 34], leaf), Err(ControlBlockError::InvalidLength));
        assert_eq!(
            ControlBlockError::InvalidLength.to_string(),
            "control-block length is invalid"
        );
        assert_eq!(root_hash_from_path(&[0xc0; 33], leaf), Ok(TapNodeHash::from(leaf)));
        assert_eq!(
            ControlBlock::from_slice(&vec![0xc0; 33 + 32 * 129]),
            Err(ControlBlockError::PathTooLong)
        );
    }

    #[test]
    fn roundtrip() {
        let internal_pk: InternalPk = INTERNAL_PK.parse().unwrap();
        let path = TapMerklePath::try_from(vec![
            TapBranchHash::from_byte_array([1u8; 32]),
            TapBranchHash::from_byte_array([2u8; 32]),
        ])
        .unwrap();
        let cb = ControlBlock::with(LeafVer::TapScript, internal_pk, Parity::Odd, path);
        let data = cb.to_vec();
        assert_eq!(data.len(), 33 + 64);
        assert_eq!(data[0], 0xc1);
        assert_eq!(ControlBlock::from_slice(&data), Ok(cb.clone()));

        let leaf = TapLeafHash::from_byte_array([3u8; 32]);
        assert_eq!(root_hash_from_path(&data, leaf), Ok(cb.merkle_root(leaf)));
    }

    #[test]
    fn invalid_internal_key() {
        // x coordinate equal to the field prime is not on the curve
        let mut data = vec![0xc0];
        data.extend(vec![0xFFu8; 32]);
        assert_eq!(ControlBlock::from_slice(&data), Err(ControlBlockError::InternalKey));
    }
}
