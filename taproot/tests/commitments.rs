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

use std::str::FromStr;

use primitives::{ScriptPubkey, XOnlyPk};
use rstest::rstest;
use secp256k1::{Keypair, SecretKey, SECP256K1};
use taproot::{
    root_hash_from_path, ControlBlock, ControlBlockExt, ControlBlockFactory, InternalKeypair,
    InternalPk, LeafInfo, LeafScript, LeafVer, TapNodeHash, TapTree, TAPROOT_MAX_DEPTH,
};

fn leaf(byte: u8) -> LeafScript {
    LeafScript::with_bytes(LeafVer::TapScript, vec![byte, 0x87]).unwrap()
}

fn tree(depths: &[u8]) -> TapTree {
    TapTree::from_leaves(depths.iter().enumerate().map(|(no, depth)| LeafInfo {
        depth: *depth,
        script: leaf(0x51u8.wrapping_add(no as u8)),
    }))
    .unwrap()
}

/// Depths of a maximally unbalanced tree: one leaf per level down to 128, plus
/// the last sibling.
fn chain(max_depth: u8) -> Vec<u8> {
    let mut depths = (1..=max_depth).collect::<Vec<_>>();
    depths.push(max_depth);
    depths
}

#[test]
fn key_only_output() {
    // BIP-341 wallet vector without script tree
    let internal_pk = InternalPk::from_str(
        "d6889cb081036e0faefa3a35157ad71086b123b2b144b649798b494c300a961d",
    )
    .unwrap();
    let (output_pk, _) = internal_pk.to_output_pk(None::<TapNodeHash>);
    assert_eq!(
        output_pk.to_string(),
        "53a1f6e454df1aa2776a2814a721372d6258050de330b3c6d10ee8f4e0dda343"
    );
    let spk: ScriptPubkey = output_pk.to_script_pubkey();
    assert_eq!(spk.len(), 34);
    assert_eq!(&spk[..2], &[0x51, 0x20]);
    assert_eq!(ScriptPubkey::p2tr_key_only(internal_pk), spk);
}

#[test]
fn bip86_output() {
    // BIP-86 first receiving address of the test mnemonic
    let internal_pk = InternalPk::from_str(
        "cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115",
    )
    .unwrap();
    let (output_pk, _) = internal_pk.to_output_pk(None::<TapNodeHash>);
    assert_eq!(
        output_pk.to_string(),
        "a60869f0dbcf1dc659c9cecbaf8050135ea9e8cdc487053f1dc6880949dc684c"
    );
}

#[test]
fn tweak_matches_keypair() {
    let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
    let pair = Keypair::from_secret_key(SECP256K1, &sk);
    let internal_pk = InternalPk::from(pair.x_only_public_key().0);
    let keypair = InternalKeypair::from(pair);
    for root in [None, Some(tree(&[1, 1]).merkle_root())] {
        let (output_pk, parity) = internal_pk.to_output_pk(root);
        let (tweaked, pair_parity) = keypair.to_output_keypair(root);
        assert_eq!(XOnlyPk::from(tweaked.x_only_public_key().0), output_pk.to_xonly_pk());
        assert_eq!(parity, pair_parity);
        let spk = output_pk.to_script_pubkey();
        assert!(spk.is_p2tr());
        assert_eq!(&spk[2..], &output_pk.to_byte_array());
    }
}

#[rstest]
#[case::single(vec![0])]
#[case::balanced(vec![1, 1])]
#[case::skewed(vec![1, 2, 3, 3])]
#[case::full(vec![2, 2, 2, 2])]
#[case::max_depth_chain(chain(TAPROOT_MAX_DEPTH))]
fn control_blocks_commit_to_output(#[case] depths: Vec<u8>) {
    let internal_pk = InternalPk::from_str(
        "d6889cb081036e0faefa3a35157ad71086b123b2b144b649798b494c300a961d",
    )
    .unwrap();
    let tree = tree(&depths);
    let (output_pk, parity) = internal_pk.to_output_pk(Some(tree.merkle_root()));

    let factory = ControlBlockFactory::with(internal_pk, &tree);
    assert_eq!(factory.output_pk(), &output_pk);
    let blocks = factory.collect::<Vec<_>>();
    assert_eq!(blocks.len(), depths.len());
    for ((control_block, script), depth) in blocks.into_iter().zip(&depths) {
        let leaf_hash = script.tap_leaf_hash();
        assert!(tree.contains(leaf_hash));
        assert_eq!(control_block.output_key_parity, parity);
        assert_eq!(control_block.merkle_branch.len(), *depth as usize);
        assert_eq!(control_block.merkle_root(leaf_hash), tree.merkle_root());

        let data = control_block.to_vec();
        assert_eq!(data.len(), 33 + 32 * *depth as usize);
        assert_eq!(root_hash_from_path(&data, leaf_hash), Ok(tree.merkle_root()));
        assert_eq!(ControlBlock::from_slice(&data), Ok(control_block));
    }
}
