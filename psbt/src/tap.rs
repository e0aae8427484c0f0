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

//! Taproot-specific PSBT field logic (BIP-371): namespace checks between taproot and
//! pre-taproot fields, internal key tweaking, tap tree conversions, detection of signatures
//! committing to the transaction structure and finalization of script path spends.

use std::cmp::Reverse;

use primitives::{Bip340Sig, Instruction, ScriptBytesExt, ScriptPubkey, Witness, XOnlyPk};
use taproot::{
    ControlBlockExt, InvalidTree, LeafInfo, LeafScript, OutputPk, TapLeafHash, TapNode, TapTree,
};
use tracing::{debug, trace};

use crate::{check_sighash_permits, Input, Output, PsbtAction};

/// Errors in taproot-specific PSBT fields.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
pub enum TapFieldError {
    /// Both BIP-371 and pre-taproot key-related fields are present in a single map.
    #[display("Cannot use both taproot and non-taproot fields")]
    MixedFields,

    /// A tap leaf script control block doesn't commit to the merkle root of the input.
    #[display("Tapleaf not part of taptree")]
    LeafNotInTree,

    /// Output script doesn't match the one derived from the taproot internal key and tree.
    #[display("Output script doesn't match taproot internal key and tap tree")]
    OutputScriptMismatch,

    /// Input has no tap internal key to tweak.
    #[display("Cannot tweak tap internal key for input #{0}")]
    Tweak(usize),

    /// Script path finalization requested on an input without script path signatures.
    #[display("No tapleaf script signature provided")]
    NoScriptSig,

    /// None of the known tap leaf scripts has a signature.
    #[display("Signature for tapleaf script not found")]
    LeafSigNotFound,
}

fn has_tap_input_fields(input: &Input) -> bool {
    input.tap_internal_key.is_some()
        || input.tap_merkle_root.is_some()
        || !input.tap_leaf_script.is_empty()
        || !input.tap_bip32_derivation.is_empty()
        || input.tap_key_sig.is_some()
        || !input.tap_script_sig.is_empty()
}

fn has_legacy_input_fields(input: &Input) -> bool {
    input.redeem_script.is_some()
        || input.witness_script.is_some()
        || !input.bip32_derivation.is_empty()
        || !input.partial_sigs.is_empty()
}

fn has_legacy_output_fields(output: &Output) -> bool {
    output.redeem_script.is_some()
        || output.witness_script.is_some()
        || !output.bip32_derivation.is_empty()
}

/// Checks whether the input carries any BIP-371 field or spends a P2TR output.
pub fn is_taproot_input(input: &Input) -> bool {
    has_tap_input_fields(input)
        || matches!(&input.witness_utxo, Some(txout) if txout.script_pubkey.is_p2tr())
}

/// Checks whether the output carries any BIP-371 field or pays to a P2TR script.
pub fn is_taproot_output(output: &Output) -> bool {
    output.tap_internal_key.is_some()
        || output.tap_tree.is_some()
        || !output.tap_bip32_derivation.is_empty()
        || output.script.is_p2tr()
}

/// Verifies that merging `new` fields into the `old` input keeps the input within a single
/// (taproot or pre-taproot) namespace, and that all tap leaf scripts commit to the merkle
/// root.
pub fn check_taproot_input_fields(
    old: &Input,
    new: &Input,
    action: PsbtAction,
) -> Result<(), TapFieldError> {
    let tap_old = is_taproot_input(old);
    let tap_new = is_taproot_input(new);
    let legacy_old = has_legacy_input_fields(old);
    let legacy_new = has_legacy_input_fields(new);
    if (tap_old && legacy_new) || (legacy_old && tap_new) || (tap_new && legacy_new) {
        debug!(input = old.index(), %action, "mixed taproot and non-taproot input fields");
        return Err(TapFieldError::MixedFields);
    }

    let Some(merkle_root) = new.tap_merkle_root.or(old.tap_merkle_root) else {
        return Ok(());
    };
    for (control_block, leaf_script) in old.tap_leaf_script.iter().chain(&new.tap_leaf_script) {
        if control_block.merkle_root(leaf_script.tap_leaf_hash()) != merkle_root {
            debug!(input = old.index(), %action, leaf = %leaf_script, "leaf not in tap tree");
            return Err(TapFieldError::LeafNotInTree);
        }
    }
    Ok(())
}

/// Output counterpart of [`check_taproot_input_fields`]. Additionally checks that the
/// internal key and tap tree, when present, produce the output script.
pub fn check_taproot_output_fields(
    old: &Output,
    new: &Output,
    action: PsbtAction,
) -> Result<(), TapFieldError> {
    let tap_old = is_taproot_output(old);
    let tap_new = is_taproot_output(new);
    let legacy_old = has_legacy_output_fields(old);
    let legacy_new = has_legacy_output_fields(new);
    if (tap_old && legacy_new) || (legacy_old && tap_new) || (tap_new && legacy_new) {
        debug!(output = old.index(), %action, "mixed taproot and non-taproot output fields");
        return Err(TapFieldError::MixedFields);
    }

    let Some(internal_pk) = new.tap_internal_key.or(old.tap_internal_key) else {
        return Ok(());
    };
    let script = if new.script.is_empty() { &old.script } else { &new.script };
    if script.is_empty() {
        return Ok(());
    }
    let tap_tree = new.tap_tree.as_ref().or(old.tap_tree.as_ref());
    let expected = ScriptPubkey::p2tr(internal_pk, tap_tree.map(TapTree::merkle_root));
    if &expected != script {
        return Err(TapFieldError::OutputScriptMismatch);
    }
    Ok(())
}

/// Computes the output key of the input from its internal key and merkle root.
pub fn tweak_internal_pubkey(index: usize, input: &Input) -> Result<OutputPk, TapFieldError> {
    let internal_pk = input.tap_internal_key.ok_or(TapFieldError::Tweak(index))?;
    let (output_pk, _) = internal_pk.to_output_pk(input.tap_merkle_root);
    trace!(input = index, %output_pk, "tweaked tap internal key");
    Ok(output_pk)
}

/// Flattens a tap tree into the depth-first list of leaves used by `PSBT_OUT_TAP_TREE`.
pub fn tap_tree_to_list(root: &TapNode) -> Result<Vec<LeafInfo>, InvalidTree> {
    TapTree::from_node(root.clone()).map(TapTree::into_vec)
}

/// Restores a tap tree from its depth-first list of leaves.
pub fn tap_tree_from_list(
    leaves: impl IntoIterator<Item = LeafInfo>,
) -> Result<TapNode, InvalidTree> {
    TapTree::from_leaves(leaves).map(|tree| tree.as_node().clone())
}

/// Extracts BIP-340 signatures from a final witness: the only element of a key path spend,
/// or the elements preceding the leaf script and control block of a script path spend.
fn final_witness_sigs(witness: &Witness) -> Vec<Bip340Sig> {
    let elements = witness.elements().collect::<Vec<_>>();
    let candidates = match elements.len() {
        0 | 1 => &elements[..],
        len => &elements[..len - 2],
    };
    candidates
        .iter()
        .filter(|el| matches!(el.len(), 64 | 65))
        .filter_map(|el| Bip340Sig::from_bytes(el).ok())
        .collect()
}

/// Checks whether the input has a taproot signature (including ones inside a final witness)
/// committing to the part of the transaction modified by `action`.
pub fn check_taproot_input_for_sigs(input: &Input, action: PsbtAction) -> bool {
    let final_sigs = input.final_witness.as_ref().map(final_witness_sigs).unwrap_or_default();
    input
        .tap_key_sig
        .iter()
        .chain(input.tap_script_sig.values())
        .chain(&final_sigs)
        .any(|sig| !check_sighash_permits(sig.sighash_type, action))
}

fn pubkey_position(leaf_script: &LeafScript, pubkey: XOnlyPk) -> Option<usize> {
    let pubkey = pubkey.to_byte_array();
    leaf_script
        .as_script_bytes()
        .decompile()
        .ok()?
        .iter()
        .position(|instr| matches!(instr, Instruction::Push(data) if data[..] == pubkey[..]))
}

/// Constructs the final witness of a script path spend.
///
/// The leaf is chosen among `tap_leaf_script` entries having signatures (or matching the
/// `leaf_hash` hint, if provided); on multiple matches the leaf with the shortest control
/// block wins. Signatures are placed in the reverse order of their public keys in the leaf
/// script, so the first key checked by the script finds its signature on top of the stack.
pub fn tap_script_finalizer(
    index: usize,
    input: &Input,
    leaf_hash: Option<TapLeafHash>,
) -> Result<Witness, TapFieldError> {
    if input.tap_script_sig.is_empty() {
        return Err(TapFieldError::NoScriptSig);
    }

    let (control_block, leaf_script) = input
        .tap_leaf_script
        .iter()
        .filter(|(_, leaf_script)| {
            let hash = leaf_script.tap_leaf_hash();
            match leaf_hash {
                Some(hint) => hint == hash,
                None => input.tap_script_sig.keys().any(|(_, sig_leaf)| *sig_leaf == hash),
            }
        })
        .min_by_key(|(control_block, _)| control_block.serialized_len())
        .ok_or(TapFieldError::LeafSigNotFound)?;

    let leaf_hash = leaf_script.tap_leaf_hash();
    let mut sigs = input
        .tap_script_sig
        .iter()
        .filter(|((_, sig_leaf), _)| *sig_leaf == leaf_hash)
        .map(|((pubkey, _), sig)| (pubkey_position(leaf_script, *pubkey), sig))
        .collect::<Vec<_>>();
    if sigs.is_empty() {
        return Err(TapFieldError::LeafSigNotFound);
    }
    sigs.sort_by_key(|(pos, _)| Reverse(*pos));
    debug!(input = index, leaf = %leaf_hash, sigs = sigs.len(), "finalizing script path spend");

    let stack = sigs
        .into_iter()
        .map(|(_, sig)| sig.to_vec())
        .chain([leaf_script.as_script_bytes().to_vec(), control_block.to_vec()]);
    Ok(Witness::from_consensus_stack(stack))
}
