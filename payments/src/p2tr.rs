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

use invoice::{Address, AddressPayload, Network};
use primitives::{Bip340Sig, Parity, ScriptBytes, ScriptPubkey, SigScript, Witness, WitnessExt};
use taproot::{
    ControlBlock, ControlBlockExt, InternalPk, LeafScript, LeafVer, OutputPk, TapMerklePath,
    TapNodeHash, TapTree, TAPROOT_ANNEX_PREFIX,
};

use crate::check::{agree, resolve_network, segwit_payload, try_decode};
use crate::{Field, Payment, PaymentError, PaymentOpts, Redeem, TemplateType};

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct P2trFields {
    pub network: Option<Network>,
    pub address: Option<String>,
    pub output: Option<ScriptPubkey>,
    /// Tweaked output key.
    pub pubkey: Option<OutputPk>,
    pub internal_pubkey: Option<InternalPk>,
    /// Merkle root of the script tree.
    pub hash: Option<TapNodeHash>,
    pub script_tree: Option<TapTree>,
    pub signature: Option<Bip340Sig>,
    pub redeem: Option<Redeem>,
    pub redeem_version: Option<LeafVer>,
    pub witness: Option<Witness>,
}

/// Pay-to-taproot: `OP_1 <output key>`, spent either with a key-path signature or with a
/// script-path witness `[args..., leaf script, control block]`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct P2tr {
    network: Network,
    address: Option<Address>,
    output: Option<ScriptPubkey>,
    pubkey: Option<OutputPk>,
    parity: Option<Parity>,
    internal_pubkey: Option<InternalPk>,
    hash: Option<TapNodeHash>,
    script_tree: Option<TapTree>,
    signature: Option<Bip340Sig>,
    redeem: Option<Redeem>,
    redeem_version: LeafVer,
    witness: Option<Witness>,
}

/// Script-path spend data extracted from a witness.
#[derive(Clone, Eq, PartialEq, Debug)]
struct ScriptSpend {
    args: Vec<Vec<u8>>,
    leaf_script: LeafScript,
    control_block: ControlBlock,
    merkle_root: TapNodeHash,
}

impl P2tr {
    pub fn with(fields: P2trFields, opts: PaymentOpts) -> Result<Self, PaymentError> {
        let P2trFields {
            network,
            address,
            output,
            pubkey,
            internal_pubkey,
            hash,
            script_tree,
            signature,
            redeem,
            redeem_version,
            witness,
        } = fields;
        if address.is_none()
            && output.is_none()
            && pubkey.is_none()
            && internal_pubkey.is_none()
            && !matches!(&witness, Some(witness) if !witness.is_empty())
        {
            return Err(PaymentError::NotEnoughData);
        }
        let validate = opts.validate;

        let from_address = try_decode(address.as_deref(), validate, |s| {
            let (network, key) = segwit_payload::<32>(s, 1)?;
            let pk = OutputPk::from_byte_array(key).map_err(|_| PaymentError::InvalidAddressData)?;
            Ok((network, pk))
        })?;
        let network =
            resolve_network(network, from_address.map(|(network, _)| (network, false)), validate)?;
        let output_pk = try_decode(output.as_ref(), validate, decode_output)?;

        let stack = witness.as_ref().map(strip_annex);
        if validate && matches!(&stack, Some(stack) if stack.is_empty()) {
            return Err(PaymentError::WitnessInvalid);
        }
        let key_sig = try_decode(stack.as_deref().filter(|s| s.len() == 1), validate, |stack| {
            Bip340Sig::from_bytes(&stack[0]).map_err(|_| PaymentError::WitnessInvalid)
        })?;
        let script_spend =
            try_decode(stack.as_deref().filter(|s| s.len() >= 2), validate, decode_script_spend)?;

        let redeem_version = redeem_version
            .or_else(|| redeem.as_ref().and_then(|redeem| redeem.redeem_version))
            .or_else(|| script_spend.as_ref().map(|spend| spend.leaf_script.version))
            .unwrap_or_default();

        let hash = agree(Field::Hash, validate, [
            hash,
            script_tree.as_ref().map(TapTree::merkle_root),
            script_spend.as_ref().map(|spend| spend.merkle_root),
        ])?;
        let internal_pubkey = agree(Field::InternalPubkey, validate, [
            internal_pubkey,
            script_spend.as_ref().map(|spend| spend.control_block.internal_pk),
        ])?;
        let tweaked = internal_pubkey.map(|pk| pk.to_output_pk(hash));
        let pubkey = agree(Field::Pubkey, validate, [
            pubkey,
            output_pk,
            from_address.map(|(_, pk)| pk),
            tweaked.map(|(pk, _)| pk),
        ])?;
        let parity = tweaked.map(|(_, parity)| parity);

        if validate {
            if let (Some(spend), Some(parity)) = (&script_spend, parity) {
                if spend.control_block.output_key_parity != parity {
                    return Err(PaymentError::IncorrectParity);
                }
            }
            if let Some(redeem) = &redeem {
                check_redeem(redeem, network, redeem_version, &script_tree, &script_spend)?;
            }
        }

        let signature = agree(Field::Signature, validate, [signature, key_sig])?;
        let redeem = redeem.or_else(|| {
            script_spend.as_ref().map(|spend| Redeem {
                output: Some(spend.leaf_script.script.clone()),
                witness: Some(Witness::from_consensus_stack(spend.args.clone())),
                network: Some(network),
                redeem_version: Some(spend.leaf_script.version),
                ..default!()
            })
        });

        let output = output.or_else(|| pubkey.map(|pk| pk.to_script_pubkey()));
        let address = pubkey.map(|pk| Address::new(AddressPayload::Tr(pk), network.into()));
        let witness = witness.or_else(|| match signature {
            Some(sig) => Some(Witness::from_consensus_stack([sig.to_vec()])),
            None => compile_script_witness(
                redeem.as_ref()?,
                redeem_version,
                internal_pubkey?,
                parity?,
                script_tree.as_ref()?,
            ),
        });

        Ok(P2tr {
            network,
            address,
            output,
            pubkey,
            parity,
            internal_pubkey,
            hash,
            script_tree,
            signature,
            redeem,
            redeem_version,
            witness,
        })
    }

    pub fn pubkey(&self) -> Option<OutputPk> { self.pubkey }

    /// Parity of the output key, known when the internal key is known.
    pub fn parity(&self) -> Option<Parity> { self.parity }

    pub fn internal_pubkey(&self) -> Option<InternalPk> { self.internal_pubkey }

    pub fn hash(&self) -> Option<TapNodeHash> { self.hash }

    pub fn script_tree(&self) -> Option<&TapTree> { self.script_tree.as_ref() }

    pub fn signature(&self) -> Option<Bip340Sig> { self.signature }

    pub fn redeem(&self) -> Option<&Redeem> { self.redeem.as_ref() }
}

fn decode_output(output: &ScriptPubkey) -> Result<OutputPk, PaymentError> {
    if !output.is_p2tr() {
        return Err(PaymentError::OutputInvalid);
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&output[2..]);
    OutputPk::from_byte_array(key).map_err(|_| PaymentError::OutputInvalid)
}

/// Removes the annex, which is the last of two or more witness items starting with `0x50`.
fn strip_annex(witness: &Witness) -> Vec<Vec<u8>> {
    let mut stack = witness.to_stack();
    if stack.len() >= 2 && stack.last().and_then(|item| item.first()) == Some(&TAPROOT_ANNEX_PREFIX)
    {
        stack.pop();
    }
    stack
}

fn decode_script_spend(stack: &[Vec<u8>]) -> Result<ScriptSpend, PaymentError> {
    let [args @ .., script, control_block] = stack else {
        return Err(PaymentError::WitnessInvalid);
    };
    let control_block = ControlBlock::from_slice(control_block)?;
    let leaf_script = LeafScript::with_bytes(control_block.leaf_version, script.clone())
        .map_err(|_| PaymentError::WitnessInvalid)?;
    let merkle_root = control_block.merkle_root(leaf_script.tap_leaf_hash());
    Ok(ScriptSpend {
        args: args.to_vec(),
        leaf_script,
        control_block,
        merkle_root,
    })
}

fn check_redeem(
    redeem: &Redeem,
    network: Network,
    redeem_version: LeafVer,
    script_tree: &Option<TapTree>,
    script_spend: &Option<ScriptSpend>,
) -> Result<(), PaymentError> {
    if matches!(redeem.network, Some(n) if n != network) {
        return Err(PaymentError::Mismatch(Field::Network));
    }
    if let Some(output) = &redeem.output {
        let leaf_hash = LeafScript::new(redeem_version, output.clone()).tap_leaf_hash();
        if matches!(script_tree, Some(tree) if !tree.contains(leaf_hash)) {
            return Err(PaymentError::RedeemNotInTree);
        }
        if matches!(script_spend, Some(spend) if spend.leaf_script.script != *output) {
            return Err(PaymentError::Mismatch(Field::RedeemOutput));
        }
    }
    if let (Some(witness), Some(spend)) = (&redeem.witness, script_spend) {
        if witness.to_stack() != spend.args {
            return Err(PaymentError::Mismatch(Field::RedeemWitness));
        }
    }
    Ok(())
}

fn compile_script_witness(
    redeem: &Redeem,
    redeem_version: LeafVer,
    internal_pk: InternalPk,
    parity: Parity,
    script_tree: &TapTree,
) -> Option<Witness> {
    let script: &ScriptBytes = redeem.output.as_ref()?;
    let args = redeem.witness.as_ref()?;
    let leaf_script = LeafScript::new(redeem_version, script.clone());
    let path = script_tree.as_node().find_script_path(leaf_script.tap_leaf_hash())?;
    let merkle_branch = TapMerklePath::try_from(path).ok()?;
    let control_block = ControlBlock::with(redeem_version, internal_pk, parity, merkle_branch);
    let mut stack = args.to_stack();
    stack.push(script.to_vec());
    stack.push(control_block.to_vec());
    Some(Witness::from_consensus_stack(stack))
}

impl Payment for P2tr {
    fn template_type(&self) -> TemplateType { TemplateType::P2tr }
    fn network(&self) -> Network { self.network }
    fn output(&self) -> Option<&ScriptPubkey> { self.output.as_ref() }
    fn address(&self) -> Option<Address> { self.address }
    fn input(&self) -> Option<&SigScript> { None }
    fn witness(&self) -> Option<&Witness> { self.witness.as_ref() }
    fn redeem_version(&self) -> Option<LeafVer> { Some(self.redeem_version) }
}
