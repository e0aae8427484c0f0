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
use primitives::{CompressedPk, LegacySig, ScriptPubkey, SigScript, WPubkeyHash, Witness};

use crate::check::{agree, canonical_sig, resolve_network, segwit_payload, try_decode};
use crate::{Field, Payment, PaymentError, PaymentOpts, TemplateType};

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct P2wpkhFields {
    pub network: Option<Network>,
    pub address: Option<String>,
    pub hash: Option<WPubkeyHash>,
    pub output: Option<ScriptPubkey>,
    pub pubkey: Option<CompressedPk>,
    pub signature: Option<LegacySig>,
    pub input: Option<SigScript>,
    pub witness: Option<Witness>,
}

/// Pay-to-witness-pubkey-hash: `OP_0 <hash>`, spent with witness `[sig, pubkey]`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct P2wpkh {
    network: Network,
    address: Option<Address>,
    hash: Option<WPubkeyHash>,
    pubkey: Option<CompressedPk>,
    signature: Option<LegacySig>,
    output: Option<ScriptPubkey>,
    input: Option<SigScript>,
    witness: Option<Witness>,
}

impl P2wpkh {
    pub fn with(fields: P2wpkhFields, opts: PaymentOpts) -> Result<Self, PaymentError> {
        let P2wpkhFields {
            network,
            address,
            hash,
            output,
            pubkey,
            signature,
            input,
            witness,
        } = fields;
        if address.is_none()
            && hash.is_none()
            && output.is_none()
            && pubkey.is_none()
            && witness.is_none()
        {
            return Err(PaymentError::NotEnoughData);
        }
        let validate = opts.validate;

        let from_address =
            try_decode(address.as_deref(), validate, |s| segwit_payload::<20>(s, 0))?;
        let network =
            resolve_network(network, from_address.map(|(network, _)| (network, false)), validate)?;
        let output_hash = try_decode(output.as_ref(), validate, decode_output)?;
        let from_witness = try_decode(witness.as_ref(), validate, decode_witness)?;
        if validate && matches!(&input, Some(input) if !input.is_empty()) {
            return Err(PaymentError::InputNotEmpty);
        }

        let pubkey = agree(Field::Pubkey, validate, [pubkey, from_witness.map(|(_, pk)| pk)])?;
        let signature =
            agree(Field::Signature, validate, [signature, from_witness.map(|(sig, _)| sig)])?;
        let hash = agree(Field::Hash, validate, [
            hash,
            from_address.map(|(_, hash)| WPubkeyHash::from(hash)),
            output_hash,
            pubkey.map(WPubkeyHash::from),
        ])?;

        let output = output.or_else(|| hash.map(ScriptPubkey::p2wpkh));
        let address = hash.map(|hash| Address::new(AddressPayload::Wpkh(hash), network.into()));
        let witness = witness.or_else(|| match (signature, pubkey) {
            (Some(sig), Some(pk)) => Some(Witness::from_consensus_stack([
                sig.to_vec(),
                pk.to_byte_array().to_vec(),
            ])),
            _ => None,
        });
        let input = input.or_else(|| witness.as_ref().map(|_| SigScript::new()));

        Ok(P2wpkh {
            network,
            address,
            hash,
            pubkey,
            signature,
            output,
            input,
            witness,
        })
    }

    pub fn hash(&self) -> Option<WPubkeyHash> { self.hash }

    pub fn pubkey(&self) -> Option<CompressedPk> { self.pubkey }

    pub fn signature(&self) -> Option<LegacySig> { self.signature }
}

fn decode_output(output: &ScriptPubkey) -> Result<WPubkeyHash, PaymentError> {
    if !output.is_p2wpkh() {
        return Err(PaymentError::OutputInvalid);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&output[2..]);
    Ok(WPubkeyHash::from(hash))
}

fn decode_witness(witness: &Witness) -> Result<(LegacySig, CompressedPk), PaymentError> {
    let stack = witness.elements().collect::<Vec<_>>();
    let [sig, pk] = stack.as_slice() else {
        return Err(PaymentError::WitnessInvalid);
    };
    let sig = canonical_sig(sig).ok_or(PaymentError::WitnessInvalid)?;
    if pk.len() != 33 {
        return Err(PaymentError::WitnessInvalid);
    }
    let pk = CompressedPk::from_bytes(pk).map_err(|_| PaymentError::WitnessInvalid)?;
    Ok((sig, pk))
}

impl Payment for P2wpkh {
    fn template_type(&self) -> TemplateType { TemplateType::P2wpkh }
    fn network(&self) -> Network { self.network }
    fn output(&self) -> Option<&ScriptPubkey> { self.output.as_ref() }
    fn address(&self) -> Option<Address> { self.address }
    fn input(&self) -> Option<&SigScript> { self.input.as_ref() }
    fn witness(&self) -> Option<&Witness> { self.witness.as_ref() }
}
