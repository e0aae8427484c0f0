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
use primitives::{
    sig_script_from_stack, LegacyPk, LegacySig, PubkeyHash, ScriptBytesExt, ScriptPubkey,
    SigScript, Witness,
};

use crate::check::{agree, base58_payload, canonical_sig, resolve_network, try_decode};
use crate::{Field, Payment, PaymentError, PaymentOpts, TemplateType};

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct P2pkhFields {
    pub network: Option<Network>,
    pub address: Option<String>,
    pub hash: Option<PubkeyHash>,
    pub output: Option<ScriptPubkey>,
    pub pubkey: Option<LegacyPk>,
    pub signature: Option<LegacySig>,
    pub input: Option<SigScript>,
}

/// Pay-to-pubkey-hash: `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`, spent with
/// `<sig> <pubkey>`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct P2pkh {
    network: Network,
    address: Option<Address>,
    hash: Option<PubkeyHash>,
    pubkey: Option<LegacyPk>,
    signature: Option<LegacySig>,
    output: Option<ScriptPubkey>,
    input: Option<SigScript>,
    witness: Option<Witness>,
}

impl P2pkh {
    pub fn with(fields: P2pkhFields, opts: PaymentOpts) -> Result<Self, PaymentError> {
        let P2pkhFields {
            network,
            address,
            hash,
            output,
            pubkey,
            signature,
            input,
        } = fields;
        if address.is_none()
            && hash.is_none()
            && output.is_none()
            && pubkey.is_none()
            && input.is_none()
        {
            return Err(PaymentError::NotEnoughData);
        }
        let validate = opts.validate;

        let from_address = try_decode(address.as_deref(), validate, |s| base58_payload(s, true))?;
        let network =
            resolve_network(network, from_address.map(|(network, _)| (network, true)), validate)?;
        let output_hash = try_decode(output.as_ref(), validate, decode_output)?;
        let from_input = try_decode(input.as_ref(), validate, decode_input)?;

        let pubkey = agree(Field::Pubkey, validate, [pubkey, from_input.map(|(_, pk)| pk)])?;
        let signature =
            agree(Field::Signature, validate, [signature, from_input.map(|(sig, _)| sig)])?;
        let hash = agree(Field::Hash, validate, [
            hash,
            from_address.map(|(_, hash)| PubkeyHash::from(hash)),
            output_hash,
            pubkey.map(PubkeyHash::from),
        ])?;

        let output = output.or_else(|| hash.map(ScriptPubkey::p2pkh));
        let address = hash.map(|hash| Address::new(AddressPayload::Pkh(hash), network.into()));
        let input = input.or_else(|| match (signature, pubkey) {
            (Some(sig), Some(pk)) => Some(sig_script_from_stack(&[sig.to_vec(), pk.to_vec()])),
            _ => None,
        });
        let witness = input.as_ref().map(|_| Witness::new());

        Ok(P2pkh {
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

    pub fn hash(&self) -> Option<PubkeyHash> { self.hash }

    pub fn pubkey(&self) -> Option<LegacyPk> { self.pubkey }

    pub fn signature(&self) -> Option<LegacySig> { self.signature }
}

fn decode_output(output: &ScriptPubkey) -> Result<PubkeyHash, PaymentError> {
    if !output.is_p2pkh() {
        return Err(PaymentError::OutputInvalid);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&output[3..23]);
    Ok(PubkeyHash::from(hash))
}

fn decode_input(input: &SigScript) -> Result<(LegacySig, LegacyPk), PaymentError> {
    let stack = input.to_stack().map_err(|_| PaymentError::InputInvalid)?;
    let [sig, pk] = stack.as_slice() else {
        return Err(PaymentError::InputInvalid);
    };
    let sig = canonical_sig(sig).ok_or(PaymentError::InputInvalid)?;
    let pk = LegacyPk::from_bytes(pk).map_err(|_| PaymentError::InputInvalid)?;
    Ok((sig, pk))
}

impl Payment for P2pkh {
    fn template_type(&self) -> TemplateType { TemplateType::P2pkh }
    fn network(&self) -> Network { self.network }
    fn output(&self) -> Option<&ScriptPubkey> { self.output.as_ref() }
    fn address(&self) -> Option<Address> { self.address }
    fn input(&self) -> Option<&SigScript> { self.input.as_ref() }
    fn witness(&self) -> Option<&Witness> { self.witness.as_ref() }
}

#[cfg(test)]
mod test {
    use primitives::ScriptPubkeyExt;

    use super::*;
    use crate::fixtures::{legacy_pk, legacy_sig};

    const GENERATOR_P2PKH: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

    #[test]
    fn address_of_generator() {
        let pk: LegacyPk = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
            .parse()
            .unwrap();
        let p2pkh = P2pkh::with(
            P2pkhFields {
                pubkey: Some(pk),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(p2pkh.address().unwrap().to_string(), GENERATOR_P2PKH);

        let decoded = P2pkh::with(
            P2pkhFields {
                address: Some(GENERATOR_P2PKH.to_owned()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(decoded.output(), p2pkh.output());
        assert_eq!(decoded.hash(), p2pkh.hash());
    }

    #[test]
    fn spend() {
        let pk = legacy_pk(3);
        let sig = legacy_sig(3);
        let p2pkh = P2pkh::with(
            P2pkhFields {
                pubkey: Some(pk),
                signature: Some(sig),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        let input = p2pkh.input().unwrap().clone();
        let decoded = P2pkh::with(
            P2pkhFields {
                input: Some(input),
                output: p2pkh.output().cloned(),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(decoded, p2pkh);
    }

    #[test]
    fn mismatches() {
        let fields = P2pkhFields {
            pubkey: Some(legacy_pk(1)),
            hash: Some(PubkeyHash::from(legacy_pk(2))),
            ..default!()
        };
        assert_eq!(
            P2pkh::with(fields.clone(), default!()),
            Err(PaymentError::Mismatch(Field::Hash))
        );
        assert!(P2pkh::with(fields, PaymentOpts::unchecked()).is_ok());

        let res = P2pkh::with(
            P2pkhFields {
                address: Some(GENERATOR_P2PKH.to_owned()),
                network: Some(Network::Testnet3),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::Mismatch(Field::Network)));

        let res = P2pkh::with(
            P2pkhFields {
                address: Some(s!("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::InvalidAddressType));

        let res = P2pkh::with(
            P2pkhFields {
                output: Some(ScriptPubkey::p2pk(&legacy_pk(1))),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::OutputInvalid));
    }
}
