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
    sha256, ScriptBytes, ScriptBytesExt, ScriptPubkey, SigScript, WScriptHash, Witness, WitnessExt,
};

use crate::check::{agree, has_uncompressed_pubkey, resolve_network, segwit_payload, try_decode};
use crate::{Field, Payment, PaymentError, PaymentOpts, Redeem, TemplateType};

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct P2wshFields {
    pub network: Option<Network>,
    pub address: Option<String>,
    pub hash: Option<WScriptHash>,
    pub output: Option<ScriptPubkey>,
    pub redeem: Option<Redeem>,
    pub input: Option<SigScript>,
    pub witness: Option<Witness>,
}

/// Pay-to-witness-script-hash: `OP_0 <sha256(script)>`, spent with the redeem witness followed
/// by the witness script.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct P2wsh {
    network: Network,
    address: Option<Address>,
    hash: Option<WScriptHash>,
    output: Option<ScriptPubkey>,
    redeem: Option<Redeem>,
    input: Option<SigScript>,
    witness: Option<Witness>,
}

impl P2wsh {
    pub fn with(fields: P2wshFields, opts: PaymentOpts) -> Result<Self, PaymentError> {
        let P2wshFields {
            network,
            address,
            hash,
            output,
            redeem,
            input,
            witness,
        } = fields;
        if address.is_none()
            && hash.is_none()
            && output.is_none()
            && redeem.is_none()
            && witness.is_none()
        {
            return Err(PaymentError::NotEnoughData);
        }
        let validate = opts.validate;

        let from_address =
            try_decode(address.as_deref(), validate, |s| segwit_payload::<32>(s, 0))?;
        let network =
            resolve_network(network, from_address.map(|(network, _)| (network, false)), validate)?;
        let output_hash = try_decode(output.as_ref(), validate, decode_output)?;
        let from_witness = witness
            .as_ref()
            .filter(|witness| !witness.is_empty())
            .map(|witness| decode_witness(witness, network));

        if validate {
            if matches!(&input, Some(input) if !input.is_empty()) {
                return Err(PaymentError::InputNotEmpty);
            }
            if let Some(redeem) = &redeem {
                check_redeem(redeem, network)?;
                if let Some(decoded) = &from_witness {
                    if redeem.output.is_some() && redeem.output != decoded.output {
                        return Err(PaymentError::Mismatch(Field::RedeemOutput));
                    }
                    if redeem.has_witness() && redeem.witness != decoded.witness {
                        return Err(PaymentError::Mismatch(Field::Witness));
                    }
                }
            }
            if let Some(decoded) = &from_witness {
                if matches!(&decoded.output, Some(output) if has_uncompressed_pubkey(output)) {
                    return Err(PaymentError::UncompressedPubkey);
                }
            }
        }

        let redeem_hash = |redeem: &Redeem| {
            redeem.output.as_ref().map(|output| WScriptHash::from(sha256(output)))
        };
        let hash = agree(Field::Hash, validate, [
            hash,
            from_address.map(|(_, hash)| WScriptHash::from(hash)),
            output_hash,
            redeem.as_ref().and_then(redeem_hash),
            from_witness.as_ref().and_then(redeem_hash),
        ])?;

        let redeem = redeem.or(from_witness);
        let output = output.or_else(|| hash.map(ScriptPubkey::p2wsh));
        let address = hash.map(|hash| Address::new(AddressPayload::Wsh(hash), network.into()));
        let witness = witness.or_else(|| redeem.as_ref().and_then(compile_witness));
        let input = input.or_else(|| witness.as_ref().map(|_| SigScript::new()));

        Ok(P2wsh {
            network,
            address,
            hash,
            output,
            redeem,
            input,
            witness,
        })
    }

    pub fn hash(&self) -> Option<WScriptHash> { self.hash }

    pub fn redeem(&self) -> Option<&Redeem> { self.redeem.as_ref() }
}

fn decode_output(output: &ScriptPubkey) -> Result<WScriptHash, PaymentError> {
    if !output.is_p2wsh() {
        return Err(PaymentError::OutputInvalid);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&output[2..]);
    Ok(WScriptHash::from(hash))
}

fn decode_witness(witness: &Witness, network: Network) -> Redeem {
    let mut stack = witness.to_stack();
    let output = stack.pop().map(ScriptBytes::from_unsafe);
    Redeem {
        output,
        input: Some(SigScript::new()),
        witness: Some(Witness::from_consensus_stack(stack)),
        network: Some(network),
        ..default!()
    }
}

fn check_redeem(redeem: &Redeem, network: Network) -> Result<(), PaymentError> {
    if matches!(redeem.network, Some(n) if n != network) {
        return Err(PaymentError::Mismatch(Field::Network));
    }
    if redeem.has_input() && redeem.has_witness() {
        return Err(PaymentError::InputAndWitness);
    }
    if (redeem.input.is_some() || redeem.witness.is_some())
        && !redeem.has_input()
        && !redeem.has_witness()
    {
        return Err(PaymentError::EmptyInput);
    }
    if let Some(output) = &redeem.output {
        if output.decompile()?.is_empty() {
            return Err(PaymentError::RedeemOutputTooShort);
        }
        if has_uncompressed_pubkey(output) {
            return Err(PaymentError::UncompressedPubkey);
        }
    }
    if let Some(input) = redeem.input.as_ref().filter(|_| redeem.has_input()) {
        if !input.is_push_only() {
            return Err(PaymentError::NonPushOnly);
        }
        if has_uncompressed_pubkey(input.as_script_bytes()) {
            return Err(PaymentError::UncompressedPubkey);
        }
    }
    Ok(())
}

/// Witness spending the redeem: its witness items (or its scriptSig turned into a stack)
/// followed by the witness script.
fn compile_witness(redeem: &Redeem) -> Option<Witness> {
    let output = redeem.output.as_ref()?;
    let mut stack = match (&redeem.input, &redeem.witness) {
        (Some(input), _) if redeem.has_input() => input.to_stack().ok()?,
        (_, Some(witness)) => witness.to_stack(),
        _ => return None,
    };
    stack.push(output.to_vec());
    Some(Witness::from_consensus_stack(stack))
}

impl Payment for P2wsh {
    fn template_type(&self) -> TemplateType { TemplateType::P2wsh }

    fn name(&self) -> String {
        match self.redeem.as_ref().and_then(|redeem| redeem.name.as_ref()) {
            Some(name) => format!("p2wsh-{name}"),
            None => s!("p2wsh"),
        }
    }

    fn network(&self) -> Network { self.network }
    fn output(&self) -> Option<&ScriptPubkey> { self.output.as_ref() }
    fn address(&self) -> Option<Address> { self.address }
    fn input(&self) -> Option<&SigScript> { self.input.as_ref() }
    fn witness(&self) -> Option<&Witness> { self.witness.as_ref() }

    fn to_redeem(&self) -> Redeem {
        Redeem {
            output: self.output.as_ref().map(|output| output.as_script_bytes().clone()),
            input: self.input.clone(),
            witness: self.witness.clone(),
            network: Some(self.network),
            redeem_version: None,
            name: Some(self.name()),
            witness_script: self.redeem.as_ref().and_then(|redeem| redeem.output.clone()),
        }
    }
}

#[cfg(test)]
mod test {
    use primitives::{LegacyPk, ScriptPubkeyExt};

    use super::*;
    use crate::fixtures::{legacy_pk, legacy_sig};
    use crate::{P2ms, P2msFields, P2sh, P2shFields};

    fn multisig(signed: bool) -> P2ms {
        P2ms::with(
            P2msFields {
                m: Some(1),
                pubkeys: Some(vec![legacy_pk(1), legacy_pk(2)]),
                signatures: signed.then(|| vec![Some(legacy_sig(1))]),
                ..default!()
            },
            default!(),
        )
        .unwrap()
    }

    #[test]
    fn multisig_witness() {
        let p2ms = multisig(true);
        let p2wsh = P2wsh::with(
            P2wshFields {
                redeem: Some(p2ms.to_redeem()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(p2wsh.name(), "p2wsh-p2ms(1 of 2)");
        assert_eq!(p2wsh.input(), Some(&SigScript::new()));
        let witness = p2wsh.witness().unwrap();
        assert_eq!(witness.to_stack(), vec![
            vec![],
            legacy_sig(1).to_vec(),
            p2ms.output().unwrap().to_vec()
        ]);
        assert!(p2wsh.address().unwrap().to_string().starts_with("bc1q"));

        let decoded = P2wsh::with(
            P2wshFields {
                witness: Some(witness.clone()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(decoded.hash(), p2wsh.hash());
        assert_eq!(decoded.output(), p2wsh.output());
    }

    #[test]
    fn nested_in_p2sh() {
        let p2wsh = P2wsh::with(
            P2wshFields {
                redeem: Some(multisig(true).to_redeem()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        let p2sh = P2sh::with(
            P2shFields {
                redeem: Some(p2wsh.to_redeem()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(p2sh.name(), "p2sh-p2wsh-p2ms(1 of 2)");
        let input = p2sh.input().unwrap();
        assert_eq!(input.to_stack().unwrap(), vec![p2wsh.output().unwrap().to_vec()]);
        assert_eq!(p2sh.witness(), p2wsh.witness());
    }

    #[test]
    fn unsigned_redeem() {
        let p2wsh = P2wsh::with(
            P2wshFields {
                redeem: Some(multisig(false).to_redeem()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert!(p2wsh.output().unwrap().is_p2wsh());
        assert_eq!(p2wsh.witness(), None);
        assert_eq!(p2wsh.input(), None);
        assert_eq!(
            p2wsh.to_redeem().witness_script.as_ref(),
            multisig(false).output().map(ScriptPubkey::as_script_bytes)
        );
    }

    #[test]
    fn witness_mismatch() {
        let p2ms = multisig(true);
        let mut stack = P2wsh::with(
            P2wshFields {
                redeem: Some(p2ms.to_redeem()),
                ..default!()
            },
            default!(),
        )
        .unwrap()
        .witness()
        .unwrap()
        .to_stack();
        stack.pop();
        stack.push(vec![0x51]);
        let witness = Witness::from_consensus_stack(stack);
        let res = P2wsh::with(
            P2wshFields {
                redeem: Some(Redeem::with_output(p2ms.output().unwrap().to_vec())),
                witness: Some(witness),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::Mismatch(Field::RedeemOutput)));
    }

    #[test]
    fn uncompressed_key() {
        let pk = legacy_pk(1);
        let uncompressed = LegacyPk::uncompressed(pk.pubkey);
        let script = ScriptPubkey::p2pk(&uncompressed);
        let res = P2wsh::with(
            P2wshFields {
                redeem: Some(Redeem::with_output(script.to_vec())),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::UncompressedPubkey));
    }
}
