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
    hash160, ScriptBytes, ScriptBytesExt, ScriptHash, ScriptPubkey, SigScript, Witness,
};

use crate::check::{agree, base58_payload, resolve_network, try_decode};
use crate::{Field, Payment, PaymentError, PaymentOpts, Redeem, TemplateType};

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct P2shFields {
    pub network: Option<Network>,
    pub address: Option<String>,
    pub hash: Option<ScriptHash>,
    pub output: Option<ScriptPubkey>,
    pub redeem: Option<Redeem>,
    pub input: Option<SigScript>,
    pub witness: Option<Witness>,
}

/// Pay-to-script-hash: `OP_HASH160 <hash> OP_EQUAL`, spent with the redeem input pushes
/// followed by the redeem script.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct P2sh {
    network: Network,
    address: Option<Address>,
    hash: Option<ScriptHash>,
    output: Option<ScriptPubkey>,
    redeem: Option<Redeem>,
    input: Option<SigScript>,
    witness: Option<Witness>,
}

impl P2sh {
    pub fn with(fields: P2shFields, opts: PaymentOpts) -> Result<Self, PaymentError> {
        let P2shFields {
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
            && input.is_none()
        {
            return Err(PaymentError::NotEnoughData);
        }
        let validate = opts.validate;

        let from_address = try_decode(address.as_deref(), validate, |s| base58_payload(s, false))?;
        let network =
            resolve_network(network, from_address.map(|(network, _)| (network, true)), validate)?;
        let output_hash = try_decode(output.as_ref(), validate, decode_output)?;
        let from_input = try_decode(input.as_ref(), validate, |input| {
            decode_input(input, witness.as_ref(), network)
        })?;

        if validate {
            if let Some(redeem) = &redeem {
                if matches!(redeem.network, Some(n) if n != network) {
                    return Err(PaymentError::Mismatch(Field::Network));
                }
                if let Some(decoded) = &from_input {
                    if redeem.output.is_some() && redeem.output != decoded.output {
                        return Err(PaymentError::Mismatch(Field::RedeemOutput));
                    }
                    if redeem.input.is_some() && redeem.input != decoded.input {
                        return Err(PaymentError::Mismatch(Field::RedeemInput));
                    }
                }
                check_redeem(redeem)?;
                if let (Some(witness), Some(redeem_witness)) = (&witness, &redeem.witness) {
                    if witness != redeem_witness {
                        return Err(PaymentError::Mismatch(Field::RedeemWitness));
                    }
                }
            }
            if let Some(decoded) = &from_input {
                check_redeem(decoded)?;
            }
        }

        let redeem_hash = |redeem: &Redeem| {
            redeem.output.as_ref().map(|output| ScriptHash::from(hash160(output)))
        };
        let hash = agree(Field::Hash, validate, [
            hash,
            from_address.map(|(_, hash)| ScriptHash::from(hash)),
            output_hash,
            redeem.as_ref().and_then(redeem_hash),
            from_input.as_ref().and_then(redeem_hash),
        ])?;

        let redeem = redeem.or(from_input);
        let output = output.or_else(|| hash.map(ScriptPubkey::p2sh));
        let address = hash.map(|hash| Address::new(AddressPayload::Sh(hash), network.into()));
        let input = input.or_else(|| {
            let redeem = redeem.as_ref()?;
            let mut script = redeem.input.as_ref()?.as_script_bytes().clone();
            script.push_minimal(redeem.output.as_ref()?);
            Some(SigScript::from(script))
        });
        let witness = witness
            .or_else(|| redeem.as_ref().and_then(|redeem| redeem.witness.clone()))
            .or_else(|| input.as_ref().map(|_| Witness::new()));

        Ok(P2sh {
            network,
            address,
            hash,
            output,
            redeem,
            input,
            witness,
        })
    }

    pub fn hash(&self) -> Option<ScriptHash> { self.hash }

    pub fn redeem(&self) -> Option<&Redeem> { self.redeem.as_ref() }
}

fn decode_output(output: &ScriptPubkey) -> Result<ScriptHash, PaymentError> {
    if !output.is_p2sh() {
        return Err(PaymentError::OutputInvalid);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&output[2..22]);
    Ok(ScriptHash::from(hash))
}

/// Splits the scriptSig into the redeem script (the last push) and the redeem input.
fn decode_input(
    input: &SigScript,
    witness: Option<&Witness>,
    network: Network,
) -> Result<Redeem, PaymentError> {
    let instrs = input.decompile()?;
    let Some((last, rest)) = instrs.split_last() else {
        return Err(PaymentError::InputInvalid);
    };
    let output = last.to_stack_item().ok_or(PaymentError::InputInvalid)?;
    Ok(Redeem {
        output: Some(ScriptBytes::from_unsafe(output)),
        input: Some(SigScript::from(ScriptBytes::compile(rest))),
        witness: Some(witness.cloned().unwrap_or_default()),
        network: Some(network),
        ..default!()
    })
}

fn check_redeem(redeem: &Redeem) -> Result<(), PaymentError> {
    if let Some(output) = &redeem.output {
        if output.decompile()?.is_empty() {
            return Err(PaymentError::RedeemOutputTooShort);
        }
    }
    if let Some(input) = &redeem.input {
        match (redeem.has_input(), redeem.has_witness()) {
            (false, false) => return Err(PaymentError::EmptyInput),
            (true, true) => return Err(PaymentError::InputAndWitness),
            (true, false) if !input.is_push_only() => return Err(PaymentError::NonPushOnly),
            _ => {}
        }
    }
    Ok(())
}

impl Payment for P2sh {
    fn template_type(&self) -> TemplateType { TemplateType::P2sh }

    fn name(&self) -> String {
        match self.redeem.as_ref().and_then(|redeem| redeem.name.as_ref()) {
            Some(name) => format!("p2sh-{name}"),
            None => s!("p2sh"),
        }
    }

    fn network(&self) -> Network { self.network }
    fn output(&self) -> Option<&ScriptPubkey> { self.output.as_ref() }
    fn address(&self) -> Option<Address> { self.address }
    fn input(&self) -> Option<&SigScript> { self.input.as_ref() }
    fn witness(&self) -> Option<&Witness> { self.witness.as_ref() }
}

#[cfg(test)]
mod test {
    use primitives::opcodes::{OP_EQUAL, OP_HASH160};
    use primitives::{sig_script_from_stack, PubkeyHash};

    use super::*;
    use crate::fixtures::{legacy_pk, legacy_sig};
    use crate::{P2pkh, P2pkhFields};

    #[test]
    fn op_true_redeem() {
        let p2sh = P2sh::with(
            P2shFields {
                redeem: Some(Redeem::with_output(vec![0x51])),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        let hash = hash160([0x51]);
        assert_eq!(p2sh.hash(), Some(ScriptHash::from(hash)));
        let mut expected = vec![OP_HASH160, 0x14];
        expected.extend(hash);
        expected.push(OP_EQUAL);
        assert_eq!(p2sh.output().unwrap().to_vec(), expected);
        assert!(p2sh.address().unwrap().to_string().starts_with('3'));
        assert_eq!(p2sh.input(), None);
    }

    #[test]
    fn wrapped_p2pkh() {
        let pk = legacy_pk(4);
        let p2pkh = P2pkh::with(
            P2pkhFields {
                pubkey: Some(pk),
                signature: Some(legacy_sig(4)),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        let p2sh = P2sh::with(
            P2shFields {
                redeem: Some(p2pkh.to_redeem()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(p2sh.name(), "p2sh-p2pkh");
        let input = p2sh.input().unwrap().clone();
        let stack = input.to_stack().unwrap();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack[2], p2pkh.output().unwrap().to_vec());
        assert_eq!(p2sh.witness(), Some(&Witness::new()));

        let decoded = P2sh::with(
            P2shFields {
                input: Some(input),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(decoded.hash(), p2sh.hash());
        assert_eq!(decoded.redeem().unwrap().output, p2pkh.to_redeem().output);
        assert_eq!(decoded.redeem().unwrap().input, p2pkh.to_redeem().input);
    }

    #[test]
    fn redeem_mismatch() {
        let redeem = Redeem::with_output(vec![0x51]);
        let p2sh = P2sh::with(
            P2shFields {
                redeem: Some(redeem),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        let other = ScriptPubkey::p2pkh(PubkeyHash::from(legacy_pk(1)));
        let input = sig_script_from_stack(&[vec![0x01], other.to_vec()]);
        let res = P2sh::with(
            P2shFields {
                redeem: Some(Redeem::with_output(vec![0x51])),
                input: Some(input),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::Mismatch(Field::RedeemOutput)));

        let res = P2sh::with(
            P2shFields {
                output: p2sh.output().cloned(),
                redeem: Some(Redeem::with_output(vec![0x52])),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::Mismatch(Field::Hash)));
    }

    #[test]
    fn redeem_checks() {
        let non_push = Redeem {
            output: Some(ScriptBytes::from_unsafe(vec![0x51])),
            input: Some(SigScript::from_unsafe(vec![0x76])),
            ..default!()
        };
        let res = P2sh::with(
            P2shFields {
                redeem: Some(non_push),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::NonPushOnly));

        let empty = Redeem {
            output: Some(ScriptBytes::from_unsafe(vec![0x51])),
            input: Some(SigScript::new()),
            witness: Some(Witness::new()),
            ..default!()
        };
        let res = P2sh::with(
            P2shFields {
                redeem: Some(empty),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::EmptyInput));

        let both = Redeem {
            output: Some(ScriptBytes::from_unsafe(vec![0x51])),
            input: Some(SigScript::from_unsafe(vec![0x51])),
            witness: Some(Witness::from_consensus_stack([vec![1u8]])),
            ..default!()
        };
        let res = P2sh::with(
            P2shFields {
                redeem: Some(both),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::InputAndWitness));
    }
}
