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

use invoice::Network;
use primitives::{
    sig_script_from_stack, LegacyPk, LegacySig, ScriptBytesExt, ScriptPubkey, ScriptPubkeyExt,
    SigScript, Witness,
};

use crate::check::{agree, canonical_sig, try_decode};
use crate::{Field, Payment, PaymentError, PaymentOpts, TemplateType};

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct P2pkFields {
    pub network: Option<Network>,
    pub output: Option<ScriptPubkey>,
    pub pubkey: Option<LegacyPk>,
    pub signature: Option<LegacySig>,
    pub input: Option<SigScript>,
}

/// Pay-to-pubkey: `<pubkey> OP_CHECKSIG`, spent with `<sig>`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct P2pk {
    network: Network,
    pubkey: Option<LegacyPk>,
    signature: Option<LegacySig>,
    output: Option<ScriptPubkey>,
    input: Option<SigScript>,
    witness: Option<Witness>,
}

impl P2pk {
    pub fn with(fields: P2pkFields, opts: PaymentOpts) -> Result<Self, PaymentError> {
        let P2pkFields {
            network,
            output,
            pubkey,
            signature,
            input,
        } = fields;
        if output.is_none() && pubkey.is_none() && signature.is_none() && input.is_none() {
            return Err(PaymentError::NotEnoughData);
        }
        let validate = opts.validate;

        let output_pk = try_decode(output.as_ref(), validate, decode_output)?;
        let input_sig = try_decode(input.as_ref(), validate, decode_input)?;

        let pubkey = agree(Field::Pubkey, validate, [pubkey, output_pk])?;
        let signature = agree(Field::Signature, validate, [signature, input_sig])?;

        let output = output.or_else(|| pubkey.as_ref().map(ScriptPubkey::p2pk));
        let input = input.or_else(|| signature.map(|sig| sig_script_from_stack(&[sig.to_vec()])));
        let witness = input.as_ref().map(|_| Witness::new());

        Ok(P2pk {
            network: network.unwrap_or_default(),
            pubkey,
            signature,
            output,
            input,
            witness,
        })
    }

    pub fn pubkey(&self) -> Option<LegacyPk> { self.pubkey }

    pub fn signature(&self) -> Option<LegacySig> { self.signature }
}

fn decode_output(output: &ScriptPubkey) -> Result<LegacyPk, PaymentError> {
    if !output.is_p2pk() {
        return Err(PaymentError::OutputInvalid);
    }
    LegacyPk::from_bytes(&output[1..output.len() - 1]).map_err(|_| PaymentError::OutputInvalid)
}

fn decode_input(input: &SigScript) -> Result<LegacySig, PaymentError> {
    let stack = input.to_stack().map_err(|_| PaymentError::InputInvalid)?;
    match stack.as_slice() {
        [sig] => canonical_sig(sig).ok_or(PaymentError::InputInvalid),
        _ => Err(PaymentError::InputInvalid),
    }
}

impl Payment for P2pk {
    fn template_type(&self) -> TemplateType { TemplateType::P2pk }
    fn network(&self) -> Network { self.network }
    fn output(&self) -> Option<&ScriptPubkey> { self.output.as_ref() }
    fn input(&self) -> Option<&SigScript> { self.input.as_ref() }
    fn witness(&self) -> Option<&Witness> { self.witness.as_ref() }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixtures::{legacy_pk, legacy_sig};

    #[test]
    fn from_pubkey() {
        let pk = legacy_pk(1);
        let p2pk = P2pk::with(
            P2pkFields {
                pubkey: Some(pk),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        let output = p2pk.output().unwrap();
        assert!(output.is_p2pk());
        assert_eq!(p2pk.input(), None);

        let decoded = P2pk::with(
            P2pkFields {
                output: Some(output.clone()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(decoded, p2pk);
    }

    #[test]
    fn input_roundtrip() {
        let sig = legacy_sig(2);
        let p2pk = P2pk::with(
            P2pkFields {
                signature: Some(sig),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        let input = p2pk.input().unwrap().clone();
        assert_eq!(input.to_stack().unwrap(), vec![sig.to_vec()]);
        assert_eq!(p2pk.witness(), Some(&Witness::new()));

        let decoded = P2pk::with(
            P2pkFields {
                input: Some(input),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(decoded.signature(), Some(sig));
    }

    #[test]
    fn errors() {
        assert_eq!(P2pk::with(default!(), default!()), Err(PaymentError::NotEnoughData));
        let output = ScriptPubkey::p2pk(&legacy_pk(1));
        let res = P2pk::with(
            P2pkFields {
                output: Some(output.clone()),
                pubkey: Some(legacy_pk(2)),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::Mismatch(Field::Pubkey)));

        let mut broken = output.to_vec();
        broken[1] = 0x01;
        let fields = P2pkFields {
            output: Some(ScriptPubkey::from_unsafe(broken)),
            pubkey: Some(legacy_pk(2)),
            ..default!()
        };
        assert_eq!(
            P2pk::with(fields.clone(), default!()),
            Err(PaymentError::OutputInvalid)
        );
        // without validation the broken output is kept and nothing is cross-checked
        let unchecked = P2pk::with(fields, PaymentOpts::unchecked()).unwrap();
        assert_eq!(unchecked.pubkey(), Some(legacy_pk(2)));
    }

    #[test]
    fn invalid_input() {
        let input = sig_script_from_stack(&[vec![0x30, 0x01, 0x01]]);
        assert_eq!(
            P2pk::with(
                P2pkFields {
                    input: Some(input),
                    ..default!()
                },
                default!()
            ),
            Err(PaymentError::InputInvalid)
        );
    }
}
