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

use std::iter;

use invoice::Network;
use primitives::{
    pushnum_value, sig_script_from_stack, Instruction, LegacyPk, LegacySig, ScriptBytesExt,
    ScriptPubkey, ScriptPubkeyExt, SigScript, Witness,
};

use crate::check::{agree, canonical_sig, try_decode};
use crate::{Field, Payment, PaymentError, PaymentOpts, TemplateType};

/// Maximal number of keys in a bare multisig script.
pub const MULTISIG_MAX_KEYS: u8 = 16;

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct P2msFields {
    pub network: Option<Network>,
    pub output: Option<ScriptPubkey>,
    pub m: Option<u8>,
    pub n: Option<u8>,
    pub pubkeys: Option<Vec<LegacyPk>>,
    /// Signatures in the order of their public keys. `None` stands for an empty placeholder,
    /// accepted only with [`PaymentOpts::allow_incomplete`].
    pub signatures: Option<Vec<Option<LegacySig>>>,
    pub input: Option<SigScript>,
}

/// Bare m-of-n multisig: `OP_m <pubkeys...> OP_n OP_CHECKMULTISIG`, spent with
/// `OP_0 <sig>...`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct P2ms {
    network: Network,
    m: Option<u8>,
    n: Option<u8>,
    pubkeys: Option<Vec<LegacyPk>>,
    signatures: Option<Vec<Option<LegacySig>>>,
    output: Option<ScriptPubkey>,
    input: Option<SigScript>,
    witness: Option<Witness>,
}

impl P2ms {
    pub fn with(fields: P2msFields, opts: PaymentOpts) -> Result<Self, PaymentError> {
        let P2msFields {
            network,
            output,
            m,
            n,
            pubkeys,
            signatures,
            input,
        } = fields;
        if input.is_none()
            && output.is_none()
            && !(m.is_some() && pubkeys.is_some())
            && signatures.is_none()
        {
            return Err(PaymentError::NotEnoughData);
        }
        let validate = opts.validate;

        let from_output = try_decode(output.as_ref(), validate, decode_output)?;
        let (out_m, out_n, out_pubkeys) = match from_output {
            Some((m, n, pubkeys)) => (Some(m), Some(n), Some(pubkeys)),
            None => (None, None, None),
        };

        let m = agree(Field::M, validate, [m, out_m])?;
        let n = agree(Field::N, validate, [n, out_n])?;
        if let (Some(n), Some(pubkeys)) = (n, &pubkeys) {
            if validate && pubkeys.len() != n as usize {
                return Err(PaymentError::Mismatch(Field::PubkeyCount));
            }
        }
        let pubkeys = agree(Field::Pubkeys, validate, [pubkeys, out_pubkeys])?;
        let n = n.or_else(|| pubkeys.as_ref().and_then(|pks| u8::try_from(pks.len()).ok()));
        if validate {
            check_bounds(m, n, pubkeys.as_ref().map(Vec::len))?;
        }

        let allow_incomplete = opts.allow_incomplete;
        let from_input =
            try_decode(input.as_ref(), validate, |input| decode_input(input, allow_incomplete))?;
        if validate {
            if let Some(signatures) = &signatures {
                if !allow_incomplete && signatures.iter().any(Option::is_none) {
                    return Err(PaymentError::InvalidSignatures);
                }
            }
        }
        let signatures = agree(Field::Signature, validate, [signatures, from_input])?;
        if let (Some(m), Some(signatures)) = (m, &signatures) {
            if validate && signatures.len() < m as usize {
                return Err(PaymentError::NotEnoughSignatures);
            }
            if validate && signatures.len() > m as usize {
                return Err(PaymentError::TooManySignatures);
            }
        }

        let output = output.or_else(|| match (m, &pubkeys) {
            (Some(m), Some(pubkeys)) => ScriptPubkey::multisig(m, pubkeys),
            _ => None,
        });
        let input = input.or_else(|| signatures.as_deref().map(compile_input));
        let witness = input.as_ref().map(|_| Witness::new());

        Ok(P2ms {
            network: network.unwrap_or_default(),
            m,
            n,
            pubkeys,
            signatures,
            output,
            input,
            witness,
        })
    }

    pub fn m(&self) -> Option<u8> { self.m }

    pub fn n(&self) -> Option<u8> { self.n }

    pub fn pubkeys(&self) -> Option<&[LegacyPk]> { self.pubkeys.as_deref() }

    pub fn signatures(&self) -> Option<&[Option<LegacySig>]> { self.signatures.as_deref() }
}

fn check_bounds(m: Option<u8>, n: Option<u8>, count: Option<usize>) -> Result<(), PaymentError> {
    let n = match (n, count) {
        (_, Some(count)) if count > MULTISIG_MAX_KEYS as usize => {
            return Err(PaymentError::MultisigBounds(m.unwrap_or_default(), u8::MAX));
        }
        (n, _) => n,
    };
    if let Some(m) = m {
        if !(1..=MULTISIG_MAX_KEYS).contains(&m) {
            return Err(PaymentError::MultisigBounds(m, n.unwrap_or_default()));
        }
    }
    if let Some(n) = n {
        if !(1..=MULTISIG_MAX_KEYS).contains(&n) {
            return Err(PaymentError::MultisigBounds(m.unwrap_or_default(), n));
        }
    }
    if let (Some(m), Some(n)) = (m, n) {
        if n < m {
            return Err(PaymentError::PubkeyCountBelowM);
        }
    }
    Ok(())
}

fn decode_output(output: &ScriptPubkey) -> Result<(u8, u8, Vec<LegacyPk>), PaymentError> {
    if !output.is_multisig() {
        return Err(PaymentError::OutputInvalid);
    }
    let instrs = output.decompile()?;
    let [Instruction::Op(op_m), keys @ .., Instruction::Op(op_n), _] = instrs.as_slice() else {
        return Err(PaymentError::OutputInvalid);
    };
    let (Some(m), Some(n)) = (pushnum_value(*op_m), pushnum_value(*op_n)) else {
        return Err(PaymentError::OutputInvalid);
    };
    let pubkeys = keys
        .iter()
        .map(|key| {
            key.push_bytes()
                .and_then(|data| LegacyPk::from_bytes(data).ok())
                .ok_or(PaymentError::OutputInvalid)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((m, n, pubkeys))
}

fn decode_input(
    input: &SigScript,
    allow_incomplete: bool,
) -> Result<Vec<Option<LegacySig>>, PaymentError> {
    let stack = input.to_stack().map_err(|_| PaymentError::InputInvalid)?;
    let Some((dummy, sigs)) = stack.split_first() else {
        return Err(PaymentError::InputInvalid);
    };
    if !dummy.is_empty() {
        return Err(PaymentError::InputInvalid);
    }
    sigs.iter()
        .map(|sig| match sig.is_empty() {
            true if allow_incomplete => Ok(None),
            true => Err(PaymentError::InvalidSignatures),
            false => canonical_sig(sig).map(Some).ok_or(PaymentError::InvalidSignatures),
        })
        .collect()
}

fn compile_input(signatures: &[Option<LegacySig>]) -> SigScript {
    let stack = iter::once(vec![])
        .chain(signatures.iter().map(|sig| sig.map(|sig| sig.to_vec()).unwrap_or_default()))
        .collect::<Vec<_>>();
    sig_script_from_stack(&stack)
}

impl Payment for P2ms {
    fn template_type(&self) -> TemplateType { TemplateType::P2ms }

    fn name(&self) -> String {
        match (self.m, self.n) {
            (Some(m), Some(n)) => format!("p2ms({m} of {n})"),
            _ => s!("p2ms"),
        }
    }

    fn network(&self) -> Network { self.network }
    fn output(&self) -> Option<&ScriptPubkey> { self.output.as_ref() }
    fn input(&self) -> Option<&SigScript> { self.input.as_ref() }
    fn witness(&self) -> Option<&Witness> { self.witness.as_ref() }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::fixtures::{legacy_pk, legacy_sig};

    fn keys(count: u8) -> Vec<LegacyPk> { (1..=count).map(legacy_pk).collect() }

    fn multisig(m: u8, count: u8) -> Result<P2ms, PaymentError> {
        P2ms::with(
            P2msFields {
                m: Some(m),
                pubkeys: Some(keys(count)),
                ..default!()
            },
            default!(),
        )
    }

    #[rstest]
    #[case(1, 1)]
    #[case(2, 3)]
    #[case(16, 16)]
    fn bounds_ok(#[case] m: u8, #[case] n: u8) {
        let p2ms = multisig(m, n).unwrap();
        assert_eq!(p2ms.n(), Some(n));
        assert!(p2ms.output().unwrap().is_multisig());
        assert_eq!(p2ms.name(), format!("p2ms({m} of {n})"));
    }

    #[rstest]
    #[case(3, 2, PaymentError::PubkeyCountBelowM)]
    #[case(0, 2, PaymentError::MultisigBounds(0, 2))]
    #[case(1, 17, PaymentError::MultisigBounds(1, u8::MAX))]
    fn bounds_err(#[case] m: u8, #[case] n: u8, #[case] err: PaymentError) {
        assert_eq!(multisig(m, n), Err(err));
    }

    #[test]
    fn decode_output_fields() {
        let p2ms = multisig(2, 3).unwrap();
        let decoded = P2ms::with(
            P2msFields {
                output: p2ms.output().cloned(),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(decoded, p2ms);

        let res = P2ms::with(
            P2msFields {
                output: p2ms.output().cloned(),
                m: Some(1),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::Mismatch(Field::M)));
        let res = P2ms::with(
            P2msFields {
                output: p2ms.output().cloned(),
                n: Some(2),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::Mismatch(Field::N)));
        let res = P2ms::with(
            P2msFields {
                m: Some(1),
                n: Some(3),
                pubkeys: Some(keys(2)),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::Mismatch(Field::PubkeyCount)));
    }

    #[test]
    fn signatures() {
        let sigs = vec![Some(legacy_sig(1)), Some(legacy_sig(2))];
        let p2ms = P2ms::with(
            P2msFields {
                m: Some(2),
                pubkeys: Some(keys(3)),
                signatures: Some(sigs.clone()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        let input = p2ms.input().unwrap();
        assert_eq!(input[0], 0x00);

        let decoded = P2ms::with(
            P2msFields {
                output: p2ms.output().cloned(),
                input: Some(input.clone()),
                ..default!()
            },
            default!(),
        )
        .unwrap();
        assert_eq!(decoded.signatures(), Some(sigs.as_slice()));

        let res = P2ms::with(
            P2msFields {
                m: Some(2),
                pubkeys: Some(keys(3)),
                signatures: Some(vec![Some(legacy_sig(1))]),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::NotEnoughSignatures));
        let res = P2ms::with(
            P2msFields {
                m: Some(1),
                pubkeys: Some(keys(3)),
                signatures: Some(sigs),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::TooManySignatures));
    }

    #[test]
    fn incomplete() {
        let sigs = vec![Some(legacy_sig(1)), None];
        let fields = P2msFields {
            m: Some(2),
            pubkeys: Some(keys(2)),
            signatures: Some(sigs.clone()),
            ..default!()
        };
        assert_eq!(P2ms::with(fields.clone(), default!()), Err(PaymentError::InvalidSignatures));
        let p2ms = P2ms::with(fields, PaymentOpts::incomplete()).unwrap();

        let input = p2ms.input().cloned();
        let fields = P2msFields {
            output: p2ms.output().cloned(),
            input,
            ..default!()
        };
        assert_eq!(P2ms::with(fields.clone(), default!()), Err(PaymentError::InvalidSignatures));
        let decoded = P2ms::with(fields, PaymentOpts::incomplete()).unwrap();
        assert_eq!(decoded.signatures(), Some(sigs.as_slice()));
    }

    #[test]
    fn input_without_dummy() {
        let input = sig_script_from_stack(&[legacy_sig(1).to_vec()]);
        let res = P2ms::with(
            P2msFields {
                m: Some(1),
                pubkeys: Some(keys(1)),
                input: Some(input),
                ..default!()
            },
            default!(),
        );
        assert_eq!(res, Err(PaymentError::InputInvalid));
    }
}
