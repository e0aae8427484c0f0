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

use payments::{
    P2msFields, P2pkFields, P2pkhFields, P2shFields, P2wpkhFields, P2wshFields, Payment,
    PaymentError, PaymentOpts, Redeem, ScriptTemplate, TemplateType,
};
use primitives::{
    CompressedPk, LegacyPk, LegacySig, PubkeyHash, ScriptPubkey, ScriptPubkeyExt, SigScript, Tx,
    WPubkeyHash, Witness,
};
use tracing::debug;

use crate::tap::{is_taproot_input, tap_script_finalizer};
use crate::{Input, Psbt, TapFieldError};

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum FinalizeError {
    /// PSBT doesn't have input #{0}.
    NoInput(usize),

    /// input #{0} has no information about the output it spends.
    NoPrevout(usize),

    /// input #{0} spends P2SH output but has no redeem script.
    NoRedeemScript(usize),

    /// input #{0} spends P2WSH output but has no witness script.
    NoWitnessScript(usize),

    /// input #{0} spends an output of unsupported type.
    UnsupportedScript(usize),

    /// input #{0} has no signature for the key required by its script.
    NoSignature(usize),

    /// input #{0} can't be finalized. Details: {1}
    Payment(usize, PaymentError),

    #[from]
    #[display(inner)]
    TapField(TapFieldError),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ExtractError {
    /// input #{0} is not finalized
    NotFinalized(usize),
}

impl Psbt {
    /// Finalizes all inputs which are not finalized yet and returns their number.
    ///
    /// Either all inputs get finalized or, if any of them can't be, the PSBT is left untouched
    /// and the error of the first such input is returned.
    pub fn finalize(&mut self) -> Result<usize, FinalizeError> {
        let finals = self
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| !input.is_finalized())
            .map(|(pos, input)| input.final_fields().map(|fields| (pos, fields)))
            .collect::<Result<Vec<_>, _>>()?;
        let count = finals.len();
        for (pos, (sig_script, witness)) in finals {
            self.inputs[pos].set_final(sig_script, witness);
        }
        debug!(inputs = count, "PSBT finalized");
        Ok(count)
    }

    /// Replaces signatures and scripts of the input with its final `scriptSig` and witness.
    ///
    /// Already finalized inputs are left as is.
    pub fn finalize_input(&mut self, index: usize) -> Result<(), FinalizeError> {
        let input = self.inputs.get_mut(index).ok_or(FinalizeError::NoInput(index))?;
        if input.is_finalized() {
            return Ok(());
        }
        let (sig_script, witness) = input.final_fields()?;
        input.set_final(sig_script, witness);
        Ok(())
    }

    /// Assembles the signed transaction out of the final fields of all inputs.
    pub fn extract_transaction(&self) -> Result<Tx, ExtractError> {
        let mut tx = self.to_unsigned_tx().finalize();
        for (txin, input) in tx.inputs.iter_mut().zip(&self.inputs) {
            if !input.is_finalized() {
                return Err(ExtractError::NotFinalized(input.index()));
            }
            txin.sig_script = input.final_script_sig.clone().unwrap_or_default();
            txin.witness = input.final_witness.clone().unwrap_or_default();
        }
        debug!(txid = %tx.txid(), "transaction extracted");
        Ok(tx)
    }
}

impl Input {
    fn final_fields(&self) -> Result<(Option<SigScript>, Option<Witness>), FinalizeError> {
        let index = self.index;
        let prevout = self.prev_txout().ok_or(FinalizeError::NoPrevout(index))?;

        let (sig_script, witness) = if is_taproot_input(self) {
            (None, Some(taproot_witness(index, self)?))
        } else {
            let template = finalize_template(index, self, &prevout.script_pubkey)?;
            let sig_script = template.input().filter(|script| !script.is_empty()).cloned();
            let witness = template.witness().filter(|witness| !witness.is_empty()).cloned();
            debug!(input = index, name = %template.name(), "finalizing input");
            (sig_script, witness)
        };
        if sig_script.is_none() && witness.is_none() {
            return Err(FinalizeError::NoSignature(index));
        }
        Ok((sig_script, witness))
    }

    fn set_final(&mut self, sig_script: Option<SigScript>, witness: Option<Witness>) {
        self.final_script_sig = sig_script;
        self.final_witness = witness;
        self.clear_finalized();
    }

    /// Drops the fields consumed by finalization. Only UTXOs, final fields and unknown keys
    /// remain.
    fn clear_finalized(&mut self) {
        self.partial_sigs.clear();
        self.sighash_type = None;
        self.redeem_script = None;
        self.witness_script = None;
        self.bip32_derivation.clear();
        self.ripemd160.clear();
        self.sha256.clear();
        self.hash160.clear();
        self.hash256.clear();
        self.tap_key_sig = None;
        self.tap_script_sig.clear();
        self.tap_leaf_script.clear();
        self.tap_bip32_derivation.clear();
        self.tap_internal_key = None;
        self.tap_merkle_root = None;
    }
}

fn taproot_witness(index: usize, input: &Input) -> Result<Witness, FinalizeError> {
    match input.tap_key_sig {
        Some(sig) => {
            debug!(input = index, "finalizing key path spend");
            Ok(Witness::from_consensus_stack([sig.to_vec()]))
        }
        None => Ok(tap_script_finalizer(index, input, None)?),
    }
}

/// Builds the payment satisfying `spk`, unwrapping P2SH and P2WSH layers with the redeem and
/// witness scripts of the input.
fn finalize_template(
    index: usize,
    input: &Input,
    spk: &ScriptPubkey,
) -> Result<ScriptTemplate, FinalizeError> {
    let payment = |res: Result<ScriptTemplate, PaymentError>| {
        res.map_err(|err| FinalizeError::Payment(index, err))
    };
    match TemplateType::detect(spk) {
        Some(TemplateType::P2sh) => {
            let redeem_script =
                input.redeem_script.as_ref().ok_or(FinalizeError::NoRedeemScript(index))?;
            let redeem_spk = ScriptPubkey::from(redeem_script.as_script_bytes().clone());
            let redeem = match TemplateType::detect(&redeem_spk) {
                Some(TemplateType::P2wsh) => wsh_template(index, input, &redeem_spk)?,
                _ => satisfy(index, input, &redeem_spk)?,
            };
            payment(ScriptTemplate::create(
                P2shFields {
                    output: Some(spk.clone()),
                    redeem: Some(Redeem::from(&redeem)),
                    ..default!()
                },
                PaymentOpts::default(),
            ))
        }
        Some(TemplateType::P2wsh) => wsh_template(index, input, spk),
        _ => satisfy(index, input, spk),
    }
}

fn wsh_template(
    index: usize,
    input: &Input,
    spk: &ScriptPubkey,
) -> Result<ScriptTemplate, FinalizeError> {
    let witness_script =
        input.witness_script.as_ref().ok_or(FinalizeError::NoWitnessScript(index))?;
    let redeem =
        satisfy(index, input, &ScriptPubkey::from(witness_script.as_script_bytes().clone()))?;
    ScriptTemplate::create(
        P2wshFields {
            output: Some(spk.clone()),
            redeem: Some(Redeem::from(&redeem)),
            ..default!()
        },
        PaymentOpts::default(),
    )
    .map_err(|err| FinalizeError::Payment(index, err))
}

/// Builds the innermost payment of the input out of its partial signatures.
fn satisfy(
    index: usize,
    input: &Input,
    script: &ScriptPubkey,
) -> Result<ScriptTemplate, FinalizeError> {
    let output = Some(script.clone());
    let sig_for = |matches: &dyn Fn(&LegacyPk) -> bool| {
        input
            .partial_sigs
            .iter()
            .find(|(pk, _)| matches(pk))
            .map(|(pk, sig)| (*pk, *sig))
            .ok_or(FinalizeError::NoSignature(index))
    };

    let res = match TemplateType::detect(script) {
        Some(TemplateType::P2pk) => {
            let (_, signature) = sig_for(&|pk| ScriptPubkey::p2pk(pk) == *script)?;
            ScriptTemplate::create(
                P2pkFields {
                    output,
                    signature: Some(signature),
                    ..default!()
                },
                PaymentOpts::default(),
            )
        }
        Some(TemplateType::P2pkh) => {
            let (pubkey, signature) =
                sig_for(&|pk| ScriptPubkey::p2pkh(PubkeyHash::from(*pk)) == *script)?;
            ScriptTemplate::create(
                P2pkhFields {
                    output,
                    pubkey: Some(pubkey),
                    signature: Some(signature),
                    ..default!()
                },
                PaymentOpts::default(),
            )
        }
        Some(TemplateType::P2wpkh) => {
            let (pubkey, signature) = sig_for(&|pk| {
                pk.compressed
                    && ScriptPubkey::p2wpkh(WPubkeyHash::from(CompressedPk::from(pk.pubkey)))
                        == *script
            })?;
            ScriptTemplate::create(
                P2wpkhFields {
                    output,
                    pubkey: Some(CompressedPk::from(pubkey.pubkey)),
                    signature: Some(signature),
                    ..default!()
                },
                PaymentOpts::default(),
            )
        }
        Some(TemplateType::P2ms) => {
            let signatures = multisig_signatures(index, input, script)?;
            ScriptTemplate::create(
                P2msFields {
                    output,
                    signatures: Some(signatures),
                    ..default!()
                },
                PaymentOpts::default(),
            )
        }
        _ => return Err(FinalizeError::UnsupportedScript(index)),
    };
    res.map_err(|err| FinalizeError::Payment(index, err))
}

/// Picks up to `m` signatures in the order of the public keys in the multisig script.
fn multisig_signatures(
    index: usize,
    input: &Input,
    script: &ScriptPubkey,
) -> Result<Vec<Option<LegacySig>>, FinalizeError> {
    let template = ScriptTemplate::create(
        P2msFields {
            output: Some(script.clone()),
            ..default!()
        },
        PaymentOpts::default(),
    )
    .map_err(|err| FinalizeError::Payment(index, err))?;
    let ScriptTemplate::P2ms(p2ms) = template else {
        return Err(FinalizeError::UnsupportedScript(index));
    };
    let m = p2ms.m().unwrap_or_default() as usize;
    Ok(p2ms
        .pubkeys()
        .unwrap_or_default()
        .iter()
        .filter_map(|pk| input.partial_sigs.get(pk).copied())
        .take(m)
        .map(Some)
        .collect())
}
