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

//! PSBT construction and update: adding inputs and outputs from payment templates, merging
//! new fields into existing maps and guarding against modifications invalidating already
//! present signatures.

use indexmap::IndexMap;
use payments::{Payment, ScriptTemplate};
use primitives::{
    hash160, Bip340Sig, Instruction, KeyOrigin, LegacyPk, LegacySig, RedeemScript, Sats,
    ScriptBytes, ScriptBytesExt, SeqNo, SighashFlag, SighashType, TapDerivation, Tx, TxOut, Txid,
    WitnessScript, XOnlyPk,
};
use taproot::{
    ControlBlock, ControlBlockFactory, InternalPk, LeafScript, TapLeafHash, TapNodeHash, TapTree,
};
use tracing::{debug, trace};

use crate::tap::{
    check_taproot_input_fields, check_taproot_input_for_sigs, check_taproot_output_fields,
    is_taproot_input,
};
use crate::{Input, Output, Prevout, Psbt, PropKey, TapFieldError, Unmodifiable, ValueData};

/// Operations modifying a PSBT after its creation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum PsbtAction {
    #[display("add input")]
    AddInput,

    #[display("add output")]
    AddOutput,

    #[display("set input sequence")]
    SetInputSequence,

    #[display("update input")]
    UpdateInput,

    #[display("update output")]
    UpdateOutput,
}

/// Checks whether a signature with the given sighash type (`None` for taproot
/// `SIGHASH_DEFAULT`) stays valid after performing `action` on the transaction.
pub fn check_sighash_permits(sighash_type: Option<SighashType>, action: PsbtAction) -> bool {
    match (sighash_type, action) {
        // updates touch only PSBT metadata, not the signed transaction
        (_, PsbtAction::UpdateInput | PsbtAction::UpdateOutput) => true,
        (None, _) => false,
        (Some(ty), PsbtAction::AddInput) => ty.anyone_can_pay,
        (Some(ty), PsbtAction::AddOutput | PsbtAction::SetInputSequence) => {
            ty.flag != SighashFlag::All
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ConstructError {
    /// PSBT inputs or outputs can't be modified.
    #[from(Unmodifiable)]
    Unmodifiable,

    /// can't {0} since input #{1} has a signature committing to the transaction structure.
    SignatureCommits(PsbtAction, usize),

    /// input #{0} is not present in the PSBT.
    NoInput(usize),

    /// output #{0} is not present in the PSBT.
    NoOutput(usize),

    /// input #{0} is already finalized and can't be updated.
    Finalized(usize),

    /// previous transaction {1} doesn't match the outpoint spent by input #{0}.
    PrevTxMismatch(usize, Txid),

    /// payment template has no output script.
    NoOutputScript,

    #[from]
    #[display(inner)]
    TapField(TapFieldError),
}

/// Origin for keys not coming from an HD wallet: the key acts as its own master with an
/// empty derivation path.
fn self_origin(pubkey: impl AsRef<[u8]>) -> KeyOrigin {
    let hash = hash160(pubkey);
    KeyOrigin::new([hash[0], hash[1], hash[2], hash[3]], [])
}

fn script_pubkeys(script: &ScriptBytes) -> Vec<LegacyPk> {
    script
        .decompile()
        .unwrap_or_default()
        .iter()
        .filter_map(Instruction::push_bytes)
        .filter(|data| matches!(data.len(), 33 | 65))
        .filter_map(|data| LegacyPk::from_bytes(data).ok())
        .collect()
}

fn script_xonly_pubkeys(script: &ScriptBytes) -> Vec<XOnlyPk> {
    script
        .decompile()
        .unwrap_or_default()
        .iter()
        .filter_map(Instruction::push_bytes)
        .filter(|data| data.len() == 32)
        .filter_map(|data| XOnlyPk::from_bytes(data).ok())
        .collect()
}

/// Redeem and witness scripts of a script-hash payment.
fn template_scripts(template: &ScriptTemplate) -> (Option<RedeemScript>, Option<WitnessScript>) {
    match template {
        ScriptTemplate::P2sh(p2sh) => {
            let Some(redeem) = p2sh.redeem() else {
                return (None, None);
            };
            (
                redeem.output.clone().map(RedeemScript::from),
                redeem.witness_script.clone().map(WitnessScript::from),
            )
        }
        ScriptTemplate::P2wsh(p2wsh) => {
            let witness_script = p2wsh.redeem().and_then(|redeem| redeem.output.clone());
            (None, witness_script.map(WitnessScript::from))
        }
        _ => (None, None),
    }
}

fn template_derivations(
    template: &ScriptTemplate,
    redeem_script: Option<&RedeemScript>,
    witness_script: Option<&WitnessScript>,
) -> IndexMap<LegacyPk, KeyOrigin> {
    let mut keys = match template {
        ScriptTemplate::P2pk(p2pk) => p2pk.pubkey().into_iter().collect(),
        ScriptTemplate::P2pkh(p2pkh) => p2pkh.pubkey().into_iter().collect(),
        ScriptTemplate::P2wpkh(p2wpkh) => {
            p2wpkh.pubkey().map(LegacyPk::from).into_iter().collect()
        }
        ScriptTemplate::P2ms(p2ms) => p2ms.pubkeys().map(<[_]>::to_vec).unwrap_or_default(),
        ScriptTemplate::P2sh(_) | ScriptTemplate::P2wsh(_) | ScriptTemplate::P2tr(_) => vec![],
    };
    if let Some(script) = redeem_script {
        keys.extend(script_pubkeys(script.as_script_bytes()));
    }
    if let Some(script) = witness_script {
        keys.extend(script_pubkeys(script.as_script_bytes()));
    }
    keys.into_iter().map(|pk| (pk, self_origin(pk.to_vec()))).collect()
}

fn tap_derivations(
    internal_pk: InternalPk,
    tap_tree: Option<&TapTree>,
) -> IndexMap<XOnlyPk, TapDerivation> {
    let internal_xonly = internal_pk.to_xonly_pk();
    let mut derivations = IndexMap::new();
    derivations.insert(
        internal_xonly,
        TapDerivation::with_internal_pk(self_origin(internal_xonly.to_byte_array())),
    );
    for leaf in tap_tree.into_iter().flatten() {
        let leaf_hash = leaf.script.tap_leaf_hash();
        for pk in script_xonly_pubkeys(leaf.script.as_script_bytes()) {
            let derivation = derivations.entry(pk).or_insert_with(|| {
                TapDerivation::with_internal_pk(self_origin(pk.to_byte_array()))
            });
            if !derivation.leaf_hashes.contains(&leaf_hash) {
                derivation.leaf_hashes.push(leaf_hash);
            }
        }
    }
    derivations
}

/// Fields to be merged into a PSBT input. Present values replace the existing ones; map
/// entries are added to the existing maps.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct InputUpdate {
    pub non_witness_tx: Option<Tx>,
    pub witness_utxo: Option<TxOut>,
    pub partial_sigs: IndexMap<LegacyPk, LegacySig>,
    pub sighash_type: Option<SighashType>,
    pub redeem_script: Option<RedeemScript>,
    pub witness_script: Option<WitnessScript>,
    pub bip32_derivation: IndexMap<LegacyPk, KeyOrigin>,
    pub tap_key_sig: Option<Bip340Sig>,
    pub tap_script_sig: IndexMap<(XOnlyPk, TapLeafHash), Bip340Sig>,
    pub tap_leaf_script: IndexMap<ControlBlock, LeafScript>,
    pub tap_bip32_derivation: IndexMap<XOnlyPk, TapDerivation>,
    pub tap_internal_key: Option<InternalPk>,
    pub tap_merkle_root: Option<TapNodeHash>,
    pub proprietary: IndexMap<PropKey, ValueData>,
}

impl InputUpdate {
    /// Derives input fields from a payment template spending an output of `value`.
    pub fn with_template(template: &ScriptTemplate, value: Sats) -> Result<Self, ConstructError> {
        let script_pubkey = template.output().ok_or(ConstructError::NoOutputScript)?;
        let (redeem_script, witness_script) = template_scripts(template);
        let mut update = InputUpdate {
            witness_utxo: Some(TxOut::new(script_pubkey.clone(), value)),
            bip32_derivation: template_derivations(
                template,
                redeem_script.as_ref(),
                witness_script.as_ref(),
            ),
            redeem_script,
            witness_script,
            ..default!()
        };
        if let ScriptTemplate::P2tr(p2tr) = template {
            if let Some(internal_pk) = p2tr.internal_pubkey() {
                if let Some(tap_tree) = p2tr.script_tree() {
                    update.tap_leaf_script =
                        ControlBlockFactory::with(internal_pk, tap_tree).collect();
                }
                update.tap_bip32_derivation = tap_derivations(internal_pk, p2tr.script_tree());
            }
            update.tap_internal_key = p2tr.internal_pubkey();
            update.tap_merkle_root = p2tr.hash();
        }
        Ok(update)
    }

    /// Input map holding only the fields of this update.
    pub fn to_input(&self, index: usize) -> Input {
        let mut input = Input::new(index);
        self.clone().apply(&mut input);
        input
    }

    fn apply(self, input: &mut Input) {
        if self.non_witness_tx.is_some() {
            input.non_witness_tx = self.non_witness_tx;
        }
        if self.witness_utxo.is_some() {
            input.witness_utxo = self.witness_utxo;
        }
        if self.sighash_type.is_some() {
            input.sighash_type = self.sighash_type;
        }
        if self.redeem_script.is_some() {
            input.redeem_script = self.redeem_script;
        }
        if self.witness_script.is_some() {
            input.witness_script = self.witness_script;
        }
        if self.tap_key_sig.is_some() {
            input.tap_key_sig = self.tap_key_sig;
        }
        if self.tap_internal_key.is_some() {
            input.tap_internal_key = self.tap_internal_key;
        }
        if self.tap_merkle_root.is_some() {
            input.tap_merkle_root = self.tap_merkle_root;
        }
        input.partial_sigs.extend(self.partial_sigs);
        input.tap_script_sig.extend(self.tap_script_sig);
        input.bip32_derivation.extend(self.bip32_derivation);
        input.tap_leaf_script.extend(self.tap_leaf_script);
        input.tap_bip32_derivation.extend(self.tap_bip32_derivation);
        input.proprietary.extend(self.proprietary);
    }
}

/// Fields to be merged into a PSBT output. Present values replace the existing ones; map
/// entries are added to the existing maps.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct OutputUpdate {
    pub redeem_script: Option<RedeemScript>,
    pub witness_script: Option<WitnessScript>,
    pub bip32_derivation: IndexMap<LegacyPk, KeyOrigin>,
    pub tap_internal_key: Option<InternalPk>,
    pub tap_tree: Option<TapTree>,
    pub tap_bip32_derivation: IndexMap<XOnlyPk, TapDerivation>,
    pub proprietary: IndexMap<PropKey, ValueData>,
}

impl OutputUpdate {
    /// Derives output fields from a payment template.
    pub fn with_template(template: &ScriptTemplate) -> Self {
        let (redeem_script, witness_script) = template_scripts(template);
        let mut update = OutputUpdate {
            bip32_derivation: template_derivations(
                template,
                redeem_script.as_ref(),
                witness_script.as_ref(),
            ),
            redeem_script,
            witness_script,
            ..default!()
        };
        if let ScriptTemplate::P2tr(p2tr) = template {
            update.tap_internal_key = p2tr.internal_pubkey();
            update.tap_tree = p2tr.script_tree().cloned();
            if let Some(internal_pk) = p2tr.internal_pubkey() {
                update.tap_bip32_derivation = tap_derivations(internal_pk, p2tr.script_tree());
            }
        }
        update
    }

    /// Output map holding only the fields of this update.
    pub fn to_output(&self, index: usize) -> Output {
        let mut output = Output::new(index);
        self.clone().apply(&mut output);
        output
    }

    fn apply(self, output: &mut Output) {
        if self.redeem_script.is_some() {
            output.redeem_script = self.redeem_script;
        }
        if self.witness_script.is_some() {
            output.witness_script = self.witness_script;
        }
        if self.tap_internal_key.is_some() {
            output.tap_internal_key = self.tap_internal_key;
        }
        if self.tap_tree.is_some() {
            output.tap_tree = self.tap_tree;
        }
        output.bip32_derivation.extend(self.bip32_derivation);
        output.tap_bip32_derivation.extend(self.tap_bip32_derivation);
        output.proprietary.extend(self.proprietary);
    }
}

/// Detects signatures of the input which would be invalidated by the `action`.
fn has_committing_sigs(input: &Input, action: PsbtAction) -> bool {
    if is_taproot_input(input) {
        return check_taproot_input_for_sigs(input, action);
    }
    let mut final_stack = input
        .final_witness
        .iter()
        .flat_map(|witness| witness.elements().map(<[u8]>::to_vec))
        .collect::<Vec<_>>();
    if let Some(sig_script) = &input.final_script_sig {
        final_stack.extend(sig_script.as_script_bytes().to_stack().unwrap_or_default());
    }
    input
        .partial_sigs
        .values()
        .copied()
        .chain(final_stack.iter().filter_map(|el| LegacySig::from_bytes(el).ok()))
        .any(|sig| !check_sighash_permits(Some(sig.sighash_type), action))
}

impl Psbt {
    fn check_sigs_permit(&self, action: PsbtAction) -> Result<(), ConstructError> {
        match self.inputs.iter().find(|input| has_committing_sigs(input, action)) {
            Some(input) => {
                debug!(input = input.index(), %action, "action blocked by an existing signature");
                Err(ConstructError::SignatureCommits(action, input.index()))
            }
            None => Ok(()),
        }
    }

    /// Appends input to the PSBT, re-indexing it to the next free position.
    pub fn add_input(&mut self, input: Input) -> Result<&mut Input, ConstructError> {
        if !self.are_inputs_modifiable() {
            return Err(Unmodifiable.into());
        }
        self.check_sigs_permit(PsbtAction::AddInput)?;
        let index = self.inputs.len();
        check_taproot_input_fields(&Input::new(index), &input, PsbtAction::AddInput)?;
        self.inputs.push(Input { index, ..input });
        Ok(&mut self.inputs[index])
    }

    /// Appends output to the PSBT, re-indexing it to the next free position.
    pub fn add_output(&mut self, output: Output) -> Result<&mut Output, ConstructError> {
        if !self.are_outputs_modifiable() {
            return Err(Unmodifiable.into());
        }
        self.check_sigs_permit(PsbtAction::AddOutput)?;
        let index = self.outputs.len();
        check_taproot_output_fields(&Output::new(index), &output, PsbtAction::AddOutput)?;
        self.outputs.push(Output { index, ..output });
        Ok(&mut self.outputs[index])
    }

    /// Adds input spending `prevout` locked with the `template`, filling in the witness UTXO,
    /// scripts, taproot keys and leaf scripts with their control blocks.
    pub fn construct_input(
        &mut self,
        prevout: Prevout,
        template: &ScriptTemplate,
        sequence: SeqNo,
    ) -> Result<&mut Input, ConstructError> {
        let update = InputUpdate::with_template(template, prevout.value)?;
        let mut input = Input::new(self.inputs.len());
        input.previous_outpoint = prevout.outpoint();
        input.sequence_number = Some(sequence);
        update.apply(&mut input);
        trace!(outpoint = %input.previous_outpoint, template = %template.name(), "adding input");
        self.add_input(input)
    }

    /// Adds output paying `amount` to the `template`. Taproot outputs get their internal key
    /// and script tree.
    pub fn construct_output(
        &mut self,
        template: &ScriptTemplate,
        amount: impl Into<Sats>,
    ) -> Result<&mut Output, ConstructError> {
        let script = template.output().ok_or(ConstructError::NoOutputScript)?.clone();
        let mut output = Output {
            amount: amount.into(),
            script,
            ..Output::new(self.outputs.len())
        };
        OutputUpdate::with_template(template).apply(&mut output);
        self.add_output(output)
    }

    pub fn set_input_sequence(
        &mut self,
        index: usize,
        sequence: SeqNo,
    ) -> Result<(), ConstructError> {
        if index >= self.inputs.len() {
            return Err(ConstructError::NoInput(index));
        }
        if !self.are_inputs_modifiable() {
            return Err(Unmodifiable.into());
        }
        self.check_sigs_permit(PsbtAction::SetInputSequence)?;
        if let Some(input) = self.inputs.get_mut(index) {
            input.sequence_number = Some(sequence);
        }
        Ok(())
    }

    /// Merges new fields into the input after checking they don't mix taproot and pre-taproot
    /// namespaces.
    pub fn update_input(
        &mut self,
        index: usize,
        update: InputUpdate,
    ) -> Result<&mut Input, ConstructError> {
        let input = self.inputs.get_mut(index).ok_or(ConstructError::NoInput(index))?;
        if input.is_finalized() {
            return Err(ConstructError::Finalized(index));
        }
        if let Some(tx) = &update.non_witness_tx {
            let txid = tx.txid();
            if txid != input.previous_outpoint.txid {
                return Err(ConstructError::PrevTxMismatch(index, txid));
            }
        }
        check_taproot_input_fields(input, &update.to_input(index), PsbtAction::UpdateInput)?;
        update.apply(input);
        Ok(input)
    }

    /// Merges new fields into the output after checking they don't mix taproot and
    /// pre-taproot namespaces and agree with the output script.
    pub fn update_output(
        &mut self,
        index: usize,
        update: OutputUpdate,
    ) -> Result<&mut Output, ConstructError> {
        let output = self.outputs.get_mut(index).ok_or(ConstructError::NoOutput(index))?;
        check_taproot_output_fields(output, &update.to_output(index), PsbtAction::UpdateOutput)?;
        update.apply(output);
        Ok(output)
    }
}

#[cfg(test)]
mod test {
    use payments::{
        P2msFields, P2shFields, P2trFields, P2wpkhFields, P2wshFields, PaymentOpts, Redeem,
    };
    use amplify::ByteArray;
    use primitives::{Outpoint, ScriptPubkey, VarIntArray};
    use rstest::rstest;
    use taproot::{LeafInfo, LeafVer};

    use super::*;
    use crate::fixtures::*;
    use crate::PsbtVer;

    fn prevout(n: u8) -> Prevout {
        Prevout::new(Outpoint::new(Txid::from_byte_array([n; 32]), 0u32), 10_000u64)
    }

    fn p2wpkh(n: u8) -> ScriptTemplate {
        ScriptTemplate::create(
            P2wpkhFields {
                pubkey: Some(compressed_pk(n)),
                ..default!()
            },
            PaymentOpts::default(),
        )
        .unwrap()
    }

    fn p2tr_tree() -> (ScriptTemplate, TapTree) {
        let mut checksig = vec![0x20];
        checksig.extend(xonly_pk(2).to_byte_array());
        checksig.push(0xac);
        let tree = TapTree::from_leaves([
            LeafInfo {
                depth: 1,
                script: LeafScript::with_bytes(LeafVer::TapScript, checksig).unwrap(),
            },
            LeafInfo {
                depth: 1,
                script: LeafScript::with_bytes(LeafVer::TapScript, vec![0x51]).unwrap(),
            },
        ])
        .unwrap();
        let template = ScriptTemplate::create(
            P2trFields {
                internal_pubkey: Some(internal_pk(1)),
                script_tree: Some(tree.clone()),
                ..default!()
            },
            PaymentOpts::default(),
        )
        .unwrap();
        (template, tree)
    }

    #[rstest]
    #[case(None, PsbtAction::AddInput, false)]
    #[case(None, PsbtAction::UpdateInput, true)]
    #[case(Some(SighashType::all()), PsbtAction::AddInput, false)]
    #[case(Some(SighashType::all()), PsbtAction::AddOutput, false)]
    #[case(Some(SighashType::all_anyone_can_pay()), PsbtAction::AddInput, true)]
    #[case(Some(SighashType::all_anyone_can_pay()), PsbtAction::SetInputSequence, false)]
    #[case(Some(SighashType::none()), PsbtAction::AddOutput, true)]
    #[case(Some(SighashType::none()), PsbtAction::AddInput, false)]
    #[case(Some(SighashType::single()), PsbtAction::SetInputSequence, true)]
    #[case(Some(SighashType::single_anyone_can_pay()), PsbtAction::AddInput, true)]
    fn sighash_permits(
        #[case] sighash_type: Option<SighashType>,
        #[case] action: PsbtAction,
        #[case] permits: bool,
    ) {
        assert_eq!(check_sighash_permits(sighash_type, action), permits);
    }

    #[test]
    fn p2wpkh_input() {
        let mut psbt = Psbt::create(PsbtVer::V2);
        let template = p2wpkh(1);
        let input = psbt.construct_input(prevout(1), &template, SeqNo::MAX).unwrap();
        assert_eq!(input.index(), 0);
        let prev_txout = TxOut::new(template.output().unwrap().clone(), 10_000u64);
        assert_eq!(input.witness_utxo, Some(prev_txout));
        assert_eq!(input.redeem_script, None);
        assert_eq!(input.bip32_derivation.len(), 1);
        assert!(input.bip32_derivation.contains_key(&legacy_pk(1)));
        assert_eq!(psbt.input_sum(), Some(Sats::from_sats(10_000)));
    }

    #[test]
    fn nested_multisig_input() {
        let p2ms = ScriptTemplate::create(
            P2msFields {
                m: Some(2),
                pubkeys: Some(vec![legacy_pk(1), legacy_pk(2), legacy_pk(3)]),
                ..default!()
            },
            PaymentOpts::default(),
        )
        .unwrap();
        let p2wsh = ScriptTemplate::create(
            P2wshFields {
                redeem: Some(Redeem::from(&p2ms)),
                ..default!()
            },
            PaymentOpts::default(),
        )
        .unwrap();
        let p2sh = ScriptTemplate::create(
            P2shFields {
                redeem: Some(Redeem::from(&p2wsh)),
                ..default!()
            },
            PaymentOpts::default(),
        )
        .unwrap();

        let mut psbt = Psbt::create(PsbtVer::V0);
        let input = psbt.construct_input(prevout(2), &p2sh, SeqNo::MAX).unwrap();
        assert_eq!(
            input.redeem_script.as_ref().map(RedeemScript::as_script_bytes),
            p2wsh.output().map(ScriptPubkey::as_script_bytes)
        );
        assert_eq!(
            input.witness_script.as_ref().map(WitnessScript::as_script_bytes),
            p2ms.output().map(ScriptPubkey::as_script_bytes)
        );
        assert_eq!(input.bip32_derivation.keys().copied().collect::<Vec<_>>(), vec![
            legacy_pk(1),
            legacy_pk(2),
            legacy_pk(3)
        ]);
    }

    #[test]
    fn taproot_input_and_output() {
        let (template, tree) = p2tr_tree();
        let mut psbt = Psbt::create(PsbtVer::V2);
        let input = psbt.construct_input(prevout(3), &template, SeqNo::MAX).unwrap();
        assert_eq!(input.tap_internal_key, Some(internal_pk(1)));
        assert_eq!(input.tap_merkle_root, Some(tree.merkle_root()));
        assert_eq!(input.tap_leaf_script.len(), 2);
        assert!(input.bip32_derivation.is_empty());
        assert_eq!(input.tap_bip32_derivation.len(), 2);
        assert!(input.tap_bip32_derivation[&xonly_pk(1)].leaf_hashes.is_empty());
        assert_eq!(input.tap_bip32_derivation[&xonly_pk(2)].leaf_hashes.len(), 1);

        let output = psbt.construct_output(&template, 9_000u64).unwrap();
        assert_eq!(output.tap_tree, Some(tree));
        assert_eq!(output.tap_internal_key, Some(internal_pk(1)));
        assert_eq!(psbt.fee(), Some(Sats::from_sats(1_000)));
    }

    #[test]
    fn signature_blocks_modification() {
        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.construct_input(prevout(1), &p2wpkh(1), SeqNo::MAX).unwrap();
        let update = InputUpdate {
            partial_sigs: [(legacy_pk(1), legacy_sig(1))].into_iter().collect(),
            ..default!()
        };
        psbt.update_input(0, update).unwrap();

        let err = psbt.construct_input(prevout(2), &p2wpkh(2), SeqNo::MAX).unwrap_err();
        assert_eq!(err, ConstructError::SignatureCommits(PsbtAction::AddInput, 0));
        assert_eq!(
            psbt.set_input_sequence(0, SeqNo::ENABLE_RBF),
            Err(ConstructError::SignatureCommits(PsbtAction::SetInputSequence, 0))
        );
        assert_eq!(psbt.set_input_sequence(1, SeqNo::ENABLE_RBF), Err(ConstructError::NoInput(1)));
    }

    #[test]
    fn anyone_can_pay_allows_inputs() {
        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.construct_input(prevout(1), &p2wpkh(1), SeqNo::MAX).unwrap();
        let mut sig = legacy_sig(1);
        sig.sighash_type = SighashType::all_anyone_can_pay();
        psbt.input_mut(0).unwrap().partial_sigs.insert(legacy_pk(1), sig);
        psbt.construct_input(prevout(2), &p2wpkh(2), SeqNo::MAX).unwrap();
        assert_eq!(psbt.input_count(), 2);
        assert!(psbt.construct_output(&p2wpkh(3), 1000u64).is_err());
    }

    #[test]
    fn mixed_update_rejected() {
        let (template, _) = p2tr_tree();
        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.construct_input(prevout(1), &template, SeqNo::MAX).unwrap();
        let update = InputUpdate {
            redeem_script: Some(RedeemScript::from_unsafe(vec![0x51])),
            ..default!()
        };
        let err = psbt.update_input(0, update).unwrap_err();
        assert_eq!(err.to_string(), "Cannot use both taproot and non-taproot fields");

        let update = OutputUpdate {
            tap_internal_key: Some(internal_pk(5)),
            ..default!()
        };
        psbt.construct_output(&p2wpkh(1), 1000u64).unwrap();
        assert_eq!(
            psbt.update_output(0, update),
            Err(ConstructError::TapField(TapFieldError::MixedFields))
        );
    }

    #[test]
    fn prev_tx_must_match() {
        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.construct_input(prevout(1), &p2wpkh(1), SeqNo::MAX).unwrap();
        let tx = Tx {
            version: default!(),
            inputs: none!(),
            outputs: VarIntArray::from_checked(vec![TxOut::new(
                p2wpkh(1).output().unwrap().clone(),
                10_000u64,
            )]),
            lock_time: default!(),
        };
        let txid = tx.txid();
        let update = InputUpdate {
            non_witness_tx: Some(tx),
            ..default!()
        };
        assert_eq!(psbt.update_input(0, update), Err(ConstructError::PrevTxMismatch(0, txid)));
    }

    #[test]
    fn unmodifiable_after_construction() {
        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.construct_input(prevout(1), &p2wpkh(1), SeqNo::MAX).unwrap();
        psbt.complete_construction();
        assert_eq!(
            psbt.construct_input(prevout(2), &p2wpkh(2), SeqNo::MAX).map(|_| ()),
            Err(ConstructError::Unmodifiable)
        );
        assert_eq!(
            psbt.construct_output(&p2wpkh(2), 1000u64).map(|_| ()),
            Err(ConstructError::Unmodifiable)
        );
    }
}
