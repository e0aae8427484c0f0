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

use amplify::{Bytes20, Bytes32};
use indexmap::IndexMap;
use primitives::{
    Bip340Sig, ByteStr, KeyOrigin, LegacyPk, LegacySig, LockTime, Outpoint, RedeemScript, Sats,
    ScriptPubkey, SeqNo, SigScript, SighashType, TapDerivation, Tx, TxIn, TxOut, TxVer, Txid,
    VarIntArray, Vout, Witness, WitnessScript, XOnlyPk,
};
use taproot::{ControlBlock, InternalPk, LeafScript, TapLeafHash, TapNodeHash, TapTree};

pub use self::encodings::PsbtParseError;
use crate::{KeyData, PropKey, PsbtVer, ValueData};

/// Unknown entries of a map grouped by their key type byte.
pub type UnknownMap = IndexMap<u8, IndexMap<KeyData, ValueData>>;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("PSBT can't be modified")]
pub struct Unmodifiable;

/// Output being spent together with its amount.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Prevout {
    pub txid: Txid,
    pub vout: Vout,
    pub value: Sats,
}

impl Prevout {
    pub fn new(outpoint: Outpoint, value: impl Into<Sats>) -> Self {
        let Outpoint { txid, vout } = outpoint;
        Prevout {
            txid,
            vout,
            value: value.into(),
        }
    }

    #[inline]
    pub fn outpoint(&self) -> Outpoint { Outpoint::new(self.txid, self.vout) }
}

/// Transaction skeleton stored under `PSBT_GLOBAL_UNSIGNED_TX` of a v0 PSBT.
///
/// Inputs carry neither scriptSig nor witness. Unlike [`Tx`] it may have no inputs at all,
/// which BIP-174 test vectors use.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct UnsignedTx {
    pub version: TxVer,
    pub inputs: Vec<UnsignedTxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: LockTime,
}

impl From<Tx> for UnsignedTx {
    fn from(tx: Tx) -> UnsignedTx {
        UnsignedTx {
            version: tx.version,
            inputs: tx.inputs.release().into_iter().map(UnsignedTxIn::from).collect(),
            outputs: tx.outputs.release(),
            lock_time: tx.lock_time,
        }
    }
}

impl From<UnsignedTx> for Tx {
    fn from(unsigned: UnsignedTx) -> Tx {
        Tx {
            version: unsigned.version,
            inputs: VarIntArray::from_iter_checked(unsigned.inputs.into_iter().map(TxIn::from)),
            outputs: VarIntArray::from_checked(unsigned.outputs),
            lock_time: unsigned.lock_time,
        }
    }
}

impl UnsignedTx {
    pub fn txid(&self) -> Txid { Tx::from(self.clone()).txid() }

    /// Converts into a transaction with empty scriptSigs and witnesses.
    #[inline]
    pub fn finalize(self) -> Tx { self.into() }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct UnsignedTxIn {
    pub prev_output: Outpoint,
    pub sequence: SeqNo,
}

impl From<TxIn> for UnsignedTxIn {
    fn from(txin: TxIn) -> UnsignedTxIn {
        let TxIn {
            prev_output,
            sequence,
            ..
        } = txin;
        UnsignedTxIn {
            prev_output,
            sequence,
        }
    }
}

impl From<UnsignedTxIn> for TxIn {
    fn from(txin: UnsignedTxIn) -> TxIn {
        TxIn {
            prev_output: txin.prev_output,
            sig_script: none!(),
            sequence: txin.sequence,
            witness: empty!(),
        }
    }
}

impl UnsignedTxIn {
    #[inline]
    pub fn finalize(self) -> TxIn { self.into() }
}

/// Partially signed transaction. Holds the union of v0 and v2 global fields; the wire version
/// is chosen at serialization time.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Psbt {
    pub version: PsbtVer,
    /// `PSBT_GLOBAL_TX_VERSION`, or the version of the v0 unsigned transaction.
    pub tx_version: TxVer,
    /// `PSBT_GLOBAL_FALLBACK_LOCKTIME`. Applies when no input demands a lock time.
    pub fallback_locktime: Option<LockTime>,
    pub(crate) inputs: Vec<Input>,
    pub(crate) outputs: Vec<Output>,
    /// `PSBT_GLOBAL_XPUB`: serialized BIP-32 extended keys with their origins.
    pub xpubs: IndexMap<ByteStr, KeyOrigin>,
    /// `PSBT_GLOBAL_TX_MODIFIABLE`. Absent from v0 containers.
    pub(crate) tx_modifiable: Option<ModifiableFlags>,
    pub proprietary: IndexMap<PropKey, ValueData>,
    pub unknown: UnknownMap,
}

impl Default for Psbt {
    fn default() -> Self { Psbt::create(PsbtVer::V2) }
}

impl Psbt {
    /// Empty PSBT open for adding inputs and outputs.
    pub fn create(version: PsbtVer) -> Psbt {
        Psbt {
            version,
            tx_version: TxVer::V2,
            fallback_locktime: None,
            inputs: vec![],
            outputs: vec![],
            xpubs: none!(),
            tx_modifiable: Some(ModifiableFlags::modifiable()),
            proprietary: none!(),
            unknown: none!(),
        }
    }

    /// v0 PSBT for the given transaction, with signatures stripped from its inputs.
    pub fn from_tx(tx: impl Into<UnsignedTx>) -> Self {
        let mut psbt = Psbt::create(PsbtVer::V0);
        psbt.reset_from_unsigned_tx(tx.into());
        psbt
    }

    pub(crate) fn reset_from_unsigned_tx(&mut self, unsigned_tx: UnsignedTx) {
        let UnsignedTx {
            version,
            inputs,
            outputs,
            lock_time,
        } = unsigned_tx;
        self.version = PsbtVer::V0;
        self.tx_version = version;
        // zero lock time is what v0 stores when no fallback was given
        self.fallback_locktime = Some(lock_time).filter(|lt| *lt != LockTime::ZERO);
        self.inputs = inputs.into_iter().enumerate().map(Input::from_unsigned_txin).collect();
        self.outputs = outputs.into_iter().enumerate().map(Output::from_txout).collect();
    }

    pub(crate) fn reset_inputs(&mut self, count: usize) {
        self.inputs = (0..count).map(Input::new).collect();
    }

    pub(crate) fn reset_outputs(&mut self, count: usize) {
        self.outputs = (0..count).map(Output::new).collect();
    }

    pub fn to_unsigned_tx(&self) -> UnsignedTx {
        UnsignedTx {
            version: self.tx_version,
            inputs: self.inputs.iter().map(Input::to_unsigned_txin).collect(),
            outputs: self.outputs.iter().map(Output::to_txout).collect(),
            lock_time: self.lock_time(),
        }
    }

    pub fn txid(&self) -> Txid { self.to_unsigned_tx().txid() }

    #[inline]
    pub fn input(&self, index: usize) -> Option<&Input> { self.inputs.get(index) }
    #[inline]
    pub fn input_mut(&mut self, index: usize) -> Option<&mut Input> { self.inputs.get_mut(index) }
    #[inline]
    pub fn inputs(&self) -> impl Iterator<Item = &Input> { self.inputs.iter() }
    #[inline]
    pub fn inputs_mut(&mut self) -> impl Iterator<Item = &mut Input> { self.inputs.iter_mut() }
    #[inline]
    pub fn input_count(&self) -> usize { self.inputs.len() }

    #[inline]
    pub fn output(&self, index: usize) -> Option<&Output> { self.outputs.get(index) }
    #[inline]
    pub fn output_mut(&mut self, index: usize) -> Option<&mut Output> {
        self.outputs.get_mut(index)
    }
    #[inline]
    pub fn outputs(&self) -> impl Iterator<Item = &Output> { self.outputs.iter() }
    #[inline]
    pub fn outputs_mut(&mut self) -> impl Iterator<Item = &mut Output> { self.outputs.iter_mut() }
    #[inline]
    pub fn output_count(&self) -> usize { self.outputs.len() }

    /// Computes transaction lock time following BIP-370 rules.
    ///
    /// Height-based locks take precedence when every input with a lock requirement accepts one;
    /// otherwise time-based locks are used. Fallback lock time applies when no input has
    /// requirements or when the requirements can't be satisfied together.
    pub fn lock_time(&self) -> LockTime {
        let fallback = self.fallback_locktime.unwrap_or(LockTime::ZERO);
        let constrained = self
            .inputs
            .iter()
            .filter(|input| {
                input.required_time_lock.is_some() || input.required_height_lock.is_some()
            })
            .collect::<Vec<_>>();
        let strictest = |lock: fn(&Input) -> Option<LockTime>| {
            let locks = constrained.iter().map(|input| lock(input)).collect::<Option<Vec<_>>>()?;
            locks.into_iter().max()
        };
        if constrained.is_empty() {
            return fallback;
        }
        strictest(|input| input.required_height_lock)
            .or_else(|| strictest(|input| input.required_time_lock))
            .unwrap_or(fallback)
    }

    /// Sum of spent amounts, or `None` if some input misses its previous output.
    pub fn input_sum(&self) -> Option<Sats> {
        self.inputs
            .iter()
            .map(Input::value)
            .try_fold(Sats::ZERO, |sum, value| sum.checked_add(value?))
    }

    #[inline]
    pub fn output_sum(&self) -> Sats { self.outputs.iter().map(Output::value).sum() }

    #[inline]
    pub fn fee(&self) -> Option<Sats> { self.input_sum()?.checked_sub(self.output_sum()) }

    pub fn xpubs(&self) -> impl Iterator<Item = (&ByteStr, &KeyOrigin)> { self.xpubs.iter() }

    /// Effective modification flags. PSBTv0 lacks flags and is always modifiable, while PSBTv2
    /// without flags can't be modified.
    pub fn modifiable_flags(&self) -> ModifiableFlags {
        match (self.tx_modifiable, self.version) {
            (Some(flags), _) => flags,
            (None, PsbtVer::V0) => ModifiableFlags::modifiable(),
            (None, PsbtVer::V2) => ModifiableFlags::unmodifiable(),
        }
    }

    #[inline]
    pub fn is_modifiable(&self) -> bool { self.modifiable_flags().is_modifiable() }

    /// Inputs may be added unless some signature commits to its output by SIGHASH_SINGLE.
    pub fn are_inputs_modifiable(&self) -> bool {
        let flags = self.modifiable_flags();
        flags.inputs() && !flags.has_sighash_single()
    }

    pub fn are_outputs_modifiable(&self) -> bool {
        let flags = self.modifiable_flags();
        flags.outputs() && !flags.has_sighash_single()
    }

    /// Closes the PSBT for adding inputs and outputs.
    pub fn complete_construction(&mut self) {
        self.tx_modifiable = Some(ModifiableFlags::unmodifiable())
    }

    pub fn is_finalized(&self) -> bool { self.inputs.iter().all(Input::is_finalized) }
}

mod encodings {
    use std::fmt::{self, Display, Formatter, LowerHex};
    use std::str::FromStr;

    use amplify::hex::{self, FromHex, ToHex};
    use base64::display::Base64Display;
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;

    use super::*;
    use crate::PsbtError;

    #[derive(Clone, Debug, Display, Error, From)]
    #[display(inner)]
    pub enum PsbtParseError {
        #[from]
        Hex(hex::Error),

        #[from]
        Base64(base64::DecodeError),

        #[from]
        Psbt(PsbtError),
    }

    impl Psbt {
        pub fn from_base64(s: &str) -> Result<Psbt, PsbtParseError> {
            let data = BASE64_STANDARD.decode(s)?;
            Ok(Psbt::deserialize(data)?)
        }

        pub fn from_base16(s: &str) -> Result<Psbt, PsbtParseError> {
            let data = Vec::<u8>::from_hex(s)?;
            Ok(Psbt::deserialize(data)?)
        }

        #[inline]
        pub fn to_base64(&self) -> String { self.to_base64_ver(self.version) }

        pub fn to_base64_ver(&self, version: PsbtVer) -> String {
            BASE64_STANDARD.encode(self.serialize(version))
        }

        #[inline]
        pub fn to_base16(&self) -> String { self.to_base16_ver(self.version) }

        pub fn to_base16_ver(&self, version: PsbtVer) -> String { self.serialize(version).to_hex() }

        /// Own version, or v2 when the alternate flag is set.
        fn format_version(&self, f: &Formatter<'_>) -> PsbtVer {
            if f.alternate() {
                PsbtVer::V2
            } else {
                self.version
            }
        }
    }

    /// Strings made of hex digits only are read as base16, anything else as base64.
    impl FromStr for Psbt {
        type Err = PsbtParseError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.bytes().all(|c| c.is_ascii_hexdigit()) {
                true => Self::from_base16(s),
                false => Self::from_base64(s),
            }
        }
    }

    /// Base64 form; `{:#}` forces v2 serialization.
    impl Display for Psbt {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            let data = self.serialize(self.format_version(f));
            Display::fmt(&Base64Display::new(&data, &BASE64_STANDARD), f)
        }
    }

    /// Hex form; `{:#x}` forces v2 serialization.
    impl LowerHex for Psbt {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str(&self.to_base16_ver(self.format_version(f)))
        }
    }
}

/// Signing progress of a single input.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[display(lowercase)]
pub enum InputState {
    Unsigned,
    #[display("partially signed")]
    PartiallySigned,
    Finalized,
}

/// Per-input map. Holds both the legacy and the BIP-371 taproot field sets.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Input {
    /// Position in the PSBT, reported by errors.
    pub(crate) index: usize,

    /// `PSBT_IN_PREVIOUS_TXID` and `PSBT_IN_OUTPUT_INDEX`.
    pub previous_outpoint: Outpoint,
    /// `PSBT_IN_SEQUENCE`; `None` means final.
    pub sequence_number: Option<SeqNo>,
    /// `PSBT_IN_REQUIRED_TIME_LOCKTIME`, a timestamp of at least 500000000.
    pub required_time_lock: Option<LockTime>,
    /// `PSBT_IN_REQUIRED_HEIGHT_LOCKTIME`, a height below 500000000.
    pub required_height_lock: Option<LockTime>,

    /// Full previous transaction, required for non-segwit spends.
    pub non_witness_tx: Option<Tx>,
    /// Spent output, sufficient for segwit spends.
    pub witness_utxo: Option<TxOut>,

    pub partial_sigs: IndexMap<LegacyPk, LegacySig>,
    /// Sighash type every signature of the input must use.
    pub sighash_type: Option<SighashType>,
    pub redeem_script: Option<RedeemScript>,
    pub witness_script: Option<WitnessScript>,
    pub bip32_derivation: IndexMap<LegacyPk, KeyOrigin>,

    pub final_script_sig: Option<SigScript>,
    pub final_witness: Option<Witness>,

    /// BIP-127 proof-of-reserves commitment message.
    pub proof_of_reserves: Option<String>,
    /// Preimages keyed by their RIPEMD160 hash.
    pub ripemd160: IndexMap<Bytes20, ByteStr>,
    /// Preimages keyed by their SHA256 hash.
    pub sha256: IndexMap<Bytes32, ByteStr>,
    /// Preimages keyed by their HASH160.
    pub hash160: IndexMap<Bytes20, ByteStr>,
    /// Preimages keyed by their double SHA256 hash.
    pub hash256: IndexMap<Bytes32, ByteStr>,

    pub tap_key_sig: Option<Bip340Sig>,
    pub tap_script_sig: IndexMap<(XOnlyPk, TapLeafHash), Bip340Sig>,
    /// Leaves the signers are expected to sign for, by their control blocks.
    pub tap_leaf_script: IndexMap<ControlBlock, LeafScript>,
    /// Origins of x-only keys with the leaves they appear in. The internal key has no leaves.
    pub tap_bip32_derivation: IndexMap<XOnlyPk, TapDerivation>,
    pub tap_internal_key: Option<InternalPk>,
    pub tap_merkle_root: Option<TapNodeHash>,

    pub proprietary: IndexMap<PropKey, ValueData>,
    pub unknown: UnknownMap,
}

impl Input {
    pub fn new(index: usize) -> Input {
        Input {
            index,
            previous_outpoint: Outpoint::coinbase(),
            sequence_number: None,
            required_time_lock: None,
            required_height_lock: None,
            non_witness_tx: None,
            witness_utxo: None,
            partial_sigs: none!(),
            sighash_type: None,
            redeem_script: None,
            witness_script: None,
            bip32_derivation: none!(),
            final_script_sig: None,
            final_witness: None,
            proof_of_reserves: None,
            ripemd160: none!(),
            sha256: none!(),
            hash160: none!(),
            hash256: none!(),
            tap_key_sig: None,
            tap_script_sig: none!(),
            tap_leaf_script: none!(),
            tap_bip32_derivation: none!(),
            tap_internal_key: None,
            tap_merkle_root: None,
            proprietary: none!(),
            unknown: none!(),
        }
    }

    pub fn from_unsigned_txin((index, txin): (usize, UnsignedTxIn)) -> Input {
        Input {
            previous_outpoint: txin.prev_output,
            sequence_number: Some(txin.sequence),
            ..Input::new(index)
        }
    }

    pub fn to_unsigned_txin(&self) -> UnsignedTxIn {
        UnsignedTxIn {
            prev_output: self.previous_outpoint,
            sequence: self.sequence_number.unwrap_or(SeqNo::MAX),
        }
    }

    /// Output spent by this input, taken from the witness UTXO or, if absent, from the full
    /// previous transaction.
    pub fn prev_txout(&self) -> Option<&TxOut> {
        match (&self.witness_utxo, &self.non_witness_tx) {
            (Some(txout), _) => Some(txout),
            (None, Some(tx)) => tx.outputs.get(self.previous_outpoint.vout.into_usize()),
            (None, None) => None,
        }
    }

    pub fn prevout(&self) -> Option<Prevout> {
        self.value().map(|value| Prevout::new(self.previous_outpoint, value))
    }

    #[inline]
    pub fn value(&self) -> Option<Sats> { self.prev_txout().map(|txout| txout.value) }

    #[inline]
    pub fn index(&self) -> usize { self.index }

    pub fn state(&self) -> InputState {
        let signed = !self.partial_sigs.is_empty()
            || self.tap_key_sig.is_some()
            || !self.tap_script_sig.is_empty();
        match (self.final_script_sig.is_some() || self.final_witness.is_some(), signed) {
            (true, _) => InputState::Finalized,
            (false, true) => InputState::PartiallySigned,
            (false, false) => InputState::Unsigned,
        }
    }

    #[inline]
    pub fn is_finalized(&self) -> bool { self.state() == InputState::Finalized }
}

/// Per-output map.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Output {
    pub(crate) index: usize,

    /// `PSBT_OUT_AMOUNT`.
    pub amount: Sats,
    /// `PSBT_OUT_SCRIPT`.
    pub script: ScriptPubkey,

    pub redeem_script: Option<RedeemScript>,
    pub witness_script: Option<WitnessScript>,
    pub bip32_derivation: IndexMap<LegacyPk, KeyOrigin>,

    pub tap_internal_key: Option<InternalPk>,
    /// Script tree, serialized as its leaves in depth-first order.
    pub tap_tree: Option<TapTree>,
    pub tap_bip32_derivation: IndexMap<XOnlyPk, TapDerivation>,

    pub proprietary: IndexMap<PropKey, ValueData>,
    pub unknown: UnknownMap,
}

impl Output {
    #[inline]
    pub fn new(index: usize) -> Self {
        Output {
            index,
            ..default!()
        }
    }

    pub fn from_txout((index, txout): (usize, TxOut)) -> Self {
        Output {
            amount: txout.value,
            script: txout.script_pubkey,
            ..Output::new(index)
        }
    }

    pub fn to_txout(&self) -> TxOut { TxOut::new(self.script.clone(), self.amount) }

    #[inline]
    pub fn value(&self) -> Sats { self.amount }

    #[inline]
    pub fn index(&self) -> usize { self.index }
}

/// `PSBT_GLOBAL_TX_MODIFIABLE` bit set. Reserved bits are kept as read.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ModifiableFlags(u8);

impl ModifiableFlags {
    pub const INPUTS: u8 = 0x01;
    pub const OUTPUTS: u8 = 0x02;
    pub const SIGHASH_SINGLE: u8 = 0x04;
    const RESERVED: u8 = 0xF8;

    #[inline]
    pub const fn unmodifiable() -> Self { ModifiableFlags(0) }

    #[inline]
    pub const fn modifiable() -> Self { ModifiableFlags(Self::INPUTS | Self::OUTPUTS) }

    #[inline]
    pub const fn from_standard_u8(bits: u8) -> Self { ModifiableFlags(bits) }

    #[inline]
    pub const fn to_standard_u8(&self) -> u8 { self.0 }

    /// Returns the flags with the given bits set.
    #[inline]
    pub const fn with(self, bits: u8) -> Self { ModifiableFlags(self.0 | bits) }

    #[inline]
    pub const fn inputs(&self) -> bool { self.0 & Self::INPUTS != 0 }

    #[inline]
    pub const fn outputs(&self) -> bool { self.0 & Self::OUTPUTS != 0 }

    #[inline]
    pub const fn has_sighash_single(&self) -> bool { self.0 & Self::SIGHASH_SINGLE != 0 }

    /// Bits 3 to 7, which have no meaning yet.
    #[inline]
    pub const fn reserved(&self) -> u8 { self.0 & Self::RESERVED }

    pub const fn is_modifiable(&self) -> bool {
        self.0 & !Self::RESERVED != 0
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use amplify::hex::FromHex;
    use amplify::ByteArray;

    use super::*;

    fn outpoint(n: u8) -> Outpoint { Outpoint::new(Txid::from_byte_array([n; 32]), 0u32) }

    fn lock(n: u32) -> LockTime { LockTime::from_consensus_u32(n) }

    #[test]
    fn modifiable_flags() {
        let flags = ModifiableFlags::from_standard_u8(0b1000_0101);
        assert!(flags.inputs());
        assert!(!flags.outputs());
        assert!(flags.has_sighash_single());
        assert_eq!(flags.reserved(), 0x80);
        assert_eq!(flags.to_standard_u8(), 0b1000_0101);
        assert_eq!(ModifiableFlags::modifiable().to_standard_u8(), 0x03);
        assert!(!ModifiableFlags::unmodifiable().is_modifiable());
        assert!(!ModifiableFlags::from_standard_u8(0x80).is_modifiable());
    }

    #[test]
    fn modifiability_by_version() {
        let mut psbt = Psbt::create(PsbtVer::V2);
        assert!(psbt.are_inputs_modifiable());
        assert!(psbt.are_outputs_modifiable());
        psbt.tx_modifiable = None;
        assert!(!psbt.is_modifiable());

        let psbt = Psbt::from_tx(UnsignedTx {
            version: TxVer::V2,
            inputs: vec![],
            outputs: vec![],
            lock_time: LockTime::ZERO,
        });
        assert!(psbt.are_inputs_modifiable());

        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.tx_modifiable = Some(ModifiableFlags::unmodifiable().with(ModifiableFlags::INPUTS));
        assert!(psbt.are_inputs_modifiable());
        assert!(!psbt.are_outputs_modifiable());
        let single = ModifiableFlags::modifiable().with(ModifiableFlags::SIGHASH_SINGLE);
        psbt.tx_modifiable = Some(single);
        assert!(!psbt.are_inputs_modifiable());
        assert!(!psbt.are_outputs_modifiable());
        psbt.complete_construction();
        assert!(!psbt.is_modifiable());
    }

    #[test]
    fn lock_time_selection() {
        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.fallback_locktime = Some(lock(100));
        psbt.reset_inputs(3);
        assert_eq!(psbt.lock_time(), lock(100));

        psbt.inputs[0].required_height_lock = Some(lock(800_000));
        psbt.inputs[1].required_height_lock = Some(lock(800_100));
        psbt.inputs[1].required_time_lock = Some(lock(1_700_000_000));
        assert_eq!(psbt.lock_time(), lock(800_100));

        psbt.inputs[2].required_time_lock = Some(lock(1_700_000_100));
        // input #0 accepts only heights and input #2 only timestamps
        assert_eq!(psbt.lock_time(), lock(100));

        psbt.inputs[0].required_height_lock = None;
        assert_eq!(psbt.lock_time(), lock(1_700_000_100));
    }

    #[test]
    fn unsigned_tx_conversion() {
        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.reset_inputs(1);
        psbt.inputs[0].previous_outpoint = outpoint(1);
        let txout = TxOut::new(ScriptPubkey::op_return(b"x"), 10u64);
        psbt.outputs.push(Output::from_txout((0, txout)));

        let tx = psbt.to_unsigned_tx();
        assert_eq!(tx.inputs[0].sequence, SeqNo::MAX);
        assert_eq!(tx.lock_time, LockTime::ZERO);

        let from_tx = Psbt::from_tx(tx.clone().finalize());
        assert_eq!(from_tx.version, PsbtVer::V0);
        assert_eq!(from_tx.to_unsigned_tx(), tx);
        assert_eq!(from_tx.txid(), psbt.txid());
    }

    #[test]
    fn v0_fallback_locktime() {
        let mut psbt = Psbt::create(PsbtVer::V0);
        psbt.reset_inputs(1);
        psbt.inputs[0].previous_outpoint = outpoint(2);
        assert_eq!(psbt.fallback_locktime, None);

        let restored = Psbt::deserialize(psbt.serialize(PsbtVer::V0)).unwrap();
        assert_eq!(restored.fallback_locktime, None);
        assert_eq!(restored.lock_time(), LockTime::ZERO);

        psbt.fallback_locktime = Some(lock(650_000));
        let restored = Psbt::deserialize(psbt.serialize(PsbtVer::V0)).unwrap();
        assert_eq!(restored.fallback_locktime, Some(lock(650_000)));
    }

    #[test]
    fn prevout_lookup() {
        let prev_tx = Tx {
            version: TxVer::V1,
            inputs: VarIntArray::from_checked(vec![TxIn::from(UnsignedTxIn {
                prev_output: outpoint(9),
                sequence: SeqNo::MAX,
            })]),
            outputs: VarIntArray::from_checked(vec![
                TxOut::new(ScriptPubkey::op_return(b"a"), 1_000u64),
                TxOut::new(ScriptPubkey::op_return(b"b"), 2_000u64),
            ]),
            lock_time: LockTime::ZERO,
        };
        let mut input = Input::new(0);
        assert_eq!(input.value(), None);
        input.previous_outpoint = Outpoint::new(prev_tx.txid(), 1u32);
        input.non_witness_tx = Some(prev_tx);
        assert_eq!(input.value(), Some(Sats::from_sats(2_000)));

        input.witness_utxo = Some(TxOut::new(ScriptPubkey::op_return(b"c"), 3_000u64));
        assert_eq!(input.prevout().map(|p| p.value), Some(Sats::from_sats(3_000)));
    }

    #[test]
    fn input_states() {
        let mut input = Input::new(0);
        assert_eq!(input.state(), InputState::Unsigned);
        input.tap_key_sig = Some(Bip340Sig::from_bytes(&[1u8; 64]).unwrap());
        assert_eq!(input.state(), InputState::PartiallySigned);
        input.final_witness = Some(Witness::from_consensus_stack([vec![1u8; 64]]));
        assert_eq!(input.state(), InputState::Finalized);
        assert_eq!(InputState::PartiallySigned.to_string(), "partially signed");
    }

    #[test]
    fn parse_string_forms() {
        let psbt = Psbt::create(PsbtVer::V2);
        let base64 = psbt.to_string();
        let hex = format!("{psbt:x}");
        assert_eq!(Psbt::from_str(&base64).unwrap(), psbt);
        assert_eq!(Psbt::from_str(&hex).unwrap(), psbt);
        assert_eq!(hex, psbt.to_base16());
        assert_eq!(format!("{psbt:#x}"), psbt.to_base16_ver(PsbtVer::V2));
        assert_eq!(format!("{psbt:#}"), psbt.to_base64_ver(PsbtVer::V2));
        assert!(Vec::<u8>::from_hex(&hex).unwrap().starts_with(b"psbt\xff"));
        assert!(matches!(Psbt::from_str("cHNidP8="), Err(PsbtParseError::Psbt(_))));
        assert!(matches!(Psbt::from_str("70736274ff"), Err(PsbtParseError::Psbt(_))));
    }
}
