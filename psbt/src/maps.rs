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

use std::collections::BTreeMap;
use std::io::{Read, Write};

use amplify::{Bytes20, Bytes32, IoError};
use indexmap::IndexMap;
use primitives::{
    Bip340Sig, ByteStr, KeyOrigin, LegacyPk, LegacySig, LockTime, RedeemScript, Sats,
    ScriptPubkey, SeqNo, SigScript, SighashType, TapDerivation, Tx, TxOut, TxVer, Txid, VarInt,
    Vout, Witness, WitnessScript, XOnlyPk,
};
use taproot::{ControlBlock, InternalPk, LeafScript, TapLeafHash, TapNodeHash, TapTree};

use crate::keys::KeyValue;
use crate::{
    Decode, DecodeError, Encode, GlobalKey, Input, InputKey, KeyPair, KeyType, ModifiableFlags,
    Output, OutputKey, PropKey, Psbt, PsbtError, PsbtVer, UnsignedTx,
};

/// Length of the BIP-32 extended public key serialization used as `PSBT_GLOBAL_XPUB` key data.
pub const XPUB_LEN: usize = 78;

pub type KeyData = ByteStr;
pub type ValueData = ByteStr;

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("proprietary key '{0}' is already present")]
pub struct KeyAlreadyPresent(pub PropKey);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[display(lowercase)]
pub enum MapName {
    Global,
    Input,
    Output,
}

/// Key-value map as read from the wire, before its values get interpreted.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Map<K: KeyType> {
    pub name: MapName,
    /// Standard entries grouped by key type. Key types without key data keep their single value
    /// under empty key data.
    pub standard: BTreeMap<K, BTreeMap<KeyData, ValueData>>,
    pub proprietary: IndexMap<PropKey, ValueData>,
    pub unknown: IndexMap<u8, IndexMap<KeyData, ValueData>>,
}

impl<K: KeyType> Map<K> {
    fn new(name: MapName) -> Self {
        Map {
            name,
            standard: empty!(),
            proprietary: empty!(),
            unknown: empty!(),
        }
    }

    pub fn parse(name: MapName, stream: &mut impl Read) -> Result<Self, DecodeError> {
        let mut map = Map::<K>::new(name);

        while let KeyValue::Pair(pair) = KeyValue::<K>::decode(stream)? {
            let KeyPair {
                key_type,
                key_data,
                value_data,
            } = pair;
            let code = key_type.to_u8();

            if key_type.is_proprietary() {
                let prop_key = PropKey::deserialize(key_data)?;
                if map.proprietary.contains_key(&prop_key) {
                    return Err(PsbtError::RepeatedPropKey(name, prop_key).into());
                }
                map.proprietary.insert(prop_key, value_data);
            } else if key_type.is_standard() {
                if !key_type.rules().keyed && !key_data.is_empty() {
                    return Err(PsbtError::NonEmptyKeyData(name, code, key_data).into());
                }
                let entries = map.standard.entry(key_type).or_default();
                if entries.insert(key_data, value_data).is_some() {
                    return Err(PsbtError::RepeatedKey(name, code).into());
                }
            } else {
                let entries = map.unknown.entry(code).or_default();
                if entries.contains_key(&key_data) {
                    return Err(PsbtError::RepeatedUnknownKey(name, code).into());
                }
                entries.insert(key_data, value_data);
            }
        }

        Ok(map)
    }

    /// Checks that all keys are allowed for the version and that the required ones are present.
    pub fn check(&self, version: PsbtVer) -> Result<(), PsbtError> {
        for key_type in self.standard.keys() {
            let rules = key_type.rules();
            if version < rules.since {
                return Err(PsbtError::UnexpectedKey(self.name, rules.code, version));
            }
            if matches!(rules.until, Some(until) if version >= until) {
                return Err(PsbtError::DeprecatedKey(self.name, rules.code, version));
            }
        }
        let absent = K::STANDARD.iter().map(|key_type| key_type.rules()).find(|rules| {
            rules.required
                && rules.is_allowed(version)
                && !self.standard.contains_key(&K::from_u8(rules.code))
        });
        match absent {
            Some(rules) => Err(PsbtError::RequiredKeyAbsent(self.name, rules.code, version)),
            None => Ok(()),
        }
    }
}

fn single<K: KeyType>(key_type: K, value: &impl Encode) -> Vec<KeyPair<K>> {
    vec![KeyPair::serialized(key_type, &(), value)]
}

fn optional<K: KeyType>(key_type: K, value: &Option<impl Encode>) -> Vec<KeyPair<K>> {
    value.iter().flat_map(|value| single(key_type, value)).collect()
}

fn entries<K: KeyType>(
    key_type: K,
    map: &IndexMap<impl Encode, impl Encode>,
) -> Vec<KeyPair<K>> {
    map.iter().map(|(key, value)| KeyPair::serialized(key_type, key, value)).collect()
}

/// Structure which can be read from and written to a PSBT key-value map.
pub trait KeyMap: Sized {
    type Keys: KeyType;

    fn encode_map(&self, version: PsbtVer, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = 0;

        for key_type in Self::Keys::STANDARD.iter().filter(|kt| kt.is_allowed(version)) {
            for pair in self.standard_pairs(version, *key_type) {
                counter += pair.encode(writer)?;
            }
        }

        for (code, entries) in self.unknown_map() {
            for (key_data, value_data) in entries {
                let pair =
                    KeyPair::new(Self::Keys::unknown(*code), key_data.clone(), value_data.clone());
                counter += pair.encode(writer)?;
            }
        }

        for (prop_key, value_data) in self.proprietary_map() {
            let pair = KeyPair::serialized(Self::Keys::PROPRIETARY, prop_key, value_data);
            counter += pair.encode(writer)?;
        }

        counter += Psbt::SEPARATOR.len();
        writer.write_all(&Psbt::SEPARATOR)?;

        Ok(counter)
    }

    fn parse_map(&mut self, version: PsbtVer, map: Map<Self::Keys>) -> Result<(), PsbtError> {
        map.check(version)?;

        for (key_type, entries) in map.standard {
            for (key_data, value_data) in entries {
                self.insert_standard(key_type, key_data, value_data)?;
            }
        }
        self.proprietary_map_mut().extend(map.proprietary);
        for (code, entries) in map.unknown {
            self.unknown_map_mut().entry(code).or_default().extend(entries);
        }
        Ok(())
    }

    fn proprietary_map(&self) -> &IndexMap<PropKey, ValueData>;
    fn proprietary_map_mut(&mut self) -> &mut IndexMap<PropKey, ValueData>;
    fn unknown_map(&self) -> &IndexMap<u8, IndexMap<KeyData, ValueData>>;
    fn unknown_map_mut(&mut self) -> &mut IndexMap<u8, IndexMap<KeyData, ValueData>>;

    fn proprietary(&self, key: &PropKey) -> Option<&ValueData> { self.proprietary_map().get(key) }

    /// Adds a proprietary value. Returns `false` if the same value is already present.
    fn push_proprietary(
        &mut self,
        key: PropKey,
        value: impl Into<ValueData>,
    ) -> Result<bool, KeyAlreadyPresent> {
        let value = value.into();
        match self.proprietary(&key) {
            Some(existing) if existing == &value => Ok(false),
            Some(_) => Err(KeyAlreadyPresent(key)),
            None => {
                self.proprietary_map_mut().insert(key, value);
                Ok(true)
            }
        }
    }

    fn remove_proprietary(&mut self, key: &PropKey) -> Option<ValueData> {
        self.proprietary_map_mut().shift_remove(key)
    }

    /// Serializes the present values of a standard key type. Absent optional values produce no
    /// pairs.
    fn standard_pairs(&self, version: PsbtVer, key_type: Self::Keys) -> Vec<KeyPair<Self::Keys>>;

    /// Interprets a standard entry. Key data is empty for key types which don't carry it.
    fn insert_standard(
        &mut self,
        key_type: Self::Keys,
        key_data: KeyData,
        value_data: ValueData,
    ) -> Result<(), PsbtError>;

    fn insert_unknown(&mut self, code: u8, key_data: KeyData, value_data: ValueData) {
        self.unknown_map_mut().entry(code).or_default().insert(key_data, value_data);
    }
}

macro_rules! extension_maps {
    () => {
        fn proprietary_map(&self) -> &IndexMap<PropKey, ValueData> { &self.proprietary }
        fn proprietary_map_mut(&mut self) -> &mut IndexMap<PropKey, ValueData> {
            &mut self.proprietary
        }
        fn unknown_map(&self) -> &IndexMap<u8, IndexMap<KeyData, ValueData>> { &self.unknown }
        fn unknown_map_mut(&mut self) -> &mut IndexMap<u8, IndexMap<KeyData, ValueData>> {
            &mut self.unknown
        }
    };
}

impl KeyMap for Psbt {
    type Keys = GlobalKey;

    extension_maps!();

    fn standard_pairs(&self, version: PsbtVer, key_type: GlobalKey) -> Vec<KeyPair<GlobalKey>> {
        match key_type {
            GlobalKey::UnsignedTx => single(key_type, &self.to_unsigned_tx()),
            GlobalKey::Xpub => entries(key_type, &self.xpubs),
            GlobalKey::TxVersion => single(key_type, &self.tx_version),
            GlobalKey::FallbackLocktime => optional(key_type, &self.fallback_locktime),
            GlobalKey::InputCount => single(key_type, &VarInt::with(self.inputs.len())),
            GlobalKey::OutputCount => single(key_type, &VarInt::with(self.outputs.len())),
            GlobalKey::TxModifiable => optional(key_type, &self.tx_modifiable),
            // version 0 is implied by the absence of the key
            GlobalKey::Version if version == PsbtVer::V0 => vec![],
            GlobalKey::Version => single(key_type, &version),
            GlobalKey::Proprietary | GlobalKey::Unknown(_) => vec![],
        }
    }

    fn insert_standard(
        &mut self,
        key_type: GlobalKey,
        key_data: KeyData,
        value_data: ValueData,
    ) -> Result<(), PsbtError> {
        match key_type {
            GlobalKey::UnsignedTx => {
                self.reset_from_unsigned_tx(UnsignedTx::deserialize(value_data)?)
            }
            GlobalKey::Xpub => {
                if key_data.len() != XPUB_LEN {
                    return Err(PsbtError::InvalidXpub(key_data.len()));
                }
                let origin = KeyOrigin::deserialize(value_data)?;
                self.xpubs.insert(key_data, origin);
            }
            GlobalKey::TxVersion => self.tx_version = TxVer::deserialize(value_data)?,
            GlobalKey::FallbackLocktime => {
                self.fallback_locktime = Some(LockTime::deserialize(value_data)?)
            }
            GlobalKey::InputCount => self.reset_inputs(VarInt::deserialize(value_data)?.to_usize()),
            GlobalKey::OutputCount => {
                self.reset_outputs(VarInt::deserialize(value_data)?.to_usize())
            }
            GlobalKey::TxModifiable => {
                self.tx_modifiable = Some(ModifiableFlags::deserialize(value_data)?)
            }
            GlobalKey::Version => self.version = PsbtVer::deserialize(value_data)?,
            GlobalKey::Proprietary | GlobalKey::Unknown(_) => {
                self.insert_unknown(key_type.to_u8(), key_data, value_data)
            }
        }
        Ok(())
    }
}

impl KeyMap for Input {
    type Keys = InputKey;

    extension_maps!();

    fn standard_pairs(&self, _: PsbtVer, key_type: InputKey) -> Vec<KeyPair<InputKey>> {
        match key_type {
            InputKey::NonWitnessUtxo => optional(key_type, &self.non_witness_tx),
            InputKey::WitnessUtxo => optional(key_type, &self.witness_utxo),
            InputKey::PartialSig => entries(key_type, &self.partial_sigs),
            InputKey::SighashType => optional(key_type, &self.sighash_type),
            InputKey::RedeemScript => optional(key_type, &self.redeem_script),
            InputKey::WitnessScript => optional(key_type, &self.witness_script),
            InputKey::Bip32Derivation => entries(key_type, &self.bip32_derivation),
            InputKey::FinalScriptSig => optional(key_type, &self.final_script_sig),
            InputKey::FinalWitness => optional(key_type, &self.final_witness),
            InputKey::PorCommitment => optional(key_type, &self.proof_of_reserves),
            InputKey::Ripemd160 => entries(key_type, &self.ripemd160),
            InputKey::Sha256 => entries(key_type, &self.sha256),
            InputKey::Hash160 => entries(key_type, &self.hash160),
            InputKey::Hash256 => entries(key_type, &self.hash256),
            InputKey::PreviousTxid => single(key_type, &self.previous_outpoint.txid),
            InputKey::OutputIndex => single(key_type, &self.previous_outpoint.vout),
            InputKey::Sequence => optional(key_type, &self.sequence_number),
            InputKey::RequiredTimeLock => optional(key_type, &self.required_time_lock),
            InputKey::RequiredHeightLock => optional(key_type, &self.required_height_lock),
            InputKey::TapKeySig => optional(key_type, &self.tap_key_sig),
            InputKey::TapScriptSig => entries(key_type, &self.tap_script_sig),
            InputKey::TapLeafScript => entries(key_type, &self.tap_leaf_script),
            InputKey::TapBip32Derivation => entries(key_type, &self.tap_bip32_derivation),
            InputKey::TapInternalKey => optional(key_type, &self.tap_internal_key),
            InputKey::TapMerkleRoot => optional(key_type, &self.tap_merkle_root),
            InputKey::Proprietary | InputKey::Unknown(_) => vec![],
        }
    }

    fn insert_standard(
        &mut self,
        key_type: InputKey,
        key_data: KeyData,
        value_data: ValueData,
    ) -> Result<(), PsbtError> {
        match key_type {
            InputKey::NonWitnessUtxo => self.non_witness_tx = Some(Tx::deserialize(value_data)?),
            InputKey::WitnessUtxo => self.witness_utxo = Some(TxOut::deserialize(value_data)?),
            InputKey::PartialSig => {
                let pk = LegacyPk::deserialize(key_data)?;
                self.partial_sigs.insert(pk, LegacySig::deserialize(value_data)?);
            }
            InputKey::SighashType => {
                self.sighash_type = Some(SighashType::deserialize(value_data)?)
            }
            InputKey::RedeemScript => {
                self.redeem_script = Some(RedeemScript::deserialize(value_data)?)
            }
            InputKey::WitnessScript => {
                self.witness_script = Some(WitnessScript::deserialize(value_data)?)
            }
            InputKey::Bip32Derivation => {
                let pk = LegacyPk::deserialize(key_data)?;
                self.bip32_derivation.insert(pk, KeyOrigin::deserialize(value_data)?);
            }
            InputKey::FinalScriptSig => {
                self.final_script_sig = Some(SigScript::deserialize(value_data)?)
            }
            InputKey::FinalWitness => self.final_witness = Some(Witness::deserialize(value_data)?),
            InputKey::PorCommitment => {
                self.proof_of_reserves = Some(String::deserialize(value_data)?)
            }
            InputKey::Ripemd160 => {
                self.ripemd160.insert(Bytes20::deserialize(key_data)?, value_data);
            }
            InputKey::Sha256 => {
                self.sha256.insert(Bytes32::deserialize(key_data)?, value_data);
            }
            InputKey::Hash160 => {
                self.hash160.insert(Bytes20::deserialize(key_data)?, value_data);
            }
            InputKey::Hash256 => {
                self.hash256.insert(Bytes32::deserialize(key_data)?, value_data);
            }
            InputKey::PreviousTxid => self.previous_outpoint.txid = Txid::deserialize(value_data)?,
            InputKey::OutputIndex => self.previous_outpoint.vout = Vout::deserialize(value_data)?,
            InputKey::Sequence => self.sequence_number = Some(SeqNo::deserialize(value_data)?),
            InputKey::RequiredTimeLock => {
                let lock_time = LockTime::deserialize(value_data)?;
                if lock_time.is_height_based() {
                    return Err(PsbtError::InvalidLockTimestamp(lock_time.to_consensus_u32()));
                }
                self.required_time_lock = Some(lock_time)
            }
            InputKey::RequiredHeightLock => {
                let lock_time = LockTime::deserialize(value_data)?;
                if !lock_time.is_height_based() || lock_time == LockTime::ZERO {
                    return Err(PsbtError::InvalidLockHeight(lock_time.to_consensus_u32()));
                }
                self.required_height_lock = Some(lock_time)
            }
            InputKey::TapKeySig => self.tap_key_sig = Some(Bip340Sig::deserialize(value_data)?),
            InputKey::TapScriptSig => {
                let key = <(XOnlyPk, TapLeafHash)>::deserialize(key_data)?;
                self.tap_script_sig.insert(key, Bip340Sig::deserialize(value_data)?);
            }
            InputKey::TapLeafScript => {
                let control_block = ControlBlock::deserialize(key_data)?;
                self.tap_leaf_script.insert(control_block, LeafScript::deserialize(value_data)?);
            }
            InputKey::TapBip32Derivation => {
                let pk = XOnlyPk::deserialize(key_data)?;
                self.tap_bip32_derivation.insert(pk, TapDerivation::deserialize(value_data)?);
            }
            InputKey::TapInternalKey => {
                self.tap_internal_key = Some(InternalPk::deserialize(value_data)?)
            }
            InputKey::TapMerkleRoot => {
                self.tap_merkle_root = Some(TapNodeHash::deserialize(value_data)?)
            }
            InputKey::Proprietary | InputKey::Unknown(_) => {
                self.insert_unknown(key_type.to_u8(), key_data, value_data)
            }
        }
        Ok(())
    }
}

impl KeyMap for Output {
    type Keys = OutputKey;

    extension_maps!();

    fn standard_pairs(&self, _: PsbtVer, key_type: OutputKey) -> Vec<KeyPair<OutputKey>> {
        match key_type {
            OutputKey::RedeemScript => optional(key_type, &self.redeem_script),
            OutputKey::WitnessScript => optional(key_type, &self.witness_script),
            OutputKey::Bip32Derivation => entries(key_type, &self.bip32_derivation),
            OutputKey::Amount => single(key_type, &self.amount),
            OutputKey::Script => single(key_type, &self.script),
            OutputKey::TapInternalKey => optional(key_type, &self.tap_internal_key),
            OutputKey::TapTree => optional(key_type, &self.tap_tree),
            OutputKey::TapBip32Derivation => entries(key_type, &self.tap_bip32_derivation),
            OutputKey::Proprietary | OutputKey::Unknown(_) => vec![],
        }
    }

    fn insert_standard(
        &mut self,
        key_type: OutputKey,
        key_data: KeyData,
        value_data: ValueData,
    ) -> Result<(), PsbtError> {
        match key_type {
            OutputKey::RedeemScript => {
                self.redeem_script = Some(RedeemScript::deserialize(value_data)?)
            }
            OutputKey::WitnessScript => {
                self.witness_script = Some(WitnessScript::deserialize(value_data)?)
            }
            OutputKey::Bip32Derivation => {
                let pk = LegacyPk::deserialize(key_data)?;
                self.bip32_derivation.insert(pk, KeyOrigin::deserialize(value_data)?);
            }
            OutputKey::Amount => self.amount = Sats::deserialize(value_data)?,
            OutputKey::Script => self.script = ScriptPubkey::deserialize(value_data)?,
            OutputKey::TapInternalKey => {
                self.tap_internal_key = Some(InternalPk::deserialize(value_data)?)
            }
            OutputKey::TapTree => self.tap_tree = Some(TapTree::deserialize(value_data)?),
            OutputKey::TapBip32Derivation => {
                let pk = XOnlyPk::deserialize(key_data)?;
                self.tap_bip32_derivation.insert(pk, TapDerivation::deserialize(value_data)?);
            }
            OutputKey::Proprietary | OutputKey::Unknown(_) => {
                self.insert_unknown(key_type.to_u8(), key_data, value_data)
            }
        }
        Ok(())
    }
}
