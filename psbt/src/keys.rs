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

use std::fmt::Debug;
use std::hash::Hash;

use primitives::VarInt;

use crate::{Decode, Encode, KeyData, PsbtVer, ValueData};

/// Key type byte shared by proprietary entries of all three maps.
pub const PSBT_PROPRIETARY: u8 = 0xFC;

/// How a key type appears on the wire and in which PSBT versions.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyRules {
    pub code: u8,
    /// Whether the key carries key data, allowing several entries of the same type.
    pub keyed: bool,
    pub since: PsbtVer,
    pub until: Option<PsbtVer>,
    pub required: bool,
}

impl KeyRules {
    pub const fn optional(code: u8) -> Self {
        KeyRules {
            code,
            keyed: false,
            since: PsbtVer::V0,
            until: None,
            required: false,
        }
    }

    pub const fn required(code: u8) -> Self {
        KeyRules {
            required: true,
            ..Self::optional(code)
        }
    }

    pub const fn keyed(self) -> Self {
        KeyRules {
            keyed: true,
            ..self
        }
    }

    pub const fn v2(self) -> Self {
        KeyRules {
            since: PsbtVer::V2,
            ..self
        }
    }

    pub const fn v0_only(self) -> Self {
        KeyRules {
            until: Some(PsbtVer::V2),
            ..self
        }
    }

    #[inline]
    pub fn is_allowed(&self, version: PsbtVer) -> bool {
        version >= self.since && self.until.map_or(true, |until| version < until)
    }
}

pub trait KeyType: Copy + Ord + Eq + Hash + Debug + Encode + Decode + 'static {
    /// Standard keys in their serialization order.
    const STANDARD: &'static [Self];
    const PROPRIETARY: Self;

    fn unknown(code: u8) -> Self;
    fn rules(self) -> KeyRules;

    fn from_u8(code: u8) -> Self {
        if code == PSBT_PROPRIETARY {
            return Self::PROPRIETARY;
        }
        Self::STANDARD
            .iter()
            .copied()
            .find(|key| key.rules().code == code)
            .unwrap_or_else(|| Self::unknown(code))
    }

    #[inline]
    fn to_u8(&self) -> u8 { self.rules().code }
    #[inline]
    fn is_standard(self) -> bool { Self::STANDARD.contains(&self) }
    #[inline]
    fn is_proprietary(self) -> bool { self == Self::PROPRIETARY }
    #[inline]
    fn is_allowed(self, version: PsbtVer) -> bool { self.rules().is_allowed(version) }
}

macro_rules! key_types {
    ($(#[$attr:meta])* $name:ident { $($(#[$vattr:meta])* $variant:ident => $rules:expr,)+ }) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
        #[non_exhaustive]
        pub enum $name {
            $($(#[$vattr])* $variant,)+
            Proprietary,
            Unknown(u8),
        }

        impl KeyType for $name {
            const STANDARD: &'static [Self] = &[$(Self::$variant),+];
            const PROPRIETARY: Self = Self::Proprietary;

            fn unknown(code: u8) -> Self { Self::Unknown(code) }

            fn rules(self) -> KeyRules {
                match self {
                    $(Self::$variant => $rules,)+
                    Self::Proprietary => KeyRules::optional(PSBT_PROPRIETARY).keyed(),
                    Self::Unknown(code) => KeyRules::optional(code).keyed(),
                }
            }
        }
    };
}

key_types! {
    /// Keys of the global map (BIP-174, BIP-370).
    GlobalKey {
        UnsignedTx => KeyRules::required(0x00).v0_only(),
        Xpub => KeyRules::optional(0x01).keyed(),
        TxVersion => KeyRules::required(0x02).v2(),
        FallbackLocktime => KeyRules::optional(0x03).v2(),
        InputCount => KeyRules::required(0x04).v2(),
        OutputCount => KeyRules::required(0x05).v2(),
        TxModifiable => KeyRules::optional(0x06).v2(),
        Version => KeyRules::optional(0xFB),
    }
}

key_types! {
    /// Keys of the per-input maps, including BIP-371 taproot fields.
    InputKey {
        NonWitnessUtxo => KeyRules::optional(0x00),
        WitnessUtxo => KeyRules::optional(0x01),
        PartialSig => KeyRules::optional(0x02).keyed(),
        SighashType => KeyRules::optional(0x03),
        RedeemScript => KeyRules::optional(0x04),
        WitnessScript => KeyRules::optional(0x05),
        Bip32Derivation => KeyRules::optional(0x06).keyed(),
        FinalScriptSig => KeyRules::optional(0x07),
        FinalWitness => KeyRules::optional(0x08),
        PorCommitment => KeyRules::optional(0x09),
        Ripemd160 => KeyRules::optional(0x0a).keyed(),
        Sha256 => KeyRules::optional(0x0b).keyed(),
        Hash160 => KeyRules::optional(0x0c).keyed(),
        Hash256 => KeyRules::optional(0x0d).keyed(),
        PreviousTxid => KeyRules::required(0x0e).v2(),
        OutputIndex => KeyRules::required(0x0f).v2(),
        Sequence => KeyRules::optional(0x10).v2(),
        RequiredTimeLock => KeyRules::optional(0x11).v2(),
        RequiredHeightLock => KeyRules::optional(0x12).v2(),
        TapKeySig => KeyRules::optional(0x13),
        TapScriptSig => KeyRules::optional(0x14).keyed(),
        TapLeafScript => KeyRules::optional(0x15).keyed(),
        TapBip32Derivation => KeyRules::optional(0x16).keyed(),
        TapInternalKey => KeyRules::optional(0x17),
        TapMerkleRoot => KeyRules::optional(0x18),
    }
}

key_types! {
    /// Keys of the per-output maps, including BIP-371 taproot fields.
    OutputKey {
        RedeemScript => KeyRules::optional(0x00),
        WitnessScript => KeyRules::optional(0x01),
        Bip32Derivation => KeyRules::optional(0x02).keyed(),
        Amount => KeyRules::required(0x03).v2(),
        Script => KeyRules::required(0x04).v2(),
        TapInternalKey => KeyRules::optional(0x05),
        TapTree => KeyRules::optional(0x06),
        TapBip32Derivation => KeyRules::optional(0x07).keyed(),
    }
}

/// Map entry as read from the wire: either a key-value pair or the map separator.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum KeyValue<T: KeyType> {
    Pair(KeyPair<T>),
    Separator,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct KeyPair<T: KeyType> {
    pub key_type: T,
    pub key_data: KeyData,
    pub value_data: ValueData,
}

impl<T: KeyType> KeyPair<T> {
    pub fn new(
        key_type: T,
        key_data: impl Into<KeyData>,
        value_data: impl Into<ValueData>,
    ) -> Self {
        KeyPair {
            key_type,
            key_data: key_data.into(),
            value_data: value_data.into(),
        }
    }

    /// Serializes typed key and value data into a raw pair.
    pub fn serialized(key_type: T, key_data: &impl Encode, value_data: &impl Encode) -> Self {
        KeyPair::new(key_type, key_data.serialize(), value_data.serialize())
    }

    /// Length prefix of the key, which includes the key type byte.
    pub fn key_len(&self) -> VarInt { VarInt::with(self.key_data.len() + 1) }

    pub fn value_len(&self) -> VarInt { VarInt::with(self.value_data.len()) }
}

/// Key of a `PSBT_*_PROPRIETARY` entry: identifier prefix, subtype and key data.
#[derive(Clone, PartialOrd, Ord, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[display("{identifier} {subtype:#x}")]
pub struct PropKey {
    pub identifier: String,
    pub subtype: u64,
    pub data: Vec<u8>,
}
