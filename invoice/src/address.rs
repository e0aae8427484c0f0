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

//! Address-related types for detailed payload analysis.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use bech32::{FromBase32, ToBase32, Variant};
use primitives::{OutputPk, PubkeyHash, ScriptHash, ScriptPubkey, WPubkeyHash, WScriptHash};

/// Mainnet (bitcoin) pubkey address prefix.
pub const PUBKEY_ADDRESS_PREFIX_MAIN: u8 = 0; // 0x00
/// Mainnet (bitcoin) script address prefix.
pub const SCRIPT_ADDRESS_PREFIX_MAIN: u8 = 5; // 0x05
/// Test (tesnet, signet, regtest) pubkey address prefix.
pub const PUBKEY_ADDRESS_PREFIX_TEST: u8 = 111; // 0x6f
/// Test (tesnet, signet, regtest) script address prefix.
pub const SCRIPT_ADDRESS_PREFIX_TEST: u8 = 196; // 0xc4

/// Errors creating address from scriptPubkey.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum AddressError {
    /// scriptPubkey contains invalid BIP340 output pubkey.
    InvalidTaprootKey,
    /// scriptPubkey can't be represented with any known address standard.
    UnsupportedScriptPubkey,
}

/// Errors parsing address strings.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum AddressParseError {
    /// wrong Base58 encoding of address data - {0}
    #[from]
    Base58(bs58::decode::Error),

    /// wrong Bech32 encoding of address data - {0}
    #[from]
    Bech32(bech32::Error),

    /// base58 address has an invalid length {0}.
    InvalidBase58Length(usize),

    /// proprietary address has an invalid version code {0:#04x}.
    InvalidAddressVersion(u8),

    /// segwit address has an invalid witness version {0:#04x}.
    InvalidWitnessVersion(u8),

    /// unsupported future taproot version in address `{1}` detected by a length of {0}.
    FutureTaprootVersion(usize, String),

    /// address has an unsupported future witness version {0}.
    FutureWitnessVersion(u8),

    /// address has an invalid Bech32 variant {0:?}.
    InvalidBech32Variant(Variant),

    /// segwit address has a witness program of invalid length {0}.
    InvalidProgramLength(usize),

    /// unrecognized address format in '{0}'.
    UnrecognizableFormat(String),

    /// wrong BIP340 public key
    WrongPublicKeyData,

    /// unrecognized address format string; must be one of `P2PKH`, `P2SH`,
    /// `P2WPKH`, `P2WSH`, `P2TR`
    UnrecognizedAddressType,
}

/// Address string decoded down to its encoding-level parts, without checking that the data
/// length fits a known output type.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct RawAddress {
    pub network: AddressNetwork,
    pub kind: RawAddressKind,
    pub data: Vec<u8>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RawAddressKind {
    /// Base58check address with the given version byte.
    Base58 { version: u8 },
    /// Bech32(m) segwit address with the given witness version.
    Segwit { version: u8, variant: Variant },
}

impl RawAddress {
    /// Decodes base58check or bech32/bech32m address string.
    pub fn decode(s: &str) -> Result<Self, AddressParseError> {
        match bech32::decode(s) {
            Ok((hrp, payload, variant)) => Self::decode_bech32(&hrp, payload, variant),
            Err(_) => Self::decode_base58(s)
                .map_err(|_| AddressParseError::UnrecognizableFormat(s.to_owned())),
        }
    }

    fn decode_base58(s: &str) -> Result<Self, AddressParseError> {
        if s.len() > 50 {
            return Err(AddressParseError::InvalidBase58Length(s.len() * 11 / 15));
        }
        let data = bs58::decode(s).with_check(None).into_vec()?;
        let (version, data) =
            data.split_first().ok_or(AddressParseError::InvalidBase58Length(0))?;
        let network = match *version {
            PUBKEY_ADDRESS_PREFIX_MAIN | SCRIPT_ADDRESS_PREFIX_MAIN => AddressNetwork::Mainnet,
            PUBKEY_ADDRESS_PREFIX_TEST | SCRIPT_ADDRESS_PREFIX_TEST => AddressNetwork::Testnet,
            x => return Err(AddressParseError::InvalidAddressVersion(x)),
        };
        Ok(RawAddress {
            network,
            kind: RawAddressKind::Base58 { version: *version },
            data: data.to_vec(),
        })
    }

    fn decode_bech32(
        hrp: &str,
        payload: Vec<bech32::u5>,
        variant: Variant,
    ) -> Result<Self, AddressParseError> {
        let network = AddressNetwork::from_bech32_hrp(hrp)
            .ok_or_else(|| AddressParseError::UnrecognizableFormat(hrp.to_owned()))?;
        let (version, program) =
            payload.split_first().ok_or(AddressParseError::InvalidProgramLength(0))?;
        let version = version.to_u8();
        if version > 16 {
            return Err(AddressParseError::InvalidWitnessVersion(version));
        }
        let data = Vec::<u8>::from_base32(program)?;
        Ok(RawAddress {
            network,
            kind: RawAddressKind::Segwit { version, variant },
            data,
        })
    }
}

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, From)]
pub struct Address {
    /// Address payload (see [`AddressPayload`]).
    pub payload: AddressPayload,

    /// A type of the network used by the address
    pub network: AddressNetwork,
}

impl Address {
    pub fn new(payload: AddressPayload, network: AddressNetwork) -> Self {
        Address { payload, network }
    }

    /// Constructs compatible address for a given `scriptPubkey`.
    pub fn with(
        script: &ScriptPubkey,
        network: impl Into<AddressNetwork>,
    ) -> Result<Self, AddressError> {
        let payload = AddressPayload::from_script(script)?;
        Ok(Address {
            payload,
            network: network.into(),
        })
    }

    /// Returns script corresponding to the given address.
    pub fn script_pubkey(self) -> ScriptPubkey { self.payload.script_pubkey() }

    /// Returns if the address is testnet-, signet- or regtest-specific.
    pub fn is_testnet(self) -> bool { self.network != AddressNetwork::Mainnet }

    /// Detects address type.
    pub fn address_type(self) -> AddressType { self.payload.address_type() }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (version, variant, prog) = match self.payload {
            AddressPayload::Pkh(hash) => {
                return write_base58(f, self.network.pubkey_prefix(), hash.as_ref());
            }
            AddressPayload::Sh(hash) => {
                return write_base58(f, self.network.script_prefix(), hash.as_ref());
            }
            AddressPayload::Wpkh(hash) => (0, Variant::Bech32, AsRef::<[u8]>::as_ref(&hash).to_vec()),
            AddressPayload::Wsh(hash) => (0, Variant::Bech32, AsRef::<[u8]>::as_ref(&hash).to_vec()),
            AddressPayload::Tr(pk) => (1, Variant::Bech32m, pk.to_byte_array().to_vec()),
        };
        let s = encode_segwit(self.network.bech32_hrp(), version, &prog, variant)
            .map_err(|_| fmt::Error)?;
        if f.alternate() {
            f.write_str(&s.to_ascii_uppercase())
        } else {
            f.write_str(&s)
        }
    }
}

fn write_base58(f: &mut Formatter<'_>, prefix: u8, hash: &[u8]) -> fmt::Result {
    let mut prefixed = Vec::with_capacity(21);
    prefixed.push(prefix);
    prefixed.extend_from_slice(hash);
    f.write_str(&bs58::encode(prefixed).with_check().into_string())
}

/// Encodes witness program with bech32 or bech32m checksum.
pub fn encode_segwit(
    hrp: &str,
    version: u8,
    program: &[u8],
    variant: Variant,
) -> Result<String, bech32::Error> {
    let mut data = Vec::with_capacity(1 + (program.len() * 8 + 4) / 5);
    data.push(bech32::u5::try_from_u8(version)?);
    data.extend(program.to_base32());
    bech32::encode(hrp, data, variant)
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = RawAddress::decode(s)?;
        let payload = match raw.kind {
            RawAddressKind::Base58 { .. } if raw.data.len() != 20 => {
                return Err(AddressParseError::InvalidBase58Length(raw.data.len() + 1));
            }
            RawAddressKind::Base58 { version } => {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&raw.data);
                match version {
                    PUBKEY_ADDRESS_PREFIX_MAIN | PUBKEY_ADDRESS_PREFIX_TEST => {
                        AddressPayload::Pkh(PubkeyHash::from(hash))
                    }
                    _ => AddressPayload::Sh(ScriptHash::from(hash)),
                }
            }
            RawAddressKind::Segwit {
                version: 0,
                variant: Variant::Bech32,
            } => match raw.data.len() {
                20 => {
                    let mut hash = [0u8; 20];
                    hash.copy_from_slice(&raw.data);
                    AddressPayload::Wpkh(hash.into())
                }
                32 => {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&raw.data);
                    AddressPayload::Wsh(hash.into())
                }
                len => return Err(AddressParseError::InvalidProgramLength(len)),
            },
            RawAddressKind::Segwit {
                version: 1,
                variant: Variant::Bech32m,
            } if raw.data.len() == 32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&raw.data);
                let pk = OutputPk::from_byte_array(key)
                    .map_err(|_| AddressParseError::WrongPublicKeyData)?;
                AddressPayload::Tr(pk)
            }
            RawAddressKind::Segwit {
                version: 1,
                variant: Variant::Bech32m,
            } => {
                return Err(AddressParseError::FutureTaprootVersion(raw.data.len(), s.to_owned()));
            }
            RawAddressKind::Segwit {
                version: 0 | 1,
                variant,
            } => return Err(AddressParseError::InvalidBech32Variant(variant)),
            RawAddressKind::Segwit { version, .. } => {
                return Err(AddressParseError::FutureWitnessVersion(version));
            }
        };
        Ok(Address::new(payload, raw.network))
    }
}

/// Internal address content. Consists of serialized hashes or x-only key value.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, From)]
pub enum AddressPayload {
    /// P2PKH payload.
    #[from]
    Pkh(PubkeyHash),

    /// P2SH and SegWit nested (proprietary) P2WPKH/WSH-in-P2SH payloads.
    #[from]
    Sh(ScriptHash),

    /// P2WPKH payload.
    #[from]
    Wpkh(WPubkeyHash),

    /// P2WSH payload.
    #[from]
    Wsh(WScriptHash),

    /// P2TR payload.
    #[from]
    Tr(OutputPk),
}

impl AddressPayload {
    /// Constructs [`Address`] from the payload.
    pub fn into_address(self, network: AddressNetwork) -> Address {
        Address {
            payload: self,
            network,
        }
    }

    /// Constructs payload from a given `scriptPubkey`. Fails on future
    /// (post-taproot) witness types and bare scripts.
    pub fn from_script(script: &ScriptPubkey) -> Result<Self, AddressError> {
        Ok(if script.is_p2pkh() {
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&script[3..23]);
            AddressPayload::Pkh(PubkeyHash::from(bytes))
        } else if script.is_p2sh() {
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&script[2..22]);
            AddressPayload::Sh(ScriptHash::from(bytes))
        } else if script.is_p2wpkh() {
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&script[2..]);
            AddressPayload::Wpkh(WPubkeyHash::from(bytes))
        } else if script.is_p2wsh() {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&script[2..]);
            AddressPayload::Wsh(WScriptHash::from(bytes))
        } else if script.is_p2tr() {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&script[2..]);
            AddressPayload::Tr(
                OutputPk::from_byte_array(bytes).map_err(|_| AddressError::InvalidTaprootKey)?,
            )
        } else {
            return Err(AddressError::UnsupportedScriptPubkey);
        })
    }

    /// Returns script corresponding to the given address.
    pub fn script_pubkey(self) -> ScriptPubkey {
        match self {
            AddressPayload::Pkh(hash) => ScriptPubkey::p2pkh(hash),
            AddressPayload::Sh(hash) => ScriptPubkey::p2sh(hash),
            AddressPayload::Wpkh(hash) => ScriptPubkey::p2wpkh(hash),
            AddressPayload::Wsh(hash) => ScriptPubkey::p2wsh(hash),
            AddressPayload::Tr(output_key) => output_key.to_script_pubkey(),
        }
    }

    /// Detects address type.
    pub fn address_type(self) -> AddressType {
        match self {
            AddressPayload::Pkh(_) => AddressType::P2pkh,
            AddressPayload::Sh(_) => AddressType::P2sh,
            AddressPayload::Wpkh(_) => AddressType::P2wpkh,
            AddressPayload::Wsh(_) => AddressType::P2wsh,
            AddressPayload::Tr(_) => AddressType::P2tr,
        }
    }
}

impl From<AddressPayload> for ScriptPubkey {
    fn from(ap: AddressPayload) -> Self { ap.script_pubkey() }
}

/// Address type
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum AddressType {
    /// Pay-to-public key hash
    #[display("P2PKH")]
    P2pkh,

    /// Pay-to-script hash
    #[display("P2SH")]
    P2sh,

    /// Pay-to-witness public key hash
    #[display("P2WPKH")]
    P2wpkh,

    /// Pay-to-witness script hash
    #[display("P2WSH")]
    P2wsh,

    /// Pay-to-taproot
    #[display("P2TR")]
    P2tr,
}

impl AddressType {
    /// Returns witness version used by the address format.
    /// Returns `None` for pre-SegWit address formats.
    pub fn witness_version(self) -> Option<u8> {
        match self {
            AddressType::P2pkh => None,
            AddressType::P2sh => None,
            AddressType::P2wpkh | AddressType::P2wsh => Some(0),
            AddressType::P2tr => Some(1),
        }
    }
}

impl FromStr for AddressType {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        #[allow(clippy::match_str_case_mismatch)]
        Ok(match s.to_uppercase().as_str() {
            "P2PKH" => AddressType::P2pkh,
            "P2SH" => AddressType::P2sh,
            "P2WPKH" => AddressType::P2wpkh,
            "P2WSH" => AddressType::P2wsh,
            "P2TR" => AddressType::P2tr,
            _ => return Err(AddressParseError::UnrecognizedAddressType),
        })
    }
}

/// Bitcoin network used by the address
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default, Display)]
#[display(lowercase)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum AddressNetwork {
    /// Bitcoin mainnet
    #[default]
    Mainnet,

    /// Bitcoin testnet and signet
    Testnet,

    /// Bitcoin regtest networks
    Regtest,
}

impl AddressNetwork {
    /// Detects whether the network is a kind of test network (testnet, signet,
    /// regtest).
    pub fn is_testnet(self) -> bool { self != Self::Mainnet }

    pub fn bech32_hrp(self) -> &'static str {
        match self {
            AddressNetwork::Mainnet => "bc",
            AddressNetwork::Testnet => "tb",
            AddressNetwork::Regtest => "bcrt",
        }
    }

    pub fn from_bech32_hrp(hrp: &str) -> Option<Self> {
        #[allow(clippy::match_str_case_mismatch)]
        Some(match hrp.to_lowercase().as_str() {
            "bc" => AddressNetwork::Mainnet,
            "tb" => AddressNetwork::Testnet,
            "bcrt" => AddressNetwork::Regtest,
            _ => return None,
        })
    }

    pub fn pubkey_prefix(self) -> u8 {
        match self {
            AddressNetwork::Mainnet => PUBKEY_ADDRESS_PREFIX_MAIN,
            _ => PUBKEY_ADDRESS_PREFIX_TEST,
        }
    }

    pub fn script_prefix(self) -> u8 {
        match self {
            AddressNetwork::Mainnet => SCRIPT_ADDRESS_PREFIX_MAIN,
            _ => SCRIPT_ADDRESS_PREFIX_TEST,
        }
    }

    /// Checks whether addresses of the two networks share base58 version prefixes, which do not
    /// distinguish testnet from regtest.
    pub fn is_base58_compatible(self, other: AddressNetwork) -> bool {
        self.is_testnet() == other.is_testnet()
    }
}

#[cfg(feature = "serde")]
mod _serde {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    use super::*;

    impl Serialize for Address {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where S: Serializer {
            serializer.serialize_str(&self.to_string())
        }
    }

    impl<'de> Deserialize<'de> for Address {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where D: Deserializer<'de> {
            let s = String::deserialize(deserializer)?;
            Address::from_str(&s).map_err(|err| {
                de::Error::custom(format!("invalid address string representation; {err}"))
            })
        }
    }
}
