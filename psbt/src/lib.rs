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

//! Partially signed bitcoin transactions (BIP-174 and BIP-370) with taproot fields (BIP-371),
//! signing and finalization.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod keys;
mod maps;
mod coders;
mod data;
mod constructor;
mod sign;
mod finalize;
pub mod tap;
#[cfg(test)]
mod fixtures;

pub use coders::{Decode, DecodeError, Encode, PsbtError};
pub use constructor::{
    check_sighash_permits, ConstructError, InputUpdate, OutputUpdate, PsbtAction,
};
pub use data::{
    Input, InputState, ModifiableFlags, Output, Prevout, Psbt, PsbtParseError, Unmodifiable,
    UnsignedTx, UnsignedTxIn,
};
pub use finalize::{ExtractError, FinalizeError};
pub use keys::{
    GlobalKey, InputKey, KeyPair, KeyRules, KeyType, KeyValue, OutputKey, PropKey, PSBT_PROPRIETARY,
};
pub use maps::{KeyAlreadyPresent, KeyData, KeyMap, Map, MapName, ValueData, XPUB_LEN};
pub use sign::{Rejected, Sign, SignError, Signer};
pub use tap::TapFieldError;

/// Version of the PSBT format.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum PsbtVer {
    /// Original BIP-174 version keeping the unsigned transaction in a global key.
    #[default]
    #[display("v0")]
    V0 = 0,

    /// BIP-370 version with per-input and per-output transaction data.
    #[display("v2")]
    V2 = 2,
}

impl PsbtVer {
    pub const fn try_from_standard_u32(v: u32) -> Result<Self, PsbtUnsupportedVer> {
        Ok(match v {
            0 => Self::V0,
            2 => Self::V2,
            wrong => return Err(PsbtUnsupportedVer(wrong)),
        })
    }

    pub const fn to_standard_u32(&self) -> u32 { *self as u32 }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("PSBT version {0} is not supported")]
pub struct PsbtUnsupportedVer(pub u32);
