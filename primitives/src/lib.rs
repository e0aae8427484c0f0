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

//! Consensus-level Bitcoin data types re-exported from `bp-consensus`, extended with the
//! script templates, hashes and key origins used by the payment templates and PSBT.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod hashes;
mod script;
mod origin;

pub use bc::*;
pub use hashes::{hash160, sha256};
pub use origin::{KeyOrigin, OriginParseError, TapDerivation, HARDENED_INDEX_BOUNDARY};
pub use script::{
    op_pushnum, pushnum_value, sig_script_from_stack, Instruction, ScriptBytesExt, ScriptError,
    ScriptPubkeyExt, WitnessExt, WitnessScriptExt,
};
