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

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod error;
mod check;
mod template;
mod p2pk;
mod p2pkh;
mod p2ms;
mod p2sh;
mod p2wpkh;
mod p2wsh;
mod p2tr;
#[cfg(test)]
mod fixtures;

pub use error::{Field, PaymentError};
pub use p2ms::{P2ms, P2msFields, MULTISIG_MAX_KEYS};
pub use p2pk::{P2pk, P2pkFields};
pub use p2pkh::{P2pkh, P2pkhFields};
pub use p2sh::{P2sh, P2shFields};
pub use p2tr::{P2tr, P2trFields};
pub use p2wpkh::{P2wpkh, P2wpkhFields};
pub use p2wsh::{P2wsh, P2wshFields};
pub use template::{
    KnownFields, Payment, PaymentOpts, Redeem, ScriptTemplate, TemplateType, UnknownTemplate,
};
