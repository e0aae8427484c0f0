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

//! Bitcoin payment script templates, taproot math and PSBT signing with finalization.
//!
//! The crate re-exports the workspace libraries under a single namespace and provides
//! [`RefSigner`], a reference signer over plain secret keys.

mod signers;

pub use invoice::*;
pub use payments::*;
pub use primitives::*;
pub use psbt::*;
pub use signers::{RefSign, RefSigner};
pub use taproot::*;
pub use {invoice, payments, primitives, psbt, taproot};
