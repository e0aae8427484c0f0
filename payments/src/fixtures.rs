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

//! Deterministic keys and signatures for unit tests.

use primitives::{Bip340Sig, CompressedPk, LegacyPk, LegacySig};
use secp256k1::{Keypair, Message, PublicKey, SecretKey, SECP256K1};
use taproot::InternalPk;

pub fn secret_key(n: u8) -> SecretKey {
    SecretKey::from_slice(&[n; 32]).expect("non-zero secret below curve order")
}

pub fn compressed_pk(n: u8) -> CompressedPk {
    CompressedPk::from(PublicKey::from_secret_key(SECP256K1, &secret_key(n)))
}

pub fn legacy_pk(n: u8) -> LegacyPk { LegacyPk::from(compressed_pk(n)) }

pub fn internal_pk(n: u8) -> InternalPk {
    let keypair = Keypair::from_secret_key(SECP256K1, &secret_key(n));
    InternalPk::from(keypair.x_only_public_key().0)
}

pub fn legacy_sig(n: u8) -> LegacySig {
    let msg = Message::from_digest([n; 32]);
    LegacySig::sighash_all(SECP256K1.sign_ecdsa(&msg, &secret_key(n)))
}

pub fn bip340_sig(n: u8) -> Bip340Sig {
    let keypair = Keypair::from_secret_key(SECP256K1, &secret_key(n));
    Bip340Sig::sighash_default(SECP256K1.sign_schnorr_no_aux_rand(&[n; 32], &keypair))
}
