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

use std::collections::HashMap;

use amplify::{ByteArray, Wrapper};
use primitives::{KeyOrigin, LegacyPk, Sighash, XOnlyPk};
use psbt::{Psbt, Rejected, Sign, Signer};
use secp256k1::{ecdsa, schnorr as bip340, Keypair, Message, PublicKey, SecretKey, SECP256K1};
use taproot::{InternalKeypair, InternalPk, TapLeafHash, TapMerklePath, TapNodeHash, TapSighash};
use tracing::debug;

/// Reference signer holding plain secret keys.
///
/// Keys are matched against PSBT input keys by their public keys; key origins are ignored.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct RefSigner {
    pub keys: Vec<SecretKey>,
    pub key_path: bool,
    pub script_path: Option<TapLeafHash>,
    /// Sign taproot key path spends with the internal key as is, without applying the tweak.
    pub disable_tweak: bool,
}

impl RefSigner {
    pub fn new(key: SecretKey) -> Self { Self::with(true, None, [key]) }

    pub fn new_legacy(iter: impl IntoIterator<Item = SecretKey>) -> Self {
        Self::with(false, None, iter)
    }

    pub fn new_key_spend(iter: impl IntoIterator<Item = SecretKey>) -> Self {
        Self::with(true, None, iter)
    }

    pub fn new_script_spent(
        leaf: impl Into<TapLeafHash>,
        iter: impl IntoIterator<Item = SecretKey>,
    ) -> Self {
        Self::with(false, Some(leaf.into()), iter)
    }

    pub fn with(
        key_path: bool,
        script_path: Option<TapLeafHash>,
        iter: impl IntoIterator<Item = SecretKey>,
    ) -> Self {
        Self {
            keys: iter.into_iter().collect(),
            key_path,
            script_path,
            disable_tweak: false,
        }
    }

    pub fn without_tweak(mut self) -> Self {
        self.disable_tweak = true;
        self
    }
}

impl Signer for RefSigner {
    type Sign<'s> = RefSign<'s> where Self: 's;

    fn approve(&self, psbt: &Psbt) -> Result<Self::Sign<'_>, Rejected> {
        if self.keys.is_empty() {
            return Err(Rejected);
        }
        debug!(txid = %psbt.txid(), keys = self.keys.len(), "signing approved");
        Ok(RefSign {
            keys: self
                .keys
                .iter()
                .map(|sk| (sk.public_key(SECP256K1), sk))
                .collect(),
            key_path: self.key_path,
            script_path: self.script_path,
            disable_tweak: self.disable_tweak,
        })
    }
}

/// Signing session of [`RefSigner`] for a single approved PSBT.
#[derive(Clone, Debug)]
pub struct RefSign<'a> {
    keys: HashMap<PublicKey, &'a SecretKey>,
    key_path: bool,
    script_path: Option<TapLeafHash>,
    disable_tweak: bool,
}

impl<'a> RefSign<'a> {
    fn keypair(&self, pk: XOnlyPk) -> Option<Keypair> {
        self.keys
            .iter()
            .find(|(pubkey, _)| pubkey.x_only_public_key().0 == pk.into_inner())
            .map(|(_, sk)| Keypair::from_secret_key(SECP256K1, sk))
    }
}

#[cfg(feature = "signers")]
fn sign_schnorr(message: TapSighash, pair: &Keypair) -> bip340::Signature {
    SECP256K1.sign_schnorr(&message.to_byte_array(), pair)
}

#[cfg(not(feature = "signers"))]
fn sign_schnorr(message: TapSighash, pair: &Keypair) -> bip340::Signature {
    SECP256K1.sign_schnorr_no_aux_rand(&message.to_byte_array(), pair)
}

impl<'a> Sign for RefSign<'a> {
    fn sign_ecdsa(
        &self,
        message: Sighash,
        pk: LegacyPk,
        _origin: Option<&KeyOrigin>,
    ) -> Option<ecdsa::Signature> {
        if !pk.compressed {
            return None;
        }
        let sk = self.keys.get(&pk.pubkey)?;
        Some(SECP256K1.sign_ecdsa(&Message::from_digest(message.to_byte_array()), sk))
    }

    fn sign_bip340_key_only(
        &self,
        message: TapSighash,
        pk: InternalPk,
        _origin: Option<&KeyOrigin>,
        merkle_root: Option<TapNodeHash>,
    ) -> Option<bip340::Signature> {
        let pair = self.keypair(pk.to_xonly_pk())?;
        if self.disable_tweak {
            return Some(sign_schnorr(message, &pair));
        }
        let (output_pair, _) = InternalKeypair::from(pair).to_output_keypair(merkle_root);
        Some(sign_schnorr(message, &output_pair))
    }

    fn sign_bip340_script_path(
        &self,
        message: TapSighash,
        pk: XOnlyPk,
        _origin: Option<&KeyOrigin>,
    ) -> Option<bip340::Signature> {
        let pair = self.keypair(pk)?;
        Some(sign_schnorr(message, &pair))
    }

    fn should_sign_script_path(
        &self,
        _index: usize,
        _merkle_path: &TapMerklePath,
        leaf: TapLeafHash,
    ) -> bool {
        self.script_path == Some(leaf)
    }

    fn should_sign_key_path(&self, _index: usize) -> bool { self.key_path }
}
