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

use primitives::{
    Bip340Sig, KeyOrigin, LegacyPk, LegacySig, PrevoutMismatch, ScriptCode, ScriptPubkey,
    Sighash, SighashCache, SighashError, SighashType, Tx, Txid, XOnlyPk,
};
use secp256k1::{ecdsa, schnorr as bip340};
use taproot::{InternalPk, TapLeafHash, TapMerklePath, TapNodeHash, TapSighash};
use tracing::{debug, warn};

use crate::tap::is_taproot_input;
use crate::{Input, Psbt};

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("the transaction was rejected by the signer.")]
pub struct Rejected;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum SignError {
    /// the transaction was rejected by the signer.
    #[from(Rejected)]
    Rejected,

    /// PSBT doesn't have input #{0}.
    NoInput(usize),

    /// input #{0} doesn't specify the output it spends, which is required for signing.
    NoPrevout(usize),

    #[from]
    #[display(inner)]
    PrevoutMismatch(PrevoutMismatch),

    /// transaction {txid} input {index} uses SIGHASH_SINGLE, but the total
    /// number of outputs is {outputs} and thus no signature can be produced.
    SighashOnlyMismatch {
        txid: Txid,
        index: usize,
        outputs: usize,
    },
}

impl From<SighashError> for SignError {
    fn from(err: SighashError) -> Self {
        match err {
            SighashError::InvalidInputIndex { index, .. } => Self::NoInput(index),
            SighashError::NoSingleOutputMatch {
                txid,
                index,
                outputs,
            } => Self::SighashOnlyMismatch {
                txid,
                index,
                outputs,
            },
        }
    }
}

/// Trait used for signing transactions.
pub trait Sign {
    /// Create signature with a given key for inputs requiring ECDSA signatures (bare, pre-segwit
    /// and segwit v0).
    fn sign_ecdsa(
        &self,
        message: Sighash,
        pk: LegacyPk,
        origin: Option<&KeyOrigin>,
    ) -> Option<ecdsa::Signature>;

    /// Create signature with a given internal key using Schnorr signatures with BIP-340 signing
    /// scheme (taproot).
    ///
    /// Unless configured otherwise, the signer must tweak the private key with the provided
    /// merkle root, such that the signature is valid for the output key.
    fn sign_bip340_key_only(
        &self,
        message: TapSighash,
        pk: InternalPk,
        origin: Option<&KeyOrigin>,
        merkle_root: Option<TapNodeHash>,
    ) -> Option<bip340::Signature>;

    /// Create signature with a given script path and x-only public key using Schnorr signatures
    /// with BIP-340 signing scheme (taproot).
    fn sign_bip340_script_path(
        &self,
        message: TapSighash,
        pk: XOnlyPk,
        origin: Option<&KeyOrigin>,
    ) -> Option<bip340::Signature>;

    /// Detect whether a given taproot script spending path should be signed for a given input
    /// `index`.
    #[must_use]
    fn should_sign_script_path(
        &self,
        index: usize,
        merkle_path: &TapMerklePath,
        leaf: TapLeafHash,
    ) -> bool;

    /// Detect whether taproot key spending path should be signed for a given input `index`.
    #[must_use]
    fn should_sign_key_path(&self, index: usize) -> bool;
}

/// Trait which should be implemented by all signers.
///
/// Signers must ensure that the transaction is checked by the user when they get
/// [`Signer::approve`] callback.
pub trait Signer {
    /// Type which does the actual signatures. See [`Sign`] trait for the details.
    type Sign<'s>: Sign
    where Self: 's;

    /// In the implementation of this method signers must ensure that transaction is checked by the
    /// user.
    fn approve(&self, psbt: &Psbt) -> Result<Self::Sign<'_>, Rejected>;
}

impl Psbt {
    /// Signs PSBT using the given `signer`. The signer determines whether the
    /// transaction should be accepted by the user and which script paths
    /// and keys should be used for signing for each of the inputs.
    ///
    /// See [`Signer`] and [`Sign`] traits for details on how the interaction with `signer`
    /// happens.
    ///
    /// Returns the number of produced signatures.
    pub fn sign(&mut self, signer: &impl Signer) -> Result<usize, SignError> {
        self.sign_inputs(signer, |_| true)
    }

    /// Signs a single input of the PSBT, leaving the other inputs intact.
    pub fn sign_input(&mut self, index: usize, signer: &impl Signer) -> Result<usize, SignError> {
        if index >= self.inputs.len() {
            return Err(SignError::NoInput(index));
        }
        self.sign_inputs(signer, |no| no == index)
    }

    fn sign_inputs(
        &mut self,
        signer: &impl Signer,
        select: impl Fn(usize) -> bool,
    ) -> Result<usize, SignError> {
        let satisfier = signer.approve(self)?;

        let prevouts = self
            .inputs
            .iter()
            .map(|input| input.prev_txout().cloned().ok_or(SignError::NoPrevout(input.index)))
            .collect::<Result<Vec<_>, _>>()?;
        let tx = Tx::from(self.to_unsigned_tx());
        let mut sig_hasher = SighashCache::new(tx, prevouts)?;
        let mut sig_count = 0usize;

        for input in self.inputs.iter_mut().filter(|input| select(input.index)) {
            if input.is_finalized() {
                warn!(input = input.index, "input is already finalized, skipping");
                continue;
            }
            sig_count += input.sign(&satisfier, &mut sig_hasher)?;
        }

        debug!(signatures = sig_count, "PSBT signing complete");
        Ok(sig_count)
    }
}

/// Script committed to by an ECDSA signature.
enum SignedScript {
    /// Pre-segwit script: the spent script pubkey or the P2SH redeem script.
    Legacy(ScriptPubkey),
    /// BIP-143 script code of a native or P2SH-nested segwit v0 output.
    Segwit(ScriptCode),
}

impl SignedScript {
    fn with(input: &Input, script_pubkey: &ScriptPubkey) -> Option<Self> {
        let inner = if script_pubkey.is_p2sh() {
            ScriptPubkey::from(input.redeem_script.as_ref()?.as_script_bytes().clone())
        } else {
            script_pubkey.clone()
        };
        Some(if inner.is_p2wpkh() {
            SignedScript::Segwit(ScriptCode::with_p2wpkh(&inner))
        } else if inner.is_p2wsh() {
            SignedScript::Segwit(ScriptCode::with_p2wsh(input.witness_script.as_ref()?))
        } else {
            SignedScript::Legacy(inner)
        })
    }
}

impl Input {
    fn sign(
        &mut self,
        satisfier: &impl Sign,
        sig_hasher: &mut SighashCache,
    ) -> Result<usize, SighashError> {
        if is_taproot_input(self) {
            self.sign_bip340(satisfier, sig_hasher)
        } else {
            self.sign_ecdsa(satisfier, sig_hasher)
        }
    }

    fn sign_ecdsa(
        &mut self,
        signer: &impl Sign,
        sig_hasher: &mut SighashCache,
    ) -> Result<usize, SighashError> {
        let Some(prevout) = self.prev_txout().cloned() else {
            return Ok(0);
        };
        let Some(script) = SignedScript::with(self, &prevout.script_pubkey) else {
            warn!(input = self.index, "redeem or witness script is missing, skipping");
            return Ok(0);
        };

        let sighash_type = self.sighash_type.unwrap_or_default();
        let sighash = match &script {
            SignedScript::Segwit(script_code) => {
                sig_hasher.segwit_sighash(self.index, script_code, prevout.value, sighash_type)?
            }
            SignedScript::Legacy(script_pubkey) => sig_hasher.legacy_sighash(
                self.index,
                script_pubkey,
                sighash_type.to_consensus_u32(),
            )?,
        };
        let segwit = matches!(script, SignedScript::Segwit(_));
        debug!(input = self.index, segwit, %sighash_type, "signing with ECDSA");

        let mut signature_count = 0usize;
        for (pk, origin) in &self.bip32_derivation {
            let Some(sig) = signer.sign_ecdsa(sighash, *pk, Some(origin)) else {
                continue;
            };
            self.partial_sigs.insert(*pk, LegacySig { sig, sighash_type });
            signature_count += 1;
        }
        Ok(signature_count)
    }

    fn sign_bip340(
        &mut self,
        signer: &impl Sign,
        sig_hasher: &mut SighashCache,
    ) -> Result<usize, SighashError> {
        let mut signature_count = 0usize;
        let sighash_type: Option<SighashType> = self.sighash_type;

        // Sign all script paths
        for (control_block, leaf_script) in &self.tap_leaf_script {
            let tapleaf_hash = leaf_script.tap_leaf_hash();

            if !signer.should_sign_script_path(
                self.index,
                &control_block.merkle_branch,
                tapleaf_hash,
            ) {
                continue;
            }

            let sighash = sig_hasher.tap_sighash_script(self.index, tapleaf_hash, sighash_type)?;
            debug!(input = self.index, leaf = %tapleaf_hash, "signing taproot script path");

            for (pk, tap) in &self.tap_bip32_derivation {
                if !tap.leaf_hashes.contains(&tapleaf_hash) {
                    continue;
                }
                let Some(sig) = signer.sign_bip340_script_path(sighash, *pk, Some(&tap.origin))
                else {
                    continue;
                };
                let sig = Bip340Sig { sig, sighash_type };
                self.tap_script_sig.insert((*pk, tapleaf_hash), sig);
                signature_count += 1;
            }
        }

        // Sign keypath
        if !signer.should_sign_key_path(self.index) {
            return Ok(signature_count);
        }
        let Some(internal_key) = self.tap_internal_key else {
            return Ok(signature_count);
        };
        let derivation = self.tap_bip32_derivation.get(&internal_key.to_xonly_pk());
        let sighash = sig_hasher.tap_sighash_key(self.index, sighash_type)?;
        debug!(
            input = self.index,
            tweaked = self.tap_merkle_root.is_some(),
            "signing taproot key path"
        );
        let Some(sig) = signer.sign_bip340_key_only(
            sighash,
            internal_key,
            derivation.map(|d| &d.origin),
            self.tap_merkle_root,
        ) else {
            return Ok(signature_count);
        };
        let sig = Bip340Sig { sig, sighash_type };
        self.tap_key_sig = Some(sig);
        signature_count += 1;

        Ok(signature_count)
    }
}
