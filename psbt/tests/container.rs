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

use std::str::FromStr;

use amplify::ByteArray;
use payments::{
    P2msFields, P2shFields, P2wpkhFields, P2wshFields, PaymentOpts, Redeem, ScriptTemplate,
};
use primitives::{
    CompressedPk, LegacyPk, LegacySig, Outpoint, SeqNo, SighashType, Txid,
};
use psbt::{ConstructError, InputState, InputUpdate, Prevout, Psbt, PsbtAction, PsbtVer};
use rstest::rstest;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

fn pubkey(n: u8) -> PublicKey {
    SecretKey::from_slice(&[n; 32]).unwrap().public_key(SECP256K1)
}

fn signature(n: u8, sighash_type: SighashType) -> LegacySig {
    let sk = SecretKey::from_slice(&[n; 32]).unwrap();
    let sig = SECP256K1.sign_ecdsa(&Message::from_digest([0x5A; 32]), &sk);
    LegacySig { sig, sighash_type }
}

fn create(fields: impl Into<payments::KnownFields>) -> ScriptTemplate {
    ScriptTemplate::create(fields, PaymentOpts::default()).unwrap()
}

fn p2wpkh(n: u8) -> ScriptTemplate {
    create(P2wpkhFields {
        pubkey: Some(CompressedPk::from(pubkey(n))),
        ..Default::default()
    })
}

fn p2sh_p2wsh_multisig() -> ScriptTemplate {
    let multisig = create(P2msFields {
        m: Some(2),
        pubkeys: Some(vec![LegacyPk::from(pubkey(1)), LegacyPk::from(pubkey(2))]),
        ..Default::default()
    });
    let p2wsh = create(P2wshFields {
        redeem: Some(Redeem::from(&multisig)),
        ..Default::default()
    });
    create(P2shFields {
        redeem: Some(Redeem::from(&p2wsh)),
        ..Default::default()
    })
}

fn prevout(n: u8) -> Prevout {
    Prevout::new(Outpoint::new(Txid::from_byte_array([n; 32]), n as u32), 100_000u64)
}

fn sample(version: PsbtVer) -> Psbt {
    let mut psbt = Psbt::create(version);
    psbt.construct_input(prevout(1), &p2wpkh(1), SeqNo::MAX).unwrap();
    psbt.construct_input(prevout(2), &p2sh_p2wsh_multisig(), SeqNo::from(0xFFFF_FFFD))
        .unwrap();
    psbt.construct_output(&p2wpkh(7), 150_000u64).unwrap();
    psbt.construct_output(&p2sh_p2wsh_multisig(), 40_000u64).unwrap();
    psbt
}

#[rstest]
#[case::v0(PsbtVer::V0)]
#[case::v2(PsbtVer::V2)]
fn constructed_roundtrip(#[case] version: PsbtVer) {
    let psbt = sample(version);
    let encoded = psbt.to_string();
    let decoded = Psbt::from_str(&encoded).unwrap();
    assert_eq!(decoded.version, version);
    assert_eq!(decoded.to_string(), encoded);
    assert_eq!(Psbt::from_base16(&psbt.to_base16()).unwrap().to_string(), encoded);

    assert_eq!(decoded.txid(), psbt.txid());
    assert_eq!(decoded.input_count(), 2);
    assert_eq!(decoded.output_count(), 2);
    for (orig, parsed) in psbt.inputs().zip(decoded.inputs()) {
        assert_eq!(parsed.witness_utxo, orig.witness_utxo);
        assert_eq!(parsed.redeem_script, orig.redeem_script);
        assert_eq!(parsed.witness_script, orig.witness_script);
        assert_eq!(parsed.bip32_derivation, orig.bip32_derivation);
    }
    assert_eq!(decoded.fee(), Some(10_000u64.into()));
}

#[test]
fn version_conversion() {
    let psbt = sample(PsbtVer::V2);
    let v0 = Psbt::from_base64(&psbt.to_base64_ver(PsbtVer::V0)).unwrap();
    assert_eq!(v0.version, PsbtVer::V0);
    assert_eq!(v0.txid(), psbt.txid());
    assert_eq!(v0.to_base64(), psbt.to_base64_ver(PsbtVer::V0));
}

#[test]
fn signatures_survive_roundtrip() {
    let mut psbt = sample(PsbtVer::V2);
    let sig = signature(1, SighashType::all());
    psbt.update_input(0, InputUpdate {
        partial_sigs: [(LegacyPk::from(pubkey(1)), sig)].into_iter().collect(),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(psbt.input(0).unwrap().state(), InputState::PartiallySigned);
    assert_eq!(psbt.input(1).unwrap().state(), InputState::Unsigned);

    let decoded = Psbt::from_str(&psbt.to_string()).unwrap();
    assert_eq!(decoded.input(0).unwrap().partial_sigs[&LegacyPk::from(pubkey(1))], sig);
}

#[test]
fn committing_signature_blocks_changes() {
    let mut psbt = sample(PsbtVer::V2);
    psbt.update_input(1, InputUpdate {
        partial_sigs: [(LegacyPk::from(pubkey(2)), signature(2, SighashType::all()))]
            .into_iter()
            .collect(),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(
        psbt.construct_input(prevout(3), &p2wpkh(3), SeqNo::MAX).unwrap_err(),
        ConstructError::SignatureCommits(PsbtAction::AddInput, 1)
    );
    assert_eq!(
        psbt.set_input_sequence(0, SeqNo::from(0)).unwrap_err(),
        ConstructError::SignatureCommits(PsbtAction::SetInputSequence, 1)
    );
    assert_eq!(psbt.input_count(), 2);
}

#[test]
fn anyone_can_pay_allows_inputs() {
    let mut psbt = sample(PsbtVer::V2);
    let ty = SighashType::all_anyone_can_pay();
    psbt.update_input(0, InputUpdate {
        partial_sigs: [(LegacyPk::from(pubkey(1)), signature(1, ty))].into_iter().collect(),
        ..Default::default()
    })
    .unwrap();
    psbt.construct_input(prevout(3), &p2wpkh(3), SeqNo::MAX).unwrap();
    assert_eq!(psbt.input_count(), 3);
}

#[test]
fn garbage_rejected() {
    assert!(Psbt::from_str("cHNidP8=").is_err());
    assert!(Psbt::from_str("not a psbt").is_err());
    assert!(Psbt::from_base16("70736274ff").is_err());
}
