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

//! Field cross-checks shared by all script templates.

use bech32::Variant;
use invoice::{AddressNetwork, Network, RawAddress, RawAddressKind};
use primitives::{Instruction, LegacySig, ScriptBytes, ScriptBytesExt};

use crate::{Field, PaymentError};

/// Merges values of the same field obtained through different routes. With validation on, all
/// present values must be equal.
pub(crate) fn agree<T: PartialEq>(
    field: Field,
    validate: bool,
    candidates: impl IntoIterator<Item = Option<T>>,
) -> Result<Option<T>, PaymentError> {
    let mut found = None;
    for candidate in candidates.into_iter().flatten() {
        match &found {
            None => found = Some(candidate),
            Some(known) if validate && *known != candidate => {
                return Err(PaymentError::Mismatch(field));
            }
            Some(_) => {}
        }
    }
    Ok(found)
}

/// Decodes an optional field. Decoding failures are reported only when validation is on;
/// otherwise the field is ignored for the purposes of derivation.
pub(crate) fn try_decode<S: ?Sized, T>(
    source: Option<&S>,
    validate: bool,
    decode: impl FnOnce(&S) -> Result<T, PaymentError>,
) -> Result<Option<T>, PaymentError> {
    match source.map(decode) {
        None => Ok(None),
        Some(Ok(val)) => Ok(Some(val)),
        Some(Err(err)) if validate => Err(err),
        Some(Err(_)) => Ok(None),
    }
}

pub(crate) fn network_from_address(network: AddressNetwork) -> Network {
    match network {
        AddressNetwork::Mainnet => Network::Mainnet,
        AddressNetwork::Testnet => Network::Testnet3,
        AddressNetwork::Regtest => Network::Regtest,
    }
}

/// Resolves the payment network from the explicitly given one and the network of a decoded
/// address. Base58 addresses do not distinguish testnet from regtest.
pub(crate) fn resolve_network(
    given: Option<Network>,
    decoded: Option<(AddressNetwork, bool)>,
    validate: bool,
) -> Result<Network, PaymentError> {
    match (given, decoded) {
        (Some(network), Some((addr_network, base58))) => {
            let expected = AddressNetwork::from(network);
            let compatible = match base58 {
                true => expected.is_base58_compatible(addr_network),
                false => expected == addr_network,
            };
            if validate && !compatible {
                return Err(PaymentError::Mismatch(Field::Network));
            }
            Ok(network)
        }
        (None, Some((addr_network, _))) => Ok(network_from_address(addr_network)),
        (Some(network), None) => Ok(network),
        (None, None) => Ok(Network::default()),
    }
}

/// Decodes base58check address payload. `pubkey` selects between pubkey-hash and script-hash
/// version bytes.
pub(crate) fn base58_payload(
    address: &str,
    pubkey: bool,
) -> Result<(AddressNetwork, [u8; 20]), PaymentError> {
    let raw = RawAddress::decode(address)?;
    let RawAddressKind::Base58 { version } = raw.kind else {
        return Err(PaymentError::InvalidAddressType);
    };
    let expected = match pubkey {
        true => raw.network.pubkey_prefix(),
        false => raw.network.script_prefix(),
    };
    if version != expected {
        return Err(PaymentError::InvalidAddressVersion);
    }
    let data = <[u8; 20]>::try_from(raw.data.as_slice())
        .map_err(|_| PaymentError::InvalidAddressData)?;
    Ok((raw.network, data))
}

/// Decodes segwit address witness program of the given version and length.
pub(crate) fn segwit_payload<const LEN: usize>(
    address: &str,
    witness_version: u8,
) -> Result<(AddressNetwork, [u8; LEN]), PaymentError> {
    let raw = RawAddress::decode(address)?;
    let RawAddressKind::Segwit { version, variant } = raw.kind else {
        return Err(PaymentError::InvalidAddressType);
    };
    let expected_variant = match version {
        0 => Variant::Bech32,
        _ => Variant::Bech32m,
    };
    if version != witness_version || variant != expected_variant {
        return Err(PaymentError::InvalidAddressVersion);
    }
    let data = <[u8; LEN]>::try_from(raw.data.as_slice())
        .map_err(|_| PaymentError::InvalidAddressData)?;
    Ok((raw.network, data))
}

/// Parses a canonically-encoded ECDSA signature with a standard sighash byte.
pub(crate) fn canonical_sig(data: &[u8]) -> Option<LegacySig> { LegacySig::from_bytes(data).ok() }

/// Checks that script instructions contain no 65-byte uncompressed public keys.
pub(crate) fn has_uncompressed_pubkey(script: &ScriptBytes) -> bool {
    script
        .decompile()
        .map(|instrs| {
            instrs.iter().any(|instr| {
                matches!(instr, Instruction::Push(data) if data.len() == 65 && data[0] == 0x04)
            })
        })
        .unwrap_or(false)
}
