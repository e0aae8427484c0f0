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

use invoice::AddressParseError;
use primitives::ScriptError;
use taproot::{ControlBlockError, InvalidTree};

/// Payment field which may be supplied through more than one route.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum Field {
    #[display("Hash")]
    Hash,

    #[display("Pubkey")]
    Pubkey,

    #[display("Pubkeys")]
    Pubkeys,

    #[display("Pubkey count")]
    PubkeyCount,

    #[display("Internal pubkey")]
    InternalPubkey,

    #[display("Signature")]
    Signature,

    #[display("m")]
    M,

    #[display("n")]
    N,

    #[display("Network")]
    Network,

    #[display("Output")]
    Output,

    #[display("Input")]
    Input,

    #[display("Witness")]
    Witness,

    #[display("Redeem.output")]
    RedeemOutput,

    #[display("Redeem.input")]
    RedeemInput,

    #[display("Redeem.witness")]
    RedeemWitness,
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum PaymentError {
    /// Not enough data
    NotEnoughData,

    /// {0} mismatch
    Mismatch(Field),

    /// Output is invalid
    OutputInvalid,

    /// Input is invalid
    InputInvalid,

    /// Witness is invalid
    WitnessInvalid,

    /// Input not empty
    InputNotEmpty,

    /// Invalid address type
    InvalidAddressType,

    /// Invalid address version
    InvalidAddressVersion,

    /// Invalid address data
    InvalidAddressData,

    /// Non push-only scriptSig
    NonPushOnly,

    /// Input and witness provided
    InputAndWitness,

    /// Empty input
    EmptyInput,

    /// Redeem.output too short
    RedeemOutputTooShort,

    /// redeem.input or redeem.output contains uncompressed pubkey
    UncompressedPubkey,

    /// Pubkey count cannot be less than m
    PubkeyCountBelowM,

    /// Invalid multisig bounds m={0}, n={1}
    MultisigBounds(u8, u8),

    /// Not enough signatures provided
    NotEnoughSignatures,

    /// Too many signatures provided
    TooManySignatures,

    /// Input has invalid signature(s)
    InvalidSignatures,

    /// Incorrect parity
    IncorrectParity,

    /// Redeem script not in tree
    RedeemNotInTree,

    #[from]
    #[display(inner)]
    Script(ScriptError),

    #[from]
    #[display(inner)]
    Address(AddressParseError),

    #[from]
    #[display(inner)]
    ControlBlock(ControlBlockError),

    #[from]
    #[display(inner)]
    Tree(InvalidTree),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(PaymentError::Mismatch(Field::Hash).to_string(), "Hash mismatch");
        assert_eq!(PaymentError::Mismatch(Field::M).to_string(), "m mismatch");
        assert_eq!(
            PaymentError::Mismatch(Field::RedeemOutput).to_string(),
            "Redeem.output mismatch"
        );
        assert_eq!(PaymentError::Mismatch(Field::PubkeyCount).to_string(), "Pubkey count mismatch");
        assert_eq!(PaymentError::from(ScriptError).to_string(), "Unknown script error");
        assert_eq!(
            PaymentError::from(ControlBlockError::TooSmall).to_string(),
            "control-block length is too small"
        );
    }
}
