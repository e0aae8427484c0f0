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

use bitcoin_hashes::{hash160, sha256, Hash};

/// Single SHA256, used for the P2WSH witness program.
pub fn sha256(data: impl AsRef<[u8]>) -> [u8; 32] {
    sha256::Hash::hash(data.as_ref()).to_byte_array()
}

pub fn hash160(data: impl AsRef<[u8]>) -> [u8; 20] {
    hash160::Hash::hash(data.as_ref()).to_byte_array()
}

#[cfg(test)]
mod test {
    use amplify::hex::ToHex;
    use bc::{RedeemScript, ScriptHash};

    use super::*;

    #[test]
    fn hash160_of_op_true() {
        assert_eq!(hash160([0x51]).to_hex(), "da1745e9b549bd0bfa1a569971c77eba30cd5a4b");
        let redeem_script = RedeemScript::from_unsafe(vec![0x51]);
        assert_eq!(<[u8; 20]>::from(ScriptHash::from(&redeem_script)), hash160([0x51]));
    }

    #[test]
    fn single_sha256() {
        assert_eq!(
            sha256([]).to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
