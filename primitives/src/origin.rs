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

use std::fmt::{self, Display, Formatter};
use std::io::{self, Read, Write};
use std::str::FromStr;

use amplify::hex::{self, FromHex, ToHex};
use amplify::{ByteArray, IoError};
use bc::{ConsensusDecode, ConsensusDecodeError, ConsensusEncode, TapLeafHash, VarInt};

/// Index of a hardened derivation step.
pub const HARDENED_INDEX_BOUNDARY: u32 = 1 << 31;

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum OriginParseError {
    /// master key fingerprint must be 4 bytes in hex form: {0}
    #[from]
    Fingerprint(hex::Error),

    /// invalid derivation path index '{0}'.
    InvalidIndex(String),

    /// derivation origin string is empty.
    Empty,
}

/// Key origin information: fingerprint of the master key and the derivation path from it.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct KeyOrigin {
    pub master_fp: [u8; 4],
    pub derivation: Vec<u32>,
}

impl KeyOrigin {
    pub fn new(master_fp: [u8; 4], derivation: impl IntoIterator<Item = u32>) -> Self {
        KeyOrigin {
            master_fp,
            derivation: derivation.into_iter().collect(),
        }
    }

    /// Length of the PSBT value serialization.
    pub fn serialized_len(&self) -> usize { 4 + self.derivation.len() * 4 }

    /// Encodes as in the PSBT `BIP32_DERIVATION` value: fingerprint followed by LE indexes.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.serialized_len());
        data.extend_from_slice(&self.master_fp);
        for index in &self.derivation {
            data.extend_from_slice(&index.to_le_bytes());
        }
        data
    }

    /// Parses PSBT value serialization. Returns `None` if the length is not a multiple of 4 or
    /// is shorter than the fingerprint.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() < 4 || data.len() % 4 != 0 {
            return None;
        }
        let mut master_fp = [0u8; 4];
        master_fp.copy_from_slice(&data[..4]);
        let derivation = data[4..]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(KeyOrigin {
            master_fp,
            derivation,
        })
    }
}

impl Display for KeyOrigin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.master_fp.to_hex())?;
        for index in &self.derivation {
            if *index >= HARDENED_INDEX_BOUNDARY {
                write!(f, "/{}h", index - HARDENED_INDEX_BOUNDARY)?;
            } else {
                write!(f, "/{index}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for KeyOrigin {
    type Err = OriginParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.split('/');
        let fp = split.next().filter(|fp| !fp.is_empty()).ok_or(OriginParseError::Empty)?;
        let master_fp = <[u8; 4]>::from_hex(fp)?;
        let derivation = split
            .map(|index| {
                let (num, hardened) = match index.strip_suffix(['h', '\'']) {
                    Some(num) => (num, true),
                    None => (index, false),
                };
                let num = u32::from_str(num)
                    .ok()
                    .filter(|n| *n < HARDENED_INDEX_BOUNDARY)
                    .ok_or_else(|| OriginParseError::InvalidIndex(index.to_owned()))?;
                Ok(if hardened { num + HARDENED_INDEX_BOUNDARY } else { num })
            })
            .collect::<Result<_, OriginParseError>>()?;
        Ok(KeyOrigin {
            master_fp,
            derivation,
        })
    }
}

/// Taproot key origin, listing the tapleafs in which the key participates.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct TapDerivation {
    pub leaf_hashes: Vec<TapLeafHash>,
    pub origin: KeyOrigin,
}

impl TapDerivation {
    pub fn with_internal_pk(origin: KeyOrigin) -> Self {
        TapDerivation {
            leaf_hashes: empty!(),
            origin,
        }
    }
}

impl ConsensusEncode for TapDerivation {
    fn consensus_encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = VarInt::with(self.leaf_hashes.len()).consensus_encode(writer)?;
        for leaf_hash in &self.leaf_hashes {
            counter += leaf_hash.consensus_encode(writer)?;
        }
        let origin = self.origin.to_vec();
        writer.write_all(&origin)?;
        Ok(counter + origin.len())
    }
}

impl ConsensusDecode for TapDerivation {
    /// Reads the whole remainder of the reader, since the PSBT value carries no length prefix
    /// for the origin part.
    fn consensus_decode(reader: &mut impl Read) -> Result<Self, ConsensusDecodeError> {
        let count = VarInt::consensus_decode(reader)?.to_usize();
        let mut leaf_hashes = Vec::with_capacity(count.min(128));
        for _ in 0..count {
            leaf_hashes.push(TapLeafHash::from_byte_array(<[u8; 32]>::consensus_decode(reader)?));
        }
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        let origin = KeyOrigin::from_slice(&rest).ok_or_else(|| {
            ConsensusDecodeError::from(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid key origin",
            ))
        })?;
        Ok(TapDerivation {
            leaf_hashes,
            origin,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn origin_str() {
        let origin = KeyOrigin::from_str("d34db33f/86h/0'/0h/0/5").unwrap();
        assert_eq!(origin.master_fp, [0xd3, 0x4d, 0xb3, 0x3f]);
        assert_eq!(origin.derivation, vec![
            86 + HARDENED_INDEX_BOUNDARY,
            HARDENED_INDEX_BOUNDARY,
            HARDENED_INDEX_BOUNDARY,
            0,
            5
        ]);
        assert_eq!(origin.to_string(), "d34db33f/86h/0h/0h/0/5");
        assert_eq!(KeyOrigin::from_str(""), Err(OriginParseError::Empty));
        assert!(matches!(
            KeyOrigin::from_str("d34db33f/x"),
            Err(OriginParseError::InvalidIndex(_))
        ));
    }

    #[test]
    fn origin_bytes() {
        let origin = KeyOrigin::new([1, 2, 3, 4], [HARDENED_INDEX_BOUNDARY + 1, 7]);
        let data = origin.to_vec();
        assert_eq!(data, vec![1, 2, 3, 4, 1, 0, 0, 0x80, 7, 0, 0, 0]);
        assert_eq!(KeyOrigin::from_slice(&data), Some(origin.clone()));
        assert_eq!(KeyOrigin::from_slice(&data[..5]), None);

        let tap = TapDerivation {
            leaf_hashes: vec![TapLeafHash::from_byte_array([9u8; 32])],
            origin,
        };
        let ser = tap.consensus_serialize();
        assert_eq!(ser.len(), 1 + 32 + 12);
        assert_eq!(TapDerivation::consensus_deserialize(&ser).unwrap(), tap);
    }
}
