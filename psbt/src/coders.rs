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

use std::io::{self, Cursor, Read, Write};

use amplify::{ByteArray, Bytes20, Bytes32, IoError};
use primitives::{
    Bip340Sig, ByteStr, ConsensusDataError, ConsensusDecode, ConsensusDecodeError,
    ConsensusEncode, InvalidPubkey, KeyOrigin, LegacyPk, LegacySig, LockTime, NonStandardValue,
    Outpoint, RedeemScript, Sats, ScriptBytes, ScriptPubkey, SeqNo, SigError, SigScript,
    SighashType, TapDerivation, Tx, TxOut, TxVer, Txid, VarInt, Vout, Witness, WitnessScript,
    XOnlyPk,
};
use taproot::{
    ControlBlock, ControlBlockError, ControlBlockExt, InternalPk, InvalidLeafVer, InvalidTree,
    LeafInfo, LeafScript, LeafVer, TapLeafHash, TapNodeHash, TapTree,
};

use crate::keys::KeyValue;
use crate::{
    GlobalKey, InputKey, KeyData, KeyMap, KeyPair, KeyType, Map, MapName, ModifiableFlags,
    OutputKey, PropKey, Psbt, PsbtUnsupportedVer, PsbtVer, UnsignedTx, UnsignedTxIn, ValueData,
};

#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(inner)]
pub enum DecodeError {
    #[from]
    #[from(io::Error)]
    Io(IoError),

    #[from]
    #[from(ConsensusDataError)]
    #[from(PsbtUnsupportedVer)]
    #[from(SigError)]
    #[from(ControlBlockError)]
    #[from(InvalidLeafVer)]
    #[from(InvalidTree)]
    Psbt(PsbtError),
}

impl From<ConsensusDecodeError> for DecodeError {
    fn from(e: ConsensusDecodeError) -> Self {
        match e {
            ConsensusDecodeError::Io(e) => DecodeError::Io(e),
            ConsensusDecodeError::Data(data) => data.into(),
        }
    }
}

impl From<NonStandardValue<u32>> for DecodeError {
    fn from(e: NonStandardValue<u32>) -> Self { DecodeError::Psbt(PsbtError::InvalidSighash(e)) }
}

impl From<InvalidPubkey<65>> for DecodeError {
    fn from(e: InvalidPubkey<65>) -> Self { DecodeError::Psbt(PsbtError::InvalidPubkey(e)) }
}

impl From<InvalidPubkey<32>> for DecodeError {
    fn from(e: InvalidPubkey<32>) -> Self { DecodeError::Psbt(PsbtError::InvalidXOnlyPubkey(e)) }
}

#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum PsbtError {
    /// unexpected end of data.
    UnexpectedEod,

    /// PSBT data are followed by some excessive bytes.
    DataNotConsumed,

    /// invalid magic bytes {0:x}.
    InvalidMagic(ByteStr),

    /// {0} map key {1:#04x} must not be present in PSBT {2}.
    UnexpectedKey(MapName, u8, PsbtVer),

    /// {0} map key {1:#04x} is deprecated and must not be present in PSBT {2}.
    DeprecatedKey(MapName, u8, PsbtVer),

    /// {0} map key {1:#04x} required for PSBT {2} is not present.
    RequiredKeyAbsent(MapName, u8, PsbtVer),

    /// repeated {0} map key {1:#04x}.
    RepeatedKey(MapName, u8),

    /// repeated proprietary key {1} in {0} map.
    RepeatedPropKey(MapName, PropKey),

    /// repeated unknown key {1:#04x} in {0} map.
    RepeatedUnknownKey(MapName, u8),

    /// {0} map key {1:#04x} must not contain additional key data {2:x}.
    NonEmptyKeyData(MapName, u8, KeyData),

    #[from]
    #[display(inner)]
    UnsupportedVersion(PsbtUnsupportedVer),

    /// invalid lock height value {0}.
    InvalidLockHeight(u32),

    /// invalid lock timestamp {0}.
    InvalidLockTimestamp(u32),

    #[from]
    #[display(inner)]
    InvalidPubkey(InvalidPubkey<65>),

    #[from]
    #[display(inner)]
    InvalidXOnlyPubkey(InvalidPubkey<32>),

    #[from]
    #[display(inner)]
    InvalidSig(SigError),

    #[display(inner)]
    InvalidSighash(NonStandardValue<u32>),

    /// extended public key must be 78 bytes long, while {0} bytes were given.
    InvalidXpub(usize),

    /// invalid key origin data {0:x}.
    InvalidKeyOrigin(ByteStr),

    #[from]
    #[display(inner)]
    InvalidControlBlock(ControlBlockError),

    #[from]
    #[display(inner)]
    InvalidLeafVer(InvalidLeafVer),

    #[from]
    #[display(inner)]
    InvalidTapTree(InvalidTree),

    /// proof-of-reserves commitment is not a valid UTF-8 string.
    InvalidUtf8,

    /// unsigned transaction input #{0} has a non-empty signature script.
    SignedUnsignedTx(usize),

    #[from]
    #[display(inner)]
    Consensus(ConsensusDataError),
}

impl From<NonStandardValue<u32>> for PsbtError {
    fn from(e: NonStandardValue<u32>) -> Self { PsbtError::InvalidSighash(e) }
}

impl From<DecodeError> for PsbtError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Psbt(e) => e,
            DecodeError::Io(_) => PsbtError::UnexpectedEod,
        }
    }
}

/// Reads a length-prefixed number of bytes without trusting the prefix for the allocation size.
fn read_bytes(reader: &mut impl Read, len: usize) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::with_capacity(len.min(0x10000));
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(PsbtError::UnexpectedEod.into());
    }
    Ok(buf)
}

fn read_len(reader: &mut impl Read) -> Result<usize, DecodeError> {
    Ok(VarInt::consensus_decode(reader)?.to_usize())
}

pub trait Encode {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError>;

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf).expect("in-memory encoding can't fail");
        buf
    }
}

impl<'a, T: Encode> Encode for &'a T {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> { (*self).encode(writer) }
}

pub trait Decode
where Self: Sized
{
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError>;
    fn deserialize(bytes: impl AsRef<[u8]>) -> Result<Self, PsbtError> {
        let bytes = bytes.as_ref();
        let mut cursor = Cursor::new(bytes);
        let me = Self::decode(&mut cursor)?;
        if cursor.position() != bytes.len() as u64 {
            return Err(PsbtError::DataNotConsumed);
        }
        Ok(me)
    }
}

impl Psbt {
    const MAGIC: [u8; 5] = *b"psbt\xFF";
    pub(crate) const SEPARATOR: [u8; 1] = [0x0];

    /// Encodes PSBT using the given format version, which may differ from [`Psbt::version`].
    pub fn encode(&self, ver: PsbtVer, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = Self::MAGIC.len();
        writer.write_all(&Self::MAGIC)?;

        counter += self.encode_map(ver, writer)?;

        for input in &self.inputs {
            counter += input.encode_map(ver, writer)?;
        }

        for output in &self.outputs {
            counter += output.encode_map(ver, writer)?;
        }

        Ok(counter)
    }

    pub fn encode_vec(&self, ver: PsbtVer, writer: &mut Vec<u8>) -> usize {
        self.encode(ver, writer).expect("in-memory encoding can't error")
    }

    pub fn serialize(&self, ver: PsbtVer) -> Vec<u8> {
        let mut vec = Vec::new();
        self.encode_vec(ver, &mut vec);
        vec
    }

    pub fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut magic = Self::MAGIC;
        reader.read_exact(&mut magic)?;
        if magic != Self::MAGIC {
            return Err(PsbtError::InvalidMagic(ByteStr::from(magic.to_vec())).into());
        }

        let map = Map::<GlobalKey>::parse(MapName::Global, reader)?;
        // version 0 PSBTs may omit the version key
        let version = map
            .standard
            .get(&GlobalKey::Version)
            .and_then(|entries| entries.values().next())
            .map(PsbtVer::deserialize)
            .transpose()?
            .unwrap_or(PsbtVer::V0);
        let mut psbt = Psbt::create(version);
        psbt.tx_modifiable = None;
        psbt.parse_map(version, map)?;

        for input in &mut psbt.inputs {
            let map = Map::<InputKey>::parse(MapName::Input, reader)?;
            input.parse_map(version, map)?;
        }

        for output in &mut psbt.outputs {
            let map = Map::<OutputKey>::parse(MapName::Output, reader)?;
            output.parse_map(version, map)?;
        }

        Ok(psbt)
    }

    pub fn deserialize(data: impl AsRef<[u8]>) -> Result<Self, PsbtError> {
        let data = data.as_ref();
        let mut cursor = Cursor::new(data);
        let psbt = Self::decode(&mut cursor)?;
        if cursor.position() != data.len() as u64 {
            return Err(PsbtError::DataNotConsumed);
        }
        Ok(psbt)
    }
}

impl<T: KeyType> Encode for KeyPair<T> {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = 0;

        counter += self.key_len().encode(writer)?;
        counter += self.key_type.encode(writer)?;
        counter += self.key_data.encode(writer)?;

        counter += self.value_len().encode(writer)?;
        counter += self.value_data.encode(writer)?;

        Ok(counter)
    }
}

impl<T: KeyType> Decode for KeyValue<T> {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let key_len = read_len(reader)?;
        if key_len == 0 {
            return Ok(KeyValue::Separator);
        }

        let key_type = T::decode(reader)?;
        let key_data = read_bytes(reader, key_len - 1)?;

        let value_len = read_len(reader)?;
        let value_data = read_bytes(reader, value_len)?;

        Ok(KeyValue::Pair(KeyPair {
            key_type,
            key_data: KeyData::from(key_data),
            value_data: ValueData::from(value_data),
        }))
    }
}

macro_rules! psbt_code_key_type {
    ($ty:ty) => {
        impl Encode for $ty {
            fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
                self.to_u8().encode(writer)
            }
        }

        impl Decode for $ty {
            fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
                u8::decode(reader).map(Self::from_u8)
            }
        }
    };
}

psbt_code_key_type!(GlobalKey);
psbt_code_key_type!(InputKey);
psbt_code_key_type!(OutputKey);

impl Encode for PropKey {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = self.identifier.len();
        let len = VarInt::with(counter);
        counter += len.encode(writer)?;

        writer.write_all(self.identifier.as_bytes())?;
        counter += VarInt::new(self.subtype).encode(writer)?;
        counter += self.data.len();
        writer.write_all(&self.data)?;

        Ok(counter)
    }
}

impl Decode for PropKey {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let len = read_len(reader)?;
        let identifier = read_bytes(reader, len)?;
        let identifier = String::from_utf8_lossy(&identifier).to_string();

        let subtype = VarInt::decode(reader)?.to_u64();

        let mut data = Vec::<u8>::new();
        reader.read_to_end(&mut data)?;

        Ok(PropKey {
            identifier,
            subtype,
            data,
        })
    }
}

impl Encode for ByteStr {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(self.as_ref())?;
        Ok(self.len())
    }
}

impl Decode for ByteStr {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(ByteStr::from(buf))
    }
}

impl Encode for String {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(self.as_bytes())?;
        Ok(self.len())
    }
}

impl Decode for String {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        String::from_utf8(buf).map_err(|_| PsbtError::InvalidUtf8.into())
    }
}

impl Encode for ModifiableFlags {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        self.to_standard_u8().encode(writer)
    }
}

impl Decode for ModifiableFlags {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let val = u8::decode(reader)?;
        Ok(Self::from_standard_u8(val))
    }
}

impl Encode for PsbtVer {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        self.to_standard_u32().encode(writer)
    }
}

impl Decode for PsbtVer {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let ver = u32::decode(reader)?;
        PsbtVer::try_from_standard_u32(ver).map_err(DecodeError::from)
    }
}

impl Encode for UnsignedTx {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = self.version.encode(writer)?;

        counter += VarInt::with(self.inputs.len()).encode(writer)?;
        for input in &self.inputs {
            counter += input.prev_output.consensus_encode(writer)?;
            // empty signature script
            counter += 0u8.encode(writer)?;
            counter += input.sequence.encode(writer)?;
        }

        counter += VarInt::with(self.outputs.len()).encode(writer)?;
        for output in &self.outputs {
            counter += output.encode(writer)?;
        }

        counter += self.lock_time.encode(writer)?;
        Ok(counter)
    }
}

impl Decode for UnsignedTx {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let version = TxVer::decode(reader)?;

        let input_count = read_len(reader)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for index in 0..input_count {
            let prev_output = Outpoint::consensus_decode(reader)?;
            let sig_script = SigScript::consensus_decode(reader)?;
            if !sig_script.is_empty() {
                return Err(PsbtError::SignedUnsignedTx(index).into());
            }
            let sequence = SeqNo::decode(reader)?;
            inputs.push(UnsignedTxIn {
                prev_output,
                sequence,
            });
        }

        let output_count = read_len(reader)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOut::decode(reader)?);
        }

        let lock_time = LockTime::decode(reader)?;
        Ok(UnsignedTx {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

impl Encode for LegacyPk {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let data = self.to_vec();
        writer.write_all(&data)?;
        Ok(data.len())
    }
}

impl Decode for LegacyPk {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::with_capacity(65);
        reader.read_to_end(&mut buf)?;
        LegacyPk::from_bytes(buf).map_err(DecodeError::from)
    }
}

impl Encode for XOnlyPk {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(&self.to_byte_array())?;
        Ok(32)
    }
}

impl Decode for XOnlyPk {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = [0u8; 32];
        reader.read_exact(&mut buf)?;
        XOnlyPk::from_byte_array(buf).map_err(DecodeError::from)
    }
}

impl Encode for InternalPk {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        self.to_xonly_pk().encode(writer)
    }
}

impl Decode for InternalPk {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        XOnlyPk::decode(reader).map(InternalPk::from_unchecked)
    }
}

impl Encode for KeyOrigin {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let data = self.to_vec();
        writer.write_all(&data)?;
        Ok(data.len())
    }
}

impl Decode for KeyOrigin {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        KeyOrigin::from_slice(&buf).ok_or_else(|| PsbtError::InvalidKeyOrigin(buf.into()).into())
    }
}

impl Encode for LegacySig {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let data = self.to_vec();
        writer.write_all(&data)?;
        Ok(data.len())
    }
}

impl Decode for LegacySig {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::with_capacity(73);
        reader.read_to_end(&mut buf)?;
        LegacySig::from_bytes(&buf).map_err(DecodeError::from)
    }
}

impl Encode for Bip340Sig {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let data = self.to_vec();
        writer.write_all(&data)?;
        Ok(data.len())
    }
}

impl Decode for Bip340Sig {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::with_capacity(65);
        reader.read_to_end(&mut buf)?;
        Bip340Sig::from_bytes(&buf).map_err(DecodeError::from)
    }
}

impl Encode for SighashType {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        self.into_consensus_u32().encode(writer)
    }
}

impl Decode for SighashType {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let val = u32::decode(reader)?;
        SighashType::from_standard_u32(val).map_err(DecodeError::from)
    }
}

impl Encode for ControlBlock {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let data = self.to_vec();
        writer.write_all(&data)?;
        Ok(data.len())
    }
}

impl Decode for ControlBlock {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        ControlBlock::from_slice(&buf).map_err(DecodeError::from)
    }
}

/// Leaf script value of `PSBT_IN_TAP_LEAF_SCRIPT`: the script followed by its leaf version.
impl Encode for LeafScript {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(self.script.as_slice())?;
        writer.write_all(&[self.version.to_consensus_u8()])?;
        Ok(self.script.len() + 1)
    }
}

impl Decode for LeafScript {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let version = buf.pop().ok_or(PsbtError::UnexpectedEod)?;
        let version = LeafVer::from_consensus_u8(version)?;
        Ok(LeafScript::new(version, ScriptBytes::from_unsafe(buf)))
    }
}

impl Encode for TapTree {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        let mut counter = 0;
        for leaf in self {
            counter += leaf.depth.encode(writer)?;
            counter += leaf.script.version.to_consensus_u8().encode(writer)?;
            counter += leaf.script.script.consensus_encode(writer)?;
        }
        Ok(counter)
    }
}

impl Decode for TapTree {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let len = buf.len() as u64;
        let mut cursor = Cursor::new(buf);
        let mut leaves = vec![];
        while cursor.position() < len {
            let depth = u8::decode(&mut cursor)?;
            let version = LeafVer::from_consensus_u8(u8::decode(&mut cursor)?)?;
            let script = ScriptBytes::consensus_decode(&mut cursor)?;
            leaves.push(LeafInfo {
                depth,
                script: LeafScript::new(version, script),
            });
        }
        TapTree::from_leaves(leaves).map_err(DecodeError::from)
    }
}

impl Encode for Bytes20 {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(&self.to_byte_array())?;
        Ok(20)
    }
}

impl Decode for Bytes20 {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = [0u8; 20];
        reader.read_exact(&mut buf)?;
        Ok(Bytes20::from_byte_array(buf))
    }
}

impl Encode for Bytes32 {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(&self.to_byte_array())?;
        Ok(32)
    }
}

impl Decode for Bytes32 {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let mut buf = [0u8; 32];
        reader.read_exact(&mut buf)?;
        Ok(Bytes32::from_byte_array(buf))
    }
}

impl Encode for TapLeafHash {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(&self.to_byte_array())?;
        Ok(32)
    }
}

impl Decode for TapLeafHash {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        <[u8; 32]>::consensus_decode(reader)
            .map(TapLeafHash::from_byte_array)
            .map_err(DecodeError::from)
    }
}

impl Encode for TapNodeHash {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        writer.write_all(&self.to_byte_array())?;
        Ok(32)
    }
}

impl Decode for TapNodeHash {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        <[u8; 32]>::consensus_decode(reader)
            .map(TapNodeHash::from_byte_array)
            .map_err(DecodeError::from)
    }
}

macro_rules! psbt_code_using_consensus {
    ($ty:ty) => {
        impl Encode for $ty {
            fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
                self.consensus_encode(writer)
            }
        }

        impl Decode for $ty {
            fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
                Self::consensus_decode(reader).map_err(DecodeError::from)
            }
        }
    };
}

psbt_code_using_consensus!(Tx);
psbt_code_using_consensus!(TxVer);
psbt_code_using_consensus!(TxOut);
psbt_code_using_consensus!(Txid);
psbt_code_using_consensus!(Vout);
psbt_code_using_consensus!(SeqNo);
psbt_code_using_consensus!(LockTime);
psbt_code_using_consensus!(Sats);
psbt_code_using_consensus!(Witness);
psbt_code_using_consensus!(TapDerivation);
psbt_code_using_consensus!(u8);
psbt_code_using_consensus!(u32);
psbt_code_using_consensus!(VarInt);

/// Scripts are stored in PSBT values as they are, without a length prefix.
macro_rules! psbt_code_raw_script {
    ($ty:ty) => {
        impl Encode for $ty {
            fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
                let script = self.as_script_bytes();
                writer.write_all(script)?;
                Ok(script.len())
            }
        }

        impl Decode for $ty {
            fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(<$ty>::from_unsafe(buf))
            }
        }
    };
}

psbt_code_raw_script!(ScriptPubkey);
psbt_code_raw_script!(RedeemScript);
psbt_code_raw_script!(WitnessScript);
psbt_code_raw_script!(SigScript);

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        Ok(self.0.encode(writer)? + self.1.encode(writer)?)
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(reader: &mut impl Read) -> Result<Self, DecodeError> {
        let a = A::decode(reader)?;
        let b = B::decode(reader)?;
        Ok((a, b))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, writer: &mut impl Write) -> Result<usize, IoError> {
        Ok(match self {
            Some(data) => data.encode(writer)?,
            None => 0,
        })
    }
}

impl Encode for () {
    fn encode(&self, _writer: &mut impl Write) -> Result<usize, IoError> { Ok(0) }
}

impl Decode for () {
    fn decode(_reader: &mut impl Read) -> Result<Self, DecodeError> { Ok(()) }
}

#[cfg(test)]
mod test {
    use amplify::hex::FromHex;
    use taproot::TapScript;

    use super::*;

    #[test]
    fn unsigned_tx_without_inputs() {
        let tx = UnsignedTx {
            version: TxVer::V2,
            inputs: vec![],
            outputs: vec![TxOut::new(ScriptPubkey::op_return(b"psbt"), 1000u64)],
            lock_time: LockTime::ZERO,
        };
        let data = tx.serialize();
        // a zero input count is not treated as a segwit marker
        assert_eq!(data[4], 0x00);
        assert_eq!(UnsignedTx::deserialize(&data).unwrap(), tx);
    }

    #[test]
    fn unsigned_tx_with_sig_script() {
        let data = Vec::<u8>::from_hex(
            "0200000001070707070707070707070707070707070707070707070707070707070707070701000000015\
             1ffffffff0000000000",
        )
        .unwrap();
        assert_eq!(UnsignedTx::deserialize(data), Err(PsbtError::SignedUnsignedTx(0)));
    }

    #[test]
    fn raw_scripts() {
        let script = RedeemScript::from_unsafe(vec![0x51u8]);
        assert_eq!(script.serialize(), vec![0x51]);
        assert_eq!(RedeemScript::deserialize([0x51u8]).unwrap(), script);
        assert_eq!(SigScript::deserialize([0u8; 0]).unwrap(), SigScript::new());
    }

    #[test]
    fn leaf_script_value() {
        let leaf = LeafScript::from_tap_script(TapScript::from_unsafe(vec![0x51u8]));
        assert_eq!(leaf.serialize(), vec![0x51, 0xc0]);
        assert_eq!(LeafScript::deserialize([0x51u8, 0xc0]).unwrap(), leaf);
        assert_eq!(
            LeafScript::deserialize([0x51u8, 0x51]),
            Err(PsbtError::InvalidLeafVer(InvalidLeafVer(0x51)))
        );
        assert_eq!(LeafScript::deserialize([0u8; 0]), Err(PsbtError::UnexpectedEod));
    }

    #[test]
    fn tap_tree_value() {
        let leaves = vec![
            LeafInfo::tap_script(1, TapScript::from_unsafe(vec![0x51u8])),
            LeafInfo::tap_script(2, TapScript::from_unsafe(vec![0x52u8])),
            LeafInfo::tap_script(2, TapScript::from_unsafe(vec![0x53u8])),
        ];
        let tree = TapTree::from_leaves(leaves).unwrap();
        let data = tree.serialize();
        assert_eq!(data, vec![1, 0xc0, 1, 0x51, 2, 0xc0, 1, 0x52, 2, 0xc0, 1, 0x53]);
        assert_eq!(TapTree::deserialize(&data).unwrap(), tree);
        assert_eq!(
            TapTree::deserialize(&data[..8]),
            Err(PsbtError::InvalidTapTree(InvalidTree::Unfinalized))
        );
    }

    #[test]
    fn key_origin_value() {
        assert_eq!(
            KeyOrigin::deserialize([1u8, 2, 3]),
            Err(PsbtError::InvalidKeyOrigin(ByteStr::from(vec![1u8, 2, 3])))
        );
        let origin = KeyOrigin::new([1, 2, 3, 4], [0x8000_0054]);
        assert_eq!(KeyOrigin::deserialize(origin.serialize()).unwrap(), origin);
    }

    #[test]
    fn sighash_value() {
        assert_eq!(SighashType::all().serialize(), vec![1, 0, 0, 0]);
        assert_eq!(
            SighashType::deserialize([0x84u8, 0, 0, 0]),
            Err(PsbtError::InvalidSighash(NonStandardValue::with(0x84, "SighashType")))
        );
    }

    #[test]
    fn truncated_pair() {
        // key length 2, key type 0x03, one byte of key data missing
        let data = [2u8, 0x03];
        assert_eq!(
            KeyValue::<InputKey>::decode(&mut Cursor::new(data)),
            Err(DecodeError::Psbt(PsbtError::UnexpectedEod))
        );
        // value length claims far more bytes than available
        let data = [1u8, 0x03, 0xFE, 0xFF, 0xFF, 0xFF, 0x7F, 1, 0, 0, 0];
        assert_eq!(
            KeyValue::<InputKey>::decode(&mut Cursor::new(data)),
            Err(DecodeError::Psbt(PsbtError::UnexpectedEod))
        );
    }

    #[test]
    fn prop_key() {
        let key = PropKey {
            identifier: s!("tst"),
            subtype: 0x42,
            data: vec![1, 2],
        };
        let data = key.serialize();
        assert_eq!(data, vec![3, b't', b's', b't', 0x42, 1, 2]);
        assert_eq!(PropKey::deserialize(data).unwrap(), key);
    }
}
