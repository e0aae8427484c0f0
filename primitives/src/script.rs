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

//! Script parsing and the output templates which are not covered by the
//! consensus library: bare public key, bare multisig and single-SHA256 P2WSH.

use amplify::hex::ToHex;
use bc::opcodes::*;
use bc::{
    LegacyPk, RedeemScript, ScriptBytes, ScriptPubkey, SigScript, WScriptHash, Witness,
    WitnessScript,
};

use crate::sha256;

/// Returns the opcode pushing a small integer `n` in range `0..=16`.
pub const fn op_pushnum(n: u8) -> Option<u8> {
    match n {
        0 => Some(OP_PUSHBYTES_0),
        1..=16 => Some(OP_PUSHNUM_1 + n - 1),
        _ => None,
    }
}

/// Returns the small integer pushed by an `OP_N` opcode, if the opcode is one.
pub const fn pushnum_value(op: u8) -> Option<u8> {
    match op {
        OP_PUSHBYTES_0 => Some(0),
        OP_PUSHNUM_1..=OP_PUSHNUM_16 => Some(op - OP_PUSHNUM_1 + 1),
        _ => None,
    }
}

/// Malformed script: a push opcode runs past the end of the script.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display("Unknown script error")]
pub struct ScriptError;

/// Single script instruction, produced by the decompiler and consumed by the
/// compiler.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Instruction {
    /// Data push (using any push opcode except `OP_0` and `OP_N` small
    /// integers).
    Push(Vec<u8>),
    /// Non-push opcode, including `OP_0`, `OP_1NEGATE` and `OP_1`..=`OP_16`.
    Op(u8),
}

impl Instruction {
    pub fn push(data: impl Into<Vec<u8>>) -> Self { Instruction::Push(data.into()) }

    pub fn push_bytes(&self) -> Option<&[u8]> {
        match self {
            Instruction::Push(data) => Some(data),
            Instruction::Op(_) => None,
        }
    }

    /// Stack item produced by the instruction; small-integer opcodes count as
    /// pushes.
    pub fn to_stack_item(&self) -> Option<Vec<u8>> {
        match self {
            Instruction::Push(data) => Some(data.clone()),
            Instruction::Op(OP_PUSHBYTES_0) => Some(vec![]),
            Instruction::Op(OP_PUSHNUM_NEG1) => Some(vec![0x81]),
            Instruction::Op(op) => pushnum_value(*op).map(|n| vec![n]),
        }
    }

    pub fn is_push(&self) -> bool {
        match self {
            Instruction::Push(_) => true,
            // OP_RESERVED sits in the push range and is push-only for Bitcoin Core
            Instruction::Op(op) => *op <= OP_PUSHNUM_16,
        }
    }

    pub fn is_op(&self, op: u8) -> bool { matches!(self, Instruction::Op(o) if *o == op) }
}

/// Appends `data` with the minimal push opcode (BIP-62 rule 3). Unlike
/// [`ScriptBytes::push_slice`], single-byte values `1..=16` and `0x81` become
/// `OP_N` opcodes.
fn push_minimal(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => script.push(OP_PUSHBYTES_0),
        1 if (1..=16).contains(&data[0]) => script.push(OP_PUSHNUM_1 + data[0] - 1),
        1 if data[0] == 0x81 => script.push(OP_PUSHNUM_NEG1),
        len @ 1..=0x4b => {
            script.push(len as u8);
            script.extend_from_slice(data);
        }
        len @ 0x4c..=0xff => {
            script.push(OP_PUSHDATA1);
            script.push(len as u8);
            script.extend_from_slice(data);
        }
        len @ 0x100..=0xffff => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(len as u16).to_le_bytes());
            script.extend_from_slice(data);
        }
        len => {
            script.push(OP_PUSHDATA4);
            script.extend_from_slice(&(len as u32).to_le_bytes());
            script.extend_from_slice(data);
        }
    }
}

fn read_len(bytes: &[u8], pos: &mut usize, width: usize) -> Result<usize, ScriptError> {
    let end = *pos + width;
    if end > bytes.len() {
        return Err(ScriptError);
    }
    let mut buf = [0u8; 4];
    buf[..width].copy_from_slice(&bytes[*pos..end]);
    *pos = end;
    Ok(u32::from_le_bytes(buf) as usize)
}

/// Instruction-level view of raw script bytes.
pub trait ScriptBytesExt: Sized {
    /// Compiles the instructions, choosing the minimal push opcode for each
    /// data push.
    fn compile<'i>(instructions: impl IntoIterator<Item = &'i Instruction>) -> Self;

    /// Compiles a stack of items into a push-only script.
    fn from_stack<'a>(stack: impl IntoIterator<Item = &'a Vec<u8>>) -> Self;

    /// Appends data with the minimal push opcode.
    fn push_minimal(&mut self, data: &[u8]);

    /// Splits the script into instructions. Fails if any push runs past the
    /// end of the script.
    fn decompile(&self) -> Result<Vec<Instruction>, ScriptError>;

    /// Malformed scripts are not push-only.
    fn is_push_only(&self) -> bool {
        self.decompile().map(|instrs| instrs.iter().all(Instruction::is_push)).unwrap_or(false)
    }

    /// Converts push-only script into the stack it produces.
    fn to_stack(&self) -> Result<Vec<Vec<u8>>, ScriptError> {
        self.decompile()?
            .iter()
            .map(|instr| instr.to_stack_item().ok_or(ScriptError))
            .collect()
    }

    /// Human-readable assembly, for logging.
    fn to_asm(&self) -> String {
        match self.decompile() {
            Ok(instrs) => instrs
                .iter()
                .map(|instr| match instr {
                    Instruction::Push(data) => data.to_hex(),
                    Instruction::Op(op) => match pushnum_value(*op) {
                        Some(n) => format!("OP_{n}"),
                        None => format!("OP_{op:#04x}"),
                    },
                })
                .collect::<Vec<_>>()
                .join(" "),
            Err(_) => s!("<invalid>"),
        }
    }
}

impl ScriptBytesExt for ScriptBytes {
    fn compile<'i>(instructions: impl IntoIterator<Item = &'i Instruction>) -> Self {
        let mut script = vec![];
        for instr in instructions {
            match instr {
                Instruction::Push(data) => push_minimal(&mut script, data),
                Instruction::Op(op) => script.push(*op),
            }
        }
        ScriptBytes::from_unsafe(script)
    }

    fn from_stack<'a>(stack: impl IntoIterator<Item = &'a Vec<u8>>) -> Self {
        let mut script = vec![];
        for item in stack {
            push_minimal(&mut script, item);
        }
        ScriptBytes::from_unsafe(script)
    }

    fn push_minimal(&mut self, data: &[u8]) {
        let mut script = self.to_vec();
        push_minimal(&mut script, data);
        *self = ScriptBytes::from_unsafe(script);
    }

    fn decompile(&self) -> Result<Vec<Instruction>, ScriptError> {
        let bytes = &self[..];
        let mut instructions = vec![];
        let mut pos = 0usize;
        while pos < bytes.len() {
            let op = bytes[pos];
            pos += 1;
            let len = match op {
                OP_PUSHBYTES_1..=OP_PUSHBYTES_75 => op as usize,
                OP_PUSHDATA1 => read_len(bytes, &mut pos, 1)?,
                OP_PUSHDATA2 => read_len(bytes, &mut pos, 2)?,
                OP_PUSHDATA4 => read_len(bytes, &mut pos, 4)?,
                op => {
                    instructions.push(Instruction::Op(op));
                    continue;
                }
            };
            let end = pos.checked_add(len).filter(|end| *end <= bytes.len()).ok_or(ScriptError)?;
            instructions.push(Instruction::Push(bytes[pos..end].to_vec()));
            pos = end;
        }
        Ok(instructions)
    }
}

/// Output templates and detectors missing from [`ScriptPubkey`].
pub trait ScriptPubkeyExt: Sized {
    fn p2pk(pubkey: &LegacyPk) -> Self;

    /// Bare `OP_m <pubkeys...> OP_n OP_CHECKMULTISIG` script. Returns `None`
    /// if `m` or the number of keys is outside of `1..=16`, or if `m > n`.
    fn multisig(m: u8, pubkeys: &[LegacyPk]) -> Option<Self>;

    fn is_p2pk(&self) -> bool;

    /// Keys are checked only for their serialization length.
    fn is_multisig(&self) -> bool;

    /// Witness version of a witness program output.
    fn witness_version(&self) -> Option<u8>;
}

impl ScriptPubkeyExt for ScriptPubkey {
    fn p2pk(pubkey: &LegacyPk) -> Self {
        let mut script = vec![];
        push_minimal(&mut script, &pubkey.to_vec());
        script.push(OP_CHECKSIG);
        ScriptPubkey::from_unsafe(script)
    }

    fn multisig(m: u8, pubkeys: &[LegacyPk]) -> Option<Self> {
        let n = u8::try_from(pubkeys.len()).ok()?;
        if !(1..=16).contains(&m) || !(1..=16).contains(&n) || m > n {
            return None;
        }
        let mut script = Vec::with_capacity(3 + pubkeys.len() * 34);
        script.push(op_pushnum(m)?);
        for pk in pubkeys {
            push_minimal(&mut script, &pk.to_vec());
        }
        script.push(op_pushnum(n)?);
        script.push(OP_CHECKMULTISIG);
        Some(ScriptPubkey::from_unsafe(script))
    }

    fn is_p2pk(&self) -> bool {
        match self.len() {
            35 => self[0] == OP_PUSHBYTES_33 && self[34] == OP_CHECKSIG,
            67 => self[0] == OP_PUSHBYTES_65 && self[66] == OP_CHECKSIG,
            _ => false,
        }
    }

    fn is_multisig(&self) -> bool {
        let Ok(instrs) = self.as_script_bytes().decompile() else {
            return false;
        };
        let [Instruction::Op(op_m), keys @ .., Instruction::Op(op_n), last] = instrs.as_slice()
        else {
            return false;
        };
        if !last.is_op(OP_CHECKMULTISIG) {
            return false;
        }
        let (Some(m), Some(n)) = (pushnum_value(*op_m), pushnum_value(*op_n)) else {
            return false;
        };
        m >= 1
            && m <= n
            && keys.len() == n as usize
            && keys.iter().all(|key| {
                matches!(key.push_bytes(), Some(data) if data.len() == 33 || data.len() == 65)
            })
    }

    fn witness_version(&self) -> Option<u8> {
        if !self.is_witness_program() {
            return None;
        }
        match self[0] {
            OP_PUSHBYTES_0 => Some(0),
            op => pushnum_value(op).filter(|v| *v > 0),
        }
    }
}

/// P2WSH commitments of a witness script.
///
/// The witness program is the single SHA256 of the script (BIP-141).
pub trait WitnessScriptExt {
    fn wscript_hash(&self) -> WScriptHash;

    fn to_p2wsh(&self) -> ScriptPubkey { ScriptPubkey::p2wsh(self.wscript_hash()) }

    /// Witness program used as the redeem script of a P2SH-wrapped P2WSH.
    fn to_p2sh_wsh(&self) -> RedeemScript { RedeemScript::p2sh_wsh(self.wscript_hash()) }
}

impl WitnessScriptExt for WitnessScript {
    fn wscript_hash(&self) -> WScriptHash { WScriptHash::from(sha256(&self[..])) }
}

/// Owned copy of witness stack elements.
pub trait WitnessExt {
    fn to_stack(&self) -> Vec<Vec<u8>>;
}

impl WitnessExt for Witness {
    fn to_stack(&self) -> Vec<Vec<u8>> { self.elements().map(<[u8]>::to_vec).collect() }
}

/// Builds input script pushing the stack items.
pub fn sig_script_from_stack<'a>(stack: impl IntoIterator<Item = &'a Vec<u8>>) -> SigScript {
    SigScript::from(ScriptBytes::from_stack(stack))
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use amplify::ByteArray;
    use bc::WPubkeyHash;

    use super::*;

    #[test]
    fn minimal_pushes() {
        let script = ScriptBytes::from_stack(&[vec![], vec![5], vec![0x81], vec![0x17]]);
        assert_eq!(&script[..], &[OP_PUSHBYTES_0, 0x55, OP_PUSHNUM_NEG1, 0x01, 0x17]);

        let script = ScriptBytes::from_stack(&[vec![0xAA; 76]]);
        assert_eq!(&script[..2], &[OP_PUSHDATA1, 76]);
        let script = ScriptBytes::from_stack(&[vec![0xAA; 300]]);
        assert_eq!(&script[..3], &[OP_PUSHDATA2, 0x2c, 0x01]);
    }

    #[test]
    fn decompile_compile() {
        let instrs = vec![
            Instruction::Op(OP_DUP),
            Instruction::Op(OP_HASH160),
            Instruction::push([0x11; 20]),
            Instruction::Op(OP_EQUALVERIFY),
            Instruction::Op(OP_CHECKSIG),
        ];
        let script = ScriptPubkey::from(ScriptBytes::compile(&instrs));
        assert!(script.is_p2pkh());
        assert_eq!(script.as_script_bytes().decompile().unwrap(), instrs);
    }

    #[test]
    fn truncated_push() {
        let script = ScriptBytes::from_unsafe(vec![0x05, 0x01, 0x02]);
        assert_eq!(script.decompile(), Err(ScriptError));
        assert_eq!(ScriptError.to_string(), "Unknown script error");
        assert!(!script.is_push_only());
        let script = ScriptBytes::from_unsafe(vec![OP_PUSHDATA2, 0x01]);
        assert_eq!(script.decompile(), Err(ScriptError));
    }

    #[test]
    fn stack() {
        let script = ScriptBytes::from_unsafe(vec![OP_PUSHBYTES_0, 0x02, 0xAB, 0xCD, 0x53]);
        assert!(script.is_push_only());
        assert_eq!(script.to_stack().unwrap(), vec![vec![], vec![0xAB, 0xCD], vec![3]]);
        let non_push = ScriptBytes::from_unsafe(vec![OP_DUP]);
        assert!(!non_push.is_push_only());
        assert!(non_push.to_stack().is_err());
    }

    #[test]
    fn templates() {
        let pk = LegacyPk::from_str(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();
        assert!(ScriptPubkey::p2pk(&pk).is_p2pk());
        assert!(ScriptPubkey::p2wpkh(WPubkeyHash::from_byte_array([1u8; 20])).is_p2wpkh());
        let ms = ScriptPubkey::multisig(1, &[pk, pk]).unwrap();
        assert_eq!(ms[0], OP_PUSHNUM_1);
        assert_eq!(ms[ms.len() - 2], 0x52);
        assert_eq!(ms[ms.len() - 1], OP_CHECKMULTISIG);
        assert!(ms.is_multisig());
        assert!(!ScriptPubkey::p2pk(&pk).is_multisig());
        assert!(ScriptPubkey::multisig(3, &[pk, pk]).is_none());
        assert!(ScriptPubkey::multisig(0, &[pk]).is_none());
        let sh = RedeemScript::from_unsafe(vec![0x51]).to_script_pubkey();
        assert!(sh.is_p2sh());
        assert_eq!(sh.witness_version(), None);
    }

    #[test]
    fn p2wsh_single_sha256() {
        // BIP-141 example: `OP_1` witness script
        let wsh = WitnessScript::from_unsafe(vec![0x51]).to_p2wsh();
        assert!(wsh.is_p2wsh());
        assert_eq!(wsh.witness_version(), Some(0));
        assert_eq!(
            wsh[2..].to_hex(),
            "4ae81572f06e1b88fd5ced7a1a000945432e83e1551e6f721ee9c00b8cc33260"
        );
        let nested = WitnessScript::from_unsafe(vec![0x51]).to_p2sh_wsh();
        assert!(nested.is_p2sh_wsh());
        assert_eq!(&nested[2..], &wsh[2..]);
    }
}
