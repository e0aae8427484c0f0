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

//! Taproot script trees and control blocks over the consensus taproot types.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod control;
mod tree;

pub use control::{
    root_hash_from_path, ControlBlockError, ControlBlockExt, TAPROOT_CONTROL_BASE_SIZE,
    TAPROOT_CONTROL_MAX_NODE_COUNT, TAPROOT_CONTROL_NODE_SIZE,
};
pub use primitives::{
    ControlBlock, FutureLeafVer, InternalKeypair, InternalPk, IntoTapHash, InvalidLeafVer,
    LeafScript, LeafVer, OutputPk, TapBranchHash, TapLeafHash, TapMerklePath, TapNodeHash,
    TapSighash, TAPROOT_ANNEX_PREFIX, TAPROOT_LEAF_MASK, TAPROOT_LEAF_TAPSCRIPT,
};
pub use tree::{
    ControlBlockFactory, InvalidTree, LeafInfo, TapBranch, TapLeaf, TapNode, TapTree,
    TapTreeBuilder, TAPROOT_MAX_DEPTH,
};
