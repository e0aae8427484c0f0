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

use invoice::{Address, Network};
use primitives::{ScriptBytes, ScriptPubkey, ScriptPubkeyExt, SigScript, Witness};
use taproot::LeafVer;
use tracing::{debug, trace};

use crate::{
    P2ms, P2msFields, P2pk, P2pkFields, P2pkh, P2pkhFields, P2sh, P2shFields, P2tr, P2trFields,
    P2wpkh, P2wpkhFields, P2wsh, P2wshFields, PaymentError,
};

/// Options controlling construction of a payment.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct PaymentOpts {
    /// Cross-check all supplied fields and fail on any inconsistency.
    pub validate: bool,
    /// Accept empty signature placeholders in multisig inputs.
    pub allow_incomplete: bool,
}

impl Default for PaymentOpts {
    fn default() -> Self {
        PaymentOpts {
            validate: true,
            allow_incomplete: false,
        }
    }
}

impl PaymentOpts {
    /// Options which only derive fields without cross-checking them.
    pub fn unchecked() -> Self {
        PaymentOpts {
            validate: false,
            allow_incomplete: false,
        }
    }

    /// Validating options accepting incomplete multisig inputs.
    pub fn incomplete() -> Self {
        PaymentOpts {
            validate: true,
            allow_incomplete: true,
        }
    }
}

/// Inner script of a P2SH, P2WSH or P2TR payment together with the data spending it.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Redeem {
    pub output: Option<ScriptBytes>,
    pub input: Option<SigScript>,
    pub witness: Option<Witness>,
    pub network: Option<Network>,
    pub redeem_version: Option<LeafVer>,
    /// Name of the template the redeem was produced from, if known.
    pub name: Option<String>,
    /// Script committed to by a witness-script-hash redeem output. Lets P2SH-wrapped P2WSH
    /// payments expose the witness script before any witness is known.
    pub witness_script: Option<ScriptBytes>,
}

impl Redeem {
    pub fn with_output(output: impl Into<Vec<u8>>) -> Self {
        Redeem {
            output: Some(ScriptBytes::from_unsafe(output.into())),
            ..default!()
        }
    }

    pub fn has_input(&self) -> bool { matches!(&self.input, Some(input) if !input.is_empty()) }

    pub fn has_witness(&self) -> bool {
        matches!(&self.witness, Some(witness) if !witness.is_empty())
    }
}

/// Tag of a script template.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[display(lowercase)]
pub enum TemplateType {
    P2pk,
    P2pkh,
    P2ms,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

impl TemplateType {
    /// Detects the template matching an output script.
    pub fn detect(output: &ScriptPubkey) -> Option<Self> {
        Some(if output.is_p2pk() {
            TemplateType::P2pk
        } else if output.is_p2pkh() {
            TemplateType::P2pkh
        } else if output.is_multisig() {
            TemplateType::P2ms
        } else if output.is_p2sh() {
            TemplateType::P2sh
        } else if output.is_p2wpkh() {
            TemplateType::P2wpkh
        } else if output.is_p2wsh() {
            TemplateType::P2wsh
        } else if output.is_p2tr() {
            TemplateType::P2tr
        } else {
            return None;
        })
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("unknown script template '{0}'")]
pub struct UnknownTemplate(pub String);

impl FromStr for TemplateType {
    type Err = UnknownTemplate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "p2pk" => TemplateType::P2pk,
            "p2pkh" => TemplateType::P2pkh,
            "p2ms" => TemplateType::P2ms,
            "p2sh" => TemplateType::P2sh,
            "p2wpkh" => TemplateType::P2wpkh,
            "p2wsh" => TemplateType::P2wsh,
            "p2tr" => TemplateType::P2tr,
            _ => return Err(UnknownTemplate(s.to_owned())),
        })
    }
}

/// Shared accessors of constructed payments.
pub trait Payment {
    fn template_type(&self) -> TemplateType;

    /// Name of the payment, including names of nested redeem payments (like `p2sh-p2wpkh`).
    fn name(&self) -> String { self.template_type().to_string() }

    fn network(&self) -> Network;

    fn output(&self) -> Option<&ScriptPubkey>;

    fn address(&self) -> Option<Address> { None }

    fn input(&self) -> Option<&SigScript>;

    fn witness(&self) -> Option<&Witness>;

    fn redeem_version(&self) -> Option<LeafVer> { None }

    /// Describes the payment as a redeem of an enclosing P2SH, P2WSH or P2TR payment.
    fn to_redeem(&self) -> Redeem {
        Redeem {
            output: self.output().map(|output| output.as_script_bytes().clone()),
            input: self.input().cloned(),
            witness: self.witness().cloned(),
            network: Some(self.network()),
            redeem_version: self.redeem_version(),
            name: Some(self.name()),
            witness_script: None,
        }
    }
}

/// Known fields of a payment, tagged with the template to construct.
#[derive(Clone, Eq, PartialEq, Debug, From)]
pub enum KnownFields {
    #[from]
    P2pk(P2pkFields),
    #[from]
    P2pkh(P2pkhFields),
    #[from]
    P2ms(P2msFields),
    #[from]
    P2sh(P2shFields),
    #[from]
    P2wpkh(P2wpkhFields),
    #[from]
    P2wsh(P2wshFields),
    #[from]
    P2tr(P2trFields),
}

impl KnownFields {
    pub fn template_type(&self) -> TemplateType {
        match self {
            KnownFields::P2pk(_) => TemplateType::P2pk,
            KnownFields::P2pkh(_) => TemplateType::P2pkh,
            KnownFields::P2ms(_) => TemplateType::P2ms,
            KnownFields::P2sh(_) => TemplateType::P2sh,
            KnownFields::P2wpkh(_) => TemplateType::P2wpkh,
            KnownFields::P2wsh(_) => TemplateType::P2wsh,
            KnownFields::P2tr(_) => TemplateType::P2tr,
        }
    }
}

/// Constructed payment of any supported template.
#[derive(Clone, Eq, PartialEq, Debug, From)]
pub enum ScriptTemplate {
    #[from]
    P2pk(P2pk),
    #[from]
    P2pkh(P2pkh),
    #[from]
    P2ms(P2ms),
    #[from]
    P2sh(P2sh),
    #[from]
    P2wpkh(P2wpkh),
    #[from]
    P2wsh(P2wsh),
    #[from]
    P2tr(P2tr),
}

impl ScriptTemplate {
    /// Derives all computable fields of a payment and checks the supplied ones agree.
    pub fn create(fields: impl Into<KnownFields>, opts: PaymentOpts) -> Result<Self, PaymentError> {
        let fields = fields.into();
        let template = fields.template_type();
        let payment = match fields {
            KnownFields::P2pk(fields) => P2pk::with(fields, opts).map(Self::from),
            KnownFields::P2pkh(fields) => P2pkh::with(fields, opts).map(Self::from),
            KnownFields::P2ms(fields) => P2ms::with(fields, opts).map(Self::from),
            KnownFields::P2sh(fields) => P2sh::with(fields, opts).map(Self::from),
            KnownFields::P2wpkh(fields) => P2wpkh::with(fields, opts).map(Self::from),
            KnownFields::P2wsh(fields) => P2wsh::with(fields, opts).map(Self::from),
            KnownFields::P2tr(fields) => P2tr::with(fields, opts).map(Self::from),
        };
        match &payment {
            Ok(payment) => trace!(%template, name = %payment.name(), "payment constructed"),
            Err(err) => debug!(%template, %err, "payment construction failed"),
        }
        payment
    }

    fn as_payment(&self) -> &dyn Payment {
        match self {
            ScriptTemplate::P2pk(p) => p,
            ScriptTemplate::P2pkh(p) => p,
            ScriptTemplate::P2ms(p) => p,
            ScriptTemplate::P2sh(p) => p,
            ScriptTemplate::P2wpkh(p) => p,
            ScriptTemplate::P2wsh(p) => p,
            ScriptTemplate::P2tr(p) => p,
        }
    }
}

impl Payment for ScriptTemplate {
    fn template_type(&self) -> TemplateType { self.as_payment().template_type() }
    fn name(&self) -> String { self.as_payment().name() }
    fn network(&self) -> Network { self.as_payment().network() }
    fn output(&self) -> Option<&ScriptPubkey> { self.as_payment().output() }
    fn address(&self) -> Option<Address> { self.as_payment().address() }
    fn input(&self) -> Option<&SigScript> { self.as_payment().input() }
    fn witness(&self) -> Option<&Witness> { self.as_payment().witness() }
    fn redeem_version(&self) -> Option<LeafVer> { self.as_payment().redeem_version() }
    fn to_redeem(&self) -> Redeem { self.as_payment().to_redeem() }
}

impl From<&ScriptTemplate> for Redeem {
    fn from(template: &ScriptTemplate) -> Self { template.to_redeem() }
}
