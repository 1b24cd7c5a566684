//! EIP-712 typed data payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single field of a struct type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedDataField {
    /// Field name, e.g. `owner`.
    pub name: String,
    /// Solidity type, e.g. `address`.
    #[serde(rename = "type")]
    pub ty: String,
}

impl TypedDataField {
    /// Create a field.
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// The `domain` section. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataDomain {
    /// Signing domain name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Signing domain version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Chain the signature is valid on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Contract that verifies the signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifying_contract: Option<String>,
    /// Disambiguating salt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// The complete payload for `eth_signTypedData_v4`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    /// Struct type definitions keyed by type name.
    pub types: BTreeMap<String, Vec<TypedDataField>>,
    /// The type of `message`, e.g. `Permit`.
    pub primary_type: String,
    /// Signing domain.
    pub domain: TypedDataDomain,
    /// The message being signed.
    pub message: Map<String, Value>,
}
